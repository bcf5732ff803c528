//! 파이프라인 오케스트레이션 -- 리더/파서/인덱서/유지보수 워커의 생명주기 관리
//!
//! [`IngestPipeline`]은 core의 [`Pipeline`] trait을 구현하여
//! `logsift-daemon`에서 start/stop/health_check로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! Reader -> Batcher -> Queue(raw) -> Parser xN -> Batcher -> Queue(parsed) -> Indexer xM -> Store
//!                                       │                                       │
//!                                       └──────────── DeadLetterSink ───────────┘
//!                                                        Bookkeeper <- commit(receipt)
//! ```
//!
//! 실행할 단계는 [`Stage`]로 고릅니다. PostgreSQL 백엔드에서는 단계마다
//! 별도 프로세스로 나눠 실행할 수 있습니다.

use std::collections::BTreeSet;
use std::time::Duration;

use logsift_core::error::{LogsiftError, PipelineError};
use logsift_core::pipeline::{HealthStatus, Pipeline};
use logsift_core::types::FileStatus;
use tokio::task::JoinHandle;

use crate::bookkeeper::ProgressLedger;
use crate::context::{Backend, IngestContext};
use crate::error::IngestError;
use crate::queue::BatchQueue;
use crate::worker::{
    IndexerSummary, MaintenanceSummary, ParserSummary, ReaderSummary, run_indexer,
    run_maintenance, run_parser, run_reader,
};

/// 큐 깊이가 `max_depth` 대비 이 비율을 넘으면 성능 저하로 봅니다.
const DEPTH_DEGRADED_RATIO: f64 = 0.9;

/// drain 중 상태 확인 주기
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 파이프라인 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// 파일 읽기 + 원시 배치 전송
    Reader,
    /// 분류/파싱 워커 풀
    Parser,
    /// 저장/커밋 워커 풀
    Indexer,
    /// dead-letter 보존 정책 적용
    Maintenance,
}

impl Stage {
    /// 모든 단계
    pub const ALL: [Stage; 4] = [Stage::Reader, Stage::Parser, Stage::Indexer, Stage::Maintenance];

    /// 단계 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reader => "reader",
            Self::Parser => "parser",
            Self::Indexer => "indexer",
            Self::Maintenance => "maintenance",
        }
    }
}

/// 워커 하나의 실행 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerReport {
    /// 리더 결과
    Reader(ReaderSummary),
    /// 파서 결과
    Parser(ParserSummary),
    /// 인덱서 결과
    Indexer(IndexerSummary),
    /// 유지보수 결과
    Maintenance(MaintenanceSummary),
}

/// 정지 후 집계된 실행 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// 리더 결과
    pub reader: Option<ReaderSummary>,
    /// 파서 결과 합계
    pub parser: ParserSummary,
    /// 인덱서 결과 합계
    pub indexer: IndexerSummary,
    /// 유지보수 결과
    pub maintenance: Option<MaintenanceSummary>,
}

impl PipelineReport {
    fn absorb(&mut self, report: WorkerReport) {
        match report {
            WorkerReport::Reader(summary) => self.reader = Some(summary),
            WorkerReport::Parser(s) => {
                self.parser.raw_batches += s.raw_batches;
                self.parser.records += s.records;
                self.parser.dead_letters += s.dead_letters;
                self.parser.parsed_batches += s.parsed_batches;
            }
            WorkerReport::Indexer(s) => {
                self.indexer.batches += s.batches;
                self.indexer.inserted += s.inserted;
                self.indexer.duplicates += s.duplicates;
                self.indexer.dead_letters += s.dead_letters;
                self.indexer.dropped += s.dropped;
                self.indexer.released += s.released;
            }
            WorkerReport::Maintenance(summary) => self.maintenance = Some(summary),
        }
    }
}

/// 파이프라인 실행 상태
#[derive(Debug, Clone, PartialEq, Eq)]
enum PipelineState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

struct WorkerHandle {
    name: String,
    stage: Stage,
    handle: JoinHandle<Result<WorkerReport, IngestError>>,
}

/// 수집 파이프라인
///
/// # 사용 예시
/// ```ignore
/// use logsift_ingest::{IngestContext, IngestPipelineBuilder};
///
/// let ctx = IngestContext::in_memory(config)?;
/// let mut pipeline = IngestPipelineBuilder::new(ctx).build()?;
/// pipeline.start().await?;
/// pipeline.drain().await?;
/// pipeline.stop().await?;
/// ```
pub struct IngestPipeline<B: Backend> {
    ctx: IngestContext<B>,
    stages: BTreeSet<Stage>,
    state: PipelineState,
    tasks: Vec<WorkerHandle>,
    report: PipelineReport,
}

impl<B: Backend> IngestPipeline<B> {
    /// 현재 상태 이름
    pub fn state_name(&self) -> &str {
        match self.state {
            PipelineState::Initialized => "initialized",
            PipelineState::Running => "running",
            PipelineState::Stopped => "stopped",
        }
    }

    /// 워커 컨텍스트
    pub fn context(&self) -> &IngestContext<B> {
        &self.ctx
    }

    /// 실행 중인 워커 이름 목록
    pub fn worker_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    /// 마지막 정지 시 집계된 결과
    pub fn report(&self) -> &PipelineReport {
        &self.report
    }

    fn spawn_workers(&mut self) {
        let ctx = &self.ctx;
        let workers = &ctx.config.workers;
        let mut tasks = Vec::new();

        if self.stages.contains(&Stage::Reader) {
            let ctx = ctx.clone();
            tasks.push(WorkerHandle {
                name: "reader".to_owned(),
                stage: Stage::Reader,
                handle: tokio::spawn(async move { run_reader(ctx).await.map(WorkerReport::Reader) }),
            });
        }
        if self.stages.contains(&Stage::Parser) {
            for id in 0..workers.parsers {
                let ctx = ctx.clone();
                tasks.push(WorkerHandle {
                    name: format!("parser-{id}"),
                    stage: Stage::Parser,
                    handle: tokio::spawn(async move {
                        run_parser(ctx, id).await.map(WorkerReport::Parser)
                    }),
                });
            }
        }
        if self.stages.contains(&Stage::Indexer) {
            for id in 0..workers.indexers {
                let ctx = ctx.clone();
                tasks.push(WorkerHandle {
                    name: format!("indexer-{id}"),
                    stage: Stage::Indexer,
                    handle: tokio::spawn(async move {
                        run_indexer(ctx, id).await.map(WorkerReport::Indexer)
                    }),
                });
            }
        }
        if self.stages.contains(&Stage::Maintenance) {
            let ctx = ctx.clone();
            tasks.push(WorkerHandle {
                name: "maintenance".to_owned(),
                stage: Stage::Maintenance,
                handle: tokio::spawn(async move {
                    run_maintenance(ctx).await.map(WorkerReport::Maintenance)
                }),
            });
        }
        self.tasks = tasks;
    }

    fn reader_finished(&self) -> bool {
        self.tasks
            .iter()
            .filter(|t| t.stage == Stage::Reader)
            .all(|t| t.handle.is_finished())
    }

    /// one-shot 모드에서 모든 입력이 저장/커밋될 때까지 기다립니다.
    ///
    /// 리더가 끝나고, 두 큐가 비고, 진행 중인 파일이 없으면 반환합니다.
    /// 커밋할 수 없는 구간이 남아 진행이 멈추면 유휴 시간 후 경고와 함께 반환합니다.
    pub async fn drain(&self) -> Result<(), LogsiftError> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::NotRunning.into());
        }
        let config = &self.ctx.config;
        let idle_grace = Duration::from_millis(
            config.batching.raw.batch_timeout_ms
                + config.batching.parsed.batch_timeout_ms
                + config.queue.dequeue_timeout_ms
                + 1000,
        );
        let mut last_progress: Option<(u64, tokio::time::Instant)> = None;

        loop {
            if self.ctx.cancel.is_cancelled() {
                return Ok(());
            }
            if self.reader_finished() {
                let raw = self.ctx.raw_queue.depth().await?;
                let parsed = self.ctx.parsed_queue.depth().await?;
                let files = self.ctx.ledger.list().await?;
                let in_progress = files
                    .iter()
                    .filter(|f| f.status == FileStatus::InProgress)
                    .count();
                if raw == 0 && parsed == 0 {
                    if in_progress == 0 {
                        tracing::info!(files = files.len(), "pipeline drained");
                        return Ok(());
                    }
                    let committed: u64 = files.iter().map(|f| f.committed_offset).sum();
                    let now = tokio::time::Instant::now();
                    match last_progress {
                        Some((seen, since)) if seen == committed => {
                            if now.duration_since(since) >= idle_grace {
                                tracing::warn!(
                                    in_progress,
                                    "pipeline idle with uncommitted files, giving up drain"
                                );
                                return Ok(());
                            }
                        }
                        _ => last_progress = Some((committed, now)),
                    }
                } else {
                    last_progress = None;
                }
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}

impl<B: Backend> Pipeline for IngestPipeline<B> {
    async fn start(&mut self) -> Result<(), LogsiftError> {
        if self.state == PipelineState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }
        if self.state == PipelineState::Stopped {
            // 취소된 토큰은 되돌릴 수 없음
            return Err(PipelineError::InitFailed("pipeline cannot be restarted".to_owned()).into());
        }

        let stages: Vec<&str> = self.stages.iter().map(Stage::as_str).collect();
        tracing::info!(
            backend = B::NAME,
            stages = ?stages,
            parsers = self.ctx.config.workers.parsers,
            indexers = self.ctx.config.workers.indexers,
            "starting ingest pipeline"
        );
        self.spawn_workers();
        self.state = PipelineState::Running;
        tracing::info!(workers = self.tasks.len(), "ingest pipeline started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), LogsiftError> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::NotRunning.into());
        }
        tracing::info!("stopping ingest pipeline");
        self.ctx.cancel.cancel();

        let mut first_failure: Option<PipelineError> = None;
        for task in self.tasks.drain(..) {
            let reason = match task.handle.await {
                Ok(Ok(report)) => {
                    self.report.absorb(report);
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            };
            tracing::error!(worker = %task.name, %reason, "worker failed");
            if first_failure.is_none() {
                first_failure = Some(PipelineError::WorkerFailed {
                    worker: task.name,
                    reason,
                });
            }
        }

        self.state = PipelineState::Stopped;
        tracing::info!(
            records = self.report.parser.records,
            inserted = self.report.indexer.inserted,
            duplicates = self.report.indexer.duplicates,
            dead_letters = self.report.parser.dead_letters + self.report.indexer.dead_letters,
            "ingest pipeline stopped"
        );
        match first_failure {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            PipelineState::Running => {
                let follow = self.ctx.config.reader.follow;
                // one-shot 리더는 정상적으로 끝남
                if let Some(task) = self
                    .tasks
                    .iter()
                    .find(|t| t.handle.is_finished() && (follow || t.stage != Stage::Reader))
                {
                    return HealthStatus::Unhealthy(format!("worker '{}' exited", task.name));
                }

                let max_depth = self.ctx.config.queue.max_depth;
                for queue in [&self.ctx.raw_queue, &self.ctx.parsed_queue] {
                    match queue.depth().await {
                        Ok(depth) if max_depth > 0 => {
                            let ratio = depth as f64 / max_depth as f64;
                            if ratio > DEPTH_DEGRADED_RATIO {
                                return HealthStatus::Degraded(format!(
                                    "queue '{}' depth high: {:.1}%",
                                    queue.topic(),
                                    ratio * 100.0
                                ));
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            return HealthStatus::Unhealthy(format!(
                                "queue '{}' unavailable: {e}",
                                queue.topic()
                            ));
                        }
                    }
                }
                HealthStatus::Healthy
            }
            PipelineState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            PipelineState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 수집 파이프라인 빌더
pub struct IngestPipelineBuilder<B: Backend> {
    ctx: IngestContext<B>,
    stages: BTreeSet<Stage>,
}

impl<B: Backend> IngestPipelineBuilder<B> {
    /// 모든 단계를 실행하는 빌더를 생성합니다.
    pub fn new(ctx: IngestContext<B>) -> Self {
        Self {
            ctx,
            stages: Stage::ALL.into_iter().collect(),
        }
    }

    /// 실행할 단계를 지정합니다.
    pub fn stages(mut self, stages: &[Stage]) -> Self {
        self.stages = stages.iter().copied().collect();
        self
    }

    /// 파이프라인을 빌드합니다.
    pub fn build(self) -> Result<IngestPipeline<B>, IngestError> {
        if self.stages.is_empty() {
            return Err(IngestError::Config {
                field: "stages".to_owned(),
                reason: "at least one stage is required".to_owned(),
            });
        }
        let workers = &self.ctx.config.workers;
        if self.stages.contains(&Stage::Parser) && workers.parsers == 0 {
            return Err(IngestError::Config {
                field: "workers.parsers".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.stages.contains(&Stage::Indexer) && workers.indexers == 0 {
            return Err(IngestError::Config {
                field: "workers.indexers".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        Ok(IngestPipeline {
            ctx: self.ctx,
            stages: self.stages,
            state: PipelineState::Initialized,
            tasks: Vec::new(),
            report: PipelineReport::default(),
        })
    }
}
