//! 리더 워커 -- 파일 탐색, 파일별 읽기, 원시 배치 전송
//!
//! ```text
//! scanner ─┬─ file task (Semaphore, reader.concurrency) ─┐
//!          └─ file task ...                             ├─ mpsc ─ raw batcher ─ dispatcher ─ Queue(raw)
//! ```
//!
//! 파일 태스크는 원장의 `committed_offset`에서 읽기를 재개합니다.
//! 한 파일의 I/O 실패는 그 파일만 `failed`로 기록하고 다른 파일은 계속 읽습니다.
//! 원장이 파일 시작을 기록하지 못하면 그 파일만 건너뜁니다.
//! follow 모드에서는 EOF 이후 `poll_interval_ms`마다 추가된 데이터를 확인하고,
//! 주기적으로 디렉토리를 다시 탐색합니다. one-shot 모드에서는 EOF가 파일 종료를 뜻하며,
//! 한 번 탐색한 파일을 모두 읽으면 워커가 끝납니다.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use logsift_core::metrics as m;
use logsift_core::types::{FileStatus, RawLine};
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::batcher::{BatchDispatcher, Batcher, DispatchSettings, FlushTrigger};
use crate::bookkeeper::ProgressLedger;
use crate::context::{Backend, IngestContext};
use crate::error::IngestError;
use crate::reader::{FileReader, discover};

/// 원시 라인 채널 용량
const LINE_CHANNEL_CAPACITY: usize = 4096;

/// 리더 워커 실행 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderSummary {
    /// 끝까지 읽은 파일 수
    pub files_finished: usize,
    /// 실패한 파일 수
    pub files_failed: usize,
    /// 전송한 원시 배치 수
    pub batches: u64,
}

/// 파일 태스크 결과
enum FileOutcome {
    Finished,
    Failed,
    Interrupted,
}

/// 리더 워커를 실행합니다.
pub async fn run_reader<B: Backend>(ctx: IngestContext<B>) -> Result<ReaderSummary, IngestError> {
    let config = &ctx.config.reader;
    let (line_tx, line_rx) = mpsc::channel::<RawLine>(LINE_CHANNEL_CAPACITY);

    let dispatcher = BatchDispatcher::spawn(
        ctx.raw_queue.clone(),
        None,
        DispatchSettings::from_config(&ctx.config.queue),
        ctx.cancel.clone(),
    );
    let batcher_task = tokio::spawn(run_raw_batcher(
        Batcher::new("raw", &ctx.config.batching.raw),
        line_rx,
        dispatcher,
    ));

    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let active: Arc<Mutex<HashSet<String>>> = Arc::default();
    let mut done: HashSet<String> = HashSet::new();
    let mut files = JoinSet::new();
    let mut summary = ReaderSummary::default();
    let scan_interval = Duration::from_millis(config.scan_interval_ms);

    tracing::info!(
        log_dir = %config.log_dir,
        follow = config.follow,
        concurrency = config.concurrency,
        "reader started"
    );

    loop {
        match discover(&config.log_dir, &config.extension).await {
            Ok(paths) => {
                for path in paths {
                    let source_file = path.display().to_string();
                    if done.contains(&source_file) || active.lock().await.contains(&source_file) {
                        continue;
                    }
                    let progress = match ctx.ledger.begin_reading(&source_file).await {
                        Ok(Some(progress)) => progress,
                        Ok(None) => {
                            tracing::debug!(file = %source_file, "file already complete, skipping");
                            done.insert(source_file);
                            continue;
                        }
                        Err(e) => {
                            // follow 모드에서는 다음 탐색에서 다시 시도
                            metrics::counter!(m::READER_FILE_ERRORS_TOTAL).increment(1);
                            tracing::warn!(file = %source_file, error = %e, "ledger unavailable, file not started");
                            if !config.follow {
                                summary.files_failed += 1;
                            }
                            continue;
                        }
                    };
                    if !config.follow {
                        done.insert(source_file.clone());
                    }
                    active.lock().await.insert(source_file.clone());
                    files.spawn(read_file(
                        ctx.clone(),
                        path,
                        source_file,
                        progress.committed_offset,
                        line_tx.clone(),
                        Arc::clone(&semaphore),
                        Arc::clone(&active),
                    ));
                }
            }
            Err(e) => tracing::warn!(log_dir = %config.log_dir, error = %e, "directory scan failed"),
        }

        // 끝난 파일 태스크 정리
        while let Some(joined) = files.try_join_next() {
            tally(&mut summary, joined);
        }

        if !config.follow {
            break;
        }
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            _ = tokio::time::sleep(scan_interval) => {}
        }
    }

    while let Some(joined) = files.join_next().await {
        tally(&mut summary, joined);
    }
    drop(line_tx);

    summary.batches = batcher_task
        .await
        .map_err(|e| IngestError::Channel(format!("raw batcher task failed: {e}")))??;
    tracing::info!(
        files_finished = summary.files_finished,
        files_failed = summary.files_failed,
        batches = summary.batches,
        "reader stopped"
    );
    Ok(summary)
}

fn tally(
    summary: &mut ReaderSummary,
    joined: Result<FileOutcome, tokio::task::JoinError>,
) {
    match joined {
        Ok(FileOutcome::Finished) => summary.files_finished += 1,
        Ok(FileOutcome::Failed) => summary.files_failed += 1,
        Ok(FileOutcome::Interrupted) => {}
        Err(e) => {
            summary.files_failed += 1;
            tracing::error!(error = %e, "file task panicked");
        }
    }
}

/// 파일 하나를 읽어 라인을 채널로 보냅니다.
async fn read_file<B: Backend>(
    ctx: IngestContext<B>,
    path: PathBuf,
    source_file: String,
    resume_offset: u64,
    lines: mpsc::Sender<RawLine>,
    semaphore: Arc<Semaphore>,
    active: Arc<Mutex<HashSet<String>>>,
) -> FileOutcome {
    let outcome = match semaphore.acquire_owned().await {
        Ok(_permit) => match stream_file(&ctx, &path, resume_offset, &lines).await {
            Ok(outcome) => outcome,
            Err(e) => {
                metrics::counter!(m::READER_FILE_ERRORS_TOTAL).increment(1);
                tracing::error!(file = %source_file, error = %e, "file read failed");
                if let Err(ledger_err) = ctx.ledger.mark_failed(&source_file, &e.to_string()).await {
                    tracing::error!(file = %source_file, error = %ledger_err, "failed to record file failure");
                }
                FileOutcome::Failed
            }
        },
        Err(_) => FileOutcome::Interrupted,
    };
    active.lock().await.remove(&source_file);
    outcome
}

async fn stream_file<B: Backend>(
    ctx: &IngestContext<B>,
    path: &Path,
    resume_offset: u64,
    lines: &mpsc::Sender<RawLine>,
) -> Result<FileOutcome, IngestError> {
    let config = &ctx.config.reader;
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let mut reader = FileReader::open(path, resume_offset)
        .await?
        .with_line_limit(config.max_line_length);
    let source_file = reader.source_file().to_owned();
    tracing::debug!(file = %source_file, resume_offset, "reading file");

    let mut last_recorded = resume_offset;
    loop {
        if ctx.cancel.is_cancelled() {
            ctx.ledger
                .record_claim(&source_file, reader.claimed_offset())
                .await?;
            return Ok(FileOutcome::Interrupted);
        }
        match reader.next_line().await? {
            Some(line) => {
                metrics::counter!(m::READER_LINES_TOTAL).increment(1);
                metrics::counter!(m::READER_BYTES_TOTAL).increment(line.claim.len());
                lines
                    .send(line)
                    .await
                    .map_err(|_| IngestError::Channel("raw batcher stopped".to_owned()))?;
            }
            None if config.follow => {
                if reader.claimed_offset() > last_recorded {
                    last_recorded = reader.claimed_offset();
                    ctx.ledger.record_claim(&source_file, last_recorded).await?;
                }
                tokio::select! {
                    _ = ctx.cancel.cancelled() => {}
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            None => {
                reader.close();
                // 줄바꿈 없는 마지막 조각
                while let Some(line) = reader.next_line().await? {
                    metrics::counter!(m::READER_LINES_TOTAL).increment(1);
                    metrics::counter!(m::READER_BYTES_TOTAL).increment(line.claim.len());
                    lines
                        .send(line)
                        .await
                        .map_err(|_| IngestError::Channel("raw batcher stopped".to_owned()))?;
                }
                let progress = ctx
                    .ledger
                    .finish_reading(&source_file, reader.claimed_offset())
                    .await?;
                tracing::info!(
                    file = %source_file,
                    claimed_offset = progress.claimed_offset,
                    committed_offset = progress.committed_offset,
                    complete = progress.status == FileStatus::Complete,
                    "finished reading file"
                );
                return Ok(FileOutcome::Finished);
            }
        }
    }
}

/// 라인을 모아 원시 배치로 봉인하고 전송합니다. 채널이 닫히면 잔여분을 보냅니다.
async fn run_raw_batcher(
    mut batcher: Batcher<RawLine>,
    mut lines: mpsc::Receiver<RawLine>,
    dispatcher: BatchDispatcher<RawLine>,
) -> Result<u64, IngestError> {
    loop {
        let deadline = batcher.deadline();
        tokio::select! {
            line = lines.recv() => match line {
                Some(line) => {
                    if let Some(batch) = batcher.offer(line, Instant::now()) {
                        dispatcher.dispatch(batch).await?;
                    }
                }
                None => break,
            },
            _ = sleep_until_deadline(deadline), if deadline.is_some() => {
                if let Some(batch) = batcher.poll(Instant::now()) {
                    dispatcher.dispatch(batch).await?;
                }
            }
        }
    }
    if let Some(batch) = batcher.flush(FlushTrigger::Shutdown) {
        dispatcher.dispatch(batch).await?;
    }
    dispatcher.finish().await
}

pub(crate) async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MemoryBackend;
    use crate::queue::{BatchQueue, decode_batch};
    use logsift_core::LogsiftConfig;
    use std::io::Write;

    fn context(dir: &std::path::Path) -> IngestContext<MemoryBackend> {
        let mut config = LogsiftConfig::default();
        config.reader.log_dir = dir.display().to_string();
        config.reader.follow = false;
        config.batching.raw.batch_size_messages = 2;
        IngestContext::in_memory(config).unwrap()
    }

    async fn drain_lines(ctx: &IngestContext<MemoryBackend>) -> Vec<RawLine> {
        let mut lines = Vec::new();
        for delivery in ctx
            .raw_queue
            .dequeue(100, Duration::from_millis(10))
            .await
            .unwrap()
        {
            let batch: crate::batcher::Batch<RawLine> = decode_batch(&delivery.payload).unwrap();
            lines.extend(batch.items);
        }
        lines.sort_by(|a, b| (&a.source_file, a.byte_offset).cmp(&(&b.source_file, b.byte_offset)));
        lines
    }

    #[tokio::test]
    async fn one_shot_reads_every_file_into_raw_batches() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = std::fs::File::create(dir.path().join("a.log")).unwrap();
        writeln!(a, "first\n\nsecond").unwrap();
        write!(a, "tail").unwrap();
        std::fs::write(dir.path().join("b.log"), "only\n").unwrap();
        std::fs::write(dir.path().join("ignored.txt"), "nope\n").unwrap();

        let ctx = context(dir.path());
        let summary = run_reader(ctx.clone()).await.unwrap();
        assert_eq!(summary.files_finished, 2);
        assert_eq!(summary.batches, 2);

        let lines = drain_lines(&ctx).await;
        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, ["first", "second", "tail", "only"]);

        let progress = ctx.ledger.list().await.unwrap();
        assert_eq!(progress.len(), 2);
        assert!(progress.iter().all(|p| p.read_complete));
        let a_progress = progress.iter().find(|p| p.source_file.ends_with("a.log")).unwrap();
        assert_eq!(a_progress.claimed_offset, 18);
    }

    #[tokio::test]
    async fn completed_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.log"), "x\n").unwrap();
        let ctx = context(dir.path());
        let file = dir.path().join("a.log").display().to_string();

        ctx.ledger.begin_reading(&file).await.unwrap();
        ctx.ledger.finish_reading(&file, 2).await.unwrap();
        let receipt = crate::bookkeeper::CommitReceipt::new(
            uuid::Uuid::new_v4(),
            [(file.clone(), vec![logsift_core::types::ByteRange::new(0, 2)])]
                .into_iter()
                .collect(),
        );
        ctx.ledger.commit(&receipt).await.unwrap();

        let summary = run_reader(ctx.clone()).await.unwrap();
        assert_eq!(summary.files_finished, 0);
        assert_eq!(ctx.raw_queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn resume_starts_at_committed_offset() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.log"), "one\ntwo\nthree\n").unwrap();
        let ctx = context(dir.path());
        let file = dir.path().join("a.log").display().to_string();
        let receipt = crate::bookkeeper::CommitReceipt::new(
            uuid::Uuid::new_v4(),
            [(file, vec![logsift_core::types::ByteRange::new(0, 4)])]
                .into_iter()
                .collect(),
        );
        ctx.ledger.commit(&receipt).await.unwrap();

        run_reader(ctx.clone()).await.unwrap();
        let lines = drain_lines(&ctx).await;
        assert_eq!(lines[0].text, "two");
        assert_eq!(lines[0].line_number, 2);
        assert_eq!(lines.len(), 2);
    }

    /// `bad.log`의 읽기 시작만 실패하는 원장
    #[derive(Clone, Default)]
    struct FlakyLedger(crate::bookkeeper::MemoryLedger);

    impl ProgressLedger for FlakyLedger {
        async fn progress(
            &self,
            source_file: &str,
        ) -> Result<Option<logsift_core::types::FileProgress>, IngestError> {
            self.0.progress(source_file).await
        }

        async fn begin_reading(
            &self,
            source_file: &str,
        ) -> Result<Option<logsift_core::types::FileProgress>, IngestError> {
            if source_file.ends_with("bad.log") {
                return Err(IngestError::StorageWrite("connection refused".to_owned()));
            }
            self.0.begin_reading(source_file).await
        }

        async fn record_claim(&self, source_file: &str, claimed_offset: u64) -> Result<(), IngestError> {
            self.0.record_claim(source_file, claimed_offset).await
        }

        async fn finish_reading(
            &self,
            source_file: &str,
            final_offset: u64,
        ) -> Result<logsift_core::types::FileProgress, IngestError> {
            self.0.finish_reading(source_file, final_offset).await
        }

        async fn mark_failed(&self, source_file: &str, reason: &str) -> Result<(), IngestError> {
            self.0.mark_failed(source_file, reason).await
        }

        async fn commit(
            &self,
            receipt: &crate::bookkeeper::CommitReceipt,
        ) -> Result<std::collections::BTreeMap<String, u64>, IngestError> {
            self.0.commit(receipt).await
        }

        async fn list(&self) -> Result<Vec<logsift_core::types::FileProgress>, IngestError> {
            self.0.list().await
        }
    }

    struct FlakyLedgerBackend;

    impl Backend for FlakyLedgerBackend {
        type Queue = crate::queue::MemoryQueue;
        type Store = crate::store::MemoryStore;
        type Ledger = FlakyLedger;
        type DeadLetters = crate::dead_letter::MemoryDeadLetters;

        const NAME: &'static str = "flaky-ledger";
    }

    #[tokio::test]
    async fn ledger_error_on_one_file_does_not_stop_the_reader() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.log"), "lost\n").unwrap();
        std::fs::write(dir.path().join("good.log"), "kept\n").unwrap();
        let memory = context(dir.path());
        let ctx: IngestContext<FlakyLedgerBackend> = IngestContext {
            raw_queue: memory.raw_queue.clone(),
            parsed_queue: memory.parsed_queue.clone(),
            store: memory.store.clone(),
            ledger: FlakyLedger::default(),
            dead_letters: memory.dead_letters.clone(),
            config: memory.config.clone(),
            chain: memory.chain.clone(),
            cancel: memory.cancel.clone(),
        };

        let summary = run_reader(ctx.clone()).await.unwrap();
        assert_eq!(summary.files_finished, 1);
        assert_eq!(summary.files_failed, 1);

        let lines = drain_lines(&memory).await;
        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, ["kept"]);
    }

    #[tokio::test]
    async fn missing_directory_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir.path().join("missing"));
        let summary = run_reader(ctx).await.unwrap();
        assert_eq!(summary, ReaderSummary::default());
    }
}
