//! 유지보수 태스크 -- dead-letter 보존 정책 적용과 큐 깊이 게이지 갱신

use std::time::Duration;

use chrono::Utc;
use logsift_core::metrics as m;

use crate::context::{Backend, IngestContext};
use crate::dead_letter::{DeadLetterSink, RetentionPolicy};
use crate::error::IngestError;
use crate::queue::BatchQueue;

/// 유지보수 태스크 실행 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceSummary {
    /// 실행 횟수
    pub passes: u64,
    /// 제거된 dead-letter 엔트리 수
    pub removed: u64,
}

/// 한 번의 유지보수를 수행하고 제거된 dead-letter 수를 반환합니다.
pub async fn maintenance_pass<B: Backend>(
    ctx: &IngestContext<B>,
    policy: &RetentionPolicy,
) -> Result<u64, IngestError> {
    for queue in [&ctx.raw_queue, &ctx.parsed_queue] {
        match queue.depth().await {
            Ok(depth) => {
                metrics::gauge!(m::QUEUE_DEPTH, m::LABEL_TOPIC => queue.topic().to_owned())
                    .set(depth as f64);
            }
            Err(e) => tracing::warn!(topic = queue.topic(), error = %e, "queue depth unavailable"),
        }
    }
    let report = ctx.dead_letters.enforce_retention(policy, Utc::now()).await?;
    Ok(report.total())
}

/// `dead_letter.maintenance_interval_secs`마다 유지보수를 실행합니다.
///
/// 한 번의 실패는 경고로 남기고 다음 주기에 다시 시도합니다.
pub async fn run_maintenance<B: Backend>(
    ctx: IngestContext<B>,
) -> Result<MaintenanceSummary, IngestError> {
    let policy = RetentionPolicy::from_config(&ctx.config.dead_letter);
    let period = Duration::from_secs(ctx.config.dead_letter.maintenance_interval_secs.max(1));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut summary = MaintenanceSummary::default();

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        match maintenance_pass(&ctx, &policy).await {
            Ok(removed) => {
                summary.passes += 1;
                summary.removed += removed;
            }
            Err(e) => tracing::warn!(error = %e, "maintenance pass failed"),
        }
    }

    tracing::debug!(passes = summary.passes, removed = summary.removed, "maintenance stopped");
    Ok(summary)
}
