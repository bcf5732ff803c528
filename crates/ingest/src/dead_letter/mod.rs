//! Dead-letter 저장소 -- 분류/검증/저장에 실패한 라인 보관
//!
//! 엔트리는 `(source_file, byte_offset)`으로 유일하며, 같은 라인이 재전달되어
//! 다시 실패해도 한 번만 기록됩니다. 파서 단계에서는 추가만 합니다.
//!
//! 보존 정책([`RetentionPolicy`]):
//! - `retention`보다 오래된 엔트리 제거
//! - `max_entries`를 넘으면 오래된 것부터 제거
//! - `retry_count`가 `max_retries`에 도달한 엔트리는 재처리 대상에서 제외 (보존은 유지)

pub mod memory;
pub mod postgres;
pub mod replay;

pub use memory::MemoryDeadLetters;
pub use postgres::PgDeadLetters;
pub use replay::{ReplaySummary, replay_dead_letters};

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use logsift_core::config::DeadLetterConfig;
use logsift_core::metrics as m;
use logsift_core::types::DeadLetterEntry;
use uuid::Uuid;

use crate::error::IngestError;

/// 보존 정책
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// 최대 보관 엔트리 수
    pub max_entries: usize,
    /// 재처리 시도 한도
    pub max_retries: u32,
    /// 보관 기간
    pub retention: Duration,
}

impl RetentionPolicy {
    /// dead-letter 설정에서 정책을 만듭니다.
    pub fn from_config(config: &DeadLetterConfig) -> Self {
        Self {
            max_entries: config.max_entries,
            max_retries: config.max_retries,
            retention: Duration::from_secs(config.retention_hours.saturating_mul(3600)),
        }
    }

    /// 이 시각 이전에 실패한 엔트리는 만료됩니다.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::TimeDelta::from_std(self.retention)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// 보존 정책 적용 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// 보관 기간이 지나 제거된 수
    pub expired: u64,
    /// 최대 개수를 넘어 제거된 수
    pub evicted: u64,
}

impl RetentionReport {
    /// 제거된 전체 수
    pub fn total(&self) -> u64 {
        self.expired + self.evicted
    }
}

/// dead-letter 저장소
pub trait DeadLetterSink: Clone + Send + Sync + 'static {
    /// 엔트리를 추가합니다. 이미 있는 `(source_file, byte_offset)`은 무시하고,
    /// 새로 추가된 수를 반환합니다.
    fn append(
        &self,
        entries: Vec<DeadLetterEntry>,
    ) -> impl Future<Output = Result<u64, IngestError>> + Send;

    /// 오래된 순으로 최대 `limit`개를 조회합니다.
    fn list(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<DeadLetterEntry>, IngestError>> + Send;

    /// 재시도 횟수가 `max_retries` 미만인 엔트리를 오래된 순으로 최대 `limit`개 조회합니다.
    fn take_for_retry(
        &self,
        limit: usize,
        max_retries: u32,
    ) -> impl Future<Output = Result<Vec<DeadLetterEntry>, IngestError>> + Send;

    /// 엔트리를 제거하고 제거된 수를 반환합니다.
    fn remove(&self, ids: &[Uuid]) -> impl Future<Output = Result<u64, IngestError>> + Send;

    /// 재시도 횟수를 하나 올립니다.
    fn bump_retry(&self, ids: &[Uuid]) -> impl Future<Output = Result<u64, IngestError>> + Send;

    /// 보관 중인 엔트리 수
    fn count(&self) -> impl Future<Output = Result<usize, IngestError>> + Send;

    /// 보존 정책을 적용합니다.
    fn enforce_retention(
        &self,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<RetentionReport, IngestError>> + Send;
}

/// 새로 추가된 엔트리를 사유별로 집계합니다.
pub(crate) fn record_appended<'a>(reasons: impl IntoIterator<Item = &'a str>) {
    for reason in reasons {
        metrics::counter!(m::DEAD_LETTERS_TOTAL, m::LABEL_REASON => reason.to_owned()).increment(1);
    }
}

pub(crate) fn record_retention(report: &RetentionReport) {
    if report.total() > 0 {
        metrics::counter!(m::DEAD_LETTERS_EVICTED_TOTAL).increment(report.total());
        tracing::info!(
            expired = report.expired,
            evicted = report.evicted,
            "dead-letter retention applied"
        );
    }
}
