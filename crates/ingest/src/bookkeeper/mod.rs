//! 진행 원장 -- 파일별 읽기/커밋 진행 상태
//!
//! 리더는 읽기 시작, claim, 읽기 완료, 실패를 기록하고
//! 인덱서만 [`CommitReceipt`]로 `committed_offset`을 전진시킵니다.
//! 영수증은 저장소 쓰기 경로(또는 dead-letter 경로)에서만 만들어집니다.
//!
//! 상태 전이:
//! ```text
//! new → in_progress → complete
//!        in_progress → failed → in_progress (재시도)
//! ```

pub mod memory;
pub mod postgres;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

use std::collections::BTreeMap;
use std::future::Future;

use logsift_core::types::{ByteRange, FileProgress};

use crate::error::IngestError;

/// 영속 기록이 끝난 파일 구간의 증명
///
/// 크레이트 밖에서는 만들 수 없습니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    batch_id: uuid::Uuid,
    claims: BTreeMap<String, Vec<ByteRange>>,
}

impl CommitReceipt {
    pub(crate) fn new(batch_id: uuid::Uuid, claims: BTreeMap<String, Vec<ByteRange>>) -> Self {
        Self { batch_id, claims }
    }

    /// 영수증을 만든 배치 ID
    pub fn batch_id(&self) -> uuid::Uuid {
        self.batch_id
    }

    /// 파일별 커밋 구간
    pub fn claims(&self) -> &BTreeMap<String, Vec<ByteRange>> {
        &self.claims
    }

    /// 커밋 구간이 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.claims.values().all(Vec::is_empty)
    }
}

/// 파일별 진행 원장
pub trait ProgressLedger: Clone + Send + Sync + 'static {
    /// 파일의 진행 상태. 기록이 없으면 `None`.
    fn progress(
        &self,
        source_file: &str,
    ) -> impl Future<Output = Result<Option<FileProgress>, IngestError>> + Send;

    /// 읽기를 시작합니다. 이미 완료된 파일이면 `None`.
    fn begin_reading(
        &self,
        source_file: &str,
    ) -> impl Future<Output = Result<Option<FileProgress>, IngestError>> + Send;

    /// 리더가 방출한 구간의 끝을 기록합니다.
    fn record_claim(
        &self,
        source_file: &str,
        claimed_offset: u64,
    ) -> impl Future<Output = Result<(), IngestError>> + Send;

    /// 파일을 끝까지 읽었음을 기록합니다.
    fn finish_reading(
        &self,
        source_file: &str,
        final_offset: u64,
    ) -> impl Future<Output = Result<FileProgress, IngestError>> + Send;

    /// 읽기 실패를 기록합니다.
    fn mark_failed(
        &self,
        source_file: &str,
        reason: &str,
    ) -> impl Future<Output = Result<(), IngestError>> + Send;

    /// 영수증의 구간을 커밋하고 파일별 새 `committed_offset`을 반환합니다.
    fn commit(
        &self,
        receipt: &CommitReceipt,
    ) -> impl Future<Output = Result<BTreeMap<String, u64>, IngestError>> + Send;

    /// 모든 파일의 진행 상태 (파일명 순)
    fn list(&self) -> impl Future<Output = Result<Vec<FileProgress>, IngestError>> + Send;
}
