//! 큐 -- 단계 사이의 at-least-once 배치 전송
//!
//! [`BatchQueue`]는 봉인된 배치를 직렬화된 페이로드로 주고받습니다.
//! 전달된 배치는 가시성 타임아웃 동안 다른 소비자에게 보이지 않으며,
//! 그 안에 ack되지 않으면 다시 전달됩니다.
//!
//! # 구현
//! - [`MemoryQueue`]: 프로세스 내부 큐 (프로세스 수명 동안만 유지)
//! - [`PgQueue`]: PostgreSQL 테이블, `FOR UPDATE SKIP LOCKED` 임대 (크래시에도 유지)
//!
//! 토픽(`raw`, `parsed`)마다 하나의 큐 인스턴스를 사용합니다.

pub mod memory;
pub mod postgres;

pub use memory::MemoryQueue;
pub use postgres::PgQueue;

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::batcher::Batch;
use crate::error::IngestError;

/// 원시 라인 토픽
pub const TOPIC_RAW: &str = "raw";

/// 파싱 레코드 토픽
pub const TOPIC_PARSED: &str = "parsed";

/// 소비자에게 전달된 배치
#[derive(Debug, Clone)]
pub struct Delivery {
    /// 배치 ID (ack/release 키)
    pub batch_id: Uuid,
    /// 직렬화된 배치
    pub payload: Vec<u8>,
    /// 지금까지 전달된 횟수 (1부터)
    pub delivery_count: u32,
}

/// at-least-once 배치 큐
pub trait BatchQueue: Clone + Send + Sync + 'static {
    /// 토픽 이름
    fn topic(&self) -> &str;

    /// 배치를 넣습니다. 같은 ID를 다시 넣으면 무시합니다.
    fn enqueue(
        &self,
        batch_id: Uuid,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<Uuid, IngestError>> + Send;

    /// 최대 `max_batches`개를 임대합니다. `timeout` 동안 없으면 빈 목록을 반환합니다.
    fn dequeue(
        &self,
        max_batches: usize,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<Delivery>, IngestError>> + Send;

    /// 처리 완료된 배치를 제거합니다. 임대 중인 배치가 없었으면 `false`.
    fn acknowledge(&self, batch_id: Uuid) -> impl Future<Output = Result<bool, IngestError>> + Send;

    /// 임대를 풀어 즉시 다시 전달되게 합니다.
    fn release(&self, batch_id: Uuid) -> impl Future<Output = Result<bool, IngestError>> + Send;

    /// ack되지 않은 배치 수 (대기 + 임대 중)
    fn depth(&self) -> impl Future<Output = Result<usize, IngestError>> + Send;
}

/// 배치를 큐 페이로드로 직렬화합니다.
pub fn encode_batch<T: Serialize>(batch: &Batch<T>) -> Result<Vec<u8>, IngestError> {
    Ok(serde_json::to_vec(batch)?)
}

/// 큐 페이로드를 배치로 역직렬화합니다.
pub fn decode_batch<T: DeserializeOwned>(payload: &[u8]) -> Result<Batch<T>, IngestError> {
    Ok(serde_json::from_slice(payload)?)
}
