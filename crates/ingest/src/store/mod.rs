//! 레코드 저장소 -- 유형별 테이블 쓰기와 조사/분석 쿼리
//!
//! [`RecordStore::write_batch`]는 파싱 배치 하나를 하나의 트랜잭션으로 기록하고
//! 성공 시 [`CommitReceipt`]를 발급합니다. `(source_file, byte_offset)`이 이미
//! 저장된 레코드는 중복으로 세고 건너뜁니다.
//!
//! # 구현
//! - [`MemoryStore`]: 테스트 및 단일 프로세스 실행용
//! - [`PgStore`]: `firewall_events`, `dns_events`, `auth_events` 테이블

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::collections::BTreeMap;
use std::future::Future;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use logsift_core::types::{AuthStatus, LogEvent, LogType, ParsedRecord};
use serde::Serialize;

use crate::batcher::Batch;
use crate::bookkeeper::CommitReceipt;
use crate::error::IngestError;

/// 배치 쓰기 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    /// 새로 저장된 레코드 수
    pub inserted: u64,
    /// 이미 저장되어 있어 건너뛴 레코드 수
    pub duplicates: u64,
    /// 유형별 새로 저장된 레코드 수
    pub by_type: BTreeMap<LogType, u64>,
}

impl WriteSummary {
    fn record(&mut self, log_type: LogType, inserted: u64, attempted: u64) {
        self.inserted += inserted;
        self.duplicates += attempted.saturating_sub(inserted);
        if inserted > 0 {
            *self.by_type.entry(log_type).or_default() += inserted;
        }
    }
}

/// 조회 시간 범위 `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    /// 시작 (포함)
    pub start: DateTime<Utc>,
    /// 끝 (제외)
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// 새 시간 범위를 생성합니다.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// 시각이 범위 안에 있는지 확인합니다.
    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        *ts >= self.start && *ts < self.end
    }
}

/// 저장된 이벤트
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredEvent {
    /// 소스 파일
    pub source_file: String,
    /// 원본 라인 오프셋
    pub byte_offset: u64,
    /// 이벤트 시각
    pub timestamp: DateTime<Utc>,
    /// 유형별 필드
    pub event: LogEvent,
}

impl From<&ParsedRecord> for StoredEvent {
    fn from(record: &ParsedRecord) -> Self {
        Self {
            source_file: record.source_file.clone(),
            byte_offset: record.byte_offset,
            timestamp: record.timestamp,
            event: record.event.clone(),
        }
    }
}

/// 시간대별 유형별 건수
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HourlyVolume {
    /// 정시로 자른 시각 (UTC)
    pub hour: DateTime<Utc>,
    /// 로그 유형
    pub log_type: LogType,
    /// 건수
    pub count: u64,
}

/// 주소별 건수
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressCount {
    /// 주소
    pub address: IpAddr,
    /// 건수
    pub count: u64,
}

/// 출발지/목적지 쌍별 건수
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressPair {
    /// 출발지
    pub src_ip: IpAddr,
    /// 목적지
    pub dst_ip: IpAddr,
    /// 건수
    pub count: u64,
}

/// 사용자명별 건수
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsernameCount {
    /// 사용자명
    pub username: String,
    /// 건수
    pub count: u64,
}

/// 유형별 레코드 저장소
pub trait RecordStore: Clone + Send + Sync + 'static {
    /// 배치 전체를 원자적으로 기록하고 커밋 영수증을 발급합니다.
    fn write_batch(
        &self,
        batch: &Batch<ParsedRecord>,
    ) -> impl Future<Output = Result<(WriteSummary, CommitReceipt), IngestError>> + Send;

    /// 출발지 또는 목적지가 `address`인 방화벽 이벤트 (시각순)
    fn firewall_by_address(
        &self,
        address: IpAddr,
        window: TimeWindow,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<StoredEvent>, IngestError>> + Send;

    /// 도메인별 DNS 이벤트 (시각순)
    fn dns_by_domain(
        &self,
        domain: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<StoredEvent>, IngestError>> + Send;

    /// 결과와 출발지 주소별 인증 이벤트 (시각순)
    fn auth_by_status_and_address(
        &self,
        status: AuthStatus,
        address: IpAddr,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<StoredEvent>, IngestError>> + Send;

    /// 시간대별 유형별 건수 (시각, 유형 순)
    fn hourly_volume(
        &self,
        window: TimeWindow,
    ) -> impl Future<Output = Result<Vec<HourlyVolume>, IngestError>> + Send;

    /// 방화벽 출발지 주소 상위 `n`개 (건수 내림차순)
    fn top_source_addresses(
        &self,
        window: TimeWindow,
        n: usize,
    ) -> impl Future<Output = Result<Vec<AddressCount>, IngestError>> + Send;

    /// 목적지 포트로 향한 주소 쌍 상위 `n`개 (건수 내림차순)
    fn lateral_movement(
        &self,
        dst_port: u16,
        n: usize,
    ) -> impl Future<Output = Result<Vec<AddressPair>, IngestError>> + Send;

    /// 실패한 로그인의 사용자명 상위 `n`개 (건수 내림차순)
    fn top_failed_usernames(
        &self,
        n: usize,
    ) -> impl Future<Output = Result<Vec<UsernameCount>, IngestError>> + Send;

    /// 유형별 저장 레코드 수
    fn count_by_type(
        &self,
    ) -> impl Future<Output = Result<BTreeMap<LogType, u64>, IngestError>> + Send;
}

/// 배치의 claim으로 영수증을 발급합니다.
pub(crate) fn receipt_for<T>(batch: &Batch<T>) -> CommitReceipt {
    CommitReceipt::new(batch.id, batch.claims.clone())
}
