//! 배치 -- 항목 누적 및 크기/바이트/시간 기준 플러시
//!
//! [`Batcher`]는 항목을 모으다가 먼저 만족한 조건으로 배치를 봉인(seal)합니다.
//!
//! - 개수: `batch_size_messages`에 도달
//! - 바이트: `batch_size_bytes`에 도달
//! - 시간: 첫 항목(또는 claim) 이후 `batch_timeout_ms` 경과
//!
//! 봉인은 버퍼를 새 버퍼로 교체(`mem::replace`)하므로, 봉인된 배치를 전송하는 동안에도
//! 누적은 새 버퍼로 계속됩니다. 봉인된 [`Batch`]는 불변이며 소비자에게는 완성된
//! 배치만 보입니다. 전송은 [`dispatch`] 모듈이 담당합니다.

pub mod dispatch;

pub use dispatch::{BatchDispatcher, DispatchSettings};

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use logsift_core::config::BatchingConfig;
use logsift_core::metrics as m;
use logsift_core::types::{ByteRange, ParsedRecord, RawLine, coalesce_range};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

/// 배치를 봉인한 조건
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushTrigger {
    /// 항목 수 도달
    Count,
    /// 누적 바이트 도달
    Bytes,
    /// 시간 초과
    Timeout,
    /// 종료 시 잔여분
    Shutdown,
    /// dead-letter 재처리
    Replay,
}

impl FlushTrigger {
    /// 소문자 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Bytes => "bytes",
            Self::Timeout => "timeout",
            Self::Shutdown => "shutdown",
            Self::Replay => "replay",
        }
    }
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 배치에 담을 수 있는 항목
pub trait Batchable {
    /// 바이트 기준 계산에 쓰이는 크기
    fn byte_size(&self) -> usize;

    /// 항목이 책임지는 파일과 구간
    fn claim(&self) -> (&str, ByteRange);
}

impl Batchable for RawLine {
    fn byte_size(&self) -> usize {
        RawLine::byte_size(self)
    }

    fn claim(&self) -> (&str, ByteRange) {
        (&self.source_file, self.claim)
    }
}

impl Batchable for ParsedRecord {
    fn byte_size(&self) -> usize {
        ParsedRecord::byte_size(self)
    }

    fn claim(&self) -> (&str, ByteRange) {
        (&self.source_file, self.claim)
    }
}

/// 봉인된 배치 -- 큐 전송 및 저장 커밋의 단위
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch<T> {
    /// 배치 ID
    pub id: Uuid,
    /// 봉인 시각
    pub created_at: DateTime<Utc>,
    /// 봉인 조건
    pub trigger: FlushTrigger,
    /// 항목 바이트 합
    pub byte_size: usize,
    /// 항목 (순서 유지)
    pub items: Vec<T>,
    /// 이 배치가 책임지는 파일별 구간 (dead-letter된 라인 포함)
    pub claims: BTreeMap<String, Vec<ByteRange>>,
    /// 이 배치가 큐에 들어간 뒤 ack할 상위 단계 배치 ID
    #[serde(skip)]
    pub upstream: Vec<Uuid>,
}

impl<T> Batch<T> {
    /// 항목 목록으로 배치를 직접 만듭니다 (재처리 등).
    pub fn from_items(items: Vec<T>, trigger: FlushTrigger) -> Self
    where
        T: Batchable,
    {
        let mut claims = BTreeMap::new();
        let mut byte_size = 0;
        for item in &items {
            byte_size += item.byte_size();
            let (file, range) = item.claim();
            add_claim(&mut claims, file, range);
        }
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            trigger,
            byte_size,
            items,
            claims,
            upstream: Vec::new(),
        }
    }

    /// 항목 수
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// 항목이 없는지 확인합니다 (claim만 있는 배치도 비어 있음).
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn add_claim(claims: &mut BTreeMap<String, Vec<ByteRange>>, file: &str, range: ByteRange) {
    match claims.get_mut(file) {
        Some(ranges) => coalesce_range(ranges, range),
        None => {
            let mut ranges = Vec::new();
            coalesce_range(&mut ranges, range);
            if !ranges.is_empty() {
                claims.insert(file.to_owned(), ranges);
            }
        }
    }
}

/// 누적 중인 버퍼
#[derive(Debug)]
struct Buffer<T> {
    items: Vec<T>,
    byte_size: usize,
    claims: BTreeMap<String, Vec<ByteRange>>,
    upstream: Vec<Uuid>,
    opened_at: Option<Instant>,
}

impl<T> Default for Buffer<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            byte_size: 0,
            claims: BTreeMap::new(),
            upstream: Vec::new(),
            opened_at: None,
        }
    }
}

impl<T> Buffer<T> {
    fn is_empty(&self) -> bool {
        self.items.is_empty() && self.claims.is_empty() && self.upstream.is_empty()
    }

    fn open(&mut self, now: Instant) {
        if self.opened_at.is_none() {
            self.opened_at = Some(now);
        }
    }
}

/// 배치 누적기
pub struct Batcher<T> {
    /// 단계 이름 (raw, parsed) -- 메트릭 레이블
    stage: &'static str,
    max_items: usize,
    max_bytes: usize,
    timeout: Duration,
    current: Buffer<T>,
}

impl<T: Batchable> Batcher<T> {
    /// 새 배치 누적기를 생성합니다.
    pub fn new(stage: &'static str, config: &BatchingConfig) -> Self {
        Self {
            stage,
            max_items: config.batch_size_messages.max(1),
            max_bytes: config.batch_size_bytes.max(1),
            timeout: Duration::from_millis(config.batch_timeout_ms),
            current: Buffer::default(),
        }
    }

    /// 항목을 추가합니다. 개수/바이트 조건이 만족되면 봉인된 배치를 반환합니다.
    pub fn offer(&mut self, item: T, now: Instant) -> Option<Batch<T>> {
        self.current.open(now);
        let (file, range) = item.claim();
        add_claim(&mut self.current.claims, file, range);
        self.current.byte_size += item.byte_size();
        self.current.items.push(item);

        if self.current.items.len() >= self.max_items {
            return self.seal(FlushTrigger::Count);
        }
        if self.current.byte_size >= self.max_bytes {
            return self.seal(FlushTrigger::Bytes);
        }
        None
    }

    /// 이 단계로 항목을 만들지 않은 라인(dead-letter)의 구간을 배치에 포함시킵니다.
    pub fn cover(&mut self, source_file: &str, range: ByteRange, now: Instant) {
        if range.is_empty() {
            return;
        }
        self.current.open(now);
        add_claim(&mut self.current.claims, source_file, range);
    }

    /// 현재 버퍼가 큐에 들어간 뒤 ack할 상위 배치 ID를 등록합니다.
    pub fn attach_upstream(&mut self, batch_id: Uuid, now: Instant) {
        self.current.open(now);
        self.current.upstream.push(batch_id);
    }

    /// 시간 조건을 확인합니다. 초과했으면 봉인된 배치를 반환합니다.
    pub fn poll(&mut self, now: Instant) -> Option<Batch<T>> {
        match self.deadline() {
            Some(deadline) if now >= deadline => self.seal(FlushTrigger::Timeout),
            _ => None,
        }
    }

    /// 시간 조건이 만족될 시각. 버퍼가 비어 있으면 `None`.
    pub fn deadline(&self) -> Option<Instant> {
        self.current.opened_at.map(|opened| opened + self.timeout)
    }

    /// 남은 내용을 즉시 봉인합니다. 비어 있으면 `None`.
    pub fn flush(&mut self, trigger: FlushTrigger) -> Option<Batch<T>> {
        self.seal(trigger)
    }

    /// 누적 중인 항목 수
    pub fn len(&self) -> usize {
        self.current.items.len()
    }

    /// 누적 중인 내용이 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// 누적 중인 바이트
    pub fn buffered_bytes(&self) -> usize {
        self.current.byte_size
    }

    fn seal(&mut self, trigger: FlushTrigger) -> Option<Batch<T>> {
        if self.current.is_empty() {
            return None;
        }
        let buffer = std::mem::take(&mut self.current);
        metrics::counter!(
            m::BATCHES_FLUSHED_TOTAL,
            m::LABEL_STAGE => self.stage,
            m::LABEL_TRIGGER => trigger.as_str()
        )
        .increment(1);
        tracing::debug!(
            stage = self.stage,
            trigger = trigger.as_str(),
            items = buffer.items.len(),
            bytes = buffer.byte_size,
            "batch sealed"
        );

        Some(Batch {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            trigger,
            byte_size: buffer.byte_size,
            items: buffer.items,
            claims: buffer.claims,
            upstream: buffer.upstream,
        })
    }
}
