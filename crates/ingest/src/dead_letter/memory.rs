//! 인메모리 dead-letter 저장소

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use logsift_core::types::DeadLetterEntry;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{DeadLetterSink, RetentionPolicy, RetentionReport, record_appended, record_retention};
use crate::error::IngestError;

#[derive(Default)]
struct Entries {
    /// 추가 순 (오래된 것이 앞)
    queue: VecDeque<DeadLetterEntry>,
    keys: HashSet<(String, u64)>,
}

impl Entries {
    fn retain(&mut self, mut keep: impl FnMut(&DeadLetterEntry) -> bool) -> u64 {
        let before = self.queue.len();
        let keys = &mut self.keys;
        self.queue.retain(|entry| {
            let kept = keep(entry);
            if !kept {
                keys.remove(&(entry.source_file.clone(), entry.byte_offset));
            }
            kept
        });
        (before - self.queue.len()) as u64
    }
}

/// 프로세스 수명 동안 유지되는 dead-letter 저장소
#[derive(Clone, Default)]
pub struct MemoryDeadLetters {
    entries: Arc<Mutex<Entries>>,
}

impl MemoryDeadLetters {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeadLetterSink for MemoryDeadLetters {
    async fn append(&self, entries: Vec<DeadLetterEntry>) -> Result<u64, IngestError> {
        let mut state = self.entries.lock().await;
        let mut added = Vec::new();
        for entry in entries {
            if state
                .keys
                .insert((entry.source_file.clone(), entry.byte_offset))
            {
                added.push(entry.reason.clone());
                state.queue.push_back(entry);
            }
        }
        record_appended(added.iter().map(String::as_str));
        Ok(added.len() as u64)
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, IngestError> {
        let state = self.entries.lock().await;
        Ok(state.queue.iter().take(limit).cloned().collect())
    }

    async fn take_for_retry(
        &self,
        limit: usize,
        max_retries: u32,
    ) -> Result<Vec<DeadLetterEntry>, IngestError> {
        let state = self.entries.lock().await;
        Ok(state
            .queue
            .iter()
            .filter(|e| e.retry_count < max_retries)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn remove(&self, ids: &[Uuid]) -> Result<u64, IngestError> {
        let ids: HashSet<&Uuid> = ids.iter().collect();
        let mut state = self.entries.lock().await;
        Ok(state.retain(|e| !ids.contains(&e.id)))
    }

    async fn bump_retry(&self, ids: &[Uuid]) -> Result<u64, IngestError> {
        let ids: HashSet<&Uuid> = ids.iter().collect();
        let mut state = self.entries.lock().await;
        let mut bumped = 0;
        for entry in state.queue.iter_mut().filter(|e| ids.contains(&e.id)) {
            entry.retry_count += 1;
            bumped += 1;
        }
        Ok(bumped)
    }

    async fn count(&self) -> Result<usize, IngestError> {
        Ok(self.entries.lock().await.queue.len())
    }

    async fn enforce_retention(
        &self,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> Result<RetentionReport, IngestError> {
        let cutoff = policy.cutoff(now);
        let mut state = self.entries.lock().await;
        let expired = state.retain(|e| e.failed_at >= cutoff);

        let mut evicted = 0;
        while state.queue.len() > policy.max_entries {
            if let Some(oldest) = state.queue.pop_front() {
                state.keys.remove(&(oldest.source_file, oldest.byte_offset));
                evicted += 1;
            }
        }
        let report = RetentionReport { expired, evicted };
        record_retention(&report);
        Ok(report)
    }
}
