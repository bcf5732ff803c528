//! 인메모리 진행 원장

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use logsift_core::types::FileProgress;
use tokio::sync::Mutex;

use super::{CommitReceipt, ProgressLedger};
use crate::error::IngestError;

/// 프로세스 수명 동안 유지되는 진행 원장
#[derive(Clone, Default)]
pub struct MemoryLedger {
    files: Arc<Mutex<HashMap<String, FileProgress>>>,
}

impl MemoryLedger {
    /// 빈 원장을 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<R>(&self, source_file: &str, f: impl FnOnce(&mut FileProgress) -> R) -> R {
        let mut files = self.files.lock().await;
        let progress = files
            .entry(source_file.to_owned())
            .or_insert_with(|| FileProgress::new(source_file));
        f(progress)
    }
}

impl ProgressLedger for MemoryLedger {
    async fn progress(&self, source_file: &str) -> Result<Option<FileProgress>, IngestError> {
        Ok(self.files.lock().await.get(source_file).cloned())
    }

    async fn begin_reading(&self, source_file: &str) -> Result<Option<FileProgress>, IngestError> {
        Ok(self
            .update(source_file, |p| p.begin_reading().then(|| p.clone()))
            .await)
    }

    async fn record_claim(&self, source_file: &str, claimed_offset: u64) -> Result<(), IngestError> {
        self.update(source_file, |p| p.record_claim(claimed_offset))
            .await;
        Ok(())
    }

    async fn finish_reading(
        &self,
        source_file: &str,
        final_offset: u64,
    ) -> Result<FileProgress, IngestError> {
        Ok(self
            .update(source_file, |p| {
                p.finish_reading(final_offset);
                p.clone()
            })
            .await)
    }

    async fn mark_failed(&self, source_file: &str, reason: &str) -> Result<(), IngestError> {
        self.update(source_file, |p| p.mark_failed(reason)).await;
        Ok(())
    }

    async fn commit(&self, receipt: &CommitReceipt) -> Result<BTreeMap<String, u64>, IngestError> {
        let mut files = self.files.lock().await;
        let mut committed = BTreeMap::new();
        for (file, ranges) in receipt.claims() {
            let progress = files
                .entry(file.clone())
                .or_insert_with(|| FileProgress::new(file.as_str()));
            committed.insert(file.clone(), progress.apply_commit(ranges));
        }
        Ok(committed)
    }

    async fn list(&self) -> Result<Vec<FileProgress>, IngestError> {
        let files = self.files.lock().await;
        let mut all: Vec<FileProgress> = files.values().cloned().collect();
        all.sort_by(|a, b| a.source_file.cmp(&b.source_file));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logsift_core::types::{ByteRange, FileStatus};

    fn receipt(file: &str, start: u64, end: u64) -> CommitReceipt {
        let mut claims = BTreeMap::new();
        claims.insert(file.to_owned(), vec![ByteRange::new(start, end)]);
        CommitReceipt::new(uuid::Uuid::new_v4(), claims)
    }

    #[tokio::test]
    async fn lifecycle_reaches_complete() {
        let ledger = MemoryLedger::new();
        assert!(ledger.progress("a.log").await.unwrap().is_none());

        let started = ledger.begin_reading("a.log").await.unwrap().unwrap();
        assert_eq!(started.status, FileStatus::InProgress);
        ledger.record_claim("a.log", 50).await.unwrap();
        let finished = ledger.finish_reading("a.log", 100).await.unwrap();
        assert_eq!(finished.claimed_offset, 100);
        assert_eq!(finished.status, FileStatus::InProgress);

        ledger.commit(&receipt("a.log", 0, 100)).await.unwrap();
        let done = ledger.progress("a.log").await.unwrap().unwrap();
        assert_eq!(done.status, FileStatus::Complete);
        assert!(ledger.begin_reading("a.log").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn out_of_order_commits_wait_for_gap() {
        let ledger = MemoryLedger::new();
        ledger.begin_reading("a.log").await.unwrap();

        let offsets = ledger.commit(&receipt("a.log", 40, 80)).await.unwrap();
        assert_eq!(offsets["a.log"], 0);
        let offsets = ledger.commit(&receipt("a.log", 0, 40)).await.unwrap();
        assert_eq!(offsets["a.log"], 80);
    }

    #[tokio::test]
    async fn failed_file_is_retried() {
        let ledger = MemoryLedger::new();
        ledger.begin_reading("b.log").await.unwrap();
        ledger.mark_failed("b.log", "permission denied").await.unwrap();
        let failed = ledger.progress("b.log").await.unwrap().unwrap();
        assert_eq!(failed.status, FileStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("permission denied"));

        let retried = ledger.begin_reading("b.log").await.unwrap().unwrap();
        assert_eq!(retried.status, FileStatus::InProgress);
    }

    #[tokio::test]
    async fn list_is_sorted_by_file() {
        let ledger = MemoryLedger::new();
        ledger.begin_reading("z.log").await.unwrap();
        ledger.begin_reading("a.log").await.unwrap();
        let names: Vec<String> = ledger
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.source_file)
            .collect();
        assert_eq!(names, ["a.log", "z.log"]);
    }
}
