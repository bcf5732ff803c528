//! Dead-letter 재처리
//!
//! 재시도 가능한 엔트리를 현재 파서 체인으로 다시 파싱해 저장소에 기록합니다.
//! 성공한 엔트리는 제거하고, 여전히 실패하는 엔트리는 재시도 횟수를 올립니다.
//! 원래 구간은 dead-letter 시점에 이미 커밋되었으므로 진행 원장은 건드리지 않습니다.

use logsift_core::metrics as m;
use uuid::Uuid;

use super::{DeadLetterSink, RetentionPolicy};
use crate::batcher::{Batch, FlushTrigger};
use crate::error::IngestError;
use crate::parser::ParserChain;
use crate::store::RecordStore;

/// 재처리 한 회차 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// 확인한 엔트리 수
    pub examined: usize,
    /// 저장에 성공해 제거한 엔트리 수
    pub replayed: usize,
    /// 여전히 실패해 재시도 횟수를 올린 엔트리 수
    pub still_failing: usize,
    /// 이미 저장되어 있던 레코드 수
    pub duplicates: u64,
}

/// 재시도 가능한 엔트리를 최대 `batch_size`개 재처리합니다.
///
/// 저장 실패 시 엔트리는 그대로 두고 에러를 반환합니다.
pub async fn replay_dead_letters<S, R>(
    sink: &S,
    store: &R,
    chain: &ParserChain,
    policy: &RetentionPolicy,
    batch_size: usize,
    max_line_length: usize,
) -> Result<ReplaySummary, IngestError>
where
    S: DeadLetterSink,
    R: RecordStore,
{
    let entries = sink.take_for_retry(batch_size, policy.max_retries).await?;
    let mut summary = ReplaySummary {
        examined: entries.len(),
        ..ReplaySummary::default()
    };
    if entries.is_empty() {
        return Ok(summary);
    }

    let mut records = Vec::new();
    let mut replayed: Vec<Uuid> = Vec::new();
    let mut failing: Vec<Uuid> = Vec::new();
    for entry in &entries {
        if entry.raw_text.len() > max_line_length {
            failing.push(entry.id);
            continue;
        }
        match chain.parse_text(
            &entry.raw_text,
            &entry.source_file,
            entry.byte_offset,
            entry.claim,
        ) {
            Ok(record) => {
                records.push(record);
                replayed.push(entry.id);
            }
            Err(e) => {
                tracing::debug!(
                    source_file = %entry.source_file,
                    byte_offset = entry.byte_offset,
                    error = %e,
                    "dead letter still fails to parse"
                );
                failing.push(entry.id);
            }
        }
    }

    if !records.is_empty() {
        let batch = Batch::from_items(records, FlushTrigger::Replay);
        // 구간은 이미 커밋되었으므로 영수증은 사용하지 않음
        let (write, _receipt) = store.write_batch(&batch).await?;
        summary.duplicates = write.duplicates;
        sink.remove(&replayed).await?;
    }
    if !failing.is_empty() {
        sink.bump_retry(&failing).await?;
    }

    summary.replayed = replayed.len();
    summary.still_failing = failing.len();
    metrics::counter!(m::DEAD_LETTERS_REPLAYED_TOTAL).increment(summary.replayed as u64);
    tracing::info!(
        examined = summary.examined,
        replayed = summary.replayed,
        still_failing = summary.still_failing,
        "dead-letter replay pass finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dead_letter::MemoryDeadLetters;
    use crate::store::MemoryStore;
    use logsift_core::types::{ByteRange, DeadLetterEntry, DeadLetterStage, LogType};
    use std::time::Duration;

    fn entry(offset: u64, text: &str, reason: &str) -> DeadLetterEntry {
        DeadLetterEntry::new(
            "mixed.log",
            offset,
            ByteRange::new(offset, offset + text.len() as u64 + 1),
            text,
            reason,
            "test",
            DeadLetterStage::Index,
        )
    }

    fn policy() -> RetentionPolicy {
        RetentionPolicy {
            max_entries: 100,
            max_retries: 2,
            retention: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn parseable_entries_are_stored_and_removed() {
        let sink = MemoryDeadLetters::new();
        let store = MemoryStore::new();
        let chain = ParserChain::with_defaults().unwrap();
        sink.append(vec![
            entry(
                0,
                "2024-01-15T00:00:01Z|action=accept|src=10.0.0.1|dst=10.0.0.2|dst_port=22",
                "storage_write_failed",
            ),
            entry(100, "this is not a log line", "unclassified"),
        ])
        .await
        .unwrap();

        let summary = replay_dead_letters(&sink, &store, &chain, &policy(), 10, 65_536)
            .await
            .unwrap();
        assert_eq!(summary.examined, 2);
        assert_eq!(summary.replayed, 1);
        assert_eq!(summary.still_failing, 1);

        assert_eq!(store.count_by_type().await.unwrap()[&LogType::Firewall], 1);
        let left = sink.list(10).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].retry_count, 1);
    }

    #[tokio::test]
    async fn exhausted_entries_are_not_retried() {
        let sink = MemoryDeadLetters::new();
        let store = MemoryStore::new();
        let chain = ParserChain::with_defaults().unwrap();
        sink.append(vec![entry(0, "garbage", "unclassified")])
            .await
            .unwrap();

        for _ in 0..2 {
            replay_dead_letters(&sink, &store, &chain, &policy(), 10, 65_536)
                .await
                .unwrap();
        }
        let summary = replay_dead_letters(&sink, &store, &chain, &policy(), 10, 65_536)
            .await
            .unwrap();
        assert_eq!(summary.examined, 0);
        assert_eq!(sink.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn over_length_entries_keep_failing() {
        let sink = MemoryDeadLetters::new();
        let store = MemoryStore::new();
        let chain = ParserChain::with_defaults().unwrap();
        let long = format!(
            "2024-01-15T00:00:01Z|action=accept|src=10.0.0.1|dst=10.0.0.2|rule={}",
            "x".repeat(200)
        );
        sink.append(vec![entry(0, &long, "line_too_long")])
            .await
            .unwrap();

        let summary = replay_dead_letters(&sink, &store, &chain, &policy(), 10, 64)
            .await
            .unwrap();
        assert_eq!(summary.still_failing, 1);
        assert_eq!(store.count_by_type().await.unwrap()[&LogType::Firewall], 0);
    }
}
