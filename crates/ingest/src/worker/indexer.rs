//! 인덱서 워커 -- 파싱 배치를 저장소에 기록하고 진행 원장에 커밋
//!
//! 배치 하나의 처리 순서:
//! 1. `write_batch` (실패 시 `indexer.max_write_attempts`까지 지수 백오프 재시도)
//! 2. 재시도 소진 시 배치의 모든 레코드를 dead-letter로 보냄
//!    (dead-letter 기록도 실패하면 release, `queue.max_deliveries`번째 전달이면 버림)
//! 3. 저장 또는 dead-letter가 끝난 뒤에만 영수증으로 원장 커밋
//! 4. 커밋 후 ack
//!
//! 커밋 전에 실패하면 배치를 release하여 다시 전달받습니다.
//! 저장소는 `(source_file, byte_offset)`으로 중복을 거르므로 재전달은 안전합니다.

use std::time::Duration;

use logsift_core::metrics as m;
use logsift_core::types::{DeadLetterEntry, DeadLetterStage, ParsedRecord};

use crate::batcher::Batch;
use crate::bookkeeper::{CommitReceipt, ProgressLedger};
use crate::context::{Backend, IngestContext};
use crate::dead_letter::DeadLetterSink;
use crate::error::IngestError;
use crate::queue::{BatchQueue, Delivery, decode_batch};
use crate::store::{RecordStore, WriteSummary, receipt_for};
use crate::worker::parser::{delivery_exhausted, drop_dead_letters, undecodable_entry};

const ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// 배치 하나의 처리 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    /// 저장 후 커밋됨
    Committed(WriteSummary),
    /// 저장 재시도가 소진되어 dead-letter 후 커밋됨
    DeadLettered(usize),
    /// 저장과 dead-letter 기록이 모두 실패해 레코드를 버리고 커밋됨
    Dropped(usize),
    /// 페이로드를 디코딩할 수 없어 dead-letter 후 ack됨
    Undecodable,
    /// 커밋 전에 중단되어 큐로 돌려보냄
    Released,
}

/// 인덱서 워커 실행 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexerSummary {
    /// 커밋한 배치 수
    pub batches: u64,
    /// 새로 저장한 레코드 수
    pub inserted: u64,
    /// 중복으로 건너뛴 레코드 수
    pub duplicates: u64,
    /// dead-letter된 레코드 수
    pub dead_letters: u64,
    /// 기록하지 못하고 버린 레코드 수
    pub dropped: u64,
    /// 큐로 돌려보낸 배치 수
    pub released: u64,
}

impl IndexerSummary {
    fn record(&mut self, outcome: &IndexOutcome) {
        match outcome {
            IndexOutcome::Committed(write) => {
                self.batches += 1;
                self.inserted += write.inserted;
                self.duplicates += write.duplicates;
            }
            IndexOutcome::DeadLettered(count) => {
                self.batches += 1;
                self.dead_letters += *count as u64;
            }
            IndexOutcome::Dropped(count) => {
                self.batches += 1;
                self.dropped += *count as u64;
            }
            IndexOutcome::Undecodable => self.dead_letters += 1,
            IndexOutcome::Released => self.released += 1,
        }
    }
}

/// 파싱 배치를 저장하고 커밋하는 처리기
pub struct Indexer<B: Backend> {
    ctx: IngestContext<B>,
    max_attempts: u32,
    backoff: Duration,
}

impl<B: Backend> Indexer<B> {
    /// 설정의 `[indexer]` 섹션으로 처리기를 생성합니다.
    pub fn new(ctx: IngestContext<B>) -> Self {
        let max_attempts = ctx.config.indexer.max_write_attempts.max(1);
        let backoff = Duration::from_millis(ctx.config.indexer.retry_backoff_ms);
        Self {
            ctx,
            max_attempts,
            backoff,
        }
    }

    /// 전달받은 배치 하나를 끝까지 처리합니다.
    pub async fn process(&self, delivery: Delivery) -> IndexOutcome {
        let batch: Batch<ParsedRecord> = match decode_batch(&delivery.payload) {
            Ok(batch) => batch,
            Err(e) => return self.dead_letter_undecodable(&delivery, &e).await,
        };

        let started = std::time::Instant::now();
        let (outcome, receipt) = match self.write_with_retry(&batch).await {
            Ok(Some((write, receipt))) => (IndexOutcome::Committed(write), receipt),
            Ok(None) => return self.release(batch.id).await,
            Err(e) => {
                let entries: Vec<DeadLetterEntry> = batch
                    .items
                    .iter()
                    .map(|record| {
                        DeadLetterEntry::new(
                            record.source_file.as_str(),
                            record.byte_offset,
                            record.claim,
                            record.to_line(),
                            e.dead_letter_reason(),
                            e.to_string(),
                            DeadLetterStage::Index,
                        )
                    })
                    .collect();
                let count = entries.len();
                match self.ctx.dead_letters.append(entries).await {
                    Ok(_) => {
                        tracing::error!(
                            batch_id = %batch.id,
                            records = count,
                            error = %e,
                            "write attempts exhausted, batch dead-lettered"
                        );
                        (IndexOutcome::DeadLettered(count), receipt_for(&batch))
                    }
                    Err(append_err) if delivery_exhausted(&self.ctx, &delivery) => {
                        drop_dead_letters(&delivery, count, &append_err, "index");
                        (IndexOutcome::Dropped(count), receipt_for(&batch))
                    }
                    Err(append_err) => {
                        tracing::error!(
                            batch_id = %batch.id,
                            error = %append_err,
                            "dead-letter append failed, releasing batch"
                        );
                        return self.release(batch.id).await;
                    }
                }
            }
        };

        if let Err(e) = self.commit(&receipt).await {
            tracing::warn!(batch_id = %batch.id, error = %e, "progress commit failed, releasing batch");
            return self.release(batch.id).await;
        }
        metrics::histogram!(m::INDEXER_COMMIT_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        if let Err(e) = self.ctx.parsed_queue.acknowledge(batch.id).await {
            // 커밋은 끝났으므로 재전달되어도 중복으로 걸러짐
            tracing::warn!(batch_id = %batch.id, error = %e, "failed to acknowledge parsed batch");
        }
        outcome
    }

    /// 저장을 재시도합니다. 종료 신호로 중단되면 `Ok(None)`.
    async fn write_with_retry(
        &self,
        batch: &Batch<ParsedRecord>,
    ) -> Result<Option<(WriteSummary, CommitReceipt)>, IngestError> {
        let mut attempt = 1;
        loop {
            match self.ctx.store.write_batch(batch).await {
                Ok((write, receipt)) => {
                    for (log_type, count) in &write.by_type {
                        metrics::counter!(
                            m::INDEXER_RECORDS_WRITTEN_TOTAL,
                            m::LABEL_LOG_TYPE => log_type.as_str()
                        )
                        .increment(*count);
                    }
                    metrics::counter!(m::INDEXER_DUPLICATES_TOTAL).increment(write.duplicates);
                    tracing::debug!(
                        batch_id = %batch.id,
                        inserted = write.inserted,
                        duplicates = write.duplicates,
                        "batch written"
                    );
                    return Ok(Some((write, receipt)));
                }
                Err(e) if attempt < self.max_attempts => {
                    let delay = self.backoff * 2u32.saturating_pow(attempt - 1);
                    metrics::counter!(m::INDEXER_WRITE_RETRIES_TOTAL).increment(1);
                    tracing::warn!(
                        batch_id = %batch.id,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "batch write failed, retrying"
                    );
                    tokio::select! {
                        _ = self.ctx.cancel.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn commit(&self, receipt: &CommitReceipt) -> Result<(), IngestError> {
        if receipt.is_empty() {
            return Ok(());
        }
        let committed = self.ctx.ledger.commit(receipt).await?;
        for (file, offset) in &committed {
            tracing::debug!(source_file = %file, committed_offset = offset, "progress committed");
        }
        Ok(())
    }

    async fn dead_letter_undecodable(&self, delivery: &Delivery, error: &IngestError) -> IndexOutcome {
        // 구간 정보를 알 수 없으므로 원장은 갱신하지 못함
        tracing::error!(
            batch_id = %delivery.batch_id,
            error = %error,
            "undecodable parsed batch, claims cannot be committed"
        );
        let entry = undecodable_entry(delivery, error, DeadLetterStage::Index);
        match self.ctx.dead_letters.append(vec![entry]).await {
            Ok(_) => {}
            Err(e) if delivery_exhausted(&self.ctx, delivery) => {
                drop_dead_letters(delivery, 1, &e, "index");
            }
            Err(e) => {
                tracing::warn!(batch_id = %delivery.batch_id, error = %e, "dead-letter append failed");
                return self.release(delivery.batch_id).await;
            }
        }
        if let Err(e) = self.ctx.parsed_queue.acknowledge(delivery.batch_id).await {
            tracing::warn!(batch_id = %delivery.batch_id, error = %e, "failed to acknowledge parsed batch");
        }
        IndexOutcome::Undecodable
    }

    async fn release(&self, batch_id: uuid::Uuid) -> IndexOutcome {
        if let Err(e) = self.ctx.parsed_queue.release(batch_id).await {
            tracing::warn!(%batch_id, error = %e, "failed to release parsed batch");
        }
        IndexOutcome::Released
    }
}

/// 인덱서 워커를 실행합니다.
pub async fn run_indexer<B: Backend>(
    ctx: IngestContext<B>,
    worker_id: usize,
) -> Result<IndexerSummary, IngestError> {
    let cancel = ctx.cancel.clone();
    let queue = ctx.parsed_queue.clone();
    let dequeue_timeout = ctx.dequeue_timeout();
    let indexer = Indexer::new(ctx);
    let mut summary = IndexerSummary::default();
    tracing::info!(worker_id, "indexer worker started");

    loop {
        let deliveries = tokio::select! {
            _ = cancel.cancelled() => break,
            result = queue.dequeue(1, dequeue_timeout) => result,
        };
        let deliveries = match deliveries {
            Ok(deliveries) => deliveries,
            Err(e) => {
                tracing::warn!(worker_id, error = %e, "parsed dequeue failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(ERROR_BACKOFF) => continue,
                }
            }
        };
        for delivery in deliveries {
            let outcome = indexer.process(delivery).await;
            summary.record(&outcome);
        }
    }

    tracing::info!(
        worker_id,
        batches = summary.batches,
        inserted = summary.inserted,
        duplicates = summary.duplicates,
        dead_letters = summary.dead_letters,
        dropped = summary.dropped,
        released = summary.released,
        "indexer worker stopped"
    );
    Ok(summary)
}
