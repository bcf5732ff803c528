//! 파서 워커 -- 원시 배치를 분류/파싱해 파싱 배치로 전송
//!
//! 원시 배치 하나를 처리하는 순서:
//! 1. 라인마다 길이 검사 후 파서 체인 적용 (레코드 또는 dead-letter 엔트리)
//! 2. dead-letter 엔트리를 먼저 영속 기록 (실패하면 배치를 release하고 끝,
//!    단 `queue.max_deliveries`번째 전달이면 엔트리를 버리고 계속 진행)
//! 3. 레코드를 배치 누적기에 넣고, dead-letter된 라인의 구간은 `cover`로 포함
//! 4. 원시 배치 ID를 마지막 파싱 배치에 실어, 그 배치가 큐에 들어간 뒤 ack
//!
//! 원시 배치는 파싱 배치가 큐에 들어가기 전에는 ack되지 않으므로,
//! 워커가 중간에 죽으면 가시성 타임아웃 후 다시 처리됩니다.

use std::time::Duration;

use logsift_core::metrics as m;
use logsift_core::types::{ByteRange, DeadLetterEntry, DeadLetterStage, ParsedRecord, RawLine};
use tokio::time::Instant;

use crate::batcher::{Batch, BatchDispatcher, Batcher, DispatchSettings, FlushTrigger};
use crate::context::{Backend, IngestContext};
use crate::dead_letter::DeadLetterSink;
use crate::error::IngestError;
use crate::queue::{BatchQueue, Delivery, decode_batch};
use crate::worker::reader::sleep_until_deadline;

/// 큐 장애 후 다시 dequeue하기 전 대기 시간
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// 파서 워커 실행 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserSummary {
    /// 처리한 원시 배치 수
    pub raw_batches: u64,
    /// 파싱된 레코드 수
    pub records: u64,
    /// dead-letter된 라인 수
    pub dead_letters: u64,
    /// 전송한 파싱 배치 수
    pub parsed_batches: u64,
}

/// 원시 배치 하나의 파싱 결과
#[derive(Debug, Default)]
pub struct ParsedLines {
    /// 파싱된 레코드
    pub records: Vec<ParsedRecord>,
    /// 실패한 라인
    pub dead_letters: Vec<DeadLetterEntry>,
}

/// 원시 라인들을 분류/파싱합니다. 라인마다 레코드 또는 dead-letter 엔트리 하나가 나옵니다.
pub fn parse_lines<B: Backend>(ctx: &IngestContext<B>, lines: &[RawLine]) -> ParsedLines {
    let max_line_length = ctx.config.reader.max_line_length;
    let mut out = ParsedLines::default();
    for line in lines {
        let result = if line.text.len() > max_line_length {
            Err(IngestError::LineTooLong {
                length: line.text.len(),
                max: max_line_length,
            })
        } else {
            ctx.chain.classify_and_parse(line)
        };
        match result {
            Ok(record) => {
                metrics::counter!(
                    m::PARSER_RECORDS_TOTAL,
                    m::LABEL_LOG_TYPE => record.log_type().as_str()
                )
                .increment(1);
                out.records.push(record);
            }
            Err(e) => {
                tracing::debug!(
                    source_file = %line.source_file,
                    byte_offset = line.byte_offset,
                    error = %e,
                    "line dead-lettered"
                );
                out.dead_letters.push(DeadLetterEntry::new(
                    line.source_file.as_str(),
                    line.byte_offset,
                    line.claim,
                    line.text.as_str(),
                    e.dead_letter_reason(),
                    e.to_string(),
                    DeadLetterStage::Parse,
                ));
            }
        }
    }
    out
}

/// 디코딩할 수 없는 페이로드를 dead-letter 엔트리로 만듭니다.
pub(crate) fn undecodable_entry(
    delivery: &Delivery,
    error: &IngestError,
    stage: DeadLetterStage,
) -> DeadLetterEntry {
    DeadLetterEntry::new(
        format!("batch:{}", delivery.batch_id),
        0,
        ByteRange::new(0, 0),
        String::from_utf8_lossy(&delivery.payload),
        error.dead_letter_reason(),
        error.to_string(),
        stage,
    )
}

/// 파서 워커를 실행합니다.
pub async fn run_parser<B: Backend>(
    ctx: IngestContext<B>,
    worker_id: usize,
) -> Result<ParserSummary, IngestError> {
    let dispatcher = BatchDispatcher::spawn(
        ctx.parsed_queue.clone(),
        Some(ctx.raw_queue.clone()),
        DispatchSettings::from_config(&ctx.config.queue),
        ctx.cancel.clone(),
    );
    let mut batcher = Batcher::new("parsed", &ctx.config.batching.parsed);
    let mut summary = ParserSummary::default();
    let dequeue_timeout = ctx.dequeue_timeout();
    tracing::info!(worker_id, "parser worker started");

    loop {
        let deadline = batcher.deadline();
        let deliveries = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            _ = sleep_until_deadline(deadline), if deadline.is_some() => {
                if let Some(batch) = batcher.poll(Instant::now()) {
                    dispatcher.dispatch(batch).await?;
                    summary.parsed_batches += 1;
                }
                continue;
            }
            result = ctx.raw_queue.dequeue(1, dequeue_timeout) => result,
        };
        let deliveries = match deliveries {
            Ok(deliveries) => deliveries,
            Err(e) => {
                tracing::warn!(worker_id, error = %e, "raw dequeue failed");
                tokio::select! {
                    _ = ctx.cancel.cancelled() => break,
                    _ = tokio::time::sleep(ERROR_BACKOFF) => continue,
                }
            }
        };

        for delivery in deliveries {
            let sealed = process_delivery(&ctx, &mut batcher, delivery, &mut summary).await;
            for batch in sealed {
                dispatcher.dispatch(batch).await?;
                summary.parsed_batches += 1;
            }
        }
        if let Some(batch) = batcher.poll(Instant::now()) {
            dispatcher.dispatch(batch).await?;
            summary.parsed_batches += 1;
        }
    }

    if let Some(batch) = batcher.flush(FlushTrigger::Shutdown) {
        dispatcher.dispatch(batch).await?;
        summary.parsed_batches += 1;
    }
    dispatcher.finish().await?;
    tracing::info!(
        worker_id,
        raw_batches = summary.raw_batches,
        records = summary.records,
        dead_letters = summary.dead_letters,
        parsed_batches = summary.parsed_batches,
        "parser worker stopped"
    );
    Ok(summary)
}

/// 원시 배치 하나를 처리하고, 그 과정에서 봉인된 파싱 배치를 반환합니다.
async fn process_delivery<B: Backend>(
    ctx: &IngestContext<B>,
    batcher: &mut Batcher<ParsedRecord>,
    delivery: Delivery,
    summary: &mut ParserSummary,
) -> Vec<Batch<ParsedRecord>> {
    let raw: Batch<RawLine> = match decode_batch(&delivery.payload) {
        Ok(batch) => batch,
        Err(e) => {
            tracing::error!(batch_id = %delivery.batch_id, error = %e, "undecodable raw batch");
            let entry = undecodable_entry(&delivery, &e, DeadLetterStage::Parse);
            match ctx.dead_letters.append(vec![entry]).await {
                Ok(_) => acknowledge(ctx, delivery.batch_id).await,
                Err(e) if delivery_exhausted(ctx, &delivery) => {
                    drop_dead_letters(&delivery, 1, &e, "parse");
                    acknowledge(ctx, delivery.batch_id).await;
                }
                Err(e) => {
                    tracing::warn!(batch_id = %delivery.batch_id, error = %e, "dead-letter append failed");
                    release(ctx, delivery.batch_id).await;
                }
            }
            return Vec::new();
        }
    };

    let started = std::time::Instant::now();
    let parsed = parse_lines(ctx, &raw.items);
    metrics::histogram!(m::PARSER_BATCH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

    if !parsed.dead_letters.is_empty() {
        match ctx.dead_letters.append(parsed.dead_letters.clone()).await {
            Ok(_) => {}
            Err(e) if delivery_exhausted(ctx, &delivery) => {
                drop_dead_letters(&delivery, parsed.dead_letters.len(), &e, "parse");
            }
            Err(e) => {
                tracing::warn!(batch_id = %raw.id, error = %e, "dead-letter append failed, releasing batch");
                release(ctx, raw.id).await;
                return Vec::new();
            }
        }
    }

    summary.raw_batches += 1;
    summary.records += parsed.records.len() as u64;
    summary.dead_letters += parsed.dead_letters.len() as u64;
    tracing::debug!(
        batch_id = %raw.id,
        delivery = delivery.delivery_count,
        records = parsed.records.len(),
        dead_letters = parsed.dead_letters.len(),
        "raw batch parsed"
    );

    let now = Instant::now();
    let mut sealed = Vec::new();
    for record in parsed.records {
        if let Some(batch) = batcher.offer(record, now) {
            sealed.push(batch);
        }
    }
    for entry in &parsed.dead_letters {
        batcher.cover(&entry.source_file, entry.claim, now);
    }
    match sealed.last_mut() {
        // 마지막 레코드로 배치가 막 봉인되었으면 그 배치에 싣는다
        Some(last) if batcher.is_empty() => last.upstream.push(raw.id),
        _ => batcher.attach_upstream(raw.id, now),
    }
    sealed
}

/// 이번 전달이 `queue.max_deliveries`에 도달했는지 확인합니다.
pub(crate) fn delivery_exhausted<B: Backend>(ctx: &IngestContext<B>, delivery: &Delivery) -> bool {
    delivery.delivery_count >= ctx.config.queue.max_deliveries
}

/// 기록할 수 없는 dead-letter 엔트리를 버렸음을 남깁니다.
pub(crate) fn drop_dead_letters(
    delivery: &Delivery,
    entries: usize,
    error: &IngestError,
    stage: &'static str,
) {
    tracing::error!(
        batch_id = %delivery.batch_id,
        delivery = delivery.delivery_count,
        entries,
        error = %error,
        "dead-letter append kept failing, dropping entries"
    );
    metrics::counter!(m::DEAD_LETTERS_DROPPED_TOTAL, m::LABEL_STAGE => stage)
        .increment(entries as u64);
}

async fn acknowledge<B: Backend>(ctx: &IngestContext<B>, batch_id: uuid::Uuid) {
    if let Err(e) = ctx.raw_queue.acknowledge(batch_id).await {
        tracing::warn!(%batch_id, error = %e, "failed to acknowledge raw batch");
    }
}

async fn release<B: Backend>(ctx: &IngestContext<B>, batch_id: uuid::Uuid) {
    if let Err(e) = ctx.raw_queue.release(batch_id).await {
        tracing::warn!(%batch_id, error = %e, "failed to release raw batch");
    }
}
