//! PostgreSQL dead-letter 저장소 (`dead_letters` 테이블)
//!
//! `raw_text`와 `detail`의 NUL 바이트는 TEXT 컬럼에 넣을 수 없으므로 `\0`으로 치환해 저장합니다.

use chrono::{DateTime, Utc};
use logsift_core::types::{ByteRange, DeadLetterEntry, DeadLetterStage};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use super::{DeadLetterSink, RetentionPolicy, RetentionReport, record_appended, record_retention};
use crate::error::IngestError;
use crate::pg::{escape_nul, from_i32, from_i64, storage_error, to_i32, to_i64};

const COLUMNS: &str = "id, source_file, byte_offset, claim_start, claim_end, raw_text, reason, \
     detail, stage, failed_at, retry_count";

/// INSERT 한 번에 넣는 최대 행 수
const ROWS_PER_INSERT: usize = 1000;

/// PostgreSQL 기반 dead-letter 저장소
#[derive(Clone)]
pub struct PgDeadLetters {
    pool: PgPool,
}

impl PgDeadLetters {
    /// 새 저장소 핸들을 생성합니다.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl DeadLetterSink for PgDeadLetters {
    async fn append(&self, entries: Vec<DeadLetterEntry>) -> Result<u64, IngestError> {
        let mut reasons: Vec<String> = Vec::new();
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        for chunk in entries.chunks(ROWS_PER_INSERT) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO dead_letters ({COLUMNS}) "
            ));
            let numbers = chunk
                .iter()
                .map(|e| {
                    Ok((
                        to_i64(e.byte_offset, "byte_offset")?,
                        to_i64(e.claim.start, "claim_start")?,
                        to_i64(e.claim.end, "claim_end")?,
                        to_i32(e.retry_count, "retry_count")?,
                    ))
                })
                .collect::<Result<Vec<_>, IngestError>>()?;
            qb.push_values(chunk.iter().zip(numbers), |mut b, (e, (offset, start, end, retries))| {
                b.push_bind(e.id)
                    .push_bind(e.source_file.as_str())
                    .push_bind(offset)
                    .push_bind(start)
                    .push_bind(end)
                    .push_bind(escape_nul(&e.raw_text).into_owned())
                    .push_bind(e.reason.as_str())
                    .push_bind(escape_nul(&e.detail).into_owned())
                    .push_bind(e.stage.as_str())
                    .push_bind(e.failed_at)
                    .push_bind(retries);
            });
            qb.push(" ON CONFLICT (source_file, byte_offset) DO NOTHING RETURNING reason");
            let rows = qb
                .build()
                .fetch_all(&mut *tx)
                .await
                .map_err(storage_error)?;
            for row in rows {
                reasons.push(row.try_get("reason").map_err(storage_error)?);
            }
        }
        tx.commit().await.map_err(storage_error)?;
        record_appended(reasons.iter().map(String::as_str));
        Ok(reasons.len() as u64)
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, IngestError> {
        let sql = format!("SELECT {COLUMNS} FROM dead_letters ORDER BY failed_at, id LIMIT $1");
        let rows = sqlx::query(&sql)
            .bind(to_i64(limit as u64, "limit")?)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn take_for_retry(
        &self,
        limit: usize,
        max_retries: u32,
    ) -> Result<Vec<DeadLetterEntry>, IngestError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM dead_letters WHERE retry_count < $1 \
             ORDER BY failed_at, id LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(to_i32(max_retries, "retry_count")?)
            .bind(to_i64(limit as u64, "limit")?)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn remove(&self, ids: &[Uuid]) -> Result<u64, IngestError> {
        let result = sqlx::query("DELETE FROM dead_letters WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(result.rows_affected())
    }

    async fn bump_retry(&self, ids: &[Uuid]) -> Result<u64, IngestError> {
        let result =
            sqlx::query("UPDATE dead_letters SET retry_count = retry_count + 1 WHERE id = ANY($1)")
                .bind(ids)
                .execute(&self.pool)
                .await
                .map_err(storage_error)?;
        Ok(result.rows_affected())
    }

    async fn count(&self) -> Result<usize, IngestError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dead_letters")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(from_i64(count, "count")? as usize)
    }

    async fn enforce_retention(
        &self,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> Result<RetentionReport, IngestError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        let expired = sqlx::query("DELETE FROM dead_letters WHERE failed_at < $1")
            .bind(policy.cutoff(now))
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?
            .rows_affected();
        let evicted = sqlx::query(
            r#"
            DELETE FROM dead_letters WHERE id IN (
                SELECT id FROM dead_letters ORDER BY failed_at DESC, id DESC OFFSET $1
            )
            "#,
        )
        .bind(to_i64(policy.max_entries as u64, "max_entries")?)
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?
        .rows_affected();
        tx.commit().await.map_err(storage_error)?;

        let report = RetentionReport { expired, evicted };
        record_retention(&report);
        Ok(report)
    }
}

fn entry_from_row(row: &PgRow) -> Result<DeadLetterEntry, IngestError> {
    let stage: String = row.try_get("stage").map_err(storage_error)?;
    let retry_count: i32 = row.try_get("retry_count").map_err(storage_error)?;
    Ok(DeadLetterEntry {
        id: row.try_get("id").map_err(storage_error)?,
        source_file: row.try_get("source_file").map_err(storage_error)?,
        byte_offset: from_i64(row.try_get("byte_offset").map_err(storage_error)?, "byte_offset")?,
        claim: ByteRange::new(
            from_i64(row.try_get("claim_start").map_err(storage_error)?, "claim_start")?,
            from_i64(row.try_get("claim_end").map_err(storage_error)?, "claim_end")?,
        ),
        raw_text: row.try_get("raw_text").map_err(storage_error)?,
        reason: row.try_get("reason").map_err(storage_error)?,
        detail: row.try_get("detail").map_err(storage_error)?,
        stage: stage
            .parse::<DeadLetterStage>()
            .map_err(IngestError::StorageWrite)?,
        failed_at: row.try_get("failed_at").map_err(storage_error)?,
        retry_count: from_i32(retry_count, "retry_count")?,
    })
}
