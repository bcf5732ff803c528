//! PostgreSQL 진행 원장
//!
//! `file_progress` 테이블에 파일당 한 행을 둡니다. 모든 갱신은 트랜잭션 안에서
//! 행이 없으면 초기 상태로 먼저 만들고, `SELECT ... FOR UPDATE`로 잠근 뒤
//! [`FileProgress`] 전이를 적용하고 upsert합니다. 여러 인덱서가 같은 파일을
//! 동시에 커밋해도, 처음 보는 파일이어도 연속 구간 규칙이 지켜집니다.

use std::collections::BTreeMap;
use std::str::FromStr;

use logsift_core::types::{ByteRange, FileProgress, FileStatus};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Row};

use super::{CommitReceipt, ProgressLedger};
use crate::error::IngestError;
use crate::pg::{from_i64, storage_error, to_i64};

const SELECT_COLUMNS: &str = "source_file, committed_offset, claimed_offset, read_complete, \
     status, pending, last_error, updated_at";

const INSERT_PROGRESS: &str = "INSERT INTO file_progress \
     (source_file, committed_offset, claimed_offset, read_complete, \
      status, pending, last_error, updated_at) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)";

const UPSERT_SET: &str = "ON CONFLICT (source_file) DO UPDATE SET \
     committed_offset = EXCLUDED.committed_offset, \
     claimed_offset = EXCLUDED.claimed_offset, \
     read_complete = EXCLUDED.read_complete, \
     status = EXCLUDED.status, \
     pending = EXCLUDED.pending, \
     last_error = EXCLUDED.last_error, \
     updated_at = EXCLUDED.updated_at";

/// PostgreSQL 기반 진행 원장
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    /// 새 원장 핸들을 생성합니다.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 한 파일의 진행 상태를 잠금 상태로 읽고, 전이를 적용해 저장합니다.
    async fn modify<R>(
        &self,
        source_file: &str,
        f: impl FnOnce(&mut FileProgress) -> R,
    ) -> Result<R, IngestError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        let mut progress = lock_progress(&mut tx, source_file).await?;
        let out = f(&mut progress);
        upsert_progress(&mut tx, &progress).await?;
        tx.commit().await.map_err(storage_error)?;
        Ok(out)
    }
}

impl ProgressLedger for PgLedger {
    async fn progress(&self, source_file: &str) -> Result<Option<FileProgress>, IngestError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM file_progress WHERE source_file = $1");
        let row = sqlx::query(&sql)
            .bind(source_file)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        row.as_ref().map(progress_from_row).transpose()
    }

    async fn begin_reading(&self, source_file: &str) -> Result<Option<FileProgress>, IngestError> {
        self.modify(source_file, |p| p.begin_reading().then(|| p.clone()))
            .await
    }

    async fn record_claim(&self, source_file: &str, claimed_offset: u64) -> Result<(), IngestError> {
        self.modify(source_file, |p| p.record_claim(claimed_offset))
            .await
    }

    async fn finish_reading(
        &self,
        source_file: &str,
        final_offset: u64,
    ) -> Result<FileProgress, IngestError> {
        self.modify(source_file, |p| {
            p.finish_reading(final_offset);
            p.clone()
        })
        .await
    }

    async fn mark_failed(&self, source_file: &str, reason: &str) -> Result<(), IngestError> {
        self.modify(source_file, |p| p.mark_failed(reason)).await
    }

    async fn commit(&self, receipt: &CommitReceipt) -> Result<BTreeMap<String, u64>, IngestError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        let mut committed = BTreeMap::new();
        // BTreeMap 순서로 잠가 교착을 피함
        for (file, ranges) in receipt.claims() {
            let mut progress = lock_progress(&mut tx, file).await?;
            let offset = progress.apply_commit(ranges);
            upsert_progress(&mut tx, &progress).await?;
            committed.insert(file.clone(), offset);
        }
        tx.commit().await.map_err(storage_error)?;
        Ok(committed)
    }

    async fn list(&self) -> Result<Vec<FileProgress>, IngestError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM file_progress ORDER BY source_file");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;
        rows.iter().map(progress_from_row).collect()
    }
}

/// 행이 없으면 초기 상태로 만든 뒤 잠급니다. 없는 행에는 `FOR UPDATE`가 걸리지 않습니다.
async fn lock_progress(
    conn: &mut PgConnection,
    source_file: &str,
) -> Result<FileProgress, IngestError> {
    let initial = FileProgress::new(source_file);
    let insert = format!("{INSERT_PROGRESS} ON CONFLICT (source_file) DO NOTHING");
    write_progress(conn, &insert, &initial).await?;

    let sql =
        format!("SELECT {SELECT_COLUMNS} FROM file_progress WHERE source_file = $1 FOR UPDATE");
    let row = sqlx::query(&sql)
        .bind(source_file)
        .fetch_one(&mut *conn)
        .await
        .map_err(storage_error)?;
    progress_from_row(&row)
}

async fn upsert_progress(
    conn: &mut PgConnection,
    progress: &FileProgress,
) -> Result<(), IngestError> {
    let upsert = format!("{INSERT_PROGRESS} {UPSERT_SET}");
    write_progress(conn, &upsert, progress).await
}

async fn write_progress(
    conn: &mut PgConnection,
    sql: &str,
    progress: &FileProgress,
) -> Result<(), IngestError> {
    sqlx::query(sql)
        .bind(&progress.source_file)
        .bind(to_i64(progress.committed_offset, "committed_offset")?)
        .bind(to_i64(progress.claimed_offset, "claimed_offset")?)
        .bind(progress.read_complete)
        .bind(progress.status.as_str())
        .bind(Json(&progress.pending))
        .bind(progress.last_error.as_deref())
        .bind(progress.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(storage_error)?;
    Ok(())
}

fn progress_from_row(row: &PgRow) -> Result<FileProgress, IngestError> {
    let status: String = row.try_get("status").map_err(storage_error)?;
    let pending: Json<Vec<ByteRange>> = row.try_get("pending").map_err(storage_error)?;
    Ok(FileProgress {
        source_file: row.try_get("source_file").map_err(storage_error)?,
        committed_offset: from_i64(
            row.try_get("committed_offset").map_err(storage_error)?,
            "committed_offset",
        )?,
        claimed_offset: from_i64(
            row.try_get("claimed_offset").map_err(storage_error)?,
            "claimed_offset",
        )?,
        read_complete: row.try_get("read_complete").map_err(storage_error)?,
        status: FileStatus::from_str(&status).map_err(IngestError::StorageWrite)?,
        pending: pending.0,
        last_error: row.try_get("last_error").map_err(storage_error)?,
        updated_at: row.try_get("updated_at").map_err(storage_error)?,
    })
}
