//! PostgreSQL 공통 -- 연결 풀, 마이그레이션, 값 변환

use std::borrow::Cow;
use std::time::Duration;

use logsift_core::config::StorageConfig;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::IngestError;

/// 연결 획득 대기 시간
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// 스토리지 설정으로 연결 풀을 만듭니다.
pub async fn connect(config: &StorageConfig) -> Result<PgPool, IngestError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(&config.postgres_url)
        .await
        .map_err(storage_error)?;
    tracing::info!(
        max_connections = config.max_connections,
        "database connection pool created"
    );
    Ok(pool)
}

/// 내장 마이그레이션을 적용합니다.
pub async fn migrate(pool: &PgPool) -> Result<(), IngestError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("database migrations applied");
    Ok(())
}

/// `u64` 값을 BIGINT 컬럼 값으로 변환합니다. 범위를 벗어나면 잘라내지 않고 에러입니다.
pub(crate) fn to_i64(value: u64, column: &str) -> Result<i64, IngestError> {
    i64::try_from(value).map_err(|_| out_of_range(column, value))
}

/// BIGINT 컬럼 값을 `u64`로 변환합니다. 음수는 에러입니다.
pub(crate) fn from_i64(value: i64, column: &str) -> Result<u64, IngestError> {
    u64::try_from(value).map_err(|_| out_of_range(column, value))
}

/// `u32` 값을 INTEGER 컬럼 값으로 변환합니다.
pub(crate) fn to_i32(value: u32, column: &str) -> Result<i32, IngestError> {
    i32::try_from(value).map_err(|_| out_of_range(column, value))
}

/// INTEGER 컬럼 값을 `u32`로 변환합니다.
pub(crate) fn from_i32(value: i32, column: &str) -> Result<u32, IngestError> {
    u32::try_from(value).map_err(|_| out_of_range(column, value))
}

/// TEXT 컬럼은 NUL(0x00)을 저장할 수 없으므로 `\0` 두 글자로 바꿉니다.
pub(crate) fn escape_nul(text: &str) -> Cow<'_, str> {
    if text.contains('\0') {
        Cow::Owned(text.replace('\0', "\\0"))
    } else {
        Cow::Borrowed(text)
    }
}

fn out_of_range(column: &str, value: impl std::fmt::Display) -> IngestError {
    IngestError::StorageWrite(format!("value {value} out of range for column {column}"))
}

pub(crate) fn storage_error(err: sqlx::Error) -> IngestError {
    IngestError::StorageWrite(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_values_above_bigint_are_rejected() {
        assert_eq!(to_i64(42, "bytes").unwrap(), 42);
        let err = to_i64(u64::MAX, "bytes").unwrap_err();
        assert!(matches!(err, IngestError::StorageWrite(_)));
        assert!(err.to_string().contains("bytes"));
    }

    #[test]
    fn negative_column_values_are_rejected() {
        assert_eq!(from_i64(7, "byte_offset").unwrap(), 7);
        assert!(from_i64(-1, "byte_offset").is_err());
        assert!(from_i32(-1, "pid").is_err());
        assert!(to_i32(u32::MAX, "pid").is_err());
    }

    #[test]
    fn nul_bytes_are_escaped_for_text_columns() {
        assert_eq!(escape_nul("junk\0line"), "junk\\0line");
        assert!(matches!(escape_nul("plain"), Cow::Borrowed("plain")));
    }
}
