//! 수집 파이프라인 에러 타입
//!
//! [`IngestError`]는 리더, 파서 체인, 큐, 인덱서 등 수집 파이프라인 내부에서
//! 발생하는 모든 에러를 표현합니다.
//! `From<IngestError> for LogsiftError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.
//!
//! # 처리 정책
//! - `FileRead`: 해당 파일만 `failed`로 표시, 다른 파일은 계속
//! - `Classification` / `FieldValidation` / `LineTooLong`: 라인 단위 dead-letter
//! - `QueueUnavailable`: 백오프 재시도, 한도 초과 시 해당 생산자 종료
//! - `StorageWrite`: 배치 재시도, 한도 초과 시 배치 전체 dead-letter
//! - `Config`: 시작 시점에 치명적

use logsift_core::error::{ConfigError, LogsiftError, PipelineError, StorageError};
use logsift_core::types::LogType;

/// 수집 파이프라인 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// 소스 파일 읽기 실패
    #[error("file read error: {path}: {reason}")]
    FileRead {
        /// 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 어떤 인식기도 라인을 인식하지 못함
    #[error("line matched no recognizer")]
    Classification,

    /// 인식은 되었지만 필드 추출/검증 실패
    #[error("invalid {log_type} field '{field}': {reason}")]
    FieldValidation {
        /// 인식된 로그 유형
        log_type: LogType,
        /// 문제가 된 필드명
        field: String,
        /// 실패 사유
        reason: String,
    },

    /// 라인이 허용 길이를 초과
    #[error("line length {length} exceeds limit {max}")]
    LineTooLong {
        /// 라인 바이트 길이
        length: usize,
        /// 허용 최대 길이
        max: usize,
    },

    /// 큐 전송/수신 실패
    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),

    /// 스토리지 쓰기/조회 실패
    #[error("storage write failed: {0}")]
    StorageWrite(String),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 배치 직렬화/역직렬화 실패
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// 채널/태스크 통신 에러
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 정규식 컴파일 에러
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl IngestError {
    /// 필드 검증 에러를 생성합니다.
    pub fn field(log_type: LogType, field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FieldValidation {
            log_type,
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// dead-letter 엔트리에 기록할 기계 판독용 사유 코드
    pub fn dead_letter_reason(&self) -> String {
        match self {
            Self::Classification => "unclassified".to_owned(),
            Self::FieldValidation { field, .. } => format!("invalid_field:{field}"),
            Self::LineTooLong { .. } => "line_too_long".to_owned(),
            Self::StorageWrite(_) => "storage_write_failed".to_owned(),
            Self::Codec(_) => "undecodable_batch".to_owned(),
            _ => "internal".to_owned(),
        }
    }

    /// 재시도로 회복될 수 있는 일시적 에러인지 확인합니다.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::QueueUnavailable(_) | Self::StorageWrite(_) | Self::Io(_)
        )
    }
}

impl From<IngestError> for LogsiftError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Config { field, reason } => {
                LogsiftError::Config(ConfigError::InvalidValue { field, reason })
            }
            IngestError::StorageWrite(reason) => {
                LogsiftError::Storage(StorageError::Query(reason))
            }
            IngestError::Io(e) => LogsiftError::Io(e),
            other => LogsiftError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for IngestError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        IngestError::StorageWrite(format!("migration failed: {err}"))
    }
}
