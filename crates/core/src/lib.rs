//! logsift 공통 크레이트
//!
//! 수집 파이프라인의 모든 단계가 공유하는 도메인 타입, 설정, 에러,
//! 메트릭 이름을 정의합니다.
//!
//! # 모듈 구성
//!
//! - [`types`]: `RawLine`, `ParsedRecord`, `DeadLetterEntry`, `FileProgress` 등 데이터 모델
//! - [`config`]: `logsift.toml` 파싱, 환경변수 오버라이드, 검증
//! - [`error`]: 최상위 에러 타입
//! - [`pipeline`]: 파이프라인 생명주기 trait
//! - [`metrics`]: 메트릭 이름 상수

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, LogsiftError, PipelineError, StorageError};

// 설정
pub use config::LogsiftConfig;

// 파이프라인 trait
pub use pipeline::{HealthStatus, Pipeline};

// 도메인 타입
pub use types::{
    AuthEvent, AuthStatus, ByteRange, DeadLetterEntry, DnsEvent, FileProgress, FileStatus,
    FirewallEvent, LogEvent, LogType, ParsedRecord, RawLine,
};
