#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`reader`]: 로그 파일 탐색과 바이트 오프셋 추적 라인 읽기
//! - [`parser`]: 방화벽/DNS/인증 인식기 체인 (엄격한 first-match)
//! - [`batcher`]: 개수/바이트/시간 조건 배치 누적과 큐 전송 디스패처
//! - [`queue`]: at-least-once 배치 큐 (인메모리, PostgreSQL)
//! - [`store`]: 유형별 레코드 저장소와 조사/분석 쿼리
//! - [`bookkeeper`]: 파일별 진행 원장 (영수증 기반 커밋)
//! - [`dead_letter`]: 실패 라인 보관, 보존 정책, 재처리
//! - [`worker`]: 리더/파서/인덱서/유지보수 워커
//! - [`context`]: 워커에 전달되는 핸들 묶음과 백엔드 선택
//! - [`pipeline`]: 워커 생명주기 관리 (Pipeline trait 구현)
//! - [`pg`]: PostgreSQL 연결과 마이그레이션
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! FileReader -> Batcher -> Queue(raw) -> ParserChain -> Batcher -> Queue(parsed) -> Indexer -> Store
//!                                            |                                        |
//!                                      DeadLetterSink                          Bookkeeper.commit
//! ```

pub mod batcher;
pub mod bookkeeper;
pub mod context;
pub mod dead_letter;
pub mod error;
pub mod parser;
pub mod pg;
pub mod pipeline;
pub mod queue;
pub mod reader;
pub mod store;
pub mod worker;

// --- 주요 타입 re-export ---

// 파이프라인
pub use pipeline::{IngestPipeline, IngestPipelineBuilder, PipelineReport, Stage};

// 컨텍스트
pub use context::{Backend, IngestContext, MemoryBackend, PgBackend};

// 에러
pub use error::IngestError;

// 파서
pub use parser::{ParserChain, Recognizer};

// 배치
pub use batcher::{Batch, Batcher, FlushTrigger};

// 큐
pub use queue::{BatchQueue, MemoryQueue, PgQueue};

// 저장소
pub use store::{MemoryStore, PgStore, RecordStore, TimeWindow, WriteSummary};

// 진행 원장
pub use bookkeeper::{CommitReceipt, MemoryLedger, PgLedger, ProgressLedger};

// dead-letter
pub use dead_letter::{
    DeadLetterSink, MemoryDeadLetters, PgDeadLetters, ReplaySummary, RetentionPolicy,
    replay_dead_letters,
};
