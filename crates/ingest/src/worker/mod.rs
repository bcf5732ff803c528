//! 워커 -- 리더, 파서, 인덱서, 유지보수 태스크
//!
//! 각 워커는 [`IngestContext`](crate::context::IngestContext)를 받아 실행되며,
//! 서로 큐와 진행 원장을 통해서만 통신합니다. 종료 신호를 받으면 처리 중인
//! 배치를 마치거나 release한 뒤 요약을 반환합니다.

pub mod indexer;
pub mod maintenance;
pub mod parser;
pub mod reader;

pub use indexer::{IndexOutcome, Indexer, IndexerSummary, run_indexer};
pub use maintenance::{MaintenanceSummary, maintenance_pass, run_maintenance};
pub use parser::{ParsedLines, ParserSummary, parse_lines, run_parser};
pub use reader::{ReaderSummary, run_reader};
