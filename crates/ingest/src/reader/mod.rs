//! 파일 리더 -- 소스 파일 탐색 및 라인 스트리밍
//!
//! - [`discover`]: 로그 디렉토리에서 수집 대상 파일 나열
//! - [`FileReader`]: 재개 지점부터 파일을 읽어 [`RawLine`](logsift_core::types::RawLine) 생성

pub mod discovery;
pub mod file;

pub use discovery::discover;
pub use file::FileReader;
