//! 단일 파일 라인 리더
//!
//! 재개 지점(커밋된 오프셋)부터 파일을 순차적으로 읽어 [`RawLine`]을 만듭니다.
//!
//! # 오프셋 규칙
//! - `byte_offset`: 라인 첫 바이트의 파일 오프셋
//! - `claim`: 직전에 방출된 라인의 끝(또는 재개 지점)부터 이 라인의 줄바꿈 뒤까지
//! - 빈 줄은 방출하지 않고, 그 바이트는 다음 라인의 `claim`에 포함됩니다.
//! - 줄바꿈 없는 마지막 조각은 [`FileReader::close`] 이후에만 방출됩니다.
//! - [`FileReader::with_line_limit`]를 주면 한 라인에서 `limit + 2` 바이트만 보관하고
//!   나머지는 버립니다. 오프셋과 `claim`은 버린 바이트까지 포함하며, 잘린 텍스트는
//!   여전히 `limit`보다 길어 라인 길이 검사에 걸립니다.

use std::path::{Path, PathBuf};

use chrono::Utc;
use logsift_core::types::{ByteRange, RawLine};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

use crate::error::IngestError;

/// 재개 시 건너뛴 구간을 읽는 청크 크기
const SKIP_CHUNK: usize = 64 * 1024;

/// 단일 파일 라인 리더
pub struct FileReader {
    /// 파일 경로
    path: PathBuf,
    /// 소스 파일 식별자
    source_file: String,
    /// 버퍼드 리더
    reader: BufReader<File>,
    /// `pending` 버퍼가 시작하는 파일 오프셋
    line_start: u64,
    /// 다음 방출 라인의 claim 시작점
    claim_start: u64,
    /// 지금까지 본 줄바꿈 수
    line_number: u64,
    /// 아직 줄바꿈을 만나지 못한 바이트 (최대 `max_kept`)
    pending: Vec<u8>,
    /// 현재 라인에서 지금까지 읽은 바이트 수 (버린 바이트 포함)
    pending_len: u64,
    /// 라인당 보관할 최대 바이트
    max_kept: usize,
    /// 파일이 닫혔음(더 이상 데이터가 없음)이 확인되었는지 여부
    closed: bool,
}

impl FileReader {
    /// 파일을 열고 `resume_offset`까지 건너뜁니다.
    ///
    /// 건너뛴 구간의 줄바꿈 수로 라인 번호를 다시 계산합니다.
    pub async fn open(path: impl AsRef<Path>, resume_offset: u64) -> Result<Self, IngestError> {
        let path = path.as_ref();
        let file = File::open(path).await.map_err(|e| read_error(path, &e))?;
        let len = file.metadata().await.map_err(|e| read_error(path, &e))?.len();
        if resume_offset > len {
            return Err(IngestError::FileRead {
                path: path.display().to_string(),
                reason: format!(
                    "file is shorter ({len} bytes) than its committed offset ({resume_offset})"
                ),
            });
        }

        let mut reader = BufReader::new(file);
        let mut line_number = 0u64;
        let mut remaining = resume_offset;
        let mut chunk = vec![0u8; SKIP_CHUNK];
        while remaining > 0 {
            let want = usize::try_from(remaining).unwrap_or(SKIP_CHUNK).min(SKIP_CHUNK);
            let n = reader
                .read(&mut chunk[..want])
                .await
                .map_err(|e| read_error(path, &e))?;
            if n == 0 {
                return Err(IngestError::FileRead {
                    path: path.display().to_string(),
                    reason: "unexpected end of file while skipping to resume offset".to_owned(),
                });
            }
            line_number += chunk[..n].iter().filter(|b| **b == b'\n').count() as u64;
            remaining -= n as u64;
        }

        Ok(Self {
            path: path.to_path_buf(),
            source_file: path.display().to_string(),
            reader,
            line_start: resume_offset,
            claim_start: resume_offset,
            line_number,
            pending: Vec::new(),
            pending_len: 0,
            max_kept: usize::MAX,
            closed: false,
        })
    }

    /// 라인당 보관하는 바이트를 `limit + 2`로 제한합니다.
    ///
    /// 두 바이트 여유는 `\r\n`을 떼어낸 뒤에도 잘린 라인이 `limit`보다 길게 남도록 합니다.
    pub fn with_line_limit(mut self, limit: usize) -> Self {
        self.max_kept = limit.saturating_add(2);
        self
    }

    /// 소스 파일 식별자
    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    /// 마지막으로 방출한 라인의 claim 끝 (다음 claim의 시작점)
    pub fn claimed_offset(&self) -> u64 {
        self.claim_start
    }

    /// 파일이 닫혔음을 확인합니다. 이후 줄바꿈 없는 마지막 조각도 방출됩니다.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// 다음 라인을 읽습니다.
    ///
    /// 현재 읽을 수 있는 완전한 라인이 없으면 `Ok(None)`을 반환합니다.
    /// follow 모드에서는 잠시 후 다시 호출하면 추가된 데이터를 이어서 읽습니다.
    pub async fn next_line(&mut self) -> Result<Option<RawLine>, IngestError> {
        loop {
            let buf = self
                .reader
                .fill_buf()
                .await
                .map_err(|e| read_error(&self.path, &e))?;
            if buf.is_empty() {
                if self.closed && self.pending_len > 0 {
                    return Ok(self.take_line());
                }
                return Ok(None);
            }

            let (used, terminated) = match buf.iter().position(|b| *b == b'\n') {
                Some(i) => (i + 1, true),
                None => (buf.len(), false),
            };
            let room = self.max_kept.saturating_sub(self.pending.len());
            self.pending.extend_from_slice(&buf[..used.min(room)]);
            self.pending_len += used as u64;
            self.reader.consume(used);

            if terminated {
                if let Some(line) = self.take_line() {
                    return Ok(Some(line));
                }
            }
        }
    }

    /// `pending`을 한 라인으로 소비합니다. 빈 줄이면 `None`.
    fn take_line(&mut self) -> Option<RawLine> {
        let raw = std::mem::take(&mut self.pending);
        let len = std::mem::take(&mut self.pending_len);
        let start = self.line_start;
        self.line_start += len;

        // 줄바꿈 없는 마지막 조각도 한 라인으로 센다
        self.line_number += 1;

        let mut body: &[u8] = &raw;
        if let Some(stripped) = body.strip_suffix(b"\n") {
            body = stripped;
        }
        if let Some(stripped) = body.strip_suffix(b"\r") {
            body = stripped;
        }

        let text = String::from_utf8_lossy(body).into_owned();
        if text.trim().is_empty() {
            return None;
        }

        let claim = ByteRange::new(self.claim_start, self.line_start);
        self.claim_start = self.line_start;
        Some(RawLine {
            source_file: self.source_file.clone(),
            byte_offset: start,
            line_number: self.line_number,
            text,
            ingested_at: Utc::now(),
            claim,
        })
    }
}

fn read_error(path: &Path, err: &std::io::Error) -> IngestError {
    IngestError::FileRead {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}
