//! 방화벽 로그 파서
//!
//! # 형식
//! ```text
//! TS|key=value|key=value...
//! 2024-01-15T00:00:01Z|action=accept|src=192.168.1.100|dst=10.0.0.50|proto=TCP|dst_port=3389
//! ```
//!
//! 필수 키: `action`, `src`, `dst`.
//! 선택 키: `src_port`, `dst_port`, `protocol`(`proto`), `bytes`(`bytes_sent`), `rule`.
//! 그 외 키는 `extra`에 보존됩니다.

use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use logsift_core::types::{FirewallEvent, LogEvent, LogType};

use super::timestamp::parse_iso8601;
use crate::error::IngestError;

/// 필드 구분자
const SEPARATOR: char = '|';

/// 형식을 알려주는 키. 하나라도 있으면 방화벽 라인으로 인식하고 누락은 `parse`가 보고합니다.
const SHAPE_KEYS: [&str; 3] = ["action", "src", "dst"];

/// 저장 가능한 최대 전송 바이트 수 (BIGINT)
const MAX_BYTES: u64 = i64::MAX as u64;

/// 방화벽 key=value 로그 파서
#[derive(Debug, Clone, Default)]
pub struct FirewallParser;

impl FirewallParser {
    /// 새 파서를 생성합니다.
    pub fn new() -> Self {
        Self
    }

    /// 방화벽 형식처럼 보이는지 빠르게 확인합니다.
    ///
    /// 공백 없는 타임스탬프 머리 뒤에 `action=`/`src=`/`dst=` 토큰 중 하나가 있으면 매칭됩니다.
    pub fn matches(&self, text: &str) -> bool {
        let Some((head, rest)) = text.split_once(SEPARATOR) else {
            return false;
        };
        let head = head.trim();
        let looks_like_timestamp = head.starts_with(|c: char| c.is_ascii_digit())
            && !head.contains('=')
            && !head.contains(char::is_whitespace);
        looks_like_timestamp
            && rest.split(SEPARATOR).any(|part| {
                part.split_once('=')
                    .is_some_and(|(key, _)| SHAPE_KEYS.contains(&key.trim()))
            })
    }

    /// 라인을 파싱합니다.
    pub fn parse(&self, text: &str) -> Result<(DateTime<Utc>, LogEvent), IngestError> {
        let mut parts = text.split(SEPARATOR);
        let ts_token = parts.next().unwrap_or_default().trim();
        let timestamp = parse_iso8601(ts_token).ok_or_else(|| {
            field_error("timestamp", format!("invalid timestamp '{ts_token}'"))
        })?;

        let mut action = None;
        let mut src_ip = None;
        let mut dst_ip = None;
        let mut src_port = None;
        let mut dst_port = None;
        let mut protocol = None;
        let mut bytes = None;
        let mut rule = None;
        let mut extra = BTreeMap::new();

        for part in parts {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| field_error("fields", format!("malformed token '{part}'")))?;
            let (key, value) = (key.trim(), value.trim());

            match key {
                "action" => action = Some(non_empty("action", value)?),
                "src" => src_ip = Some(parse_ip("src", value)?),
                "dst" => dst_ip = Some(parse_ip("dst", value)?),
                "src_port" => src_port = Some(parse_port("src_port", value)?),
                "dst_port" => dst_port = Some(parse_port("dst_port", value)?),
                "protocol" | "proto" => protocol = Some(non_empty("protocol", value)?),
                "bytes" | "bytes_sent" => bytes = Some(parse_bytes(value)?),
                "rule" => rule = Some(non_empty("rule", value)?),
                _ => {
                    extra.insert(key.to_owned(), value.to_owned());
                }
            }
        }

        let event = FirewallEvent {
            action: action.ok_or_else(|| field_error("action", "missing"))?,
            src_ip: src_ip.ok_or_else(|| field_error("src", "missing"))?,
            dst_ip: dst_ip.ok_or_else(|| field_error("dst", "missing"))?,
            src_port,
            dst_port,
            protocol,
            bytes,
            rule,
            extra,
        };
        Ok((timestamp, LogEvent::Firewall(event)))
    }
}

fn field_error(field: &str, reason: impl Into<String>) -> IngestError {
    IngestError::field(LogType::Firewall, field, reason)
}

fn non_empty(field: &str, value: &str) -> Result<String, IngestError> {
    if value.is_empty() {
        return Err(field_error(field, "empty value"));
    }
    Ok(value.to_owned())
}

fn parse_ip(field: &str, value: &str) -> Result<IpAddr, IngestError> {
    value
        .parse::<IpAddr>()
        .map_err(|_| field_error(field, format!("invalid IP address '{value}'")))
}

fn parse_bytes(value: &str) -> Result<u64, IngestError> {
    let bytes = value
        .parse::<u64>()
        .map_err(|_| field_error("bytes", format!("not a non-negative integer: '{value}'")))?;
    if bytes > MAX_BYTES {
        return Err(field_error("bytes", format!("exceeds {MAX_BYTES}: '{value}'")));
    }
    Ok(bytes)
}

fn parse_port(field: &str, value: &str) -> Result<u16, IngestError> {
    value
        .parse::<u16>()
        .map_err(|_| field_error(field, format!("port out of range [0, 65535]: '{value}'")))
}
