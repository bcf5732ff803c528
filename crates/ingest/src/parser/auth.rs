//! sshd 인증 로그 파서
//!
//! # 형식
//! ```text
//! TS HOST PROCESS[PID]: (Accepted|Failed) METHOD for [invalid user] USER from IP [port N] [ssh2]
//! 2024-01-15T00:00:01Z web-01 sshd[4242]: Failed password for invalid user admin from 203.0.113.7 port 52311 ssh2
//! Jan 15 00:00:01 web-01 sshd[4242]: Accepted publickey for deploy from 10.0.0.5 port 40022 ssh2
//! ```

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use logsift_core::types::{AuthEvent, AuthStatus, LogEvent, LogType};
use regex::Regex;

use super::timestamp::{parse_bsd, parse_iso8601};
use crate::error::IngestError;

/// 헤더 패턴: 타임스탬프(ISO 또는 BSD), 호스트, `process[pid]:`, 인증 결과
const HEADER_PATTERN: &str = r"^(?:[A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}|\S+)\s+\S+\s+[^\s\[]+\[\d+\]:\s+(?:Accepted|Failed)\s";

/// 저장 가능한 최대 PID (INTEGER)
const MAX_PID: u32 = i32::MAX as u32;

/// sshd 인증 로그 파서
#[derive(Debug, Clone)]
pub struct AuthParser {
    header: Regex,
}

impl AuthParser {
    /// 새 파서를 생성합니다.
    pub fn new() -> Result<Self, IngestError> {
        Ok(Self {
            header: Regex::new(HEADER_PATTERN)?,
        })
    }

    /// syslog 헤더와 인증 결과 단어가 있는지 확인합니다.
    pub fn matches(&self, text: &str) -> bool {
        self.header.is_match(text)
    }

    /// 라인을 파싱합니다.
    pub fn parse(&self, text: &str) -> Result<(DateTime<Utc>, LogEvent), IngestError> {
        let tokens: Vec<&str> = text.split_whitespace().collect();

        let (timestamp, idx) = parse_leading_timestamp(&tokens)
            .ok_or_else(|| field_error("timestamp", "no ISO 8601 or BSD timestamp"))?;

        let hostname = tokens
            .get(idx)
            .map(|h| (*h).to_owned())
            .ok_or_else(|| field_error("hostname", "missing"))?;

        let proc_token = tokens
            .get(idx + 1)
            .copied()
            .ok_or_else(|| field_error("process", "missing"))?;
        let (process, pid) = parse_process(proc_token)?;

        let message_tokens = tokens.get(idx + 2..).unwrap_or_default();
        let message = message_tokens.join(" ");

        let status_token = message_tokens.first().copied().unwrap_or_default();
        let status = status_token
            .parse::<AuthStatus>()
            .map_err(|reason| field_error("status", reason))?;

        let for_idx = message_tokens
            .iter()
            .position(|tok| *tok == "for")
            .ok_or_else(|| field_error("username", "missing 'for <user>'"))?;

        let auth_method = match message_tokens.get(1) {
            Some(method) if for_idx > 1 => Some((*method).to_owned()),
            _ => None,
        };

        let mut user_idx = for_idx + 1;
        if message_tokens.get(user_idx) == Some(&"invalid")
            && message_tokens.get(user_idx + 1) == Some(&"user")
        {
            user_idx += 2;
        }
        let username = message_tokens
            .get(user_idx)
            .filter(|user| **user != "from")
            .map(|user| (*user).to_owned())
            .ok_or_else(|| field_error("username", "missing user after 'for'"))?;

        let source_ip = value_after(message_tokens, "from")
            .ok_or_else(|| field_error("source_ip", "missing 'from <ip>'"))
            .and_then(|value| {
                value.parse::<IpAddr>().map_err(|_| {
                    field_error("source_ip", format!("invalid IP address '{value}'"))
                })
            })?;

        let source_port = match value_after(message_tokens, "port") {
            Some(value) => Some(value.parse::<u16>().map_err(|_| {
                field_error("source_port", format!("port out of range [0, 65535]: '{value}'"))
            })?),
            None => None,
        };

        let event = AuthEvent {
            hostname,
            process,
            pid,
            status,
            auth_method,
            username,
            source_ip,
            source_port,
            message,
        };
        Ok((timestamp, LogEvent::Auth(event)))
    }
}

/// 선두 타임스탬프를 파싱하고, 다음 토큰의 인덱스를 함께 반환합니다.
fn parse_leading_timestamp(tokens: &[&str]) -> Option<(DateTime<Utc>, usize)> {
    let first = tokens.first()?;
    if let Some(ts) = parse_iso8601(first) {
        return Some((ts, 1));
    }
    match tokens {
        [month, day, time, ..] => parse_bsd(month, day, time).map(|ts| (ts, 3)),
        _ => None,
    }
}

/// `sshd[4242]:` 토큰을 프로그램 이름과 PID로 분리합니다.
fn parse_process(token: &str) -> Result<(String, u32), IngestError> {
    let inner = token
        .strip_suffix("]:")
        .ok_or_else(|| field_error("process", format!("expected 'name[pid]:', got '{token}'")))?;
    let (name, pid) = inner
        .split_once('[')
        .ok_or_else(|| field_error("process", format!("expected 'name[pid]:', got '{token}'")))?;
    if name.is_empty() {
        return Err(field_error("process", "empty process name"));
    }
    let pid = pid
        .parse::<u32>()
        .ok()
        .filter(|p| *p <= MAX_PID)
        .ok_or_else(|| field_error("pid", format!("invalid pid '{pid}'")))?;
    Ok((name.to_owned(), pid))
}

fn value_after<'a>(tokens: &[&'a str], keyword: &str) -> Option<&'a str> {
    let idx = tokens.iter().position(|tok| *tok == keyword)?;
    tokens.get(idx + 1).copied()
}

fn field_error(field: &str, reason: impl Into<String>) -> IngestError {
    IngestError::field(LogType::Auth, field, reason)
}
