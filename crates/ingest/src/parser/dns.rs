//! DNS 쿼리 로그 파서
//!
//! # 형식
//! ```text
//! TS [client IP] query: DOMAIN [CLASS] [TYPE] [+] [(SERVER)] [RCODE]
//! 2024-01-15T00:00:01Z client 192.168.1.10 query: github.com IN A + (8.8.8.8) NOERROR
//! ```

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use logsift_core::types::{DnsEvent, LogEvent, LogType};

use super::timestamp::parse_iso8601;
use crate::error::IngestError;

/// 도메인 위치를 알려주는 토큰
const QUERY_MARKER: &str = "query:";

/// 레코드 유형 앞에 올 수 있는 클래스 토큰
const QUERY_CLASSES: [&str; 4] = ["IN", "CH", "HS", "ANY"];

/// DNS 쿼리 로그 파서
#[derive(Debug, Clone, Default)]
pub struct DnsParser;

impl DnsParser {
    /// 새 파서를 생성합니다.
    pub fn new() -> Self {
        Self
    }

    /// `query:` 토큰이 있는지 확인합니다.
    pub fn matches(&self, text: &str) -> bool {
        text.split_whitespace().any(|tok| tok == QUERY_MARKER)
    }

    /// 라인을 파싱합니다.
    pub fn parse(&self, text: &str) -> Result<(DateTime<Utc>, LogEvent), IngestError> {
        let tokens: Vec<&str> = text.split_whitespace().collect();

        let ts_token = tokens.first().copied().unwrap_or_default();
        let timestamp = parse_iso8601(ts_token)
            .ok_or_else(|| field_error("timestamp", format!("invalid timestamp '{ts_token}'")))?;

        let query_idx = tokens
            .iter()
            .position(|tok| *tok == QUERY_MARKER)
            .ok_or_else(|| field_error("query_domain", "missing 'query:' marker"))?;

        let client_ip = match tokens[..query_idx].iter().position(|tok| *tok == "client") {
            Some(idx) => {
                let value = tokens
                    .get(idx + 1)
                    .filter(|_| idx + 1 < query_idx)
                    .ok_or_else(|| field_error("client_ip", "missing address after 'client'"))?;
                Some(parse_ip("client_ip", value)?)
            }
            None => None,
        };

        let query_domain = tokens
            .get(query_idx + 1)
            .map(|d| (*d).to_owned())
            .ok_or_else(|| field_error("query_domain", "missing domain after 'query:'"))?;

        let mut rest = tokens.get(query_idx + 2..).unwrap_or_default();

        let query_class = match rest.first() {
            Some(tok) if QUERY_CLASSES.contains(tok) => {
                rest = &rest[1..];
                Some((*tok).to_owned())
            }
            _ => None,
        };

        let query_type = match rest.first() {
            Some(tok) if is_code_token(tok) => {
                rest = &rest[1..];
                Some((*tok).to_owned())
            }
            _ => None,
        };

        let mut server_ip = None;
        for tok in rest {
            if let Some(inner) = tok.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
                server_ip = Some(parse_ip("server_ip", inner)?);
            }
        }

        let response_code = rest
            .last()
            .filter(|tok| is_code_token(tok))
            .map(|tok| (*tok).to_owned());

        let event = DnsEvent {
            client_ip,
            query_domain,
            query_class,
            query_type,
            server_ip,
            response_code,
        };
        Ok((timestamp, LogEvent::Dns(event)))
    }
}

/// 레코드 유형/응답 코드처럼 대문자와 숫자로만 이루어진 토큰인지 확인합니다.
fn is_code_token(tok: &str) -> bool {
    !tok.is_empty()
        && tok.chars().any(|c| c.is_ascii_uppercase())
        && tok
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn field_error(field: &str, reason: impl Into<String>) -> IngestError {
    IngestError::field(LogType::Dns, field, reason)
}

fn parse_ip(field: &str, value: &str) -> Result<IpAddr, IngestError> {
    value
        .parse::<IpAddr>()
        .map_err(|_| field_error(field, format!("invalid IP address '{value}'")))
}
