//! 분류/파서 체인 -- 방화벽, DNS, 인증 로그 인식기
//!
//! [`ParserChain`]은 설정된 우선순위대로 [`Recognizer`]를 시도하여
//! 처음 `matches`가 참인 인식기로 라인을 파싱합니다.
//!
//! # 분류 규칙
//! - 첫 번째로 매칭된 인식기가 라인을 가져갑니다 (엄격한 first-match).
//! - 매칭된 인식기의 추출이 실패하면 다음 인식기로 넘어가지 않고
//!   [`IngestError::FieldValidation`]으로 거부합니다.
//! - 아무 인식기도 매칭되지 않으면 [`IngestError::Classification`]입니다.
//! - 매칭된 라인에 NUL 바이트가 있으면 `text` 필드 오류로 거부합니다.
//!   PostgreSQL 텍스트 컬럼은 NUL을 저장할 수 없습니다.
//!
//! # 사용 예시
//! ```ignore
//! use logsift_ingest::parser::ParserChain;
//!
//! let chain = ParserChain::from_names(&["firewall".into(), "dns".into(), "auth".into()])?;
//! let record = chain.classify_and_parse(&raw_line)?;
//! ```

pub mod auth;
pub mod dns;
pub mod firewall;
pub mod timestamp;

pub use auth::AuthParser;
pub use dns::DnsParser;
pub use firewall::FirewallParser;

use chrono::{DateTime, Utc};
use logsift_core::types::{ByteRange, LogEvent, LogType, ParsedRecord, RawLine};

use crate::error::IngestError;

/// 로그 유형 하나를 인식하고 파싱하는 인식기
#[derive(Debug, Clone)]
pub enum Recognizer {
    /// 방화벽 key=value 로그
    Firewall(FirewallParser),
    /// DNS 쿼리 로그
    Dns(DnsParser),
    /// sshd 인증 로그
    Auth(AuthParser),
}

impl Recognizer {
    /// 로그 유형에 해당하는 인식기를 생성합니다.
    pub fn for_type(log_type: LogType) -> Result<Self, IngestError> {
        Ok(match log_type {
            LogType::Firewall => Self::Firewall(FirewallParser::new()),
            LogType::Dns => Self::Dns(DnsParser::new()),
            LogType::Auth => Self::Auth(AuthParser::new()?),
        })
    }

    /// 인식기가 담당하는 로그 유형
    pub fn log_type(&self) -> LogType {
        match self {
            Self::Firewall(_) => LogType::Firewall,
            Self::Dns(_) => LogType::Dns,
            Self::Auth(_) => LogType::Auth,
        }
    }

    /// 라인이 이 형식처럼 보이는지 빠르게 확인합니다.
    pub fn matches(&self, text: &str) -> bool {
        match self {
            Self::Firewall(p) => p.matches(text),
            Self::Dns(p) => p.matches(text),
            Self::Auth(p) => p.matches(text),
        }
    }

    /// 라인에서 타임스탬프와 유형별 필드를 추출합니다.
    pub fn parse(&self, text: &str) -> Result<(DateTime<Utc>, LogEvent), IngestError> {
        match self {
            Self::Firewall(p) => p.parse(text),
            Self::Dns(p) => p.parse(text),
            Self::Auth(p) => p.parse(text),
        }
    }
}

/// 우선순위가 정해진 인식기 목록
#[derive(Debug, Clone)]
pub struct ParserChain {
    recognizers: Vec<Recognizer>,
}

impl ParserChain {
    /// 인식기 이름 목록으로 체인을 생성합니다.
    ///
    /// 알 수 없는 이름이나 중복된 이름은 설정 에러입니다.
    pub fn from_names(names: &[String]) -> Result<Self, IngestError> {
        if names.is_empty() {
            return Err(config_error("at least one recognizer is required"));
        }

        let mut order: Vec<LogType> = Vec::with_capacity(names.len());
        for name in names {
            let log_type = name
                .trim()
                .parse::<LogType>()
                .map_err(|_| config_error(format!("unknown recognizer '{name}'")))?;
            if order.contains(&log_type) {
                return Err(config_error(format!("duplicate recognizer '{name}'")));
            }
            order.push(log_type);
        }

        let recognizers = order
            .into_iter()
            .map(Recognizer::for_type)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { recognizers })
    }

    /// 기본 우선순위(firewall, dns, auth)로 체인을 생성합니다.
    pub fn with_defaults() -> Result<Self, IngestError> {
        let recognizers = LogType::ALL
            .into_iter()
            .map(Recognizer::for_type)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { recognizers })
    }

    /// 라인을 처음 매칭되는 인식기에 배정합니다.
    pub fn classify(&self, text: &str) -> Option<&Recognizer> {
        self.recognizers.iter().find(|r| r.matches(text))
    }

    /// 원시 라인을 분류하고 파싱합니다.
    pub fn classify_and_parse(&self, line: &RawLine) -> Result<ParsedRecord, IngestError> {
        self.parse_text(&line.text, &line.source_file, line.byte_offset, line.claim)
    }

    /// 위치 정보와 함께 텍스트를 분류하고 파싱합니다.
    pub fn parse_text(
        &self,
        text: &str,
        source_file: &str,
        byte_offset: u64,
        claim: ByteRange,
    ) -> Result<ParsedRecord, IngestError> {
        let recognizer = self.classify(text).ok_or(IngestError::Classification)?;
        if text.contains('\0') {
            return Err(IngestError::field(
                recognizer.log_type(),
                "text",
                "contains NUL byte",
            ));
        }
        let (timestamp, event) = recognizer.parse(text)?;
        Ok(ParsedRecord {
            source_file: source_file.to_owned(),
            byte_offset,
            claim,
            timestamp,
            event,
        })
    }

    /// 등록된 인식기의 로그 유형 (우선순위 순)
    pub fn log_types(&self) -> Vec<LogType> {
        self.recognizers.iter().map(Recognizer::log_type).collect()
    }
}

fn config_error(reason: impl Into<String>) -> IngestError {
    IngestError::Config {
        field: "parser.recognizers".to_owned(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn raw(text: &str, offset: u64) -> RawLine {
        RawLine {
            source_file: "mixed.log".to_owned(),
            byte_offset: offset,
            line_number: 1,
            text: text.to_owned(),
            ingested_at: Utc::now(),
            claim: ByteRange::new(offset, offset + text.len() as u64 + 1),
        }
    }

    #[test]
    fn default_chain_order() {
        let chain = ParserChain::with_defaults().unwrap();
        assert_eq!(
            chain.log_types(),
            vec![LogType::Firewall, LogType::Dns, LogType::Auth]
        );
    }

    #[test]
    fn unknown_recognizer_is_config_error() {
        let err = ParserChain::from_names(&["firewall".to_owned(), "netflow".to_owned()])
            .unwrap_err();
        assert!(matches!(err, IngestError::Config { .. }));
        assert!(err.to_string().contains("netflow"));
    }

    #[test]
    fn duplicate_recognizer_is_config_error() {
        let err = ParserChain::from_names(&["dns".to_owned(), "dns".to_owned()]).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn empty_recognizers_is_config_error() {
        assert!(ParserChain::from_names(&[]).is_err());
    }

    #[test]
    fn classifies_interleaved_formats() {
        let chain = ParserChain::with_defaults().unwrap();
        let lines = [
            ("2024-01-15T00:00:01Z|action=drop|src=1.1.1.1|dst=2.2.2.2", LogType::Firewall),
            ("2024-01-15T00:00:02Z client 10.0.0.1 query: a.com IN A + (8.8.8.8) NOERROR", LogType::Dns),
            ("2024-01-15T00:00:03Z h sshd[1]: Failed password for root from 3.3.3.3 port 22 ssh2", LogType::Auth),
        ];
        for (i, (text, expected)) in lines.iter().enumerate() {
            let record = chain.classify_and_parse(&raw(text, i as u64 * 100)).unwrap();
            assert_eq!(record.log_type(), *expected);
            assert_eq!(record.byte_offset, i as u64 * 100);
        }
    }

    #[test]
    fn unmatched_line_is_classification_error() {
        let chain = ParserChain::with_defaults().unwrap();
        let err = chain
            .classify_and_parse(&raw("kernel: eth0 link up", 0))
            .unwrap_err();
        assert!(matches!(err, IngestError::Classification));
    }

    #[test]
    fn matched_but_invalid_does_not_fall_through() {
        // firewall이 먼저 매칭되므로 auth로 넘어가지 않음
        let chain = ParserChain::with_defaults().unwrap();
        let err = chain
            .classify_and_parse(&raw("2024-01-15T00:00:01Z|action=accept|src=bad|dst=1.1.1.1", 0))
            .unwrap_err();
        assert!(matches!(
            err,
            IngestError::FieldValidation { log_type: LogType::Firewall, .. }
        ));
    }

    #[test]
    fn nul_byte_in_matched_line_is_field_error() {
        let chain = ParserChain::with_defaults().unwrap();
        let err = chain
            .classify_and_parse(&raw(
                "2024-01-15T00:00:01Z|action=accept|src=1.1.1.1|dst=2.2.2.2|rule=a\0b",
                0,
            ))
            .unwrap_err();
        assert_eq!(err.dead_letter_reason(), "invalid_field:text");
        assert!(matches!(
            err,
            IngestError::FieldValidation { log_type: LogType::Firewall, .. }
        ));
    }

    #[test]
    fn priority_order_is_respected() {
        // firewall과 dns 모두 매칭되는 라인
        let text = "2024-01-15T00:00:01Z|action=allow|src=1.1.1.1|dst=2.2.2.2|note=x query: y";
        let fw_first = ParserChain::with_defaults().unwrap();
        assert_eq!(fw_first.classify(text).map(Recognizer::log_type), Some(LogType::Firewall));

        let dns_first = ParserChain::from_names(&["dns".to_owned(), "firewall".to_owned()]).unwrap();
        assert_eq!(dns_first.classify(text).map(Recognizer::log_type), Some(LogType::Dns));
    }

    #[test]
    fn lateral_movement_example_parses_port_as_integer() {
        let chain = ParserChain::with_defaults().unwrap();
        let record = chain
            .classify_and_parse(&raw(
                "2024-01-15T00:00:01Z|action=accept|src=192.168.1.100|dst=10.0.0.50|dst_port=3389|proto=TCP",
                0,
            ))
            .unwrap();
        match record.event {
            LogEvent::Firewall(fw) => assert_eq!(fw.dst_port, Some(3389)),
            other => panic!("expected firewall event, got {other:?}"),
        }
    }
}
