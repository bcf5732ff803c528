//! 타임스탬프 파싱 헬퍼
//!
//! - RFC 3339 (오프셋 포함): `2024-01-15T00:00:01+09:00`, `2024-01-15T00:00:01.250Z`
//! - 오프셋 없는 ISO 8601: `2024-01-15T00:00:01.123456` (UTC로 해석)
//! - BSD syslog: `Jan 15 00:00:01` (현재 연도)

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};

/// 오프셋 없는 ISO 8601 형식 후보
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// ISO 8601 토큰을 UTC 시각으로 파싱합니다.
pub fn parse_iso8601(token: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(token) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(token, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// BSD syslog 타임스탬프(`Mon DD HH:MM:SS`)를 현재 연도로 파싱합니다.
pub fn parse_bsd(month: &str, day: &str, time: &str) -> Option<DateTime<Utc>> {
    let with_year = format!("{} {month} {day} {time}", Utc::now().year());
    NaiveDateTime::parse_from_str(&with_year, "%Y %b %d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
