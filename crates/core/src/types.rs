//! 도메인 타입 -- 파이프라인 전 단계에서 공유하는 데이터 모델
//!
//! 리더가 만드는 [`RawLine`], 파서가 만드는 [`ParsedRecord`],
//! 실패 경로의 [`DeadLetterEntry`], 진행 원장의 [`FileProgress`]를 정의합니다.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── ByteRange ──────────────────────────────────────────────────────

/// 파일 내 바이트 구간 `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    /// 시작 오프셋 (포함)
    pub start: u64,
    /// 끝 오프셋 (제외)
    pub end: u64,
}

impl ByteRange {
    /// 새 구간을 생성합니다. `end < start`이면 빈 구간으로 보정합니다.
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// 구간 길이 (바이트)
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// 빈 구간인지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// 두 구간이 겹치거나 맞닿아 있으면 `true`
    pub fn touches(&self, other: &ByteRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// 정렬된 구간 목록에 새 구간을 삽입하고, 맞닿은 구간을 병합합니다.
pub fn coalesce_range(ranges: &mut Vec<ByteRange>, range: ByteRange) {
    if range.is_empty() {
        return;
    }
    let idx = ranges.partition_point(|r| r.end < range.start);
    let mut merged = range;
    let mut end_idx = idx;
    while end_idx < ranges.len() && ranges[end_idx].touches(&merged) {
        merged.start = merged.start.min(ranges[end_idx].start);
        merged.end = merged.end.max(ranges[end_idx].end);
        end_idx += 1;
    }
    ranges.splice(idx..end_idx, std::iter::once(merged));
}

// ─── RawLine ────────────────────────────────────────────────────────

/// 소스 파일에서 읽은 원시 라인
///
/// 파일 리더만 생성합니다. `claim`은 이 라인이 책임지는 파일 구간으로,
/// 직전에 방출된 라인(또는 재개 지점)의 끝에서 시작해 줄바꿈 뒤에서 끝납니다.
/// 건너뛴 빈 줄의 바이트도 다음 라인의 claim에 포함됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLine {
    /// 소스 파일 식별자
    pub source_file: String,
    /// 라인 시작 바이트 오프셋
    pub byte_offset: u64,
    /// 1부터 시작하는 라인 번호
    pub line_number: u64,
    /// 줄바꿈을 제외한 라인 텍스트
    pub text: String,
    /// 읽은 시각
    pub ingested_at: DateTime<Utc>,
    /// 이 라인이 책임지는 파일 구간
    pub claim: ByteRange,
}

impl RawLine {
    /// 배치 바이트 계산에 쓰이는 크기
    pub fn byte_size(&self) -> usize {
        self.text.len() + self.source_file.len()
    }
}

// ─── LogType ────────────────────────────────────────────────────────

/// 지원하는 로그 유형
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    /// 방화벽 key=value 로그
    Firewall,
    /// DNS 쿼리 로그
    Dns,
    /// sshd 인증 로그
    Auth,
}

impl LogType {
    /// 모든 로그 유형 (기본 분류 우선순위 순)
    pub const ALL: [LogType; 3] = [LogType::Firewall, LogType::Dns, LogType::Auth];

    /// 소문자 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Firewall => "firewall",
            Self::Dns => "dns",
            Self::Auth => "auth",
        }
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "firewall" => Ok(Self::Firewall),
            "dns" => Ok(Self::Dns),
            "auth" => Ok(Self::Auth),
            other => Err(format!("unknown log type '{other}'")),
        }
    }
}

// ─── 유형별 필드 ────────────────────────────────────────────────────

/// 방화벽 이벤트 필드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallEvent {
    /// accept, drop, reject 등
    pub action: String,
    /// 출발지 주소
    pub src_ip: IpAddr,
    /// 목적지 주소
    pub dst_ip: IpAddr,
    /// 출발지 포트
    pub src_port: Option<u16>,
    /// 목적지 포트
    pub dst_port: Option<u16>,
    /// 프로토콜 (TCP, UDP, ICMP)
    pub protocol: Option<String>,
    /// 전송 바이트
    pub bytes: Option<u64>,
    /// 매칭된 방화벽 규칙
    pub rule: Option<String>,
    /// 알 수 없는 key=value 토큰
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// DNS 쿼리 이벤트 필드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsEvent {
    /// 질의한 클라이언트
    pub client_ip: Option<IpAddr>,
    /// 질의 도메인
    pub query_domain: String,
    /// 질의 클래스 (IN 등)
    pub query_class: Option<String>,
    /// 레코드 유형 (A, AAAA, MX ...)
    pub query_type: Option<String>,
    /// 응답 서버
    pub server_ip: Option<IpAddr>,
    /// 응답 코드 (NOERROR, NXDOMAIN ...)
    pub response_code: Option<String>,
}

/// 인증 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthStatus {
    /// 인증 성공
    Accepted,
    /// 인증 실패
    Failed,
}

impl AuthStatus {
    /// 로그에 기록되는 그대로의 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Accepted" => Ok(Self::Accepted),
            "Failed" => Ok(Self::Failed),
            other => Err(format!("unknown auth status '{other}'")),
        }
    }
}

/// 인증 이벤트 필드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEvent {
    /// 호스트명
    pub hostname: String,
    /// 프로그램 이름 (sshd 등)
    pub process: String,
    /// 프로세스 ID
    pub pid: u32,
    /// 인증 결과
    pub status: AuthStatus,
    /// 인증 방식 (password, publickey ...)
    pub auth_method: Option<String>,
    /// 사용자명
    pub username: String,
    /// 접속 출발지 주소
    pub source_ip: IpAddr,
    /// 접속 출발지 포트
    pub source_port: Option<u16>,
    /// `process[pid]:` 뒤의 원문 메시지
    pub message: String,
}

/// 로그 유형별 필드 집합
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "log_type", rename_all = "snake_case")]
pub enum LogEvent {
    Firewall(FirewallEvent),
    Dns(DnsEvent),
    Auth(AuthEvent),
}

impl LogEvent {
    /// 이벤트의 로그 유형
    pub fn log_type(&self) -> LogType {
        match self {
            Self::Firewall(_) => LogType::Firewall,
            Self::Dns(_) => LogType::Dns,
            Self::Auth(_) => LogType::Auth,
        }
    }
}

// ─── ParsedRecord ───────────────────────────────────────────────────

/// 파싱이 끝난 레코드
///
/// 성공적으로 파싱된 [`RawLine`] 하나당 정확히 하나 생성됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedRecord {
    /// 소스 파일 식별자
    pub source_file: String,
    /// 원본 라인 시작 오프셋 (저장소 유일성 키의 일부)
    pub byte_offset: u64,
    /// 원본 라인이 책임지는 파일 구간
    pub claim: ByteRange,
    /// 이벤트 시각
    pub timestamp: DateTime<Utc>,
    /// 유형별 필드
    pub event: LogEvent,
}

impl ParsedRecord {
    /// 레코드의 로그 유형
    pub fn log_type(&self) -> LogType {
        self.event.log_type()
    }

    /// 배치 바이트 계산에 쓰이는 근사 크기
    pub fn byte_size(&self) -> usize {
        const FIXED: usize = 64;
        let fields = match &self.event {
            LogEvent::Firewall(fw) => {
                fw.action.len()
                    + fw.protocol.as_deref().map_or(0, str::len)
                    + fw.rule.as_deref().map_or(0, str::len)
                    + fw.extra.iter().map(|(k, v)| k.len() + v.len()).sum::<usize>()
            }
            LogEvent::Dns(dns) => {
                dns.query_domain.len()
                    + dns.query_type.as_deref().map_or(0, str::len)
                    + dns.response_code.as_deref().map_or(0, str::len)
            }
            LogEvent::Auth(auth) => {
                auth.hostname.len() + auth.process.len() + auth.username.len() + auth.message.len()
            }
        };
        FIXED + self.source_file.len() + fields
    }

    /// 해당 형식의 정규 라인 표현으로 다시 직렬화합니다.
    ///
    /// 결과를 다시 파싱하면 같은 필드 값을 얻습니다.
    pub fn to_line(&self) -> String {
        let ts = format_timestamp(&self.timestamp);
        match &self.event {
            LogEvent::Firewall(fw) => {
                let mut line = format!(
                    "{ts}|action={}|src={}|dst={}",
                    fw.action, fw.src_ip, fw.dst_ip
                );
                if let Some(protocol) = &fw.protocol {
                    line.push_str(&format!("|protocol={protocol}"));
                }
                if let Some(port) = fw.src_port {
                    line.push_str(&format!("|src_port={port}"));
                }
                if let Some(port) = fw.dst_port {
                    line.push_str(&format!("|dst_port={port}"));
                }
                if let Some(bytes) = fw.bytes {
                    line.push_str(&format!("|bytes={bytes}"));
                }
                if let Some(rule) = &fw.rule {
                    line.push_str(&format!("|rule={rule}"));
                }
                for (key, value) in &fw.extra {
                    line.push_str(&format!("|{key}={value}"));
                }
                line
            }
            LogEvent::Dns(dns) => {
                let mut line = ts;
                if let Some(client) = dns.client_ip {
                    line.push_str(&format!(" client {client}"));
                }
                line.push_str(&format!(" query: {}", dns.query_domain));
                if let Some(class) = &dns.query_class {
                    line.push_str(&format!(" {class}"));
                }
                if let Some(qtype) = &dns.query_type {
                    line.push_str(&format!(" {qtype}"));
                }
                // 플래그 토큰이 유형 자리를 채워 응답 코드가 유형으로 읽히지 않음
                if dns.server_ip.is_some() || dns.response_code.is_some() {
                    line.push_str(" +");
                }
                if let Some(server) = dns.server_ip {
                    line.push_str(&format!(" ({server})"));
                }
                if let Some(rcode) = &dns.response_code {
                    line.push_str(&format!(" {rcode}"));
                }
                line
            }
            LogEvent::Auth(auth) => format!(
                "{ts} {} {}[{}]: {}",
                auth.hostname, auth.process, auth.pid, auth.message
            ),
        }
    }
}

/// 정규 타임스탬프 표현 (RFC 3339, UTC `Z`)
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

// ─── Dead letter ────────────────────────────────────────────────────

/// dead-letter가 발생한 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterStage {
    /// 분류/파싱 단계
    Parse,
    /// 인덱싱(저장) 단계
    Index,
}

impl DeadLetterStage {
    /// 소문자 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::Index => "index",
        }
    }
}

impl FromStr for DeadLetterStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parse" => Ok(Self::Parse),
            "index" => Ok(Self::Index),
            other => Err(format!("unknown dead-letter stage '{other}'")),
        }
    }
}

/// 분류/검증/저장에 실패한 라인
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// 엔트리 ID
    pub id: Uuid,
    /// 소스 파일 식별자
    pub source_file: String,
    /// 원본 라인 시작 오프셋
    pub byte_offset: u64,
    /// 원본 라인이 책임지는 파일 구간
    pub claim: ByteRange,
    /// 원문
    pub raw_text: String,
    /// 기계 판독용 사유 코드 (`unclassified`, `invalid_field:src` ...)
    pub reason: String,
    /// 사람이 읽는 상세 사유
    pub detail: String,
    /// 실패 단계
    pub stage: DeadLetterStage,
    /// 실패 시각
    pub failed_at: DateTime<Utc>,
    /// 재처리 시도 횟수
    pub retry_count: u32,
}

impl DeadLetterEntry {
    /// 새 dead-letter 엔트리를 생성합니다.
    pub fn new(
        source_file: impl Into<String>,
        byte_offset: u64,
        claim: ByteRange,
        raw_text: impl Into<String>,
        reason: impl Into<String>,
        detail: impl Into<String>,
        stage: DeadLetterStage,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_file: source_file.into(),
            byte_offset,
            claim,
            raw_text: raw_text.into(),
            reason: reason.into(),
            detail: detail.into(),
            stage,
            failed_at: Utc::now(),
            retry_count: 0,
        }
    }
}

// ─── FileProgress ───────────────────────────────────────────────────

/// 파일 처리 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// 아직 읽지 않음
    New,
    /// 읽는 중 또는 커밋 대기 중
    InProgress,
    /// 모든 라인이 커밋됨
    Complete,
    /// I/O 실패 (재시도 시 InProgress로 복귀)
    Failed,
}

impl FileStatus {
    /// 소문자 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "in_progress" => Ok(Self::InProgress),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown file status '{other}'")),
        }
    }
}

/// 파일별 진행 상태
///
/// `committed_offset`은 연속적으로 커밋된 구간의 끝까지만 전진합니다.
/// 순서가 뒤바뀌어 도착한 커밋 구간은 `pending`에 보관되었다가
/// 앞쪽 공백이 메워지면 흡수됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileProgress {
    /// 소스 파일 식별자
    pub source_file: String,
    /// 영속 커밋된 연속 구간의 끝
    pub committed_offset: u64,
    /// 리더가 방출한 마지막 라인의 끝
    pub claimed_offset: u64,
    /// 리더가 파일 끝까지 읽고 닫았는지 여부
    pub read_complete: bool,
    /// 현재 상태
    pub status: FileStatus,
    /// `committed_offset` 이후에 커밋된 구간
    #[serde(default)]
    pub pending: Vec<ByteRange>,
    /// 마지막 실패 사유
    pub last_error: Option<String>,
    /// 마지막 갱신 시각
    pub updated_at: DateTime<Utc>,
}

impl FileProgress {
    /// 새 파일의 진행 상태를 생성합니다.
    pub fn new(source_file: impl Into<String>) -> Self {
        Self {
            source_file: source_file.into(),
            committed_offset: 0,
            claimed_offset: 0,
            read_complete: false,
            status: FileStatus::New,
            pending: Vec::new(),
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// 읽기를 시작합니다. `new`/`failed`/`in_progress` → `in_progress`.
    ///
    /// 이미 완료된 파일이면 `false`를 반환하고 상태를 바꾸지 않습니다.
    pub fn begin_reading(&mut self) -> bool {
        if self.status == FileStatus::Complete {
            return false;
        }
        self.status = FileStatus::InProgress;
        self.read_complete = false;
        self.last_error = None;
        self.touch();
        true
    }

    /// 리더가 방출한 구간의 끝을 기록합니다.
    pub fn record_claim(&mut self, claimed_offset: u64) {
        self.claimed_offset = self.claimed_offset.max(claimed_offset);
        self.touch();
    }

    /// 리더가 파일을 끝까지 읽었음을 기록합니다.
    pub fn finish_reading(&mut self, final_offset: u64) {
        self.record_claim(final_offset);
        self.read_complete = true;
        self.refresh_status();
    }

    /// I/O 실패를 기록합니다.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = FileStatus::Failed;
        self.last_error = Some(reason.into());
        self.touch();
    }

    /// 영속 커밋된 구간을 반영하고 새 `committed_offset`을 반환합니다.
    pub fn apply_commit(&mut self, ranges: &[ByteRange]) -> u64 {
        for range in ranges {
            if range.end <= self.committed_offset {
                continue;
            }
            coalesce_range(&mut self.pending, *range);
        }
        while let Some(first) = self.pending.first().copied() {
            if first.start > self.committed_offset {
                break;
            }
            self.committed_offset = self.committed_offset.max(first.end);
            self.pending.remove(0);
        }
        self.refresh_status();
        self.committed_offset
    }

    /// 완료 여부를 다시 계산합니다.
    fn refresh_status(&mut self) {
        if self.status != FileStatus::Failed
            && self.read_complete
            && self.committed_offset >= self.claimed_offset
        {
            self.status = FileStatus::Complete;
        }
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-15T00:00:01.250Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn coalesce_merges_adjacent_and_overlapping() {
        let mut ranges = Vec::new();
        coalesce_range(&mut ranges, ByteRange::new(10, 20));
        coalesce_range(&mut ranges, ByteRange::new(30, 40));
        coalesce_range(&mut ranges, ByteRange::new(20, 30));
        assert_eq!(ranges, vec![ByteRange::new(10, 40)]);

        coalesce_range(&mut ranges, ByteRange::new(0, 5));
        coalesce_range(&mut ranges, ByteRange::new(35, 50));
        assert_eq!(ranges, vec![ByteRange::new(0, 5), ByteRange::new(10, 50)]);
    }

    #[test]
    fn coalesce_ignores_empty_range() {
        let mut ranges = vec![ByteRange::new(0, 5)];
        coalesce_range(&mut ranges, ByteRange::new(7, 7));
        assert_eq!(ranges, vec![ByteRange::new(0, 5)]);
    }

    #[test]
    fn progress_advances_only_contiguously() {
        let mut progress = FileProgress::new("a.log");
        progress.begin_reading();

        // 두 번째 배치가 먼저 커밋되어도 오프셋은 전진하지 않음
        assert_eq!(progress.apply_commit(&[ByteRange::new(100, 200)]), 0);
        assert_eq!(progress.pending, vec![ByteRange::new(100, 200)]);

        // 공백이 메워지면 한 번에 전진
        assert_eq!(progress.apply_commit(&[ByteRange::new(0, 100)]), 200);
        assert!(progress.pending.is_empty());
    }

    #[test]
    fn progress_ignores_already_committed_ranges() {
        let mut progress = FileProgress::new("a.log");
        progress.apply_commit(&[ByteRange::new(0, 50)]);
        assert_eq!(progress.apply_commit(&[ByteRange::new(10, 40)]), 50);
        assert!(progress.pending.is_empty());
    }

    #[test]
    fn progress_completes_after_read_and_commit() {
        let mut progress = FileProgress::new("a.log");
        progress.begin_reading();
        progress.record_claim(120);
        progress.finish_reading(120);
        assert_eq!(progress.status, FileStatus::InProgress);

        progress.apply_commit(&[ByteRange::new(0, 120)]);
        assert_eq!(progress.status, FileStatus::Complete);
        assert!(!progress.begin_reading());
    }

    #[test]
    fn failed_file_can_be_retried() {
        let mut progress = FileProgress::new("a.log");
        progress.begin_reading();
        progress.mark_failed("permission denied");
        assert_eq!(progress.status, FileStatus::Failed);
        assert!(progress.last_error.is_some());

        assert!(progress.begin_reading());
        assert_eq!(progress.status, FileStatus::InProgress);
        assert!(progress.last_error.is_none());
    }

    #[test]
    fn firewall_to_line_uses_canonical_keys() {
        let record = ParsedRecord {
            source_file: "fw.log".to_owned(),
            byte_offset: 0,
            claim: ByteRange::new(0, 10),
            timestamp: ts(),
            event: LogEvent::Firewall(FirewallEvent {
                action: "accept".to_owned(),
                src_ip: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 100)),
                dst_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 50)),
                src_port: None,
                dst_port: Some(3389),
                protocol: Some("TCP".to_owned()),
                bytes: None,
                rule: None,
                extra: BTreeMap::new(),
            }),
        };
        assert_eq!(
            record.to_line(),
            "2024-01-15T00:00:01.250Z|action=accept|src=192.168.1.100|dst=10.0.0.50|protocol=TCP|dst_port=3389"
        );
        assert_eq!(record.log_type(), LogType::Firewall);
    }

    #[test]
    fn dns_to_line_keeps_response_code_out_of_type_slot() {
        let record = ParsedRecord {
            source_file: "dns.log".to_owned(),
            byte_offset: 0,
            claim: ByteRange::new(0, 10),
            timestamp: ts(),
            event: LogEvent::Dns(DnsEvent {
                client_ip: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
                query_domain: "a.com".to_owned(),
                query_class: None,
                query_type: None,
                server_ip: None,
                response_code: Some("NXDOMAIN".to_owned()),
            }),
        };
        assert_eq!(
            record.to_line(),
            "2024-01-15T00:00:01.250Z client 10.0.0.1 query: a.com + NXDOMAIN"
        );
    }

    #[test]
    fn log_event_serializes_with_type_tag() {
        let event = LogEvent::Dns(DnsEvent {
            client_ip: None,
            query_domain: "github.com".to_owned(),
            query_class: None,
            query_type: Some("A".to_owned()),
            server_ip: None,
            response_code: None,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["log_type"], "dns");
        assert_eq!(json["query_domain"], "github.com");
    }

    #[test]
    fn log_type_parses_from_str() {
        for log_type in LogType::ALL {
            assert_eq!(log_type.as_str().parse::<LogType>().unwrap(), log_type);
        }
        assert!("syslog".parse::<LogType>().is_err());
    }
}
