//! 통합 테스트 -- 인메모리 백엔드로 파일 읽기부터 저장/커밋까지 전체 흐름 검증

use std::net::IpAddr;
use std::path::Path;

use logsift_core::types::{AuthStatus, FileStatus, LogType};
use logsift_core::{LogsiftConfig, Pipeline};
use logsift_ingest::{
    DeadLetterSink, IngestContext, IngestPipelineBuilder, MemoryBackend, ProgressLedger,
    RecordStore,
};

const LATERAL: &str = "2024-01-15T00:00:01Z|action=accept|src=192.168.1.100|dst=10.0.0.50|proto=TCP|src_port=51234|dst_port=3389|bytes_sent=4096|rule=allow-rdp";
const DNS: &str = "2024-01-15T00:00:02Z client 192.168.1.10 query: github.com IN A + (8.8.8.8) NOERROR";
const AUTH_FAILED: &str = "2024-01-15T00:00:03Z web-01 sshd[4242]: Failed password for root from 203.0.113.7 port 52311 ssh2";
const NOISE: &str = "kernel: eth0 link up";

fn config(dir: &Path) -> LogsiftConfig {
    let mut config = LogsiftConfig::default();
    config.reader.log_dir = dir.to_string_lossy().into_owned();
    config.reader.follow = false;
    config.workers.parsers = 2;
    config.workers.indexers = 2;
    config.batching.raw.batch_timeout_ms = 25;
    config.batching.parsed.batch_timeout_ms = 25;
    config.queue.dequeue_timeout_ms = 25;
    config
}

async fn run_once(ctx: IngestContext<MemoryBackend>) -> logsift_ingest::PipelineReport {
    let mut pipeline = IngestPipelineBuilder::new(ctx).build().expect("build");
    pipeline.start().await.expect("start");
    pipeline.drain().await.expect("drain");
    pipeline.stop().await.expect("stop");
    pipeline.report().clone()
}

/// 새 종료 토큰을 가진 같은 백엔드 핸들 (재시작 시뮬레이션)
fn restarted(ctx: &IngestContext<MemoryBackend>) -> IngestContext<MemoryBackend> {
    let mut next = ctx.clone();
    next.cancel = tokio_util::sync::CancellationToken::new();
    next
}

fn write_lines(path: &Path, lines: &[&str]) -> u64 {
    let body: String = lines.iter().map(|l| format!("{l}\n")).collect();
    std::fs::write(path, &body).expect("write log file");
    body.len() as u64
}

#[tokio::test]
async fn interleaved_formats_are_classified_and_stored() {
    let dir = tempfile::tempdir().unwrap();
    let len = write_lines(&dir.path().join("mixed.log"), &[LATERAL, DNS, NOISE, AUTH_FAILED]);
    let ctx = IngestContext::in_memory(config(dir.path())).unwrap();

    let report = run_once(ctx.clone()).await;
    assert_eq!(report.indexer.inserted, 3);
    assert_eq!(report.parser.dead_letters, 1);

    let counts = ctx.store.count_by_type().await.unwrap();
    assert_eq!(counts[&LogType::Firewall], 1);
    assert_eq!(counts[&LogType::Dns], 1);
    assert_eq!(counts[&LogType::Auth], 1);

    let file = dir.path().join("mixed.log").display().to_string();
    let progress = ctx.ledger.progress(&file).await.unwrap().unwrap();
    assert_eq!(progress.status, FileStatus::Complete);
    assert_eq!(progress.committed_offset, len);
}

#[tokio::test]
async fn unclassified_line_keeps_original_offset() {
    let dir = tempfile::tempdir().unwrap();
    write_lines(&dir.path().join("mixed.log"), &[LATERAL, DNS, NOISE]);
    let ctx = IngestContext::in_memory(config(dir.path())).unwrap();
    run_once(ctx.clone()).await;

    let entries = ctx.dead_letters.list(10).await.unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.reason, "unclassified");
    assert_eq!(entry.raw_text, NOISE);
    assert_eq!(entry.source_file, dir.path().join("mixed.log").display().to_string());
    assert_eq!(entry.byte_offset, (LATERAL.len() + 1 + DNS.len() + 1) as u64);
}

#[tokio::test]
async fn lateral_movement_port_3389_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    write_lines(
        &dir.path().join("fw.log"),
        &[
            LATERAL,
            "2024-01-15T00:00:05Z|action=accept|src=192.168.1.100|dst=10.0.0.50|dst_port=3389",
            "2024-01-15T00:00:06Z|action=accept|src=192.168.1.7|dst=10.0.0.51|dst_port=3389",
            "2024-01-15T00:00:07Z|action=accept|src=192.168.1.7|dst=10.0.0.51|dst_port=443",
        ],
    );
    let ctx = IngestContext::in_memory(config(dir.path())).unwrap();
    run_once(ctx.clone()).await;

    let pairs = ctx.store.lateral_movement(3389, 10).await.unwrap();
    assert_eq!(pairs.len(), 2);
    assert_eq!(pairs[0].src_ip, "192.168.1.100".parse::<IpAddr>().unwrap());
    assert_eq!(pairs[0].dst_ip, "10.0.0.50".parse::<IpAddr>().unwrap());
    assert_eq!(pairs[0].count, 2);
}

#[tokio::test]
async fn failed_logins_are_queryable_by_status_and_address() {
    let dir = tempfile::tempdir().unwrap();
    write_lines(
        &dir.path().join("auth.log"),
        &[
            AUTH_FAILED,
            "2024-01-15T00:00:04Z web-01 sshd[4243]: Failed password for invalid user admin from 203.0.113.7 port 52312 ssh2",
            "2024-01-15T00:00:05Z web-01 sshd[4244]: Accepted publickey for deploy from 10.0.0.5 port 40000 ssh2",
        ],
    );
    let ctx = IngestContext::in_memory(config(dir.path())).unwrap();
    run_once(ctx.clone()).await;

    let attacker: IpAddr = "203.0.113.7".parse().unwrap();
    let failed = ctx
        .store
        .auth_by_status_and_address(AuthStatus::Failed, attacker, 10)
        .await
        .unwrap();
    assert_eq!(failed.len(), 2);
    let users = ctx.store.top_failed_usernames(10).await.unwrap();
    let names: Vec<&str> = users.iter().map(|u| u.username.as_str()).collect();
    assert!(names.contains(&"root"));
    assert!(names.contains(&"admin"));
}

#[tokio::test]
async fn reprocessing_same_file_stores_each_line_once() {
    let dir = tempfile::tempdir().unwrap();
    write_lines(&dir.path().join("mixed.log"), &[LATERAL, DNS, AUTH_FAILED]);
    let ctx = IngestContext::in_memory(config(dir.path())).unwrap();
    run_once(ctx.clone()).await;

    // 원장을 잃은 상태로 재시작하면 파일을 처음부터 다시 읽음
    let mut replay = restarted(&ctx);
    replay.ledger = logsift_ingest::MemoryLedger::new();
    let report = run_once(replay).await;
    assert_eq!(report.indexer.inserted, 0);
    assert_eq!(report.indexer.duplicates, 3);

    let counts = ctx.store.count_by_type().await.unwrap();
    assert_eq!(counts.values().sum::<u64>(), 3);
}

#[tokio::test]
async fn completed_files_are_skipped_and_new_files_read_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    write_lines(&dir.path().join("a.log"), &[LATERAL]);
    let ctx = IngestContext::in_memory(config(dir.path())).unwrap();
    run_once(ctx.clone()).await;

    write_lines(&dir.path().join("b.log"), &[DNS]);
    let report = run_once(restarted(&ctx)).await;
    assert_eq!(report.reader.map(|r| r.files_finished), Some(1));
    assert_eq!(report.indexer.inserted, 1);

    let files = ctx.ledger.list().await.unwrap();
    assert_eq!(files.len(), 2);
    assert!(files.iter().all(|f| f.status == FileStatus::Complete));
}

#[tokio::test]
async fn ten_thousand_lines_make_twenty_raw_batches() {
    let dir = tempfile::tempdir().unwrap();
    let lines: Vec<String> = (0..10_000)
        .map(|i| {
            format!(
                "2024-01-15T00:00:01Z|action=accept|src=10.0.{}.{}|dst=10.1.0.1|dst_port=443",
                i / 250,
                i % 250
            )
        })
        .collect();
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    write_lines(&dir.path().join("bulk.log"), &refs);

    let mut config = config(dir.path());
    config.batching.raw.batch_size_messages = 500;
    config.batching.raw.batch_size_bytes = 64 * 1024 * 1024;
    config.batching.raw.batch_timeout_ms = 60_000;
    let ctx = IngestContext::in_memory(config).unwrap();

    let report = run_once(ctx.clone()).await;
    assert_eq!(report.reader.map(|r| r.batches), Some(20));
    assert_eq!(report.indexer.inserted, 10_000);
    assert_eq!(report.parser.dead_letters, 0);
}

#[tokio::test]
async fn over_length_line_is_dead_lettered() {
    let dir = tempfile::tempdir().unwrap();
    let long = format!("{LATERAL}|note={}", "x".repeat(300));
    write_lines(&dir.path().join("fw.log"), &[&long, DNS]);
    let mut config = config(dir.path());
    config.reader.max_line_length = 256;
    let ctx = IngestContext::in_memory(config).unwrap();
    run_once(ctx.clone()).await;

    let entries = ctx.dead_letters.list(10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].reason, "line_too_long");
    assert_eq!(entries[0].byte_offset, 0);
    let file = dir.path().join("fw.log").display().to_string();
    let progress = ctx.ledger.progress(&file).await.unwrap().unwrap();
    assert_eq!(progress.status, FileStatus::Complete);
}

#[tokio::test]
async fn lines_with_nul_bytes_are_dead_lettered_and_file_completes() {
    let dir = tempfile::tempdir().unwrap();
    let nul_firewall = format!("{LATERAL}|note=a\0b");
    let len = write_lines(&dir.path().join("nul.log"), &[LATERAL, "junk\0line", &nul_firewall]);
    let ctx = IngestContext::in_memory(config(dir.path())).unwrap();

    let report = run_once(ctx.clone()).await;
    assert_eq!(report.indexer.inserted, 1);
    assert_eq!(report.parser.dead_letters, 2);

    let entries = ctx.dead_letters.list(10).await.unwrap();
    let mut reasons: Vec<&str> = entries.iter().map(|e| e.reason.as_str()).collect();
    reasons.sort_unstable();
    assert_eq!(reasons, ["invalid_field:text", "unclassified"]);

    let file = dir.path().join("nul.log").display().to_string();
    let progress = ctx.ledger.progress(&file).await.unwrap().unwrap();
    assert_eq!(progress.status, FileStatus::Complete);
    assert_eq!(progress.committed_offset, len);
}
