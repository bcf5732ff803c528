//! Orchestrator integration tests.
//!
//! Tests the full flow: config loading -> role selection -> run -> shutdown,
//! using the in-memory backend.

use std::path::Path;
use std::time::Duration;

use clap::Parser;
use logsift_core::LogsiftConfig;
use logsift_daemon::cli::{DaemonCli, Role};
use logsift_daemon::orchestrator::{Orchestrator, RunOutcome, apply_cli_overrides, load_config};
use serial_test::serial;

const FIREWALL: &str = "2024-01-15T00:00:01Z|action=accept|src=192.168.1.100|dst=10.0.0.50|dst_port=3389";
const DNS: &str = "2024-01-15T00:00:02Z client 192.168.1.10 query: github.com IN A + (8.8.8.8) NOERROR";

fn memory_config(log_dir: &Path) -> LogsiftConfig {
    let toml_str = format!(
        r#"
[general]
log_level = "info"

[reader]
log_dir = "{}"
follow = false

[batching.raw]
batch_timeout_ms = 25

[batching.parsed]
batch_timeout_ms = 25

[queue]
dequeue_timeout_ms = 25

[storage]
backend = "memory"
"#,
        log_dir.display()
    );
    LogsiftConfig::parse(&toml_str).expect("failed to parse memory config")
}

/// A shutdown future that never fires.
async fn never() -> anyhow::Result<&'static str> {
    std::future::pending().await
}

#[tokio::test]
async fn one_shot_memory_run_drains_and_stops() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("mixed.log"), format!("{FIREWALL}\n{DNS}\nnoise\n")).unwrap();

    let orchestrator = Orchestrator::new(memory_config(dir.path()), Role::All).unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(30), orchestrator.run_until(never()))
        .await
        .expect("one-shot run should finish on its own")
        .unwrap();

    let RunOutcome::Pipeline(report) = outcome else {
        panic!("expected a pipeline outcome, got {outcome:?}");
    };
    assert_eq!(report.indexer.inserted, 2);
    assert_eq!(report.parser.dead_letters, 1);
    assert_eq!(report.reader.map(|r| r.files_finished), Some(1));
}

#[tokio::test]
async fn follow_mode_stops_on_shutdown_signal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = memory_config(dir.path());
    config.reader.follow = true;
    config.reader.scan_interval_ms = 50;

    let orchestrator = Orchestrator::new(config, Role::All).unwrap();
    let shutdown = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok("test")
    };
    let outcome = tokio::time::timeout(Duration::from_secs(30), orchestrator.run_until(shutdown))
        .await
        .expect("follow-mode run should stop on signal")
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Pipeline(_)));
}

#[test]
fn split_roles_require_postgres() {
    let dir = tempfile::tempdir().unwrap();
    for role in [
        Role::Reader,
        Role::Parser,
        Role::Indexer,
        Role::InitDb,
        Role::ReplayDeadLetters,
    ] {
        let err = Orchestrator::new(memory_config(dir.path()), role)
            .err()
            .expect("memory backend must reject non-all roles");
        assert!(err.to_string().contains("postgres"), "{role:?}: {err}");
    }
}

#[test]
fn invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = memory_config(dir.path());
    config.workers.parsers = 0;
    assert!(Orchestrator::new(config, Role::All).is_err());
}

#[test]
fn cli_overrides_take_precedence() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = memory_config(dir.path());
    let cli = DaemonCli::parse_from([
        "logsift-daemon",
        "--log-level",
        "debug",
        "--log-format",
        "pretty",
    ]);
    apply_cli_overrides(&mut config, &cli);
    assert_eq!(config.general.log_level, "debug");
    assert_eq!(config.general.log_format, "pretty");
}

#[tokio::test]
#[serial]
async fn load_config_applies_env_then_cli() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logsift.toml");
    std::fs::write(
        &path,
        "[general]\nlog_level = \"info\"\n\n[storage]\nbackend = \"memory\"\n",
    )
    .unwrap();

    // SAFETY: serialized with other env-mutating tests
    unsafe {
        std::env::set_var("LOGSIFT_GENERAL_LOG_LEVEL", "warn");
        std::env::set_var("LOGSIFT_READER_FOLLOW", "false");
    }
    let cli = DaemonCli::parse_from([
        "logsift-daemon",
        "--config",
        path.to_str().unwrap(),
        "--log-level",
        "error",
    ]);
    let config = load_config(&cli).await;
    unsafe {
        std::env::remove_var("LOGSIFT_GENERAL_LOG_LEVEL");
        std::env::remove_var("LOGSIFT_READER_FOLLOW");
    }

    let config = config.unwrap();
    assert_eq!(config.general.log_level, "error");
    assert!(!config.reader.follow);
    assert_eq!(config.storage.backend, "memory");
}

#[tokio::test]
#[serial]
async fn load_config_reports_missing_file() {
    let cli = DaemonCli::parse_from(["logsift-daemon", "--config", "/nonexistent/logsift.toml"]);
    let err = load_config(&cli).await.unwrap_err();
    assert!(err.to_string().contains("failed to load config"));
}
