//! CLI argument definitions for logsift-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use logsift_ingest::Stage;

/// Security log ingestion daemon.
///
/// Reads firewall, DNS, and authentication logs from a directory, classifies
/// and parses each line, and indexes the records into typed storage.
#[derive(Parser, Debug)]
#[command(name = "logsift-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to logsift.toml configuration file.
    #[arg(short, long, default_value = "/etc/logsift/logsift.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Which part of the pipeline this process runs.
    #[arg(long, value_enum, default_value_t = Role::All)]
    pub role: Role,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,
}

/// Process role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    /// Every stage in one process (memory or postgres backend).
    All,
    /// File reading and raw batch enqueueing only.
    Reader,
    /// Parser worker pool only.
    Parser,
    /// Indexer worker pool and dead-letter maintenance.
    Indexer,
    /// Apply database migrations and exit.
    InitDb,
    /// Re-parse retriable dead letters and exit.
    ReplayDeadLetters,
}

impl Role {
    /// Pipeline stages run by this role, `None` for one-off commands.
    pub fn stages(&self) -> Option<&'static [Stage]> {
        match self {
            Self::All => Some(&Stage::ALL),
            Self::Reader => Some(&[Stage::Reader]),
            Self::Parser => Some(&[Stage::Parser]),
            Self::Indexer => Some(&[Stage::Indexer, Stage::Maintenance]),
            Self::InitDb | Self::ReplayDeadLetters => None,
        }
    }

    /// Whether the role splits the pipeline across processes.
    pub fn is_split(&self) -> bool {
        matches!(self, Self::Reader | Self::Parser | Self::Indexer)
    }

    /// Role name as given on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Reader => "reader",
            Self::Parser => "parser",
            Self::Indexer => "indexer",
            Self::InitDb => "init-db",
            Self::ReplayDeadLetters => "replay-dead-letters",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_role_and_overrides() {
        let cli = DaemonCli::parse_from([
            "logsift-daemon",
            "--config",
            "/tmp/logsift.toml",
            "--role",
            "replay-dead-letters",
            "--log-format",
            "pretty",
        ]);
        assert_eq!(cli.role, Role::ReplayDeadLetters);
        assert_eq!(cli.log_format.as_deref(), Some("pretty"));
        assert!(!cli.validate);
    }

    #[test]
    fn default_role_runs_every_stage() {
        let cli = DaemonCli::parse_from(["logsift-daemon"]);
        assert_eq!(cli.role, Role::All);
        assert_eq!(cli.role.stages().map(<[Stage]>::len), Some(4));
    }

    #[test]
    fn indexer_role_includes_maintenance() {
        assert_eq!(
            Role::Indexer.stages(),
            Some(&[Stage::Indexer, Stage::Maintenance][..])
        );
        assert!(Role::InitDb.stages().is_none());
        assert!(Role::Parser.is_split());
        assert!(!Role::All.is_split());
    }
}
