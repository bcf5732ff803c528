//! logsift-daemon -- security log ingestion daemon.
//!
//! Loads configuration, initializes logging and the metrics endpoint,
//! then runs the selected role until it completes or a shutdown signal
//! arrives.

use anyhow::Result;
use clap::Parser;

use logsift_daemon::cli::DaemonCli;
use logsift_daemon::logging::init_tracing;
use logsift_daemon::orchestrator::{Orchestrator, RunOutcome, load_config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();
    let config = load_config(&cli).await?;

    if cli.validate {
        println!("{}", serde_json::to_string_pretty(&config)?);
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    init_tracing(&config.general)?;

    let orchestrator = Orchestrator::new(config, cli.role)?;
    match orchestrator.run().await {
        Ok(RunOutcome::Pipeline(_)) => {
            tracing::info!("logsift-daemon shut down");
            Ok(())
        }
        Ok(RunOutcome::Migrated) => {
            tracing::info!("database migrations applied");
            Ok(())
        }
        Ok(RunOutcome::Replayed(_)) => Ok(()),
        Err(e) => {
            tracing::error!(error = %e, "logsift-daemon failed");
            Err(e)
        }
    }
}
