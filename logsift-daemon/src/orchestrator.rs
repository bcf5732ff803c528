//! Role orchestration -- configuration, backend selection, and pipeline lifecycle.
//!
//! The [`Orchestrator`] turns a validated [`LogsiftConfig`] and a [`Role`]
//! into a running process:
//!
//! - `all`: every stage in one process, memory or postgres backend
//! - `reader` / `parser` / `indexer`: one stage per process, postgres only
//! - `init-db`: apply migrations and exit
//! - `replay-dead-letters`: re-parse retriable dead letters and exit
//!
//! In one-shot mode (`reader.follow = false`) a role that reads files exits
//! once every discovered file is committed. Otherwise the process runs until
//! SIGTERM or SIGINT.

use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::broadcast;

use logsift_core::metrics as m;
use logsift_core::{HealthStatus, LogsiftConfig, Pipeline};
use logsift_ingest::dead_letter::RetentionPolicy;
use logsift_ingest::{
    Backend, IngestContext, IngestPipelineBuilder, PgBackend, PipelineReport,
    ReplaySummary, Stage, pg, replay_dead_letters,
};

use crate::cli::{DaemonCli, Role};
use crate::metrics_server;

/// Interval between pipeline health checks.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Interval between uptime gauge updates.
const UPTIME_UPDATE_INTERVAL: Duration = Duration::from_secs(10);

/// Load `logsift.toml`, then apply environment and CLI overrides and validate.
///
/// Precedence: CLI flags > `LOGSIFT_*` environment variables > file > defaults.
pub async fn load_config(cli: &DaemonCli) -> Result<LogsiftConfig> {
    let mut config = LogsiftConfig::from_file(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
    config.apply_env_overrides();
    apply_cli_overrides(&mut config, cli);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;
    Ok(config)
}

/// Apply `--log-level` and `--log-format`.
pub fn apply_cli_overrides(config: &mut LogsiftConfig, cli: &DaemonCli) {
    if let Some(level) = &cli.log_level {
        config.general.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.general.log_format = format.clone();
    }
}

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Pipeline stages ran and stopped.
    Pipeline(PipelineReport),
    /// Migrations were applied.
    Migrated,
    /// Dead letters were replayed.
    Replayed(ReplaySummary),
}

/// The daemon orchestrator.
pub struct Orchestrator {
    config: LogsiftConfig,
    role: Role,
    start_time: Instant,
}

impl Orchestrator {
    /// Validate the role against the configured backend.
    ///
    /// # Errors
    ///
    /// - Configuration validation fails
    /// - A split role or one-off command is combined with the memory backend
    pub fn new(config: LogsiftConfig, role: Role) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;
        let memory = config.storage.backend == "memory";
        if memory && role != Role::All {
            return Err(anyhow::anyhow!(
                "role '{}' requires storage.backend = \"postgres\"; the memory backend only supports --role all",
                role.as_str()
            ));
        }
        Ok(Self {
            config,
            role,
            start_time: Instant::now(),
        })
    }

    /// Loaded configuration.
    pub fn config(&self) -> &LogsiftConfig {
        &self.config
    }

    /// Run until the role completes or SIGTERM/SIGINT arrives.
    pub async fn run(self) -> Result<RunOutcome> {
        self.run_until(wait_for_shutdown_signal()).await
    }

    /// Run until the role completes or `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<RunOutcome>
    where
        F: Future<Output = Result<&'static str>>,
    {
        if self.config.metrics.enabled {
            metrics_server::install_metrics_recorder(&self.config.metrics)?;
        }
        tracing::info!(
            role = self.role.as_str(),
            split = self.role.is_split(),
            backend = %self.config.storage.backend,
            version = env!("CARGO_PKG_VERSION"),
            "logsift-daemon starting"
        );

        let Some(stages) = self.role.stages() else {
            return match self.role {
                Role::InitDb => self.init_db().await,
                _ => self.replay().await,
            };
        };

        let metrics_enabled = self.config.metrics.enabled;
        let start_time = self.start_time;
        let report = if self.config.storage.backend == "memory" {
            let ctx = IngestContext::in_memory(self.config)?;
            run_pipeline(ctx, stages, shutdown, metrics_enabled, start_time).await?
        } else {
            let ctx = IngestContext::<PgBackend>::connect(self.config).await?;
            run_pipeline(ctx, stages, shutdown, metrics_enabled, start_time).await?
        };
        Ok(RunOutcome::Pipeline(report))
    }

    async fn init_db(&self) -> Result<RunOutcome> {
        let pool = pg::connect(&self.config.storage).await?;
        pg::migrate(&pool).await?;
        pool.close().await;
        Ok(RunOutcome::Migrated)
    }

    async fn replay(self) -> Result<RunOutcome> {
        let batch_size = self.config.dead_letter.replay_batch_size;
        let policy = RetentionPolicy::from_config(&self.config.dead_letter);
        let max_line_length = self.config.reader.max_line_length;
        let ctx = IngestContext::<PgBackend>::connect(self.config).await?;
        let summary = replay_all(&ctx, &policy, batch_size, max_line_length).await?;
        tracing::info!(
            examined = summary.examined,
            replayed = summary.replayed,
            still_failing = summary.still_failing,
            duplicates = summary.duplicates,
            "dead-letter replay finished"
        );
        Ok(RunOutcome::Replayed(summary))
    }
}

/// Replay passes until a pass comes back short of `batch_size`.
///
/// Every pass bumps the retry count of entries that still fail, so the loop
/// ends once those entries reach `max_retries`.
pub async fn replay_all<B: Backend>(
    ctx: &IngestContext<B>,
    policy: &RetentionPolicy,
    batch_size: usize,
    max_line_length: usize,
) -> Result<ReplaySummary> {
    let mut total = ReplaySummary::default();
    loop {
        let pass = replay_dead_letters(
            &ctx.dead_letters,
            &ctx.store,
            &ctx.chain,
            policy,
            batch_size,
            max_line_length,
        )
        .await?;
        total.examined += pass.examined;
        total.replayed += pass.replayed;
        total.still_failing += pass.still_failing;
        total.duplicates += pass.duplicates;
        if pass.examined < batch_size {
            return Ok(total);
        }
    }
}

/// Start the selected stages and stop them on drain or shutdown.
pub async fn run_pipeline<B, F>(
    ctx: IngestContext<B>,
    stages: &[Stage],
    shutdown: F,
    metrics_enabled: bool,
    start_time: Instant,
) -> Result<PipelineReport>
where
    B: Backend,
    F: Future<Output = Result<&'static str>>,
{
    let one_shot = !ctx.config.reader.follow && stages.contains(&Stage::Reader);
    let mut pipeline = IngestPipelineBuilder::new(ctx).stages(stages).build()?;
    pipeline.start().await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let uptime_task =
        metrics_enabled.then(|| spawn_uptime_updater(start_time, shutdown_tx.subscribe()));

    {
        let drained = async {
            if one_shot {
                pipeline.drain().await
            } else {
                std::future::pending().await
            }
        };
        tokio::pin!(drained);
        tokio::pin!(shutdown);
        let mut health = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        health.tick().await;

        loop {
            tokio::select! {
                signal = &mut shutdown => {
                    let signal = signal?;
                    tracing::info!(signal, "shutdown signal received");
                    break;
                }
                result = &mut drained => {
                    result?;
                    tracing::info!("one-shot ingest complete");
                    break;
                }
                _ = health.tick() => log_health(pipeline.health_check().await),
            }
        }
    }

    let _ = shutdown_tx.send(());
    if let Some(task) = uptime_task {
        let _ = task.await;
    }
    pipeline.stop().await?;
    Ok(pipeline.report().clone())
}

fn log_health(status: HealthStatus) {
    match status {
        HealthStatus::Healthy => tracing::debug!("pipeline healthy"),
        HealthStatus::Degraded(reason) => tracing::warn!(%reason, "pipeline degraded"),
        HealthStatus::Unhealthy(reason) => tracing::error!(%reason, "pipeline unhealthy"),
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Periodically update the uptime gauge until shutdown.
fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(UPTIME_UPDATE_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(start_time.elapsed().as_secs() as f64);
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}
