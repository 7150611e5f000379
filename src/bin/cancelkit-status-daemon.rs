use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cancelkit::catalog::Catalog;
use cancelkit::config::{default_config_path, ResolvedConfig};
use cancelkit::engine::Engine;
use cancelkit::host::cdp::CdpHost;
use cancelkit::models::SubscriptionStatus;
use cancelkit::notify::LogNotifier;
use cancelkit::storage::{JsonFileStorage, Storage};

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    cancelkit::duration::parse_duration(s).map_err(|e| e.to_string())
}

#[derive(Parser, Debug)]
#[command(name = "cancelkit-status-daemon")]
#[command(about = "Long-running daemon that sweeps subscription statuses")]
struct Cli {
    /// Path to cancelkit config file.
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Override the sweep interval from settings (e.g. "6h", "1d").
    #[arg(long, value_parser = parse_duration_arg)]
    interval: Option<Duration>,

    /// Run one sweep and exit.
    #[arg(long)]
    once: bool,

    /// Skip the immediate startup sweep.
    #[arg(long)]
    no_check_on_start: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "info,chromiumoxide=warn,chromiumoxide::conn=off,chromiumoxide::handler=off",
            )
        }))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true)
                .json(),
        )
        .init();

    let cli = Cli::parse();

    let config = ResolvedConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load cancelkit config: {}", cli.config.display()))?;

    let catalog = Arc::new(match &config.catalog_path {
        Some(path) => Catalog::load(path)?,
        None => Catalog::builtin()?,
    });
    let storage: Arc<dyn Storage> = Arc::new(JsonFileStorage::new(&config.data_dir));

    let settings = storage.get_settings().await.unwrap_or_default();
    if !settings.auto_check && !cli.once && cli.interval.is_none() {
        warn!("automatic status checks are disabled in settings; pass --interval or --once to override");
        return Ok(());
    }

    let host = Arc::new(CdpHost::launch(&config.browser, config.timing.clone()).await?);
    let engine = Engine::new(
        catalog,
        storage.clone(),
        host.clone(),
        Arc::new(LogNotifier),
        config.policy,
        config.on_exhausted,
        config.timing.clone(),
    );

    engine.startup_sweep().await;

    if !cli.no_check_on_start {
        run_sweep(&engine).await;
    }

    if !cli.once {
        loop {
            // Settings may change between cycles; re-read unless overridden.
            let interval = match cli.interval {
                Some(interval) => interval,
                None => storage
                    .get_settings()
                    .await
                    .map(|s| s.check_interval())
                    .unwrap_or_else(|_| settings.check_interval()),
            };
            info!(interval_secs = interval.as_secs(), "next sweep scheduled");

            let sleep = tokio::time::sleep(interval);
            tokio::pin!(sleep);

            tokio::select! {
                _ = &mut sleep => {
                    run_sweep(&engine).await;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutting down");
                    break;
                }
            }
        }
    }

    drop(engine);
    match Arc::try_unwrap(host) {
        Ok(host) => host.shutdown().await,
        Err(_) => tracing::debug!("browser host still referenced, skipping shutdown"),
    }

    Ok(())
}

async fn run_sweep(engine: &Engine) {
    let records = engine.check_all().await;
    let active = records
        .iter()
        .filter(|r| r.status == SubscriptionStatus::Active)
        .count();
    info!(checked = records.len(), active, "status sweep complete");
}
