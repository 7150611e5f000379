use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cancelkit::api::{service_infos, Request, Response};
use cancelkit::catalog::Catalog;
use cancelkit::config::{default_config_path, ResolvedConfig};
use cancelkit::engine::Engine;
use cancelkit::host::cdp::CdpHost;
use cancelkit::models::{CancelOutcome, ServiceId, StatusRecord};
use cancelkit::notify::LogNotifier;
use cancelkit::storage::{JsonFileStorage, Storage};

#[derive(Parser)]
#[command(name = "cancelkit")]
#[command(about = "Subscription cancellation automation")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// List known services with settings and cached status
    Services,
    /// Probe live subscription status (opens a browser)
    Status {
        /// Service id to probe
        service: Option<String>,
        /// Probe every enabled service
        #[arg(long, conflicts_with = "service")]
        all: bool,
    },
    /// Run a cancellation flow (opens a browser)
    Cancel {
        /// Service id to cancel
        service: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Show past cancellations, newest first
    History,
    /// Inspect or change settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
    /// Show current configuration
    Config,
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Show current settings
    Show,
    /// Re-enable a service
    Enable { service: String },
    /// Disable a service so sweeps skip it and cancellations are refused
    Disable { service: String },
    /// Turn periodic status checks on or off
    AutoCheck { on: bool },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "info,chromiumoxide=warn,chromiumoxide::conn=off,chromiumoxide::handler=off",
            )
        }))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();

    let cli = Cli::parse();

    let config = ResolvedConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config: {}", cli.config.display()))?;
    let catalog = Arc::new(load_catalog(&config)?);
    let storage: Arc<dyn Storage> = Arc::new(JsonFileStorage::new(&config.data_dir));

    match cli.command {
        Some(Command::Services) => {
            let infos = service_infos(&catalog, storage.as_ref()).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&infos)?);
            } else {
                println!(
                    "{:<16} {:<24} {:<9} {:<10} {}",
                    "ID", "NAME", "ENABLED", "STATUS", "CHECKED"
                );
                for info in infos {
                    let (status, checked) = match &info.last_status {
                        Some(record) => (
                            record.status.as_str(),
                            record.checked_at.format("%Y-%m-%d %H:%M").to_string(),
                        ),
                        None => ("-", "never".to_string()),
                    };
                    println!(
                        "{:<16} {:<24} {:<9} {:<10} {}",
                        info.id,
                        info.name,
                        if info.enabled { "yes" } else { "no" },
                        status,
                        checked
                    );
                }
            }
        }

        Some(Command::Status { service, all }) => {
            let (engine, host) = launch_engine(&config, catalog.clone(), storage.clone()).await?;
            engine.startup_sweep().await;
            let result = match service {
                Some(raw) if !all => {
                    let service_id = parse_service(&catalog, &raw)?;
                    match engine.handle(Request::CheckStatus { service_id }).await {
                        Response::Status { record } => Ok(vec![record]),
                        Response::Error { message } => Err(anyhow::anyhow!(message)),
                        _ => Err(anyhow::anyhow!("unexpected engine response")),
                    }
                }
                _ => Ok(engine.check_all().await),
            };
            drop(engine);
            shutdown_host(host).await;
            let records = result?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for record in &records {
                    print_status(record);
                }
            }
        }

        Some(Command::Cancel { service, yes }) => {
            let id = parse_service(&catalog, &service)?;
            let (engine, host) = launch_engine(&config, catalog.clone(), storage.clone()).await?;
            engine.startup_sweep().await;
            let outcome = engine.cancel(&id, yes).await;
            drop(engine);
            shutdown_host(host).await;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(&service, &outcome);
            }
            if !outcome.success {
                std::process::exit(1);
            }
        }

        Some(Command::History) => {
            let mut entries = storage.get_history().await?;
            entries.reverse();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No cancellations recorded.");
            } else {
                for entry in entries {
                    println!(
                        "{}  {} ({})",
                        entry.at.format("%Y-%m-%d %H:%M"),
                        entry.service_name,
                        entry.service_id
                    );
                }
            }
        }

        Some(Command::Settings { action }) => {
            run_settings(&catalog, storage.as_ref(), action, cli.json).await?;
        }

        Some(Command::Config) => {
            println!("Config file: {}", cli.config.display());
            println!("Data directory: {}", config.data_dir.display());
            println!(
                "Catalog: {}",
                config
                    .catalog_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "built-in".to_string())
            );
            println!("Policy: {:?}", config.policy);
            println!("Headless: {}", config.browser.headless);
        }

        None => {
            println!("cancelkit - Subscription Cancellation Automation");
            println!("================================================\n");
            println!("Config: {}", cli.config.display());
            println!("Data directory: {}\n", config.data_dir.display());
            println!("Commands:");
            println!("  services   List known services");
            println!("  status     Probe live subscription status");
            println!("  cancel     Run a cancellation flow");
            println!("  history    Show past cancellations");
            println!("  settings   Inspect or change settings");
            println!("  config     Show current configuration\n");
            println!("Run 'cancelkit --help' for more options.");
        }
    }

    Ok(())
}

fn load_catalog(config: &ResolvedConfig) -> Result<Catalog> {
    match &config.catalog_path {
        Some(path) => Catalog::load(path),
        None => Catalog::builtin(),
    }
}

fn parse_service(catalog: &Catalog, raw: &str) -> Result<ServiceId> {
    let id = ServiceId::parse(raw)?;
    if catalog.get(&id).is_none() {
        anyhow::bail!("Unknown service: {id}. Run 'cancelkit services' for the list.");
    }
    Ok(id)
}

async fn launch_engine(
    config: &ResolvedConfig,
    catalog: Arc<Catalog>,
    storage: Arc<dyn Storage>,
) -> Result<(Engine, Arc<CdpHost>)> {
    let host = Arc::new(CdpHost::launch(&config.browser, config.timing.clone()).await?);
    let engine = Engine::new(
        catalog,
        storage,
        host.clone(),
        Arc::new(LogNotifier),
        config.policy,
        config.on_exhausted,
        config.timing.clone(),
    );
    Ok((engine, host))
}

/// The engine must be dropped first so the host is the last reference.
async fn shutdown_host(host: Arc<CdpHost>) {
    match Arc::try_unwrap(host) {
        Ok(host) => host.shutdown().await,
        Err(_) => tracing::debug!("browser host still referenced, skipping shutdown"),
    }
}

fn print_status(record: &StatusRecord) {
    match &record.next_billing {
        Some(billing) => println!(
            "{}: {} (next billing: {})",
            record.service_id, record.status, billing
        ),
        None => println!("{}: {}", record.service_id, record.status),
    }
}

fn print_outcome(service: &str, outcome: &CancelOutcome) {
    if outcome.success {
        println!("Cancelled {service}.");
    } else {
        let detail = outcome.error.as_deref().unwrap_or("unknown error");
        match outcome.error_kind {
            Some(kind) => println!("Cancellation failed ({kind}): {detail}"),
            None => println!("Cancellation refused: {detail}"),
        }
    }
}

async fn run_settings(
    catalog: &Catalog,
    storage: &dyn Storage,
    action: Option<SettingsAction>,
    json: bool,
) -> Result<()> {
    match action {
        None | Some(SettingsAction::Show) => {
            let settings = storage.get_settings().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            } else {
                println!("Auto check: {}", settings.auto_check);
                println!(
                    "Check interval: {}",
                    cancelkit::duration::format_duration(settings.check_interval())
                );
                println!("Confirm before cancel: {}", settings.confirm_before_cancel);
                for (id, service) in &settings.services {
                    println!(
                        "  {id}: {}",
                        if service.enabled { "enabled" } else { "disabled" }
                    );
                }
            }
        }
        Some(SettingsAction::Enable { service }) => {
            set_enabled(catalog, storage, &service, true).await?;
            println!("Enabled {service}.");
        }
        Some(SettingsAction::Disable { service }) => {
            set_enabled(catalog, storage, &service, false).await?;
            println!("Disabled {service}.");
        }
        Some(SettingsAction::AutoCheck { on }) => {
            let mut settings = storage.get_settings().await?;
            settings.auto_check = on;
            storage.put_settings(&settings).await?;
            println!(
                "Automatic status checks {}.",
                if on { "enabled" } else { "disabled" }
            );
        }
    }
    Ok(())
}

async fn set_enabled(
    catalog: &Catalog,
    storage: &dyn Storage,
    service: &str,
    enabled: bool,
) -> Result<()> {
    let id = parse_service(catalog, service)?;
    let mut settings = storage.get_settings().await?;
    settings.set_enabled(id, enabled);
    storage.put_settings(&settings).await?;
    Ok(())
}
