//! vale-bridged - VALE bridge daemon
//!
//! Provisions one bridge from configuration, keeps it forwarding until
//! SIGINT, then tears it down.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vale_bridge::{BridgeConfig, BridgeController, PortRegistry, DEFAULT_CONFIG_PATH};
use vale_fabric::SoftFabric;

/// VALE software bridge daemon
#[derive(Parser, Debug)]
#[command(name = "vale-bridged")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file [default: /etc/vale/bridge.toml]
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Override the configured bridge name
    #[arg(short = 'b', long)]
    bridge: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    match run(args).await {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true)
        .init();
}

fn load_config(args: &Args) -> Result<BridgeConfig> {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::load_or_default(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => BridgeConfig::load()
            .with_context(|| format!("loading {}", DEFAULT_CONFIG_PATH))?,
    };
    if let Some(bridge) = &args.bridge {
        config.bridge.name = bridge.clone();
    }
    config.validate().context("validating configuration")?;
    Ok(config)
}

async fn run(args: Args) -> Result<ExitCode> {
    let config = load_config(&args)?;
    if args.check {
        let path = args
            .config
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        info!("Configuration {} is valid", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    info!("--- Starting vale-bridged ---");
    info!("Bridge: {}", config.bridge.name);
    info!("Ports: {}", config.bridge.ports.join(", "));
    info!(
        "Policy: {} (restricted indices {:?})",
        config.policy.kind, config.policy.restricted_ports
    );
    if config.startup.rollback_on_failure {
        info!("Rollback on startup failure: ENABLED");
    }

    // No kernel fabric binding yet; run against the in-memory fabric.
    let fabric = Arc::new(SoftFabric::new());
    let registry = Arc::new(PortRegistry::new(fabric));
    let mut controller = BridgeController::new(registry, config);

    if let Err(err) = controller.startup() {
        error!(
            "Startup failed at step {} on '{}': {}",
            err.step, err.resource, err.source
        );
        return Ok(ExitCode::FAILURE);
    }
    info!(
        "vale-bridged initialization complete: {} forwarding with policy {}",
        controller.bridge_name(),
        controller.policy_name()
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    warn!("Received SIGINT, shutting down");

    let report = controller.shutdown().context("shutting down bridge")?;
    if !report.is_clean() {
        for failure in report.failures() {
            error!("Shutdown step failed: {}", failure);
        }
        return Ok(ExitCode::FAILURE);
    }

    info!("--- vale-bridged shutdown complete ---");
    Ok(ExitCode::SUCCESS)
}
