//! Start command implementation.

use crate::core::config::{Config, ConfigOverrides};
use crate::core::runtime::WorkerRuntime;
use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

/// Start a tenant worker.
#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// Tenant to serve. Without a config file this is required.
    #[arg(long)]
    pub tenant_id: Option<u64>,

    /// Address advertised in the claimed instance slot.
    #[arg(long)]
    pub address: Option<String>,

    /// Use a file metadata store at this path.
    #[arg(long)]
    pub store: Option<String>,

    /// Run the reclaim loop for the served tenant.
    #[arg(long)]
    pub pool_owner: bool,
}

/// Initialize tracing subscriber if the telemetry feature is enabled.
#[cfg(feature = "telemetry")]
fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "telemetry"))]
fn init_tracing(_level: &str) {}

/// Load the worker configuration: the config file if present, otherwise
/// defaults for `--tenant-id`.
fn load_config(config_path: &Path, args: &StartArgs) -> Result<Config> {
    if config_path.exists() {
        return Config::from_file(config_path)
            .with_context(|| format!("failed to load config from {}", config_path.display()));
    }
    match args.tenant_id {
        Some(tenant_id) => Ok(Config::for_tenant(tenant_id)),
        None => anyhow::bail!(
            "config file {} not found and no --tenant-id given",
            config_path.display()
        ),
    }
}

/// Run the start command.
pub async fn run_start(config_path: &Path, overrides: ConfigOverrides, args: StartArgs) -> Result<()> {
    let mut config = load_config(config_path, &args)?;
    config.apply_overrides(&ConfigOverrides {
        tenant_id: args.tenant_id,
        address: args.address,
        store_path: args.store,
        pool_owner: args.pool_owner,
        ..overrides
    });
    config.validate().context("invalid configuration")?;

    init_tracing(&config.telemetry.log_level);

    let mut runtime = WorkerRuntime::new(config)?;
    runtime.run().await
}
