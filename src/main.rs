//! Tenantplane - unified CLI entrypoint.
//!
//! Usage:
//!   tenantplane start --config config/tenantplane.toml
//!   tenantplane config validate --config config/tenantplane.toml
//!   tenantplane tenant create <name>
//!   tenantplane exec "ALTER TENANT app GRANT CAPABILITY can_debug_process"
//!   tenantplane pool status --tenant 2
//!   tenantplane rowid decode <id>

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tenantplane::cli::commands::{
    run_config, run_exec, run_pool, run_rowid, run_start, run_tenant,
};
use tenantplane::cli::{Cli, Commands};
use tenantplane::config::ConfigOverrides;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/tenantplane.toml"));
    let overrides = ConfigOverrides {
        log_level: cli.log_level,
        ..ConfigOverrides::default()
    };

    match cli.command {
        Commands::Start(args) => run_start(&config_path, overrides, args).await,
        Commands::Config(args) => run_config(args),
        Commands::Tenant(args) => run_tenant(&config_path, args),
        Commands::Exec(args) => run_exec(&config_path, args),
        Commands::Pool(args) => run_pool(&config_path, args),
        Commands::Rowid(args) => run_rowid(args),
    }
}
