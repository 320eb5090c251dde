//! Command-line interface.
//!
//! Unified CLI for running tenant workers and administering tenants,
//! capabilities and instance pools.

pub mod commands;

use clap::{Parser, Subcommand};

/// Tenantplane - multi-tenant control plane.
#[derive(Parser, Debug)]
#[command(name = "tenantplane")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a tenant worker.
    Start(commands::StartArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
    /// Tenant operations.
    Tenant(commands::TenantArgs),
    /// Execute an administrative statement.
    Exec(commands::ExecArgs),
    /// Instance pool operations.
    Pool(commands::PoolArgs),
    /// Row id operations.
    Rowid(commands::RowidArgs),
}
