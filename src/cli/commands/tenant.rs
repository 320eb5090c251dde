//! Tenant command implementation.

use super::{open_admin_store, StoreArgs};
use crate::control::api::ServiceMode;
use crate::control::tenants::{TenantDirectory, TenantRef};
use crate::core::ids::TenantId;
use crate::core::time::SystemClock;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::Path;
use std::sync::Arc;

/// Tenant operations.
#[derive(Args, Debug)]
pub struct TenantArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(subcommand)]
    pub command: TenantCommand,
}

/// Tenant subcommands.
#[derive(Subcommand, Debug)]
pub enum TenantCommand {
    /// Provision a tenant.
    Create {
        /// Tenant name.
        name: String,
        /// Request a specific tenant id.
        #[arg(long)]
        id: Option<u64>,
        /// Service mode (always_on, explicit, shared).
        #[arg(long, default_value = "explicit")]
        service_mode: String,
    },
    /// Drop a tenant by name or `[id]`.
    Drop {
        /// Tenant name or `[id]`.
        tenant: String,
    },
    /// List tenants.
    List {
        /// Output format (table, json).
        #[arg(long, default_value = "table")]
        format: String,
    },
}

/// Run the tenant command.
pub fn run_tenant(config_path: &Path, args: TenantArgs) -> Result<()> {
    let store = open_admin_store(config_path, &args.store)?;
    let directory = TenantDirectory::new(store, Arc::new(SystemClock));

    match args.command {
        TenantCommand::Create {
            name,
            id,
            service_mode,
        } => {
            let mode = ServiceMode::parse(&service_mode)
                .with_context(|| format!("unknown service mode {:?}", service_mode))?;
            let requested = id
                .map(TenantId::try_from)
                .transpose()
                .map_err(anyhow::Error::msg)?;
            let record = directory.create(&name, requested, mode)?;
            println!("created tenant {} with id {}", record.name, record.id);
        }
        TenantCommand::Drop { tenant } => {
            let record = directory.drop_tenant(&TenantRef::parse(&tenant)?)?;
            println!("dropped tenant {} (id {})", record.name, record.id);
        }
        TenantCommand::List { format } => {
            let tenants = directory.list()?;
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&tenants)?);
            } else {
                println!("{:<6} {:<24} {:<10} CREATED", "ID", "NAME", "MODE");
                for t in tenants {
                    println!(
                        "{:<6} {:<24} {:<10} {}",
                        t.id,
                        t.name,
                        t.service_mode.to_string(),
                        t.created_at.to_rfc3339()
                    );
                }
            }
        }
    }
    Ok(())
}
