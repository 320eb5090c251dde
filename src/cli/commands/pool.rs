//! Pool command implementation.

use super::{open_admin_store, StoreArgs};
use crate::core::config::PoolConfig;
use crate::core::ids::TenantId;
use crate::core::time::{Clock, SystemClock};
use crate::instance::InstancePool;
use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::Path;
use std::sync::Arc;

/// Instance pool operations.
#[derive(Args, Debug)]
pub struct PoolArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(subcommand)]
    pub command: PoolCommand,
}

/// Pool subcommands.
#[derive(Subcommand, Debug)]
pub enum PoolCommand {
    /// Show slot counts and slots of a tenant.
    Status {
        /// Tenant id.
        #[arg(long)]
        tenant: u64,
    },
    /// Run one reclaim pass for a tenant.
    Replenish {
        /// Tenant id.
        #[arg(long)]
        tenant: u64,
        /// Target number of unclaimed slots.
        #[arg(long, default_value_t = 10)]
        target: usize,
    },
}

/// Run the pool command.
pub fn run_pool(config_path: &Path, args: PoolArgs) -> Result<()> {
    let store = open_admin_store(config_path, &args.store)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let pool = InstancePool::new(store, clock.clone(), &PoolConfig::default());

    match args.command {
        PoolCommand::Status { tenant } => {
            let tenant = TenantId::try_from(tenant).map_err(anyhow::Error::msg)?;
            let counts = pool.counts(tenant)?;
            println!(
                "tenant {}: {} unclaimed, {} live, {} expired",
                tenant, counts.unclaimed, counts.live, counts.expired
            );
            let now = clock.now();
            for slot in pool.slots(tenant)? {
                println!(
                    "  {:>5}  {:<9}  {}",
                    slot.instance_id,
                    format!("{:?}", slot.state(now)),
                    slot.address.as_deref().unwrap_or("-")
                );
            }
        }
        PoolCommand::Replenish { tenant, target } => {
            let tenant = TenantId::try_from(tenant).map_err(anyhow::Error::msg)?;
            let report = pool.replenish_once(tenant, target)?;
            println!(
                "tenant {}: reclaimed {}, created {}, deleted {}, skipped {}",
                tenant, report.reclaimed, report.created, report.deleted, report.skipped
            );
        }
    }
    Ok(())
}
