//! Exec command implementation.

use super::{open_admin_store, StoreArgs};
use crate::control::admin::AdminExecutor;
use crate::control::capabilities::CapabilityAuthority;
use crate::control::tenants::TenantDirectory;
use crate::core::time::SystemClock;
use anyhow::Result;
use clap::Args;
use std::path::Path;
use std::sync::Arc;

/// Execute an administrative statement, e.g.
/// `ALTER TENANT app GRANT CAPABILITY can_debug_process=true`.
#[derive(Args, Debug)]
pub struct ExecArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Statement text.
    pub statement: String,
}

/// Run the exec command.
pub fn run_exec(config_path: &Path, args: ExecArgs) -> Result<()> {
    let store = open_admin_store(config_path, &args.store)?;
    let executor = AdminExecutor::new(
        TenantDirectory::new(store.clone(), Arc::new(SystemClock)),
        CapabilityAuthority::new(store),
    );
    let result = executor.execute_str(&args.statement)?;
    println!("{}", result);
    Ok(())
}
