//! CLI command implementations.

mod config;
mod exec;
mod pool;
mod rowid;
mod start;
mod tenant;

pub use config::{run_config, ConfigArgs};
pub use exec::{run_exec, ExecArgs};
pub use pool::{run_pool, PoolArgs};
pub use rowid::{run_rowid, RowidArgs};
pub use start::{run_start, StartArgs};
pub use tenant::{run_tenant, TenantArgs};

use crate::core::config::{Config, StoreMode};
use crate::store::{self, FileStore, MetadataStore};
use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Metadata store selection shared by the admin commands.
#[derive(Args, Debug, Clone, Default)]
pub struct StoreArgs {
    /// Metadata store file. Overrides the config file's [store] section.
    #[arg(long)]
    pub store: Option<PathBuf>,
}

/// Open the metadata store an admin command operates on.
///
/// Admin commands run in their own process, so only a file store is
/// meaningful: a memory store would vanish when the command exits.
pub(crate) fn open_admin_store(
    config_path: &Path,
    args: &StoreArgs,
) -> Result<Arc<dyn MetadataStore>> {
    if let Some(path) = &args.store {
        let store = FileStore::open(path)
            .with_context(|| format!("failed to open metadata store {}", path.display()))?;
        return Ok(Arc::new(store));
    }

    let config = Config::from_file(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    if config.store.mode != StoreMode::File {
        anyhow::bail!(
            "admin commands need a file store: pass --store or set [store] mode = \"file\" in {}",
            config_path.display()
        );
    }
    store::open(&config.store).context("failed to open metadata store")
}
