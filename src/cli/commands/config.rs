//! Config command implementation.

use crate::core::config::{Config, StoreMode};
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate a configuration file.
    Validate {
        /// Config file path.
        #[arg(short, long, default_value = "config/tenantplane.toml")]
        config: PathBuf,
    },
    /// Print configuration with defaults filled in.
    Show {
        /// Config file path.
        #[arg(short, long, default_value = "config/tenantplane.toml")]
        config: PathBuf,
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
    /// Generate a configuration template.
    Generate {
        /// Output file path.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Tenant the worker serves.
        #[arg(long, default_value_t = 2)]
        tenant_id: u64,
        /// Metadata store file; generates a memory store config if absent.
        #[arg(long)]
        store: Option<String>,
    },
}

/// Run the config command.
pub fn run_config(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Validate { config } => validate_config(&config),
        ConfigCommand::Show { config, format } => show_config(&config, &format),
        ConfigCommand::Generate {
            output,
            tenant_id,
            store,
        } => generate_config(output.as_deref(), tenant_id, store),
    }
}

fn validate_config(path: &Path) -> Result<()> {
    let config = Config::from_file(path)?;
    println!("✓ Configuration is valid");
    println!("  tenant:            {}", config.worker.tenant_id);
    if config.codec_tenant_id() != config.worker.tenant_id {
        println!(
            "  ⚠ Warning: key codec built for tenant {}, the worker will refuse to start",
            config.codec_tenant_id()
        );
    }
    println!(
        "  store:             {:?} {}",
        config.store.mode, config.store.path
    );
    println!(
        "  reclaim:           every {}ms, target {}",
        config.pool.reclaim_interval_ms, config.pool.preallocated_count
    );
    println!(
        "  convergence window: {}ms",
        config.capabilities.max_propagation_ms
    );
    Ok(())
}

fn show_config(path: &Path, format: &str) -> Result<()> {
    let config = Config::from_file(path)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&config)?),
        _ => println!("{}", config.to_toml()?),
    }
    Ok(())
}

fn render_template(tenant_id: u64, store: Option<String>) -> Result<String> {
    let mut config = Config::for_tenant(tenant_id);
    if let Some(path) = store {
        config.store.mode = StoreMode::File;
        config.store.path = path;
    }
    config.validate()?;
    Ok(format!("# Tenantplane worker configuration\n\n{}", config.to_toml()?))
}

fn generate_config(output: Option<&Path>, tenant_id: u64, store: Option<String>) -> Result<()> {
    let template = render_template(tenant_id, store)?;
    match output {
        Some(path) => {
            std::fs::write(path, &template)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Generated config template: {}", path.display());
        }
        None => println!("{}", template),
    }
    Ok(())
}
