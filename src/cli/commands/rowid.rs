//! Row id command implementation.

use crate::core::time::Timestamp;
use crate::instance::RowIdGenerator;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};

/// Row id operations.
#[derive(Args, Debug)]
pub struct RowidArgs {
    #[command(subcommand)]
    pub command: RowidCommand,
}

/// Row id subcommands.
#[derive(Subcommand, Debug)]
pub enum RowidCommand {
    /// Split a row id into its timestamp and instance id.
    Decode {
        /// Row id, decimal or 0x-prefixed hex.
        id: String,
    },
}

/// Run the rowid command.
pub fn run_rowid(args: RowidArgs) -> Result<()> {
    match args.command {
        RowidCommand::Decode { id } => {
            let value = parse_row_id(&id)?;
            let parts = RowIdGenerator::decompose(value);
            let ts = Timestamp::from_micros(parts.timestamp_micros());
            println!("row id:      {}", value);
            println!("instance id: {}", parts.instance_id);
            println!("timestamp:   {}", ts.to_rfc3339());
        }
    }
    Ok(())
}

fn parse_row_id(raw: &str) -> Result<u64> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse(),
    }
    .with_context(|| format!("invalid row id {:?}", raw))
}
