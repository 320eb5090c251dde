//! Configuration parsing and validation.
//!
//! Configuration is loaded from a TOML file with CLI overrides. The pool
//! settings consumed by the reclaim loop can additionally be changed while
//! a worker runs through [`PoolSettings`] on a watch channel.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Worker identity.
    pub worker: WorkerConfig,

    /// Metadata store location.
    #[serde(default)]
    pub store: StoreConfig,

    /// Instance id pool tuning.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Capability propagation tuning.
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Worker identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Tenant this worker serves.
    pub tenant_id: u64,

    /// Address advertised in the claimed instance slot.
    #[serde(default = "default_worker_address")]
    pub address: String,

    /// Tenant the key codec is built for. Defaults to `tenant_id`.
    #[serde(default)]
    pub codec_tenant_id: Option<u64>,

    /// Run the reclaim loop for this tenant's pool.
    #[serde(default)]
    pub pool_owner: bool,
}

/// Metadata store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    /// Process-local, lost on exit.
    #[default]
    Memory,
    /// Shared file on disk.
    File,
}

/// Metadata store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend: "memory" or "file".
    #[serde(default)]
    pub mode: StoreMode,

    /// State file for the file backend.
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            mode: StoreMode::default(),
            path: default_store_path(),
        }
    }
}

/// Instance id pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Reclaim loop interval in milliseconds.
    #[serde(default = "default_reclaim_interval_ms")]
    pub reclaim_interval_ms: u64,

    /// Number of unclaimed slots kept ready per tenant.
    #[serde(default = "default_preallocated_count")]
    pub preallocated_count: usize,

    /// Lease duration of a claimed slot in milliseconds.
    #[serde(default = "default_lease_ttl_ms")]
    pub lease_ttl_ms: u64,

    /// Lease renewal interval in milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Attempts before a claim gives up.
    #[serde(default = "default_claim_max_retries")]
    pub claim_max_retries: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            reclaim_interval_ms: default_reclaim_interval_ms(),
            preallocated_count: default_preallocated_count(),
            lease_ttl_ms: default_lease_ttl_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            claim_max_retries: default_claim_max_retries(),
        }
    }
}

impl PoolConfig {
    /// Settings the reclaim loop reads on every tick.
    pub fn settings(&self) -> PoolSettings {
        PoolSettings {
            reclaim_interval: Duration::from_millis(self.reclaim_interval_ms),
            preallocated_count: self.preallocated_count,
        }
    }

    /// Lease duration.
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    /// Heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// Runtime-overridable reclaim settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Time between reclaim runs.
    pub reclaim_interval: Duration,
    /// Unclaimed slot target.
    pub preallocated_count: usize,
}

/// Capability propagation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesConfig {
    /// How often workers poll the authoritative store, in milliseconds.
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// Upper bound for a change to reach every worker, in milliseconds.
    #[serde(default = "default_max_propagation_ms")]
    pub max_propagation_ms: u64,
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_refresh_interval_ms(),
            max_propagation_ms: default_max_propagation_ms(),
        }
    }
}

impl CapabilitiesConfig {
    /// Refresh interval.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    /// Convergence window.
    pub fn max_propagation(&self) -> Duration {
        Duration::from_millis(self.max_propagation_ms)
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_worker_address() -> String {
    "127.0.0.1:26257".to_string()
}

fn default_store_path() -> String {
    "data/tenantplane.db".to_string()
}

fn default_reclaim_interval_ms() -> u64 {
    600_000
}

fn default_preallocated_count() -> usize {
    10
}

fn default_lease_ttl_ms() -> u64 {
    40_000
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_claim_max_retries() -> u32 {
    16
}

fn default_refresh_interval_ms() -> u64 {
    1_000
}

fn default_max_propagation_ms() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Minimal configuration for a worker of `tenant_id`.
    pub fn for_tenant(tenant_id: u64) -> Self {
        Self {
            worker: WorkerConfig {
                tenant_id,
                address: default_worker_address(),
                codec_tenant_id: None,
                pool_owner: false,
            },
            store: StoreConfig::default(),
            pool: PoolConfig::default(),
            capabilities: CapabilitiesConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize config")
    }

    /// Tenant the key codec is built for.
    pub fn codec_tenant_id(&self) -> u64 {
        self.worker.codec_tenant_id.unwrap_or(self.worker.tenant_id)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(tenant_id) = overrides.tenant_id {
            self.worker.tenant_id = tenant_id;
        }
        if let Some(ref address) = overrides.address {
            self.worker.address = address.clone();
        }
        if let Some(ref store_path) = overrides.store_path {
            self.store.mode = StoreMode::File;
            self.store.path = store_path.clone();
        }
        if overrides.pool_owner {
            self.worker.pool_owner = true;
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_worker()?;
        self.validate_store()?;
        self.validate_pool()?;
        self.validate_capabilities()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_worker(&self) -> Result<()> {
        if self.worker.tenant_id == 0 {
            anyhow::bail!("worker.tenant_id must be > 0");
        }
        if self.worker.codec_tenant_id == Some(0) {
            anyhow::bail!("worker.codec_tenant_id must be > 0");
        }
        if self.worker.address.trim().is_empty() {
            anyhow::bail!("worker.address must not be empty");
        }
        Ok(())
    }

    fn validate_store(&self) -> Result<()> {
        if self.store.mode == StoreMode::File && self.store.path.trim().is_empty() {
            anyhow::bail!("store.path required for file mode");
        }
        Ok(())
    }

    fn validate_pool(&self) -> Result<()> {
        if self.pool.reclaim_interval_ms == 0 {
            anyhow::bail!("pool.reclaim_interval_ms must be > 0");
        }
        if self.pool.lease_ttl_ms == 0 {
            anyhow::bail!("pool.lease_ttl_ms must be > 0");
        }
        // A lease must survive at least one missed heartbeat.
        if self.pool.heartbeat_interval_ms == 0
            || self.pool.heartbeat_interval_ms >= self.pool.lease_ttl_ms
        {
            anyhow::bail!(
                "pool.heartbeat_interval_ms ({}) must be > 0 and below pool.lease_ttl_ms ({})",
                self.pool.heartbeat_interval_ms,
                self.pool.lease_ttl_ms
            );
        }
        if self.pool.claim_max_retries == 0 {
            anyhow::bail!("pool.claim_max_retries must be > 0");
        }
        Ok(())
    }

    fn validate_capabilities(&self) -> Result<()> {
        if self.capabilities.refresh_interval_ms == 0 {
            anyhow::bail!("capabilities.refresh_interval_ms must be > 0");
        }
        if self.capabilities.max_propagation_ms < self.capabilities.refresh_interval_ms {
            anyhow::bail!(
                "capabilities.max_propagation_ms ({}) cannot be below refresh_interval_ms ({})",
                self.capabilities.max_propagation_ms,
                self.capabilities.refresh_interval_ms
            );
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override served tenant.
    pub tenant_id: Option<u64>,
    /// Override advertised address.
    pub address: Option<String>,
    /// Use a file store at this path.
    pub store_path: Option<String>,
    /// Run the reclaim loop.
    pub pool_owner: bool,
}
