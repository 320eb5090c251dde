//! Worker runtime orchestration.
//!
//! The runtime coordinates component lifecycle:
//! - Start order: keyspace guard → instance claim → row ids → capability
//!   cache → background tasks (capability watcher, lease heartbeat, reclaim)
//! - Shutdown order: background tasks → instance release
//!
//! Any failure before the background tasks are running is fatal: the worker
//! never serves partially initialized.

use crate::control::cache::CapabilityCache;
use crate::control::gate::CapabilityGate;
use crate::control::watcher::CapabilityWatcher;
use crate::core::config::{Config, PoolSettings};
use crate::core::error::PlaneError;
use crate::core::ids::{SessionId, TenantId};
use crate::core::time::{Clock, SystemClock};
use crate::instance::{ClaimedInstance, InstancePool, ReclaimLoop, RowIdGenerator};
use crate::keyspace::{guard, BoundaryGuard, TenantCodec};
use crate::ops::observability::{HealthProbe, PlaneMetrics, ReadinessProbe};
use crate::store::{self, MetadataStore};
use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Component health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    /// Component is starting.
    Starting,
    /// Component is healthy and operational.
    Healthy,
    /// Component is degraded but functional.
    Degraded,
    /// Component has failed.
    Failed,
    /// Component is not used by this worker.
    Disabled,
    /// Component is stopping.
    Stopping,
    /// Component has stopped.
    Stopped,
}

/// Health status aggregated from all components.
#[derive(Debug, Clone)]
pub struct RuntimeHealth {
    /// Keyspace boundary validation.
    pub keyspace: ComponentHealth,
    /// Claimed instance id and its lease.
    pub instance: ComponentHealth,
    /// Capability cache and watcher.
    pub capabilities: ComponentHealth,
    /// Reclaim loop (pool owners only).
    pub reclaim: ComponentHealth,
}

impl Default for RuntimeHealth {
    fn default() -> Self {
        Self {
            keyspace: ComponentHealth::Starting,
            instance: ComponentHealth::Starting,
            capabilities: ComponentHealth::Starting,
            reclaim: ComponentHealth::Starting,
        }
    }
}

impl RuntimeHealth {
    /// Check if the worker may serve requests.
    pub fn is_ready(&self) -> bool {
        matches!(
            (self.keyspace, self.instance, self.capabilities, self.reclaim),
            (
                ComponentHealth::Healthy,
                ComponentHealth::Healthy,
                ComponentHealth::Healthy | ComponentHealth::Degraded,
                ComponentHealth::Healthy | ComponentHealth::Degraded | ComponentHealth::Disabled
            )
        )
    }

    /// Check if the worker is alive (not failed).
    pub fn is_alive(&self) -> bool {
        !matches!(
            (self.keyspace, self.instance),
            (ComponentHealth::Failed, _) | (_, ComponentHealth::Failed)
        )
    }
}

/// A tenant worker and its background tasks.
pub struct WorkerRuntime {
    config: Arc<Config>,
    store: Arc<dyn MetadataStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<PlaneMetrics>,
    cache: Arc<CapabilityCache>,
    readiness: Arc<ReadinessProbe>,
    liveness: Arc<HealthProbe>,
    health: Arc<RwLock<RuntimeHealth>>,
    running: Arc<AtomicBool>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    pool_settings: watch::Sender<PoolSettings>,
    pool: InstancePool,
    guard: Option<BoundaryGuard>,
    claimed: Option<ClaimedInstance>,
    row_ids: Option<Arc<RowIdGenerator>>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl std::fmt::Debug for WorkerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRuntime")
            .field("tenant_id", &self.config.worker.tenant_id)
            .field("health", &*self.health.read())
            .field("claimed", &self.claimed)
            .finish_non_exhaustive()
    }
}

impl WorkerRuntime {
    /// Create a runtime, opening the configured metadata store.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;
        let store = store::open(&config.store).context("failed to open metadata store")?;
        Self::with_parts(config, store, Arc::new(SystemClock))
    }

    /// Create a runtime over an existing store and clock.
    pub fn with_parts(
        config: Config,
        store: Arc<dyn MetadataStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let metrics = Arc::new(PlaneMetrics::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (pool_settings, _) = watch::channel(config.pool.settings());
        let cache = Arc::new(CapabilityCache::new(
            clock.clone(),
            config.capabilities.max_propagation(),
        ));
        let pool = InstancePool::new(store.clone(), clock.clone(), &config.pool)
            .with_metrics(metrics.clone());

        Ok(Self {
            config: Arc::new(config),
            store,
            clock,
            metrics,
            cache,
            readiness: Arc::new(ReadinessProbe::new()),
            liveness: Arc::new(HealthProbe::new()),
            health: Arc::new(RwLock::new(RuntimeHealth::default())),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            pool_settings,
            pool,
            guard: None,
            claimed: None,
            row_ids: None,
            tasks: Vec::new(),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Metadata store shared with the background tasks.
    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    /// Metrics collector.
    pub fn metrics(&self) -> &Arc<PlaneMetrics> {
        &self.metrics
    }

    /// Worker-local capability cache.
    pub fn capabilities(&self) -> &Arc<CapabilityCache> {
        &self.cache
    }

    /// Gate for privileged operations, backed by the capability cache.
    pub fn gate(&self) -> CapabilityGate {
        CapabilityGate::new(self.cache.clone()).with_metrics(self.metrics.clone())
    }

    /// Instance pool used for the claim.
    pub fn pool(&self) -> &InstancePool {
        &self.pool
    }

    /// Validated keyspace boundary, once started.
    pub fn keyspace(&self) -> Option<&BoundaryGuard> {
        self.guard.as_ref()
    }

    /// Claimed instance, once started.
    pub fn instance(&self) -> Option<&ClaimedInstance> {
        self.claimed.as_ref()
    }

    /// Row id generator bound to the claimed instance id.
    pub fn row_ids(&self) -> Option<Arc<RowIdGenerator>> {
        self.row_ids.clone()
    }

    /// Current health status.
    pub fn health(&self) -> RuntimeHealth {
        self.health.read().clone()
    }

    /// Readiness probe.
    pub fn readiness(&self) -> &Arc<ReadinessProbe> {
        &self.readiness
    }

    /// Liveness probe. Turns unhealthy when the instance lease is lost.
    pub fn liveness(&self) -> &Arc<HealthProbe> {
        &self.liveness
    }

    /// Check if the worker is ready to serve requests.
    pub fn is_ready(&self) -> bool {
        self.health.read().is_ready()
    }

    /// Check if the runtime is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get a shutdown receiver for graceful shutdown coordination.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Retune the reclaim loop. Takes effect on its next tick.
    pub fn update_pool_settings(&self, settings: PoolSettings) {
        tracing::info!(
            interval_ms = settings.reclaim_interval.as_millis() as u64,
            target = settings.preallocated_count,
            "pool settings override"
        );
        self.pool_settings.send_replace(settings);
    }

    /// Current reclaim settings.
    pub fn pool_settings(&self) -> PoolSettings {
        *self.pool_settings.borrow()
    }

    /// Initialize and start all components.
    ///
    /// Components are started in order:
    /// 1. Keyspace boundary validation
    /// 2. Instance id claim and row id generator
    /// 3. Initial capability refresh
    /// 4. Background tasks
    pub async fn start(&mut self) -> Result<()> {
        let tenant_id = TenantId::try_from(self.config.worker.tenant_id)
            .map_err(anyhow::Error::msg)
            .context("invalid worker tenant id")?;
        tracing::info!(
            tenant_id = %tenant_id,
            address = %self.config.worker.address,
            "starting tenant worker"
        );

        self.init_keyspace(tenant_id)?;
        self.init_instance(tenant_id).await?;
        self.init_capabilities(tenant_id).await;
        self.spawn_tasks(tenant_id);

        self.running.store(true, Ordering::Release);
        self.publish_readiness();
        tracing::info!(tenant_id = %tenant_id, "tenant worker started");
        Ok(())
    }

    fn init_keyspace(&mut self, tenant_id: TenantId) -> Result<()> {
        let codec_tenant = TenantId::try_from(self.config.codec_tenant_id())
            .map_err(anyhow::Error::msg)
            .context("invalid codec tenant id")?;
        let codec = TenantCodec::new(codec_tenant);

        match guard::validate(tenant_id, &codec) {
            Ok(guard) => {
                tracing::info!(
                    tenant_id = %tenant_id,
                    keyspace = %guard.span(),
                    "keyspace boundary validated"
                );
                self.guard = Some(guard);
                self.health.write().keyspace = ComponentHealth::Healthy;
                Ok(())
            }
            Err(e) => {
                self.metrics.record_keyspace_violation();
                self.health.write().keyspace = ComponentHealth::Failed;
                tracing::error!(
                    tenant_id = %tenant_id,
                    codec_tenant_id = %codec_tenant,
                    error = %e,
                    "keyspace boundary violation, refusing to start"
                );
                Err(e).context("keyspace validation failed")
            }
        }
    }

    async fn init_instance(&mut self, tenant_id: TenantId) -> Result<()> {
        let claimed = match self
            .pool
            .claim(tenant_id, &self.config.worker.address, SessionId::generate())
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                self.health.write().instance = ComponentHealth::Failed;
                tracing::error!(tenant_id = %tenant_id, error = %e, "failed to claim instance id");
                return Err(e).context("instance id claim failed");
            }
        };

        self.row_ids = Some(Arc::new(RowIdGenerator::new(
            claimed.instance_id,
            self.clock.clone(),
        )));
        self.claimed = Some(claimed);
        self.health.write().instance = ComponentHealth::Healthy;
        Ok(())
    }

    async fn init_capabilities(&mut self, tenant_id: TenantId) {
        let watcher = self.watcher(tenant_id);
        match watcher.refresh().await {
            Ok(_) => self.health.write().capabilities = ComponentHealth::Healthy,
            Err(e) => {
                // Serve with an empty cache: every capability reads as denied
                // until the watcher gets through.
                self.health.write().capabilities = ComponentHealth::Degraded;
                tracing::warn!(
                    tenant_id = %tenant_id,
                    error = %e,
                    "initial capability refresh failed"
                );
            }
        }
    }

    fn watcher(&self, tenant_id: TenantId) -> CapabilityWatcher {
        let health = self.health.clone();
        let readiness = self.readiness.clone();
        let cache = self.cache.clone();
        CapabilityWatcher::new(
            self.store.clone(),
            self.cache.clone(),
            vec![tenant_id],
            self.config.capabilities.refresh_interval(),
        )
        .with_metrics(self.metrics.clone())
        .with_listener(move |result| {
            let capabilities = {
                let mut health = health.write();
                // Only a running component moves between these two.
                if matches!(
                    health.capabilities,
                    ComponentHealth::Healthy | ComponentHealth::Degraded
                ) {
                    let next = if result.is_ok() {
                        ComponentHealth::Healthy
                    } else {
                        ComponentHealth::Degraded
                    };
                    if health.capabilities != next {
                        tracing::info!(
                            tenant_id = %tenant_id,
                            from = ?health.capabilities,
                            to = ?next,
                            "capability component health changed"
                        );
                        health.capabilities = next;
                    }
                }
                health.capabilities
            };
            readiness.update(|status| {
                status.capability_version = cache.version(tenant_id);
                status.components.capabilities = matches!(
                    capabilities,
                    ComponentHealth::Healthy | ComponentHealth::Degraded
                );
            });
        })
    }

    fn spawn_tasks(&mut self, tenant_id: TenantId) {
        let watcher = self.watcher(tenant_id);
        self.tasks
            .push(("capability watcher", watcher.spawn(self.shutdown_rx.clone())));

        if let Some(claimed) = self.claimed.clone() {
            let heartbeat = spawn_heartbeat(
                self.pool.clone(),
                claimed,
                self.config.pool.heartbeat_interval(),
                self.shutdown_tx.clone(),
                self.liveness.clone(),
            );
            self.tasks.push(("lease heartbeat", heartbeat));
        }

        if self.config.worker.pool_owner {
            let reclaim = ReclaimLoop::new(self.pool.clone(), tenant_id, self.pool_settings.subscribe())
                .with_metrics(self.metrics.clone());
            self.tasks
                .push(("reclaim loop", reclaim.spawn(self.shutdown_rx.clone())));
            self.health.write().reclaim = ComponentHealth::Healthy;
        } else {
            self.health.write().reclaim = ComponentHealth::Disabled;
        }
    }

    fn publish_readiness(&self) {
        let ready = self.health.read().is_ready();
        let tenant_id = self.config.worker.tenant_id;
        let instance_id = self.claimed.as_ref().map(|c| c.instance_id.get());
        let capability_version = TenantId::new(tenant_id)
            .map(|t| self.cache.version(t))
            .unwrap_or(0);
        let health = self.health();
        self.readiness.update(|status| {
            status.ready = ready;
            status.tenant_id = Some(tenant_id);
            status.instance_id = instance_id;
            status.capability_version = capability_version;
            status.components.keyspace = health.keyspace == ComponentHealth::Healthy;
            status.components.instance = health.instance == ComponentHealth::Healthy;
            status.components.capabilities = matches!(
                health.capabilities,
                ComponentHealth::Healthy | ComponentHealth::Degraded
            );
        });
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Run the worker until SIGINT or an internal shutdown request.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("shutdown signal received (SIGINT)");
            }
            _ = async {
                while !*shutdown_rx.borrow() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            } => {
                tracing::info!("shutdown requested by component");
            }
        }

        self.stop().await
    }

    /// Stop all components.
    ///
    /// Background tasks are stopped first so no heartbeat can renew the
    /// lease after it has been released.
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!("stopping tenant worker");
        self.running.store(false, Ordering::Release);
        self.readiness.set_ready(false);
        let _ = self.shutdown_tx.send(true);

        self.health.write().capabilities = ComponentHealth::Stopping;
        if self.health.read().reclaim != ComponentHealth::Disabled {
            self.health.write().reclaim = ComponentHealth::Stopping;
        }
        for (name, handle) in self.tasks.drain(..) {
            match tokio::time::timeout(TASK_STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => tracing::debug!(task = name, "task stopped"),
                Ok(Err(e)) => tracing::warn!(task = name, error = %e, "task panicked"),
                Err(_) => tracing::warn!(task = name, "task stop timed out"),
            }
        }
        self.health.write().capabilities = ComponentHealth::Stopped;
        if self.health.read().reclaim != ComponentHealth::Disabled {
            self.health.write().reclaim = ComponentHealth::Stopped;
        }

        if let Some(claimed) = self.claimed.take() {
            self.health.write().instance = ComponentHealth::Stopping;
            self.pool
                .release(&claimed)
                .await
                .context("failed to release instance id")?;
        }
        self.health.write().instance = ComponentHealth::Stopped;

        tracing::info!("tenant worker stopped");
        Ok(())
    }
}

/// Renew the instance lease until shutdown. Losing the slot shuts the
/// worker down.
fn spawn_heartbeat(
    pool: InstancePool,
    claimed: ClaimedInstance,
    interval: Duration,
    shutdown_tx: Arc<watch::Sender<bool>>,
    liveness: Arc<HealthProbe>,
) -> JoinHandle<()> {
    let mut shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }

            match pool.heartbeat(&claimed).await {
                Ok(_) => {}
                Err(e @ PlaneError::SlotLost { .. }) => {
                    tracing::error!(
                        tenant_id = %claimed.tenant_id,
                        instance_id = %claimed.instance_id,
                        error = %e,
                        "instance lease lost, shutting down"
                    );
                    liveness.set_unhealthy(e.to_string());
                    let _ = shutdown_tx.send(true);
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        tenant_id = %claimed.tenant_id,
                        instance_id = %claimed.instance_id,
                        error = %e,
                        "lease renewal failed, retrying"
                    );
                }
            }
        }
    })
}
