//! Background capability refresh.
//!
//! Each worker polls the authoritative capability versions of the tenants
//! it serves. When a version moved it reads the full record and swaps a new
//! snapshot into the cache; otherwise it only confirms the current
//! snapshot as fresh. A failed refresh leaves the last good snapshot in
//! place, and cancelling the task never clears the cache.
//!
//! Store reads are blocking; the refresh task runs each pass on the
//! blocking thread pool.

use crate::control::cache::{CacheState, CapabilityCache};
use crate::core::error::{PlaneError, PlaneResult};
use crate::core::ids::TenantId;
use crate::ops::observability::PlaneMetrics;
use crate::store::MetadataStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Outcome of one refresh pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefreshReport {
    /// Tenants whose snapshot was replaced.
    pub updated: usize,
    /// Tenants whose snapshot was confirmed unchanged.
    pub unchanged: usize,
}

/// Callback run after every refresh pass with the pass outcome.
pub type RefreshListener = Arc<dyn Fn(&PlaneResult<RefreshReport>) + Send + Sync>;

/// Keeps a [`CapabilityCache`] in sync with the metadata store.
#[derive(Clone)]
pub struct CapabilityWatcher {
    store: Arc<dyn MetadataStore>,
    cache: Arc<CapabilityCache>,
    tenants: Vec<TenantId>,
    interval: Duration,
    metrics: Arc<PlaneMetrics>,
    listener: Option<RefreshListener>,
}

impl std::fmt::Debug for CapabilityWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityWatcher")
            .field("tenants", &self.tenants)
            .field("interval", &self.interval)
            .field("listener", &self.listener.is_some())
            .finish_non_exhaustive()
    }
}

impl CapabilityWatcher {
    /// Create a watcher for the given tenants.
    pub fn new(
        store: Arc<dyn MetadataStore>,
        cache: Arc<CapabilityCache>,
        tenants: Vec<TenantId>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            tenants,
            interval,
            metrics: Arc::new(PlaneMetrics::new()),
            listener: None,
        }
    }

    /// Report into a shared metrics collector.
    pub fn with_metrics(mut self, metrics: Arc<PlaneMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Call `listener` after every refresh pass, successful or not.
    pub fn with_listener(
        mut self,
        listener: impl Fn(&PlaneResult<RefreshReport>) + Send + Sync + 'static,
    ) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Cache being maintained.
    pub fn cache(&self) -> &Arc<CapabilityCache> {
        &self.cache
    }

    /// Refresh every watched tenant once.
    ///
    /// Stops at the first store error; tenants refreshed before it keep
    /// their new snapshots, the rest keep their previous ones.
    pub fn refresh_once(&self) -> PlaneResult<RefreshReport> {
        let result = self.refresh_tenants();
        match &result {
            Ok(_) => self.metrics.record_capability_refresh(self.max_version()),
            Err(_) => self.metrics.record_capability_refresh_failure(),
        }
        self.record_freshness();
        if let Some(listener) = &self.listener {
            listener(&result);
        }
        result
    }

    /// [`Self::refresh_once`] on the blocking thread pool.
    pub async fn refresh(&self) -> PlaneResult<RefreshReport> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.refresh_once())
            .await
            .map_err(|e| PlaneError::internal(format!("capability refresh task failed: {}", e)))?
    }

    fn refresh_tenants(&self) -> PlaneResult<RefreshReport> {
        let mut report = RefreshReport::default();
        for &tenant_id in &self.tenants {
            let version = self.store.capability_version(tenant_id)?;
            let current = self.cache.snapshot(tenant_id);
            if current.map(|s| s.version) == Some(version) && self.cache.confirm(tenant_id, version) {
                report.unchanged += 1;
                continue;
            }

            let record = self.store.read_capabilities(tenant_id)?;
            tracing::debug!(
                tenant_id = %tenant_id,
                version = record.version,
                "capability version changed, refreshing snapshot"
            );
            self.cache.install(record);
            report.updated += 1;
        }
        Ok(report)
    }

    fn record_freshness(&self) {
        let worst = self
            .tenants
            .iter()
            .map(|&t| self.cache.freshness(t).unwrap_or(CacheState::Expired))
            .max()
            .unwrap_or(CacheState::Fresh);
        self.metrics.set_capability_freshness(worst.level());
    }

    /// Highest snapshot version across the watched tenants.
    fn max_version(&self) -> u64 {
        self.tenants
            .iter()
            .map(|&t| self.cache.version(t))
            .max()
            .unwrap_or(0)
    }

    /// Spawn the refresh loop. The first pass runs immediately.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            tenants = self.tenants.len(),
            interval_ms = self.interval.as_millis() as u64,
            "capability watcher started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        tracing::warn!(error = %e, "capability refresh failed, keeping last snapshot");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }
        tracing::info!("capability watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::api::ServiceMode;
    use crate::control::capabilities::{CapabilityAuthority, CapabilityKind, CapabilityValue};
    use crate::core::time::{ManualClock, Timestamp};
    use crate::ops::observability::metrics;
    use crate::store::MemoryStore;
    use parking_lot::Mutex;

    fn setup() -> (CapabilityWatcher, CapabilityAuthority, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1)));
        let cache = Arc::new(CapabilityCache::new(clock, Duration::from_secs(10)));
        let watcher = CapabilityWatcher::new(
            store.clone(),
            cache,
            vec![TenantId::SYSTEM],
            Duration::from_millis(100),
        );
        (watcher, CapabilityAuthority::new(store.clone()), store)
    }

    #[test]
    fn first_refresh_populates_empty_snapshot() {
        let (watcher, _, _) = setup();
        let report = watcher.refresh_once().unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(watcher.cache().version(TenantId::SYSTEM), 0);
        assert!(watcher.cache().snapshot(TenantId::SYSTEM).is_some());

        let report = watcher.refresh_once().unwrap();
        assert_eq!(report.unchanged, 1);
    }

    #[test]
    fn version_change_swaps_snapshot() {
        let (watcher, authority, _) = setup();
        watcher.refresh_once().unwrap();
        authority
            .grant(
                TenantId::SYSTEM,
                CapabilityKind::CanCheckConsistency,
                CapabilityValue::Bool(true),
            )
            .unwrap();
        assert!(!watcher
            .cache()
            .is_allowed(TenantId::SYSTEM, CapabilityKind::CanCheckConsistency));

        watcher.refresh_once().unwrap();
        assert!(watcher
            .cache()
            .is_allowed(TenantId::SYSTEM, CapabilityKind::CanCheckConsistency));
    }

    #[test]
    fn store_outage_keeps_last_snapshot() {
        let (watcher, authority, store) = setup();
        authority
            .grant(
                TenantId::SYSTEM,
                CapabilityKind::CanViewNodeInfo,
                CapabilityValue::Bool(true),
            )
            .unwrap();
        watcher.refresh_once().unwrap();

        store.set_available(false);
        assert!(watcher.refresh_once().is_err());
        assert!(watcher
            .cache()
            .is_allowed(TenantId::SYSTEM, CapabilityKind::CanViewNodeInfo));
    }

    #[tokio::test(start_paused = true)]
    async fn loop_converges_and_stops() {
        let (watcher, authority, _) = setup();
        let cache = watcher.cache().clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = watcher.spawn(shutdown_rx);

        authority
            .grant(
                TenantId::SYSTEM,
                CapabilityKind::CanDebugProcess,
                CapabilityValue::Bool(true),
            )
            .unwrap();
        cache
            .wait_for(
                TenantId::SYSTEM,
                &[(CapabilityKind::CanDebugProcess, CapabilityValue::Bool(true))],
                None,
            )
            .await
            .unwrap();

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(cache.is_allowed(TenantId::SYSTEM, CapabilityKind::CanDebugProcess));
    }

    #[test]
    fn listener_sees_every_outcome() {
        let (watcher, _, store) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let watcher = {
            let seen = seen.clone();
            watcher.with_listener(move |result| seen.lock().push(result.is_ok()))
        };

        store.set_available(false);
        assert!(watcher.refresh_once().is_err());
        store.set_available(true);
        watcher.refresh_once().unwrap();
        assert_eq!(*seen.lock(), vec![false, true]);
    }

    #[test]
    fn snapshot_version_gauge_is_highest_watched_version() {
        let store = Arc::new(MemoryStore::new());
        let other = store
            .create_tenant("other", None, ServiceMode::Explicit, Timestamp::zero())
            .unwrap()
            .id;
        let authority = CapabilityAuthority::new(store.clone());
        for kind in [CapabilityKind::CanAdminSplit, CapabilityKind::CanAdminScatter] {
            authority
                .grant(other, kind, CapabilityValue::Bool(true))
                .unwrap();
        }

        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1)));
        let cache = Arc::new(CapabilityCache::new(clock, Duration::from_secs(10)));
        let registry_metrics = Arc::new(PlaneMetrics::new());
        let watcher = CapabilityWatcher::new(
            store,
            cache,
            vec![TenantId::SYSTEM, other],
            Duration::from_millis(100),
        )
        .with_metrics(registry_metrics.clone());

        watcher.refresh_once().unwrap();
        assert_eq!(
            registry_metrics
                .registry()
                .gauge_get(metrics::CAPABILITY_SNAPSHOT_VERSION),
            2
        );
    }
}
