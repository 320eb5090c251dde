//! Periodic pool maintenance.
//!
//! The reclaim loop runs one [`InstancePool::replenish_once`] per tick.
//! Interval and target come from a watch channel so an operator can retune
//! them without restarting the worker; a new interval takes effect from
//! the next tick. Store failures are logged and retried on the next tick,
//! they never stop the loop. Passes run on the blocking thread pool.

use crate::core::config::PoolSettings;
use crate::core::ids::TenantId;
use crate::instance::pool::{InstancePool, ReplenishReport};
use crate::ops::observability::PlaneMetrics;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Background task keeping a tenant's pool at its target size.
#[derive(Debug, Clone)]
pub struct ReclaimLoop {
    pool: InstancePool,
    tenant_id: TenantId,
    settings: watch::Receiver<PoolSettings>,
    metrics: Arc<PlaneMetrics>,
}

impl ReclaimLoop {
    /// Create a reclaim loop for one tenant.
    pub fn new(
        pool: InstancePool,
        tenant_id: TenantId,
        settings: watch::Receiver<PoolSettings>,
    ) -> Self {
        Self {
            pool,
            tenant_id,
            settings,
            metrics: Arc::new(PlaneMetrics::new()),
        }
    }

    /// Report into a shared metrics collector.
    pub fn with_metrics(mut self, metrics: Arc<PlaneMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Run a single pass with the current settings.
    ///
    /// Returns `None` if the pass failed; the failure is logged.
    pub fn run_once(&self) -> Option<ReplenishReport> {
        let target = self.settings.borrow().preallocated_count;
        match self.pool.replenish_once(self.tenant_id, target) {
            Ok(report) => {
                self.metrics.record_reclaim_run(report.added());
                if let Ok(counts) = self.pool.counts(self.tenant_id) {
                    self.metrics
                        .set_pool_counts(counts.unclaimed, counts.live, counts.expired);
                }
                Some(report)
            }
            Err(e) => {
                self.metrics.record_reclaim_failure();
                tracing::warn!(
                    tenant_id = %self.tenant_id,
                    target,
                    error = %e,
                    "reclaim pass failed, retrying next tick"
                );
                None
            }
        }
    }

    /// Run a single pass off the async runtime.
    pub async fn run_pass(&self) -> Option<ReplenishReport> {
        let this = self.clone();
        match tokio::task::spawn_blocking(move || this.run_once()).await {
            Ok(report) => report,
            Err(e) => {
                self.metrics.record_reclaim_failure();
                tracing::error!(tenant_id = %self.tenant_id, error = %e, "reclaim pass panicked");
                None
            }
        }
    }

    /// Spawn the loop. It runs a pass immediately, then once per interval,
    /// until `shutdown` turns true.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(tenant_id = %self.tenant_id, "reclaim loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.run_pass().await;

            let interval = self.settings.borrow().reclaim_interval;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = self.settings.changed() => {
                    if changed.is_ok() {
                        let settings = *self.settings.borrow();
                        tracing::info!(
                            tenant_id = %self.tenant_id,
                            interval_ms = settings.reclaim_interval.as_millis() as u64,
                            target = settings.preallocated_count,
                            "reclaim settings changed"
                        );
                    } else {
                        // Settings sender dropped; keep the last values.
                        tokio::time::sleep(interval).await;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::info!(tenant_id = %self.tenant_id, "reclaim loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PoolConfig;
    use crate::core::time::{ManualClock, Timestamp};
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn pool(store: Arc<MemoryStore>) -> InstancePool {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1)));
        InstancePool::new(store, clock, &PoolConfig::default())
    }

    fn settings(interval_ms: u64, target: usize) -> PoolSettings {
        PoolSettings {
            reclaim_interval: Duration::from_millis(interval_ms),
            preallocated_count: target,
        }
    }

    #[test]
    fn failed_pass_is_counted_not_propagated() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let (_tx, rx) = watch::channel(settings(1_000, 3));
        let metrics = Arc::new(PlaneMetrics::new());
        let reclaim = ReclaimLoop::new(pool(store.clone()), TenantId::SYSTEM, rx)
            .with_metrics(metrics.clone());

        assert!(reclaim.run_once().is_none());
        assert_eq!(
            metrics
                .registry()
                .counter_get(crate::ops::observability::metrics::RECLAIM_FAILURES_TOTAL),
            1
        );

        store.set_available(true);
        assert_eq!(reclaim.run_once().unwrap().created, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn picks_up_new_target_on_next_tick() {
        let store = Arc::new(MemoryStore::new());
        let pool = pool(store.clone());
        let (tx, rx) = watch::channel(settings(1_000, 2));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = ReclaimLoop::new(pool.clone(), TenantId::SYSTEM, rx).spawn(shutdown_rx);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.counts(TenantId::SYSTEM).unwrap().unclaimed, 2);

        tx.send(settings(1_000, 5)).unwrap();
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(pool.counts(TenantId::SYSTEM).unwrap().unclaimed, 5);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
