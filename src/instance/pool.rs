//! Instance identifier pool.
//!
//! Each tenant has a table of instance slots. The reclaim loop keeps a
//! number of unclaimed slots ready; a starting worker claims one with a
//! version-checked update, so two claimants (possibly in different
//! processes) can never win the same slot. When the pool is empty the
//! claimant creates a slot itself, using the lowest instance id not yet
//! present, and the unique-row insert arbitrates between racing creators.
//!
//! A claimed slot carries a lease. The owner renews it with [`InstancePool::heartbeat`];
//! a slot whose lease lapsed keeps its instance id until [`InstancePool::replenish_once`]
//! recycles or deletes it.

use crate::core::config::PoolConfig;
use crate::core::error::{PlaneError, PlaneResult};
use crate::core::ids::{InstanceId, SessionId, TenantId, MAX_INSTANCE_ID};
use crate::core::time::{Clock, Timestamp};
use crate::instance::slot::{InstanceSlot, SlotState};
use crate::ops::observability::PlaneMetrics;
use crate::store::{MetadataStore, Versioned};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// First backoff after a lost conditional write.
const CAS_RETRY_INITIAL_BACKOFF_MS: u64 = 1;
/// Backoff ceiling.
const CAS_RETRY_MAX_BACKOFF_MS: u64 = 64;

/// Slot counts of one tenant at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolCounts {
    /// Slots ready to be claimed.
    pub unclaimed: usize,
    /// Slots held under an unexpired lease.
    pub live: usize,
    /// Slots whose lease lapsed, awaiting reclaim.
    pub expired: usize,
}

/// What a single replenish pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplenishReport {
    /// Expired slots turned back into unclaimed ones.
    pub reclaimed: usize,
    /// Expired slots deleted.
    pub deleted: usize,
    /// New unclaimed slots inserted.
    pub created: usize,
    /// Rows skipped because a concurrent writer changed them first.
    pub skipped: usize,
}

impl ReplenishReport {
    /// Number of slots added to the unclaimed set.
    pub fn added(&self) -> usize {
        self.reclaimed + self.created
    }
}

/// A slot held by this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedInstance {
    /// Tenant the slot belongs to.
    pub tenant_id: TenantId,
    /// Claimed instance id.
    pub instance_id: InstanceId,
    /// Session that holds the lease.
    pub session_id: SessionId,
    /// Address written into the slot.
    pub address: String,
    /// Lease expiration at claim time.
    pub expires_at: Timestamp,
}

/// Claims, releases and replenishes instance slots.
#[derive(Debug, Clone)]
pub struct InstancePool {
    store: Arc<dyn MetadataStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<PlaneMetrics>,
    lease_ttl: Duration,
    max_retries: u32,
}

impl InstancePool {
    /// Create a pool over a metadata store.
    pub fn new(store: Arc<dyn MetadataStore>, clock: Arc<dyn Clock>, config: &PoolConfig) -> Self {
        Self {
            store,
            clock,
            metrics: Arc::new(PlaneMetrics::new()),
            lease_ttl: config.lease_ttl(),
            max_retries: config.claim_max_retries,
        }
    }

    /// Report into a shared metrics collector.
    pub fn with_metrics(mut self, metrics: Arc<PlaneMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Lease duration of claimed slots.
    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    /// Claim an instance id for a worker of `tenant_id`.
    ///
    /// Fails with [`PlaneError::PoolExhausted`] if no slot can be claimed or
    /// created; the worker must not start in that case.
    pub async fn claim(
        &self,
        tenant_id: TenantId,
        address: &str,
        session_id: SessionId,
    ) -> PlaneResult<ClaimedInstance> {
        let started = Instant::now();
        if self
            .blocking(move |pool| pool.store.get_tenant(tenant_id))
            .await?
            .is_none()
        {
            return Err(PlaneError::TenantNotFound {
                tenant: tenant_id.to_string(),
            });
        }

        let mut attempt = 0u32;
        let mut backoff_ms = CAS_RETRY_INITIAL_BACKOFF_MS;

        loop {
            let address = address.to_string();
            let result = self
                .blocking(move |pool| pool.try_claim(tenant_id, &address, session_id))
                .await;
            match result {
                Ok(claimed) => {
                    self.metrics
                        .record_claim(started.elapsed().as_secs_f64() * 1000.0);
                    tracing::info!(
                        tenant_id = %tenant_id,
                        instance_id = %claimed.instance_id,
                        session_id = %session_id,
                        attempts = attempt + 1,
                        "claimed instance slot"
                    );
                    return Ok(claimed);
                }
                Err(PlaneError::Conflict { what }) => {
                    self.metrics.record_claim_conflict();
                    attempt += 1;
                    tracing::debug!(tenant_id = %tenant_id, attempt, conflict = %what, "claim attempt lost race");
                    if attempt >= self.max_retries {
                        self.metrics.record_claim_failure();
                        return Err(PlaneError::PoolExhausted {
                            tenant_id,
                            reason: format!("gave up after {} conflicting attempts", attempt),
                        });
                    }
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(CAS_RETRY_MAX_BACKOFF_MS);
                }
                Err(e) => {
                    self.metrics.record_claim_failure();
                    return Err(e);
                }
            }
        }
    }

    fn try_claim(
        &self,
        tenant_id: TenantId,
        address: &str,
        session_id: SessionId,
    ) -> PlaneResult<ClaimedInstance> {
        let now = self.clock.now();
        let expires_at = now.add(self.lease_ttl);
        let rows = self.store.scan_slots(tenant_id)?;

        let instance_id = match rows
            .iter()
            .find(|row| row.value.state(now) == SlotState::Unclaimed)
        {
            Some(row) => {
                let claimed = row.value.claimed_by(address, session_id, expires_at);
                self.store.update_slot(row.version, claimed)?;
                row.value.instance_id
            }
            None => {
                let instance_id = lowest_free_ids(&rows).next().ok_or_else(|| {
                    PlaneError::PoolExhausted {
                        tenant_id,
                        reason: format!("all {} instance ids are in use", MAX_INSTANCE_ID),
                    }
                })?;
                tracing::debug!(tenant_id = %tenant_id, instance_id = %instance_id, "pool empty, creating slot");
                let slot = InstanceSlot::unclaimed(tenant_id, instance_id).claimed_by(
                    address,
                    session_id,
                    expires_at,
                );
                self.store.insert_slot(slot)?;
                instance_id
            }
        };

        Ok(ClaimedInstance {
            tenant_id,
            instance_id,
            session_id,
            address: address.to_string(),
            expires_at,
        })
    }

    /// Renew the lease of a claimed slot. Returns the new expiration.
    ///
    /// Fails with [`PlaneError::SlotLost`] when the lease already lapsed or
    /// the slot is held by another session.
    pub async fn heartbeat(&self, claimed: &ClaimedInstance) -> PlaneResult<Timestamp> {
        let held = claimed.clone();
        let expires_at = self
            .retry_conflicts("heartbeat", move |pool| {
                let now = pool.clock.now();
                let row = pool.held_row(&held, now)?;
                let expires_at = now.add(pool.lease_ttl);
                let renewed = row
                    .value
                    .claimed_by(held.address.clone(), held.session_id, expires_at);
                pool.store.update_slot(row.version, renewed)?;
                Ok(expires_at)
            })
            .await;
        if let Err(PlaneError::SlotLost { .. }) = &expires_at {
            self.metrics.record_slot_lost();
        }
        let expires_at = expires_at?;
        tracing::debug!(
            tenant_id = %claimed.tenant_id,
            instance_id = %claimed.instance_id,
            expires_at = %expires_at,
            "renewed instance lease"
        );
        Ok(expires_at)
    }

    /// Give up a claimed slot. The slot expires immediately.
    ///
    /// Releasing a slot that is no longer held is a no-op.
    pub async fn release(&self, claimed: &ClaimedInstance) -> PlaneResult<()> {
        let held = claimed.clone();
        let result = self
            .retry_conflicts("release", move |pool| {
                let now = pool.clock.now();
                let row = pool.held_row(&held, now)?;
                let expired = row
                    .value
                    .claimed_by(held.address.clone(), held.session_id, now);
                pool.store.update_slot(row.version, expired)?;
                Ok(())
            })
            .await;
        match result {
            Ok(()) => {
                tracing::info!(
                    tenant_id = %claimed.tenant_id,
                    instance_id = %claimed.instance_id,
                    "released instance slot"
                );
                Ok(())
            }
            Err(PlaneError::SlotLost { .. }) => {
                tracing::debug!(
                    tenant_id = %claimed.tenant_id,
                    instance_id = %claimed.instance_id,
                    "slot already lost, nothing to release"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn held_row(
        &self,
        claimed: &ClaimedInstance,
        now: Timestamp,
    ) -> PlaneResult<Versioned<InstanceSlot>> {
        let lost = || PlaneError::SlotLost {
            tenant_id: claimed.tenant_id,
            instance_id: claimed.instance_id,
        };
        let row = self
            .store
            .get_slot(claimed.tenant_id, claimed.instance_id)?
            .ok_or_else(lost)?;
        if !row.value.is_held_by(claimed.session_id) || row.value.state(now) != SlotState::Live {
            return Err(lost());
        }
        Ok(row)
    }

    /// One reclaim pass for `tenant_id` towards `target` unclaimed slots.
    ///
    /// Expired slots are recycled while the tenant is below target and
    /// deleted otherwise; then new slots fill the lowest free ids. Live
    /// slots are never touched. Running it again at target is a no-op.
    pub fn replenish_once(&self, tenant_id: TenantId, target: usize) -> PlaneResult<ReplenishReport> {
        let now = self.clock.now();
        let rows = self.store.scan_slots(tenant_id)?;
        let mut report = ReplenishReport::default();
        let mut unclaimed = rows
            .iter()
            .filter(|row| row.value.state(now) == SlotState::Unclaimed)
            .count();

        for row in rows
            .iter()
            .filter(|row| row.value.state(now) == SlotState::Expired)
        {
            let result = if unclaimed < target {
                self.store
                    .update_slot(row.version, row.value.reset())
                    .map(|_| {
                        unclaimed += 1;
                        report.reclaimed += 1;
                    })
            } else {
                self.store
                    .delete_slot(tenant_id, row.value.instance_id, row.version)
                    .map(|_| report.deleted += 1)
            };
            match result {
                Ok(()) => {}
                Err(PlaneError::Conflict { .. }) => report.skipped += 1,
                Err(e) => return Err(e),
            }
        }

        let mut free = lowest_free_ids(&rows);
        while unclaimed < target {
            let Some(instance_id) = free.next() else {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    unclaimed,
                    target,
                    "instance id space exhausted, pool below target"
                );
                break;
            };
            match self
                .store
                .insert_slot(InstanceSlot::unclaimed(tenant_id, instance_id))
            {
                Ok(_) => {
                    unclaimed += 1;
                    report.created += 1;
                }
                // A claimant created this id first; try the next one.
                Err(PlaneError::Conflict { .. }) => report.skipped += 1,
                Err(e) => return Err(e),
            }
        }

        if report != ReplenishReport::default() {
            tracing::info!(
                tenant_id = %tenant_id,
                reclaimed = report.reclaimed,
                deleted = report.deleted,
                created = report.created,
                skipped = report.skipped,
                "replenished instance pool"
            );
        }
        Ok(report)
    }

    /// Slot counts of a tenant.
    pub fn counts(&self, tenant_id: TenantId) -> PlaneResult<PoolCounts> {
        let now = self.clock.now();
        let mut counts = PoolCounts::default();
        for row in self.store.scan_slots(tenant_id)? {
            match row.value.state(now) {
                SlotState::Unclaimed => counts.unclaimed += 1,
                SlotState::Live => counts.live += 1,
                SlotState::Expired => counts.expired += 1,
            }
        }
        Ok(counts)
    }

    /// Slot rows of a tenant.
    pub fn slots(&self, tenant_id: TenantId) -> PlaneResult<Vec<InstanceSlot>> {
        Ok(self
            .store
            .scan_slots(tenant_id)?
            .into_iter()
            .map(|row| row.value)
            .collect())
    }

    /// Run a store operation on the blocking thread pool.
    ///
    /// Store backends do synchronous I/O and may wait on a cross-process
    /// lock; async callers must not run them on a runtime worker.
    async fn blocking<T, F>(&self, op: F) -> PlaneResult<T>
    where
        F: FnOnce(&InstancePool) -> PlaneResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || op(&pool))
            .await
            .map_err(|e| PlaneError::internal(format!("store task failed: {}", e)))?
    }

    /// Run `op`, retrying with backoff while it loses conditional writes.
    async fn retry_conflicts<T, F>(&self, operation: &str, op: F) -> PlaneResult<T>
    where
        F: Fn(&InstancePool) -> PlaneResult<T> + Clone + Send + 'static,
        T: Send + 'static,
    {
        let mut attempt = 0u32;
        let mut backoff_ms = CAS_RETRY_INITIAL_BACKOFF_MS;
        loop {
            match self.blocking(op.clone()).await {
                Err(PlaneError::Conflict { what }) if attempt + 1 < self.max_retries => {
                    attempt += 1;
                    tracing::debug!(operation, attempt, conflict = %what, "retrying after conflict");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(CAS_RETRY_MAX_BACKOFF_MS);
                }
                result => return result,
            }
        }
    }
}

/// Instance ids not present in `rows`, ascending.
fn lowest_free_ids(rows: &[Versioned<InstanceSlot>]) -> impl Iterator<Item = InstanceId> {
    let used: BTreeSet<InstanceId> = rows.iter().map(|row| row.value.instance_id).collect();
    InstanceId::all().filter(move |id| !used.contains(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::ManualClock;
    use crate::store::MemoryStore;

    fn setup() -> (InstancePool, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_000)));
        let pool = InstancePool::new(store.clone(), clock.clone(), &PoolConfig::default());
        (pool, store, clock)
    }

    fn iid(id: u32) -> InstanceId {
        InstanceId::new(id).unwrap()
    }

    #[tokio::test]
    async fn claim_takes_lowest_unclaimed_slot() {
        let (pool, _, _) = setup();
        pool.replenish_once(TenantId::SYSTEM, 3).unwrap();

        let claimed = pool
            .claim(TenantId::SYSTEM, "a", SessionId(1))
            .await
            .unwrap();
        assert_eq!(claimed.instance_id, iid(1));
        assert_eq!(
            pool.counts(TenantId::SYSTEM).unwrap(),
            PoolCounts {
                unclaimed: 2,
                live: 1,
                expired: 0
            }
        );
    }

    #[tokio::test]
    async fn claim_creates_slot_when_pool_empty() {
        let (pool, _, _) = setup();
        let first = pool.claim(TenantId::SYSTEM, "a", SessionId(1)).await.unwrap();
        let second = pool.claim(TenantId::SYSTEM, "b", SessionId(2)).await.unwrap();
        assert_eq!(first.instance_id, iid(1));
        assert_eq!(second.instance_id, iid(2));
    }

    #[tokio::test]
    async fn claim_for_unknown_tenant_fails() {
        let (pool, _, _) = setup();
        let err = pool
            .claim(TenantId::new(42).unwrap(), "a", SessionId(1))
            .await
            .unwrap_err();
        assert!(matches!(err, PlaneError::TenantNotFound { .. }));
    }

    #[tokio::test]
    async fn expired_slot_is_not_claimable_until_reclaimed() {
        let (pool, _, clock) = setup();
        let claimed = pool.claim(TenantId::SYSTEM, "a", SessionId(1)).await.unwrap();
        clock.advance(pool.lease_ttl());

        let counts = pool.counts(TenantId::SYSTEM).unwrap();
        assert_eq!(counts.expired, 1);

        // The expired slot still occupies id 1, so the next claim gets id 2.
        let next = pool.claim(TenantId::SYSTEM, "b", SessionId(2)).await.unwrap();
        assert_eq!(next.instance_id, iid(2));
        assert_ne!(next.instance_id, claimed.instance_id);
    }

    #[tokio::test]
    async fn heartbeat_extends_lease_and_detects_loss() {
        let (pool, _, clock) = setup();
        let claimed = pool.claim(TenantId::SYSTEM, "a", SessionId(1)).await.unwrap();

        clock.advance(Duration::from_secs(30));
        let renewed = pool.heartbeat(&claimed).await.unwrap();
        assert!(renewed > claimed.expires_at);

        clock.advance(pool.lease_ttl());
        let err = pool.heartbeat(&claimed).await.unwrap_err();
        assert!(matches!(err, PlaneError::SlotLost { .. }));
    }

    #[tokio::test]
    async fn release_expires_immediately_and_is_idempotent() {
        let (pool, _, _) = setup();
        let claimed = pool.claim(TenantId::SYSTEM, "a", SessionId(1)).await.unwrap();
        pool.release(&claimed).await.unwrap();
        assert_eq!(pool.counts(TenantId::SYSTEM).unwrap().expired, 1);
        pool.release(&claimed).await.unwrap();
        assert!(pool.heartbeat(&claimed).await.is_err());
    }

    #[test]
    fn replenish_recycles_then_deletes_expired() {
        let (pool, store, clock) = setup();
        let now = clock.now();
        for id in 1..=3 {
            let slot = InstanceSlot::unclaimed(TenantId::SYSTEM, iid(id)).claimed_by(
                "x",
                SessionId(id as u64),
                now,
            );
            store.insert_slot(slot).unwrap();
        }

        let report = pool.replenish_once(TenantId::SYSTEM, 2).unwrap();
        assert_eq!(report.reclaimed, 2);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.created, 0);
        assert_eq!(
            pool.counts(TenantId::SYSTEM).unwrap(),
            PoolCounts {
                unclaimed: 2,
                live: 0,
                expired: 0
            }
        );
    }

    #[tokio::test]
    async fn replenish_never_touches_live_slots() {
        let (pool, _, _) = setup();
        let claimed = pool.claim(TenantId::SYSTEM, "a", SessionId(1)).await.unwrap();
        pool.replenish_once(TenantId::SYSTEM, 2).unwrap();

        let slots = pool.slots(TenantId::SYSTEM).unwrap();
        assert_eq!(slots.len(), 3);
        assert!(slots[0].is_held_by(claimed.session_id));
        assert_eq!(slots[1].instance_id, iid(2));
        assert_eq!(slots[2].instance_id, iid(3));
    }

    #[test]
    fn replenish_at_target_is_noop() {
        let (pool, _, _) = setup();
        assert_eq!(pool.replenish_once(TenantId::SYSTEM, 4).unwrap().created, 4);
        assert_eq!(
            pool.replenish_once(TenantId::SYSTEM, 4).unwrap(),
            ReplenishReport::default()
        );
    }

    #[test]
    fn replenish_surfaces_store_outage() {
        let (pool, store, _) = setup();
        store.set_available(false);
        assert!(matches!(
            pool.replenish_once(TenantId::SYSTEM, 1),
            Err(PlaneError::StoreUnavailable { .. })
        ));
    }
}
