//! Worker-local capability cache and freshness semantics.
//!
//! Each tenant's capabilities are held as an immutable
//! [`CapabilitySnapshot`]. A refresh swaps in a whole new map of snapshots,
//! so a reader sees either the old or the new snapshot and never a mix.
//! Lookups never block on a refresh in flight.
//!
//! Freshness follows the Fresh/Cached/Stale/Expired matrix measured
//! against the convergence window: a snapshot older than the window may
//! be missing a change the operator already expects to be enforced.
//!
//! # Default deny
//!
//! A tenant with no snapshot yet, or a kind absent from its snapshot, is
//! denied.

use crate::control::capabilities::{CapabilityKind, CapabilityRecord, CapabilityValue};
use crate::core::error::{PlaneError, PlaneResult};
use crate::core::ids::TenantId;
use crate::core::time::{Clock, Timestamp};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Cache state following the freshness matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CacheState {
    /// Refreshed within half the convergence window.
    Fresh,
    /// Refreshed within the convergence window.
    Cached,
    /// Older than the window but within one grace window.
    Stale,
    /// Past the grace window; refreshes are failing.
    Expired,
}

impl CacheState {
    /// Classify a snapshot age against the convergence window.
    pub fn from_age(age: Duration, window: Duration) -> Self {
        if age <= window / 2 {
            Self::Fresh
        } else if age <= window {
            Self::Cached
        } else if age <= window * 2 {
            Self::Stale
        } else {
            Self::Expired
        }
    }

    /// Check if the snapshot is within the convergence window.
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Fresh | Self::Cached)
    }

    /// Numeric level for metrics: 0 fresh through 3 expired.
    pub fn level(&self) -> u64 {
        match self {
            Self::Fresh => 0,
            Self::Cached => 1,
            Self::Stale => 2,
            Self::Expired => 3,
        }
    }
}

impl std::fmt::Display for CacheState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fresh => write!(f, "fresh"),
            Self::Cached => write!(f, "cached"),
            Self::Stale => write!(f, "stale"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Immutable view of one tenant's capabilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySnapshot {
    /// Tenant the snapshot belongs to.
    pub tenant_id: TenantId,
    /// Authoritative version the snapshot was built from.
    pub version: u64,
    /// Non-default values.
    pub values: BTreeMap<CapabilityKind, CapabilityValue>,
    /// When the snapshot was last confirmed against the store.
    pub refreshed_at: Timestamp,
}

impl CapabilitySnapshot {
    /// Build a snapshot from an authoritative record.
    pub fn from_record(record: CapabilityRecord, refreshed_at: Timestamp) -> Self {
        Self {
            tenant_id: record.tenant_id,
            version: record.version,
            values: record.values,
            refreshed_at,
        }
    }

    /// Effective value of a capability.
    pub fn value(&self, kind: CapabilityKind) -> CapabilityValue {
        self.values
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| kind.default_value())
    }

    /// Check if a boolean capability is granted.
    pub fn is_allowed(&self, kind: CapabilityKind) -> bool {
        self.values.get(&kind).map(CapabilityValue::is_true).unwrap_or(false)
    }
}

/// Worker-local capability cache.
#[derive(Debug)]
pub struct CapabilityCache {
    snapshots: ArcSwap<HashMap<TenantId, Arc<CapabilitySnapshot>>>,
    clock: Arc<dyn Clock>,
    max_propagation: Duration,
    /// Bumped whenever a snapshot with a new version is installed.
    changes: watch::Sender<u64>,
}

impl CapabilityCache {
    /// Create an empty cache.
    pub fn new(clock: Arc<dyn Clock>, max_propagation: Duration) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            snapshots: ArcSwap::from_pointee(HashMap::new()),
            clock,
            max_propagation,
            changes,
        }
    }

    /// Convergence window.
    pub fn max_propagation(&self) -> Duration {
        self.max_propagation
    }

    /// Check if `tenant_id` holds a boolean capability.
    ///
    /// Never blocks; denied until the first successful refresh.
    pub fn is_allowed(&self, tenant_id: TenantId, kind: CapabilityKind) -> bool {
        self.snapshots
            .load()
            .get(&tenant_id)
            .map(|snapshot| snapshot.is_allowed(kind))
            .unwrap_or(false)
    }

    /// Current value of a capability, or `None` before the first refresh.
    pub fn value(&self, tenant_id: TenantId, kind: CapabilityKind) -> Option<CapabilityValue> {
        self.snapshots
            .load()
            .get(&tenant_id)
            .map(|snapshot| snapshot.value(kind))
    }

    /// Current snapshot of a tenant.
    pub fn snapshot(&self, tenant_id: TenantId) -> Option<Arc<CapabilitySnapshot>> {
        self.snapshots.load().get(&tenant_id).cloned()
    }

    /// Snapshot version of a tenant; zero before the first refresh.
    pub fn version(&self, tenant_id: TenantId) -> u64 {
        self.snapshot(tenant_id).map(|s| s.version).unwrap_or(0)
    }

    /// Freshness of a tenant's snapshot, or `None` before the first refresh.
    pub fn freshness(&self, tenant_id: TenantId) -> Option<CacheState> {
        let snapshot = self.snapshot(tenant_id)?;
        let age = self.clock.now().since(snapshot.refreshed_at);
        Some(CacheState::from_age(age, self.max_propagation))
    }

    /// Install an authoritative record.
    ///
    /// A record older than the current snapshot is ignored. A record at the
    /// current version only refreshes the timestamp. Returns true if the
    /// version changed.
    pub fn install(&self, record: CapabilityRecord) -> bool {
        let tenant_id = record.tenant_id;
        let incoming = Arc::new(CapabilitySnapshot::from_record(record, self.clock.now()));
        let mut changed = false;

        self.snapshots.rcu(|current| {
            let mut next = HashMap::clone(current);
            changed = false;
            match current.get(&tenant_id) {
                Some(existing) if existing.version > incoming.version => {}
                Some(existing) => {
                    changed = existing.version != incoming.version;
                    next.insert(tenant_id, incoming.clone());
                }
                None => {
                    changed = true;
                    next.insert(tenant_id, incoming.clone());
                }
            }
            next
        });

        if changed {
            self.changes.send_modify(|generation| *generation += 1);
            tracing::info!(
                tenant_id = %tenant_id,
                version = incoming.version,
                "installed capability snapshot"
            );
        }
        changed
    }

    /// Mark a tenant's snapshot as confirmed current at `version`.
    ///
    /// Returns false if there is no snapshot at that version to confirm.
    pub fn confirm(&self, tenant_id: TenantId, version: u64) -> bool {
        let now = self.clock.now();
        let mut confirmed = false;
        self.snapshots.rcu(|current| {
            let mut next = HashMap::clone(current);
            confirmed = false;
            if let Some(existing) = current.get(&tenant_id) {
                if existing.version == version {
                    let mut refreshed = CapabilitySnapshot::clone(existing);
                    refreshed.refreshed_at = now;
                    next.insert(tenant_id, Arc::new(refreshed));
                    confirmed = true;
                }
            }
            next
        });
        confirmed
    }

    /// Drop a tenant's snapshot.
    pub fn remove(&self, tenant_id: TenantId) {
        self.snapshots.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(&tenant_id);
            next
        });
        self.changes.send_modify(|generation| *generation += 1);
    }

    /// Receiver notified on every snapshot change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn pending(
        &self,
        tenant_id: TenantId,
        expected: &[(CapabilityKind, CapabilityValue)],
    ) -> Vec<String> {
        let snapshot = self.snapshot(tenant_id);
        expected
            .iter()
            .filter(|(kind, value)| {
                snapshot
                    .as_ref()
                    .map(|s| s.value(*kind) != *value)
                    .unwrap_or(true)
            })
            .map(|(kind, value)| format!("{}={}", kind, value))
            .collect()
    }

    /// Wait until every expected `(kind, value)` is visible for the tenant.
    ///
    /// Waits on change notifications, not a polling sleep. `timeout`
    /// defaults to the convergence window.
    pub async fn wait_for(
        &self,
        tenant_id: TenantId,
        expected: &[(CapabilityKind, CapabilityValue)],
        timeout: Option<Duration>,
    ) -> PlaneResult<()> {
        let timeout = timeout.unwrap_or(self.max_propagation);
        let deadline = tokio::time::Instant::now() + timeout;
        let mut changes = self.subscribe();

        loop {
            changes.borrow_and_update();
            let pending = self.pending(tenant_id, expected);
            if pending.is_empty() {
                return Ok(());
            }
            match tokio::time::timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return Err(PlaneError::internal("capability cache closed")),
                Err(_) => {
                    return Err(PlaneError::ConvergenceTimeout {
                        tenant_id,
                        waited_ms: timeout.as_millis() as u64,
                        pending: pending.join(", "),
                    })
                }
            }
        }
    }
}
