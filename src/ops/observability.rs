//! Metrics and health checks.
//!
//! Metric namespaces:
//! - tenantplane.pool.*
//! - tenantplane.reclaim.*
//! - tenantplane.capabilities.*
//! - tenantplane.gate.*
//! - tenantplane.keyspace.*

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Readiness status of a worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadinessStatus {
    /// Overall ready state.
    pub ready: bool,
    /// Tenant the worker serves.
    pub tenant_id: Option<u64>,
    /// Claimed instance id.
    pub instance_id: Option<u32>,
    /// Capability snapshot version seen by the worker.
    pub capability_version: u64,
    /// Individual component status.
    pub components: ComponentStatus,
}

/// Component readiness.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentStatus {
    /// Keyspace boundary validated.
    pub keyspace: bool,
    /// Instance slot held.
    pub instance: bool,
    /// Capability cache populated.
    pub capabilities: bool,
}

/// Health check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Overall healthy state.
    pub healthy: bool,
    /// Status message.
    pub message: String,
}

impl HealthStatus {
    /// Create a healthy status.
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            message: "OK".to_string(),
        }
    }

    /// Create an unhealthy status.
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: message.into(),
        }
    }
}

/// Metric names.
pub mod metrics {
    /// Successful instance claims.
    pub const POOL_CLAIMS_TOTAL: &str = "tenantplane.pool.claims_total";
    /// Claim attempts that lost a conditional write.
    pub const POOL_CLAIM_CONFLICTS_TOTAL: &str = "tenantplane.pool.claim_conflicts_total";
    /// Claims that gave up.
    pub const POOL_CLAIM_FAILURES_TOTAL: &str = "tenantplane.pool.claim_failures_total";
    /// Claim latency in milliseconds.
    pub const POOL_CLAIM_LATENCY_MS: &str = "tenantplane.pool.claim_latency_ms";
    /// Unclaimed slots gauge.
    pub const POOL_UNCLAIMED: &str = "tenantplane.pool.unclaimed";
    /// Live slots gauge.
    pub const POOL_LIVE: &str = "tenantplane.pool.live";
    /// Expired slots gauge.
    pub const POOL_EXPIRED: &str = "tenantplane.pool.expired";
    /// Lost leases.
    pub const POOL_SLOTS_LOST_TOTAL: &str = "tenantplane.pool.slots_lost_total";
    /// Reclaim runs.
    pub const RECLAIM_RUNS_TOTAL: &str = "tenantplane.reclaim.runs_total";
    /// Failed reclaim runs.
    pub const RECLAIM_FAILURES_TOTAL: &str = "tenantplane.reclaim.failures_total";
    /// Slots created or recycled by reclaim.
    pub const RECLAIM_SLOTS_TOTAL: &str = "tenantplane.reclaim.slots_total";
    /// Capability refreshes.
    pub const CAPABILITY_REFRESH_TOTAL: &str = "tenantplane.capabilities.refresh_total";
    /// Failed capability refreshes.
    pub const CAPABILITY_REFRESH_FAILURES_TOTAL: &str =
        "tenantplane.capabilities.refresh_failures_total";
    /// Highest capability snapshot version among the watched tenants.
    pub const CAPABILITY_SNAPSHOT_VERSION: &str = "tenantplane.capabilities.snapshot_version";
    /// Capability snapshot freshness: 0 fresh, 1 cached, 2 stale, 3 expired.
    pub const CAPABILITY_FRESHNESS: &str = "tenantplane.capabilities.freshness";
    /// Forbidden gate outcomes.
    pub const GATE_FORBIDDEN_TOTAL: &str = "tenantplane.gate.forbidden_total";
    /// Keyspace violations.
    pub const KEYSPACE_VIOLATIONS_TOTAL: &str = "tenantplane.keyspace.violations_total";
}

/// Metrics registry.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<String, AtomicU64>>,
    gauges: RwLock<BTreeMap<String, AtomicU64>>,
    histograms: RwLock<BTreeMap<String, HistogramData>>,
}

impl MetricsRegistry {
    /// Create a new metrics registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter.
    pub fn counter_inc(&self, name: &str) {
        self.counter_add(name, 1);
    }

    /// Add to a counter.
    pub fn counter_add(&self, name: &str, value: u64) {
        if let Some(counter) = self.counters.read().get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }
        self.counters
            .write()
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    /// Get counter value.
    pub fn counter_get(&self, name: &str) -> u64 {
        self.counters
            .read()
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Set a gauge value.
    pub fn gauge_set(&self, name: &str, value: u64) {
        if let Some(gauge) = self.gauges.read().get(name) {
            gauge.store(value, Ordering::Relaxed);
            return;
        }
        self.gauges
            .write()
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .store(value, Ordering::Relaxed);
    }

    /// Get gauge value.
    pub fn gauge_get(&self, name: &str) -> u64 {
        self.gauges
            .read()
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Record a histogram observation.
    pub fn histogram_observe(&self, name: &str, value: f64) {
        self.histograms
            .write()
            .entry(name.to_string())
            .or_default()
            .observe(value);
    }

    /// Get histogram data.
    pub fn histogram_get(&self, name: &str) -> Option<HistogramSnapshot> {
        self.histograms.read().get(name).map(|h| h.snapshot())
    }

    /// Export metrics in Prometheus text format, sorted by name.
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        for (name, value) in self.counters.read().iter() {
            let prometheus_name = name.replace('.', "_");
            output.push_str(&format!(
                "# TYPE {} counter\n{} {}\n",
                prometheus_name,
                prometheus_name,
                value.load(Ordering::Relaxed)
            ));
        }

        for (name, value) in self.gauges.read().iter() {
            let prometheus_name = name.replace('.', "_");
            output.push_str(&format!(
                "# TYPE {} gauge\n{} {}\n",
                prometheus_name,
                prometheus_name,
                value.load(Ordering::Relaxed)
            ));
        }

        for (name, data) in self.histograms.read().iter() {
            let prometheus_name = name.replace('.', "_");
            let snapshot = data.snapshot();
            output.push_str(&format!(
                "# TYPE {} histogram\n{}_count {}\n{}_sum {}\n",
                prometheus_name, prometheus_name, snapshot.count, prometheus_name, snapshot.sum
            ));
        }

        output
    }
}

#[derive(Debug, Default)]
struct HistogramData {
    inner: Mutex<HistogramSnapshot>,
}

impl HistogramData {
    fn observe(&self, value: f64) {
        let mut inner = self.inner.lock();
        if inner.count == 0 {
            inner.min = value;
            inner.max = value;
        } else {
            inner.min = inner.min.min(value);
            inner.max = inner.max.max(value);
        }
        inner.count += 1;
        inner.sum += value;
    }

    fn snapshot(&self) -> HistogramSnapshot {
        self.inner.lock().clone()
    }
}

/// Histogram snapshot.
#[derive(Debug, Clone, Default)]
pub struct HistogramSnapshot {
    /// Number of observations.
    pub count: u64,
    /// Sum of all observations.
    pub sum: f64,
    /// Minimum value observed.
    pub min: f64,
    /// Maximum value observed.
    pub max: f64,
}

impl HistogramSnapshot {
    /// Calculate mean.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Domain metrics of a control plane process.
#[derive(Debug, Default)]
pub struct PlaneMetrics {
    registry: MetricsRegistry,
}

impl PlaneMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the underlying registry.
    pub fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }

    // === Instance pool ===

    /// Record a successful claim and its latency.
    pub fn record_claim(&self, latency_ms: f64) {
        self.registry.counter_inc(metrics::POOL_CLAIMS_TOTAL);
        self.registry
            .histogram_observe(metrics::POOL_CLAIM_LATENCY_MS, latency_ms);
    }

    /// Record a lost claim race.
    pub fn record_claim_conflict(&self) {
        self.registry.counter_inc(metrics::POOL_CLAIM_CONFLICTS_TOTAL);
    }

    /// Record a claim that gave up.
    pub fn record_claim_failure(&self) {
        self.registry.counter_inc(metrics::POOL_CLAIM_FAILURES_TOTAL);
    }

    /// Record a lost lease.
    pub fn record_slot_lost(&self) {
        self.registry.counter_inc(metrics::POOL_SLOTS_LOST_TOTAL);
    }

    /// Update the pool gauges.
    pub fn set_pool_counts(&self, unclaimed: usize, live: usize, expired: usize) {
        self.registry
            .gauge_set(metrics::POOL_UNCLAIMED, unclaimed as u64);
        self.registry.gauge_set(metrics::POOL_LIVE, live as u64);
        self.registry.gauge_set(metrics::POOL_EXPIRED, expired as u64);
    }

    // === Reclaim ===

    /// Record a reclaim run that created or recycled `slots` slots.
    pub fn record_reclaim_run(&self, slots: usize) {
        self.registry.counter_inc(metrics::RECLAIM_RUNS_TOTAL);
        self.registry
            .counter_add(metrics::RECLAIM_SLOTS_TOTAL, slots as u64);
    }

    /// Record a failed reclaim run.
    pub fn record_reclaim_failure(&self) {
        self.registry.counter_inc(metrics::RECLAIM_FAILURES_TOTAL);
    }

    // === Capabilities ===

    /// Record a capability refresh that observed `version`.
    pub fn record_capability_refresh(&self, version: u64) {
        self.registry.counter_inc(metrics::CAPABILITY_REFRESH_TOTAL);
        self.registry
            .gauge_set(metrics::CAPABILITY_SNAPSHOT_VERSION, version);
    }

    /// Record a failed capability refresh.
    pub fn record_capability_refresh_failure(&self) {
        self.registry
            .counter_inc(metrics::CAPABILITY_REFRESH_FAILURES_TOTAL);
    }

    /// Update the snapshot freshness gauge.
    pub fn set_capability_freshness(&self, level: u64) {
        self.registry.gauge_set(metrics::CAPABILITY_FRESHNESS, level);
    }

    /// Record a forbidden outcome for a privileged operation.
    pub fn record_forbidden(&self, operation: &str) {
        self.registry.counter_inc(metrics::GATE_FORBIDDEN_TOTAL);
        let metric = format!("{}.{}", metrics::GATE_FORBIDDEN_TOTAL, operation);
        self.registry.counter_inc(&metric);
    }

    // === Keyspace ===

    /// Record a keyspace violation.
    pub fn record_keyspace_violation(&self) {
        self.registry.counter_inc(metrics::KEYSPACE_VIOLATIONS_TOTAL);
    }

    /// Export all metrics.
    pub fn export(&self) -> String {
        self.registry.export_prometheus()
    }
}

/// Readiness probe.
#[derive(Debug, Default)]
pub struct ReadinessProbe {
    status: RwLock<ReadinessStatus>,
}

impl ReadinessProbe {
    /// Create a new readiness probe.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current readiness status.
    pub fn status(&self) -> ReadinessStatus {
        self.status.read().clone()
    }

    /// Apply a change to the status.
    pub fn update(&self, f: impl FnOnce(&mut ReadinessStatus)) {
        f(&mut self.status.write());
    }

    /// Mark as ready or not.
    pub fn set_ready(&self, ready: bool) {
        self.status.write().ready = ready;
    }

    /// Check if ready.
    pub fn is_ready(&self) -> bool {
        self.status.read().ready
    }
}

/// Health probe.
#[derive(Debug)]
pub struct HealthProbe {
    status: RwLock<HealthStatus>,
}

impl HealthProbe {
    /// Create a new health probe.
    pub fn new() -> Self {
        Self {
            status: RwLock::new(HealthStatus::healthy()),
        }
    }

    /// Get current health status.
    pub fn status(&self) -> HealthStatus {
        self.status.read().clone()
    }

    /// Mark as healthy.
    pub fn set_healthy(&self) {
        *self.status.write() = HealthStatus::healthy();
    }

    /// Mark as unhealthy.
    pub fn set_unhealthy(&self, message: impl Into<String>) {
        *self.status.write() = HealthStatus::unhealthy(message);
    }

    /// Check if healthy.
    pub fn is_healthy(&self) -> bool {
        self.status.read().healthy
    }
}

impl Default for HealthProbe {
    fn default() -> Self {
        Self::new()
    }
}
