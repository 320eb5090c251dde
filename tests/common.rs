//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tenantplane::control::api::{ServiceMode, TenantRecord};
use tenantplane::control::capabilities::{CapabilityChange, CapabilityRecord};
use tenantplane::core::config::{Config, PoolConfig};
use tenantplane::core::error::{PlaneError, PlaneResult};
use tenantplane::core::ids::{InstanceId, TenantId};
use tenantplane::core::time::{ManualClock, Timestamp};
use tenantplane::instance::{InstancePool, InstanceSlot};
use tenantplane::store::{MemoryStore, MetadataStore, Versioned};

/// Create a minimal valid configuration file for a worker of `tenant_id`.
pub fn create_minimal_config(tenant_id: u64) -> NamedTempFile {
    write_config(&format!("[worker]\ntenant_id = {}\n", tenant_id))
}

/// Create a configuration backed by a file store.
pub fn create_file_store_config(tenant_id: u64, store_path: &str) -> NamedTempFile {
    write_config(&format!(
        r#"
[worker]
tenant_id = {}
pool_owner = true

[store]
mode = "file"
path = "{}"

[pool]
reclaim_interval_ms = 1000
preallocated_count = 5

[capabilities]
refresh_interval_ms = 100
max_propagation_ms = 2000
"#,
        tenant_id, store_path
    ))
}

/// Write arbitrary config text to a temp file.
pub fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Load a config from a temp file.
pub fn load_config(file: &NamedTempFile) -> Config {
    Config::from_file(file.path()).expect("Failed to load config")
}

/// Create a temporary directory for test data.
pub fn temp_test_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// A manual clock starting at one second past the epoch.
pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Timestamp::from_millis(1_000)))
}

/// An empty in-memory metadata store.
pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

/// Provision a tenant and return its id.
pub fn create_tenant(store: &dyn MetadataStore, name: &str) -> TenantId {
    store
        .create_tenant(name, None, ServiceMode::Explicit, Timestamp::from_millis(1))
        .expect("Failed to create tenant")
        .id
}

/// A pool with default settings over `store` and `clock`.
pub fn test_pool(store: Arc<MemoryStore>, clock: Arc<ManualClock>) -> InstancePool {
    InstancePool::new(store, clock, &PoolConfig::default())
}

// ============================================================================
// Capability outage
// ============================================================================

/// Store whose capability tables can be made unreachable while tenant and
/// slot tables keep working.
#[derive(Debug)]
pub struct CapabilityOutageStore {
    inner: Arc<MemoryStore>,
    capabilities_up: AtomicBool,
}

impl CapabilityOutageStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            capabilities_up: AtomicBool::new(true),
        }
    }

    pub fn set_capabilities_available(&self, available: bool) {
        self.capabilities_up.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> PlaneResult<()> {
        if self.capabilities_up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PlaneError::unavailable("capability tables unreachable"))
        }
    }
}

impl MetadataStore for CapabilityOutageStore {
    fn create_tenant(
        &self,
        name: &str,
        requested_id: Option<TenantId>,
        service_mode: ServiceMode,
        now: Timestamp,
    ) -> PlaneResult<TenantRecord> {
        self.inner.create_tenant(name, requested_id, service_mode, now)
    }

    fn get_tenant(&self, tenant_id: TenantId) -> PlaneResult<Option<TenantRecord>> {
        self.inner.get_tenant(tenant_id)
    }

    fn find_tenant(&self, name: &str) -> PlaneResult<Option<TenantRecord>> {
        self.inner.find_tenant(name)
    }

    fn list_tenants(&self) -> PlaneResult<Vec<TenantRecord>> {
        self.inner.list_tenants()
    }

    fn delete_tenant(&self, tenant_id: TenantId, now: Timestamp) -> PlaneResult<TenantRecord> {
        self.inner.delete_tenant(tenant_id, now)
    }

    fn scan_slots(&self, tenant_id: TenantId) -> PlaneResult<Vec<Versioned<InstanceSlot>>> {
        self.inner.scan_slots(tenant_id)
    }

    fn get_slot(
        &self,
        tenant_id: TenantId,
        instance_id: InstanceId,
    ) -> PlaneResult<Option<Versioned<InstanceSlot>>> {
        self.inner.get_slot(tenant_id, instance_id)
    }

    fn insert_slot(&self, slot: InstanceSlot) -> PlaneResult<u64> {
        self.inner.insert_slot(slot)
    }

    fn update_slot(&self, expected_version: u64, slot: InstanceSlot) -> PlaneResult<u64> {
        self.inner.update_slot(expected_version, slot)
    }

    fn delete_slot(
        &self,
        tenant_id: TenantId,
        instance_id: InstanceId,
        expected_version: u64,
    ) -> PlaneResult<()> {
        self.inner.delete_slot(tenant_id, instance_id, expected_version)
    }

    fn capability_version(&self, tenant_id: TenantId) -> PlaneResult<u64> {
        self.check()?;
        self.inner.capability_version(tenant_id)
    }

    fn read_capabilities(&self, tenant_id: TenantId) -> PlaneResult<CapabilityRecord> {
        self.check()?;
        self.inner.read_capabilities(tenant_id)
    }

    fn write_capabilities(
        &self,
        tenant_id: TenantId,
        changes: &[CapabilityChange],
    ) -> PlaneResult<u64> {
        self.check()?;
        self.inner.write_capabilities(tenant_id, changes)
    }
}

/// Assert that a result is Ok and return the value.
#[track_caller]
pub fn assert_ok<T, E: std::fmt::Debug>(result: Result<T, E>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => panic!("Expected Ok, got Err: {:?}", e),
    }
}

/// Assert that a result is Err.
#[track_caller]
pub fn assert_err<T: std::fmt::Debug, E>(result: Result<T, E>) -> E {
    match result {
        Ok(v) => panic!("Expected Err, got Ok: {:?}", v),
        Err(e) => e,
    }
}
