//! Central metadata store.
//!
//! The store holds the three tables shared by every worker in the cluster:
//! tenant records, instance slots, and tenant capabilities. Every write is
//! either conditional (slot rows carry a version that must match) or
//! serialized by the backend, so concurrent workers never both win.
//!
//! # Modules
//!
//! - [`state`] - In-memory table state and the operations over it
//! - [`memory`] - Process-local backend
//! - [`file`] - Shared on-disk backend for multi-process deployments

pub mod file;
pub mod memory;
pub mod state;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use state::StoreState;

use crate::control::api::{ServiceMode, TenantRecord};
use crate::control::capabilities::{CapabilityChange, CapabilityRecord};
use crate::core::config::{StoreConfig, StoreMode};
use crate::core::error::PlaneResult;
use crate::core::ids::{InstanceId, TenantId};
use crate::core::time::Timestamp;
use crate::instance::slot::InstanceSlot;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A row together with the version it was written at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// Row contents.
    pub value: T,
    /// Version assigned by the store on the last write.
    pub version: u64,
}

/// Operations every metadata store backend provides.
pub trait MetadataStore: Send + Sync + std::fmt::Debug {
    /// Create a tenant. Picks the next unused id when `requested_id` is `None`.
    fn create_tenant(
        &self,
        name: &str,
        requested_id: Option<TenantId>,
        service_mode: ServiceMode,
        now: Timestamp,
    ) -> PlaneResult<TenantRecord>;

    /// Look up a tenant by id.
    fn get_tenant(&self, tenant_id: TenantId) -> PlaneResult<Option<TenantRecord>>;

    /// Look up a tenant by name.
    fn find_tenant(&self, name: &str) -> PlaneResult<Option<TenantRecord>>;

    /// All tenants ordered by id.
    fn list_tenants(&self) -> PlaneResult<Vec<TenantRecord>>;

    /// Drop a tenant together with its slots and capabilities.
    fn delete_tenant(&self, tenant_id: TenantId, now: Timestamp) -> PlaneResult<TenantRecord>;

    /// All slot rows of a tenant ordered by instance id.
    fn scan_slots(&self, tenant_id: TenantId) -> PlaneResult<Vec<Versioned<InstanceSlot>>>;

    /// A single slot row.
    fn get_slot(
        &self,
        tenant_id: TenantId,
        instance_id: InstanceId,
    ) -> PlaneResult<Option<Versioned<InstanceSlot>>>;

    /// Insert a new slot row; fails with a conflict if the row exists.
    fn insert_slot(&self, slot: InstanceSlot) -> PlaneResult<u64>;

    /// Replace a slot row if it is still at `expected_version`.
    fn update_slot(&self, expected_version: u64, slot: InstanceSlot) -> PlaneResult<u64>;

    /// Delete a slot row if it is still at `expected_version`.
    fn delete_slot(
        &self,
        tenant_id: TenantId,
        instance_id: InstanceId,
        expected_version: u64,
    ) -> PlaneResult<()>;

    /// Capability version of a tenant; zero if never written.
    fn capability_version(&self, tenant_id: TenantId) -> PlaneResult<u64>;

    /// Full capability record of a tenant.
    fn read_capabilities(&self, tenant_id: TenantId) -> PlaneResult<CapabilityRecord>;

    /// Apply capability changes as a single new version.
    fn write_capabilities(
        &self,
        tenant_id: TenantId,
        changes: &[CapabilityChange],
    ) -> PlaneResult<u64>;
}

/// A backend that exposes the table state under a read or write lock.
///
/// Every [`StateBackend`] is a [`MetadataStore`]: each operation runs
/// against [`StoreState`] inside one critical section.
pub trait StateBackend: Send + Sync + std::fmt::Debug {
    /// Run `f` against a consistent view of the state.
    fn with_read<R>(&self, f: impl FnOnce(&StoreState) -> PlaneResult<R>) -> PlaneResult<R>;

    /// Run `f` against the state and persist the result if it succeeds.
    fn with_write<R>(&self, f: impl FnOnce(&mut StoreState) -> PlaneResult<R>) -> PlaneResult<R>;
}

impl<B: StateBackend> MetadataStore for B {
    fn create_tenant(
        &self,
        name: &str,
        requested_id: Option<TenantId>,
        service_mode: ServiceMode,
        now: Timestamp,
    ) -> PlaneResult<TenantRecord> {
        self.with_write(|s| s.create_tenant(name, requested_id, service_mode, now))
    }

    fn get_tenant(&self, tenant_id: TenantId) -> PlaneResult<Option<TenantRecord>> {
        self.with_read(|s| Ok(s.get_tenant(tenant_id)))
    }

    fn find_tenant(&self, name: &str) -> PlaneResult<Option<TenantRecord>> {
        self.with_read(|s| Ok(s.find_tenant(name)))
    }

    fn list_tenants(&self) -> PlaneResult<Vec<TenantRecord>> {
        self.with_read(|s| Ok(s.list_tenants()))
    }

    fn delete_tenant(&self, tenant_id: TenantId, now: Timestamp) -> PlaneResult<TenantRecord> {
        self.with_write(|s| s.delete_tenant(tenant_id, now))
    }

    fn scan_slots(&self, tenant_id: TenantId) -> PlaneResult<Vec<Versioned<InstanceSlot>>> {
        self.with_read(|s| Ok(s.scan_slots(tenant_id)))
    }

    fn get_slot(
        &self,
        tenant_id: TenantId,
        instance_id: InstanceId,
    ) -> PlaneResult<Option<Versioned<InstanceSlot>>> {
        self.with_read(|s| Ok(s.get_slot(tenant_id, instance_id)))
    }

    fn insert_slot(&self, slot: InstanceSlot) -> PlaneResult<u64> {
        self.with_write(|s| s.insert_slot(slot))
    }

    fn update_slot(&self, expected_version: u64, slot: InstanceSlot) -> PlaneResult<u64> {
        self.with_write(|s| s.update_slot(expected_version, slot))
    }

    fn delete_slot(
        &self,
        tenant_id: TenantId,
        instance_id: InstanceId,
        expected_version: u64,
    ) -> PlaneResult<()> {
        self.with_write(|s| s.delete_slot(tenant_id, instance_id, expected_version))
    }

    fn capability_version(&self, tenant_id: TenantId) -> PlaneResult<u64> {
        self.with_read(|s| Ok(s.capability_version(tenant_id)))
    }

    fn read_capabilities(&self, tenant_id: TenantId) -> PlaneResult<CapabilityRecord> {
        self.with_read(|s| Ok(s.read_capabilities(tenant_id)))
    }

    fn write_capabilities(
        &self,
        tenant_id: TenantId,
        changes: &[CapabilityChange],
    ) -> PlaneResult<u64> {
        self.with_write(|s| s.write_capabilities(tenant_id, changes))
    }
}

/// Open the store described by the configuration.
pub fn open(config: &StoreConfig) -> PlaneResult<Arc<dyn MetadataStore>> {
    match config.mode {
        StoreMode::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreMode::File => Ok(Arc::new(FileStore::open(&config.path)?)),
    }
}
