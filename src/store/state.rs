//! Table state shared by all store backends.
//!
//! Operations validate before they mutate, so a failed operation leaves
//! the state untouched.

use crate::control::api::{validate_tenant_name, ServiceMode, TenantRecord};
use crate::control::capabilities::{CapabilityChange, CapabilityRecord};
use crate::core::error::{PlaneError, PlaneResult};
use crate::core::ids::{InstanceId, TenantId};
use crate::core::time::Timestamp;
use crate::instance::slot::{InstanceSlot, SlotState};
use crate::store::Versioned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Name of the tenant that exists in every store.
pub const SYSTEM_TENANT_NAME: &str = "system";

/// The tenant, slot, and capability tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreState {
    next_version: u64,
    tenants: BTreeMap<TenantId, TenantRecord>,
    /// Ids of dropped tenants; never handed out again.
    retired_tenants: BTreeSet<TenantId>,
    slots: BTreeMap<(TenantId, InstanceId), Versioned<InstanceSlot>>,
    capabilities: BTreeMap<TenantId, CapabilityRecord>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreState {
    /// Fresh state containing only the system tenant.
    pub fn new() -> Self {
        let mut tenants = BTreeMap::new();
        tenants.insert(
            TenantId::SYSTEM,
            TenantRecord::new(
                TenantId::SYSTEM,
                SYSTEM_TENANT_NAME,
                ServiceMode::SharedProcess,
                Timestamp::zero(),
            ),
        );
        Self {
            next_version: 1,
            tenants,
            retired_tenants: BTreeSet::new(),
            slots: BTreeMap::new(),
            capabilities: BTreeMap::new(),
        }
    }

    fn bump_version(&mut self) -> u64 {
        let version = self.next_version;
        self.next_version += 1;
        version
    }

    fn require_tenant(&self, tenant_id: TenantId) -> PlaneResult<()> {
        if self.tenants.contains_key(&tenant_id) {
            Ok(())
        } else {
            Err(PlaneError::TenantNotFound {
                tenant: tenant_id.to_string(),
            })
        }
    }

    // ------------------------------------------------------------------
    // Tenants
    // ------------------------------------------------------------------

    /// Create a tenant.
    pub fn create_tenant(
        &mut self,
        name: &str,
        requested_id: Option<TenantId>,
        service_mode: ServiceMode,
        now: Timestamp,
    ) -> PlaneResult<TenantRecord> {
        if !validate_tenant_name(name) {
            return Err(PlaneError::invalid_statement(format!(
                "invalid tenant name {:?}",
                name
            )));
        }
        if self.find_tenant(name).is_some() {
            return Err(PlaneError::TenantExists {
                tenant: name.to_string(),
            });
        }

        let id = match requested_id {
            Some(id) => {
                if self.tenants.contains_key(&id) || self.retired_tenants.contains(&id) {
                    return Err(PlaneError::TenantExists {
                        tenant: id.to_string(),
                    });
                }
                id
            }
            None => {
                let highest = self
                    .tenants
                    .keys()
                    .chain(self.retired_tenants.iter())
                    .copied()
                    .max()
                    .unwrap_or(TenantId::SYSTEM);
                highest
                    .next()
                    .ok_or_else(|| PlaneError::internal("tenant id space exhausted"))?
            }
        };

        let record = TenantRecord::new(id, name, service_mode, now);
        self.tenants.insert(id, record.clone());
        Ok(record)
    }

    /// Tenant by id.
    pub fn get_tenant(&self, tenant_id: TenantId) -> Option<TenantRecord> {
        self.tenants.get(&tenant_id).cloned()
    }

    /// Tenant by name.
    pub fn find_tenant(&self, name: &str) -> Option<TenantRecord> {
        self.tenants.values().find(|t| t.name == name).cloned()
    }

    /// All tenants.
    pub fn list_tenants(&self) -> Vec<TenantRecord> {
        self.tenants.values().cloned().collect()
    }

    /// Drop a tenant. Refused while any of its slots is live.
    pub fn delete_tenant(&mut self, tenant_id: TenantId, now: Timestamp) -> PlaneResult<TenantRecord> {
        if tenant_id.is_system() {
            return Err(PlaneError::invalid_statement("cannot drop the system tenant"));
        }
        self.require_tenant(tenant_id)?;

        let live = self
            .scan_slots(tenant_id)
            .iter()
            .filter(|row| row.value.state(now) == SlotState::Live)
            .count();
        if live > 0 {
            return Err(PlaneError::TenantInUse { tenant_id, live });
        }

        self.slots.retain(|(tenant, _), _| *tenant != tenant_id);
        self.capabilities.remove(&tenant_id);
        self.retired_tenants.insert(tenant_id);
        self.tenants
            .remove(&tenant_id)
            .ok_or_else(|| PlaneError::internal("tenant vanished during drop"))
    }

    // ------------------------------------------------------------------
    // Instance slots
    // ------------------------------------------------------------------

    /// Slots of a tenant in instance id order.
    pub fn scan_slots(&self, tenant_id: TenantId) -> Vec<Versioned<InstanceSlot>> {
        self.slots
            .range((tenant_id, InstanceId::MIN)..=(tenant_id, InstanceId::MAX))
            .map(|(_, row)| row.clone())
            .collect()
    }

    /// One slot.
    pub fn get_slot(&self, tenant_id: TenantId, instance_id: InstanceId) -> Option<Versioned<InstanceSlot>> {
        self.slots.get(&(tenant_id, instance_id)).cloned()
    }

    /// Insert a slot that must not exist yet.
    pub fn insert_slot(&mut self, slot: InstanceSlot) -> PlaneResult<u64> {
        self.require_tenant(slot.tenant_id)?;
        let key = (slot.tenant_id, slot.instance_id);
        if self.slots.contains_key(&key) {
            return Err(PlaneError::conflict(format!(
                "slot {}/{} already exists",
                slot.tenant_id, slot.instance_id
            )));
        }
        let version = self.bump_version();
        self.slots.insert(key, Versioned { value: slot, version });
        Ok(version)
    }

    /// Compare-and-swap a slot.
    pub fn update_slot(&mut self, expected_version: u64, slot: InstanceSlot) -> PlaneResult<u64> {
        let key = (slot.tenant_id, slot.instance_id);
        match self.slots.get(&key) {
            Some(row) if row.version == expected_version => {}
            Some(row) => {
                return Err(PlaneError::conflict(format!(
                    "slot {}/{} at version {}, expected {}",
                    slot.tenant_id, slot.instance_id, row.version, expected_version
                )))
            }
            None => {
                return Err(PlaneError::conflict(format!(
                    "slot {}/{} does not exist",
                    slot.tenant_id, slot.instance_id
                )))
            }
        }
        let version = self.bump_version();
        self.slots.insert(key, Versioned { value: slot, version });
        Ok(version)
    }

    /// Compare-and-delete a slot.
    pub fn delete_slot(
        &mut self,
        tenant_id: TenantId,
        instance_id: InstanceId,
        expected_version: u64,
    ) -> PlaneResult<()> {
        let key = (tenant_id, instance_id);
        match self.slots.get(&key) {
            Some(row) if row.version == expected_version => {
                self.slots.remove(&key);
                Ok(())
            }
            _ => Err(PlaneError::conflict(format!(
                "slot {}/{} changed before delete",
                tenant_id, instance_id
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Capabilities
    // ------------------------------------------------------------------

    /// Capability version of a tenant.
    pub fn capability_version(&self, tenant_id: TenantId) -> u64 {
        self.capabilities
            .get(&tenant_id)
            .map(|record| record.version)
            .unwrap_or(0)
    }

    /// Capability record of a tenant.
    pub fn read_capabilities(&self, tenant_id: TenantId) -> CapabilityRecord {
        self.capabilities
            .get(&tenant_id)
            .cloned()
            .unwrap_or_else(|| CapabilityRecord::empty(tenant_id))
    }

    /// Apply capability changes.
    pub fn write_capabilities(
        &mut self,
        tenant_id: TenantId,
        changes: &[CapabilityChange],
    ) -> PlaneResult<u64> {
        self.require_tenant(tenant_id)?;
        let record = self
            .capabilities
            .entry(tenant_id)
            .or_insert_with(|| CapabilityRecord::empty(tenant_id));
        record.apply(changes);
        Ok(record.version)
    }
}
