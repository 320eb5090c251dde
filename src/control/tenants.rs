//! Tenant directory.
//!
//! Thin layer over the metadata store that resolves tenant references and
//! logs lifecycle changes. Tenant ids are never reused: a dropped tenant's
//! id stays retired.

use crate::control::api::{ServiceMode, TenantRecord};
use crate::core::error::{PlaneError, PlaneResult};
use crate::core::ids::TenantId;
use crate::core::time::Clock;
use crate::store::MetadataStore;
use std::sync::Arc;

/// A tenant named either by name or by `[id]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantRef {
    /// Tenant name.
    Name(String),
    /// Tenant id.
    Id(TenantId),
}

impl TenantRef {
    /// Parse `name` or `[id]`.
    pub fn parse(s: &str) -> PlaneResult<Self> {
        let s = s.trim();
        if let Some(inner) = s.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            let id: TenantId = inner.trim().parse().map_err(|_| {
                PlaneError::invalid_statement(format!("invalid tenant id {:?}", inner))
            })?;
            return Ok(Self::Id(id));
        }
        if s.is_empty() {
            return Err(PlaneError::invalid_statement("missing tenant name"));
        }
        Ok(Self::Name(s.to_string()))
    }
}

impl std::fmt::Display for TenantRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Id(id) => write!(f, "[{}]", id),
        }
    }
}

impl From<TenantId> for TenantRef {
    fn from(id: TenantId) -> Self {
        Self::Id(id)
    }
}

/// Creates, drops and looks up tenants.
#[derive(Debug, Clone)]
pub struct TenantDirectory {
    store: Arc<dyn MetadataStore>,
    clock: Arc<dyn Clock>,
}

impl TenantDirectory {
    /// Create a directory over a metadata store.
    pub fn new(store: Arc<dyn MetadataStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Provision a tenant.
    pub fn create(
        &self,
        name: &str,
        requested_id: Option<TenantId>,
        service_mode: ServiceMode,
    ) -> PlaneResult<TenantRecord> {
        let record = self
            .store
            .create_tenant(name, requested_id, service_mode, self.clock.now())?;
        tracing::info!(
            tenant_id = %record.id,
            name = %record.name,
            service_mode = %record.service_mode,
            "created tenant"
        );
        Ok(record)
    }

    /// Drop a tenant. Refused while it has live instances.
    pub fn drop_tenant(&self, tenant: &TenantRef) -> PlaneResult<TenantRecord> {
        let record = self.resolve(tenant)?;
        let dropped = self.store.delete_tenant(record.id, self.clock.now())?;
        tracing::info!(tenant_id = %dropped.id, name = %dropped.name, "dropped tenant");
        Ok(dropped)
    }

    /// Resolve a reference to its record.
    pub fn resolve(&self, tenant: &TenantRef) -> PlaneResult<TenantRecord> {
        let found = match tenant {
            TenantRef::Name(name) => self.store.find_tenant(name)?,
            TenantRef::Id(id) => self.store.get_tenant(*id)?,
        };
        found.ok_or_else(|| PlaneError::TenantNotFound {
            tenant: tenant.to_string(),
        })
    }

    /// Tenant by id.
    pub fn get(&self, tenant_id: TenantId) -> PlaneResult<Option<TenantRecord>> {
        self.store.get_tenant(tenant_id)
    }

    /// All tenants ordered by id.
    pub fn list(&self) -> PlaneResult<Vec<TenantRecord>> {
        self.store.list_tenants()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::{ManualClock, Timestamp};
    use crate::store::MemoryStore;

    fn directory() -> TenantDirectory {
        TenantDirectory::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(Timestamp::from_millis(1))),
        )
    }

    #[test]
    fn tenant_ref_parsing() {
        assert_eq!(
            TenantRef::parse("[7]").unwrap(),
            TenantRef::Id(TenantId::new(7).unwrap())
        );
        assert_eq!(
            TenantRef::parse("app").unwrap(),
            TenantRef::Name("app".to_string())
        );
        assert!(TenantRef::parse("[0]").is_err());
        assert!(TenantRef::parse("[x]").is_err());
    }

    #[test]
    fn create_resolve_drop() {
        let dir = directory();
        let record = dir.create("app", None, ServiceMode::Explicit).unwrap();
        assert_eq!(dir.resolve(&TenantRef::Name("app".into())).unwrap(), record);
        assert_eq!(dir.resolve(&record.id.into()).unwrap(), record);

        dir.drop_tenant(&TenantRef::Name("app".into())).unwrap();
        assert!(matches!(
            dir.resolve(&record.id.into()),
            Err(PlaneError::TenantNotFound { .. })
        ));
        assert_eq!(dir.list().unwrap().len(), 1);
    }
}
