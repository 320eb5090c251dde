//! Tenant capability catalogue and the authoritative capability store.
//!
//! Capabilities are per-tenant flags granted by an operator. The
//! authoritative copy lives in the metadata store; every grant or revoke
//! bumps the tenant's capability version, which is what worker caches
//! watch for.

use crate::core::error::{PlaneError, PlaneResult};
use crate::core::ids::TenantId;
use crate::store::MetadataStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Closed set of grantable capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// May relocate range replicas.
    CanAdminRelocateRange,
    /// May scatter ranges.
    CanAdminScatter,
    /// May split ranges.
    CanAdminSplit,
    /// May unsplit ranges.
    CanAdminUnsplit,
    /// May run consistency checks.
    CanCheckConsistency,
    /// May use process debugging endpoints (profiles, goroutine dumps, vmodule).
    CanDebugProcess,
    /// May use node-local storage.
    CanUseNodelocalStorage,
    /// May view node information.
    CanViewNodeInfo,
    /// May view time-series metrics.
    CanViewTsdbMetrics,
    /// Exempt from request rate limiting.
    ExemptFromRateLimiting,
    /// Opaque span configuration bounds.
    SpanConfigBounds,
}

impl CapabilityKind {
    /// Every capability kind, in catalogue order.
    pub const ALL: [CapabilityKind; 11] = [
        Self::CanAdminRelocateRange,
        Self::CanAdminScatter,
        Self::CanAdminSplit,
        Self::CanAdminUnsplit,
        Self::CanCheckConsistency,
        Self::CanDebugProcess,
        Self::CanUseNodelocalStorage,
        Self::CanViewNodeInfo,
        Self::CanViewTsdbMetrics,
        Self::ExemptFromRateLimiting,
        Self::SpanConfigBounds,
    ];

    /// Statement-level name of the capability.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CanAdminRelocateRange => "can_admin_relocate_range",
            Self::CanAdminScatter => "can_admin_scatter",
            Self::CanAdminSplit => "can_admin_split",
            Self::CanAdminUnsplit => "can_admin_unsplit",
            Self::CanCheckConsistency => "can_check_consistency",
            Self::CanDebugProcess => "can_debug_process",
            Self::CanUseNodelocalStorage => "can_use_nodelocal_storage",
            Self::CanViewNodeInfo => "can_view_node_info",
            Self::CanViewTsdbMetrics => "can_view_tsdb_metrics",
            Self::ExemptFromRateLimiting => "exempt_from_rate_limiting",
            Self::SpanConfigBounds => "span_config_bounds",
        }
    }

    /// Look up a capability by name (case-insensitive).
    pub fn parse(name: &str) -> PlaneResult<Self> {
        let lowered = name.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == lowered)
            .ok_or_else(|| PlaneError::UnknownCapability {
                name: name.trim().to_string(),
            })
    }

    /// Whether the capability carries a boolean value.
    pub fn is_boolean(&self) -> bool {
        !matches!(self, Self::SpanConfigBounds)
    }

    /// Value a tenant has when the capability was never granted.
    pub fn default_value(&self) -> CapabilityValue {
        if self.is_boolean() {
            CapabilityValue::Bool(false)
        } else {
            CapabilityValue::Text(String::new())
        }
    }

    /// Parse a textual value for this kind.
    pub fn parse_value(&self, raw: &str) -> PlaneResult<CapabilityValue> {
        let raw = raw.trim();
        if !self.is_boolean() {
            let unquoted = raw
                .strip_prefix('\'')
                .and_then(|r| r.strip_suffix('\''))
                .unwrap_or(raw);
            return Ok(CapabilityValue::Text(unquoted.to_string()));
        }
        match raw.to_ascii_lowercase().as_str() {
            "true" | "on" | "1" => Ok(CapabilityValue::Bool(true)),
            "false" | "off" | "0" => Ok(CapabilityValue::Bool(false)),
            _ => Err(PlaneError::InvalidCapabilityValue {
                kind: self.name().to_string(),
                value: raw.to_string(),
            }),
        }
    }

    fn accepts(&self, value: &CapabilityValue) -> bool {
        matches!(
            (self.is_boolean(), value),
            (true, CapabilityValue::Bool(_)) | (false, CapabilityValue::Text(_))
        )
    }
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Value of a capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapabilityValue {
    /// Boolean capability.
    Bool(bool),
    /// String capability.
    Text(String),
}

impl CapabilityValue {
    /// Whether the value grants a boolean capability.
    pub fn is_true(&self) -> bool {
        matches!(self, Self::Bool(true))
    }
}

impl std::fmt::Display for CapabilityValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Authoritative capability row set for one tenant.
///
/// Only non-default values are stored; a missing kind has its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    /// Tenant the capabilities belong to.
    pub tenant_id: TenantId,
    /// Incremented on every grant or revoke. Zero means never written.
    pub version: u64,
    /// Non-default capability values.
    pub values: BTreeMap<CapabilityKind, CapabilityValue>,
}

impl CapabilityRecord {
    /// Empty record at version zero.
    pub fn empty(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            version: 0,
            values: BTreeMap::new(),
        }
    }

    /// Effective value of a capability.
    pub fn get(&self, kind: CapabilityKind) -> CapabilityValue {
        self.values
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| kind.default_value())
    }

    /// Apply a batch of changes and bump the version.
    ///
    /// `None` or a default value removes the entry.
    pub fn apply(&mut self, changes: &[CapabilityChange]) {
        for change in changes {
            match &change.value {
                Some(value) if *value != change.kind.default_value() => {
                    self.values.insert(change.kind, value.clone());
                }
                _ => {
                    self.values.remove(&change.kind);
                }
            }
        }
        self.version += 1;
    }
}

/// One grant (`Some`) or revoke (`None`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityChange {
    /// Capability being changed.
    pub kind: CapabilityKind,
    /// New value, or `None` to revoke.
    pub value: Option<CapabilityValue>,
}

impl CapabilityChange {
    /// Grant a value.
    pub fn grant(kind: CapabilityKind, value: CapabilityValue) -> Self {
        Self {
            kind,
            value: Some(value),
        }
    }

    /// Revoke back to the default.
    pub fn revoke(kind: CapabilityKind) -> Self {
        Self { kind, value: None }
    }
}

/// Central, authoritative capability store.
///
/// Mutations are durable once they return and each produces a new
/// version for the tenant.
#[derive(Debug, Clone)]
pub struct CapabilityAuthority {
    store: Arc<dyn MetadataStore>,
}

impl CapabilityAuthority {
    /// Create an authority over a metadata store.
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    /// Grant a capability value. Returns the new version.
    pub fn grant(
        &self,
        tenant_id: TenantId,
        kind: CapabilityKind,
        value: CapabilityValue,
    ) -> PlaneResult<u64> {
        self.apply(tenant_id, &[CapabilityChange::grant(kind, value)])
    }

    /// Revoke a capability. Returns the new version.
    pub fn revoke(&self, tenant_id: TenantId, kind: CapabilityKind) -> PlaneResult<u64> {
        self.apply(tenant_id, &[CapabilityChange::revoke(kind)])
    }

    /// Apply several changes as one version bump.
    pub fn apply(&self, tenant_id: TenantId, changes: &[CapabilityChange]) -> PlaneResult<u64> {
        for change in changes {
            if let Some(value) = &change.value {
                if !change.kind.accepts(value) {
                    return Err(PlaneError::InvalidCapabilityValue {
                        kind: change.kind.name().to_string(),
                        value: value.to_string(),
                    });
                }
            }
        }
        let version = self.store.write_capabilities(tenant_id, changes)?;
        tracing::info!(
            tenant_id = %tenant_id,
            version,
            changes = changes.len(),
            "capabilities updated"
        );
        Ok(version)
    }

    /// Read the authoritative record.
    pub fn read(&self, tenant_id: TenantId) -> PlaneResult<CapabilityRecord> {
        self.store.read_capabilities(tenant_id)
    }

    /// Current authoritative version.
    pub fn version(&self, tenant_id: TenantId) -> PlaneResult<u64> {
        self.store.capability_version(tenant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_by_name() {
        for kind in CapabilityKind::ALL {
            assert_eq!(CapabilityKind::parse(kind.name()).unwrap(), kind);
        }
        assert_eq!(
            CapabilityKind::parse("CAN_DEBUG_PROCESS").unwrap(),
            CapabilityKind::CanDebugProcess
        );
        assert!(CapabilityKind::parse("can_fly").is_err());
    }

    #[test]
    fn boolean_values_parse() {
        let kind = CapabilityKind::CanDebugProcess;
        assert_eq!(kind.parse_value("true").unwrap(), CapabilityValue::Bool(true));
        assert_eq!(kind.parse_value("FALSE").unwrap(), CapabilityValue::Bool(false));
        assert!(kind.parse_value("maybe").is_err());
        assert_eq!(
            CapabilityKind::SpanConfigBounds.parse_value("'gc.ttl<=1h'").unwrap(),
            CapabilityValue::Text("gc.ttl<=1h".to_string())
        );
    }

    #[test]
    fn record_defaults_and_versioning() {
        let tenant = TenantId::new(3).unwrap();
        let mut record = CapabilityRecord::empty(tenant);
        assert_eq!(record.get(CapabilityKind::CanDebugProcess), CapabilityValue::Bool(false));

        record.apply(&[CapabilityChange::grant(
            CapabilityKind::CanDebugProcess,
            CapabilityValue::Bool(true),
        )]);
        assert_eq!(record.version, 1);
        assert!(record.get(CapabilityKind::CanDebugProcess).is_true());

        record.apply(&[CapabilityChange::revoke(CapabilityKind::CanDebugProcess)]);
        assert_eq!(record.version, 2);
        assert!(record.values.is_empty());
    }

    #[test]
    fn granting_default_value_removes_entry() {
        let mut record = CapabilityRecord::empty(TenantId::new(3).unwrap());
        record.apply(&[CapabilityChange::grant(
            CapabilityKind::CanViewNodeInfo,
            CapabilityValue::Bool(false),
        )]);
        assert!(record.values.is_empty());
        assert_eq!(record.version, 1);
    }
}
