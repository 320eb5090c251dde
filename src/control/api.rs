//! Tenant records stored in the central metadata store.
//!
//! The metadata store is the source of truth for which tenants exist and
//! how their workers are run; workers only ever read these records.

use crate::core::ids::TenantId;
use crate::core::time::Timestamp;
use serde::{Deserialize, Serialize};

/// How workers for a tenant are run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ServiceMode {
    /// Workers are kept running at all times.
    AlwaysOn,
    /// Workers are started and stopped explicitly by an operator.
    #[default]
    Explicit,
    /// Workers run inside the host process alongside the system tenant.
    SharedProcess,
}

impl ServiceMode {
    /// Parse a service mode keyword (`always_on`, `explicit`/`external`, `shared`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "always_on" | "always-on" | "alwayson" => Some(Self::AlwaysOn),
            "explicit" | "external" | "none" => Some(Self::Explicit),
            "shared" | "shared_process" | "shared-process" => Some(Self::SharedProcess),
            _ => None,
        }
    }
}

impl std::fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlwaysOn => write!(f, "always_on"),
            Self::Explicit => write!(f, "explicit"),
            Self::SharedProcess => write!(f, "shared"),
        }
    }
}

/// A provisioned tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRecord {
    /// Cluster-wide tenant id.
    pub id: TenantId,
    /// Operator-facing unique name.
    pub name: String,
    /// How the tenant's workers are run.
    pub service_mode: ServiceMode,
    /// Creation time.
    pub created_at: Timestamp,
}

impl TenantRecord {
    /// Create a new tenant record.
    pub fn new(id: TenantId, name: impl Into<String>, service_mode: ServiceMode, now: Timestamp) -> Self {
        Self {
            id,
            name: name.into(),
            service_mode,
            created_at: now,
        }
    }
}

/// Check that a tenant name is usable: lowercase alphanumerics and `-`,
/// starting with a letter, at most 100 characters.
pub fn validate_tenant_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && name.len() <= 100
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_mode_parse() {
        assert_eq!(ServiceMode::parse("SHARED"), Some(ServiceMode::SharedProcess));
        assert_eq!(ServiceMode::parse("external"), Some(ServiceMode::Explicit));
        assert_eq!(ServiceMode::parse("always_on"), Some(ServiceMode::AlwaysOn));
        assert_eq!(ServiceMode::parse("bogus"), None);
    }

    #[test]
    fn tenant_names() {
        assert!(validate_tenant_name("processdebug"));
        assert!(validate_tenant_name("app-2"));
        assert!(!validate_tenant_name("2app"));
        assert!(!validate_tenant_name("App"));
        assert!(!validate_tenant_name(""));
    }
}
