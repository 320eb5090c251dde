//! Privileged operation gate.
//!
//! Debug and admin handlers ask the gate before acting. A tenant lacking
//! the required capability gets an explicit forbidden outcome with a
//! human-readable reason; denial is a normal result, not an error. The
//! system tenant holds every capability.

use crate::control::cache::CapabilityCache;
use crate::control::capabilities::CapabilityKind;
use crate::core::ids::TenantId;
use crate::ops::observability::PlaneMetrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Operations that require a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegedOperation {
    /// CPU or heap profile.
    DebugProfile,
    /// Stack dump of every task.
    DebugStacks,
    /// Changing per-module log verbosity.
    DebugVmodule,
    /// Node status and details.
    ViewNodeInfo,
    /// Time-series metrics queries.
    ViewTsdbMetrics,
    /// Range consistency checks.
    CheckConsistency,
    /// Range split.
    AdminSplit,
    /// Range unsplit.
    AdminUnsplit,
    /// Range scatter.
    AdminScatter,
    /// Range replica relocation.
    AdminRelocateRange,
    /// Node-local file storage.
    UseNodelocalStorage,
}

impl PrivilegedOperation {
    /// Every privileged operation.
    pub const ALL: [PrivilegedOperation; 11] = [
        Self::DebugProfile,
        Self::DebugStacks,
        Self::DebugVmodule,
        Self::ViewNodeInfo,
        Self::ViewTsdbMetrics,
        Self::CheckConsistency,
        Self::AdminSplit,
        Self::AdminUnsplit,
        Self::AdminScatter,
        Self::AdminRelocateRange,
        Self::UseNodelocalStorage,
    ];

    /// Operation name used in metrics and the CLI.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DebugProfile => "debug_profile",
            Self::DebugStacks => "debug_stacks",
            Self::DebugVmodule => "debug_vmodule",
            Self::ViewNodeInfo => "view_node_info",
            Self::ViewTsdbMetrics => "view_tsdb_metrics",
            Self::CheckConsistency => "check_consistency",
            Self::AdminSplit => "admin_split",
            Self::AdminUnsplit => "admin_unsplit",
            Self::AdminScatter => "admin_scatter",
            Self::AdminRelocateRange => "admin_relocate_range",
            Self::UseNodelocalStorage => "use_nodelocal_storage",
        }
    }

    /// Look up an operation by name.
    pub fn parse(name: &str) -> Option<Self> {
        let lowered = name.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|op| op.name() == lowered)
    }

    /// Capability that unlocks the operation.
    pub fn required_capability(&self) -> CapabilityKind {
        match self {
            Self::DebugProfile | Self::DebugStacks | Self::DebugVmodule => {
                CapabilityKind::CanDebugProcess
            }
            Self::ViewNodeInfo => CapabilityKind::CanViewNodeInfo,
            Self::ViewTsdbMetrics => CapabilityKind::CanViewTsdbMetrics,
            Self::CheckConsistency => CapabilityKind::CanCheckConsistency,
            Self::AdminSplit => CapabilityKind::CanAdminSplit,
            Self::AdminUnsplit => CapabilityKind::CanAdminUnsplit,
            Self::AdminScatter => CapabilityKind::CanAdminScatter,
            Self::AdminRelocateRange => CapabilityKind::CanAdminRelocateRange,
            Self::UseNodelocalStorage => CapabilityKind::CanUseNodelocalStorage,
        }
    }

    /// Reason reported when the operation is denied.
    pub fn denial_reason(&self) -> &'static str {
        match self.required_capability() {
            CapabilityKind::CanDebugProcess => {
                "tenant does not have capability to debug the running process"
            }
            CapabilityKind::CanViewNodeInfo => "tenant does not have capability to view node info",
            CapabilityKind::CanViewTsdbMetrics => {
                "tenant does not have capability to view timeseries metrics"
            }
            CapabilityKind::CanCheckConsistency => {
                "tenant does not have capability to check consistency"
            }
            CapabilityKind::CanAdminSplit => "tenant does not have capability to split ranges",
            CapabilityKind::CanAdminUnsplit => "tenant does not have capability to unsplit ranges",
            CapabilityKind::CanAdminScatter => "tenant does not have capability to scatter ranges",
            CapabilityKind::CanAdminRelocateRange => {
                "tenant does not have capability to relocate ranges"
            }
            CapabilityKind::CanUseNodelocalStorage => {
                "tenant does not have capability to use nodelocal storage"
            }
            CapabilityKind::ExemptFromRateLimiting | CapabilityKind::SpanConfigBounds => {
                "tenant does not have the required capability"
            }
        }
    }
}

impl std::fmt::Display for PrivilegedOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of asking the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateOutcome {
    /// The caller may proceed.
    Allowed,
    /// The caller must respond with a forbidden status.
    Forbidden {
        /// Human-readable denial reason.
        reason: String,
    },
}

impl GateOutcome {
    /// Check if the operation may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// HTTP-style status code for the outcome.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Allowed => 200,
            Self::Forbidden { .. } => 403,
        }
    }

    /// Denial reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Allowed => None,
            Self::Forbidden { reason } => Some(reason),
        }
    }
}

/// Checks privileged operations against the capability cache.
#[derive(Debug, Clone)]
pub struct CapabilityGate {
    cache: Arc<CapabilityCache>,
    metrics: Arc<PlaneMetrics>,
}

impl CapabilityGate {
    /// Create a gate reading from `cache`.
    pub fn new(cache: Arc<CapabilityCache>) -> Self {
        Self {
            cache,
            metrics: Arc::new(PlaneMetrics::new()),
        }
    }

    /// Report into a shared metrics collector.
    pub fn with_metrics(mut self, metrics: Arc<PlaneMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Decide whether `tenant_id` may perform `operation`.
    pub fn check(&self, tenant_id: TenantId, operation: PrivilegedOperation) -> GateOutcome {
        if tenant_id.is_system()
            || self
                .cache
                .is_allowed(tenant_id, operation.required_capability())
        {
            return GateOutcome::Allowed;
        }

        self.metrics.record_forbidden(operation.name());
        tracing::debug!(
            tenant_id = %tenant_id,
            operation = %operation,
            "privileged operation forbidden"
        );
        GateOutcome::Forbidden {
            reason: operation.denial_reason().to_string(),
        }
    }

    /// Run `handler` if the operation is allowed.
    pub fn run<T>(
        &self,
        tenant_id: TenantId,
        operation: PrivilegedOperation,
        handler: impl FnOnce() -> T,
    ) -> Result<T, GateOutcome> {
        match self.check(tenant_id, operation) {
            GateOutcome::Allowed => Ok(handler()),
            forbidden => Err(forbidden),
        }
    }
}
