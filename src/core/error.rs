//! Error types and classification.
//!
//! Capability denial is deliberately absent: a denied privileged operation
//! is an ordinary [`crate::control::gate::GateOutcome::Forbidden`] value,
//! not an error.

use crate::core::ids::{InstanceId, TenantId};
use thiserror::Error;

/// Errors raised by the tenant control plane.
#[derive(Debug, Error)]
pub enum PlaneError {
    /// A key or codec falls outside the tenant's assigned keyspace.
    ///
    /// Fatal at startup: the worker must not serve.
    #[error("requested key {key} not fully contained in tenant keyspace {keyspace}")]
    KeyspaceViolation { key: String, keyspace: String },

    /// A key could not be decoded as a tenant-prefixed key.
    #[error("invalid key encoding: {message}")]
    InvalidKey { message: String },

    /// No instance id could be claimed or created for the tenant.
    #[error("instance id pool exhausted for tenant {tenant_id}: {reason}")]
    PoolExhausted { tenant_id: TenantId, reason: String },

    /// A conditional write lost against a concurrent writer.
    #[error("conditional write conflict on {what}")]
    Conflict { what: String },

    /// The metadata store cannot be reached.
    #[error("metadata store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// The slot is no longer held by this session (expired or taken over).
    #[error("instance {instance_id} of tenant {tenant_id} is no longer held by this session")]
    SlotLost {
        tenant_id: TenantId,
        instance_id: InstanceId,
    },

    /// Tenant does not exist.
    #[error("tenant {tenant} not found")]
    TenantNotFound { tenant: String },

    /// Tenant already exists.
    #[error("tenant {tenant} already exists")]
    TenantExists { tenant: String },

    /// Tenant still has live instances and cannot be dropped.
    #[error("tenant {tenant_id} still has {live} live instance(s)")]
    TenantInUse { tenant_id: TenantId, live: usize },

    /// Capability name is not part of the catalogue.
    #[error("unknown capability: {name}")]
    UnknownCapability { name: String },

    /// Capability value does not parse for its kind.
    #[error("invalid value {value:?} for capability {kind}")]
    InvalidCapabilityValue { kind: String, value: String },

    /// Administrative statement could not be parsed.
    #[error("invalid statement: {message}")]
    InvalidStatement { message: String },

    /// Capability cache did not converge on the expected values in time.
    #[error("capabilities for tenant {tenant_id} did not converge within {waited_ms}ms: {pending}")]
    ConvergenceTimeout {
        tenant_id: TenantId,
        waited_ms: u64,
        pending: String,
    },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl PlaneError {
    /// Create a Conflict error.
    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict { what: what.into() }
    }

    /// Create a StoreUnavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Create an InvalidStatement error.
    pub fn invalid_statement(message: impl Into<String>) -> Self {
        Self::InvalidStatement {
            message: message.into(),
        }
    }

    /// Create an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if retrying the same operation may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::StoreUnavailable { .. } | Self::ConvergenceTimeout { .. }
        )
    }

    /// Check if this error must stop a worker that is starting up.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            Self::KeyspaceViolation { .. }
                | Self::InvalidKey { .. }
                | Self::PoolExhausted { .. }
                | Self::StoreUnavailable { .. }
                | Self::TenantNotFound { .. }
                | Self::SlotLost { .. }
        )
    }

    /// Stable machine-readable identifier for logs and metrics labels.
    pub fn code(&self) -> &'static str {
        match self {
            Self::KeyspaceViolation { .. } => "keyspace_violation",
            Self::InvalidKey { .. } => "invalid_key",
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::Conflict { .. } => "conflict",
            Self::StoreUnavailable { .. } => "store_unavailable",
            Self::SlotLost { .. } => "slot_lost",
            Self::TenantNotFound { .. } => "tenant_not_found",
            Self::TenantExists { .. } => "tenant_exists",
            Self::TenantInUse { .. } => "tenant_in_use",
            Self::UnknownCapability { .. } => "unknown_capability",
            Self::InvalidCapabilityValue { .. } => "invalid_capability_value",
            Self::InvalidStatement { .. } => "invalid_statement",
            Self::ConvergenceTimeout { .. } => "convergence_timeout",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type using PlaneError.
pub type PlaneResult<T> = Result<T, PlaneError>;
