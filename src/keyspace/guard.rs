//! Key-space boundary guard.
//!
//! A worker is assigned a tenant and handed a key codec. Before it serves
//! anything the two must agree: the codec's keyspace has to sit entirely
//! inside the assigned tenant's keyspace. A mismatch is fatal. Validation
//! is pure and performs no I/O.

use crate::core::error::{PlaneError, PlaneResult};
use crate::core::ids::TenantId;
use crate::keyspace::codec::{pretty_key, tenant_span, KeySpan, TenantCodec};

/// Validate a codec against the assigned tenant.
///
/// Returns a [`BoundaryGuard`] for per-key checks on success, or
/// [`PlaneError::KeyspaceViolation`] if the codec implies a different tenant.
pub fn validate(assigned: TenantId, codec: &TenantCodec) -> PlaneResult<BoundaryGuard> {
    let implied = codec.implied_tenant()?;
    let assigned_span = tenant_span(assigned);
    let codec_span = tenant_span(implied);

    if implied != assigned || !assigned_span.contains_span(&codec_span) {
        return Err(PlaneError::KeyspaceViolation {
            key: pretty_key(&codec_span.start),
            keyspace: assigned_span.pretty(),
        });
    }

    Ok(BoundaryGuard {
        tenant_id: assigned,
        span: assigned_span,
    })
}

/// Validated keyspace boundary of a worker.
#[derive(Debug, Clone)]
pub struct BoundaryGuard {
    tenant_id: TenantId,
    span: KeySpan,
}

impl BoundaryGuard {
    /// Tenant the guard protects.
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Keyspace the worker may touch.
    pub fn span(&self) -> &KeySpan {
        &self.span
    }

    /// Reject a key outside the tenant keyspace.
    pub fn check_key(&self, key: &[u8]) -> PlaneResult<()> {
        if self.span.contains_key(key) {
            Ok(())
        } else {
            Err(PlaneError::KeyspaceViolation {
                key: pretty_key(key),
                keyspace: self.span.pretty(),
            })
        }
    }

    /// Reject a span that is not fully inside the tenant keyspace.
    pub fn check_span(&self, span: &KeySpan) -> PlaneResult<()> {
        if self.span.contains_span(span) {
            Ok(())
        } else {
            Err(PlaneError::KeyspaceViolation {
                key: span.pretty(),
                keyspace: self.span.pretty(),
            })
        }
    }

    /// Per-access check that only runs in debug and test builds.
    #[inline]
    pub fn debug_check_key(&self, key: &[u8]) -> PlaneResult<()> {
        #[cfg(debug_assertions)]
        {
            self.check_key(key)
        }
        #[cfg(not(debug_assertions))]
        {
            let _ = key;
            Ok(())
        }
    }
}
