//! Instance slot rows.
//!
//! One row per `(tenant_id, instance_id)`:
//! `InstanceSlot{address?, session?, expires_at?}`
//!
//! - no address: unclaimed, ready to be claimed
//! - address and `expires_at` in the future: live
//! - address and `expires_at` at or before now: expired, still occupying
//!   its instance id until the reclaim loop recycles or deletes it

use crate::core::ids::{InstanceId, SessionId, TenantId};
use crate::core::time::Timestamp;
use serde::{Deserialize, Serialize};

/// Derived lifecycle state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotState {
    /// Preallocated, not held by any worker.
    Unclaimed,
    /// Held by a worker whose lease has not lapsed.
    Live,
    /// Held by a worker whose lease lapsed or was released.
    Expired,
}

impl std::fmt::Display for SlotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unclaimed => write!(f, "unclaimed"),
            Self::Live => write!(f, "live"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// A row in the instance slot table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSlot {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Instance id reserved by this row.
    pub instance_id: InstanceId,
    /// Address of the worker holding the slot; `None` while unclaimed.
    pub address: Option<String>,
    /// Session of the worker holding the slot.
    pub session_id: Option<SessionId>,
    /// Lease expiration of the holder.
    pub expires_at: Option<Timestamp>,
}

impl InstanceSlot {
    /// Create an unclaimed slot.
    pub fn unclaimed(tenant_id: TenantId, instance_id: InstanceId) -> Self {
        Self {
            tenant_id,
            instance_id,
            address: None,
            session_id: None,
            expires_at: None,
        }
    }

    /// This slot as claimed by a worker until `expires_at`.
    pub fn claimed_by(
        &self,
        address: impl Into<String>,
        session_id: SessionId,
        expires_at: Timestamp,
    ) -> Self {
        Self {
            tenant_id: self.tenant_id,
            instance_id: self.instance_id,
            address: Some(address.into()),
            session_id: Some(session_id),
            expires_at: Some(expires_at),
        }
    }

    /// This slot returned to the unclaimed pool.
    pub fn reset(&self) -> Self {
        Self::unclaimed(self.tenant_id, self.instance_id)
    }

    /// Lifecycle state at `now`.
    pub fn state(&self, now: Timestamp) -> SlotState {
        match (&self.address, self.expires_at) {
            (None, _) => SlotState::Unclaimed,
            (Some(_), Some(deadline)) if !now.is_at_or_after(deadline) => SlotState::Live,
            (Some(_), _) => SlotState::Expired,
        }
    }

    /// Check if `session_id` holds this slot.
    pub fn is_held_by(&self, session_id: SessionId) -> bool {
        self.address.is_some() && self.session_id == Some(session_id)
    }
}
