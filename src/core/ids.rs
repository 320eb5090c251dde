//! Tenant, instance and session identifiers.
//!
//! Instance ids are bounded by the width of the instance field inside a
//! generated row id (see [`crate::instance::rowid`]); an [`InstanceId`]
//! value outside that range cannot be constructed.

use serde::{Deserialize, Serialize};
use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};
use twox_hash::XxHash64;

/// Number of low-order bits of a row id reserved for the instance id.
pub const INSTANCE_ID_BITS: u32 = 15;

/// Largest instance id that fits in the row id instance field.
pub const MAX_INSTANCE_ID: u32 = (1 << INSTANCE_ID_BITS) - 1;

/// Cluster-wide tenant identifier. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct TenantId(u64);

impl TenantId {
    /// The system tenant. Owns the unprefixed part of the keyspace.
    pub const SYSTEM: TenantId = TenantId(1);

    /// Create a tenant id, rejecting zero.
    pub const fn new(id: u64) -> Option<Self> {
        if id == 0 {
            None
        } else {
            Some(Self(id))
        }
    }

    /// Raw integer value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this is the system tenant.
    pub const fn is_system(self) -> bool {
        self.0 == Self::SYSTEM.0
    }

    /// The next tenant id, used to compute the exclusive end of a keyspace.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl TryFrom<u64> for TenantId {
    type Error = String;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| "tenant id must be positive".to_string())
    }
}

impl From<TenantId> for u64 {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TenantId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: u64 = s
            .trim()
            .parse()
            .map_err(|e| format!("invalid tenant id {:?}: {}", s, e))?;
        Self::try_from(raw)
    }
}

/// Identifier of one running worker within a tenant.
///
/// Dense and small: valid values are `1..=MAX_INSTANCE_ID`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct InstanceId(u32);

impl InstanceId {
    /// Smallest valid instance id.
    pub const MIN: InstanceId = InstanceId(1);

    /// Largest valid instance id.
    pub const MAX: InstanceId = InstanceId(MAX_INSTANCE_ID);

    /// Create an instance id, rejecting zero and values wider than the row id field.
    pub const fn new(id: u32) -> Option<Self> {
        if id == 0 || id > MAX_INSTANCE_ID {
            None
        } else {
            Some(Self(id))
        }
    }

    /// Raw integer value.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Iterate over every valid instance id in ascending order.
    pub fn all() -> impl Iterator<Item = InstanceId> {
        (1..=MAX_INSTANCE_ID).map(InstanceId)
    }
}

impl TryFrom<u32> for InstanceId {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| {
            format!(
                "instance id {} outside valid range 1..={}",
                value, MAX_INSTANCE_ID
            )
        })
    }
}

impl From<InstanceId> for u32 {
    fn from(id: InstanceId) -> Self {
        id.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identity of one worker process lifetime.
///
/// Written into a slot on claim so heartbeats and releases can prove
/// ownership even if another worker later reuses the same address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

impl SessionId {
    /// Generate a fresh session id from the process id, wall clock and a counter.
    pub fn generate() -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let mut hasher = XxHash64::with_seed(u64::from(std::process::id()));
        hasher.write(&nanos.to_le_bytes());
        hasher.write_u64(SESSION_COUNTER.fetch_add(1, Ordering::Relaxed));
        Self(hasher.finish())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
