//! Instance identity.
//!
//! - [`slot`] - Slot rows and their lifecycle
//! - [`pool`] - Claiming, releasing and replenishing instance ids
//! - [`reclaim`] - Periodic pool maintenance
//! - [`rowid`] - Row identifiers derived from a claimed instance id
//!
//! # Invariants
//!
//! - Within a tenant, no two live slots share an instance id
//! - Instance ids fit the row identifier's instance field
//! - Reclaim never modifies a live slot

pub mod pool;
pub mod reclaim;
pub mod rowid;
pub mod slot;

pub use pool::{ClaimedInstance, InstancePool, PoolCounts, ReplenishReport};
pub use reclaim::ReclaimLoop;
pub use rowid::{RowIdGenerator, RowIdParts};
pub use slot::{InstanceSlot, SlotState};
