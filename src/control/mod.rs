//! Tenant and capability control.
//!
//! - [`api`] - Tenant records and service modes
//! - [`tenants`] - Tenant directory (create, drop, lookup)
//! - [`capabilities`] - Capability kinds and the authoritative grant table
//! - [`cache`] - Worker-local capability snapshots and freshness
//! - [`watcher`] - Background capability refresh
//! - [`gate`] - Privileged operation gate
//! - [`admin`] - Administrative statements
//!
//! # Propagation
//!
//! Grants and revokes are durable and versioned in the metadata store the
//! moment they return. Workers observe them only after their watcher swaps
//! a new snapshot into the cache, at most one convergence window later.
//! Until then the gate answers from the previous snapshot; an absent
//! snapshot denies everything.

pub mod admin;
pub mod api;
pub mod cache;
pub mod capabilities;
pub mod gate;
pub mod tenants;
pub mod watcher;
