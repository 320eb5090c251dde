//! Tenantplane - multi-tenant control plane for shared-cluster workers.
//!
//! Many tenant workloads share one cluster. Each tenant worker process
//! needs a cluster-unique instance id, a view of the capabilities its
//! tenant has been granted, and a guarantee that its key encoding stays
//! inside its own keyspace.
//!
//! # Worker lifecycle
//!
//! ```text
//!  validate keyspace ──► claim instance id ──► row ids usable
//!                                │
//!                                ▼
//!                 capability watcher ──► gate answers privileged calls
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - Worker startup and shutdown
//! - [`core::ids`] - Tenant, instance and session ids
//! - [`core::time`] - Timestamps and clocks
//! - [`core::error`] - Error types and classification
//!
//! ## Keyspace
//! - [`keyspace::codec`] - Tenant key prefixes and spans
//! - [`keyspace::guard`] - Key-space boundary guard
//!
//! ## Instances
//! - [`instance::pool`] - Instance identifier pool
//! - [`instance::reclaim`] - Periodic pool replenishment
//! - [`instance::rowid`] - Row identifier generator
//!
//! ## Control
//! - [`control::capabilities`] - Authoritative capability grants
//! - [`control::cache`] - Worker-local capability cache
//! - [`control::watcher`] - Capability refresh task
//! - [`control::gate`] - Privileged operation gate
//! - [`control::admin`] - Administrative statements
//!
//! ## Store
//! - [`store`] - Metadata store with conditional writes
//!
//! ## Operations
//! - [`ops::observability`] - Metrics and probes
//!
//! # Key Invariants
//!
//! - Two concurrent claims for a tenant never return the same instance id.
//! - `row_id & INSTANCE_ID_MASK` is the generating worker's instance id.
//! - A capability absent from the local snapshot is denied.
//! - A worker whose codec implies another tenant never starts.

// Core infrastructure
pub mod core;

// Key encoding and boundary checks
pub mod keyspace;

// Instance ids and row ids
pub mod instance;

// Tenants and capabilities
pub mod control;

// Metadata store
pub mod store;

// Operations and observability
pub mod ops;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, ids, runtime, time};
pub use control::{cache, capabilities, gate};
pub use ops::observability;
