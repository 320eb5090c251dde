//! Tenant keyspace isolation.
//!
//! - [`codec`] - Tenant key-prefix encoding and key spans
//! - [`guard`] - Startup and per-key boundary validation

pub mod codec;
pub mod guard;

pub use codec::{KeySpan, TenantCodec};
pub use guard::{validate, BoundaryGuard};
