//! Operations and observability.
//!
//! - [`observability`] - Metrics, health and readiness

pub mod observability;
