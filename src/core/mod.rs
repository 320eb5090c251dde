//! Core runtime infrastructure.
//!
//! - [`config`] - Configuration parsing and validation
//! - [`error`] - Error types and classification
//! - [`ids`] - Tenant, instance and session identifiers
//! - [`runtime`] - Worker startup and shutdown orchestration
//! - [`time`] - Timestamps and clocks

pub mod config;
pub mod error;
pub mod ids;
pub mod runtime;
pub mod time;
