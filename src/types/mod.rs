//! Core types for the nodehost kernel.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Case-insensitive names (NodeName, CapabilityId) and TransactionId
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for dispatch, reload and observability

mod config;
mod errors;
mod ids;

pub(crate) use errors::contain;

pub use config::{Config, DispatchConfig, ObservabilityConfig, ReloadConfig};
pub use errors::{Error, Result, SourcePosition};
pub use ids::{CapabilityId, NodeName, TransactionId};
