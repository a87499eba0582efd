//! # Nodehost Core - Hot-Reloadable Node Tree Kernel
//!
//! Rust implementation of the nodehost kernel providing:
//! - A tree of typed nodes declared in a document and reloaded live
//! - Per-node reentrant, upgradeable reader/writer locking
//! - Two-phase reload transactions that reuse, create and dispose children
//! - Path-addressed request dispatch with per-node security checks
//! - Action binding with typed parameters, safe calls and result normalization
//!
//! ## Architecture
//!
//! There is no global lock. Requests and reloads meet at each node's own lock,
//! always taken top-down:
//! ```text
//!                       ┌──────────────────────────────┐
//!   reload source  →    │  ReloadTransaction (write)   │
//!                       │     root ─┬─ jobs ── nightly │
//!   listeners      →    │  Dispatcher (read) ┴─ files  │
//!                       └──────────────┬───────────────┘
//!                                      ↓ (walk locks released)
//!                                 ActionBinder
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod capabilities;
pub mod declaration;
pub mod dispatch;
pub mod kernel;
pub mod types;

// Internal utilities
pub mod observability;
pub mod validation;

pub use capabilities::{ActionDef, Credentials, ParamDef, ParamType};
pub use declaration::{Declaration, Element};
pub use dispatch::{CallerContext, Request, Response};
pub use kernel::{Kernel, Node, NodeBehavior, NodeState, NodeType, NodeTypeRegistry, ReloadReport};
pub use types::{Config, Error, Result};
