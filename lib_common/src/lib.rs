//! # lib_common
//!
//! Engine behind the monitor server: stores, the dispatcher, per-monitor
//! rotation, logging setup and validated settings.

#![forbid(unsafe_code)]

// Declare the modules to re-export
pub mod connections;
pub mod core;
pub mod loggers;

#[cfg(feature = "configs")]
pub mod configs;

// Re-export the engine's main types
pub use crate::core::*;
pub use connections::MemoryItemStore;
#[cfg(feature = "postgres")]
pub use connections::PgItemStore;
