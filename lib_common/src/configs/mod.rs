//! # Configuration Modules
//!
//! Raw engine options as they arrive from files and the command line, and the
//! validated settings the dispatcher and rotation engine are built from.

/// Engine options, defaults and validation.
pub mod engine;

pub use engine::{ConfigError, EngineOptions, EngineSettings};
