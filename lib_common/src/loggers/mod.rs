//! # Loggers Module
//!
//! Tracing setup for binaries and the rate limiter used by the engine's loops.

/// Installs the global `tracing` subscriber (stdout + rotating file).
#[cfg(feature = "loggers")]
pub mod loggerlocal;
/// Last-logged-timestamp throttle for repetitive log lines.
pub mod throttle;

#[cfg(feature = "loggers")]
pub use loggerlocal::{init_logging, LoggerError, LoggerLocalOptions};
pub use throttle::LogThrottle;
