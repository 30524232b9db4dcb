//! # Connections Module
//!
//! Store adapters implementing `crate::core::store::ItemStore`.

/// Process-local item store, always available.
pub mod memory;

/// PostgreSQL item store with connection pooling.
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryItemStore;
#[cfg(feature = "postgres")]
pub use postgres::PgItemStore;
