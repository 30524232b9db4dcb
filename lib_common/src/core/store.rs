//! # Item Store Contract
//!
//! The only view the engine has of persistence. Every operation that mutates
//! state is atomic on the store side; the dispatcher and the queue manager
//! never coordinate with each other except through these calls.
//!
//! Implementations live in `crate::connections`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::item::{ConsumerId, Item};

/// Errors raised by store adapters.
///
/// None of these are fatal at runtime: callers log them and treat the
/// operation as "nothing happened".
#[derive(Debug, Error)]
pub enum StoreError {
    /// A connection could not be obtained from the pool.
    #[error("Failed to connect to item store: {0}")]
    ConnectionError(String),
    /// The store rejected or failed a statement.
    #[error("Query execution failed: {0}")]
    QueryError(String),
    /// A row came back in a shape the engine does not understand.
    #[error("Malformed item row: {0}")]
    InvalidRow(String),
}

/// # Item Store
///
/// Key-sequenced item table with atomic claim and assignment.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Atomically flips every `Pending` item created before `threshold` to
    /// `Claimed` and returns them ordered by id. Rows already locked by a
    /// concurrent claimer are skipped, never returned twice.
    async fn claim_pending_older_than(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<Vec<Item>, StoreError>;

    /// Moves `item_id` from `Claimed` (or `Pending`, as a fallback) to
    /// `Assigned` for `consumer`, stamping `assigned_at`. Returns `false` when
    /// the item is missing or already assigned.
    async fn assign(&self, item_id: i64, consumer: ConsumerId) -> Result<bool, StoreError>;

    /// `Assigned` items for `consumer` with `id > min_id`, ordered by
    /// assignment time ascending, at most `limit` of them.
    async fn items_since(
        &self,
        consumer: ConsumerId,
        min_id: i64,
        limit: usize,
    ) -> Result<Vec<Item>, StoreError>;

    /// Largest item id in the store, 0 when empty.
    async fn latest_id(&self) -> Result<i64, StoreError>;

    /// Creates a `Pending` item and returns its id.
    async fn insert(&self, text: &str) -> Result<i64, StoreError>;

    /// Every item, newest first.
    async fn list_all(&self) -> Result<Vec<Item>, StoreError>;

    /// Returns `Claimed` items whose claim is older than `claimed_before` to
    /// `Pending`. Yields the number of rows released.
    async fn reclaim_stale_claims(&self, claimed_before: DateTime<Utc>)
        -> Result<u64, StoreError>;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;
}
