//! # In-Memory Item Store
//!
//! A process-local `ItemStore` backed by a `BTreeMap` under a single mutex.
//! Every trait operation takes the lock once, which gives it the same
//! atomicity the PostgreSQL adapter gets from its transactions. Used for
//! tests and for running the server without a database (`--memory-store`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::core::item::{consumer_key, ConsumerId, Item, ItemState};
use crate::core::store::{ItemStore, StoreError};

#[derive(Default)]
struct Table {
    rows: BTreeMap<i64, Item>,
    claimed_at: HashMap<i64, DateTime<Utc>>,
    next_id: i64,
}

/// # Memory Item Store
#[derive(Default)]
pub struct MemoryItemStore {
    table: Mutex<Table>,
    unavailable: AtomicBool,
}

impl MemoryItemStore {
    /// Creates an empty store. The first inserted item gets id 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a pending item with an explicit creation time.
    pub fn insert_at(&self, text: &str, created_at: DateTime<Utc>) -> i64 {
        let mut table = self.lock();
        table.next_id += 1;
        let id = table.next_id;
        table.rows.insert(id, Item::pending(id, text, created_at));
        id
    }

    /// Puts a row in the table as-is. Later inserts continue after the
    /// largest id seen.
    pub fn seed(&self, item: Item) {
        let mut table = self.lock();
        table.next_id = table.next_id.max(item.id);
        if item.state == ItemState::Claimed {
            table.claimed_at.insert(item.id, Utc::now());
        }
        table.rows.insert(item.id, item);
    }

    /// Snapshot of a single row.
    pub fn get(&self, id: i64) -> Option<Item> {
        self.lock().rows.get(&id).cloned()
    }

    /// Overrides the recorded claim time of a row.
    pub fn backdate_claim(&self, id: i64, claimed_at: DateTime<Utc>) {
        let mut table = self.lock();
        if table.claimed_at.contains_key(&id) {
            table.claimed_at.insert(id, claimed_at);
        }
    }

    /// While set, every trait operation fails with `ConnectionError`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        // A panic while holding the lock cannot leave a row half-written.
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::ConnectionError("memory store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn claim_pending_older_than(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<Vec<Item>, StoreError> {
        self.available()?;
        let now = Utc::now();
        let mut table = self.lock();
        let Table { rows, claimed_at, .. } = &mut *table;

        let mut claimed = Vec::new();
        for item in rows.values_mut() {
            if item.state == ItemState::Pending && item.created_at < threshold {
                item.state = ItemState::Claimed;
                claimed_at.insert(item.id, now);
                claimed.push(item.clone());
            }
        }
        Ok(claimed)
    }

    async fn assign(&self, item_id: i64, consumer: ConsumerId) -> Result<bool, StoreError> {
        self.available()?;
        let mut table = self.lock();
        let Some(item) = table.rows.get_mut(&item_id) else {
            return Ok(false);
        };
        if !item.state.can_transition_to(ItemState::Assigned) {
            return Ok(false);
        }
        item.state = ItemState::Assigned;
        item.assigned_at = Some(Utc::now());
        item.assigned_consumer = Some(consumer_key(consumer));
        table.claimed_at.remove(&item_id);
        Ok(true)
    }

    async fn items_since(
        &self,
        consumer: ConsumerId,
        min_id: i64,
        limit: usize,
    ) -> Result<Vec<Item>, StoreError> {
        self.available()?;
        let table = self.lock();
        let mut items: Vec<Item> = table
            .rows
            .range(min_id.saturating_add(1)..)
            .map(|(_, item)| item)
            .filter(|item| item.is_assigned_to(consumer))
            .cloned()
            .collect();
        items.sort_by_key(|item| (item.assigned_at, item.id));
        items.truncate(limit);
        Ok(items)
    }

    async fn latest_id(&self) -> Result<i64, StoreError> {
        self.available()?;
        Ok(self.lock().rows.keys().next_back().copied().unwrap_or(0))
    }

    async fn insert(&self, text: &str) -> Result<i64, StoreError> {
        self.available()?;
        Ok(self.insert_at(text, Utc::now()))
    }

    async fn list_all(&self) -> Result<Vec<Item>, StoreError> {
        self.available()?;
        Ok(self.lock().rows.values().rev().cloned().collect())
    }

    async fn reclaim_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.available()?;
        let mut table = self.lock();
        let Table { rows, claimed_at, .. } = &mut *table;

        let stale: Vec<i64> = claimed_at
            .iter()
            .filter(|(_, at)| **at < claimed_before)
            .map(|(id, _)| *id)
            .collect();

        let mut released = 0;
        for id in stale {
            claimed_at.remove(&id);
            if let Some(item) = rows.get_mut(&id) {
                if item.state == ItemState::Claimed {
                    item.state = ItemState::Pending;
                    released += 1;
                }
            }
        }
        Ok(released)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.available()
    }
}
