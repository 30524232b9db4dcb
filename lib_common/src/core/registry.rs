//! # Consumer Registry
//!
//! Owns one `RotationState` per monitor id, created on first access and kept
//! for the life of the process. All sessions of a monitor share the same
//! entry, so they observe the same rotation.
//!
//! The high-water baseline (the store's largest id) is read once per process.
//! Servers call `warm_up` at startup, before the dispatcher runs, so the
//! baseline is the maximum id at process start; otherwise it is read the
//! first time any monitor is touched. Every monitor starts from it, so a
//! fresh process never replays what was assigned before it started.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tracing::info;

use crate::core::item::ConsumerId;
use crate::core::queue::ConsumerQueue;
use crate::core::rotation::RotationState;
use crate::core::store::{ItemStore, StoreError};

/// Errors surfaced by the engine's per-monitor operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The monitor id is outside `1..=monitor_count`.
    #[error("Monitor ID {0} not found. Valid IDs are 1 to {1}.")]
    UnknownConsumer(ConsumerId, u32),
    /// The store failed while the operation needed it.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Shared handle to one monitor's rotation state.
pub type ConsumerSlot = Arc<AsyncMutex<RotationState>>;

/// # Consumer Registry
pub struct ConsumerRegistry {
    store: Arc<dyn ItemStore>,
    monitor_count: NonZeroU32,
    page_size: usize,
    baseline: OnceCell<i64>,
    consumers: Mutex<HashMap<ConsumerId, ConsumerSlot>>,
}

impl ConsumerRegistry {
    /// Creates an empty registry for monitors `1..=monitor_count`.
    pub fn new(store: Arc<dyn ItemStore>, monitor_count: NonZeroU32, page_size: usize) -> Self {
        Self {
            store,
            monitor_count,
            page_size,
            baseline: OnceCell::new(),
            consumers: Mutex::new(HashMap::new()),
        }
    }

    /// Number of configured monitors.
    pub fn monitor_count(&self) -> NonZeroU32 {
        self.monitor_count
    }

    /// Fails with `UnknownConsumer` unless `consumer` is in `1..=monitor_count`.
    pub fn check_consumer(&self, consumer: ConsumerId) -> Result<(), CoreError> {
        if (1..=self.monitor_count.get()).contains(&consumer) {
            Ok(())
        } else {
            Err(CoreError::UnknownConsumer(consumer, self.monitor_count.get()))
        }
    }

    /// The mark new monitors start from, reading it from the store on first use.
    pub async fn baseline(&self) -> Result<i64, CoreError> {
        let store = Arc::clone(&self.store);
        let baseline = self
            .baseline
            .get_or_try_init(|| async move {
                let latest = store.latest_id().await?;
                info!(baseline = latest, "Captured high-water baseline for monitors");
                Ok::<i64, StoreError>(latest)
            })
            .await?;
        Ok(*baseline)
    }

    /// The state of `consumer`, created on first access.
    pub async fn slot(&self, consumer: ConsumerId) -> Result<ConsumerSlot, CoreError> {
        self.check_consumer(consumer)?;
        if let Some(slot) = self.lookup(consumer) {
            return Ok(slot);
        }

        let baseline = self.baseline().await?;
        let mut consumers = self.consumers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let slot = consumers.entry(consumer).or_insert_with(|| {
            info!(monitor = consumer, baseline, "Created monitor rotation state");
            Arc::new(AsyncMutex::new(RotationState::new(ConsumerQueue::new(
                consumer,
                baseline,
                self.page_size,
            ))))
        });
        Ok(Arc::clone(slot))
    }

    /// Captures the baseline and creates every monitor's state up front.
    pub async fn warm_up(&self) -> Result<(), CoreError> {
        for consumer in 1..=self.monitor_count.get() {
            self.slot(consumer).await?;
        }
        Ok(())
    }

    fn lookup(&self, consumer: ConsumerId) -> Option<ConsumerSlot> {
        let consumers = self.consumers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        consumers.get(&consumer).cloned()
    }

    /// Number of monitors whose state exists.
    pub fn active_consumers(&self) -> usize {
        self.consumers.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::MemoryItemStore;
    use chrono::Utc;

    fn registry(store: Arc<MemoryItemStore>, count: u32) -> ConsumerRegistry {
        ConsumerRegistry::new(store, NonZeroU32::new(count).unwrap(), 20)
    }

    #[tokio::test]
    async fn out_of_range_ids_are_rejected() {
        let registry = registry(Arc::new(MemoryItemStore::new()), 3);
        assert!(matches!(registry.slot(0).await, Err(CoreError::UnknownConsumer(0, 3))));
        assert!(matches!(registry.slot(4).await, Err(CoreError::UnknownConsumer(4, 3))));
        assert!(registry.slot(3).await.is_ok());
    }

    #[tokio::test]
    async fn slots_are_shared_and_lazily_created() {
        let registry = registry(Arc::new(MemoryItemStore::new()), 2);
        assert_eq!(registry.active_consumers(), 0);
        let a = registry.slot(1).await.unwrap();
        let b = registry.slot(1).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.active_consumers(), 1);
    }

    #[tokio::test]
    async fn baseline_is_captured_once() {
        let store = Arc::new(MemoryItemStore::new());
        store.insert_at("history", Utc::now());
        store.insert_at("history", Utc::now());
        let registry = registry(store.clone(), 2);

        let first = registry.slot(1).await.unwrap();
        store.insert_at("after start", Utc::now());
        let second = registry.slot(2).await.unwrap();

        assert_eq!(first.lock().await.queue().high_water_mark(), 2);
        assert_eq!(second.lock().await.queue().high_water_mark(), 2);
    }

    #[tokio::test]
    async fn warm_up_pins_the_baseline_before_later_inserts() {
        let store = Arc::new(MemoryItemStore::new());
        store.insert_at("history", Utc::now());
        let registry = registry(store.clone(), 3);

        registry.warm_up().await.unwrap();
        assert_eq!(registry.active_consumers(), 3);
        store.insert_at("after start", Utc::now());

        for monitor in 1..=3 {
            let slot = registry.slot(monitor).await.unwrap();
            assert_eq!(slot.lock().await.queue().high_water_mark(), 1);
        }
    }

    #[tokio::test]
    async fn baseline_failure_is_retried_on_next_access() {
        let store = Arc::new(MemoryItemStore::new());
        store.set_unavailable(true);
        let registry = registry(store.clone(), 1);
        assert!(matches!(registry.slot(1).await, Err(CoreError::Store(_))));

        store.set_unavailable(false);
        assert!(registry.slot(1).await.is_ok());
    }
}
