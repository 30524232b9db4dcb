//! # Consumer Queue
//!
//! Per-monitor buffer of assigned items that have not been shown yet.
//!
//! The queue is bounded below by a **high-water mark**: the id of the last
//! item ever shown on this monitor. Items at or below the mark are never handed
//! out again, which is what keeps a monitor from replaying content. The mark
//! only moves in `advance`, and always to the id of the item just retired.

use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::core::item::{ConsumerId, Item};
use crate::core::store::{ItemStore, StoreError};

/// # Consumer Queue
#[derive(Debug, Clone)]
pub struct ConsumerQueue {
    consumer: ConsumerId,
    high_water_mark: i64,
    pending: VecDeque<Item>,
    page_size: usize,
}

impl ConsumerQueue {
    /// An empty queue for `consumer` that treats every id up to
    /// `high_water_mark` as already shown.
    pub fn new(consumer: ConsumerId, high_water_mark: i64, page_size: usize) -> Self {
        Self {
            consumer,
            high_water_mark,
            pending: VecDeque::new(),
            page_size: page_size.max(1),
        }
    }

    /// The monitor this queue feeds.
    pub fn consumer(&self) -> ConsumerId {
        self.consumer
    }

    /// Id of the last item shown on this monitor.
    pub fn high_water_mark(&self) -> i64 {
        self.high_water_mark
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Head of the buffer without touching the store.
    pub fn front(&self) -> Option<&Item> {
        self.pending.front()
    }

    /// Ids currently buffered, head first.
    pub fn pending_ids(&self) -> Vec<i64> {
        self.pending.iter().map(|item| item.id).collect()
    }

    /// # Refill
    ///
    /// Replaces the buffer with the store's current view of the next page:
    /// assigned items past the mark, oldest assignment first.
    pub async fn refill(&mut self, store: &dyn ItemStore) -> Result<usize, StoreError> {
        let items = store
            .items_since(self.consumer, self.high_water_mark, self.page_size)
            .await?;
        let mark = self.high_water_mark;
        self.pending = items.into_iter().filter(|item| item.id > mark).collect();
        debug!(monitor = self.consumer, mark, buffered = self.pending.len(), "Refilled consumer queue");
        Ok(self.pending.len())
    }

    /// # Peek
    ///
    /// The next item to show, refilling first when the buffer is empty.
    pub async fn peek(&mut self, store: &dyn ItemStore) -> Result<Option<Item>, StoreError> {
        if self.pending.is_empty() {
            self.refill(store).await?;
        }
        Ok(self.pending.front().cloned())
    }

    /// # Advance
    ///
    /// Retires the head of the buffer: the mark moves to its id. Entries left
    /// behind the new mark (possible when assignment order and id order
    /// disagree) are dropped. Refills once the buffer runs dry.
    ///
    /// The mark is updated before the refill, so a failing store never causes
    /// the retired item to be shown twice.
    pub async fn advance(&mut self, store: &dyn ItemStore) -> Result<Option<Item>, StoreError> {
        let retired = self.pending.pop_front();

        if let Some(item) = &retired {
            self.high_water_mark = item.id;
            let mark = self.high_water_mark;
            let before = self.pending.len();
            self.pending.retain(|queued| queued.id > mark);
            let dropped = before - self.pending.len();
            if dropped > 0 {
                warn!(
                    monitor = self.consumer,
                    mark, dropped, "Dropped queued items below the high-water mark"
                );
            }
        }

        if self.pending.is_empty() {
            self.refill(store).await?;
        }
        Ok(retired)
    }
}
