//! # Display Rotation Engine
//!
//! Decides what each monitor shows at any instant. The state is per monitor
//! and shared by all of that monitor's sessions; each session only reads it
//! through snapshots after ticking it.
//!
//! ## States
//! - **Empty**: nothing current. A tick peeks the queue and starts showing
//!   its head.
//! - **Showing**: the current item stays up for `normal_display` while it is
//!   still waiting in the queue, or for `idle_display` once the queue is empty.
//!   When the window elapses the queue advances; a new head replaces the
//!   current item, otherwise the same item is re-armed for another idle
//!   window (the "still alive, nothing new" heartbeat).
//!
//! Ticks are idempotent with respect to time: several sessions ticking the
//! same monitor at once move the rotation exactly as one would.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::item::{ConsumerId, Item};
use crate::core::queue::ConsumerQueue;
use crate::core::registry::{ConsumerRegistry, CoreError};
use crate::core::store::{ItemStore, StoreError};
use crate::loggers::LogThrottle;

/// # Rotation Settings
#[derive(Debug, Clone, PartialEq)]
pub struct RotationSettings {
    /// How long an item stays up while it is fresh.
    pub normal_display: Duration,
    /// How long the last item stays up between re-checks once nothing is queued.
    pub idle_display: Duration,
    /// Cadence of each streaming session.
    pub tick_interval: Duration,
    /// Items fetched per refill.
    pub page_size: usize,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            normal_display: Duration::from_secs(10),
            idle_display: Duration::from_secs(3),
            tick_interval: Duration::from_secs(1),
            page_size: 20,
        }
    }
}

/// Item fields a display needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemView {
    /// Item id.
    pub id: i64,
    /// Payload to display.
    pub text: String,
    /// When the item was routed to this monitor.
    pub assigned_at: Option<DateTime<Utc>>,
}

impl From<&Item> for ItemView {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id,
            text: item.text.clone(),
            assigned_at: item.assigned_at,
        }
    }
}

/// # Rotation Snapshot
///
/// What one session emits per tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationSnapshot {
    /// Monitor id.
    pub consumer_id: ConsumerId,
    /// Item on screen, if any.
    pub current: Option<ItemView>,
    /// Seconds left in the current display window, never negative.
    pub remaining_secs: f64,
    /// Items waiting behind the current one.
    pub queue_depth: usize,
}

impl RotationSnapshot {
    /// "Nothing to show" for `consumer`.
    pub fn empty(consumer_id: ConsumerId) -> Self {
        Self {
            consumer_id,
            current: None,
            remaining_secs: 0.0,
            queue_depth: 0,
        }
    }
}

/// # Rotation State
///
/// One monitor's queue plus what it is showing and since when.
#[derive(Debug)]
pub struct RotationState {
    queue: ConsumerQueue,
    current: Option<Item>,
    display_started_at: Option<Instant>,
}

impl RotationState {
    /// Starts in the Empty state.
    pub fn new(queue: ConsumerQueue) -> Self {
        Self {
            queue,
            current: None,
            display_started_at: None,
        }
    }

    /// The underlying queue.
    pub fn queue(&self) -> &ConsumerQueue {
        &self.queue
    }

    /// The item on screen.
    pub fn current(&self) -> Option<&Item> {
        self.current.as_ref()
    }

    /// When the current display window started.
    pub fn display_started_at(&self) -> Option<Instant> {
        self.display_started_at
    }

    /// Window length for the current item given the queue's contents.
    fn window(&self, settings: &RotationSettings) -> Duration {
        if self.queue.is_empty() {
            settings.idle_display
        } else {
            settings.normal_display
        }
    }

    /// # Tick
    ///
    /// Moves the rotation forward to `now`. On a store error the state is
    /// left where the failure found it and the next tick retries.
    pub async fn tick_at(
        &mut self,
        store: &dyn ItemStore,
        settings: &RotationSettings,
        now: Instant,
    ) -> Result<(), StoreError> {
        let Some(started) = self.display_started_at.filter(|_| self.current.is_some()) else {
            if let Some(item) = self.queue.peek(store).await? {
                debug!(monitor = self.queue.consumer(), item = item.id, "Showing item");
                self.current = Some(item);
                self.display_started_at = Some(now);
            }
            return Ok(());
        };

        if now.saturating_duration_since(started) < self.window(settings) {
            return Ok(());
        }

        self.queue.advance(store).await?;
        match self.queue.front() {
            Some(next) => {
                debug!(monitor = self.queue.consumer(), item = next.id, "Rotating to next item");
                self.current = Some(next.clone());
            }
            None => {
                debug!(
                    monitor = self.queue.consumer(),
                    item = self.current.as_ref().map(|item| item.id),
                    "Nothing new, re-arming current item"
                );
            }
        }
        self.display_started_at = Some(now);
        Ok(())
    }

    /// What a session sees at `now`.
    pub fn snapshot_at(&self, settings: &RotationSettings, now: Instant) -> RotationSnapshot {
        let consumer_id = self.queue.consumer();
        let Some(current) = &self.current else {
            return RotationSnapshot {
                queue_depth: self.queue.len(),
                ..RotationSnapshot::empty(consumer_id)
            };
        };

        let elapsed = self
            .display_started_at
            .map(|started| now.saturating_duration_since(started))
            .unwrap_or_default();
        let remaining = self.window(settings).saturating_sub(elapsed);

        let current_is_queued = self.queue.front().is_some_and(|head| head.id == current.id);
        let queue_depth = self.queue.len() - usize::from(current_is_queued);

        RotationSnapshot {
            consumer_id,
            current: Some(ItemView::from(current)),
            remaining_secs: remaining.as_secs_f64(),
            queue_depth,
        }
    }
}

/// # Rotation Engine
///
/// Entry point used by streaming sessions: resolves the monitor's shared
/// state, ticks it and returns the resulting snapshot.
pub struct RotationEngine {
    store: Arc<dyn ItemStore>,
    registry: Arc<ConsumerRegistry>,
    settings: RotationSettings,
    failure_log: Mutex<LogThrottle>,
}

impl RotationEngine {
    /// Builds an engine over `registry`.
    pub fn new(store: Arc<dyn ItemStore>, registry: Arc<ConsumerRegistry>, settings: RotationSettings) -> Self {
        Self {
            store,
            registry,
            settings,
            failure_log: Mutex::new(LogThrottle::new(Duration::from_secs(30))),
        }
    }

    /// The engine's settings.
    pub fn settings(&self) -> &RotationSettings {
        &self.settings
    }

    /// The registry of monitor states.
    pub fn registry(&self) -> &Arc<ConsumerRegistry> {
        &self.registry
    }

    /// Ticks `consumer` now and returns its snapshot.
    pub async fn tick(&self, consumer: ConsumerId) -> Result<RotationSnapshot, CoreError> {
        self.tick_at(consumer, Instant::now()).await
    }

    /// Ticks `consumer` as of `now`.
    ///
    /// Only an unknown monitor id is an error; store trouble yields an empty
    /// snapshot and is logged.
    pub async fn tick_at(&self, consumer: ConsumerId, now: Instant) -> Result<RotationSnapshot, CoreError> {
        let slot = match self.registry.slot(consumer).await {
            Ok(slot) => slot,
            Err(CoreError::Store(e)) => {
                self.log_failure(consumer, &e);
                return Ok(RotationSnapshot::empty(consumer));
            }
            Err(e) => return Err(e),
        };

        let mut state = slot.lock().await;
        match state.tick_at(self.store.as_ref(), &self.settings, now).await {
            Ok(()) => Ok(state.snapshot_at(&self.settings, now)),
            Err(e) => {
                self.log_failure(consumer, &e);
                Ok(RotationSnapshot::empty(consumer))
            }
        }
    }

    fn log_failure(&self, consumer: ConsumerId, error: &StoreError) {
        let mut throttle = self.failure_log.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(suppressed) = throttle.check() {
            warn!(monitor = consumer, error = %error, suppressed, "Rotation tick failed, showing nothing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::MemoryItemStore;
    use crate::core::item::ItemState;
    use chrono::TimeDelta;
    use std::num::NonZeroU32;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn settings(normal: u64, idle: u64) -> RotationSettings {
        RotationSettings {
            normal_display: secs(normal),
            idle_display: secs(idle),
            ..RotationSettings::default()
        }
    }

    fn assign(store: &MemoryItemStore, id: i64, consumer: &str, offset_secs: i64) {
        let at = Utc::now() + TimeDelta::seconds(offset_secs);
        store.seed(Item {
            id,
            text: format!("item {id}"),
            state: ItemState::Assigned,
            created_at: at - TimeDelta::minutes(10),
            assigned_at: Some(at),
            assigned_consumer: Some(consumer.to_string()),
        });
    }

    fn current_id(snapshot: &RotationSnapshot) -> Option<i64> {
        snapshot.current.as_ref().map(|item| item.id)
    }

    #[tokio::test]
    async fn empty_state_starts_showing_the_head() {
        let store = MemoryItemStore::new();
        assign(&store, 11, "1", 0);
        let settings = settings(10, 3);
        let mut state = RotationState::new(ConsumerQueue::new(1, 10, 20));
        let t0 = Instant::now();

        state.tick_at(&store, &settings, t0).await.unwrap();
        let snapshot = state.snapshot_at(&settings, t0);
        assert_eq!(current_id(&snapshot), Some(11));
        assert_eq!(snapshot.remaining_secs, 10.0);
        assert_eq!(snapshot.queue_depth, 0);
        assert_eq!(state.queue().high_water_mark(), 10);
    }

    #[tokio::test]
    async fn items_rotate_after_the_normal_window() {
        let store = MemoryItemStore::new();
        assign(&store, 11, "1", 0);
        assign(&store, 12, "1", 1);
        let settings = settings(10, 3);
        let mut state = RotationState::new(ConsumerQueue::new(1, 10, 20));
        let t0 = Instant::now();

        state.tick_at(&store, &settings, t0).await.unwrap();
        assert_eq!(state.snapshot_at(&settings, t0).queue_depth, 1);

        state.tick_at(&store, &settings, t0 + secs(9)).await.unwrap();
        assert_eq!(state.current().map(|i| i.id), Some(11));

        state.tick_at(&store, &settings, t0 + secs(10)).await.unwrap();
        assert_eq!(state.current().map(|i| i.id), Some(12));
        assert_eq!(state.queue().high_water_mark(), 11);
        assert_eq!(state.display_started_at(), Some(t0 + secs(10)));
    }

    #[tokio::test]
    async fn last_item_is_re_armed_with_the_idle_window() {
        let store = MemoryItemStore::new();
        assign(&store, 11, "1", 0);
        let settings = settings(10, 3);
        let mut state = RotationState::new(ConsumerQueue::new(1, 10, 20));
        let t0 = Instant::now();

        state.tick_at(&store, &settings, t0).await.unwrap();
        state.tick_at(&store, &settings, t0 + secs(10)).await.unwrap();

        let snapshot = state.snapshot_at(&settings, t0 + secs(10));
        assert_eq!(current_id(&snapshot), Some(11));
        assert_eq!(snapshot.remaining_secs, 3.0);
        assert_eq!(state.queue().high_water_mark(), 11);
        assert_eq!(state.display_started_at(), Some(t0 + secs(10)));

        // Heartbeat keeps going with the same item.
        state.tick_at(&store, &settings, t0 + secs(13)).await.unwrap();
        assert_eq!(state.current().map(|i| i.id), Some(11));
        assert_eq!(state.display_started_at(), Some(t0 + secs(13)));
    }

    #[tokio::test]
    async fn idle_item_is_not_cut_short_between_the_two_windows() {
        let store = MemoryItemStore::new();
        assign(&store, 11, "1", 0);
        // Idle window longer than the normal one, so there is a gap to probe.
        let settings = settings(2, 5);
        let mut state = RotationState::new(ConsumerQueue::new(1, 10, 20));
        let t0 = Instant::now();

        state.tick_at(&store, &settings, t0).await.unwrap();
        state.tick_at(&store, &settings, t0 + secs(2)).await.unwrap();
        let armed = t0 + secs(2);
        assert_eq!(state.display_started_at(), Some(armed));

        state.tick_at(&store, &settings, armed + secs(3)).await.unwrap();
        assert_eq!(state.current().map(|i| i.id), Some(11));
        assert_eq!(state.display_started_at(), Some(armed));
        assert_eq!(state.snapshot_at(&settings, armed + secs(3)).remaining_secs, 2.0);
    }

    #[tokio::test]
    async fn new_item_during_heartbeat_is_picked_up_and_old_one_never_returns() {
        let store = MemoryItemStore::new();
        assign(&store, 11, "1", 0);
        let settings = settings(10, 3);
        let mut state = RotationState::new(ConsumerQueue::new(1, 10, 20));
        let t0 = Instant::now();

        state.tick_at(&store, &settings, t0).await.unwrap();
        state.tick_at(&store, &settings, t0 + secs(10)).await.unwrap();
        assign(&store, 14, "1", 5);

        state.tick_at(&store, &settings, t0 + secs(13)).await.unwrap();
        assert_eq!(state.current().map(|i| i.id), Some(14));

        let mut shown = vec![11, 14];
        for step in 1..10 {
            state.tick_at(&store, &settings, t0 + secs(13 + step * 10)).await.unwrap();
            shown.push(state.current().map(|i| i.id).unwrap());
        }
        assert!(shown[2..].iter().all(|id| *id == 14));
        assert_eq!(state.queue().high_water_mark(), 14);
    }

    #[tokio::test]
    async fn nothing_assigned_stays_empty() {
        let store = MemoryItemStore::new();
        let settings = settings(10, 3);
        let mut state = RotationState::new(ConsumerQueue::new(2, 0, 20));
        let t0 = Instant::now();
        state.tick_at(&store, &settings, t0).await.unwrap();
        assert_eq!(state.snapshot_at(&settings, t0), RotationSnapshot::empty(2));
    }

    #[tokio::test]
    async fn engine_shares_rotation_between_sessions_and_hides_store_errors() {
        let store = Arc::new(MemoryItemStore::new());
        let registry = Arc::new(ConsumerRegistry::new(store.clone(), NonZeroU32::new(2).unwrap(), 20));
        let engine = RotationEngine::new(store.clone(), registry, settings(10, 3));

        // Baseline is taken before anything is assigned.
        let t0 = Instant::now();
        assert_eq!(engine.tick_at(1, t0).await.unwrap().current, None);
        assign(&store, 1, "1", 0);

        let a = engine.tick_at(1, t0 + secs(1)).await.unwrap();
        let b = engine.tick_at(1, t0 + secs(2)).await.unwrap();
        assert_eq!(current_id(&a), Some(1));
        assert_eq!(current_id(&b), Some(1));
        assert_eq!(a.remaining_secs, 10.0);
        assert_eq!(b.remaining_secs, 9.0);

        store.set_unavailable(true);
        let during_outage = engine.tick_at(1, t0 + secs(11)).await.unwrap();
        assert_eq!(during_outage, RotationSnapshot::empty(1));

        store.set_unavailable(false);
        let after = engine.tick_at(1, t0 + secs(12)).await.unwrap();
        assert_eq!(current_id(&after), Some(1));

        assert!(matches!(engine.tick(3).await, Err(CoreError::UnknownConsumer(3, 2))));
    }
}
