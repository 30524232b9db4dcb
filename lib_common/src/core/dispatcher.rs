//! # Round-Robin Item Dispatcher
//!
//! The `Dispatcher` is the single background task that turns aged, pending
//! items into monitor assignments. Each cycle it:
//!
//! 1.  **Reclaims** (optional) claims that have been stuck longer than
//!     `reclaim_after`, returning them to `Pending`.
//! 2.  **Claims** every pending item older than `old_data_threshold` in one
//!     atomic store call, so a concurrent dispatcher can never take the same rows.
//! 3.  **Assigns** each claimed item to the next monitor from the round-robin
//!     cursor and persists the assignment with a conditional update.
//!
//! ## Failure Semantics
//! A failing store ends the cycle early; the next cycle starts from scratch.
//! A failed or rejected assignment is logged and skipped: the item stays
//! `Claimed` until the reclaim sweep (if enabled) releases it. The loop only
//! ends through its `CancellationToken`, which is observed between cycles and
//! while sleeping, never in the middle of a cycle.

use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::item::ConsumerId;
use crate::core::store::ItemStore;
use crate::loggers::LogThrottle;

/// Window for the "nothing to do" and repeated-failure log lines.
const QUIET_LOG_WINDOW: Duration = Duration::from_secs(60);

/// # Dispatcher Settings
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherSettings {
    /// Sleep between two cycles.
    pub claim_interval: Duration,
    /// Minimum age before a pending item may be claimed.
    pub old_data_threshold: Duration,
    /// Bound of the recently-assigned id set.
    pub recent_capacity: usize,
    /// Release claims older than this back to `Pending`. `None` disables the sweep.
    pub reclaim_after: Option<Duration>,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            claim_interval: Duration::from_secs(10),
            old_data_threshold: Duration::from_secs(5 * 60),
            recent_capacity: 1024,
            reclaim_after: None,
        }
    }
}

/// # Round-Robin Cursor
///
/// Hands out consumer ids `1..=count` in a fixed rotation. Owned by the
/// dispatcher alone and never persisted.
#[derive(Debug, Clone)]
pub struct RoundRobin {
    count: NonZeroU32,
    cursor: u64,
}

impl RoundRobin {
    /// Starts the rotation at consumer 1.
    pub fn new(count: NonZeroU32) -> Self {
        Self { count, cursor: 0 }
    }

    /// The next consumer id; always advances the cursor.
    pub fn next_consumer(&mut self) -> ConsumerId {
        let consumer = (self.cursor % u64::from(self.count.get())) as ConsumerId + 1;
        self.cursor = self.cursor.wrapping_add(1);
        consumer
    }

    /// Number of consumers in the rotation.
    pub fn count(&self) -> NonZeroU32 {
        self.count
    }
}

/// Bounded set of recently assigned item ids; the oldest entry is evicted
/// first once `capacity` is reached. Items whose assignment failed are never
/// recorded, so a reclaimed item is retried.
#[derive(Debug, Clone)]
pub struct RecentSet {
    capacity: usize,
    order: VecDeque<i64>,
    members: HashSet<i64>,
}

impl RecentSet {
    /// A set holding at most `capacity` ids (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    /// Whether `id` was recorded and not yet evicted.
    pub fn contains(&self, id: i64) -> bool {
        self.members.contains(&id)
    }

    /// Records `id`. Returns `false` if it was already present.
    pub fn insert(&mut self, id: i64) -> bool {
        if !self.members.insert(id) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
        true
    }

    /// Number of ids currently held.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the set holds no ids.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Outcome of one dispatcher cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Claims released back to `Pending` by the sweep.
    pub reclaimed: u64,
    /// Items returned by the claim call.
    pub claimed: usize,
    /// Items the store accepted as assigned.
    pub assigned: usize,
    /// Items the store refused to assign (already assigned or gone).
    pub rejected: usize,
    /// Items whose assignment call errored.
    pub failed: usize,
    /// Items skipped because they repeat within the batch or were assigned recently.
    pub duplicates: usize,
    /// The claim call itself failed; nothing was attempted.
    pub aborted: bool,
}

fn before(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::TimeDelta::from_std(age)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// # Dispatcher
pub struct Dispatcher {
    store: Arc<dyn ItemStore>,
    settings: DispatcherSettings,
    cursor: RoundRobin,
    recent: RecentSet,
    idle_log: LogThrottle,
    failure_log: LogThrottle,
    cycles: u64,
    assigned_total: u64,
}

impl Dispatcher {
    /// Creates a dispatcher routing to `monitor_count` consumers.
    pub fn new(store: Arc<dyn ItemStore>, monitor_count: NonZeroU32, settings: DispatcherSettings) -> Self {
        let recent = RecentSet::new(settings.recent_capacity);
        Self {
            store,
            settings,
            cursor: RoundRobin::new(monitor_count),
            recent,
            idle_log: LogThrottle::new(QUIET_LOG_WINDOW),
            failure_log: LogThrottle::new(QUIET_LOG_WINDOW),
            cycles: 0,
            assigned_total: 0,
        }
    }

    /// # Main Loop
    ///
    /// Runs cycles until `shutdown` is cancelled. A cycle in progress always
    /// completes before the token is looked at.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            monitors = self.cursor.count().get(),
            interval_secs = self.settings.claim_interval.as_secs_f64(),
            threshold_secs = self.settings.old_data_threshold.as_secs(),
            "Dispatcher started"
        );

        while !shutdown.is_cancelled() {
            self.run_cycle().await;

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.claim_interval) => {}
            }
        }

        info!(
            cycles = self.cycles,
            assigned = self.assigned_total,
            "Dispatcher stopped"
        );
    }

    /// Runs one cycle against the current UTC time.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.run_cycle_at(Utc::now()).await
    }

    /// Runs one cycle as if the current time were `now`.
    pub async fn run_cycle_at(&mut self, now: DateTime<Utc>) -> CycleReport {
        self.cycles += 1;
        let mut report = CycleReport::default();

        if let Some(reclaim_after) = self.settings.reclaim_after {
            match self.store.reclaim_stale_claims(before(now, reclaim_after)).await {
                Ok(0) => {}
                Ok(released) => {
                    warn!(released, "Released stale claims back to pending");
                    report.reclaimed = released;
                }
                Err(e) => {
                    error!(error = %e, "Reclaim sweep failed");
                }
            }
        }

        let threshold = before(now, self.settings.old_data_threshold);
        let claimed = match self.store.claim_pending_older_than(threshold).await {
            Ok(items) => items,
            Err(e) => {
                if let Some(suppressed) = self.failure_log.check() {
                    error!(error = %e, suppressed, "Claim failed, skipping this cycle");
                }
                report.aborted = true;
                return report;
            }
        };
        self.failure_log.reset();

        report.claimed = claimed.len();
        if claimed.is_empty() {
            if let Some(suppressed) = self.idle_log.check() {
                debug!(idle_cycles = suppressed + 1, "No items eligible for assignment");
            }
            return report;
        }

        let mut batch = HashSet::with_capacity(claimed.len());
        for item in claimed {
            if !batch.insert(item.id) || self.recent.contains(item.id) {
                debug!(item = item.id, "Item already processed, skipping");
                report.duplicates += 1;
                continue;
            }

            let consumer = self.cursor.next_consumer();
            match self.store.assign(item.id, consumer).await {
                Ok(true) => {
                    info!(item = item.id, monitor = consumer, "Assigned item to monitor");
                    self.recent.insert(item.id);
                    report.assigned += 1;
                }
                Ok(false) => {
                    warn!(
                        item = item.id,
                        monitor = consumer,
                        "Item was not assignable (already assigned or missing), skipping"
                    );
                    report.rejected += 1;
                }
                Err(e) => {
                    error!(item = item.id, monitor = consumer, error = %e, "Failed to assign item");
                    report.failed += 1;
                }
            }
        }

        self.assigned_total += report.assigned as u64;
        self.idle_log.reset();
        info!(
            claimed = report.claimed,
            assigned = report.assigned,
            rejected = report.rejected,
            failed = report.failed,
            duplicates = report.duplicates,
            "Dispatcher cycle complete"
        );
        report
    }
}
