//! # Core Engine Module
//!
//! The two halves of the monitor engine and the types they share.
//!
//! ## Components:
//!
//! - **`item`**: the stored unit of content and its lifecycle states.
//! - **`store`**: the `ItemStore` trait every persistence backend implements.
//! - **`dispatcher`**: background loop that claims aged pending items and
//!   assigns them to monitors in round-robin order.
//! - **`queue`**: per-monitor buffer guarded by a high-water mark so nothing
//!   is shown twice.
//! - **`registry`**: lazily created, process-wide rotation state per monitor.
//! - **`rotation`**: the timed state machine that decides what a monitor
//!   shows and produces snapshots for streaming sessions.

/// Items and their lifecycle states.
pub mod item;
/// Persistence abstraction.
pub mod store;
/// Claim-and-assign background loop.
pub mod dispatcher;
/// Per-monitor buffer of unseen items.
pub mod queue;
/// Shared per-monitor rotation state.
pub mod registry;
/// Display rotation state machine.
pub mod rotation;

// --- Public API Re-exports ---
pub use dispatcher::{CycleReport, Dispatcher, DispatcherSettings, RecentSet, RoundRobin};
pub use item::{consumer_key, ConsumerId, Item, ItemState};
pub use queue::ConsumerQueue;
pub use registry::{ConsumerRegistry, ConsumerSlot, CoreError};
pub use rotation::{ItemView, RotationEngine, RotationSettings, RotationSnapshot, RotationState};
pub use store::{ItemStore, StoreError};
