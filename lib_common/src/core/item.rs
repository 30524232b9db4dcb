//! # Item Model and Lifecycle
//!
//! An `Item` is a unit of work created by the ingestion endpoint and later
//! routed to one of the display monitors. Its lifecycle is a tiny state
//! machine enforced jointly by the store adapters and the dispatcher:
//!
//! ```text
//! Pending ──claim──> Claimed ──assign──> Assigned
//!    ^                  │
//!    └────reclaim───────┘
//! ```
//!
//! `Pending -> Assigned` is also legal: the store's `assign` accepts a
//! still-pending row as a fallback. Nothing ever leaves `Assigned`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a display monitor, in `1..=N`.
pub type ConsumerId = u32;

/// # Item State
///
/// Lifecycle state of an item. The discriminants are the codes persisted in
/// the `state` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Waiting to become old enough to be claimed.
    Pending = 0,
    /// Held by a dispatcher between claim and assignment.
    Claimed = -1,
    /// Routed to a monitor. Terminal.
    Assigned = 1,
}

impl ItemState {
    /// The code stored in the database for this state.
    pub fn code(self) -> i16 {
        self as i16
    }

    /// Decodes a stored state code.
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(ItemState::Pending),
            -1 => Some(ItemState::Claimed),
            1 => Some(ItemState::Assigned),
            _ => None,
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: ItemState) -> bool {
        matches!(
            (self, next),
            (ItemState::Pending, ItemState::Claimed)
                | (ItemState::Pending, ItemState::Assigned)
                | (ItemState::Claimed, ItemState::Assigned)
                | (ItemState::Claimed, ItemState::Pending)
        )
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ItemState::Pending => "pending",
            ItemState::Claimed => "claimed",
            ItemState::Assigned => "assigned",
        };
        f.write_str(label)
    }
}

/// # Item
///
/// A row of the item table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Store-assigned, strictly increasing id. Ordering and de-duplication key.
    pub id: i64,
    /// Opaque payload.
    pub text: String,
    /// Current lifecycle state.
    pub state: ItemState,
    /// Creation time; drives claim eligibility.
    pub created_at: DateTime<Utc>,
    /// Set when the item becomes `Assigned`.
    pub assigned_at: Option<DateTime<Utc>>,
    /// Monitor the item was routed to, as stored (`"1"`, `"2"`, ...).
    pub assigned_consumer: Option<String>,
}

impl Item {
    /// A fresh pending item.
    pub fn pending(id: i64, text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            text: text.into(),
            state: ItemState::Pending,
            created_at,
            assigned_at: None,
            assigned_consumer: None,
        }
    }

    /// Whether this item was assigned to `consumer`.
    pub fn is_assigned_to(&self, consumer: ConsumerId) -> bool {
        self.state == ItemState::Assigned
            && self.assigned_consumer.as_deref() == Some(consumer_key(consumer).as_str())
    }
}

/// The string form a consumer id takes in the `assigned_consumer` column.
pub fn consumer_key(consumer: ConsumerId) -> String {
    consumer.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_codes_round_trip() {
        for state in [ItemState::Pending, ItemState::Claimed, ItemState::Assigned] {
            assert_eq!(ItemState::from_code(state.code()), Some(state));
        }
        assert_eq!(ItemState::Claimed.code(), -1);
        assert_eq!(ItemState::from_code(7), None);
    }

    #[test]
    fn assigned_is_terminal() {
        for next in [ItemState::Pending, ItemState::Claimed, ItemState::Assigned] {
            assert!(!ItemState::Assigned.can_transition_to(next));
        }
        assert!(ItemState::Pending.can_transition_to(ItemState::Claimed));
        assert!(ItemState::Claimed.can_transition_to(ItemState::Pending));
        assert!(!ItemState::Pending.can_transition_to(ItemState::Pending));
    }

    #[test]
    fn assignment_check_uses_consumer_key() {
        let mut item = Item::pending(3, "hello", Utc::now());
        assert!(!item.is_assigned_to(2));
        item.state = ItemState::Assigned;
        item.assigned_consumer = Some("2".to_string());
        assert!(item.is_assigned_to(2));
        assert!(!item.is_assigned_to(1));
    }
}
