// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Loyalty card aggregate and the mutations that advance it.
//!
//! Every change to a card is a [`CardMutation`]. The store applies it to the
//! current [`Counters`] while holding the card's lock, or folds it in with a
//! versioned compare-and-swap, so two writers never overwrite each other's
//! work with a stale read.
//!
//! # Example
//!
//! ```
//! use loyalty_ledger::{CardMutation, Counters};
//!
//! let counters = CardMutation::Grant { amount: 3 }
//!     .apply(Counters::default())
//!     .unwrap();
//! assert_eq!(counters.current_stamps, 3);
//! assert_eq!(counters.total_visits, 1);
//! ```

use crate::StoreError;
use crate::base::{CardId, EventId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The derived totals of a card.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    /// Stamps toward the next reward.
    pub current_stamps: u32,
    /// Lifetime stamps granted.
    pub total_stamps: u32,
    /// Lifetime crediting operations, plus console adjustments.
    pub total_visits: u32,
}

impl Counters {
    fn assert_invariants(&self) {
        debug_assert!(
            self.total_stamps >= self.current_stamps,
            "Invariant violated: current stamps {} exceed lifetime stamps {}",
            self.current_stamps,
            self.total_stamps
        );
    }
}

/// A single change to a card, also recorded as the kind of its audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CardMutation {
    /// Staff credited stamps: one visit, `amount` stamps.
    Grant { amount: u32 },
    /// Console correction of the visit count, floored at zero.
    Adjustment { delta: i64 },
    /// A reward was claimed, consuming `stamps` from the current count.
    Redemption { stamps: u32 },
}

impl CardMutation {
    /// Computes the counters that result from applying this mutation.
    ///
    /// # Errors
    ///
    /// - [`StoreError::CounterOverflow`] - A counter would exceed `u32::MAX`.
    /// - [`StoreError::InsufficientStamps`] - Redemption larger than the current count.
    pub fn apply(&self, counters: Counters) -> Result<Counters, StoreError> {
        let mut next = counters;
        match *self {
            Self::Grant { amount } => {
                next.current_stamps = add(next.current_stamps, amount)?;
                next.total_stamps = add(next.total_stamps, amount)?;
                next.total_visits = add(next.total_visits, 1)?;
            }
            Self::Adjustment { delta } => {
                let visits = i64::from(next.total_visits).saturating_add(delta).max(0);
                next.total_visits =
                    u32::try_from(visits).map_err(|_| StoreError::CounterOverflow)?;
            }
            Self::Redemption { stamps } => {
                next.current_stamps = next.current_stamps.checked_sub(stamps).ok_or(
                    StoreError::InsufficientStamps {
                        available: next.current_stamps,
                        required: stamps,
                    },
                )?;
            }
        }
        next.assert_invariants();
        Ok(next)
    }
}

fn add(value: u32, amount: u32) -> Result<u32, StoreError> {
    value.checked_add(amount).ok_or(StoreError::CounterOverflow)
}

/// Snapshot of a customer's loyalty card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoyaltyCard {
    pub id: CardId,
    pub user_id: UserId,
    #[serde(flatten)]
    pub counters: Counters,
    /// Bumped on every write.
    pub version: u64,
    /// Last event folded into the counters; later events are still pending.
    #[serde(default)]
    pub applied_through: Option<EventId>,
    pub updated_at: DateTime<Utc>,
}

impl LoyaltyCard {
    pub fn new(id: CardId, user_id: UserId) -> Self {
        Self {
            id,
            user_id,
            counters: Counters::default(),
            version: 0,
            applied_through: None,
            updated_at: Utc::now(),
        }
    }

    pub fn current_stamps(&self) -> u32 {
        self.counters.current_stamps
    }

    pub fn total_stamps(&self) -> u32 {
        self.counters.total_stamps
    }

    pub fn total_visits(&self) -> u32 {
        self.counters.total_visits
    }

    /// Replaces the counters and advances watermark, version and timestamp.
    pub(crate) fn write(&mut self, counters: Counters, applied_through: Option<EventId>) {
        self.counters = counters;
        self.applied_through = applied_through;
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(current: u32, total: u32, visits: u32) -> Counters {
        Counters {
            current_stamps: current,
            total_stamps: total,
            total_visits: visits,
        }
    }

    #[test]
    fn grant_counts_one_visit_per_operation() {
        let next = CardMutation::Grant { amount: 4 }
            .apply(counters(2, 5, 3))
            .unwrap();
        assert_eq!(next, counters(6, 9, 4));
    }

    #[test]
    fn adjustment_is_floored_at_zero() {
        let next = CardMutation::Adjustment { delta: -1000 }
            .apply(counters(1, 1, 3))
            .unwrap();
        assert_eq!(next.total_visits, 0);
        assert_eq!(next.current_stamps, 1);
    }

    #[test]
    fn adjustment_adds_visits() {
        let next = CardMutation::Adjustment { delta: 5 }
            .apply(counters(0, 0, 3))
            .unwrap();
        assert_eq!(next.total_visits, 8);
    }

    #[test]
    fn redemption_consumes_current_only() {
        let next = CardMutation::Redemption { stamps: 10 }
            .apply(counters(12, 12, 6))
            .unwrap();
        assert_eq!(next, counters(2, 12, 6));
    }

    #[test]
    fn redemption_requires_enough_stamps() {
        let result = CardMutation::Redemption { stamps: 10 }.apply(counters(7, 7, 2));
        assert_eq!(
            result,
            Err(StoreError::InsufficientStamps {
                available: 7,
                required: 10
            })
        );
    }

    #[test]
    fn grant_overflow_is_an_error() {
        let result = CardMutation::Grant { amount: 1 }.apply(counters(0, u32::MAX, 0));
        assert_eq!(result, Err(StoreError::CounterOverflow));
    }

    #[test]
    fn write_bumps_version() {
        let mut card = LoyaltyCard::new(CardId(1), UserId::new_v4());
        let before = card.updated_at;
        card.write(counters(1, 1, 1), Some(EventId(3)));
        assert_eq!(card.version, 1);
        assert_eq!(card.applied_through, Some(EventId(3)));
        assert_eq!(card.current_stamps(), 1);
        assert!(card.updated_at >= before);
    }

    #[test]
    fn mutation_serializes_tagged() {
        let json = serde_json::to_string(&CardMutation::Grant { amount: 2 }).unwrap();
        assert_eq!(json, r#"{"kind":"grant","amount":2}"#);
    }
}
