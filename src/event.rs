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

//! Audit trail records.
//!
//! Events are append-only. The card counters are their projection:
//! [`replay`] folds a customer's events back into [`Counters`], and a card's
//! `applied_through` watermark records how far into the log it has folded.

use crate::StoreError;
use crate::base::{EventId, SubmissionId, UserId};
use crate::card::{CardMutation, Counters, LoyaltyCard};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An event not yet committed. The store assigns id and timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewEvent {
    pub user_id: UserId,
    pub staff_id: UserId,
    pub mutation: CardMutation,
    pub submission: Option<SubmissionId>,
}

/// Immutable record of one change applied to a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampEvent {
    pub id: EventId,
    /// Recipient.
    pub user_id: UserId,
    /// Grantor.
    pub staff_id: UserId,
    #[serde(flatten)]
    pub mutation: CardMutation,
    pub submission: Option<SubmissionId>,
    pub created_at: DateTime<Utc>,
}

impl StampEvent {
    pub(crate) fn commit(id: EventId, draft: NewEvent) -> Self {
        Self {
            id,
            user_id: draft.user_id,
            staff_id: draft.staff_id,
            mutation: draft.mutation,
            submission: draft.submission,
            created_at: Utc::now(),
        }
    }

    /// Stamps credited by this event, zero for non-grants.
    pub fn granted(&self) -> u32 {
        match self.mutation {
            CardMutation::Grant { amount } => amount,
            _ => 0,
        }
    }
}

/// Counters folded from a prefix of a customer's event log.
///
/// Events are folded strictly in id order, each at most once. An event whose
/// mutation cannot apply at its position (a redemption that lost a race, an
/// overflowing grant) is refused: it stays in the log with no effect on the
/// counters, and every fold of the same log refuses it again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    pub counters: Counters,
    /// Highest event id folded in, refused events included.
    pub applied_through: Option<EventId>,
    /// Refused events with the error their mutation raised.
    pub refused: Vec<(EventId, StoreError)>,
}

impl Projection {
    /// Starts from a card, which already holds every event up to its watermark.
    pub fn of(card: &LoyaltyCard) -> Self {
        Self {
            counters: card.counters,
            applied_through: card.applied_through,
            refused: Vec::new(),
        }
    }

    /// Folds the events past the watermark, in id order.
    pub fn catch_up<'a>(&mut self, events: impl IntoIterator<Item = &'a StampEvent>) {
        let mut pending: Vec<&StampEvent> = events
            .into_iter()
            .filter(|event| Some(event.id) > self.applied_through)
            .collect();
        pending.sort_by_key(|event| event.id);

        for event in pending {
            match event.mutation.apply(self.counters) {
                Ok(next) => self.counters = next,
                Err(e) => self.refused.push((event.id, e)),
            }
            self.applied_through = Some(event.id);
        }
    }

    /// Why `event` was refused, if it was.
    pub fn refusal(&self, event: EventId) -> Option<&StoreError> {
        self.refused
            .iter()
            .find(|(id, _)| *id == event)
            .map(|(_, e)| e)
    }
}

/// Rebuilds a card's projection from its whole event log.
pub fn replay<'a>(events: impl IntoIterator<Item = &'a StampEvent>) -> Projection {
    let mut projection = Projection::default();
    projection.catch_up(events);
    projection
}
