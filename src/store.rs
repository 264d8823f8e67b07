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

//! Shared storage for profiles, cards and the stamp event log.
//!
//! The [`LoyaltyStore`] trait is the only place devices coordinate. Card
//! counters are never overwritten with a row computed from a stale read:
//!
//! - [`LoyaltyStore::commit`] records an event and folds it into the card.
//!   Stores with transactions do both under one lock, as [`MemoryStore`] does.
//! - [`LoyaltyStore::swap_counters`] writes counters only if the card's version
//!   is still the one the caller read (compare-and-swap).
//!
//! A card's `applied_through` watermark names the last event folded into its
//! counters. Writers only ever fold the events past it, in id order, so an
//! event is counted at most once however many writers race to fold it.

use crate::base::{CardId, EventId, SubmissionId, UserId};
use crate::card::{Counters, LoyaltyCard};
use crate::event::{self, NewEvent, Projection, StampEvent};
use crate::profile::CustomerProfile;
use crate::StoreError;
use crossbeam::utils::Backoff;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Compare-and-swap attempts a sequenced commit makes to fold its event.
const SETTLE_ATTEMPTS: u32 = 16;

pub trait LoyaltyStore: Send + Sync {
    fn profile(&self, id: UserId) -> Result<Option<CustomerProfile>, StoreError>;

    /// Inserts a new profile.
    ///
    /// # Errors
    ///
    /// [`StoreError::UniqueViolation`] if a profile with the same id exists.
    fn insert_profile(&self, profile: CustomerProfile) -> Result<CustomerProfile, StoreError>;

    /// Overwrites an existing profile.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the profile does not exist.
    fn update_profile(&self, profile: CustomerProfile) -> Result<CustomerProfile, StoreError>;

    fn profiles(&self) -> Result<Vec<CustomerProfile>, StoreError>;

    fn card(&self, user: UserId) -> Result<Option<LoyaltyCard>, StoreError>;

    /// Inserts a zeroed card for `user`.
    ///
    /// # Errors
    ///
    /// [`StoreError::UniqueViolation`] if the user already has a card.
    fn insert_card(&self, user: UserId) -> Result<LoyaltyCard, StoreError>;

    fn cards(&self) -> Result<Vec<LoyaltyCard>, StoreError>;

    /// Appends an event to the log.
    ///
    /// A user's events must become visible in id order: once an id is
    /// readable, no lower id for the same user may appear later.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateSubmission`] if the event's submission id was
    /// already recorded.
    fn append_event(&self, draft: NewEvent) -> Result<StampEvent, StoreError>;

    /// Writes `counters` and the watermark if the card is still at
    /// `expected_version`.
    ///
    /// # Errors
    ///
    /// [`StoreError::VersionMismatch`] if another write happened in between.
    fn swap_counters(
        &self,
        user: UserId,
        expected_version: u64,
        counters: Counters,
        applied_through: Option<EventId>,
    ) -> Result<LoyaltyCard, StoreError>;

    /// Events of `user`, in id order.
    fn events(&self, user: UserId) -> Result<Vec<StampEvent>, StoreError>;

    /// Event recorded for a submission id, if any.
    fn submission(&self, id: SubmissionId) -> Result<Option<EventId>, StoreError>;

    /// Records the event and folds it into the card.
    ///
    /// Without a shared transaction the event goes first, since it is the
    /// source of truth, and the card then catches up with the log through
    /// [`swap_counters`](Self::swap_counters). A mutation is checked against
    /// the card plus every event already logged, so it is only appended when
    /// it applies. A mutation that still loses a race between the check and
    /// the append stays in the log as refused and its error is returned.
    ///
    /// If the card write fails, the event remains logged and the next commit
    /// or [`Ledger::reconcile`](crate::Ledger::reconcile) folds it in. Retrying
    /// such a failure is only safe with a submission id.
    fn commit(&self, draft: NewEvent) -> Result<(StampEvent, LoyaltyCard), StoreError> {
        if let Some(event) = draft.submission.map(|id| self.submission(id)).transpose()?.flatten() {
            return Err(StoreError::DuplicateSubmission(event));
        }

        let card = self.card(draft.user_id)?.ok_or(StoreError::NotFound)?;
        let mut projection = Projection::of(&card);
        projection.catch_up(&self.events(draft.user_id)?);
        draft.mutation.apply(projection.counters)?;

        let event = self.append_event(draft)?;
        let card = settle(self, &event)?;
        Ok((event, card))
    }
}

/// Folds the log into the card until `event` is covered by its watermark.
///
/// Returns the error of `event`'s mutation if the fold refused it.
fn settle<S: LoyaltyStore + ?Sized>(
    store: &S,
    event: &StampEvent,
) -> Result<LoyaltyCard, StoreError> {
    let backoff = Backoff::new();

    for _ in 0..SETTLE_ATTEMPTS {
        let card = store.card(event.user_id)?.ok_or(StoreError::NotFound)?;
        let log = store.events(event.user_id)?;

        if card.applied_through >= Some(event.id) {
            // Folded by another writer; the log tells whether it applied.
            return match event::replay(&log).refusal(event.id) {
                Some(e) => Err(e.clone()),
                None => Ok(card),
            };
        }

        let mut projection = Projection::of(&card);
        projection.catch_up(&log);
        match store.swap_counters(
            event.user_id,
            card.version,
            projection.counters,
            projection.applied_through,
        ) {
            Ok(card) => {
                return match projection.refusal(event.id) {
                    Some(e) => Err(e.clone()),
                    None => Ok(card),
                };
            }
            Err(StoreError::VersionMismatch) => backoff.snooze(),
            Err(e) => return Err(e),
        }
    }

    Err(StoreError::VersionMismatch)
}

/// In-process store backed by concurrent maps.
///
/// Each card row sits behind its own [`Mutex`], so writes to one customer
/// serialize while different customers proceed in parallel.
///
/// # Lock order
///
/// card row → submissions shard → events shard. Map guards are released
/// before a row lock is taken.
#[derive(Debug, Default)]
pub struct MemoryStore {
    profiles: DashMap<UserId, CustomerProfile>,
    cards: DashMap<UserId, Arc<Mutex<LoyaltyCard>>>,
    events: DashMap<UserId, Vec<StampEvent>>,
    /// Index over the log: one entry per event that carries a submission id.
    /// Like the log itself it is never pruned.
    submissions: DashMap<SubmissionId, EventId>,
    next_card_id: AtomicU64,
    next_event_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events across all users.
    pub fn event_count(&self) -> usize {
        self.events.iter().map(|log| log.len()).sum()
    }

    /// Number of submission ids on record.
    pub fn submission_count(&self) -> usize {
        self.submissions.len()
    }

    fn row(&self, user: UserId) -> Result<Arc<Mutex<LoyaltyCard>>, StoreError> {
        self.cards
            .get(&user)
            .map(|row| Arc::clone(&row))
            .ok_or(StoreError::NotFound)
    }

    /// Claims the submission id (if any) and appends the event.
    fn record(&self, draft: NewEvent) -> Result<StampEvent, StoreError> {
        let Some(submission) = draft.submission else {
            return Ok(self.push_event(draft));
        };

        match self.submissions.entry(submission) {
            Entry::Occupied(entry) => Err(StoreError::DuplicateSubmission(*entry.get())),
            Entry::Vacant(entry) => {
                let event = self.push_event(draft);
                entry.insert(event.id);
                Ok(event)
            }
        }
    }

    /// Events of `user` past the watermark.
    fn unfolded(&self, user: UserId, after: Option<EventId>) -> Vec<StampEvent> {
        self.events
            .get(&user)
            .map(|log| {
                let start = log.partition_point(|event| Some(event.id) <= after);
                log[start..].to_vec()
            })
            .unwrap_or_default()
    }

    fn push_event(&self, draft: NewEvent) -> StampEvent {
        let mut log = self.events.entry(draft.user_id).or_default();
        // Allocated under the log's shard lock so ids follow append order.
        let id = EventId(self.next_event_id.fetch_add(1, Ordering::Relaxed) + 1);
        let event = StampEvent::commit(id, draft);
        log.push(event.clone());
        event
    }
}

impl LoyaltyStore for MemoryStore {
    fn profile(&self, id: UserId) -> Result<Option<CustomerProfile>, StoreError> {
        Ok(self.profiles.get(&id).map(|profile| profile.clone()))
    }

    fn insert_profile(&self, profile: CustomerProfile) -> Result<CustomerProfile, StoreError> {
        match self.profiles.entry(profile.id) {
            Entry::Occupied(_) => Err(StoreError::UniqueViolation),
            Entry::Vacant(entry) => {
                entry.insert(profile.clone());
                Ok(profile)
            }
        }
    }

    fn update_profile(&self, profile: CustomerProfile) -> Result<CustomerProfile, StoreError> {
        let mut existing = self
            .profiles
            .get_mut(&profile.id)
            .ok_or(StoreError::NotFound)?;
        *existing = profile.clone();
        Ok(profile)
    }

    fn profiles(&self) -> Result<Vec<CustomerProfile>, StoreError> {
        Ok(self.profiles.iter().map(|p| p.value().clone()).collect())
    }

    fn card(&self, user: UserId) -> Result<Option<LoyaltyCard>, StoreError> {
        match self.row(user) {
            Ok(row) => Ok(Some(row.lock().clone())),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn insert_card(&self, user: UserId) -> Result<LoyaltyCard, StoreError> {
        match self.cards.entry(user) {
            Entry::Occupied(_) => Err(StoreError::UniqueViolation),
            Entry::Vacant(entry) => {
                // Ids are only spent on successful inserts.
                let id = CardId(self.next_card_id.fetch_add(1, Ordering::Relaxed) + 1);
                let card = LoyaltyCard::new(id, user);
                entry.insert(Arc::new(Mutex::new(card.clone())));
                Ok(card)
            }
        }
    }

    fn cards(&self) -> Result<Vec<LoyaltyCard>, StoreError> {
        let rows: Vec<_> = self.cards.iter().map(|row| Arc::clone(row.value())).collect();
        Ok(rows.iter().map(|row| row.lock().clone()).collect())
    }

    fn append_event(&self, draft: NewEvent) -> Result<StampEvent, StoreError> {
        self.record(draft)
    }

    fn swap_counters(
        &self,
        user: UserId,
        expected_version: u64,
        counters: Counters,
        applied_through: Option<EventId>,
    ) -> Result<LoyaltyCard, StoreError> {
        let row = self.row(user)?;
        let mut card = row.lock();
        if card.version != expected_version {
            return Err(StoreError::VersionMismatch);
        }
        card.write(counters, applied_through);
        Ok(card.clone())
    }

    fn events(&self, user: UserId) -> Result<Vec<StampEvent>, StoreError> {
        Ok(self
            .events
            .get(&user)
            .map(|log| log.clone())
            .unwrap_or_default())
    }

    fn submission(&self, id: SubmissionId) -> Result<Option<EventId>, StoreError> {
        Ok(self.submissions.get(&id).map(|event| *event))
    }

    /// Validates, logs and applies under the card's row lock, so the event
    /// and the counters are written together or not at all.
    fn commit(&self, draft: NewEvent) -> Result<(StampEvent, LoyaltyCard), StoreError> {
        if let Some(event) = draft.submission.and_then(|id| self.submissions.get(&id)) {
            return Err(StoreError::DuplicateSubmission(*event));
        }

        let row = self.row(draft.user_id)?;
        let mut card = row.lock();

        // Events appended outside `commit` are folded in first.
        let mut projection = Projection::of(&card);
        projection.catch_up(&self.unfolded(draft.user_id, card.applied_through));

        let next = draft.mutation.apply(projection.counters)?;
        let event = self.record(draft)?;
        card.write(next, Some(event.id));

        Ok((event, card.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::CardMutation;

    fn grant(user: UserId, amount: u32, submission: Option<SubmissionId>) -> NewEvent {
        NewEvent {
            user_id: user,
            staff_id: UserId::new_v4(),
            mutation: CardMutation::Grant { amount },
            submission,
        }
    }

    #[test]
    fn second_card_insert_collides() {
        let store = MemoryStore::new();
        let user = UserId::new_v4();
        let card = store.insert_card(user).unwrap();
        assert_eq!(store.insert_card(user), Err(StoreError::UniqueViolation));
        assert_eq!(store.card(user).unwrap().unwrap().id, card.id);
    }

    #[test]
    fn card_ids_are_not_spent_on_collisions() {
        let store = MemoryStore::new();
        let user = UserId::new_v4();
        store.insert_card(user).unwrap();
        let _ = store.insert_card(user);
        let other = store.insert_card(UserId::new_v4()).unwrap();
        assert_eq!(other.id, CardId(2));
    }

    #[test]
    fn commit_writes_event_and_counters() {
        let store = MemoryStore::new();
        let user = UserId::new_v4();
        store.insert_card(user).unwrap();

        let (event, card) = store.commit(grant(user, 3, None)).unwrap();
        assert_eq!(event.granted(), 3);
        assert_eq!(card.current_stamps(), 3);
        assert_eq!(card.version, 1);
        assert_eq!(store.events(user).unwrap(), vec![event]);
    }

    #[test]
    fn rejected_commit_writes_nothing() {
        let store = MemoryStore::new();
        let user = UserId::new_v4();
        store.insert_card(user).unwrap();

        let redeem = NewEvent {
            mutation: CardMutation::Redemption { stamps: 10 },
            ..grant(user, 0, None)
        };
        assert!(matches!(
            store.commit(redeem),
            Err(StoreError::InsufficientStamps { .. })
        ));
        assert_eq!(store.event_count(), 0);
        assert_eq!(store.card(user).unwrap().unwrap().version, 0);
    }

    #[test]
    fn duplicate_submission_is_refused() {
        let store = MemoryStore::new();
        let user = UserId::new_v4();
        store.insert_card(user).unwrap();
        let submission = SubmissionId::new_v4();

        let (first, _) = store.commit(grant(user, 1, Some(submission))).unwrap();
        let second = store.commit(grant(user, 1, Some(submission)));

        assert_eq!(second, Err(StoreError::DuplicateSubmission(first.id)));
        assert_eq!(store.submission(submission).unwrap(), Some(first.id));
        assert_eq!(store.card(user).unwrap().unwrap().current_stamps(), 1);
        assert_eq!(store.event_count(), 1);
    }

    #[test]
    fn swap_requires_current_version() {
        let store = MemoryStore::new();
        let user = UserId::new_v4();
        store.insert_card(user).unwrap();
        let (event, _) = store.commit(grant(user, 1, None)).unwrap();

        let stale = store.swap_counters(user, 0, Counters::default(), None);
        assert_eq!(stale, Err(StoreError::VersionMismatch));

        let fresh = store
            .swap_counters(user, 1, Counters::default(), Some(event.id))
            .unwrap();
        assert_eq!(fresh.version, 2);
        assert_eq!(fresh.counters, Counters::default());
        assert_eq!(fresh.applied_through, Some(event.id));
    }

    #[test]
    fn commit_on_missing_card_is_not_found() {
        let store = MemoryStore::new();
        let result = store.commit(grant(UserId::new_v4(), 1, None));
        assert_eq!(result, Err(StoreError::NotFound));
        assert_eq!(store.event_count(), 0);
    }

    #[test]
    fn commit_advances_watermark() {
        let store = MemoryStore::new();
        let user = UserId::new_v4();
        store.insert_card(user).unwrap();

        store.commit(grant(user, 1, None)).unwrap();
        let (event, card) = store.commit(grant(user, 1, None)).unwrap();
        assert_eq!(card.applied_through, Some(event.id));
    }

    #[test]
    fn commit_folds_events_logged_without_a_card_write() {
        let store = MemoryStore::new();
        let user = UserId::new_v4();
        store.insert_card(user).unwrap();
        store.append_event(grant(user, 4, None)).unwrap();

        let (event, card) = store.commit(grant(user, 1, None)).unwrap();
        assert_eq!(card.current_stamps(), 5);
        assert_eq!(card.total_visits(), 2);
        assert_eq!(card.applied_through, Some(event.id));
    }

    #[test]
    fn sequenced_commit_counts_each_event_once() {
        // Wrapper that keeps the provided sequenced commit.
        struct Sequenced(MemoryStore);

        impl LoyaltyStore for Sequenced {
            fn profile(&self, id: UserId) -> Result<Option<CustomerProfile>, StoreError> {
                self.0.profile(id)
            }
            fn insert_profile(&self, p: CustomerProfile) -> Result<CustomerProfile, StoreError> {
                self.0.insert_profile(p)
            }
            fn update_profile(&self, p: CustomerProfile) -> Result<CustomerProfile, StoreError> {
                self.0.update_profile(p)
            }
            fn profiles(&self) -> Result<Vec<CustomerProfile>, StoreError> {
                self.0.profiles()
            }
            fn card(&self, user: UserId) -> Result<Option<LoyaltyCard>, StoreError> {
                self.0.card(user)
            }
            fn insert_card(&self, user: UserId) -> Result<LoyaltyCard, StoreError> {
                self.0.insert_card(user)
            }
            fn cards(&self) -> Result<Vec<LoyaltyCard>, StoreError> {
                self.0.cards()
            }
            fn append_event(&self, draft: NewEvent) -> Result<StampEvent, StoreError> {
                self.0.append_event(draft)
            }
            fn swap_counters(
                &self,
                user: UserId,
                expected_version: u64,
                counters: Counters,
                applied_through: Option<EventId>,
            ) -> Result<LoyaltyCard, StoreError> {
                self.0
                    .swap_counters(user, expected_version, counters, applied_through)
            }
            fn events(&self, user: UserId) -> Result<Vec<StampEvent>, StoreError> {
                self.0.events(user)
            }
            fn submission(&self, id: SubmissionId) -> Result<Option<EventId>, StoreError> {
                self.0.submission(id)
            }
        }

        let store = Sequenced(MemoryStore::new());
        let user = UserId::new_v4();
        store.insert_card(user).unwrap();

        // A grant that was logged but whose card write never happened.
        let orphan = store.append_event(grant(user, 2, None)).unwrap();
        let (_, card) = store.commit(grant(user, 3, None)).unwrap();
        assert_eq!(card.current_stamps(), 5);

        // Settling the orphan again changes nothing.
        assert_eq!(settle(&store, &orphan).unwrap(), card);

        let submission = SubmissionId::new_v4();
        let (first, _) = store.commit(grant(user, 1, Some(submission))).unwrap();
        assert_eq!(
            store.commit(grant(user, 1, Some(submission))),
            Err(StoreError::DuplicateSubmission(first.id))
        );
        assert_eq!(store.card(user).unwrap().unwrap().current_stamps(), 6);
    }

    #[test]
    fn submission_index_never_outgrows_the_log() {
        let store = MemoryStore::new();
        let user = UserId::new_v4();
        store.insert_card(user).unwrap();
        let submission = SubmissionId::new_v4();

        store.commit(grant(user, 1, Some(submission))).unwrap();
        let _ = store.commit(grant(user, 1, Some(submission)));
        store.commit(grant(user, 1, None)).unwrap();

        assert_eq!(store.submission_count(), 1);
        assert_eq!(store.event_count(), 2);
    }

    #[test]
    fn update_profile_requires_existing_row() {
        let store = MemoryStore::new();
        let profile = CustomerProfile::placeholder(UserId::new_v4());
        assert_eq!(
            store.update_profile(profile.clone()),
            Err(StoreError::NotFound)
        );
        store.insert_profile(profile.clone()).unwrap();
        assert_eq!(
            store.insert_profile(profile.clone()),
            Err(StoreError::UniqueViolation)
        );
    }
}
