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

//! Stamp ledger.
//!
//! The [`Ledger`] is the entry point staff and customer devices share. It
//! provisions records, commits card mutations together with their audit
//! events, and hands every new snapshot to the [`ChangeNotifier`].
//!
//! # Operations
//!
//! - **Grants**: credit stamps and one visit; provisions profile and card if needed.
//! - **Adjustments**: console corrections of the visit count, floored at zero.
//! - **Redemptions**: consume one reward's worth of stamps.
//! - **Reconcile**: rebuild a card from its event log.
//!
//! # Concurrency
//!
//! Mutations never write a counter value computed from an earlier read. The
//! store folds each logged event into the card exactly once, in event id
//! order, and the card remembers the last event it folded. Concurrent grants
//! on one card all land, and a reconcile racing a commit cannot count the
//! same event twice.

use crate::base::{SubmissionId, UserId};
use crate::card::{CardMutation, LoyaltyCard};
use crate::config::LedgerConfig;
use crate::console::CustomerSummary;
use crate::event::{self, NewEvent, StampEvent};
use crate::notifier::{ChangeNotifier, Subscription};
use crate::profile::{CustomerProfile, ProfileDetails, Role};
use crate::provision::Provisioner;
use crate::reward::{RewardProgress, evaluate_reward};
use crate::store::{LoyaltyStore, MemoryStore};
use crate::{LedgerError, StoreError};
use crossbeam::utils::Backoff;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One crediting operation as submitted by a staff device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantRequest {
    pub customer: UserId,
    pub staff: UserId,
    /// Raw operator input; validated before any write.
    pub amount: i64,
    /// Reused across retries of the same pending grant.
    pub submission: Option<SubmissionId>,
}

pub struct Ledger {
    store: Arc<dyn LoyaltyStore>,
    provisioner: Provisioner,
    notifier: ChangeNotifier,
    config: LedgerConfig,
}

impl Ledger {
    pub fn new(store: Arc<dyn LoyaltyStore>, config: LedgerConfig) -> Self {
        Self {
            provisioner: Provisioner::new(Arc::clone(&store)),
            notifier: ChangeNotifier::new(Arc::clone(&store), &config),
            store,
            config,
        }
    }

    /// A ledger over a fresh [`MemoryStore`] with default configuration.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), LedgerConfig::default())
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    pub fn ensure_profile(&self, user: UserId) -> Result<CustomerProfile, LedgerError> {
        self.provisioner.ensure_profile(user)
    }

    pub fn ensure_card(&self, user: UserId) -> Result<LoyaltyCard, LedgerError> {
        self.provisioner.ensure_card(user)
    }

    pub fn complete_profile(
        &self,
        user: UserId,
        details: ProfileDetails,
    ) -> Result<CustomerProfile, LedgerError> {
        self.provisioner.complete_profile(user, details)
    }

    /// Credits `amount` stamps and one visit to `customer`'s card.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - `amount` is not in `1..=u32::MAX`; nothing is written.
    /// - [`LedgerError::Provision`] - The profile or card did not exist and could not be created.
    /// - [`LedgerError::Store`] - The grant could not be recorded; safe to retry.
    pub fn record_stamp_grant(
        &self,
        customer: UserId,
        staff: UserId,
        amount: i64,
    ) -> Result<LoyaltyCard, LedgerError> {
        self.submit_grant(GrantRequest {
            customer,
            staff,
            amount,
            submission: None,
        })
    }

    /// Records a grant, applying each submission id at most once.
    ///
    /// A repeated submission id returns the current card and writes nothing.
    pub fn submit_grant(&self, request: GrantRequest) -> Result<LoyaltyCard, LedgerError> {
        let amount = u32::try_from(request.amount)
            .ok()
            .filter(|amount| *amount > 0)
            .ok_or(LedgerError::InvalidAmount)?;

        self.apply(
            request.customer,
            request.staff,
            CardMutation::Grant { amount },
            request.submission,
        )
    }

    /// Adds `delta` visits to `customer`'s card, never going below zero.
    ///
    /// Recorded as an adjustment event attributed to `actor`. A zero delta
    /// writes nothing and returns the current card.
    pub fn adjust_visits(
        &self,
        customer: UserId,
        actor: UserId,
        delta: i64,
    ) -> Result<LoyaltyCard, LedgerError> {
        if delta == 0 {
            return self.ensure_card(customer);
        }
        self.apply(customer, actor, CardMutation::Adjustment { delta }, None)
    }

    /// Claims one reward, consuming the configured number of stamps.
    ///
    /// # Errors
    ///
    /// [`LedgerError::RewardNotReached`] if the card holds fewer stamps.
    pub fn redeem_reward(
        &self,
        customer: UserId,
        staff: UserId,
    ) -> Result<LoyaltyCard, LedgerError> {
        let stamps = self.config.required_stamps.get();
        self.apply(customer, staff, CardMutation::Redemption { stamps }, None)
            .map_err(|e| match e {
                LedgerError::Store(StoreError::InsufficientStamps {
                    available,
                    required,
                }) => LedgerError::RewardNotReached {
                    current: available,
                    required,
                },
                other => other,
            })
    }

    fn apply(
        &self,
        customer: UserId,
        actor: UserId,
        mutation: CardMutation,
        submission: Option<SubmissionId>,
    ) -> Result<LoyaltyCard, LedgerError> {
        self.ensure_profile(customer)?;
        self.ensure_card(customer)?;

        let draft = NewEvent {
            user_id: customer,
            staff_id: actor,
            mutation,
            submission,
        };

        match self.store.commit(draft) {
            Ok((event, card)) => {
                info!(
                    %customer,
                    staff = %actor,
                    event = %event.id,
                    ?mutation,
                    current_stamps = card.current_stamps(),
                    total_visits = card.total_visits(),
                    "card updated"
                );
                self.notifier.publish(&card);
                Ok(card)
            }
            Err(StoreError::DuplicateSubmission(event)) => {
                debug!(%customer, %event, "submission already recorded");
                self.poll_card(customer)
            }
            Err(e @ (StoreError::InsufficientStamps { .. } | StoreError::CounterOverflow)) => {
                Err(e.into())
            }
            Err(e) => {
                error!(%customer, staff = %actor, ?mutation, error = %e, "could not record change");
                Err(e.into())
            }
        }
    }

    /// Reads `customer`'s card straight from the store.
    pub fn poll_card(&self, customer: UserId) -> Result<LoyaltyCard, LedgerError> {
        self.store.card(customer)?.ok_or(LedgerError::CardNotFound)
    }

    /// Every card in the store, in no particular order.
    pub fn cards(&self) -> Result<Vec<LoyaltyCard>, LedgerError> {
        Ok(self.store.cards()?)
    }

    /// `customer`'s audit trail in commit order.
    pub fn events(&self, customer: UserId) -> Result<Vec<StampEvent>, LedgerError> {
        Ok(self.store.events(customer)?)
    }

    /// Rebuilds `customer`'s counters from the event log.
    ///
    /// The rebuilt counters and watermark are written with a compare-and-swap
    /// against the version read before the log; a concurrent write forces a
    /// re-read. Logged changes that could not apply stay without effect.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Conflict`] once `max_conflict_retries` attempts lose.
    pub fn reconcile(&self, customer: UserId) -> Result<LoyaltyCard, LedgerError> {
        let attempts = self.config.max_conflict_retries.max(1);
        let backoff = Backoff::new();

        for attempt in 1..=attempts {
            let card = self.poll_card(customer)?;
            let events = self.store.events(customer)?;
            let rebuilt = event::replay(&events);

            if rebuilt.counters == card.counters && rebuilt.applied_through == card.applied_through {
                return Ok(card);
            }

            match self.store.swap_counters(
                customer,
                card.version,
                rebuilt.counters,
                rebuilt.applied_through,
            ) {
                Ok(card) => {
                    warn!(
                        %customer,
                        events = events.len(),
                        refused = rebuilt.refused.len(),
                        "card rebuilt from event log"
                    );
                    self.notifier.publish(&card);
                    return Ok(card);
                }
                Err(StoreError::VersionMismatch) => {
                    debug!(%customer, attempt, "card changed during reconcile, retrying");
                    backoff.snooze();
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(LedgerError::Conflict { attempts })
    }

    /// Starts delivering `customer`'s card to `on_change`.
    ///
    /// See [`ChangeNotifier::subscribe`].
    pub fn subscribe_card<F>(
        &self,
        customer: UserId,
        on_change: F,
    ) -> Result<Subscription, LedgerError>
    where
        F: FnMut(&LoyaltyCard) + Send + 'static,
    {
        self.notifier.subscribe(customer, on_change)
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.notifier.unsubscribe(subscription);
    }

    /// Reward progress for a card under the configured threshold.
    pub fn reward(&self, card: &LoyaltyCard) -> RewardProgress {
        evaluate_reward(card.current_stamps(), self.config.required_stamps)
    }

    /// Customers with their visit counts, most visits first.
    pub fn customer_visits(&self) -> Result<Vec<CustomerSummary>, LedgerError> {
        let visits: HashMap<UserId, u32> = self
            .store
            .cards()?
            .into_iter()
            .map(|card| (card.user_id, card.total_visits()))
            .collect();

        let mut customers: Vec<CustomerSummary> = self
            .store
            .profiles()?
            .into_iter()
            .filter(|profile| profile.role == Role::Customer)
            .map(|profile| {
                let visits = visits.get(&profile.id).copied().unwrap_or(0);
                CustomerSummary::new(&profile, visits)
            })
            .collect();

        customers.sort_by(|a, b| b.visits.cmp(&a.visits).then_with(|| a.name.cmp(&b.name)));
        Ok(customers)
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::in_memory()
    }
}
