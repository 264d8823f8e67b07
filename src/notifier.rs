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

//! Live delivery of card snapshots to viewers.
//!
//! Each customer with at least one viewer has a broadcast topic. Viewers of
//! the same customer share it; the topic is removed when the last
//! [`Subscription`] is dropped.
//!
//! Push delivery can be late, lost or switched off, so every subscription
//! also polls the store on a fixed interval. Push and poll feed the same
//! latest-known slot; whichever value arrives last wins, and the callback
//! only runs when the value changes.

use crate::base::UserId;
use crate::card::LoyaltyCard;
use crate::config::LedgerConfig;
use crate::store::LoyaltyStore;
use crate::LedgerError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

/// Pending snapshots per topic before slow viewers start lagging.
const TOPIC_CAPACITY: usize = 16;

type Topics = DashMap<UserId, Topic>;

struct Topic {
    sender: broadcast::Sender<LoyaltyCard>,
    subscribers: usize,
}

impl Topic {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(TOPIC_CAPACITY);
        Self {
            sender,
            subscribers: 0,
        }
    }
}

pub struct ChangeNotifier {
    store: Arc<dyn LoyaltyStore>,
    topics: Arc<Topics>,
    poll_interval: Duration,
    push_enabled: bool,
}

impl ChangeNotifier {
    pub fn new(store: Arc<dyn LoyaltyStore>, config: &LedgerConfig) -> Self {
        Self {
            store,
            topics: Arc::new(DashMap::new()),
            poll_interval: config.poll_interval(),
            push_enabled: config.push_enabled,
        }
    }

    /// Pushes a snapshot to the card owner's viewers, if any.
    pub fn publish(&self, card: &LoyaltyCard) {
        if !self.push_enabled {
            return;
        }
        if let Some(topic) = self.topics.get(&card.user_id) {
            // Fails only when every receiver is gone; polling covers it.
            let delivered = topic.sender.send(card.clone()).unwrap_or(0);
            debug!(user = %card.user_id, version = card.version, delivered, "card pushed");
        }
    }

    /// Starts delivering `user`'s card to `on_change`.
    ///
    /// The first poll runs immediately, so an existing card is delivered
    /// without waiting for a change.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NoRuntime`] when called outside a Tokio runtime.
    pub fn subscribe<F>(&self, user: UserId, on_change: F) -> Result<Subscription, LedgerError>
    where
        F: FnMut(&LoyaltyCard) + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| LedgerError::NoRuntime)?;

        let receiver = {
            let mut topic = self.topics.entry(user).or_insert_with(Topic::new);
            topic.subscribers += 1;
            topic.sender.subscribe()
        };

        let latest = Arc::new(Mutex::new(None));
        let viewer = Viewer {
            user,
            latest: Arc::clone(&latest),
            on_change,
        };
        let push = self.push_enabled.then_some(receiver);
        let task = runtime.spawn(watch(
            viewer,
            Arc::clone(&self.store),
            push,
            self.poll_interval,
        ));

        debug!(%user, "viewer subscribed");
        Ok(Subscription {
            user,
            topics: Arc::clone(&self.topics),
            latest,
            task,
        })
    }

    /// Stops delivery and releases the subscription's resources.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Live subscriptions for `user`.
    pub fn subscriber_count(&self, user: UserId) -> usize {
        self.topics.get(&user).map_or(0, |topic| topic.subscribers)
    }

    /// Customers with at least one live subscription.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

/// Handle of one viewer's subscription.
///
/// Dropping it stops the poll timer, detaches from the topic and removes
/// the topic if this was its last viewer.
pub struct Subscription {
    user: UserId,
    topics: Arc<Topics>,
    latest: Arc<Mutex<Option<LoyaltyCard>>>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn user(&self) -> UserId {
        self.user
    }

    /// The last snapshot delivered to this viewer.
    pub fn latest(&self) -> Option<LoyaltyCard> {
        self.latest.lock().clone()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();

        if let Entry::Occupied(mut topic) = self.topics.entry(self.user) {
            topic.get_mut().subscribers -= 1;
            if topic.get().subscribers == 0 {
                topic.remove();
                debug!(user = %self.user, "last viewer left, topic closed");
            }
        }
    }
}

/// The viewer's latest-known slot plus its callback.
struct Viewer<F> {
    user: UserId,
    latest: Arc<Mutex<Option<LoyaltyCard>>>,
    on_change: F,
}

impl<F: FnMut(&LoyaltyCard)> Viewer<F> {
    fn offer(&mut self, card: LoyaltyCard) {
        {
            let mut latest = self.latest.lock();
            if latest.as_ref() == Some(&card) {
                return;
            }
            *latest = Some(card.clone());
        }
        (self.on_change)(&card);
    }
}

async fn watch<F>(
    mut viewer: Viewer<F>,
    store: Arc<dyn LoyaltyStore>,
    mut push: Option<broadcast::Receiver<LoyaltyCard>>,
    poll_interval: Duration,
) where
    F: FnMut(&LoyaltyCard) + Send + 'static,
{
    let mut ticker = time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let mut closed = false;
        tokio::select! {
            received = next_push(&mut push) => match received {
                Ok(card) => viewer.offer(card),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(user = %viewer.user, skipped, "viewer lagged, waiting for poll");
                }
                Err(RecvError::Closed) => closed = true,
            },
            _ = ticker.tick() => match store.card(viewer.user) {
                Ok(Some(card)) => viewer.offer(card),
                Ok(None) => {}
                Err(e) => warn!(user = %viewer.user, error = %e, "card poll failed"),
            },
        }
        if closed {
            debug!(user = %viewer.user, "push channel closed, polling only");
            push = None;
        }
    }
}

async fn next_push(
    push: &mut Option<broadcast::Receiver<LoyaltyCard>>,
) -> Result<LoyaltyCard, RecvError> {
    match push {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}
