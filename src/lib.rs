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

//! # Loyalty Ledger
//!
//! This library keeps digital loyalty-stamp cards: staff credit stamps to a
//! scanned customer, and customers watch their card update live.
//!
//! ## Core Components
//!
//! - [`Ledger`]: Entry point for provisioning, grants, adjustments and redemptions
//! - [`LoyaltyStore`]: Storage seam with atomic card mutations; [`MemoryStore`] implements it
//! - [`ChangeNotifier`]: Push and poll delivery of card snapshots to viewers
//! - [`evaluate_reward`]: Progress toward the next reward
//! - [`GrantForm`]: Pending-grant state of a staff device
//! - [`LedgerError`]: Error types for ledger operations
//!
//! ## Example
//!
//! ```
//! use loyalty_ledger::{Ledger, UserId};
//!
//! let ledger = Ledger::in_memory();
//! let customer = UserId::from_scanned("2f1c6b1e-8a53-4b8e-9a43-6f0d2d7c9b10").unwrap();
//! let staff = UserId::new_v4();
//!
//! ledger.record_stamp_grant(customer, staff, 3).unwrap();
//! let card = ledger.record_stamp_grant(customer, staff, 4).unwrap();
//!
//! assert_eq!(card.current_stamps(), 7);
//! assert_eq!(card.total_visits(), 2);
//! assert_eq!(ledger.reward(&card).remaining, 3);
//! ```
//!
//! ## Thread Safety
//!
//! The ledger is `Send + Sync`. Grants for the same customer from many
//! threads all land; grants for different customers proceed in parallel.

pub mod base;
pub mod card;
pub mod config;
pub mod console;
pub mod error;
pub mod event;
mod ledger;
pub mod notifier;
pub mod profile;
mod provision;
pub mod reward;
pub mod store;
pub mod telemetry;

pub use base::{CardId, EventId, SubmissionId, UserId};
pub use card::{CardMutation, Counters, LoyaltyCard};
pub use config::LedgerConfig;
pub use console::{CustomerSummary, GrantForm};
pub use error::{LedgerError, StoreError};
pub use event::{NewEvent, Projection, StampEvent};
pub use ledger::{GrantRequest, Ledger};
pub use notifier::{ChangeNotifier, Subscription};
pub use profile::{CustomerProfile, ProfileDetails, Role};
pub use provision::Provisioner;
pub use reward::{RewardProgress, evaluate_reward};
pub use store::{LoyaltyStore, MemoryStore};
