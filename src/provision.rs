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

//! Create-if-absent for profiles and cards.
//!
//! A customer device and a staff device may touch the same customer for the
//! first time at once. Both try to insert; the loser sees a unique-key
//! collision and re-reads the winner's row.

use crate::base::UserId;
use crate::card::LoyaltyCard;
use crate::profile::{CustomerProfile, ProfileDetails};
use crate::store::LoyaltyStore;
use crate::{LedgerError, StoreError};
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct Provisioner {
    store: Arc<dyn LoyaltyStore>,
}

impl Provisioner {
    pub fn new(store: Arc<dyn LoyaltyStore>) -> Self {
        Self { store }
    }

    /// Returns the user's profile, creating a placeholder if there is none.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Provision`] if the store fails for any reason other
    /// than a lost creation race.
    pub fn ensure_profile(&self, user: UserId) -> Result<CustomerProfile, LedgerError> {
        let provision = |source: StoreError| LedgerError::Provision {
            entity: "profile",
            source,
        };

        if let Some(profile) = self.store.profile(user).map_err(provision)? {
            return Ok(profile);
        }

        match self.store.insert_profile(CustomerProfile::placeholder(user)) {
            Ok(profile) => {
                debug!(%user, "profile created");
                Ok(profile)
            }
            Err(StoreError::UniqueViolation) => {
                warn!(%user, "profile created concurrently, re-reading");
                self.store
                    .profile(user)
                    .map_err(provision)?
                    .ok_or_else(|| provision(StoreError::NotFound))
            }
            Err(e) => {
                error!(%user, error = %e, "profile creation failed");
                Err(provision(e))
            }
        }
    }

    /// Returns the user's card, creating a zeroed one if there is none.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Provision`] if the store fails for any reason other
    /// than a lost creation race.
    pub fn ensure_card(&self, user: UserId) -> Result<LoyaltyCard, LedgerError> {
        let provision = |source: StoreError| LedgerError::Provision {
            entity: "card",
            source,
        };

        if let Some(card) = self.store.card(user).map_err(provision)? {
            return Ok(card);
        }

        match self.store.insert_card(user) {
            Ok(card) => {
                debug!(%user, card = %card.id, "card created");
                Ok(card)
            }
            Err(StoreError::UniqueViolation) => {
                warn!(%user, "card created concurrently, re-reading");
                self.store
                    .card(user)
                    .map_err(provision)?
                    .ok_or_else(|| provision(StoreError::NotFound))
            }
            Err(e) => {
                error!(%user, error = %e, "card creation failed");
                Err(provision(e))
            }
        }
    }

    /// Saves the profile-completion form.
    ///
    /// Required fields are checked before anything is written. The profile
    /// is provisioned first if needed; its role is never changed here.
    pub fn complete_profile(
        &self,
        user: UserId,
        details: ProfileDetails,
    ) -> Result<CustomerProfile, LedgerError> {
        let details = details.validate()?;
        let mut profile = self.ensure_profile(user)?;
        profile.apply(details);
        Ok(self.store.update_profile(profile)?)
    }
}
