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

//! Staff console state.
//!
//! [`GrantForm`] is the pending grant on a staff device: the stepper amount,
//! the submission id, and whether a request is in flight. Only one request
//! may be in flight per form. A failed request leaves amount and submission
//! id untouched, so retrying neither needs re-entry nor risks a double credit.
//!
//! # Example
//!
//! ```
//! use loyalty_ledger::{GrantForm, Ledger, UserId};
//!
//! let ledger = Ledger::in_memory();
//! let mut form = GrantForm::new(UserId::new_v4(), UserId::new_v4());
//! form.increment();
//!
//! let card = form.confirm(&ledger).unwrap();
//! assert_eq!(card.current_stamps(), 2);
//! assert_eq!(form.amount(), 1);
//! ```

use crate::base::{SubmissionId, UserId};
use crate::card::LoyaltyCard;
use crate::ledger::{GrantRequest, Ledger};
use crate::profile::CustomerProfile;
use crate::LedgerError;
use serde::Serialize;

/// One row of the administrative customer list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerSummary {
    pub id: UserId,
    pub name: String,
    pub visits: u32,
}

impl CustomerSummary {
    const UNNAMED: &'static str = "(sin nombre)";

    pub(crate) fn new(profile: &CustomerProfile, visits: u32) -> Self {
        let name = match profile.display_name() {
            "" => Self::UNNAMED.to_string(),
            name => name.to_string(),
        };
        Self {
            id: profile.id,
            name,
            visits,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GrantForm {
    customer: UserId,
    staff: UserId,
    amount: u32,
    submission: SubmissionId,
    in_flight: bool,
}

impl GrantForm {
    pub fn new(customer: UserId, staff: UserId) -> Self {
        Self {
            customer,
            staff,
            amount: 1,
            submission: SubmissionId::new_v4(),
            in_flight: false,
        }
    }

    pub fn amount(&self) -> u32 {
        self.amount
    }

    pub fn submission(&self) -> SubmissionId {
        self.submission
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn increment(&mut self) {
        if !self.in_flight {
            self.amount = self.amount.saturating_add(1);
        }
    }

    /// Lowers the amount, stopping at 1.
    pub fn decrement(&mut self) {
        if !self.in_flight {
            self.amount = self.amount.saturating_sub(1).max(1);
        }
    }

    /// Marks the form in flight and returns the request to send.
    ///
    /// Returns `None` while a previous request is unresolved.
    pub fn begin(&mut self) -> Option<GrantRequest> {
        if self.in_flight {
            return None;
        }
        self.in_flight = true;
        Some(GrantRequest {
            customer: self.customer,
            staff: self.staff,
            amount: i64::from(self.amount),
            submission: Some(self.submission),
        })
    }

    /// Resolves the in-flight request.
    ///
    /// Success resets the amount to 1 and starts a new submission. Failure
    /// keeps both so the operator can retry as is.
    pub fn finish(&mut self, outcome: &Result<LoyaltyCard, LedgerError>) {
        self.in_flight = false;
        if outcome.is_ok() {
            self.amount = 1;
            self.submission = SubmissionId::new_v4();
        }
    }

    /// Sends the pending grant through `ledger` and resolves it.
    pub fn confirm(&mut self, ledger: &Ledger) -> Result<LoyaltyCard, LedgerError> {
        let request = self.begin().ok_or(LedgerError::InFlight)?;
        let outcome = ledger.submit_grant(request);
        self.finish(&outcome);
        outcome
    }
}
