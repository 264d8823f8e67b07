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

//! Error types for the store and the ledger.

use crate::base::EventId;
use thiserror::Error;

/// Failures reported by a [`LoyaltyStore`](crate::LoyaltyStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A row with the same unique key already exists
    #[error("unique constraint violated")]
    UniqueViolation,

    /// Conditional write lost against a concurrent writer
    #[error("row version changed since it was read")]
    VersionMismatch,

    /// The row the write targets does not exist
    #[error("row not found")]
    NotFound,

    /// The submission id was already committed as the given event
    #[error("submission already recorded as event {0}")]
    DuplicateSubmission(EventId),

    /// A redemption asked for more stamps than the card holds
    #[error("card holds {available} stamps, {required} required")]
    InsufficientStamps { available: u32, required: u32 },

    /// A counter would leave its integer range
    #[error("counter overflow")]
    CounterOverflow,

    /// The backing storage could not be reached or failed mid-write
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Ledger operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Stamp amount is zero, negative or out of range
    #[error("invalid amount (must be a positive integer)")]
    InvalidAmount,

    /// Scanned code is not a customer identifier
    #[error("invalid customer identifier")]
    InvalidIdentifier,

    /// A required form field is empty
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The form already has an unresolved request
    #[error("a grant is already in flight")]
    InFlight,

    #[error("loyalty card not found")]
    CardNotFound,

    /// Live updates need a Tokio runtime on the calling thread
    #[error("no async runtime available for card updates")]
    NoRuntime,

    /// Not enough stamps to redeem a reward
    #[error("reward threshold not reached ({current} of {required})")]
    RewardNotReached { current: u32, required: u32 },

    /// Optimistic retries exhausted
    #[error("concurrent update conflict after {attempts} attempts")]
    Conflict { attempts: u32 },

    /// Profile or card could not be created or re-read
    #[error("could not provision {entity}: {source}")]
    Provision {
        entity: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("could not record change: {0}")]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Whether the operator may retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Store(_) | Self::Conflict { .. } | Self::Provision { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            LedgerError::InvalidAmount.to_string(),
            "invalid amount (must be a positive integer)"
        );
        assert_eq!(
            LedgerError::MissingField("full_name").to_string(),
            "missing required field: full_name"
        );
        assert_eq!(
            LedgerError::RewardNotReached {
                current: 7,
                required: 10
            }
            .to_string(),
            "reward threshold not reached (7 of 10)"
        );
        assert_eq!(
            LedgerError::Store(StoreError::Unavailable("timeout".into())).to_string(),
            "could not record change: store unavailable: timeout"
        );
        assert_eq!(
            StoreError::DuplicateSubmission(EventId(4)).to_string(),
            "submission already recorded as event 4"
        );
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(LedgerError::Store(StoreError::Unavailable("down".into())).is_retryable());
        assert!(LedgerError::Conflict { attempts: 8 }.is_retryable());
        assert!(!LedgerError::InvalidAmount.is_retryable());
        assert!(!LedgerError::InvalidIdentifier.is_retryable());
        assert!(!LedgerError::MissingField("birth_date").is_retryable());
        assert!(!LedgerError::NoRuntime.is_retryable());
    }

    #[test]
    fn store_errors_convert() {
        let error: LedgerError = StoreError::NotFound.into();
        assert_eq!(error, LedgerError::Store(StoreError::NotFound));
    }
}
