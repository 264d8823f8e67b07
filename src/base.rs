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

//! Core identifier types for users, cards, events and submissions.

use crate::LedgerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a profile, equal to the authentication subject.
///
/// Customers and staff share the same identifier space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses the opaque string handed over by the scanner.
    ///
    /// The value is only a lookup key. It carries no signature or expiry, so
    /// presenting it proves nothing about who presented it.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidIdentifier`] if the trimmed input is not a UUID.
    pub fn from_scanned(code: &str) -> Result<Self, LedgerError> {
        code.trim().parse()
    }
}

impl FromStr for UserId {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(UserId)
            .map_err(|_| LedgerError::InvalidIdentifier)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Surrogate key of a loyalty card, assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct CardId(pub u64);

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Surrogate key of a stamp event, assigned by the store.
///
/// Ids grow monotonically, so sorting by id gives commit order per card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-generated idempotency key for one pending submission.
///
/// A retry of the same pending grant reuses the id, so the store can
/// tell a resubmission from a new grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct SubmissionId(pub Uuid);

impl SubmissionId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scanned_code_is_trimmed() {
        let id = UserId::new_v4();
        let scanned = format!("  {id}\n");
        assert_eq!(UserId::from_scanned(&scanned).unwrap(), id);
    }

    #[test]
    fn garbage_code_is_rejected() {
        assert_eq!(
            UserId::from_scanned("not-a-customer"),
            Err(LedgerError::InvalidIdentifier)
        );
        assert_eq!(UserId::from_scanned(""), Err(LedgerError::InvalidIdentifier));
    }
}
