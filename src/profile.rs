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

//! Customer and staff profiles.

use crate::LedgerError;
use crate::base::UserId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Customer,
    Staff,
    Admin,
}

impl Role {
    /// Staff and admins may credit stamps.
    pub fn is_staff(&self) -> bool {
        matches!(self, Self::Staff | Self::Admin)
    }
}

/// Identity and personal data of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub id: UserId,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub role: Role,
    pub marketing_opt_in: bool,
}

impl CustomerProfile {
    /// The row created on first access: empty name, `customer` role.
    pub fn placeholder(id: UserId) -> Self {
        Self {
            id,
            full_name: String::new(),
            email: None,
            phone: None,
            birth_date: None,
            role: Role::Customer,
            marketing_opt_in: false,
        }
    }

    /// Name shown on cards and lists, falling back to the email.
    pub fn display_name(&self) -> &str {
        let name = self.full_name.trim();
        if !name.is_empty() {
            return name;
        }
        self.email.as_deref().unwrap_or_default()
    }

    /// Copies completed details over this profile. The role is kept.
    pub(crate) fn apply(&mut self, details: ValidDetails) {
        self.full_name = details.full_name;
        self.birth_date = Some(details.birth_date);
        self.phone = details.phone;
        self.marketing_opt_in = details.marketing_opt_in;
    }
}

/// Input of the profile-completion form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProfileDetails {
    pub full_name: String,
    pub birth_date: Option<NaiveDate>,
    pub phone: Option<String>,
    pub marketing_opt_in: bool,
}

#[derive(Debug)]
pub(crate) struct ValidDetails {
    full_name: String,
    birth_date: NaiveDate,
    phone: Option<String>,
    marketing_opt_in: bool,
}

impl ProfileDetails {
    /// Checks required fields before anything is written.
    pub(crate) fn validate(self) -> Result<ValidDetails, LedgerError> {
        let full_name = self.full_name.trim().to_string();
        if full_name.is_empty() {
            return Err(LedgerError::MissingField("full_name"));
        }
        let birth_date = self.birth_date.ok_or(LedgerError::MissingField("birth_date"))?;
        let phone = self
            .phone
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        Ok(ValidDetails {
            full_name,
            birth_date,
            phone,
            marketing_opt_in: self.marketing_opt_in,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn birthday() -> NaiveDate {
        NaiveDate::from_ymd_opt(1990, 5, 17).unwrap()
    }

    #[test]
    fn display_name_falls_back_to_email() {
        let mut profile = CustomerProfile::placeholder(UserId::new_v4());
        assert_eq!(profile.display_name(), "");

        profile.email = Some("ana@example.com".into());
        assert_eq!(profile.display_name(), "ana@example.com");

        profile.full_name = "  Ana Torres ".into();
        assert_eq!(profile.display_name(), "Ana Torres");
    }

    #[test]
    fn blank_name_is_missing() {
        let details = ProfileDetails {
            full_name: "   ".into(),
            birth_date: Some(birthday()),
            ..Default::default()
        };
        assert_eq!(
            details.validate().unwrap_err(),
            LedgerError::MissingField("full_name")
        );
    }

    #[test]
    fn birth_date_is_required() {
        let details = ProfileDetails {
            full_name: "Ana".into(),
            ..Default::default()
        };
        assert_eq!(
            details.validate().unwrap_err(),
            LedgerError::MissingField("birth_date")
        );
    }

    #[test]
    fn apply_keeps_role() {
        let mut profile = CustomerProfile::placeholder(UserId::new_v4());
        profile.role = Role::Staff;
        let details = ProfileDetails {
            full_name: " Luis ".into(),
            birth_date: Some(birthday()),
            phone: Some("  ".into()),
            marketing_opt_in: true,
        };
        profile.apply(details.validate().unwrap());

        assert_eq!(profile.full_name, "Luis");
        assert_eq!(profile.phone, None);
        assert_eq!(profile.role, Role::Staff);
        assert!(profile.marketing_opt_in);
    }

    #[test]
    fn roles_serialize_lowercase() {
        assert!(Role::Admin.is_staff());
        assert!(!Role::Customer.is_staff());
        assert_eq!(serde_json::to_string(&Role::Customer).unwrap(), "\"customer\"");
    }
}
