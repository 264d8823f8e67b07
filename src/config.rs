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

//! Ledger configuration.
//!
//! Every field has a default; a file only lists what it overrides.
//!
//! ```yaml
//! required_stamps: 10
//! poll_interval_ms: 2000
//! push_enabled: true
//! max_conflict_retries: 8
//! ```

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not open config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Stamps needed for one reward.
    pub required_stamps: NonZeroU32,
    /// Interval of the poll fallback run by every subscription.
    pub poll_interval_ms: u64,
    /// Whether mutations are pushed to subscribers. When off, viewers
    /// only see changes through polling.
    pub push_enabled: bool,
    /// Compare-and-swap attempts before a conflict is surfaced.
    pub max_conflict_retries: u32,
}

impl LedgerConfig {
    pub const DEFAULT_REQUIRED_STAMPS: NonZeroU32 = NonZeroU32::new(10).unwrap();
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

    /// Loads a YAML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        Ok(serde_yaml::from_reader(file)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn poll_interval(&self) -> Duration {
        // A zero interval would spin the poll loop.
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            required_stamps: Self::DEFAULT_REQUIRED_STAMPS,
            poll_interval_ms: Self::DEFAULT_POLL_INTERVAL_MS,
            push_enabled: true,
            max_conflict_retries: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_values() {
        let config = LedgerConfig::default();
        assert_eq!(config.required_stamps.get(), 10);
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert!(config.push_enabled);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = LedgerConfig::from_yaml("push_enabled: false\nrequired_stamps: 8\n").unwrap();
        assert!(!config.push_enabled);
        assert_eq!(config.required_stamps.get(), 8);
        assert_eq!(config.poll_interval_ms, 2_000);
        assert_eq!(config.max_conflict_retries, 8);
    }

    #[test]
    fn zero_required_stamps_is_rejected() {
        assert!(LedgerConfig::from_yaml("required_stamps: 0\n").is_err());
    }

    #[test]
    fn zero_poll_interval_is_clamped() {
        let config = LedgerConfig::from_yaml("poll_interval_ms: 0\n").unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
    }
}
