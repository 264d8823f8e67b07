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

//! Reward progress shown on a card.
//!
//! # Example
//!
//! ```
//! use std::num::NonZeroU32;
//! use loyalty_ledger::evaluate_reward;
//! use rust_decimal_macros::dec;
//!
//! let progress = evaluate_reward(7, NonZeroU32::new(10).unwrap());
//! assert_eq!(progress.filled_slots, 7);
//! assert_eq!(progress.remaining, 3);
//! assert_eq!(progress.progress_percent, dec!(70));
//! ```

use rust_decimal::Decimal;
use serde::Serialize;
use std::num::NonZeroU32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RewardProgress {
    pub filled_slots: u32,
    pub remaining: u32,
    pub progress_percent: Decimal,
}

impl RewardProgress {
    const PERCENT_PRECISION: u32 = 2;

    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}

/// Maps a stamp count to the slots, remainder and percentage to display.
pub fn evaluate_reward(current_stamps: u32, required_stamps: NonZeroU32) -> RewardProgress {
    let required = required_stamps.get();
    let hundred = Decimal::ONE_HUNDRED;
    let percent = (Decimal::from(current_stamps) * hundred / Decimal::from(required))
        .min(hundred)
        .round_dp(RewardProgress::PERCENT_PRECISION);

    RewardProgress {
        filled_slots: current_stamps.min(required),
        remaining: required.saturating_sub(current_stamps),
        progress_percent: percent,
    }
}
