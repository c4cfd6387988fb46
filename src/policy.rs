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

//! Amount thresholds for charging and using points.
//!
//! # Example
//!
//! ```
//! use point_ledger::{InvalidAmount, PointError, PointPolicy};
//!
//! let policy = PointPolicy::default();
//! assert!(policy.check_charge_amount(5_000).is_ok());
//! assert_eq!(
//!     policy.check_charge_amount(500),
//!     Err(PointError::from(InvalidAmount::BelowMinimumCharge(1_000)))
//! );
//! ```

use crate::error::{InvalidAmount, LimitExceeded, PointError, PolicyError};
use serde::{Deserialize, Serialize};

/// Thresholds governing valid charge and use amounts.
///
/// Units and floors must be positive; see [`PointPolicy::validate`].
/// Deserialization rejects policies that fail it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPointPolicy")]
pub struct PointPolicy {
    pub min_amount_per_charge: i64,
    pub charge_unit: i64,
    pub max_amount_per_charge: i64,
    pub max_total_amount: i64,
    pub use_unit: i64,
    pub min_amount_per_use: i64,
}

impl PointPolicy {
    pub const DEFAULT: Self = Self {
        min_amount_per_charge: 1_000,
        charge_unit: 1_000,
        max_amount_per_charge: 100_000,
        max_total_amount: 1_000_000,
        use_unit: 100,
        min_amount_per_use: 100,
    };

    /// Builds a validated policy.
    pub fn new(
        min_amount_per_charge: i64,
        charge_unit: i64,
        max_amount_per_charge: i64,
        max_total_amount: i64,
        use_unit: i64,
        min_amount_per_use: i64,
    ) -> Result<Self, PolicyError> {
        let policy = Self {
            min_amount_per_charge,
            charge_unit,
            max_amount_per_charge,
            max_total_amount,
            use_unit,
            min_amount_per_use,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Rejects non-positive units and floors. A zero unit would divide by
    /// zero, and a non-positive floor would admit amounts that move the
    /// balance the wrong way.
    pub fn validate(&self) -> Result<(), PolicyError> {
        let units = [("charge_unit", self.charge_unit), ("use_unit", self.use_unit)];
        if let Some(&(name, value)) = units.iter().find(|(_, value)| *value <= 0) {
            return Err(PolicyError::NonPositiveUnit { name, value });
        }
        let floors = [
            ("min_amount_per_charge", self.min_amount_per_charge),
            ("min_amount_per_use", self.min_amount_per_use),
        ];
        if let Some(&(name, value)) = floors.iter().find(|(_, value)| *value <= 0) {
            return Err(PolicyError::NonPositiveFloor { name, value });
        }
        Ok(())
    }

    /// Checks run before the user lock is taken, in this order: floor, unit,
    /// per-charge ceiling.
    pub fn check_charge_amount(&self, amount: i64) -> Result<(), PointError> {
        if amount < self.min_amount_per_charge {
            return Err(InvalidAmount::BelowMinimumCharge(self.min_amount_per_charge).into());
        }
        if amount % self.charge_unit != 0 {
            return Err(InvalidAmount::NotChargeUnit(self.charge_unit).into());
        }
        if amount > self.max_amount_per_charge {
            return Err(LimitExceeded::PerCharge(self.max_amount_per_charge).into());
        }
        Ok(())
    }

    /// Ceiling on the balance after a charge.
    pub fn check_total(&self, current: i64, amount: i64) -> Result<(), PointError> {
        match current.checked_add(amount) {
            Some(total) if total <= self.max_total_amount => Ok(()),
            _ => Err(LimitExceeded::TotalBalance(self.max_total_amount).into()),
        }
    }

    /// Format checks for a use, unit before floor.
    pub fn check_use_amount(&self, amount: i64) -> Result<(), PointError> {
        if amount % self.use_unit != 0 {
            return Err(InvalidAmount::NotUseUnit(self.use_unit).into());
        }
        if amount < self.min_amount_per_use {
            return Err(InvalidAmount::BelowMinimumUse(self.min_amount_per_use).into());
        }
        Ok(())
    }
}

impl Default for PointPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Deserialize)]
struct RawPointPolicy {
    min_amount_per_charge: i64,
    charge_unit: i64,
    max_amount_per_charge: i64,
    max_total_amount: i64,
    use_unit: i64,
    min_amount_per_use: i64,
}

impl TryFrom<RawPointPolicy> for PointPolicy {
    type Error = PolicyError;

    fn try_from(raw: RawPointPolicy) -> Result<Self, Self::Error> {
        Self::new(
            raw.min_amount_per_charge,
            raw.charge_unit,
            raw.max_amount_per_charge,
            raw.max_total_amount,
            raw.use_unit,
            raw.min_amount_per_use,
        )
    }
}
