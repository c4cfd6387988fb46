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

//! Error types for ledger operations.

use crate::base::UserId;
use crate::point::UserPoint;
use thiserror::Error;

/// Amount violates a unit or floor rule of the policy.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidAmount {
    #[error("below minimum charge of {0}")]
    BelowMinimumCharge(i64),

    #[error("not a multiple of charge unit {0}")]
    NotChargeUnit(i64),

    #[error("below minimum use of {0}")]
    BelowMinimumUse(i64),

    #[error("not a multiple of use unit {0}")]
    NotUseUnit(i64),
}

/// Amount would breach a ceiling of the policy.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitExceeded {
    #[error("exceeds per-charge maximum of {0}")]
    PerCharge(i64),

    #[error("exceeds maximum total balance of {0}")]
    TotalBalance(i64),
}

/// Failure reported by a storage port.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("storage failure: {0}")]
pub struct StoreError(pub String);

/// Policy threshold that would make the amount checks meaningless.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyError {
    /// Units divide amounts and must be at least 1
    #[error("{name} must be positive, got {value}")]
    NonPositiveUnit { name: &'static str, value: i64 },

    /// Floors keep recorded amounts positive
    #[error("{name} must be positive, got {value}")]
    NonPositiveFloor { name: &'static str, value: i64 },
}

/// Ledger operation errors.
///
/// Every variant is terminal for the call that produced it. Only
/// [`PointError::HistoryAppend`] is raised after the balance was written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PointError {
    /// Amount is below a floor or not a multiple of the unit
    #[error("invalid amount: {0}")]
    InvalidAmount(InvalidAmount),

    /// Amount would breach the per-charge or total balance ceiling
    #[error("limit exceeded: {0}")]
    LimitExceeded(LimitExceeded),

    /// Use would drive the balance negative
    #[error("insufficient balance: {available} available, {requested} requested")]
    InsufficientBalance { available: i64, requested: i64 },

    /// Bounded lock wait elapsed
    #[error("timed out waiting for the lock of user {0}")]
    LockTimeout(UserId),

    /// A storage call failed before any write happened
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Balance was written but the history append failed
    #[error("balance of user {} updated to {} but history append failed: {source}", .point.id, .point.point)]
    HistoryAppend { point: UserPoint, source: StoreError },
}

impl From<InvalidAmount> for PointError {
    fn from(reason: InvalidAmount) -> Self {
        Self::InvalidAmount(reason)
    }
}

impl From<LimitExceeded> for PointError {
    fn from(reason: LimitExceeded) -> Self {
        Self::LimitExceeded(reason)
    }
}
