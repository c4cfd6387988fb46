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

//! Point ledger service.
//!
//! The [`PointService`] owns the storage ports, the policy and the lock
//! registry, and exposes the four ledger operations.
//!
//! # Mutation protocol
//!
//! `charge` and `use_points` each run a critical section under the lock of
//! their user: re-read the balance, validate against it, write the new
//! balance, append a history record. The balance is always re-read inside
//! the lock because another mutation may have landed while this one waited.
//!
//! | Step | `charge` | `use_points` |
//! |------|----------|--------------|
//! | before lock | floor, unit, per-charge ceiling | - |
//! | in lock | total ceiling | balance, then unit, then floor |
//!
//! The asymmetry decides which error wins when an amount breaks several
//! rules: for `use_points` an uncovered amount reports
//! [`PointError::InsufficientBalance`] even if it is also off-unit.
//!
//! # Reads
//!
//! `get_user_point` and `get_point_histories` take no lock and may observe a
//! balance written by a mutation whose history record is not appended yet.

use crate::base::UserId;
use crate::error::{PointError, PolicyError};
use crate::lock_registry::LockRegistry;
use crate::point::{PointHistory, TransactionType, UserPoint};
use crate::policy::PointPolicy;
use crate::store::{
    MemoryPointHistoryStore, MemoryUserPointStore, PointHistoryStore, UserPointStore,
};
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, warn};

/// Concurrency-safe point ledger over a balance store and a history store.
///
/// # Invariants
///
/// - At most one `charge`/`use_points` critical section per user at a time.
/// - A user's balance equals the signed sum of its history once no mutation
///   is in flight (unless a [`PointError::HistoryAppend`] was reported).
/// - A balance is never written negative, and a charge never writes a
///   balance above [`PointPolicy::max_total_amount`].
#[derive(Debug)]
pub struct PointService<U = MemoryUserPointStore, H = MemoryPointHistoryStore> {
    user_points: U,
    histories: H,
    policy: PointPolicy,
    locks: LockRegistry,
}

impl PointService {
    /// Service over fresh in-memory stores with the default policy.
    pub fn in_memory() -> Self {
        Self::from_parts(
            MemoryUserPointStore::new(),
            MemoryPointHistoryStore::new(),
            PointPolicy::DEFAULT,
        )
    }
}

impl Default for PointService {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl<U, H> PointService<U, H>
where
    U: UserPointStore,
    H: PointHistoryStore,
{
    /// Service over the given stores, with an unbounded lock wait.
    ///
    /// # Errors
    ///
    /// [`PolicyError`] if `policy` has a non-positive unit or floor.
    pub fn new(user_points: U, histories: H, policy: PointPolicy) -> Result<Self, PolicyError> {
        policy.validate()?;
        Ok(Self::from_parts(user_points, histories, policy))
    }

    fn from_parts(user_points: U, histories: H, policy: PointPolicy) -> Self {
        Self {
            user_points,
            histories,
            policy,
            locks: LockRegistry::new(),
        }
    }

    /// Bounds the wait for a user lock; mutations that wait longer fail with
    /// [`PointError::LockTimeout`].
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.locks = LockRegistry::with_timeout(timeout);
        self
    }

    /// Thresholds applied to every mutation.
    pub fn policy(&self) -> &PointPolicy {
        &self.policy
    }

    /// Per-user lock registry.
    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    /// Balance store.
    pub fn user_points(&self) -> &U {
        &self.user_points
    }

    /// History store.
    pub fn histories(&self) -> &H {
        &self.histories
    }

    /// Current balance of `user_id`, zero if never charged.
    pub fn get_user_point(&self, user_id: UserId) -> Result<UserPoint, PointError> {
        Ok(self.user_points.select_by_id(user_id)?)
    }

    /// History of `user_id` in the order the mutations were applied.
    pub fn get_point_histories(&self, user_id: UserId) -> Result<Vec<PointHistory>, PointError> {
        Ok(self.histories.select_all_by_user_id(user_id)?)
    }

    /// Adds `amount` to the balance of `user_id`.
    ///
    /// # Errors
    ///
    /// - [`PointError::InvalidAmount`] - below the minimum charge or off-unit.
    /// - [`PointError::LimitExceeded`] - above the per-charge maximum, or the
    ///   new balance would exceed the maximum total.
    /// - [`PointError::LockTimeout`] - bounded lock wait elapsed.
    /// - [`PointError::Store`] - balance read or write failed, nothing changed.
    /// - [`PointError::HistoryAppend`] - balance changed, history not appended.
    pub fn charge(&self, user_id: UserId, amount: i64) -> Result<UserPoint, PointError> {
        let result = self.try_charge(user_id, amount);
        log_result(TransactionType::Charge, user_id, amount, &result);
        result
    }

    /// Subtracts `amount` from the balance of `user_id`.
    ///
    /// # Errors
    ///
    /// - [`PointError::InsufficientBalance`] - balance does not cover `amount`.
    ///   Checked before the amount format.
    /// - [`PointError::InvalidAmount`] - off-unit or below the minimum use.
    /// - [`PointError::LockTimeout`] - bounded lock wait elapsed.
    /// - [`PointError::Store`] - balance read or write failed, nothing changed.
    /// - [`PointError::HistoryAppend`] - balance changed, history not appended.
    pub fn use_points(&self, user_id: UserId, amount: i64) -> Result<UserPoint, PointError> {
        let result = self.try_use(user_id, amount);
        log_result(TransactionType::Use, user_id, amount, &result);
        result
    }

    fn try_charge(&self, user_id: UserId, amount: i64) -> Result<UserPoint, PointError> {
        self.policy.check_charge_amount(amount)?;

        let _lock = self.locks.acquire(user_id)?;
        let current = self.user_points.select_by_id(user_id)?;
        self.policy.check_total(current.point, amount)?;

        self.apply(user_id, current.point + amount, amount, TransactionType::Charge)
    }

    fn try_use(&self, user_id: UserId, amount: i64) -> Result<UserPoint, PointError> {
        let _lock = self.locks.acquire(user_id)?;
        let current = self.user_points.select_by_id(user_id)?;

        let remaining = match current.point.checked_sub(amount) {
            Some(remaining) if remaining >= 0 => remaining,
            _ => {
                return Err(PointError::InsufficientBalance {
                    available: current.point,
                    requested: amount,
                });
            }
        };
        self.policy.check_use_amount(amount)?;

        self.apply(user_id, remaining, amount, TransactionType::Use)
    }

    /// Writes the balance, then appends the history record. Caller holds the
    /// user lock.
    fn apply(
        &self,
        user_id: UserId,
        point: i64,
        amount: i64,
        kind: TransactionType,
    ) -> Result<UserPoint, PointError> {
        let user_point = self.user_points.insert_or_update(user_id, point)?;

        if let Err(source) = self.histories.insert(user_id, amount, kind, Utc::now()) {
            warn!(
                user = %user_id,
                amount,
                point,
                %kind,
                reason = %source,
                "balance written without history record"
            );
            return Err(PointError::HistoryAppend {
                point: user_point,
                source,
            });
        }

        Ok(user_point)
    }
}

fn log_result(
    kind: TransactionType,
    user_id: UserId,
    amount: i64,
    result: &Result<UserPoint, PointError>,
) {
    match result {
        Ok(user_point) => {
            debug!(
                user = %user_id,
                amount,
                point = user_point.point,
                "{kind} applied"
            );
        }
        Err(PointError::LockTimeout(_)) => {
            warn!(user = %user_id, amount, "{kind} gave up waiting for user lock");
        }
        // Already reported where it happened.
        Err(PointError::HistoryAppend { .. }) => {}
        Err(e) => {
            debug!(user = %user_id, amount, reason = %e, "{kind} rejected");
        }
    }
}
