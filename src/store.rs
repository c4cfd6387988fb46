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

//! Storage ports and their in-memory adapters.
//!
//! The ports are plain key-value interfaces. Each call is safe to make from
//! many threads, but nothing spans two calls: a read followed by a write is
//! not atomic. Serializing same-user access is the job of the
//! [`LockRegistry`](crate::LockRegistry), not of the stores.

use crate::base::{HistoryId, UserId};
use crate::error::StoreError;
use crate::point::{PointHistory, TransactionType, UserPoint};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Balance table keyed by user.
pub trait UserPointStore: Send + Sync {
    /// Current balance, or a zero balance if the user was never written.
    fn select_by_id(&self, user_id: UserId) -> Result<UserPoint, StoreError>;

    /// Overwrites the balance of `user_id` and returns the stored record.
    fn insert_or_update(&self, user_id: UserId, point: i64) -> Result<UserPoint, StoreError>;
}

/// Append-only history table.
pub trait PointHistoryStore: Send + Sync {
    /// Appends a record and returns it with its assigned id.
    fn insert(
        &self,
        user_id: UserId,
        amount: i64,
        kind: TransactionType,
        updated_at: DateTime<Utc>,
    ) -> Result<PointHistory, StoreError>;

    /// All records of `user_id` in insertion order.
    fn select_all_by_user_id(&self, user_id: UserId) -> Result<Vec<PointHistory>, StoreError>;
}

/// In-memory balance table.
#[derive(Debug, Default)]
pub struct MemoryUserPointStore {
    table: DashMap<UserId, UserPoint>,
}

impl MemoryUserPointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored balance, ordered by user.
    pub fn select_all(&self) -> Vec<UserPoint> {
        let mut points: Vec<UserPoint> = self.table.iter().map(|entry| *entry.value()).collect();
        points.sort_by_key(|point| point.id);
        points
    }
}

impl UserPointStore for MemoryUserPointStore {
    fn select_by_id(&self, user_id: UserId) -> Result<UserPoint, StoreError> {
        Ok(self
            .table
            .get(&user_id)
            .map(|entry| *entry.value())
            .unwrap_or_else(|| UserPoint::empty(user_id)))
    }

    fn insert_or_update(&self, user_id: UserId, point: i64) -> Result<UserPoint, StoreError> {
        let user_point = UserPoint::new(user_id, point, Utc::now());
        self.table.insert(user_id, user_point);
        Ok(user_point)
    }
}

/// In-memory history table.
///
/// Ids come from a single cursor shared by all users, starting at 1.
#[derive(Debug)]
pub struct MemoryPointHistoryStore {
    cursor: AtomicU64,
    table: DashMap<UserId, Vec<PointHistory>>,
}

impl MemoryPointHistoryStore {
    pub fn new() -> Self {
        Self {
            cursor: AtomicU64::new(1),
            table: DashMap::new(),
        }
    }

    /// Every record of every user, ordered by id.
    pub fn select_all(&self) -> Vec<PointHistory> {
        let mut histories: Vec<PointHistory> = self
            .table
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();
        histories.sort_by_key(|history| history.id);
        histories
    }
}

impl Default for MemoryPointHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PointHistoryStore for MemoryPointHistoryStore {
    fn insert(
        &self,
        user_id: UserId,
        amount: i64,
        kind: TransactionType,
        updated_at: DateTime<Utc>,
    ) -> Result<PointHistory, StoreError> {
        // Id assignment and append happen under the user's entry lock so a
        // user's records stay ordered by id.
        let mut records = self.table.entry(user_id).or_default();
        let history = PointHistory {
            id: HistoryId(self.cursor.fetch_add(1, Ordering::Relaxed)),
            user_id,
            amount,
            kind,
            updated_at,
        };
        records.push(history);
        Ok(history)
    }

    fn select_all_by_user_id(&self, user_id: UserId) -> Result<Vec<PointHistory>, StoreError> {
        Ok(self
            .table
            .get(&user_id)
            .map(|records| records.value().clone())
            .unwrap_or_default())
    }
}
