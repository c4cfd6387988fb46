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

//! Per-user mutual exclusion.
//!
//! The [`LockRegistry`] hands out one mutex per [`UserId`], created on first
//! use. Holding a [`UserLock`] guarantees no other mutation of the same user
//! is in flight; locks of different users are independent.
//!
//! # Example
//!
//! ```
//! use point_ledger::{LockRegistry, UserId};
//!
//! let registry = LockRegistry::new();
//! let first = registry.acquire(UserId(1)).unwrap();
//! // Another user is never blocked by the first lock.
//! let second = registry.acquire(UserId(2)).unwrap();
//! drop((first, second));
//! assert_eq!(registry.len(), 2);
//! ```
//!
//! # Growth
//!
//! Entries are kept for the lifetime of the registry, so memory grows with
//! the number of distinct users seen. [`LockRegistry::prune_idle`] drops
//! entries that nobody holds or waits on; it is never called implicitly.

use crate::base::UserId;
use crate::error::PointError;
use dashmap::DashMap;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Held lock on one user. Released on drop.
#[must_use = "the user lock is released as soon as the guard is dropped"]
pub struct UserLock {
    user_id: UserId,
    _guard: ArcMutexGuard<RawMutex, ()>,
}

impl UserLock {
    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

impl fmt::Debug for UserLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserLock")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Lazily populated map from user to mutex.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: DashMap<UserId, Arc<Mutex<()>>>,
    /// `None` waits forever.
    timeout: Option<Duration>,
}

impl LockRegistry {
    /// Creates a registry whose acquisitions wait without bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry whose acquisitions fail with
    /// [`PointError::LockTimeout`] after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout: Some(timeout),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Blocks until the lock of `user_id` is free and returns it.
    ///
    /// # Errors
    ///
    /// [`PointError::LockTimeout`] only when the registry was built with a
    /// timeout and it elapsed.
    pub fn acquire(&self, user_id: UserId) -> Result<UserLock, PointError> {
        // Clone the mutex out so the map shard is not held while waiting.
        let lock = self.lock_for(user_id);

        let guard = match self.timeout {
            None => lock.lock_arc(),
            Some(timeout) => lock
                .try_lock_arc_for(timeout)
                .ok_or(PointError::LockTimeout(user_id))?,
        };

        Ok(UserLock {
            user_id,
            _guard: guard,
        })
    }

    fn lock_for(&self, user_id: UserId) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(&user_id) {
            return Arc::clone(lock.value());
        }
        Arc::clone(
            self.locks
                .entry(user_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Number of users with a lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Removes entries no caller holds or waits on. Returns how many were
    /// removed.
    ///
    /// An entry referenced only by the map is idle. Callers clone the entry
    /// under the shard lock that `retain` takes for writing, so an entry seen
    /// as idle here cannot be handed out concurrently.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }
}
