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

//! # Point Ledger
//!
//! This library keeps a per-user point balance and an append-only history of
//! every charge and use, and stays correct when many threads mutate the same
//! or different users at once.
//!
//! ## Core Components
//!
//! - [`PointService`]: Ledger operations (`charge`, `use_points`, reads)
//! - [`LockRegistry`]: One mutex per user, created on first use
//! - [`PointPolicy`]: Amount thresholds for charges and uses
//! - [`UserPointStore`] / [`PointHistoryStore`]: Storage ports, with in-memory adapters
//! - [`PointError`]: Error types for rejected or partially applied mutations
//!
//! ## Example
//!
//! ```
//! use point_ledger::{PointService, TransactionType, UserId};
//!
//! let service = PointService::in_memory();
//!
//! service.charge(UserId(1), 5_000).unwrap();
//! let point = service.use_points(UserId(1), 1_200).unwrap();
//! assert_eq!(point.point, 3_800);
//!
//! let history = service.get_point_histories(UserId(1)).unwrap();
//! assert_eq!(history.len(), 2);
//! assert_eq!(history[0].kind, TransactionType::Charge);
//! assert_eq!(history[1].amount, 1_200);
//! ```
//!
//! ## Thread Safety
//!
//! Mutations of one user are serialized by that user's lock; mutations of
//! different users run in parallel. The stores themselves provide no
//! cross-call atomicity.

mod base;
pub mod error;
pub mod lock_registry;
mod point;
mod policy;
mod service;
pub mod store;

pub use base::{HistoryId, UserId};
pub use error::{InvalidAmount, LimitExceeded, PointError, PolicyError, StoreError};
pub use lock_registry::{LockRegistry, UserLock};
pub use point::{PointHistory, TransactionType, UserPoint};
pub use policy::PointPolicy;
pub use service::PointService;
pub use store::{
    MemoryPointHistoryStore, MemoryUserPointStore, PointHistoryStore, UserPointStore,
};
