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

//! LockRegistry public API integration tests.

use point_ledger::{
    LockRegistry, MemoryUserPointStore, PointError, PointService, UserId, UserPointStore,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

// === Mutual Exclusion ===

#[test]
fn registry_serializes_read_modify_write() {
    let registry = Arc::new(LockRegistry::new());
    let store = Arc::new(MemoryUserPointStore::new());
    let num_threads = 16;
    let ops_per_thread = 25;

    let mut handles = vec![];
    for _ in 0..num_threads {
        let registry = Arc::clone(&registry);
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for _ in 0..ops_per_thread {
                let _lock = registry.acquire(UserId(1)).unwrap();
                let current = store.select_by_id(UserId(1)).unwrap().point;
                thread::yield_now();
                store.insert_or_update(UserId(1), current + 1).unwrap();
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(
        store.select_by_id(UserId(1)).unwrap().point,
        num_threads * ops_per_thread
    );
}

#[test]
fn at_most_one_holder_per_user() {
    let registry = Arc::new(LockRegistry::new());
    let inside = Arc::new(AtomicUsize::new(0));
    let max_inside = Arc::new(AtomicUsize::new(0));

    let mut handles = vec![];
    for _ in 0..12 {
        let registry = Arc::clone(&registry);
        let inside = Arc::clone(&inside);
        let max_inside = Arc::clone(&max_inside);
        handles.push(thread::spawn(move || {
            for _ in 0..20 {
                let _lock = registry.acquire(UserId(3)).unwrap();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_micros(50));
                inside.fetch_sub(1, Ordering::SeqCst);
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(max_inside.load(Ordering::SeqCst), 1);
}

#[test]
fn registry_entries_grow_with_distinct_users() {
    let registry = LockRegistry::new();
    for user in 0..100 {
        drop(registry.acquire(UserId(user)).unwrap());
    }
    assert_eq!(registry.len(), 100);

    assert_eq!(registry.prune_idle(), 100);
    assert!(registry.is_empty());
}

#[test]
fn unbounded_registry_has_no_timeout() {
    assert_eq!(LockRegistry::new().timeout(), None);
    assert_eq!(
        LockRegistry::with_timeout(Duration::from_millis(5)).timeout(),
        Some(Duration::from_millis(5))
    );
}

#[test]
fn timed_waiter_succeeds_when_released_in_time() {
    let registry = Arc::new(LockRegistry::with_timeout(Duration::from_secs(5)));
    let held = registry.acquire(UserId(1)).unwrap();

    let waiter = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || registry.acquire(UserId(1)).map(|lock| lock.user_id()))
    };

    thread::sleep(Duration::from_millis(20));
    drop(held);

    assert_eq!(waiter.join().unwrap(), Ok(UserId(1)));
}

#[test]
fn timed_waiter_gives_up() {
    let registry = Arc::new(LockRegistry::with_timeout(Duration::from_millis(30)));
    let _held = registry.acquire(UserId(1)).unwrap();

    let waiter = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || registry.acquire(UserId(1)).map(|lock| lock.user_id()))
    };

    assert_eq!(waiter.join().unwrap(), Err(PointError::LockTimeout(UserId(1))));
}

// === Race Condition Tests ===

#[test]
fn no_double_spend_race_condition() {
    // Concurrent uses must not spend the same points twice
    for _ in 0..10 {
        let service = Arc::new(PointService::in_memory());
        service.charge(UserId(1), 1_000).unwrap();

        let successful_uses = Arc::new(Mutex::new(0u32));
        let mut handles = vec![];

        // Try 10 concurrent uses of the whole balance
        for _ in 0..10 {
            let service = Arc::clone(&service);
            let counter = Arc::clone(&successful_uses);
            handles.push(thread::spawn(move || {
                if service.use_points(UserId(1), 1_000).is_ok() {
                    *counter.lock().unwrap() += 1;
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        // Only ONE use should succeed
        let count = *successful_uses.lock().unwrap();
        assert_eq!(count, 1, "Expected exactly 1 successful use, got {}", count);
        assert_eq!(service.get_user_point(UserId(1)).unwrap().point, 0);
    }
}

#[test]
fn balance_never_goes_negative() {
    for _ in 0..10 {
        let service = Arc::new(PointService::in_memory());
        service.charge(UserId(1), 5_000).unwrap();

        let mut handles = vec![];

        // Many concurrent uses trying to overdraw
        for _ in 0..20 {
            let service = Arc::clone(&service);
            handles.push(thread::spawn(move || {
                let _ = service.use_points(UserId(1), 1_000);
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let point = service.get_user_point(UserId(1)).unwrap().point;
        assert_eq!(point, 0, "expected exactly five uses to succeed");
        assert_eq!(service.get_point_histories(UserId(1)).unwrap().len(), 6);
    }
}
