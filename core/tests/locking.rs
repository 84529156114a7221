//! Mutual exclusion under real threads.
//!
//! Workers share one store and bump a counter inside the critical section;
//! the counter must never see two workers at once, whether the workers act
//! for different owners or are concurrent runs of the same owner.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rest_core::{
    Error, FileLockStore, InMemoryLockStore, LockCoordinator, LockErrorKind, LockPolicy,
    LockStore,
};

const WORKERS: usize = 8;
const ROUNDS: usize = 20;

fn policy() -> LockPolicy {
    // Enough attempts that contention never runs out before a release.
    LockPolicy::new(10_000, Duration::from_millis(1), false).unwrap()
}

fn hammer<S: LockStore + 'static>(store: Arc<S>, owner: fn(usize) -> String) {
    let inside = Arc::new(AtomicU32::new(0));
    let entries = Arc::new(AtomicU32::new(0));

    let workers: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let store = store.clone();
            let inside = inside.clone();
            let entries = entries.clone();
            thread::spawn(move || {
                let coordinator = LockCoordinator::new(store).with_policy(policy());
                let owner = owner(worker);
                for _ in 0..ROUNDS {
                    coordinator
                        .with_lock(&owner, "shared-resource", || {
                            assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                            entries.fetch_add(1, Ordering::SeqCst);
                            thread::yield_now();
                            inside.fetch_sub(1, Ordering::SeqCst);
                        })
                        .unwrap();
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(entries.load(Ordering::SeqCst), (WORKERS * ROUNDS) as u32);
}

fn distinct_owner(worker: usize) -> String {
    format!("worker-{worker}")
}

fn same_owner(_worker: usize) -> String {
    "naming".to_string()
}

#[test]
fn in_memory_store_excludes_concurrent_workers() {
    hammer(Arc::new(InMemoryLockStore::new()), distinct_owner);
}

#[test]
fn file_store_excludes_concurrent_workers() {
    let dir = tempfile::tempdir().unwrap();
    hammer(Arc::new(FileLockStore::new(dir.path()).unwrap()), distinct_owner);
}

#[test]
fn in_memory_store_excludes_concurrent_runs_of_one_owner() {
    hammer(Arc::new(InMemoryLockStore::new()), same_owner);
}

#[test]
fn file_store_excludes_concurrent_runs_of_one_owner() {
    let dir = tempfile::tempdir().unwrap();
    hammer(Arc::new(FileLockStore::new(dir.path()).unwrap()), same_owner);
}

#[test]
fn file_store_unlock_never_removes_another_owners_lock() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileLockStore::new(dir.path()).unwrap());
    let done = Arc::new(AtomicBool::new(false));

    // Two runs of "naming" keep taking and force-releasing the lock.
    let racers: Vec<_> = (0..2)
        .map(|_| {
            let store = store.clone();
            let done = done.clone();
            thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    store.lock("prefix-web", "naming").unwrap();
                    store.unlock("prefix-web", "naming").unwrap();
                }
            })
        })
        .collect();

    let mut held = 0;
    for _ in 0..100_000 {
        if held == 50 {
            break;
        }
        if store.lock("prefix-web", "ipam").unwrap() {
            held += 1;
            thread::yield_now();
            assert_eq!(store.holder("prefix-web").as_deref(), Some("ipam"));
            store.unlock("prefix-web", "ipam").unwrap();
        }
    }

    done.store(true, Ordering::SeqCst);
    for racer in racers {
        racer.join().unwrap();
    }
    assert_eq!(held, 50);
}

#[test]
fn file_store_lock_survives_a_second_store_on_the_same_directory() {
    let dir = tempfile::tempdir().unwrap();
    let first = FileLockStore::new(dir.path()).unwrap();
    let second = FileLockStore::new(dir.path()).unwrap();

    let coordinator = LockCoordinator::new(first)
        .with_policy(LockPolicy::new(1, Duration::ZERO, false).unwrap());
    let guard = coordinator.lock("config-mgmt", "site/berlin").unwrap();

    let contender = LockCoordinator::new(second)
        .with_policy(LockPolicy::new(2, Duration::ZERO, false).unwrap());
    match contender.acquire("naming", "site/berlin").unwrap_err() {
        Error::Lock { owner, lock_id, kind } => {
            assert_eq!(owner, "naming");
            assert_eq!(lock_id, "site/berlin");
            assert_eq!(kind, LockErrorKind::Exhausted { attempts: 2 });
        }
        other => panic!("unexpected error: {other}"),
    }

    guard.release().unwrap();
    assert!(contender.acquire("naming", "site/berlin").unwrap());
    assert_eq!(contender.store().holder("site/berlin").as_deref(), Some("naming"));
}

#[test]
fn stuck_lock_of_the_same_owner_is_stolen_after_exhaustion() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileLockStore::new(dir.path()).unwrap();
    // A previous run of this subsystem crashed while holding the lock.
    assert!(store.lock("inventory-sync", "scheduler").unwrap());

    let coordinator = LockCoordinator::new(store)
        .with_policy(LockPolicy::new(3, Duration::ZERO, true).unwrap());

    assert!(coordinator.acquire("scheduler", "inventory-sync").unwrap());
    coordinator.release("scheduler", "inventory-sync").unwrap();
    assert_eq!(coordinator.store().holder("inventory-sync"), None);
}
