//! Advisory locks for named critical sections.
//!
//! # Design
//! The coordinator keeps no state between calls. Mutual exclusion comes
//! entirely from the `LockStore`, which must make `lock(id, owner)` atomic
//! across every process that shares it. One `acquire` moves through
//! `Idle -> Attempting -> Acquired | ContentionExceeded`; after contention is
//! exceeded the lock is either stolen (forced unlock, then exactly one more
//! `lock`) or the call fails.
//!
//! Stealing leaves a window between the forced `unlock` and the follow-up
//! `lock` in which another caller may win. That caller keeps the lock and
//! this call fails with `StealFailed`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::error::{Error, LockErrorKind, Result};
use crate::retry::{Sleeper, ThreadSleeper};

/// Failure reported by a lock store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct LockStoreError(pub String);

/// Shared lock table reachable from every process that coordinates.
pub trait LockStore: Send + Sync {
    /// Take `id` for `owner`. Returns `false` while anyone holds it.
    fn lock(&self, id: &str, owner: &str) -> Result<bool, LockStoreError>;

    /// Drop the lock `id` held by `owner`. Releasing a lock that is not held
    /// is not an error.
    fn unlock(&self, id: &str, owner: &str) -> Result<(), LockStoreError>;
}

impl<S: LockStore + ?Sized> LockStore for &S {
    fn lock(&self, id: &str, owner: &str) -> Result<bool, LockStoreError> {
        (**self).lock(id, owner)
    }

    fn unlock(&self, id: &str, owner: &str) -> Result<(), LockStoreError> {
        (**self).unlock(id, owner)
    }
}

impl<S: LockStore + ?Sized> LockStore for Arc<S> {
    fn lock(&self, id: &str, owner: &str) -> Result<bool, LockStoreError> {
        (**self).lock(id, owner)
    }

    fn unlock(&self, id: &str, owner: &str) -> Result<(), LockStoreError> {
        (**self).unlock(id, owner)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    /// Force-unlock and retry once when contention outlasts `max_attempts`.
    pub allow_steal: bool,
}

impl LockPolicy {
    pub const MAX_ATTEMPTS: u32 = 5;
    pub const DELAY: Duration = Duration::from_secs(60);

    pub fn new(max_attempts: u32, delay: Duration, allow_steal: bool) -> Result<Self> {
        if max_attempts < 1 {
            return Err(Error::InvalidArgument(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            max_attempts,
            delay,
            allow_steal,
        })
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::MAX_ATTEMPTS,
            delay: Self::DELAY,
            allow_steal: true,
        }
    }
}

pub struct LockCoordinator<S> {
    store: S,
    policy: LockPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl<S: LockStore> LockCoordinator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            policy: LockPolicy::default(),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_policy(mut self, policy: LockPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &LockPolicy {
        &self.policy
    }

    /// Acquire `lock_id` for `owner` under the coordinator's policy.
    pub fn acquire(&self, owner: &str, lock_id: &str) -> Result<bool> {
        self.acquire_with(owner, lock_id, &self.policy)
    }

    /// Acquire `lock_id` for `owner`, retrying on contention per `policy`.
    ///
    /// Returns `Ok(true)` once the lock is held. Contention that outlasts the
    /// policy is an error; so is any failure of the store itself.
    pub fn acquire_with(&self, owner: &str, lock_id: &str, policy: &LockPolicy) -> Result<bool> {
        validate(owner, lock_id)?;
        let max_attempts = policy.max_attempts.max(1);
        let store_error =
            |e: LockStoreError| Error::lock(owner, lock_id, LockErrorKind::Store(e.0));

        for attempt in 1..=max_attempts {
            debug!(%owner, %lock_id, attempt, max_attempts, "creating lock");
            if self.store.lock(lock_id, owner).map_err(store_error)? {
                debug!(%owner, %lock_id, "lock created");
                return Ok(true);
            }
            debug!(%owner, %lock_id, attempt, max_attempts, "lock is held, retrying");
            if attempt < max_attempts {
                self.sleeper.sleep(policy.delay);
            }
        }

        if !policy.allow_steal {
            error!(%owner, %lock_id, max_attempts, "creating lock failed, aborting");
            return Err(Error::lock(
                owner,
                lock_id,
                LockErrorKind::Exhausted {
                    attempts: max_attempts,
                },
            ));
        }

        warn!(%owner, %lock_id, max_attempts, "creating lock failed, forcing removal");
        self.store.unlock(lock_id, owner).map_err(store_error)?;
        if self.store.lock(lock_id, owner).map_err(store_error)? {
            debug!(%owner, %lock_id, "lock re-acquired");
            return Ok(true);
        }
        error!(%owner, %lock_id, "failed to re-acquire lock");
        Err(Error::lock(owner, lock_id, LockErrorKind::StealFailed))
    }

    /// Release `lock_id` for `owner`. Store failures are returned, never
    /// swallowed.
    pub fn release(&self, owner: &str, lock_id: &str) -> Result<()> {
        validate(owner, lock_id)?;
        debug!(%owner, %lock_id, "removing lock");
        self.store
            .unlock(lock_id, owner)
            .map_err(|e| Error::lock(owner, lock_id, LockErrorKind::Store(e.0)))?;
        debug!(%owner, %lock_id, "lock removed");
        Ok(())
    }

    /// Acquire and hand back a guard that releases on drop.
    pub fn lock(&self, owner: &str, lock_id: &str) -> Result<LockGuard<'_, S>> {
        self.acquire(owner, lock_id)?;
        Ok(LockGuard {
            coordinator: self,
            owner: owner.to_string(),
            lock_id: lock_id.to_string(),
            released: false,
        })
    }

    /// Run `critical` while holding `lock_id`. The lock is released whether
    /// or not `critical` succeeds; a failed release is reported.
    pub fn with_lock<R>(
        &self,
        owner: &str,
        lock_id: &str,
        critical: impl FnOnce() -> R,
    ) -> Result<R> {
        let guard = self.lock(owner, lock_id)?;
        let output = critical();
        guard.release()?;
        Ok(output)
    }
}

fn validate(owner: &str, lock_id: &str) -> Result<()> {
    if owner.is_empty() {
        return Err(Error::lock(
            owner,
            lock_id,
            LockErrorKind::InvalidArgument("owner is required".to_string()),
        ));
    }
    if lock_id.is_empty() {
        return Err(Error::lock(
            owner,
            lock_id,
            LockErrorKind::InvalidArgument("lock id is required".to_string()),
        ));
    }
    Ok(())
}

/// A held lock. Call [`LockGuard::release`] to observe release failures;
/// dropping the guard releases too, logging any failure.
pub struct LockGuard<'a, S: LockStore> {
    coordinator: &'a LockCoordinator<S>,
    owner: String,
    lock_id: String,
    released: bool,
}

impl<S: LockStore> LockGuard<'_, S> {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn lock_id(&self) -> &str {
        &self.lock_id
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.coordinator.release(&self.owner, &self.lock_id)
    }
}

impl<S: LockStore> Drop for LockGuard<'_, S> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.coordinator.release(&self.owner, &self.lock_id) {
            error!(error = %err, "releasing lock on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::store::InMemoryLockStore;
    use crate::testing::RecordingSleeper;

    /// Refuses every `lock` until `unlock` is called once.
    #[derive(Default)]
    struct StuckStore {
        lock_calls: AtomicU32,
        unlocked: Mutex<bool>,
    }

    impl LockStore for StuckStore {
        fn lock(&self, _id: &str, _owner: &str) -> Result<bool, LockStoreError> {
            self.lock_calls.fetch_add(1, Ordering::SeqCst);
            Ok(*self.unlocked.lock().unwrap())
        }

        fn unlock(&self, _id: &str, _owner: &str) -> Result<(), LockStoreError> {
            *self.unlocked.lock().unwrap() = true;
            Ok(())
        }
    }

    struct BrokenStore;

    impl LockStore for BrokenStore {
        fn lock(&self, _id: &str, _owner: &str) -> Result<bool, LockStoreError> {
            Err(LockStoreError("store offline".to_string()))
        }

        fn unlock(&self, _id: &str, _owner: &str) -> Result<(), LockStoreError> {
            Err(LockStoreError("store offline".to_string()))
        }
    }

    fn coordinator<S: LockStore>(
        store: S,
        allow_steal: bool,
    ) -> (LockCoordinator<S>, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::default());
        let coordinator = LockCoordinator::new(store)
            .with_policy(LockPolicy::new(3, Duration::from_secs(60), allow_steal).unwrap())
            .with_sleeper(sleeper.clone());
        (coordinator, sleeper)
    }

    #[test]
    fn free_lock_is_acquired_first_try() {
        let (coordinator, sleeper) = coordinator(InMemoryLockStore::new(), true);
        assert!(coordinator.acquire("naming", "prefix-web").unwrap());
        assert_eq!(coordinator.store().holder("prefix-web").as_deref(), Some("naming"));
        assert!(sleeper.sleeps().is_empty());
    }

    #[test]
    fn steal_succeeds_after_exhaustion() {
        let (coordinator, sleeper) = coordinator(StuckStore::default(), true);
        assert!(coordinator.acquire("naming", "prefix-web").unwrap());
        assert_eq!(coordinator.store().lock_calls.load(Ordering::SeqCst), 4);
        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(60); 2]);
    }

    #[test]
    fn no_steal_means_exhaustion_error() {
        let (coordinator, _) = coordinator(StuckStore::default(), false);
        let err = coordinator.acquire("naming", "prefix-web").unwrap_err();
        assert!(matches!(
            err,
            Error::Lock { kind: LockErrorKind::Exhausted { attempts: 3 }, .. }
        ));
        assert_eq!(coordinator.store().lock_calls.load(Ordering::SeqCst), 3);
        assert!(!*coordinator.store().unlocked.lock().unwrap());
    }

    #[test]
    fn steal_fails_when_held_by_another_owner() {
        let store = InMemoryLockStore::new();
        assert!(store.lock("prefix-web", "someone-else").unwrap());
        let (coordinator, _) = coordinator(store, true);

        let err = coordinator.acquire("naming", "prefix-web").unwrap_err();
        assert!(matches!(err, Error::Lock { kind: LockErrorKind::StealFailed, .. }));
        assert_eq!(
            coordinator.store().holder("prefix-web").as_deref(),
            Some("someone-else")
        );
    }

    #[test]
    fn steal_recovers_a_lock_left_by_the_same_owner() {
        let store = InMemoryLockStore::new();
        assert!(store.lock("prefix-web", "naming").unwrap());
        let (coordinator, _) = coordinator(store, true);
        assert!(coordinator.acquire("naming", "prefix-web").unwrap());
    }

    #[test]
    fn store_failures_surface_as_lock_errors() {
        let (coordinator, sleeper) = coordinator(BrokenStore, true);
        let err = coordinator.acquire("naming", "prefix-web").unwrap_err();
        assert!(matches!(err, Error::Lock { kind: LockErrorKind::Store(_), .. }));
        assert!(sleeper.sleeps().is_empty());

        let err = coordinator.release("naming", "prefix-web").unwrap_err();
        assert!(err.to_string().contains("store offline"));
    }

    #[test]
    fn empty_names_are_rejected_before_touching_the_store() {
        let (coordinator, _) = coordinator(StuckStore::default(), true);
        assert!(coordinator.acquire("", "prefix-web").is_err());
        assert!(coordinator.acquire("naming", "").is_err());
        assert_eq!(coordinator.store().lock_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn with_lock_releases_after_the_critical_section() {
        let (coordinator, _) = coordinator(InMemoryLockStore::new(), false);
        let value = coordinator
            .with_lock("naming", "prefix-web", || {
                assert_eq!(coordinator.store().holder("prefix-web").as_deref(), Some("naming"));
                42
            })
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(coordinator.store().holder("prefix-web"), None);
    }

    #[test]
    fn dropped_guard_releases() {
        let (coordinator, _) = coordinator(InMemoryLockStore::new(), false);
        {
            let guard = coordinator.lock("naming", "prefix-db").unwrap();
            assert_eq!(guard.lock_id(), "prefix-db");
            assert!(!coordinator.store().lock("prefix-db", "other").unwrap());
        }
        assert!(coordinator.store().lock("prefix-db", "other").unwrap());
    }

    #[test]
    fn release_of_a_free_lock_is_fine() {
        let (coordinator, _) = coordinator(InMemoryLockStore::new(), true);
        coordinator.release("naming", "never-taken").unwrap();
    }
}
