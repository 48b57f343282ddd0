//! Lock & broadcast coordinator
//!
//! This crate provides the LockManager, the table of named per-tab
//! wait/signal objects. Broadcasts, variable-change triggers, device-value
//! triggers and procedure call/return all meet on a [`Lock`]: one side
//! waits or subscribes, the other side signals.

mod lock;

pub use lock::{Lock, PendingSignal, Predicate, SignalCallback, SubscriptionId};

use bw_core::{EngineError, EngineResult, TabId, Value};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// Build a [`Predicate`] from a closure
pub fn predicate<F>(f: F) -> Predicate
where
    F: Fn(&Value) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Build a [`SignalCallback`] from a closure
pub fn callback<F>(f: F) -> SignalCallback
where
    F: Fn(Value) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Table of locks, keyed by tab then by lock key
///
/// The LockManager is responsible for:
/// - Creating locks on demand, idempotently per `(tab, key)`
/// - Signaling locks by key, in one tab or across every tab
/// - Releasing every lock of a tab on reload or delete
#[derive(Default)]
pub struct LockManager {
    tabs: DashMap<TabId, DashMap<String, Arc<Lock>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the lock, or return the existing one for `(tab, key)`
    pub fn create_lock(&self, tab: &str, owner: &str, key: &str) -> Arc<Lock> {
        self.get_or_create_lock(tab, owner, key)
    }

    /// Existing lock for `(tab, key)`, created with `owner` when missing
    #[instrument(skip(self), level = "trace")]
    pub fn get_or_create_lock(&self, tab: &str, owner: &str, key: &str) -> Arc<Lock> {
        let locks = self.tabs.entry(tab.to_string()).or_default();
        let lock = locks
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!(tab = %tab, owner = %owner, key = %key, "Creating lock");
                Arc::new(Lock::new(tab, owner, key))
            })
            .clone();
        lock
    }

    pub fn get_lock(&self, tab: &str, key: &str) -> Option<Arc<Lock>> {
        let locks = self.tabs.get(tab)?;
        let lock = locks.get(key).map(|l| l.value().clone());
        lock
    }

    /// Existing lock, failing with `LockNotFound` when absent
    pub fn get_lock_required(&self, tab: &str, key: &str) -> EngineResult<Arc<Lock>> {
        self.get_lock(tab, key).ok_or_else(|| EngineError::LockNotFound {
            tab: tab.to_string(),
            key: key.to_string(),
        })
    }

    /// Signal a lock by key; returns false when the tab has no such lock
    pub fn signal(&self, tab: &str, key: &str, value: Value) -> bool {
        match self.get_lock(tab, key) {
            Some(lock) => {
                lock.signal_all(value);
                true
            }
            None => {
                trace!(tab = %tab, key = %key, "No lock to signal");
                false
            }
        }
    }

    /// Signal `key` in every tab holding such a lock
    ///
    /// Returns the number of locks signaled.
    pub fn signal_all_tabs(&self, key: &str, value: Value) -> usize {
        // Collect first: callbacks may create locks in the same table
        let locks: Vec<Arc<Lock>> = self
            .tabs
            .iter()
            .filter_map(|tab| tab.get(key).map(|l| l.value().clone()))
            .collect();

        for lock in &locks {
            lock.signal_all(value.clone());
        }
        locks.len()
    }

    /// Drop every lock of a tab; pending waiters observe a release
    #[instrument(skip(self))]
    pub fn release(&self, tab: &str) {
        if let Some((_, locks)) = self.tabs.remove(tab) {
            debug!(tab = %tab, locks = locks.len(), "Releasing locks");
            for entry in locks.iter() {
                entry.value().release();
            }
        }
    }

    /// Release the locks of every tab
    pub fn release_all(&self) {
        let tabs: Vec<TabId> = self.tabs.iter().map(|t| t.key().clone()).collect();
        for tab in tabs {
            self.release(&tab);
        }
    }

    /// Number of locks held by a tab
    pub fn lock_count(&self, tab: &str) -> usize {
        self.tabs.get(tab).map(|t| t.len()).unwrap_or(0)
    }

    /// Subscriptions on a lock (0 when the lock does not exist)
    pub fn subscriber_count(&self, tab: &str, key: &str) -> usize {
        self.get_lock(tab, key)
            .map(|l| l.subscriber_count())
            .unwrap_or(0)
    }

    /// Pending waiters on a lock (0 when the lock does not exist)
    pub fn waiter_count(&self, tab: &str, key: &str) -> usize {
        self.get_lock(tab, key).map(|l| l.waiter_count()).unwrap_or(0)
    }
}

/// Thread-safe wrapper for LockManager
pub type SharedLockManager = Arc<LockManager>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn test_create_is_idempotent() {
        let locks = LockManager::new();
        let a = locks.create_lock("main", "b1", "broadcast:x");
        let b = locks.get_or_create_lock("main", "b2", "broadcast:x");

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.owner(), "b1");
        assert_eq!(locks.lock_count("main"), 1);
        assert_eq!(locks.lock_count("other"), 0);
    }

    #[test]
    fn test_required_lock_missing() {
        let locks = LockManager::new();
        let err = locks.get_lock_required("main", "procedure:1").unwrap_err();
        assert!(matches!(err, EngineError::LockNotFound { .. }));
    }

    #[tokio::test]
    async fn test_every_waiter_receives_the_value() {
        let locks = LockManager::new();
        let lock = locks.create_lock("main", "b1", "k");

        let pending: Vec<_> = (0..5).map(|_| lock.register_waiter(None)).collect();
        assert_eq!(lock.waiter_count(), 5);
        assert_eq!(lock.signal_all(json!(42)), 5);

        for waiter in pending {
            let value = waiter.wait(Some(Duration::from_secs(1))).await.unwrap();
            assert_eq!(value, Some(json!(42)));
        }
        assert_eq!(lock.waiter_count(), 0);
        assert_eq!(lock.value(), json!(42));
    }

    #[tokio::test]
    async fn test_predicate_gates_wakeup() {
        let lock = LockManager::new().create_lock("main", "b1", "k");
        let pending = lock.register_waiter(Some(predicate(|v| v == &json!("b"))));

        lock.signal_all(json!("a"));
        assert_eq!(lock.waiter_count(), 1);
        lock.signal_all(json!("b"));

        let value = pending.wait(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(value, Some(json!("b")));
    }

    #[tokio::test]
    async fn test_timeout_returns_none() {
        let lock = LockManager::new().create_lock("main", "b1", "k");
        let value = lock
            .await_signal(None, Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(value.is_none());
        assert_eq!(lock.waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_release_wakes_waiters() {
        let locks = LockManager::new();
        let lock = locks.create_lock("main", "b1", "k");
        let pending = lock.register_waiter(None);

        locks.release("main");

        let err = pending.wait(None).await.unwrap_err();
        assert!(matches!(err, EngineError::LockReleased { .. }));
        assert_eq!(locks.lock_count("main"), 0);
        assert!(lock.is_released());
    }

    #[test]
    fn test_subscriptions_in_registration_order() {
        let lock = LockManager::new().create_lock("main", "b1", "k");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second"] {
            let seen = seen.clone();
            lock.subscribe(
                None,
                callback(move |v| seen.lock().unwrap().push(format!("{name}:{v}"))),
            );
        }
        let only_big = {
            let seen = seen.clone();
            lock.subscribe(
                Some(predicate(|v| v.as_i64().unwrap_or(0) > 10)),
                callback(move |v| seen.lock().unwrap().push(format!("big:{v}"))),
            )
        };

        lock.signal_all(json!(1));
        lock.signal_all(json!(20));
        assert!(lock.unsubscribe(only_big));
        lock.signal_all(json!(30));

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first:1", "second:1", "first:20", "second:20", "big:20", "first:30", "second:30"]
        );
    }

    #[test]
    fn test_callback_may_signal_other_lock() {
        let locks = Arc::new(LockManager::new());
        let source = locks.create_lock("main", "b1", "source");
        let target = locks.create_lock("main", "b2", "target");

        let inner = locks.clone();
        source.subscribe(
            None,
            callback(move |v| {
                inner.signal("main", "target", v);
            }),
        );

        locks.signal("main", "source", json!("relay"));
        assert_eq!(target.value(), json!("relay"));
    }

    #[test]
    fn test_signal_all_tabs() {
        let locks = LockManager::new();
        let a = locks.create_lock("a", "x", "variable:v1");
        let b = locks.create_lock("b", "y", "variable:v1");
        locks.create_lock("c", "z", "variable:v2");

        assert_eq!(locks.signal_all_tabs("variable:v1", json!(5)), 2);
        assert_eq!(a.value(), json!(5));
        assert_eq!(b.value(), json!(5));
        assert!(!locks.signal("c", "variable:v1", json!(5)));
    }

    #[test]
    fn test_released_lock_rejects_new_waiters() {
        let locks = LockManager::new();
        let lock = locks.create_lock("main", "b1", "k");
        locks.release_all();

        let result = tokio_test::block_on(lock.await_signal(None, None));
        assert!(matches!(result, Err(EngineError::LockReleased { .. })));
    }
}
