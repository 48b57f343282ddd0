//! Runtime variable storage
//!
//! This crate provides the VariableStore, which holds the named variables
//! blocks read and write. Every write signals the variable's lock in every
//! tab, which is how variable-change hats and linked blocks are woken.

use bw_core::{keys, Value};
use bw_locks::LockManager;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// A stored variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    /// Variable id, as referenced from block fields
    pub id: String,
    /// Display name
    pub name: String,
    /// Current value
    pub value: Value,
    /// When the value was last written
    pub last_updated: DateTime<Utc>,
}

/// Storage collaborator for runtime variables
pub trait VariableStore: Send + Sync {
    /// Current value of a variable
    fn get(&self, id: &str) -> Option<Value>;

    /// Write a variable and signal its change lock; returns the old value
    fn set(&self, id: &str, value: Value) -> Option<Value>;

    /// Declare a variable with a name and initial value
    ///
    /// Keeps the current value of a variable that already exists.
    fn declare(&self, id: &str, name: &str, initial: Value);

    /// Remove a variable
    fn remove(&self, id: &str) -> Option<Variable>;

    /// Full record of a variable
    fn variable(&self, id: &str) -> Option<Variable>;

    fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }
}

/// In-memory variable store
///
/// The MemoryVariableStore is responsible for:
/// - Storing variable values keyed by id
/// - Signaling `variable:<id>` in every tab on write
pub struct MemoryVariableStore {
    variables: DashMap<String, Variable>,
    locks: Arc<LockManager>,
}

impl MemoryVariableStore {
    /// Create an empty store signaling through `locks`
    pub fn new(locks: Arc<LockManager>) -> Self {
        Self {
            variables: DashMap::new(),
            locks,
        }
    }

    /// Number of stored variables
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// All variables, sorted by id
    pub fn all(&self) -> Vec<Variable> {
        let mut all: Vec<Variable> = self.variables.iter().map(|v| v.value().clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

impl VariableStore for MemoryVariableStore {
    fn get(&self, id: &str) -> Option<Value> {
        self.variables.get(id).map(|v| v.value.clone())
    }

    #[instrument(skip(self, value))]
    fn set(&self, id: &str, value: Value) -> Option<Value> {
        let old = {
            let mut entry = self.variables.entry(id.to_string()).or_insert_with(|| Variable {
                id: id.to_string(),
                name: id.to_string(),
                value: Value::Null,
                last_updated: Utc::now(),
            });
            entry.last_updated = Utc::now();
            std::mem::replace(&mut entry.value, value.clone())
        };

        debug!(value = %value, "Setting variable");
        // Entry guard is dropped: change listeners may read the store
        let signaled = self.locks.signal_all_tabs(&keys::variable(id), value);
        trace!(signaled, "Signaled variable change");

        Some(old).filter(|v| !v.is_null())
    }

    fn declare(&self, id: &str, name: &str, initial: Value) {
        self.variables
            .entry(id.to_string())
            .and_modify(|v| v.name = name.to_string())
            .or_insert_with(|| Variable {
                id: id.to_string(),
                name: name.to_string(),
                value: initial,
                last_updated: Utc::now(),
            });
    }

    fn remove(&self, id: &str) -> Option<Variable> {
        self.variables.remove(id).map(|(_, v)| v)
    }

    fn variable(&self, id: &str) -> Option<Variable> {
        self.variables.get(id).map(|v| v.clone())
    }
}

/// Thread-safe wrapper for a variable store
pub type SharedVariableStore = Arc<dyn VariableStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn store() -> (Arc<LockManager>, MemoryVariableStore) {
        let locks = Arc::new(LockManager::new());
        let store = MemoryVariableStore::new(locks.clone());
        (locks, store)
    }

    #[test]
    fn test_set_and_get() {
        let (_, store) = store();
        assert_eq!(store.set("v1", json!(3)), None);
        assert_eq!(store.set("v1", json!(4)), Some(json!(3)));
        assert_eq!(store.get("v1"), Some(json!(4)));
        assert!(store.contains("v1"));
        assert!(!store.contains("v2"));
    }

    #[test]
    fn test_declare_keeps_existing_value() {
        let (_, store) = store();
        store.declare("v1", "counter", json!(0));
        store.set("v1", json!(9));
        store.declare("v1", "renamed", json!(0));

        let variable = store.variable("v1").unwrap();
        assert_eq!(variable.name, "renamed");
        assert_eq!(variable.value, json!(9));
    }

    #[tokio::test]
    async fn test_set_signals_every_tab() {
        let (locks, store) = store();
        let key = keys::variable("v1");
        let a = locks.create_lock("a", "b1", &key).register_waiter(None);
        let b = locks.create_lock("b", "b2", &key).register_waiter(None);

        store.set("v1", json!("on"));

        let timeout = Some(Duration::from_secs(1));
        assert_eq!(a.wait(timeout).await.unwrap(), Some(json!("on")));
        assert_eq!(b.wait(timeout).await.unwrap(), Some(json!("on")));
    }

    #[test]
    fn test_listener_can_read_store() {
        let locks = Arc::new(LockManager::new());
        let store = Arc::new(MemoryVariableStore::new(locks.clone()));
        let seen = Arc::new(std::sync::Mutex::new(None));

        let reader = store.clone();
        let sink = seen.clone();
        locks.create_lock("main", "hat", &keys::variable("v1")).subscribe(
            None,
            bw_locks::callback(move |_| {
                *sink.lock().unwrap() = reader.get("v1");
            }),
        );

        store.set("v1", json!(7));
        assert_eq!(*seen.lock().unwrap(), Some(json!(7)));
    }
}
