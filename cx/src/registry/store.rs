//! Shared key-value store
//!
//! Every piece of coordinator state lives here: user values, scenario counters
//! and the membership counter. A single process-wide lock serializes all
//! access, which keeps compound check-then-write operations atomic.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::debug;

/// Raw map type handed to compound operations
pub(crate) type Entries = HashMap<String, String>;

/// Errors raised by store operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Value for key '{key}' is not an integer counter: '{value}'")]
    NotAnInteger { key: String, value: String },

    #[error("Key '{0}' is reserved for cluster membership")]
    ReservedKey(String),
}

/// Thread-safe string-to-string map with atomic counter support
#[derive(Debug, Default)]
pub struct KeyValueStore {
    entries: Mutex<Entries>,
}

impl KeyValueStore {
    /// Create an empty store
    pub fn new() -> Self {
        debug!("KeyValueStore::new: called");
        Self::default()
    }

    /// Insert or overwrite a value
    pub fn set(&self, key: &str, value: impl Into<String>) {
        let value = value.into();
        debug!(%key, value_len = value.len(), "KeyValueStore::set: called");
        self.lock().insert(key.to_string(), value);
    }

    /// Get the current value for a key
    pub fn get(&self, key: &str) -> Option<String> {
        debug!(%key, "KeyValueStore::get: called");
        self.lock().get(key).cloned()
    }

    /// Increment the counter at `key`, initializing it to 1 when absent
    pub fn increment(&self, key: &str) -> Result<u64, StoreError> {
        self.increment_or_init(key, 1)
    }

    /// Increment the counter at `key`, initializing it to `init` when absent
    ///
    /// Returns the value after the update.
    pub fn increment_or_init(&self, key: &str, init: u64) -> Result<u64, StoreError> {
        debug!(%key, init, "KeyValueStore::increment_or_init: called");
        self.with_entries(|entries| increment_entry(entries, key, init))
    }

    /// Sorted copy of every entry
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.lock().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Run `f` while holding the store lock
    ///
    /// Used by registries whose read-decide-write sequences must not interleave
    /// with any other store operation.
    pub(crate) fn with_entries<R>(&self, f: impl FnOnce(&mut Entries) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        // A panic inside a critical section cannot leave a half-written String behind
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Parse the counter stored at `key`; absent reads as `None`
pub(crate) fn read_counter(entries: &Entries, key: &str) -> Result<Option<u64>, StoreError> {
    match entries.get(key) {
        None => Ok(None),
        Some(raw) => parse_counter(key, raw).map(Some),
    }
}

/// Increment-or-init on an already locked map
pub(crate) fn increment_entry(entries: &mut Entries, key: &str, init: u64) -> Result<u64, StoreError> {
    let next = match read_counter(entries, key)? {
        None => init,
        Some(current) => current.saturating_add(1),
    };
    entries.insert(key.to_string(), next.to_string());
    Ok(next)
}

fn parse_counter(key: &str, raw: &str) -> Result<u64, StoreError> {
    raw.trim().parse::<u64>().map_err(|_| StoreError::NotAnInteger {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_get_missing_key_is_absent() {
        let store = KeyValueStore::new();
        assert_eq!(store.get("never-set"), None);
        assert_eq!(store.get("never-set"), None);
    }

    #[test]
    fn test_set_overwrites() {
        let store = KeyValueStore::new();
        store.set("k", "first");
        store.set("k", "second");
        assert_eq!(store.get("k").as_deref(), Some("second"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_increment_initializes_then_counts() {
        let store = KeyValueStore::new();
        assert_eq!(store.increment("hits").unwrap(), 1);
        for _ in 0..4 {
            store.increment("hits").unwrap();
        }
        assert_eq!(store.get("hits").as_deref(), Some("5"));
    }

    #[test]
    fn test_increment_custom_init() {
        let store = KeyValueStore::new();
        assert_eq!(store.increment_or_init("c", 10).unwrap(), 10);
        assert_eq!(store.increment_or_init("c", 10).unwrap(), 11);
    }

    #[test]
    fn test_increment_non_integer_fails() {
        let store = KeyValueStore::new();
        store.set("name", "checkout");

        let err = store.increment("name").unwrap_err();
        assert_eq!(
            err,
            StoreError::NotAnInteger {
                key: "name".to_string(),
                value: "checkout".to_string()
            }
        );
        // Failed increment leaves the value untouched
        assert_eq!(store.get("name").as_deref(), Some("checkout"));
    }

    #[test]
    fn test_concurrent_increments_lose_nothing() {
        let store = Arc::new(KeyValueStore::new());
        let callers = 32;

        thread::scope(|scope| {
            for _ in 0..callers {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    for _ in 0..50 {
                        store.increment("fresh").unwrap();
                    }
                });
            }
        });

        assert_eq!(store.get("fresh"), Some((callers * 50).to_string()));
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let store = KeyValueStore::new();
        store.set("b", "2");
        store.set("a", "1");
        let keys: Vec<_> = store.snapshot().into_keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
