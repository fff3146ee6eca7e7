//! The tag-key dictionary: strings to dense 16-bit indexes.
//!
//! Reads are lock-free: the live mapping is an immutable snapshot behind an
//! atomic pointer, loaded with acquire ordering. A lookup miss takes a
//! short writer lock, re-checks under the lock, appends the key and
//! publishes a new snapshot. Superseded snapshots are retained until the
//! store drops, so a pointer loaded by any reader stays valid; the key
//! strings themselves are shared between snapshots and never move.

use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, Mutex};

use ahash::AHashMap;
use tileforge_common::{Error, Result};

use super::AttributeKeyIndex;

/// Maximum number of distinct keys; index 0 is the missing sentinel.
const MAX_KEYS: usize = 65_535;

struct Snapshot {
    by_name: AHashMap<Arc<str>, AttributeKeyIndex>,
    keys: Vec<Arc<str>>,
}

struct WriteState {
    /// Every snapshot ever published, including the live one. Keeps
    /// reader-held pointers valid for the store's lifetime.
    retained: Vec<Box<Snapshot>>,
}

pub struct AttributeKeyStore {
    current: AtomicPtr<Snapshot>,
    write: Mutex<WriteState>,
}

impl AttributeKeyStore {
    pub fn new() -> AttributeKeyStore {
        // Index 0 is reserved: slot it with an empty dummy key.
        let snapshot = Box::new(Snapshot {
            by_name: AHashMap::new(),
            keys: vec![Arc::from("")],
        });
        let ptr = Box::as_ref(&snapshot) as *const Snapshot as *mut Snapshot;
        AttributeKeyStore {
            current: AtomicPtr::new(ptr),
            write: Mutex::new(WriteState {
                retained: vec![snapshot],
            }),
        }
    }

    fn snapshot(&self) -> &Snapshot {
        let ptr = self.current.load(Ordering::Acquire);
        // Snapshots are boxed, never moved, and retained until the store
        // drops, so the loaded pointer is always valid while `self` lives.
        unsafe { &*ptr }
    }

    /// Returns the index of `key`, or 0 when it has not been interned.
    pub fn find(&self, key: &str) -> AttributeKeyIndex {
        self.snapshot().by_name.get(key).copied().unwrap_or(0)
    }

    /// Returns the index of `key`, interning it if needed.
    ///
    /// Fails with `KeySpaceExhausted` once 65,535 distinct keys exist;
    /// real profiles use well under a hundred.
    pub fn key_to_index(&self, key: &str) -> Result<AttributeKeyIndex> {
        let index = self.find(key);
        if index != 0 {
            return Ok(index);
        }

        let mut write = self.write.lock().unwrap();

        // Double-check: another writer may have raced us here.
        let index = self.find(key);
        if index != 0 {
            return Ok(index);
        }

        let live = self.snapshot();
        let new_index = live.keys.len();
        if new_index > MAX_KEYS {
            return Err(Error::key_space_exhausted(key));
        }

        let key: Arc<str> = Arc::from(key);
        let mut by_name = live.by_name.clone();
        by_name.insert(key.clone(), new_index as AttributeKeyIndex);
        let mut keys = live.keys.clone();
        keys.push(key);

        let snapshot = Box::new(Snapshot { by_name, keys });
        let ptr = Box::as_ref(&snapshot) as *const Snapshot as *mut Snapshot;
        write.retained.push(snapshot);
        self.current.store(ptr, Ordering::Release);
        Ok(new_index as AttributeKeyIndex)
    }

    /// The key interned at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` was never returned by [`key_to_index`](Self::key_to_index).
    pub fn get_key(&self, index: AttributeKeyIndex) -> Arc<str> {
        self.snapshot().keys[index as usize].clone()
    }

    /// Number of interned keys, excluding the sentinel.
    pub fn len(&self) -> usize {
        self.snapshot().keys.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AttributeKeyStore {
    fn default() -> AttributeKeyStore {
        AttributeKeyStore::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_round_trip_and_sentinel() {
        let store = AttributeKeyStore::new();
        let i = store.key_to_index("highway").unwrap();
        assert_ne!(i, 0);
        assert_eq!(&*store.get_key(i), "highway");
        assert_eq!(store.key_to_index("highway").unwrap(), i);
        assert_eq!(store.find("building"), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_indexes_are_dense() {
        let store = AttributeKeyStore::new();
        let a = store.key_to_index("a").unwrap();
        let b = store.key_to_index("b").unwrap();
        let c = store.key_to_index("c").unwrap();
        assert_eq!((a, b, c), (1, 2, 3));
    }

    #[test]
    fn test_concurrent_interning_is_consistent() {
        let store = Arc::new(AttributeKeyStore::new());
        let keys: Vec<String> = (0..50).map(|i| format!("key{i}")).collect();
        let mut handles = vec![];
        for _ in 0..8 {
            let store = store.clone();
            let keys = keys.clone();
            handles.push(thread::spawn(move || {
                keys.iter()
                    .map(|k| store.key_to_index(k).unwrap())
                    .collect::<Vec<_>>()
            }));
        }
        let results: Vec<Vec<AttributeKeyIndex>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        // Every thread observed the same index for the same key.
        for result in &results[1..] {
            assert_eq!(result, &results[0]);
        }
        assert_eq!(store.len(), 50);
        for (key, &index) in keys.iter().zip(&results[0]) {
            assert_eq!(&*store.get_key(index), key.as_str());
        }
    }
}
