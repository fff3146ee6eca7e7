//! The attribute-set dictionary: one 32-bit id per distinct set of pairs.

use std::sync::Mutex;

use ahash::AHashMap;

use super::{AttributeSet, AttributeSetIndex};

struct SetState {
    sets: Vec<AttributeSet>,
    by_content: AHashMap<AttributeSet, AttributeSetIndex>,
    lookups: u64,
}

/// Mutex-guarded dictionary over canonicalized attribute sets. The empty
/// set is interned at id 0 on construction, in every process.
pub struct AttributeSetStore {
    state: Mutex<SetState>,
}

impl AttributeSetStore {
    pub fn new() -> AttributeSetStore {
        let empty = AttributeSet::new();
        let mut by_content = AHashMap::new();
        by_content.insert(empty.clone(), 0);
        AttributeSetStore {
            state: Mutex::new(SetState {
                sets: vec![empty],
                by_content,
                lookups: 0,
            }),
        }
    }

    /// Interns `set`, canonicalizing it first; equal sets collapse to the
    /// same id regardless of insertion order.
    pub fn add(&self, mut set: AttributeSet) -> AttributeSetIndex {
        set.finalize();
        let mut state = self.state.lock().unwrap();
        state.lookups += 1;
        if let Some(&index) = state.by_content.get(&set) {
            return index;
        }
        let index = state.sets.len() as AttributeSetIndex;
        state.sets.push(set.clone());
        state.by_content.insert(set, index);
        index
    }

    /// Returns a copy of the set interned at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` was never returned by [`add`](Self::add).
    pub fn get(&self, index: AttributeSetIndex) -> AttributeSet {
        self.state.lock().unwrap().sets[index as usize].clone()
    }

    /// Number of interned sets (including the empty set).
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().sets.len()
    }

    pub fn is_empty(&self) -> bool {
        false // the empty set is always present
    }

    /// Total `add` calls; reported with the run statistics.
    pub fn lookups(&self) -> u64 {
        self.state.lock().unwrap().lookups
    }
}

impl Default for AttributeSetStore {
    fn default() -> AttributeSetStore {
        AttributeSetStore::new()
    }
}
