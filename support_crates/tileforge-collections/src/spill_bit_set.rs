//! A bit set with a bounded fast path and an unbounded spill set.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::atomic_bit_set::AtomicBitSet;

/// Membership set over `u64` ids: a fixed-capacity [`AtomicBitSet`] for
/// ids below the sized capacity, and a mutex-guarded spill set for the
/// rare ids beyond it.
///
/// The capacity is an estimate of the largest expected id; ids past it
/// stay correct, just slower. The set never resizes, so a wildly
/// out-of-range id costs one hash insert rather than an unbounded
/// reallocation.
pub struct SpillBitSet {
    dense: AtomicBitSet,
    spill: Mutex<HashSet<u64>>,
}

impl SpillBitSet {
    /// Creates a set whose dense fast path covers ids `0..capacity`.
    pub fn new(capacity: usize) -> SpillBitSet {
        SpillBitSet {
            dense: AtomicBitSet::new(capacity),
            spill: Mutex::new(HashSet::new()),
        }
    }

    /// Marks `id` as a member.
    pub fn insert(&self, id: u64) {
        if (id as usize) < self.dense.len() {
            self.dense.set(id as usize);
        } else {
            self.spill.lock().unwrap().insert(id);
        }
    }

    /// Tests membership of `id`.
    pub fn contains(&self, id: u64) -> bool {
        if (id as usize) < self.dense.len() {
            self.dense.get(id as usize)
        } else {
            self.spill.lock().unwrap().contains(&id)
        }
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.dense.count_ones() + self.spill.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every member, keeping the dense capacity.
    pub fn clear(&self) {
        self.dense.clear();
        self.spill.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::SpillBitSet;

    #[test]
    fn test_dense_and_spill() {
        let set = SpillBitSet::new(100);
        set.insert(5);
        set.insert(99);
        set.insert(100); // first spilled id
        set.insert(1 << 40);
        assert!(set.contains(5));
        assert!(set.contains(99));
        assert!(set.contains(100));
        assert!(set.contains(1 << 40));
        assert!(!set.contains(6));
        assert!(!set.contains((1 << 40) + 1));
        assert_eq!(set.len(), 4);
        set.clear();
        assert!(!set.contains(5));
        assert!(!set.contains(1 << 40));
        assert!(set.is_empty());
    }
}
