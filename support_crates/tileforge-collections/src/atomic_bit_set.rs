//! A thread-safe fixed-capacity bit set backed by atomic words.

use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe fixed-capacity bit set.
///
/// `AtomicBitSet` stores a fixed number of bits in a `Vec<AtomicU64>`,
/// where bit `i` lives in word `i / 64` at position `i % 64`. Bits can be
/// set and tested concurrently without locks; the capacity is decided at
/// construction time and never changes.
///
/// Reads are inherently stale in concurrent use: a bit observed unset may
/// be set by another thread immediately afterwards. The callers here only
/// ever transition bits from unset to set, so a stale `false` is the only
/// possible anomaly and is benign for membership marking.
pub struct AtomicBitSet {
    words: Vec<AtomicU64>,
    len: usize,
}

impl AtomicBitSet {
    /// Creates a bit set with `len` bits, all initially unset.
    pub fn new(len: usize) -> AtomicBitSet {
        let word_count = len.div_ceil(64);
        AtomicBitSet {
            words: (0..word_count).map(|_| AtomicU64::new(0)).collect(),
            len,
        }
    }

    /// Returns the number of bits in the set.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Atomically sets bit `index` and returns its previous value.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len()`.
    #[inline]
    pub fn set(&self, index: usize) -> bool {
        assert!(index < self.len);
        let (word, pos) = self.bit_location(index);
        (word.fetch_or(1 << pos, Ordering::SeqCst) & (1 << pos)) != 0
    }

    /// Atomically reads bit `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len()`.
    #[inline]
    pub fn get(&self, index: usize) -> bool {
        assert!(index < self.len);
        let (word, pos) = self.bit_location(index);
        (word.load(Ordering::Acquire) & (1 << pos)) != 0
    }

    /// Clears every bit.
    ///
    /// Not atomic with respect to concurrent `set` calls; intended for
    /// reuse between single-threaded phases.
    pub fn clear(&self) {
        for word in &self.words {
            word.store(0, Ordering::SeqCst);
        }
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }

    fn bit_location(&self, index: usize) -> (&AtomicU64, usize) {
        (&self.words[index >> 6], index & 63)
    }
}

#[cfg(test)]
mod tests {
    use super::AtomicBitSet;

    #[test]
    fn test_set_get() {
        let set = AtomicBitSet::new(130);
        assert_eq!(set.len(), 130);
        assert!(!set.get(0));
        assert!(!set.set(0));
        assert!(set.set(0));
        assert!(set.get(0));
        assert!(!set.set(129));
        assert!(set.get(129));
        assert!(!set.get(64));
        assert_eq!(set.count_ones(), 2);
        set.clear();
        assert_eq!(set.count_ones(), 0);
    }

    #[test]
    fn test_concurrent_marking() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        let set = Arc::new(AtomicBitSet::new(1024));
        let num_threads = 8;
        let barrier = Arc::new(Barrier::new(num_threads));
        let mut handles = vec![];
        for t in 0..num_threads {
            let set = set.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                // Every thread marks an overlapping stripe.
                for i in (t..1024).step_by(2) {
                    set.set(i);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        for i in 0..1024 {
            assert!(set.get(i), "bit {i} must be set");
        }
    }
}
