//! The sharded `(key, value, minzoom)` pair dictionary.
//!
//! Pairs are spread over 256 shards to keep insert-time lock contention
//! low. Shard 0 is the hot shard: it only ever holds 65,536 entries, so a
//! hot pair's id also fits in 16 bits where a compact representation needs
//! it. Pairs that look likely to recur are committed to the hot shard
//! before their popularity is known; everything else lands in a shard
//! chosen by a deterministic content hash.

use std::sync::Mutex;

use ahash::AHashMap;
use smallvec::SmallVec;
use xxhash_rust::xxh3::Xxh3;

use super::{AttributePair, AttributePairIndex, AttributeValue};

/// Bits of the pair index that select the shard.
pub const SHARD_BITS: u32 = 8;
/// Number of shards.
pub const PAIR_SHARDS: usize = 1 << SHARD_BITS;
/// Entry cap of the hot shard (ids representable in 16 bits).
pub const HOT_SHARD_CAPACITY: usize = 1 << 16;
/// Entry cap of every other shard (24-bit offsets).
const SHARD_CAPACITY: usize = 1 << (32 - SHARD_BITS);

struct PairShard {
    pairs: Vec<AttributePair>,
    /// Content hash to candidate offsets; collisions resolved by full
    /// equality against `pairs`.
    by_content: AHashMap<u64, SmallVec<[u32; 1]>>,
}

impl PairShard {
    fn new() -> PairShard {
        PairShard {
            pairs: Vec::new(),
            by_content: AHashMap::new(),
        }
    }

    /// Finds the offset of `pair`, inserting it if absent. Returns `None`
    /// when the shard is at `capacity` and the pair is new.
    fn find_or_insert(&mut self, pair: &AttributePair, hash: u64, capacity: usize) -> Option<u32> {
        let candidates = self.by_content.entry(hash).or_default();
        for &offset in candidates.iter() {
            if &self.pairs[offset as usize] == pair {
                return Some(offset);
            }
        }
        if self.pairs.len() >= capacity {
            return None;
        }
        let offset = self.pairs.len() as u32;
        candidates.push(offset);
        self.pairs.push(pair.clone());
        Some(offset)
    }
}

pub struct AttributePairStore {
    shards: Vec<Mutex<PairShard>>,
}

impl AttributePairStore {
    pub fn new() -> AttributePairStore {
        AttributePairStore {
            shards: (0..PAIR_SHARDS).map(|_| Mutex::new(PairShard::new())).collect(),
        }
    }

    /// Interns `pair`, returning its stable index. `hot` is the
    /// eligibility hint computed from the pair and its key string.
    pub fn add_pair(&self, pair: AttributePair, hot: bool) -> AttributePairIndex {
        let hash = content_hash(&pair);

        if hot {
            let mut shard = self.shards[0].lock().unwrap();
            if let Some(offset) = shard.find_or_insert(&pair, hash, HOT_SHARD_CAPACITY) {
                return offset;
            }
            // Hot shard full: fall through to the cold shards.
        }

        // Deterministic cold shard in 1..PAIR_SHARDS.
        let shard_index = (hash as usize % (PAIR_SHARDS - 1)) + 1;
        let mut shard = self.shards[shard_index].lock().unwrap();
        let offset = shard
            .find_or_insert(&pair, hash, SHARD_CAPACITY)
            .expect("cold attribute pair shard overflow");
        ((shard_index as u32) << (32 - SHARD_BITS)) | offset
    }

    /// Returns a copy of the pair interned at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` was never returned by [`add_pair`](Self::add_pair).
    pub fn get_pair(&self, index: AttributePairIndex) -> AttributePair {
        let shard_index = (index >> (32 - SHARD_BITS)) as usize;
        let offset = (index & ((1 << (32 - SHARD_BITS)) - 1)) as usize;
        let shard = self.shards[shard_index].lock().unwrap();
        shard.pairs[offset].clone()
    }

    /// Whether `index` refers to the hot shard.
    pub fn is_hot_index(index: AttributePairIndex) -> bool {
        index >> (32 - SHARD_BITS) == 0
    }

    /// Total interned pairs across all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().unwrap().pairs.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AttributePairStore {
    fn default() -> AttributePairStore {
        AttributePairStore::new()
    }
}

/// Deterministic content hash over the canonical fields; drives both the
/// in-shard lookup and the cold-shard choice, so it must not vary between
/// runs.
fn content_hash(pair: &AttributePair) -> u64 {
    let mut h = Xxh3::new();
    h.update(&pair.minzoom.to_le_bytes());
    h.update(&pair.key_index.to_le_bytes());
    h.update(&[pair.value.type_tag()]);
    match &pair.value {
        AttributeValue::Bool(b) => h.update(&[*b as u8]),
        AttributeValue::Float(f) => h.update(&f.to_bits().to_le_bytes()),
        AttributeValue::String(s) => h.update(s.as_bytes()),
    }
    h.digest()
}
