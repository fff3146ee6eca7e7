//! Attribute interning.
//!
//! Every attribute an object carries into a tile is broken into three
//! interned levels: keys (a 16-bit dense dictionary), `(key, value,
//! minzoom)` pairs (a sharded 32-bit dictionary with a "hot" shard for
//! pairs likely to recur), and sets of pairs (one 32-bit id per distinct
//! attribute combination). The same logical attribute set is stored once
//! no matter how many objects share it.

pub mod key_store;
pub mod pair_store;
pub mod set_store;

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use smallvec::SmallVec;
use tileforge_common::Result;

pub use key_store::AttributeKeyStore;
pub use pair_store::{AttributePairStore, HOT_SHARD_CAPACITY, PAIR_SHARDS, SHARD_BITS};
pub use set_store::AttributeSetStore;

/// Dense key index; 0 is the "missing" sentinel and never assigned.
pub type AttributeKeyIndex = u16;

/// Pair index: the top [`SHARD_BITS`] bits select the shard, the rest are
/// the offset within it. Shard 0 offsets also fit in 16 bits.
pub type AttributePairIndex = u32;

/// Index of an interned attribute set; 0 is the empty set.
pub type AttributeSetIndex = u32;

/// A tag value in one of the three vector-tile value variants.
#[derive(Debug, Clone)]
pub enum AttributeValue {
    Bool(bool),
    Float(f32),
    String(String),
}

impl AttributeValue {
    /// Variant ordering tag: bool < float < string.
    pub fn type_tag(&self) -> u8 {
        match self {
            AttributeValue::Bool(_) => 0,
            AttributeValue::Float(_) => 1,
            AttributeValue::String(_) => 2,
        }
    }

    fn cmp_same_variant(&self, other: &AttributeValue) -> Ordering {
        match (self, other) {
            (AttributeValue::Bool(a), AttributeValue::Bool(b)) => a.cmp(b),
            (AttributeValue::Float(a), AttributeValue::Float(b)) => a.total_cmp(b),
            (AttributeValue::String(a), AttributeValue::String(b)) => a.cmp(b),
            _ => unreachable!("compared across variants"),
        }
    }
}

impl PartialEq for AttributeValue {
    fn eq(&self, other: &AttributeValue) -> bool {
        match (self, other) {
            (AttributeValue::Bool(a), AttributeValue::Bool(b)) => a == b,
            (AttributeValue::Float(a), AttributeValue::Float(b)) => a.to_bits() == b.to_bits(),
            (AttributeValue::String(a), AttributeValue::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for AttributeValue {}

impl Hash for AttributeValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_tag().hash(state);
        match self {
            AttributeValue::Bool(b) => b.hash(state),
            AttributeValue::Float(f) => f.to_bits().hash(state),
            AttributeValue::String(s) => s.hash(state),
        }
    }
}

/// An interned `(key, value, minzoom)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributePair {
    pub key_index: AttributeKeyIndex,
    pub value: AttributeValue,
    pub minzoom: u8,
}

impl AttributePair {
    pub fn new(key_index: AttributeKeyIndex, value: AttributeValue, minzoom: u8) -> AttributePair {
        AttributePair {
            key_index,
            value,
            minzoom,
        }
    }

    /// Canonical ordering over `(minzoom, key, variant, value)`.
    pub fn canonical_cmp(&self, other: &AttributePair) -> Ordering {
        self.minzoom
            .cmp(&other.minzoom)
            .then(self.key_index.cmp(&other.key_index))
            .then(self.value.type_tag().cmp(&other.value.type_tag()))
            .then_with(|| self.value.cmp_same_variant(&other.value))
    }

    /// Whether this pair belongs in the hot shard.
    ///
    /// Hot pairs are the ones likely to recur across many objects:
    /// booleans, single-digit integers, and identifier-like lowercase
    /// strings, except under `name`-ish keys which are almost always
    /// unique. This is an eligibility hint; the pair is committed to the
    /// hot shard before its popularity is known.
    pub fn is_hot(&self, key: &str) -> bool {
        match &self.value {
            AttributeValue::Bool(_) => true,
            AttributeValue::Float(f) => {
                let f = *f;
                f >= 0.0 && f <= 9.0 && f.fract() == 0.0
            }
            AttributeValue::String(s) => {
                if !s.bytes().all(|c| c == b'-' || c == b'_' || c.is_ascii_lowercase()) {
                    return false;
                }
                !(key.len() >= 4 && key.starts_with("name"))
            }
        }
    }
}

/// The complete attributes of one output object: a set of interned pair
/// ids, canonicalized to ascending order before interning so that equal
/// sets hash and compare equal regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AttributeSet {
    values: SmallVec<[AttributePairIndex; 8]>,
}

impl AttributeSet {
    pub fn new() -> AttributeSet {
        AttributeSet::default()
    }

    pub fn add(&mut self, pair_index: AttributePairIndex) {
        self.values.push(pair_index);
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Sorts the pair ids into canonical ascending order and drops exact
    /// duplicates.
    pub fn finalize(&mut self) {
        self.values.sort_unstable();
        self.values.dedup();
    }

    pub fn pair_indexes(&self) -> &[AttributePairIndex] {
        &self.values
    }
}

/// The attribute dictionaries of one conversion run, grouped into a single
/// context constructed at run start and passed by reference.
pub struct Attributes {
    pub keys: AttributeKeyStore,
    pub pairs: AttributePairStore,
    pub sets: AttributeSetStore,
}

impl Attributes {
    pub fn new() -> Attributes {
        Attributes {
            keys: AttributeKeyStore::new(),
            pairs: AttributePairStore::new(),
            sets: AttributeSetStore::new(),
        }
    }

    /// Interns one attribute and records it in `set`.
    pub fn add_attribute(
        &self,
        set: &mut AttributeSet,
        key: &str,
        value: AttributeValue,
        minzoom: u8,
    ) -> Result<()> {
        let key_index = self.keys.key_to_index(key)?;
        let pair = AttributePair::new(key_index, value, minzoom);
        let hot = pair.is_hot(key);
        set.add(self.pairs.add_pair(pair, hot));
        Ok(())
    }

    /// Interns a finished set, returning its id (0 for the empty set).
    pub fn add_set(&self, set: AttributeSet) -> AttributeSetIndex {
        self.sets.add(set)
    }

    /// Materializes the pairs of a set, in canonical pair order.
    pub fn get_set(&self, index: AttributeSetIndex) -> Vec<AttributePair> {
        let mut pairs: Vec<AttributePair> = self
            .sets
            .get(index)
            .pair_indexes()
            .iter()
            .map(|&i| self.pairs.get_pair(i))
            .collect();
        pairs.sort_by(|a, b| a.canonical_cmp(b));
        pairs
    }

    /// Resolves a pair's key back to its string.
    pub fn key_of(&self, pair: &AttributePair) -> std::sync::Arc<str> {
        self.keys.get_key(pair.key_index)
    }
}

impl Default for Attributes {
    fn default() -> Attributes {
        Attributes::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hotness_rules() {
        let b = AttributePair::new(1, AttributeValue::Bool(true), 0);
        assert!(b.is_hot("tunnel"));

        let small = AttributePair::new(1, AttributeValue::Float(3.0), 0);
        assert!(small.is_hot("layer"));
        let negative = AttributePair::new(1, AttributeValue::Float(-1.0), 0);
        assert!(!negative.is_hot("layer"));
        let fractional = AttributePair::new(1, AttributeValue::Float(2.5), 0);
        assert!(!fractional.is_hot("layer"));
        let large = AttributePair::new(1, AttributeValue::Float(10.0), 0);
        assert!(!large.is_hot("layer"));

        let idish = AttributePair::new(1, AttributeValue::String("motorway_link".into()), 0);
        assert!(idish.is_hot("highway"));
        let name = AttributePair::new(2, AttributeValue::String("mainstreet".into()), 0);
        assert!(!name.is_hot("name"));
        assert!(!name.is_hot("name:en"));
        let mixed_case = AttributePair::new(1, AttributeValue::String("Main".into()), 0);
        assert!(!mixed_case.is_hot("highway"));
    }

    #[test]
    fn test_canonical_order() {
        let a = AttributePair::new(1, AttributeValue::Bool(true), 0);
        let b = AttributePair::new(1, AttributeValue::Float(0.0), 0);
        let c = AttributePair::new(1, AttributeValue::String(String::new()), 0);
        assert_eq!(a.canonical_cmp(&b), Ordering::Less);
        assert_eq!(b.canonical_cmp(&c), Ordering::Less);

        // minzoom dominates the key.
        let low = AttributePair::new(9, AttributeValue::Bool(true), 0);
        let high = AttributePair::new(1, AttributeValue::Bool(true), 12);
        assert_eq!(low.canonical_cmp(&high), Ordering::Less);
    }

    #[test]
    fn test_set_canonicalization() {
        let mut a = AttributeSet::new();
        a.add(7);
        a.add(3);
        a.add(7);
        a.finalize();
        let mut b = AttributeSet::new();
        b.add(3);
        b.add(7);
        b.finalize();
        assert_eq!(a, b);
        assert_eq!(a.pair_indexes(), &[3, 7]);
    }
}
