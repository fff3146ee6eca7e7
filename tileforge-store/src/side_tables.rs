//! Side tables populated during the relation-scan pre-pass.
//!
//! `UsedWays` marks which ways any relation references, so the ways phase
//! knows what to keep even when the profile does not emit them.
//! `RelationScanStore` records, for scan-accepted relations, the reverse
//! `way -> [relation]` index and the relations' owned tag maps; both are
//! written only during the scan and read immutably by later phases.

use std::collections::BTreeMap;
use std::sync::{
    Mutex, RwLock,
    atomic::{AtomicBool, Ordering},
};

use ahash::AHashMap;
use tileforge_collections::SpillBitSet;
use tracing::debug;

use crate::ids::{RelationId, WayId};

/// Default dense capacity when no node count is known.
const DEFAULT_USED_WAYS_CAPACITY: usize = 1 << 24;
/// Upper bound on the dense bitset (256 MiB of bits).
const MAX_USED_WAYS_CAPACITY: usize = 1 << 31;

/// Membership set of ways referenced by relations.
///
/// The dense capacity is sized once from an estimate of the largest way
/// id; out-of-range ids spill into a hash set instead of growing the
/// bitset, so an unexpected id costs an insert, never a resize.
pub struct UsedWays {
    bits: Mutex<Option<SpillBitSet>>,
    inited: AtomicBool,
}

impl UsedWays {
    pub fn new() -> UsedWays {
        UsedWays {
            bits: Mutex::new(None),
            inited: AtomicBool::new(false),
        }
    }

    /// Sizes the set from the observed node count. With compact
    /// (renumbered) inputs the way count is roughly one eighth of the
    /// node count; otherwise way ids range up to the global maximum, so a
    /// generous multiple is reserved. A no-op after the first call.
    pub fn reserve(&self, compact: bool, node_count: usize) {
        let mut bits = self.bits.lock().unwrap();
        if bits.is_some() {
            return;
        }
        let capacity = if compact {
            (node_count / 8).max(1 << 16)
        } else {
            (node_count.saturating_mul(8))
                .clamp(DEFAULT_USED_WAYS_CAPACITY, MAX_USED_WAYS_CAPACITY)
        };
        debug!(capacity, compact, "sizing used-ways table");
        *bits = Some(SpillBitSet::new(capacity));
        self.inited.store(true, Ordering::Release);
    }

    pub fn is_inited(&self) -> bool {
        self.inited.load(Ordering::Acquire)
    }

    /// Marks a way as used by some relation.
    pub fn insert(&self, id: WayId) {
        let mut bits = self.bits.lock().unwrap();
        bits.get_or_insert_with(|| SpillBitSet::new(DEFAULT_USED_WAYS_CAPACITY))
            .insert(id);
    }

    pub fn contains(&self, id: WayId) -> bool {
        let bits = self.bits.lock().unwrap();
        bits.as_ref().is_some_and(|b| b.contains(id))
    }

    pub fn clear(&self) {
        if let Some(bits) = self.bits.lock().unwrap().as_ref() {
            bits.clear();
        }
    }
}

impl Default for UsedWays {
    fn default() -> UsedWays {
        UsedWays::new()
    }
}

struct ScanState {
    /// `(way, relation)` pairs, sorted by way id at finalize for binary
    /// search lookup.
    backlinks: Vec<(WayId, RelationId)>,
    sorted: bool,
    tags: AHashMap<RelationId, BTreeMap<String, String>>,
}

/// Records from the relation-scan phase: which relations contain which
/// ways, and the accepted relations' tags.
pub struct RelationScanStore {
    state: RwLock<ScanState>,
}

impl RelationScanStore {
    pub fn new() -> RelationScanStore {
        RelationScanStore {
            state: RwLock::new(ScanState {
                backlinks: Vec::new(),
                sorted: false,
                tags: AHashMap::new(),
            }),
        }
    }

    pub fn add_backlink(&self, relation: RelationId, way: WayId) {
        let mut state = self.state.write().unwrap();
        debug_assert!(!state.sorted, "backlink added after finalize");
        state.backlinks.push((way, relation));
    }

    pub fn store_tags(&self, relation: RelationId, tags: BTreeMap<String, String>) {
        self.state.write().unwrap().tags.insert(relation, tags);
    }

    /// Sorts the backlinks for lookup. Must run after the scan phase and
    /// before any read.
    pub fn finalize(&self) {
        let mut state = self.state.write().unwrap();
        state.backlinks.sort_unstable();
        state.backlinks.dedup();
        state.sorted = true;
    }

    pub fn way_in_any_relations(&self, way: WayId) -> bool {
        let state = self.state.read().unwrap();
        debug_assert!(state.sorted, "read before finalize");
        state
            .backlinks
            .binary_search_by_key(&way, |e| e.0)
            .is_ok()
    }

    /// All relations containing `way`, in ascending relation-id order.
    pub fn relations_for_way(&self, way: WayId) -> Vec<RelationId> {
        let state = self.state.read().unwrap();
        debug_assert!(state.sorted, "read before finalize");
        let start = state.backlinks.partition_point(|e| e.0 < way);
        state.backlinks[start..]
            .iter()
            .take_while(|e| e.0 == way)
            .map(|e| e.1)
            .collect()
    }

    /// The value of `key` on a scan-accepted relation, if present.
    pub fn get_tag(&self, relation: RelationId, key: &str) -> Option<String> {
        let state = self.state.read().unwrap();
        state.tags.get(&relation).and_then(|t| t.get(key)).cloned()
    }

    pub fn clear(&self) {
        let mut state = self.state.write().unwrap();
        state.backlinks.clear();
        state.tags.clear();
        state.sorted = false;
    }
}

impl Default for RelationScanStore {
    fn default() -> RelationScanStore {
        RelationScanStore::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_used_ways_reserve_once() {
        let used = UsedWays::new();
        assert!(!used.is_inited());
        used.reserve(true, 1 << 20);
        assert!(used.is_inited());
        used.insert(100);
        used.insert(u64::MAX >> 20); // far past the dense range
        assert!(used.contains(100));
        assert!(used.contains(u64::MAX >> 20));
        assert!(!used.contains(101));
        // A second reserve is a no-op.
        used.reserve(false, 1);
        assert!(used.contains(100));
    }

    #[test]
    fn test_backlinks() {
        let store = RelationScanStore::new();
        store.add_backlink(10, 5);
        store.add_backlink(11, 5);
        store.add_backlink(10, 6);
        store.finalize();
        assert!(store.way_in_any_relations(5));
        assert!(store.way_in_any_relations(6));
        assert!(!store.way_in_any_relations(7));
        assert_eq!(store.relations_for_way(5), vec![10, 11]);
        assert_eq!(store.relations_for_way(6), vec![10]);
        assert!(store.relations_for_way(7).is_empty());
    }

    #[test]
    fn test_relation_tags() {
        let store = RelationScanStore::new();
        let mut tags = BTreeMap::new();
        tags.insert("natural".to_string(), "water".to_string());
        store.store_tags(10, tags);
        assert_eq!(store.get_tag(10, "natural").as_deref(), Some("water"));
        assert_eq!(store.get_tag(10, "name"), None);
        assert_eq!(store.get_tag(11, "natural"), None);
    }
}
