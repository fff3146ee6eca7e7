//! Node stores: flat binary-search and sharded variants.

use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use tileforge_common::{Error, OsmEntity, Result};
use tileforge_geometry::LatpLon;
use tileforge_workflow::PhasePool;

use super::{NodeStore, sort_by_id};
use crate::ids::NodeId;

/// In-memory node store: inserts append under a write lock, `finalize`
/// sorts by id, and reads are binary searches under an uncontended read
/// lock.
pub struct BinarySearchNodeStore {
    data: RwLock<Vec<(NodeId, LatpLon)>>,
    finalized: AtomicBool,
}

impl BinarySearchNodeStore {
    pub fn new() -> BinarySearchNodeStore {
        BinarySearchNodeStore {
            data: RwLock::new(Vec::new()),
            finalized: AtomicBool::new(false),
        }
    }
}

impl Default for BinarySearchNodeStore {
    fn default() -> BinarySearchNodeStore {
        BinarySearchNodeStore::new()
    }
}

impl NodeStore for BinarySearchNodeStore {
    fn insert(&self, mut batch: Vec<(NodeId, LatpLon)>) {
        self.data.write().unwrap().append(&mut batch);
    }

    fn at(&self, id: NodeId) -> Result<LatpLon> {
        debug_assert!(self.finalized.load(Ordering::Acquire), "read before finalize");
        let data = self.data.read().unwrap();
        match data.binary_search_by_key(&id, |e| e.0) {
            Ok(i) => Ok(data[i].1),
            Err(_) => Err(Error::missing_entity(OsmEntity::Node, id)),
        }
    }

    fn contains(&self, shard: usize, id: NodeId) -> bool {
        debug_assert_eq!(shard, 0);
        let data = self.data.read().unwrap();
        data.binary_search_by_key(&id, |e| e.0).is_ok()
    }

    fn finalize(&self, pool: &PhasePool) {
        let mut data = self.data.write().unwrap();
        let mut sorted = sort_by_id(std::mem::take(&mut *data), pool, |e| e.0);
        sorted.dedup_by_key(|e| e.0);
        *data = sorted;
        self.finalized.store(true, Ordering::Release);
    }

    fn shard_count(&self) -> usize {
        1
    }

    fn shard_len(&self, shard: usize) -> usize {
        debug_assert_eq!(shard, 0);
        self.len()
    }

    fn len(&self) -> usize {
        self.data.read().unwrap().len()
    }
}

/// Sharded node store for low-memory multi-pass reads: ids are assigned to
/// shards by modulo, and the driver repeats the way/relation phases once
/// per shard, skipping work whose first reference lives elsewhere.
pub struct ShardedNodeStore {
    shards: Vec<BinarySearchNodeStore>,
}

impl ShardedNodeStore {
    pub fn new(shard_count: usize) -> ShardedNodeStore {
        assert!(shard_count > 0);
        ShardedNodeStore {
            shards: (0..shard_count).map(|_| BinarySearchNodeStore::new()).collect(),
        }
    }

    fn shard_of(&self, id: NodeId) -> usize {
        (id % self.shards.len() as u64) as usize
    }
}

impl NodeStore for ShardedNodeStore {
    fn insert(&self, batch: Vec<(NodeId, LatpLon)>) {
        let mut per_shard: Vec<Vec<(NodeId, LatpLon)>> =
            (0..self.shards.len()).map(|_| Vec::new()).collect();
        for entry in batch {
            per_shard[self.shard_of(entry.0)].push(entry);
        }
        for (shard, batch) in self.shards.iter().zip(per_shard) {
            if !batch.is_empty() {
                shard.insert(batch);
            }
        }
    }

    fn at(&self, id: NodeId) -> Result<LatpLon> {
        self.shards[self.shard_of(id)].at(id)
    }

    fn contains(&self, shard: usize, id: NodeId) -> bool {
        self.shard_of(id) == shard && self.shards[shard].contains(0, id)
    }

    fn finalize(&self, pool: &PhasePool) {
        for shard in &self.shards {
            shard.finalize(pool);
        }
    }

    fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard_len(&self, shard: usize) -> usize {
        self.shards[shard].len()
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> PhasePool {
        PhasePool::new(2)
    }

    #[test]
    fn test_insert_finalize_lookup() {
        let store = BinarySearchNodeStore::new();
        store.insert(vec![
            (30, LatpLon::from_degrees(3.0, 3.0)),
            (10, LatpLon::from_degrees(1.0, 1.0)),
        ]);
        store.insert(vec![(20, LatpLon::from_degrees(2.0, 2.0))]);
        store.finalize(&pool());
        assert_eq!(store.len(), 3);
        assert_eq!(store.at(10).unwrap(), LatpLon::from_degrees(1.0, 1.0));
        assert_eq!(store.at(30).unwrap(), LatpLon::from_degrees(3.0, 3.0));
        let err = store.at(40).unwrap_err();
        assert_eq!(err.to_string(), "node 40 is not present in its store");
    }

    #[test]
    fn test_duplicate_ids_collapse() {
        let store = BinarySearchNodeStore::new();
        store.insert(vec![
            (5, LatpLon::from_degrees(1.0, 1.0)),
            (5, LatpLon::from_degrees(1.0, 1.0)),
        ]);
        store.finalize(&pool());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_sharded_placement() {
        let store = ShardedNodeStore::new(4);
        let batch: Vec<_> = (0..100u64)
            .map(|i| (i, LatpLon::from_degrees(0.0, i as f64 * 0.001)))
            .collect();
        store.insert(batch);
        store.finalize(&pool());
        assert_eq!(store.len(), 100);
        assert_eq!(store.shard_len(0) + store.shard_len(1) + store.shard_len(2) + store.shard_len(3), 100);
        // Every id is found globally, and in exactly one shard.
        for id in 0..100u64 {
            assert!(store.at(id).is_ok());
            let owning: Vec<usize> = (0..4).filter(|&s| store.contains(s, id)).collect();
            assert_eq!(owning.len(), 1);
        }
    }
}
