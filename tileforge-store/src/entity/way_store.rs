//! Way stores.
//!
//! Two storage shapes exist behind the [`WayStore`] trait: the
//! materialized store keeps resolved positions per way (the default), and
//! the node-ref store keeps raw node-id lists resolved against the node
//! store on every read, trading CPU for memory. A sharded wrapper splits
//! either by id for low-memory multi-pass reads.

use std::sync::{Arc, RwLock};

use tileforge_common::{Error, OsmEntity, Result};
use tileforge_geometry::LatpLon;
use tileforge_workflow::PhasePool;
use tracing::debug;

use super::{NodeStore, WayStore, sort_by_id};
use crate::ids::{NodeId, WayId};

/// Way store holding resolved positions.
pub struct LatpLonWayStore {
    data: RwLock<Vec<(WayId, Vec<LatpLon>)>>,
}

impl LatpLonWayStore {
    pub fn new() -> LatpLonWayStore {
        LatpLonWayStore {
            data: RwLock::new(Vec::new()),
        }
    }
}

impl Default for LatpLonWayStore {
    fn default() -> LatpLonWayStore {
        LatpLonWayStore::new()
    }
}

impl WayStore for LatpLonWayStore {
    fn requires_nodes(&self) -> bool {
        false
    }

    fn insert_latplons(&self, mut batch: Vec<(WayId, Vec<LatpLon>)>) {
        self.data.write().unwrap().append(&mut batch);
    }

    fn insert_node_refs(&self, _batch: Vec<(WayId, Vec<NodeId>)>) {
        unreachable!("materialized way store takes positions, not node refs");
    }

    fn at(&self, id: WayId) -> Result<Vec<LatpLon>> {
        let data = self.data.read().unwrap();
        match data.binary_search_by_key(&id, |e| e.0) {
            Ok(i) => Ok(data[i].1.clone()),
            Err(_) => Err(Error::missing_entity(OsmEntity::Way, id)),
        }
    }

    fn contains(&self, shard: usize, id: WayId) -> bool {
        debug_assert_eq!(shard, 0);
        let data = self.data.read().unwrap();
        data.binary_search_by_key(&id, |e| e.0).is_ok()
    }

    fn finalize(&self, pool: &PhasePool) {
        let mut data = self.data.write().unwrap();
        let mut sorted = sort_by_id(std::mem::take(&mut *data), pool, |e| e.0);
        sorted.dedup_by(|a, b| a.0 == b.0);
        *data = sorted;
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

/// Way store holding node-id lists, resolved lazily through the node
/// store. Missing nodes follow the integrity policy: enforced, the read
/// fails naming the way; relaxed, the node is dropped from the line.
pub struct NodeRefWayStore {
    nodes: Arc<dyn NodeStore>,
    enforce_integrity: bool,
    data: RwLock<Vec<(WayId, Vec<NodeId>)>>,
}

impl NodeRefWayStore {
    pub fn new(nodes: Arc<dyn NodeStore>, enforce_integrity: bool) -> NodeRefWayStore {
        NodeRefWayStore {
            nodes,
            enforce_integrity,
            data: RwLock::new(Vec::new()),
        }
    }
}

impl WayStore for NodeRefWayStore {
    fn requires_nodes(&self) -> bool {
        true
    }

    fn insert_latplons(&self, _batch: Vec<(WayId, Vec<LatpLon>)>) {
        unreachable!("node-ref way store takes node refs, not positions");
    }

    fn insert_node_refs(&self, mut batch: Vec<(WayId, Vec<NodeId>)>) {
        self.data.write().unwrap().append(&mut batch);
    }

    fn at(&self, id: WayId) -> Result<Vec<LatpLon>> {
        let node_ids = {
            let data = self.data.read().unwrap();
            match data.binary_search_by_key(&id, |e| e.0) {
                Ok(i) => data[i].1.clone(),
                Err(_) => return Err(Error::missing_entity(OsmEntity::Way, id)),
            }
        };
        let mut out = Vec::with_capacity(node_ids.len());
        for node_id in node_ids {
            match self.nodes.at(node_id) {
                Ok(ll) => out.push(ll),
                Err(e) if e.is_missing_entity() => {
                    if self.enforce_integrity {
                        return Err(Error::missing_reference(
                            OsmEntity::Node,
                            node_id,
                            OsmEntity::Way,
                            id,
                        ));
                    }
                    debug!(way = id, node = node_id, "dropping missing node reference");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    fn contains(&self, shard: usize, id: WayId) -> bool {
        debug_assert_eq!(shard, 0);
        let data = self.data.read().unwrap();
        data.binary_search_by_key(&id, |e| e.0).is_ok()
    }

    fn finalize(&self, pool: &PhasePool) {
        let mut data = self.data.write().unwrap();
        let mut sorted = sort_by_id(std::mem::take(&mut *data), pool, |e| e.0);
        sorted.dedup_by(|a, b| a.0 == b.0);
        *data = sorted;
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

/// Sharded wrapper over materialized way stores; id-to-shard assignment by
/// modulo, mirroring the sharded node store.
pub struct ShardedWayStore {
    shards: Vec<LatpLonWayStore>,
}

impl ShardedWayStore {
    pub fn new(shard_count: usize) -> ShardedWayStore {
        assert!(shard_count > 0);
        ShardedWayStore {
            shards: (0..shard_count).map(|_| LatpLonWayStore::new()).collect(),
        }
    }

    fn shard_of(&self, id: WayId) -> usize {
        (id % self.shards.len() as u64) as usize
    }
}

impl WayStore for ShardedWayStore {
    fn requires_nodes(&self) -> bool {
        false
    }

    fn insert_latplons(&self, batch: Vec<(WayId, Vec<LatpLon>)>) {
        let mut per_shard: Vec<Vec<(WayId, Vec<LatpLon>)>> =
            (0..self.shards.len()).map(|_| Vec::new()).collect();
        for entry in batch {
            per_shard[self.shard_of(entry.0)].push(entry);
        }
        for (shard, batch) in self.shards.iter().zip(per_shard) {
            if !batch.is_empty() {
                shard.insert_latplons(batch);
            }
        }
    }

    fn insert_node_refs(&self, _batch: Vec<(WayId, Vec<NodeId>)>) {
        unreachable!("sharded way store takes positions, not node refs");
    }

    fn at(&self, id: WayId) -> Result<Vec<LatpLon>> {
        self.shards[self.shard_of(id)].at(id)
    }

    fn contains(&self, shard: usize, id: WayId) -> bool {
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
    use crate::entity::node_store::BinarySearchNodeStore;

    fn pool() -> PhasePool {
        PhasePool::new(2)
    }

    fn ll(lat: f64, lon: f64) -> LatpLon {
        LatpLon::from_degrees(lat, lon)
    }

    #[test]
    fn test_materialized_store() {
        let store = LatpLonWayStore::new();
        store.insert_latplons(vec![(7, vec![ll(0.0, 0.0), ll(0.0, 1.0)])]);
        store.finalize(&pool());
        assert_eq!(store.at(7).unwrap().len(), 2);
        assert!(store.at(8).unwrap_err().is_missing_entity());
        assert!(!store.requires_nodes());
    }

    #[test]
    fn test_node_ref_store_resolves() {
        let nodes = Arc::new(BinarySearchNodeStore::new());
        nodes.insert(vec![(1, ll(0.0, 0.0)), (2, ll(0.0, 1.0))]);
        nodes.finalize(&pool());
        let store = NodeRefWayStore::new(nodes, true);
        assert!(store.requires_nodes());
        store.insert_node_refs(vec![(7, vec![1, 2])]);
        store.finalize(&pool());
        let lls = store.at(7).unwrap();
        assert_eq!(lls, vec![ll(0.0, 0.0), ll(0.0, 1.0)]);
    }

    #[test]
    fn test_node_ref_store_integrity_policy() {
        let nodes = Arc::new(BinarySearchNodeStore::new());
        nodes.insert(vec![(1, ll(0.0, 0.0))]);
        nodes.finalize(&pool());

        let strict = NodeRefWayStore::new(nodes.clone(), true);
        strict.insert_node_refs(vec![(7, vec![1, 99])]);
        strict.finalize(&pool());
        let err = strict.at(7).unwrap_err();
        assert_eq!(
            err.to_string(),
            "node 99 is not present in its store (referenced by way 7)"
        );

        let relaxed = NodeRefWayStore::new(nodes, false);
        relaxed.insert_node_refs(vec![(7, vec![1, 99])]);
        relaxed.finalize(&pool());
        assert_eq!(relaxed.at(7).unwrap(), vec![ll(0.0, 0.0)]);
    }

    #[test]
    fn test_sharded_store() {
        let store = ShardedWayStore::new(3);
        for id in 0..30u64 {
            store.insert_latplons(vec![(id, vec![ll(0.0, 0.0), ll(0.0, 1.0)])]);
        }
        store.finalize(&pool());
        assert_eq!(store.len(), 30);
        for id in 0..30u64 {
            assert!(store.at(id).is_ok());
            let owning: Vec<usize> = (0..3).filter(|&s| store.contains(s, id)).collect();
            assert_eq!(owning, vec![(id % 3) as usize]);
        }
    }
}
