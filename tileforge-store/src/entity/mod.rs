//! The OSM entity stores and their composing facade.
//!
//! Each store is insert-only during its read phase, then frozen by
//! `finalize` (a sort by id) after which lookups are binary searches with
//! no writer contention. The concrete stores here are the in-memory
//! binary-search variants; sharded wrappers split the id space so the
//! driver can run multiple low-memory passes.

pub mod node_store;
pub mod relation_store;
pub mod way_store;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use geo_types::{Coord, LineString, MultiLineString, MultiPolygon, Polygon};
use tileforge_common::{Error, OsmEntity, Result};
use tileforge_geometry::LatpLon;
use tileforge_workflow::PhasePool;
use tracing::debug;

use crate::ids::{NodeId, RelationId, WayId};
use crate::side_tables::{RelationScanStore, UsedWays};

pub use node_store::{BinarySearchNodeStore, ShardedNodeStore};
pub use relation_store::BinarySearchRelationStore;
pub use way_store::{LatpLonWayStore, NodeRefWayStore, ShardedWayStore};

/// Store of node positions keyed by OSM id.
pub trait NodeStore: Send + Sync {
    /// Batched insertion; thread-safe.
    fn insert(&self, batch: Vec<(NodeId, LatpLon)>);
    /// Position of `id`; `MissingEntity` when absent.
    fn at(&self, id: NodeId) -> Result<LatpLon>;
    /// Whether `id` belongs to `shard` and is present.
    fn contains(&self, shard: usize, id: NodeId) -> bool;
    /// Sorts by id; must run before any read phase.
    fn finalize(&self, pool: &PhasePool);
    fn shard_count(&self) -> usize;
    fn shard_len(&self, shard: usize) -> usize;
    fn len(&self) -> usize;
}

/// Store of way geometry keyed by OSM id.
///
/// A way store either keeps resolved positions (`requires_nodes` false) or
/// the raw node-id list, resolved against the node store on every read
/// (`requires_nodes` true, the low-memory mode).
pub trait WayStore: Send + Sync {
    fn requires_nodes(&self) -> bool;
    fn insert_latplons(&self, batch: Vec<(WayId, Vec<LatpLon>)>);
    fn insert_node_refs(&self, batch: Vec<(WayId, Vec<NodeId>)>);
    fn at(&self, id: WayId) -> Result<Vec<LatpLon>>;
    fn contains(&self, shard: usize, id: WayId) -> bool;
    fn finalize(&self, pool: &PhasePool);
    fn shard_count(&self) -> usize;
    fn shard_len(&self, shard: usize) -> usize;
    fn len(&self) -> usize;
}

/// The outer and inner way memberships of one relation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationData {
    pub outers: Vec<WayId>,
    pub inners: Vec<WayId>,
}

/// Store of relation memberships keyed by OSM id.
pub trait RelationStore: Send + Sync {
    fn insert(&self, batch: Vec<(RelationId, RelationData)>);
    fn at(&self, id: RelationId) -> Result<RelationData>;
    fn finalize(&self, pool: &PhasePool);
    fn len(&self) -> usize;
}

/// Composition of the three entity stores plus the relation-scan side
/// tables, with the shared reference-resolution policy.
pub struct OsmStore {
    pub nodes: Arc<dyn NodeStore>,
    pub ways: Arc<dyn WayStore>,
    pub relations: Arc<dyn RelationStore>,
    used_ways: UsedWays,
    scanned_relations: RelationScanStore,
    enforce_integrity: bool,
}

impl OsmStore {
    pub fn new(
        nodes: Arc<dyn NodeStore>,
        ways: Arc<dyn WayStore>,
        relations: Arc<dyn RelationStore>,
    ) -> OsmStore {
        OsmStore {
            nodes,
            ways,
            relations,
            used_ways: UsedWays::new(),
            scanned_relations: RelationScanStore::new(),
            enforce_integrity: true,
        }
    }

    /// When false, missing node/way references are dropped silently
    /// instead of failing the run.
    pub fn enforce_integrity(&mut self, enforce: bool) {
        self.enforce_integrity = enforce;
    }

    pub fn integrity_enforced(&self) -> bool {
        self.enforce_integrity
    }

    /// Sizes the used-ways table from the observed node count; a no-op
    /// after the first call.
    pub fn ensure_used_ways_inited(&self, compact: bool, node_count: usize) {
        self.used_ways.reserve(compact, node_count);
    }

    pub fn mark_way_used(&self, id: WayId) {
        self.used_ways.insert(id);
    }

    pub fn way_is_used(&self, id: WayId) -> bool {
        self.used_ways.contains(id)
    }

    pub fn relation_contains_way(&self, relation: RelationId, way: WayId) {
        self.scanned_relations.add_backlink(relation, way);
    }

    pub fn store_relation_tags(&self, relation: RelationId, tags: BTreeMap<String, String>) {
        self.scanned_relations.store_tags(relation, tags);
    }

    /// Freezes the relation-scan side tables for lock-free reads.
    pub fn finalize_relation_scan(&self) {
        self.scanned_relations.finalize();
    }

    pub fn way_in_any_relations(&self, way: WayId) -> bool {
        self.scanned_relations.way_in_any_relations(way)
    }

    pub fn relations_for_way(&self, way: WayId) -> Vec<RelationId> {
        self.scanned_relations.relations_for_way(way)
    }

    pub fn get_relation_tag(&self, relation: RelationId, key: &str) -> Option<String> {
        self.scanned_relations.get_tag(relation, key)
    }

    /// Resolves a node list to positions, applying the integrity policy.
    /// The fatal error names the way holding the dangling reference.
    pub fn resolve_nodes(&self, node_ids: &[NodeId], way: WayId) -> Result<Vec<LatpLon>> {
        let mut out = Vec::with_capacity(node_ids.len());
        for &node_id in node_ids {
            match self.nodes.at(node_id) {
                Ok(ll) => out.push(ll),
                Err(e) if e.is_missing_entity() => {
                    if self.enforce_integrity {
                        return Err(Error::missing_reference(
                            OsmEntity::Node,
                            node_id,
                            OsmEntity::Way,
                            way,
                        ));
                    }
                    debug!(way, node = node_id, "dropping missing node reference");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Way positions as a planar linestring.
    pub fn lls_to_linestring(lls: &[LatpLon]) -> LineString<f64> {
        LineString::new(lls.iter().map(|ll| Coord::from((ll.lon_degrees(), ll.latp_degrees()))).collect())
    }

    /// Way positions as the polygon closure of the linestring.
    pub fn lls_to_polygon(lls: &[LatpLon]) -> Polygon<f64> {
        let mut ring = Self::lls_to_linestring(lls);
        ring.close();
        Polygon::new(ring, vec![])
    }

    /// Builds a multilinestring from a relation's outer way members.
    /// Missing ways follow the integrity policy.
    pub fn way_list_multi_linestring(&self, ways: &[WayId]) -> Result<MultiLineString<f64>> {
        let mut out = Vec::with_capacity(ways.len());
        for lls in self.fetch_ways(ways)? {
            if lls.len() > 1 {
                out.push(Self::lls_to_linestring(&lls));
            }
        }
        Ok(MultiLineString::new(out))
    }

    /// Builds a multipolygon from a relation's outer and inner way
    /// members: member ways are stitched end-to-end into closed rings,
    /// and each inner ring is attached to the outer ring containing it.
    pub fn way_list_multi_polygon(
        &self,
        outers: &[WayId],
        inners: &[WayId],
    ) -> Result<MultiPolygon<f64>> {
        let outer_rings = merge_rings(self.fetch_ways(outers)?);
        let inner_rings = merge_rings(self.fetch_ways(inners)?);

        let mut polygons: Vec<Polygon<f64>> = outer_rings
            .into_iter()
            .map(|ring| Polygon::new(ring_to_linestring(&ring), vec![]))
            .collect();

        'inners: for ring in inner_rings {
            let ls = ring_to_linestring(&ring);
            let probe = ls.0[0];
            for poly in &mut polygons {
                if point_in_ring(probe, poly.exterior()) {
                    poly.interiors_push(ls);
                    continue 'inners;
                }
            }
            debug!("inner ring matches no outer ring; dropped");
        }

        Ok(MultiPolygon::new(polygons))
    }

    fn fetch_ways(&self, ways: &[WayId]) -> Result<Vec<Vec<LatpLon>>> {
        let mut out = Vec::with_capacity(ways.len());
        for &way_id in ways {
            match self.ways.at(way_id) {
                Ok(lls) => out.push(lls),
                Err(e) if e.is_missing_entity() && !self.enforce_integrity => {
                    debug!(way = way_id, "dropping missing way reference");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }
}

/// Stitches member ways into closed rings: ways sharing an endpoint are
/// joined (reversing where needed) until each chain closes. Chains that
/// never close are dropped.
fn merge_rings(mut ways: Vec<Vec<LatpLon>>) -> Vec<Vec<LatpLon>> {
    ways.retain(|w| w.len() > 1);
    let mut rings = Vec::new();
    while let Some(mut chain) = ways.pop() {
        loop {
            if chain.first() == chain.last() && chain.len() > 3 {
                rings.push(chain);
                break;
            }
            let tail = *chain.last().unwrap();
            let next = ways.iter().position(|w| {
                *w.first().unwrap() == tail || *w.last().unwrap() == tail
            });
            match next {
                Some(i) => {
                    let mut segment = ways.swap_remove(i);
                    if *segment.last().unwrap() == tail {
                        segment.reverse();
                    }
                    chain.extend_from_slice(&segment[1..]);
                }
                None => {
                    debug!(points = chain.len(), "unclosed multipolygon ring dropped");
                    break;
                }
            }
        }
    }
    rings
}

fn ring_to_linestring(ring: &[LatpLon]) -> LineString<f64> {
    let mut ls = OsmStore::lls_to_linestring(ring);
    ls.close();
    ls
}

/// Even-odd point-in-ring test in planar space.
fn point_in_ring(point: Coord<f64>, ring: &LineString<f64>) -> bool {
    let pts = &ring.0;
    let mut inside = false;
    let mut j = pts.len() - 1;
    for i in 0..pts.len() {
        let (a, b) = (pts[i], pts[j]);
        if (a.y > point.y) != (b.y > point.y)
            && point.x < (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Parallel sort of id-keyed batches: the data is split into per-worker
/// chunks, each sorted on the pool, then k-way merged.
pub(crate) fn sort_by_id<T: Send + 'static>(
    mut data: Vec<T>,
    pool: &PhasePool,
    id_of: fn(&T) -> u64,
) -> Vec<T> {
    let threads = pool.thread_count();
    if data.len() < 4096 || threads == 1 {
        data.sort_unstable_by_key(id_of);
        return data;
    }

    let chunk_len = data.len().div_ceil(threads);
    let mut slots: Vec<Arc<Mutex<Vec<T>>>> = Vec::new();
    while !data.is_empty() {
        let rest = data.split_off(data.len().saturating_sub(chunk_len));
        slots.push(Arc::new(Mutex::new(rest)));
    }

    let tasks: Vec<_> = slots
        .iter()
        .map(|slot| {
            let slot = Arc::clone(slot);
            move || -> std::result::Result<(), ()> {
                slot.lock().unwrap().sort_unstable_by_key(id_of);
                Ok(())
            }
        })
        .collect();
    pool.run_phase(tasks).expect("chunk sort cannot fail");

    // K-way merge of the sorted chunks.
    let mut chunks: Vec<std::vec::IntoIter<T>> = slots
        .into_iter()
        .map(|slot| {
            Arc::try_unwrap(slot)
                .unwrap_or_else(|_| unreachable!("sort tasks completed"))
                .into_inner()
                .unwrap()
                .into_iter()
        })
        .collect();
    let mut heads: Vec<Option<T>> = chunks.iter_mut().map(|c| c.next()).collect();
    let mut out = Vec::with_capacity(heads.len() * chunk_len);
    loop {
        let mut best: Option<usize> = None;
        for (i, head) in heads.iter().enumerate() {
            if let Some(item) = head {
                if best.is_none_or(|b| id_of(item) < id_of(heads[b].as_ref().unwrap())) {
                    best = Some(i);
                }
            }
        }
        match best {
            Some(i) => {
                out.push(heads[i].take().unwrap());
                heads[i] = chunks[i].next();
            }
            None => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::node_store::BinarySearchNodeStore;
    use crate::entity::relation_store::BinarySearchRelationStore;
    use crate::entity::way_store::LatpLonWayStore;

    fn ll(lat: f64, lon: f64) -> LatpLon {
        LatpLon::from_degrees(lat, lon)
    }

    fn store_with_square_ways() -> OsmStore {
        let nodes = Arc::new(BinarySearchNodeStore::new());
        let ways = Arc::new(LatpLonWayStore::new());
        let relations = Arc::new(BinarySearchRelationStore::new());
        // Two half-square ways that close into a ring when stitched.
        ways.insert_latplons(vec![
            (1, vec![ll(0.0, 0.0), ll(0.0, 1.0), ll(1.0, 1.0)]),
            (2, vec![ll(1.0, 1.0), ll(1.0, 0.0), ll(0.0, 0.0)]),
            // A small inner square inside the outer ring.
            (3, vec![
                ll(0.25, 0.25),
                ll(0.25, 0.75),
                ll(0.75, 0.75),
                ll(0.75, 0.25),
                ll(0.25, 0.25),
            ]),
        ]);
        let pool = PhasePool::new(2);
        ways.finalize(&pool);
        OsmStore::new(nodes, ways, relations)
    }

    #[test]
    fn test_merge_rings_stitches_and_reverses() {
        let a = vec![ll(0.0, 0.0), ll(0.0, 1.0)];
        // Stored in the same direction as `a`, so stitching must reverse it.
        let b = vec![ll(0.0, 0.0), ll(1.0, 1.0), ll(0.0, 1.0)];
        let rings = merge_rings(vec![a, b]);
        assert_eq!(rings.len(), 1);
        assert_eq!(rings[0].first(), rings[0].last());
        assert_eq!(rings[0].len(), 4);
    }

    #[test]
    fn test_unclosed_chain_is_dropped() {
        let rings = merge_rings(vec![vec![ll(0.0, 0.0), ll(0.0, 1.0)]]);
        assert!(rings.is_empty());
    }

    #[test]
    fn test_way_list_multi_polygon() {
        let store = store_with_square_ways();
        let mp = store.way_list_multi_polygon(&[1, 2], &[3]).unwrap();
        assert_eq!(mp.0.len(), 1);
        assert_eq!(mp.0[0].interiors().len(), 1);
    }

    #[test]
    fn test_missing_way_respects_integrity() {
        let mut store = store_with_square_ways();
        assert!(store.way_list_multi_polygon(&[1, 2, 99], &[]).is_err());
        store.enforce_integrity(false);
        let mp = store.way_list_multi_polygon(&[1, 2, 99], &[]).unwrap();
        assert_eq!(mp.0.len(), 1);
    }

    #[test]
    fn test_sort_by_id_parallel_matches_sequential() {
        let pool = PhasePool::new(4);
        let data: Vec<(u64, u32)> = (0..10_000u64).rev().map(|i| (i * 7 % 9973, i as u32)).collect();
        let mut expected = data.clone();
        expected.sort_unstable_by_key(|e| e.0);
        let sorted = sort_by_id(data, &pool, |e| e.0);
        let sorted_ids: Vec<u64> = sorted.iter().map(|e| e.0).collect();
        let expected_ids: Vec<u64> = expected.iter().map(|e| e.0).collect();
        assert_eq!(sorted_ids, expected_ids);
    }
}
