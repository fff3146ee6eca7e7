//! Lazy resolution of a way's node list.
//!
//! A way arriving from a block carries either node references or inline
//! positions (locations on ways). Depending on what the profile and the
//! stores need, a given way may require only its node ids (node-ref
//! storage), only its positions (geometry), or neither (skipped early).
//! This holder materializes each view once, on first use.

use tileforge_common::Result;
use tileforge_geometry::LatpLon;
use tileforge_store::{NodeId, OsmStore, WayId};

use crate::block::Way;

pub struct LazyWayNodes<'a> {
    way: &'a Way,
    way_id: WayId,
    locations_on_ways: bool,
    store: &'a OsmStore,
    latplons: Option<Vec<LatpLon>>,
    node_refs: Option<Vec<NodeId>>,
}

impl<'a> LazyWayNodes<'a> {
    pub fn new(way: &'a Way, locations_on_ways: bool, store: &'a OsmStore) -> LazyWayNodes<'a> {
        LazyWayNodes {
            way,
            way_id: way.id,
            locations_on_ways,
            store,
            latplons: None,
            node_refs: None,
        }
    }

    /// The way's node ids. Empty for locations-on-ways input.
    pub fn node_refs(&mut self) -> &[NodeId] {
        if self.node_refs.is_none() {
            self.node_refs = Some(if self.locations_on_ways {
                Vec::new()
            } else {
                self.way.refs.clone()
            });
        }
        self.node_refs.as_deref().unwrap()
    }

    /// The way's positions, resolving node references through the store
    /// under the integrity policy.
    pub fn latplons(&mut self) -> Result<&[LatpLon]> {
        if self.latplons.is_none() {
            let lls = if self.locations_on_ways {
                self.way
                    .lats_nano
                    .iter()
                    .zip(&self.way.lons_nano)
                    .map(|(&lat, &lon)| LatpLon::from_nano_degrees(lat, lon))
                    .collect()
            } else {
                self.store.resolve_nodes(&self.way.refs, self.way_id)?
            };
            self.latplons = Some(lls);
        }
        Ok(self.latplons.as_deref().unwrap())
    }

    /// Whether the way closes on itself. Resolves the cheapest view that
    /// can answer.
    pub fn is_closed(&mut self) -> bool {
        if self.locations_on_ways {
            self.way.lats_nano.first() == self.way.lats_nano.last()
                && self.way.lons_nano.first() == self.way.lons_nano.last()
                && !self.way.lats_nano.is_empty()
        } else {
            !self.way.refs.is_empty() && self.way.refs.first() == self.way.refs.last()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tileforge_store::entity::{
        BinarySearchNodeStore, BinarySearchRelationStore, LatpLonWayStore, NodeStore,
    };
    use tileforge_workflow::PhasePool;

    fn store_with_nodes() -> OsmStore {
        let nodes = Arc::new(BinarySearchNodeStore::new());
        nodes.insert(vec![
            (1, LatpLon::from_degrees(0.0, 0.0)),
            (2, LatpLon::from_degrees(0.0, 1.0)),
        ]);
        nodes.finalize(&PhasePool::new(1));
        OsmStore::new(
            nodes,
            Arc::new(LatpLonWayStore::new()),
            Arc::new(BinarySearchRelationStore::new()),
        )
    }

    #[test]
    fn test_resolves_refs_once() {
        let store = store_with_nodes();
        let way = Way {
            id: 7,
            refs: vec![1, 2, 1],
            ..Way::default()
        };
        let mut lazy = LazyWayNodes::new(&way, false, &store);
        assert!(lazy.is_closed());
        assert_eq!(lazy.node_refs(), &[1, 2, 1]);
        let lls = lazy.latplons().unwrap();
        assert_eq!(lls.len(), 3);
        assert_eq!(lls[0], LatpLon::from_degrees(0.0, 0.0));
    }

    #[test]
    fn test_locations_on_ways() {
        let store = store_with_nodes();
        let way = Way {
            id: 7,
            lats_nano: vec![500_000_000, 600_000_000],
            lons_nano: vec![0, 0],
            ..Way::default()
        };
        let mut lazy = LazyWayNodes::new(&way, true, &store);
        assert!(!lazy.is_closed());
        assert!(lazy.node_refs().is_empty());
        let lls = lazy.latplons().unwrap();
        assert_eq!(lls[0], LatpLon::from_degrees(0.5, 0.0));
    }

    #[test]
    fn test_missing_node_with_integrity() {
        let store = store_with_nodes();
        let way = Way {
            id: 7,
            refs: vec![1, 99],
            ..Way::default()
        };
        let mut lazy = LazyWayNodes::new(&way, false, &store);
        assert!(lazy.latplons().is_err());
    }
}
