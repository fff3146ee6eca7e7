//! The in-memory stores of the conversion run: the attribute interning
//! dictionaries, the node/way/relation entity stores, the side tables
//! populated by the relation scan, and the borrowed tag view handed to the
//! per-entity processing callbacks.

pub mod attributes;
pub mod entity;
pub mod ids;
pub mod side_tables;
pub mod tags;

pub use attributes::{
    AttributeKeyIndex, AttributePair, AttributePairIndex, AttributeSet, AttributeSetIndex,
    AttributeValue, Attributes,
};
pub use entity::{NodeStore, OsmStore, RelationData, RelationStore, WayStore};
pub use ids::{MAX_OSM_ID, NodeId, RelationId, WayId};
pub use side_tables::{RelationScanStore, UsedWays};
pub use tags::{TagSlot, TagView};
