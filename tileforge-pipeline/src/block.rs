//! The decoded block model and the source abstraction over it.
//!
//! The PBF binary decoder is an external collaborator; the pipeline works
//! against [`BlockSource`], which hands out decoded [`PrimitiveBlock`]s by
//! index. Entities keep their tags as indexes into the block's string
//! table, which is what the borrowed tag view is built over.

use tileforge_common::Result;
use tileforge_store::{NodeId, RelationId, TagView, WayId};

/// Header feature enabling node-less way reading: each way carries its
/// node positions inline.
pub const FEATURE_LOCATIONS_ON_WAYS: &str = "LocationsOnWays";
/// Header feature declaring blocks grouped by entity type then sorted by
/// id, enabling phase-aware block skipping.
pub const FEATURE_SORT_TYPE_THEN_ID: &str = "Sort.Type_then_ID";

/// Decoded PBF header.
#[derive(Debug, Clone, Default)]
pub struct PbfHeader {
    /// `(min_lon, min_lat, max_lon, max_lat)` when the header declares one.
    pub bbox: Option<[f64; 4]>,
    pub optional_features: Vec<String>,
}

impl PbfHeader {
    pub fn has_feature(&self, feature: &str) -> bool {
        self.optional_features.iter().any(|f| f == feature)
    }
}

/// One decoded primitive block: a string table plus entity groups.
#[derive(Debug, Clone, Default)]
pub struct PrimitiveBlock {
    pub string_table: Vec<String>,
    pub groups: Vec<PrimitiveGroup>,
}

impl PrimitiveBlock {
    /// Position of `s` in the string table, or `None`.
    pub fn string_position(&self, s: &str) -> Option<u32> {
        self.string_table
            .iter()
            .position(|entry| entry == s)
            .map(|i| i as u32)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PrimitiveGroup {
    pub nodes: Vec<Node>,
    pub ways: Vec<Way>,
    pub relations: Vec<Relation>,
}

/// A node with its position in nanodegrees and tag indexes into the
/// block's string table.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub lat_nano: i64,
    pub lon_nano: i64,
    pub key_indexes: Vec<u32>,
    pub value_indexes: Vec<u32>,
}

impl Node {
    pub fn tags<'a>(&'a self, block: &'a PrimitiveBlock) -> TagView<'a> {
        TagView::new(&block.string_table, &self.key_indexes, &self.value_indexes)
    }
}

/// A way: node references, or inline positions with the locations-on-ways
/// feature.
#[derive(Debug, Clone, Default)]
pub struct Way {
    pub id: WayId,
    pub refs: Vec<NodeId>,
    pub lats_nano: Vec<i64>,
    pub lons_nano: Vec<i64>,
    pub key_indexes: Vec<u32>,
    pub value_indexes: Vec<u32>,
}

impl Way {
    pub fn tags<'a>(&'a self, block: &'a PrimitiveBlock) -> TagView<'a> {
        TagView::new(&block.string_table, &self.key_indexes, &self.value_indexes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberType {
    Node,
    Way,
    Relation,
}

/// A relation: parallel member arrays plus tag indexes. Member roles are
/// string-table indexes like tags.
#[derive(Debug, Clone, Default)]
pub struct Relation {
    pub id: RelationId,
    pub member_ids: Vec<u64>,
    pub member_types: Vec<MemberType>,
    pub member_roles: Vec<u32>,
    pub key_indexes: Vec<u32>,
    pub value_indexes: Vec<u32>,
}

impl Relation {
    pub fn tags<'a>(&'a self, block: &'a PrimitiveBlock) -> TagView<'a> {
        TagView::new(&block.string_table, &self.key_indexes, &self.value_indexes)
    }

    pub fn members(&self) -> impl Iterator<Item = (MemberType, u64, u32)> + '_ {
        (0..self.member_ids.len())
            .map(|i| (self.member_types[i], self.member_ids[i], self.member_roles[i]))
    }

    /// Whether the tag at `(type_pos, value_pos)` string positions is set,
    /// e.g. `type=multipolygon`.
    pub fn has_tag_positions(&self, key_pos: Option<u32>, value_pos: Option<u32>) -> bool {
        let (Some(key_pos), Some(value_pos)) = (key_pos, value_pos) else {
            return false;
        };
        self.key_indexes
            .iter()
            .zip(&self.value_indexes)
            .any(|(&k, &v)| k == key_pos && v == value_pos)
    }
}

/// Source of decoded blocks. `read_block` is called concurrently from
/// worker tasks; each call decodes independently.
pub trait BlockSource: Send + Sync {
    fn header(&self) -> &PbfHeader;
    fn block_count(&self) -> usize;
    fn read_block(&self, index: usize) -> Result<PrimitiveBlock>;
    /// Mean on-disk block size, for the oversized-block hint; `None` when
    /// unknown (e.g. in-memory sources).
    fn mean_block_size(&self) -> Option<usize> {
        None
    }
}

/// In-memory source used by tests and by callers that assemble blocks
/// programmatically.
pub struct MemoryBlockSource {
    header: PbfHeader,
    blocks: Vec<PrimitiveBlock>,
}

impl MemoryBlockSource {
    pub fn new(header: PbfHeader, blocks: Vec<PrimitiveBlock>) -> MemoryBlockSource {
        MemoryBlockSource { header, blocks }
    }
}

impl BlockSource for MemoryBlockSource {
    fn header(&self) -> &PbfHeader {
        &self.header
    }

    fn block_count(&self) -> usize {
        self.blocks.len()
    }

    fn read_block(&self, index: usize) -> Result<PrimitiveBlock> {
        Ok(self.blocks[index].clone())
    }
}

/// Helper for assembling blocks in tests: interns strings on the fly.
#[derive(Default)]
pub struct BlockBuilder {
    block: PrimitiveBlock,
}

impl BlockBuilder {
    pub fn new() -> BlockBuilder {
        let mut builder = BlockBuilder::default();
        // Index 0 is conventionally the empty string.
        builder.block.string_table.push(String::new());
        builder.block.groups.push(PrimitiveGroup::default());
        builder
    }

    pub fn intern(&mut self, s: &str) -> u32 {
        if let Some(i) = self.block.string_position(s) {
            return i;
        }
        self.block.string_table.push(s.to_string());
        (self.block.string_table.len() - 1) as u32
    }

    fn tag_indexes(&mut self, tags: &[(&str, &str)]) -> (Vec<u32>, Vec<u32>) {
        let keys = tags.iter().map(|(k, _)| self.intern(k)).collect();
        let values = tags.iter().map(|(_, v)| self.intern(v)).collect();
        (keys, values)
    }

    pub fn node(&mut self, id: NodeId, lat: f64, lon: f64, tags: &[(&str, &str)]) -> &mut Self {
        let (key_indexes, value_indexes) = self.tag_indexes(tags);
        self.block.groups[0].nodes.push(Node {
            id,
            lat_nano: (lat * 1e9) as i64,
            lon_nano: (lon * 1e9) as i64,
            key_indexes,
            value_indexes,
        });
        self
    }

    pub fn way(&mut self, id: WayId, refs: &[NodeId], tags: &[(&str, &str)]) -> &mut Self {
        let (key_indexes, value_indexes) = self.tag_indexes(tags);
        self.block.groups[0].ways.push(Way {
            id,
            refs: refs.to_vec(),
            key_indexes,
            value_indexes,
            ..Way::default()
        });
        self
    }

    pub fn relation(
        &mut self,
        id: RelationId,
        members: &[(MemberType, u64, &str)],
        tags: &[(&str, &str)],
    ) -> &mut Self {
        let (key_indexes, value_indexes) = self.tag_indexes(tags);
        let member_roles = members.iter().map(|(_, _, role)| self.intern(role)).collect();
        self.block.groups[0].relations.push(Relation {
            id,
            member_ids: members.iter().map(|(_, id, _)| *id).collect(),
            member_types: members.iter().map(|(t, _, _)| *t).collect(),
            member_roles,
            key_indexes,
            value_indexes,
        });
        self
    }

    pub fn build(self) -> PrimitiveBlock {
        self.block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_builder_round_trip() {
        let mut builder = BlockBuilder::new();
        builder.node(1, 51.5, -0.1, &[("amenity", "bench")]);
        builder.way(2, &[1, 3], &[("highway", "primary")]);
        let block = builder.build();

        let node = &block.groups[0].nodes[0];
        let tags = node.tags(&block);
        let slot = tags.find_key(b"amenity").unwrap();
        assert_eq!(tags.value(slot), "bench");

        let way = &block.groups[0].ways[0];
        assert_eq!(way.refs, vec![1, 3]);
        assert!(block.string_position("highway").is_some());
        assert_eq!(block.string_position("building"), None);
    }

    #[test]
    fn test_relation_tag_positions() {
        let mut builder = BlockBuilder::new();
        builder.relation(
            9,
            &[(MemberType::Way, 2, "outer")],
            &[("type", "multipolygon")],
        );
        let block = builder.build();
        let relation = &block.groups[0].relations[0];
        let type_pos = block.string_position("type");
        let mp_pos = block.string_position("multipolygon");
        assert!(relation.has_tag_positions(type_pos, mp_pos));
        assert!(!relation.has_tag_positions(type_pos, block.string_position("outer")));
    }
}
