//! Adapter from the external PBF decoder (`osmpbf`) to the pipeline's
//! block model.
//!
//! The file's blobs are scanned once at open; each `read_block` call
//! decodes its own blob, so concurrent worker tasks never share decoder
//! state. Tag strings are re-interned into a per-block string table to
//! keep the borrowed tag views allocation-free during processing.

use std::path::Path;

use ahash::AHashMap;
use osmpbf::{Blob, BlobDecode, BlobReader};
use tileforge_common::{Error, Result};

use crate::block::{
    BlockSource, MemberType, Node, PbfHeader, PrimitiveBlock, PrimitiveGroup, Relation, Way,
};

pub struct PbfFileSource {
    header: PbfHeader,
    blobs: Vec<Blob>,
    mean_block_size: usize,
}

impl PbfFileSource {
    pub fn open(path: &Path) -> Result<PbfFileSource> {
        let reader = BlobReader::from_path(path)
            .map_err(|e| Error::malformed_pbf(format!("{}: {e}", path.display())))?;

        let mut header = None;
        let mut blobs = Vec::new();
        for blob in reader {
            let blob = blob.map_err(|e| Error::malformed_pbf(e.to_string()))?;
            match blob.decode() {
                Ok(BlobDecode::OsmHeader(h)) => {
                    header = Some(convert_header(&h));
                }
                Ok(BlobDecode::OsmData(_)) => blobs.push(blob),
                Ok(BlobDecode::Unknown(_)) => {}
                Err(e) => return Err(Error::malformed_pbf(e.to_string())),
            }
        }

        let header =
            header.ok_or_else(|| Error::malformed_pbf("no OSMHeader blob in input"))?;
        let file_size = std::fs::metadata(path)
            .map_err(|e| Error::io(path.display().to_string(), e))?
            .len() as usize;
        let mean_block_size = if blobs.is_empty() { 0 } else { file_size / blobs.len() };
        Ok(PbfFileSource {
            header,
            blobs,
            mean_block_size,
        })
    }
}

impl BlockSource for PbfFileSource {
    fn header(&self) -> &PbfHeader {
        &self.header
    }

    fn block_count(&self) -> usize {
        self.blobs.len()
    }

    fn read_block(&self, index: usize) -> Result<PrimitiveBlock> {
        match self.blobs[index].decode() {
            Ok(BlobDecode::OsmData(block)) => Ok(convert_block(&block)),
            Ok(_) => Err(Error::malformed_pbf(format!(
                "block {index} is not a data blob"
            ))),
            Err(e) => Err(Error::malformed_pbf(e.to_string())),
        }
    }

    fn mean_block_size(&self) -> Option<usize> {
        (self.mean_block_size > 0).then_some(self.mean_block_size)
    }
}

fn convert_header(h: &osmpbf::HeaderBlock) -> PbfHeader {
    PbfHeader {
        bbox: h
            .bbox()
            .map(|b| [b.left, b.bottom, b.right, b.top]),
        optional_features: h.optional_features().to_vec(),
    }
}

/// Re-interns one decoded block into the pipeline model.
fn convert_block(block: &osmpbf::PrimitiveBlock) -> PrimitiveBlock {
    let mut out = PrimitiveBlock::default();
    let mut interner = StringInterner::new(&mut out.string_table);

    for group in block.groups() {
        let mut g = PrimitiveGroup::default();

        for node in group.nodes() {
            g.nodes.push(convert_node(
                node.id() as u64,
                node.lat(),
                node.lon(),
                node.tags(),
                &mut interner,
            ));
        }
        for node in group.dense_nodes() {
            g.nodes.push(convert_node(
                node.id() as u64,
                node.lat(),
                node.lon(),
                node.tags(),
                &mut interner,
            ));
        }

        for way in group.ways() {
            let (key_indexes, value_indexes) = interner.intern_tags(way.tags());
            let mut lats_nano = Vec::new();
            let mut lons_nano = Vec::new();
            for location in way.node_locations() {
                lats_nano.push(degrees_to_nano(location.lat()));
                lons_nano.push(degrees_to_nano(location.lon()));
            }
            g.ways.push(Way {
                id: way.id() as u64,
                refs: way.refs().map(|r| r as u64).collect(),
                lats_nano,
                lons_nano,
                key_indexes,
                value_indexes,
            });
        }

        for relation in group.relations() {
            let (key_indexes, value_indexes) = interner.intern_tags(relation.tags());
            let mut r = Relation {
                id: relation.id() as u64,
                key_indexes,
                value_indexes,
                ..Relation::default()
            };
            for member in relation.members() {
                r.member_ids.push(member.member_id as u64);
                r.member_types.push(match member.member_type {
                    osmpbf::RelMemberType::Node => MemberType::Node,
                    osmpbf::RelMemberType::Way => MemberType::Way,
                    osmpbf::RelMemberType::Relation => MemberType::Relation,
                });
                let role = member.role().unwrap_or("");
                r.member_roles.push(interner.intern(role));
            }
            g.relations.push(r);
        }

        out.groups.push(g);
    }
    out
}

fn convert_node<'a>(
    id: u64,
    lat: f64,
    lon: f64,
    tags: impl Iterator<Item = (&'a str, &'a str)>,
    interner: &mut StringInterner<'_>,
) -> Node {
    let (key_indexes, value_indexes) = interner.intern_tags(tags);
    Node {
        id,
        lat_nano: degrees_to_nano(lat),
        lon_nano: degrees_to_nano(lon),
        key_indexes,
        value_indexes,
    }
}

fn degrees_to_nano(degrees: f64) -> i64 {
    (degrees * 1e9).round() as i64
}

struct StringInterner<'a> {
    table: &'a mut Vec<String>,
    by_value: AHashMap<String, u32>,
}

impl<'a> StringInterner<'a> {
    fn new(table: &'a mut Vec<String>) -> StringInterner<'a> {
        table.push(String::new());
        StringInterner {
            table,
            by_value: AHashMap::new(),
        }
    }

    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&i) = self.by_value.get(s) {
            return i;
        }
        let i = self.table.len() as u32;
        self.table.push(s.to_string());
        self.by_value.insert(s.to_string(), i);
        i
    }

    fn intern_tags<'b>(
        &mut self,
        tags: impl Iterator<Item = (&'b str, &'b str)>,
    ) -> (Vec<u32>, Vec<u32>) {
        let mut keys = Vec::new();
        let mut values = Vec::new();
        for (k, v) in tags {
            keys.push(self.intern(k));
            values.push(self.intern(v));
        }
        (keys, values)
    }
}
