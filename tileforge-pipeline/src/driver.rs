//! The phased block driver.
//!
//! Reads run in strict phase order — Nodes, RelationScan, Ways,
//! Relations — with a worker-pool barrier and a store finalize between
//! phases. Within a phase, block ranges are posted as tasks in
//! contiguous batches (nodes and ways benefit from sorted-id locality;
//! relations get single-block batches because their cost is wildly
//! non-uniform, and few relation blocks are further split into per-task
//! chunks). In sharded low-memory mode the ways and relations phases
//! repeat once per shard, skipping blocks whose first member lives in a
//! different shard.

use std::sync::{Arc, Mutex};

use ahash::AHashSet;
use tileforge_common::{Error, Result, verify_data};
use tileforge_geometry::LatpLon;
use tileforge_store::{Attributes, MAX_OSM_ID, OsmStore, RelationData, WayId};
use tileforge_tiles::{IndexedLayers, TileDataSource};
use tileforge_workflow::PhasePool;
use tracing::{info, warn};

use crate::block::{
    BlockSource, FEATURE_LOCATIONS_ON_WAYS, FEATURE_SORT_TYPE_THEN_ID, MemberType,
    PrimitiveBlock, PrimitiveGroup,
};
use crate::layers::Layers;
use crate::processing::{Processing, ProcessingConfig, Shared};
use crate::runtime::ScriptRuntimeFactory;
use crate::way_nodes::LazyWayNodes;

/// Mean block size past which the input is probably worth re-chunking.
const OVERSIZED_BLOCK_BYTES: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadPhase {
    Nodes,
    RelationScan,
    Ways,
    Relations,
}

#[derive(Debug, Clone, Copy)]
struct BlockMetadata {
    index: usize,
    has_nodes: bool,
    has_ways: bool,
    has_relations: bool,
    /// Chunk-of-chunks split applied to sparse relation phases.
    chunk: usize,
    chunks: usize,
}

#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Number of store shards; 1 reads everything in a single pass.
    pub shards: usize,
    /// Compact (renumbered) input hint, used to size the used-ways table.
    pub compact: bool,
}

impl Default for DriverOptions {
    fn default() -> DriverOptions {
        DriverOptions {
            shards: 1,
            compact: false,
        }
    }
}

/// Owns the run-wide shared state and drives the phases over a block
/// source.
pub struct PbfDriver {
    pub source: Arc<dyn BlockSource>,
    pub store: Arc<OsmStore>,
    pub attributes: Arc<Attributes>,
    pub tiles: Arc<TileDataSource>,
    pub layers: Arc<Layers>,
    pub indexed: Arc<IndexedLayers>,
    pub config: Arc<ProcessingConfig>,
    pub factory: Arc<dyn ScriptRuntimeFactory>,
    pub options: DriverOptions,
}

impl PbfDriver {
    /// Runs all phases to completion.
    pub fn run(&self, pool: &PhasePool) -> Result<()> {
        let header = self.source.header();
        let locations_on_ways = header.has_feature(FEATURE_LOCATIONS_ON_WAYS);
        let sorted_input = header.has_feature(FEATURE_SORT_TYPE_THEN_ID);
        if locations_on_ways {
            info!("input has locations on ways");
        }
        if let Some(mean) = self.source.mean_block_size() {
            if mean > OVERSIZED_BLOCK_BYTES {
                warn!(
                    mean_block_bytes = mean,
                    "input has very large blocks, which may slow processing; \
                     re-chunk it with `osmium cat`"
                );
            }
        }

        let probe = Processing::new(self.factory.as_ref(), self.shared())?;
        let node_keys = probe.node_keys();

        let mut blocks: Vec<BlockMetadata> = (0..self.source.block_count())
            .map(|index| BlockMetadata {
                index,
                has_nodes: true,
                has_ways: true,
                has_relations: true,
                chunk: 0,
                chunks: 1,
            })
            .collect();

        if sorted_input {
            self.mark_phases_by_binary_search(&mut blocks)?;
        }

        let threads = pool.thread_count();
        for phase in [
            ReadPhase::Nodes,
            ReadPhase::RelationScan,
            ReadPhase::Ways,
            ReadPhase::Relations,
        ] {
            // Shard passes can never exceed the store's own sharding.
            let effective_shards = match phase {
                ReadPhase::Ways => self
                    .options
                    .shards
                    .clamp(1, self.store.nodes.shard_count()),
                ReadPhase::Relations => {
                    self.options.shards.clamp(1, self.store.ways.shard_count())
                }
                _ => 1,
            };

            if phase == ReadPhase::RelationScan {
                self.store
                    .ensure_used_ways_inited(self.options.compact, self.store.nodes.len());
            }

            let consumed: Arc<Mutex<AHashSet<usize>>> = Arc::new(Mutex::new(AHashSet::new()));
            for shard in 0..effective_shards {
                if phase == ReadPhase::Ways
                    && effective_shards > 1
                    && self.store.nodes.shard_len(shard) == 0
                {
                    continue;
                }
                if phase == ReadPhase::Relations
                    && effective_shards > 1
                    && self.store.ways.shard_len(shard) == 0
                {
                    continue;
                }

                let mut filtered: Vec<BlockMetadata> = blocks
                    .iter()
                    .filter(|b| match phase {
                        ReadPhase::Nodes => b.has_nodes,
                        ReadPhase::RelationScan => b.has_relations,
                        ReadPhase::Ways => b.has_ways,
                        ReadPhase::Relations => b.has_relations,
                    })
                    .copied()
                    .collect();
                if filtered.is_empty() {
                    continue;
                }

                // Few relation blocks: subdivide for better parallelism.
                if phase == ReadPhase::Relations && threads > 1 && filtered.len() < threads * 2 {
                    info!(
                        blocks = filtered.len(),
                        "few relation blocks; subdividing for better parallelism"
                    );
                    filtered = filtered
                        .iter()
                        .flat_map(|b| {
                            (0..threads).map(|chunk| BlockMetadata {
                                chunk,
                                chunks: threads,
                                ..*b
                            })
                        })
                        .collect();
                }

                let batch_size = match phase {
                    ReadPhase::Nodes | ReadPhase::Ways => filtered.len() / (threads * 8) + 1,
                    _ => 1,
                };

                info!(?phase, shard, blocks = filtered.len(), "starting read pass");

                let tasks: Vec<_> = filtered
                    .chunks(batch_size)
                    .map(|batch| {
                        let batch = batch.to_vec();
                        let driver = self.clone_refs();
                        let consumed = Arc::clone(&consumed);
                        let node_keys = node_keys.clone();
                        move || {
                            driver.run_batch(
                                phase,
                                &batch,
                                &node_keys,
                                locations_on_ways,
                                shard,
                                effective_shards,
                                &consumed,
                            )
                        }
                    })
                    .collect();
                pool.run_phase(tasks)?;
            }

            match phase {
                ReadPhase::Nodes => self.store.nodes.finalize(pool),
                ReadPhase::RelationScan => self.store.finalize_relation_scan(),
                ReadPhase::Ways => self.store.ways.finalize(pool),
                ReadPhase::Relations => self.store.relations.finalize(pool),
            }

            let consumed = consumed.lock().unwrap();
            if !consumed.is_empty() {
                blocks.retain(|b| !consumed.contains(&b.index));
            }
        }

        self.tiles.finalize();
        Ok(())
    }

    fn shared(&self) -> Shared<'_> {
        Shared {
            store: &self.store,
            attributes: &self.attributes,
            tiles: &self.tiles,
            layers: &self.layers,
            indexed: &self.indexed,
            config: &self.config,
        }
    }

    fn clone_refs(&self) -> DriverRefs {
        DriverRefs {
            source: Arc::clone(&self.source),
            store: Arc::clone(&self.store),
            attributes: Arc::clone(&self.attributes),
            tiles: Arc::clone(&self.tiles),
            layers: Arc::clone(&self.layers),
            indexed: Arc::clone(&self.indexed),
            config: Arc::clone(&self.config),
            factory: Arc::clone(&self.factory),
        }
    }

    /// With `Sort.Type_then_ID`, blocks are grouped nodes → ways →
    /// relations; two binary searches over the block offsets find the
    /// group boundaries so later phases skip block bodies entirely.
    fn mark_phases_by_binary_search(&self, blocks: &mut [BlockMetadata]) -> Result<()> {
        let error: Mutex<Option<Error>> = Mutex::new(None);
        let block_has = |index: usize, test: &dyn Fn(&PrimitiveGroup) -> bool| -> bool {
            match self.source.read_block(index) {
                Ok(block) => block.groups.iter().any(test),
                Err(e) => {
                    error.lock().unwrap().get_or_insert(e);
                    false
                }
            }
        };

        let ways_start = blocks.partition_point(|b| {
            !block_has(b.index, &|g| !g.ways.is_empty() || !g.relations.is_empty())
        });
        let relations_start =
            blocks.partition_point(|b| !block_has(b.index, &|g| !g.relations.is_empty()));
        if let Some(e) = error.into_inner().unwrap() {
            return Err(e);
        }

        for (i, block) in blocks.iter_mut().enumerate() {
            block.has_nodes = i <= ways_start;
            block.has_ways = i >= ways_start && i <= relations_start;
            block.has_relations = i >= relations_start;
        }
        Ok(())
    }
}

/// The Arc bundle moved into each worker task.
struct DriverRefs {
    source: Arc<dyn BlockSource>,
    store: Arc<OsmStore>,
    attributes: Arc<Attributes>,
    tiles: Arc<TileDataSource>,
    layers: Arc<Layers>,
    indexed: Arc<IndexedLayers>,
    config: Arc<ProcessingConfig>,
    factory: Arc<dyn ScriptRuntimeFactory>,
}

impl DriverRefs {
    #[allow(clippy::too_many_arguments)]
    fn run_batch(
        &self,
        phase: ReadPhase,
        batch: &[BlockMetadata],
        node_keys: &[String],
        locations_on_ways: bool,
        shard: usize,
        effective_shards: usize,
        consumed: &Mutex<AHashSet<usize>>,
    ) -> Result<()> {
        let shared = Shared {
            store: &self.store,
            attributes: &self.attributes,
            tiles: &self.tiles,
            layers: &self.layers,
            indexed: &self.indexed,
            config: &self.config,
        };
        let mut processing = Processing::new(self.factory.as_ref(), shared)?;

        for meta in batch {
            let block = self.source.read_block(meta.index)?;
            let fully_read = self.read_block(
                phase,
                &mut processing,
                &block,
                meta,
                node_keys,
                locations_on_ways,
                shard,
                effective_shards,
            )?;
            // A block leaves the rotation only when every group in it was
            // consumed and no other shard or chunk still needs it. The
            // relation scan is a pre-pass: the relations phase reads the
            // same blocks again, so it never consumes anything.
            if fully_read
                && phase != ReadPhase::RelationScan
                && shard + 1 == effective_shards
                && meta.chunks == 1
            {
                consumed.lock().unwrap().insert(meta.index);
            }
        }
        processing.exit()?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn read_block(
        &self,
        phase: ReadPhase,
        processing: &mut Processing<'_>,
        block: &PrimitiveBlock,
        meta: &BlockMetadata,
        node_keys: &[String],
        locations_on_ways: bool,
        shard: usize,
        effective_shards: usize,
    ) -> Result<bool> {
        // Positions of the significant node keys in this block's table.
        let node_key_positions: AHashSet<u32> = node_keys
            .iter()
            .filter_map(|k| block.string_position(k))
            .collect();

        let mut read_groups = 0usize;
        for group in &block.groups {
            let done = match phase {
                ReadPhase::Nodes => self.read_nodes(processing, block, group, &node_key_positions)?,
                ReadPhase::RelationScan => self.scan_relations(processing, block, group)?,
                ReadPhase::Ways => self.read_ways(
                    processing,
                    block,
                    group,
                    locations_on_ways,
                    shard,
                    effective_shards,
                )?,
                ReadPhase::Relations => {
                    self.read_relations(processing, block, group, meta, shard, effective_shards)?
                }
            };
            if done {
                read_groups += 1;
            }
        }
        Ok(read_groups == block.groups.len())
    }

    fn read_nodes(
        &self,
        processing: &mut Processing<'_>,
        block: &PrimitiveBlock,
        group: &PrimitiveGroup,
        node_key_positions: &AHashSet<u32>,
    ) -> Result<bool> {
        if group.nodes.is_empty() {
            return Ok(false);
        }
        let mut batch = Vec::with_capacity(group.nodes.len());
        for node in &group.nodes {
            let ll = LatpLon::from_nano_degrees(node.lat_nano, node.lon_nano);
            batch.push((node.id, ll));

            let significant = node
                .key_indexes
                .iter()
                .any(|k| node_key_positions.contains(k));
            if significant {
                processing.set_node(node.id, ll, node.tags(block))?;
            }
        }
        self.store.nodes.insert(batch);
        Ok(true)
    }

    fn scan_relations(
        &self,
        processing: &mut Processing<'_>,
        block: &PrimitiveBlock,
        group: &PrimitiveGroup,
    ) -> Result<bool> {
        if group.relations.is_empty() {
            return Ok(false);
        }
        let type_pos = block.string_position("type");
        let mp_pos = block.string_position("multipolygon");

        for relation in &group.relations {
            let is_multipolygon = relation.has_tag_positions(type_pos, mp_pos);
            let mut accepted = false;
            if processing.can_read_relations() {
                accepted = processing.scan_relation(relation.id, relation.tags(block))?;
            }
            // Multipolygons always mark their member ways as used; other
            // relations only matter when the profile accepted them.
            if !is_multipolygon && !accepted {
                continue;
            }
            for (member_type, member_id, _) in relation.members() {
                if member_type != MemberType::Way {
                    continue;
                }
                verify_data!(
                    format_args!("relation {}", relation.id),
                    member_id <= MAX_OSM_ID
                );
                self.store.mark_way_used(member_id);
                if accepted {
                    self.store.relation_contains_way(relation.id, member_id);
                }
            }
        }
        Ok(true)
    }

    fn read_ways(
        &self,
        processing: &mut Processing<'_>,
        block: &PrimitiveBlock,
        group: &PrimitiveGroup,
        locations_on_ways: bool,
        shard: usize,
        effective_shards: usize,
    ) -> Result<bool> {
        if group.ways.is_empty() {
            return Ok(false);
        }
        let requires_nodes = self.store.ways.requires_nodes();
        let mut ll_batch: Vec<(WayId, Vec<LatpLon>)> = Vec::new();
        let mut ref_batch: Vec<(WayId, Vec<u64>)> = Vec::new();

        for way in &group.ways {
            verify_data!(format_args!("way {}", way.id), way.id <= MAX_OSM_ID);
            if !locations_on_ways && effective_shards > 1 {
                match way.refs.first() {
                    Some(&first) if self.store.nodes.contains(shard, first) => {}
                    _ => continue,
                }
            }

            let mut lazy = LazyWayNodes::new(way, locations_on_ways, &self.store);
            let lls = lazy.latplons()?.to_vec();
            if lls.is_empty() {
                continue;
            }

            let emitted = processing.set_way(way.id, &lls, way.tags(block))?;
            if emitted || self.store.way_is_used(way.id) {
                if requires_nodes {
                    ref_batch.push((way.id, lazy.node_refs().to_vec()));
                } else {
                    ll_batch.push((way.id, lls));
                }
            }
        }

        if !ll_batch.is_empty() {
            self.store.ways.insert_latplons(ll_batch);
        }
        if !ref_batch.is_empty() {
            self.store.ways.insert_node_refs(ref_batch);
        }
        Ok(true)
    }

    fn read_relations(
        &self,
        processing: &mut Processing<'_>,
        block: &PrimitiveBlock,
        group: &PrimitiveGroup,
        meta: &BlockMetadata,
        shard: usize,
        effective_shards: usize,
    ) -> Result<bool> {
        if group.relations.is_empty() {
            return Ok(false);
        }
        let type_pos = block.string_position("type");
        let mp_pos = block.string_position("multipolygon");
        let boundary_pos = block.string_position("boundary");
        let inner_pos = block.string_position("inner");
        let outer_pos = block.string_position("outer");

        let mut batch: Vec<(u64, RelationData)> = Vec::new();
        for (j, relation) in group.relations.iter().enumerate() {
            if j % meta.chunks != meta.chunk {
                continue;
            }
            let is_multipolygon = relation.has_tag_positions(type_pos, mp_pos);
            let is_boundary = relation.has_tag_positions(type_pos, boundary_pos);
            if !is_multipolygon && !is_boundary && !processing.can_write_relations() {
                continue;
            }

            let mut outers: Vec<WayId> = Vec::new();
            let mut inners: Vec<WayId> = Vec::new();
            let mut is_inner_outer = is_multipolygon || is_boundary;
            let mut first_way = true;
            let mut skip_to_next = false;
            for (member_type, member_id, role_index) in relation.members() {
                if member_type != MemberType::Way {
                    continue;
                }
                verify_data!(
                    format_args!("relation {}", relation.id),
                    member_id <= MAX_OSM_ID
                );
                let is_inner = Some(role_index) == inner_pos;
                let is_outer = Some(role_index) == outer_pos;
                if is_inner || is_outer {
                    is_inner_outer = true;
                }
                if first_way && effective_shards > 1 && !self.store.ways.contains(shard, member_id)
                {
                    skip_to_next = true;
                    break;
                }
                first_way = false;
                if is_inner {
                    inners.push(member_id);
                } else {
                    outers.push(member_id);
                }
            }
            if skip_to_next {
                continue;
            }

            let emitted = processing.set_relation(
                relation.id,
                &outers,
                &inners,
                relation.tags(block),
                is_multipolygon,
                is_inner_outer,
            )?;
            if emitted {
                batch.push((relation.id, RelationData { outers, inners }));
            }
        }

        if !batch.is_empty() {
            self.store.relations.insert(batch);
        }
        Ok(true)
    }
}
