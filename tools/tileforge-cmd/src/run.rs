//! Wires the options into a full conversion run: stores, driver, tile
//! enumeration and sink writing.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, info};

use tileforge_geometry::coordinates::latp_to_lat;
use tileforge_geometry::{TileBbox, TileCoordinates};
use tileforge_pipeline::driver::{DriverOptions, PbfDriver};
use tileforge_pipeline::pbf_source::PbfFileSource;
use tileforge_pipeline::BlockSource;
use tileforge_pipeline::processing::ProcessingConfig;
use tileforge_pipeline::sinks::sink_for_path;
use tileforge_pipeline::TileSink;
use tileforge_store::entity::{
    BinarySearchNodeStore, BinarySearchRelationStore, LatpLonWayStore, NodeRefWayStore,
    ShardedNodeStore, ShardedWayStore,
};
use tileforge_store::{Attributes, NodeStore, OsmStore, WayStore};
use tileforge_tiles::tile_data_source::BuiltGeometry;
use tileforge_tiles::{IndexedLayers, TileDataSource};
use tileforge_workflow::PhasePool;

use crate::options::Options;
use crate::profile::{BuiltinProfileFactory, builtin_layers};

const BASE_ZOOM: u8 = 14;
/// Passes made over ways/relations in sharded low-memory mode.
const STORE_SHARDS: usize = 4;

pub fn run(options: &Options) -> Result<()> {
    let started = Instant::now();
    if options.merge {
        info!("--merge applies to archive outputs, which are written externally");
    }

    let source = PbfFileSource::open(&options.input)
        .with_context(|| format!("open {}", options.input.display()))?;
    debug!(
        config = %options.config.display(),
        process = %options.process.display(),
        store = ?options.store_path,
        compress_nodes = options.compress_nodes,
        compress_ways = options.compress_ways,
        "resolved options"
    );
    match (source.header().bbox, options.bbox) {
        (Some(b), _) => info!(bbox = ?b, "input declares a bounding box"),
        (None, Some(b)) => info!(bbox = ?b, "using bounding box from --bbox"),
        (None, None) => debug!("no bounding box declared"),
    }

    let nodes: Arc<dyn NodeStore> = if options.shard_stores {
        Arc::new(ShardedNodeStore::new(STORE_SHARDS))
    } else {
        Arc::new(BinarySearchNodeStore::new())
    };
    let ways: Arc<dyn WayStore> = if options.shard_stores {
        Arc::new(ShardedWayStore::new(STORE_SHARDS))
    } else if !options.materialize_geometries && !options.compact {
        // Lazy geometries: keep node ids and resolve on demand.
        Arc::new(NodeRefWayStore::new(
            Arc::clone(&nodes),
            !options.skip_integrity,
        ))
    } else {
        Arc::new(LatpLonWayStore::new())
    };
    let relations = Arc::new(BinarySearchRelationStore::new());

    let mut store = OsmStore::new(nodes, ways, relations);
    store.enforce_integrity(!options.skip_integrity);

    let mut tiles = TileDataSource::new(options.threads, BASE_ZOOM, true);
    if !options.materialize_geometries {
        tiles = tiles.with_osm_stores(Arc::clone(&store.nodes), Arc::clone(&store.ways));
    }

    let driver = PbfDriver {
        source: Arc::new(source),
        store: Arc::new(store),
        attributes: Arc::new(Attributes::new()),
        tiles: Arc::new(tiles),
        layers: Arc::new(builtin_layers()),
        indexed: Arc::new(IndexedLayers::new()),
        config: Arc::new(ProcessingConfig {
            project_name: "tileforge".to_string(),
            base_zoom: BASE_ZOOM,
            materialize_geometries: options.materialize_geometries,
            ..ProcessingConfig::default()
        }),
        factory: Arc::new(BuiltinProfileFactory),
        options: DriverOptions {
            shards: if options.shard_stores { STORE_SHARDS } else { 1 },
            compact: options.compact,
        },
    };

    let pool = PhasePool::new(options.threads);
    driver.run(&pool).map_err(anyhow::Error::from)?;

    let (points, lines, polygons) = driver.tiles.report_size();
    info!(
        points,
        lines,
        polygons,
        attribute_sets = driver.attributes.sets.len(),
        attribute_lookups = driver.attributes.sets.lookups(),
        elapsed = ?started.elapsed(),
        "read complete"
    );

    let mut sink = sink_for_path(&options.output)?;
    write_tiles(&driver, sink.as_mut(), options.log_tile_timings)?;
    sink.finish()?;
    info!(elapsed = ?started.elapsed(), output = %options.output.display(), "done");
    Ok(())
}

/// Enumerates every non-empty tile of every zoom and writes it through
/// the sink.
fn write_tiles(driver: &PbfDriver, sink: &mut dyn TileSink, log_timings: bool) -> Result<()> {
    for zoom in 0..=BASE_ZOOM {
        let mut coords = ahash::AHashSet::new();
        driver.tiles.collect_tiles_with_objects_at_zoom(zoom, &mut coords);
        driver
            .tiles
            .collect_tiles_with_large_objects_at_zoom(zoom, &mut coords);
        let mut coords: Vec<TileCoordinates> = coords.into_iter().collect();
        coords.sort();
        info!(zoom, tiles = coords.len(), "writing zoom level");

        for tile in coords {
            let tile_started = Instant::now();
            let data = encode_tile(driver, zoom, tile)?;
            sink.write_tile(zoom, tile, &data)?;
            if log_timings {
                info!(zoom, x = tile.x, y = tile.y, elapsed = ?tile_started.elapsed(), "tile written");
            }
        }
    }
    Ok(())
}

/// Debug tile encoding: a GeoJSON feature collection of the tile's
/// objects. The production vector-tile encoder is an external
/// collaborator replacing this function.
fn encode_tile(driver: &PbfDriver, zoom: u8, tile: TileCoordinates) -> Result<Vec<u8>> {
    let sort_orders = driver.layers.sort_orders();
    let objects = driver.tiles.get_objects_for_tile(&sort_orders, zoom, tile);
    let bbox = TileBbox::new(tile, zoom, zoom == BASE_ZOOM);

    let mut features = Vec::new();
    for entry in objects {
        let oo = entry.object;
        let built = match driver
            .tiles
            .build_way_geometry(oo.geom_type, oo.geometry_id, &bbox)
        {
            Ok(built) => built,
            Err(e) => {
                debug!(error = %e, "object dropped from tile");
                continue;
            }
        };
        if built.is_empty() {
            continue;
        }

        let mut properties = serde_json::Map::new();
        properties.insert(
            "$layer".to_string(),
            json!(driver.layers.get(oo.layer).name),
        );
        if entry.id != 0 {
            properties.insert("$id".to_string(), json!(entry.id));
        }
        for pair in driver.attributes.get_set(oo.attributes) {
            let key = driver.attributes.key_of(&pair);
            let value = match &pair.value {
                tileforge_store::AttributeValue::Bool(b) => json!(b),
                tileforge_store::AttributeValue::Float(f) => json!(f),
                tileforge_store::AttributeValue::String(s) => json!(s),
            };
            properties.insert(key.to_string(), value);
        }

        features.push(json!({
            "type": "Feature",
            "geometry": geometry_to_geojson(&built),
            "properties": properties,
        }));
    }

    let collection = json!({
        "type": "FeatureCollection",
        "features": features,
    });
    Ok(serde_json::to_vec(&collection)?)
}

fn geometry_to_geojson(built: &BuiltGeometry) -> serde_json::Value {
    match built {
        BuiltGeometry::Point(p) => json!({
            "type": "Point",
            "coordinates": [p.x(), latp_to_lat(p.y())],
        }),
        BuiltGeometry::MultiLinestring(mls) => json!({
            "type": "MultiLineString",
            "coordinates": mls.0.iter().map(|ls| line_coords(&ls.0)).collect::<Vec<_>>(),
        }),
        BuiltGeometry::MultiPolygon(mp) => json!({
            "type": "MultiPolygon",
            "coordinates": mp.0.iter().map(|poly| {
                std::iter::once(line_coords(&poly.exterior().0))
                    .chain(poly.interiors().iter().map(|r| line_coords(&r.0)))
                    .collect::<Vec<_>>()
            }).collect::<Vec<_>>(),
        }),
    }
}

fn line_coords(coords: &[geo_types::Coord<f64>]) -> Vec<[f64; 2]> {
    coords.iter().map(|c| [c.x, latp_to_lat(c.y)]).collect()
}
