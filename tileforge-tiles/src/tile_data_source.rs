//! The tile data source: routes finalized output objects into the tile
//! pyramid and rebuilds clipped geometry per tile on demand.
//!
//! Objects are bucketed by their z6 ancestor cell at the base zoom; within
//! a bucket each entry stores its `(dx, dy)` offsets from the cell origin
//! in 8 bits, which bounds the base zoom at 14. Polygons covering 16 or
//! more base-zoom tiles skip the per-tile buckets and live in an R-tree
//! keyed by their tile-space bounding box.

use std::sync::{Arc, Mutex};

use ahash::AHashSet;
use geo::BooleanOps;
use geo::orient::{Direction, Orient};
use geo_types::{Coord, LineString, MultiLineString, MultiPolygon, Point, Polygon, Rect};
use rstar::{AABB, RTree, RTreeObject};
use tracing::{debug, warn};

use tileforge_common::{Error, OsmEntity, Result};
use tileforge_geometry::clip::{clip_linestring, clip_multi_linestring, fast_clip};
use tileforge_geometry::correct::{ValidityFailure, check_validity, remove_spikes};
use tileforge_geometry::coverage::{cover_linestring, cover_ring};
use tileforge_geometry::{
    CLUSTER_ZOOM, CLUSTER_ZOOM_AREA, CLUSTER_ZOOM_WIDTH, TileBbox, TileCoordinates,
};
use tileforge_store::{NodeStore, WayStore};

use crate::clip_cache::ClipCache;
use crate::geometry_store::GeometryStore;
use crate::object_id::ObjectId;
use crate::output_object::{OutputGeometryType, OutputObject, OutputObjectWithId};

/// Base-zoom tile count at which a polygon moves to the R-tree.
const LARGE_OBJECT_TILE_COUNT: u32 = 16;

/// Geometry rebuilt for one tile.
#[derive(Debug, Clone, PartialEq)]
pub enum BuiltGeometry {
    Point(Point<f64>),
    MultiLinestring(MultiLineString<f64>),
    MultiPolygon(MultiPolygon<f64>),
}

impl BuiltGeometry {
    pub fn is_empty(&self) -> bool {
        match self {
            BuiltGeometry::Point(_) => false,
            BuiltGeometry::MultiLinestring(mls) => mls.0.is_empty(),
            BuiltGeometry::MultiPolygon(mp) => mp.0.is_empty(),
        }
    }
}

struct SmallEntry {
    object: OutputObject,
    x_off: u8,
    y_off: u8,
}

struct SmallEntryWithId {
    object: OutputObject,
    x_off: u8,
    y_off: u8,
    id: u64,
}

struct LargeEntry {
    envelope: AABB<[f64; 2]>,
    object: OutputObject,
    id: u64,
}

impl RTreeObject for LargeEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

pub struct TileDataSource {
    base_zoom: u8,
    include_ids: bool,
    z6_offset_divisor: u32,
    objects: Vec<Mutex<Vec<SmallEntry>>>,
    objects_with_ids: Vec<Mutex<Vec<SmallEntryWithId>>>,
    large: Mutex<RTree<LargeEntry>>,
    geometries: GeometryStore,
    clip_cache: ClipCache,
    osm_nodes: Option<Arc<dyn NodeStore>>,
    osm_ways: Option<Arc<dyn WayStore>>,
}

impl TileDataSource {
    /// Creates a source producing tiles down to `base_zoom` (at most 14,
    /// the deepest zoom the 8-bit cell offsets can address).
    pub fn new(threads: usize, base_zoom: u8, include_ids: bool) -> TileDataSource {
        assert!(base_zoom >= CLUSTER_ZOOM && base_zoom <= 14);
        TileDataSource {
            base_zoom,
            include_ids,
            z6_offset_divisor: 1 << (base_zoom - CLUSTER_ZOOM),
            objects: (0..CLUSTER_ZOOM_AREA).map(|_| Mutex::new(Vec::new())).collect(),
            objects_with_ids: (0..CLUSTER_ZOOM_AREA).map(|_| Mutex::new(Vec::new())).collect(),
            large: Mutex::new(RTree::new()),
            geometries: GeometryStore::new(),
            clip_cache: ClipCache::new(threads, base_zoom),
            osm_nodes: None,
            osm_ways: None,
        }
    }

    /// Attaches the entity stores used to rebuild OSM-tagged geometry ids
    /// (the lazy-geometries mode).
    pub fn with_osm_stores(
        mut self,
        nodes: Arc<dyn NodeStore>,
        ways: Arc<dyn WayStore>,
    ) -> TileDataSource {
        self.osm_nodes = Some(nodes);
        self.osm_ways = Some(ways);
        self
    }

    pub fn base_zoom(&self) -> u8 {
        self.base_zoom
    }

    pub fn include_ids(&self) -> bool {
        self.include_ids
    }

    // ---- geometry interning

    pub fn store_point(&self, p: Point<f64>) -> ObjectId {
        ObjectId::interned(self.geometries.store_point(p))
    }

    pub fn store_linestring(&self, ls: LineString<f64>) -> ObjectId {
        ObjectId::interned(self.geometries.store_linestring(ls))
    }

    pub fn store_multi_linestring(&self, mls: MultiLineString<f64>) -> ObjectId {
        ObjectId::interned(self.geometries.store_multi_linestring(mls))
    }

    pub fn store_multi_polygon(&self, mp: MultiPolygon<f64>) -> ObjectId {
        ObjectId::interned(self.geometries.store_multi_polygon(mp))
    }

    // ---- indexing

    /// Files one object under the base-zoom tile `index`.
    pub fn add_object_to_small_index(&self, index: TileCoordinates, object: OutputObject, id: u64) {
        let z6x = index.x / self.z6_offset_divisor;
        let z6y = index.y / self.z6_offset_divisor;
        if z6x >= CLUSTER_ZOOM_WIDTH || z6y >= CLUSTER_ZOOM_WIDTH {
            warn!(x = index.x, y = index.y, id, "object outside the tile grid ignored");
            return;
        }
        let cell = (z6x * CLUSTER_ZOOM_WIDTH + z6y) as usize;
        let x_off = (index.x - z6x * self.z6_offset_divisor) as u8;
        let y_off = (index.y - z6y * self.z6_offset_divisor) as u8;

        if id == 0 || !self.include_ids {
            self.objects[cell].lock().unwrap().push(SmallEntry {
                object,
                x_off,
                y_off,
            });
        } else {
            self.objects_with_ids[cell].lock().unwrap().push(SmallEntryWithId {
                object,
                x_off,
                y_off,
                id,
            });
        }
    }

    fn add_object_to_large_index(
        &self,
        min: TileCoordinates,
        max: TileCoordinates,
        object: OutputObject,
        id: u64,
    ) {
        let entry = LargeEntry {
            envelope: AABB::from_corners(
                [f64::from(min.x), f64::from(min.y)],
                [f64::from(max.x), f64::from(max.y)],
            ),
            object,
            id: if self.include_ids { id } else { 0 },
        };
        self.large.lock().unwrap().insert(entry);
    }

    /// Indexes the outputs of a way-shaped geometry: linework goes to
    /// every covered tile; polygon outputs additionally fill the ring
    /// interior, or move to the R-tree past the large-object threshold.
    pub fn add_linestring_to_index(&self, ls: &LineString<f64>, outputs: &[OutputObject], id: u64) {
        let mut tile_set = AHashSet::new();
        cover_linestring(ls, self.base_zoom, &mut tile_set);
        if tile_set.is_empty() {
            return;
        }

        let mut has_polygon = false;
        for &tile in &tile_set {
            for output in outputs {
                if output.geom_type == OutputGeometryType::Polygon {
                    has_polygon = true;
                    continue;
                }
                self.add_object_to_small_index(tile, *output, id);
            }
        }

        if has_polygon {
            let (min, max) = tile_bounds(&tile_set);
            let size = (max.x - min.x + 1) * (max.y - min.y + 1);
            let mut filled = None;
            for output in outputs {
                if output.geom_type != OutputGeometryType::Polygon {
                    continue;
                }
                if size >= LARGE_OBJECT_TILE_COUNT {
                    self.add_object_to_large_index(min, max, *output, id);
                } else {
                    let filled = filled.get_or_insert_with(|| {
                        let mut filled = AHashSet::new();
                        cover_ring(ls, self.base_zoom, &mut filled);
                        filled
                    });
                    for &tile in filled.iter() {
                        self.add_object_to_small_index(tile, *output, id);
                    }
                }
            }
        }
    }

    /// Indexes the outputs of a multilinestring: every member's covered
    /// tiles receive every output.
    pub fn add_multi_linestring_to_index(
        &self,
        mls: &MultiLineString<f64>,
        outputs: &[OutputObject],
        id: u64,
    ) {
        for ls in &mls.0 {
            let mut tile_set = AHashSet::new();
            cover_linestring(ls, self.base_zoom, &mut tile_set);
            for &tile in &tile_set {
                for output in outputs {
                    self.add_object_to_small_index(tile, *output, id);
                }
            }
        }
    }

    /// Indexes the outputs of a multipolygon over its filled coverage.
    pub fn add_multi_polygon_to_index(
        &self,
        mp: &MultiPolygon<f64>,
        outputs: &[OutputObject],
        id: u64,
    ) {
        let mut tile_set = AHashSet::new();
        for poly in &mp.0 {
            cover_ring(poly.exterior(), self.base_zoom, &mut tile_set);
        }
        if tile_set.is_empty() {
            return;
        }
        let (min, max) = tile_bounds(&tile_set);
        for output in outputs {
            if tile_set.len() as u32 >= LARGE_OBJECT_TILE_COUNT {
                // The envelope of the whole multipolygon; disjoint outers
                // make this an overestimate the per-tile clip absorbs.
                self.add_object_to_large_index(min, max, *output, id);
            } else {
                for &tile in &tile_set {
                    self.add_object_to_small_index(tile, *output, id);
                }
            }
        }
    }

    // ---- enumeration

    /// Adds every tile holding at least one object, converted to `zoom`.
    pub fn collect_tiles_with_objects_at_zoom(
        &self,
        zoom: u8,
        output: &mut AHashSet<TileCoordinates>,
    ) {
        debug_assert!(zoom <= self.base_zoom);
        let shift = self.base_zoom - zoom;
        for cell in 0..CLUSTER_ZOOM_AREA {
            let z6x = cell as u32 / CLUSTER_ZOOM_WIDTH;
            let z6y = cell as u32 % CLUSTER_ZOOM_WIDTH;
            for entry in self.objects[cell].lock().unwrap().iter() {
                output.insert(self.tile_at(z6x, z6y, entry.x_off, entry.y_off).ancestor(shift));
            }
            for entry in self.objects_with_ids[cell].lock().unwrap().iter() {
                output.insert(self.tile_at(z6x, z6y, entry.x_off, entry.y_off).ancestor(shift));
            }
        }
    }

    /// Adds every tile covered by a large object, converted to `zoom`.
    pub fn collect_tiles_with_large_objects_at_zoom(
        &self,
        zoom: u8,
        output: &mut AHashSet<TileCoordinates>,
    ) {
        let shift = self.base_zoom - zoom;
        for entry in self.large.lock().unwrap().iter() {
            let min_x = (entry.envelope.lower()[0] as u32) >> shift;
            let min_y = (entry.envelope.lower()[1] as u32) >> shift;
            let max_x = (entry.envelope.upper()[0] as u32) >> shift;
            let max_y = (entry.envelope.upper()[1] as u32) >> shift;
            for x in min_x..=max_x {
                for y in min_y..=max_y {
                    output.insert(TileCoordinates::new(x, y));
                }
            }
        }
    }

    /// Collects the small-index objects visible in `dst` at `zoom`.
    pub fn collect_objects_for_tile(
        &self,
        zoom: u8,
        dst: TileCoordinates,
        output: &mut Vec<OutputObjectWithId>,
    ) {
        debug_assert!(zoom <= self.base_zoom);
        let shift = self.base_zoom - zoom;
        let cells: std::ops::Range<usize> = if zoom >= CLUSTER_ZOOM {
            let z6x = dst.x >> (zoom - CLUSTER_ZOOM);
            let z6y = dst.y >> (zoom - CLUSTER_ZOOM);
            if z6x >= CLUSTER_ZOOM_WIDTH || z6y >= CLUSTER_ZOOM_WIDTH {
                debug!(zoom, x = dst.x, y = dst.y, "tile outside the grid");
                return;
            }
            let cell = (z6x * CLUSTER_ZOOM_WIDTH + z6y) as usize;
            cell..cell + 1
        } else {
            0..CLUSTER_ZOOM_AREA
        };

        for cell in cells {
            let z6x = cell as u32 / CLUSTER_ZOOM_WIDTH;
            let z6y = cell as u32 % CLUSTER_ZOOM_WIDTH;
            for entry in self.objects[cell].lock().unwrap().iter() {
                if entry.object.min_zoom > zoom {
                    continue;
                }
                if self.tile_at(z6x, z6y, entry.x_off, entry.y_off).ancestor(shift) == dst {
                    output.push(OutputObjectWithId {
                        object: entry.object,
                        id: 0,
                    });
                }
            }
            for entry in self.objects_with_ids[cell].lock().unwrap().iter() {
                if entry.object.min_zoom > zoom {
                    continue;
                }
                if self.tile_at(z6x, z6y, entry.x_off, entry.y_off).ancestor(shift) == dst {
                    output.push(OutputObjectWithId {
                        object: entry.object,
                        id: entry.id,
                    });
                }
            }
        }
    }

    /// Collects the large-index objects whose envelope intersects `dst`.
    pub fn collect_large_objects_for_tile(
        &self,
        zoom: u8,
        dst: TileCoordinates,
        output: &mut Vec<OutputObjectWithId>,
    ) {
        let scale = 1u32 << (self.base_zoom - zoom);
        let envelope = AABB::from_corners(
            [f64::from(dst.x * scale), f64::from(dst.y * scale)],
            [
                f64::from((dst.x + 1) * scale - 1),
                f64::from((dst.y + 1) * scale - 1),
            ],
        );
        let large = self.large.lock().unwrap();
        for entry in large.locate_in_envelope_intersecting(&envelope) {
            if entry.object.min_zoom <= zoom {
                output.push(OutputObjectWithId {
                    object: entry.object,
                    id: entry.id,
                });
            }
        }
    }

    /// The sorted, deduplicated object list of one tile.
    ///
    /// Ordering is lexicographic on `(layer, z-order, geometry type,
    /// attribute set, geometry id)`, with `sort_orders[layer]` choosing
    /// ascending z-order when true and descending otherwise. Attributes
    /// sort before the geometry id so that objects differing only in
    /// geometry merge downstream.
    pub fn get_objects_for_tile(
        &self,
        sort_orders: &[bool],
        zoom: u8,
        dst: TileCoordinates,
    ) -> Vec<OutputObjectWithId> {
        let mut data = Vec::new();
        self.collect_objects_for_tile(zoom, dst, &mut data);
        self.collect_large_objects_for_tile(zoom, dst, &mut data);

        data.sort_by(|x, y| {
            let xo = &x.object;
            let yo = &y.object;
            xo.layer
                .cmp(&yo.layer)
                .then_with(|| {
                    let ord = xo.z_order.cmp(&yo.z_order);
                    if sort_orders.get(xo.layer as usize).copied().unwrap_or(true) {
                        ord
                    } else {
                        ord.reverse()
                    }
                })
                .then(xo.geom_type.cmp(&yo.geom_type))
                .then(xo.attributes.cmp(&yo.attributes))
                .then(xo.geometry_id.cmp(&yo.geometry_id))
                .then(x.id.cmp(&y.id))
        });
        data.dedup();
        data
    }

    // ---- geometry building

    /// The position of a point object in a tile.
    pub fn build_node_geometry(&self, object_id: ObjectId) -> Result<Point<f64>> {
        self.build_point(object_id)
    }

    fn build_point(&self, object_id: ObjectId) -> Result<Point<f64>> {
        if object_id.is_interned() {
            return Ok(self.geometries.point(object_id.0));
        }
        match object_id.osm_entity() {
            Some(OsmEntity::Node) => {
                let nodes = self.osm_nodes.as_ref().ok_or_else(|| {
                    Error::geometry("node-tagged geometry id without a node store")
                })?;
                Ok(nodes.at(object_id.low_bits())?.to_point())
            }
            _ => Err(Error::geometry(format!(
                "object {} is not a point",
                object_id.0
            ))),
        }
    }

    fn build_linestring(&self, object_id: ObjectId) -> Result<LineString<f64>> {
        if object_id.is_interned() {
            return Ok(self.geometries.linestring(object_id.0));
        }
        match object_id.osm_entity() {
            Some(OsmEntity::Way) => {
                let ways = self.osm_ways.as_ref().ok_or_else(|| {
                    Error::geometry("way-tagged geometry id without a way store")
                })?;
                let lls = ways.at(object_id.low_bits())?;
                Ok(LineString::new(
                    lls.iter()
                        .map(|ll| Coord::from((ll.lon_degrees(), ll.latp_degrees())))
                        .collect(),
                ))
            }
            _ => Err(Error::geometry(format!(
                "object {} is not a linestring",
                object_id.0
            ))),
        }
    }

    fn build_multi_linestring(&self, object_id: ObjectId) -> Result<MultiLineString<f64>> {
        if object_id.is_interned() {
            return Ok(self.geometries.multi_linestring(object_id.0));
        }
        Err(Error::geometry(format!(
            "object {} is not a multilinestring",
            object_id.0
        )))
    }

    fn build_multi_polygon(&self, object_id: ObjectId) -> Result<MultiPolygon<f64>> {
        if object_id.is_interned() {
            return Ok(self.geometries.multi_polygon(object_id.0));
        }
        match object_id.osm_entity() {
            Some(OsmEntity::Way) => {
                let mut ring = self.build_linestring(object_id)?;
                ring.close();
                Ok(MultiPolygon::new(vec![Polygon::new(ring, vec![])]))
            }
            _ => Err(Error::geometry(format!(
                "object {} cannot rebuild a multipolygon",
                object_id.0
            ))),
        }
    }

    /// Rebuilds an object's geometry clipped and corrected for one tile.
    ///
    /// Polygons consult the clip cache for the nearest ancestor's clipped
    /// result, use it as input, and cache their own result below the base
    /// zoom.
    pub fn build_way_geometry(
        &self,
        geom_type: OutputGeometryType,
        object_id: ObjectId,
        bbox: &TileBbox,
    ) -> Result<BuiltGeometry> {
        match geom_type {
            OutputGeometryType::Point => {
                let p = self.build_point(object_id)?;
                let clip = bbox.clipping_box();
                if p.x() >= clip.min().x
                    && p.x() <= clip.max().x
                    && p.y() >= clip.min().y
                    && p.y() <= clip.max().y
                {
                    Ok(BuiltGeometry::Point(p))
                } else {
                    Ok(BuiltGeometry::MultiLinestring(MultiLineString::new(vec![])))
                }
            }

            OutputGeometryType::Linestring => {
                let ls = self.build_linestring(object_id)?;
                if ls.0.is_empty() {
                    return Ok(BuiltGeometry::MultiLinestring(MultiLineString::new(vec![])));
                }
                Ok(BuiltGeometry::MultiLinestring(clip_linestring(
                    &ls,
                    &bbox.extend_box(),
                )))
            }

            OutputGeometryType::MultiLinestring => {
                let mls = self.build_multi_linestring(object_id)?;
                Ok(BuiltGeometry::MultiLinestring(clip_multi_linestring(
                    &mls,
                    &bbox.extend_box(),
                )))
            }

            OutputGeometryType::Polygon => self.build_polygon_for_tile(object_id, bbox),
        }
    }

    fn build_polygon_for_tile(
        &self,
        object_id: ObjectId,
        bbox: &TileBbox,
    ) -> Result<BuiltGeometry> {
        let cached = self
            .clip_cache
            .get(bbox.zoom, bbox.index.x, bbox.index.y, object_id);
        let input: MultiPolygon<f64> = match cached {
            Some(mp) => (*mp).clone(),
            None => self.build_multi_polygon(object_id)?,
        };

        let mut clip_box = bbox.clipping_box();
        if bbox.end_zoom {
            widen_box_for_edges(&mut clip_box, &input, &bbox.clipping_box());
            clip_box = intersect_rects(&clip_box, &bbox.extend_box());
        }

        let mut mp = input.clone();
        fast_clip(&mut mp, &clip_box);
        mp = mp.orient(Direction::Default);

        match check_validity(&mp) {
            None => {}
            Some(ValidityFailure::Spikes) => {
                remove_spikes(&mut mp);
            }
            Some(ValidityFailure::SelfIntersection) => {
                // The fast clip produced a self-intersection; redo the
                // clip with the exact boolean intersection.
                let clip_mp = MultiPolygon::new(vec![rect_polygon(&clip_box)]);
                let mut output = input.intersection(&clip_mp);
                output = output.orient(Direction::Default);
                self.clip_cache.add(bbox, object_id, &output);
                return Ok(BuiltGeometry::MultiPolygon(output));
            }
        }

        self.clip_cache.add(bbox, object_id, &mp);
        Ok(BuiltGeometry::MultiPolygon(mp))
    }

    /// The clip cache, for ancestor-probe introspection.
    pub fn clip_cache(&self) -> &ClipCache {
        &self.clip_cache
    }

    /// Sorts the id-tagged buckets by id, for stable downstream encoding.
    pub fn finalize(&self) {
        for bucket in &self.objects_with_ids {
            bucket.lock().unwrap().sort_by_key(|e| e.id);
        }
    }

    /// Stored geometry counts `(points, lines, polygons)`.
    pub fn report_size(&self) -> (usize, usize, usize) {
        self.geometries.counts()
    }

    fn tile_at(&self, z6x: u32, z6y: u32, x_off: u8, y_off: u8) -> TileCoordinates {
        TileCoordinates::new(
            z6x * self.z6_offset_divisor + u32::from(x_off),
            z6y * self.z6_offset_divisor + u32::from(y_off),
        )
    }
}

fn tile_bounds(tiles: &AHashSet<TileCoordinates>) -> (TileCoordinates, TileCoordinates) {
    let mut min = TileCoordinates::new(u32::MAX, u32::MAX);
    let mut max = TileCoordinates::new(0, 0);
    for t in tiles {
        min.x = min.x.min(t.x);
        min.y = min.y.min(t.y);
        max.x = max.x.max(t.x);
        max.y = max.y.max(t.y);
    }
    (min, max)
}

/// At the deepest generated zoom, rings crossing the tile edge widen the
/// clip box to include both endpoints of every crossing segment, so the
/// clipped shape keeps the crossing slope instead of a stairstep.
fn widen_box_for_edges(clip_box: &mut Rect<f64>, mp: &MultiPolygon<f64>, tile_box: &Rect<f64>) {
    let mut widen = |ring: &LineString<f64>| {
        for seg in ring.0.windows(2) {
            let in0 = rect_contains(tile_box, seg[0]);
            let in1 = rect_contains(tile_box, seg[1]);
            if in0 != in1 {
                let min = clip_box.min();
                let max = clip_box.max();
                clip_box.set_min(Coord {
                    x: min.x.min(seg[0].x).min(seg[1].x),
                    y: min.y.min(seg[0].y).min(seg[1].y),
                });
                clip_box.set_max(Coord {
                    x: max.x.max(seg[0].x).max(seg[1].x),
                    y: max.y.max(seg[0].y).max(seg[1].y),
                });
            }
        }
    };
    for poly in &mp.0 {
        widen(poly.exterior());
        for inner in poly.interiors() {
            widen(inner);
        }
    }
}

fn rect_contains(rect: &Rect<f64>, c: Coord<f64>) -> bool {
    c.x >= rect.min().x && c.x <= rect.max().x && c.y >= rect.min().y && c.y <= rect.max().y
}

fn intersect_rects(a: &Rect<f64>, b: &Rect<f64>) -> Rect<f64> {
    Rect::new(
        Coord {
            x: a.min().x.max(b.min().x),
            y: a.min().y.max(b.min().y),
        },
        Coord {
            x: a.max().x.min(b.max().x),
            y: a.max().y.min(b.max().y),
        },
    )
}

fn rect_polygon(rect: &Rect<f64>) -> Polygon<f64> {
    rect.to_polygon()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tileforge_geometry::coordinates::lat_to_latp;
    use tileforge_store::AttributeSetIndex;

    fn source() -> TileDataSource {
        TileDataSource::new(2, 14, true)
    }

    fn object(
        geom_type: OutputGeometryType,
        layer: u16,
        geometry_id: ObjectId,
        attributes: AttributeSetIndex,
    ) -> OutputObject {
        let mut oo = OutputObject::new(geom_type, layer, geometry_id, 0);
        oo.set_attributes(attributes);
        oo
    }

    fn square_ring(lat0: f64, lon0: f64, lat1: f64, lon1: f64) -> LineString<f64> {
        LineString::from(vec![
            (lon0, lat_to_latp(lat0)),
            (lon1, lat_to_latp(lat0)),
            (lon1, lat_to_latp(lat1)),
            (lon0, lat_to_latp(lat1)),
            (lon0, lat_to_latp(lat0)),
        ])
    }

    #[test]
    fn test_point_round_trip() {
        let source = source();
        let ll = tileforge_geometry::LatpLon::from_degrees(51.5, -0.1);
        let gid = source.store_point(ll.to_point());
        let oo = object(OutputGeometryType::Point, 0, gid, 1);
        let tile = ll.tile_at_zoom(14);
        source.add_object_to_small_index(tile, oo, 42);

        let mut tiles = AHashSet::new();
        source.collect_tiles_with_objects_at_zoom(14, &mut tiles);
        assert_eq!(tiles.len(), 1);
        assert!(tiles.contains(&tile));

        let objects = source.get_objects_for_tile(&[], 14, tile);
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].id, 42);

        let bbox = TileBbox::new(tile, 14, true);
        let built = source
            .build_way_geometry(OutputGeometryType::Point, gid, &bbox)
            .unwrap();
        assert!(matches!(built, BuiltGeometry::Point(_)));

        // At a coarser zoom the object is in the ancestor tile.
        let mut tiles = AHashSet::new();
        source.collect_tiles_with_objects_at_zoom(10, &mut tiles);
        assert!(tiles.contains(&tile.ancestor(4)));
    }

    #[test]
    fn test_min_zoom_filters_objects() {
        let source = source();
        let ll = tileforge_geometry::LatpLon::from_degrees(10.0, 10.0);
        let gid = source.store_point(ll.to_point());
        let mut oo = object(OutputGeometryType::Point, 0, gid, 1);
        oo.set_min_zoom(12);
        let tile = ll.tile_at_zoom(14);
        source.add_object_to_small_index(tile, oo, 0);

        assert!(source.get_objects_for_tile(&[], 10, tile.ancestor(4)).is_empty());
        assert_eq!(source.get_objects_for_tile(&[], 12, tile.ancestor(2)).len(), 1);
    }

    #[test]
    fn test_small_polygon_fills_tiles() {
        let source = source();
        // About 2x2 tiles at z14: stays in the small index.
        let ring = square_ring(0.0, 0.0, 0.04, 0.04);
        let gid = source.store_multi_polygon(MultiPolygon::new(vec![Polygon::new(
            ring.clone(),
            vec![],
        )]));
        let oo = object(OutputGeometryType::Polygon, 0, gid, 1);
        source.add_linestring_to_index(&ring, &[oo], 7);

        let mut tiles = AHashSet::new();
        source.collect_tiles_with_objects_at_zoom(14, &mut tiles);
        assert!(tiles.len() >= 4);
        let mut large_tiles = AHashSet::new();
        source.collect_tiles_with_large_objects_at_zoom(14, &mut large_tiles);
        assert!(large_tiles.is_empty());
    }

    #[test]
    fn test_large_polygon_goes_to_rtree() {
        let source = source();
        // About 10x10 tiles at z14: past the large-object threshold.
        let ring = square_ring(0.0, 0.0, 0.2, 0.2);
        let gid = source.store_multi_polygon(MultiPolygon::new(vec![Polygon::new(
            ring.clone(),
            vec![],
        )]));
        let oo = object(OutputGeometryType::Polygon, 0, gid, 1);
        source.add_linestring_to_index(&ring, &[oo], 7);

        let mut small = AHashSet::new();
        source.collect_tiles_with_objects_at_zoom(14, &mut small);
        assert!(small.is_empty());
        let mut large = AHashSet::new();
        source.collect_tiles_with_large_objects_at_zoom(14, &mut large);
        assert!(large.len() as u32 >= LARGE_OBJECT_TILE_COUNT);

        // The tile in the middle of the square sees the object.
        let center = tileforge_geometry::LatpLon::from_degrees(0.1, 0.1).tile_at_zoom(14);
        let objects = source.get_objects_for_tile(&[], 14, center);
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].id, 7);
    }

    #[test]
    fn test_sort_and_dedupe() {
        let source = source();
        let ll = tileforge_geometry::LatpLon::from_degrees(1.0, 1.0);
        let tile = ll.tile_at_zoom(14);
        let gid = source.store_point(ll.to_point());

        let mut a = object(OutputGeometryType::Point, 1, gid, 5);
        a.set_z_order(3);
        let mut b = object(OutputGeometryType::Point, 0, gid, 9);
        b.set_z_order(1);
        let duplicate = a;

        source.add_object_to_small_index(tile, a, 1);
        source.add_object_to_small_index(tile, b, 2);
        source.add_object_to_small_index(tile, duplicate, 1);

        let objects = source.get_objects_for_tile(&[true, true], 14, tile);
        // The duplicate collapses; layer 0 sorts first.
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].object.layer, 0);
        assert_eq!(objects[1].object.layer, 1);
    }

    #[test]
    fn test_z_order_direction_bit() {
        let source = source();
        let ll = tileforge_geometry::LatpLon::from_degrees(1.0, 1.0);
        let tile = ll.tile_at_zoom(14);
        let gid = source.store_point(ll.to_point());

        let mut low = object(OutputGeometryType::Point, 0, gid, 1);
        low.set_z_order(-5);
        let mut high = object(OutputGeometryType::Point, 0, gid, 2);
        high.set_z_order(5);
        source.add_object_to_small_index(tile, low, 0);
        source.add_object_to_small_index(tile, high, 0);

        let ascending = source.get_objects_for_tile(&[true], 14, tile);
        assert_eq!(ascending[0].object.z_order, -5);
        let descending = source.get_objects_for_tile(&[false], 14, tile);
        assert_eq!(descending[0].object.z_order, 5);
    }

    #[test]
    fn test_polygon_clip_uses_cache_below_base_zoom() {
        let source = source();
        let ring = square_ring(0.0, 0.0, 0.1, 0.1);
        let gid = source.store_multi_polygon(MultiPolygon::new(vec![Polygon::new(ring, vec![])]));

        let tile = tileforge_geometry::LatpLon::from_degrees(0.05, 0.05).tile_at_zoom(10);
        let bbox = TileBbox::new(tile, 10, false);
        let built = source
            .build_way_geometry(OutputGeometryType::Polygon, gid, &bbox)
            .unwrap();
        assert!(matches!(built, BuiltGeometry::MultiPolygon(_)));

        // A descendant tile now hits the cached ancestor clip.
        let child = TileCoordinates::new(tile.x * 2, tile.y * 2);
        assert!(source.clip_cache.get(11, child.x, child.y, gid).is_some());
    }

    #[test]
    fn test_linestring_clipped_to_tile() {
        let source = source();
        // A long west-east line across several tiles.
        let ls = LineString::from(vec![
            (0.0, lat_to_latp(0.005)),
            (0.5, lat_to_latp(0.005)),
        ]);
        let gid = source.store_linestring(ls);
        let tile = tileforge_geometry::LatpLon::from_degrees(0.005, 0.25).tile_at_zoom(14);
        let bbox = TileBbox::new(tile, 14, true);
        let built = source
            .build_way_geometry(OutputGeometryType::Linestring, gid, &bbox)
            .unwrap();
        match built {
            BuiltGeometry::MultiLinestring(mls) => {
                assert_eq!(mls.0.len(), 1);
                let extend = bbox.extend_box();
                for c in &mls.0[0].0 {
                    assert!(c.x >= extend.min().x - 1e-9 && c.x <= extend.max().x + 1e-9);
                }
            }
            other => panic!("expected linework, got {other:?}"),
        }
    }
}
