//! Per-worker entity processing: binds one OSM entity at a time to the
//! user profile, collects its layer emissions, finalizes them into
//! attribute-set ids and forwards the outputs to the tile data source.
//!
//! Each worker owns one [`Processing`] (and with it one profile runtime),
//! so nothing here is shared across threads. Per entity, a transient
//! [`Feature`] exposes the profile-facing callback surface; geometry
//! views are built lazily and cached for the duration of the entity.

use geo::{Centroid, Haversine, Length, MapCoords};
use geo_types::{
    Coord, Geometry, LineString, MultiLineString, MultiPolygon, Point, Polygon,
};
use tracing::debug;

use tileforge_common::{Error, OsmEntity, Result};
use tileforge_geometry::correct::{correct_linestring, correct_multi_polygon};
use tileforge_geometry::coordinates::latp_to_lat;
use tileforge_geometry::polylabel::polylabel;
use tileforge_geometry::LatpLon;
use tileforge_store::{
    AttributeSet, AttributeValue, Attributes, NodeId, OsmStore, RelationId, TagView, WayId,
};
use tileforge_tiles::indexed_layers::spherical_area;
use tileforge_tiles::{
    IndexedLayers, ObjectId, OutputGeometryType, OutputObject, TileDataSource,
};

use crate::layers::Layers;
use crate::runtime::{ScriptRuntime, ScriptRuntimeFactory};

/// How `Centroid` picks its point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CentroidAlgorithm {
    /// Geometric centroid.
    #[default]
    Centroid,
    /// Pole of inaccessibility, deterministic to the configured
    /// precision.
    PoleOfInaccessibility,
}

/// Run-wide processing configuration.
pub struct ProcessingConfig {
    pub project_name: String,
    pub base_zoom: u8,
    /// When false (lazy geometries), node and way emissions reference the
    /// entity stores instead of copying geometry into the tile source.
    pub materialize_geometries: bool,
    pub centroid_algorithm: CentroidAlgorithm,
    /// Precision of the pole-of-inaccessibility search, in coordinate
    /// degrees.
    pub polylabel_precision: f64,
}

impl Default for ProcessingConfig {
    fn default() -> ProcessingConfig {
        ProcessingConfig {
            project_name: String::new(),
            base_zoom: 14,
            materialize_geometries: true,
            centroid_algorithm: CentroidAlgorithm::Centroid,
            polylabel_precision: 1e-5,
        }
    }
}

/// Read-only references shared by every worker's processing object.
#[derive(Clone, Copy)]
pub struct Shared<'run> {
    pub store: &'run OsmStore,
    pub attributes: &'run Attributes,
    pub tiles: &'run TileDataSource,
    pub layers: &'run Layers,
    pub indexed: &'run IndexedLayers,
    pub config: &'run ProcessingConfig,
}

enum FeatureGeometry<'e> {
    Node {
        id: NodeId,
        ll: LatpLon,
    },
    Way {
        id: WayId,
        lls: &'e [LatpLon],
    },
    Relation {
        id: RelationId,
        outers: &'e [WayId],
        inners: &'e [WayId],
        closed: bool,
    },
}

/// The per-entity view handed to the profile callbacks: metadata and tag
/// queries, spatial queries, geometry measures and the emission surface.
pub struct Feature<'e> {
    shared: Shared<'e>,
    geometry: FeatureGeometry<'e>,
    tags: TagView<'e>,
    outputs: Vec<(OutputObject, AttributeSet)>,
    relation_list: Vec<RelationId>,
    relation_pos: Option<usize>,
    relation_accepted: bool,
    last_geometry: Option<(OutputGeometryType, ObjectId)>,
    linestring_cache: Option<LineString<f64>>,
    multi_linestring_cache: Option<MultiLineString<f64>>,
    multi_polygon_cache: Option<MultiPolygon<f64>>,
}

impl<'e> Feature<'e> {
    fn new(
        shared: Shared<'e>,
        geometry: FeatureGeometry<'e>,
        tags: TagView<'e>,
        relation_list: Vec<RelationId>,
    ) -> Feature<'e> {
        Feature {
            shared,
            geometry,
            tags,
            outputs: Vec::new(),
            relation_list,
            relation_pos: None,
            relation_accepted: false,
            last_geometry: None,
            linestring_cache: None,
            multi_linestring_cache: None,
            multi_polygon_cache: None,
        }
    }

    fn entity(&self) -> (OsmEntity, u64) {
        match &self.geometry {
            FeatureGeometry::Node { id, .. } => (OsmEntity::Node, *id),
            FeatureGeometry::Way { id, .. } => (OsmEntity::Way, *id),
            FeatureGeometry::Relation { id, .. } => (OsmEntity::Relation, *id),
        }
    }

    fn script_error(&self, message: impl Into<String>) -> Error {
        let (entity, id) = self.entity();
        Error::script(entity, id, message)
    }

    // ---- metadata and tag queries

    /// The current object's OSM id.
    pub fn id(&self) -> u64 {
        self.entity().1
    }

    /// Whether the object carries the tag `key`.
    pub fn holds(&self, key: &str) -> bool {
        self.tags.find_key(key.as_bytes()).is_some()
    }

    /// The value of `key`, or the empty string.
    pub fn find(&self, key: &str) -> &'e str {
        match self.tags.find_key(key.as_bytes()) {
            Some(slot) => self.tags.value(slot),
            None => "",
        }
    }

    /// Whether the object is a closed way (or ring relation).
    pub fn is_closed(&self) -> bool {
        match &self.geometry {
            FeatureGeometry::Node { .. } => false,
            FeatureGeometry::Way { lls, .. } => {
                !lls.is_empty() && lls.first() == lls.last()
            }
            FeatureGeometry::Relation { closed, .. } => *closed,
        }
    }

    // ---- spatial queries against the indexed layers

    pub fn intersects(&mut self, layer: &str) -> Result<bool> {
        let geom = self.query_geometry()?;
        Ok(self.shared.indexed.intersects(layer, &geom))
    }

    pub fn find_intersecting(&mut self, layer: &str) -> Result<Vec<String>> {
        let geom = self.query_geometry()?;
        Ok(self.shared.indexed.names_intersecting(layer, &geom))
    }

    pub fn covered_by(&mut self, layer: &str) -> Result<bool> {
        let geom = self.query_geometry()?;
        Ok(self.shared.indexed.covered_by(layer, &geom))
    }

    pub fn find_covering(&mut self, layer: &str) -> Result<Vec<String>> {
        let geom = self.query_geometry()?;
        Ok(self.shared.indexed.names_covering(layer, &geom))
    }

    /// Spherical area (m²) of the intersection between this (closed)
    /// object and the named layer's polygons.
    pub fn area_intersecting(&mut self, layer: &str) -> Result<f64> {
        if !self.is_closed() {
            return Ok(0.0);
        }
        let mp = self.closed_multi_polygon()?;
        Ok(self.shared.indexed.area_intersecting(layer, &mp))
    }

    // ---- geometry measures

    /// Spherical area in m²; 0 for anything that is not a closed shape.
    pub fn area(&mut self) -> Result<f64> {
        if !self.is_closed() {
            return Ok(0.0);
        }
        let mp = self.closed_multi_polygon()?;
        Ok(spherical_area(&mp))
    }

    /// Haversine length in meters; 0 for nodes and closed shapes'
    /// relations.
    pub fn length(&mut self) -> Result<f64> {
        match &self.geometry {
            FeatureGeometry::Way { .. } => {
                let ls = self.linestring()?.clone();
                let unprojected = ls.map_coords(|c| Coord {
                    x: c.x,
                    y: latp_to_lat(c.y),
                });
                Ok(Haversine.length(&unprojected))
            }
            _ => Ok(0.0),
        }
    }

    /// The centroid as `(lat, lon)` degrees, using the configured
    /// algorithm.
    pub fn centroid(&mut self) -> Result<[f64; 2]> {
        let p = self.centroid_point()?;
        Ok([latp_to_lat(p.y()), p.x()])
    }

    // ---- relation iteration (ways only)

    /// Advances to the next scan-accepted relation containing this way.
    pub fn next_relation(&mut self) -> Option<RelationId> {
        let next = match self.relation_pos {
            None => 0,
            Some(i) => i + 1,
        };
        if next >= self.relation_list.len() {
            self.relation_pos = Some(self.relation_list.len());
            return None;
        }
        self.relation_pos = Some(next);
        Some(self.relation_list[next])
    }

    /// Restarts [`next_relation`](Self::next_relation) iteration.
    pub fn restart_relations(&mut self) {
        self.relation_pos = None;
    }

    /// The value of `key` on the relation the iteration is positioned at,
    /// or the empty string.
    pub fn find_in_relation(&self, key: &str) -> String {
        let Some(pos) = self.relation_pos else {
            return String::new();
        };
        let Some(&relation) = self.relation_list.get(pos) else {
            return String::new();
        };
        self.shared
            .store
            .get_relation_tag(relation, key)
            .unwrap_or_default()
    }

    /// Accepts the relation during the scan pass.
    pub fn accept(&mut self) {
        self.relation_accepted = true;
    }

    // ---- emission

    /// Emits this object into `layer_name`, as an area when `is_area`.
    pub fn layer(&mut self, layer_name: &str, is_area: bool) -> Result<()> {
        let layer_index = self.shared.layers.index_of(layer_name).ok_or_else(|| {
            self.script_error(format!("Layer(): a layer named \"{layer_name}\" doesn't exist"))
        })?;
        let layer_min_zoom = self.shared.layers.get(layer_index).min_zoom;

        let geom_type = match &self.geometry {
            FeatureGeometry::Relation { .. } => {
                if is_area {
                    OutputGeometryType::Polygon
                } else {
                    OutputGeometryType::MultiLinestring
                }
            }
            FeatureGeometry::Way { .. } => {
                if is_area {
                    OutputGeometryType::Polygon
                } else {
                    OutputGeometryType::Linestring
                }
            }
            FeatureGeometry::Node { .. } => OutputGeometryType::Point,
        };

        // Profiles often write the same geometry twice (a highway and its
        // name). Reuse the stored geometry instead of duplicating it.
        if let Some((last_type, last_id)) = self.last_geometry {
            if last_type == geom_type {
                self.push_output(geom_type, layer_index, last_id, layer_min_zoom);
                return Ok(());
            }
        }

        let geometry_id = match geom_type {
            OutputGeometryType::Point => {
                let FeatureGeometry::Node { id, ll } = &self.geometry else {
                    unreachable!("points are only emitted for nodes");
                };
                if self.shared.config.materialize_geometries {
                    self.shared.tiles.store_point(ll.to_point())
                } else {
                    ObjectId::node(*id)
                }
            }

            OutputGeometryType::Polygon => {
                let mut mp = self.closed_multi_polygon()?;
                correct_multi_polygon(&mut mp);
                if mp.0.is_empty() {
                    debug!(id = self.id(), "polygon emission collapsed to nothing");
                    return Ok(());
                }
                match &self.geometry {
                    FeatureGeometry::Way { id, .. }
                        if !self.shared.config.materialize_geometries =>
                    {
                        ObjectId::way(*id)
                    }
                    _ => self.shared.tiles.store_multi_polygon(mp),
                }
            }

            OutputGeometryType::Linestring => {
                let FeatureGeometry::Way { id, .. } = &self.geometry else {
                    unreachable!("linestrings are only emitted for ways");
                };
                let id = *id;
                let mut ls = self.linestring()?.clone();
                correct_linestring(&mut ls);
                if self.shared.config.materialize_geometries {
                    self.shared.tiles.store_linestring(ls)
                } else {
                    ObjectId::way(id)
                }
            }

            OutputGeometryType::MultiLinestring => {
                let mls = self.multi_linestring()?.clone();
                self.shared.tiles.store_multi_linestring(mls)
            }
        };

        self.last_geometry = Some((geom_type, geometry_id));
        self.push_output(geom_type, layer_index, geometry_id, layer_min_zoom);
        Ok(())
    }

    /// Emits this object's centroid as a point into `layer_name`.
    ///
    /// A failed centroid (degenerate or unresolvable geometry) skips the
    /// emission instead of failing the entity.
    pub fn layer_as_centroid(&mut self, layer_name: &str) -> Result<()> {
        let layer_index = self.shared.layers.index_of(layer_name).ok_or_else(|| {
            self.script_error(format!(
                "LayerAsCentroid(): a layer named \"{layer_name}\" doesn't exist"
            ))
        })?;
        let layer_min_zoom = self.shared.layers.get(layer_index).min_zoom;

        let p = match self.centroid_point() {
            Ok(p) => p,
            Err(e) => {
                debug!(id = self.id(), error = %e, "centroid emission skipped");
                return Ok(());
            }
        };
        let geometry_id = self.shared.tiles.store_point(p);
        self.push_output(OutputGeometryType::Point, layer_index, geometry_id, layer_min_zoom);
        Ok(())
    }

    /// Adds a string attribute to the last emission. Empty values are
    /// ignored.
    pub fn attribute(&mut self, key: &str, value: &str, minzoom: u8) -> Result<()> {
        if value.is_empty() {
            return Ok(());
        }
        self.add_attribute(key, AttributeValue::String(value.to_string()), minzoom, 0)
    }

    pub fn attribute_numeric(&mut self, key: &str, value: f32, minzoom: u8) -> Result<()> {
        self.add_attribute(key, AttributeValue::Float(value), minzoom, 1)
    }

    pub fn attribute_boolean(&mut self, key: &str, value: bool, minzoom: u8) -> Result<()> {
        self.add_attribute(key, AttributeValue::Bool(value), minzoom, 2)
    }

    fn add_attribute(
        &mut self,
        key: &str,
        value: AttributeValue,
        minzoom: u8,
        type_tag: u8,
    ) -> Result<()> {
        if self.outputs.is_empty() {
            return Err(self.script_error("Can't add Attribute if no Layer set"));
        }
        let layer = self.outputs.last().unwrap().0.layer;
        let set = &mut self.outputs.last_mut().unwrap().1;
        self.shared.attributes.add_attribute(set, key, value, minzoom)?;
        self.shared.layers.note_attribute(layer, key, type_tag);
        Ok(())
    }

    /// Sets the minimum zoom of the last emission.
    pub fn min_zoom(&mut self, zoom: u8) -> Result<()> {
        match self.outputs.last_mut() {
            Some((oo, _)) => {
                oo.set_min_zoom(zoom);
                Ok(())
            }
            None => Err(self.script_error("Can't set minimum zoom if no Layer set")),
        }
    }

    /// Sets the z-order of the last emission.
    pub fn z_order(&mut self, z_order: f64) -> Result<()> {
        match self.outputs.last_mut() {
            Some((oo, _)) => {
                oo.set_z_order(z_order.clamp(i16::MIN as f64, i16::MAX as f64) as i16);
                Ok(())
            }
            None => Err(self.script_error("Can't set z_order if no Layer set")),
        }
    }

    // ---- internals

    fn push_output(
        &mut self,
        geom_type: OutputGeometryType,
        layer: u16,
        geometry_id: ObjectId,
        min_zoom: u8,
    ) {
        self.outputs.push((
            OutputObject::new(geom_type, layer, geometry_id, min_zoom),
            AttributeSet::new(),
        ));
    }

    fn has_outputs(&self) -> bool {
        !self.outputs.is_empty()
    }

    /// Interns the collected attribute sets and returns the finished
    /// output objects.
    fn finalize_outputs(self) -> (Vec<OutputObject>, FinalGeometry) {
        let attributes = self.shared.attributes;
        let outputs = self
            .outputs
            .into_iter()
            .map(|(mut oo, set)| {
                oo.set_attributes(attributes.add_set(set));
                oo
            })
            .collect();
        let geometry = FinalGeometry {
            linestring: self.linestring_cache,
            multi_linestring: self.multi_linestring_cache,
            multi_polygon: self.multi_polygon_cache,
        };
        (outputs, geometry)
    }

    fn linestring(&mut self) -> Result<&LineString<f64>> {
        if self.linestring_cache.is_none() {
            let ls = match &self.geometry {
                FeatureGeometry::Way { lls, .. } => OsmStore::lls_to_linestring(lls),
                FeatureGeometry::Relation { .. } => {
                    // Not meaningful for a relation, but tolerated: the
                    // first outer ring as a line.
                    let mp = self.closed_multi_polygon()?;
                    match mp.0.first() {
                        Some(poly) => poly.exterior().clone(),
                        None => LineString::new(vec![]),
                    }
                }
                FeatureGeometry::Node { .. } => {
                    return Err(self.script_error("a node has no linestring geometry"));
                }
            };
            self.linestring_cache = Some(ls);
        }
        Ok(self.linestring_cache.as_ref().unwrap())
    }

    fn multi_linestring(&mut self) -> Result<&MultiLineString<f64>> {
        if self.multi_linestring_cache.is_none() {
            let mls = match &self.geometry {
                FeatureGeometry::Relation { outers, .. } => {
                    self.shared.store.way_list_multi_linestring(outers)?
                }
                _ => return Err(self.script_error("only relations have multilinestrings")),
            };
            self.multi_linestring_cache = Some(mls);
        }
        Ok(self.multi_linestring_cache.as_ref().unwrap())
    }

    /// The closed shape of this object as a multipolygon: the assembled
    /// rings for a relation, the ring closure for a way.
    fn closed_multi_polygon(&mut self) -> Result<MultiPolygon<f64>> {
        match &self.geometry {
            FeatureGeometry::Relation { outers, inners, .. } => {
                if self.multi_polygon_cache.is_none() {
                    self.multi_polygon_cache =
                        Some(self.shared.store.way_list_multi_polygon(outers, inners)?);
                }
                Ok(self.multi_polygon_cache.as_ref().unwrap().clone())
            }
            FeatureGeometry::Way { lls, .. } => {
                Ok(MultiPolygon::new(vec![OsmStore::lls_to_polygon(lls)]))
            }
            FeatureGeometry::Node { .. } => {
                Err(self.script_error("a node has no area geometry"))
            }
        }
    }

    fn query_geometry(&mut self) -> Result<Geometry<f64>> {
        Ok(match &self.geometry {
            FeatureGeometry::Node { ll, .. } => Geometry::Point(ll.to_point()),
            FeatureGeometry::Way { lls, .. } => {
                if self.is_closed() {
                    Geometry::Polygon(OsmStore::lls_to_polygon(lls))
                } else {
                    Geometry::LineString(OsmStore::lls_to_linestring(lls))
                }
            }
            FeatureGeometry::Relation { closed, .. } => {
                if *closed {
                    Geometry::MultiPolygon(self.closed_multi_polygon()?)
                } else {
                    Geometry::MultiLineString(self.multi_linestring()?.clone())
                }
            }
        })
    }

    fn centroid_point(&mut self) -> Result<Point<f64>> {
        if let FeatureGeometry::Node { ll, .. } = &self.geometry {
            return Ok(ll.to_point());
        }
        let mp = self.closed_multi_polygon()?;
        if mp.0.is_empty() {
            return Err(Error::geometry(format!(
                "empty geometry for centroid of {} {}",
                self.entity().0,
                self.entity().1
            )));
        }
        match self.shared.config.centroid_algorithm {
            CentroidAlgorithm::Centroid => mp.centroid().ok_or_else(|| {
                Error::geometry(format!(
                    "no centroid for {} {}",
                    self.entity().0,
                    self.entity().1
                ))
            }),
            CentroidAlgorithm::PoleOfInaccessibility => {
                let largest = largest_polygon(&mp);
                Ok(polylabel(largest, self.shared.config.polylabel_precision))
            }
        }
    }
}

/// Geometry caches recovered from a finished feature, for indexing.
struct FinalGeometry {
    linestring: Option<LineString<f64>>,
    multi_linestring: Option<MultiLineString<f64>>,
    multi_polygon: Option<MultiPolygon<f64>>,
}

impl FinalGeometry {
    fn into_parts(
        self,
    ) -> (
        Option<LineString<f64>>,
        Option<MultiLineString<f64>>,
        Option<MultiPolygon<f64>>,
    ) {
        (self.linestring, self.multi_linestring, self.multi_polygon)
    }
}

fn largest_polygon(mp: &MultiPolygon<f64>) -> &Polygon<f64> {
    use geo::Area;
    mp.0.iter()
        .max_by(|a, b| a.unsigned_area().total_cmp(&b.unsigned_area()))
        .expect("non-empty multipolygon")
}

/// The per-worker processing object.
pub struct Processing<'run> {
    runtime: Box<dyn ScriptRuntime>,
    shared: Shared<'run>,
}

impl<'run> Processing<'run> {
    /// Creates the worker's runtime via `factory` and runs its init hook.
    pub fn new(
        factory: &dyn ScriptRuntimeFactory,
        shared: Shared<'run>,
    ) -> Result<Processing<'run>> {
        let mut runtime = factory.create()?;
        runtime.init_function(&shared.config.project_name)?;
        Ok(Processing { runtime, shared })
    }

    pub fn node_keys(&self) -> Vec<String> {
        self.runtime.node_keys()
    }

    pub fn can_read_relations(&self) -> bool {
        self.runtime.can_read_relations()
    }

    pub fn can_write_relations(&self) -> bool {
        self.runtime.can_write_relations()
    }

    /// Processes a significant node. Returns whether anything was
    /// emitted.
    pub fn set_node(&mut self, id: NodeId, ll: LatpLon, tags: TagView<'_>) -> Result<bool> {
        let mut feature = Feature::new(
            self.shared,
            FeatureGeometry::Node { id, ll },
            tags,
            Vec::new(),
        );
        self.runtime.node_function(&mut feature)?;
        if !feature.has_outputs() {
            return Ok(false);
        }
        let (outputs, _) = feature.finalize_outputs();
        let index = ll.tile_at_zoom(self.shared.config.base_zoom);
        for output in &outputs {
            self.shared.tiles.add_object_to_small_index(index, *output, id);
        }
        Ok(true)
    }

    /// Processes a way. Returns whether anything was emitted.
    pub fn set_way(&mut self, id: WayId, lls: &[LatpLon], tags: TagView<'_>) -> Result<bool> {
        debug_assert!(!lls.is_empty());
        let relation_list = if self.runtime.can_read_relations()
            && self.shared.store.way_in_any_relations(id)
        {
            self.shared.store.relations_for_way(id)
        } else {
            Vec::new()
        };

        let mut feature = Feature::new(
            self.shared,
            FeatureGeometry::Way { id, lls },
            tags,
            relation_list,
        );
        self.runtime.way_function(&mut feature)?;
        if !feature.has_outputs() {
            return Ok(false);
        }
        let (outputs, geometry) = feature.finalize_outputs();
        let (linestring, _, _) = geometry.into_parts();
        let ls = match linestring {
            Some(ls) => ls,
            None => OsmStore::lls_to_linestring(lls),
        };
        self.shared.tiles.add_linestring_to_index(&ls, &outputs, id);
        Ok(true)
    }

    /// Processes a relation: a native multipolygon goes through the way
    /// callback, anything else through the relation callback.
    pub fn set_relation(
        &mut self,
        id: RelationId,
        outers: &[WayId],
        inners: &[WayId],
        tags: TagView<'_>,
        is_multipolygon: bool,
        is_inner_outer: bool,
    ) -> Result<bool> {
        if !is_multipolygon && !self.runtime.can_write_relations() {
            return Ok(false);
        }
        let mut feature = Feature::new(
            self.shared,
            FeatureGeometry::Relation {
                id,
                outers,
                inners,
                closed: is_multipolygon || is_inner_outer,
            },
            tags,
            Vec::new(),
        );
        if is_multipolygon {
            self.runtime.way_function(&mut feature)?;
        } else {
            self.runtime.relation_function(&mut feature)?;
        }
        if !feature.has_outputs() {
            return Ok(false);
        }
        let closed = feature.is_closed();
        let (outputs, geometry) = feature.finalize_outputs();
        let (_, multi_linestring, multi_polygon) = geometry.into_parts();
        if closed {
            let mp = match multi_polygon {
                Some(mp) => mp,
                None => self.shared.store.way_list_multi_polygon(outers, inners)?,
            };
            self.shared.tiles.add_multi_polygon_to_index(&mp, &outputs, id);
        } else {
            let mls = match multi_linestring {
                Some(mls) => mls,
                None => self.shared.store.way_list_multi_linestring(outers)?,
            };
            self.shared
                .tiles
                .add_multi_linestring_to_index(&mls, &outputs, id);
        }
        Ok(true)
    }

    /// Scan pass over a relation: runs the scan callback and, when
    /// accepted, persists the relation's tags for `FindInRelation`.
    pub fn scan_relation(&mut self, id: RelationId, tags: TagView<'_>) -> Result<bool> {
        let mut feature = Feature::new(
            self.shared,
            FeatureGeometry::Relation {
                id,
                outers: &[],
                inners: &[],
                closed: false,
            },
            tags,
            Vec::new(),
        );
        self.runtime.relation_scan_function(&mut feature)?;
        if !feature.relation_accepted {
            return Ok(false);
        }
        self.shared.store.store_relation_tags(id, tags.export_owned());
        Ok(true)
    }

    /// Runs the profile's exit hook.
    pub fn exit(&mut self) -> Result<()> {
        self.runtime.exit_function()
    }
}
