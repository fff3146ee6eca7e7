//! Named layers of indexed polygons backing the profile's spatial
//! queries (`Intersects`, `CoveredBy`, and friends).
//!
//! The polygons come from an external loader (shapefile-style reference
//! data); this module owns the per-layer R-tree and the query predicates
//! run against the current entity's geometry.

use ahash::AHashMap;
use geo::{BooleanOps, ChamberlainDuquetteArea, Intersects, Within};
use geo_types::{Geometry, MultiPolygon, Polygon};
use rstar::{AABB, RTree, RTreeObject};
use tileforge_geometry::coordinates::latp_to_lat;

use std::sync::Arc;

struct IndexedEntry {
    envelope: AABB<[f64; 2]>,
    name: Option<String>,
    geometry: Arc<MultiPolygon<f64>>,
}

impl RTreeObject for IndexedEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

#[derive(Default)]
struct IndexedLayer {
    tree: RTree<IndexedEntry>,
}

/// The set of named indexed layers available to spatial queries.
#[derive(Default)]
pub struct IndexedLayers {
    layers: AHashMap<String, IndexedLayer>,
}

impl IndexedLayers {
    pub fn new() -> IndexedLayers {
        IndexedLayers::default()
    }

    /// Registers an (optionally named) polygon in `layer`, creating the
    /// layer on first use.
    pub fn add_polygon(&mut self, layer: &str, name: Option<String>, mp: MultiPolygon<f64>) {
        let envelope = multi_polygon_envelope(&mp);
        self.layers
            .entry(layer.to_string())
            .or_default()
            .tree
            .insert(IndexedEntry {
                envelope,
                name,
                geometry: Arc::new(mp),
            });
    }

    pub fn has_layer(&self, layer: &str) -> bool {
        self.layers.contains_key(layer)
    }

    /// Whether any polygon of `layer` intersects `geom`.
    pub fn intersects(&self, layer: &str, geom: &Geometry<f64>) -> bool {
        self.query(layer, geom, |entry| geometry_intersects(geom, &entry.geometry))
            .next()
            .is_some()
    }

    /// Names of the `layer` polygons intersecting `geom`.
    pub fn names_intersecting(&self, layer: &str, geom: &Geometry<f64>) -> Vec<String> {
        self.query(layer, geom, |entry| geometry_intersects(geom, &entry.geometry))
            .filter_map(|entry| entry.name.clone())
            .collect()
    }

    /// Whether `geom` lies within any polygon of `layer`.
    pub fn covered_by(&self, layer: &str, geom: &Geometry<f64>) -> bool {
        self.query(layer, geom, |entry| geometry_within(geom, &entry.geometry))
            .next()
            .is_some()
    }

    /// Names of the `layer` polygons covering `geom`.
    pub fn names_covering(&self, layer: &str, geom: &Geometry<f64>) -> Vec<String> {
        self.query(layer, geom, |entry| geometry_within(geom, &entry.geometry))
            .filter_map(|entry| entry.name.clone())
            .collect()
    }

    /// Total spherical area (m²) of the intersection between `mp` and the
    /// polygons of `layer`.
    pub fn area_intersecting(&self, layer: &str, mp: &MultiPolygon<f64>) -> f64 {
        let geom = Geometry::MultiPolygon(mp.clone());
        self.query(layer, &geom, |_| true)
            .map(|entry| {
                let clipped = mp.intersection(&*entry.geometry);
                spherical_area(&clipped)
            })
            .sum()
    }

    fn query<'a, F>(
        &'a self,
        layer: &str,
        geom: &Geometry<f64>,
        predicate: F,
    ) -> impl Iterator<Item = &'a IndexedEntry>
    where
        F: Fn(&IndexedEntry) -> bool + 'a,
    {
        let envelope = geometry_envelope(geom);
        self.layers
            .get(layer)
            .into_iter()
            .flat_map(move |l| l.tree.locate_in_envelope_intersecting(&envelope))
            .filter(move |entry| predicate(entry))
    }
}

/// Spherical area of a multipolygon whose coordinates are `(lon, latp)`;
/// rings are re-projected to raw latitude first.
pub fn spherical_area(mp: &MultiPolygon<f64>) -> f64 {
    mp.0.iter()
        .map(|poly| {
            let unprojected = unproject_polygon(poly);
            unprojected.chamberlain_duquette_unsigned_area()
        })
        .sum()
}

fn unproject_polygon(poly: &Polygon<f64>) -> Polygon<f64> {
    use geo::MapCoords;
    poly.map_coords(|c| geo_types::Coord {
        x: c.x,
        y: latp_to_lat(c.y),
    })
}

fn geometry_intersects(geom: &Geometry<f64>, mp: &MultiPolygon<f64>) -> bool {
    match geom {
        Geometry::Point(g) => g.intersects(mp),
        Geometry::LineString(g) => g.intersects(mp),
        Geometry::MultiLineString(g) => g.intersects(mp),
        Geometry::Polygon(g) => g.intersects(mp),
        Geometry::MultiPolygon(g) => g.intersects(mp),
        _ => false,
    }
}

fn geometry_within(geom: &Geometry<f64>, mp: &MultiPolygon<f64>) -> bool {
    match geom {
        Geometry::Point(g) => g.is_within(mp),
        Geometry::LineString(g) => g.is_within(mp),
        Geometry::MultiLineString(g) => g.is_within(mp),
        Geometry::Polygon(g) => g.is_within(mp),
        Geometry::MultiPolygon(g) => g.is_within(mp),
        _ => false,
    }
}

fn geometry_envelope(geom: &Geometry<f64>) -> AABB<[f64; 2]> {
    use geo::BoundingRect;
    match geom.bounding_rect() {
        Some(rect) => AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
        None => AABB::from_point([0.0, 0.0]),
    }
}

fn multi_polygon_envelope(mp: &MultiPolygon<f64>) -> AABB<[f64; 2]> {
    geometry_envelope(&Geometry::MultiPolygon(mp.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{LineString, Point};

    fn square(min: f64, max: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![Polygon::new(
            LineString::from(vec![
                (min, min),
                (max, min),
                (max, max),
                (min, max),
                (min, min),
            ]),
            vec![],
        )])
    }

    fn layers() -> IndexedLayers {
        let mut layers = IndexedLayers::new();
        layers.add_polygon("urban", Some("center".into()), square(0.0, 1.0));
        layers.add_polygon("urban", Some("suburb".into()), square(2.0, 3.0));
        layers
    }

    #[test]
    fn test_intersects() {
        let layers = layers();
        let inside = Geometry::Point(Point::new(0.5, 0.5));
        let outside = Geometry::Point(Point::new(1.5, 1.5));
        assert!(layers.intersects("urban", &inside));
        assert!(!layers.intersects("urban", &outside));
        assert!(!layers.intersects("rural", &inside));
        assert_eq!(layers.names_intersecting("urban", &inside), vec!["center"]);
    }

    #[test]
    fn test_covered_by() {
        let layers = layers();
        let contained = Geometry::LineString(LineString::from(vec![(0.2, 0.2), (0.8, 0.8)]));
        let straddling = Geometry::LineString(LineString::from(vec![(0.5, 0.5), (1.5, 0.5)]));
        assert!(layers.covered_by("urban", &contained));
        assert!(!layers.covered_by("urban", &straddling));
        assert_eq!(layers.names_covering("urban", &contained), vec!["center"]);
    }

    #[test]
    fn test_area_intersecting() {
        let layers = layers();
        // Half of this square overlaps the "center" polygon.
        let probe = square(0.5, 1.5);
        let area = layers.area_intersecting("urban", &probe);
        assert!(area > 0.0);
        let full = layers.area_intersecting("urban", &square(0.2, 0.7));
        assert!(full < area * 2.0);
        assert_eq!(layers.area_intersecting("rural", &probe), 0.0);
    }
}
