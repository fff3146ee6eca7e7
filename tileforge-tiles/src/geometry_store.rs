//! Interned geometry storage.
//!
//! The tile data source owns one append-only store per geometry class.
//! Slot 0 of every store is a reserved blank so that geometry id 0 can
//! serve as the "nothing stored yet" sentinel in the emission layer.

use std::sync::Mutex;

use geo_types::{LineString, MultiLineString, MultiPolygon, Point};

pub struct GeometryStore {
    points: Mutex<Vec<Point<f64>>>,
    linestrings: Mutex<Vec<LineString<f64>>>,
    multi_linestrings: Mutex<Vec<MultiLineString<f64>>>,
    multi_polygons: Mutex<Vec<MultiPolygon<f64>>>,
}

impl GeometryStore {
    pub fn new() -> GeometryStore {
        GeometryStore {
            points: Mutex::new(vec![Point::new(0.0, 0.0)]),
            linestrings: Mutex::new(vec![LineString::new(vec![])]),
            multi_linestrings: Mutex::new(vec![MultiLineString::new(vec![])]),
            multi_polygons: Mutex::new(vec![MultiPolygon::new(vec![])]),
        }
    }

    pub fn store_point(&self, p: Point<f64>) -> u64 {
        let mut points = self.points.lock().unwrap();
        points.push(p);
        (points.len() - 1) as u64
    }

    pub fn store_linestring(&self, ls: LineString<f64>) -> u64 {
        let mut linestrings = self.linestrings.lock().unwrap();
        linestrings.push(ls);
        (linestrings.len() - 1) as u64
    }

    pub fn store_multi_linestring(&self, mls: MultiLineString<f64>) -> u64 {
        let mut multi_linestrings = self.multi_linestrings.lock().unwrap();
        multi_linestrings.push(mls);
        (multi_linestrings.len() - 1) as u64
    }

    pub fn store_multi_polygon(&self, mp: MultiPolygon<f64>) -> u64 {
        let mut multi_polygons = self.multi_polygons.lock().unwrap();
        multi_polygons.push(mp);
        (multi_polygons.len() - 1) as u64
    }

    pub fn point(&self, index: u64) -> Point<f64> {
        self.points.lock().unwrap()[index as usize]
    }

    pub fn linestring(&self, index: u64) -> LineString<f64> {
        self.linestrings.lock().unwrap()[index as usize].clone()
    }

    pub fn multi_linestring(&self, index: u64) -> MultiLineString<f64> {
        self.multi_linestrings.lock().unwrap()[index as usize].clone()
    }

    pub fn multi_polygon(&self, index: u64) -> MultiPolygon<f64> {
        self.multi_polygons.lock().unwrap()[index as usize].clone()
    }

    /// Stored geometry counts `(points, lines, polygons)`, excluding the
    /// reserved blanks.
    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.points.lock().unwrap().len() - 1,
            self.linestrings.lock().unwrap().len() + self.multi_linestrings.lock().unwrap().len()
                - 2,
            self.multi_polygons.lock().unwrap().len() - 1,
        )
    }
}

impl Default for GeometryStore {
    fn default() -> GeometryStore {
        GeometryStore::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_zero_is_reserved() {
        let store = GeometryStore::new();
        assert_eq!(store.counts(), (0, 0, 0));
        let p = store.store_point(Point::new(1.0, 2.0));
        assert_eq!(p, 1);
        assert_eq!(store.point(p), Point::new(1.0, 2.0));
        let ls = store.store_linestring(LineString::from(vec![(0.0, 0.0), (1.0, 1.0)]));
        assert_eq!(ls, 1);
        assert_eq!(store.counts(), (1, 1, 0));
    }
}
