//! Pole of inaccessibility: the interior point farthest from the polygon
//! boundary, found by iterative quadtree refinement of the best candidate
//! cell. Used as an alternative centroid for label placement.
//!
//! The search is deterministic for a given polygon and precision: the cell
//! queue breaks score ties by cell coordinates, never by insertion order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use geo_types::{Coord, LineString, Point, Polygon};

/// Finds the pole of inaccessibility of `polygon` to within `precision`
/// (in coordinate units).
pub fn polylabel(polygon: &Polygon<f64>, precision: f64) -> Point<f64> {
    let (min, max) = ring_envelope(polygon.exterior());
    let size = Coord {
        x: max.x - min.x,
        y: max.y - min.y,
    };
    let cell_size = size.x.min(size.y);
    if cell_size == 0.0 {
        return Point::from(min);
    }
    let mut h = cell_size / 2.0;

    let mut queue = BinaryHeap::new();
    let mut x = min.x;
    while x < max.x {
        let mut y = min.y;
        while y < max.y {
            queue.push(Cell::new(Coord { x: x + h, y: y + h }, h, polygon));
            y += cell_size;
        }
        x += cell_size;
    }

    // First guess: the area centroid, then the bbox center.
    let mut best = Cell::new(centroid_guess(polygon), 0.0, polygon);
    let bbox_cell = Cell::new(
        Coord {
            x: min.x + size.x / 2.0,
            y: min.y + size.y / 2.0,
        },
        0.0,
        polygon,
    );
    if bbox_cell.distance > best.distance {
        best = bbox_cell;
    }

    while let Some(cell) = queue.pop() {
        if cell.distance > best.distance {
            best = cell;
        }
        // No chance of an improvement beyond the precision: stop splitting.
        if cell.max_distance - best.distance <= precision {
            continue;
        }
        h = cell.half / 2.0;
        for (dx, dy) in [(-1.0, -1.0), (1.0, -1.0), (-1.0, 1.0), (1.0, 1.0)] {
            queue.push(Cell::new(
                Coord {
                    x: cell.center.x + dx * h,
                    y: cell.center.y + dy * h,
                },
                h,
                polygon,
            ));
        }
    }

    Point::from(best.center)
}

#[derive(Clone, Copy)]
struct Cell {
    center: Coord<f64>,
    half: f64,
    /// Signed distance from the center to the boundary (negative outside).
    distance: f64,
    /// Upper bound on the distance anywhere within the cell.
    max_distance: f64,
}

impl Cell {
    fn new(center: Coord<f64>, half: f64, polygon: &Polygon<f64>) -> Cell {
        let distance = signed_distance(center, polygon);
        Cell {
            center,
            half,
            distance,
            max_distance: distance + half * std::f64::consts::SQRT_2,
        }
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Cell) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cell {}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Cell) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cell {
    fn cmp(&self, other: &Cell) -> Ordering {
        self.max_distance
            .total_cmp(&other.max_distance)
            .then(self.center.x.total_cmp(&other.center.x))
            .then(self.center.y.total_cmp(&other.center.y))
    }
}

/// Signed distance from `point` to the polygon outline: positive inside,
/// negative outside.
fn signed_distance(point: Coord<f64>, polygon: &Polygon<f64>) -> f64 {
    let mut inside = false;
    let mut min_dist_sq = f64::INFINITY;
    for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors().iter()) {
        let pts = &ring.0;
        if pts.len() < 2 {
            continue;
        }
        let mut j = pts.len() - 1;
        for i in 0..pts.len() {
            let a = pts[i];
            let b = pts[j];
            if (a.y > point.y) != (b.y > point.y)
                && point.x < (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x
            {
                inside = !inside;
            }
            min_dist_sq = min_dist_sq.min(segment_distance_sq(point, a, b));
            j = i;
        }
    }
    (if inside { 1.0 } else { -1.0 }) * min_dist_sq.sqrt()
}

fn segment_distance_sq(p: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> f64 {
    let mut x = a.x;
    let mut y = a.y;
    let dx = b.x - x;
    let dy = b.y - y;
    if dx != 0.0 || dy != 0.0 {
        let t = ((p.x - x) * dx + (p.y - y) * dy) / (dx * dx + dy * dy);
        if t > 1.0 {
            x = b.x;
            y = b.y;
        } else if t > 0.0 {
            x += dx * t;
            y += dy * t;
        }
    }
    let dx = p.x - x;
    let dy = p.y - y;
    dx * dx + dy * dy
}

fn centroid_guess(polygon: &Polygon<f64>) -> Coord<f64> {
    let ring = polygon.exterior();
    let pts = &ring.0;
    let mut area = 0.0;
    let mut cx = 0.0;
    let mut cy = 0.0;
    let mut j = pts.len() - 1;
    for i in 0..pts.len() {
        let a = pts[i];
        let b = pts[j];
        let f = a.x * b.y - b.x * a.y;
        cx += (a.x + b.x) * f;
        cy += (a.y + b.y) * f;
        area += f * 3.0;
        j = i;
    }
    if area == 0.0 {
        pts[0]
    } else {
        Coord {
            x: cx / area,
            y: cy / area,
        }
    }
}

fn ring_envelope(ring: &LineString<f64>) -> (Coord<f64>, Coord<f64>) {
    let mut min = Coord {
        x: f64::INFINITY,
        y: f64::INFINITY,
    };
    let mut max = Coord {
        x: f64::NEG_INFINITY,
        y: f64::NEG_INFINITY,
    };
    for c in &ring.0 {
        min.x = min.x.min(c.x);
        min.y = min.y.min(c.y);
        max.x = max.x.max(c.x);
        max.y = max.y.max(c.y);
    }
    (min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_with_hole() -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                (0.0, 0.0),
                (10.0, 0.0),
                (10.0, 10.0),
                (0.0, 10.0),
                (0.0, 0.0),
            ]),
            vec![LineString::from(vec![
                (4.0, 4.0),
                (6.0, 4.0),
                (6.0, 6.0),
                (4.0, 6.0),
                (4.0, 4.0),
            ])],
        )
    }

    #[test]
    fn test_square_center() {
        let square = Polygon::new(
            LineString::from(vec![
                (0.0, 0.0),
                (10.0, 0.0),
                (10.0, 10.0),
                (0.0, 10.0),
                (0.0, 0.0),
            ]),
            vec![],
        );
        let label = polylabel(&square, 0.01);
        assert!((label.x() - 5.0).abs() < 0.1);
        assert!((label.y() - 5.0).abs() < 0.1);
    }

    #[test]
    fn test_hole_pushes_label_away_from_center() {
        let label = polylabel(&square_with_hole(), 0.01);
        // The exact center sits inside the hole; the label must not.
        let d = ((label.x() - 5.0).powi(2) + (label.y() - 5.0).powi(2)).sqrt();
        assert!(d > 1.0, "label {label:?} too close to the hole");
    }

    #[test]
    fn test_deterministic() {
        let a = polylabel(&square_with_hole(), 0.001);
        let b = polylabel(&square_with_hole(), 0.001);
        assert_eq!(a, b);
    }

    #[test]
    fn test_degenerate_polygon() {
        let line = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (5.0, 0.0), (0.0, 0.0)]),
            vec![],
        );
        // Zero-height envelope falls back to the envelope corner.
        let label = polylabel(&line, 0.1);
        assert_eq!(label, Point::new(0.0, 0.0));
    }
}
