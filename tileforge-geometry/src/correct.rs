//! Geometry validation and repair.
//!
//! The policy after building or clipping a polygon: drop degenerate rings,
//! fix winding, then test validity. Spikes are removed directly; any other
//! invalidity (self-intersection, crossing rings) goes through the
//! boolean-ops repair, whose re-noded output is valid. The whole pass is
//! idempotent: a corrected geometry passes through unchanged.

use geo::BooleanOps;
use geo::orient::{Direction, Orient};
use geo_types::{Coord, LineString, MultiPolygon, Polygon};

/// How a polygon failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidityFailure {
    Spikes,
    SelfIntersection,
}

/// Repairs a multipolygon in place.
pub fn correct_multi_polygon(mp: &mut MultiPolygon<f64>) {
    drop_degenerate_rings(mp);
    *mp = mp.orient(Direction::Default);

    match check_validity(mp) {
        None => {}
        Some(ValidityFailure::Spikes) => {
            remove_spikes(mp);
            drop_degenerate_rings(mp);
            // Spike removal can expose a residual self-intersection.
            if check_validity(mp).is_some() {
                repair(mp);
            }
        }
        Some(ValidityFailure::SelfIntersection) => repair(mp),
    }
}

/// Repairs a single polygon, which may split into multiple parts.
pub fn correct_polygon(poly: Polygon<f64>) -> MultiPolygon<f64> {
    let mut mp = MultiPolygon::new(vec![poly]);
    correct_multi_polygon(&mut mp);
    mp
}

/// Removes consecutive duplicate points from a linestring.
pub fn correct_linestring(ls: &mut LineString<f64>) {
    ls.0.dedup();
}

/// Reports the first validity failure, or `None` for a valid multipolygon.
pub fn check_validity(mp: &MultiPolygon<f64>) -> Option<ValidityFailure> {
    for poly in &mp.0 {
        for ring in rings(poly) {
            if ring_has_spikes(ring) {
                return Some(ValidityFailure::Spikes);
            }
        }
    }
    for poly in &mp.0 {
        for ring in rings(poly) {
            if ring_self_intersects(ring) {
                return Some(ValidityFailure::SelfIntersection);
            }
        }
    }
    None
}

/// Removes spike vertices from every ring.
pub fn remove_spikes(mp: &mut MultiPolygon<f64>) {
    let polys = std::mem::take(&mut mp.0);
    mp.0 = polys
        .into_iter()
        .map(|poly| {
            let (mut exterior, mut interiors) = poly.into_inner();
            remove_spikes_ring(&mut exterior);
            for ring in &mut interiors {
                remove_spikes_ring(ring);
            }
            Polygon::new(exterior, interiors)
        })
        .collect();
}

/// Boolean-ops repair: a union against the empty set re-nodes the input
/// and yields a valid multipolygon.
fn repair(mp: &mut MultiPolygon<f64>) {
    let repaired = mp.union(&MultiPolygon::new(vec![]));
    *mp = repaired.orient(Direction::Default);
}

fn rings(poly: &Polygon<f64>) -> impl Iterator<Item = &LineString<f64>> {
    std::iter::once(poly.exterior()).chain(poly.interiors().iter())
}

/// Drops rings that collapse below a triangle, and polygons whose outer
/// ring is gone.
fn drop_degenerate_rings(mp: &mut MultiPolygon<f64>) {
    let polys = std::mem::take(&mut mp.0);
    mp.0 = polys
        .into_iter()
        .filter_map(|poly| {
            let (mut exterior, interiors) = poly.into_inner();
            normalize_ring(&mut exterior);
            if exterior.0.len() < 4 {
                return None;
            }
            let interiors = interiors
                .into_iter()
                .filter_map(|mut ring| {
                    normalize_ring(&mut ring);
                    (ring.0.len() >= 4).then_some(ring)
                })
                .collect();
            Some(Polygon::new(exterior, interiors))
        })
        .collect();
}

/// Deduplicates consecutive points and closes the ring.
fn normalize_ring(ring: &mut LineString<f64>) {
    ring.0.dedup();
    if ring.0.len() > 1 && ring.0.first() != ring.0.last() {
        let first = ring.0[0];
        ring.0.push(first);
    }
}

fn remove_spikes_ring(ring: &mut LineString<f64>) {
    let mut pts: Vec<Coord<f64>> = open_ring(ring).to_vec();
    loop {
        pts.dedup();
        if pts.len() > 1 && pts.first() == pts.last() {
            pts.pop();
        }
        if pts.len() < 3 {
            break;
        }
        let mut removed = false;
        let mut i = 0;
        while pts.len() >= 3 && i < pts.len() {
            let n = pts.len();
            let a = pts[(i + n - 1) % n];
            let b = pts[i];
            let c = pts[(i + 1) % n];
            if is_spike(a, b, c) {
                pts.remove(i);
                removed = true;
            } else {
                i += 1;
            }
        }
        if !removed {
            break;
        }
    }
    if !pts.is_empty() {
        let first = pts[0];
        pts.push(first);
    }
    ring.0 = pts;
}

fn open_ring(ring: &LineString<f64>) -> &[Coord<f64>] {
    let pts = &ring.0;
    if pts.len() > 1 && pts.first() == pts.last() {
        &pts[..pts.len() - 1]
    } else {
        pts
    }
}

/// A spike is a vertex where the boundary reverses onto itself.
fn is_spike(a: Coord<f64>, b: Coord<f64>, c: Coord<f64>) -> bool {
    let ab = (b.x - a.x, b.y - a.y);
    let bc = (c.x - b.x, c.y - b.y);
    let cross = ab.0 * bc.1 - ab.1 * bc.0;
    let dot = ab.0 * bc.0 + ab.1 * bc.1;
    cross == 0.0 && dot < 0.0
}

fn ring_has_spikes(ring: &LineString<f64>) -> bool {
    let pts = open_ring(ring);
    if pts.len() < 3 {
        return false;
    }
    (0..pts.len()).any(|i| {
        is_spike(
            pts[(i + pts.len() - 1) % pts.len()],
            pts[i],
            pts[(i + 1) % pts.len()],
        )
    })
}

/// Segment intersection test over non-adjacent segment pairs.
fn ring_self_intersects(ring: &LineString<f64>) -> bool {
    let pts = open_ring(ring);
    let n = pts.len();
    if n < 4 {
        return false;
    }
    for i in 0..n {
        for j in i + 1..n {
            // Skip adjacent segments (shared endpoint), including the wrap.
            if j == i + 1 || (i == 0 && j == n - 1) {
                continue;
            }
            let (a1, a2) = (pts[i], pts[(i + 1) % n]);
            let (b1, b2) = (pts[j], pts[(j + 1) % n]);
            if segments_intersect(a1, a2, b1, b2) {
                return true;
            }
        }
    }
    false
}

fn segments_intersect(a1: Coord<f64>, a2: Coord<f64>, b1: Coord<f64>, b2: Coord<f64>) -> bool {
    let d1 = orientation(b1, b2, a1);
    let d2 = orientation(b1, b2, a2);
    let d3 = orientation(a1, a2, b1);
    let d4 = orientation(a1, a2, b2);
    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    (d1 == 0.0 && on_segment(b1, b2, a1))
        || (d2 == 0.0 && on_segment(b1, b2, a2))
        || (d3 == 0.0 && on_segment(a1, a2, b1))
        || (d4 == 0.0 && on_segment(a1, a2, b2))
}

fn orientation(a: Coord<f64>, b: Coord<f64>, c: Coord<f64>) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn on_segment(a: Coord<f64>, b: Coord<f64>, p: Coord<f64>) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Area, Winding};

    fn ring(pts: &[(f64, f64)]) -> LineString<f64> {
        LineString::from(pts.to_vec())
    }

    #[test]
    fn test_valid_square_passes_through() {
        let square = Polygon::new(
            ring(&[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0), (0.0, 0.0)]),
            vec![],
        );
        let mut mp = MultiPolygon::new(vec![square]);
        let before = mp.clone();
        correct_multi_polygon(&mut mp);
        assert_eq!(mp, before);
    }

    #[test]
    fn test_winding_is_fixed() {
        // Clockwise outer ring.
        let square = Polygon::new(
            ring(&[(0.0, 0.0), (0.0, 4.0), (4.0, 4.0), (4.0, 0.0), (0.0, 0.0)]),
            vec![],
        );
        let mut mp = MultiPolygon::new(vec![square]);
        correct_multi_polygon(&mut mp);
        assert!(mp.0[0].exterior().is_ccw());
    }

    #[test]
    fn test_spike_is_removed() {
        let spiked = Polygon::new(
            ring(&[
                (0.0, 0.0),
                (4.0, 0.0),
                (4.0, 4.0),
                (6.0, 4.0), // spike out and back
                (4.0, 4.0),
                (0.0, 4.0),
                (0.0, 0.0),
            ]),
            vec![],
        );
        assert_eq!(
            check_validity(&MultiPolygon::new(vec![spiked.clone()])),
            Some(ValidityFailure::Spikes)
        );
        let mut mp = MultiPolygon::new(vec![spiked]);
        correct_multi_polygon(&mut mp);
        assert_eq!(check_validity(&mp), None);
        assert_eq!(mp.0[0].exterior().0.len(), 5);
        assert!((mp.unsigned_area() - 16.0).abs() < 1e-12);
    }

    #[test]
    fn test_bowtie_is_repaired() {
        let bowtie = Polygon::new(
            ring(&[(0.0, 0.0), (4.0, 4.0), (4.0, 0.0), (0.0, 4.0), (0.0, 0.0)]),
            vec![],
        );
        assert_eq!(
            check_validity(&MultiPolygon::new(vec![bowtie.clone()])),
            Some(ValidityFailure::SelfIntersection)
        );
        let mut mp = MultiPolygon::new(vec![bowtie]);
        correct_multi_polygon(&mut mp);
        assert_eq!(check_validity(&mp), None);
        // The bowtie splits into two triangles of total area 4.
        assert_eq!(mp.0.len(), 2);
        assert!((mp.unsigned_area() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_correction_is_idempotent() {
        let cases = vec![
            Polygon::new(
                ring(&[(0.0, 0.0), (4.0, 4.0), (4.0, 0.0), (0.0, 4.0), (0.0, 0.0)]),
                vec![],
            ),
            Polygon::new(
                ring(&[
                    (0.0, 0.0),
                    (4.0, 0.0),
                    (4.0, 4.0),
                    (6.0, 4.0),
                    (4.0, 4.0),
                    (0.0, 4.0),
                    (0.0, 0.0),
                ]),
                vec![],
            ),
            Polygon::new(
                ring(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]),
                vec![],
            ),
        ];
        for poly in cases {
            let once = correct_polygon(poly);
            let mut twice = once.clone();
            correct_multi_polygon(&mut twice);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_degenerate_ring_is_dropped() {
        let sliver = Polygon::new(ring(&[(0.0, 0.0), (1.0, 1.0), (0.0, 0.0)]), vec![]);
        let mut mp = MultiPolygon::new(vec![sliver]);
        correct_multi_polygon(&mut mp);
        assert!(mp.0.is_empty());
    }

    #[test]
    fn test_linestring_dedup() {
        let mut ls = ring(&[(0.0, 0.0), (0.0, 0.0), (1.0, 0.0), (1.0, 0.0), (2.0, 0.0)]);
        correct_linestring(&mut ls);
        assert_eq!(ls.0.len(), 3);
    }
}
