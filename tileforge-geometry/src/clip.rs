//! Axis-aligned box clipping.
//!
//! Polygons get a Sutherland–Hodgman clip per ring (`fast_clip`); it is
//! cheap but can leave degenerate edges on concave rings, which the
//! correction pass repairs afterwards. Linework gets a per-segment
//! Liang–Barsky clip with run stitching.

use geo_types::{Coord, LineString, MultiLineString, MultiPolygon, Polygon, Rect};

/// Clips every polygon of `mp` to `rect` in place, dropping polygons whose
/// outer ring vanishes.
pub fn fast_clip(mp: &mut MultiPolygon<f64>, rect: &Rect<f64>) {
    let polys = std::mem::take(&mut mp.0);
    mp.0 = polys
        .into_iter()
        .filter_map(|poly| clip_polygon(poly, rect))
        .collect();
}

fn clip_polygon(poly: Polygon<f64>, rect: &Rect<f64>) -> Option<Polygon<f64>> {
    let (exterior, interiors) = poly.into_inner();
    let exterior = clip_ring(exterior, rect)?;
    let interiors = interiors
        .into_iter()
        .filter_map(|ring| clip_ring(ring, rect))
        .collect();
    Some(Polygon::new(exterior, interiors))
}

/// Sutherland–Hodgman clip of one closed ring against the four box edges.
/// Returns `None` when nothing of the ring survives.
fn clip_ring(ring: LineString<f64>, rect: &Rect<f64>) -> Option<LineString<f64>> {
    let mut pts = ring.0;
    if pts.len() > 1 && pts.first() == pts.last() {
        pts.pop();
    }
    for edge in [
        Edge::Left(rect.min().x),
        Edge::Right(rect.max().x),
        Edge::Bottom(rect.min().y),
        Edge::Top(rect.max().y),
    ] {
        pts = clip_against_edge(&pts, edge);
        if pts.len() < 3 {
            return None;
        }
    }
    pts.push(pts[0]);
    Some(LineString::new(pts))
}

#[derive(Clone, Copy)]
enum Edge {
    Left(f64),
    Right(f64),
    Bottom(f64),
    Top(f64),
}

impl Edge {
    fn inside(&self, c: &Coord<f64>) -> bool {
        match *self {
            Edge::Left(x) => c.x >= x,
            Edge::Right(x) => c.x <= x,
            Edge::Bottom(y) => c.y >= y,
            Edge::Top(y) => c.y <= y,
        }
    }

    fn intersect(&self, a: &Coord<f64>, b: &Coord<f64>) -> Coord<f64> {
        match *self {
            Edge::Left(x) | Edge::Right(x) => {
                let t = (x - a.x) / (b.x - a.x);
                Coord {
                    x,
                    y: a.y + t * (b.y - a.y),
                }
            }
            Edge::Bottom(y) | Edge::Top(y) => {
                let t = (y - a.y) / (b.y - a.y);
                Coord {
                    x: a.x + t * (b.x - a.x),
                    y,
                }
            }
        }
    }
}

fn clip_against_edge(pts: &[Coord<f64>], edge: Edge) -> Vec<Coord<f64>> {
    let mut out = Vec::with_capacity(pts.len() + 4);
    for i in 0..pts.len() {
        let current = pts[i];
        let previous = pts[(i + pts.len() - 1) % pts.len()];
        let current_in = edge.inside(&current);
        let previous_in = edge.inside(&previous);
        if current_in {
            if !previous_in {
                out.push(edge.intersect(&previous, &current));
            }
            out.push(current);
        } else if previous_in {
            out.push(edge.intersect(&previous, &current));
        }
    }
    out.dedup();
    out
}

/// Clips a linestring to `rect`, producing the runs that survive.
pub fn clip_linestring(ls: &LineString<f64>, rect: &Rect<f64>) -> MultiLineString<f64> {
    let mut out: Vec<LineString<f64>> = Vec::new();
    let mut current: Vec<Coord<f64>> = Vec::new();
    for seg in ls.0.windows(2) {
        match clip_segment(seg[0], seg[1], rect) {
            Some((a, b)) => {
                match current.last() {
                    Some(last) if *last == a => {}
                    Some(_) => {
                        flush_run(&mut current, &mut out);
                        current.push(a);
                    }
                    None => current.push(a),
                }
                current.push(b);
            }
            None => flush_run(&mut current, &mut out),
        }
    }
    flush_run(&mut current, &mut out);
    MultiLineString::new(out)
}

/// Clips every member of a multilinestring to `rect`.
pub fn clip_multi_linestring(mls: &MultiLineString<f64>, rect: &Rect<f64>) -> MultiLineString<f64> {
    let mut out = Vec::new();
    for ls in &mls.0 {
        out.extend(clip_linestring(ls, rect).0);
    }
    MultiLineString::new(out)
}

fn flush_run(current: &mut Vec<Coord<f64>>, out: &mut Vec<LineString<f64>>) {
    if current.len() > 1 {
        out.push(LineString::new(std::mem::take(current)));
    } else {
        current.clear();
    }
}

/// Liang–Barsky clip of one segment; returns the surviving portion.
fn clip_segment(a: Coord<f64>, b: Coord<f64>, rect: &Rect<f64>) -> Option<(Coord<f64>, Coord<f64>)> {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;
    for (p, q) in [
        (-dx, a.x - rect.min().x),
        (dx, rect.max().x - a.x),
        (-dy, a.y - rect.min().y),
        (dy, rect.max().y - a.y),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else {
            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return None;
                }
                t0 = t0.max(r);
            } else {
                if r < t0 {
                    return None;
                }
                t1 = t1.min(r);
            }
        }
    }
    if t0 > t1 {
        return None;
    }
    Some((
        Coord {
            x: a.x + t0 * dx,
            y: a.y + t0 * dy,
        },
        Coord {
            x: a.x + t1 * dx,
            y: a.y + t1 * dy,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;

    fn unit_rect() -> Rect<f64> {
        Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 })
    }

    fn square(min: f64, max: f64) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                (min, min),
                (max, min),
                (max, max),
                (min, max),
                (min, min),
            ]),
            vec![],
        )
    }

    #[test]
    fn test_polygon_fully_inside_is_unchanged() {
        let mut mp = MultiPolygon::new(vec![square(0.2, 0.8)]);
        let before = mp.unsigned_area();
        fast_clip(&mut mp, &unit_rect());
        assert_eq!(mp.0.len(), 1);
        assert!((mp.unsigned_area() - before).abs() < 1e-12);
    }

    #[test]
    fn test_polygon_straddling_is_cut() {
        let mut mp = MultiPolygon::new(vec![square(0.5, 1.5)]);
        fast_clip(&mut mp, &unit_rect());
        assert_eq!(mp.0.len(), 1);
        assert!((mp.unsigned_area() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_polygon_outside_is_dropped() {
        let mut mp = MultiPolygon::new(vec![square(2.0, 3.0)]);
        fast_clip(&mut mp, &unit_rect());
        assert!(mp.0.is_empty());
    }

    #[test]
    fn test_linestring_crossing_is_split() {
        // In, out, back in: two runs survive.
        let ls = LineString::from(vec![(0.1, 0.5), (2.0, 0.5), (2.0, 3.0), (0.2, 0.9)]);
        let clipped = clip_linestring(&ls, &unit_rect());
        assert_eq!(clipped.0.len(), 2);
        let first = &clipped.0[0];
        assert_eq!(first.0.first().unwrap().x, 0.1);
        assert!((first.0.last().unwrap().x - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_linestring_outside_vanishes() {
        let ls = LineString::from(vec![(2.0, 2.0), (3.0, 3.0)]);
        assert!(clip_linestring(&ls, &unit_rect()).0.is_empty());
    }
}
