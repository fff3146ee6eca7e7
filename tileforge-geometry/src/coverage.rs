//! Rasterization of geometry into the set of tiles it touches.
//!
//! Coverage runs at the pyramid's base zoom: a linestring covers every tile
//! its segments pass through, and a polygon additionally covers the tiles
//! enclosed by its outer ring (scanline fill over the ring in tile space).

use ahash::AHashSet;
use geo_types::LineString;

use crate::coordinates::{
    TileCoordinates, lat_to_latp, latp_to_tile_y_frac, lon_to_tile_x_frac,
};

/// Inserts every tile a linestring's segments pass through at `zoom`.
///
/// Segments are walked with a grid traversal (crossing one tile boundary at
/// a time), so long segments cover their intermediate tiles, not just their
/// endpoints.
pub fn cover_linestring(ls: &LineString<f64>, zoom: u8, out: &mut AHashSet<TileCoordinates>) {
    let pts = &ls.0;
    if pts.is_empty() {
        return;
    }
    if pts.len() == 1 {
        out.insert(tile_of(pts[0].x, pts[0].y, zoom));
        return;
    }
    for seg in pts.windows(2) {
        cover_segment(
            lon_to_tile_x_frac(seg[0].x, zoom),
            latp_to_tile_y_frac(seg[0].y, zoom),
            lon_to_tile_x_frac(seg[1].x, zoom),
            latp_to_tile_y_frac(seg[1].y, zoom),
            zoom,
            out,
        );
    }
}

/// Inserts the tiles covered by a closed ring at `zoom`: its outline plus
/// the interior, filled row by row.
pub fn cover_ring(ring: &LineString<f64>, zoom: u8, out: &mut AHashSet<TileCoordinates>) {
    cover_linestring(ring, zoom, out);
    fill_ring_interior(ring, zoom, out);
}

/// Scanline fill of a ring's interior in tile space.
///
/// For every tile row the ring's vertical span touches, the crossings of
/// the ring with the row's center line are collected; tiles between
/// alternating crossing pairs are interior.
fn fill_ring_interior(ring: &LineString<f64>, zoom: u8, out: &mut AHashSet<TileCoordinates>) {
    let pts = &ring.0;
    if pts.len() < 4 {
        return;
    }
    let max_tile = (1u32 << zoom) - 1;

    let ys: Vec<f64> = pts.iter().map(|c| latp_to_tile_y_frac(c.y, zoom)).collect();
    let xs: Vec<f64> = pts.iter().map(|c| lon_to_tile_x_frac(c.x, zoom)).collect();
    let min_row = clamp_frac(ys.iter().cloned().fold(f64::INFINITY, f64::min), max_tile);
    let max_row = clamp_frac(ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max), max_tile);

    for row in min_row..=max_row {
        let scan_y = f64::from(row) + 0.5;
        let mut crossings: Vec<f64> = Vec::new();
        for i in 0..pts.len() - 1 {
            let (y0, y1) = (ys[i], ys[i + 1]);
            // Half-open test so a vertex on the scanline counts once.
            if (y0 <= scan_y) != (y1 <= scan_y) {
                let t = (scan_y - y0) / (y1 - y0);
                crossings.push(xs[i] + t * (xs[i + 1] - xs[i]));
            }
        }
        crossings.sort_by(f64::total_cmp);
        for pair in crossings.chunks(2) {
            if pair.len() < 2 {
                break;
            }
            let from = clamp_frac(pair[0], max_tile);
            let to = clamp_frac(pair[1], max_tile);
            for x in from..=to {
                out.insert(TileCoordinates::new(x, row));
            }
        }
    }
}

/// Grid traversal of one segment in fractional tile coordinates.
fn cover_segment(
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
    zoom: u8,
    out: &mut AHashSet<TileCoordinates>,
) {
    let max_tile = (1u32 << zoom) - 1;
    let mut tx = x0.floor() as i64;
    let mut ty = y0.floor() as i64;
    let end_x = x1.floor() as i64;
    let end_y = y1.floor() as i64;

    let step_x: i64 = if x1 > x0 { 1 } else { -1 };
    let step_y: i64 = if y1 > y0 { 1 } else { -1 };
    let dx = (x1 - x0).abs();
    let dy = (y1 - y0).abs();

    // Parametric distance to the next vertical/horizontal tile boundary.
    let mut t_max_x = if dx == 0.0 {
        f64::INFINITY
    } else if step_x > 0 {
        ((tx + 1) as f64 - x0) / (x1 - x0)
    } else {
        (tx as f64 - x0) / (x1 - x0)
    };
    let mut t_max_y = if dy == 0.0 {
        f64::INFINITY
    } else if step_y > 0 {
        ((ty + 1) as f64 - y0) / (y1 - y0)
    } else {
        (ty as f64 - y0) / (y1 - y0)
    };
    let t_delta_x = if dx == 0.0 { f64::INFINITY } else { 1.0 / dx };
    let t_delta_y = if dy == 0.0 { f64::INFINITY } else { 1.0 / dy };

    loop {
        insert_clamped(tx, ty, max_tile, out);
        if tx == end_x && ty == end_y {
            break;
        }
        if t_max_x < t_max_y {
            if t_max_x > 1.0 {
                break;
            }
            tx += step_x;
            t_max_x += t_delta_x;
        } else {
            if t_max_y > 1.0 {
                break;
            }
            ty += step_y;
            t_max_y += t_delta_y;
        }
    }
}

fn insert_clamped(tx: i64, ty: i64, max_tile: u32, out: &mut AHashSet<TileCoordinates>) {
    let x = tx.clamp(0, i64::from(max_tile)) as u32;
    let y = ty.clamp(0, i64::from(max_tile)) as u32;
    out.insert(TileCoordinates::new(x, y));
}

fn clamp_frac(frac: f64, max_tile: u32) -> u32 {
    (frac.floor().max(0.0) as u32).min(max_tile)
}

fn tile_of(lon: f64, latp: f64, zoom: u8) -> TileCoordinates {
    TileCoordinates::new(
        clamp_frac(lon_to_tile_x_frac(lon, zoom), (1u32 << zoom) - 1),
        clamp_frac(latp_to_tile_y_frac(latp, zoom), (1u32 << zoom) - 1),
    )
}

/// Convenience for a square ring in raw latitude/longitude degrees.
pub fn ring_from_lat_lon(points: &[(f64, f64)]) -> LineString<f64> {
    LineString::from(
        points
            .iter()
            .map(|&(lat, lon)| (lon, lat_to_latp(lat)))
            .collect::<Vec<_>>(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_point_covers_one_tile() {
        let ls = LineString::from(vec![(0.01, 0.01)]);
        let mut out = AHashSet::new();
        cover_linestring(&ls, 14, &mut out);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_horizontal_segment_covers_run_of_tiles() {
        // A segment spanning several z14 tiles west to east on the equator.
        let ls = LineString::from(vec![(0.0, 0.005), (0.1, 0.005)]);
        let mut out = AHashSet::new();
        cover_linestring(&ls, 14, &mut out);
        let min_x = out.iter().map(|t| t.x).min().unwrap();
        let max_x = out.iter().map(|t| t.x).max().unwrap();
        // Contiguous run in one row.
        assert_eq!(out.len() as u32, max_x - min_x + 1);
        assert!(out.iter().all(|t| t.y == out.iter().next().unwrap().y));
        assert!(out.len() >= 4);
    }

    #[test]
    fn test_diagonal_segment_is_connected() {
        let ls = LineString::from(vec![(0.0, 0.0), (0.07, 0.05)]);
        let mut out = AHashSet::new();
        cover_linestring(&ls, 14, &mut out);
        // A grid traversal's tile count for a segment is dx + dy + 1.
        let min_x = out.iter().map(|t| t.x).min().unwrap();
        let max_x = out.iter().map(|t| t.x).max().unwrap();
        let min_y = out.iter().map(|t| t.y).min().unwrap();
        let max_y = out.iter().map(|t| t.y).max().unwrap();
        assert_eq!(out.len() as u32, (max_x - min_x) + (max_y - min_y) + 1);
    }

    #[test]
    fn test_ring_interior_is_filled() {
        // A square roughly 10x10 tiles at z14.
        let ring = ring_from_lat_lon(&[
            (0.0, 0.0),
            (0.0, 0.2),
            (0.2, 0.2),
            (0.2, 0.0),
            (0.0, 0.0),
        ]);
        let mut outline = AHashSet::new();
        cover_linestring(&ring, 14, &mut outline);
        let mut filled = AHashSet::new();
        cover_ring(&ring, 14, &mut filled);
        assert!(filled.len() > outline.len());
        // The filled set is exactly the bounding rectangle of tiles here.
        let min_x = filled.iter().map(|t| t.x).min().unwrap();
        let max_x = filled.iter().map(|t| t.x).max().unwrap();
        let min_y = filled.iter().map(|t| t.y).min().unwrap();
        let max_y = filled.iter().map(|t| t.y).max().unwrap();
        assert_eq!(
            filled.len() as u32,
            (max_x - min_x + 1) * (max_y - min_y + 1)
        );
    }

    #[test]
    fn test_concave_ring_leaves_notch_empty() {
        // A "C" shape: the notch on the east side must stay uncovered.
        let ring = ring_from_lat_lon(&[
            (0.0, 0.0),
            (0.3, 0.0),
            (0.3, 0.3),
            (0.25, 0.3),
            (0.25, 0.05),
            (0.05, 0.05),
            (0.05, 0.3),
            (0.0, 0.3),
            (0.0, 0.0),
        ]);
        let mut filled = AHashSet::new();
        cover_ring(&ring, 14, &mut filled);
        // Center of the notch, well inside the "C" opening.
        let notch = tile_of(0.2, lat_to_latp(0.15), 14);
        assert!(!filled.contains(&notch));
        // A point inside the solid west bar is covered.
        let solid = tile_of(0.02, lat_to_latp(0.15), 14);
        assert!(filled.contains(&solid));
    }
}
