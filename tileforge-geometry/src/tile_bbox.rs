//! Per-tile bounding boxes in `(lon, latp)` degree space.

use geo_types::{Coord, Rect};

use crate::coordinates::{TileCoordinates, tile_x_to_lon, tile_y_to_latp};

/// Fraction of the tile dimension the clipping box extends past the tile
/// edge, so features spanning the boundary render without seams.
const CLIP_MARGIN: f64 = 0.005;
/// Fraction used by the wider box handed to line clipping.
const EXTEND_MARGIN: f64 = 0.02;

/// The footprint of one tile of the output pyramid.
#[derive(Debug, Clone, Copy)]
pub struct TileBbox {
    pub index: TileCoordinates,
    pub zoom: u8,
    /// True when this tile is at the deepest zoom being generated; the
    /// polygon clip then widens its box around inner rings that cross the
    /// tile edge.
    pub end_zoom: bool,
    min_lon: f64,
    max_lon: f64,
    min_latp: f64,
    max_latp: f64,
}

impl TileBbox {
    pub fn new(index: TileCoordinates, zoom: u8, end_zoom: bool) -> TileBbox {
        let min_lon = tile_x_to_lon(index.x, zoom);
        let max_lon = tile_x_to_lon(index.x + 1, zoom);
        let max_latp = tile_y_to_latp(index.y, zoom);
        let min_latp = tile_y_to_latp(index.y + 1, zoom);
        TileBbox {
            index,
            zoom,
            end_zoom,
            min_lon,
            max_lon,
            min_latp,
            max_latp,
        }
    }

    /// The exact tile rectangle.
    pub fn tile_box(&self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.min_lon,
                y: self.min_latp,
            },
            Coord {
                x: self.max_lon,
                y: self.max_latp,
            },
        )
    }

    /// The rectangle used for clipping geometry into this tile.
    pub fn clipping_box(&self) -> Rect<f64> {
        self.inflated(CLIP_MARGIN)
    }

    /// A wider rectangle used when clipping linework, so vertices just
    /// outside the tile keep their segments' slopes intact.
    pub fn extend_box(&self) -> Rect<f64> {
        self.inflated(EXTEND_MARGIN)
    }

    fn inflated(&self, margin: f64) -> Rect<f64> {
        let dx = (self.max_lon - self.min_lon) * margin;
        let dy = (self.max_latp - self.min_latp) * margin;
        Rect::new(
            Coord {
                x: self.min_lon - dx,
                y: self.min_latp - dy,
            },
            Coord {
                x: self.max_lon + dx,
                y: self.max_latp + dy,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinates::{LatpLon, TileCoordinates};

    #[test]
    fn test_bbox_contains_its_positions() {
        let ll = LatpLon::from_degrees(51.5, -0.1);
        let tile = ll.tile_at_zoom(14);
        let bbox = TileBbox::new(tile, 14, true);
        let rect = bbox.tile_box();
        assert!(rect.min().x <= ll.lon_degrees() && ll.lon_degrees() < rect.max().x);
        assert!(rect.min().y <= ll.latp_degrees() && ll.latp_degrees() < rect.max().y);
    }

    #[test]
    fn test_boxes_nest() {
        let bbox = TileBbox::new(TileCoordinates::new(3, 5), 4, false);
        let tile = bbox.tile_box();
        let clip = bbox.clipping_box();
        let extend = bbox.extend_box();
        assert!(clip.min().x < tile.min().x && clip.max().x > tile.max().x);
        assert!(extend.min().x < clip.min().x && extend.max().x > clip.max().x);
        assert!(extend.min().y < clip.min().y && extend.max().y > clip.max().y);
    }
}
