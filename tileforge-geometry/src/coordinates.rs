//! The fixed-point coordinate space and tile addressing.

use geo_types::Point;

/// Zoom level of the clustering grid used by the tile data source.
pub const CLUSTER_ZOOM: u8 = 6;
/// Tiles per axis at the clustering zoom.
pub const CLUSTER_ZOOM_WIDTH: u32 = 1 << CLUSTER_ZOOM;
/// Total cells in the clustering grid.
pub const CLUSTER_ZOOM_AREA: usize = (CLUSTER_ZOOM_WIDTH * CLUSTER_ZOOM_WIDTH) as usize;

/// A tile column or row index.
pub type TileCoordinate = u32;

/// A tile address at some zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoordinates {
    pub x: TileCoordinate,
    pub y: TileCoordinate,
}

impl TileCoordinates {
    pub fn new(x: TileCoordinate, y: TileCoordinate) -> TileCoordinates {
        TileCoordinates { x, y }
    }

    /// The tile containing this tile at a coarser zoom, `levels` steps up.
    pub fn ancestor(&self, levels: u8) -> TileCoordinates {
        TileCoordinates {
            x: self.x >> levels,
            y: self.y >> levels,
        }
    }
}

/// A position stored as integer ten-millionths of a degree: projected
/// latitude (`latp`) and raw longitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LatpLon {
    pub latp: i32,
    pub lon: i32,
}

const DEGREE_SCALE: f64 = 10_000_000.0;

impl LatpLon {
    /// Builds a position from raw WGS84 degrees, projecting the latitude.
    pub fn from_degrees(lat: f64, lon: f64) -> LatpLon {
        LatpLon {
            latp: (lat_to_latp(lat) * DEGREE_SCALE) as i32,
            lon: (lon * DEGREE_SCALE) as i32,
        }
    }

    /// Builds a position from nano-degree integers as stored in a PBF
    /// (value × 1e-9 degrees).
    pub fn from_nano_degrees(lat: i64, lon: i64) -> LatpLon {
        LatpLon::from_degrees(lat as f64 * 1e-9, lon as f64 * 1e-9)
    }

    pub fn latp_degrees(&self) -> f64 {
        self.latp as f64 / DEGREE_SCALE
    }

    pub fn lon_degrees(&self) -> f64 {
        self.lon as f64 / DEGREE_SCALE
    }

    /// Latitude in raw WGS84 degrees (inverse of the projection).
    pub fn lat_degrees(&self) -> f64 {
        latp_to_lat(self.latp_degrees())
    }

    /// The position as a planar point in `(lon, latp)` degree space.
    pub fn to_point(&self) -> Point<f64> {
        Point::new(self.lon_degrees(), self.latp_degrees())
    }

    /// The tile containing this position at `zoom`.
    pub fn tile_at_zoom(&self, zoom: u8) -> TileCoordinates {
        TileCoordinates {
            x: lon_to_tile_x(self.lon_degrees(), zoom),
            y: latp_to_tile_y(self.latp_degrees(), zoom),
        }
    }
}

/// Web Mercator latitude projection, in degrees.
pub fn lat_to_latp(lat: f64) -> f64 {
    f64::asinh(lat.to_radians().tan()).to_degrees()
}

/// Inverse of [`lat_to_latp`].
pub fn latp_to_lat(latp: f64) -> f64 {
    f64::atan(latp.to_radians().sinh()).to_degrees()
}

/// Fractional tile column for a longitude at `zoom`.
pub fn lon_to_tile_x_frac(lon: f64, zoom: u8) -> f64 {
    (lon + 180.0) / 360.0 * f64::from(1u32 << zoom)
}

/// Fractional tile row for a projected latitude at `zoom`.
pub fn latp_to_tile_y_frac(latp: f64, zoom: u8) -> f64 {
    (180.0 - latp) / 360.0 * f64::from(1u32 << zoom)
}

pub fn lon_to_tile_x(lon: f64, zoom: u8) -> TileCoordinate {
    clamp_tile(lon_to_tile_x_frac(lon, zoom), zoom)
}

pub fn latp_to_tile_y(latp: f64, zoom: u8) -> TileCoordinate {
    clamp_tile(latp_to_tile_y_frac(latp, zoom), zoom)
}

/// West edge of tile column `x` at `zoom`, in degrees longitude.
pub fn tile_x_to_lon(x: TileCoordinate, zoom: u8) -> f64 {
    f64::from(x) / f64::from(1u32 << zoom) * 360.0 - 180.0
}

/// North edge of tile row `y` at `zoom`, in projected-latitude degrees.
pub fn tile_y_to_latp(y: TileCoordinate, zoom: u8) -> f64 {
    180.0 - f64::from(y) / f64::from(1u32 << zoom) * 360.0
}

fn clamp_tile(frac: f64, zoom: u8) -> TileCoordinate {
    let max = (1u32 << zoom) - 1;
    (frac.floor().max(0.0) as u32).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latp_round_trip() {
        for lat in [-85.0, -45.5, 0.0, 1e-6, 51.5, 85.0] {
            let latp = lat_to_latp(lat);
            assert!((latp_to_lat(latp) - lat).abs() < 1e-9, "lat {lat}");
        }
        // The projection is symmetric and fixed at the equator.
        assert_eq!(lat_to_latp(0.0), 0.0);
        assert!((lat_to_latp(60.0) + lat_to_latp(-60.0)).abs() < 1e-9);
    }

    #[test]
    fn test_from_degrees() {
        let ll = LatpLon::from_degrees(51.5, -0.1);
        assert_eq!(ll.lon, -1_000_000);
        assert!((ll.lat_degrees() - 51.5).abs() < 1e-5);
        assert!(ll.latp > 51_5000000); // projected latitude grows poleward
    }

    #[test]
    fn test_tile_addressing() {
        // Greenwich is in the east half, northern hemisphere.
        let ll = LatpLon::from_degrees(51.5, -0.1);
        let tile = ll.tile_at_zoom(14);
        assert_eq!(tile, TileCoordinates::new(8187, 5448));
        assert_eq!(tile.ancestor(8), TileCoordinates::new(31, 21));

        // Tile edges invert the mapping.
        let lon = tile_x_to_lon(tile.x, 14);
        assert!(lon <= ll.lon_degrees());
        assert!(tile_x_to_lon(tile.x + 1, 14) > ll.lon_degrees());
        let latp = tile_y_to_latp(tile.y, 14);
        assert!(latp >= ll.latp_degrees());
        assert!(tile_y_to_latp(tile.y + 1, 14) < ll.latp_degrees());
    }

    #[test]
    fn test_clamping() {
        assert_eq!(lon_to_tile_x(-180.0, 2), 0);
        assert_eq!(lon_to_tile_x(180.0, 2), 3);
        assert_eq!(latp_to_tile_y(180.0, 2), 0);
        assert_eq!(latp_to_tile_y(-180.0, 2), 3);
    }
}
