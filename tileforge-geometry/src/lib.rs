//! Geometry support for the tile pipeline: the projected coordinate space,
//! tile addressing, tile-coverage rasterization, box clipping, geometry
//! repair and the pole-of-inaccessibility centroid.
//!
//! All planar geometry lives in `(lon, latp)` degree space: `lon` is the raw
//! longitude and `latp` is the latitude pre-projected by the Web Mercator
//! transform, so that Euclidean operations approximate planar ones and a
//! zoom-`z` tile is an axis-aligned square.

pub mod clip;
pub mod coordinates;
pub mod correct;
pub mod coverage;
pub mod polylabel;
pub mod tile_bbox;

pub use coordinates::{CLUSTER_ZOOM, CLUSTER_ZOOM_AREA, CLUSTER_ZOOM_WIDTH, LatpLon, TileCoordinates};
pub use tile_bbox::TileBbox;
