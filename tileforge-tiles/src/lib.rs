//! The tile-side half of the pipeline: output objects emitted by the
//! per-entity processing, the tile data source that buckets them into the
//! z6 clustering grid (with an R-tree for large polygons), the clip cache
//! reused across zoom levels, and the named indexed layers backing the
//! profile's spatial queries.

pub mod clip_cache;
pub mod geometry_store;
pub mod indexed_layers;
pub mod object_id;
pub mod output_object;
pub mod tile_data_source;

pub use clip_cache::ClipCache;
pub use indexed_layers::IndexedLayers;
pub use object_id::ObjectId;
pub use output_object::{OutputGeometryType, OutputObject, OutputObjectWithId};
pub use tile_data_source::TileDataSource;
