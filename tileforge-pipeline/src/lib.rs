//! The read pipeline: a phased driver that walks an OSM PBF's blocks
//! (Nodes, RelationScan, Ways, Relations), the per-worker processing
//! object bridging entities to the user profile, and the tile sinks the
//! finished pyramid is written to.

pub mod block;
pub mod driver;
pub mod function_cache;
pub mod layers;
pub mod pbf_source;
pub mod processing;
pub mod runtime;
pub mod sinks;
pub mod way_nodes;


pub use block::{BlockSource, MemoryBlockSource, PbfHeader, PrimitiveBlock};
pub use driver::{DriverOptions, PbfDriver};
pub use function_cache::{CachedFunction, FunctionCache};
pub use layers::{Layer, Layers};
pub use processing::{Feature, Processing};
pub use runtime::{ScriptRuntime, ScriptRuntimeFactory};
pub use sinks::{MemorySink, TileSink, sink_for_path};
