//! Sharded LRU cache of clipped polygons.
//!
//! Clipping a large polygon to a deep tile repeats most of the work done
//! for its parent tile, so clipped results are cached per `(zoom, tile,
//! object)` and a query at zoom `z` probes the ancestors `z-1 .. 0` for
//! the nearest previously clipped version to use as input. Entries at the
//! base zoom are refused: nothing below them can reuse the clip.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use geo_types::MultiPolygon;
use lru::LruCache;
use tileforge_geometry::{TileBbox, TileCoordinates};

use crate::object_id::ObjectId;

/// Entries per shard.
const SHARD_CAPACITY: usize = 5000;

type CacheKey = (u8, TileCoordinates, ObjectId);

pub struct ClipCache {
    base_zoom: u8,
    shards: Vec<Mutex<LruCache<CacheKey, Arc<MultiPolygon<f64>>>>>,
}

impl ClipCache {
    /// Creates a cache sharded for `threads` workers (4 shards each, keyed
    /// by object id so one object's entries stay on one lock).
    pub fn new(threads: usize, base_zoom: u8) -> ClipCache {
        let shard_count = (threads * 4).max(1);
        ClipCache {
            base_zoom,
            shards: (0..shard_count)
                .map(|_| {
                    Mutex::new(LruCache::new(NonZeroUsize::new(SHARD_CAPACITY).unwrap()))
                })
                .collect(),
        }
    }

    /// Looks for a previously clipped version of `object_id` at the
    /// ancestors of `(zoom, x, y)`, nearest first. Only strict ancestors
    /// are ever returned.
    pub fn get(
        &self,
        zoom: u8,
        x: u32,
        y: u32,
        object_id: ObjectId,
    ) -> Option<Arc<MultiPolygon<f64>>> {
        let mut shard = self.shard(object_id).lock().unwrap();
        let (mut zoom, mut x, mut y) = (zoom, x, y);
        while zoom > 0 {
            zoom -= 1;
            x /= 2;
            y /= 2;
            if let Some(mp) = shard.get(&(zoom, TileCoordinates::new(x, y), object_id)) {
                return Some(mp.clone());
            }
        }
        None
    }

    /// Caches a clipped result. Inserts at the base zoom are refused:
    /// the point of caching is reuse by deeper tiles.
    pub fn add(&self, bbox: &TileBbox, object_id: ObjectId, mp: &MultiPolygon<f64>) {
        if bbox.zoom == self.base_zoom {
            return;
        }
        let mut shard = self.shard(object_id).lock().unwrap();
        shard.put((bbox.zoom, bbox.index, object_id), Arc::new(mp.clone()));
    }

    fn shard(&self, object_id: ObjectId) -> &Mutex<LruCache<CacheKey, Arc<MultiPolygon<f64>>>> {
        &self.shards[(object_id.0 % self.shards.len() as u64) as usize]
    }
}
