//! In-memory tile response cache

use crate::storage::TileData;
use crate::tile::coordinate::TileCoordinate;
use moka::future::Cache;
use std::sync::Arc;

/// LRU cache over served tiles, keyed by tileset id and coordinate
pub struct TileCache {
    cache: Cache<(String, TileCoordinate), Arc<TileData>>,
}

impl TileCache {
    /// Create a cache bounded to `max_capacity` tiles
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder().max_capacity(max_capacity).build();
        Self { cache }
    }

    /// Get a cached tile
    pub async fn get(&self, id: &str, coord: TileCoordinate) -> Option<Arc<TileData>> {
        self.cache.get(&(id.to_string(), coord)).await
    }

    /// Put a tile in the cache
    pub async fn put(&self, id: &str, coord: TileCoordinate, tile: Arc<TileData>) {
        self.cache.insert((id.to_string(), coord), tile).await;
    }

    /// Remove a tile from the cache
    pub async fn remove(&self, id: &str, coord: TileCoordinate) {
        self.cache.invalidate(&(id.to_string(), coord)).await;
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Number of cached entries
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}
