//! Tile storage backends
//!
//! One contract over four backends. The public API is always XYZ-oriented;
//! each backend converts to its native row orientation internally
//! (MBTiles: TMS, XYZ directory and PostgreSQL: XYZ).

pub mod directory;
pub mod mbtiles;
pub mod pmtiles;
pub mod postgres;

pub use directory::DirectoryStore;
pub use mbtiles::MbtilesStore;
pub use pmtiles::PmtilesStore;
pub use postgres::PostgresStore;

use crate::error::{Error, Result};
use crate::format::SniffInfo;
use crate::tile::coordinate::{Scheme, TileCoordinate};
use crate::tilejson::{Metadata, TileJson};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Storage backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Xyz,
    Mbtiles,
    Postgres,
    Pmtiles,
}

/// Per-write behavior switches
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WriteOptions {
    /// Persist an MD5 of the payload alongside the tile
    #[serde(default = "default_true")]
    pub store_md5: bool,
    /// Persist fully-transparent PNGs (when false, such writes are
    /// silently suppressed)
    #[serde(default)]
    pub store_transparent: bool,
}

fn default_true() -> bool {
    true
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            store_md5: true,
            store_transparent: true,
        }
    }
}

/// How a store is opened
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub writable: bool,
    /// Bound on lock waits and busy retries for a single operation
    pub timeout: Duration,
}

impl StoreOptions {
    pub fn writable() -> Self {
        Self {
            writable: true,
            timeout: Duration::from_secs(300),
        }
    }

    pub fn read_only() -> Self {
        Self {
            writable: false,
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A tile payload plus its sniffed headers
#[derive(Debug, Clone)]
pub struct TileData {
    pub bytes: Vec<u8>,
    pub info: SniffInfo,
}

impl TileData {
    pub fn new(bytes: Vec<u8>) -> Self {
        let info = crate::format::sniff(&bytes);
        Self { bytes, info }
    }
}

/// Uniform contract over tile storage backends
#[async_trait]
pub trait TileStore: Send + Sync {
    /// Backend kind
    fn kind(&self) -> StoreKind;

    /// Native row orientation of the backend
    fn scheme(&self) -> Scheme;

    /// Fetch a tile; fails with [`Error::TileNotFound`] when absent
    async fn get_tile(&self, coord: TileCoordinate) -> Result<TileData>;

    /// Idempotent upsert. Updates the creation timestamp; suppressed for
    /// fully-transparent PNGs when `opts.store_transparent` is false.
    async fn put_tile(&self, coord: TileCoordinate, bytes: Vec<u8>, opts: &WriteOptions)
        -> Result<()>;

    /// Idempotent delete; silent when the tile is absent
    async fn delete_tile(&self, coord: TileCoordinate) -> Result<()>;

    /// Lowercase hex MD5 of the tile payload. Prefers a persisted hash,
    /// otherwise reads the payload and computes one.
    async fn tile_md5(&self, coord: TileCoordinate) -> Result<String>;

    /// Creation time in milliseconds since the epoch; fails with
    /// [`Error::CreatedNotFound`] when unknown
    async fn tile_created(&self, coord: TileCoordinate) -> Result<i64>;

    /// Merge into the persisted metadata, preserving keys not present in
    /// `merge`
    async fn put_metadata(&self, merge: &Metadata) -> Result<()>;

    /// Synthesized TileJSON for the tileset
    async fn info(&self) -> Result<TileJson>;

    /// Post-cleanup housekeeping (e.g. pruning empty directories)
    async fn vacuum(&self) -> Result<()> {
        Ok(())
    }

    /// Flush and release underlying resources
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Lowercase hex MD5 digest of a payload
pub fn md5_hex(bytes: &[u8]) -> String {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Run a blocking backend operation, retrying transient busy errors on a
/// 50 ms poll until `timeout` elapses.
pub(crate) async fn retry_busy<T, F>(timeout: Duration, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match op() {
            Err(e) if e.is_busy() => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(Error::Timeout(what.to_string()));
                }
                tokio::time::sleep(crate::fslock::LOCK_POLL).await;
            }
            other => return other,
        }
    }
}

/// Async variant of [`retry_busy`] for backends whose operations await
pub(crate) async fn retry_busy_async<T, F, Fut>(
    timeout: Duration,
    what: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match op().await {
            Err(e) if e.is_busy() => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(Error::Timeout(what.to_string()));
                }
                tokio::time::sleep(crate::fslock::LOCK_POLL).await;
            }
            other => return other,
        }
    }
}
