//! # TileDepot
//!
//! Tile cache server and seeding engine.
//!
//! TileDepot serves XYZ map tiles, TileJSON documents, styles, sprites,
//! glyph ranges and GeoJSON, persisting tiles into one of three writable
//! backends (an XYZ directory tree, an MBTiles SQLite file, a PostgreSQL
//! table) plus a read-only PMTiles backend. A companion seeder pre-fetches
//! tiles from an upstream tile URL and a cleanup worker expires stale ones.
//!
//! ## Example
//!
//! ```no_run
//! use tiledepot::storage::{directory::DirectoryStore, StoreOptions, TileStore, WriteOptions};
//! use tiledepot::tile::coordinate::TileCoordinate;
//!
//! # async fn example() -> tiledepot::Result<()> {
//! let store = DirectoryStore::open("/data/caches/xyzs/osm", StoreOptions::writable()).await?;
//! let coord = TileCoordinate::new(6, 32, 21);
//! store
//!     .put_tile(coord, vec![0x1f, 0x8b, 0x08, 0x00], &WriteOptions::default())
//!     .await?;
//! let tile = store.get_tile(coord).await?;
//! assert_eq!(tile.bytes.len(), 4);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod error;
pub mod format;
pub mod fslock;
pub mod geojson;
pub mod repository;
pub mod seeding;
pub mod server;
pub mod storage;
pub mod style;
pub mod tile;
pub mod tilejson;
pub mod transparency;
pub mod vector;

// Re-export commonly used types
pub use error::{Error, Result};
pub use format::TileFormat;
pub use tile::bounds::LonLatBounds;
pub use tile::coordinate::{Scheme, TileCoordinate};

/// Current version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Tile edge length in pixels
pub const TILE_SIZE: u32 = 256;

/// Maximum zoom level supported
pub const MAX_ZOOM_LEVEL: u8 = 22;

/// Minimum zoom level
pub const MIN_ZOOM_LEVEL: u8 = 0;

/// User agent sent on every upstream request
pub const USER_AGENT: &str = "Tile Server";
