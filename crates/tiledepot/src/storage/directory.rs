//! XYZ directory-tree tile storage
//!
//! Layout under `root/`:
//!
//! ```text
//! root/{z}/{x}/{y}.{format}    tile payloads
//! root/metadata.json           metadata map
//! root/md5.sqlite              optional MD5 sidecar, md5s(z,x,y,hash)
//! ```
//!
//! Writers take a per-path sidecar lock and replace files via temp-rename;
//! readers never lock and observe either a complete file or ENOENT.

use crate::error::{Error, Result};
use crate::format::TileFormat;
use crate::fslock;
use crate::storage::{
    md5_hex, retry_busy, StoreKind, StoreOptions, TileData, TileStore, WriteOptions,
};
use crate::tile::bounds::LonLatBounds;
use crate::tile::coordinate::{Scheme, TileCoordinate};
use crate::tilejson::{Metadata, TileJson, VectorLayer};
use crate::transparency;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::fs;

/// Concurrency bound for the vector-layer derivation scan
const LAYER_SCAN_CONCURRENCY: usize = 100;

/// Directory-tree tile store
pub struct DirectoryStore {
    root: PathBuf,
    writable: bool,
    timeout: Duration,
    /// Fixed per store; discovered from metadata or leaves, or pinned by
    /// the first write.
    format: RwLock<Option<TileFormat>>,
    md5: Mutex<Option<Connection>>,
}

impl DirectoryStore {
    /// Open (and for writable stores, create) a directory store
    pub async fn open<P: AsRef<Path>>(root: P, opts: StoreOptions) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if opts.writable {
            fs::create_dir_all(&root).await?;
        } else if !root.is_dir() {
            return Err(Error::corrupt(format!(
                "missing tile directory: {}",
                root.display()
            )));
        }

        let store = Self {
            root,
            writable: opts.writable,
            timeout: opts.timeout,
            format: RwLock::new(None),
            md5: Mutex::new(None),
        };

        let format = match store.persisted_metadata().await?.and_then(|m| m.format) {
            Some(format) => Some(format),
            None => store.scan_leaf_format().await?,
        };
        *store.format.write().expect("format lock") = format;

        Ok(store)
    }

    /// Pin the tile format instead of discovering it
    pub fn with_format(self, format: TileFormat) -> Self {
        *self.format.write().expect("format lock") = Some(format);
        self
    }

    fn current_format(&self) -> Option<TileFormat> {
        *self.format.read().expect("format lock")
    }

    fn tile_path(&self, coord: TileCoordinate, format: TileFormat) -> PathBuf {
        self.root
            .join(coord.z.to_string())
            .join(coord.x.to_string())
            .join(format!("{}.{}", coord.y, format.ext()))
    }

    fn metadata_path(&self) -> PathBuf {
        self.root.join("metadata.json")
    }

    fn md5_db_path(&self) -> PathBuf {
        self.root.join("md5.sqlite")
    }

    /// Run `op` against the MD5 sidecar. Returns `None` when the sidecar
    /// does not exist and `create` is false.
    fn with_md5<T>(
        &self,
        create: bool,
        op: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<Option<T>> {
        let mut slot = self.md5.lock().expect("md5 lock");
        if slot.is_none() {
            let path = self.md5_db_path();
            if !create && !path.exists() {
                return Ok(None);
            }
            let conn = Connection::open(&path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.busy_timeout(Duration::from_secs(300))?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS md5s (
                    z INTEGER NOT NULL,
                    x INTEGER NOT NULL,
                    y INTEGER NOT NULL,
                    hash TEXT,
                    PRIMARY KEY (z, x, y)
                )",
                [],
            )?;
            *slot = Some(conn);
        }
        let conn = slot.as_ref().expect("sidecar just initialized");
        Ok(Some(op(conn)?))
    }

    async fn persisted_metadata(&self) -> Result<Option<Metadata>> {
        match fs::read(self.metadata_path()).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Numeric child directories of the root, i.e. populated zoom levels
    async fn scan_zooms(&self) -> Result<Vec<u8>> {
        let mut zooms = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(z) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u8>().ok())
            {
                if z <= crate::MAX_ZOOM_LEVEL {
                    zooms.push(z);
                }
            }
        }
        zooms.sort_unstable();
        Ok(zooms)
    }

    /// Min/max tile indexes present at one zoom level
    async fn scan_range(&self, z: u8) -> Result<Option<(u32, u32, u32, u32)>> {
        let z_dir = self.root.join(z.to_string());
        let mut range: Option<(u32, u32, u32, u32)> = None;

        let mut x_entries = fs::read_dir(&z_dir).await?;
        while let Some(x_entry) = x_entries.next_entry().await? {
            let Some(x) = x_entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
            else {
                continue;
            };

            let mut y_entries = fs::read_dir(x_entry.path()).await?;
            while let Some(y_entry) = y_entries.next_entry().await? {
                let Some(y) = Path::new(&y_entry.file_name())
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .and_then(|stem| stem.parse::<u32>().ok())
                else {
                    continue;
                };

                range = Some(match range {
                    None => (x, x, y, y),
                    Some((x0, x1, y0, y1)) => (x0.min(x), x1.max(x), y0.min(y), y1.max(y)),
                });
            }
        }
        Ok(range)
    }

    /// Extension of the first tile leaf found
    async fn scan_leaf_format(&self) -> Result<Option<TileFormat>> {
        for z in self.scan_zooms().await? {
            let z_dir = self.root.join(z.to_string());
            let mut x_entries = fs::read_dir(&z_dir).await?;
            while let Some(x_entry) = x_entries.next_entry().await? {
                if !x_entry.file_type().await?.is_dir() {
                    continue;
                }
                let mut y_entries = fs::read_dir(x_entry.path()).await?;
                while let Some(y_entry) = y_entries.next_entry().await? {
                    if let Some(format) = y_entry
                        .path()
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .and_then(|ext| TileFormat::from_ext(ext).ok())
                    {
                        return Ok(Some(format));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Union of layer names across `.pbf` leaves, decoded with bounded
    /// concurrency
    async fn scan_vector_layers(&self) -> Result<Vec<VectorLayer>> {
        let mut paths = Vec::new();
        for z in self.scan_zooms().await? {
            let z_dir = self.root.join(z.to_string());
            let mut x_entries = fs::read_dir(&z_dir).await?;
            while let Some(x_entry) = x_entries.next_entry().await? {
                if !x_entry.file_type().await?.is_dir() {
                    continue;
                }
                let mut y_entries = fs::read_dir(x_entry.path()).await?;
                while let Some(y_entry) = y_entries.next_entry().await? {
                    let path = y_entry.path();
                    if path.extension().and_then(|e| e.to_str()) == Some("pbf") {
                        paths.push(path);
                    }
                }
            }
        }

        let semaphore = Arc::new(tokio::sync::Semaphore::new(LAYER_SCAN_CONCURRENCY));
        let mut tasks = tokio::task::JoinSet::new();
        for path in paths {
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let bytes = fs::read(&path).await.ok()?;
                crate::vector::layer_names(&bytes).ok()
            });
        }

        let mut names = BTreeSet::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok(Some(layer_names)) = joined {
                names.extend(layer_names);
            }
        }
        Ok(names.into_iter().map(VectorLayer::named).collect())
    }

    async fn derive_metadata(&self) -> Result<Metadata> {
        let mut derived = Metadata::default();
        derived.name = self
            .root
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string);
        derived.format = self.current_format();

        let zooms = self.scan_zooms().await?;
        if let (Some(&min), Some(&max)) = (zooms.first(), zooms.last()) {
            derived.minzoom = Some(min);
            derived.maxzoom = Some(max);

            let mut bounds: Option<LonLatBounds> = None;
            for &z in &zooms {
                if let Some((x_min, x_max, y_min, y_max)) = self.scan_range(z).await? {
                    let zoom_bounds =
                        LonLatBounds::from_tile_range(x_min, y_min, x_max, y_max, z, Scheme::Xyz);
                    bounds = Some(match bounds {
                        None => zoom_bounds,
                        Some(existing) => existing.union(&zoom_bounds),
                    });
                }
            }
            derived.bounds = bounds.map(|b| b.to_array());
        }

        if derived.format == Some(TileFormat::Pbf) {
            let layers = self.scan_vector_layers().await?;
            if !layers.is_empty() {
                derived.vector_layers = Some(layers);
            }
        }

        Ok(derived)
    }

    /// Remove `z/x` directories that no longer hold any tile leaves,
    /// bottom-up
    pub async fn remove_empty_dirs(&self) -> Result<()> {
        for z in self.scan_zooms().await? {
            let z_dir = self.root.join(z.to_string());
            let mut x_entries = fs::read_dir(&z_dir).await?;
            while let Some(x_entry) = x_entries.next_entry().await? {
                if !x_entry.file_type().await?.is_dir() {
                    continue;
                }
                // remove_dir fails on non-empty directories, which is the
                // check itself.
                let _ = fs::remove_dir(x_entry.path()).await;
            }
            let _ = fs::remove_dir(&z_dir).await;
        }
        Ok(())
    }

    fn require_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(Error::Unsupported("store is read-only".into()))
        }
    }
}

#[async_trait]
impl TileStore for DirectoryStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Xyz
    }

    fn scheme(&self) -> Scheme {
        Scheme::Xyz
    }

    async fn get_tile(&self, coord: TileCoordinate) -> Result<TileData> {
        let Some(format) = self.current_format() else {
            return Err(Error::TileNotFound);
        };
        match fs::read(self.tile_path(coord, format)).await {
            Ok(bytes) => Ok(TileData::new(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::TileNotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_tile(
        &self,
        coord: TileCoordinate,
        bytes: Vec<u8>,
        opts: &WriteOptions,
    ) -> Result<()> {
        self.require_writable()?;
        coord.validate()?;

        let info = crate::format::sniff(&bytes);
        if info.format == TileFormat::Png
            && !opts.store_transparent
            && transparency::is_fully_transparent(&bytes)
        {
            tracing::debug!("suppressing fully transparent tile {coord}");
            return Ok(());
        }

        let format = match self.current_format() {
            Some(format) => format,
            None => {
                *self.format.write().expect("format lock") = Some(info.format);
                info.format
            }
        };

        let path = self.tile_path(coord, format);
        let guard = fslock::acquire(&path, self.timeout).await?;
        fslock::atomic_write(&path, &bytes).await?;
        if opts.store_md5 {
            let hash = md5_hex(&bytes);
            retry_busy(self.timeout, "md5 sidecar upsert", || {
                self.with_md5(true, |conn| {
                    conn.execute(
                        "INSERT INTO md5s (z, x, y, hash) VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT (z, x, y) DO UPDATE SET hash = excluded.hash",
                        params![coord.z, coord.x, coord.y, hash],
                    )
                })
            })
            .await?;
        }
        drop(guard);
        Ok(())
    }

    async fn delete_tile(&self, coord: TileCoordinate) -> Result<()> {
        self.require_writable()?;
        let Some(format) = self.current_format() else {
            return Ok(());
        };

        let path = self.tile_path(coord, format);
        let guard = fslock::acquire(&path, self.timeout).await?;
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                drop(guard);
                return Err(e.into());
            }
        }
        retry_busy(self.timeout, "md5 sidecar delete", || {
            self.with_md5(false, |conn| {
                conn.execute(
                    "DELETE FROM md5s WHERE z = ?1 AND x = ?2 AND y = ?3",
                    params![coord.z, coord.x, coord.y],
                )
            })
        })
        .await?;
        drop(guard);
        Ok(())
    }

    async fn tile_md5(&self, coord: TileCoordinate) -> Result<String> {
        let persisted = retry_busy(self.timeout, "md5 sidecar select", || {
            self.with_md5(false, |conn| {
                conn.query_row(
                    "SELECT hash FROM md5s WHERE z = ?1 AND x = ?2 AND y = ?3",
                    params![coord.z, coord.x, coord.y],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()
            })
        })
        .await?;
        if let Some(Some(Some(hash))) = persisted {
            return Ok(hash);
        }

        match self.get_tile(coord).await {
            Ok(tile) => Ok(md5_hex(&tile.bytes)),
            Err(Error::TileNotFound) => Err(Error::TileMd5NotFound),
            Err(e) => Err(e),
        }
    }

    async fn tile_created(&self, coord: TileCoordinate) -> Result<i64> {
        let Some(format) = self.current_format() else {
            return Err(Error::CreatedNotFound);
        };
        let metadata = match fs::metadata(self.tile_path(coord, format)).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(Error::CreatedNotFound),
            Err(e) => return Err(e.into()),
        };
        let modified = metadata.modified()?;
        let since_epoch = modified
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|_| Error::CreatedNotFound)?;
        Ok(since_epoch.as_millis() as i64)
    }

    async fn put_metadata(&self, merge: &Metadata) -> Result<()> {
        self.require_writable()?;
        let path = self.metadata_path();
        let guard = fslock::acquire(&path, self.timeout).await?;

        let mut metadata = self.persisted_metadata().await?.unwrap_or_default();
        metadata.merge(merge);
        metadata.scheme = Some(Scheme::Xyz);
        if let Some(format) = metadata.format {
            *self.format.write().expect("format lock") = Some(format);
        }

        let bytes = serde_json::to_vec_pretty(&metadata)?;
        fslock::atomic_write(&path, &bytes).await?;
        drop(guard);
        Ok(())
    }

    async fn info(&self) -> Result<TileJson> {
        let mut metadata = self.persisted_metadata().await?.unwrap_or_default();
        let needs_derivation = metadata.minzoom.is_none()
            || metadata.maxzoom.is_none()
            || metadata.bounds.is_none()
            || metadata.format.is_none()
            || (metadata.format == Some(TileFormat::Pbf) && metadata.vector_layers.is_none());
        if needs_derivation {
            let derived = self.derive_metadata().await?;
            metadata.fill_missing(&derived);
        }
        metadata.fill_missing(&Metadata::defaults());
        metadata.fill_center();
        metadata.scheme = Some(Scheme::Xyz);
        Ok(TileJson::new(metadata))
    }

    async fn vacuum(&self) -> Result<()> {
        self.remove_empty_dirs().await
    }

    async fn close(&self) -> Result<()> {
        let slot = self.md5.lock().expect("md5 lock");
        if let Some(conn) = slot.as_ref() {
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;
    use tempfile::tempdir;

    const PNG_TILE: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x01];

    async fn writable(root: &Path) -> DirectoryStore {
        DirectoryStore::open(root, StoreOptions::writable())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let temp = tempdir().unwrap();
        let store = writable(temp.path()).await;
        let coord = TileCoordinate::new(6, 32, 21);

        store
            .put_tile(coord, PNG_TILE.to_vec(), &WriteOptions::default())
            .await
            .unwrap();
        assert!(temp.path().join("6/32/21.png").is_file());

        let tile = store.get_tile(coord).await.unwrap();
        assert_eq!(tile.bytes, PNG_TILE);
        assert_eq!(tile.info.format, TileFormat::Png);

        store.delete_tile(coord).await.unwrap();
        assert!(matches!(
            store.get_tile(coord).await,
            Err(Error::TileNotFound)
        ));
        // Idempotent on absent tiles
        store.delete_tile(coord).await.unwrap();
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let temp = tempdir().unwrap();
        let store = writable(temp.path()).await;
        let coord = TileCoordinate::new(3, 1, 2);

        store
            .put_tile(coord, PNG_TILE.to_vec(), &WriteOptions::default())
            .await
            .unwrap();
        store
            .put_tile(coord, PNG_TILE.to_vec(), &WriteOptions::default())
            .await
            .unwrap();

        assert_eq!(store.get_tile(coord).await.unwrap().bytes, PNG_TILE);
        assert!(!temp.path().join("3/1/2.png.tmp").exists());
        assert!(!temp.path().join("3/1/2.png.lock").exists());
    }

    #[tokio::test]
    async fn test_md5_prefers_sidecar() {
        let temp = tempdir().unwrap();
        let store = writable(temp.path()).await;
        let coord = TileCoordinate::new(5, 1, 1);

        store
            .put_tile(coord, PNG_TILE.to_vec(), &WriteOptions::default())
            .await
            .unwrap();
        assert!(temp.path().join("md5.sqlite").exists());
        assert_eq!(store.tile_md5(coord).await.unwrap(), md5_hex(PNG_TILE));
    }

    #[tokio::test]
    async fn test_md5_computed_when_not_stored() {
        let temp = tempdir().unwrap();
        let store = writable(temp.path()).await;
        let coord = TileCoordinate::new(5, 1, 1);
        let opts = WriteOptions {
            store_md5: false,
            store_transparent: true,
        };

        store.put_tile(coord, PNG_TILE.to_vec(), &opts).await.unwrap();
        assert_eq!(store.tile_md5(coord).await.unwrap(), md5_hex(PNG_TILE));

        let absent = TileCoordinate::new(5, 2, 2);
        assert!(matches!(
            store.tile_md5(absent).await,
            Err(Error::TileMd5NotFound)
        ));
    }

    #[tokio::test]
    async fn test_transparent_png_suppressed() {
        let temp = tempdir().unwrap();
        let store = writable(temp.path()).await;
        let coord = TileCoordinate::new(4, 0, 0);

        let transparent = {
            let mut out = Vec::new();
            let mut encoder = png::Encoder::new(&mut out, 2, 2);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(&[0u8; 16]).unwrap();
            writer.finish().unwrap();
            out
        };

        let opts = WriteOptions {
            store_md5: true,
            store_transparent: false,
        };
        store.put_tile(coord, transparent, &opts).await.unwrap();
        assert!(matches!(
            store.get_tile(coord).await,
            Err(Error::TileNotFound)
        ));

        // Non-PNG bytes bypass the check entirely
        store
            .put_tile(coord, vec![0x0A, 0x0B], &opts)
            .await
            .unwrap();
        assert!(store.get_tile(coord).await.is_ok());
    }

    #[tokio::test]
    async fn test_metadata_merge_preserves_keys() {
        let temp = tempdir().unwrap();
        let store = writable(temp.path()).await;

        let mut first = Metadata::default();
        first.name = Some("cache".into());
        first.minzoom = Some(2);
        store.put_metadata(&first).await.unwrap();

        let mut second = Metadata::default();
        second.maxzoom = Some(9);
        store.put_metadata(&second).await.unwrap();

        let info = store.info().await.unwrap();
        assert_eq!(info.metadata.name.as_deref(), Some("cache"));
        assert_eq!(info.metadata.minzoom, Some(2));
        assert_eq!(info.metadata.maxzoom, Some(9));
        assert_eq!(info.metadata.scheme, Some(Scheme::Xyz));
    }

    #[tokio::test]
    async fn test_info_derivation_from_tree() {
        let temp = tempdir().unwrap();
        let store = writable(temp.path()).await;

        let pbf = crate::vector::mvt::Tile {
            layers: vec![crate::vector::mvt::Layer {
                name: "roads".into(),
                version: 2,
            }],
        }
        .encode_to_vec();

        let opts = WriteOptions::default();
        store
            .put_tile(TileCoordinate::new(5, 10, 10), pbf.clone(), &opts)
            .await
            .unwrap();
        store
            .put_tile(TileCoordinate::new(7, 40, 41), pbf, &opts)
            .await
            .unwrap();

        let info = store.info().await.unwrap();
        assert_eq!(info.metadata.minzoom, Some(5));
        assert_eq!(info.metadata.maxzoom, Some(7));
        assert_eq!(info.metadata.format, Some(TileFormat::Pbf));

        let layers = info.metadata.vector_layers.unwrap();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].id, "roads");

        let bounds = LonLatBounds::from_array(info.metadata.bounds.unwrap());
        let expected = LonLatBounds::from_tile_range(10, 10, 10, 10, 5, Scheme::Xyz);
        assert!(bounds.west <= expected.west && bounds.east >= expected.east);
        assert!(info.metadata.center.is_some());
    }

    #[tokio::test]
    async fn test_created_timestamp() {
        let temp = tempdir().unwrap();
        let store = writable(temp.path()).await;
        let coord = TileCoordinate::new(2, 1, 1);

        let before = chrono::Utc::now().timestamp_millis();
        store
            .put_tile(coord, PNG_TILE.to_vec(), &WriteOptions::default())
            .await
            .unwrap();
        let created = store.tile_created(coord).await.unwrap();
        assert!(created >= before - 2_000);

        assert!(matches!(
            store.tile_created(TileCoordinate::new(2, 0, 0)).await,
            Err(Error::CreatedNotFound)
        ));
    }

    #[tokio::test]
    async fn test_remove_empty_dirs() {
        let temp = tempdir().unwrap();
        let store = writable(temp.path()).await;
        let keep = TileCoordinate::new(4, 2, 2);
        let gone = TileCoordinate::new(5, 9, 9);
        let opts = WriteOptions::default();

        store.put_tile(keep, PNG_TILE.to_vec(), &opts).await.unwrap();
        store.put_tile(gone, PNG_TILE.to_vec(), &opts).await.unwrap();
        store.delete_tile(gone).await.unwrap();
        store.remove_empty_dirs().await.unwrap();

        assert!(temp.path().join("4/2/2.png").is_file());
        assert!(!temp.path().join("5").exists());
    }

    #[tokio::test]
    async fn test_concurrent_same_tile_writes() {
        let temp = tempdir().unwrap();
        let store = Arc::new(writable(temp.path()).await);
        let coord = TileCoordinate::new(5, 0, 0);

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..2 {
            let store = Arc::clone(&store);
            tasks.spawn(async move {
                store
                    .put_tile(coord, PNG_TILE.to_vec(), &WriteOptions::default())
                    .await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        assert_eq!(store.get_tile(coord).await.unwrap().bytes, PNG_TILE);
        assert!(!temp.path().join("5/0/0.png.lock").exists());
        assert!(!temp.path().join("5/0/0.png.tmp").exists());
    }
}
