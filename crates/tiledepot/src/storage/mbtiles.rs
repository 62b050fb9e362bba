//! MBTiles storage backend
//!
//! Standard `metadata(name, value)` + `tiles(zoom_level, tile_column,
//! tile_row, tile_data)` schema, extended with nullable `hash` and
//! `created` columns. Rows are stored in TMS orientation; the public API
//! is XYZ and the flip happens only at this boundary.

use crate::error::{Error, Result};
use crate::format::TileFormat;
use crate::storage::{
    md5_hex, retry_busy, StoreKind, StoreOptions, TileData, TileStore, WriteOptions,
};
use crate::tile::coordinate::{Scheme, TileCoordinate};
use crate::tilejson::{Metadata, TileJson, VectorLayer};
use crate::transparency;
use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Page size of the vector-layer derivation scan
const LAYER_SCAN_PAGE: usize = 200;

/// MBTiles tile store
pub struct MbtilesStore {
    path: PathBuf,
    conn: Mutex<Connection>,
    writable: bool,
    timeout: Duration,
    has_hash: bool,
    has_created: bool,
}

impl MbtilesStore {
    /// Open (and for writable stores, create) an MBTiles database
    pub async fn open<P: AsRef<Path>>(path: P, opts: StoreOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let conn = if opts.writable {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let conn = Connection::open(&path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.busy_timeout(Duration::from_secs(300))?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS metadata (
                    name TEXT PRIMARY KEY,
                    value TEXT
                )",
                [],
            )?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS tiles (
                    zoom_level INTEGER NOT NULL,
                    tile_column INTEGER NOT NULL,
                    tile_row INTEGER NOT NULL,
                    tile_data BLOB,
                    hash TEXT,
                    created INTEGER,
                    PRIMARY KEY (zoom_level, tile_column, tile_row)
                )",
                [],
            )?;

            // Older files predate the hash/created columns; add them so
            // upserts keep a single statement shape.
            for (column, ddl) in [("hash", "hash TEXT"), ("created", "created INTEGER")] {
                if !table_has_column(&conn, "tiles", column)? {
                    conn.execute(&format!("ALTER TABLE tiles ADD COLUMN {ddl}"), [])?;
                }
            }
            conn
        } else {
            let conn = Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.busy_timeout(Duration::from_secs(300))?;
            conn
        };

        let has_hash = table_has_column(&conn, "tiles", "hash")?;
        let has_created = table_has_column(&conn, "tiles", "created")?;

        Ok(Self {
            path,
            conn: Mutex::new(conn),
            writable: opts.writable,
            timeout: opts.timeout,
            has_hash,
            has_created,
        })
    }

    /// Path of the underlying SQLite file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// XYZ -> on-disk TMS row
    fn flip_row(coord: TileCoordinate) -> (i64, i64, i64) {
        let flipped = coord.flip_y();
        (i64::from(flipped.z), i64::from(flipped.x), i64::from(flipped.y))
    }

    fn require_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(Error::Unsupported("store is read-only".into()))
        }
    }

    fn read_metadata_rows(&self) -> Result<Metadata> {
        let conn = self.conn.lock().expect("conn lock");
        let mut stmt = conn.prepare("SELECT name, value FROM metadata")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(metadata_from_rows(rows))
    }

    fn derive_metadata(&self) -> Result<Metadata> {
        let conn = self.conn.lock().expect("conn lock");
        let mut derived = Metadata::default();
        derived.name = self
            .path
            .file_stem()
            .and_then(|n| n.to_str())
            .map(str::to_string);

        derived.minzoom = conn
            .query_row("SELECT MIN(zoom_level) FROM tiles", [], |row| {
                row.get::<_, Option<u8>>(0)
            })
            .optional()?
            .flatten();
        derived.maxzoom = conn
            .query_row("SELECT MAX(zoom_level) FROM tiles", [], |row| {
                row.get::<_, Option<u8>>(0)
            })
            .optional()?
            .flatten();

        let sample: Option<Vec<u8>> = conn
            .query_row("SELECT tile_data FROM tiles LIMIT 1", [], |row| row.get(0))
            .optional()?;
        if let Some(bytes) = sample {
            derived.format = Some(crate::format::sniff(&bytes).format);
        }

        Ok(derived)
    }

    /// Union of layer names over a paged scan of tile payloads
    fn derive_vector_layers(&self) -> Result<Vec<VectorLayer>> {
        let conn = self.conn.lock().expect("conn lock");
        let mut names = BTreeSet::new();
        let mut offset = 0usize;
        loop {
            let mut stmt =
                conn.prepare("SELECT tile_data FROM tiles LIMIT ?1 OFFSET ?2")?;
            let page = stmt
                .query_map(params![LAYER_SCAN_PAGE as i64, offset as i64], |row| {
                    row.get::<_, Vec<u8>>(0)
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let fetched = page.len();
            for bytes in page {
                if let Ok(layer_names) = crate::vector::layer_names(&bytes) {
                    names.extend(layer_names);
                }
            }
            if fetched < LAYER_SCAN_PAGE {
                break;
            }
            offset += fetched;
        }
        Ok(names.into_iter().map(VectorLayer::named).collect())
    }
}

#[async_trait]
impl TileStore for MbtilesStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Mbtiles
    }

    fn scheme(&self) -> Scheme {
        Scheme::Tms
    }

    async fn get_tile(&self, coord: TileCoordinate) -> Result<TileData> {
        let (z, x, y) = Self::flip_row(coord);
        let bytes = retry_busy(self.timeout, "mbtiles get", || {
            let conn = self.conn.lock().expect("conn lock");
            Ok(conn
                .query_row(
                    "SELECT tile_data FROM tiles
                     WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
                    params![z, x, y],
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .optional()?)
        })
        .await?;

        match bytes {
            Some(bytes) => Ok(TileData::new(bytes)),
            None => Err(Error::TileNotFound),
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

        let (z, x, y) = Self::flip_row(coord);
        let hash = opts.store_md5.then(|| md5_hex(&bytes));
        let created = chrono::Utc::now().timestamp_millis();

        retry_busy(self.timeout, "mbtiles put", || {
            let conn = self.conn.lock().expect("conn lock");
            conn.execute(
                "INSERT INTO tiles (zoom_level, tile_column, tile_row, tile_data, hash, created)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (zoom_level, tile_column, tile_row) DO UPDATE SET
                     tile_data = excluded.tile_data,
                     hash = excluded.hash,
                     created = excluded.created",
                params![z, x, y, bytes, hash, created],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_tile(&self, coord: TileCoordinate) -> Result<()> {
        self.require_writable()?;
        let (z, x, y) = Self::flip_row(coord);
        retry_busy(self.timeout, "mbtiles delete", || {
            let conn = self.conn.lock().expect("conn lock");
            conn.execute(
                "DELETE FROM tiles
                 WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
                params![z, x, y],
            )?;
            Ok(())
        })
        .await
    }

    async fn tile_md5(&self, coord: TileCoordinate) -> Result<String> {
        let (z, x, y) = Self::flip_row(coord);
        let row = retry_busy(self.timeout, "mbtiles md5", || {
            let conn = self.conn.lock().expect("conn lock");
            let select = if self.has_hash {
                "SELECT hash, tile_data FROM tiles
                 WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3"
            } else {
                "SELECT NULL, tile_data FROM tiles
                 WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3"
            };
            Ok(conn
                .query_row(select, params![z, x, y], |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                    ))
                })
                .optional()?)
        })
        .await?;

        match row {
            Some((Some(hash), _)) => Ok(hash),
            Some((None, bytes)) => Ok(md5_hex(&bytes)),
            None => Err(Error::TileMd5NotFound),
        }
    }

    async fn tile_created(&self, coord: TileCoordinate) -> Result<i64> {
        if !self.has_created {
            return Err(Error::CreatedNotFound);
        }
        let (z, x, y) = Self::flip_row(coord);
        let created = retry_busy(self.timeout, "mbtiles created", || {
            let conn = self.conn.lock().expect("conn lock");
            Ok(conn
                .query_row(
                    "SELECT created FROM tiles
                     WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
                    params![z, x, y],
                    |row| row.get::<_, Option<i64>>(0),
                )
                .optional()?)
        })
        .await?;

        created.flatten().ok_or(Error::CreatedNotFound)
    }

    async fn put_metadata(&self, merge: &Metadata) -> Result<()> {
        self.require_writable()?;

        let mut metadata = self.read_metadata_rows()?;
        metadata.merge(merge);
        metadata.scheme = Some(Scheme::Tms);

        let rows = metadata_to_rows(&metadata)?;
        retry_busy(self.timeout, "mbtiles metadata", || {
            let conn = self.conn.lock().expect("conn lock");
            for (name, value) in &rows {
                conn.execute(
                    "INSERT OR REPLACE INTO metadata (name, value) VALUES (?1, ?2)",
                    params![name, value],
                )?;
            }
            Ok(())
        })
        .await
    }

    async fn info(&self) -> Result<TileJson> {
        let mut metadata = self.read_metadata_rows()?;
        if metadata.minzoom.is_none() || metadata.maxzoom.is_none() || metadata.format.is_none() {
            let derived = self.derive_metadata()?;
            metadata.fill_missing(&derived);
        }
        if metadata.format == Some(TileFormat::Pbf) && metadata.vector_layers.is_none() {
            let layers = self.derive_vector_layers()?;
            if !layers.is_empty() {
                metadata.vector_layers = Some(layers);
            }
        }
        metadata.fill_missing(&Metadata::defaults());
        metadata.fill_center();
        metadata.scheme = Some(Scheme::Tms);
        Ok(TileJson::new(metadata))
    }

    async fn close(&self) -> Result<()> {
        if self.writable {
            let conn = self.conn.lock().expect("conn lock");
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        }
        Ok(())
    }
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        if row.get::<_, String>(1)? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Decode the conventional metadata table into a typed map
pub(crate) fn metadata_from_rows(rows: Vec<(String, String)>) -> Metadata {
    let mut metadata = Metadata::default();
    for (name, value) in rows {
        match name.as_str() {
            "name" => metadata.name = Some(value),
            "description" => metadata.description = Some(value),
            "attribution" => metadata.attribution = Some(value),
            "version" => metadata.version = Some(value),
            "type" => {
                metadata.layer_type = serde_json::from_value(serde_json::Value::String(value)).ok()
            }
            "format" => {
                metadata.format = serde_json::from_value(serde_json::Value::String(value)).ok()
            }
            "minzoom" => metadata.minzoom = value.parse().ok(),
            "maxzoom" => metadata.maxzoom = value.parse().ok(),
            "bounds" => metadata.bounds = parse_csv_floats(&value),
            "center" => metadata.center = parse_csv_floats(&value),
            "scheme" => metadata.scheme = value.parse().ok(),
            "json" => {
                // The `json` row is a JSON object merged into the map
                if let Ok(Metadata {
                    vector_layers,
                    tilestats,
                    extra,
                    ..
                }) = serde_json::from_str::<Metadata>(&value)
                {
                    if vector_layers.is_some() {
                        metadata.vector_layers = vector_layers;
                    }
                    if tilestats.is_some() {
                        metadata.tilestats = tilestats;
                    }
                    metadata.extra.extend(extra);
                }
            }
            _ => {
                metadata
                    .extra
                    .insert(name, serde_json::Value::String(value));
            }
        }
    }
    metadata
}

/// Encode a typed metadata map into conventional rows
pub(crate) fn metadata_to_rows(metadata: &Metadata) -> Result<Vec<(String, String)>> {
    let mut rows = Vec::new();
    let mut push = |name: &str, value: Option<String>| {
        if let Some(value) = value {
            rows.push((name.to_string(), value));
        }
    };

    push("name", metadata.name.clone());
    push("description", metadata.description.clone());
    push("attribution", metadata.attribution.clone());
    push("version", metadata.version.clone());
    push(
        "type",
        metadata
            .layer_type
            .map(|t| serde_json::json!(t).as_str().unwrap_or_default().to_string()),
    );
    push("format", metadata.format.map(|f| f.ext().to_string()));
    push("minzoom", metadata.minzoom.map(|z| z.to_string()));
    push("maxzoom", metadata.maxzoom.map(|z| z.to_string()));
    push(
        "bounds",
        metadata.bounds.map(|b| {
            b.iter()
                .map(f64::to_string)
                .collect::<Vec<_>>()
                .join(",")
        }),
    );
    push(
        "center",
        metadata.center.map(|c| {
            c.iter()
                .map(f64::to_string)
                .collect::<Vec<_>>()
                .join(",")
        }),
    );
    push("scheme", metadata.scheme.map(|s| s.to_string()));

    if metadata.vector_layers.is_some() || metadata.tilestats.is_some() {
        let mut json = serde_json::Map::new();
        if let Some(layers) = &metadata.vector_layers {
            json.insert("vector_layers".into(), serde_json::to_value(layers)?);
        }
        if let Some(tilestats) = &metadata.tilestats {
            json.insert("tilestats".into(), tilestats.clone());
        }
        rows.push(("json".into(), serde_json::Value::Object(json).to_string()));
    }

    for (name, value) in &metadata.extra {
        let encoded = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        rows.push((name.clone(), encoded));
    }

    Ok(rows)
}

fn parse_csv_floats<const N: usize>(value: &str) -> Option<[f64; N]> {
    let parts: Vec<f64> = value
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    parts.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;
    use tempfile::tempdir;

    const PNG_TILE: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x01];

    async fn writable(path: &Path) -> MbtilesStore {
        MbtilesStore::open(path, StoreOptions::writable())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let temp = tempdir().unwrap();
        let store = writable(&temp.path().join("t.mbtiles")).await;
        let coord = TileCoordinate::new(6, 32, 21);

        store
            .put_tile(coord, PNG_TILE.to_vec(), &WriteOptions::default())
            .await
            .unwrap();
        let tile = store.get_tile(coord).await.unwrap();
        assert_eq!(tile.bytes, PNG_TILE);
        assert_eq!(tile.info.format, TileFormat::Png);

        store.delete_tile(coord).await.unwrap();
        assert!(matches!(
            store.get_tile(coord).await,
            Err(Error::TileNotFound)
        ));
        store.delete_tile(coord).await.unwrap();
    }

    #[tokio::test]
    async fn test_rows_are_tms_on_disk() {
        let temp = tempdir().unwrap();
        let store = writable(&temp.path().join("t.mbtiles")).await;
        let coord = TileCoordinate::new(6, 32, 21);

        store
            .put_tile(coord, PNG_TILE.to_vec(), &WriteOptions::default())
            .await
            .unwrap();

        let conn = store.conn.lock().unwrap();
        let row: i64 = conn
            .query_row(
                "SELECT tile_row FROM tiles WHERE zoom_level = 6 AND tile_column = 32",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(row, 63 - 21);
    }

    #[tokio::test]
    async fn test_upsert_idempotent() {
        let temp = tempdir().unwrap();
        let store = writable(&temp.path().join("t.mbtiles")).await;
        let coord = TileCoordinate::new(3, 1, 2);

        store
            .put_tile(coord, PNG_TILE.to_vec(), &WriteOptions::default())
            .await
            .unwrap();
        store
            .put_tile(coord, PNG_TILE.to_vec(), &WriteOptions::default())
            .await
            .unwrap();

        let conn = store.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM tiles", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_md5_and_created() {
        let temp = tempdir().unwrap();
        let store = writable(&temp.path().join("t.mbtiles")).await;
        let coord = TileCoordinate::new(5, 1, 1);

        let before = chrono::Utc::now().timestamp_millis();
        store
            .put_tile(coord, PNG_TILE.to_vec(), &WriteOptions::default())
            .await
            .unwrap();

        assert_eq!(store.tile_md5(coord).await.unwrap(), md5_hex(PNG_TILE));
        assert!(store.tile_created(coord).await.unwrap() >= before);

        let absent = TileCoordinate::new(5, 2, 2);
        assert!(matches!(
            store.tile_md5(absent).await,
            Err(Error::TileMd5NotFound)
        ));
        assert!(matches!(
            store.tile_created(absent).await,
            Err(Error::CreatedNotFound)
        ));
    }

    #[tokio::test]
    async fn test_md5_computed_when_column_null() {
        let temp = tempdir().unwrap();
        let store = writable(&temp.path().join("t.mbtiles")).await;
        let coord = TileCoordinate::new(5, 1, 1);
        let opts = WriteOptions {
            store_md5: false,
            store_transparent: true,
        };

        store.put_tile(coord, PNG_TILE.to_vec(), &opts).await.unwrap();
        assert_eq!(store.tile_md5(coord).await.unwrap(), md5_hex(PNG_TILE));
    }

    #[tokio::test]
    async fn test_legacy_file_without_extension_columns() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("legacy.mbtiles");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE metadata (name TEXT PRIMARY KEY, value TEXT);
                 CREATE TABLE tiles (
                     zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER,
                     tile_data BLOB,
                     PRIMARY KEY (zoom_level, tile_column, tile_row)
                 );
                 INSERT INTO tiles VALUES (1, 0, 1, x'89504E470D0A1A0A');",
            )
            .unwrap();
        }

        let store = MbtilesStore::open(&path, StoreOptions::read_only())
            .await
            .unwrap();
        // TMS row 1 at z1 is XYZ y = 0
        let coord = TileCoordinate::new(1, 0, 0);
        assert!(store.get_tile(coord).await.is_ok());
        assert_eq!(
            store.tile_md5(coord).await.unwrap(),
            md5_hex(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A])
        );
        assert!(matches!(
            store.tile_created(coord).await,
            Err(Error::CreatedNotFound)
        ));
        assert!(store
            .put_tile(coord, vec![1], &WriteOptions::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_metadata_roundtrip_and_merge() {
        let temp = tempdir().unwrap();
        let store = writable(&temp.path().join("t.mbtiles")).await;

        let mut first = Metadata::default();
        first.name = Some("osm".into());
        first.format = Some(TileFormat::Pbf);
        first.bounds = Some([105.0, 10.0, 106.0, 11.0]);
        first.vector_layers = Some(vec![VectorLayer::named("roads")]);
        store.put_metadata(&first).await.unwrap();

        let mut second = Metadata::default();
        second.maxzoom = Some(14);
        store.put_metadata(&second).await.unwrap();

        let info = store.info().await.unwrap();
        assert_eq!(info.metadata.name.as_deref(), Some("osm"));
        assert_eq!(info.metadata.format, Some(TileFormat::Pbf));
        assert_eq!(info.metadata.maxzoom, Some(14));
        assert_eq!(info.metadata.bounds, Some([105.0, 10.0, 106.0, 11.0]));
        assert_eq!(info.metadata.scheme, Some(Scheme::Tms));
        assert_eq!(
            info.metadata.vector_layers.as_ref().unwrap()[0].id,
            "roads"
        );
    }

    #[tokio::test]
    async fn test_info_derivation() {
        let temp = tempdir().unwrap();
        let store = writable(&temp.path().join("t.mbtiles")).await;

        let pbf = crate::vector::mvt::Tile {
            layers: vec![
                crate::vector::mvt::Layer {
                    name: "water".into(),
                    version: 2,
                },
                crate::vector::mvt::Layer {
                    name: "roads".into(),
                    version: 2,
                },
            ],
        }
        .encode_to_vec();

        let opts = WriteOptions::default();
        store
            .put_tile(TileCoordinate::new(4, 2, 3), pbf.clone(), &opts)
            .await
            .unwrap();
        store
            .put_tile(TileCoordinate::new(8, 100, 90), pbf, &opts)
            .await
            .unwrap();

        let info = store.info().await.unwrap();
        assert_eq!(info.metadata.minzoom, Some(4));
        assert_eq!(info.metadata.maxzoom, Some(8));
        assert_eq!(info.metadata.format, Some(TileFormat::Pbf));

        let ids: Vec<_> = info
            .metadata
            .vector_layers
            .unwrap()
            .into_iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(ids, vec!["roads", "water"]);
    }

    #[test]
    fn test_csv_parsing() {
        assert_eq!(
            parse_csv_floats::<4>("105, 10, 106, 11"),
            Some([105.0, 10.0, 106.0, 11.0])
        );
        assert_eq!(parse_csv_floats::<4>("105,10"), None);
        assert_eq!(parse_csv_floats::<3>("1,2,x"), None);
    }
}
