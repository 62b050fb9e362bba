//! PostgreSQL storage backend
//!
//! Mirror of the MBTiles contract with rows stored natively in XYZ
//! orientation (no Y flip). Each tileset lives in its own schema under the
//! database named by `POSTGRESQL_BASE_URI`.

use crate::error::{Error, Result};
use crate::format::TileFormat;
use crate::storage::{
    md5_hex, retry_busy_async, StoreKind, StoreOptions, TileData, TileStore, WriteOptions,
};
use crate::tile::coordinate::{Scheme, TileCoordinate};
use crate::tilejson::{Metadata, TileJson, VectorLayer};
use crate::transparency;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Executor, Row};
use std::collections::BTreeSet;

/// Page size of the vector-layer derivation scan
const LAYER_SCAN_PAGE: i64 = 200;

/// PostgreSQL tile store
pub struct PostgresStore {
    pool: PgPool,
    schema: String,
    writable: bool,
    timeout: std::time::Duration,
}

impl PostgresStore {
    /// Connect and (for writable stores) create the schema and tables.
    ///
    /// `id` names the tileset schema; it is restricted to
    /// `[A-Za-z0-9_-]` so it can be safely quoted into DDL.
    pub async fn open(base_uri: &str, id: &str, opts: StoreOptions) -> Result<Self> {
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::config(format!("invalid tileset id: {id:?}")));
        }

        let timeout_ms = opts.timeout.as_millis().min(i64::MAX as u128) as i64;
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    conn.execute(format!("SET statement_timeout = {timeout_ms}").as_str())
                        .await?;
                    Ok(())
                })
            })
            .connect(base_uri)
            .await?;

        let store = Self {
            pool,
            schema: id.to_string(),
            writable: opts.writable,
            timeout: opts.timeout,
        };

        if opts.writable {
            store
                .pool
                .execute(format!("CREATE SCHEMA IF NOT EXISTS {}", store.quoted_schema()).as_str())
                .await?;
            store
                .pool
                .execute(
                    format!(
                        "CREATE TABLE IF NOT EXISTS {}.metadata (
                            name TEXT PRIMARY KEY,
                            value TEXT
                        )",
                        store.quoted_schema()
                    )
                    .as_str(),
                )
                .await?;
            store
                .pool
                .execute(
                    format!(
                        "CREATE TABLE IF NOT EXISTS {}.tiles (
                            zoom_level INTEGER NOT NULL,
                            tile_column BIGINT NOT NULL,
                            tile_row BIGINT NOT NULL,
                            tile_data BYTEA,
                            hash TEXT,
                            created BIGINT,
                            PRIMARY KEY (zoom_level, tile_column, tile_row)
                        )",
                        store.quoted_schema()
                    )
                    .as_str(),
                )
                .await?;
        }

        Ok(store)
    }

    fn quoted_schema(&self) -> String {
        format!("\"{}\"", self.schema)
    }

    fn require_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(Error::Unsupported("store is read-only".into()))
        }
    }

    async fn read_metadata_rows(&self) -> Result<Metadata> {
        let rows = sqlx::query(
            format!("SELECT name, value FROM {}.metadata", self.quoted_schema()).as_str(),
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(super::mbtiles::metadata_from_rows(
            rows.into_iter()
                .map(|row| (row.get::<String, _>(0), row.get::<String, _>(1)))
                .collect(),
        ))
    }

    async fn derive_metadata(&self) -> Result<Metadata> {
        let mut derived = Metadata::default();
        derived.name = Some(self.schema.clone());

        let range: (Option<i32>, Option<i32>) = sqlx::query_as(
            format!(
                "SELECT MIN(zoom_level), MAX(zoom_level) FROM {}.tiles",
                self.quoted_schema()
            )
            .as_str(),
        )
        .fetch_one(&self.pool)
        .await?;
        derived.minzoom = range.0.and_then(|z| u8::try_from(z).ok());
        derived.maxzoom = range.1.and_then(|z| u8::try_from(z).ok());

        let sample: Option<Vec<u8>> = sqlx::query_scalar(
            format!("SELECT tile_data FROM {}.tiles LIMIT 1", self.quoted_schema()).as_str(),
        )
        .fetch_optional(&self.pool)
        .await?;
        if let Some(bytes) = sample {
            derived.format = Some(crate::format::sniff(&bytes).format);
        }

        Ok(derived)
    }

    async fn derive_vector_layers(&self) -> Result<Vec<VectorLayer>> {
        let mut names = BTreeSet::new();
        let mut offset = 0i64;
        loop {
            let page: Vec<Vec<u8>> = sqlx::query_scalar(
                format!(
                    "SELECT tile_data FROM {}.tiles LIMIT $1 OFFSET $2",
                    self.quoted_schema()
                )
                .as_str(),
            )
            .bind(LAYER_SCAN_PAGE)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

            let fetched = page.len() as i64;
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
impl TileStore for PostgresStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Postgres
    }

    fn scheme(&self) -> Scheme {
        Scheme::Xyz
    }

    async fn get_tile(&self, coord: TileCoordinate) -> Result<TileData> {
        let sql = format!(
            "SELECT tile_data FROM {}.tiles
             WHERE zoom_level = $1 AND tile_column = $2 AND tile_row = $3",
            self.quoted_schema()
        );
        let bytes: Option<Vec<u8>> = retry_busy_async(self.timeout, "postgres get", || {
            let sql = sql.as_str();
            async move {
                Ok(sqlx::query_scalar(sql)
                    .bind(i32::from(coord.z))
                    .bind(i64::from(coord.x))
                    .bind(i64::from(coord.y))
                    .fetch_optional(&self.pool)
                    .await?)
            }
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

        let hash = opts.store_md5.then(|| md5_hex(&bytes));
        let created = chrono::Utc::now().timestamp_millis();
        let sql = format!(
            "INSERT INTO {}.tiles (zoom_level, tile_column, tile_row, tile_data, hash, created)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (zoom_level, tile_column, tile_row) DO UPDATE SET
                 tile_data = EXCLUDED.tile_data,
                 hash = EXCLUDED.hash,
                 created = EXCLUDED.created",
            self.quoted_schema()
        );

        retry_busy_async(self.timeout, "postgres put", || {
            let sql = sql.as_str();
            let bytes = &bytes;
            let hash = &hash;
            async move {
                sqlx::query(sql)
                    .bind(i32::from(coord.z))
                    .bind(i64::from(coord.x))
                    .bind(i64::from(coord.y))
                    .bind(bytes)
                    .bind(hash)
                    .bind(created)
                    .execute(&self.pool)
                    .await?;
                Ok(())
            }
        })
        .await
    }

    async fn delete_tile(&self, coord: TileCoordinate) -> Result<()> {
        self.require_writable()?;
        let sql = format!(
            "DELETE FROM {}.tiles
             WHERE zoom_level = $1 AND tile_column = $2 AND tile_row = $3",
            self.quoted_schema()
        );
        retry_busy_async(self.timeout, "postgres delete", || {
            let sql = sql.as_str();
            async move {
                sqlx::query(sql)
                    .bind(i32::from(coord.z))
                    .bind(i64::from(coord.x))
                    .bind(i64::from(coord.y))
                    .execute(&self.pool)
                    .await?;
                Ok(())
            }
        })
        .await
    }

    async fn tile_md5(&self, coord: TileCoordinate) -> Result<String> {
        let sql = format!(
            "SELECT hash, tile_data FROM {}.tiles
             WHERE zoom_level = $1 AND tile_column = $2 AND tile_row = $3",
            self.quoted_schema()
        );
        let row = sqlx::query(sql.as_str())
            .bind(i32::from(coord.z))
            .bind(i64::from(coord.x))
            .bind(i64::from(coord.y))
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => match row.get::<Option<String>, _>(0) {
                Some(hash) => Ok(hash),
                None => Ok(md5_hex(&row.get::<Vec<u8>, _>(1))),
            },
            None => Err(Error::TileMd5NotFound),
        }
    }

    async fn tile_created(&self, coord: TileCoordinate) -> Result<i64> {
        let sql = format!(
            "SELECT created FROM {}.tiles
             WHERE zoom_level = $1 AND tile_column = $2 AND tile_row = $3",
            self.quoted_schema()
        );
        let created: Option<Option<i64>> = sqlx::query_scalar(sql.as_str())
            .bind(i32::from(coord.z))
            .bind(i64::from(coord.x))
            .bind(i64::from(coord.y))
            .fetch_optional(&self.pool)
            .await?;

        created.flatten().ok_or(Error::CreatedNotFound)
    }

    async fn put_metadata(&self, merge: &Metadata) -> Result<()> {
        self.require_writable()?;

        let mut metadata = self.read_metadata_rows().await?;
        metadata.merge(merge);
        metadata.scheme = Some(Scheme::Xyz);

        let sql = format!(
            "INSERT INTO {}.metadata (name, value) VALUES ($1, $2)
             ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value",
            self.quoted_schema()
        );
        for (name, value) in super::mbtiles::metadata_to_rows(&metadata)? {
            sqlx::query(sql.as_str())
                .bind(name)
                .bind(value)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn info(&self) -> Result<TileJson> {
        let mut metadata = self.read_metadata_rows().await?;
        if metadata.minzoom.is_none() || metadata.maxzoom.is_none() || metadata.format.is_none() {
            let derived = self.derive_metadata().await?;
            metadata.fill_missing(&derived);
        }
        if metadata.format == Some(TileFormat::Pbf) && metadata.vector_layers.is_none() {
            let layers = self.derive_vector_layers().await?;
            if !layers.is_empty() {
                metadata.vector_layers = Some(layers);
            }
        }
        metadata.fill_missing(&Metadata::defaults());
        metadata.fill_center();
        metadata.scheme = Some(Scheme::Xyz);
        Ok(TileJson::new(metadata))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_unquotable_id() {
        let result = PostgresStore::open(
            "postgresql://localhost/tiles",
            "bad\"id",
            StoreOptions::writable(),
        )
        .await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    // Requires a reachable server; run with
    // POSTGRESQL_BASE_URI=postgresql://... cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_roundtrip_against_live_server() {
        let uri = std::env::var("POSTGRESQL_BASE_URI").expect("POSTGRESQL_BASE_URI");
        let store = PostgresStore::open(&uri, "tiledepot_test", StoreOptions::writable())
            .await
            .unwrap();

        let coord = TileCoordinate::new(6, 32, 21);
        let bytes = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        store
            .put_tile(coord, bytes.clone(), &WriteOptions::default())
            .await
            .unwrap();

        assert_eq!(store.get_tile(coord).await.unwrap().bytes, bytes);
        assert_eq!(store.tile_md5(coord).await.unwrap(), md5_hex(&bytes));
        assert!(store.tile_created(coord).await.is_ok());

        store.delete_tile(coord).await.unwrap();
        assert!(matches!(
            store.get_tile(coord).await,
            Err(Error::TileNotFound)
        ));
        store.close().await.unwrap();
    }
}
