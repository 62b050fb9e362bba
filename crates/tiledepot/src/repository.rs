//! Repository configuration and startup wiring
//!
//! `config.json` under the data directory declares the served tilesets,
//! styles and GeoJSON layers. The repository opens every declared store at
//! startup and the resulting id map is read-only for the lifetime of the
//! process; seed and cleanup runs mutate only backend state.
//!
//! On-disk layout under the data directory:
//!
//! ```text
//! config.json  seed.json  cleanup.json
//! mbtiles/<id>.mbtiles         read-only imports
//! pmtiles/<id>.pmtiles
//! xyzs/<id>/...
//! caches/mbtiles/<id>/<id>.mbtiles
//! caches/xyzs/<id>/...
//! caches/geojsons/<id>/<layer>.geojson
//! caches/styles/<id>/style.json
//! fonts/<stack>/<range>.pbf
//! sprites/<id>/sprite(@Nx)?.(json|png)
//! ```

use crate::cache::UpstreamSource;
use crate::error::{Error, Result};
use crate::geojson::GeoJsonStore;
use crate::storage::{
    DirectoryStore, MbtilesStore, PmtilesStore, PostgresStore, StoreKind, StoreOptions, TileStore,
    WriteOptions,
};
use crate::style::{sprite, GlyphStore, StyleStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_max_try() -> u32 {
    5
}

/// Read-through cache declaration of a tileset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Upstream tile URL template with `{z}/{x}/{y}` placeholders
    pub url: String,

    /// Persist fetched tiles (false serves through without caching)
    #[serde(default = "default_true")]
    pub store_cache: bool,

    #[serde(default = "default_true")]
    pub store_md5: bool,

    #[serde(default)]
    pub store_transparent: bool,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_try")]
    pub max_try: u32,
}

impl CacheConfig {
    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            store_md5: self.store_md5,
            store_transparent: self.store_transparent,
        }
    }
}

/// One served tileset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Backend kind
    pub kind: StoreKind,

    /// Path relative to the kind's import directory; defaults to the id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Present for read-through caches (implies a writable store under
    /// `caches/`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheConfig>,
}

/// One served style
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleConfig {
    /// Remote style fetched into `caches/styles/<id>/style.json` at
    /// startup; a file already cached there is served as-is
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// One served GeoJSON layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoJsonLayerConfig {
    /// Remote source fetched on first request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Global serving options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Options {
    /// Absolute URL the service is reachable at; derived from the request
    /// Host header when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Glyph stack substituted for missing fonts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_font: Option<String>,
}

/// `config.json` under the data directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub options: Options,

    #[serde(default)]
    pub datas: BTreeMap<String, DataConfig>,

    #[serde(default)]
    pub styles: BTreeMap<String, StyleConfig>,

    /// id -> layer -> source
    #[serde(default)]
    pub geojsons: BTreeMap<String, BTreeMap<String, GeoJsonLayerConfig>>,
}

impl Config {
    /// Load `config.json`; a missing file is an empty repository
    pub async fn load(data_dir: &Path) -> Result<Self> {
        match tokio::fs::read(data_dir.join("config.json")).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("no config.json under {}", data_dir.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// A served tileset: its store plus the read-through cache contract
pub struct DataEntry {
    pub store: Arc<dyn TileStore>,
    pub source: Option<UpstreamSource>,
    pub write: WriteOptions,
    pub store_cache: bool,
}

/// The process-wide id map, initialized at startup and read-only
/// thereafter
pub struct Repository {
    pub data_dir: PathBuf,
    pub datas: BTreeMap<String, DataEntry>,
    pub styles: StyleStore,
    pub style_ids: BTreeSet<String>,
    pub sprites_dir: PathBuf,
    pub sprite_ids: BTreeSet<String>,
    pub glyphs: GlyphStore,
    pub geojsons: GeoJsonStore,
    pub geojson_sources: BTreeMap<String, BTreeMap<String, GeoJsonLayerConfig>>,
    pub base_url: Option<String>,
}

/// Open the writable cache store for an id under the data directory.
/// Shared between the repository (read-through caches) and the seed and
/// cleanup workers.
pub async fn open_cache_store(
    data_dir: &Path,
    id: &str,
    kind: StoreKind,
    timeout: Duration,
) -> Result<Arc<dyn TileStore>> {
    let opts = StoreOptions::writable().with_timeout(timeout);
    match kind {
        StoreKind::Xyz => Ok(Arc::new(
            DirectoryStore::open(data_dir.join("caches/xyzs").join(id), opts).await?,
        )),
        StoreKind::Mbtiles => Ok(Arc::new(
            MbtilesStore::open(
                data_dir
                    .join("caches/mbtiles")
                    .join(id)
                    .join(format!("{id}.mbtiles")),
                opts,
            )
            .await?,
        )),
        StoreKind::Postgres => {
            let base_uri = std::env::var("POSTGRESQL_BASE_URI")
                .map_err(|_| Error::config("POSTGRESQL_BASE_URI is not set"))?;
            Ok(Arc::new(PostgresStore::open(&base_uri, id, opts).await?))
        }
        StoreKind::Pmtiles => Err(Error::config("pmtiles stores are read-only")),
    }
}

async fn open_read_only_store(
    data_dir: &Path,
    id: &str,
    config: &DataConfig,
    timeout: Duration,
) -> Result<Arc<dyn TileStore>> {
    let opts = StoreOptions::read_only().with_timeout(timeout);
    let name = config.path.clone();
    match config.kind {
        StoreKind::Xyz => {
            let dir = name.unwrap_or_else(|| id.to_string());
            Ok(Arc::new(
                DirectoryStore::open(data_dir.join("xyzs").join(dir), opts).await?,
            ))
        }
        StoreKind::Mbtiles => {
            let file = name.unwrap_or_else(|| format!("{id}.mbtiles"));
            Ok(Arc::new(
                MbtilesStore::open(data_dir.join("mbtiles").join(file), opts).await?,
            ))
        }
        StoreKind::Pmtiles => {
            let file = name.unwrap_or_else(|| format!("{id}.pmtiles"));
            Ok(Arc::new(
                PmtilesStore::open(data_dir.join("pmtiles").join(file)).await?,
            ))
        }
        StoreKind::Postgres => {
            let base_uri = std::env::var("POSTGRESQL_BASE_URI")
                .map_err(|_| Error::config("POSTGRESQL_BASE_URI is not set"))?;
            Ok(Arc::new(PostgresStore::open(&base_uri, id, opts).await?))
        }
    }
}

async fn open_data(data_dir: &Path, id: &str, config: &DataConfig) -> Result<DataEntry> {
    let entry = match &config.cache {
        Some(cache) => {
            let timeout = Duration::from_millis(cache.timeout_ms);
            let store = open_cache_store(data_dir, id, config.kind, timeout).await?;
            let source = UpstreamSource::new(&cache.url, timeout, cache.max_try)?;
            DataEntry {
                store,
                source: Some(source),
                write: cache.write_options(),
                store_cache: cache.store_cache,
            }
        }
        None => DataEntry {
            store: open_read_only_store(data_dir, id, config, Duration::from_secs(300)).await?,
            source: None,
            write: WriteOptions::default(),
            store_cache: false,
        },
    };

    // A store whose synthesized metadata does not validate is excluded
    // from the repository. Caches start empty, with nothing to validate
    // against; their metadata lands on the first seed run.
    if config.cache.is_none() {
        entry.store.info().await?.metadata.validate()?;
    }
    Ok(entry)
}

impl Repository {
    /// Scan the data directory and open everything `config.json`
    /// declares. Invalid entries are logged and excluded; they never
    /// abort startup.
    pub async fn open(data_dir: &Path, config: Config) -> Result<Self> {
        let mut datas = BTreeMap::new();
        for (id, data_config) in &config.datas {
            match open_data(data_dir, id, data_config).await {
                Ok(entry) => {
                    info!("serving {:?} tileset {id}", data_config.kind);
                    datas.insert(id.clone(), entry);
                }
                Err(e) => error!("excluding tileset {id}: {e}"),
            }
        }

        let styles = StyleStore::new(data_dir.join("caches/styles"));
        let mut style_ids = BTreeSet::new();
        for (id, style_config) in &config.styles {
            if let Some(url) = &style_config.url {
                if let Err(e) = styles
                    .cache_from_url(id, url, Duration::from_secs(60))
                    .await
                {
                    error!("excluding style {id}: {e}");
                    continue;
                }
            }
            style_ids.insert(id.clone());
        }

        let sprites_dir = data_dir.join("sprites");
        let mut sprite_ids = BTreeSet::new();
        if sprites_dir.is_dir() {
            let mut entries = tokio::fs::read_dir(&sprites_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_dir() {
                    continue;
                }
                let Some(id) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                match sprite::validate_sprite_dir(&entry.path()).await {
                    Ok(()) => {
                        sprite_ids.insert(id);
                    }
                    Err(e) => error!("excluding sprite set {id}: {e}"),
                }
            }
        }

        let fallback_font = std::env::var("FALLBACK_FONT")
            .ok()
            .or_else(|| config.options.fallback_font.clone())
            .unwrap_or_else(|| "Open Sans Regular".to_string());

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            datas,
            styles,
            style_ids,
            sprites_dir,
            sprite_ids,
            glyphs: GlyphStore::new(data_dir.join("fonts"), fallback_font),
            geojsons: GeoJsonStore::new(
                data_dir.join("caches/geojsons"),
                Duration::from_secs(60),
            ),
            geojson_sources: config.geojsons,
            base_url: config.options.base_url,
        })
    }

    /// Look up a served tileset
    pub fn data(&self, id: &str) -> Result<&DataEntry> {
        self.datas
            .get(id)
            .ok_or_else(|| Error::IdNotFound(id.to_string()))
    }

    /// Close every open store
    pub async fn close(&self) -> Result<()> {
        for (id, entry) in &self.datas {
            if let Err(e) = entry.store.close().await {
                warn!("closing {id}: {e}");
            }
        }
        Ok(())
    }
}
