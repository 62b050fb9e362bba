//! Seed and cleanup task descriptors (`seed.json` / `cleanup.json`)

use crate::error::{Error, Result};
use crate::storage::{StoreKind, WriteOptions};
use crate::tile::bounds::LonLatBounds;
use crate::tilejson::Metadata;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Refresh policy of a seed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshBefore {
    /// Re-download tiles created before an absolute time (RFC 3339 or
    /// epoch milliseconds)
    Time(String),
    /// Re-download tiles older than this many days
    Day(u32),
    /// Probe the upstream MD5 and re-download on mismatch
    Md5(bool),
}

/// Age predicate of a cleanup run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupBefore {
    /// Delete tiles created before an absolute time
    Time(String),
    /// Delete tiles older than this many days
    Day(u32),
}

/// Resolved per-tile refresh decision mode
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RefreshMode {
    Always,
    Cutoff(i64),
    Md5,
}

pub(crate) fn parse_cutoff_ms(value: &str) -> Result<i64> {
    if let Ok(time) = chrono::DateTime::parse_from_rfc3339(value) {
        return Ok(time.timestamp_millis());
    }
    value
        .parse::<i64>()
        .map_err(|_| Error::config(format!("unparseable time: {value}")))
}

fn days_ago_ms(days: u32) -> i64 {
    chrono::Utc::now().timestamp_millis() - i64::from(days) * 86_400_000
}

impl RefreshBefore {
    /// Resolve into the mode the scheduler evaluates per tile
    pub fn mode(&self) -> Result<RefreshMode> {
        match self {
            RefreshBefore::Time(value) => Ok(RefreshMode::Cutoff(parse_cutoff_ms(value)?)),
            RefreshBefore::Day(days) => Ok(RefreshMode::Cutoff(days_ago_ms(*days))),
            RefreshBefore::Md5(true) => Ok(RefreshMode::Md5),
            RefreshBefore::Md5(false) => Ok(RefreshMode::Always),
        }
    }
}

impl CleanupBefore {
    /// Cutoff in epoch milliseconds
    pub fn cutoff_ms(&self) -> Result<i64> {
        match self {
            CleanupBefore::Time(value) => parse_cutoff_ms(value),
            CleanupBefore::Day(days) => Ok(days_ago_ms(*days)),
        }
    }
}

fn default_concurrency() -> usize {
    num_cpus::get()
}

fn default_max_try() -> u32 {
    5
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_true() -> bool {
    true
}

fn world_bbox() -> Vec<[f64; 4]> {
    vec![LonLatBounds::default().to_array()]
}

/// One seed task: pre-fetch a bbox x zoom set from an upstream URL into a
/// writable store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedTask {
    /// Tileset id; names the writable store under the data directory
    pub id: String,

    /// Backend holding the cache
    #[serde(default = "SeedTask::default_store")]
    pub store: StoreKind,

    /// Upstream tile URL template with `{z}/{x}/{y}` placeholders
    pub url: String,

    /// Bounding boxes to cover, `[west, south, east, north]`
    #[serde(default = "world_bbox")]
    pub bboxs: Vec<[f64; 4]>,

    /// Zoom levels to cover
    pub zooms: Vec<u8>,

    /// In-flight task bound
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Attempts per tile
    #[serde(default = "default_max_try")]
    pub max_try: u32,

    /// Per-operation timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_true")]
    pub store_md5: bool,

    #[serde(default)]
    pub store_transparent: bool,

    /// When absent, every enumerated tile is downloaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_before: Option<RefreshBefore>,

    /// Merged into the store metadata before any tile is fetched
    #[serde(default)]
    pub metadata: Metadata,
}

impl SeedTask {
    fn default_store() -> StoreKind {
        StoreKind::Xyz
    }

    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            store_md5: self.store_md5,
            store_transparent: self.store_transparent,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Per-tile refresh mode ([`RefreshMode::Always`] when no policy is
    /// configured)
    pub fn refresh_mode(&self) -> Result<RefreshMode> {
        match &self.refresh_before {
            Some(policy) => policy.mode(),
            None => Ok(RefreshMode::Always),
        }
    }
}

/// One cleanup task: delete stale tiles over a bbox x zoom set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupTask {
    pub id: String,

    #[serde(default = "SeedTask::default_store")]
    pub store: StoreKind,

    #[serde(default = "world_bbox")]
    pub bboxs: Vec<[f64; 4]>,

    pub zooms: Vec<u8>,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// When absent, every enumerated tile is deleted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_before: Option<CleanupBefore>,
}

impl CleanupTask {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Cutoff in epoch milliseconds; `None` deletes unconditionally
    pub fn cutoff_ms(&self) -> Result<Option<i64>> {
        self.cleanup_before
            .as_ref()
            .map(CleanupBefore::cutoff_ms)
            .transpose()
    }
}

/// `seed.json` under the data directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub tasks: Vec<SeedTask>,
}

/// `cleanup.json` under the data directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupFile {
    #[serde(default)]
    pub tasks: Vec<CleanupTask>,
}

async fn load_json<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

impl SeedFile {
    /// Load `seed.json`; a missing file is an empty task list
    pub async fn load(data_dir: &Path) -> Result<Self> {
        load_json(&data_dir.join("seed.json")).await
    }
}

impl CleanupFile {
    /// Load `cleanup.json`; a missing file is an empty task list
    pub async fn load(data_dir: &Path) -> Result<Self> {
        load_json(&data_dir.join("cleanup.json")).await
    }
}
