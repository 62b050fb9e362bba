//! Style JSON store and URL scheme rewriting

pub mod glyph;
pub mod sprite;

pub use glyph::GlyphStore;

use crate::error::{Error, Result};
use crate::fslock;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Rewrite the internal `mbtiles://`, `pmtiles://`, `xyz://`,
/// `sprites://`, `fonts://` and `geojsons://` references of a style
/// document into absolute URLs under `base_url`.
///
/// Tile-store schemes resolve to the tileset's TileJSON endpoint; the
/// others map onto their serving route, keeping any `{placeholder}`
/// templates intact.
pub fn rewrite_urls(value: &mut Value, base_url: &str) {
    match value {
        Value::String(s) => {
            if let Some(rewritten) = rewrite_one(s, base_url) {
                *s = rewritten;
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_urls(item, base_url);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                rewrite_urls(item, base_url);
            }
        }
        _ => {}
    }
}

fn rewrite_one(s: &str, base_url: &str) -> Option<String> {
    for scheme in ["mbtiles://", "pmtiles://", "xyz://", "postgres://"] {
        if let Some(id) = s.strip_prefix(scheme) {
            return Some(format!("{base_url}/{id}.json"));
        }
    }
    for (scheme, route) in [
        ("sprites://", "sprites"),
        ("fonts://", "fonts"),
        ("geojsons://", "geojsons"),
    ] {
        if let Some(rest) = s.strip_prefix(scheme) {
            return Some(format!("{base_url}/{route}/{rest}"));
        }
    }
    None
}

/// Directory of style documents, one `<id>/style.json` per style
pub struct StyleStore {
    dir: PathBuf,
}

impl StyleStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn style_path(&self, id: &str) -> PathBuf {
        self.dir.join(id).join("style.json")
    }

    /// Load a style document
    pub async fn read(&self, id: &str) -> Result<Value> {
        match tokio::fs::read(self.style_path(id)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::IdNotFound(format!("style {id}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch a remote style into the store unless it is already cached.
    /// The payload must parse as a JSON object before it is persisted.
    pub async fn cache_from_url(&self, id: &str, url: &str, timeout: Duration) -> Result<()> {
        let path = self.style_path(id);
        if path.is_file() {
            return Ok(());
        }

        let client = reqwest::Client::builder()
            .user_agent(crate::USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(e.to_string()))?;
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::UpstreamStatus(response.status().as_u16()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::http(e.to_string()))?;

        let parsed: Value = serde_json::from_slice(&bytes)?;
        if !parsed.is_object() {
            return Err(Error::style(format!("style {id} is not a JSON object")));
        }

        let guard = fslock::acquire(&path, timeout).await?;
        fslock::atomic_write(&path, &bytes).await?;
        drop(guard);
        Ok(())
    }
}
