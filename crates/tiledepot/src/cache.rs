//! Read-through tile cache
//!
//! Misses are fetched from an upstream tile URL template and written back
//! through the store. Upstream 204/404 means the tile does not exist and is
//! never cached; other failures are retried up to `max_try`.

use crate::error::{Error, Result};
use crate::storage::{TileData, TileStore, WriteOptions};
use crate::tile::coordinate::TileCoordinate;
use std::time::Duration;

/// Upstream tile service addressed by a `{z}/{x}/{y}` URL template
#[derive(Debug, Clone)]
pub struct UpstreamSource {
    url_template: String,
    client: reqwest::Client,
    max_try: u32,
}

impl UpstreamSource {
    /// Build a client for a tile URL template containing `{z}`, `{x}` and
    /// `{y}` placeholders
    pub fn new(url_template: &str, timeout: Duration, max_try: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(e.to_string()))?;

        Ok(Self {
            url_template: url_template.to_string(),
            client,
            max_try: max_try.max(1),
        })
    }

    /// Tile URL for a coordinate
    pub fn tile_url(&self, coord: TileCoordinate) -> String {
        substitute(&self.url_template, coord)
    }

    /// MD5 probe URL: the `{z}/{x}/{y}` part of the template prefixed with
    /// `md5/`. The probe's `ETag` response header carries the hash.
    pub fn md5_url(&self, coord: TileCoordinate) -> String {
        substitute(
            &self.url_template.replace("{z}/{x}/{y}", "md5/{z}/{x}/{y}"),
            coord,
        )
    }

    /// Fetch a tile, retrying transient upstream failures up to `max_try`.
    ///
    /// 204 and 404 are terminal: the tile does not exist upstream.
    pub async fn fetch_tile(&self, coord: TileCoordinate) -> Result<Vec<u8>> {
        let url = self.tile_url(coord);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let error = match self.client.get(&url).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if status == 204 || status == 404 {
                        return Err(Error::UpstreamEmpty);
                    }
                    if response.status().is_success() {
                        match response.bytes().await {
                            Ok(bytes) => return Ok(bytes.to_vec()),
                            Err(e) => Error::http(e.to_string()),
                        }
                    } else {
                        Error::UpstreamStatus(status)
                    }
                }
                Err(e) => Error::http(e.to_string()),
            };

            if attempt >= self.max_try {
                return Err(error);
            }
            tracing::warn!("upstream fetch {url} failed (attempt {attempt}): {error}");
        }
    }

    /// Probe the upstream MD5 of a tile via the `ETag` response header
    pub async fn fetch_md5(&self, coord: TileCoordinate) -> Result<String> {
        let url = self.md5_url(coord);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::http(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 204 || status == 404 {
            return Err(Error::TileMd5NotFound);
        }
        if !response.status().is_success() {
            return Err(Error::UpstreamStatus(status));
        }

        response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|value| value.to_str().ok())
            .map(|etag| etag.trim_matches('"').to_string())
            .ok_or(Error::TileMd5NotFound)
    }
}

fn substitute(template: &str, coord: TileCoordinate) -> String {
    template
        .replace("{z}", &coord.z.to_string())
        .replace("{x}", &coord.x.to_string())
        .replace("{y}", &coord.y.to_string())
}

/// Serve a tile from the store, fetching and write-through caching it on a
/// miss.
///
/// Without an upstream source a miss propagates [`Error::TileNotFound`].
/// A failed cache write is logged and does not fail the request; the store
/// always receives the raw upstream bytes (gzip wrapping for PBF is a
/// presentation concern of the HTTP layer).
pub async fn fetch_or_cache(
    store: &dyn TileStore,
    source: Option<&UpstreamSource>,
    write: &WriteOptions,
    store_cache: bool,
    coord: TileCoordinate,
) -> Result<TileData> {
    match store.get_tile(coord).await {
        Ok(tile) => return Ok(tile),
        Err(Error::TileNotFound) => {}
        Err(e) => return Err(e),
    }

    let Some(source) = source else {
        return Err(Error::TileNotFound);
    };

    let bytes = source.fetch_tile(coord).await?;
    if store_cache {
        if let Err(e) = store.put_tile(coord, bytes.clone(), write).await {
            tracing::warn!("failed to cache tile {coord}: {e}");
        }
    }
    Ok(TileData::new(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DirectoryStore, StoreOptions};
    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    const PNG_TILE: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x01];

    async fn spawn_upstream(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn source(base: &str) -> UpstreamSource {
        UpstreamSource::new(
            &format!("{base}/{{z}}/{{x}}/{{y}}.png"),
            Duration::from_secs(5),
            3,
        )
        .unwrap()
    }

    #[test]
    fn test_url_substitution() {
        let source =
            UpstreamSource::new("https://up/{z}/{x}/{y}.pbf", Duration::from_secs(1), 1).unwrap();
        let coord = TileCoordinate::new(6, 32, 21);
        assert_eq!(source.tile_url(coord), "https://up/6/32/21.pbf");
        assert_eq!(source.md5_url(coord), "https://up/md5/6/32/21.pbf");
    }

    #[tokio::test]
    async fn test_miss_fetches_and_persists() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = {
            let hits = Arc::clone(&hits);
            Router::new().route(
                "/:z/:x/:y",
                get(move || {
                    let hits = Arc::clone(&hits);
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        PNG_TILE.to_vec()
                    }
                }),
            )
        };
        let base = spawn_upstream(router).await;

        let temp = tempdir().unwrap();
        let store = DirectoryStore::open(temp.path(), StoreOptions::writable())
            .await
            .unwrap();
        let source = source(&base);
        let coord = TileCoordinate::new(6, 32, 21);

        let tile = fetch_or_cache(
            &store,
            Some(&source),
            &WriteOptions::default(),
            true,
            coord,
        )
        .await
        .unwrap();
        assert_eq!(tile.bytes, PNG_TILE);
        assert!(temp.path().join("6/32/21.png").is_file());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Second request is served from the store
        fetch_or_cache(
            &store,
            Some(&source),
            &WriteOptions::default(),
            true,
            coord,
        )
        .await
        .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upstream_204_is_not_cached() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = {
            let hits = Arc::clone(&hits);
            Router::new().route(
                "/:z/:x/:y",
                get(move || {
                    let hits = Arc::clone(&hits);
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        StatusCode::NO_CONTENT
                    }
                }),
            )
        };
        let base = spawn_upstream(router).await;

        let temp = tempdir().unwrap();
        let store = DirectoryStore::open(temp.path(), StoreOptions::writable())
            .await
            .unwrap();
        let source = source(&base);
        let coord = TileCoordinate::new(6, 32, 21);

        for expected_hits in 1..=2 {
            let result = fetch_or_cache(
                &store,
                Some(&source),
                &WriteOptions::default(),
                true,
                coord,
            )
            .await;
            assert!(matches!(result, Err(Error::UpstreamEmpty)));
            assert_eq!(hits.load(Ordering::SeqCst), expected_hits);
        }
        assert!(!temp.path().join("6/32/21.png").exists());
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = {
            let hits = Arc::clone(&hits);
            Router::new().route(
                "/:z/:x/:y",
                get(move || {
                    let hits = Arc::clone(&hits);
                    async move {
                        if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                            StatusCode::BAD_GATEWAY.into_response()
                        } else {
                            PNG_TILE.to_vec().into_response()
                        }
                    }
                }),
            )
        };
        let base = spawn_upstream(router).await;

        let bytes = source(&base)
            .fetch_tile(TileCoordinate::new(1, 0, 0))
            .await
            .unwrap();
        assert_eq!(bytes, PNG_TILE);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let router = Router::new().route("/:z/:x/:y", get(|| async { StatusCode::BAD_GATEWAY }));
        let base = spawn_upstream(router).await;

        let result = source(&base).fetch_tile(TileCoordinate::new(1, 0, 0)).await;
        assert!(matches!(result, Err(Error::UpstreamStatus(502))));
    }

    #[tokio::test]
    async fn test_md5_probe() {
        let router = Router::new().route(
            "/md5/:z/:x/:y",
            get(|| async { ([(header::ETAG, "\"abc123\"")], "") }),
        );
        let base = spawn_upstream(router).await;

        let md5 = source(&base)
            .fetch_md5(TileCoordinate::new(8, 203, 112))
            .await
            .unwrap();
        assert_eq!(md5, "abc123");
    }

    #[tokio::test]
    async fn test_md5_probe_absent() {
        let router = Router::new().route("/md5/:z/:x/:y", get(|| async { StatusCode::NO_CONTENT }));
        let base = spawn_upstream(router).await;

        let result = source(&base).fetch_md5(TileCoordinate::new(8, 203, 112)).await;
        assert!(matches!(result, Err(Error::TileMd5NotFound)));
    }

    #[tokio::test]
    async fn test_miss_without_source() {
        let temp = tempdir().unwrap();
        let store = DirectoryStore::open(temp.path(), StoreOptions::writable())
            .await
            .unwrap();

        let result = fetch_or_cache(
            &store,
            None,
            &WriteOptions::default(),
            true,
            TileCoordinate::new(1, 0, 0),
        )
        .await;
        assert!(matches!(result, Err(Error::TileNotFound)));
    }
}
