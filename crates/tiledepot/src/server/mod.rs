//! Tile server module

pub mod cache;
pub mod handler;

pub use cache::TileCache;
pub use handler::AppState;

use crate::error::{Error, Result};
use crate::repository::Repository;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Tile server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Enable CORS
    pub cors: bool,
    /// Enable the in-memory tile cache
    pub cache_enabled: bool,
    /// Cache size (number of tiles)
    pub cache_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".parse().expect("static addr"),
            cors: true,
            cache_enabled: true,
            cache_size: 1000,
        }
    }
}

/// Tile server over a repository of opened stores
pub struct TileServer {
    repo: Arc<Repository>,
    config: ServerConfig,
}

impl TileServer {
    /// Create a server with default configuration
    pub fn new(repo: Arc<Repository>) -> Self {
        Self::with_config(repo, ServerConfig::default())
    }

    /// Create a server with custom configuration
    pub fn with_config(repo: Arc<Repository>, config: ServerConfig) -> Self {
        Self { repo, config }
    }

    /// Build the router
    pub fn router(&self) -> Router {
        let cache = self
            .config
            .cache_enabled
            .then(|| TileCache::new(self.config.cache_size));
        let state = Arc::new(AppState {
            repo: Arc::clone(&self.repo),
            cache,
            config: self.config.clone(),
        });

        let mut router = Router::new()
            .route("/health", get(handler::handle_health))
            .route("/styles/:id/style.json", get(handler::handle_style))
            .route("/fonts/:fontstack/:range", get(handler::handle_glyphs))
            .route("/sprites/:id/:file", get(handler::handle_sprite))
            .route("/geojsons/:id/:layer", get(handler::handle_geojson))
            .route("/:id", get(handler::handle_root_file))
            .route("/:id/md5/:z/:x/:y", get(handler::handle_tile_md5))
            .route("/:id/:z/:x/:y", get(handler::handle_tile))
            .with_state(state);

        if self.config.cors {
            router = router.layer(CorsLayer::permissive());
        }
        router.layer(TraceLayer::new_for_http())
    }

    /// Serve until the process is stopped
    pub async fn run(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("tile server listening on {}", self.config.bind_addr);

        axum::serve(listener, self.router())
            .await
            .map_err(|e| Error::http(format!("server error: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{decompress_gzip, TileFormat};
    use crate::repository::Config;
    use crate::storage::md5_hex;
    use crate::tilejson::TileJson;
    use axum::routing::get as axum_get;
    use prost::Message;
    use tempfile::tempdir;

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert!(config.cors);
        assert!(config.cache_enabled);
    }

    fn sample_pbf() -> Vec<u8> {
        crate::vector::mvt::Tile {
            layers: vec![crate::vector::mvt::Layer {
                name: "roads".into(),
                version: 2,
            }],
        }
        .encode_to_vec()
    }

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Upstream + repository + server wired against one temp data dir
    async fn serve_cached_pbf() -> (String, std::path::PathBuf, tempfile::TempDir) {
        let upstream =
            axum::Router::new().route("/:z/:x/:y", axum_get(|| async { sample_pbf() }));
        let upstream_base = spawn(upstream).await;

        let temp = tempdir().unwrap();
        let config: Config = serde_json::from_str(&format!(
            r#"{{"datas": {{"osm": {{"kind": "xyz", "cache": {{"url": "{upstream_base}/{{z}}/{{x}}/{{y}}.pbf"}}}}}}}}"#,
        ))
        .unwrap();
        let repo = Repository::open(temp.path(), config).await.unwrap();

        let server = TileServer::new(Arc::new(repo));
        let base = spawn(server.router()).await;
        let cache_dir = temp.path().join("caches/xyzs/osm");
        (base, cache_dir, temp)
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder().build().unwrap()
    }

    #[tokio::test]
    async fn test_tile_miss_fetch_store_serve() {
        let (base, cache_dir, _temp) = serve_cached_pbf().await;

        let response = client()
            .get(format!("{base}/osm/6/32/21.pbf"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(
            response
                .headers()
                .get("content-encoding")
                .and_then(|v| v.to_str().ok()),
            Some("gzip")
        );
        assert_eq!(
            response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok()),
            Some("application/x-protobuf")
        );

        let body = response.bytes().await.unwrap();
        assert_eq!(decompress_gzip(&body).unwrap(), sample_pbf());

        // The raw bytes were persisted into the cache tree
        let stored = std::fs::read(cache_dir.join("6/32/21.pbf")).unwrap();
        assert_eq!(stored, sample_pbf());
    }

    #[tokio::test]
    async fn test_missing_tile_is_204() {
        let temp = tempdir().unwrap();
        let good = temp.path().join("xyzs/empty");
        std::fs::create_dir_all(good.join("1/0")).unwrap();
        std::fs::write(good.join("1/0/0.png"), [0x89, 0x50, 0x4E, 0x47]).unwrap();

        let config: Config = serde_json::from_str(
            r#"{"datas": {"empty": {"kind": "xyz", "path": "empty"}}}"#,
        )
        .unwrap();
        let repo = Repository::open(temp.path(), config).await.unwrap();
        let base = spawn(TileServer::new(Arc::new(repo)).router()).await;

        let response = client()
            .get(format!("{base}/empty/1/1/1.png"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 204);
        assert!(response.bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_id_is_404_and_bad_format_is_400() {
        let (base, _cache_dir, _temp) = serve_cached_pbf().await;

        let response = client()
            .get(format!("{base}/nope/1/0/0.png"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);

        // The store serves pbf; asking for png is a format mismatch
        let response = client()
            .get(format!("{base}/osm/6/32/21.png"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_md5_endpoint() {
        let (base, _cache_dir, _temp) = serve_cached_pbf().await;

        // Populate through the tile endpoint first
        client()
            .get(format!("{base}/osm/6/32/21.pbf"))
            .send()
            .await
            .unwrap();

        let response = client()
            .get(format!("{base}/osm/md5/6/32/21.pbf"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(
            response
                .headers()
                .get("etag")
                .and_then(|v| v.to_str().ok()),
            Some(format!("\"{}\"", md5_hex(&sample_pbf())).as_str())
        );
        assert!(response.bytes().await.unwrap().is_empty());

        // Absent tile: 204
        let response = client()
            .get(format!("{base}/osm/md5/6/0/0.pbf"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 204);
    }

    #[tokio::test]
    async fn test_tilejson_injects_tiles_url() {
        let (base, _cache_dir, _temp) = serve_cached_pbf().await;

        // Seed one tile so format derivation sees pbf
        client()
            .get(format!("{base}/osm/6/32/21.pbf"))
            .send()
            .await
            .unwrap();

        let response = client()
            .get(format!("{base}/osm.json"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let tilejson: TileJson = response.json().await.unwrap();
        assert_eq!(tilejson.tilejson, "2.2.0");
        assert_eq!(tilejson.metadata.format, Some(TileFormat::Pbf));
        assert_eq!(tilejson.tiles, vec![format!("{base}/osm/{{z}}/{{x}}/{{y}}.pbf")]);

        let response = client()
            .get(format!("{base}/datas.json"))
            .send()
            .await
            .unwrap();
        let index: Vec<serde_json::Value> = response.json().await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index[0]["id"], "osm");
    }

    #[tokio::test]
    async fn test_tms_scheme_flips_row() {
        let (base, cache_dir, _temp) = serve_cached_pbf().await;

        client()
            .get(format!("{base}/osm/6/32/21.pbf?scheme=tms"))
            .send()
            .await
            .unwrap();

        // TMS row 21 at z6 is XYZ row 42
        assert!(cache_dir.join("6/32/42.pbf").is_file());
    }
}
