//! HTTP request handlers

use crate::cache::fetch_or_cache;
use crate::error::{Error, Result};
use crate::format::{compress_gzip, TileFormat};
use crate::server::cache::TileCache;
use crate::server::ServerConfig;
use crate::storage::{md5_hex, TileData};
use crate::style::rewrite_urls;
use crate::repository::Repository;
use crate::tile::coordinate::{Scheme, TileCoordinate};
use crate::tilejson::TileJson;
use axum::extract::{Host, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

/// Shared handler state
pub struct AppState {
    pub repo: Arc<Repository>,
    pub cache: Option<TileCache>,
    pub config: ServerConfig,
}

impl AppState {
    /// Public base URL: configured, or derived from the request host
    fn base_url(&self, host: &str) -> String {
        self.repo
            .base_url
            .clone()
            .unwrap_or_else(|| format!("http://{host}"))
    }

    async fn tilejson(&self, base_url: &str, id: &str) -> Result<TileJson> {
        let entry = self.repo.data(id)?;
        let mut tilejson = entry.store.info().await?;
        let format = tilejson.metadata.format.unwrap_or(TileFormat::Png);
        tilejson.tiles = vec![format!(
            "{base_url}/{id}/{{z}}/{{x}}/{{y}}.{}",
            format.ext()
        )];
        Ok(tilejson)
    }
}

/// `GET /health`
///
/// Reports 503 while the `STARTING_UP` readiness gate is set.
pub async fn handle_health() -> Response {
    if std::env::var("STARTING_UP").is_ok_and(|v| v == "1" || v == "true") {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "starting"})),
        )
            .into_response();
    }
    Json(serde_json::json!({
        "status": "healthy",
        "version": crate::VERSION,
    }))
    .into_response()
}

/// Dispatch for single-segment documents: `datas.json`, `tilejsons.json`
/// and `<id>.json`
pub async fn handle_root_file(
    State(state): State<Arc<AppState>>,
    Host(host): Host,
    Path(file): Path<String>,
) -> Result<Response> {
    let base_url = state.base_url(&host);
    match file.as_str() {
        "datas.json" => {
            let index: Vec<serde_json::Value> = state
                .repo
                .datas
                .iter()
                .map(|(id, entry)| {
                    serde_json::json!({
                        "id": id,
                        "kind": entry.store.kind(),
                        "url": format!("{base_url}/{id}.json"),
                    })
                })
                .collect();
            Ok(Json(index).into_response())
        }
        "tilejsons.json" => {
            let mut tilejsons = Vec::new();
            for id in state.repo.datas.keys() {
                tilejsons.push(state.tilejson(&base_url, id).await?);
            }
            Ok(Json(tilejsons).into_response())
        }
        _ => {
            let Some(id) = file.strip_suffix(".json") else {
                return Err(Error::IdNotFound(file));
            };
            Ok(Json(state.tilejson(&base_url, id).await?).into_response())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TileQuery {
    scheme: Option<Scheme>,
}

fn parse_tile_path(z: u8, x: u32, y_ext: &str, scheme: Option<Scheme>) -> Result<(TileCoordinate, TileFormat)> {
    let Some((y, ext)) = y_ext.split_once('.') else {
        return Err(Error::InvalidCoordinate(format!(
            "missing tile extension: {y_ext}"
        )));
    };
    let y: u32 = y
        .parse()
        .map_err(|_| Error::InvalidCoordinate(format!("invalid row: {y}")))?;
    let format = TileFormat::from_ext(ext)?;

    // The request row is flipped when the client addresses in TMS
    let mut coord = TileCoordinate::new(z, x, y);
    coord.validate()?;
    if scheme == Some(Scheme::Tms) {
        coord = coord.flip_y();
    }
    Ok((coord, format))
}

/// `GET /:id/:z/:x/:y.:format`
pub async fn handle_tile(
    State(state): State<Arc<AppState>>,
    Path((id, z, x, y_ext)): Path<(String, u8, u32, String)>,
    Query(query): Query<TileQuery>,
) -> Result<Response> {
    let (coord, format) = parse_tile_path(z, x, &y_ext, query.scheme)?;
    let entry = state.repo.data(&id)?;

    if let Some(cache) = &state.cache {
        if let Some(tile) = cache.get(&id, coord).await {
            return tile_response(&tile, format);
        }
    }

    let tile = fetch_or_cache(
        entry.store.as_ref(),
        entry.source.as_ref(),
        &entry.write,
        entry.store_cache,
        coord,
    )
    .await?;
    let tile = Arc::new(tile);

    if let Some(cache) = &state.cache {
        cache.put(&id, coord, Arc::clone(&tile)).await;
    }
    tile_response(&tile, format)
}

/// `GET /:id/md5/:z/:x/:y.:format`
pub async fn handle_tile_md5(
    State(state): State<Arc<AppState>>,
    Path((id, z, x, y_ext)): Path<(String, u8, u32, String)>,
    Query(query): Query<TileQuery>,
) -> Result<Response> {
    let (coord, _format) = parse_tile_path(z, x, &y_ext, query.scheme)?;
    let entry = state.repo.data(&id)?;

    let md5 = entry.store.tile_md5(coord).await?;
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ETAG,
        HeaderValue::from_str(&format!("\"{md5}\"")).map_err(|e| Error::Other(e.to_string()))?,
    );
    Ok((StatusCode::OK, headers).into_response())
}

/// Build a tile response. PBF payloads that carry no framing are
/// gzip-wrapped at this boundary only; stores always hold raw bytes.
fn tile_response(tile: &TileData, requested: TileFormat) -> Result<Response> {
    if tile.info.format != requested {
        return Err(Error::FormatMismatch(format!(
            "tile is {}, requested {requested}",
            tile.info.format
        )));
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(tile.info.content_type),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=86400"),
    );
    headers.insert(
        header::ETAG,
        HeaderValue::from_str(&format!("\"{}\"", md5_hex(&tile.bytes)))
            .map_err(|e| Error::Other(e.to_string()))?,
    );

    let body = if tile.info.format == TileFormat::Pbf {
        match tile.info.content_encoding {
            Some(encoding) => {
                headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static(encoding));
                tile.bytes.clone()
            }
            None => {
                headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                compress_gzip(&tile.bytes)?
            }
        }
    } else {
        tile.bytes.clone()
    };

    Ok((StatusCode::OK, headers, body).into_response())
}

/// `GET /styles/:id/style.json`
pub async fn handle_style(
    State(state): State<Arc<AppState>>,
    Host(host): Host,
    Path(id): Path<String>,
) -> Result<Response> {
    if !state.repo.style_ids.contains(&id) {
        return Err(Error::IdNotFound(format!("style {id}")));
    }
    let mut style = state.repo.styles.read(&id).await?;
    rewrite_urls(&mut style, &state.base_url(&host));
    Ok(Json(style).into_response())
}

/// `GET /fonts/:fontstack/:range.pbf`
pub async fn handle_glyphs(
    State(state): State<Arc<AppState>>,
    Path((fontstack, range_ext)): Path<(String, String)>,
) -> Result<Response> {
    let Some(range) = range_ext.strip_suffix(".pbf") else {
        return Err(Error::style(format!("invalid glyph file: {range_ext}")));
    };
    let combined = state.repo.glyphs.combined(&fontstack, range).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-protobuf"),
    );
    Ok((StatusCode::OK, headers, combined).into_response())
}

/// `GET /sprites/:id/:file`
pub async fn handle_sprite(
    State(state): State<Arc<AppState>>,
    Path((id, file)): Path<(String, String)>,
) -> Result<Response> {
    if !state.repo.sprite_ids.contains(&id) {
        return Err(Error::IdNotFound(format!("sprite {id}")));
    }
    let Some((_, ext)) = crate::style::sprite::parse_sprite_file_name(&file) else {
        return Err(Error::style(format!("invalid sprite file: {file}")));
    };

    let bytes = tokio::fs::read(state.repo.sprites_dir.join(&id).join(&file))
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::IdNotFound(format!("sprite {id}/{file}")),
            _ => Error::Io(e),
        })?;

    let content_type = match ext {
        "png" => "image/png",
        _ => "application/json",
    };
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    Ok((StatusCode::OK, headers, bytes).into_response())
}

/// `GET /geojsons/:id/:layer.geojson`
pub async fn handle_geojson(
    State(state): State<Arc<AppState>>,
    Path((id, layer_ext)): Path<(String, String)>,
) -> Result<Response> {
    let Some(layer) = layer_ext.strip_suffix(".geojson") else {
        return Err(Error::style(format!("invalid geojson file: {layer_ext}")));
    };

    let url = state
        .repo
        .geojson_sources
        .get(&id)
        .and_then(|layers| layers.get(layer))
        .and_then(|layer_config| layer_config.url.clone());

    let bytes = match url {
        Some(url) => {
            state
                .repo
                .geojsons
                .fetch_or_cache(&id, layer, &url)
                .await?
        }
        None => state.repo.geojsons.read(&id, layer).await?,
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/geo+json"),
    );
    headers.insert(
        header::ETAG,
        HeaderValue::from_str(&format!("\"{}\"", md5_hex(&bytes)))
            .map_err(|e| Error::Other(e.to_string()))?,
    );
    Ok((StatusCode::OK, headers, bytes).into_response())
}

/// Clients see HTTP codes only; internal error detail never leaves the
/// process for 5xx responses.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::TileNotFound
            | Error::UpstreamEmpty
            | Error::TileMd5NotFound
            | Error::CreatedNotFound => StatusCode::NO_CONTENT.into_response(),
            Error::IdNotFound(_) => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"error": "not found"})),
            )
                .into_response(),
            Error::InvalidCoordinate(_)
            | Error::InvalidBounds(_)
            | Error::FormatMismatch(_)
            | Error::Style(_) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": self.to_string()})),
            )
                .into_response(),
            _ => {
                tracing::error!("request failed: {self}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({"error": "internal server error"})),
                )
                    .into_response()
            }
        }
    }
}
