//! GeoJSON layer store and style-bucket classification

use crate::error::{Error, Result};
use crate::fslock;
use geojson::{GeoJson, Geometry, Value};
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Style bucket a geometry kind renders into
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleBucket {
    Polygon,
    Line,
    Circle,
}

/// Classify every geometry kind present in a GeoJSON document
pub fn classify(geojson: &GeoJson) -> BTreeSet<StyleBucket> {
    let mut buckets = BTreeSet::new();
    match geojson {
        GeoJson::Geometry(geometry) => classify_geometry(geometry, &mut buckets),
        GeoJson::Feature(feature) => {
            if let Some(geometry) = &feature.geometry {
                classify_geometry(geometry, &mut buckets);
            }
        }
        GeoJson::FeatureCollection(collection) => {
            for feature in &collection.features {
                if let Some(geometry) = &feature.geometry {
                    classify_geometry(geometry, &mut buckets);
                }
            }
        }
    }
    buckets
}

fn classify_geometry(geometry: &Geometry, buckets: &mut BTreeSet<StyleBucket>) {
    match &geometry.value {
        Value::Point(_) | Value::MultiPoint(_) => {
            buckets.insert(StyleBucket::Circle);
        }
        Value::LineString(_) | Value::MultiLineString(_) => {
            buckets.insert(StyleBucket::Line);
        }
        Value::Polygon(_) | Value::MultiPolygon(_) => {
            buckets.insert(StyleBucket::Polygon);
        }
        Value::GeometryCollection(members) => {
            for member in members {
                classify_geometry(member, buckets);
            }
        }
    }
}

/// Directory of GeoJSON layers, `<id>/<layer>.geojson` per layer
pub struct GeoJsonStore {
    dir: PathBuf,
    timeout: Duration,
}

impl GeoJsonStore {
    pub fn new<P: AsRef<Path>>(dir: P, timeout: Duration) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            timeout,
        }
    }

    fn layer_path(&self, id: &str, layer: &str) -> PathBuf {
        self.dir.join(id).join(format!("{layer}.geojson"))
    }

    /// Read a stored layer
    pub async fn read(&self, id: &str, layer: &str) -> Result<Vec<u8>> {
        match tokio::fs::read(self.layer_path(id, layer)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::IdNotFound(format!("geojson {id}/{layer}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read a layer, fetching and caching it from `url` on a miss.
    /// The payload must parse as GeoJSON before it is persisted.
    pub async fn fetch_or_cache(&self, id: &str, layer: &str, url: &str) -> Result<Vec<u8>> {
        match self.read(id, layer).await {
            Ok(bytes) => return Ok(bytes),
            Err(Error::IdNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let client = reqwest::Client::builder()
            .user_agent(crate::USER_AGENT)
            .timeout(self.timeout)
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
            .map_err(|e| Error::http(e.to_string()))?
            .to_vec();

        std::str::from_utf8(&bytes)
            .map_err(|_| Error::style(format!("geojson {id}/{layer} is not UTF-8")))?
            .parse::<GeoJson>()
            .map_err(|e| Error::style(format!("invalid geojson {id}/{layer}: {e}")))?;

        let path = self.layer_path(id, layer);
        let guard = fslock::acquire(&path, self.timeout).await?;
        fslock::atomic_write(&path, &bytes).await?;
        drop(guard);
        Ok(bytes)
    }

    /// ETag of a stored layer (MD5 of the stored bytes)
    pub async fn etag(&self, id: &str, layer: &str) -> Result<String> {
        Ok(crate::storage::md5_hex(&self.read(id, layer).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn parse(s: &str) -> GeoJson {
        s.parse().unwrap()
    }

    #[test]
    fn test_classification_buckets() {
        let point = parse(r#"{"type": "Point", "coordinates": [105.8, 21.0]}"#);
        assert_eq!(classify(&point), BTreeSet::from([StyleBucket::Circle]));

        let line = parse(r#"{"type": "MultiLineString", "coordinates": [[[0,0],[1,1]]]}"#);
        assert_eq!(classify(&line), BTreeSet::from([StyleBucket::Line]));

        let polygon = parse(r#"{"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}"#);
        assert_eq!(classify(&polygon), BTreeSet::from([StyleBucket::Polygon]));
    }

    #[test]
    fn test_classification_recurses() {
        let collection = parse(
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [0, 0]}},
                {"type": "Feature", "properties": {}, "geometry": {"type": "GeometryCollection", "geometries": [
                    {"type": "LineString", "coordinates": [[0,0],[1,1]]},
                    {"type": "MultiPolygon", "coordinates": [[[[0,0],[1,0],[1,1],[0,0]]]]}
                ]}}
            ]}"#,
        );
        assert_eq!(
            classify(&collection),
            BTreeSet::from([StyleBucket::Polygon, StyleBucket::Line, StyleBucket::Circle])
        );
    }

    #[tokio::test]
    async fn test_read_and_etag() {
        let temp = tempdir().unwrap();
        let body = br#"{"type": "Point", "coordinates": [0, 0]}"#;
        std::fs::create_dir_all(temp.path().join("tracks")).unwrap();
        std::fs::write(temp.path().join("tracks/run.geojson"), body).unwrap();

        let store = GeoJsonStore::new(temp.path(), Duration::from_secs(5));
        assert_eq!(store.read("tracks", "run").await.unwrap(), body);
        assert_eq!(
            store.etag("tracks", "run").await.unwrap(),
            crate::storage::md5_hex(body)
        );
        assert!(matches!(
            store.read("tracks", "walk").await,
            Err(Error::IdNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_or_cache_persists() {
        use axum::routing::get;

        let body = r#"{"type": "Point", "coordinates": [1.0, 2.0]}"#;
        let router = axum::Router::new().route("/layer", get(move || async move { body }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let temp = tempdir().unwrap();
        let store = GeoJsonStore::new(temp.path(), Duration::from_secs(5));
        let url = format!("http://{addr}/layer");

        let bytes = store.fetch_or_cache("tracks", "run", &url).await.unwrap();
        assert_eq!(bytes, body.as_bytes());
        assert!(temp.path().join("tracks/run.geojson").is_file());

        // Second call reads from disk
        let cached = store.fetch_or_cache("tracks", "run", &url).await.unwrap();
        assert_eq!(cached, body.as_bytes());
    }

    #[tokio::test]
    async fn test_invalid_payload_not_cached() {
        use axum::routing::get;

        let router = axum::Router::new().route("/bad", get(|| async { "not geojson at all" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let temp = tempdir().unwrap();
        let store = GeoJsonStore::new(temp.path(), Duration::from_secs(5));

        let result = store
            .fetch_or_cache("tracks", "bad", &format!("http://{addr}/bad"))
            .await;
        assert!(result.is_err());
        assert!(!temp.path().join("tracks/bad.geojson").exists());
    }
}
