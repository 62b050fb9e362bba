//! Tileset metadata and TileJSON synthesis
//!
//! Metadata is assembled from three layers, in order: built-in defaults,
//! the values persisted in the store, and values derived from the tiles
//! themselves. Derivation only fills keys that are still missing.

use crate::error::{Error, Result};
use crate::format::TileFormat;
use crate::tile::coordinate::Scheme;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Layer classification of a tileset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    Baselayer,
    Overlay,
}

/// Vector layer description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorLayer {
    /// Layer ID
    pub id: String,

    /// Layer description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Minimum zoom level
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minzoom: Option<u8>,

    /// Maximum zoom level
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxzoom: Option<u8>,

    /// Field definitions (name -> type)
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub fields: BTreeMap<String, String>,
}

impl VectorLayer {
    /// Create a layer carrying only its id
    pub fn named<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            description: None,
            minzoom: None,
            maxzoom: None,
            fields: BTreeMap::new(),
        }
    }
}

/// Tileset metadata map with recognized keys typed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub layer_type: Option<LayerType>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<TileFormat>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub minzoom: Option<u8>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxzoom: Option<u8>,

    /// `[west, south, east, north]`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<[f64; 4]>,

    /// `[lon, lat, zoom]`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub center: Option<[f64; 3]>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_layers: Option<Vec<VectorLayer>>,

    /// Opaque tilestats pass-through
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tilestats: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<Scheme>,

    /// Keys the cache does not interpret, preserved across merges
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Metadata {
    /// The defaults layer of the merge
    pub fn defaults() -> Self {
        Self {
            layer_type: Some(LayerType::Overlay),
            format: Some(TileFormat::Png),
            bounds: Some([-180.0, -crate::tile::MAX_LATITUDE, 180.0, crate::tile::MAX_LATITUDE]),
            minzoom: Some(crate::MIN_ZOOM_LEVEL),
            maxzoom: Some(crate::MAX_ZOOM_LEVEL),
            ..Default::default()
        }
    }

    /// Merge `patch` into self: keys present in the patch win, keys absent
    /// from the patch are preserved.
    pub fn merge(&mut self, patch: &Metadata) {
        macro_rules! take {
            ($field:ident) => {
                if patch.$field.is_some() {
                    self.$field = patch.$field.clone();
                }
            };
        }
        take!(name);
        take!(description);
        take!(attribution);
        take!(version);
        take!(layer_type);
        take!(format);
        take!(minzoom);
        take!(maxzoom);
        take!(bounds);
        take!(center);
        take!(vector_layers);
        take!(tilestats);
        take!(scheme);
        for (k, v) in &patch.extra {
            self.extra.insert(k.clone(), v.clone());
        }
    }

    /// Fill keys still missing from `derived` (the lowest-priority layer)
    pub fn fill_missing(&mut self, derived: &Metadata) {
        macro_rules! fill {
            ($field:ident) => {
                if self.$field.is_none() {
                    self.$field = derived.$field.clone();
                }
            };
        }
        fill!(name);
        fill!(description);
        fill!(attribution);
        fill!(version);
        fill!(layer_type);
        fill!(format);
        fill!(minzoom);
        fill!(maxzoom);
        fill!(bounds);
        fill!(center);
        fill!(vector_layers);
        fill!(tilestats);
        fill!(scheme);
        for (k, v) in &derived.extra {
            self.extra.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    /// Compute `center` from bounds and the zoom range when absent
    pub fn fill_center(&mut self) {
        if self.center.is_some() {
            return;
        }
        if let (Some(bounds), Some(minzoom), Some(maxzoom)) =
            (self.bounds, self.minzoom, self.maxzoom)
        {
            self.center = Some([
                (bounds[0] + bounds[2]) / 2.0,
                (bounds[1] + bounds[3]) / 2.0,
                f64::from((minzoom + maxzoom) / 2),
            ]);
        }
    }

    /// Validate before the metadata is admitted into the repository
    pub fn validate(&self) -> Result<()> {
        if self.name.is_none() {
            return Err(Error::validation("name is required"));
        }
        if let (Some(minzoom), Some(maxzoom)) = (self.minzoom, self.maxzoom) {
            if minzoom > maxzoom {
                return Err(Error::validation(format!(
                    "minzoom {minzoom} exceeds maxzoom {maxzoom}"
                )));
            }
        }
        for z in [self.minzoom, self.maxzoom].into_iter().flatten() {
            if z > crate::MAX_ZOOM_LEVEL {
                return Err(Error::validation(format!("zoom {z} out of range")));
            }
        }
        if let Some(b) = self.bounds {
            if b[0].abs() > 180.0 || b[2].abs() > 180.0 || b[1].abs() > 90.0 || b[3].abs() > 90.0 {
                return Err(Error::validation(format!("bounds out of range: {b:?}")));
            }
            if b[0] >= b[2] || b[1] >= b[3] {
                return Err(Error::validation(format!("bounds not ordered: {b:?}")));
            }
        }
        if let Some(c) = self.center {
            if c[0].abs() > 180.0 || c[1].abs() > 90.0 || c[2] < 0.0 || c[2] > f64::from(crate::MAX_ZOOM_LEVEL)
            {
                return Err(Error::validation(format!("center out of range: {c:?}")));
            }
        }
        if self.format == Some(TileFormat::Pbf) && self.vector_layers.is_none() {
            return Err(Error::validation("vector_layers required for pbf tilesets"));
        }
        Ok(())
    }
}

/// TileJSON document served to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileJson {
    /// TileJSON spec version
    pub tilejson: String,

    /// Tile URL templates
    pub tiles: Vec<String>,

    #[serde(flatten)]
    pub metadata: Metadata,
}

impl TileJson {
    /// Wrap synthesized metadata into a TileJSON document. `tiles` is
    /// injected later by the HTTP layer.
    pub fn new(metadata: Metadata) -> Self {
        Self {
            tilejson: "2.2.0".to_string(),
            tiles: Vec::new(),
            metadata,
        }
    }
}
