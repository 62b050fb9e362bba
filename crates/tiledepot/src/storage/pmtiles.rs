//! Read-only PMTiles storage backend
//!
//! PMTiles archives are immutable single-file pyramids; this store serves
//! them through the common contract and rejects every mutating operation.

use crate::error::{Error, Result};
use crate::format::TileFormat;
use crate::storage::{md5_hex, StoreKind, TileData, TileStore, WriteOptions};
use crate::tile::coordinate::{Scheme, TileCoordinate};
use crate::tilejson::{Metadata, TileJson};
use async_trait::async_trait;
use pmtiles::{AsyncPmTilesReader, MmapBackend, TileCoord, TileType};
use std::path::Path;

/// Read-only PMTiles tile store
pub struct PmtilesStore {
    reader: AsyncPmTilesReader<MmapBackend>,
    metadata: Metadata,
}

impl PmtilesStore {
    /// Memory-map a PMTiles archive and read its header and embedded
    /// metadata
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = AsyncPmTilesReader::new_with_path(path)
            .await
            .map_err(|e| Error::PmTiles(format!("{}: {e}", path.display())))?;

        let header = reader.get_header();
        let mut metadata = Metadata::default();
        metadata.name = path
            .file_stem()
            .and_then(|n| n.to_str())
            .map(str::to_string);
        metadata.format = Some(match header.tile_type {
            TileType::Png => TileFormat::Png,
            TileType::Jpeg => TileFormat::Jpeg,
            TileType::Webp => TileFormat::Webp,
            _ => TileFormat::Pbf,
        });
        metadata.minzoom = Some(header.min_zoom);
        metadata.maxzoom = Some(header.max_zoom);
        metadata.bounds = Some([
            header.min_longitude.into(),
            header.min_latitude.into(),
            header.max_longitude.into(),
            header.max_latitude.into(),
        ]);
        metadata.center = Some([
            header.center_longitude.into(),
            header.center_latitude.into(),
            f64::from(header.center_zoom),
        ]);

        // The embedded metadata JSON carries name/attribution/vector_layers
        if let Ok(json) = reader.get_metadata().await {
            if let Ok(embedded) = serde_json::from_str::<Metadata>(&json) {
                metadata.merge(&embedded);
            }
        }

        Ok(Self { reader, metadata })
    }
}

#[async_trait]
impl TileStore for PmtilesStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Pmtiles
    }

    fn scheme(&self) -> Scheme {
        Scheme::Xyz
    }

    async fn get_tile(&self, coord: TileCoordinate) -> Result<TileData> {
        coord.validate()?;
        let tile_coord = TileCoord::new(coord.z, coord.x, coord.y)
            .map_err(|e| Error::InvalidCoordinate(e.to_string()))?;

        match self.reader.get_tile(tile_coord).await {
            Ok(Some(bytes)) => Ok(TileData::new(bytes.to_vec())),
            Ok(None) => Err(Error::TileNotFound),
            Err(e) => Err(Error::PmTiles(e.to_string())),
        }
    }

    async fn put_tile(
        &self,
        _coord: TileCoordinate,
        _bytes: Vec<u8>,
        _opts: &WriteOptions,
    ) -> Result<()> {
        Err(Error::Unsupported("PMTiles archives are read-only".into()))
    }

    async fn delete_tile(&self, _coord: TileCoordinate) -> Result<()> {
        Err(Error::Unsupported("PMTiles archives are read-only".into()))
    }

    async fn tile_md5(&self, coord: TileCoordinate) -> Result<String> {
        match self.get_tile(coord).await {
            Ok(tile) => Ok(md5_hex(&tile.bytes)),
            Err(Error::TileNotFound) => Err(Error::TileMd5NotFound),
            Err(e) => Err(e),
        }
    }

    async fn tile_created(&self, _coord: TileCoordinate) -> Result<i64> {
        Err(Error::CreatedNotFound)
    }

    async fn put_metadata(&self, _merge: &Metadata) -> Result<()> {
        Err(Error::Unsupported("PMTiles archives are read-only".into()))
    }

    async fn info(&self) -> Result<TileJson> {
        let mut metadata = self.metadata.clone();
        metadata.fill_missing(&Metadata::defaults());
        metadata.fill_center();
        metadata.scheme = Some(Scheme::Xyz);
        Ok(TileJson::new(metadata))
    }
}
