//! Tile format detection and gzip presentation helpers

use crate::error::{Error, Result};
use flate2::write::{GzDecoder, GzEncoder};
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;

/// Tile payload format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileFormat {
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
    Webp,
    Gif,
    Pbf,
}

impl TileFormat {
    /// Canonical file extension
    pub fn ext(&self) -> &'static str {
        match self {
            TileFormat::Png => "png",
            TileFormat::Jpeg => "jpeg",
            TileFormat::Webp => "webp",
            TileFormat::Gif => "gif",
            TileFormat::Pbf => "pbf",
        }
    }

    /// MIME type served for this format
    pub fn content_type(&self) -> &'static str {
        match self {
            TileFormat::Png => "image/png",
            TileFormat::Jpeg => "image/jpeg",
            TileFormat::Webp => "image/webp",
            TileFormat::Gif => "image/gif",
            TileFormat::Pbf => "application/x-protobuf",
        }
    }

    /// Parse a file extension (accepts the `jpg`/`mvt` aliases)
    pub fn from_ext(ext: &str) -> Result<Self> {
        match ext {
            "png" => Ok(TileFormat::Png),
            "jpg" | "jpeg" => Ok(TileFormat::Jpeg),
            "webp" => Ok(TileFormat::Webp),
            "gif" => Ok(TileFormat::Gif),
            "pbf" | "mvt" => Ok(TileFormat::Pbf),
            other => Err(Error::FormatMismatch(format!("unknown extension: {other}"))),
        }
    }
}

impl fmt::Display for TileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ext())
    }
}

/// Result of sniffing a tile payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SniffInfo {
    pub format: TileFormat,
    pub content_type: &'static str,
    /// Set when the payload carries gzip or zlib framing
    pub content_encoding: Option<&'static str>,
}

/// Detect the format of a tile payload from its magic bytes.
///
/// Anything that is not a recognized raster image is treated as PBF;
/// gzip (`1f 8b`) and zlib (`78 9c`) framing set `content_encoding`.
pub fn sniff(data: &[u8]) -> SniffInfo {
    let format = if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        TileFormat::Png
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        TileFormat::Jpeg
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        TileFormat::Gif
    } else if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        TileFormat::Webp
    } else {
        TileFormat::Pbf
    };

    let content_encoding = if format == TileFormat::Pbf {
        if data.starts_with(&[0x1F, 0x8B]) {
            Some("gzip")
        } else if data.starts_with(&[0x78, 0x9C]) {
            Some("deflate")
        } else {
            None
        }
    } else {
        None
    };

    SniffInfo {
        format,
        content_type: format.content_type(),
        content_encoding,
    }
}

/// Compress data using gzip
pub fn compress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| Error::Other(format!("gzip compression failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| Error::Other(format!("gzip finish failed: {e}")))
}

/// Decompress gzip data
pub fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(Vec::new());
    decoder
        .write_all(data)
        .map_err(|e| Error::Other(format!("gzip decompression failed: {e}")))?;
    decoder
        .finish()
        .map_err(|e| Error::Other(format!("gzip finish failed: {e}")))
}
