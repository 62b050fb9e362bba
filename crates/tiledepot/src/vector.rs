//! Protocol-buffer views of vector tiles and SDF glyph ranges
//!
//! Only the fields the cache actually reads are declared; unknown fields
//! are skipped by prost during decode.

use crate::error::Result;
use crate::format::{decompress_gzip, sniff};
use prost::Message;

/// Vector-tile messages, reduced to layer identity
pub mod mvt {
    use prost::Message;

    #[derive(Clone, PartialEq, Message)]
    pub struct Tile {
        #[prost(message, repeated, tag = "3")]
        pub layers: Vec<Layer>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct Layer {
        #[prost(string, required, tag = "1")]
        pub name: String,
        #[prost(uint32, required, tag = "15")]
        pub version: u32,
    }
}

/// SDF glyph range messages (the `glyphs` PBF served under
/// `fonts/{stack}/{range}.pbf`)
pub mod glyphs {
    use prost::Message;

    #[derive(Clone, PartialEq, Message)]
    pub struct Glyphs {
        #[prost(message, repeated, tag = "1")]
        pub stacks: Vec<Fontstack>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct Fontstack {
        #[prost(string, required, tag = "1")]
        pub name: String,
        #[prost(string, required, tag = "2")]
        pub range: String,
        #[prost(message, repeated, tag = "3")]
        pub glyphs: Vec<Glyph>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct Glyph {
        #[prost(uint32, required, tag = "1")]
        pub id: u32,
        #[prost(bytes = "vec", optional, tag = "2")]
        pub bitmap: Option<Vec<u8>>,
        #[prost(uint32, required, tag = "3")]
        pub width: u32,
        #[prost(uint32, required, tag = "4")]
        pub height: u32,
        #[prost(sint32, required, tag = "5")]
        pub left: i32,
        #[prost(sint32, required, tag = "6")]
        pub top: i32,
        #[prost(uint32, required, tag = "7")]
        pub advance: u32,
    }
}

/// Strip gzip/zlib framing from a PBF payload when present
pub fn unframe(data: &[u8]) -> Result<Vec<u8>> {
    match sniff(data).content_encoding {
        Some("gzip") => decompress_gzip(data),
        Some("deflate") => {
            use std::io::Read;
            let mut out = Vec::new();
            flate2::read::ZlibDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| crate::Error::Other(format!("zlib decompression failed: {e}")))?;
            Ok(out)
        }
        _ => Ok(data.to_vec()),
    }
}

/// Decode the layer names of a vector tile payload (framed or raw)
pub fn layer_names(data: &[u8]) -> Result<Vec<String>> {
    let raw = unframe(data)?;
    let tile = mvt::Tile::decode(raw.as_slice())?;
    Ok(tile.layers.into_iter().map(|l| l.name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::compress_gzip;

    fn sample_tile(names: &[&str]) -> Vec<u8> {
        let tile = mvt::Tile {
            layers: names
                .iter()
                .map(|n| mvt::Layer {
                    name: (*n).to_string(),
                    version: 2,
                })
                .collect(),
        };
        tile.encode_to_vec()
    }

    #[test]
    fn test_layer_names_raw() {
        let data = sample_tile(&["roads", "water"]);
        assert_eq!(layer_names(&data).unwrap(), vec!["roads", "water"]);
    }

    #[test]
    fn test_layer_names_gzipped() {
        let data = compress_gzip(&sample_tile(&["buildings"])).unwrap();
        assert_eq!(layer_names(&data).unwrap(), vec!["buildings"]);
    }

    #[test]
    fn test_glyphs_roundtrip() {
        let stack = glyphs::Glyphs {
            stacks: vec![glyphs::Fontstack {
                name: "Test Sans".to_string(),
                range: "0-255".to_string(),
                glyphs: vec![glyphs::Glyph {
                    id: 65,
                    bitmap: Some(vec![1, 2, 3]),
                    width: 10,
                    height: 12,
                    left: 1,
                    top: -2,
                    advance: 11,
                }],
            }],
        };

        let bytes = stack.encode_to_vec();
        let decoded = glyphs::Glyphs::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, stack);
    }
}
