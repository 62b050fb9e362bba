//! SDF glyph range serving and fontstack combination
//!
//! A fontstack request names an ordered, comma-separated list of fonts.
//! Each font contributes the glyphs the previous fonts did not define
//! (earlier wins on glyph id); the combined stack's `name` preserves the
//! input order.

use crate::error::{Error, Result};
use crate::vector::glyphs::{Fontstack, Glyphs};
use crate::vector::unframe;
use prost::Message;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Glyph range utilities
pub struct GlyphRange;

impl GlyphRange {
    /// Parse a glyph range string (e.g. "0-255")
    pub fn parse(range: &str) -> Result<(u32, u32)> {
        let Some((start, end)) = range.split_once('-') else {
            return Err(Error::style(format!("invalid glyph range: {range}")));
        };

        let start: u32 = start
            .parse()
            .map_err(|_| Error::style(format!("invalid range start: {start}")))?;
        let end: u32 = end
            .parse()
            .map_err(|_| Error::style(format!("invalid range end: {end}")))?;

        if start > end {
            return Err(Error::style(format!(
                "invalid range: start {start} > end {end}"
            )));
        }

        Ok((start, end))
    }

    /// The 256-codepoint range containing a character code
    pub fn for_char(char_code: u32) -> String {
        let start = (char_code / 256) * 256;
        format!("{}-{}", start, start + 255)
    }
}

/// Combine an ordered list of glyph-range PBFs into one stack.
///
/// Glyphs are deduplicated by id with earlier buffers winning, the output
/// is sorted ascending by id, and the stack name is the comma-joined list
/// of input stack names in input order.
pub fn combine(buffers: &[Vec<u8>]) -> Result<Vec<u8>> {
    let mut names: Vec<String> = Vec::new();
    let mut merged: BTreeMap<u32, crate::vector::glyphs::Glyph> = BTreeMap::new();
    let mut range = String::new();

    for buffer in buffers {
        let raw = unframe(buffer)?;
        let decoded = Glyphs::decode(raw.as_slice())?;
        let Some(stack) = decoded.stacks.into_iter().next() else {
            continue;
        };

        if range.is_empty() {
            range = stack.range.clone();
        }
        names.push(stack.name);
        for glyph in stack.glyphs {
            merged.entry(glyph.id).or_insert(glyph);
        }
    }

    if names.is_empty() {
        return Err(Error::style("no glyph stacks to combine"));
    }

    let combined = Glyphs {
        stacks: vec![Fontstack {
            name: names.join(","),
            range,
            glyphs: merged.into_values().collect(),
        }],
    };
    Ok(combined.encode_to_vec())
}

/// Serves `fonts/<name>/<range>.pbf` files, combining fontstacks and
/// substituting a fallback font for missing ones
pub struct GlyphStore {
    fonts_dir: PathBuf,
    fallback: String,
}

impl GlyphStore {
    pub fn new<P: AsRef<Path>>(fonts_dir: P, fallback: String) -> Self {
        Self {
            fonts_dir: fonts_dir.as_ref().to_path_buf(),
            fallback,
        }
    }

    fn range_path(&self, font: &str, range: &str) -> PathBuf {
        self.fonts_dir.join(font).join(format!("{range}.pbf"))
    }

    /// Load and combine the requested fontstack for one range
    pub async fn combined(&self, fontstack: &str, range: &str) -> Result<Vec<u8>> {
        GlyphRange::parse(range)?;

        let mut buffers = Vec::new();
        for font in fontstack.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            match tokio::fs::read(self.range_path(font, range)).await {
                Ok(bytes) => buffers.push(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::warn!("font {font} missing, falling back to {}", self.fallback);
                    match tokio::fs::read(self.range_path(&self.fallback, range)).await {
                        Ok(bytes) => buffers.push(bytes),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        if buffers.is_empty() {
            return Err(Error::IdNotFound(format!("fontstack {fontstack}")));
        }
        combine(&buffers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::glyphs::Glyph;

    fn stack(name: &str, ids: &[u32]) -> Vec<u8> {
        Glyphs {
            stacks: vec![Fontstack {
                name: name.to_string(),
                range: "0-255".to_string(),
                glyphs: ids
                    .iter()
                    .map(|&id| Glyph {
                        id,
                        bitmap: Some(vec![id as u8]),
                        width: 8,
                        height: 8,
                        left: 0,
                        top: 0,
                        advance: 8,
                    })
                    .collect(),
            }],
        }
        .encode_to_vec()
    }

    #[test]
    fn test_range_parse() {
        assert_eq!(GlyphRange::parse("0-255").unwrap(), (0, 255));
        assert_eq!(GlyphRange::parse("256-511").unwrap(), (256, 511));
        assert!(GlyphRange::parse("invalid").is_err());
        assert!(GlyphRange::parse("100-50").is_err());
    }

    #[test]
    fn test_range_for_char() {
        assert_eq!(GlyphRange::for_char(0), "0-255");
        assert_eq!(GlyphRange::for_char(300), "256-511");
    }

    #[test]
    fn test_combine_earlier_wins() {
        let a = stack("Alpha Sans", &[10, 20]);
        let b = stack("Beta Serif", &[20, 30, 5]);

        let combined = combine(&[a, b]).unwrap();
        let decoded = Glyphs::decode(combined.as_slice()).unwrap();
        let stack = &decoded.stacks[0];

        assert_eq!(stack.name, "Alpha Sans,Beta Serif");
        assert_eq!(stack.range, "0-255");

        let ids: Vec<u32> = stack.glyphs.iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![5, 10, 20, 30]);

        // Glyph 20 came from the first stack
        let glyph_20 = stack.glyphs.iter().find(|g| g.id == 20).unwrap();
        assert_eq!(glyph_20.bitmap, Some(vec![20]));
    }

    #[test]
    fn test_combine_empty_fails() {
        assert!(combine(&[]).is_err());
    }

    #[tokio::test]
    async fn test_store_fallback_font() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("Fallback Sans")).unwrap();
        std::fs::write(
            temp.path().join("Fallback Sans/0-255.pbf"),
            stack("Fallback Sans", &[1]),
        )
        .unwrap();

        let store = GlyphStore::new(temp.path(), "Fallback Sans".to_string());
        let combined = store.combined("Missing Font", "0-255").await.unwrap();
        let decoded = Glyphs::decode(combined.as_slice()).unwrap();
        assert_eq!(decoded.stacks[0].name, "Fallback Sans");
    }

    #[tokio::test]
    async fn test_store_missing_everything() {
        let temp = tempfile::tempdir().unwrap();
        let store = GlyphStore::new(temp.path(), "Fallback Sans".to_string());
        assert!(store.combined("Missing Font", "0-255").await.is_err());
    }

    #[tokio::test]
    async fn test_store_combines_stack() {
        let temp = tempfile::tempdir().unwrap();
        for (font, ids) in [("First", vec![1u32, 2]), ("Second", vec![2, 3])] {
            std::fs::create_dir_all(temp.path().join(font)).unwrap();
            std::fs::write(temp.path().join(font).join("0-255.pbf"), stack(font, &ids)).unwrap();
        }

        let store = GlyphStore::new(temp.path(), "First".to_string());
        let combined = store.combined("First, Second", "0-255").await.unwrap();
        let decoded = Glyphs::decode(combined.as_slice()).unwrap();
        assert_eq!(decoded.stacks[0].name, "First,Second");
        assert_eq!(decoded.stacks[0].glyphs.len(), 3);
    }
}
