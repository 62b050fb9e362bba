//! Sprite set validation
//!
//! A sprite set is a directory holding `sprite.json`/`sprite.png` pairs,
//! optionally with `sprite@{N}x` variants. A set is valid when the JSON and
//! PNG base names match, every JSON entry carries the sprite frame fields
//! and every PNG is a real PNG.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// One sprite frame within the sheet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpriteEntry {
    pub height: u32,
    #[serde(rename = "pixelRatio")]
    pub pixel_ratio: u32,
    pub width: u32,
    pub x: u32,
    pub y: u32,
}

/// Split a sprite file name into its base name and extension.
/// Accepts `sprite.json`, `sprite.png` and `sprite@{N}x` variants.
pub fn parse_sprite_file_name(name: &str) -> Option<(&str, &str)> {
    let (base, ext) = name.rsplit_once('.')?;
    if !matches!(ext, "json" | "png") {
        return None;
    }

    let suffix = base.strip_prefix("sprite")?;
    if suffix.is_empty() {
        return Some((base, ext));
    }
    let scale = suffix.strip_prefix('@')?.strip_suffix('x')?;
    if !scale.is_empty() && scale.chars().all(|c| c.is_ascii_digit()) {
        Some((base, ext))
    } else {
        None
    }
}

/// Validate a sprite set directory
pub async fn validate_sprite_dir(dir: &Path) -> Result<()> {
    let mut json_bases = BTreeSet::new();
    let mut png_bases = BTreeSet::new();

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Error::style(format!("unreadable sprite dir {}: {e}", dir.display())))?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some((base, ext)) = parse_sprite_file_name(name) else {
            continue;
        };

        match ext {
            "json" => {
                let bytes = tokio::fs::read(entry.path()).await?;
                serde_json::from_slice::<HashMap<String, SpriteEntry>>(&bytes).map_err(|e| {
                    Error::style(format!("invalid sprite index {name}: {e}"))
                })?;
                json_bases.insert(base.to_string());
            }
            "png" => {
                let bytes = tokio::fs::read(entry.path()).await?;
                if !bytes.starts_with(&PNG_MAGIC) {
                    return Err(Error::style(format!("{name} is not a PNG")));
                }
                png_bases.insert(base.to_string());
            }
            _ => {}
        }
    }

    if json_bases.is_empty() {
        return Err(Error::style(format!(
            "no sprite files in {}",
            dir.display()
        )));
    }
    if json_bases != png_bases {
        return Err(Error::style(format!(
            "sprite JSON/PNG mismatch in {}: {json_bases:?} vs {png_bases:?}",
            dir.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00];

    fn sprite_json() -> &'static str {
        r#"{"airport": {"height": 16, "pixelRatio": 1, "width": 16, "x": 0, "y": 0}}"#
    }

    #[test]
    fn test_file_name_parsing() {
        assert_eq!(parse_sprite_file_name("sprite.json"), Some(("sprite", "json")));
        assert_eq!(
            parse_sprite_file_name("sprite@2x.png"),
            Some(("sprite@2x", "png"))
        );
        assert_eq!(parse_sprite_file_name("sprite@x.png"), None);
        assert_eq!(parse_sprite_file_name("icons.png"), None);
        assert_eq!(parse_sprite_file_name("sprite.svg"), None);
    }

    #[tokio::test]
    async fn test_valid_sprite_set() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("sprite.json"), sprite_json()).unwrap();
        std::fs::write(temp.path().join("sprite.png"), PNG).unwrap();
        std::fs::write(temp.path().join("sprite@2x.json"), sprite_json()).unwrap();
        std::fs::write(temp.path().join("sprite@2x.png"), PNG).unwrap();

        assert!(validate_sprite_dir(temp.path()).await.is_ok());
    }

    #[tokio::test]
    async fn test_mismatched_set() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("sprite.json"), sprite_json()).unwrap();
        std::fs::write(temp.path().join("sprite.png"), PNG).unwrap();
        std::fs::write(temp.path().join("sprite@2x.json"), sprite_json()).unwrap();

        assert!(validate_sprite_dir(temp.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_bad_entries_rejected() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("sprite.json"), r#"{"a": {"height": 16}}"#).unwrap();
        std::fs::write(temp.path().join("sprite.png"), PNG).unwrap();
        assert!(validate_sprite_dir(temp.path()).await.is_err());

        std::fs::write(temp.path().join("sprite.json"), sprite_json()).unwrap();
        std::fs::write(temp.path().join("sprite.png"), b"not a png").unwrap();
        assert!(validate_sprite_dir(temp.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_dir_invalid() {
        let temp = tempdir().unwrap();
        assert!(validate_sprite_dir(temp.path()).await.is_err());
    }
}
