//! Tile coordinates in the XYZ and TMS schemes

use crate::error::{Error, Result};
use crate::tile::MAX_LATITUDE;
use crate::TILE_SIZE;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tile addressing scheme.
///
/// XYZ has its origin at the top-left of the pyramid; TMS at the
/// bottom-left. Conversion is the involution `y' = 2^z - 1 - y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Xyz,
    Tms,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Xyz => "xyz",
            Scheme::Tms => "tms",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "xyz" => Ok(Scheme::Xyz),
            "tms" => Ok(Scheme::Tms),
            other => Err(Error::InvalidCoordinate(format!(
                "unknown scheme: {other}"
            ))),
        }
    }
}

/// Pixel anchor within a 256-pixel tile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelPosition {
    TopLeft,
    Center,
    BottomRight,
}

impl PixelPosition {
    fn offset(&self) -> f64 {
        match self {
            PixelPosition::TopLeft => 0.0,
            PixelPosition::Center => f64::from(TILE_SIZE) / 2.0,
            PixelPosition::BottomRight => f64::from(TILE_SIZE),
        }
    }
}

/// Tile coordinate, always XYZ-oriented unless stated otherwise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoordinate {
    /// Zoom level (0-22)
    pub z: u8,
    /// Column
    pub x: u32,
    /// Row (top to bottom in XYZ)
    pub y: u32,
}

impl TileCoordinate {
    /// Create a new tile coordinate
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Create a tile coordinate from lon/lat in the given scheme.
    ///
    /// Longitude is clamped to [-180, 180] and latitude to the Web
    /// Mercator limit before projection; the result is clamped to the
    /// valid range for the zoom.
    pub fn from_lon_lat(lon: f64, lat: f64, z: u8, scheme: Scheme) -> Result<Self> {
        if z > crate::MAX_ZOOM_LEVEL {
            return Err(Error::InvalidCoordinate(format!(
                "zoom {z} exceeds maximum {}",
                crate::MAX_ZOOM_LEVEL
            )));
        }

        let lon = lon.clamp(-180.0, 180.0);
        let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);

        let n = 1u32 << z;
        let x = ((lon + 180.0) / 360.0 * f64::from(n)).floor();
        let lat_rad = lat.to_radians();
        let y = ((1.0 - lat_rad.tan().asinh() / std::f64::consts::PI) / 2.0 * f64::from(n)).floor();

        let max = f64::from(n - 1);
        let coord = Self::new(z, x.clamp(0.0, max) as u32, y.clamp(0.0, max) as u32);
        Ok(match scheme {
            Scheme::Xyz => coord,
            Scheme::Tms => coord.flip_y(),
        })
    }

    /// Lon/lat of a pixel anchor of this tile, interpreting the tile in
    /// the given scheme.
    pub fn to_lon_lat(&self, position: PixelPosition, scheme: Scheme) -> (f64, f64) {
        let xyz = match scheme {
            Scheme::Xyz => *self,
            Scheme::Tms => self.flip_y(),
        };

        let world = f64::from(TILE_SIZE) * f64::from(1u32 << self.z);
        let px = f64::from(xyz.x) * f64::from(TILE_SIZE) + position.offset();
        let py = f64::from(xyz.y) * f64::from(TILE_SIZE) + position.offset();

        let lon = px / world * 360.0 - 180.0;
        let lat = (std::f64::consts::PI * (1.0 - 2.0 * py / world))
            .sinh()
            .atan()
            .to_degrees();
        (lon, lat)
    }

    /// Flip the Y axis (XYZ <-> TMS). Involution.
    pub fn flip_y(&self) -> Self {
        let max_y = (1u32 << self.z) - 1;
        Self::new(self.z, self.x, max_y - self.y)
    }

    /// Validate the tile coordinate against its zoom level
    pub fn validate(&self) -> Result<()> {
        if self.z > crate::MAX_ZOOM_LEVEL {
            return Err(Error::InvalidCoordinate(format!(
                "zoom {} exceeds maximum {}",
                self.z,
                crate::MAX_ZOOM_LEVEL
            )));
        }

        let max_coord = 1u32 << self.z;
        if self.x >= max_coord || self.y >= max_coord {
            return Err(Error::InvalidCoordinate(format!(
                "({}, {}) out of range for zoom {} (max {})",
                self.x,
                self.y,
                self.z,
                max_coord - 1
            )));
        }

        Ok(())
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}
