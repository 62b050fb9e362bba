//! Geographic bounds and bbox -> tile-range enumeration

use crate::error::{Error, Result};
use crate::tile::coordinate::{PixelPosition, Scheme, TileCoordinate};
use crate::tile::MAX_LATITUDE;
use serde::{Deserialize, Serialize};

/// Geographic bounds in WGS84 degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LonLatBounds {
    /// Western longitude
    pub west: f64,
    /// Southern latitude
    pub south: f64,
    /// Eastern longitude
    pub east: f64,
    /// Northern latitude
    pub north: f64,
}

impl LonLatBounds {
    /// Create new bounds
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Validate bounds ranges and ordering
    pub fn validate(&self) -> Result<()> {
        if self.west < -180.0 || self.east > 180.0 {
            return Err(Error::InvalidBounds(format!(
                "longitude out of range: [{}, {}]",
                self.west, self.east
            )));
        }
        if self.south < -90.0 || self.north > 90.0 {
            return Err(Error::InvalidBounds(format!(
                "latitude out of range: [{}, {}]",
                self.south, self.north
            )));
        }
        if self.west >= self.east {
            return Err(Error::InvalidBounds(format!(
                "west ({}) must be < east ({})",
                self.west, self.east
            )));
        }
        if self.south >= self.north {
            return Err(Error::InvalidBounds(format!(
                "south ({}) must be < north ({})",
                self.south, self.north
            )));
        }
        Ok(())
    }

    /// Center point
    pub fn center(&self) -> (f64, f64) {
        (
            (self.west + self.east) / 2.0,
            (self.south + self.north) / 2.0,
        )
    }

    /// Smallest bounds containing both inputs
    pub fn union(&self, other: &LonLatBounds) -> LonLatBounds {
        LonLatBounds::new(
            self.west.min(other.west),
            self.south.min(other.south),
            self.east.max(other.east),
            self.north.max(other.north),
        )
    }

    /// Convert to `[west, south, east, north]`
    pub fn to_array(&self) -> [f64; 4] {
        [self.west, self.south, self.east, self.north]
    }

    /// Create from `[west, south, east, north]`
    pub fn from_array(arr: [f64; 4]) -> Self {
        Self::new(arr[0], arr[1], arr[2], arr[3])
    }

    /// Bounds enclosing a rectangle of tiles at zoom `z`: from the
    /// top-left corner of `(x_min, y_min)` to the bottom-right corner of
    /// `(x_max, y_max)`, with the range expressed in `scheme`.
    pub fn from_tile_range(
        x_min: u32,
        y_min: u32,
        x_max: u32,
        y_max: u32,
        z: u8,
        scheme: Scheme,
    ) -> Self {
        let (top, bottom) = match scheme {
            Scheme::Xyz => (
                TileCoordinate::new(z, x_min, y_min),
                TileCoordinate::new(z, x_max, y_max),
            ),
            // In TMS the numerically-smaller row is the southernmost one.
            Scheme::Tms => (
                TileCoordinate::new(z, x_min, y_max).flip_y(),
                TileCoordinate::new(z, x_max, y_min).flip_y(),
            ),
        };

        let (west, north) = top.to_lon_lat(PixelPosition::TopLeft, Scheme::Xyz);
        let (east, south) = bottom.to_lon_lat(PixelPosition::BottomRight, Scheme::Xyz);
        Self::new(west, south, east, north)
    }
}

impl Default for LonLatBounds {
    fn default() -> Self {
        // World bounds in Web Mercator
        Self::new(-180.0, -MAX_LATITUDE, 180.0, MAX_LATITUDE)
    }
}

/// Inclusive rectangle of tiles at one zoom level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub z: u8,
    pub x_min: u32,
    pub x_max: u32,
    pub y_min: u32,
    pub y_max: u32,
}

impl TileRange {
    /// Number of tiles in the range
    pub fn count(&self) -> u64 {
        u64::from(self.x_max - self.x_min + 1) * u64::from(self.y_max - self.y_min + 1)
    }

    /// Iterate over all coordinates in the range, x-major
    pub fn iter(&self) -> impl Iterator<Item = TileCoordinate> + '_ {
        let z = self.z;
        let (y_min, y_max) = (self.y_min, self.y_max);
        (self.x_min..=self.x_max)
            .flat_map(move |x| (y_min..=y_max).map(move |y| TileCoordinate::new(z, x, y)))
    }
}

/// Enumerate the tile ranges covering `bounds` at each requested zoom,
/// z-major in the order given. Ranges are expressed in `scheme`.
pub fn tile_ranges(bounds: &LonLatBounds, zooms: &[u8], scheme: Scheme) -> Result<Vec<TileRange>> {
    bounds.validate()?;

    let mut ranges = Vec::with_capacity(zooms.len());
    for &z in zooms {
        let top_left = TileCoordinate::from_lon_lat(bounds.west, bounds.north, z, Scheme::Xyz)?;
        let bottom_right = TileCoordinate::from_lon_lat(bounds.east, bounds.south, z, Scheme::Xyz)?;

        let (y_min, y_max) = match scheme {
            Scheme::Xyz => (top_left.y, bottom_right.y),
            Scheme::Tms => (bottom_right.flip_y().y, top_left.flip_y().y),
        };

        ranges.push(TileRange {
            z,
            x_min: top_left.x,
            x_max: bottom_right.x,
            y_min,
            y_max,
        });
    }
    Ok(ranges)
}

/// Total tile count over a set of ranges
pub fn total_tiles(ranges: &[TileRange]) -> u64 {
    ranges.iter().map(TileRange::count).sum()
}
