//! Tile coordinate systems and bounds management

pub mod bounds;
pub mod coordinate;

pub use bounds::{LonLatBounds, TileRange};
pub use coordinate::{PixelPosition, Scheme, TileCoordinate};

/// Web Mercator projection constants
pub const EARTH_RADIUS: f64 = 6378137.0;
pub const EARTH_CIRCUMFERENCE: f64 = 2.0 * std::f64::consts::PI * EARTH_RADIUS;
pub const MAX_LATITUDE: f64 = 85.051129;

/// Convert longitude to Web Mercator X coordinate
pub fn lon_to_mercator_x(lon: f64) -> f64 {
    EARTH_RADIUS * lon.to_radians()
}

/// Convert latitude to Web Mercator Y coordinate
pub fn lat_to_mercator_y(lat: f64) -> f64 {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let y = (std::f64::consts::PI / 4.0 + lat.to_radians() / 2.0).tan().ln();
    EARTH_RADIUS * y
}

/// Convert Web Mercator X to longitude
pub fn mercator_x_to_lon(x: f64) -> f64 {
    (x / EARTH_RADIUS).to_degrees()
}

/// Convert Web Mercator Y to latitude
pub fn mercator_y_to_lat(y: f64) -> f64 {
    let lat = 2.0 * ((y / EARTH_RADIUS).exp().atan()) - std::f64::consts::PI / 2.0;
    lat.to_degrees()
}
