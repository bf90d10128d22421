//! Latitude/longitude to local east/north conversion.
//!
//! Equirectangular projection about a datum. Accurate to centimetres over
//! the few hundred metres a lawn spans.
//!
//! ```text
//! x = R · Δλ · cos(φ₀)
//! y = R · Δφ
//! ```

use crate::core::types::Point2D;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Local tangent frame anchored at a geodetic datum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalFrame {
    datum_lat: f64,
    datum_lon: f64,
    cos_lat: f64,
    /// Local position that the datum maps to
    anchor: Point2D,
}

impl LocalFrame {
    pub fn new(latitude: f64, longitude: f64, anchor: Point2D) -> Self {
        Self {
            datum_lat: latitude,
            datum_lon: longitude,
            cos_lat: latitude.to_radians().cos(),
            anchor,
        }
    }

    pub fn datum(&self) -> (f64, f64) {
        (self.datum_lat, self.datum_lon)
    }

    pub fn to_local(&self, latitude: f64, longitude: f64) -> Point2D {
        let d_lat = (latitude - self.datum_lat).to_radians();
        let d_lon = (longitude - self.datum_lon).to_radians();
        let east = EARTH_RADIUS_M * d_lon * self.cos_lat;
        let north = EARTH_RADIUS_M * d_lat;
        Point2D::new(self.anchor.x + east as f32, self.anchor.y + north as f32)
    }

    pub fn to_geodetic(&self, point: &Point2D) -> (f64, f64) {
        let east = (point.x - self.anchor.x) as f64;
        let north = (point.y - self.anchor.y) as f64;
        let lat = self.datum_lat + (north / EARTH_RADIUS_M).to_degrees();
        let lon = if self.cos_lat.abs() < 1e-12 {
            self.datum_lon
        } else {
            self.datum_lon + (east / (EARTH_RADIUS_M * self.cos_lat)).to_degrees()
        };
        (lat, lon)
    }
}

/// Latitude in [-90, 90] and longitude in [-180, 180], both finite.
pub fn is_valid_coordinate(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}
