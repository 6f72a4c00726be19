//! Geographic positions on a spherical planet.
//!
//! Cartesian conversion uses the same axes as the tile meshes: +Y through the
//! north pole, +Z through (0°, 0°) and +X through (0°, 90°E).

use std::fmt;

use super::angle::Angle;
use super::vector::Vector4;

/// Latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LatLon {
    pub lat: Angle,
    pub lon: Angle,
}

impl LatLon {
    pub fn new(lat: Angle, lon: Angle) -> Self {
        Self { lat, lon }
    }

    pub fn from_degrees(lat: f64, lon: f64) -> Self {
        Self::new(Angle::from_degrees(lat), Angle::from_degrees(lon))
    }

    /// Returns `(lat, lon)` in fixed-point microdegrees.
    pub fn to_microdegrees(&self) -> (i64, i64) {
        (self.lat.microdegrees(), self.lon.microdegrees())
    }

    /// Point on a sphere of the given radius.
    pub fn to_cartesian(&self, radius: f64) -> Vector4 {
        let cos_lat = self.lat.cos();
        Vector4::new(
            cos_lat * self.lon.sin() * radius,
            self.lat.sin() * radius,
            cos_lat * self.lon.cos() * radius,
        )
    }

    /// Direction of `point` from the sphere's centre. `None` for the origin.
    pub fn from_cartesian(point: &Vector4) -> Option<LatLon> {
        let unit = point.normalize()?;
        Some(LatLon::new(
            Angle::from_radians(unit.y.clamp(-1.0, 1.0).asin()),
            Angle::from_radians(unit.x.atan2(unit.z)),
        ))
    }
}

impl fmt::Display for LatLon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat.degrees(), self.lon.degrees())
    }
}

/// Geographic point with an elevation above the sphere surface.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub lat_lon: LatLon,
    pub elevation: f64,
}

impl Position {
    pub fn new(lat: Angle, lon: Angle, elevation: f64) -> Self {
        Self {
            lat_lon: LatLon::new(lat, lon),
            elevation,
        }
    }

    pub fn lat(&self) -> Angle {
        self.lat_lon.lat
    }

    pub fn lon(&self) -> Angle {
        self.lat_lon.lon
    }

    pub fn to_cartesian(&self, radius: f64) -> Vector4 {
        self.lat_lon.to_cartesian(radius + self.elevation)
    }

    /// Inverse of [`Position::to_cartesian`] for a sphere of `radius`.
    pub fn from_cartesian(point: &Vector4, radius: f64) -> Option<Position> {
        let lat_lon = LatLon::from_cartesian(point)?;
        Some(Position {
            lat_lon,
            elevation: point.length() - radius,
        })
    }
}
