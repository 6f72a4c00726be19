//! Tile grid: keys, levels, pyramids and per-tile sphere meshes.
//!
//! Angles in this module are fixed-point microdegrees (`i64`, one degree is
//! 1 000 000 units) so tile edges line up exactly.

mod grid;
mod key;
mod mesh;

pub use grid::{GridError, Level, Pyramid, Tile, MAX_WINDOW_TILES};
pub use key::{TileKey, TileRegistry};
pub use mesh::{grid_indices, TileMesh};

/// Microdegrees per degree.
pub const MICRODEGREES_PER_DEGREE: i64 = 1_000_000;

/// 360° in microdegrees.
pub const FULL_LONGITUDE: i64 = 360 * MICRODEGREES_PER_DEGREE;

/// 180° in microdegrees.
pub const FULL_LATITUDE: i64 = 180 * MICRODEGREES_PER_DEGREE;

/// Converts degrees to microdegrees, rounding to the nearest unit.
pub fn degrees_to_microdegrees(degrees: f64) -> i64 {
    (degrees * MICRODEGREES_PER_DEGREE as f64).round() as i64
}

/// Converts microdegrees to radians.
pub fn microdegrees_to_radians(microdegrees: f64) -> f64 {
    (microdegrees / MICRODEGREES_PER_DEGREE as f64).to_radians()
}
