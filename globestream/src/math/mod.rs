//! Angle, vector, matrix and quaternion math for the globe and camera.
//!
//! All types are small `Copy` values; operations return new values rather
//! than mutating in place.

mod angle;
mod geo;
mod matrix;
mod quaternion;
mod vector;

pub use angle::{Angle, DEGREES_TO_RADIANS, RADIANS_TO_DEGREES};
pub use geo::{LatLon, Position};
pub use matrix::Matrix;
pub use quaternion::Quaternion;
pub use vector::{Vector4, DEFAULT_W};
