//! Angle value type.
//!
//! An [`Angle`] always carries both its degree and radian representation.
//! The fields are private so the two can only be built together through
//! [`Angle::from_degrees`] and [`Angle::from_radians`].

use std::f64::consts::PI;
use std::fmt;
use std::ops::{Add, Neg, Sub};

/// Multiply degrees by this to get radians.
pub const DEGREES_TO_RADIANS: f64 = PI / 180.0;

/// Multiply radians by this to get degrees.
pub const RADIANS_TO_DEGREES: f64 = 180.0 / PI;

/// A single rotation, stored in degrees and radians.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Angle {
    degrees: f64,
    radians: f64,
}

impl Angle {
    /// The zero angle.
    pub const ZERO: Angle = Angle {
        degrees: 0.0,
        radians: 0.0,
    };

    /// Creates an angle from degrees.
    pub fn from_degrees(degrees: f64) -> Self {
        Self {
            degrees,
            radians: degrees * DEGREES_TO_RADIANS,
        }
    }

    /// Creates an angle from radians.
    pub fn from_radians(radians: f64) -> Self {
        Self {
            degrees: radians * RADIANS_TO_DEGREES,
            radians,
        }
    }

    /// Creates an angle from fixed-point microdegrees.
    pub fn from_microdegrees(microdegrees: i64) -> Self {
        Self::from_degrees(microdegrees as f64 / 1_000_000.0)
    }

    /// Returns the angle in degrees.
    pub fn degrees(&self) -> f64 {
        self.degrees
    }

    /// Returns the angle in radians.
    pub fn radians(&self) -> f64 {
        self.radians
    }

    /// Returns the angle in fixed-point microdegrees, rounded to the nearest unit.
    pub fn microdegrees(&self) -> i64 {
        (self.degrees * 1_000_000.0).round() as i64
    }

    pub fn sin(&self) -> f64 {
        self.radians.sin()
    }

    pub fn cos(&self) -> f64 {
        self.radians.cos()
    }

    pub fn tan(&self) -> f64 {
        self.radians.tan()
    }

    /// Sine of half this angle, used by quaternion construction.
    pub fn sin_half(&self) -> f64 {
        (0.5 * self.radians).sin()
    }

    /// Cosine of half this angle, used by quaternion construction.
    pub fn cos_half(&self) -> f64 {
        (0.5 * self.radians).cos()
    }
}

impl Add for Angle {
    type Output = Angle;

    fn add(self, other: Angle) -> Angle {
        Angle::from_degrees(self.degrees + other.degrees)
    }
}

impl Sub for Angle {
    type Output = Angle;

    fn sub(self, other: Angle) -> Angle {
        Angle::from_degrees(self.degrees - other.degrees)
    }
}

impl Neg for Angle {
    type Output = Angle;

    fn neg(self) -> Angle {
        Angle {
            degrees: -self.degrees,
            radians: -self.radians,
        }
    }
}

impl fmt::Display for Angle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees)
    }
}
