//! Unit quaternion rotations.

use std::fmt;
use std::ops::Mul;

use super::angle::Angle;
use super::matrix::Matrix;

/// Rotation quaternion `(x, y, z, w)` with `w` the scalar part.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.x, self.y, self.z, self.w]
    }

    pub fn length_squared(&self) -> f64 {
        self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w
    }

    pub fn length(&self) -> f64 {
        self.length_squared().sqrt()
    }

    /// Returns the unit quaternion, or `None` when the length is zero.
    pub fn normalize(&self) -> Option<Quaternion> {
        let length = self.length();
        if length == 0.0 || !length.is_finite() {
            return None;
        }
        Some(Quaternion::new(
            self.x / length,
            self.y / length,
            self.z / length,
            self.w / length,
        ))
    }

    pub fn conjugate(&self) -> Quaternion {
        Quaternion::new(-self.x, -self.y, -self.z, self.w)
    }

    /// Hamilton product `self × other`.
    pub fn multiply(&self, other: &Quaternion) -> Quaternion {
        Quaternion::new(
            self.w * other.x + self.x * other.w + self.y * other.z - self.z * other.y,
            self.w * other.y + self.y * other.w + self.z * other.x - self.x * other.z,
            self.w * other.z + self.z * other.w + self.x * other.y - self.y * other.x,
            self.w * other.w - self.x * other.x - self.y * other.y - self.z * other.z,
        )
    }

    /// Combined rotation of roll about X, pitch about Y and yaw about Z,
    /// applied in that order (`Rz · Ry · Rx`).
    pub fn from_roll_pitch_yaw(roll: Angle, pitch: Angle, yaw: Angle) -> Quaternion {
        let (cr, sr) = (roll.cos_half(), roll.sin_half());
        let (cp, sp) = (pitch.cos_half(), pitch.sin_half());
        let (cy, sy) = (yaw.cos_half(), yaw.sin_half());

        Quaternion::new(
            sr * cp * cy - cr * sp * sy,
            cr * sp * cy + sr * cp * sy,
            cr * cp * sy - sr * sp * cy,
            cr * cp * cy + sr * sp * sy,
        )
    }

    /// Extracts the rotation of a matrix's upper 3×3 block (Shepperd's method).
    pub fn from_matrix(matrix: &Matrix) -> Quaternion {
        let m = |r: usize, c: usize| matrix.get(r, c);
        let trace = m(0, 0) + m(1, 1) + m(2, 2);

        let q = if trace > 0.0 {
            let s = 2.0 * (trace + 1.0).sqrt();
            Quaternion::new(
                (m(2, 1) - m(1, 2)) / s,
                (m(0, 2) - m(2, 0)) / s,
                (m(1, 0) - m(0, 1)) / s,
                0.25 * s,
            )
        } else if m(0, 0) > m(1, 1) && m(0, 0) > m(2, 2) {
            let s = 2.0 * (1.0 + m(0, 0) - m(1, 1) - m(2, 2)).sqrt();
            Quaternion::new(
                0.25 * s,
                (m(0, 1) + m(1, 0)) / s,
                (m(0, 2) + m(2, 0)) / s,
                (m(2, 1) - m(1, 2)) / s,
            )
        } else if m(1, 1) > m(2, 2) {
            let s = 2.0 * (1.0 + m(1, 1) - m(0, 0) - m(2, 2)).sqrt();
            Quaternion::new(
                (m(0, 1) + m(1, 0)) / s,
                0.25 * s,
                (m(1, 2) + m(2, 1)) / s,
                (m(0, 2) - m(2, 0)) / s,
            )
        } else {
            let s = 2.0 * (1.0 + m(2, 2) - m(0, 0) - m(1, 1)).sqrt();
            Quaternion::new(
                (m(0, 2) + m(2, 0)) / s,
                (m(1, 2) + m(2, 1)) / s,
                0.25 * s,
                (m(1, 0) - m(0, 1)) / s,
            )
        };
        q.normalize().unwrap_or(Quaternion::IDENTITY)
    }

    /// Rotation about X.
    pub fn roll(&self) -> Angle {
        Angle::from_radians(
            (2.0 * (self.w * self.x + self.y * self.z))
                .atan2(1.0 - 2.0 * (self.x * self.x + self.y * self.y)),
        )
    }

    /// Rotation about Y. Degenerate (gimbal lock) near ±90°.
    pub fn pitch(&self) -> Angle {
        let sin = (2.0 * (self.w * self.y - self.z * self.x)).clamp(-1.0, 1.0);
        Angle::from_radians(sin.asin())
    }

    /// Rotation about Z.
    pub fn yaw(&self) -> Angle {
        Angle::from_radians(
            (2.0 * (self.w * self.z + self.x * self.y))
                .atan2(1.0 - 2.0 * (self.y * self.y + self.z * self.z)),
        )
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Quaternion::IDENTITY
    }
}

impl Mul for Quaternion {
    type Output = Quaternion;

    fn mul(self, other: Quaternion) -> Quaternion {
        self.multiply(&other)
    }
}

impl fmt::Display for Quaternion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Quaternion[{}, {}, {}, {}]",
            self.x, self.y, self.z, self.w
        )
    }
}
