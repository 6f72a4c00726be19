//! Four-component vector.
//!
//! Most operations work on the `x`, `y`, `z` components and carry `w`
//! through unchanged; the `*4` variants include `w`.

use std::fmt;

/// Default homogeneous coordinate for points.
pub const DEFAULT_W: f64 = 1.0;

/// Immutable 3/4-component vector.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector4 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Vector4 {
    pub const UNIT_X: Vector4 = Vector4::with_w(1.0, 0.0, 0.0, 0.0);
    pub const UNIT_Y: Vector4 = Vector4::with_w(0.0, 1.0, 0.0, 0.0);
    pub const UNIT_Z: Vector4 = Vector4::with_w(0.0, 0.0, 1.0, 0.0);
    pub const UNIT_W: Vector4 = Vector4::with_w(0.0, 0.0, 0.0, 1.0);
    pub const UNIT_X_NEGATIVE: Vector4 = Vector4::with_w(-1.0, 0.0, 0.0, 0.0);
    pub const UNIT_Y_NEGATIVE: Vector4 = Vector4::with_w(0.0, -1.0, 0.0, 0.0);
    pub const UNIT_Z_NEGATIVE: Vector4 = Vector4::with_w(0.0, 0.0, -1.0, 0.0);
    pub const UNIT_W_NEGATIVE: Vector4 = Vector4::with_w(0.0, 0.0, 0.0, -1.0);

    /// Creates a point with `w` set to [`DEFAULT_W`].
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self::with_w(x, y, z, DEFAULT_W)
    }

    /// Creates a vector with an explicit `w`.
    pub const fn with_w(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.x, self.y, self.z, self.w]
    }

    pub fn add(&self, other: &Vector4) -> Vector4 {
        Vector4::with_w(self.x + other.x, self.y + other.y, self.z + other.z, self.w)
    }

    pub fn add4(&self, other: &Vector4) -> Vector4 {
        Vector4::with_w(
            self.x + other.x,
            self.y + other.y,
            self.z + other.z,
            self.w + other.w,
        )
    }

    pub fn subtract(&self, other: &Vector4) -> Vector4 {
        Vector4::with_w(self.x - other.x, self.y - other.y, self.z - other.z, self.w)
    }

    pub fn subtract4(&self, other: &Vector4) -> Vector4 {
        Vector4::with_w(
            self.x - other.x,
            self.y - other.y,
            self.z - other.z,
            self.w - other.w,
        )
    }

    pub fn scale(&self, value: f64) -> Vector4 {
        Vector4::with_w(self.x * value, self.y * value, self.z * value, self.w)
    }

    pub fn divide(&self, value: f64) -> Vector4 {
        Vector4::with_w(self.x / value, self.y / value, self.z / value, self.w)
    }

    /// Dot product of the `xyz` components.
    pub fn dot(&self, other: &Vector4) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn dot4(&self, other: &Vector4) -> f64 {
        self.dot(other) + self.w * other.w
    }

    /// Cross product of the `xyz` components, keeping this vector's `w`.
    pub fn cross(&self, other: &Vector4) -> Vector4 {
        Vector4::with_w(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
            self.w,
        )
    }

    pub fn length_squared(&self) -> f64 {
        self.dot(self)
    }

    pub fn length(&self) -> f64 {
        self.length_squared().sqrt()
    }

    /// Returns the unit-length vector, or `None` for a zero-length vector.
    pub fn normalize(&self) -> Option<Vector4> {
        let length = self.length();
        if length == 0.0 || !length.is_finite() {
            return None;
        }
        Some(self.divide(length))
    }

    pub fn distance_squared(&self, other: &Vector4) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    pub fn distance(&self, other: &Vector4) -> f64 {
        self.distance_squared(other).sqrt()
    }
}

impl fmt::Display for Vector4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vector4[{}, {}, {}, {}]", self.x, self.y, self.z, self.w)
    }
}
