//! 4×4 transform matrix.
//!
//! Values are stored row-major because that is how they are written down:
//!
//! ```text
//! | m11 m12 m13 m14 |
//! | m21 m22 m23 m24 |
//! | m31 m32 m33 m34 |
//! | m41 m42 m43 m44 |
//! ```
//!
//! Graphics backends usually want column-major data; [`Matrix::to_array`]
//! and [`Matrix::to_f32_array`] produce either order.

use std::fmt;
use std::ops::Mul;

use super::angle::{Angle, DEGREES_TO_RADIANS};
use super::quaternion::Quaternion;
use super::vector::Vector4;

/// Immutable 4×4 matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    m: [f64; 16],
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix {
        m: [
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ],
    };

    /// Creates a matrix from 16 values in row-major order.
    pub const fn from_rows(m: [f64; 16]) -> Self {
        Self { m }
    }

    /// Creates a matrix from a flat array in either order.
    pub fn from_array(values: &[f64; 16], row_major: bool) -> Self {
        if row_major {
            Self { m: *values }
        } else {
            Self { m: transpose_array(values) }
        }
    }

    /// Returns the matrix as a flat array, row-major when `row_major` is true
    /// and column-major otherwise.
    pub fn to_array(&self, row_major: bool) -> [f64; 16] {
        if row_major {
            self.m
        } else {
            transpose_array(&self.m)
        }
    }

    /// Same as [`Matrix::to_array`] narrowed to `f32` for upload.
    pub fn to_f32_array(&self, row_major: bool) -> [f32; 16] {
        self.to_array(row_major).map(|v| v as f32)
    }

    /// Element at zero-based `row`, `col`.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.m[row * 4 + col]
    }

    /// Returns `self × other`.
    pub fn multiply(&self, other: &Matrix) -> Matrix {
        let mut out = [0.0; 16];
        for row in 0..4 {
            for col in 0..4 {
                out[row * 4 + col] = (0..4)
                    .map(|k| self.m[row * 4 + k] * other.m[k * 4 + col])
                    .sum();
            }
        }
        Matrix { m: out }
    }

    /// Transforms a column vector: `self × v`.
    pub fn transform(&self, v: &Vector4) -> Vector4 {
        let c = v.to_array();
        let row = |r: usize| (0..4).map(|k| self.m[r * 4 + k] * c[k]).sum::<f64>();
        Vector4::with_w(row(0), row(1), row(2), row(3))
    }

    pub fn transpose(&self) -> Matrix {
        Matrix {
            m: transpose_array(&self.m),
        }
    }

    pub fn determinant(&self) -> f64 {
        self.cofactors().1
    }

    /// General inverse via cofactor expansion. Returns `None` for a singular
    /// (or non-finite) matrix.
    pub fn inverse(&self) -> Option<Matrix> {
        let (adjugate, det) = self.cofactors();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let inv_det = 1.0 / det;
        Some(Matrix {
            m: adjugate.map(|v| v * inv_det),
        })
    }

    /// Returns the adjugate (transposed cofactor matrix) and the determinant.
    fn cofactors(&self) -> ([f64; 16], f64) {
        let m = &self.m;
        let mut inv = [0.0; 16];

        inv[0] = m[5] * m[10] * m[15] - m[5] * m[11] * m[14] - m[9] * m[6] * m[15]
            + m[9] * m[7] * m[14]
            + m[13] * m[6] * m[11]
            - m[13] * m[7] * m[10];
        inv[4] = -m[4] * m[10] * m[15] + m[4] * m[11] * m[14] + m[8] * m[6] * m[15]
            - m[8] * m[7] * m[14]
            - m[12] * m[6] * m[11]
            + m[12] * m[7] * m[10];
        inv[8] = m[4] * m[9] * m[15] - m[4] * m[11] * m[13] - m[8] * m[5] * m[15]
            + m[8] * m[7] * m[13]
            + m[12] * m[5] * m[11]
            - m[12] * m[7] * m[9];
        inv[12] = -m[4] * m[9] * m[14] + m[4] * m[10] * m[13] + m[8] * m[5] * m[14]
            - m[8] * m[6] * m[13]
            - m[12] * m[5] * m[10]
            + m[12] * m[6] * m[9];
        inv[1] = -m[1] * m[10] * m[15] + m[1] * m[11] * m[14] + m[9] * m[2] * m[15]
            - m[9] * m[3] * m[14]
            - m[13] * m[2] * m[11]
            + m[13] * m[3] * m[10];
        inv[5] = m[0] * m[10] * m[15] - m[0] * m[11] * m[14] - m[8] * m[2] * m[15]
            + m[8] * m[3] * m[14]
            + m[12] * m[2] * m[11]
            - m[12] * m[3] * m[10];
        inv[9] = -m[0] * m[9] * m[15] + m[0] * m[11] * m[13] + m[8] * m[1] * m[15]
            - m[8] * m[3] * m[13]
            - m[12] * m[1] * m[11]
            + m[12] * m[3] * m[9];
        inv[13] = m[0] * m[9] * m[14] - m[0] * m[10] * m[13] - m[8] * m[1] * m[14]
            + m[8] * m[2] * m[13]
            + m[12] * m[1] * m[10]
            - m[12] * m[2] * m[9];
        inv[2] = m[1] * m[6] * m[15] - m[1] * m[7] * m[14] - m[5] * m[2] * m[15]
            + m[5] * m[3] * m[14]
            + m[13] * m[2] * m[7]
            - m[13] * m[3] * m[6];
        inv[6] = -m[0] * m[6] * m[15] + m[0] * m[7] * m[14] + m[4] * m[2] * m[15]
            - m[4] * m[3] * m[14]
            - m[12] * m[2] * m[7]
            + m[12] * m[3] * m[6];
        inv[10] = m[0] * m[5] * m[15] - m[0] * m[7] * m[13] - m[4] * m[1] * m[15]
            + m[4] * m[3] * m[13]
            + m[12] * m[1] * m[7]
            - m[12] * m[3] * m[5];
        inv[14] = -m[0] * m[5] * m[14] + m[0] * m[6] * m[13] + m[4] * m[1] * m[14]
            - m[4] * m[2] * m[13]
            - m[12] * m[1] * m[6]
            + m[12] * m[2] * m[5];
        inv[3] = -m[1] * m[6] * m[11] + m[1] * m[7] * m[10] + m[5] * m[2] * m[11]
            - m[5] * m[3] * m[10]
            - m[9] * m[2] * m[7]
            + m[9] * m[3] * m[6];
        inv[7] = m[0] * m[6] * m[11] - m[0] * m[7] * m[10] - m[4] * m[2] * m[11]
            + m[4] * m[3] * m[10]
            + m[8] * m[2] * m[7]
            - m[8] * m[3] * m[6];
        inv[11] = -m[0] * m[5] * m[11] + m[0] * m[7] * m[9] + m[4] * m[1] * m[11]
            - m[4] * m[3] * m[9]
            - m[8] * m[1] * m[7]
            + m[8] * m[3] * m[5];
        inv[15] = m[0] * m[5] * m[10] - m[0] * m[6] * m[9] - m[4] * m[1] * m[10]
            + m[4] * m[2] * m[9]
            + m[8] * m[1] * m[6]
            - m[8] * m[2] * m[5];

        let det = m[0] * inv[0] + m[1] * inv[4] + m[2] * inv[8] + m[3] * inv[12];
        (inv, det)
    }

    // =========================================================================
    // Factories
    // =========================================================================

    pub fn from_translation(x: f64, y: f64, z: f64) -> Matrix {
        Matrix::from_rows([
            1.0, 0.0, 0.0, x, //
            0.0, 1.0, 0.0, y, //
            0.0, 0.0, 1.0, z, //
            0.0, 0.0, 0.0, 1.0,
        ])
    }

    pub fn from_scale(x: f64, y: f64, z: f64) -> Matrix {
        Matrix::from_rows([
            x, 0.0, 0.0, 0.0, //
            0.0, y, 0.0, 0.0, //
            0.0, 0.0, z, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ])
    }

    pub fn from_rotation_x(angle: Angle) -> Matrix {
        let (sin, cos) = (angle.sin(), angle.cos());
        Matrix::from_rows([
            1.0, 0.0, 0.0, 0.0, //
            0.0, cos, -sin, 0.0, //
            0.0, sin, cos, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ])
    }

    pub fn from_rotation_y(angle: Angle) -> Matrix {
        let (sin, cos) = (angle.sin(), angle.cos());
        Matrix::from_rows([
            cos, 0.0, sin, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            -sin, 0.0, cos, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ])
    }

    pub fn from_rotation_z(angle: Angle) -> Matrix {
        let (sin, cos) = (angle.sin(), angle.cos());
        Matrix::from_rows([
            cos, -sin, 0.0, 0.0, //
            sin, cos, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ])
    }

    /// Perspective frustum with the given clipping planes.
    pub fn from_frustum(
        left: f64,
        right: f64,
        bottom: f64,
        top: f64,
        near: f64,
        far: f64,
    ) -> Matrix {
        let x = 2.0 * near / (right - left);
        let y = 2.0 * near / (top - bottom);
        let a = (right + left) / (right - left);
        let b = (top + bottom) / (top - bottom);
        let c = -(far + near) / (far - near);
        let d = -2.0 * far * near / (far - near);

        Matrix::from_rows([
            x, 0.0, a, 0.0, //
            0.0, y, b, 0.0, //
            0.0, 0.0, c, d, //
            0.0, 0.0, -1.0, 0.0,
        ])
    }

    /// Perspective projection from a vertical field of view in degrees.
    pub fn from_perspective(fov_degrees: f64, aspect: f64, near: f64, far: f64) -> Matrix {
        let ymax = near * (fov_degrees * DEGREES_TO_RADIANS / 2.0).tan();
        let ymin = -ymax;
        Matrix::from_frustum(ymin * aspect, ymax * aspect, ymin, ymax, near, far)
    }

    pub fn from_orthographic(
        left: f64,
        right: f64,
        bottom: f64,
        top: f64,
        near: f64,
        far: f64,
    ) -> Matrix {
        let tx = -(right + left) / (right - left);
        let ty = -(top + bottom) / (top - bottom);
        let tz = -(far + near) / (far - near);

        Matrix::from_rows([
            2.0 / (right - left),
            0.0,
            0.0,
            tx,
            0.0,
            2.0 / (top - bottom),
            0.0,
            ty,
            0.0,
            0.0,
            -2.0 / (far - near),
            tz,
            0.0,
            0.0,
            0.0,
            1.0,
        ])
    }

    /// Rotation matrix for a quaternion. A zero quaternion yields identity.
    pub fn from_quaternion(quaternion: &Quaternion) -> Matrix {
        let q = quaternion.normalize().unwrap_or(Quaternion::IDENTITY);
        let xx = q.x * q.x;
        let xy = q.x * q.y;
        let xz = q.x * q.z;
        let xw = q.x * q.w;
        let yy = q.y * q.y;
        let yz = q.y * q.z;
        let yw = q.y * q.w;
        let zz = q.z * q.z;
        let zw = q.z * q.w;

        Matrix::from_rows([
            1.0 - 2.0 * (yy + zz),
            2.0 * (xy - zw),
            2.0 * (xz + yw),
            0.0,
            2.0 * (xy + zw),
            1.0 - 2.0 * (xx + zz),
            2.0 * (yz - xw),
            0.0,
            2.0 * (xz - yw),
            2.0 * (yz + xw),
            1.0 - 2.0 * (xx + yy),
            0.0,
            0.0,
            0.0,
            0.0,
            1.0,
        ])
    }

    /// Viewing matrix mapping `eye` to the origin and `center` onto −Z with
    /// `up` along +Y. Returns `None` when eye and center coincide or the up
    /// vector is parallel to the line of sight.
    pub fn from_view_look_at(eye: &Vector4, center: &Vector4, up: &Vector4) -> Option<Matrix> {
        let forward = center.subtract(eye).normalize()?;
        let side = forward.cross(up).normalize()?;
        let up = side.cross(&forward);

        let axes = Matrix::from_rows([
            side.x, side.y, side.z, 0.0, //
            up.x, up.y, up.z, 0.0, //
            -forward.x, -forward.y, -forward.z, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ]);
        Some(axes.multiply(&Matrix::from_translation(-eye.x, -eye.y, -eye.z)))
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Matrix::IDENTITY
    }
}

impl Mul for Matrix {
    type Output = Matrix;

    fn mul(self, other: Matrix) -> Matrix {
        self.multiply(&other)
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Matrix[")?;
        for row in 0..4 {
            let r = &self.m[row * 4..row * 4 + 4];
            write!(f, " Row{}[{}, {}, {}, {}]", row + 1, r[0], r[1], r[2], r[3])?;
        }
        write!(f, " ]")
    }
}

fn transpose_array(values: &[f64; 16]) -> [f64; 16] {
    let mut out = [0.0; 16];
    for row in 0..4 {
        for col in 0..4 {
            out[col * 4 + row] = values[row * 4 + col];
        }
    }
    out
}
