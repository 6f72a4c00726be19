//! Orbit camera and matrix stacks.
//!
//! The camera orbits the globe's centre at a fixed distance. Its rotation is a
//! roll/pitch/yaw quaternion applied to the globe, so the point of the surface
//! facing the viewer is what drives tile selection.

mod stack;

pub use stack::MatrixStack;

use crate::math::{Angle, LatLon, Matrix, Quaternion, Vector4};

/// Default vertical field of view in degrees.
pub const DEFAULT_FOV_DEGREES: f64 = 45.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    fov_degrees: f64,
    aspect: f64,
    near: f64,
    far: f64,
    distance: f64,
    rotation: Quaternion,
}

impl Camera {
    /// Camera at `distance` from the globe centre looking at it, with clip
    /// planes derived from `radius`.
    pub fn new(radius: f64, distance: f64) -> Self {
        Self {
            fov_degrees: DEFAULT_FOV_DEGREES,
            aspect: 1.0,
            near: (distance - radius).max(radius * 1e-3),
            far: distance + radius,
            distance,
            rotation: Quaternion::IDENTITY,
        }
    }

    /// Updates the aspect ratio. A zero height keeps a square aspect.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.aspect = if height == 0 {
            1.0
        } else {
            f64::from(width) / f64::from(height)
        };
    }

    pub fn aspect(&self) -> f64 {
        self.aspect
    }

    pub fn fov_degrees(&self) -> f64 {
        self.fov_degrees
    }

    pub fn set_fov_degrees(&mut self, fov_degrees: f64) {
        self.fov_degrees = fov_degrees;
    }

    pub fn set_clip_planes(&mut self, near: f64, far: f64) {
        self.near = near;
        self.far = far;
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }

    pub fn set_distance(&mut self, distance: f64) {
        self.distance = distance;
    }

    pub fn rotation(&self) -> Quaternion {
        self.rotation
    }

    pub fn set_rotation(&mut self, roll: Angle, pitch: Angle, yaw: Angle) {
        self.rotation = Quaternion::from_roll_pitch_yaw(roll, pitch, yaw);
    }

    /// Applies a further rotation on top of the current one.
    pub fn rotate(&mut self, roll: Angle, pitch: Angle, yaw: Angle) {
        let delta = Quaternion::from_roll_pitch_yaw(roll, pitch, yaw);
        self.rotation = (delta * self.rotation)
            .normalize()
            .unwrap_or(Quaternion::IDENTITY);
    }

    pub fn projection(&self) -> Matrix {
        Matrix::from_perspective(self.fov_degrees, self.aspect, self.near, self.far)
    }

    /// `I × T(0, 0, −distance) × R(rotation)`.
    pub fn model_view(&self) -> Matrix {
        Matrix::IDENTITY
            .multiply(&Matrix::from_translation(0.0, 0.0, -self.distance))
            .multiply(&Matrix::from_quaternion(&self.rotation))
    }

    /// Resets both stacks to this camera's matrices.
    pub fn load_matrices(&self, model_view: &mut MatrixStack, projection: &mut MatrixStack) {
        projection.clear();
        projection.load(self.projection());

        model_view.clear();
        model_view.load(Matrix::IDENTITY);
        model_view.mult(&Matrix::from_translation(0.0, 0.0, -self.distance));
        model_view.mult(&Matrix::from_quaternion(&self.rotation));
    }

    /// The geographic point of the globe facing the camera.
    pub fn center_lat_lon(&self) -> LatLon {
        let facing = Matrix::from_quaternion(&self.rotation)
            .transpose()
            .transform(&Vector4::with_w(0.0, 0.0, 1.0, 0.0));
        LatLon::from_cartesian(&facing).unwrap_or_default()
    }
}
