//! Pinhole camera model with radial distortion.
//!
//! Intrinsics are packed as `[fx, fy, cx, cy, k1, k2]`, matching the layout
//! of camera-intrinsics variables in the factor graph. Poses are
//! world-to-camera `(R, t)` pairs. Points at or behind the camera plane
//! (`z <= 1e-6`) project to NaN; callers must treat NaN output as "not
//! visible", never as a numeric value.

use nalgebra::{DVector, Matrix3, Vector2, Vector3};

use crate::error::{PrismError, PrismResult};

/// Minimum depth for a valid projection.
pub const MIN_PROJECTION_DEPTH: f64 = 1e-6;

/// Pinhole camera intrinsics with up to two radial distortion terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub k1: f64,
    pub k2: f64,
}

impl Camera {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, k1: f64, k2: f64) -> Self {
        Camera { fx, fy, cx, cy, k1, k2 }
    }

    /// Build from a packed intrinsics vector `[fx, fy, cx, cy, k1, k2]`.
    ///
    /// Four-element vectors are accepted with zero distortion.
    pub fn from_vector(params: &DVector<f64>) -> PrismResult<Self> {
        if params.len() != 4 && params.len() != 6 {
            return Err(PrismError::InvalidInput(format!(
                "intrinsics vector must have 4 or 6 elements, got {}",
                params.len()
            )));
        }
        let k1 = if params.len() > 4 { params[4] } else { 0.0 };
        let k2 = if params.len() > 5 { params[5] } else { 0.0 };
        Ok(Camera::new(params[0], params[1], params[2], params[3], k1, k2))
    }

    /// Packed intrinsics vector `[fx, fy, cx, cy, k1, k2]`.
    pub fn to_vector(&self) -> DVector<f64> {
        DVector::from_vec(vec![self.fx, self.fy, self.cx, self.cy, self.k1, self.k2])
    }

    /// Project a world point through the world-to-camera pose `(R, t)`.
    ///
    /// Returns NaN coordinates for points with camera-frame depth
    /// `z <= 1e-6`.
    pub fn project(
        &self,
        rotation: &Matrix3<f64>,
        translation: &Vector3<f64>,
        point: &Vector3<f64>,
    ) -> Vector2<f64> {
        let p_cam = rotation * point + translation;
        if p_cam.z <= MIN_PROJECTION_DEPTH {
            return Vector2::new(f64::NAN, f64::NAN);
        }

        let x = p_cam.x / p_cam.z;
        let y = p_cam.y / p_cam.z;

        let r2 = x * x + y * y;
        let distortion = 1.0 + self.k1 * r2 + self.k2 * r2 * r2;

        Vector2::new(
            self.fx * x * distortion + self.cx,
            self.fy * y * distortion + self.cy,
        )
    }

    /// Unproject a pixel to the world point at the given depth along its ray.
    ///
    /// Distortion is not inverted; the pixel is assumed undistorted (or the
    /// distortion negligible at the working accuracy of initialization).
    pub fn unproject(
        &self,
        rotation: &Matrix3<f64>,
        translation: &Vector3<f64>,
        pixel: &Vector2<f64>,
        depth: f64,
    ) -> Vector3<f64> {
        let x = (pixel.x - self.cx) / self.fx;
        let y = (pixel.y - self.cy) / self.fy;
        let p_cam = Vector3::new(x * depth, y * depth, depth);

        let r_inv = rotation.transpose();
        r_inv * p_cam - r_inv * translation
    }

    /// Normalized camera-frame ray direction for a pixel.
    pub fn normalized_ray(&self, pixel: &Vector2<f64>) -> Vector2<f64> {
        Vector2::new((pixel.x - self.cx) / self.fx, (pixel.y - self.cy) / self.fy)
    }
}

/// Camera center in world coordinates: `-R^T t`.
pub fn camera_center(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Vector3<f64> {
    -(rotation.transpose() * translation)
}

/// Depth of a world point in the camera frame (positive = in front).
pub fn point_depth(
    rotation: &Matrix3<f64>,
    translation: &Vector3<f64>,
    point: &Vector3<f64>,
) -> f64 {
    (rotation * point + translation).z
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn test_camera() -> Camera {
        Camera::new(800.0, 820.0, 320.0, 240.0, 0.0, 0.0)
    }

    #[test]
    fn test_principal_ray_projects_to_principal_point() {
        let cam = test_camera();
        let uv = cam.project(
            &Matrix3::identity(),
            &Vector3::zeros(),
            &Vector3::new(0.0, 0.0, 1.0),
        );
        assert_relative_eq!(uv, Vector2::new(320.0, 240.0), epsilon = 1e-12);
    }

    #[test]
    fn test_behind_camera_is_nan() {
        let cam = test_camera();
        let uv = cam.project(
            &Matrix3::identity(),
            &Vector3::zeros(),
            &Vector3::new(0.5, 0.5, -1.0),
        );
        assert!(uv.x.is_nan() && uv.y.is_nan());

        let uv_at_plane = cam.project(
            &Matrix3::identity(),
            &Vector3::zeros(),
            &Vector3::new(0.0, 0.0, 0.0),
        );
        assert!(uv_at_plane.x.is_nan());
    }

    #[test]
    fn test_unproject_project_roundtrip() {
        let cam = test_camera();
        let r = crate::math::rotation::axis_angle_to_matrix(&Vector3::new(0.1, -0.2, 0.05));
        let t = Vector3::new(0.3, -0.1, 0.8);

        let pixel = Vector2::new(411.5, 198.25);
        let world = cam.unproject(&r, &t, &pixel, 2.5);
        let reprojected = cam.project(&r, &t, &world);
        assert_relative_eq!(reprojected, pixel, epsilon = 1e-9);
    }

    #[test]
    fn test_radial_distortion_pushes_outward() {
        let mut cam = test_camera();
        cam.k1 = 0.1;
        let undistorted = test_camera().project(
            &Matrix3::identity(),
            &Vector3::zeros(),
            &Vector3::new(0.2, 0.0, 1.0),
        );
        let distorted = cam.project(
            &Matrix3::identity(),
            &Vector3::zeros(),
            &Vector3::new(0.2, 0.0, 1.0),
        );
        assert!(distorted.x > undistorted.x);
    }

    #[test]
    fn test_camera_center() {
        let r = crate::math::rotation::axis_angle_to_matrix(&Vector3::new(0.0, 0.4, 0.0));
        let center = Vector3::new(1.0, 2.0, 3.0);
        let t = -(r * center);
        assert_relative_eq!(camera_center(&r, &t), center, epsilon = 1e-12);
        assert_relative_eq!(
            point_depth(&r, &t, &center),
            0.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_from_vector_rejects_bad_length() {
        assert!(Camera::from_vector(&DVector::from_vec(vec![1.0, 2.0, 3.0])).is_err());
        assert!(Camera::from_vector(&DVector::from_vec(vec![1.0; 6])).is_ok());
    }
}
