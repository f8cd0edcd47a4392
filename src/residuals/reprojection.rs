//! Reprojection residual: observed pixel minus predicted pixel.

use nalgebra::{DVector, Vector2, Vector3};

use crate::math::camera::{point_depth, Camera, MIN_PROJECTION_DEPTH};
use crate::math::rotation::axis_angle_to_matrix;
use crate::residuals::as_point;

/// Penalty per pixel axis when the point projects behind the camera.
const BEHIND_CAMERA_PENALTY: f64 = 1e3;

/// Pixel reprojection error, normalized by the measurement sigma.
///
/// Reads four variables in order: camera rotation (axis-angle), camera
/// translation, camera intrinsics `[fx, fy, cx, cy, k1, k2]`, and the
/// world point. A point at or behind the camera plane yields a constant
/// penalty residual with a zero Jacobian.
#[derive(Debug, Clone, PartialEq)]
pub struct Reprojection {
    observed: Vector2<f64>,
    sigma: f64,
}

impl Reprojection {
    /// `sigma` defaults to 1.0 when non-positive values are passed.
    pub fn new(observed: Vector2<f64>, sigma: f64) -> Self {
        let sigma = if sigma > 0.0 { sigma } else { 1.0 };
        Reprojection { observed, sigma }
    }

    pub fn observed(&self) -> Vector2<f64> {
        self.observed
    }

    /// True when the point sits at or behind the camera plane.
    pub(crate) fn is_degenerate(&self, values: &[DVector<f64>]) -> bool {
        let rotation = axis_angle_to_matrix(&as_point(&values[0]));
        let translation: Vector3<f64> = as_point(&values[1]);
        let point = as_point(&values[3]);
        point_depth(&rotation, &translation, &point) <= MIN_PROJECTION_DEPTH
    }

    pub(crate) fn evaluate(&self, values: &[DVector<f64>]) -> DVector<f64> {
        let rotation = axis_angle_to_matrix(&as_point(&values[0]));
        let translation = as_point(&values[1]);
        let point = as_point(&values[3]);

        let camera = match Camera::from_vector(&values[2]) {
            Ok(cam) => cam,
            Err(_) => {
                return DVector::from_element(2, BEHIND_CAMERA_PENALTY);
            }
        };

        let projected = camera.project(&rotation, &translation, &point);
        if projected.x.is_nan() || projected.y.is_nan() {
            return DVector::from_element(2, BEHIND_CAMERA_PENALTY);
        }

        DVector::from_vec(vec![
            (self.observed.x - projected.x) / self.sigma,
            (self.observed.y - projected.y) / self.sigma,
        ])
    }
}
