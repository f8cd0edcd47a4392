//! SE(3) exponential and logarithm maps for rigid transforms.
//!
//! Tangent vectors are ordered `[rho, phi]`: translational part first,
//! rotational part second. Group elements are `(R, t)` pairs mapping world
//! coordinates into the local frame. Both maps switch to series
//! approximations of the `V`/`V^-1` matrices below `theta < 1e-6` to avoid
//! the 0/0 singularity of the closed forms.

use nalgebra::{Matrix3, UnitQuaternion, Vector3, Vector6};

use crate::math::rotation::{matrix_to_axis_angle, skew};

/// Angle below which the series expansions of `V` and `V^-1` are used.
const SMALL_ANGLE: f64 = 1e-6;

/// Left Jacobian `V` of SO(3), relating the translational tangent to the
/// group translation: `t = V * rho`.
fn left_jacobian(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let hat = skew(phi);
    if theta < SMALL_ANGLE {
        Matrix3::identity() + 0.5 * hat + (hat * hat) / 6.0
    } else {
        let theta2 = theta * theta;
        Matrix3::identity()
            + ((1.0 - theta.cos()) / theta2) * hat
            + ((theta - theta.sin()) / (theta2 * theta)) * (hat * hat)
    }
}

/// Inverse left Jacobian `V^-1`, so that `rho = V^-1 * t`.
fn left_jacobian_inverse(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let hat = skew(phi);
    if theta < SMALL_ANGLE {
        Matrix3::identity() - 0.5 * hat + (hat * hat) / 12.0
    } else {
        let theta2 = theta * theta;
        let coeff = (1.0 - (theta * theta.sin()) / (2.0 * (1.0 - theta.cos()))) / theta2;
        Matrix3::identity() - 0.5 * hat + coeff * (hat * hat)
    }
}

/// Exponential map: tangent vector `[rho, phi]` to a `(R, t)` pair.
pub fn se3_exp(xi: &Vector6<f64>) -> (Matrix3<f64>, Vector3<f64>) {
    let rho = Vector3::new(xi[0], xi[1], xi[2]);
    let phi = Vector3::new(xi[3], xi[4], xi[5]);

    let rotation = UnitQuaternion::from_scaled_axis(phi)
        .to_rotation_matrix()
        .into_inner();
    let translation = left_jacobian(&phi) * rho;

    (rotation, translation)
}

/// Logarithm map: a `(R, t)` pair back to its tangent vector `[rho, phi]`.
///
/// Round-trips with [`se3_exp`] for rotation angles in `(-pi, pi)`.
pub fn se3_log(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Vector6<f64> {
    let phi = matrix_to_axis_angle(rotation);
    let rho = left_jacobian_inverse(&phi) * translation;

    Vector6::new(rho.x, rho.y, rho.z, phi.x, phi.y, phi.z)
}

/// Compose two rigid transforms: `T1 * T2`.
pub fn compose(
    r1: &Matrix3<f64>,
    t1: &Vector3<f64>,
    r2: &Matrix3<f64>,
    t2: &Vector3<f64>,
) -> (Matrix3<f64>, Vector3<f64>) {
    (r1 * r2, r1 * t2 + t1)
}

/// Invert a rigid transform.
pub fn invert(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> (Matrix3<f64>, Vector3<f64>) {
    let r_inv = rotation.transpose();
    let t_inv = -(r_inv * translation);
    (r_inv, t_inv)
}
