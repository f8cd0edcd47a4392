//! Rotation representations and conversions.
//!
//! Rotations move between three forms: scaled axis-angle vectors (the
//! parameterization used for camera rotation variables), unit quaternions,
//! and 3x3 rotation matrices. All conversions go through nalgebra's
//! `UnitQuaternion`, which handles the small-angle limit internally.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

/// Skew-symmetric (hat) matrix of a 3-vector, so that `skew(a) * b = a x b`.
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y, //
        v.z, 0.0, -v.x, //
        -v.y, v.x, 0.0,
    )
}

/// Convert a scaled axis-angle vector (angle = norm) to a unit quaternion.
///
/// A zero vector maps to the identity rotation.
pub fn axis_angle_to_quaternion(axis_angle: &Vector3<f64>) -> UnitQuaternion<f64> {
    UnitQuaternion::from_scaled_axis(*axis_angle)
}

/// Convert a unit quaternion back to a scaled axis-angle vector.
pub fn quaternion_to_axis_angle(quaternion: &UnitQuaternion<f64>) -> Vector3<f64> {
    quaternion.scaled_axis()
}

/// Convert a scaled axis-angle vector to a rotation matrix.
pub fn axis_angle_to_matrix(axis_angle: &Vector3<f64>) -> Matrix3<f64> {
    UnitQuaternion::from_scaled_axis(*axis_angle)
        .to_rotation_matrix()
        .into_inner()
}

/// Extract the scaled axis-angle vector of a rotation matrix.
///
/// The matrix is assumed orthonormal; a slightly perturbed input is
/// re-orthonormalized by the quaternion extraction.
pub fn matrix_to_axis_angle(rotation: &Matrix3<f64>) -> Vector3<f64> {
    let rot = Rotation3::from_matrix_unchecked(*rotation);
    UnitQuaternion::from_rotation_matrix(&rot).scaled_axis()
}
