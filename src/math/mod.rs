//! Math kernel: rotation algebra, SE(3) maps, camera projection,
//! robust losses and numerical differentiation.
//!
//! This layer has no knowledge of the factor graph; factors call into it.

pub mod camera;
pub mod jacobians;
pub mod robust;
pub mod rotation;
pub mod se3;

pub use camera::{camera_center, point_depth, Camera};
pub use jacobians::{finite_difference_jacobian, DEFAULT_FD_STEP};
pub use robust::{estimate_scale, RobustLoss, ScaleEstimator};
pub use rotation::{
    axis_angle_to_matrix, axis_angle_to_quaternion, matrix_to_axis_angle,
    quaternion_to_axis_angle, skew,
};
pub use se3::{compose, invert, se3_exp, se3_log};
