//! Efficient-PnP camera pose recovery.
//!
//! Lepetit's control-point formulation: four control points derived
//! from the covariance of the world points, barycentric coordinates
//! for every correspondence, a 2n x 12 linear system solved by SVD,
//! then Kabsch alignment between world and recovered camera-frame
//! points. Output is the world-to-camera `(R, t)` pair.

use nalgebra::{linalg::SymmetricEigen, DMatrix, Matrix3, Vector2, Vector3};

use crate::error::{PrismError, PrismResult};
use crate::math::camera::Camera;
use crate::math::rotation::matrix_to_axis_angle;

/// World-to-camera pose estimate.
#[derive(Debug, Clone)]
pub struct PnpPose {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

impl PnpPose {
    /// Rotation as an axis-angle vector, the camera variable layout.
    pub fn axis_angle(&self) -> Vector3<f64> {
        matrix_to_axis_angle(&self.rotation)
    }
}

/// Estimate the pose from 4+ world/pixel correspondences.
pub fn epnp(
    world: &[Vector3<f64>],
    image: &[Vector2<f64>],
    camera: &Camera,
) -> PrismResult<PnpPose> {
    let n = world.len();
    if n < 4 || image.len() != n {
        return Err(PrismError::PoseEstimation(format!(
            "need at least 4 point correspondences, got {n}"
        )));
    }

    let img_norm: Vec<Vector2<f64>> = image.iter().map(|p| camera.normalized_ray(p)).collect();

    let mut centroid = Vector3::zeros();
    for p in world {
        centroid += p;
    }
    centroid /= n as f64;

    let mut cov = Matrix3::zeros();
    for p in world {
        let d = p - centroid;
        cov += d * d.transpose();
    }
    cov /= n as f64;

    let eig = SymmetricEigen::new(cov);
    let mut control_w = [Vector3::zeros(); 4];
    control_w[0] = centroid;
    for i in 0..3 {
        let scale = eig.eigenvalues[i].abs().sqrt().max(1e-6);
        control_w[i + 1] = centroid + eig.eigenvectors.column(i).into_owned() * scale;
    }

    let basis = Matrix3::from_columns(&[
        control_w[1] - control_w[0],
        control_w[2] - control_w[0],
        control_w[3] - control_w[0],
    ]);
    let basis_inv = basis.try_inverse().ok_or_else(|| {
        PrismError::PoseEstimation("degenerate control point configuration".to_string())
    })?;

    let mut alphas = Vec::with_capacity(n);
    for p in world {
        let coeff = basis_inv * (p - control_w[0]);
        alphas.push([1.0 - coeff.x - coeff.y - coeff.z, coeff.x, coeff.y, coeff.z]);
    }

    let mut m = DMatrix::<f64>::zeros(2 * n, 12);
    for (i, (a, uv)) in alphas.iter().zip(img_norm.iter()).enumerate() {
        let r0 = 2 * i;
        let r1 = 2 * i + 1;
        for (j, &alpha) in a.iter().enumerate() {
            let c = 3 * j;
            m[(r0, c)] = alpha;
            m[(r0, c + 2)] = -uv.x * alpha;
            m[(r1, c + 1)] = alpha;
            m[(r1, c + 2)] = -uv.y * alpha;
        }
    }

    let svd = m.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| PrismError::PoseEstimation("SVD failed in PnP system".to_string()))?;
    let sol = v_t.row(v_t.nrows() - 1);

    let mut control_c = [Vector3::zeros(); 4];
    for (j, cc) in control_c.iter_mut().enumerate() {
        *cc = Vector3::new(sol[3 * j], sol[3 * j + 1], sol[3 * j + 2]);
    }

    // Recover the absolute scale from inter-control-point distances.
    let mut sum_w = 0.0;
    let mut sum_c = 0.0;
    for i in 0..4 {
        for j in (i + 1)..4 {
            sum_w += (control_w[i] - control_w[j]).norm_squared();
            sum_c += (control_c[i] - control_c[j]).norm_squared();
        }
    }
    if sum_c <= f64::EPSILON {
        return Err(PrismError::PoseEstimation(
            "degenerate control point configuration".to_string(),
        ));
    }
    let scale = (sum_w / sum_c).sqrt();
    for cc in &mut control_c {
        *cc *= scale;
    }

    let mut camera_pts = Vec::with_capacity(n);
    for a in &alphas {
        let mut pc = Vector3::zeros();
        for (j, &alpha) in a.iter().enumerate() {
            pc += control_c[j] * alpha;
        }
        camera_pts.push(pc);
    }

    // The homogeneous solution has an arbitrary sign; points must sit
    // in front of the camera.
    let depth_sum: f64 = camera_pts.iter().map(|p| p.z).sum();
    if depth_sum < 0.0 {
        for pc in &mut camera_pts {
            *pc = -*pc;
        }
    }

    pose_from_points(world, &camera_pts)
}

/// Kabsch alignment: rotation and translation mapping world points
/// onto camera-frame points.
fn pose_from_points(world: &[Vector3<f64>], camera: &[Vector3<f64>]) -> PrismResult<PnpPose> {
    if world.len() != camera.len() || world.len() < 3 {
        return Err(PrismError::PoseEstimation(
            "pose recovery needs at least 3 correspondences".to_string(),
        ));
    }

    let n = world.len() as f64;
    let mut c_w = Vector3::zeros();
    let mut c_c = Vector3::zeros();
    for (pw, pc) in world.iter().zip(camera.iter()) {
        c_w += pw;
        c_c += pc;
    }
    c_w /= n;
    c_c /= n;

    let mut h = Matrix3::zeros();
    for (pw, pc) in world.iter().zip(camera.iter()) {
        h += (pc - c_c) * (pw - c_w).transpose();
    }

    let svd = h.svd(true, true);
    let u = svd
        .u
        .ok_or_else(|| PrismError::PoseEstimation("SVD failed in pose recovery".to_string()))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| PrismError::PoseEstimation("SVD failed in pose recovery".to_string()))?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_fix = u;
        u_fix.column_mut(2).neg_mut();
        r = u_fix * v_t;
    }

    let t = c_c - r * c_w;
    Ok(PnpPose {
        rotation: r,
        translation: t,
    })
}
