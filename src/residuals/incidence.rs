//! Point-on-primitive residuals: lines, planes, circles, spheres.

use nalgebra::{DVector, Vector3};

use crate::error::{PrismError, PrismResult};
use crate::residuals::{as_point, DEGENERATE_EPS, DEGENERATE_PENALTY};

/// Cross-product distance of each extra point to the line through the
/// first two points; `n - 2` residual elements.
pub(crate) fn evaluate_collinear(values: &[DVector<f64>]) -> DVector<f64> {
    let a = as_point(&values[0]);
    let b = as_point(&values[1]);
    let direction = b - a;
    let dir_norm = direction.norm();
    let n_extra = values.len() - 2;

    if dir_norm < DEGENERATE_EPS {
        return DVector::from_element(n_extra, DEGENERATE_PENALTY);
    }

    DVector::from_iterator(
        n_extra,
        values[2..].iter().map(|value| {
            let to_point = as_point(value) - a;
            to_point.cross(&direction).norm() / dir_norm
        }),
    )
}

/// Signed distance of each extra point to the plane through the first
/// three points; `n - 3` residual elements.
pub(crate) fn evaluate_coplanar(values: &[DVector<f64>]) -> DVector<f64> {
    let p0 = as_point(&values[0]);
    let p1 = as_point(&values[1]);
    let p2 = as_point(&values[2]);
    let normal = (p1 - p0).cross(&(p2 - p0));
    let normal_norm = normal.norm();
    let n_extra = values.len() - 3;

    if normal_norm < DEGENERATE_EPS {
        return DVector::from_element(n_extra, DEGENERATE_PENALTY);
    }
    let unit_normal = normal / normal_norm;

    DVector::from_iterator(
        n_extra,
        values[3..]
            .iter()
            .map(|value| unit_normal.dot(&(as_point(value) - p0))),
    )
}

/// Distance of a point to the line `a -> b`; variables `(point, a, b)`.
pub(crate) fn evaluate_point_on_line(values: &[DVector<f64>]) -> DVector<f64> {
    let point = as_point(&values[0]);
    let a = as_point(&values[1]);
    let b = as_point(&values[2]);
    let direction = b - a;
    let dir_norm = direction.norm();
    if dir_norm < DEGENERATE_EPS {
        return DVector::from_vec(vec![DEGENERATE_PENALTY]);
    }
    let distance = (point - a).cross(&direction).norm() / dir_norm;
    DVector::from_vec(vec![distance])
}

/// Signed distance of a point to the plane through `a, b, c`; variables
/// `(point, a, b, c)`.
pub(crate) fn evaluate_point_on_plane(values: &[DVector<f64>]) -> DVector<f64> {
    let point = as_point(&values[0]);
    let a = as_point(&values[1]);
    let b = as_point(&values[2]);
    let c = as_point(&values[3]);
    let normal = (b - a).cross(&(c - a));
    let normal_norm = normal.norm();
    if normal_norm < DEGENERATE_EPS {
        return DVector::from_vec(vec![DEGENERATE_PENALTY]);
    }
    DVector::from_vec(vec![(normal / normal_norm).dot(&(point - a))])
}

/// Sphere-radius difference; variables `(point, center, radius reference)`.
/// The target radius is the distance from the center to the reference point.
pub(crate) fn evaluate_point_on_sphere(values: &[DVector<f64>]) -> DVector<f64> {
    let point = as_point(&values[0]);
    let center = as_point(&values[1]);
    let radius_ref = as_point(&values[2]);
    let target_radius = (radius_ref - center).norm();
    let current = (point - center).norm();
    DVector::from_vec(vec![current - target_radius])
}

/// Fixed circle primitive for point-on-circle constraints.
///
/// The circle is constant data validated at construction; the residual
/// has two elements: signed offset from the circle plane and in-plane
/// radial offset from the circumference.
#[derive(Debug, Clone, PartialEq)]
pub struct Circle {
    center: Vector3<f64>,
    normal: Vector3<f64>,
    radius: f64,
}

impl Circle {
    /// Fails on a zero normal or non-positive radius.
    pub fn new(center: Vector3<f64>, normal: Vector3<f64>, radius: f64) -> PrismResult<Self> {
        let norm = normal.norm();
        if norm < DEGENERATE_EPS {
            return Err(PrismError::InvalidInput(
                "circle normal cannot be the zero vector".to_string(),
            ));
        }
        if radius <= 0.0 {
            return Err(PrismError::InvalidInput(format!(
                "circle radius must be positive, got {radius}"
            )));
        }
        Ok(Circle {
            center,
            normal: normal / norm,
            radius,
        })
    }

    pub(crate) fn evaluate(&self, values: &[DVector<f64>]) -> DVector<f64> {
        let point = as_point(&values[0]);
        let offset = point - self.center;
        let plane_distance = self.normal.dot(&offset);
        let in_plane = offset - plane_distance * self.normal;
        DVector::from_vec(vec![plane_distance, in_plane.norm() - self.radius])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn point(x: f64, y: f64, z: f64) -> DVector<f64> {
        DVector::from_vec(vec![x, y, z])
    }

    #[test]
    fn test_collinear_points_on_line() {
        let values = vec![
            point(0.0, 0.0, 0.0),
            point(1.0, 1.0, 1.0),
            point(2.0, 2.0, 2.0),
            point(-3.0, -3.0, -3.0),
        ];
        let r = evaluate_collinear(&values);
        assert_eq!(r.len(), 2);
        assert_relative_eq!(r.norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_collinear_degenerate_line() {
        let values = vec![
            point(1.0, 1.0, 1.0),
            point(1.0, 1.0, 1.0),
            point(2.0, 2.0, 2.0),
        ];
        let r = evaluate_collinear(&values);
        assert_eq!(r[0], DEGENERATE_PENALTY);
    }

    #[test]
    fn test_coplanar_signed_distance() {
        // Plane z = 0, fourth point at z = 0.7.
        let values = vec![
            point(0.0, 0.0, 0.0),
            point(1.0, 0.0, 0.0),
            point(0.0, 1.0, 0.0),
            point(0.5, 0.5, 0.7),
        ];
        let r = evaluate_coplanar(&values);
        assert_relative_eq!(r[0].abs(), 0.7, epsilon = 1e-12);
    }

    #[test]
    fn test_point_on_line_distance() {
        let values = vec![
            point(0.0, 2.0, 0.0),
            point(0.0, 0.0, 0.0),
            point(5.0, 0.0, 0.0),
        ];
        assert_relative_eq!(evaluate_point_on_line(&values)[0], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_point_on_plane() {
        let values = vec![
            point(0.25, 0.75, 0.0),
            point(0.0, 0.0, 0.0),
            point(1.0, 0.0, 0.0),
            point(0.0, 1.0, 0.0),
        ];
        assert_relative_eq!(evaluate_point_on_plane(&values)[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_point_on_sphere() {
        let values = vec![
            point(0.0, 0.0, 3.0),
            point(0.0, 0.0, 0.0),
            point(3.0, 0.0, 0.0),
        ];
        assert_relative_eq!(evaluate_point_on_sphere(&values)[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_circle_residual() {
        let circle = Circle::new(Vector3::zeros(), Vector3::z(), 2.0).unwrap();
        let on_circle = vec![point(2.0, 0.0, 0.0)];
        assert_relative_eq!(circle.evaluate(&on_circle).norm(), 0.0, epsilon = 1e-12);

        let off_plane = vec![point(0.0, 2.0, 0.5)];
        let r = circle.evaluate(&off_plane);
        assert_relative_eq!(r[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(r[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_circle_validation() {
        assert!(Circle::new(Vector3::zeros(), Vector3::zeros(), 1.0).is_err());
        assert!(Circle::new(Vector3::zeros(), Vector3::z(), 0.0).is_err());
    }
}
