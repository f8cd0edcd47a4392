//! Multi-point composite residuals: rectangles, mirror symmetry,
//! equal spacing.

use nalgebra::DVector;

use crate::residuals::{as_point, DEGENERATE_EPS, DEGENERATE_PENALTY};

/// Rectangle over corners `(a, b, c, d)` in winding order.
///
/// Nine residual elements: coplanarity of `c` with the plane `(a, b, d)`,
/// two adjacent-edge orthogonality dot products, and two opposite-edge
/// vector equalities (3 elements each). A target width/height aspect
/// ratio appends a tenth element.
pub(crate) fn evaluate_rectangle(
    values: &[DVector<f64>],
    aspect_ratio: Option<f64>,
) -> DVector<f64> {
    let a = as_point(&values[0]);
    let b = as_point(&values[1]);
    let c = as_point(&values[2]);
    let d = as_point(&values[3]);

    let mut residuals = Vec::with_capacity(10);

    let edge_ab = b - a;
    let edge_ad = d - a;
    let edge_bc = c - b;
    let edge_dc = c - d;

    let normal = edge_ab.cross(&edge_ad);
    let normal_norm = normal.norm();
    if normal_norm > DEGENERATE_EPS {
        residuals.push((normal / normal_norm).dot(&(c - a)));
    } else {
        residuals.push(DEGENERATE_PENALTY);
    }

    residuals.push(edge_ab.dot(&edge_ad));
    residuals.push(edge_bc.dot(&edge_ab));

    let parallel_ab_dc = edge_ab - edge_dc;
    residuals.extend_from_slice(&[parallel_ab_dc.x, parallel_ab_dc.y, parallel_ab_dc.z]);
    let parallel_ad_bc = edge_ad - edge_bc;
    residuals.extend_from_slice(&[parallel_ad_bc.x, parallel_ad_bc.y, parallel_ad_bc.z]);

    if let Some(target) = aspect_ratio {
        let height = edge_ad.norm();
        if height > DEGENERATE_EPS {
            residuals.push(edge_ab.norm() / height - target);
        } else {
            residuals.push(DEGENERATE_PENALTY);
        }
    }

    DVector::from_vec(residuals)
}

/// Mirror symmetry of point pairs across the plane through the first
/// three variables.
///
/// Variables are `(plane_a, plane_b, plane_c, p_1, q_1, ..., p_k, q_k)`;
/// each pair contributes `reflect(p_i) - q_i` (3 elements).
pub(crate) fn evaluate_mirror_symmetry(values: &[DVector<f64>], n_pairs: usize) -> DVector<f64> {
    let a = as_point(&values[0]);
    let b = as_point(&values[1]);
    let c = as_point(&values[2]);
    let normal = (b - a).cross(&(c - a));
    let normal_norm = normal.norm();

    if normal_norm < DEGENERATE_EPS {
        return DVector::from_element(3 * n_pairs, DEGENERATE_PENALTY);
    }
    let unit_normal = normal / normal_norm;

    let mut residuals = Vec::with_capacity(3 * n_pairs);
    for pair in 0..n_pairs {
        let p = as_point(&values[3 + 2 * pair]);
        let q = as_point(&values[4 + 2 * pair]);
        let reflected = p - 2.0 * unit_normal.dot(&(p - a)) * unit_normal;
        let diff = reflected - q;
        residuals.extend_from_slice(&[diff.x, diff.y, diff.z]);
    }

    DVector::from_vec(residuals)
}

/// Equal consecutive gaps along a chain of points: each later gap minus
/// the first gap, `n - 2` elements.
pub(crate) fn evaluate_equal_spacing(values: &[DVector<f64>]) -> DVector<f64> {
    let gaps: Vec<f64> = values
        .windows(2)
        .map(|pair| (as_point(&pair[1]) - as_point(&pair[0])).norm())
        .collect();
    let first = gaps[0];
    DVector::from_iterator(gaps.len() - 1, gaps[1..].iter().map(|gap| gap - first))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn point(x: f64, y: f64, z: f64) -> DVector<f64> {
        DVector::from_vec(vec![x, y, z])
    }

    fn unit_square() -> Vec<DVector<f64>> {
        vec![
            point(0.0, 0.0, 0.0),
            point(1.0, 0.0, 0.0),
            point(1.0, 1.0, 0.0),
            point(0.0, 1.0, 0.0),
        ]
    }

    #[test]
    fn test_exact_rectangle_zero_residual() {
        let r = evaluate_rectangle(&unit_square(), None);
        assert_eq!(r.len(), 9);
        assert_relative_eq!(r.norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rectangle_aspect_ratio() {
        let r = evaluate_rectangle(&unit_square(), Some(1.0));
        assert_eq!(r.len(), 10);
        assert_relative_eq!(r.norm(), 0.0, epsilon = 1e-12);

        let r_wrong = evaluate_rectangle(&unit_square(), Some(2.0));
        assert_relative_eq!(r_wrong[9], -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_skewed_rectangle_nonzero() {
        let mut corners = unit_square();
        corners[2] = point(1.3, 1.0, 0.2);
        let r = evaluate_rectangle(&corners, None);
        assert!(r.norm() > 0.1);
    }

    #[test]
    fn test_mirror_symmetry_exact_pair() {
        // Plane z = 0; pair mirrored through it.
        let values = vec![
            point(0.0, 0.0, 0.0),
            point(1.0, 0.0, 0.0),
            point(0.0, 1.0, 0.0),
            point(0.3, 0.4, 0.8),
            point(0.3, 0.4, -0.8),
        ];
        let r = evaluate_mirror_symmetry(&values, 1);
        assert_eq!(r.len(), 3);
        assert_relative_eq!(r.norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_mirror_symmetry_degenerate_plane() {
        let values = vec![
            point(0.0, 0.0, 0.0),
            point(1.0, 0.0, 0.0),
            point(2.0, 0.0, 0.0),
            point(0.3, 0.4, 0.8),
            point(0.3, 0.4, -0.8),
        ];
        let r = evaluate_mirror_symmetry(&values, 1);
        assert!(r.iter().all(|v| *v == DEGENERATE_PENALTY));
    }

    #[test]
    fn test_equal_spacing() {
        let values = vec![
            point(0.0, 0.0, 0.0),
            point(1.0, 0.0, 0.0),
            point(2.0, 0.0, 0.0),
            point(3.5, 0.0, 0.0),
        ];
        let r = evaluate_equal_spacing(&values);
        assert_eq!(r.len(), 2);
        assert_relative_eq!(r[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(r[1], 0.5, epsilon = 1e-12);
    }
}
