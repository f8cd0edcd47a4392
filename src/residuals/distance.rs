//! Distance residuals: fixed distance, equal lengths, length ratios.

use nalgebra::{DMatrix, DVector};

use crate::residuals::{as_point, DEGENERATE_EPS, DEGENERATE_PENALTY};

/// Target Euclidean distance between two points.
///
/// Residual is `target - |a - b|`. Coincident points evaluate without
/// dividing by zero and get an all-zero Jacobian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Distance {
    target: f64,
}

impl Distance {
    pub fn new(target: f64) -> Self {
        Distance { target }
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub(crate) fn evaluate(&self, values: &[DVector<f64>]) -> DVector<f64> {
        let d = (as_point(&values[0]) - as_point(&values[1])).norm();
        DVector::from_vec(vec![self.target - d])
    }

    pub(crate) fn jacobian(&self, values: &[DVector<f64>]) -> Vec<DMatrix<f64>> {
        let diff = as_point(&values[0]) - as_point(&values[1]);
        let d = diff.norm();
        if d < DEGENERATE_EPS {
            return vec![DMatrix::zeros(1, 3), DMatrix::zeros(1, 3)];
        }
        let unit = diff / d;
        // r = target - d, so dr/da = -unit, dr/db = +unit
        let mut ja = DMatrix::zeros(1, 3);
        let mut jb = DMatrix::zeros(1, 3);
        for k in 0..3 {
            ja[(0, k)] = -unit[k];
            jb[(0, k)] = unit[k];
        }
        vec![ja, jb]
    }
}

/// `|b1 - a1| - |b2 - a2|` over two segments.
pub(crate) fn evaluate_equal_distance(values: &[DVector<f64>]) -> DVector<f64> {
    let len1 = (as_point(&values[1]) - as_point(&values[0])).norm();
    let len2 = (as_point(&values[3]) - as_point(&values[2])).norm();
    DVector::from_vec(vec![len1 - len2])
}

/// `|b1 - a1| / |b2 - a2| - target`; a degenerate second segment returns
/// the penalty value instead of dividing by zero.
pub(crate) fn evaluate_distance_ratio(values: &[DVector<f64>], target: f64) -> DVector<f64> {
    let len1 = (as_point(&values[1]) - as_point(&values[0])).norm();
    let len2 = (as_point(&values[3]) - as_point(&values[2])).norm();
    if len2 < DEGENERATE_EPS {
        return DVector::from_vec(vec![DEGENERATE_PENALTY]);
    }
    DVector::from_vec(vec![len1 / len2 - target])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::residuals::Residual;
    use approx::assert_relative_eq;

    fn point(x: f64, y: f64, z: f64) -> DVector<f64> {
        DVector::from_vec(vec![x, y, z])
    }

    #[test]
    fn test_exact_distance_zero_residual() {
        let d = Distance::new(2.0);
        let values = vec![point(0.0, 0.0, 0.0), point(0.0, 2.0, 0.0)];
        assert_relative_eq!(d.evaluate(&values)[0], 0.0, epsilon = 1e-15);
    }

    #[test]
    fn test_degenerate_pair_zero_jacobian() {
        let d = Distance::new(1.0);
        let values = vec![point(0.5, 0.5, 0.5), point(0.5, 0.5, 0.5)];
        let r = d.evaluate(&values);
        assert_relative_eq!(r[0], 1.0, epsilon = 1e-15);
        assert!(r[0].is_finite());
        let blocks = d.jacobian(&values);
        assert!(blocks.iter().all(|b| b.iter().all(|v| *v == 0.0)));
    }

    #[test]
    fn test_jacobian_is_unit_direction() {
        let d = Distance::new(0.0);
        let values = vec![point(0.0, 0.0, 0.0), point(3.0, 4.0, 0.0)];
        let blocks = d.jacobian(&values);
        assert_relative_eq!(blocks[0][(0, 0)], 0.6, epsilon = 1e-12);
        assert_relative_eq!(blocks[0][(0, 1)], 0.8, epsilon = 1e-12);
        assert_relative_eq!(blocks[1][(0, 0)], -0.6, epsilon = 1e-12);
    }

    #[test]
    fn test_equal_distance() {
        let values = vec![
            point(0.0, 0.0, 0.0),
            point(2.0, 0.0, 0.0),
            point(0.0, 0.0, 0.0),
            point(0.0, 0.0, 2.0),
        ];
        assert_relative_eq!(evaluate_equal_distance(&values)[0], 0.0, epsilon = 1e-15);
    }

    #[test]
    fn test_distance_ratio() {
        let residual = Residual::DistanceRatio { target: 2.0 };
        let values = vec![
            point(0.0, 0.0, 0.0),
            point(4.0, 0.0, 0.0),
            point(0.0, 0.0, 0.0),
            point(0.0, 2.0, 0.0),
        ];
        assert_relative_eq!(residual.evaluate(&values)[0], 0.0, epsilon = 1e-15);
    }

    #[test]
    fn test_distance_ratio_degenerate_denominator() {
        let values = vec![
            point(0.0, 0.0, 0.0),
            point(4.0, 0.0, 0.0),
            point(1.0, 1.0, 1.0),
            point(1.0, 1.0, 1.0),
        ];
        let r = evaluate_distance_ratio(&values, 2.0);
        assert_eq!(r[0], DEGENERATE_PENALTY);
    }
}
