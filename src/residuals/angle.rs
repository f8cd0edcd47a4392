//! Angular residuals: angle between segments and axis alignment.

use nalgebra::{DVector, Vector3};

use crate::error::{PrismError, PrismResult};
use crate::residuals::{as_point, DEGENERATE_EPS, DEGENERATE_PENALTY};

/// Angle between the directions of two segments, minus a target.
///
/// Reads four points `(a1, b1, a2, b2)`; the directions are `b1 - a1`
/// and `b2 - a2`. The measured angle lies in `[0, pi]`; the target is
/// clamped to the same range at construction. Parallelism and
/// perpendicularity are the 0 and 90 degree specializations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Angle {
    target_radians: f64,
}

impl Angle {
    /// Target angle in degrees, clamped to `[0, 180]`.
    pub fn from_degrees(degrees: f64) -> Self {
        let clamped = degrees.clamp(0.0, 180.0);
        Angle {
            target_radians: clamped.to_radians(),
        }
    }

    /// Parallel lines: target 0 degrees.
    pub fn parallel() -> Self {
        Angle::from_degrees(0.0)
    }

    /// Perpendicular lines: target 90 degrees.
    pub fn perpendicular() -> Self {
        Angle::from_degrees(90.0)
    }

    pub fn target_degrees(&self) -> f64 {
        self.target_radians.to_degrees()
    }

    pub(crate) fn evaluate(&self, values: &[DVector<f64>]) -> DVector<f64> {
        let d1 = as_point(&values[1]) - as_point(&values[0]);
        let d2 = as_point(&values[3]) - as_point(&values[2]);
        let n1 = d1.norm();
        let n2 = d2.norm();
        if n1 < DEGENERATE_EPS || n2 < DEGENERATE_EPS {
            return DVector::from_vec(vec![DEGENERATE_PENALTY]);
        }
        let cos_angle = (d1.dot(&d2) / (n1 * n2)).clamp(-1.0, 1.0);
        DVector::from_vec(vec![cos_angle.acos() - self.target_radians])
    }
}

/// Segment direction aligned with a fixed world axis.
///
/// Residual is the first two components of `cross(unit(j - i), axis)`;
/// both vanish when the segment is parallel to the axis.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisAlignment {
    axis: Vector3<f64>,
}

impl AxisAlignment {
    /// Named axis: one of `x`, `y`, `z`, `-x`, `-y`, `-z`.
    pub fn from_name(name: &str) -> PrismResult<Self> {
        let axis = match name {
            "x" => Vector3::x(),
            "y" => Vector3::y(),
            "z" => Vector3::z(),
            "-x" => -Vector3::x(),
            "-y" => -Vector3::y(),
            "-z" => -Vector3::z(),
            other => {
                return Err(PrismError::InvalidInput(format!(
                    "unknown axis name '{other}'"
                )))
            }
        };
        Ok(AxisAlignment { axis })
    }

    /// Custom axis direction; fails on a zero vector.
    pub fn from_vector(axis: Vector3<f64>) -> PrismResult<Self> {
        let norm = axis.norm();
        if norm < DEGENERATE_EPS {
            return Err(PrismError::InvalidInput(
                "alignment axis cannot be the zero vector".to_string(),
            ));
        }
        Ok(AxisAlignment { axis: axis / norm })
    }

    pub fn axis(&self) -> Vector3<f64> {
        self.axis
    }

    pub(crate) fn evaluate(&self, values: &[DVector<f64>]) -> DVector<f64> {
        let vec = as_point(&values[1]) - as_point(&values[0]);
        let norm = vec.norm();
        if norm < DEGENERATE_EPS {
            return DVector::from_element(2, DEGENERATE_PENALTY);
        }
        let cross = (vec / norm).cross(&self.axis);
        DVector::from_vec(vec![cross.x, cross.y])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn point(x: f64, y: f64, z: f64) -> DVector<f64> {
        DVector::from_vec(vec![x, y, z])
    }

    #[test]
    fn test_perpendicular_zero_residual() {
        let angle = Angle::perpendicular();
        let values = vec![
            point(0.0, 0.0, 0.0),
            point(1.0, 0.0, 0.0),
            point(0.0, 0.0, 0.0),
            point(0.0, 3.0, 0.0),
        ];
        assert_relative_eq!(angle.evaluate(&values)[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_parallel_measures_right_angle() {
        let angle = Angle::parallel();
        let values = vec![
            point(0.0, 0.0, 0.0),
            point(1.0, 0.0, 0.0),
            point(0.0, 0.0, 0.0),
            point(0.0, 2.0, 0.0),
        ];
        assert_relative_eq!(angle.evaluate(&values)[0], FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_target_clamped() {
        assert_relative_eq!(Angle::from_degrees(270.0).target_degrees(), 180.0);
        assert_relative_eq!(Angle::from_degrees(-15.0).target_degrees(), 0.0);
    }

    #[test]
    fn test_degenerate_segment_penalty() {
        let angle = Angle::perpendicular();
        let values = vec![
            point(1.0, 1.0, 1.0),
            point(1.0, 1.0, 1.0),
            point(0.0, 0.0, 0.0),
            point(0.0, 3.0, 0.0),
        ];
        assert_eq!(angle.evaluate(&values)[0], DEGENERATE_PENALTY);
    }

    #[test]
    fn test_axis_alignment_on_axis() {
        let alignment = AxisAlignment::from_name("z").unwrap();
        let values = vec![point(1.0, 2.0, 0.0), point(1.0, 2.0, 5.0)];
        let r = alignment.evaluate(&values);
        assert_relative_eq!(r.norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_axis_alignment_off_axis() {
        let alignment = AxisAlignment::from_name("x").unwrap();
        let values = vec![point(0.0, 0.0, 0.0), point(0.0, 0.0, 1.0)];
        let r = alignment.evaluate(&values);
        assert!(r.norm() > 0.5);
    }

    #[test]
    fn test_bad_axis_rejected() {
        assert!(AxisAlignment::from_name("w").is_err());
        assert!(AxisAlignment::from_vector(Vector3::zeros()).is_err());
    }
}
