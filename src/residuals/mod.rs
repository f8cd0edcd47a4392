//! Residual functors, one per constraint family.
//!
//! Every constraint type maps to exactly one [`Residual`] variant; matching
//! is exhaustive, so adding a constraint type without a residual is a
//! compile error. Each variant is a pure function from the ordered values
//! of its variables to a residual vector of fixed dimension and to one
//! Jacobian block per variable. Jacobians default to central finite
//! differences; Distance, KnownCoordinate and PointEquality supply
//! analytic derivatives.
//!
//! Degenerate geometry (coincident points, zero-length directions,
//! behind-camera projections) never panics or produces NaN: evaluation
//! substitutes a penalty residual and the Jacobian is zeroed, so one bad
//! constraint degrades the solve instead of aborting it.

mod angle;
mod composite;
mod distance;
mod incidence;
mod position;
mod reprojection;

pub use angle::{Angle, AxisAlignment};
pub use distance::Distance;
pub use incidence::Circle;
pub use position::KnownCoordinate;
pub use reprojection::Reprojection;

use nalgebra::{DMatrix, DVector};

use crate::math::jacobians::{finite_difference_jacobian, DEFAULT_FD_STEP};

/// Penalty residual value substituted for degenerate geometry.
pub(crate) const DEGENERATE_PENALTY: f64 = 1.0;
/// Length below which a direction or normal counts as degenerate.
pub(crate) const DEGENERATE_EPS: f64 = 1e-12;

/// View the first three components of a variable value as a point.
pub(crate) fn as_point(value: &DVector<f64>) -> nalgebra::Vector3<f64> {
    nalgebra::Vector3::new(value[0], value[1], value[2])
}

/// Closed set of residual functors.
#[derive(Debug, Clone, PartialEq)]
pub enum Residual {
    /// Pixel reprojection error over (rotation, translation, intrinsics, point).
    Reprojection(Reprojection),
    /// Masked identity pinning selected axes of one point.
    KnownCoordinate(KnownCoordinate),
    /// Target Euclidean distance between two points.
    Distance(Distance),
    /// Length difference between two segments (4 points).
    EqualDistance,
    /// Length ratio of two segments minus a target (4 points).
    DistanceRatio { target: f64 },
    /// Angle between two segment directions minus a target (4 points).
    Angle(Angle),
    /// Direction of a segment aligned with a fixed axis (2 points).
    AxisAlignment(AxisAlignment),
    /// Extra points on the line through the first two (n >= 3 points).
    Collinear { n_points: usize },
    /// Extra points on the plane through the first three (n >= 4 points).
    Coplanar { n_points: usize },
    /// Point at distance 0 from the line a->b (point, a, b).
    PointOnLine,
    /// Point on the plane through a, b, c (point, a, b, c).
    PointOnPlane,
    /// Point on a fixed circle (1 point variable).
    PointOnCircle(Circle),
    /// Point at sphere radius from a center (point, center, radius reference).
    PointOnSphere,
    /// Two points coincide (point-merge constraints).
    PointEquality,
    /// Four corners form a rectangle, optionally with a target aspect ratio.
    Rectangle { aspect_ratio: Option<f64> },
    /// Point pairs mirrored across the plane through three points.
    MirrorSymmetry { n_pairs: usize },
    /// Consecutive gaps along a point chain are equal (n >= 3 points).
    EqualSpacing { n_points: usize },
}

impl Residual {
    /// Residual vector dimension, fixed at construction.
    pub fn dim(&self) -> usize {
        match self {
            Residual::Reprojection(_) => 2,
            Residual::KnownCoordinate(kc) => kc.dim(),
            Residual::Distance(_) => 1,
            Residual::EqualDistance => 1,
            Residual::DistanceRatio { .. } => 1,
            Residual::Angle(_) => 1,
            Residual::AxisAlignment(_) => 2,
            Residual::Collinear { n_points } => n_points - 2,
            Residual::Coplanar { n_points } => n_points - 3,
            Residual::PointOnLine => 1,
            Residual::PointOnPlane => 1,
            Residual::PointOnCircle(_) => 2,
            Residual::PointOnSphere => 1,
            Residual::PointEquality => 3,
            Residual::Rectangle { aspect_ratio } => {
                if aspect_ratio.is_some() {
                    10
                } else {
                    9
                }
            }
            Residual::MirrorSymmetry { n_pairs } => 3 * n_pairs,
            Residual::EqualSpacing { n_points } => n_points - 2,
        }
    }

    /// Number of variables this residual reads.
    pub fn arity(&self) -> usize {
        match self {
            Residual::Reprojection(_) => 4,
            Residual::KnownCoordinate(_) => 1,
            Residual::Distance(_) => 2,
            Residual::EqualDistance => 4,
            Residual::DistanceRatio { .. } => 4,
            Residual::Angle(_) => 4,
            Residual::AxisAlignment(_) => 2,
            Residual::Collinear { n_points } => *n_points,
            Residual::Coplanar { n_points } => *n_points,
            Residual::PointOnLine => 3,
            Residual::PointOnPlane => 4,
            Residual::PointOnCircle(_) => 1,
            Residual::PointOnSphere => 3,
            Residual::PointEquality => 2,
            Residual::Rectangle { .. } => 4,
            Residual::MirrorSymmetry { n_pairs } => 3 + 2 * n_pairs,
            Residual::EqualSpacing { n_points } => *n_points,
        }
    }

    /// Smallest variable count the family admits; equals
    /// [`arity`](Self::arity) for fixed-arity residuals.
    pub fn min_arity(&self) -> usize {
        match self {
            Residual::Collinear { .. } | Residual::EqualSpacing { .. } => 3,
            Residual::Coplanar { .. } => 4,
            // The mirror plane plus at least one pair.
            Residual::MirrorSymmetry { .. } => 5,
            _ => self.arity(),
        }
    }

    /// Short constraint-family name, used in summaries and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Residual::Reprojection(_) => "reprojection",
            Residual::KnownCoordinate(_) => "known_coordinate",
            Residual::Distance(_) => "distance",
            Residual::EqualDistance => "equal_distance",
            Residual::DistanceRatio { .. } => "distance_ratio",
            Residual::Angle(_) => "angle",
            Residual::AxisAlignment(_) => "axis_alignment",
            Residual::Collinear { .. } => "collinear",
            Residual::Coplanar { .. } => "coplanar",
            Residual::PointOnLine => "point_on_line",
            Residual::PointOnPlane => "point_on_plane",
            Residual::PointOnCircle(_) => "point_on_circle",
            Residual::PointOnSphere => "point_on_sphere",
            Residual::PointEquality => "point_equality",
            Residual::Rectangle { .. } => "rectangle",
            Residual::MirrorSymmetry { .. } => "mirror_symmetry",
            Residual::EqualSpacing { .. } => "equal_spacing",
        }
    }

    /// Evaluate the residual vector for the given ordered variable values.
    ///
    /// `values` must contain exactly [`arity`](Self::arity) vectors in the
    /// order the factor declares its variables.
    pub fn evaluate(&self, values: &[DVector<f64>]) -> DVector<f64> {
        match self {
            Residual::Reprojection(r) => r.evaluate(values),
            Residual::KnownCoordinate(kc) => kc.evaluate(values),
            Residual::Distance(d) => d.evaluate(values),
            Residual::EqualDistance => distance::evaluate_equal_distance(values),
            Residual::DistanceRatio { target } => {
                distance::evaluate_distance_ratio(values, *target)
            }
            Residual::Angle(a) => a.evaluate(values),
            Residual::AxisAlignment(a) => a.evaluate(values),
            Residual::Collinear { .. } => incidence::evaluate_collinear(values),
            Residual::Coplanar { .. } => incidence::evaluate_coplanar(values),
            Residual::PointOnLine => incidence::evaluate_point_on_line(values),
            Residual::PointOnPlane => incidence::evaluate_point_on_plane(values),
            Residual::PointOnCircle(circle) => circle.evaluate(values),
            Residual::PointOnSphere => incidence::evaluate_point_on_sphere(values),
            Residual::PointEquality => position::evaluate_point_equality(values),
            Residual::Rectangle { aspect_ratio } => {
                composite::evaluate_rectangle(values, *aspect_ratio)
            }
            Residual::MirrorSymmetry { n_pairs } => {
                composite::evaluate_mirror_symmetry(values, *n_pairs)
            }
            Residual::EqualSpacing { .. } => composite::evaluate_equal_spacing(values),
        }
    }

    /// One Jacobian block per variable, each of shape `(dim, variable len)`.
    ///
    /// Analytic where an override exists, central finite differences
    /// otherwise. Degenerate configurations return all-zero blocks.
    pub fn jacobian(&self, values: &[DVector<f64>]) -> Vec<DMatrix<f64>> {
        match self {
            Residual::KnownCoordinate(kc) => kc.jacobian(values),
            Residual::Distance(d) => d.jacobian(values),
            Residual::PointEquality => position::point_equality_jacobian(),
            Residual::Reprojection(r) => {
                if r.is_degenerate(values) {
                    self.zero_blocks(values)
                } else {
                    self.finite_difference_blocks(values)
                }
            }
            _ => self.finite_difference_blocks(values),
        }
    }

    fn zero_blocks(&self, values: &[DVector<f64>]) -> Vec<DMatrix<f64>> {
        values
            .iter()
            .map(|v| DMatrix::zeros(self.dim(), v.len()))
            .collect()
    }

    /// Default Jacobian: pack all variables, differentiate, split columns.
    fn finite_difference_blocks(&self, values: &[DVector<f64>]) -> Vec<DMatrix<f64>> {
        let sizes: Vec<usize> = values.iter().map(|v| v.len()).collect();
        let total: usize = sizes.iter().sum();

        let mut packed = DVector::zeros(total);
        let mut offset = 0;
        for value in values {
            packed.rows_mut(offset, value.len()).copy_from(value);
            offset += value.len();
        }

        let func = |x: &DVector<f64>| {
            let mut split = Vec::with_capacity(sizes.len());
            let mut at = 0;
            for &size in &sizes {
                split.push(DVector::from(x.rows(at, size).clone_owned()));
                at += size;
            }
            self.evaluate(&split)
        };

        let full = finite_difference_jacobian(func, &packed, DEFAULT_FD_STEP);

        let mut blocks = Vec::with_capacity(sizes.len());
        let mut at = 0;
        for &size in &sizes {
            blocks.push(full.columns(at, size).clone_owned());
            at += size;
        }
        blocks
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
    fn test_dims_match_evaluation() {
        let cases: Vec<(Residual, Vec<DVector<f64>>)> = vec![
            (
                Residual::Distance(Distance::new(1.0)),
                vec![point(0.0, 0.0, 0.0), point(1.0, 0.0, 0.0)],
            ),
            (
                Residual::EqualDistance,
                vec![
                    point(0.0, 0.0, 0.0),
                    point(1.0, 0.0, 0.0),
                    point(0.0, 1.0, 0.0),
                    point(0.0, 3.0, 0.0),
                ],
            ),
            (
                Residual::Collinear { n_points: 4 },
                vec![
                    point(0.0, 0.0, 0.0),
                    point(1.0, 0.0, 0.0),
                    point(2.0, 0.1, 0.0),
                    point(3.0, 0.0, 0.2),
                ],
            ),
            (
                Residual::Rectangle { aspect_ratio: Some(1.0) },
                vec![
                    point(0.0, 0.0, 0.0),
                    point(1.0, 0.0, 0.0),
                    point(1.0, 1.0, 0.0),
                    point(0.0, 1.0, 0.0),
                ],
            ),
            (
                Residual::MirrorSymmetry { n_pairs: 1 },
                vec![
                    point(0.0, 0.0, 0.0),
                    point(1.0, 0.0, 0.0),
                    point(0.0, 1.0, 0.0),
                    point(0.5, 0.5, 1.0),
                    point(0.5, 0.5, -1.0),
                ],
            ),
        ];
        for (residual, values) in &cases {
            assert_eq!(values.len(), residual.arity(), "{}", residual.name());
            assert_eq!(
                residual.evaluate(values).len(),
                residual.dim(),
                "{}",
                residual.name()
            );
        }
    }

    #[test]
    fn test_finite_difference_matches_analytic_distance() {
        let residual = Residual::Distance(Distance::new(2.0));
        let values = vec![point(0.3, -0.2, 0.9), point(1.4, 0.5, -0.1)];
        let analytic = residual.jacobian(&values);
        let numeric = residual.finite_difference_blocks(&values);
        for (a, n) in analytic.iter().zip(numeric.iter()) {
            assert_relative_eq!(a, n, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_finite_difference_matches_analytic_equality() {
        let residual = Residual::PointEquality;
        let values = vec![point(0.3, -0.2, 0.9), point(1.4, 0.5, -0.1)];
        let analytic = residual.jacobian(&values);
        let numeric = residual.finite_difference_blocks(&values);
        for (a, n) in analytic.iter().zip(numeric.iter()) {
            assert_relative_eq!(a, n, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_jacobian_block_shapes() {
        let residual = Residual::Coplanar { n_points: 5 };
        let values = vec![
            point(0.0, 0.0, 0.0),
            point(1.0, 0.0, 0.0),
            point(0.0, 1.0, 0.0),
            point(1.0, 1.0, 0.1),
            point(2.0, -1.0, -0.1),
        ];
        let blocks = residual.jacobian(&values);
        assert_eq!(blocks.len(), 5);
        for block in &blocks {
            assert_eq!(block.nrows(), residual.dim());
            assert_eq!(block.ncols(), 3);
        }
    }
}
