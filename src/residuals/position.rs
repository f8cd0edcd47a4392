//! Coordinate-pinning residuals: masked known coordinates and point merges.

use nalgebra::{DMatrix, DVector};

use crate::error::{PrismError, PrismResult};
use crate::residuals::as_point;

/// Masked identity residual pinning selected axes of one point.
///
/// Residual element `k` is `target_k - value_axis(k)` over the masked
/// axes; the Jacobian is the corresponding `-1` entries.
#[derive(Debug, Clone, PartialEq)]
pub struct KnownCoordinate {
    /// `(axis index, target value)` pairs, axis in `0..3`.
    targets: Vec<(usize, f64)>,
}

impl KnownCoordinate {
    /// Pin the given axes; fails on an empty mask, an axis outside
    /// `0..3`, or the same axis pinned twice.
    pub fn new(targets: Vec<(usize, f64)>) -> PrismResult<Self> {
        if targets.is_empty() {
            return Err(PrismError::InvalidInput(
                "known-coordinate mask must pin at least one axis".to_string(),
            ));
        }
        let mut seen = [false; 3];
        for &(axis, _) in &targets {
            if axis > 2 {
                return Err(PrismError::InvalidInput(format!(
                    "known-coordinate axis must be 0..3, got {axis}"
                )));
            }
            if seen[axis] {
                return Err(PrismError::InvalidInput(format!(
                    "known-coordinate axis {axis} pinned more than once"
                )));
            }
            seen[axis] = true;
        }
        Ok(KnownCoordinate { targets })
    }

    /// Pin all three axes to a target position.
    pub fn full(x: f64, y: f64, z: f64) -> Self {
        KnownCoordinate {
            targets: vec![(0, x), (1, y), (2, z)],
        }
    }

    pub fn masked_axes(&self) -> impl Iterator<Item = usize> + '_ {
        self.targets.iter().map(|&(axis, _)| axis)
    }

    /// True when all three axes are pinned.
    pub fn is_fully_pinned(&self) -> bool {
        let mut seen = [false; 3];
        for &(axis, _) in &self.targets {
            seen[axis] = true;
        }
        seen.iter().all(|s| *s)
    }

    pub(crate) fn dim(&self) -> usize {
        self.targets.len()
    }

    pub(crate) fn evaluate(&self, values: &[DVector<f64>]) -> DVector<f64> {
        let point = &values[0];
        DVector::from_iterator(
            self.targets.len(),
            self.targets.iter().map(|&(axis, target)| target - point[axis]),
        )
    }

    pub(crate) fn jacobian(&self, values: &[DVector<f64>]) -> Vec<DMatrix<f64>> {
        let mut block = DMatrix::zeros(self.targets.len(), values[0].len());
        for (row, &(axis, _)) in self.targets.iter().enumerate() {
            block[(row, axis)] = -1.0;
        }
        vec![block]
    }
}

/// `a - b` for a pair of points that should coincide.
pub(crate) fn evaluate_point_equality(values: &[DVector<f64>]) -> DVector<f64> {
    let diff = as_point(&values[0]) - as_point(&values[1]);
    DVector::from_vec(vec![diff.x, diff.y, diff.z])
}

/// Analytic Jacobian of the point-equality residual: `[I, -I]`.
pub(crate) fn point_equality_jacobian() -> Vec<DMatrix<f64>> {
    vec![DMatrix::identity(3, 3), -DMatrix::identity(3, 3)]
}
