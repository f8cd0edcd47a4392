//! Optimization variables: typed, sized, optionally frozen or bounded.

use std::fmt;

use nalgebra::DVector;

use crate::error::{PrismError, PrismResult};

/// Variable type tag; the tag fixes the dimensionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VariableKind {
    /// 3D world point.
    Point,
    /// Camera rotation as a scaled axis-angle vector.
    CameraRotation,
    /// Camera translation (world-to-camera).
    CameraTranslation,
    /// Camera intrinsics `[fx, fy, cx, cy, k1, k2]`.
    CameraIntrinsics,
}

impl VariableKind {
    /// Dimensionality of a variable of this kind; never changes.
    pub fn size(&self) -> usize {
        match self {
            VariableKind::Point => 3,
            VariableKind::CameraRotation => 3,
            VariableKind::CameraTranslation => 3,
            VariableKind::CameraIntrinsics => 6,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VariableKind::Point => "point",
            VariableKind::CameraRotation => "camera_rotation",
            VariableKind::CameraTranslation => "camera_translation",
            VariableKind::CameraIntrinsics => "camera_intrinsics",
        }
    }
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A single optimization variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    id: String,
    kind: VariableKind,
    value: DVector<f64>,
    frozen: bool,
    bounds: Option<Vec<(f64, f64)>>,
}

impl Variable {
    /// Create a variable; fails if the value length does not match the
    /// kind's declared size.
    pub fn new(id: impl Into<String>, kind: VariableKind, value: DVector<f64>) -> PrismResult<Self> {
        let id = id.into();
        if value.len() != kind.size() {
            return Err(PrismError::InvalidInput(format!(
                "variable '{id}' of kind {kind} requires {} values, got {}",
                kind.size(),
                value.len()
            )));
        }
        Ok(Variable {
            id,
            kind,
            value,
            frozen: false,
            bounds: None,
        })
    }

    /// Freeze the variable: excluded from the parameter vector but still
    /// readable by factors.
    pub fn with_frozen(mut self, frozen: bool) -> Self {
        self.frozen = frozen;
        self
    }

    /// Attach per-component bounds; fails on a length mismatch or an
    /// inverted interval.
    pub fn with_bounds(mut self, bounds: Vec<(f64, f64)>) -> PrismResult<Self> {
        if bounds.len() != self.kind.size() {
            return Err(PrismError::InvalidInput(format!(
                "variable '{}' requires {} bound pairs, got {}",
                self.id,
                self.kind.size(),
                bounds.len()
            )));
        }
        for &(lower, upper) in &bounds {
            if lower > upper {
                return Err(PrismError::InvalidInput(format!(
                    "variable '{}' has inverted bounds ({lower}, {upper})",
                    self.id
                )));
            }
        }
        self.bounds = Some(bounds);
        Ok(self)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> VariableKind {
        self.kind
    }

    pub fn size(&self) -> usize {
        self.kind.size()
    }

    pub fn value(&self) -> &DVector<f64> {
        &self.value
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn bounds(&self) -> Option<&[(f64, f64)]> {
        self.bounds.as_deref()
    }

    /// Lower/upper bound for one component, `(-inf, +inf)` when unset.
    pub fn component_bounds(&self, index: usize) -> (f64, f64) {
        match &self.bounds {
            Some(bounds) => bounds[index],
            None => (f64::NEG_INFINITY, f64::INFINITY),
        }
    }

    /// Overwrite the value, clamping to bounds. Frozen variables are
    /// never mutated through the solver path; this is the raw setter.
    pub(crate) fn set_value(&mut self, value: DVector<f64>) {
        debug_assert_eq!(value.len(), self.kind.size());
        self.value = value;
        self.clamp_to_bounds();
    }

    fn clamp_to_bounds(&mut self) {
        if let Some(bounds) = &self.bounds {
            for (component, &(lower, upper)) in self.value.iter_mut().zip(bounds.iter()) {
                *component = component.clamp(lower, upper);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_kind_sizes() {
        assert_eq!(VariableKind::Point.size(), 3);
        assert_eq!(VariableKind::CameraRotation.size(), 3);
        assert_eq!(VariableKind::CameraTranslation.size(), 3);
        assert_eq!(VariableKind::CameraIntrinsics.size(), 6);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let result = Variable::new("p1", VariableKind::Point, DVector::zeros(4));
        assert!(result.is_err());
    }

    #[test]
    fn test_bounds_validation() {
        let var = Variable::new("p1", VariableKind::Point, DVector::zeros(3)).unwrap();
        assert!(var.clone().with_bounds(vec![(0.0, 1.0); 2]).is_err());
        assert!(var.clone().with_bounds(vec![(1.0, 0.0); 3]).is_err());
        assert!(var.with_bounds(vec![(-1.0, 1.0); 3]).is_ok());
    }

    #[test]
    fn test_set_value_clamps() {
        let mut var = Variable::new("p1", VariableKind::Point, DVector::zeros(3))
            .unwrap()
            .with_bounds(vec![(-1.0, 1.0); 3])
            .unwrap();
        var.set_value(DVector::from_vec(vec![2.0, -3.0, 0.5]));
        assert_relative_eq!(var.value()[0], 1.0);
        assert_relative_eq!(var.value()[1], -1.0);
        assert_relative_eq!(var.value()[2], 0.5);
    }

    #[test]
    fn test_default_bounds_are_infinite() {
        let var = Variable::new("p1", VariableKind::Point, DVector::zeros(3)).unwrap();
        let (lower, upper) = var.component_bounds(0);
        assert_eq!(lower, f64::NEG_INFINITY);
        assert_eq!(upper, f64::INFINITY);
    }

    #[test]
    fn test_frozen_flag() {
        let var = Variable::new("p1", VariableKind::Point, DVector::zeros(3))
            .unwrap()
            .with_frozen(true);
        assert!(var.is_frozen());
    }
}
