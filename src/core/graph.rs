//! Factor graph: owns variables and factors, evaluates the stacked
//! residual vector and Jacobian.
//!
//! Insertion order is preserved for both variables and factors so the
//! parameter-vector layout and residual stacking are deterministic.
//! Factor evaluation is a rayon parallel map; assembly happens in
//! insertion order afterwards, so the observable ordering never changes.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use tracing::debug;

use crate::core::factor::Factor;
use crate::core::variable::{Variable, VariableKind};
use crate::error::{PrismError, PrismResult};

/// Graph of optimization variables connected by residual factors.
#[derive(Debug, Clone, Default)]
pub struct FactorGraph {
    variables: HashMap<String, Variable>,
    variable_order: Vec<String>,
    factors: HashMap<String, Factor>,
    factor_order: Vec<String>,
}

impl FactorGraph {
    pub fn new() -> Self {
        FactorGraph::default()
    }

    /// Add a variable; fails on a duplicate id.
    pub fn add_variable(&mut self, variable: Variable) -> PrismResult<()> {
        let id = variable.id().to_string();
        if self.variables.contains_key(&id) {
            return Err(PrismError::Graph(format!("duplicate variable id '{id}'")));
        }
        self.variable_order.push(id.clone());
        self.variables.insert(id, variable);
        Ok(())
    }

    /// Add a factor; fails on a duplicate id or a reference to an
    /// unknown variable.
    pub fn add_factor(&mut self, factor: Factor) -> PrismResult<()> {
        let id = factor.id().to_string();
        if self.factors.contains_key(&id) {
            return Err(PrismError::Graph(format!("duplicate factor id '{id}'")));
        }
        for variable_id in factor.variables() {
            if !self.variables.contains_key(variable_id) {
                return Err(PrismError::Graph(format!(
                    "factor '{id}' references unknown variable '{variable_id}'"
                )));
            }
        }
        self.factor_order.push(id.clone());
        self.factors.insert(id, factor);
        Ok(())
    }

    pub fn variable(&self, id: &str) -> Option<&Variable> {
        self.variables.get(id)
    }

    pub fn factor(&self, id: &str) -> Option<&Factor> {
        self.factors.get(id)
    }

    pub fn has_variable(&self, id: &str) -> bool {
        self.variables.contains_key(id)
    }

    pub fn num_variables(&self) -> usize {
        self.variable_order.len()
    }

    pub fn num_factors(&self) -> usize {
        self.factor_order.len()
    }

    /// Variable ids in insertion order.
    pub fn variable_ids(&self) -> impl Iterator<Item = &str> {
        self.variable_order.iter().map(String::as_str)
    }

    /// Factor ids in insertion order.
    pub fn factor_ids(&self) -> impl Iterator<Item = &str> {
        self.factor_order.iter().map(String::as_str)
    }

    /// Overwrite the value of one variable (clamped to its bounds).
    pub fn set_variable_value(&mut self, id: &str, value: DVector<f64>) -> PrismResult<()> {
        let variable = self
            .variables
            .get_mut(id)
            .ok_or_else(|| PrismError::Graph(format!("unknown variable '{id}'")))?;
        if value.len() != variable.size() {
            return Err(PrismError::Graph(format!(
                "variable '{id}' requires {} values, got {}",
                variable.size(),
                value.len()
            )));
        }
        variable.set_value(value);
        Ok(())
    }

    /// Total dimension of all non-frozen variables.
    pub fn free_dimension(&self) -> usize {
        self.free_variables().map(|v| v.size()).sum()
    }

    /// Total stacked residual dimension of all factors.
    pub fn total_residual_dimension(&self) -> usize {
        self.factor_order
            .iter()
            .map(|id| self.factors[id].dim())
            .sum()
    }

    fn free_variables(&self) -> impl Iterator<Item = &Variable> {
        self.variable_order
            .iter()
            .map(|id| &self.variables[id])
            .filter(|v| !v.is_frozen())
    }

    /// Concatenate the current values of all non-frozen variables in
    /// insertion order.
    pub fn pack_variables(&self) -> DVector<f64> {
        let mut packed = DVector::zeros(self.free_dimension());
        let mut offset = 0;
        for variable in self.free_variables() {
            packed
                .rows_mut(offset, variable.size())
                .copy_from(variable.value());
            offset += variable.size();
        }
        packed
    }

    /// Write a flat parameter vector back into the non-frozen variables,
    /// clamping each to its bounds. Fails if the length does not match
    /// the free dimension.
    pub fn unpack_variables(&mut self, packed: &DVector<f64>) -> PrismResult<()> {
        let expected = self.free_dimension();
        if packed.len() != expected {
            return Err(PrismError::Graph(format!(
                "parameter vector has length {}, expected {expected}",
                packed.len()
            )));
        }
        let mut offset = 0;
        for id in self.variable_order.clone() {
            let variable = self
                .variables
                .get_mut(&id)
                .ok_or_else(|| PrismError::Graph(format!("unknown variable '{id}'")))?;
            if variable.is_frozen() {
                continue;
            }
            let size = variable.size();
            variable.set_value(packed.rows(offset, size).clone_owned());
            offset += size;
        }
        Ok(())
    }

    /// Concatenated lower/upper bound vectors over the free variables,
    /// `(-inf, +inf)` where no explicit bounds were set.
    pub fn variable_bounds(&self) -> (DVector<f64>, DVector<f64>) {
        let n = self.free_dimension();
        let mut lower = DVector::from_element(n, f64::NEG_INFINITY);
        let mut upper = DVector::from_element(n, f64::INFINITY);
        let mut offset = 0;
        for variable in self.free_variables() {
            for k in 0..variable.size() {
                let (lo, hi) = variable.component_bounds(k);
                lower[offset + k] = lo;
                upper[offset + k] = hi;
            }
            offset += variable.size();
        }
        (lower, upper)
    }

    /// True when any free variable carries a finite bound.
    pub fn has_finite_bounds(&self) -> bool {
        let (lower, upper) = self.variable_bounds();
        lower.iter().any(|v| v.is_finite()) || upper.iter().any(|v| v.is_finite())
    }

    /// Column offset of each non-frozen variable in the packed vector.
    fn free_offsets(&self) -> HashMap<&str, usize> {
        let mut offsets = HashMap::new();
        let mut offset = 0;
        for variable in self.free_variables() {
            offsets.insert(variable.id(), offset);
            offset += variable.size();
        }
        offsets
    }

    /// Column offset and size of each non-frozen variable in the packed
    /// vector, in insertion order.
    pub fn free_variable_layout(&self) -> Vec<(String, usize, usize)> {
        let mut layout = Vec::new();
        let mut offset = 0;
        for variable in self.free_variables() {
            layout.push((variable.id().to_string(), offset, variable.size()));
            offset += variable.size();
        }
        layout
    }

    /// Row offset and dimension of each factor in the stacked residual,
    /// in build order.
    pub fn factor_slices(&self) -> Vec<(String, usize, usize)> {
        let mut slices = Vec::with_capacity(self.factor_order.len());
        let mut row = 0;
        for id in &self.factor_order {
            let dim = self.factors[id].dim();
            slices.push((id.clone(), row, dim));
            row += dim;
        }
        slices
    }

    fn factor_values(&self, factor: &Factor) -> Vec<DVector<f64>> {
        factor
            .variables()
            .iter()
            .map(|id| self.variables[id].value().clone())
            .collect()
    }

    /// Stacked loss-adjusted residual of every factor in insertion order.
    pub fn compute_all_residuals(&self) -> DVector<f64> {
        let per_factor: Vec<DVector<f64>> = self
            .factor_order
            .par_iter()
            .map(|id| {
                let factor = &self.factors[id];
                factor.weighted_residual(&self.factor_values(factor))
            })
            .collect();

        let total = per_factor.iter().map(|r| r.len()).sum();
        let mut stacked = DVector::zeros(total);
        let mut row = 0;
        for residual in &per_factor {
            stacked.rows_mut(row, residual.len()).copy_from(residual);
            row += residual.len();
        }
        stacked
    }

    /// Stacked residual and dense Jacobian over the free variables.
    ///
    /// Each factor's blocks scatter into the columns of its non-frozen
    /// variables; frozen variables contribute no columns.
    pub fn compute_residuals_and_jacobian(&self) -> (DVector<f64>, DMatrix<f64>) {
        let offsets = self.free_offsets();
        let m = self.total_residual_dimension();
        let n = self.free_dimension();

        let per_factor: Vec<(DVector<f64>, Vec<DMatrix<f64>>)> = self
            .factor_order
            .par_iter()
            .map(|id| {
                let factor = &self.factors[id];
                factor.weighted_residual_and_jacobian(&self.factor_values(factor))
            })
            .collect();

        let mut residuals = DVector::zeros(m);
        let mut jacobian = DMatrix::zeros(m, n);
        let mut row = 0;
        for (factor_id, (residual, blocks)) in self.factor_order.iter().zip(per_factor) {
            let factor = &self.factors[factor_id];
            residuals.rows_mut(row, residual.len()).copy_from(&residual);
            for (variable_id, block) in factor.variables().iter().zip(blocks) {
                if let Some(&col) = offsets.get(variable_id.as_str()) {
                    jacobian
                        .view_mut((row, col), (block.nrows(), block.ncols()))
                        .copy_from(&block);
                }
            }
            row += residual.len();
        }

        debug!(rows = m, cols = n, "evaluated residuals and jacobian");
        (residuals, jacobian)
    }

    /// Row/column index pairs of the structurally non-zero Jacobian
    /// entries implied by each factor's variable set.
    pub fn jacobian_structure(&self) -> Vec<(usize, usize)> {
        let offsets = self.free_offsets();
        let mut structure = Vec::new();
        let mut row = 0;
        for factor_id in &self.factor_order {
            let factor = &self.factors[factor_id];
            for variable_id in factor.variables() {
                if let Some(&col) = offsets.get(variable_id.as_str()) {
                    let size = self.variables[variable_id].size();
                    for r in 0..factor.dim() {
                        for c in 0..size {
                            structure.push((row + r, col + c));
                        }
                    }
                }
            }
            row += factor.dim();
        }
        structure
    }

    /// Half the squared norm of the current stacked residual.
    pub fn current_cost(&self) -> f64 {
        let residuals = self.compute_all_residuals();
        0.5 * residuals.norm_squared()
    }

    /// Aggregate counts by variable and factor kind.
    pub fn summary(&self) -> GraphSummary {
        let mut variables_by_kind: BTreeMap<VariableKind, usize> = BTreeMap::new();
        let mut frozen_variables = 0;
        for id in &self.variable_order {
            let variable = &self.variables[id];
            *variables_by_kind.entry(variable.kind()).or_insert(0) += 1;
            if variable.is_frozen() {
                frozen_variables += 1;
            }
        }

        let mut factors_by_kind: BTreeMap<&'static str, usize> = BTreeMap::new();
        for id in &self.factor_order {
            *factors_by_kind
                .entry(self.factors[id].residual().name())
                .or_insert(0) += 1;
        }

        GraphSummary {
            num_variables: self.variable_order.len(),
            num_factors: self.factor_order.len(),
            frozen_variables,
            free_dimension: self.free_dimension(),
            residual_dimension: self.total_residual_dimension(),
            variables_by_kind,
            factors_by_kind,
        }
    }
}

/// Aggregate graph statistics for observability.
#[derive(Debug, Clone)]
pub struct GraphSummary {
    pub num_variables: usize,
    pub num_factors: usize,
    pub frozen_variables: usize,
    pub free_dimension: usize,
    pub residual_dimension: usize,
    pub variables_by_kind: BTreeMap<VariableKind, usize>,
    pub factors_by_kind: BTreeMap<&'static str, usize>,
}

impl fmt::Display for GraphSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Factor Graph Summary")?;
        writeln!(
            f,
            "  variables: {} ({} frozen), free dimension {}",
            self.num_variables, self.frozen_variables, self.free_dimension
        )?;
        writeln!(
            f,
            "  factors:   {}, residual dimension {}",
            self.num_factors, self.residual_dimension
        )?;
        for (kind, count) in &self.variables_by_kind {
            writeln!(f, "    {kind}: {count}")?;
        }
        for (kind, count) in &self.factors_by_kind {
            writeln!(f, "    {kind}: {count}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::residuals::{Distance, KnownCoordinate, Residual};
    use approx::assert_relative_eq;

    fn point_variable(id: &str, x: f64, y: f64, z: f64) -> Variable {
        Variable::new(id, VariableKind::Point, DVector::from_vec(vec![x, y, z])).unwrap()
    }

    fn two_point_graph() -> FactorGraph {
        let mut graph = FactorGraph::new();
        graph.add_variable(point_variable("a", 0.0, 0.0, 0.0)).unwrap();
        graph.add_variable(point_variable("b", 1.0, 0.0, 0.0)).unwrap();
        graph
            .add_factor(
                Factor::new(
                    "d0",
                    vec!["a".to_string(), "b".to_string()],
                    Residual::Distance(Distance::new(2.0)),
                )
                .unwrap(),
            )
            .unwrap();
        graph
    }

    #[test]
    fn test_duplicate_variable_rejected() {
        let mut graph = FactorGraph::new();
        graph.add_variable(point_variable("a", 0.0, 0.0, 0.0)).unwrap();
        assert!(graph.add_variable(point_variable("a", 1.0, 0.0, 0.0)).is_err());
    }

    #[test]
    fn test_unknown_variable_rejected() {
        let mut graph = FactorGraph::new();
        graph.add_variable(point_variable("a", 0.0, 0.0, 0.0)).unwrap();
        let factor = Factor::new(
            "d0",
            vec!["a".to_string(), "missing".to_string()],
            Residual::Distance(Distance::new(1.0)),
        )
        .unwrap();
        assert!(graph.add_factor(factor).is_err());
    }

    #[test]
    fn test_pack_unpack_roundtrip() {
        let mut graph = two_point_graph();
        let original = graph.pack_variables();
        assert_eq!(original.len(), 6);

        let perturbed = &original + DVector::from_element(6, 0.25);
        graph.unpack_variables(&perturbed).unwrap();
        graph.unpack_variables(&original).unwrap();
        assert_relative_eq!(graph.pack_variables(), original, epsilon = 1e-15);
    }

    #[test]
    fn test_unpack_length_mismatch() {
        let mut graph = two_point_graph();
        assert!(graph.unpack_variables(&DVector::zeros(5)).is_err());
    }

    #[test]
    fn test_frozen_variables_excluded_from_packing() {
        let mut graph = FactorGraph::new();
        graph
            .add_variable(point_variable("a", 1.0, 2.0, 3.0).with_frozen(true))
            .unwrap();
        graph.add_variable(point_variable("b", 0.0, 0.0, 0.0)).unwrap();
        assert_eq!(graph.free_dimension(), 3);

        graph
            .unpack_variables(&DVector::from_vec(vec![9.0, 9.0, 9.0]))
            .unwrap();
        assert_relative_eq!(graph.variable("a").unwrap().value()[0], 1.0);
        assert_relative_eq!(graph.variable("b").unwrap().value()[0], 9.0);
    }

    #[test]
    fn test_bounds_assembly() {
        let mut graph = FactorGraph::new();
        graph
            .add_variable(
                point_variable("a", 0.0, 0.0, 0.0)
                    .with_bounds(vec![(-1.0, 1.0), (0.0, 2.0), (-3.0, 3.0)])
                    .unwrap(),
            )
            .unwrap();
        graph.add_variable(point_variable("b", 0.0, 0.0, 0.0)).unwrap();

        let (lower, upper) = graph.variable_bounds();
        assert_eq!(lower.len(), 6);
        assert_relative_eq!(lower[1], 0.0);
        assert_relative_eq!(upper[2], 3.0);
        assert_eq!(lower[3], f64::NEG_INFINITY);
        assert_eq!(upper[5], f64::INFINITY);
        assert!(graph.has_finite_bounds());
    }

    #[test]
    fn test_residual_stacking_order() {
        let mut graph = two_point_graph();
        graph
            .add_factor(
                Factor::new(
                    "pin_a",
                    vec!["a".to_string()],
                    Residual::KnownCoordinate(KnownCoordinate::full(0.0, 0.0, 0.0)),
                )
                .unwrap(),
            )
            .unwrap();

        let residuals = graph.compute_all_residuals();
        assert_eq!(residuals.len(), 4);
        // Distance factor first (build order), then the pin.
        assert_relative_eq!(residuals[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(residuals.rows(1, 3).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_jacobian_shape_and_structure() {
        let graph = two_point_graph();
        let (residuals, jacobian) = graph.compute_residuals_and_jacobian();
        assert_eq!(residuals.len(), 1);
        assert_eq!(jacobian.shape(), (1, 6));

        let structure = graph.jacobian_structure();
        assert_eq!(structure.len(), 6);
        assert!(structure.contains(&(0, 0)));
        assert!(structure.contains(&(0, 5)));
    }

    #[test]
    fn test_structure_skips_frozen_columns() {
        let mut graph = FactorGraph::new();
        graph
            .add_variable(point_variable("a", 0.0, 0.0, 0.0).with_frozen(true))
            .unwrap();
        graph.add_variable(point_variable("b", 1.0, 0.0, 0.0)).unwrap();
        graph
            .add_factor(
                Factor::new(
                    "d0",
                    vec!["a".to_string(), "b".to_string()],
                    Residual::Distance(Distance::new(2.0)),
                )
                .unwrap(),
            )
            .unwrap();

        let structure = graph.jacobian_structure();
        assert_eq!(structure.len(), 3);
        let (_, jacobian) = graph.compute_residuals_and_jacobian();
        assert_eq!(jacobian.ncols(), 3);
    }

    #[test]
    fn test_summary_counts() {
        let graph = two_point_graph();
        let summary = graph.summary();
        assert_eq!(summary.num_variables, 2);
        assert_eq!(summary.num_factors, 1);
        assert_eq!(summary.variables_by_kind[&VariableKind::Point], 2);
        assert_eq!(summary.factors_by_kind["distance"], 1);
        assert!(summary.to_string().contains("distance"));
    }
}
