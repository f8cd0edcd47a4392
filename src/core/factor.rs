//! Factors: residual functors bound to named variables, with an
//! optional robust loss.

use nalgebra::{DMatrix, DVector};

use crate::error::{PrismError, PrismResult};
use crate::math::robust::RobustLoss;
use crate::residuals::Residual;

/// A residual term over an ordered set of variables.
///
/// A factor is a pure function from the current values of its variables
/// to a residual vector and per-variable Jacobian blocks; it carries no
/// other state. The robust loss reweights both the residual and the
/// Jacobian rows.
#[derive(Debug, Clone)]
pub struct Factor {
    id: String,
    variables: Vec<String>,
    residual: Residual,
    loss: RobustLoss,
}

impl Factor {
    /// Create a factor; fails if the variable count does not match the
    /// residual's arity or falls below the family's minimum.
    pub fn new(
        id: impl Into<String>,
        variables: Vec<String>,
        residual: Residual,
    ) -> PrismResult<Self> {
        let id = id.into();
        if residual.arity() < residual.min_arity() {
            return Err(PrismError::InvalidInput(format!(
                "factor '{id}' ({}) requires at least {} variables, got {}",
                residual.name(),
                residual.min_arity(),
                residual.arity()
            )));
        }
        if variables.len() != residual.arity() {
            return Err(PrismError::InvalidInput(format!(
                "factor '{id}' ({}) requires {} variables, got {}",
                residual.name(),
                residual.arity(),
                variables.len()
            )));
        }
        Ok(Factor {
            id,
            variables,
            residual,
            loss: RobustLoss::None,
        })
    }

    pub fn with_loss(mut self, loss: RobustLoss) -> Self {
        self.loss = loss;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn residual(&self) -> &Residual {
        &self.residual
    }

    pub fn loss(&self) -> RobustLoss {
        self.loss
    }

    pub fn set_loss(&mut self, loss: RobustLoss) {
        self.loss = loss;
    }

    /// Residual dimension, fixed at construction.
    pub fn dim(&self) -> usize {
        self.residual.dim()
    }

    /// Loss-reweighted residual for the given ordered variable values.
    pub fn weighted_residual(&self, values: &[DVector<f64>]) -> DVector<f64> {
        let (reweighted, _) = self.loss.apply(&self.residual.evaluate(values));
        reweighted
    }

    /// Loss-reweighted residual and Jacobian blocks.
    ///
    /// Every block has shape `(dim, variable size)`; the loss weights
    /// scale the matching rows of each block.
    pub fn weighted_residual_and_jacobian(
        &self,
        values: &[DVector<f64>],
    ) -> (DVector<f64>, Vec<DMatrix<f64>>) {
        let raw = self.residual.evaluate(values);
        let (reweighted, weights) = self.loss.apply(&raw);

        let mut blocks = self.residual.jacobian(values);
        if !matches!(self.loss, RobustLoss::None) {
            for block in &mut blocks {
                for (row, weight) in weights.iter().enumerate() {
                    for col in 0..block.ncols() {
                        block[(row, col)] *= weight;
                    }
                }
            }
        }

        (reweighted, blocks)
    }
}
