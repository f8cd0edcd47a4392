//! Post-solve analysis of the factor graph.
//!
//! Computed once from the final linearization: per-constraint RMS
//! error, per-variable sigma estimates from the damped covariance,
//! numeric rank of the Jacobian, and the variables participating in
//! its nullspace (the gauge directions the constraints left free).

use std::fmt;

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::core::FactorGraph;

/// Entries reported in `top_residuals`.
pub(crate) const DEFAULT_TOP_K: usize = 10;

/// Regularization added to J^T J before inverting for covariance.
const COVARIANCE_DAMPING: f64 = 1e-6;

/// Singular values below `RANK_TOLERANCE * sigma_max` count as zero.
const RANK_TOLERANCE: f64 = 1e-6;

/// A free variable counts as nullspace-involved when the norm of its
/// rows in the nullspace basis exceeds this.
const NULLSPACE_PARTICIPATION: f64 = 0.1;

/// Quality report for a solved graph.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    /// RMS residual per factor id, in factor insertion order.
    pub constraint_rms: Vec<(String, f64)>,
    /// Per free variable: sqrt of the covariance diagonal, one value
    /// per component.
    pub variable_sigmas: Vec<(String, Vec<f64>)>,
    /// Numeric rank of the final Jacobian.
    pub rank: usize,
    /// Number of packed parameters (Jacobian columns).
    pub free_parameters: usize,
    /// Ids of free variables participating in the Jacobian nullspace.
    pub unconstrained_variables: Vec<String>,
    /// Worst factors by RMS, largest first, at most `top_k` entries.
    pub top_residuals: Vec<(String, f64)>,
}

impl Diagnostics {
    /// Analyze the graph at its current values.
    pub fn analyze(graph: &FactorGraph, top_k: usize) -> Self {
        let (residual, jacobian) = graph.compute_residuals_and_jacobian();
        let n = jacobian.ncols();

        let constraint_rms = per_factor_rms(graph, &residual);
        let mut top_residuals = constraint_rms.clone();
        top_residuals.sort_by(|a, b| b.1.total_cmp(&a.1));
        top_residuals.truncate(top_k);

        if n == 0 {
            return Diagnostics {
                constraint_rms,
                variable_sigmas: Vec::new(),
                rank: 0,
                free_parameters: 0,
                unconstrained_variables: Vec::new(),
                top_residuals,
            };
        }

        let layout = graph.free_variable_layout();
        let variable_sigmas = covariance_sigmas(&jacobian, &layout);
        let (rank, unconstrained_variables) = rank_and_nullspace(&jacobian, &layout);

        Diagnostics {
            constraint_rms,
            variable_sigmas,
            rank,
            free_parameters: n,
            unconstrained_variables,
            top_residuals,
        }
    }

    /// Whether the constraints pin down every free parameter.
    pub fn is_fully_constrained(&self) -> bool {
        self.rank == self.free_parameters
    }
}

fn per_factor_rms(graph: &FactorGraph, residual: &DVector<f64>) -> Vec<(String, f64)> {
    graph
        .factor_slices()
        .into_iter()
        .map(|(id, row, dim)| {
            let slice = residual.rows(row, dim);
            let rms = (slice.norm_squared() / dim as f64).sqrt();
            (id, rms)
        })
        .collect()
}

/// Sigmas from the diagonal of (J^T J + damping I)^-1, falling back to
/// the pseudo-inverse when the damped matrix is still not invertible.
fn covariance_sigmas(
    jacobian: &DMatrix<f64>,
    layout: &[(String, usize, usize)],
) -> Vec<(String, Vec<f64>)> {
    let n = jacobian.ncols();
    let mut hessian = jacobian.transpose() * jacobian;
    for i in 0..n {
        hessian[(i, i)] += COVARIANCE_DAMPING;
    }

    let covariance = match hessian.clone().try_inverse() {
        Some(inverse) => inverse,
        None => {
            debug!("damped Hessian not invertible, using pseudo-inverse");
            match hessian.pseudo_inverse(1e-12) {
                Ok(pinv) => pinv,
                Err(_) => return Vec::new(),
            }
        }
    };

    layout
        .iter()
        .map(|(id, offset, size)| {
            let sigmas = (0..*size)
                .map(|i| covariance[(offset + i, offset + i)].max(0.0).sqrt())
                .collect();
            (id.clone(), sigmas)
        })
        .collect()
}

fn rank_and_nullspace(
    jacobian: &DMatrix<f64>,
    layout: &[(String, usize, usize)],
) -> (usize, Vec<String>) {
    let n = jacobian.ncols();
    let svd = jacobian.clone().svd(false, true);
    let sigma_max = svd.singular_values.iter().cloned().fold(0.0, f64::max);
    if sigma_max <= 0.0 {
        let all = layout.iter().map(|(id, _, _)| id.clone()).collect();
        return (0, all);
    }

    let threshold = RANK_TOLERANCE * sigma_max;
    let rank = svd
        .singular_values
        .iter()
        .filter(|&&s| s > threshold)
        .count();

    if rank == n {
        return (rank, Vec::new());
    }

    // Rows of V^T beyond the rank span the nullspace; a variable is
    // unconstrained when its columns carry weight in that span.
    let v_t = match &svd.v_t {
        Some(v_t) => v_t,
        None => return (rank, Vec::new()),
    };
    let mut unconstrained = Vec::new();
    for (id, offset, size) in layout {
        let mut participation: f64 = 0.0;
        for row in rank..v_t.nrows() {
            for c in 0..*size {
                participation += v_t[(row, offset + c)].powi(2);
            }
        }
        if participation.sqrt() > NULLSPACE_PARTICIPATION {
            unconstrained.push(id.clone());
        }
    }
    (rank, unconstrained)
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Diagnostics")?;
        writeln!(
            f,
            "  rank: {}/{} ({})",
            self.rank,
            self.free_parameters,
            if self.is_fully_constrained() {
                "fully constrained"
            } else {
                "gauge freedom remains"
            }
        )?;
        if !self.unconstrained_variables.is_empty() {
            writeln!(
                f,
                "  unconstrained: {}",
                self.unconstrained_variables.join(", ")
            )?;
        }
        writeln!(f, "  worst constraints:")?;
        for (id, rms) in &self.top_residuals {
            writeln!(f, "    {id}: rms {rms:.6e}")?;
        }
        Ok(())
    }
}
