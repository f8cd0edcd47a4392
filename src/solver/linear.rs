//! Damped normal-equation solves for the trust-region methods.
//!
//! Two backends share the same contract: given the stacked Jacobian J,
//! residual r, and damping lambda, solve (J^T J + lambda I) dx = -J^T r
//! and return `None` when the factorization fails. The sparse backend
//! only touches entries named by the graph's structural pattern, which
//! pays off once the Jacobian is mostly block-diagonal.

use std::ops::Mul;

use faer::linalg::solvers::SpSolver;
use faer::sparse::linalg::solvers;
use nalgebra::{DMatrix, DVector};
use tracing::debug;

/// Which factorization backs the normal-equation solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinearSolverKind {
    /// Dense Cholesky with a QR fallback on indefiniteness.
    #[default]
    DenseCholesky,
    /// faer sparse LLT on the structural nonzero pattern.
    SparseCholesky,
}

/// Solve the damped normal equations with a dense factorization.
pub(crate) fn solve_dense(
    jacobian: &DMatrix<f64>,
    residual: &DVector<f64>,
    lambda: f64,
) -> Option<DVector<f64>> {
    let n = jacobian.ncols();
    let mut hessian = jacobian.transpose() * jacobian;
    for i in 0..n {
        hessian[(i, i)] += lambda;
    }
    let gradient = jacobian.transpose() * (-residual);

    if let Some(cholesky) = hessian.clone().cholesky() {
        return Some(cholesky.solve(&gradient));
    }
    debug!("dense Cholesky failed, falling back to QR");
    let qr = hessian.qr();
    qr.solve(&gradient)
}

/// Solve the damped normal equations through faer's sparse LLT,
/// assembling J only at the structural nonzeros.
pub(crate) fn solve_sparse(
    jacobian: &DMatrix<f64>,
    structure: &[(usize, usize)],
    residual: &DVector<f64>,
    lambda: f64,
) -> Option<DVector<f64>> {
    let m = jacobian.nrows();
    let n = jacobian.ncols();

    let mut triplets = Vec::with_capacity(structure.len());
    for &(row, col) in structure {
        triplets.push((row, col, jacobian[(row, col)]));
    }
    let jacobian_sparse =
        faer::sparse::SparseColMat::try_new_from_triplets(m, n, &triplets).ok()?;

    let mut residual_mat = faer::Mat::zeros(m, 1);
    for i in 0..m {
        residual_mat.write(i, 0, residual[i]);
    }

    let hessian = jacobian_sparse
        .as_ref()
        .transpose()
        .to_col_major()
        .ok()?
        .mul(jacobian_sparse.as_ref());
    let gradient = jacobian_sparse.as_ref().transpose().mul(-&residual_mat);

    let mut lambda_triplets = Vec::with_capacity(n);
    for i in 0..n {
        lambda_triplets.push((i, i, lambda));
    }
    let lambda_i = faer::sparse::SparseColMat::try_new_from_triplets(n, n, &lambda_triplets).ok()?;
    let augmented = hessian + lambda_i;

    // The damped pattern changes with lambda, so the symbolic analysis
    // is redone per call.
    let sym = solvers::SymbolicCholesky::try_new(augmented.symbolic(), faer::Side::Lower).ok()?;
    let cholesky =
        solvers::Cholesky::try_new_with_symbolic(sym, augmented.as_ref(), faer::Side::Lower).ok()?;
    let dx = cholesky.solve(gradient);

    let mut step = DVector::zeros(n);
    for i in 0..n {
        step[i] = dx.read(i, 0);
    }
    Some(step)
}

/// Dispatch on the configured backend.
pub(crate) fn solve_step(
    kind: LinearSolverKind,
    jacobian: &DMatrix<f64>,
    structure: &[(usize, usize)],
    residual: &DVector<f64>,
    lambda: f64,
) -> Option<DVector<f64>> {
    match kind {
        LinearSolverKind::DenseCholesky => solve_dense(jacobian, residual, lambda),
        LinearSolverKind::SparseCholesky => {
            solve_sparse(jacobian, structure, residual, lambda)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn toy_system() -> (DMatrix<f64>, DVector<f64>) {
        // Overdetermined 3x2 system with a unique least-squares solution.
        let jacobian = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let residual = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        (jacobian, residual)
    }

    #[test]
    fn test_dense_solves_normal_equations() {
        let (jacobian, residual) = toy_system();
        let step = solve_dense(&jacobian, &residual, 0.0).unwrap();
        // Verify J^T J dx = -J^T r directly.
        let lhs = jacobian.transpose() * &jacobian * &step;
        let rhs = jacobian.transpose() * (-&residual);
        assert_relative_eq!(lhs, rhs, epsilon = 1e-10);
    }

    #[test]
    fn test_sparse_matches_dense() {
        let (jacobian, residual) = toy_system();
        let structure = vec![(0, 0), (1, 1), (2, 0), (2, 1)];
        let dense = solve_dense(&jacobian, &residual, 1e-3).unwrap();
        let sparse = solve_sparse(&jacobian, &structure, &residual, 1e-3).unwrap();
        assert_relative_eq!(dense, sparse, epsilon = 1e-10);
    }

    #[test]
    fn test_damping_shrinks_step() {
        let (jacobian, residual) = toy_system();
        let light = solve_dense(&jacobian, &residual, 1e-8).unwrap();
        let heavy = solve_dense(&jacobian, &residual, 1e4).unwrap();
        assert!(heavy.norm() < light.norm());
    }
}
