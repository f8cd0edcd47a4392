//! Numerical Jacobians by central finite differences.

use nalgebra::{DMatrix, DVector};

/// Default perturbation step for finite differences.
pub const DEFAULT_FD_STEP: f64 = 1e-8;

/// Central finite-difference Jacobian of `func` at `x`.
///
/// `J[i, j] = d f_i / d x_j`, approximated as
/// `(f(x + h e_j) - f(x - h e_j)) / (2h)`.
pub fn finite_difference_jacobian<F>(func: F, x: &DVector<f64>, h: f64) -> DMatrix<f64>
where
    F: Fn(&DVector<f64>) -> DVector<f64>,
{
    let f0 = func(x);
    let m = f0.len();
    let n = x.len();
    let mut jacobian = DMatrix::zeros(m, n);

    let mut x_plus = x.clone();
    let mut x_minus = x.clone();
    for j in 0..n {
        x_plus[j] = x[j] + h;
        x_minus[j] = x[j] - h;
        let f_plus = func(&x_plus);
        let f_minus = func(&x_minus);
        for i in 0..m {
            jacobian[(i, j)] = (f_plus[i] - f_minus[i]) / (2.0 * h);
        }
        x_plus[j] = x[j];
        x_minus[j] = x[j];
    }

    jacobian
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_linear_function() {
        // f(x) = [2x0 + x1, -x1]
        let f = |x: &DVector<f64>| DVector::from_vec(vec![2.0 * x[0] + x[1], -x[1]]);
        let x = DVector::from_vec(vec![1.0, 3.0]);
        let j = finite_difference_jacobian(f, &x, DEFAULT_FD_STEP);
        assert_relative_eq!(j[(0, 0)], 2.0, epsilon = 1e-6);
        assert_relative_eq!(j[(0, 1)], 1.0, epsilon = 1e-6);
        assert_relative_eq!(j[(1, 0)], 0.0, epsilon = 1e-6);
        assert_relative_eq!(j[(1, 1)], -1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_nonlinear_function() {
        // f(x) = [x0^2], df/dx0 = 2 x0
        let f = |x: &DVector<f64>| DVector::from_vec(vec![x[0] * x[0]]);
        let x = DVector::from_vec(vec![1.5]);
        let j = finite_difference_jacobian(f, &x, DEFAULT_FD_STEP);
        assert_relative_eq!(j[(0, 0)], 3.0, epsilon = 1e-6);
    }
}
