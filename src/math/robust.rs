//! Robust loss functions for outlier-tolerant optimization.
//!
//! Each loss maps a residual elementwise to a robustified cost `rho` and a
//! reweighting factor applied to both the residual and its Jacobian rows
//! (IRLS formulation). `Huber` is quadratic inside `|r| <= delta` and
//! linear beyond; `Cauchy` decays as `1/(1 + r^2/sigma^2)`.

use nalgebra::DVector;

use crate::error::{PrismError, PrismResult};

/// Selectable robust loss, applied per factor.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RobustLoss {
    /// Identity loss: `rho = 0.5 r^2`, weight 1.
    #[default]
    None,
    /// Huber loss with threshold `delta`.
    Huber { delta: f64 },
    /// Cauchy loss with scale `sigma`.
    Cauchy { sigma: f64 },
}

impl RobustLoss {
    /// Huber loss; fails for non-positive `delta`.
    pub fn huber(delta: f64) -> PrismResult<Self> {
        if delta <= 0.0 {
            return Err(PrismError::InvalidInput(format!(
                "Huber delta must be positive, got {delta}"
            )));
        }
        Ok(RobustLoss::Huber { delta })
    }

    /// Cauchy loss; fails for non-positive `sigma`.
    pub fn cauchy(sigma: f64) -> PrismResult<Self> {
        if sigma <= 0.0 {
            return Err(PrismError::InvalidInput(format!(
                "Cauchy sigma must be positive, got {sigma}"
            )));
        }
        Ok(RobustLoss::Cauchy { sigma })
    }

    /// Robustified cost of a single residual element.
    pub fn rho(&self, residual: f64) -> f64 {
        match *self {
            RobustLoss::None => 0.5 * residual * residual,
            RobustLoss::Huber { delta } => {
                let abs_r = residual.abs();
                if abs_r <= delta {
                    0.5 * residual * residual
                } else {
                    delta * (abs_r - 0.5 * delta)
                }
            }
            RobustLoss::Cauchy { sigma } => {
                let sigma2 = sigma * sigma;
                0.5 * sigma2 * (1.0 + residual * residual / sigma2).ln()
            }
        }
    }

    /// Reweighting factor for a single residual element.
    ///
    /// The zero-residual case returns exactly 1 for every loss,
    /// avoiding the 0/0 in the Huber outlier branch.
    pub fn weight(&self, residual: f64) -> f64 {
        match *self {
            RobustLoss::None => 1.0,
            RobustLoss::Huber { delta } => {
                let abs_r = residual.abs();
                if abs_r < 1e-12 || abs_r <= delta {
                    1.0
                } else {
                    delta / abs_r
                }
            }
            RobustLoss::Cauchy { sigma } => {
                1.0 / (1.0 + residual * residual / (sigma * sigma))
            }
        }
    }

    /// Apply the loss to a residual vector.
    ///
    /// Returns the reweighted residual and the per-element weights, which
    /// must also scale the corresponding Jacobian rows.
    pub fn apply(&self, residual: &DVector<f64>) -> (DVector<f64>, DVector<f64>) {
        let weights = residual.map(|r| self.weight(r));
        let reweighted = residual.zip_map(&weights, |r, w| r * w);
        (reweighted, weights)
    }
}

/// Scale-estimation method for adaptive loss parameter selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleEstimator {
    /// Median absolute deviation, scaled by 1.4826 to approximate the
    /// standard deviation of a normal distribution.
    Mad,
    /// Sample standard deviation.
    StdDev,
}

/// Estimate a robust-loss scale parameter from a residual sample.
///
/// Returns 0 for an empty sample.
pub fn estimate_scale(residuals: &[f64], method: ScaleEstimator) -> f64 {
    if residuals.is_empty() {
        return 0.0;
    }
    match method {
        ScaleEstimator::Mad => {
            let med = median(residuals);
            let deviations: Vec<f64> = residuals.iter().map(|r| (r - med).abs()).collect();
            1.4826 * median(&deviations)
        }
        ScaleEstimator::StdDev => {
            let n = residuals.len() as f64;
            let mean = residuals.iter().sum::<f64>() / n;
            let variance = residuals.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / n;
            variance.sqrt()
        }
    }
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn test_huber_quadratic_inside_delta() {
        let loss = RobustLoss::huber(1.5).unwrap();
        for r in [-1.4, -0.5, 0.0, 0.7, 1.5] {
            assert_relative_eq!(loss.rho(r), 0.5 * r * r, epsilon = 1e-15);
            assert_relative_eq!(loss.weight(r), 1.0, epsilon = 1e-15);
        }
    }

    #[test]
    fn test_huber_continuous_at_delta() {
        let delta = 1.0;
        let loss = RobustLoss::huber(delta).unwrap();
        let inside = loss.rho(delta - 1e-9);
        let outside = loss.rho(delta + 1e-9);
        assert!((inside - outside).abs() < 1e-8);
    }

    #[test]
    fn test_huber_outlier_weight() {
        let loss = RobustLoss::huber(2.0).unwrap();
        assert_relative_eq!(loss.weight(8.0), 0.25, epsilon = 1e-15);
        assert_relative_eq!(loss.weight(-8.0), 0.25, epsilon = 1e-15);
    }

    #[test]
    fn test_cauchy_at_zero() {
        let loss = RobustLoss::cauchy(2.0).unwrap();
        assert_eq!(loss.rho(0.0), 0.0);
        assert_eq!(loss.weight(0.0), 1.0);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert!(RobustLoss::huber(0.0).is_err());
        assert!(RobustLoss::cauchy(-1.0).is_err());
    }

    #[test]
    fn test_apply_reweights_vector() {
        let loss = RobustLoss::huber(1.0).unwrap();
        let residual = DVector::from_vec(vec![0.5, 4.0]);
        let (reweighted, weights) = loss.apply(&residual);
        assert_relative_eq!(reweighted[0], 0.5, epsilon = 1e-15);
        assert_relative_eq!(reweighted[1], 1.0, epsilon = 1e-15);
        assert_relative_eq!(weights[1], 0.25, epsilon = 1e-15);
    }

    #[test]
    fn test_mad_scale() {
        let residuals = [1.0, 1.0, 2.0, 2.0, 4.0, 100.0];
        let mad = estimate_scale(&residuals, ScaleEstimator::Mad);
        // median 2.0, deviations [1,1,0,0,2,98] -> median 1.0
        assert_abs_diff_eq!(mad, 1.4826, epsilon = 1e-12);
    }

    #[test]
    fn test_std_scale() {
        let residuals = [-1.0, 1.0];
        assert_abs_diff_eq!(
            estimate_scale(&residuals, ScaleEstimator::StdDev),
            1.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_empty_sample() {
        assert_eq!(estimate_scale(&[], ScaleEstimator::Mad), 0.0);
    }
}
