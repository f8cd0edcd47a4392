//! Dogleg trust-region iteration with box projection ("dogbox").
//!
//! Each iteration blends the Gauss-Newton step with the Cauchy
//! (steepest-descent) step inside a spherical trust region, then
//! projects the candidate onto the feasible box. The radius policy is
//! the classic 0.25/0.75 scheme.

use std::time::Instant;

use nalgebra::{DMatrix, DVector};
use tracing::{debug, info};

use crate::core::FactorGraph;
use crate::error::PrismResult;
use crate::solver::linear;
use crate::solver::{OptimizationStatus, SolveOptions, SolveResult};

const INITIAL_RADIUS: f64 = 1.0;
const MIN_RADIUS: f64 = 1e-12;
const MAX_RADIUS: f64 = 1e12;
const RADIUS_INCREASE: f64 = 2.0;
const RADIUS_DECREASE: f64 = 0.5;

/// Blend the Cauchy and Gauss-Newton steps inside the trust region.
fn dogleg_step(
    gauss_newton: &DVector<f64>,
    cauchy: &DVector<f64>,
    radius: f64,
) -> DVector<f64> {
    let gn_norm = gauss_newton.norm();
    if gn_norm <= radius {
        return gauss_newton.clone();
    }
    let cauchy_norm = cauchy.norm();
    if cauchy_norm >= radius {
        return cauchy * (radius / cauchy_norm);
    }
    // Walk from the Cauchy point toward the Gauss-Newton point until
    // the trust-region boundary.
    let diff = gauss_newton - cauchy;
    let a = diff.norm_squared();
    let b = 2.0 * cauchy.dot(&diff);
    let c = cauchy.norm_squared() - radius * radius;
    let discriminant = (b * b - 4.0 * a * c).max(0.0);
    let tau = (-b + discriminant.sqrt()) / (2.0 * a);
    cauchy + diff * tau.clamp(0.0, 1.0)
}

/// Steepest-descent minimizer of the quadratic model along -g.
fn cauchy_step(gradient: &DVector<f64>, jacobian: &DMatrix<f64>) -> DVector<f64> {
    let j_g = jacobian * gradient;
    let denom = j_g.norm_squared();
    if denom < 1e-300 {
        return DVector::zeros(gradient.len());
    }
    let alpha = gradient.norm_squared() / denom;
    -gradient * alpha
}

fn model_reduction(
    step: &DVector<f64>,
    gradient: &DVector<f64>,
    jacobian: &DMatrix<f64>,
) -> f64 {
    let j_step = jacobian * step;
    -(step.dot(gradient) + 0.5 * j_step.norm_squared())
}

pub(crate) fn minimize(
    graph: &mut FactorGraph,
    options: &SolveOptions,
    bounded: bool,
) -> PrismResult<SolveResult> {
    let start = Instant::now();
    let linear_kind = options.linear_solver_kind();
    let structure = graph.jacobian_structure();
    let (lower, upper) = graph.variable_bounds();

    let mut params = graph.pack_variables();
    if bounded {
        for i in 0..params.len() {
            params[i] = params[i].clamp(lower[i], upper[i]);
        }
        graph.unpack_variables(&params)?;
    }

    let (mut residual, mut jacobian) = graph.compute_residuals_and_jacobian();
    let initial_cost = 0.5 * residual.norm_squared();
    let mut cost = initial_cost;
    let mut radius = INITIAL_RADIUS;
    let mut iteration = 0usize;
    let mut cost_change = 0.0f64;
    let mut step_norm = 0.0f64;

    let status = loop {
        let gradient = jacobian.transpose() * &residual;

        if let Some(timeout) = options.timeout {
            if start.elapsed() >= timeout {
                break OptimizationStatus::Timeout;
            }
        }
        if iteration >= options.max_iterations {
            break OptimizationStatus::MaxIterationsReached;
        }
        if iteration > 0 && cost_change.abs() < options.cost_tolerance {
            break OptimizationStatus::CostToleranceReached;
        }
        if iteration > 0 && step_norm < options.parameter_tolerance {
            break OptimizationStatus::ParameterToleranceReached;
        }
        if gradient.amax() < options.gradient_tolerance {
            break OptimizationStatus::GradientToleranceReached;
        }
        if radius <= MIN_RADIUS {
            break OptimizationStatus::ParameterToleranceReached;
        }

        // Lightly damped Gauss-Newton step for the dogleg endpoint.
        let Some(gauss_newton) =
            linear::solve_step(linear_kind, &jacobian, &structure, &residual, 1e-10)
        else {
            break OptimizationStatus::NumericalFailure;
        };
        let cauchy = cauchy_step(&gradient, &jacobian);
        let step = dogleg_step(&gauss_newton, &cauchy, radius);

        let mut candidate = &params + &step;
        if bounded {
            for i in 0..candidate.len() {
                candidate[i] = candidate[i].clamp(lower[i], upper[i]);
            }
        }
        let effective_step = &candidate - &params;

        graph.unpack_variables(&candidate)?;
        let new_residual = graph.compute_all_residuals();
        let new_cost = 0.5 * new_residual.norm_squared();

        let predicted = model_reduction(&effective_step, &gradient, &jacobian);
        let rho = if predicted.abs() < 1e-15 {
            0.0
        } else {
            (cost - new_cost) / predicted
        };

        let taken = effective_step.norm();
        if rho > 0.75 {
            radius = (radius * RADIUS_INCREASE).min(MAX_RADIUS);
        } else if rho < 0.25 {
            radius = (taken * RADIUS_DECREASE).max(MIN_RADIUS);
        }

        if rho > 0.0 && new_cost < cost {
            cost_change = cost - new_cost;
            step_norm = taken;
            params = candidate;
            cost = new_cost;
            let pair = graph.compute_residuals_and_jacobian();
            residual = pair.0;
            jacobian = pair.1;
            if options.verbose {
                info!(iteration, cost, radius, step_norm, "step accepted");
            }
        } else {
            graph.unpack_variables(&params)?;
            debug!(iteration, rho, radius, "step rejected");
        }

        iteration += 1;
    };

    graph.unpack_variables(&params)?;

    Ok(SolveResult::from_status(
        status,
        initial_cost,
        cost,
        iteration,
        start.elapsed(),
    ))
}
