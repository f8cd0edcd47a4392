//! Levenberg-Marquardt iteration, optionally with box projection.
//!
//! The bounded variant ("trust-region-reflective") clamps each
//! candidate to the feasible box and rates the step by the clamped
//! update actually taken, so damping reacts to the projected step
//! rather than the unconstrained one.

use std::time::Instant;

use nalgebra::DVector;
use tracing::{debug, info};

use crate::core::FactorGraph;
use crate::error::PrismResult;
use crate::solver::linear;
use crate::solver::{OptimizationStatus, SolveOptions, SolveResult};

const INITIAL_DAMPING: f64 = 1e-3;
const MIN_DAMPING: f64 = 1e-12;
const MAX_DAMPING: f64 = 1e12;
const DAMPING_INCREASE: f64 = 10.0;
const DAMPING_DECREASE: f64 = 0.3;
const MIN_STEP_QUALITY: f64 = 0.0;
const GOOD_STEP_QUALITY: f64 = 0.75;

/// Gain ratio of actual to predicted cost reduction.
fn step_quality(actual_reduction: f64, predicted_reduction: f64) -> f64 {
    if predicted_reduction.abs() < 1e-15 {
        return 0.0;
    }
    actual_reduction / predicted_reduction
}

/// Predicted reduction of the quadratic model for a Gauss-Newton step:
/// -(step^T g + 0.5 step^T J^T J step), with g = J^T r.
fn predicted_reduction(
    step: &DVector<f64>,
    gradient: &DVector<f64>,
    jacobian: &nalgebra::DMatrix<f64>,
) -> f64 {
    let j_step = jacobian * step;
    -(step.dot(gradient) + 0.5 * j_step.norm_squared())
}

fn clamp_to_bounds(candidate: &mut DVector<f64>, lower: &DVector<f64>, upper: &DVector<f64>) {
    for i in 0..candidate.len() {
        candidate[i] = candidate[i].clamp(lower[i], upper[i]);
    }
}

struct ConvergenceState {
    start: Instant,
    iteration: usize,
    cost_change: f64,
    step_norm: f64,
    gradient_norm: f64,
}

/// Decide termination; checked in a fixed order so the reported reason
/// is deterministic.
fn check_convergence(
    state: &ConvergenceState,
    options: &SolveOptions,
) -> Option<OptimizationStatus> {
    if let Some(timeout) = options.timeout {
        if state.start.elapsed() >= timeout {
            return Some(OptimizationStatus::Timeout);
        }
    }
    if state.iteration >= options.max_iterations {
        return Some(OptimizationStatus::MaxIterationsReached);
    }
    if state.iteration > 0 && state.cost_change.abs() < options.cost_tolerance {
        return Some(OptimizationStatus::CostToleranceReached);
    }
    if state.iteration > 0 && state.step_norm < options.parameter_tolerance {
        return Some(OptimizationStatus::ParameterToleranceReached);
    }
    if state.gradient_norm < options.gradient_tolerance {
        return Some(OptimizationStatus::GradientToleranceReached);
    }
    None
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
        clamp_to_bounds(&mut params, &lower, &upper);
        graph.unpack_variables(&params)?;
    }

    let (mut residual, mut jacobian) = graph.compute_residuals_and_jacobian();
    let initial_cost = 0.5 * residual.norm_squared();
    let mut cost = initial_cost;
    let mut lambda = INITIAL_DAMPING;
    let mut state = ConvergenceState {
        start,
        iteration: 0,
        cost_change: 0.0,
        step_norm: 0.0,
        gradient_norm: f64::INFINITY,
    };

    let status = loop {
        let gradient = jacobian.transpose() * &residual;
        state.gradient_norm = gradient.amax();

        if let Some(status) = check_convergence(&state, options) {
            break status;
        }

        let Some(step) = linear::solve_step(linear_kind, &jacobian, &structure, &residual, lambda)
        else {
            break OptimizationStatus::NumericalFailure;
        };

        let mut candidate = &params + &step;
        if bounded {
            clamp_to_bounds(&mut candidate, &lower, &upper);
        }
        let effective_step = &candidate - &params;

        graph.unpack_variables(&candidate)?;
        let new_residual = graph.compute_all_residuals();
        let new_cost = 0.5 * new_residual.norm_squared();

        let predicted = predicted_reduction(&effective_step, &gradient, &jacobian);
        let rho = step_quality(cost - new_cost, predicted);

        if rho > GOOD_STEP_QUALITY {
            lambda = (lambda * DAMPING_DECREASE).max(MIN_DAMPING);
        } else if rho < MIN_STEP_QUALITY {
            lambda = (lambda * DAMPING_INCREASE).min(MAX_DAMPING);
        }

        if rho >= MIN_STEP_QUALITY {
            state.cost_change = cost - new_cost;
            state.step_norm = effective_step.norm();
            params = candidate;
            cost = new_cost;
            let pair = graph.compute_residuals_and_jacobian();
            residual = pair.0;
            jacobian = pair.1;
            if options.verbose {
                info!(
                    iteration = state.iteration,
                    cost,
                    damping = lambda,
                    step_norm = state.step_norm,
                    "step accepted"
                );
            }
        } else {
            graph.unpack_variables(&params)?;
            debug!(
                iteration = state.iteration,
                rho, damping = lambda, "step rejected"
            );
        }

        state.iteration += 1;
    };

    // The graph may hold a rejected candidate if the loop broke after a
    // failed solve; restore the best parameters.
    graph.unpack_variables(&params)?;

    Ok(SolveResult::from_status(
        status,
        initial_cost,
        cost,
        state.iteration,
        start.elapsed(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Factor, Variable, VariableKind};
    use crate::residuals::{Distance, Residual};
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn distance_problem() -> FactorGraph {
        let mut graph = FactorGraph::new();
        graph
            .add_variable(
                Variable::new("a", VariableKind::Point, DVector::from_vec(vec![0.0, 0.0, 0.0]))
                    .unwrap()
                    .with_frozen(true),
            )
            .unwrap();
        graph
            .add_variable(
                Variable::new("b", VariableKind::Point, DVector::from_vec(vec![0.5, 0.1, 0.0]))
                    .unwrap(),
            )
            .unwrap();
        graph
            .add_factor(
                Factor::new(
                    "dist",
                    vec!["a".to_string(), "b".to_string()],
                    Residual::Distance(Distance::new(2.0)),
                )
                .unwrap(),
            )
            .unwrap();
        graph
    }

    #[test]
    fn test_minimize_distance_to_target() {
        let mut graph = distance_problem();
        let options = SolveOptions::default();
        let result = minimize(&mut graph, &options, false).unwrap();
        assert!(result.status.is_success(), "status: {}", result.status);
        assert!(result.final_cost < 1e-12);
        let b = graph.variable("b").unwrap();
        let position = Vector3::new(b.value()[0], b.value()[1], b.value()[2]);
        assert_relative_eq!(position.norm(), 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_bounded_minimize_respects_box() {
        let mut graph = FactorGraph::new();
        graph
            .add_variable(
                Variable::new("a", VariableKind::Point, DVector::from_vec(vec![0.0, 0.0, 0.0]))
                    .unwrap()
                    .with_frozen(true),
            )
            .unwrap();
        graph
            .add_variable(
                Variable::new("b", VariableKind::Point, DVector::from_vec(vec![0.5, 0.0, 0.0]))
                    .unwrap()
                    .with_bounds(vec![
                        (0.0, 1.5),
                        (-0.1, 0.1),
                        (-0.1, 0.1),
                    ])
                    .unwrap(),
            )
            .unwrap();
        graph
            .add_factor(
                Factor::new(
                    "dist",
                    vec!["a".to_string(), "b".to_string()],
                    Residual::Distance(Distance::new(2.0)),
                )
                .unwrap(),
            )
            .unwrap();

        let options = SolveOptions::default();
        let result = minimize(&mut graph, &options, true).unwrap();
        let b = graph.variable("b").unwrap();
        // Target distance 2.0 is infeasible inside the box; the solve
        // must stop on the boundary without escaping it.
        assert!(b.value()[0] <= 1.5 + 1e-12);
        assert!(b.value()[1].abs() <= 0.1 + 1e-12);
        assert!(result.iterations <= options.max_iterations);
    }

    #[test]
    fn test_already_converged_zero_iterations() {
        let mut graph = distance_problem();
        graph
            .set_variable_value("b", DVector::from_vec(vec![2.0, 0.0, 0.0]))
            .unwrap();
        let options = SolveOptions::default();
        let result = minimize(&mut graph, &options, false).unwrap();
        assert_eq!(result.status, OptimizationStatus::GradientToleranceReached);
        assert_eq!(result.iterations, 0);
    }
}
