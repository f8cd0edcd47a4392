//! Nonlinear least-squares solver driving the factor graph.
//!
//! The solver packs the graph's free variables into a flat parameter
//! vector, iterates on that buffer, and materializes values back into
//! the graph only at accepted steps. Bounds are enforced by projecting
//! candidate steps onto the box (trust-region-reflective and dogbox);
//! plain Levenberg-Marquardt does not support bounds and is switched to
//! the reflective path when finite bounds are present.

pub mod diagnostics;
mod dogleg;
mod levenberg_marquardt;
mod linear;

pub use diagnostics::Diagnostics;
pub use linear::LinearSolverKind;

use std::fmt;
use std::time::Duration;

use tracing::{info, warn};

use crate::core::FactorGraph;
use crate::error::PrismResult;

/// Optimization method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolverMethod {
    /// Damped Gauss-Newton; unconstrained only.
    #[default]
    LevenbergMarquardt,
    /// Levenberg-Marquardt with candidate steps projected onto the
    /// bound box.
    TrustRegionReflective,
    /// Dogleg trust region with bound projection.
    Dogbox,
}

impl fmt::Display for SolverMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverMethod::LevenbergMarquardt => write!(f, "levenberg-marquardt"),
            SolverMethod::TrustRegionReflective => write!(f, "trust-region-reflective"),
            SolverMethod::Dogbox => write!(f, "dogbox"),
        }
    }
}

/// Solver configuration with builder-style setters.
#[derive(Debug, Clone)]
pub struct SolveOptions {
    pub method: SolverMethod,
    pub max_iterations: usize,
    pub cost_tolerance: f64,
    pub gradient_tolerance: f64,
    pub parameter_tolerance: f64,
    /// Enforce box bounds declared on variables.
    pub use_bounds: bool,
    /// Use the structural sparsity pattern for the normal-equation solve.
    pub jacobian_sparsity: bool,
    /// Log per-iteration progress at INFO level.
    pub verbose: bool,
    pub timeout: Option<Duration>,
}

impl Default for SolveOptions {
    fn default() -> Self {
        SolveOptions {
            method: SolverMethod::LevenbergMarquardt,
            max_iterations: 100,
            cost_tolerance: 1e-8,
            gradient_tolerance: 1e-8,
            parameter_tolerance: 1e-8,
            use_bounds: true,
            jacobian_sparsity: false,
            verbose: false,
            timeout: None,
        }
    }
}

impl SolveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, method: SolverMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_cost_tolerance(mut self, tolerance: f64) -> Self {
        self.cost_tolerance = tolerance;
        self
    }

    pub fn with_gradient_tolerance(mut self, tolerance: f64) -> Self {
        self.gradient_tolerance = tolerance;
        self
    }

    pub fn with_parameter_tolerance(mut self, tolerance: f64) -> Self {
        self.parameter_tolerance = tolerance;
        self
    }

    pub fn with_bounds(mut self, use_bounds: bool) -> Self {
        self.use_bounds = use_bounds;
        self
    }

    pub fn with_jacobian_sparsity(mut self, jacobian_sparsity: bool) -> Self {
        self.jacobian_sparsity = jacobian_sparsity;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn linear_solver_kind(&self) -> LinearSolverKind {
        if self.jacobian_sparsity {
            LinearSolverKind::SparseCholesky
        } else {
            LinearSolverKind::DenseCholesky
        }
    }
}

/// Why the solver stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum OptimizationStatus {
    /// Converged (used for the trivial zero-variable solve).
    Converged,
    CostToleranceReached,
    GradientToleranceReached,
    ParameterToleranceReached,
    MaxIterationsReached,
    Timeout,
    /// The damped normal equations could not be solved.
    NumericalFailure,
    /// Unrecoverable failure with the underlying solver's message.
    Failed(String),
}

impl OptimizationStatus {
    /// Whether the status counts as a successful solve.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            OptimizationStatus::Converged
                | OptimizationStatus::CostToleranceReached
                | OptimizationStatus::GradientToleranceReached
                | OptimizationStatus::ParameterToleranceReached
        )
    }
}

impl fmt::Display for OptimizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationStatus::Converged => write!(f, "converged"),
            OptimizationStatus::CostToleranceReached => {
                write!(f, "cost tolerance satisfied")
            }
            OptimizationStatus::GradientToleranceReached => {
                write!(f, "gradient tolerance satisfied")
            }
            OptimizationStatus::ParameterToleranceReached => {
                write!(f, "parameter tolerance satisfied")
            }
            OptimizationStatus::MaxIterationsReached => {
                write!(f, "maximum iterations reached")
            }
            OptimizationStatus::Timeout => write!(f, "timeout reached"),
            OptimizationStatus::NumericalFailure => {
                write!(f, "numerical failure in linear solve")
            }
            OptimizationStatus::Failed(message) => write!(f, "failed: {message}"),
        }
    }
}

/// Immutable record of one solve attempt.
#[derive(Debug, Clone)]
pub struct SolveResult {
    pub success: bool,
    pub status: OptimizationStatus,
    /// Human-readable termination reason.
    pub message: String,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub iterations: usize,
    pub elapsed: Duration,
    pub diagnostics: Option<Diagnostics>,
}

impl SolveResult {
    pub(crate) fn from_status(
        status: OptimizationStatus,
        initial_cost: f64,
        final_cost: f64,
        iterations: usize,
        elapsed: Duration,
    ) -> Self {
        SolveResult {
            success: status.is_success(),
            message: status.to_string(),
            status,
            initial_cost,
            final_cost,
            iterations,
            elapsed,
            diagnostics: None,
        }
    }
}

impl fmt::Display for SolveResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Solve Result")?;
        writeln!(f, "  success:    {}", self.success)?;
        writeln!(f, "  status:     {}", self.message)?;
        writeln!(f, "  iterations: {}", self.iterations)?;
        writeln!(
            f,
            "  cost:       {:.6e} -> {:.6e}",
            self.initial_cost, self.final_cost
        )?;
        writeln!(f, "  elapsed:    {:?}", self.elapsed)?;
        Ok(())
    }
}

/// Nonlinear least-squares solver over a factor graph.
#[derive(Debug, Clone, Default)]
pub struct Solver {
    options: SolveOptions,
}

impl Solver {
    pub fn new(options: SolveOptions) -> Self {
        Solver { options }
    }

    pub fn options(&self) -> &SolveOptions {
        &self.options
    }

    /// Minimize the graph's stacked residual, updating variable values
    /// in place, and attach post-solve diagnostics.
    pub fn solve(&self, graph: &mut FactorGraph) -> PrismResult<SolveResult> {
        if graph.free_dimension() == 0 {
            info!("no free variables; returning trivial solution");
            let mut result = SolveResult::from_status(
                OptimizationStatus::Converged,
                0.0,
                0.0,
                0,
                Duration::from_secs(0),
            );
            result.message = "no free variables to optimize".to_string();
            return Ok(result);
        }

        let bounded = self.options.use_bounds && graph.has_finite_bounds();
        let method = match (self.options.method, bounded) {
            (SolverMethod::LevenbergMarquardt, true) => {
                warn!(
                    "Levenberg-Marquardt does not support bounds; \
                     using trust-region-reflective"
                );
                SolverMethod::TrustRegionReflective
            }
            (method, _) => method,
        };

        let mut result = match method {
            SolverMethod::LevenbergMarquardt => {
                levenberg_marquardt::minimize(graph, &self.options, false)?
            }
            SolverMethod::TrustRegionReflective => {
                levenberg_marquardt::minimize(graph, &self.options, bounded)?
            }
            SolverMethod::Dogbox => dogleg::minimize(graph, &self.options, bounded)?,
        };

        result.diagnostics = Some(Diagnostics::analyze(graph, diagnostics::DEFAULT_TOP_K));
        if self.options.verbose {
            info!(
                status = %result.message,
                iterations = result.iterations,
                final_cost = result.final_cost,
                "solve finished"
            );
        }
        Ok(result)
    }
}
