//! Error types for the prism-solver library
//!
//! This module provides the main error and result types used throughout the library.
//! All errors use the `thiserror` crate for automatic trait implementations.

use thiserror::Error;

/// Main result type used throughout the prism-solver library
pub type PrismResult<T> = Result<T, PrismError>;

/// Main error type for the prism-solver library
#[derive(Debug, Clone, Error)]
pub enum PrismError {
    /// Factor graph construction errors (duplicate ids, unknown references,
    /// length mismatches)
    #[error("Graph error: {0}")]
    Graph(String),

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Constraint validation errors found while building a problem
    #[error("Constraint error: {0}")]
    Constraint(String),

    /// Linear algebra related errors
    #[error("Linear algebra error: {0}")]
    LinearAlgebra(String),

    /// Solver related errors
    #[error("Solver error: {0}")]
    Solver(String),

    /// Pose estimation (PnP) errors
    #[error("Pose estimation error: {0}")]
    PoseEstimation(String),

    /// Incremental initialization errors
    #[error("Initialization error: {0}")]
    Initialization(String),
}
