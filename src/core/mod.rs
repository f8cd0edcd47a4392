//! Variable and factor-graph model.
//!
//! Typed, sized optimization variables and the residual factors that
//! connect them, with packing/unpacking to a flat parameter vector,
//! bound assembly, sparsity-structure extraction and aggregate residual
//! evaluation.

pub mod factor;
pub mod graph;
pub mod variable;

pub use factor::Factor;
pub use graph::{FactorGraph, GraphSummary};
pub use variable::{Variable, VariableKind};
