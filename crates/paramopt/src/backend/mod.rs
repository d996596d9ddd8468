//! Least-squares solver backends.
//!
//! A backend sees the problem as a black box: a residual function over a flat
//! vector, per-parameter box bounds and an optional Jacobian sparsity hint.

mod finite_diff;
mod lm;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::params::Bound;
use crate::sparsity::SparsityPattern;

pub use finite_diff::ColumnGroups;
pub use lm::LmBackend;

/// Numerical options forwarded to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolveOptions {
    /// Relative tolerance on the cost reduction.
    pub ftol: f64,
    /// Relative tolerance on the parameter update.
    pub xtol: f64,
    /// Orthogonality tolerance between residuals and Jacobian columns.
    pub gtol: f64,
    /// Relative finite-difference step.
    pub diff_step: f64,
    pub x_scale: ScalingMode,
    /// Cap on the number of residual evaluations. `None` uses the backend's
    /// default budget.
    pub max_evaluations: Option<usize>,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            ftol: 1e-8,
            xtol: 1e-8,
            gtol: 1e-8,
            diff_step: 1e-4,
            x_scale: ScalingMode::Jacobian,
            max_evaluations: None,
        }
    }
}

/// Variable scaling used by the trust region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMode {
    /// Scale by the column norms of the Jacobian.
    #[default]
    Jacobian,
    /// No scaling.
    Unit,
}

/// Why the backend asks for residuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// A point the solver may accept as its next iterate.
    Trial,
    /// A finite-difference probe around the current iterate.
    Probe,
}

/// Residual function handed to a backend.
pub trait ResidualFunction {
    /// Length of every vector returned by [`ResidualFunction::evaluate`].
    fn num_residuals(&self) -> usize;

    fn evaluate(&mut self, x: &[f64], kind: Evaluation) -> Result<Vec<f64>>;
}

/// Problem description passed alongside the residual function.
#[derive(Debug, Clone, Copy)]
pub struct BackendProblem<'a> {
    pub x0: &'a [f64],
    /// One entry per parameter.
    pub bounds: &'a [Bound],
    /// Jacobian structure hint. Dense when `None`.
    pub sparsity: Option<&'a SparsityPattern>,
}

/// Result of a backend run.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendOutcome {
    pub x: Vec<f64>,
    pub message: String,
    pub success: bool,
    /// Residual evaluations, probes included.
    pub evaluations: usize,
    /// Half the squared residual norm at `x`.
    pub final_cost: f64,
}

/// Interface implemented by least-squares solvers.
///
/// Non-convergence is reported through [`BackendOutcome`]. Errors are
/// reserved for failures of the residual function and misuse such as
/// mismatched dimensions.
pub trait LeastSquaresBackend {
    fn solve(
        &self,
        f: &mut dyn ResidualFunction,
        problem: &BackendProblem<'_>,
        opts: &SolveOptions,
    ) -> Result<BackendOutcome>;
}
