//! Error taxonomy for the parameter coordinator.
//!
//! Every registration error is raised at the offending call and leaves the
//! coordinator untouched. Solver non-convergence is never an error; it is
//! reported through [`crate::report::OptimizationReport`].

use thiserror::Error;

/// Errors produced while wiring or running an [`crate::Optimizer`].
#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("data model `{0}` already exists")]
    DuplicateKey(String),
    #[error("data model `{0}` does not exist")]
    UnknownKey(String),
    #[error("data model `{key}` does not exist, cannot add group `{group}`")]
    UnknownModel { group: String, key: String },
    #[error("data model `{key}` is not a `{expected}`")]
    ModelType { key: String, expected: &'static str },

    #[error("parameter group `{0}` already exists")]
    DuplicateGroup(String),
    #[error("parameter `{param}` of group `{group}` is already defined by another group")]
    DuplicateParameter { group: String, param: String },
    #[error("group `{group}`: {what} has length {got}, expected {expected}")]
    ArityMismatch {
        group: String,
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("group `{group}`: getter returned {got} values, expected {expected}")]
    GetterContract {
        group: String,
        expected: usize,
        got: usize,
    },
    #[error("parameter `{param}`: invalid bounds [{lower}, {upper}]")]
    InvalidBound { param: String, lower: f64, upper: f64 },

    #[error("residual `{0}` already exists")]
    DuplicateResidual(String),
    #[error("residual `{residual}` references unknown parameter `{param}`")]
    UnknownParameter { residual: String, param: String },

    #[error("parameter vector has length {got}, expected {expected}")]
    VectorLength { expected: usize, got: usize },
    #[error(
        "objective returned {got} residuals but {expected} residuals are registered"
    )]
    ResidualCountMismatch { expected: usize, got: usize },
    #[error("objective result is missing residual `{0}`")]
    MissingResidual(String),
    #[error("objective result contains unregistered residual `{0}`")]
    UnknownResidual(String),

    #[error("noise level must be finite, got {0}")]
    InvalidNoise(f64),

    #[error("no objective function has been set")]
    MissingObjective,
    #[error("objective function failed")]
    Objective(#[source] anyhow::Error),
    #[error("solver backend: {0}")]
    Backend(String),

    #[error("failed to export table")]
    Export(#[from] csv::Error),
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, OptimizerError>;
