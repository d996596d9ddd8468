//! Parameter-vector coordination for nonlinear least-squares calibration.
//!
//! An [`Optimizer`] owns a set of typed data models (camera poses, marker
//! positions, ...), maps named parameter groups onto their fields through
//! getter/setter pairs, and exposes the result as one flat vector to a
//! least-squares backend. Every evaluation writes the candidate vector back
//! into the models before the caller's objective reads them, so objectives
//! are written against the models and never see the vector layout.
//!
//! Residuals declare the parameters they depend on. The resulting
//! [`SparsityPattern`] lets the finite-difference Jacobian perturb
//! independent parameters together.

pub mod backend;
pub mod config;
pub mod error;
pub mod models;
pub mod params;
pub mod progress;
pub mod report;
pub mod residuals;
pub mod sparsity;

mod adapter;
mod optimizer;

pub use crate::adapter::ObjectiveFn;
pub use crate::backend::{
    BackendOutcome, BackendProblem, Evaluation, LeastSquaresBackend, LmBackend, ResidualFunction,
    ScalingMode, SolveOptions,
};
pub use crate::config::OptimizerConfig;
pub use crate::error::{OptimizerError, Result};
pub use crate::models::DataModels;
pub use crate::optimizer::Optimizer;
pub use crate::params::{Bound, GroupOptions, ParamGroup};
pub use crate::progress::{FnObserver, ProgressCadence, ProgressEvent, ProgressObserver};
pub use crate::report::{OptimizationReport, ParameterTable, ResidualTable};
pub use crate::residuals::ResidualValues;
pub use crate::sparsity::SparsityPattern;
