//! JSON configuration for a solve.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backend::SolveOptions;
use crate::error::Result;
use crate::progress::ProgressCadence;

/// Solver options and progress cadence, loadable from JSON.
///
/// Missing fields take their defaults, so `{}` is a valid configuration.
///
/// ```
/// use paramopt::{OptimizerConfig, ProgressCadence, ScalingMode};
///
/// let config = OptimizerConfig::from_json_str(
///     r#"{ "solve": { "x_scale": "unit", "max_evaluations": 500 },
///          "progress": { "mode": "every_n", "n": 10 } }"#,
/// )
/// .unwrap();
/// assert_eq!(config.solve.x_scale, ScalingMode::Unit);
/// assert_eq!(config.solve.ftol, 1e-8);
/// assert_eq!(config.progress, ProgressCadence::EveryN { n: 10 });
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub solve: SolveOptions,
    pub progress: ProgressCadence,
}

impl OptimizerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
