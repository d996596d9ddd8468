//! Solve reports and printable tables.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{OptimizerError, Result};
use crate::models::DataModels;
use crate::params::ParamRegistry;
use crate::residuals::ResidualRegistry;

/// Half the squared norm of `residuals`.
pub fn cost(residuals: &[f64]) -> f64 {
    0.5 * residuals.iter().map(|r| r * r).sum::<f64>()
}

/// Outcome of [`crate::Optimizer::run_optimization`].
///
/// Solver failures such as hitting the evaluation cap are not errors; check
/// `success` and `message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub parameter_names: Vec<String>,
    pub residual_names: Vec<String>,
    pub x0: Vec<f64>,
    pub xf: Vec<f64>,
    pub initial_residuals: Vec<f64>,
    pub final_residuals: Vec<f64>,
    pub initial_cost: f64,
    pub final_cost: f64,
    /// Objective evaluations, including the ones before and after the solve.
    pub evaluations: usize,
    /// Termination message from the backend.
    pub message: String,
    pub success: bool,
}

impl OptimizationReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

impl fmt::Display for OptimizationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} after {} evaluations: {}",
            if self.success { "converged" } else { "stopped" },
            self.evaluations,
            self.message
        )?;
        write!(
            f,
            "cost {:.6e} -> {:.6e} over {} parameters and {} residuals",
            self.initial_cost,
            self.final_cost,
            self.xf.len(),
            self.final_residuals.len()
        )
    }
}

/// One line of a [`ParameterTable`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterRow {
    pub name: String,
    pub group: String,
    /// Value in the parameter vector the table was built from.
    pub in_vector: f64,
    /// Value the group's getter currently reads from its model.
    pub in_model: f64,
}

/// Parameter values side by side with what the models hold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterTable {
    pub rows: Vec<ParameterRow>,
}

impl ParameterTable {
    pub(crate) fn collect(params: &ParamRegistry, models: &DataModels, x: &[f64]) -> Result<Self> {
        if x.len() != params.num_params() {
            return Err(OptimizerError::VectorLength {
                expected: params.num_params(),
                got: x.len(),
            });
        }
        let mut rows = Vec::with_capacity(x.len());
        for group in params.groups() {
            let in_model = group.read(models)?;
            let cells = group.param_names().iter().zip(group.indices()).zip(in_model);
            for ((name, idx), value) in cells {
                rows.push(ParameterRow {
                    name: name.clone(),
                    group: group.name().to_string(),
                    in_vector: x[idx],
                    in_model: value,
                });
            }
        }
        Ok(Self { rows })
    }

    /// Rows whose vector and model values differ by more than `tol`.
    pub fn out_of_sync(&self, tol: f64) -> impl Iterator<Item = &ParameterRow> + '_ {
        self.rows
            .iter()
            .filter(move |row| (row.in_vector - row.in_model).abs() > tol)
    }
}

impl fmt::Display for ParameterTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name_w = column_width("parameter", self.rows.iter().map(|r| r.name.as_str()));
        let group_w = column_width("group", self.rows.iter().map(|r| r.group.as_str()));
        writeln!(
            f,
            "{:name_w$}  {:group_w$}  {:>14}  {:>14}",
            "parameter", "group", "vector", "model"
        )?;
        for row in &self.rows {
            writeln!(
                f,
                "{:name_w$}  {:group_w$}  {:>14.6e}  {:>14.6e}",
                row.name, row.group, row.in_vector, row.in_model
            )?;
        }
        Ok(())
    }
}

/// Residual values by name, in registry order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResidualTable {
    pub rows: Vec<(String, f64)>,
}

impl ResidualTable {
    /// Pairs names with `values`. Values print as NaN when `None`.
    pub(crate) fn collect(residuals: &ResidualRegistry, values: Option<&[f64]>) -> Result<Self> {
        if let Some(values) = values {
            if values.len() != residuals.len() {
                return Err(OptimizerError::ResidualCountMismatch {
                    expected: residuals.len(),
                    got: values.len(),
                });
            }
        }
        let rows = residuals
            .names()
            .enumerate()
            .map(|(i, name)| (name.to_string(), values.map_or(f64::NAN, |v| v[i])))
            .collect();
        Ok(Self { rows })
    }
}

impl fmt::Display for ResidualTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name_w = column_width("residual", self.rows.iter().map(|(n, _)| n.as_str()));
        writeln!(f, "{:name_w$}  {:>14}", "residual", "value")?;
        for (name, value) in &self.rows {
            writeln!(f, "{name:name_w$}  {value:>14.6e}")?;
        }
        Ok(())
    }
}

fn column_width<'a>(header: &str, cells: impl Iterator<Item = &'a str>) -> usize {
    cells.map(str::len).fold(header.len(), usize::max)
}
