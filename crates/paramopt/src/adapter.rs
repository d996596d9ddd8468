//! Bridge between the flat vector seen by a backend and the caller's objective.

use crate::backend::{Evaluation, ResidualFunction};
use crate::error::{OptimizerError, Result};
use crate::models::DataModels;
use crate::params::ParamRegistry;
use crate::progress::{notify, Notify, ProgressEvent, ProgressObserver, ProgressSession};
use crate::residuals::{ResidualRegistry, ResidualValues};

/// Caller-supplied objective over the data models.
pub type ObjectiveFn = dyn Fn(&DataModels) -> anyhow::Result<ResidualValues>;

/// Calls the objective and normalizes its output to registry order.
pub(crate) fn evaluate_objective(
    objective: &ObjectiveFn,
    models: &DataModels,
    residuals: &ResidualRegistry,
) -> Result<Vec<f64>> {
    let values = objective(models)
        .map_err(OptimizerError::Objective)?
        .into_ordered(residuals)?;
    if values.len() != residuals.len() {
        return Err(OptimizerError::ResidualCountMismatch {
            expected: residuals.len(),
            got: values.len(),
        });
    }
    Ok(values)
}

/// Residual function handed to the backend for one solve.
///
/// Every evaluation stores the candidate as the live vector, writes it into
/// the models and calls the objective. Trial evaluations advance the progress
/// session, which decides when the observer hears about them.
pub(crate) struct ObjectiveAdapter<'a> {
    pub params: &'a ParamRegistry,
    pub residuals: &'a ResidualRegistry,
    pub models: &'a mut DataModels,
    pub x: &'a mut Vec<f64>,
    pub objective: &'a ObjectiveFn,
    pub observer: &'a mut Option<Box<dyn ProgressObserver>>,
    pub session: &'a mut ProgressSession,
    /// Evaluations performed so far, including the ones before the solve.
    pub evaluations: usize,
}

impl ResidualFunction for ObjectiveAdapter<'_> {
    fn num_residuals(&self) -> usize {
        self.residuals.len()
    }

    fn evaluate(&mut self, x: &[f64], kind: Evaluation) -> Result<Vec<f64>> {
        self.params.write_from(x, self.models)?;
        self.x.clear();
        self.x.extend_from_slice(x);

        let values = evaluate_objective(self.objective, &*self.models, self.residuals)?;
        self.evaluations += 1;

        if kind == Evaluation::Trial && self.session.tick() {
            self.session.record(&values);
            if let Some(observer) = self.observer.as_deref_mut() {
                let event = ProgressEvent {
                    evaluation: self.evaluations,
                    residuals: &values,
                    total_error_history: self.session.history(),
                    models: &*self.models,
                };
                notify(observer, Notify::Update, &event);
            }
        }
        Ok(values)
    }
}
