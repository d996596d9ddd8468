//! Progress reporting for external visualization.
//!
//! Observers receive read-only snapshots. They cannot modify the models, the
//! parameter vector or the residuals handed back to the solver, and a failing
//! observer is logged and ignored.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::models::DataModels;

/// When observers are notified during the solve.
///
/// Counts refer to trial evaluations: evaluations at points the solver may
/// accept as its next iterate. Finite-difference probes are not counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ProgressCadence {
    /// After every trial evaluation.
    EveryEvaluation,
    /// After every `n`-th trial evaluation.
    EveryN { n: usize },
    /// Only once the solver has terminated.
    #[default]
    AtTermination,
}

impl ProgressCadence {
    fn interval(self) -> Option<usize> {
        match self {
            ProgressCadence::EveryEvaluation => Some(1),
            ProgressCadence::EveryN { n } => Some(n.max(1)),
            ProgressCadence::AtTermination => None,
        }
    }

    /// Whether observers also see the initial state before the solver starts.
    pub fn reports_during_solve(self) -> bool {
        self.interval().is_some()
    }
}

/// Snapshot passed to observers.
#[derive(Debug, Clone, Copy)]
pub struct ProgressEvent<'a> {
    /// Index of the objective evaluation that produced `residuals`.
    pub evaluation: usize,
    pub residuals: &'a [f64],
    /// Total absolute error at each report so far, oldest first.
    pub total_error_history: &'a [f64],
    pub models: &'a DataModels,
}

impl ProgressEvent<'_> {
    /// Sum of absolute residuals of this event.
    pub fn total_error(&self) -> f64 {
        total_abs_error(self.residuals)
    }
}

/// Receives progress notifications.
///
/// All methods default to no-ops so observers implement what they need.
pub trait ProgressObserver {
    /// Called once with the initial state, before the solver starts.
    fn on_start(&mut self, _event: &ProgressEvent<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called at the configured cadence while the solver runs.
    fn on_update(&mut self, _event: &ProgressEvent<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once after the solver returned and the models hold the final state.
    fn on_finish(&mut self, _event: &ProgressEvent<'_>, _message: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Adapts a closure into an observer invoked for every notification.
pub struct FnObserver<F>(pub F);

impl<F> ProgressObserver for FnObserver<F>
where
    F: FnMut(&ProgressEvent<'_>) -> anyhow::Result<()>,
{
    fn on_start(&mut self, event: &ProgressEvent<'_>) -> anyhow::Result<()> {
        (self.0)(event)
    }

    fn on_update(&mut self, event: &ProgressEvent<'_>) -> anyhow::Result<()> {
        (self.0)(event)
    }

    fn on_finish(&mut self, event: &ProgressEvent<'_>, _message: &str) -> anyhow::Result<()> {
        (self.0)(event)
    }
}

/// Cadence state for one solve.
#[derive(Debug, Clone)]
pub struct ProgressSession {
    cadence: ProgressCadence,
    since_last: usize,
    trial_evaluations: usize,
    history: Vec<f64>,
}

impl ProgressSession {
    pub fn new(cadence: ProgressCadence) -> Self {
        Self {
            cadence,
            since_last: 0,
            trial_evaluations: 0,
            history: Vec::new(),
        }
    }

    pub fn cadence(&self) -> ProgressCadence {
        self.cadence
    }

    /// Trial evaluations seen so far.
    pub fn trial_evaluations(&self) -> usize {
        self.trial_evaluations
    }

    pub fn history(&self) -> &[f64] {
        &self.history
    }

    /// Registers one trial evaluation and tells whether it is due for a report.
    pub(crate) fn tick(&mut self) -> bool {
        self.trial_evaluations += 1;
        let Some(interval) = self.cadence.interval() else {
            return false;
        };
        self.since_last += 1;
        if self.since_last >= interval {
            self.since_last = 0;
            true
        } else {
            false
        }
    }

    pub(crate) fn record(&mut self, residuals: &[f64]) {
        self.history.push(total_abs_error(residuals));
    }
}

pub(crate) fn total_abs_error(residuals: &[f64]) -> f64 {
    residuals.iter().map(|r| r.abs()).sum()
}

/// Which notification to deliver.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Notify<'m> {
    Start,
    Update,
    Finish(&'m str),
}

/// Delivers a notification, logging and discarding observer failures.
pub(crate) fn notify(
    observer: &mut dyn ProgressObserver,
    kind: Notify<'_>,
    event: &ProgressEvent<'_>,
) {
    let outcome = match kind {
        Notify::Start => observer.on_start(event),
        Notify::Update => observer.on_update(event),
        Notify::Finish(message) => observer.on_finish(event, message),
    };
    if let Err(err) = outcome {
        warn!("progress observer failed at evaluation {}: {err:#}", event.evaluation);
    }
}
