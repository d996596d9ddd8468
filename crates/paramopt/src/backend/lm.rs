use std::cell::{Cell, RefCell};

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use log::debug;
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn};

use crate::error::{OptimizerError, Result};
use crate::params::Bound;

use super::finite_diff::ColumnGroups;
use super::{
    BackendOutcome, BackendProblem, Evaluation, LeastSquaresBackend, ResidualFunction,
    ScalingMode, SolveOptions,
};

/// Evaluation budget per parameter when no cap is configured.
const DEFAULT_PATIENCE: usize = 100;

struct LmWrapper<'a> {
    f: RefCell<&'a mut dyn ResidualFunction>,
    num_residuals: usize,
    bounds: Vec<Bound>,
    groups: ColumnGroups,
    diff_step: f64,
    params: DVector<f64>,
    /// Residuals at `params`, cleared whenever `params` moves.
    cached: RefCell<Option<Vec<f64>>>,
    evaluations: Cell<usize>,
    failure: RefCell<Option<OptimizerError>>,
}

impl LmWrapper<'_> {
    fn project(&self, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            x.len(),
            x.iter().zip(&self.bounds).map(|(&v, b)| b.clamp(v)),
        )
    }

    /// Keeps the first failure and tells the solver to stop.
    fn record<T>(&self, outcome: Result<T>) -> Option<T> {
        match outcome {
            Ok(value) => Some(value),
            Err(err) => {
                let mut failure = self.failure.borrow_mut();
                if failure.is_none() {
                    *failure = Some(err);
                }
                None
            }
        }
    }

    fn evaluate(&self, x: &[f64], kind: Evaluation) -> Result<Vec<f64>> {
        self.evaluations.set(self.evaluations.get() + 1);
        let values = self.f.borrow_mut().evaluate(x, kind)?;
        if values.len() != self.num_residuals {
            return Err(OptimizerError::ResidualCountMismatch {
                expected: self.num_residuals,
                got: values.len(),
            });
        }
        Ok(values)
    }

    fn current_residuals(&self) -> Option<Vec<f64>> {
        if self.failure.borrow().is_some() {
            return None;
        }
        if let Some(values) = self.cached.borrow().as_ref() {
            return Some(values.clone());
        }
        let values = self.record(self.evaluate(self.params.as_slice(), Evaluation::Trial))?;
        *self.cached.borrow_mut() = Some(values.clone());
        Some(values)
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for LmWrapper<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        let projected = self.project(x);
        if projected != self.params {
            self.params = projected;
            *self.cached.get_mut() = None;
        }
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        self.current_residuals().map(DVector::from_vec)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let f0 = self.current_residuals()?;
        let estimate = self.groups.estimate(
            self.params.as_slice(),
            &f0,
            &self.bounds,
            self.diff_step,
            |xp| self.evaluate(xp, Evaluation::Probe),
        );
        self.record(estimate)
    }
}

/// Levenberg-Marquardt backend with finite-difference Jacobians.
///
/// Box bounds are enforced by projecting every point the solver proposes onto
/// the box before the residual function sees it. The sparsity hint groups
/// structurally independent columns so that one probe estimates several of
/// them.
#[derive(Debug, Default, Clone)]
pub struct LmBackend;

impl LeastSquaresBackend for LmBackend {
    fn solve(
        &self,
        f: &mut dyn ResidualFunction,
        problem: &BackendProblem<'_>,
        opts: &SolveOptions,
    ) -> Result<BackendOutcome> {
        let n = problem.x0.len();
        let m = f.num_residuals();
        check_options(opts)?;
        if problem.bounds.len() != n {
            return Err(OptimizerError::Backend(format!(
                "got {} bounds for {n} parameters",
                problem.bounds.len()
            )));
        }
        let groups = match problem.sparsity {
            Some(pattern) if pattern.shape() != (m, n) => {
                return Err(OptimizerError::Backend(format!(
                    "sparsity pattern has shape {:?}, expected {:?}",
                    pattern.shape(),
                    (m, n)
                )))
            }
            Some(pattern) => ColumnGroups::from_pattern(pattern),
            None => ColumnGroups::dense(n),
        };
        debug!(
            "LM: {m} residuals, {n} parameters, {} probes per Jacobian",
            groups.len()
        );

        let patience = opts
            .max_evaluations
            .map_or(DEFAULT_PATIENCE, |cap| cap.div_ceil(n + 1).max(1));
        let lm = LevenbergMarquardt::new()
            .with_ftol(opts.ftol)
            .with_xtol(opts.xtol)
            .with_gtol(opts.gtol)
            .with_patience(patience)
            .with_scale_diag(opts.x_scale == ScalingMode::Jacobian);

        let x0 = DVector::from_column_slice(problem.x0);
        let mut wrapper = LmWrapper {
            f: RefCell::new(f),
            num_residuals: m,
            bounds: problem.bounds.to_vec(),
            groups,
            diff_step: opts.diff_step,
            params: DVector::zeros(n),
            cached: RefCell::new(None),
            evaluations: Cell::new(0),
            failure: RefCell::new(None),
        };
        wrapper.params = wrapper.project(&x0);

        let (wrapper, report) = lm.minimize(wrapper);
        if let Some(err) = wrapper.failure.into_inner() {
            return Err(err);
        }

        let outcome = BackendOutcome {
            x: wrapper.params.as_slice().to_vec(),
            message: termination_message(&report.termination),
            success: report.termination.was_successful(),
            evaluations: wrapper.evaluations.get(),
            final_cost: report.objective_function,
        };
        debug!(
            "LM finished after {} evaluations: {} (cost {:.6e})",
            outcome.evaluations, outcome.message, outcome.final_cost
        );
        Ok(outcome)
    }
}

/// Human-readable form of the solver's termination reason.
fn termination_message(reason: &TerminationReason) -> String {
    match reason {
        TerminationReason::ResidualsZero => "residuals are zero".to_string(),
        TerminationReason::Orthogonal => {
            "residuals are orthogonal to the Jacobian columns (gtol satisfied)".to_string()
        }
        TerminationReason::Converged { ftol, xtol } => match (*ftol, *xtol) {
            (true, true) => "converged: cost reduction and step below ftol and xtol".to_string(),
            (true, false) => "converged: relative cost reduction below ftol".to_string(),
            _ => "converged: relative step below xtol".to_string(),
        },
        TerminationReason::LostPatience => "evaluation limit reached".to_string(),
        TerminationReason::NoImprovementPossible(what) => {
            format!("no further improvement possible ({what} is too small)")
        }
        TerminationReason::Numerical(what) => format!("numerical failure in {what}"),
        TerminationReason::WrongDimensions(what) => format!("dimension mismatch in {what}"),
        TerminationReason::NoParameters => "no parameters to optimize".to_string(),
        TerminationReason::NoResiduals => "no residuals to minimize".to_string(),
        TerminationReason::User(what) => format!("stopped: {what}"),
        #[allow(unreachable_patterns)]
        other => format!("{other:?}"),
    }
}

fn check_options(opts: &SolveOptions) -> Result<()> {
    let tolerances = [("ftol", opts.ftol), ("xtol", opts.xtol), ("gtol", opts.gtol)];
    for (name, value) in tolerances {
        if value.is_nan() || value < 0.0 {
            return Err(OptimizerError::Backend(format!(
                "{name} must be non-negative, got {value}"
            )));
        }
    }
    if opts.diff_step.is_nan() || opts.diff_step <= 0.0 {
        return Err(OptimizerError::Backend(format!(
            "diff_step must be positive, got {}",
            opts.diff_step
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Closure<F> {
        m: usize,
        f: F,
        trials: usize,
        probes: usize,
    }

    impl<F> Closure<F>
    where
        F: FnMut(&[f64]) -> Result<Vec<f64>>,
    {
        fn new(m: usize, f: F) -> Self {
            Self {
                m,
                f,
                trials: 0,
                probes: 0,
            }
        }
    }

    impl<F> ResidualFunction for Closure<F>
    where
        F: FnMut(&[f64]) -> Result<Vec<f64>>,
    {
        fn num_residuals(&self) -> usize {
            self.m
        }

        fn evaluate(&mut self, x: &[f64], kind: Evaluation) -> Result<Vec<f64>> {
            match kind {
                Evaluation::Trial => self.trials += 1,
                Evaluation::Probe => self.probes += 1,
            }
            (self.f)(x)
        }
    }

    #[test]
    fn lm_backend_solves_trivial_problem() {
        let mut f = Closure::new(1, |x: &[f64]| Ok(vec![x[0] - 3.0]));
        let bounds = [Bound::UNBOUNDED];
        let problem = BackendProblem {
            x0: &[10.0],
            bounds: &bounds,
            sparsity: None,
        };

        let outcome = LmBackend
            .solve(&mut f, &problem, &SolveOptions::default())
            .unwrap();

        assert!(
            (outcome.x[0] - 3.0).abs() < 1e-6,
            "expected optimizer to reach 3.0, got {}",
            outcome.x[0]
        );
        assert!(
            outcome.final_cost.abs() < 1e-12,
            "final cost too high: {}",
            outcome.final_cost
        );
        assert!(outcome.success, "LM backend did not report convergence: {outcome:?}");
        assert_eq!(outcome.evaluations, f.trials + f.probes);
        assert!(f.probes > 0, "expected finite-difference probes");
    }

    #[test]
    fn active_bound_holds_the_parameter() {
        let mut f = Closure::new(2, |x: &[f64]| Ok(vec![x[0] - 3.0, x[1] + 1.0]));
        let bounds = [Bound::at_most(2.0), Bound::UNBOUNDED];
        let problem = BackendProblem {
            x0: &[0.0, 0.0],
            bounds: &bounds,
            sparsity: None,
        };

        let outcome = LmBackend
            .solve(&mut f, &problem, &SolveOptions::default())
            .unwrap();

        assert!(
            (outcome.x[0] - 2.0).abs() < 1e-12,
            "bounded parameter should sit on its bound, got {}",
            outcome.x[0]
        );
        assert!(
            (outcome.x[1] + 1.0).abs() < 1e-6,
            "free parameter should reach -1, got {}",
            outcome.x[1]
        );
    }

    #[test]
    fn residual_failure_aborts_the_solve() {
        let mut f = Closure::new(1, |x: &[f64]| {
            if x[0] < 5.0 {
                Err(OptimizerError::Objective(anyhow::anyhow!("diverged")))
            } else {
                Ok(vec![x[0] - 3.0])
            }
        });
        let bounds = [Bound::UNBOUNDED];
        let problem = BackendProblem {
            x0: &[10.0],
            bounds: &bounds,
            sparsity: None,
        };

        let err = LmBackend
            .solve(&mut f, &problem, &SolveOptions::default())
            .unwrap_err();
        assert!(matches!(err, OptimizerError::Objective(_)));
    }

    #[test]
    fn termination_reasons_read_as_text() {
        assert_eq!(
            termination_message(&TerminationReason::LostPatience),
            "evaluation limit reached"
        );
        let converged = TerminationReason::Converged {
            ftol: true,
            xtol: false,
        };
        assert_eq!(
            termination_message(&converged),
            "converged: relative cost reduction below ftol"
        );
        assert_eq!(
            termination_message(&TerminationReason::Numerical("jacobian")),
            "numerical failure in jacobian"
        );
    }

    #[test]
    fn outcome_message_is_readable_text() {
        let mut f = Closure::new(2, |x: &[f64]| Ok(vec![x[0] - 1.0, 2.0 * x[0] + 0.5]));
        let bounds = [Bound::UNBOUNDED];
        let problem = BackendProblem {
            x0: &[4.0],
            bounds: &bounds,
            sparsity: None,
        };
        let outcome = LmBackend
            .solve(&mut f, &problem, &SolveOptions::default())
            .unwrap();
        assert!(
            !outcome.message.contains('{') && !outcome.message.is_empty(),
            "unexpected termination message: {}",
            outcome.message
        );
    }

    #[test]
    fn invalid_options_are_rejected() {
        let mut f = Closure::new(1, |x: &[f64]| Ok(vec![x[0]]));
        let bounds = [Bound::UNBOUNDED];
        let problem = BackendProblem {
            x0: &[1.0],
            bounds: &bounds,
            sparsity: None,
        };
        let opts = SolveOptions {
            diff_step: 0.0,
            ..SolveOptions::default()
        };
        let err = LmBackend.solve(&mut f, &problem, &opts).unwrap_err();
        assert!(matches!(err, OptimizerError::Backend(_)));
        assert_eq!(f.trials + f.probes, 0);
    }
}
