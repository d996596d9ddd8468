//! The parameter coordinator.

use std::any::{type_name, Any};
use std::fmt::Write as _;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use log::{debug, info, warn};
use rand::Rng;

use crate::adapter::{evaluate_objective, ObjectiveAdapter, ObjectiveFn};
use crate::backend::{BackendProblem, LeastSquaresBackend, LmBackend, SolveOptions};
use crate::config::OptimizerConfig;
use crate::error::{OptimizerError, Result};
use crate::models::DataModels;
use crate::params::{
    erase_getter, erase_setter, Bound, GroupKind, GroupOptions, GroupSpec, ParamGroup,
    ParamRegistry,
};
use crate::progress::{
    notify, FnObserver, Notify, ProgressCadence, ProgressEvent, ProgressObserver,
    ProgressSession,
};
use crate::report::{cost, OptimizationReport, ParameterTable, ResidualTable};
use crate::residuals::{ResidualRegistry, ResidualValues};
use crate::sparsity::SparsityPattern;

/// Keeps a flat parameter vector, typed data models and an objective in sync
/// while a least-squares backend drives the vector.
///
/// Typical wiring: add data models, register parameter groups (which reads
/// their initial values), register residuals, compute the sparsity pattern,
/// set the objective and run the optimization. The optimized state is then
/// available both as [`Optimizer::xf`] and inside the models.
#[derive(Default)]
pub struct Optimizer {
    models: DataModels,
    params: ParamRegistry,
    residuals: ResidualRegistry,
    x: Vec<f64>,
    x0: Vec<f64>,
    xf: Vec<f64>,
    sparsity: Option<SparsityPattern>,
    objective: Option<Box<ObjectiveFn>>,
    observer: Option<Box<dyn ProgressObserver>>,
    cadence: ProgressCadence,
    report: Option<OptimizationReport>,
}

impl Optimizer {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------------------------------------------------------------
    // Data models

    /// Registers a data model under `name`.
    pub fn add_data_model<T: Any>(&mut self, name: impl Into<String>, model: T) -> Result<()> {
        let name = name.into();
        self.models.insert(name.clone(), model)?;
        debug!("added data model `{name}` of type {}", type_name::<T>());
        Ok(())
    }

    pub fn model<T: Any>(&self, name: &str) -> Result<&T> {
        self.models.get(name)
    }

    /// Mutable access to a model.
    ///
    /// Changes are not reflected in the parameter vector until
    /// [`Optimizer::sync_vector_from_models`] is called.
    pub fn model_mut<T: Any>(&mut self, name: &str) -> Result<&mut T> {
        self.models.get_mut(name)
    }

    pub fn models(&self) -> &DataModels {
        &self.models
    }

    /// Consumes the coordinator and returns the models.
    pub fn into_models(self) -> DataModels {
        self.models
    }

    // ---------------------------------------------------------------------
    // Parameter groups

    /// Registers a single parameter named `group`.
    ///
    /// The getter must return exactly one value.
    pub fn push_param_scalar<T, G, S>(
        &mut self,
        group: impl Into<String>,
        data_key: impl Into<String>,
        getter: G,
        setter: S,
        bound: Bound,
    ) -> Result<&ParamGroup>
    where
        T: Any,
        G: Fn(&T) -> Vec<f64> + 'static,
        S: Fn(&mut T, &[f64]) + 'static,
    {
        let options = GroupOptions::default().with_bounds(vec![bound]);
        self.push_group::<T, G, S>(GroupKind::Scalar, group, data_key, getter, setter, options)
    }

    /// Registers three parameters named `{group}{suffix}`, suffixes defaulting
    /// to `x`, `y`, `z`.
    pub fn push_param_v3<T, G, S>(
        &mut self,
        group: impl Into<String>,
        data_key: impl Into<String>,
        getter: G,
        setter: S,
        options: GroupOptions,
    ) -> Result<&ParamGroup>
    where
        T: Any,
        G: Fn(&T) -> Vec<f64> + 'static,
        S: Fn(&mut T, &[f64]) + 'static,
    {
        self.push_group::<T, G, S>(GroupKind::Vector3, group, data_key, getter, setter, options)
    }

    /// Registers `N` parameters named `{group}{suffix}`.
    ///
    /// `N` is `options.arity` or, when unset, the length of the getter's
    /// output. Suffixes default to `0..N`.
    pub fn push_param_vector<T, G, S>(
        &mut self,
        group: impl Into<String>,
        data_key: impl Into<String>,
        getter: G,
        setter: S,
        options: GroupOptions,
    ) -> Result<&ParamGroup>
    where
        T: Any,
        G: Fn(&T) -> Vec<f64> + 'static,
        S: Fn(&mut T, &[f64]) + 'static,
    {
        self.push_group::<T, G, S>(GroupKind::Vector, group, data_key, getter, setter, options)
    }

    fn push_group<T, G, S>(
        &mut self,
        kind: GroupKind,
        group: impl Into<String>,
        data_key: impl Into<String>,
        getter: G,
        setter: S,
        options: GroupOptions,
    ) -> Result<&ParamGroup>
    where
        T: Any,
        G: Fn(&T) -> Vec<f64> + 'static,
        S: Fn(&mut T, &[f64]) + 'static,
    {
        let spec = GroupSpec {
            kind,
            name: group.into(),
            data_key: data_key.into(),
            model_type: type_name::<T>(),
            getter: erase_getter(getter),
            setter: erase_setter(setter),
            options,
        };
        let group = self.params.register(spec, &self.models, &mut self.x)?;
        self.sparsity = None;
        Ok(group)
    }

    pub fn params(&self) -> &ParamRegistry {
        &self.params
    }

    /// Parameter names in vector order.
    pub fn parameter_names(&self) -> Vec<&str> {
        self.params.parameter_names().collect()
    }

    /// Parameter names containing `pattern`.
    pub fn params_containing(&self, pattern: &str) -> Vec<&str> {
        self.params
            .parameter_names()
            .filter(|name| name.contains(pattern))
            .collect()
    }

    /// Per-parameter bounds in vector order.
    pub fn bounds(&self) -> Vec<Bound> {
        self.params.bounds()
    }

    // ---------------------------------------------------------------------
    // Residuals

    /// Declares a residual and the parameters that influence it.
    ///
    /// Every parameter name must already be registered.
    pub fn push_residual<I, S>(&mut self, name: impl Into<String>, params: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        if self.residuals.get(&name).is_some() {
            return Err(OptimizerError::DuplicateResidual(name));
        }
        let params: Vec<String> = params.into_iter().map(Into::into).collect();
        if let Some(unknown) = params.iter().find(|p| self.params.resolve(p).is_none()) {
            return Err(OptimizerError::UnknownParameter {
                residual: name,
                param: unknown.clone(),
            });
        }
        self.residuals.push(name, params)?;
        self.sparsity = None;
        Ok(())
    }

    pub fn residuals(&self) -> &ResidualRegistry {
        &self.residuals
    }

    // ---------------------------------------------------------------------
    // Sparsity

    /// Builds the residual-by-parameter pattern used as the Jacobian hint.
    ///
    /// Any later registration discards it; the solve then falls back to a
    /// dense Jacobian until this is called again.
    pub fn compute_sparse_matrix(&mut self) -> Result<&SparsityPattern> {
        let pattern = SparsityPattern::build(&self.residuals, &self.params)?;
        debug!(
            "sparsity pattern {:?} with {} non-zeros",
            pattern.shape(),
            pattern.nnz()
        );
        Ok(&*self.sparsity.insert(pattern))
    }

    pub fn sparsity(&self) -> Option<&SparsityPattern> {
        self.sparsity.as_ref()
    }

    /// The current pattern as a labeled 0/1 grid, if computed.
    pub fn sparsity_table(&self) -> Option<String> {
        let pattern = self.sparsity.as_ref()?;
        let (rows, cols) = self.labels();
        Some(pattern.labeled(&rows, &cols).to_string())
    }

    fn labels(&self) -> (Vec<String>, Vec<String>) {
        (
            self.residuals.names().map(str::to_string).collect(),
            self.params.parameter_names().map(str::to_string).collect(),
        )
    }

    /// Writes the current pattern as CSV, residuals as rows and parameters as
    /// columns. Computes the pattern first if needed.
    pub fn export_sparsity_csv(&mut self, path: impl AsRef<Path>) -> Result<()> {
        if self.sparsity.is_none() {
            self.compute_sparse_matrix()?;
        }
        let (rows, cols) = self.labels();
        if let Some(pattern) = &self.sparsity {
            let file = BufWriter::new(File::create(path.as_ref())?);
            pattern.labeled(&rows, &cols).write_csv(file)?;
            debug!("wrote sparsity pattern to {}", path.as_ref().display());
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Objective and progress

    pub fn set_objective_function<F>(&mut self, objective: F)
    where
        F: Fn(&DataModels) -> anyhow::Result<ResidualValues> + 'static,
    {
        self.objective = Some(Box::new(objective));
    }

    /// Installs an observer notified at `cadence` while solving.
    pub fn set_progress_observer<O>(&mut self, observer: O, cadence: ProgressCadence)
    where
        O: ProgressObserver + 'static,
    {
        self.observer = Some(Box::new(observer));
        self.cadence = cadence;
    }

    /// Installs a closure as the progress observer.
    pub fn set_visualization_function<F>(&mut self, visualize: F, cadence: ProgressCadence)
    where
        F: FnMut(&ProgressEvent<'_>) -> anyhow::Result<()> + 'static,
    {
        self.set_progress_observer(FnObserver(visualize), cadence);
    }

    pub fn set_progress_cadence(&mut self, cadence: ProgressCadence) {
        self.cadence = cadence;
    }

    pub fn progress_cadence(&self) -> ProgressCadence {
        self.cadence
    }

    // ---------------------------------------------------------------------
    // Vector synchronization

    /// Reads every group's model values into `x` (models to vector).
    pub fn push_model_values_into_vector(&self, x: &mut [f64]) -> Result<()> {
        self.params.read_into(&self.models, x)
    }

    /// Applies `x` to every group's model (vector to models).
    pub fn push_vector_values_into_models(&mut self, x: &[f64]) -> Result<()> {
        self.params.write_from(x, &mut self.models)
    }

    /// Refreshes the live vector from the models.
    pub fn sync_vector_from_models(&mut self) -> Result<()> {
        self.params.read_into(&self.models, &mut self.x)
    }

    /// Replaces the live vector and applies it to the models.
    pub fn set_x(&mut self, x: &[f64]) -> Result<()> {
        self.params.write_from(x, &mut self.models)?;
        self.x.clear();
        self.x.extend_from_slice(x);
        Ok(())
    }

    /// Live parameter vector.
    pub fn x(&self) -> &[f64] {
        &self.x
    }

    /// Vector at the start of the last solve.
    pub fn x0(&self) -> &[f64] {
        &self.x0
    }

    /// Vector at the end of the last solve.
    pub fn xf(&self) -> &[f64] {
        &self.xf
    }

    /// Copy of `x` with each entry scaled by a uniform factor in
    /// `[1 - noise, 1 + noise]`.
    ///
    /// Fails with [`OptimizerError::InvalidNoise`] for a NaN or infinite level.
    pub fn perturbed_vector<R>(&self, noise: f64, rng: &mut R) -> Result<Vec<f64>>
    where
        R: Rng + ?Sized,
    {
        if !noise.is_finite() {
            return Err(OptimizerError::InvalidNoise(noise));
        }
        let noise = noise.abs();
        Ok(self
            .x
            .iter()
            .map(|v| {
                let factor = if noise > 0.0 {
                    rng.gen_range(1.0 - noise..=1.0 + noise)
                } else {
                    1.0
                };
                v * factor
            })
            .collect())
    }

    // ---------------------------------------------------------------------
    // Solving

    /// Evaluates the objective once at the live vector.
    pub fn call_objective(&mut self) -> Result<Vec<f64>> {
        let objective = self
            .objective
            .as_deref()
            .ok_or(OptimizerError::MissingObjective)?;
        self.params.write_from(&self.x, &mut self.models)?;
        evaluate_objective(objective, &self.models, &self.residuals)
    }

    /// Runs the Levenberg-Marquardt backend.
    pub fn run_optimization(&mut self, opts: &SolveOptions) -> Result<&OptimizationReport> {
        self.run_optimization_with(&LmBackend, opts)
    }

    /// Applies the configured cadence, then runs the Levenberg-Marquardt backend.
    pub fn run_with_config(&mut self, config: &OptimizerConfig) -> Result<&OptimizationReport> {
        self.cadence = config.progress;
        self.run_optimization(&config.solve)
    }

    /// Runs `backend` from the live vector.
    ///
    /// On success the models hold the final vector. If the objective or the
    /// backend fails, the live vector and the models are restored to the
    /// starting point before the error is returned.
    pub fn run_optimization_with<B>(
        &mut self,
        backend: &B,
        opts: &SolveOptions,
    ) -> Result<&OptimizationReport>
    where
        B: LeastSquaresBackend + ?Sized,
    {
        let objective = self
            .objective
            .as_deref()
            .ok_or(OptimizerError::MissingObjective)?;

        self.x0.clone_from(&self.x);
        self.params.write_from(&self.x0, &mut self.models)?;
        let initial = evaluate_objective(objective, &self.models, &self.residuals)?;
        let bounds = self.params.bounds();
        info!(
            "starting optimization: {} parameters in {} groups, {} residuals, initial cost {:.6e}",
            self.params.num_params(),
            self.params.len(),
            self.residuals.len(),
            cost(&initial)
        );
        if self.sparsity.is_none() {
            debug!("no sparsity pattern computed, using a dense Jacobian");
        }

        let mut session = ProgressSession::new(self.cadence);
        if self.cadence.reports_during_solve() {
            session.record(&initial);
            if let Some(observer) = self.observer.as_deref_mut() {
                let event = ProgressEvent {
                    evaluation: 1,
                    residuals: &initial,
                    total_error_history: session.history(),
                    models: &self.models,
                };
                notify(observer, Notify::Start, &event);
            }
        }

        let problem = BackendProblem {
            x0: &self.x0,
            bounds: &bounds,
            sparsity: self.sparsity.as_ref(),
        };
        let mut adapter = ObjectiveAdapter {
            params: &self.params,
            residuals: &self.residuals,
            models: &mut self.models,
            x: &mut self.x,
            objective,
            observer: &mut self.observer,
            session: &mut session,
            evaluations: 1,
        };
        let solved = backend.solve(&mut adapter, &problem, opts);
        let evaluations = adapter.evaluations;

        let outcome = match solved {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("optimization aborted: {err}");
                self.x.clone_from(&self.x0);
                if let Err(restore) = self.params.write_from(&self.x0, &mut self.models) {
                    warn!("could not restore the initial state: {restore}");
                }
                return Err(err);
            }
        };

        self.xf.clone_from(&outcome.x);
        self.x.clone_from(&outcome.x);
        self.params.write_from(&self.xf, &mut self.models)?;
        let final_residuals = evaluate_objective(objective, &self.models, &self.residuals)?;
        let evaluations = evaluations + 1;
        session.record(&final_residuals);

        if let Some(observer) = self.observer.as_deref_mut() {
            let event = ProgressEvent {
                evaluation: evaluations,
                residuals: &final_residuals,
                total_error_history: session.history(),
                models: &self.models,
            };
            notify(observer, Notify::Finish(&outcome.message), &event);
        }

        let report = OptimizationReport {
            parameter_names: self.params.parameter_names().map(str::to_string).collect(),
            residual_names: self.residuals.names().map(str::to_string).collect(),
            x0: self.x0.clone(),
            xf: self.xf.clone(),
            initial_cost: cost(&initial),
            final_cost: cost(&final_residuals),
            initial_residuals: initial,
            final_residuals,
            evaluations,
            message: outcome.message,
            success: outcome.success,
        };
        info!(
            "optimization {} after {} evaluations ({}): cost {:.6e} -> {:.6e}",
            if report.success { "converged" } else { "stopped" },
            report.evaluations,
            report.message,
            report.initial_cost,
            report.final_cost
        );
        Ok(&*self.report.insert(report))
    }

    /// Report of the last successful solve.
    pub fn report(&self) -> Option<&OptimizationReport> {
        self.report.as_ref()
    }

    // ---------------------------------------------------------------------
    // Inspection

    /// Values of `x` next to what the models hold. Uses the live vector when
    /// `x` is `None`.
    pub fn parameter_table(&self, x: Option<&[f64]>) -> Result<ParameterTable> {
        ParameterTable::collect(&self.params, &self.models, x.unwrap_or(&self.x))
    }

    /// Residual names paired with `values`, or NaN when `None`.
    pub fn residual_table(&self, values: Option<&[f64]>) -> Result<ResidualTable> {
        ResidualTable::collect(&self.residuals, values)
    }

    /// One line per model and per group.
    pub fn models_summary(&self) -> String {
        let mut out = String::new();
        let keys = self.models.keys();
        let _ = writeln!(out, "{} data models: {}", keys.len(), keys.join(", "));
        for group in self.params.groups() {
            let _ = writeln!(
                out,
                "group `{}` on `{}`: {} at {:?}",
                group.name(),
                group.data_key(),
                group.param_names().join(", "),
                group.indices()
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pose {
        t: [f64; 3],
    }

    fn optimizer() -> Optimizer {
        let mut opt = Optimizer::new();
        opt.add_data_model("cam", Pose { t: [1.0, 2.0, 3.0] }).unwrap();
        opt.push_param_v3(
            "t",
            "cam",
            |p: &Pose| p.t.to_vec(),
            |p: &mut Pose, v: &[f64]| p.t.copy_from_slice(v),
            GroupOptions::default(),
        )
        .unwrap();
        opt
    }

    #[test]
    fn registration_invalidates_sparsity() {
        let mut opt = optimizer();
        opt.push_residual("r", ["tx"]).unwrap();
        opt.compute_sparse_matrix().unwrap();
        assert_eq!(opt.sparsity_table().unwrap(), "  tx ty tz\nr  1  0  0\n");
        opt.push_residual("s", ["ty", "tz"]).unwrap();
        assert!(opt.sparsity().is_none());
    }

    #[test]
    fn failed_residual_registration_keeps_sparsity() {
        let mut opt = optimizer();
        opt.push_residual("r", ["tx"]).unwrap();
        opt.compute_sparse_matrix().unwrap();
        let err = opt.push_residual("s", ["tw"]).unwrap_err();
        assert!(matches!(err, OptimizerError::UnknownParameter { ref param, .. } if param == "tw"));
        assert!(opt.sparsity().is_some());
        assert_eq!(opt.residuals().len(), 1);
    }

    #[test]
    fn solving_without_objective_fails() {
        let mut opt = optimizer();
        assert!(matches!(
            opt.run_optimization(&SolveOptions::default()),
            Err(OptimizerError::MissingObjective)
        ));
        assert!(matches!(opt.call_objective(), Err(OptimizerError::MissingObjective)));
    }

    #[test]
    fn params_containing_matches_substrings() {
        let opt = optimizer();
        assert_eq!(opt.params_containing("t"), vec!["tx", "ty", "tz"]);
        assert_eq!(opt.params_containing("y"), vec!["ty"]);
        assert!(opt.params_containing("q").is_empty());
    }

    #[test]
    fn perturbed_vector_stays_within_noise_band() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let opt = optimizer();
        let mut rng = StdRng::seed_from_u64(7);
        let noisy = opt.perturbed_vector(0.1, &mut rng).unwrap();
        for (v, n) in opt.x().iter().zip(&noisy) {
            assert!(
                (n / v - 1.0).abs() <= 0.1 + 1e-12,
                "{n} is not within 10% of {v}"
            );
        }
        assert_eq!(opt.perturbed_vector(0.0, &mut rng).unwrap(), opt.x());
    }

    #[test]
    fn non_finite_noise_is_rejected() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let opt = optimizer();
        let mut rng = StdRng::seed_from_u64(7);
        for noise in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
            assert!(matches!(
                opt.perturbed_vector(noise, &mut rng),
                Err(OptimizerError::InvalidNoise(_))
            ));
        }
    }

    #[test]
    fn models_summary_lists_groups() {
        let opt = optimizer();
        let summary = opt.models_summary();
        assert!(summary.starts_with("1 data models: cam\n"));
        assert!(summary.contains("group `t` on `cam`: tx, ty, tz at 0..3"));
    }
}
