//! End-to-end solves on a synthetic range-based camera localization problem.
//!
//! Two cameras measure ranges to six known markers. Each camera position is a
//! fixed-3 parameter group, and each range residual depends on one camera
//! only, which gives the sparsity pattern a block structure.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use nalgebra::Vector3;
use paramopt::{
    Bound, DataModels, GroupOptions, Optimizer, OptimizerError, ResidualValues, SolveOptions,
};

#[derive(Debug, Clone)]
struct Camera {
    position: Vector3<f64>,
}

#[derive(Debug, Clone)]
struct Scene {
    markers: Vec<Vector3<f64>>,
    /// Measured ranges per camera, one per marker.
    ranges: Vec<Vec<f64>>,
}

const CAMERAS: [&str; 2] = ["cam0", "cam1"];

fn ground_truth() -> [Vector3<f64>; 2] {
    [Vector3::new(0.3, -2.0, 1.5), Vector3::new(2.0, 0.5, -1.0)]
}

fn scene() -> Scene {
    let markers = vec![
        Vector3::new(0.0, 0.0, 0.0),
        Vector3::new(1.0, 0.0, 0.0),
        Vector3::new(0.0, 1.0, 0.0),
        Vector3::new(0.0, 0.0, 1.0),
        Vector3::new(1.0, 1.0, 1.0),
        Vector3::new(-1.0, 0.5, 0.3),
    ];
    let ranges = ground_truth()
        .iter()
        .map(|c| markers.iter().map(|m| (m - c).norm()).collect())
        .collect();
    Scene { markers, ranges }
}

fn residual_name(cam: usize, marker: usize) -> String {
    format!("{}_m{marker}", CAMERAS[cam])
}

fn range_errors(models: &DataModels) -> anyhow::Result<Vec<(String, f64)>> {
    let scene = models.get::<Scene>("scene")?;
    let mut out = Vec::new();
    for (c, name) in CAMERAS.iter().enumerate() {
        let cam = models.get::<Camera>(name)?;
        for (k, marker) in scene.markers.iter().enumerate() {
            let predicted = (marker - cam.position).norm();
            out.push((residual_name(c, k), predicted - scene.ranges[c][k]));
        }
    }
    Ok(out)
}

fn ordered_objective(models: &DataModels) -> anyhow::Result<ResidualValues> {
    Ok(ResidualValues::Ordered(
        range_errors(models)?.into_iter().map(|(_, e)| e).collect(),
    ))
}

fn named_objective(models: &DataModels) -> anyhow::Result<ResidualValues> {
    let map: HashMap<String, f64> = range_errors(models)?.into_iter().collect();
    Ok(ResidualValues::Named(map))
}

/// Builds the problem with both cameras offset from the ground truth.
fn build(offset: f64, bounds: Option<Vec<Bound>>) -> Optimizer {
    let scene = scene();
    let num_markers = scene.markers.len();
    let mut opt = Optimizer::new();
    opt.add_data_model("scene", scene).unwrap();

    for (c, gt) in ground_truth().iter().enumerate() {
        let start = gt + Vector3::new(offset, -offset, offset);
        opt.add_data_model(CAMERAS[c], Camera { position: start })
            .unwrap();
        let mut options = GroupOptions::default();
        if c == 0 {
            if let Some(bounds) = bounds.clone() {
                options = options.with_bounds(bounds);
            }
        }
        opt.push_param_v3(
            format!("{}_", CAMERAS[c]),
            CAMERAS[c],
            |cam: &Camera| cam.position.iter().copied().collect(),
            |cam: &mut Camera, v: &[f64]| cam.position = Vector3::new(v[0], v[1], v[2]),
            options,
        )
        .unwrap();
    }

    for c in 0..CAMERAS.len() {
        let params = opt.params_containing(&format!("{}_", CAMERAS[c]));
        let params: Vec<String> = params.into_iter().map(str::to_string).collect();
        for k in 0..num_markers {
            opt.push_residual(residual_name(c, k), params.clone()).unwrap();
        }
    }
    opt
}

#[test]
fn cameras_converge_to_ground_truth() {
    let mut opt = build(0.3, None);
    let pattern = opt.compute_sparse_matrix().unwrap();
    let groups = paramopt::backend::ColumnGroups::from_pattern(pattern);
    assert_eq!(groups.len(), 3, "the two cameras should share probes");
    opt.set_objective_function(ordered_objective);

    let report = opt.run_optimization(&SolveOptions::default()).unwrap().clone();

    assert!(report.success, "solver did not converge: {}", report.message);
    assert!(
        report.final_cost < 1e-12,
        "final cost too high: {}",
        report.final_cost
    );
    assert!(report.final_cost < report.initial_cost);
    assert_eq!(report.x0.len(), 6);
    assert_eq!(opt.x0(), report.x0.as_slice());
    assert_eq!(opt.xf(), report.xf.as_slice());

    for (c, gt) in ground_truth().iter().enumerate() {
        let cam = opt.model::<Camera>(CAMERAS[c]).unwrap();
        assert!(
            (cam.position - gt).norm() < 1e-5,
            "{} ended at {:?}, expected {:?}",
            CAMERAS[c],
            cam.position,
            gt
        );
        let slice = &opt.xf()[3 * c..3 * c + 3];
        assert_eq!(slice, cam.position.as_slice(), "xf and model disagree");
    }
}

#[test]
fn named_residuals_give_the_same_solution() {
    let mut ordered = build(0.2, None);
    ordered.compute_sparse_matrix().unwrap();
    ordered.set_objective_function(ordered_objective);
    ordered.run_optimization(&SolveOptions::default()).unwrap();

    let mut named = build(0.2, None);
    named.compute_sparse_matrix().unwrap();
    named.set_objective_function(named_objective);
    named.run_optimization(&SolveOptions::default()).unwrap();

    assert_eq!(ordered.xf(), named.xf());
}

#[test]
fn dense_jacobian_is_used_without_a_pattern() {
    let mut opt = build(0.2, None);
    opt.set_objective_function(ordered_objective);
    let report = opt.run_optimization(&SolveOptions::default()).unwrap();
    assert!(report.success, "solver did not converge: {}", report.message);
    assert!(report.final_cost < 1e-12);
}

#[test]
fn bounded_parameter_stays_inside_its_box() {
    let bounds = vec![Bound::UNBOUNDED, Bound::UNBOUNDED, Bound::new(0.0, 1.2)];
    let mut opt = build(-0.5, Some(bounds));
    assert!((opt.x()[2] - 1.0).abs() < 1e-12);
    opt.compute_sparse_matrix().unwrap();
    opt.set_objective_function(ordered_objective);

    let report = opt.run_optimization(&SolveOptions::default()).unwrap().clone();

    let z = report.xf[2];
    assert!(z <= 1.2 + 1e-12, "cam0_z left its bounds: {z}");
    assert!(z >= 0.0, "cam0_z left its bounds: {z}");
    assert_eq!(opt.model::<Camera>("cam0").unwrap().position.z, z);
    assert!(report.final_cost < report.initial_cost);
}

#[test]
fn evaluation_cap_is_reported_not_raised() {
    let mut opt = build(0.5, None);
    opt.compute_sparse_matrix().unwrap();
    opt.set_objective_function(ordered_objective);
    let opts = SolveOptions {
        max_evaluations: Some(7),
        ..SolveOptions::default()
    };

    let report = opt.run_optimization(&opts).unwrap();
    // Seven trial evaluations with three probes each, plus the initial and
    // final objective calls.
    assert!(
        report.evaluations <= 2 + 7 * 4,
        "cap exceeded: {} evaluations",
        report.evaluations
    );
    assert!(!report.message.is_empty());
}

#[test]
fn missing_named_residual_aborts_before_solving() {
    let mut opt = build(0.2, None);
    opt.set_objective_function(|models: &DataModels| {
        let mut map: HashMap<String, f64> = range_errors(models)?.into_iter().collect();
        map.remove("cam1_m3");
        Ok(ResidualValues::Named(map))
    });

    let x_before = opt.x().to_vec();
    let err = opt.run_optimization(&SolveOptions::default()).unwrap_err();
    assert!(matches!(err, OptimizerError::MissingResidual(ref n) if n == "cam1_m3"));
    assert_eq!(opt.x(), x_before.as_slice());
    assert!(opt.report().is_none());
    assert!(matches!(
        opt.call_objective(),
        Err(OptimizerError::MissingResidual(_))
    ));
}

#[test]
fn residual_count_is_checked_on_first_evaluation() {
    let mut opt = build(0.2, None);
    opt.set_objective_function(|models: &DataModels| {
        let mut errors: Vec<f64> = range_errors(models)?.into_iter().map(|(_, e)| e).collect();
        errors.pop();
        Ok(ResidualValues::Ordered(errors))
    });

    let err = opt.run_optimization(&SolveOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        OptimizerError::ResidualCountMismatch { expected: 12, got: 11 }
    ));
}

#[test]
fn objective_failure_restores_the_starting_point() {
    let mut opt = build(0.3, None);
    opt.compute_sparse_matrix().unwrap();
    let calls = Rc::new(Cell::new(0_usize));
    let counter = Rc::clone(&calls);
    opt.set_objective_function(move |models: &DataModels| {
        counter.set(counter.get() + 1);
        if counter.get() > 5 {
            anyhow::bail!("lost tracking");
        }
        ordered_objective(models)
    });

    let x_start = opt.x().to_vec();
    let err = opt.run_optimization(&SolveOptions::default()).unwrap_err();
    assert!(matches!(err, OptimizerError::Objective(_)));
    assert_eq!(calls.get(), 6);
    assert_eq!(opt.x(), x_start.as_slice());
    let cam0 = opt.model::<Camera>("cam0").unwrap();
    assert_eq!(cam0.position.as_slice(), &x_start[..3]);
}

#[test]
fn residual_table_lists_final_errors() {
    let mut opt = build(0.1, None);
    opt.compute_sparse_matrix().unwrap();
    opt.set_objective_function(ordered_objective);
    let final_residuals = opt
        .run_optimization(&SolveOptions::default())
        .unwrap()
        .final_residuals
        .clone();

    let table = opt.residual_table(Some(&final_residuals)).unwrap();
    assert_eq!(table.rows.len(), 12);
    assert_eq!(table.rows[7].0, "cam1_m1");
    assert!(table.rows.iter().all(|(_, v)| v.abs() < 1e-5));
    assert_eq!(opt.call_objective().unwrap(), final_residuals);
}
