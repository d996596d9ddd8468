//! Camera position and focal length from pixel observations of known markers.
//!
//! A pinhole camera looking down +Z observes eight markers. The camera
//! position is a fixed-3 parameter group and the focal length a scalar group;
//! each pixel coordinate is one residual. The example perturbs the ground
//! truth, solves, and prints the parameter and residual tables.
//!
//! Run with: `RUST_LOG=info cargo run -p paramopt --example marker_pose`

use anyhow::Result;
use nalgebra::{Point2, Vector3};
use paramopt::{
    Bound, DataModels, GroupOptions, Optimizer, ProgressCadence, ProgressEvent, ResidualValues,
    SolveOptions,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Debug, Clone)]
struct Camera {
    position: Vector3<f64>,
    focal: f64,
}

impl Camera {
    fn project(&self, p: &Vector3<f64>) -> Point2<f64> {
        let d = p - self.position;
        Point2::new(self.focal * d.x / d.z, self.focal * d.y / d.z)
    }
}

#[derive(Debug, Clone)]
struct Observations {
    markers: Vec<Vector3<f64>>,
    pixels: Vec<Point2<f64>>,
}

fn main() -> Result<()> {
    env_logger::init();
    println!("=== Marker-based camera localization ===\n");

    let gt = Camera {
        position: Vector3::new(0.2, -0.1, -2.0),
        focal: 800.0,
    };
    let markers = vec![
        Vector3::new(-0.5, -0.5, 0.0),
        Vector3::new(0.5, -0.5, 0.0),
        Vector3::new(0.5, 0.5, 0.0),
        Vector3::new(-0.5, 0.5, 0.0),
        Vector3::new(0.0, 0.0, 0.4),
        Vector3::new(-0.3, 0.2, 0.8),
        Vector3::new(0.4, -0.2, 0.6),
        Vector3::new(0.1, 0.4, 1.0),
    ];
    let pixels = markers.iter().map(|m| gt.project(m)).collect();

    let mut opt = Optimizer::new();
    opt.add_data_model("camera", gt.clone())?;
    opt.add_data_model("observations", Observations { markers, pixels })?;

    opt.push_param_v3(
        "cam_",
        "camera",
        |c: &Camera| c.position.iter().copied().collect(),
        |c: &mut Camera, v: &[f64]| c.position = Vector3::new(v[0], v[1], v[2]),
        GroupOptions::default(),
    )?;
    opt.push_param_scalar(
        "focal",
        "camera",
        |c: &Camera| vec![c.focal],
        |c: &mut Camera, v: &[f64]| c.focal = v[0],
        Bound::new(100.0, 5000.0),
    )?;

    let num_markers = opt.model::<Observations>("observations")?.markers.len();
    for k in 0..num_markers {
        for axis in ["u", "v"] {
            opt.push_residual(format!("m{k}_{axis}"), ["cam_x", "cam_y", "cam_z", "focal"])?;
        }
    }
    opt.compute_sparse_matrix()?;
    println!("{}", opt.models_summary());

    opt.set_objective_function(|models: &DataModels| {
        let camera = models.get::<Camera>("camera")?;
        let obs = models.get::<Observations>("observations")?;
        let mut errors = Vec::with_capacity(2 * obs.markers.len());
        for (marker, pixel) in obs.markers.iter().zip(&obs.pixels) {
            let predicted = camera.project(marker);
            errors.push(predicted.x - pixel.x);
            errors.push(predicted.y - pixel.y);
        }
        Ok(ResidualValues::Ordered(errors))
    });
    opt.set_visualization_function(
        |event: &ProgressEvent<'_>| -> anyhow::Result<()> {
            println!(
                "  eval {:>3}: total |error| = {:.4} px",
                event.evaluation,
                event.total_error()
            );
            Ok(())
        },
        ProgressCadence::EveryN { n: 2 },
    );

    let mut rng = StdRng::seed_from_u64(42);
    let start = opt.perturbed_vector(0.05, &mut rng)?;
    opt.set_x(&start)?;

    println!("--- Optimizing ---");
    let report = opt.run_optimization(&SolveOptions::default())?.clone();
    println!("\n{report}");

    println!("--- Parameters (vector vs model) ---");
    println!("{}", opt.parameter_table(None)?);
    println!("--- Final residuals ---");
    println!("{}", opt.residual_table(Some(&report.final_residuals))?);

    let solved = opt.model::<Camera>("camera")?;
    println!(
        "Position error: {:.2e}, focal error: {:.2e}",
        (solved.position - gt.position).norm(),
        (solved.focal - gt.focal).abs()
    );
    Ok(())
}
