use std::sync::Arc;

use glam::DVec3;
use repulsor::progress::{closure_sink, ProgressMsg};
use repulsor::{BarnesHutTpe, FlowError, SurfaceFlow, TotalAreaConstraint};
use repulsor_utils::MeshShapes;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Two unit spheres facing each other across a unit gap. The
    // tangent-point energy pushes them apart while keeping each sphere
    // smooth.
    let a = MeshShapes::translated(&MeshShapes::icosphere(2), DVec3::new(-1.5, 0.0, 0.0));
    let b = MeshShapes::translated(&MeshShapes::icosphere(2), DVec3::new(1.5, 0.0, 0.0));
    let mesh = MeshShapes::merged(&a, &b);

    // Report line searches and completed steps as they happen.
    let (sink, listener) = closure_sink(64, |msg| match msg {
        ProgressMsg::FlowStep {
            energy_before,
            energy_after,
            step_size,
        } => println!(
            "step of size {:.3e}: energy {:.6e} -> {:.6e}",
            step_size, energy_before, energy_after
        ),
        ProgressMsg::LineSearch { backtracks, .. } if backtracks > 0 => {
            println!("  backtracked {} times", backtracks)
        }
        _ => {}
    });

    // Barnes-Hut tangent-point energy with the typical exponents, holding
    // total surface area fixed.
    let energy = BarnesHutTpe::new(3.0, 6.0, 0.25);
    let mut flow = SurfaceFlow::new(mesh, Box::new(energy)).with_callback(Arc::clone(&sink));
    flow.add_constraint(Box::new(TotalAreaConstraint::new(flow.mesh())));

    for iteration in 0..10 {
        match flow.step_fractional_sobolev() {
            Ok(info) if info.step_size == 0.0 => {
                println!("stationary after {} iterations", iteration);
                break;
            }
            Ok(_) => {}
            Err(FlowError::LineSearchFailed { backtracks }) => {
                println!(
                    "line search failed after {} backtracks; stopping",
                    backtracks
                );
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    println!("final area: {:.6}", flow.mesh().total_area());

    drop(flow);
    drop(sink);
    listener.join().ok();
    Ok(())
}
