/////////////////////////////////////////////////////////////////////////////////////////////
//
// Drives the Sobolev gradient flow: differential, projection, line search, commit.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use std::fmt;
use std::sync::Arc;

use faer::{Mat, MatRef};

use repulsor_bct::BlockClusterTree;
use repulsor_utils::{frobenius_dot, SurfaceMesh};

use crate::config::{FlowParams, HsParams};
use crate::constraints::{Constraint, ConstraintSet};
use crate::energy::{EnergyError, SurfaceEnergy};
use crate::hs::{get_s, HsError, HsMetric, SchurComplement};
use crate::progress::{ProgressMsg, ProgressSink};
use crate::remesh::Remesher;

/// Errors surfaced by a flow step.
#[derive(Debug)]
pub enum FlowError {
    /// The energy evaluation failed (non-finite value or differential).
    Energy(EnergyError),

    /// The Sobolev projector failed in a non-recoverable way.
    Hs(HsError),

    /// Backtracking hit the minimum step size. The snapshot has been
    /// restored bit-exactly.
    LineSearchFailed { backtracks: usize },
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowError::Energy(e) => write!(f, "energy evaluation failed: {}", e),
            FlowError::Hs(e) => write!(f, "Sobolev projection failed: {}", e),
            FlowError::LineSearchFailed { backtracks } => write!(
                f,
                "line search failed to find a non-trivial step after {} backtracks",
                backtracks
            ),
        }
    }
}

impl std::error::Error for FlowError {}

impl From<EnergyError> for FlowError {
    fn from(e: EnergyError) -> Self {
        FlowError::Energy(e)
    }
}

impl From<HsError> for FlowError {
    fn from(e: HsError) -> Self {
        FlowError::Hs(e)
    }
}

/// Report of one completed flow step.
#[derive(Debug, Clone, Copy)]
pub struct StepInfo {
    pub energy_before: f64,
    pub energy_after: f64,
    pub step_size: f64,
    pub backtracks: usize,

    /// Whether the step direction was the Sobolev gradient (false when the
    /// projector fell back to the raw differential).
    pub used_projection: bool,

    /// Constraint violation norm after backprojection; zero when the flow
    /// has no constraints.
    pub constraint_violation: f64,
}

/// The surface flow driver. Owns the mesh, the energy, and the constraint
/// set, and advances the surface one line-searched Sobolev step at a time.
pub struct SurfaceFlow {
    mesh: SurfaceMesh,
    energy: Box<dyn SurfaceEnergy>,
    constraints: ConstraintSet,
    flow_params: FlowParams,
    hs_params: HsParams,
    orig_positions: Mat<f64>,
    last_gradient: Mat<f64>,
    last_direction: Mat<f64>,
    last_step_size: f64,
    mesh_version: u64,
    callback: Option<Arc<dyn ProgressSink>>,
}

impl SurfaceFlow {
    pub fn new(mesh: SurfaceMesh, energy: Box<dyn SurfaceEnergy>) -> Self {
        let n_vertices = mesh.n_vertices();
        let mesh_version = mesh.version();
        SurfaceFlow {
            mesh,
            energy,
            constraints: ConstraintSet::new(),
            flow_params: FlowParams::default(),
            hs_params: HsParams::default(),
            orig_positions: Mat::zeros(n_vertices, 3),
            last_gradient: Mat::zeros(n_vertices, 3),
            last_direction: Mat::zeros(n_vertices, 3),
            last_step_size: 0.0,
            mesh_version,
            callback: None,
        }
    }

    pub fn with_flow_params(mut self, params: FlowParams) -> Self {
        self.flow_params = params;
        self
    }

    pub fn with_hs_params(mut self, params: HsParams) -> Self {
        self.hs_params = params;
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn ProgressSink>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn add_constraint(&mut self, constraint: Box<dyn Constraint>) {
        self.constraints.push(constraint);
    }

    pub fn mesh(&self) -> &SurfaceMesh {
        &self.mesh
    }

    pub fn energy(&self) -> &dyn SurfaceEnergy {
        self.energy.as_ref()
    }

    /// The differential computed by the most recent step.
    pub fn last_gradient(&self) -> MatRef<f64> {
        self.last_gradient.as_ref()
    }

    /// The projected descent direction of the most recent step.
    pub fn last_direction(&self) -> MatRef<f64> {
        self.last_direction.as_ref()
    }

    pub fn last_step_size(&self) -> f64 {
        self.last_step_size
    }

    fn emit(&self, msg: ProgressMsg) {
        if let Some(sink) = &self.callback {
            sink.emit(msg);
        }
    }

    /// A plain explicit gradient step of size `t`, without projection or
    /// line search. Reference path.
    pub fn step_naive(&mut self, t: f64) -> Result<StepInfo, FlowError> {
        self.energy.update(&self.mesh);
        let energy_before = self.energy.value(&self.mesh)?;

        let mut gradient = Mat::<f64>::zeros(self.mesh.n_vertices(), 3);
        let skipped = self.energy.differential(&self.mesh, &mut gradient)?;
        if skipped > 0 {
            self.emit(ProgressMsg::DegenerateFacesSkipped { count: skipped });
        }

        let scaled = gradient.clone() * t;
        let stepped = &self.mesh.positions().to_owned() - &scaled;
        self.mesh.set_positions(stepped.as_ref());
        self.energy.update(&self.mesh);
        let energy_after = self.energy.value(&self.mesh)?;

        self.last_gradient = gradient.clone();
        self.last_direction = gradient;
        self.last_step_size = t;
        self.emit(ProgressMsg::FlowStep {
            energy_before,
            energy_after,
            step_size: t,
        });

        Ok(StepInfo {
            energy_before,
            energy_after,
            step_size: t,
            backtracks: 0,
            used_projection: false,
            constraint_violation: 0.0,
        })
    }

    /// One full iteration: differential, Sobolev projection against the
    /// constraints, Armijo line search along the projected direction, and
    /// backprojection restoring the constraints exactly.
    pub fn step_fractional_sobolev(&mut self) -> Result<StepInfo, FlowError> {
        self.energy.update(&self.mesh);
        let energy_before = self.energy.value(&self.mesh)?;

        let mut gradient = Mat::<f64>::zeros(self.mesh.n_vertices(), 3);
        let skipped = self.energy.differential(&self.mesh, &mut gradient)?;
        if skipped > 0 {
            self.emit(ProgressMsg::DegenerateFacesSkipped { count: skipped });
        }

        let gradient_norm = gradient.norm_l2();
        if gradient_norm < self.flow_params.gradient_threshold {
            // Already stationary.
            self.last_gradient = gradient;
            self.last_step_size = 0.0;
            return Ok(StepInfo {
                energy_before,
                energy_after: energy_before,
                step_size: 0.0,
                backtracks: 0,
                used_projection: false,
                constraint_violation: 0.0,
            });
        }

        let (direction, used_projection, schur) = self.project_direction(&gradient)?;

        // Directional slope <G, D> / |D|: the Armijo target decrease per
        // unit step.
        let direction_norm = direction.norm_l2();
        let slope = frobenius_dot(&gradient.as_ref(), &direction.as_ref()) / direction_norm;

        let initial_guess = 1.0 / direction_norm;
        let (step_size, energy_after, backtracks) =
            self.line_search_step(direction.as_ref(), initial_guess, slope, energy_before)?;

        let constraint_violation = match &schur {
            Some(schur) => {
                match schur.backproject(&self.constraints, &mut self.mesh, &self.hs_params) {
                    Ok(violation) => violation,
                    Err(e) => {
                        // Abort the step: restore the snapshot exactly.
                        self.mesh.set_positions(self.orig_positions.as_ref());
                        self.energy.update(&self.mesh);
                        return Err(e.into());
                    }
                }
            }
            None => 0.0,
        };

        self.last_gradient = gradient;
        self.last_direction = direction;
        self.last_step_size = step_size;
        self.emit(ProgressMsg::FlowStep {
            energy_before,
            energy_after,
            step_size,
        });

        Ok(StepInfo {
            energy_before,
            energy_after,
            step_size,
            backtracks,
            used_projection,
            constraint_violation,
        })
    }

    // Computes the descent direction: the Sobolev gradient through the
    // dense or hierarchical path, with Schur-complement constraint
    // coupling, falling back to the raw differential when conjugate
    // gradient does not converge.
    fn project_direction(
        &self,
        gradient: &Mat<f64>,
    ) -> Result<(Mat<f64>, bool, Option<SchurComplement>), FlowError> {
        let (alpha, beta) = self.energy.exponents();
        let s = get_s(alpha, beta);

        let mesh = &self.mesh;
        let bvh = self.energy.bvh();
        let use_dense = mesh.n_vertices() <= self.hs_params.dense_threshold || bvh.is_none();

        let bct = if use_dense {
            None
        } else {
            bvh.map(|bvh| {
                BlockClusterTree::new(
                    mesh,
                    bvh,
                    s,
                    self.hs_params.bct_params(self.energy.theta()),
                )
            })
        };

        let metric = match &bct {
            Some(bct) => HsMetric::with_bct(mesh, s, self.hs_params, bct),
            None => HsMetric::new_dense(mesh, s, self.hs_params),
        };
        let metric = match &self.callback {
            Some(sink) => metric.with_callback(sink.clone()),
            None => metric,
        };

        if self.constraints.is_empty() {
            match metric.project(gradient.as_ref()) {
                Ok(direction) => Ok((direction, true, None)),
                Err(HsError::CgNotConverged { iterations, residual }) => {
                    self.emit(ProgressMsg::Message {
                        message: format!(
                            "projection CG stopped after {} iterations (residual {:.3e}); \
                             using the unprojected gradient",
                            iterations, residual
                        ),
                    });
                    Ok((gradient.clone(), false, None))
                }
                Err(e) => Err(e.into()),
            }
        } else {
            match metric
                .schur_complement(&self.constraints)
                .and_then(|schur| {
                    metric
                        .project_with_constraints(gradient.as_ref(), &schur)
                        .map(|direction| (direction, schur))
                }) {
                Ok((direction, schur)) => Ok((direction, true, Some(schur))),
                Err(HsError::CgNotConverged { iterations, residual }) => {
                    self.emit(ProgressMsg::Message {
                        message: format!(
                            "constrained projection CG stopped after {} iterations \
                             (residual {:.3e}); using the unprojected gradient",
                            iterations, residual
                        ),
                    });
                    Ok((gradient.clone(), false, None))
                }
                Err(e) => Err(e.into()),
            }
        }
    }

    /// Armijo backtracking along `direction` from the current positions.
    ///
    /// `slope` is the directional decrease rate `<G, D> / |D|`; a step
    /// `delta` is accepted when `E(0) - E(delta) >= sigma * delta * slope`,
    /// halved otherwise. A non-positive slope (not a descent direction)
    /// never accepts. Below the step threshold the snapshot is restored
    /// bit-exactly and the search fails. Returns the accepted step, the new
    /// energy, and the number of backtracks.
    pub fn line_search_step(
        &mut self,
        direction: MatRef<f64>,
        initial_guess: f64,
        slope: f64,
        initial_energy: f64,
    ) -> Result<(f64, f64, usize), FlowError> {
        self.save_positions();

        let mut delta = initial_guess;
        let mut backtracks = 0usize;

        while delta > self.flow_params.step_threshold {
            self.set_gradient_step(direction, delta);
            self.energy.update(&self.mesh);
            let next_energy = self.energy.value(&self.mesh)?;

            let decrease = initial_energy - next_energy;
            let target_decrease = self.flow_params.sigma * delta * slope;

            if slope > 0.0 && decrease >= target_decrease && next_energy.is_finite() {
                self.emit(ProgressMsg::LineSearch {
                    step_size: delta,
                    backtracks,
                    energy: next_energy,
                });
                return Ok((delta, next_energy, backtracks));
            }

            delta /= 2.0;
            backtracks += 1;
        }

        self.restore_positions();
        self.energy.update(&self.mesh);
        self.emit(ProgressMsg::LineSearch {
            step_size: 0.0,
            backtracks,
            energy: initial_energy,
        });
        Err(FlowError::LineSearchFailed { backtracks })
    }

    fn save_positions(&mut self) {
        self.orig_positions = self.mesh.positions().to_owned();
    }

    fn restore_positions(&mut self) {
        self.mesh.set_positions(self.orig_positions.as_ref());
    }

    fn set_gradient_step(&mut self, direction: MatRef<f64>, delta: f64) {
        let scaled = direction.to_owned() * delta;
        let stepped = &self.orig_positions - &scaled;
        self.mesh.set_positions(stepped.as_ref());
    }

    /// Runs the external remesher on the mesh. A connectivity change bumps
    /// the mesh version token, which invalidates every hierarchy cache at
    /// the next step. Returns whether connectivity changed.
    pub fn remesh_with(&mut self, remesher: &mut dyn Remesher) -> bool {
        let changed = remesher.remesh(&mut self.mesh);
        if self.mesh.version() != self.mesh_version {
            self.mesh_version = self.mesh.version();
            self.energy.update(&self.mesh);
        }
        changed
    }
}
