/////////////////////////////////////////////////////////////////////////////////////////////
//
// Declares the surface energy capability trait and the tangent-point implementations.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use std::fmt;

use faer::Mat;

use repulsor_bct::{all_pairs_differential, all_pairs_value, tpe_differential, tpe_value, FaceBvh};
use repulsor_utils::{SurfaceMesh, TpeKernel};

/// Errors surfaced by energy evaluations.
#[derive(Debug)]
pub enum EnergyError {
    /// A hierarchy-backed energy was evaluated before `update` built its
    /// BVH for the current mesh.
    BvhNotBuilt,

    /// The energy value came out non-finite.
    NonFiniteValue,

    /// The energy differential contains non-finite entries. The iteration
    /// must be abandoned and the snapshot restored.
    NonFiniteDifferential,
}

impl fmt::Display for EnergyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnergyError::BvhNotBuilt => {
                write!(f, "energy evaluated before update() built its hierarchy")
            }
            EnergyError::NonFiniteValue => write!(f, "energy value is non-finite"),
            EnergyError::NonFiniteDifferential => {
                write!(f, "energy differential contains non-finite entries")
            }
        }
    }
}

impl std::error::Error for EnergyError {}

/// The capability set of a surface energy: value, differential, per-iteration
/// update, kernel exponents, and (for hierarchical energies) the BVH and
/// separation parameter that the Sobolev projector reuses.
pub trait SurfaceEnergy {
    /// The current energy value.
    fn value(&self, mesh: &SurfaceMesh) -> Result<f64, EnergyError>;

    /// Accumulates the differential into the given `(V, 3)` matrix, one row
    /// per vertex. Returns the number of degenerate faces skipped.
    fn differential(&self, mesh: &SurfaceMesh, out: &mut Mat<f64>) -> Result<usize, EnergyError>;

    /// Updates cached state (hierarchies) to the current mesh positions.
    /// Called by the driver before evaluations and after every position
    /// change.
    fn update(&mut self, mesh: &SurfaceMesh);

    /// The kernel exponents `(alpha, beta)`; `(1, 0)` for energies that are
    /// not tangent-point kernels.
    fn exponents(&self) -> (f64, f64);

    /// The hierarchy built by the last `update`, if this energy uses one.
    fn bvh(&self) -> Option<&FaceBvh> {
        None
    }

    /// The separation parameter, zero for non-hierarchical energies.
    fn theta(&self) -> f64 {
        0.0
    }
}

fn check_finite_differential(out: &Mat<f64>) -> Result<(), EnergyError> {
    for j in 0..out.ncols() {
        if out.col(j).iter().any(|x| !x.is_finite()) {
            return Err(EnergyError::NonFiniteDifferential);
        }
    }
    Ok(())
}

/// The exact all-pairs tangent-point energy. Quadratic in the face count;
/// the reference implementation for tests and small meshes.
#[derive(Debug, Clone)]
pub struct AllPairsTpe {
    kernel: TpeKernel,
}

impl AllPairsTpe {
    pub fn new(alpha: f64, beta: f64) -> Self {
        AllPairsTpe {
            kernel: TpeKernel::new(alpha, beta),
        }
    }
}

impl SurfaceEnergy for AllPairsTpe {
    fn value(&self, mesh: &SurfaceMesh) -> Result<f64, EnergyError> {
        let value = all_pairs_value(mesh, &self.kernel);
        if !value.is_finite() {
            return Err(EnergyError::NonFiniteValue);
        }
        Ok(value)
    }

    fn differential(&self, mesh: &SurfaceMesh, out: &mut Mat<f64>) -> Result<usize, EnergyError> {
        all_pairs_differential(mesh, &self.kernel, out);
        check_finite_differential(out)?;
        Ok(0)
    }

    fn update(&mut self, _mesh: &SurfaceMesh) {}

    fn exponents(&self) -> (f64, f64) {
        (self.kernel.alpha, self.kernel.beta)
    }
}

/// The Barnes-Hut tangent-point energy. Owns the per-iteration BVH; call
/// [`SurfaceEnergy::update`] after every position or connectivity change.
#[derive(Debug, Clone)]
pub struct BarnesHutTpe {
    kernel: TpeKernel,
    theta: f64,
    bvh: Option<FaceBvh>,
    mesh_version: u64,
}

impl BarnesHutTpe {
    pub fn new(alpha: f64, beta: f64, theta: f64) -> Self {
        BarnesHutTpe {
            kernel: TpeKernel::new(alpha, beta),
            theta,
            bvh: None,
            mesh_version: 0,
        }
    }

    fn bvh_for(&self, mesh: &SurfaceMesh) -> Result<&FaceBvh, EnergyError> {
        match &self.bvh {
            Some(bvh) if bvh.n_faces() == mesh.n_faces() && self.mesh_version == mesh.version() => {
                Ok(bvh)
            }
            _ => Err(EnergyError::BvhNotBuilt),
        }
    }
}

impl SurfaceEnergy for BarnesHutTpe {
    fn value(&self, mesh: &SurfaceMesh) -> Result<f64, EnergyError> {
        let bvh = self.bvh_for(mesh)?;
        let result = tpe_value(mesh, bvh, &self.kernel);
        if !result.value.is_finite() {
            return Err(EnergyError::NonFiniteValue);
        }
        Ok(result.value)
    }

    fn differential(&self, mesh: &SurfaceMesh, out: &mut Mat<f64>) -> Result<usize, EnergyError> {
        let bvh = self.bvh_for(mesh)?;
        let report = tpe_differential(mesh, bvh, &self.kernel, out);
        check_finite_differential(out)?;
        Ok(report.skipped_degenerate)
    }

    fn update(&mut self, mesh: &SurfaceMesh) {
        self.bvh = Some(FaceBvh::from_mesh(mesh, self.theta));
        self.mesh_version = mesh.version();
    }

    fn exponents(&self) -> (f64, f64) {
        (self.kernel.alpha, self.kernel.beta)
    }

    fn bvh(&self) -> Option<&FaceBvh> {
        self.bvh.as_ref()
    }

    fn theta(&self) -> f64 {
        self.theta
    }
}

/// A weighted sum of energies: a main term (first, supplying exponents and
/// the hierarchy) plus any number of potentials.
pub struct SumEnergy {
    terms: Vec<Box<dyn SurfaceEnergy>>,
}

impl SumEnergy {
    /// `main` supplies the exponents and hierarchy for the whole sum.
    pub fn new(main: Box<dyn SurfaceEnergy>) -> Self {
        SumEnergy { terms: vec![main] }
    }

    pub fn push(&mut self, term: Box<dyn SurfaceEnergy>) {
        self.terms.push(term);
    }
}

impl SurfaceEnergy for SumEnergy {
    fn value(&self, mesh: &SurfaceMesh) -> Result<f64, EnergyError> {
        let mut total = 0.0;
        for term in &self.terms {
            total += term.value(mesh)?;
        }
        Ok(total)
    }

    fn differential(&self, mesh: &SurfaceMesh, out: &mut Mat<f64>) -> Result<usize, EnergyError> {
        let mut skipped = 0;
        for term in &self.terms {
            skipped += term.differential(mesh, out)?;
        }
        Ok(skipped)
    }

    fn update(&mut self, mesh: &SurfaceMesh) {
        for term in &mut self.terms {
            term.update(mesh);
        }
    }

    fn exponents(&self) -> (f64, f64) {
        self.terms[0].exponents()
    }

    fn bvh(&self) -> Option<&FaceBvh> {
        self.terms[0].bvh()
    }

    fn theta(&self) -> f64 {
        self.terms[0].theta()
    }
}
