/////////////////////////////////////////////////////////////////////////////////////////////
//
// Exposes the public API and high-level documentation for tangent-point surface flow.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Sobolev gradient flow for the tangent-point energy
//!
//! The tangent-point energy (TPE) of a triangulated surface rewards
//! smoothness while repelling distant parts of the surface from each other.
//! It is non-local: every face interacts with every other face, so a naive
//! evaluation costs **O(F^2)**. This crate drives the energy downhill with a
//! *Sobolev* gradient flow:
//!
//! 1. the energy differential is computed by **Barnes-Hut** multipole
//!    traversal over a 6-D face hierarchy (the [`repulsor_bct`] crate);
//! 2. the differential is preconditioned by a fractional Laplacian of
//!    matching order, solved by conjugate gradient through the **block
//!    cluster tree** fast multiply;
//! 3. linear constraints (area, volume, boundary length, vertex pins) are
//!    coupled through a **Schur complement**, so the descent direction is
//!    tangent to every constraint level set;
//! 4. an **Armijo line search** picks the step, and a backprojection pass
//!    restores the constraints exactly.
//!
//! # Example
//!
//! ```
//! use repulsor::{BarnesHutTpe, SurfaceFlow, TotalAreaConstraint};
//! use repulsor_utils::MeshShapes;
//!
//! // A sphere with its area held fixed.
//! let mesh = MeshShapes::icosphere(1);
//! let initial_area = mesh.total_area();
//!
//! let energy = BarnesHutTpe::new(3.0, 6.0, 0.25);
//! let mut flow = SurfaceFlow::new(mesh, Box::new(energy));
//! flow.add_constraint(Box::new(TotalAreaConstraint::new(flow.mesh())));
//!
//! let info = flow.step_fractional_sobolev().unwrap();
//! assert!(info.energy_after <= info.energy_before);
//! assert!((flow.mesh().total_area() - initial_area).abs() / initial_area < 1e-6);
//! ```

pub mod config;

mod constraints;

mod energy;

mod flow;

pub mod hs;

mod iterative_solvers;

mod potentials;

pub mod progress;

mod remesh;

pub use {
    constraints::{
        BoundaryLengthConstraint, Constraint, ConstraintSet, TotalAreaConstraint,
        TotalVolumeConstraint, Triplet, VertexPinConstraint,
    },
    energy::{AllPairsTpe, BarnesHutTpe, EnergyError, SumEnergy, SurfaceEnergy},
    flow::{FlowError, StepInfo, SurfaceFlow},
    hs::{get_s, HsError, HsMetric, SchurComplement},
    iterative_solvers::{conjugate_gradient, CgSolution, SolveAccuracy, ToleranceType},
    potentials::{BoundaryLengthPenalty, TotalAreaPotential, TotalVolumePotential},
    remesh::Remesher,
};
