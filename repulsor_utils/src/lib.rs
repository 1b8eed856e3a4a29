/////////////////////////////////////////////////////////////////////////////////////////////
//
// Re-exports the mesh adapter, kernels, and helpers shared across the repulsor crates.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Shared foundation for the `repulsor` crates
//!
//! Provides the triangle-mesh adapter ([`SurfaceMesh`]), the tangent-point
//! kernel with its analytic per-vertex gradients ([`TpeKernel`]), the
//! fractional metric term used by the Sobolev preconditioner, per-vertex
//! geometric derivatives, and reference mesh generators for tests and
//! examples.

pub mod constants;

pub mod derivatives;

mod mesh_shapes;

mod surface_mesh;

mod tpe_kernel;

mod utils;

pub use {
    mesh_shapes::MeshShapes,
    surface_mesh::{FaceBody, MeshError, SurfaceMesh},
    tpe_kernel::{metric_distance_term, TpeKernel},
    utils::{add_to_row, frobenius_dot, mat_row, set_row, vector_max, vector_min},
};
