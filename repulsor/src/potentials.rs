/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements soft potential energies: total area, total volume, boundary length.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use faer::Mat;

use repulsor_utils::derivatives::{signed_volume_gradient, triangle_area_gradient};
use repulsor_utils::{add_to_row, SurfaceMesh};

use crate::energy::{EnergyError, SurfaceEnergy};

/// Penalizes total surface area: `E = weight * area(mesh)`.
#[derive(Debug, Clone, Copy)]
pub struct TotalAreaPotential {
    weight: f64,
}

impl TotalAreaPotential {
    pub fn new(weight: f64) -> Self {
        TotalAreaPotential { weight }
    }
}

impl SurfaceEnergy for TotalAreaPotential {
    fn value(&self, mesh: &SurfaceMesh) -> Result<f64, EnergyError> {
        Ok(self.weight * mesh.total_area())
    }

    fn differential(&self, mesh: &SurfaceMesh, out: &mut Mat<f64>) -> Result<usize, EnergyError> {
        for v in 0..mesh.n_vertices() {
            for &f in mesh.faces_of_vertex(v) {
                let verts = mesh.face_vertices(f);
                let positions = mesh.face_positions(f);
                if let Some(i) = verts.iter().position(|&w| w == v) {
                    add_to_row(out, v, triangle_area_gradient(&positions, i) * self.weight);
                }
            }
        }
        Ok(0)
    }

    fn update(&mut self, _mesh: &SurfaceMesh) {}

    fn exponents(&self) -> (f64, f64) {
        (1.0, 0.0)
    }
}

/// Penalizes signed enclosed volume: `E = weight * volume(mesh)`.
#[derive(Debug, Clone, Copy)]
pub struct TotalVolumePotential {
    weight: f64,
}

impl TotalVolumePotential {
    pub fn new(weight: f64) -> Self {
        TotalVolumePotential { weight }
    }
}

impl SurfaceEnergy for TotalVolumePotential {
    fn value(&self, mesh: &SurfaceMesh) -> Result<f64, EnergyError> {
        Ok(self.weight * mesh.total_volume())
    }

    fn differential(&self, mesh: &SurfaceMesh, out: &mut Mat<f64>) -> Result<usize, EnergyError> {
        for v in 0..mesh.n_vertices() {
            for &f in mesh.faces_of_vertex(v) {
                let verts = mesh.face_vertices(f);
                let positions = mesh.face_positions(f);
                if let Some(i) = verts.iter().position(|&w| w == v) {
                    add_to_row(out, v, signed_volume_gradient(&positions, i) * self.weight);
                }
            }
        }
        Ok(0)
    }

    fn update(&mut self, _mesh: &SurfaceMesh) {}

    fn exponents(&self) -> (f64, f64) {
        (1.0, 0.0)
    }
}

/// Penalizes total boundary length: `E = weight * length(boundary)`. Zero
/// on closed meshes.
#[derive(Debug, Clone, Copy)]
pub struct BoundaryLengthPenalty {
    weight: f64,
}

impl BoundaryLengthPenalty {
    pub fn new(weight: f64) -> Self {
        BoundaryLengthPenalty { weight }
    }
}

impl SurfaceEnergy for BoundaryLengthPenalty {
    fn value(&self, mesh: &SurfaceMesh) -> Result<f64, EnergyError> {
        Ok(self.weight * mesh.total_boundary_length())
    }

    fn differential(&self, mesh: &SurfaceMesh, out: &mut Mat<f64>) -> Result<usize, EnergyError> {
        for &(v0, v1) in mesh.boundary_edges() {
            let edge = mesh.position(v0) - mesh.position(v1);
            let length = edge.length();
            if length == 0.0 {
                continue;
            }
            let direction = edge / length;
            add_to_row(out, v0, direction * self.weight);
            add_to_row(out, v1, -direction * self.weight);
        }
        Ok(0)
    }

    fn update(&mut self, _mesh: &SurfaceMesh) {}

    fn exponents(&self) -> (f64, f64) {
        (1.0, 0.0)
    }
}
