/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements the linear constraint set: area, volume, boundary length, vertex pins.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use faer::Mat;
use glam::DVec3;

use repulsor_utils::derivatives::{signed_volume_gradient, triangle_area_gradient};
use repulsor_utils::SurfaceMesh;

/// One coordinate entry of a sparse constraint Jacobian row. Columns index
/// the flattened positions, `3 * vertex + axis`.
#[derive(Debug, Clone, Copy)]
pub struct Triplet {
    pub row: usize,
    pub col: usize,
    pub value: f64,
}

/// A linear (or invariantly linearized) constraint on vertex positions.
///
/// Implementors supply the row count, the current violation, and the sparse
/// Jacobian; the matrix-free products are provided on top of the triplets.
pub trait Constraint {
    /// Number of scalar rows this constraint contributes.
    fn rows(&self) -> usize;

    /// Writes the current violation (value minus target) into
    /// `out[offset..offset + rows()]`.
    fn add_value(&self, mesh: &SurfaceMesh, out: &mut [f64], offset: usize);

    /// Appends the sparse Jacobian entries, with rows shifted by
    /// `row_offset`.
    fn add_jacobian_triplets(&self, mesh: &SurfaceMesh, triplets: &mut Vec<Triplet>, row_offset: usize);

    /// Accumulates `J x` into `out[offset..]`, with `x` the flattened
    /// `3V` position perturbation.
    fn add_jacobian_times(&self, mesh: &SurfaceMesh, x: &[f64], out: &mut [f64], offset: usize) {
        let mut triplets = Vec::new();
        self.add_jacobian_triplets(mesh, &mut triplets, offset);
        for t in triplets {
            out[t.row] += t.value * x[t.col];
        }
    }

    /// Accumulates `J^T lambda` into the flattened `3V` vector `out`.
    fn add_jacobian_transpose_times(
        &self,
        mesh: &SurfaceMesh,
        lambda: &[f64],
        out: &mut [f64],
        offset: usize,
    ) {
        let mut triplets = Vec::new();
        self.add_jacobian_triplets(mesh, &mut triplets, offset);
        for t in triplets {
            out[t.col] += t.value * lambda[t.row];
        }
    }
}

/// Holds total surface area at a target captured from the initial mesh.
#[derive(Debug, Clone, Copy)]
pub struct TotalAreaConstraint {
    target: f64,
}

impl TotalAreaConstraint {
    pub fn new(mesh: &SurfaceMesh) -> Self {
        TotalAreaConstraint {
            target: mesh.total_area(),
        }
    }

    pub fn target(&self) -> f64 {
        self.target
    }
}

impl Constraint for TotalAreaConstraint {
    fn rows(&self) -> usize {
        1
    }

    fn add_value(&self, mesh: &SurfaceMesh, out: &mut [f64], offset: usize) {
        out[offset] += mesh.total_area() - self.target;
    }

    fn add_jacobian_triplets(&self, mesh: &SurfaceMesh, triplets: &mut Vec<Triplet>, row_offset: usize) {
        for v in 0..mesh.n_vertices() {
            let mut gradient = DVec3::ZERO;
            for &f in mesh.faces_of_vertex(v) {
                let verts = mesh.face_vertices(f);
                let positions = mesh.face_positions(f);
                if let Some(i) = verts.iter().position(|&w| w == v) {
                    gradient += triangle_area_gradient(&positions, i);
                }
            }
            push_vertex_gradient(triplets, row_offset, v, gradient);
        }
    }
}

/// Holds signed enclosed volume at a target captured from the initial mesh.
#[derive(Debug, Clone, Copy)]
pub struct TotalVolumeConstraint {
    target: f64,
}

impl TotalVolumeConstraint {
    pub fn new(mesh: &SurfaceMesh) -> Self {
        TotalVolumeConstraint {
            target: mesh.total_volume(),
        }
    }

    pub fn target(&self) -> f64 {
        self.target
    }
}

impl Constraint for TotalVolumeConstraint {
    fn rows(&self) -> usize {
        1
    }

    fn add_value(&self, mesh: &SurfaceMesh, out: &mut [f64], offset: usize) {
        out[offset] += mesh.total_volume() - self.target;
    }

    fn add_jacobian_triplets(&self, mesh: &SurfaceMesh, triplets: &mut Vec<Triplet>, row_offset: usize) {
        for v in 0..mesh.n_vertices() {
            let mut gradient = DVec3::ZERO;
            for &f in mesh.faces_of_vertex(v) {
                let verts = mesh.face_vertices(f);
                let positions = mesh.face_positions(f);
                if let Some(i) = verts.iter().position(|&w| w == v) {
                    gradient += signed_volume_gradient(&positions, i);
                }
            }
            push_vertex_gradient(triplets, row_offset, v, gradient);
        }
    }
}

/// Holds total boundary length at a target captured from the initial mesh.
/// Contributes a zero Jacobian row on closed meshes, which the Schur
/// solver's redundant-row handling then drops.
#[derive(Debug, Clone, Copy)]
pub struct BoundaryLengthConstraint {
    target: f64,
}

impl BoundaryLengthConstraint {
    pub fn new(mesh: &SurfaceMesh) -> Self {
        BoundaryLengthConstraint {
            target: mesh.total_boundary_length(),
        }
    }
}

impl Constraint for BoundaryLengthConstraint {
    fn rows(&self) -> usize {
        1
    }

    fn add_value(&self, mesh: &SurfaceMesh, out: &mut [f64], offset: usize) {
        out[offset] += mesh.total_boundary_length() - self.target;
    }

    fn add_jacobian_triplets(&self, mesh: &SurfaceMesh, triplets: &mut Vec<Triplet>, row_offset: usize) {
        let mut gradients = vec![DVec3::ZERO; mesh.n_vertices()];
        for &(v0, v1) in mesh.boundary_edges() {
            let edge = mesh.position(v0) - mesh.position(v1);
            let length = edge.length();
            if length == 0.0 {
                continue;
            }
            gradients[v0] += edge / length;
            gradients[v1] -= edge / length;
        }
        for (v, gradient) in gradients.into_iter().enumerate() {
            push_vertex_gradient(triplets, row_offset, v, gradient);
        }
    }
}

/// Pins one vertex at a target position: three rows, one per coordinate.
#[derive(Debug, Clone, Copy)]
pub struct VertexPinConstraint {
    vertex: usize,
    target: DVec3,
}

impl VertexPinConstraint {
    /// Pins `vertex` at its current position.
    pub fn new(mesh: &SurfaceMesh, vertex: usize) -> Self {
        VertexPinConstraint {
            vertex,
            target: mesh.position(vertex),
        }
    }

    pub fn vertex(&self) -> usize {
        self.vertex
    }

    pub fn target(&self) -> DVec3 {
        self.target
    }
}

impl Constraint for VertexPinConstraint {
    fn rows(&self) -> usize {
        3
    }

    fn add_value(&self, mesh: &SurfaceMesh, out: &mut [f64], offset: usize) {
        let delta = mesh.position(self.vertex) - self.target;
        out[offset] += delta.x;
        out[offset + 1] += delta.y;
        out[offset + 2] += delta.z;
    }

    fn add_jacobian_triplets(&self, _mesh: &SurfaceMesh, triplets: &mut Vec<Triplet>, row_offset: usize) {
        for axis in 0..3 {
            triplets.push(Triplet {
                row: row_offset + axis,
                col: 3 * self.vertex + axis,
                value: 1.0,
            });
        }
    }
}

fn push_vertex_gradient(triplets: &mut Vec<Triplet>, row: usize, v: usize, gradient: DVec3) {
    for axis in 0..3 {
        let value = gradient[axis];
        if value != 0.0 {
            triplets.push(Triplet {
                row,
                col: 3 * v + axis,
                value,
            });
        }
    }
}

/// An ordered collection of constraints with stacked rows.
#[derive(Default)]
pub struct ConstraintSet {
    constraints: Vec<Box<dyn Constraint>>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        ConstraintSet {
            constraints: Vec::new(),
        }
    }

    pub fn push(&mut self, constraint: Box<dyn Constraint>) {
        self.constraints.push(constraint);
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    /// Total number of scalar rows across all constraints.
    pub fn total_rows(&self) -> usize {
        self.constraints.iter().map(|c| c.rows()).sum()
    }

    /// Stacked violation vector.
    pub fn violations(&self, mesh: &SurfaceMesh) -> Vec<f64> {
        let mut out = vec![0.0; self.total_rows()];
        let mut offset = 0;
        for constraint in &self.constraints {
            constraint.add_value(mesh, &mut out, offset);
            offset += constraint.rows();
        }
        out
    }

    /// The dense `(rows, 3V)` Jacobian assembled from the triplets.
    pub fn jacobian(&self, mesh: &SurfaceMesh) -> Mat<f64> {
        let mut triplets = Vec::new();
        let mut offset = 0;
        for constraint in &self.constraints {
            constraint.add_jacobian_triplets(mesh, &mut triplets, offset);
            offset += constraint.rows();
        }

        let mut jacobian = Mat::<f64>::zeros(self.total_rows(), 3 * mesh.n_vertices());
        for t in triplets {
            jacobian[(t.row, t.col)] += t.value;
        }
        jacobian
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repulsor_utils::MeshShapes;

    fn numeric_jacobian_row<F: Fn(&SurfaceMesh) -> f64>(
        mesh: &SurfaceMesh,
        eps: f64,
        f: F,
    ) -> Vec<f64> {
        let mut row = vec![0.0; 3 * mesh.n_vertices()];
        for v in 0..mesh.n_vertices() {
            for axis in 0..3 {
                let mut probe = mesh.clone();
                let mut offset = DVec3::ZERO;
                offset[axis] = eps;
                probe.set_position(v, mesh.position(v) + offset);
                let plus = f(&probe);
                probe.set_position(v, mesh.position(v) - offset);
                let minus = f(&probe);
                row[3 * v + axis] = (plus - minus) / (2.0 * eps);
            }
        }
        row
    }

    #[test]
    fn area_jacobian_matches_numeric() {
        let mesh = MeshShapes::icosphere(0);
        let constraint = TotalAreaConstraint::new(&mesh);
        let jacobian = {
            let mut set = ConstraintSet::new();
            set.push(Box::new(constraint));
            set.jacobian(&mesh)
        };
        let numeric = numeric_jacobian_row(&mesh, 1e-6, |m| m.total_area());
        for (col, expected) in numeric.iter().enumerate() {
            assert!((jacobian[(0, col)] - expected).abs() < 1e-7);
        }
    }

    #[test]
    fn volume_jacobian_matches_numeric() {
        let mesh = MeshShapes::icosphere(0);
        let constraint = TotalVolumeConstraint::new(&mesh);
        let jacobian = {
            let mut set = ConstraintSet::new();
            set.push(Box::new(constraint));
            set.jacobian(&mesh)
        };
        let numeric = numeric_jacobian_row(&mesh, 1e-6, |m| m.total_volume());
        for (col, expected) in numeric.iter().enumerate() {
            assert!((jacobian[(0, col)] - expected).abs() < 1e-8);
        }
    }

    #[test]
    fn boundary_length_jacobian_matches_numeric() {
        let mesh = MeshShapes::triangulated_grid(3);
        let constraint = BoundaryLengthConstraint::new(&mesh);
        let jacobian = {
            let mut set = ConstraintSet::new();
            set.push(Box::new(constraint));
            set.jacobian(&mesh)
        };
        let numeric = numeric_jacobian_row(&mesh, 1e-6, |m| m.total_boundary_length());
        for (col, expected) in numeric.iter().enumerate() {
            assert!((jacobian[(0, col)] - expected).abs() < 1e-7);
        }
    }

    #[test]
    fn matrix_free_products_match_the_dense_jacobian() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mesh = MeshShapes::icosphere(0);
        let mut set = ConstraintSet::new();
        set.push(Box::new(TotalAreaConstraint::new(&mesh)));
        set.push(Box::new(VertexPinConstraint::new(&mesh, 3)));
        assert_eq!(set.total_rows(), 4);

        let jacobian = set.jacobian(&mesh);
        let mut rng = StdRng::seed_from_u64(12);
        let x: Vec<f64> = (0..3 * mesh.n_vertices())
            .map(|_| rng.random_range(-1.0..1.0))
            .collect();
        let lambda: Vec<f64> = (0..set.total_rows())
            .map(|_| rng.random_range(-1.0..1.0))
            .collect();

        // J x via trait default methods.
        let mut jx = vec![0.0; set.total_rows()];
        let mut offset = 0;
        for constraint in &set.constraints {
            constraint.add_jacobian_times(&mesh, &x, &mut jx, offset);
            offset += constraint.rows();
        }
        for row in 0..set.total_rows() {
            let dense: f64 = (0..x.len()).map(|c| jacobian[(row, c)] * x[c]).sum();
            assert!((jx[row] - dense).abs() < 1e-12);
        }

        // J^T lambda via trait default methods.
        let mut jt_lambda = vec![0.0; 3 * mesh.n_vertices()];
        let mut offset = 0;
        for constraint in &set.constraints {
            constraint.add_jacobian_transpose_times(&mesh, &lambda, &mut jt_lambda, offset);
            offset += constraint.rows();
        }
        for col in 0..jt_lambda.len() {
            let dense: f64 = (0..set.total_rows())
                .map(|r| jacobian[(r, col)] * lambda[r])
                .sum();
            assert!((jt_lambda[col] - dense).abs() < 1e-12);
        }
    }

    #[test]
    fn pin_violation_tracks_the_vertex() {
        let mut mesh = MeshShapes::icosphere(0);
        let constraint = VertexPinConstraint::new(&mesh, 2);
        let mut out = vec![0.0; 3];
        constraint.add_value(&mesh, &mut out, 0);
        assert_eq!(out, vec![0.0; 3]);

        mesh.set_position(2, mesh.position(2) + DVec3::new(0.1, -0.2, 0.3));
        let mut out = vec![0.0; 3];
        constraint.add_value(&mesh, &mut out, 0);
        assert!((out[0] - 0.1).abs() < 1e-12);
        assert!((out[1] + 0.2).abs() < 1e-12);
        assert!((out[2] - 0.3).abs() < 1e-12);
    }
}
