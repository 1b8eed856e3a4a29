/////////////////////////////////////////////////////////////////////////////////////////////
//
// Provides the indexed triangle mesh adapter queried by the energies and the flow driver.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use std::collections::HashMap;
use std::fmt;

use faer::{Mat, MatRef};
use glam::DVec3;

use crate::utils::{mat_row, set_row};

/// Errors that can occur while constructing or editing a [`SurfaceMesh`].
#[derive(Debug)]
pub enum MeshError {
    /// A face references a vertex index outside the position array.
    InvalidVertexIndex { face: usize, vertex: usize },

    /// An edge is shared by more than two faces.
    NonManifoldEdge { v0: usize, v1: usize },
}

impl fmt::Display for MeshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshError::InvalidVertexIndex { face, vertex } => write!(
                f,
                "face {} references vertex {} outside the position array",
                face, vertex
            ),
            MeshError::NonManifoldEdge { v0, v1 } => write!(
                f,
                "edge ({}, {}) is shared by more than two faces",
                v0, v1
            ),
        }
    }
}

impl std::error::Error for MeshError {}

/// The unit stored at BVH leaves: one face collapsed to a weighted,
/// oriented point.
#[derive(Debug, Clone, Copy)]
pub struct FaceBody {
    /// Face area.
    pub mass: f64,

    /// Face barycenter.
    pub barycenter: DVec3,

    /// Unit face normal.
    pub normal: DVec3,

    /// Index of the face this body was built from.
    pub element_id: usize,
}

/// An indexed triangle mesh with the read-only queries required by the
/// energies, the spatial hierarchy, and the constraint set.
///
/// Positions are stored as a `(V, 3)` [`faer::Mat<f64>`] so that flow
/// snapshots and gradient steps are whole-matrix operations. Connectivity
/// edits go through [`SurfaceMesh::replace_connectivity`], which bumps the
/// [`SurfaceMesh::version`] token; position updates do not.
#[derive(Debug, Clone)]
pub struct SurfaceMesh {
    positions: Mat<f64>,
    faces: Vec<[usize; 3]>,
    vertex_faces: Vec<Vec<usize>>,
    boundary_vertex: Vec<bool>,
    boundary_edges: Vec<(usize, usize)>,
    version: u64,
}

impl SurfaceMesh {
    /// Builds a mesh from a `(V, 3)` position matrix and a triangle list.
    ///
    /// Validates vertex indices, builds the vertex-to-face adjacency, and
    /// classifies boundary edges (edges with exactly one incident face).
    pub fn new(positions: Mat<f64>, faces: Vec<[usize; 3]>) -> Result<Self, MeshError> {
        let mut mesh = SurfaceMesh {
            positions,
            faces,
            vertex_faces: Vec::new(),
            boundary_vertex: Vec::new(),
            boundary_edges: Vec::new(),
            version: 0,
        };
        mesh.rebuild_adjacency()?;
        Ok(mesh)
    }

    fn rebuild_adjacency(&mut self) -> Result<(), MeshError> {
        let n_vertices = self.positions.nrows();

        let mut vertex_faces = vec![Vec::new(); n_vertices];
        let mut edge_count: HashMap<(usize, usize), usize> = HashMap::new();

        for (f, verts) in self.faces.iter().enumerate() {
            for k in 0..3 {
                let v = verts[k];
                if v >= n_vertices {
                    return Err(MeshError::InvalidVertexIndex { face: f, vertex: v });
                }
                vertex_faces[v].push(f);

                let w = verts[(k + 1) % 3];
                let key = (v.min(w), v.max(w));
                *edge_count.entry(key).or_insert(0) += 1;
            }
        }

        let mut boundary_vertex = vec![false; n_vertices];
        let mut boundary_edges = Vec::new();
        for (&(v0, v1), &count) in edge_count.iter() {
            if count > 2 {
                return Err(MeshError::NonManifoldEdge { v0, v1 });
            }
            if count == 1 {
                boundary_vertex[v0] = true;
                boundary_vertex[v1] = true;
                boundary_edges.push((v0, v1));
            }
        }
        boundary_edges.sort_unstable();

        self.vertex_faces = vertex_faces;
        self.boundary_vertex = boundary_vertex;
        self.boundary_edges = boundary_edges;
        Ok(())
    }

    pub fn n_vertices(&self) -> usize {
        self.positions.nrows()
    }

    pub fn n_faces(&self) -> usize {
        self.faces.len()
    }

    /// The `(V, 3)` position matrix.
    pub fn positions(&self) -> MatRef<f64> {
        self.positions.as_ref()
    }

    /// Overwrites all vertex positions. Connectivity and the version token
    /// are unchanged.
    pub fn set_positions(&mut self, positions: MatRef<f64>) {
        debug_assert_eq!(positions.nrows(), self.positions.nrows());
        debug_assert_eq!(positions.ncols(), 3);
        self.positions = positions.to_owned();
    }

    /// Moves a single vertex.
    pub fn set_position(&mut self, v: usize, position: DVec3) {
        set_row(&mut self.positions, v, position);
    }

    pub fn position(&self, v: usize) -> DVec3 {
        mat_row(&self.positions.as_ref(), v)
    }

    /// The three vertex ids of face `f`, in orientation order.
    pub fn face_vertices(&self, f: usize) -> [usize; 3] {
        self.faces[f]
    }

    /// The three corner positions of face `f`.
    pub fn face_positions(&self, f: usize) -> [DVec3; 3] {
        let [a, b, c] = self.faces[f];
        [self.position(a), self.position(b), self.position(c)]
    }

    pub fn face_area(&self, f: usize) -> f64 {
        let [p0, p1, p2] = self.face_positions(f);
        0.5 * (p1 - p0).cross(p2 - p0).length()
    }

    /// Unit face normal; zero for degenerate faces.
    pub fn face_normal(&self, f: usize) -> DVec3 {
        let [p0, p1, p2] = self.face_positions(f);
        (p1 - p0).cross(p2 - p0).normalize_or_zero()
    }

    pub fn face_barycenter(&self, f: usize) -> DVec3 {
        let [p0, p1, p2] = self.face_positions(f);
        (p0 + p1 + p2) / 3.0
    }

    /// Ids of all faces containing vertex `v`.
    pub fn faces_of_vertex(&self, v: usize) -> &[usize] {
        &self.vertex_faces[v]
    }

    pub fn vertex_degree(&self, v: usize) -> usize {
        self.vertex_faces[v].len()
    }

    pub fn is_boundary_vertex(&self, v: usize) -> bool {
        self.boundary_vertex[v]
    }

    /// All boundary edges as sorted `(lo, hi)` vertex pairs.
    pub fn boundary_edges(&self) -> &[(usize, usize)] {
        &self.boundary_edges
    }

    /// The vertex union of two faces, without duplicates, in a fixed-size
    /// on-stack buffer. Returns the buffer and the number of valid entries
    /// (3 to 6).
    pub fn pair_vertices(&self, f1: usize, f2: usize) -> ([usize; 6], usize) {
        let mut out = [0usize; 6];
        let mut len = 0usize;
        for &v in self.faces[f1].iter().chain(self.faces[f2].iter()) {
            if !out[..len].contains(&v) {
                out[len] = v;
                len += 1;
            }
        }
        (out, len)
    }

    /// Sum of all face areas.
    pub fn total_area(&self) -> f64 {
        (0..self.n_faces()).map(|f| self.face_area(f)).sum()
    }

    /// Signed enclosed volume (positive for outward-oriented closed meshes).
    pub fn total_volume(&self) -> f64 {
        (0..self.n_faces())
            .map(|f| {
                let [p0, p1, p2] = self.face_positions(f);
                p0.dot(p1.cross(p2)) / 6.0
            })
            .sum()
    }

    /// Total length of all boundary edges.
    pub fn total_boundary_length(&self) -> f64 {
        self.boundary_edges
            .iter()
            .map(|&(v0, v1)| (self.position(v0) - self.position(v1)).length())
            .sum()
    }

    /// Connectivity token. Bumped by [`SurfaceMesh::replace_connectivity`];
    /// callers compare tokens to know when hierarchy caches are stale.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Swaps the face list (remeshing), rebuilds adjacency, and bumps the
    /// version token. Vertex positions are kept.
    pub fn replace_connectivity(&mut self, faces: Vec<[usize; 3]>) -> Result<(), MeshError> {
        let old_faces = std::mem::replace(&mut self.faces, faces);
        match self.rebuild_adjacency() {
            Ok(()) => {
                self.version += 1;
                Ok(())
            }
            Err(e) => {
                self.faces = old_faces;
                // Adjacency still matches the restored faces.
                self.rebuild_adjacency().ok();
                Err(e)
            }
        }
    }

    /// Collapses every face to its weighted oriented point, in face order.
    pub fn face_bodies(&self) -> Vec<FaceBody> {
        (0..self.n_faces())
            .map(|f| FaceBody {
                mass: self.face_area(f),
                barycenter: self.face_barycenter(f),
                normal: self.face_normal(f),
                element_id: f,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_triangle() -> SurfaceMesh {
        let mut positions = Mat::<f64>::zeros(3, 3);
        positions[(1, 0)] = 1.0;
        positions[(2, 1)] = 1.0;
        SurfaceMesh::new(positions, vec![[0, 1, 2]]).unwrap()
    }

    fn two_triangles() -> SurfaceMesh {
        // Unit square split along the diagonal (1, 2).
        let mut positions = Mat::<f64>::zeros(4, 3);
        positions[(1, 0)] = 1.0;
        positions[(2, 1)] = 1.0;
        positions[(3, 0)] = 1.0;
        positions[(3, 1)] = 1.0;
        SurfaceMesh::new(positions, vec![[0, 1, 2], [1, 3, 2]]).unwrap()
    }

    #[test]
    fn triangle_geometry() {
        let mesh = single_triangle();
        assert!((mesh.face_area(0) - 0.5).abs() < 1e-15);
        assert_eq!(mesh.face_normal(0), DVec3::Z);
        let bary = mesh.face_barycenter(0);
        assert!((bary - DVec3::new(1.0 / 3.0, 1.0 / 3.0, 0.0)).length() < 1e-15);
    }

    #[test]
    fn adjacency_and_boundary() {
        let mesh = two_triangles();
        assert_eq!(mesh.faces_of_vertex(1), &[0, 1]);
        assert_eq!(mesh.vertex_degree(0), 1);
        // The diagonal (1, 2) is interior, the four square sides are boundary.
        assert_eq!(mesh.boundary_edges().len(), 4);
        assert!(mesh.is_boundary_vertex(0));
        assert!(!mesh.boundary_edges().contains(&(1, 2)));
        assert!((mesh.total_boundary_length() - 4.0).abs() < 1e-14);
    }

    #[test]
    fn pair_vertices_has_no_duplicates() {
        let mesh = two_triangles();
        let (verts, len) = mesh.pair_vertices(0, 1);
        assert_eq!(len, 4);
        let mut sorted = verts[..len].to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3]);

        let (_, same) = mesh.pair_vertices(0, 0);
        assert_eq!(same, 3);
    }

    #[test]
    fn invalid_face_index_is_rejected() {
        let positions = Mat::<f64>::zeros(3, 3);
        let result = SurfaceMesh::new(positions, vec![[0, 1, 7]]);
        assert!(matches!(
            result,
            Err(MeshError::InvalidVertexIndex { face: 0, vertex: 7 })
        ));
    }

    #[test]
    fn non_manifold_edge_is_rejected() {
        let positions = Mat::<f64>::zeros(5, 3);
        let result = SurfaceMesh::new(positions, vec![[0, 1, 2], [0, 1, 3], [0, 1, 4]]);
        assert!(matches!(result, Err(MeshError::NonManifoldEdge { .. })));
    }

    #[test]
    fn replace_connectivity_bumps_version() {
        let mut mesh = two_triangles();
        assert_eq!(mesh.version(), 0);
        mesh.replace_connectivity(vec![[0, 1, 2]]).unwrap();
        assert_eq!(mesh.version(), 1);
        assert_eq!(mesh.n_faces(), 1);

        // A failed edit restores the previous connectivity and version.
        let before = mesh.version();
        assert!(mesh.replace_connectivity(vec![[0, 1, 99]]).is_err());
        assert_eq!(mesh.version(), before);
        assert_eq!(mesh.n_faces(), 1);
    }

    #[test]
    fn position_updates_keep_version() {
        let mut mesh = single_triangle();
        let snapshot = mesh.positions().to_owned();
        mesh.set_position(0, DVec3::new(0.5, 0.5, 0.5));
        assert_eq!(mesh.version(), 0);
        mesh.set_positions(snapshot.as_ref());
        assert_eq!(mesh.position(0), DVec3::ZERO);
    }

    #[test]
    fn face_bodies_match_face_queries() {
        let mesh = two_triangles();
        let bodies = mesh.face_bodies();
        assert_eq!(bodies.len(), 2);
        for (f, body) in bodies.iter().enumerate() {
            assert_eq!(body.element_id, f);
            assert_eq!(body.mass, mesh.face_area(f));
            assert_eq!(body.barycenter, mesh.face_barycenter(f));
            assert_eq!(body.normal, mesh.face_normal(f));
        }
    }
}
