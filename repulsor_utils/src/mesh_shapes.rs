/////////////////////////////////////////////////////////////////////////////////////////////
//
// Generates reference meshes (tetrahedron, icosphere, grid) for tests and examples.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use std::collections::HashMap;

use faer::Mat;
use glam::DVec3;

use crate::surface_mesh::SurfaceMesh;
use crate::utils::set_row;

/// Reference mesh generators. All closed shapes are returned with outward
/// orientation (positive signed volume).
pub struct MeshShapes;

impl MeshShapes {
    /// A regular tetrahedron inscribed in the unit sphere.
    pub fn regular_tetrahedron() -> SurfaceMesh {
        let scale = 1.0 / 3.0f64.sqrt();
        let corners = [
            DVec3::new(1.0, 1.0, 1.0) * scale,
            DVec3::new(1.0, -1.0, -1.0) * scale,
            DVec3::new(-1.0, 1.0, -1.0) * scale,
            DVec3::new(-1.0, -1.0, 1.0) * scale,
        ];
        let mut positions = Mat::<f64>::zeros(4, 3);
        for (i, c) in corners.iter().enumerate() {
            set_row(&mut positions, i, *c);
        }
        let faces = vec![[0, 1, 2], [0, 3, 1], [0, 2, 3], [1, 3, 2]];
        oriented_outward(positions, faces)
    }

    /// A unit sphere triangulated by subdividing an icosahedron
    /// `subdivisions` times; the result has `20 * 4^subdivisions` faces.
    pub fn icosphere(subdivisions: usize) -> SurfaceMesh {
        let t = (1.0 + 5.0f64.sqrt()) / 2.0;
        let mut vertices: Vec<DVec3> = [
            DVec3::new(-1.0, t, 0.0),
            DVec3::new(1.0, t, 0.0),
            DVec3::new(-1.0, -t, 0.0),
            DVec3::new(1.0, -t, 0.0),
            DVec3::new(0.0, -1.0, t),
            DVec3::new(0.0, 1.0, t),
            DVec3::new(0.0, -1.0, -t),
            DVec3::new(0.0, 1.0, -t),
            DVec3::new(t, 0.0, -1.0),
            DVec3::new(t, 0.0, 1.0),
            DVec3::new(-t, 0.0, -1.0),
            DVec3::new(-t, 0.0, 1.0),
        ]
        .iter()
        .map(|v| v.normalize())
        .collect();

        let mut faces: Vec<[usize; 3]> = vec![
            [0, 11, 5],
            [0, 5, 1],
            [0, 1, 7],
            [0, 7, 10],
            [0, 10, 11],
            [1, 5, 9],
            [5, 11, 4],
            [11, 10, 2],
            [10, 7, 6],
            [7, 1, 8],
            [3, 9, 4],
            [3, 4, 2],
            [3, 2, 6],
            [3, 6, 8],
            [3, 8, 9],
            [4, 9, 5],
            [2, 4, 11],
            [6, 2, 10],
            [8, 6, 7],
            [9, 8, 1],
        ];

        for _ in 0..subdivisions {
            let mut midpoints: HashMap<(usize, usize), usize> = HashMap::new();
            let mut next_faces = Vec::with_capacity(faces.len() * 4);
            for [a, b, c] in faces {
                let ab = edge_midpoint(&mut vertices, &mut midpoints, a, b);
                let bc = edge_midpoint(&mut vertices, &mut midpoints, b, c);
                let ca = edge_midpoint(&mut vertices, &mut midpoints, c, a);
                next_faces.push([a, ab, ca]);
                next_faces.push([b, bc, ab]);
                next_faces.push([c, ca, bc]);
                next_faces.push([ab, bc, ca]);
            }
            faces = next_faces;
        }

        let mut positions = Mat::<f64>::zeros(vertices.len(), 3);
        for (i, v) in vertices.iter().enumerate() {
            set_row(&mut positions, i, *v);
        }
        oriented_outward(positions, faces)
    }

    /// A flat `n x n` triangulated grid over the unit square (open surface
    /// with boundary), lying in the z = 0 plane.
    pub fn triangulated_grid(n: usize) -> SurfaceMesh {
        let side = n + 1;
        let mut positions = Mat::<f64>::zeros(side * side, 3);
        for j in 0..side {
            for i in 0..side {
                let v = j * side + i;
                positions[(v, 0)] = i as f64 / n as f64;
                positions[(v, 1)] = j as f64 / n as f64;
            }
        }
        let mut faces = Vec::with_capacity(2 * n * n);
        for j in 0..n {
            for i in 0..n {
                let v00 = j * side + i;
                let v10 = v00 + 1;
                let v01 = v00 + side;
                let v11 = v01 + 1;
                faces.push([v00, v10, v11]);
                faces.push([v00, v11, v01]);
            }
        }
        SurfaceMesh::new(positions, faces).expect("grid mesh is valid")
    }

    /// Translates every vertex of a mesh by `offset`.
    pub fn translated(mesh: &SurfaceMesh, offset: DVec3) -> SurfaceMesh {
        let mut out = mesh.clone();
        let mut positions = mesh.positions().to_owned();
        for v in 0..mesh.n_vertices() {
            positions[(v, 0)] += offset.x;
            positions[(v, 1)] += offset.y;
            positions[(v, 2)] += offset.z;
        }
        out.set_positions(positions.as_ref());
        out
    }

    /// Uniformly scales every vertex position of a mesh about the origin.
    pub fn scaled(mesh: &SurfaceMesh, scale: f64) -> SurfaceMesh {
        let mut out = mesh.clone();
        let positions = mesh.positions().to_owned() * scale;
        out.set_positions(positions.as_ref());
        out
    }

    /// Concatenates two meshes into one (disjoint components).
    pub fn merged(a: &SurfaceMesh, b: &SurfaceMesh) -> SurfaceMesh {
        let n_a = a.n_vertices();
        let mut positions = Mat::<f64>::zeros(n_a + b.n_vertices(), 3);
        for v in 0..n_a {
            set_row(&mut positions, v, a.position(v));
        }
        for v in 0..b.n_vertices() {
            set_row(&mut positions, n_a + v, b.position(v));
        }
        let mut faces = Vec::with_capacity(a.n_faces() + b.n_faces());
        for f in 0..a.n_faces() {
            faces.push(a.face_vertices(f));
        }
        for f in 0..b.n_faces() {
            let [i, j, k] = b.face_vertices(f);
            faces.push([i + n_a, j + n_a, k + n_a]);
        }
        SurfaceMesh::new(positions, faces).expect("merged mesh is valid")
    }
}

fn edge_midpoint(
    vertices: &mut Vec<DVec3>,
    cache: &mut HashMap<(usize, usize), usize>,
    a: usize,
    b: usize,
) -> usize {
    let key = (a.min(b), a.max(b));
    *cache.entry(key).or_insert_with(|| {
        let mid = ((vertices[a] + vertices[b]) / 2.0).normalize();
        vertices.push(mid);
        vertices.len() - 1
    })
}

// Flips every face if the signed volume comes out negative, so closed
// shapes are always outward-oriented.
fn oriented_outward(positions: Mat<f64>, faces: Vec<[usize; 3]>) -> SurfaceMesh {
    let mesh = SurfaceMesh::new(positions, faces).expect("generated mesh is valid");
    if mesh.total_volume() >= 0.0 {
        return mesh;
    }
    let flipped = (0..mesh.n_faces())
        .map(|f| {
            let [a, b, c] = mesh.face_vertices(f);
            [a, c, b]
        })
        .collect();
    let positions = mesh.positions().to_owned();
    SurfaceMesh::new(positions, flipped).expect("flipped mesh is valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tetrahedron_is_regular_and_closed() {
        let mesh = MeshShapes::regular_tetrahedron();
        assert_eq!(mesh.n_vertices(), 4);
        assert_eq!(mesh.n_faces(), 4);
        assert!(mesh.boundary_edges().is_empty());
        assert!(mesh.total_volume() > 0.0);

        // All vertices on the unit sphere, all edges equal.
        for v in 0..4 {
            assert!((mesh.position(v).length() - 1.0).abs() < 1e-12);
        }
        let edge = (mesh.position(0) - mesh.position(1)).length();
        for v in 1..4 {
            for w in 0..v {
                let len = (mesh.position(v) - mesh.position(w)).length();
                assert!((len - edge).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn icosphere_counts_and_geometry() {
        for (subdivisions, expected_faces) in [(0usize, 20usize), (1, 80), (2, 320)] {
            let mesh = MeshShapes::icosphere(subdivisions);
            assert_eq!(mesh.n_faces(), expected_faces);
            assert!(mesh.boundary_edges().is_empty());
            assert!(mesh.total_volume() > 0.0);
            for v in 0..mesh.n_vertices() {
                assert!((mesh.position(v).length() - 1.0).abs() < 1e-12);
            }
            // Euler characteristic of a sphere: V - E + F = 2, E = 3F/2.
            let euler =
                mesh.n_vertices() as i64 - 3 * expected_faces as i64 / 2 + expected_faces as i64;
            assert_eq!(euler, 2);
        }
    }

    #[test]
    fn icosphere_area_and_volume_approach_the_sphere() {
        let mesh = MeshShapes::icosphere(3);
        let area = mesh.total_area();
        let volume = mesh.total_volume();
        let sphere_area = 4.0 * std::f64::consts::PI;
        let sphere_volume = sphere_area / 3.0;
        assert!((area - sphere_area).abs() / sphere_area < 0.02);
        assert!((volume - sphere_volume).abs() / sphere_volume < 0.02);
    }

    #[test]
    fn grid_has_boundary() {
        let mesh = MeshShapes::triangulated_grid(4);
        assert_eq!(mesh.n_vertices(), 25);
        assert_eq!(mesh.n_faces(), 32);
        assert_eq!(mesh.boundary_edges().len(), 16);
        assert!((mesh.total_boundary_length() - 4.0).abs() < 1e-12);
        assert!((mesh.total_area() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn translate_and_merge() {
        let a = MeshShapes::icosphere(0);
        let b = MeshShapes::translated(&a, DVec3::new(3.0, 0.0, 0.0));
        let merged = MeshShapes::merged(&a, &b);
        assert_eq!(merged.n_faces(), 40);
        assert_eq!(merged.n_vertices(), 24);
        assert!((merged.total_volume() - 2.0 * a.total_volume()).abs() < 1e-12);

        let scaled = MeshShapes::scaled(&a, 2.0);
        assert!((scaled.total_area() - 4.0 * a.total_area()).abs() < 1e-10);
    }
}
