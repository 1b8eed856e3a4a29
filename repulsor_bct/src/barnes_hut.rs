/////////////////////////////////////////////////////////////////////////////////////////////
//
// Evaluates the tangent-point energy and differential by Barnes-Hut multipole traversal.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use faer::Mat;
use rayon::prelude::*;

use repulsor_utils::constants::DEGENERATE_FACE_AREA;
use repulsor_utils::{add_to_row, FaceBody, SurfaceMesh, TpeKernel};

use crate::bvh::{BvhNodeType, FaceBvh};

/// Result of a Barnes-Hut energy evaluation.
#[derive(Debug, Clone, Copy)]
pub struct BhValue {
    /// The approximated tangent-point energy.
    pub value: f64,

    /// Number of degenerate source faces skipped during the traversal,
    /// reported so the driver can log once per iteration.
    pub skipped_degenerate: usize,
}

/// Result of a Barnes-Hut differential evaluation.
#[derive(Debug, Clone, Copy)]
pub struct BhDifferential {
    pub skipped_degenerate: usize,
}

// What a traversal hands to its visitor: a far-field branch collapsed to a
// single body, or a single near face to resolve exactly.
enum Encounter<'a> {
    Cluster(&'a crate::bvh::BvhNode),
    Exact(usize),
}

// Walks the hierarchy for one source face. Children are visited lesser half
// first so the accumulation order is deterministic for a fixed tree.
fn traverse<F>(bvh: &FaceBvh, source_barycenter: glam::DVec3, mut visit: F)
where
    F: FnMut(Encounter),
{
    let mut stack = vec![0usize];
    while let Some(id) = stack.pop() {
        let node = bvh.node(id);
        match node.node_type {
            BvhNodeType::Empty => {}
            BvhNodeType::Leaf => {
                if node.is_admissible_from(source_barycenter) {
                    visit(Encounter::Cluster(node));
                } else if let Some(elem) = node.element_id {
                    visit(Encounter::Exact(elem));
                }
            }
            BvhNodeType::Interior => {
                if node.is_admissible_from(source_barycenter) {
                    visit(Encounter::Cluster(node));
                } else {
                    let [left, right] = node.children;
                    if let Some(right) = right {
                        stack.push(right);
                    }
                    if let Some(left) = left {
                        stack.push(left);
                    }
                }
            }
        }
    }
}

/// Approximates the total tangent-point energy of the mesh.
///
/// The exact double sum runs over ordered pairs of distinct faces; here each
/// source face traverses the hierarchy and replaces well-separated branches
/// by single far-field bodies. Parallel over source faces.
pub fn tpe_value(mesh: &SurfaceMesh, bvh: &FaceBvh, kernel: &TpeKernel) -> BhValue {
    let (value, skipped_degenerate) = (0..mesh.n_faces())
        .into_par_iter()
        .map(|f| {
            if mesh.face_area(f) < DEGENERATE_FACE_AREA {
                return (0.0, 1usize);
            }
            let barycenter = mesh.face_barycenter(f);
            let mut total = 0.0;
            traverse(bvh, barycenter, |encounter| match encounter {
                Encounter::Cluster(node) => {
                    let body = FaceBody {
                        mass: node.total_mass,
                        barycenter: node.center_of_mass,
                        normal: node.average_normal,
                        element_id: 0,
                    };
                    total += kernel.cluster_energy(mesh, f, &body);
                }
                Encounter::Exact(other) => {
                    if other != f {
                        total += kernel.pair_energy(mesh, f, other);
                    }
                }
            });
            (total, 0usize)
        })
        .reduce(|| (0.0, 0), |a, b| (a.0 + b.0, a.1 + b.1));

    BhValue {
        value,
        skipped_degenerate,
    }
}

/// Accumulates the Barnes-Hut differential of the energy into `out`
/// (shape `(V, 3)`).
///
/// Exact leaf encounters differentiate the pair contribution with respect
/// to every vertex of either face; admissible encounters differentiate the
/// symmetrized far-field interaction with respect to the near face's
/// vertices only (the cluster side collects its half when its own faces
/// traverse). Parallel over source faces with thread-private accumulators
/// reduced at the end.
pub fn tpe_differential(
    mesh: &SurfaceMesh,
    bvh: &FaceBvh,
    kernel: &TpeKernel,
    out: &mut Mat<f64>,
) -> BhDifferential {
    debug_assert_eq!(out.nrows(), mesh.n_vertices());
    debug_assert_eq!(out.ncols(), 3);

    let (acc, skipped_degenerate) = (0..mesh.n_faces())
        .into_par_iter()
        .fold(
            || (Mat::<f64>::zeros(mesh.n_vertices(), 3), 0usize),
            |(mut acc, mut skipped), f| {
                if mesh.face_area(f) < DEGENERATE_FACE_AREA {
                    return (acc, skipped + 1);
                }
                let barycenter = mesh.face_barycenter(f);
                let face_verts = mesh.face_vertices(f);
                traverse(bvh, barycenter, |encounter| match encounter {
                    Encounter::Cluster(node) => {
                        let body = FaceBody {
                            mass: node.total_mass,
                            barycenter: node.center_of_mass,
                            normal: node.average_normal,
                            element_id: 0,
                        };
                        for &v in &face_verts {
                            add_to_row(&mut acc, v, kernel.cluster_gradient(mesh, f, v, &body));
                        }
                    }
                    Encounter::Exact(other) => {
                        if other == f {
                            return;
                        }
                        if mesh.face_area(other) < DEGENERATE_FACE_AREA {
                            skipped += 1;
                            return;
                        }
                        let (verts, len) = mesh.pair_vertices(f, other);
                        for &v in &verts[..len] {
                            add_to_row(&mut acc, v, kernel.pair_gradient(mesh, f, other, v));
                        }
                    }
                });
                (acc, skipped)
            },
        )
        .reduce(
            || (Mat::<f64>::zeros(mesh.n_vertices(), 3), 0usize),
            |(a, sa), (b, sb)| (&a + &b, sa + sb),
        );

    *out += acc;
    BhDifferential { skipped_degenerate }
}

/// The exact all-pairs energy, used as the Barnes-Hut reference.
pub fn all_pairs_value(mesh: &SurfaceMesh, kernel: &TpeKernel) -> f64 {
    (0..mesh.n_faces())
        .into_par_iter()
        .map(|f1| {
            (0..mesh.n_faces())
                .map(|f2| kernel.pair_energy(mesh, f1, f2))
                .sum::<f64>()
        })
        .sum()
}

/// The exact all-pairs differential, accumulated into `out`.
pub fn all_pairs_differential(mesh: &SurfaceMesh, kernel: &TpeKernel, out: &mut Mat<f64>) {
    debug_assert_eq!(out.nrows(), mesh.n_vertices());

    let acc = (0..mesh.n_faces())
        .into_par_iter()
        .fold(
            || Mat::<f64>::zeros(mesh.n_vertices(), 3),
            |mut acc, f1| {
                for f2 in 0..mesh.n_faces() {
                    if f1 == f2 {
                        continue;
                    }
                    let (verts, len) = mesh.pair_vertices(f1, f2);
                    for &v in &verts[..len] {
                        add_to_row(&mut acc, v, kernel.pair_gradient(mesh, f1, f2, v));
                    }
                }
                acc
            },
        )
        .reduce(|| Mat::<f64>::zeros(mesh.n_vertices(), 3), |a, b| &a + &b);

    *out += acc;
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;
    use repulsor_utils::{frobenius_dot, MeshShapes};

    fn two_spheres() -> SurfaceMesh {
        let a = MeshShapes::icosphere(1);
        let b = MeshShapes::translated(&a, DVec3::new(3.0, 0.0, 0.0));
        MeshShapes::merged(&a, &b)
    }

    #[test]
    fn barnes_hut_converges_to_all_pairs_quadratically_in_theta() {
        let mesh = two_spheres();
        let kernel = TpeKernel::new(3.0, 6.0);
        let exact = all_pairs_value(&mesh, &kernel);
        assert!(exact.is_finite() && exact > 0.0);

        let mut errors = Vec::new();
        for theta in [0.5, 0.25, 0.125] {
            let bvh = FaceBvh::from_mesh(&mesh, theta);
            let bh = tpe_value(&mesh, &bvh, &kernel);
            assert_eq!(bh.skipped_degenerate, 0);
            errors.push((bh.value - exact).abs() / exact);
        }

        // Error decreases with theta and stays within C * theta^2 for a
        // generous constant.
        assert!(errors[2] <= errors[0] + 1e-12);
        for (error, theta) in errors.iter().zip([0.5f64, 0.25, 0.125]) {
            assert!(
                *error < 2.0 * theta * theta,
                "theta {}: relative error {}",
                theta,
                error
            );
        }
    }

    #[test]
    fn energy_is_invariant_under_rigid_motion() {
        let mesh = two_spheres();
        let kernel = TpeKernel::new(3.0, 6.0);
        let base = all_pairs_value(&mesh, &kernel);

        let translated = MeshShapes::translated(&mesh, DVec3::new(0.3, -1.2, 2.5));
        let moved = all_pairs_value(&translated, &kernel);
        assert!((moved - base).abs() / base < 1e-8);

        // Rotate by 90 degrees about z.
        let mut rotated = mesh.clone();
        let mut positions = mesh.positions().to_owned();
        for v in 0..mesh.n_vertices() {
            let p = mesh.position(v);
            positions[(v, 0)] = -p.y;
            positions[(v, 1)] = p.x;
        }
        rotated.set_positions(positions.as_ref());
        let spun = all_pairs_value(&rotated, &kernel);
        assert!((spun - base).abs() / base < 1e-8);
    }

    #[test]
    fn energy_scale_law() {
        let mesh = MeshShapes::icosphere(1);
        let kernel = TpeKernel::new(3.0, 6.0);
        let base = all_pairs_value(&mesh, &kernel);

        let scale = 1.35;
        let scaled = MeshShapes::scaled(&mesh, scale);
        let expected = base * scale.powf(2.0 * kernel.alpha - 2.0 * kernel.beta + 4.0);
        let actual = all_pairs_value(&scaled, &kernel);
        assert!((actual - expected).abs() / expected.abs() < 1e-6);
    }

    #[test]
    fn differential_approximates_all_pairs() {
        let mesh = two_spheres();
        let kernel = TpeKernel::new(3.0, 6.0);

        let mut exact = Mat::<f64>::zeros(mesh.n_vertices(), 3);
        all_pairs_differential(&mesh, &kernel, &mut exact);

        let bvh = FaceBvh::from_mesh(&mesh, 0.25);
        let mut approx = Mat::<f64>::zeros(mesh.n_vertices(), 3);
        tpe_differential(&mesh, &bvh, &kernel, &mut approx);

        let diff = &approx - &exact;
        let rel = diff.norm_l2() / exact.norm_l2();
        assert!(rel < 0.1, "relative differential error {}", rel);

        // The approximation still points in the exact direction.
        let cosine = frobenius_dot(&approx.as_ref(), &exact.as_ref())
            / (approx.norm_l2() * exact.norm_l2());
        assert!(cosine > 0.99, "cosine {}", cosine);
    }

    #[test]
    fn differential_matches_numeric_energy_gradient_on_small_mesh() {
        // On a tetrahedron everything is near field, so Barnes-Hut equals
        // all-pairs and both must match the numeric gradient of the energy.
        let mesh = MeshShapes::regular_tetrahedron();
        let kernel = TpeKernel::new(3.0, 6.0);
        let bvh = FaceBvh::from_mesh(&mesh, 0.25);

        let mut analytic = Mat::<f64>::zeros(mesh.n_vertices(), 3);
        tpe_differential(&mesh, &bvh, &kernel, &mut analytic);

        let eps = 1e-6;
        for v in 0..mesh.n_vertices() {
            for axis in 0..3 {
                let mut probe = mesh.clone();
                let mut offset = DVec3::ZERO;
                offset[axis] = eps;
                probe.set_position(v, mesh.position(v) + offset);
                let plus = all_pairs_value(&probe, &kernel);
                probe.set_position(v, mesh.position(v) - offset);
                let minus = all_pairs_value(&probe, &kernel);
                let numeric = (plus - minus) / (2.0 * eps);
                assert!(
                    (analytic[(v, axis)] - numeric).abs() < 1e-5 * numeric.abs().max(1.0),
                    "vertex {} axis {}: {} vs {}",
                    v,
                    axis,
                    analytic[(v, axis)],
                    numeric
                );
            }
        }
    }
}
