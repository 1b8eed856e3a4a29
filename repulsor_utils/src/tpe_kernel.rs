/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements the tangent-point kernel, its analytic gradients, and the fractional metric term.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use glam::DVec3;

use crate::constants::{COINCIDENT_DISTANCE_SQ, DEGENERATE_FACE_AREA};
use crate::derivatives::{normal_dot_gradient, triangle_area_gradient, triangle_area_normal};
use crate::surface_mesh::{FaceBody, SurfaceMesh};

/// The fractional metric distance term `1 / |x - y|^(2 + 2s)`, the kernel of
/// the fractional Laplacian of order `2s` on a 2-dimensional surface.
/// Coincident points evaluate to zero so self-interactions drop out.
#[inline(always)]
pub fn metric_distance_term(s: f64, x: DVec3, y: DVec3) -> f64 {
    let dist_sq = (x - y).length_squared();
    if dist_sq < COINCIDENT_DISTANCE_SQ {
        return 0.0;
    }
    dist_sq.powf(-(1.0 + s))
}

#[inline(always)]
fn pow_or_zero(base: f64, exponent: f64) -> f64 {
    if base <= 0.0 {
        return 0.0;
    }
    base.powf(exponent)
}

/// The tangent-point kernel
///
/// ```text
/// K(f, f') = <n, x - x'>^(2 alpha) / |x - x'|^(2 beta)
/// ```
///
/// between face barycenters `x`, `x'` with `n` the unit normal of `f`,
/// evaluated as `p^alpha / q^beta` with `p = <n, d>^2` and `q = |d|^2`. The
/// pair contribution is `area(f) area(f') K(f, f')`; `K(f, f) = 0` by
/// convention. Under uniform scaling by `t` the summed energy scales by
/// `t^(2 alpha - 2 beta + 4)`.
#[derive(Debug, Clone, Copy)]
pub struct TpeKernel {
    pub alpha: f64,
    pub beta: f64,
}

impl TpeKernel {
    pub fn new(alpha: f64, beta: f64) -> Self {
        TpeKernel { alpha, beta }
    }

    /// The bare kernel between a point with normal and a second point.
    #[inline(always)]
    pub fn kf(&self, d: DVec3, n: DVec3) -> f64 {
        let q = d.length_squared();
        if q < COINCIDENT_DISTANCE_SQ {
            return 0.0;
        }
        let p = n.dot(d) * n.dot(d);
        pow_or_zero(p, self.alpha) / q.powf(self.beta)
    }

    /// Gradient of [`TpeKernel::kf`] with respect to the displacement `d`,
    /// holding `n` fixed.
    #[inline(always)]
    fn grad_kf_d(&self, d: DVec3, n: DVec3) -> DVec3 {
        let q = d.length_squared();
        if q < COINCIDENT_DISTANCE_SQ {
            return DVec3::ZERO;
        }
        let nd = n.dot(d);
        let p = nd * nd;
        let q_pow = q.powf(self.beta);
        let term_p = n * (2.0 * self.alpha * nd * pow_or_zero(p, self.alpha - 1.0) / q_pow);
        let term_q = d * (2.0 * self.beta * pow_or_zero(p, self.alpha) / (q_pow * q));
        term_p - term_q
    }

    /// Gradient of [`TpeKernel::kf`] with respect to the normal `n`,
    /// holding `d` fixed.
    #[inline(always)]
    fn grad_kf_n(&self, d: DVec3, n: DVec3) -> DVec3 {
        let q = d.length_squared();
        if q < COINCIDENT_DISTANCE_SQ {
            return DVec3::ZERO;
        }
        let nd = n.dot(d);
        let p = nd * nd;
        d * (2.0 * self.alpha * nd * pow_or_zero(p, self.alpha - 1.0) / q.powf(self.beta))
    }

    /// The pair contribution `area(f1) area(f2) K(f1, f2)`. Zero for equal
    /// faces and for degenerate faces.
    pub fn pair_energy(&self, mesh: &SurfaceMesh, f1: usize, f2: usize) -> f64 {
        if f1 == f2 {
            return 0.0;
        }
        let p1 = mesh.face_positions(f1);
        let p2 = mesh.face_positions(f2);
        let (a1, n1) = triangle_area_normal(&p1);
        let (a2, _) = triangle_area_normal(&p2);
        if a1 < DEGENERATE_FACE_AREA || a2 < DEGENERATE_FACE_AREA {
            return 0.0;
        }
        let d = (p1[0] + p1[1] + p1[2]) / 3.0 - (p2[0] + p2[1] + p2[2]) / 3.0;
        a1 * a2 * self.kf(d, n1)
    }

    /// Gradient of the pair contribution with respect to vertex `v`.
    ///
    /// Handles the three incidence cases (`v` in `f1` only, in `f2` only, in
    /// both) with chain terms through both areas, both barycenters, and the
    /// normal of `f1`. Returns zero for vertices incident to neither face.
    pub fn pair_gradient(&self, mesh: &SurfaceMesh, f1: usize, f2: usize, v: usize) -> DVec3 {
        if f1 == f2 {
            return DVec3::ZERO;
        }
        let verts1 = mesh.face_vertices(f1);
        let verts2 = mesh.face_vertices(f2);
        let local1 = verts1.iter().position(|&w| w == v);
        let local2 = verts2.iter().position(|&w| w == v);
        if local1.is_none() && local2.is_none() {
            return DVec3::ZERO;
        }

        let p1 = mesh.face_positions(f1);
        let p2 = mesh.face_positions(f2);
        let (a1, n1) = triangle_area_normal(&p1);
        let (a2, _) = triangle_area_normal(&p2);
        if a1 < DEGENERATE_FACE_AREA || a2 < DEGENERATE_FACE_AREA {
            return DVec3::ZERO;
        }
        let d = (p1[0] + p1[1] + p1[2]) / 3.0 - (p2[0] + p2[1] + p2[2]) / 3.0;

        let k = self.kf(d, n1);
        let grad_d = self.grad_kf_d(d, n1) * (a1 * a2);

        let mut out = DVec3::ZERO;
        if let Some(i) = local1 {
            out += triangle_area_gradient(&p1, i) * (a2 * k);
            out += grad_d / 3.0;
            out += normal_dot_gradient(&p1, i, self.grad_kf_n(d, n1)) * (a1 * a2);
        }
        if let Some(i) = local2 {
            out += triangle_area_gradient(&p2, i) * (a1 * k);
            out -= grad_d / 3.0;
        }
        out
    }

    /// Central-difference version of [`TpeKernel::pair_gradient`], reserved
    /// for validating the analytic gradient in the test suite.
    pub fn pair_gradient_numeric(
        &self,
        mesh: &SurfaceMesh,
        f1: usize,
        f2: usize,
        v: usize,
        eps: f64,
    ) -> DVec3 {
        let mut probe = mesh.clone();
        let base = mesh.position(v);
        let mut out = DVec3::ZERO;
        for axis in 0..3 {
            let mut offset = DVec3::ZERO;
            offset[axis] = eps;
            probe.set_position(v, base + offset);
            let plus = self.pair_energy(&probe, f1, f2);
            probe.set_position(v, base - offset);
            let minus = self.pair_energy(&probe, f1, f2);
            out[axis] = (plus - minus) / (2.0 * eps);
        }
        out
    }

    /// The far-field interaction `area(f) mass K(x_f, x_cluster, n_f)` of a
    /// face against a cluster collapsed to a single body.
    pub fn cluster_energy(&self, mesh: &SurfaceMesh, f: usize, body: &FaceBody) -> f64 {
        let p = mesh.face_positions(f);
        let (area, normal) = triangle_area_normal(&p);
        if area < DEGENERATE_FACE_AREA {
            return 0.0;
        }
        let d = (p[0] + p[1] + p[2]) / 3.0 - body.barycenter;
        area * body.mass * self.kf(d, normal)
    }

    /// Gradient of the symmetrized far-field interaction with respect to
    /// vertex `v` of face `f`.
    ///
    /// Differentiates the symmetric sum `K(f -> cluster) + K(cluster -> f)`
    /// (the reverse direction evaluated with the cluster's average normal)
    /// through the near face's area, barycenter, and normal only. Each
    /// unordered interaction is thus split by chain side: the cluster's
    /// faces collect their half when their own traversals visit `f` inside
    /// a cluster, and summing both traversals of a leaf-leaf encounter
    /// reproduces the exact pair gradient.
    pub fn cluster_gradient(
        &self,
        mesh: &SurfaceMesh,
        f: usize,
        v: usize,
        body: &FaceBody,
    ) -> DVec3 {
        let verts = mesh.face_vertices(f);
        let Some(i) = verts.iter().position(|&w| w == v) else {
            return DVec3::ZERO;
        };
        let p = mesh.face_positions(f);
        let (area, normal) = triangle_area_normal(&p);
        if area < DEGENERATE_FACE_AREA {
            return DVec3::ZERO;
        }
        let d = (p[0] + p[1] + p[2]) / 3.0 - body.barycenter;

        let k_sym = self.kf(d, normal) + self.kf(d, body.normal);
        let grad_d =
            (self.grad_kf_d(d, normal) + self.grad_kf_d(d, body.normal)) * (area * body.mass);

        triangle_area_gradient(&p, i) * (body.mass * k_sym)
            + grad_d / 3.0
            + normal_dot_gradient(&p, i, self.grad_kf_n(d, normal)) * (area * body.mass)
    }
}
