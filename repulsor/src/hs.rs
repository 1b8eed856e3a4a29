/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements the Sobolev (Hs) projector: dense assemblies, fast solves, Schur constraints.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use std::fmt;
use std::sync::Arc;

use faer::linalg::solvers::{Llt, Solve};
use faer::{Mat, MatRef, Side};
use itertools::iproduct;
use rayon::prelude::*;

use repulsor_bct::BlockClusterTree;
use repulsor_utils::derivatives::hat_gradient;
use repulsor_utils::{metric_distance_term, SurfaceMesh};

use crate::config::HsParams;
use crate::constraints::ConstraintSet;
use crate::iterative_solvers::{conjugate_gradient, CgSolution, SolveAccuracy, ToleranceType};
use crate::progress::ProgressSink;

/// The Sobolev order matched to the tangent-point exponents: the fractional
/// Laplacian of order `2s` with `s = (beta - 2) / alpha` has the natural
/// differential order of the energy.
pub fn get_s(alpha: f64, beta: f64) -> f64 {
    (beta - 2.0) / alpha
}

/// Errors surfaced by the Sobolev projector.
#[derive(Debug)]
pub enum HsError {
    /// Conjugate gradient failed to reach tolerance. The flow falls back to
    /// the unprojected gradient for this step.
    CgNotConverged { iterations: usize, residual: f64 },

    /// The Schur complement stayed singular after dropping the
    /// smallest-pivot constraint row.
    SingularSchur,

    /// Backprojection failed to restore the constraints.
    ConstraintInfeasible { violation: f64 },
}

impl fmt::Display for HsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HsError::CgNotConverged { iterations, residual } => write!(
                f,
                "conjugate gradient stopped after {} iterations at residual {:.3e}",
                iterations, residual
            ),
            HsError::SingularSchur => {
                write!(f, "Schur complement is singular after dropping one row")
            }
            HsError::ConstraintInfeasible { violation } => write!(
                f,
                "backprojection left constraint violation {:.3e}",
                violation
            ),
        }
    }
}

impl std::error::Error for HsError {}

/// Dense assembly of the high-order operator `M_H(s)`: for each ordered
/// face pair, hat-gradient differences weighted by both areas and the
/// fractional metric term. Retained for small problems and verification;
/// the scalable path multiplies through the block cluster tree instead.
pub fn fill_matrix_high(mesh: &SurfaceMesh, s: f64) -> Mat<f64> {
    let n = mesh.n_vertices();
    let n_faces = mesh.n_faces();
    let mut matrix = Mat::<f64>::zeros(n, n);

    let areas: Vec<f64> = (0..n_faces).map(|f| mesh.face_area(f)).collect();
    let barycenters: Vec<glam::DVec3> = (0..n_faces).map(|f| mesh.face_barycenter(f)).collect();
    let hat_gradients: Vec<[glam::DVec3; 3]> = (0..n_faces)
        .map(|f| {
            let positions = mesh.face_positions(f);
            [0, 1, 2].map(|i| hat_gradient(&positions, i))
        })
        .collect();

    for (f1, f2) in iproduct!(0..n_faces, 0..n_faces) {
        if f1 == f2 {
            continue;
        }
        let weight = areas[f1] * areas[f2] * metric_distance_term(s, barycenters[f1], barycenters[f2]);
        if weight == 0.0 {
            continue;
        }

        let (verts, len) = mesh.pair_vertices(f1, f2);
        for &u in &verts[..len] {
            let gu = hat_difference(mesh, f1, f2, &hat_gradients, u);
            for &v in &verts[..len] {
                let gv = hat_difference(mesh, f1, f2, &hat_gradients, v);
                matrix[(u, v)] += weight * gu.dot(gv);
            }
        }
    }
    matrix
}

fn hat_difference(
    mesh: &SurfaceMesh,
    f1: usize,
    f2: usize,
    hat_gradients: &[[glam::DVec3; 3]],
    u: usize,
) -> glam::DVec3 {
    let mut out = glam::DVec3::ZERO;
    if let Some(i) = mesh.face_vertices(f1).iter().position(|&w| w == u) {
        out += hat_gradients[f1][i];
    }
    if let Some(i) = mesh.face_vertices(f2).iter().position(|&w| w == u) {
        out -= hat_gradients[f2][i];
    }
    out
}

/// Dense assembly of the fractional-only operator `M_F(s)`: the same pair
/// sum with flat barycentric weights `1/3` in place of hat gradients. This
/// is exactly the vertex-level restriction of the collocated operator the
/// block cluster tree represents, so the fast sandwich multiply converges
/// to it as the separation parameter shrinks.
pub fn fill_matrix_frac_only(mesh: &SurfaceMesh, s: f64) -> Mat<f64> {
    let n = mesh.n_vertices();
    let n_faces = mesh.n_faces();
    let mut matrix = Mat::<f64>::zeros(n, n);

    let areas: Vec<f64> = (0..n_faces).map(|f| mesh.face_area(f)).collect();
    let barycenters: Vec<glam::DVec3> = (0..n_faces).map(|f| mesh.face_barycenter(f)).collect();

    for (f1, f2) in iproduct!(0..n_faces, 0..n_faces) {
        if f1 == f2 {
            continue;
        }
        let weight = areas[f1] * areas[f2] * metric_distance_term(s, barycenters[f1], barycenters[f2]);
        if weight == 0.0 {
            continue;
        }

        let verts1 = mesh.face_vertices(f1);
        let verts2 = mesh.face_vertices(f2);
        let (verts, len) = mesh.pair_vertices(f1, f2);
        for &u in &verts[..len] {
            let wu = barycentric_difference(&verts1, &verts2, u);
            for &v in &verts[..len] {
                let wv = barycentric_difference(&verts1, &verts2, v);
                matrix[(u, v)] += weight * wu * wv;
            }
        }
    }
    matrix
}

fn barycentric_difference(verts1: &[usize; 3], verts2: &[usize; 3], u: usize) -> f64 {
    let mut out = 0.0;
    if verts1.contains(&u) {
        out += 1.0 / 3.0;
    }
    if verts2.contains(&u) {
        out -= 1.0 / 3.0;
    }
    out
}

/// Applies the vertex-level operator `J^T A J` backed by the block cluster
/// tree: average vertex values onto face barycenters, fast multiply, then
/// distribute back to vertices with the same weights.
pub fn sandwich_multiply(bct: &BlockClusterTree, mesh: &SurfaceMesh, x: MatRef<f64>) -> Mat<f64> {
    debug_assert_eq!(x.nrows(), mesh.n_vertices());

    let n_faces = mesh.n_faces();
    let mut face_values = Mat::<f64>::zeros(n_faces, x.ncols());
    for j in 0..x.ncols() {
        for f in 0..n_faces {
            let [a, b, c] = mesh.face_vertices(f);
            face_values[(f, j)] = (x[(a, j)] + x[(b, j)] + x[(c, j)]) / 3.0;
        }
    }

    let multiplied = bct.multiply(face_values.as_ref());

    let mut out = Mat::<f64>::zeros(x.nrows(), x.ncols());
    for j in 0..x.ncols() {
        for f in 0..n_faces {
            let value = multiplied[(f, j)] / 3.0;
            let [a, b, c] = mesh.face_vertices(f);
            out[(a, j)] += value;
            out[(b, j)] += value;
            out[(c, j)] += value;
        }
    }
    out
}

// Small dense Cholesky with an explicit positivity check, sized for the
// constraint block. Pivots below `PIVOT_TOLERANCE` relative to the largest
// diagonal entry are treated as rank deficiency.
struct SchurFactor {
    l: Mat<f64>,
}

impl SchurFactor {
    const PIVOT_TOLERANCE: f64 = 1e-12;

    fn try_new(s: &Mat<f64>) -> Option<Self> {
        let n = s.nrows();
        let scale = (0..n)
            .map(|i| s[(i, i)].abs())
            .fold(f64::MIN_POSITIVE, f64::max);

        let mut l = Mat::<f64>::zeros(n, n);
        for j in 0..n {
            let mut pivot = s[(j, j)];
            for k in 0..j {
                pivot -= l[(j, k)] * l[(j, k)];
            }
            if pivot <= Self::PIVOT_TOLERANCE * scale {
                return None;
            }
            let root = pivot.sqrt();
            l[(j, j)] = root;
            for i in (j + 1)..n {
                let mut value = s[(i, j)];
                for k in 0..j {
                    value -= l[(i, k)] * l[(j, k)];
                }
                l[(i, j)] = value / root;
            }
        }
        Some(SchurFactor { l })
    }

    fn solve(&self, rhs: &[f64]) -> Vec<f64> {
        let n = self.l.nrows();
        debug_assert_eq!(rhs.len(), n);

        // Forward substitution L z = rhs.
        let mut z = rhs.to_vec();
        for i in 0..n {
            for k in 0..i {
                z[i] -= self.l[(i, k)] * z[k];
            }
            z[i] /= self.l[(i, i)];
        }
        // Back substitution L^T x = z.
        for i in (0..n).rev() {
            for k in (i + 1)..n {
                z[i] -= self.l[(k, i)] * z[k];
            }
            z[i] /= self.l[(i, i)];
        }
        z
    }
}

// Dense factorization with the Cholesky-first, LU-fallback policy.
enum DenseFactor {
    Llt(Llt<f64>),
    Lu(faer::linalg::solvers::PartialPivLu<f64>),
}

impl DenseFactor {
    fn new(matrix: &Mat<f64>) -> Self {
        match Llt::new(matrix.as_ref(), Side::Lower) {
            Ok(llt) => DenseFactor::Llt(llt),
            Err(_) => DenseFactor::Lu(matrix.partial_piv_lu()),
        }
    }

    fn solve(&self, rhs: MatRef<f64>) -> Mat<f64> {
        match self {
            DenseFactor::Llt(factor) => factor.solve(rhs),
            DenseFactor::Lu(factor) => factor.solve(rhs),
        }
    }
}

enum MetricSolver<'a> {
    Dense(DenseFactor),
    Bct(&'a BlockClusterTree<'a>),
}

/// The Sobolev metric for one iteration: solves `M x = g` column-wise,
/// either by a dense factorization of the high-order assembly (small
/// problems) or by conjugate gradient through the block cluster tree.
pub struct HsMetric<'a> {
    mesh: &'a SurfaceMesh,
    s: f64,
    params: HsParams,
    solver: MetricSolver<'a>,
    callback: Option<Arc<dyn ProgressSink>>,
}

impl<'a> HsMetric<'a> {
    /// Dense path: assembles and factors the high-order operator with a
    /// small diagonal shift removing its constant null space.
    pub fn new_dense(mesh: &'a SurfaceMesh, s: f64, params: HsParams) -> Self {
        let mut matrix = fill_matrix_high(mesh, s);
        let n = matrix.nrows();
        let mean_diag = (0..n).map(|i| matrix[(i, i)]).sum::<f64>() / n as f64;
        let shift = params.epsilon * mean_diag.max(1.0);
        for i in 0..n {
            matrix[(i, i)] += shift;
        }
        HsMetric {
            mesh,
            s,
            params,
            solver: MetricSolver::Dense(DenseFactor::new(&matrix)),
            callback: None,
        }
    }

    /// Scalable path: solves through the block cluster tree sandwich.
    pub fn with_bct(mesh: &'a SurfaceMesh, s: f64, params: HsParams, bct: &'a BlockClusterTree<'a>) -> Self {
        HsMetric {
            mesh,
            s,
            params,
            solver: MetricSolver::Bct(bct),
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: Arc<dyn ProgressSink>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn s(&self) -> f64 {
        self.s
    }

    /// Solves `M x = rhs` for each column of `rhs` (shape `(V, k)`).
    pub fn solve_columns(&self, rhs: MatRef<f64>) -> Result<Mat<f64>, HsError> {
        debug_assert_eq!(rhs.nrows(), self.mesh.n_vertices());

        match &self.solver {
            MetricSolver::Dense(factor) => Ok(factor.solve(rhs)),
            MetricSolver::Bct(bct) => {
                let accuracy = SolveAccuracy {
                    tolerance: self.params.cg_tolerance,
                    tolerance_type: ToleranceType::Relative,
                };
                let columns: Vec<CgSolution> = (0..rhs.ncols())
                    .into_par_iter()
                    .map(|j| {
                        let b = Mat::from_fn(rhs.nrows(), 1, |i, _| rhs[(i, j)]);
                        conjugate_gradient(
                            &|x: &MatRef<f64>| sandwich_multiply(bct, self.mesh, *x),
                            b.as_ref(),
                            None,
                            self.params.cg_max_iterations,
                            &accuracy,
                            self.callback.clone(),
                        )
                    })
                    .collect();

                for column in &columns {
                    if !column.converged {
                        return Err(HsError::CgNotConverged {
                            iterations: column.iterations,
                            residual: column.residual,
                        });
                    }
                }

                let mut out = Mat::<f64>::zeros(rhs.nrows(), rhs.ncols());
                for (j, column) in columns.iter().enumerate() {
                    for i in 0..rhs.nrows() {
                        out[(i, j)] = column.x[(i, 0)];
                    }
                }
                Ok(out)
            }
        }
    }

    /// Solves the metric against a flattened `3V` right-hand side by
    /// unstacking it into three coordinate columns.
    fn solve_flat(&self, rhs: &[f64]) -> Result<Vec<f64>, HsError> {
        let n = self.mesh.n_vertices();
        debug_assert_eq!(rhs.len(), 3 * n);
        let stacked = Mat::from_fn(n, 3, |v, axis| rhs[3 * v + axis]);
        let solved = self.solve_columns(stacked.as_ref())?;
        let mut out = vec![0.0; 3 * n];
        for v in 0..n {
            for axis in 0..3 {
                out[3 * v + axis] = solved[(v, axis)];
            }
        }
        Ok(out)
    }

    /// Unconstrained projection: replaces the differential by the Sobolev
    /// gradient, solving one system per coordinate column.
    pub fn project(&self, gradient: MatRef<f64>) -> Result<Mat<f64>, HsError> {
        self.solve_columns(gradient)
    }

    /// Builds the Schur complement `S = C M^{-1} C^T` for the current
    /// constraints: one metric solve per constraint row (in parallel for
    /// the iterative path), then a dense Cholesky of `S`. A singular `S`
    /// drops the smallest-diagonal row and retries once.
    pub fn schur_complement(&self, constraints: &ConstraintSet) -> Result<SchurComplement, HsError> {
        let n3 = 3 * self.mesh.n_vertices();
        let c = constraints.jacobian(self.mesh);
        let rows = c.nrows();
        debug_assert_eq!(c.ncols(), n3);

        let mut y = Mat::<f64>::zeros(n3, rows);
        let columns: Vec<Result<Vec<f64>, HsError>> = (0..rows)
            .into_par_iter()
            .map(|k| {
                let rhs: Vec<f64> = (0..n3).map(|i| c[(k, i)]).collect();
                self.solve_flat(&rhs)
            })
            .collect();
        for (k, column) in columns.into_iter().enumerate() {
            let column = column?;
            for i in 0..n3 {
                y[(i, k)] = column[i];
            }
        }

        let s = &c * &y;

        let kept: Vec<usize> = (0..rows).collect();
        match SchurFactor::try_new(&s) {
            Some(factor) => Ok(SchurComplement {
                c,
                y,
                kept,
                factor,
            }),
            None => {
                // Drop the smallest-pivot row (redundant constraint) and
                // retry once.
                let mut drop_row = 0;
                for k in 1..rows {
                    if s[(k, k)] < s[(drop_row, drop_row)] {
                        drop_row = k;
                    }
                }
                let kept: Vec<usize> = (0..rows).filter(|&k| k != drop_row).collect();
                let reduced = Mat::from_fn(kept.len(), kept.len(), |i, j| s[(kept[i], kept[j])]);
                match SchurFactor::try_new(&reduced) {
                    Some(factor) => Ok(SchurComplement {
                        c,
                        y,
                        kept,
                        factor,
                    }),
                    None => Err(HsError::SingularSchur),
                }
            }
        }
    }

    /// Constrained projection: `x = z - Y S^{-1} (C z)` with
    /// `z = M^{-1} g`, so the returned direction is tangent to all
    /// constraint level sets.
    pub fn project_with_constraints(
        &self,
        gradient: MatRef<f64>,
        schur: &SchurComplement,
    ) -> Result<Mat<f64>, HsError> {
        let n = self.mesh.n_vertices();
        let z = self.solve_columns(gradient)?;

        let z_flat: Vec<f64> = (0..3 * n).map(|i| z[(i / 3, i % 3)]).collect();
        let corrected = schur.tangent_correction(&z_flat);

        Ok(Mat::from_fn(n, 3, |v, axis| corrected[3 * v + axis]))
    }
}

/// The Schur complement of the constrained saddle-point system, with the
/// solved columns `Y = M^{-1} C^T` retained for projection and
/// backprojection.
pub struct SchurComplement {
    c: Mat<f64>,
    y: Mat<f64>,
    kept: Vec<usize>,
    factor: SchurFactor,
}

impl SchurComplement {
    /// Number of active (kept) constraint rows.
    pub fn active_rows(&self) -> usize {
        self.kept.len()
    }

    /// Whether a redundant row was dropped during factorization.
    pub fn dropped_row(&self) -> bool {
        self.kept.len() < self.c.nrows()
    }

    fn solve_lambda(&self, v_kept: &[f64]) -> Vec<f64> {
        self.factor.solve(v_kept)
    }

    // x := x - Y lambda with lambda = S^{-1} (C x), restricted to the kept
    // rows.
    fn tangent_correction(&self, x: &[f64]) -> Vec<f64> {
        let n3 = self.c.ncols();
        let cx: Vec<f64> = self
            .kept
            .iter()
            .map(|&k| (0..n3).map(|i| self.c[(k, i)] * x[i]).sum())
            .collect();
        let lambda = self.solve_lambda(&cx);

        let mut out = x.to_vec();
        for (slot, &k) in self.kept.iter().enumerate() {
            let scale = lambda[slot];
            for i in 0..n3 {
                out[i] -= self.y[(i, k)] * scale;
            }
        }
        out
    }

    /// Restores the constraints after an accepted step by Newton passes on
    /// the violation: `positions -= Y S^{-1} violation` until the violation
    /// norm is below tolerance. Returns the final violation norm; a run
    /// that exhausts the pass budget without reaching tolerance fails with
    /// [`HsError::ConstraintInfeasible`] so the caller aborts the step and
    /// restores its snapshot.
    pub fn backproject(
        &self,
        constraints: &ConstraintSet,
        mesh: &mut SurfaceMesh,
        params: &HsParams,
    ) -> Result<f64, HsError> {
        let n = mesh.n_vertices();

        for _pass in 0..params.backproject_max_passes {
            let violations = constraints.violations(mesh);
            let v_kept: Vec<f64> = self.kept.iter().map(|&k| violations[k]).collect();
            let violation_norm = v_kept.iter().map(|v| v * v).sum::<f64>().sqrt();
            if !violation_norm.is_finite() {
                return Err(HsError::ConstraintInfeasible {
                    violation: violation_norm,
                });
            }
            if violation_norm < params.backproject_tolerance {
                return Ok(violation_norm);
            }

            let lambda = self.solve_lambda(&v_kept);
            let mut positions = mesh.positions().to_owned();
            for (slot, &k) in self.kept.iter().enumerate() {
                let scale = lambda[slot];
                for v in 0..n {
                    for axis in 0..3 {
                        positions[(v, axis)] -= self.y[(3 * v + axis, k)] * scale;
                    }
                }
            }
            mesh.set_positions(positions.as_ref());
        }

        let violations = constraints.violations(mesh);
        let v_kept: Vec<f64> = self.kept.iter().map(|&k| violations[k]).collect();
        let final_norm = v_kept.iter().map(|v| v * v).sum::<f64>().sqrt();
        if final_norm < params.backproject_tolerance {
            Ok(final_norm)
        } else {
            Err(HsError::ConstraintInfeasible {
                violation: final_norm,
            })
        }
    }
}
