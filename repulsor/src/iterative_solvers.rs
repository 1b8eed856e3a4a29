/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements the conjugate gradient solver used behind the Sobolev preconditioner.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use std::sync::Arc;

use faer::{Mat, MatRef};
use serde::{Deserialize, Serialize};

use crate::progress::{progress_from_rel, ProgressMsg, ProgressSink};

/// How a solver tolerance is interpreted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ToleranceType {
    /// Stop when the max-norm of the residual falls below the tolerance.
    Absolute,

    /// Stop when the residual norm relative to the right-hand side falls
    /// below the tolerance.
    Relative,
}

/// Stopping criterion for the iterative solvers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SolveAccuracy {
    pub tolerance: f64,
    pub tolerance_type: ToleranceType,
}

/// Outcome of a conjugate gradient run: the best iterate together with its
/// residual and convergence status.
#[derive(Debug, Clone)]
pub struct CgSolution {
    pub x: Mat<f64>,
    pub iterations: usize,
    pub residual: f64,
    pub converged: bool,
}

/// Conjugate gradient for symmetric positive definite operators.
///
/// Solves `A x = b` for a single right-hand-side column, with the operator
/// supplied as a matrix-vector product closure. Iterations stop when the
/// residual satisfies `tolerance` or after `max_iterations`; the caller
/// decides how to recover from a non-converged run (the best iterate is
/// always returned).
///
/// # Parameters
/// - `a`: Operator function A(x)
/// - `b`: Right-hand side column
/// - `x0`: Optional initial guess
/// - `max_iterations`: Iteration cap
/// - `tolerance`: Stopping criterion
/// - `callback`: Optional per-iteration progress sink
pub fn conjugate_gradient<A>(
    a: &A,
    b: MatRef<f64>,
    x0: Option<&Mat<f64>>,
    max_iterations: usize,
    tolerance: &SolveAccuracy,
    callback: Option<Arc<dyn ProgressSink>>,
) -> CgSolution
where
    A: Fn(&MatRef<f64>) -> Mat<f64>,
{
    let n = b.nrows();
    let mut x = x0.cloned().unwrap_or_else(|| Mat::zeros(n, 1));

    let mut r = b - &a(&x.as_ref());
    let beta = match tolerance.tolerance_type {
        ToleranceType::Absolute => b.norm_max(),
        ToleranceType::Relative => b.norm_l2(),
    };

    let mut residual = residual_norm(&r, beta, tolerance);
    if residual < tolerance.tolerance || beta == 0.0 {
        return CgSolution {
            x,
            iterations: 0,
            residual,
            converged: true,
        };
    }

    let mut p = r.clone();
    let mut rs_old = dot(&r, &r);

    for iteration in 1..=max_iterations {
        let ap = a(&p.as_ref());
        let p_ap = dot(&p, &ap);
        if p_ap <= 0.0 {
            // The operator is not positive definite along p; stop with the
            // best iterate so far.
            return CgSolution {
                x,
                iterations: iteration - 1,
                residual,
                converged: false,
            };
        }

        let alpha = rs_old / p_ap;
        x += p.clone() * alpha;
        r -= ap * alpha;

        let rs_new = dot(&r, &r);
        residual = residual_norm(&r, beta, tolerance);

        if let Some(sink) = &callback {
            sink.emit(ProgressMsg::SolverIteration {
                iter: iteration,
                residual,
                progress: progress_from_rel(residual, beta, tolerance.tolerance),
            });
        }

        if residual < tolerance.tolerance {
            return CgSolution {
                x,
                iterations: iteration,
                residual,
                converged: true,
            };
        }

        let scaled = p * (rs_new / rs_old);
        p = &r + &scaled;
        rs_old = rs_new;
    }

    CgSolution {
        x,
        iterations: max_iterations,
        residual,
        converged: false,
    }
}

#[inline]
fn dot(a: &Mat<f64>, b: &Mat<f64>) -> f64 {
    a.col(0).iter().zip(b.col(0).iter()).map(|(x, y)| x * y).sum()
}

#[inline]
fn residual_norm(r: &Mat<f64>, beta: f64, tolerance: &SolveAccuracy) -> f64 {
    match tolerance.tolerance_type {
        ToleranceType::Absolute => r.norm_max(),
        ToleranceType::Relative => r.norm_l2() / beta,
    }
}
