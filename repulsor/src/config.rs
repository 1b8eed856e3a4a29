/////////////////////////////////////////////////////////////////////////////////////////////
//
// Declares configuration types for the line search, the Sobolev projector, and the hierarchy.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Declares configuration types for the line search, the Sobolev projector,
//! and the hierarchy parameters.

use serde::{Deserialize, Serialize};

use repulsor_bct::BctParams;

/// Parameters controlling the Armijo backtracking line search and the flow
/// loop.
///
/// ### Default Values
/// - `sigma`: `0.01`
/// - `step_threshold`: `1e-10`
/// - `gradient_threshold`: `1e-10`
#[derive(Clone, Copy, Serialize, Deserialize, Debug)]
pub struct FlowParams {
    /// Armijo sufficient-decrease coefficient.
    pub sigma: f64,

    /// Step sizes below this threshold fail the line search; the snapshot
    /// is restored and the step is reported as failed.
    pub step_threshold: f64,

    /// Gradient norms below this threshold are treated as stationary; the
    /// step is a no-op.
    pub gradient_threshold: f64,
}

impl Default for FlowParams {
    fn default() -> Self {
        FlowParams {
            sigma: 0.01,
            step_threshold: 1e-10,
            gradient_threshold: 1e-10,
        }
    }
}

/// Parameters controlling the Sobolev (Hs) projection.
///
/// Problems with at most `dense_threshold` vertices assemble and factor the
/// dense high-order operator; larger problems use conjugate gradient with
/// the block-cluster-tree fast multiply.
///
/// ### Default Values
/// - `cg_tolerance`: `1e-4` (relative)
/// - `cg_max_iterations`: `500`
/// - `dense_threshold`: `512`
/// - `epsilon`: `1e-7`
/// - `backproject_tolerance`: `1e-8`
/// - `backproject_max_passes`: `10`
#[derive(Clone, Copy, Serialize, Deserialize, Debug)]
pub struct HsParams {
    /// Relative residual tolerance for the conjugate gradient solver.
    pub cg_tolerance: f64,

    /// Iteration cap for the conjugate gradient solver.
    pub cg_max_iterations: usize,

    /// Vertex count at or below which the dense path is used.
    pub dense_threshold: usize,

    /// Mass-weighted diagonal shift removing the constant null space of
    /// the fractional operator.
    pub epsilon: f64,

    /// Constraint violation norm at which backprojection stops.
    pub backproject_tolerance: f64,

    /// Maximum number of backprojection passes after an accepted step.
    pub backproject_max_passes: usize,
}

impl Default for HsParams {
    fn default() -> Self {
        HsParams {
            cg_tolerance: 1e-4,
            cg_max_iterations: 500,
            dense_threshold: 512,
            epsilon: 1e-7,
            backproject_tolerance: 1e-8,
            backproject_max_passes: 10,
        }
    }
}

impl HsParams {
    /// The hierarchy parameters induced by this configuration for a given
    /// separation parameter.
    pub fn bct_params(&self, separation: f64) -> BctParams {
        BctParams {
            separation,
            epsilon: self.epsilon,
            ..BctParams::default()
        }
    }
}
