/////////////////////////////////////////////////////////////////////////////////////////////
//
// Exposes the public API for the hierarchical fast tangent-point evaluator.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Hierarchical fast evaluator for the tangent-point energy
//!
//! The tangent-point energy couples every mesh face with every other face,
//! so naive evaluation costs **O(F^2)** per iteration. This crate makes each
//! iteration scalable with three pieces:
//!
//! - a **6-D bounding volume hierarchy** ([`FaceBvh`]) over face bodies,
//!   indexed by barycenter and normal;
//! - a **Barnes-Hut** energy and differential ([`tpe_value`],
//!   [`tpe_differential`]) that replace well-separated branches by single
//!   far-field bodies, for an expected **O(F log F)** evaluation;
//! - a **block cluster tree** ([`BlockClusterTree`]) that represents the
//!   discretized fractional Laplacian as a hierarchical matrix and supplies
//!   the fast matrix-vector products behind the Sobolev preconditioner.
//!
//! # Example: fast energy evaluation
//!
//! ```
//! use repulsor_bct::{tpe_value, all_pairs_value, FaceBvh};
//! use repulsor_utils::{MeshShapes, TpeKernel};
//!
//! let mesh = MeshShapes::icosphere(1);
//! let kernel = TpeKernel::new(3.0, 6.0);
//!
//! let bvh = FaceBvh::from_mesh(&mesh, 0.25);
//! let approx = tpe_value(&mesh, &bvh, &kernel);
//! let exact = all_pairs_value(&mesh, &kernel);
//!
//! assert!((approx.value - exact).abs() / exact < 0.05);
//! ```

mod barnes_hut;
mod block_cluster;
mod bvh;

#[doc(inline)]
pub use {
    barnes_hut::{
        all_pairs_differential, all_pairs_value, tpe_differential, tpe_value, BhDifferential,
        BhValue,
    },
    block_cluster::{BctParams, BctStats, BctStatsSnapshot, BlockClusterTree, ClusterPair},
    bvh::{BvhNode, BvhNodeType, FaceBvh},
};
