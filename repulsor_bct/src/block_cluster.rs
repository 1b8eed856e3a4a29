/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements the block cluster tree and its percolated fast multiply for the fractional operator.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use faer::{Mat, MatRef};
use glam::DVec3;
use rayon::prelude::*;

use repulsor_utils::{metric_distance_term, SurfaceMesh};

use crate::bvh::{BvhNodeType, FaceBvh};

/// Construction parameters for the [`BlockClusterTree`].
#[derive(Debug, Clone, Copy)]
pub struct BctParams {
    /// Barnes-Hut separation parameter for pairwise admissibility.
    pub separation: f64,

    /// Mass-weighted diagonal shift added to the operator. Removes the
    /// constant null space of the fractional Laplacian so iterative solves
    /// stay well posed.
    pub epsilon: f64,

    /// Pairs with combined element count at or below this threshold are
    /// resolved exactly. A performance heuristic, not a correctness knob.
    pub small_pair_threshold: usize,
}

impl Default for BctParams {
    fn default() -> Self {
        BctParams {
            separation: repulsor_utils::constants::DEFAULT_SEPARATION,
            epsilon: 1e-9,
            small_pair_threshold: 8,
        }
    }
}

/// An ordered pair of BVH branches, identified by arena node id.
#[derive(Debug, Clone, Copy)]
pub struct ClusterPair {
    pub cluster1: usize,
    pub cluster2: usize,
}

/// Per-instance timing counters for the multiply phases, in nanoseconds.
/// Thread safe; incremented during [`BlockClusterTree::multiply`].
#[derive(Debug, Default)]
pub struct BctStats {
    traversal_nanos: AtomicU64,
    well_separated_nanos: AtomicU64,
    ill_separated_nanos: AtomicU64,
}

/// A point-in-time copy of [`BctStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BctStatsSnapshot {
    pub traversal_nanos: u64,
    pub well_separated_nanos: u64,
    pub ill_separated_nanos: u64,
}

impl BctStats {
    fn add_traversal(&self, nanos: u64) {
        self.traversal_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    fn add_well_separated(&self, nanos: u64) {
        self.well_separated_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    fn add_ill_separated(&self, nanos: u64) {
        self.ill_separated_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BctStatsSnapshot {
        BctStatsSnapshot {
            traversal_nanos: self.traversal_nanos.load(Ordering::Relaxed),
            well_separated_nanos: self.well_separated_nanos.load(Ordering::Relaxed),
            ill_separated_nanos: self.ill_separated_nanos.load(Ordering::Relaxed),
        }
    }
}

/// Hierarchical representation of the discretized fractional Laplacian
///
/// ```text
/// (A v)_i = 2 area_i ( sum_j area_j k_s(x_i, x_j) (v_i - v_j) ) + eps area_i v_i
/// ```
///
/// on per-face scalars, with `k_s(x, y) = 1 / |x - y|^(2 + 2s)`. Built once
/// per iteration on top of the face BVH; admissible branch pairs are
/// collapsed to single cluster interactions, inadmissible pairs are resolved
/// exactly, and together the leaf-by-leaf pairs they cover partition
/// `F x F`.
#[derive(Debug)]
pub struct BlockClusterTree<'a> {
    bvh: &'a FaceBvh,
    areas: Vec<f64>,
    barycenters: Vec<DVec3>,
    exp_s: f64,
    params: BctParams,
    admissible_pairs: Vec<ClusterPair>,
    inadmissible_pairs: Vec<ClusterPair>,
    admissible_by_first: Vec<Vec<ClusterPair>>,
    af_one: Vec<f64>,
    stats: BctStats,
}

impl<'a> BlockClusterTree<'a> {
    /// Classifies all cluster pairs, buckets the admissible ones by first
    /// cluster, and precomputes the diagonal correction `A' 1`.
    pub fn new(mesh: &SurfaceMesh, bvh: &'a FaceBvh, exp_s: f64, params: BctParams) -> Self {
        debug_assert_eq!(mesh.n_faces(), bvh.n_faces());

        let areas: Vec<f64> = (0..mesh.n_faces()).map(|f| mesh.face_area(f)).collect();
        let barycenters: Vec<DVec3> = (0..mesh.n_faces())
            .map(|f| mesh.face_barycenter(f))
            .collect();

        let mut tree = BlockClusterTree {
            bvh,
            areas,
            barycenters,
            exp_s,
            params,
            admissible_pairs: Vec::new(),
            inadmissible_pairs: Vec::new(),
            admissible_by_first: Vec::new(),
            af_one: Vec::new(),
            stats: BctStats::default(),
        };

        let start = Instant::now();
        tree.classify_pairs();
        tree.organize_pairs_by_first();
        tree.stats.add_traversal(start.elapsed().as_nanos() as u64);

        tree.af_one = {
            let ones = vec![1.0; tree.n_faces()];
            let mut out = vec![0.0; tree.n_faces()];
            tree.multiply_raw(&ones, &mut out);
            out
        };

        tree
    }

    pub fn n_faces(&self) -> usize {
        self.areas.len()
    }

    pub fn exp_s(&self) -> f64 {
        self.exp_s
    }

    pub fn params(&self) -> BctParams {
        self.params
    }

    pub fn admissible_pairs(&self) -> &[ClusterPair] {
        &self.admissible_pairs
    }

    pub fn inadmissible_pairs(&self) -> &[ClusterPair] {
        &self.inadmissible_pairs
    }

    pub fn stats(&self) -> BctStatsSnapshot {
        self.stats.snapshot()
    }

    // Resolves every cluster pair reachable from (root, root) into the
    // admissible or inadmissible list.
    fn classify_pairs(&mut self) {
        let mut unresolved = vec![ClusterPair {
            cluster1: 0,
            cluster2: 0,
        }];

        while !unresolved.is_empty() {
            let mut next = Vec::new();
            for pair in unresolved.drain(..) {
                let n1 = self.bvh.node(pair.cluster1).n_elements();
                let n2 = self.bvh.node(pair.cluster2).n_elements();

                if n1 == 0 || n2 == 0 {
                    continue;
                }
                if n1 == 1 && n2 == 1 {
                    // Two singletons multiply exactly.
                    self.inadmissible_pairs.push(pair);
                } else if self.bvh.is_pair_admissible(
                    pair.cluster1,
                    pair.cluster2,
                    self.params.separation,
                ) {
                    self.admissible_pairs.push(pair);
                } else if self.is_pair_small_enough(n1, n2) {
                    self.inadmissible_pairs.push(pair);
                } else {
                    let children1 = self.bvh.node(pair.cluster1).children;
                    let children2 = self.bvh.node(pair.cluster2).children;
                    for c1 in children1.into_iter().flatten() {
                        for c2 in children2.into_iter().flatten() {
                            next.push(ClusterPair {
                                cluster1: c1,
                                cluster2: c2,
                            });
                        }
                    }
                }
            }
            unresolved = next;
        }
    }

    fn is_pair_small_enough(&self, n1: usize, n2: usize) -> bool {
        n1 <= 1 || n2 <= 1 || n1 + n2 <= self.params.small_pair_threshold
    }

    fn organize_pairs_by_first(&mut self) {
        self.admissible_by_first = vec![Vec::new(); self.bvh.n_nodes()];
        for pair in &self.admissible_pairs {
            self.admissible_by_first[pair.cluster1].push(*pair);
        }
    }

    /// Applies the operator to each column of `v`, returning a matrix of
    /// the same shape.
    pub fn multiply(&self, v: MatRef<f64>) -> Mat<f64> {
        debug_assert_eq!(v.nrows(), self.n_faces());

        let mut out = Mat::<f64>::zeros(v.nrows(), v.ncols());
        let mut column = vec![0.0; self.n_faces()];
        let mut raw = vec![0.0; self.n_faces()];
        for j in 0..v.ncols() {
            for (slot, value) in column.iter_mut().zip(v.col(j).iter()) {
                *slot = *value;
            }
            raw.iter_mut().for_each(|y| *y = 0.0);
            self.multiply_raw(&column, &mut raw);

            for i in 0..self.n_faces() {
                out[(i, j)] = 2.0 * (self.af_one[i] * column[i] - raw[i])
                    + self.params.epsilon * self.areas[i] * column[i];
            }
        }
        out
    }

    /// The same operator evaluated by the exact all-pairs double loop.
    /// Retained for verification against the fast path.
    pub fn multiply_exact(&self, v: MatRef<f64>) -> Mat<f64> {
        debug_assert_eq!(v.nrows(), self.n_faces());

        let mut out = Mat::<f64>::zeros(v.nrows(), v.ncols());
        for j in 0..v.ncols() {
            for i in 0..self.n_faces() {
                let mut total = 0.0;
                for k in 0..self.n_faces() {
                    if k == i {
                        continue;
                    }
                    let a_ik =
                        metric_distance_term(self.exp_s, self.barycenters[i], self.barycenters[k]);
                    total += self.areas[k] * a_ik * (v[(i, j)] - v[(k, j)]);
                }
                out[(i, j)] = 2.0 * self.areas[i] * total
                    + self.params.epsilon * self.areas[i] * v[(i, j)];
            }
        }
        out
    }

    // The off-diagonal product `y_i = area_i sum_{j != i} k_s(x_i, x_j)
    // area_j v_j` in the percolated form: an upward pass accumulating
    // weighted cluster sums, one cluster interaction per admissible pair,
    // a downward pass distributing cluster values to leaves, and an exact
    // sweep over the inadmissible pairs.
    fn multiply_raw(&self, v: &[f64], y: &mut [f64]) {
        let n_nodes = self.bvh.n_nodes();
        let nodes = self.bvh.nodes();

        let start = Instant::now();

        // Upward pass. Children carry larger pre-order ids, so a reverse
        // sweep fills the overlay bottom-up.
        let mut wt_dot = vec![0.0; n_nodes];
        for id in (0..n_nodes).rev() {
            let node = &nodes[id];
            wt_dot[id] = match node.node_type {
                BvhNodeType::Empty => 0.0,
                BvhNodeType::Leaf => {
                    let elem = node.element_id.unwrap_or(0);
                    self.areas[elem] * v[elem]
                }
                BvhNodeType::Interior => node
                    .children
                    .into_iter()
                    .flatten()
                    .map(|child| wt_dot[child])
                    .sum(),
            };
        }

        // Cluster contributions, parallel over first-cluster buckets: no
        // two updates target the same accumulator entry.
        let mut b = vec![0.0; n_nodes];
        b.par_iter_mut().enumerate().for_each(|(i, b_i)| {
            for pair in &self.admissible_by_first[i] {
                let a_ij = metric_distance_term(
                    self.exp_s,
                    nodes[pair.cluster1].center_of_mass,
                    nodes[pair.cluster2].center_of_mass,
                );
                *b_i += a_ij * wt_dot[pair.cluster2];
            }
        });

        // Downward pass: each branch inherits its parent's accumulator
        // before leaves emit.
        for id in 0..n_nodes {
            let b_id = b[id];
            for child in nodes[id].children.into_iter().flatten() {
                b[child] += b_id;
            }
            if nodes[id].node_type == BvhNodeType::Leaf {
                if let Some(elem) = nodes[id].element_id {
                    y[elem] += self.areas[elem] * b[id];
                }
            }
        }

        self.stats.add_well_separated(start.elapsed().as_nanos() as u64);
        let start = Instant::now();

        // Inadmissible pass: exact double loops, reduced from
        // thread-private accumulators.
        let partial = self
            .inadmissible_pairs
            .par_iter()
            .fold(
                || vec![0.0; self.n_faces()],
                |mut acc, pair| {
                    self.full_product(pair, v, &mut acc);
                    acc
                },
            )
            .reduce(
                || vec![0.0; self.n_faces()],
                |mut a, b| {
                    for (slot, value) in a.iter_mut().zip(b.iter()) {
                        *slot += value;
                    }
                    a
                },
            );
        for (slot, value) in y.iter_mut().zip(partial.iter()) {
            *slot += value;
        }

        self.stats.add_ill_separated(start.elapsed().as_nanos() as u64);
    }

    // Exact off-diagonal block of one inadmissible pair.
    fn full_product(&self, pair: &ClusterPair, v: &[f64], acc: &mut [f64]) {
        let elements1 = &self.bvh.node(pair.cluster1).element_ids;
        let elements2 = &self.bvh.node(pair.cluster2).element_ids;
        for &i in elements1 {
            let mut total = 0.0;
            for &j in elements2 {
                if i == j {
                    continue;
                }
                let a_ij =
                    metric_distance_term(self.exp_s, self.barycenters[i], self.barycenters[j]);
                total += a_ij * self.areas[j] * v[j];
            }
            acc[i] += self.areas[i] * total;
        }
    }
}
