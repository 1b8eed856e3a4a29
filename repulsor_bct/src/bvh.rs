/////////////////////////////////////////////////////////////////////////////////////////////
//
// Builds the 6-D bounding volume hierarchy over face bodies (barycenter and normal axes).
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use std::cmp::Ordering;

use glam::DVec3;

use repulsor_utils::constants::DEFAULT_SEPARATION;
use repulsor_utils::{vector_max, vector_min, FaceBody, SurfaceMesh};

/// Discriminates the three node shapes of the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BvhNodeType {
    Empty,
    Leaf,
    Interior,
}

/// One node of the 6-D hierarchy. Nodes live contiguously in the arena of a
/// [`FaceBvh`], ordered by pre-order `node_id`, so the branch rooted at a
/// node occupies the id range `[id, id + num_nodes_in_branch)`.
#[derive(Debug, Clone)]
pub struct BvhNode {
    pub node_type: BvhNodeType,

    /// Sum of the face areas in this branch.
    pub total_mass: f64,

    /// Mass-weighted mean barycenter of the branch.
    pub center_of_mass: DVec3,

    /// Mass-weighted mean normal of the branch, re-normalized to unit
    /// length.
    pub average_normal: DVec3,

    /// Positional bounds of the contained barycenters (positions only, not
    /// normals).
    pub min_coords: DVec3,
    pub max_coords: DVec3,

    /// The single face id of a leaf.
    pub element_id: Option<usize>,

    /// All face ids contained in this branch, for leaf enumeration by the
    /// block cluster tree.
    pub element_ids: Vec<usize>,

    /// Number of nodes in this branch, itself included.
    pub num_nodes_in_branch: usize,

    /// Axis this node was split on: 0..2 barycenter, 3..5 normal.
    pub split_axis: usize,

    /// Coordinate of the splitting plane on `split_axis`.
    pub split_value: f64,

    /// Barnes-Hut separation parameter used by admissibility queries.
    pub threshold_theta: f64,

    /// Arena ids of the two children of an interior node.
    pub children: [Option<usize>; 2],
}

impl BvhNode {
    fn empty(axis: usize, theta: f64) -> Self {
        BvhNode {
            node_type: BvhNodeType::Empty,
            total_mass: 0.0,
            center_of_mass: DVec3::ZERO,
            average_normal: DVec3::ZERO,
            min_coords: DVec3::ZERO,
            max_coords: DVec3::ZERO,
            element_id: None,
            element_ids: Vec::new(),
            num_nodes_in_branch: 1,
            split_axis: axis,
            split_value: 0.0,
            threshold_theta: theta,
            children: [None, None],
        }
    }

    /// Number of faces contained in this branch.
    pub fn n_elements(&self) -> usize {
        self.element_ids.len()
    }

    /// Diagonal extent of the positional bounds over the distance `d`.
    #[inline(always)]
    pub fn node_ratio(&self, d: f64) -> f64 {
        (self.max_coords - self.min_coords).length() / d
    }

    /// Whether the positional bounding box contains `p`.
    #[inline(always)]
    pub fn box_contains(&self, p: DVec3) -> bool {
        p.x >= self.min_coords.x
            && p.y >= self.min_coords.y
            && p.z >= self.min_coords.z
            && p.x <= self.max_coords.x
            && p.y <= self.max_coords.y
            && p.z <= self.max_coords.z
    }

    /// Barnes-Hut admissibility from a query point: the branch is far
    /// enough away that it can be treated as a single body. Leaves are
    /// admissible from anywhere except their own center.
    pub fn is_admissible_from(&self, p: DVec3) -> bool {
        match self.node_type {
            BvhNodeType::Empty => true,
            BvhNodeType::Leaf => self.center_of_mass != p,
            BvhNodeType::Interior => {
                let d = (self.center_of_mass - p).length();
                d > 0.0 && self.node_ratio(d) < self.threshold_theta
            }
        }
    }
}

/// A 6-D bounding volume hierarchy over the faces of a mesh, keyed by
/// barycenter and normal. Built once per iteration; owned exclusively by
/// that iteration and invalidated by connectivity changes.
#[derive(Debug, Clone)]
pub struct FaceBvh {
    nodes: Vec<BvhNode>,
    n_faces: usize,
    theta: f64,
}

#[inline(always)]
fn body_coord(body: &FaceBody, axis: usize) -> f64 {
    match axis {
        0 => body.barycenter.x,
        1 => body.barycenter.y,
        2 => body.barycenter.z,
        3 => body.normal.x,
        4 => body.normal.y,
        5 => body.normal.z,
        _ => unreachable!("split axis out of range"),
    }
}

impl FaceBvh {
    /// Builds the hierarchy over all faces of a mesh.
    pub fn from_mesh(mesh: &SurfaceMesh, theta: f64) -> Self {
        Self::build(mesh.face_bodies(), theta)
    }

    /// Builds the hierarchy from an explicit body list.
    pub fn build(bodies: Vec<FaceBody>, theta: f64) -> Self {
        let n_faces = bodies.len();
        let mut nodes = Vec::with_capacity(2 * n_faces.max(1));
        build_node(&mut nodes, bodies, 0, theta);
        FaceBvh {
            nodes,
            n_faces,
            theta,
        }
    }

    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }

    pub fn node(&self, id: usize) -> &BvhNode {
        &self.nodes[id]
    }

    pub fn root(&self) -> &BvhNode {
        &self.nodes[0]
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_faces(&self) -> usize {
        self.n_faces
    }

    pub fn theta(&self) -> f64 {
        self.theta
    }

    /// Pairwise admissibility of two branches for the block cluster tree:
    /// distinct, neither box containing the other's center of mass, and
    /// both Barnes-Hut ratios below `theta`.
    pub fn is_pair_admissible(&self, i: usize, j: usize, theta: f64) -> bool {
        if i == j {
            return false;
        }
        let a = &self.nodes[i];
        let b = &self.nodes[j];
        if a.box_contains(b.center_of_mass) || b.box_contains(a.center_of_mass) {
            return false;
        }
        let distance = (a.center_of_mass - b.center_of_mass).length();
        if distance == 0.0 {
            return false;
        }
        a.node_ratio(distance).max(b.node_ratio(distance)) < theta
    }

    /// Recomputes masses, centers, normals, and bounds bottom-up from fresh
    /// face bodies (indexed by face id) without re-partitioning. The fast
    /// path after small position changes.
    pub fn refit(&mut self, bodies: &[FaceBody]) {
        debug_assert_eq!(bodies.len(), self.n_faces);

        // Children carry larger pre-order ids than their parents, so one
        // reverse sweep visits each branch bottom-up.
        for id in (0..self.nodes.len()).rev() {
            match self.nodes[id].node_type {
                BvhNodeType::Empty => {}
                BvhNodeType::Leaf => {
                    let elem = self.nodes[id].element_id.unwrap_or(0);
                    let body = &bodies[elem];
                    let node = &mut self.nodes[id];
                    node.total_mass = body.mass;
                    node.center_of_mass = body.barycenter;
                    node.average_normal = body.normal;
                    node.min_coords = body.barycenter;
                    node.max_coords = body.barycenter;
                }
                BvhNodeType::Interior => {
                    let mut total_mass = 0.0;
                    let mut center = DVec3::ZERO;
                    let mut normal = DVec3::ZERO;
                    let mut min_coords = DVec3::INFINITY;
                    let mut max_coords = DVec3::NEG_INFINITY;
                    for child in self.nodes[id].children.into_iter().flatten() {
                        let c = &self.nodes[child];
                        if c.node_type == BvhNodeType::Empty {
                            continue;
                        }
                        total_mass += c.total_mass;
                        center += c.total_mass * c.center_of_mass;
                        normal += c.total_mass * c.average_normal;
                        min_coords = vector_min(min_coords, c.min_coords);
                        max_coords = vector_max(max_coords, c.max_coords);
                    }
                    let node = &mut self.nodes[id];
                    node.total_mass = total_mass;
                    node.center_of_mass = if total_mass > 0.0 {
                        center / total_mass
                    } else {
                        DVec3::ZERO
                    };
                    node.average_normal = normal.normalize_or_zero();
                    node.min_coords = min_coords;
                    node.max_coords = max_coords;
                }
            }
        }
    }
}

// Chooses the splitting plane on `axis` that minimizes the sum of squared
// half-widths of the two sides.
fn axis_splitting_plane(coords: &mut [f64]) -> f64 {
    coords.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = coords.len();

    let mut split_index = 0;
    let mut min_widths = f64::INFINITY;
    for i in 0..n {
        let width1 = coords[i] - coords[0];
        let width2 = if i == n - 1 {
            0.0
        } else {
            coords[n - 1] - coords[i + 1]
        };
        let sum_squares = width1 * width1 + width2 * width2;
        if sum_squares < min_widths {
            min_widths = sum_squares;
            split_index = i;
        }
    }
    (coords[split_index] + coords[split_index + 1]) / 2.0
}

// Appends the branch for `bodies` to the arena in pre-order and returns its
// root id.
fn build_node(nodes: &mut Vec<BvhNode>, mut bodies: Vec<FaceBody>, axis: usize, theta: f64) -> usize {
    let id = nodes.len();
    nodes.push(BvhNode::empty(axis, theta));

    match bodies.len() {
        0 => {}
        1 => {
            let body = bodies[0];
            let node = &mut nodes[id];
            node.node_type = BvhNodeType::Leaf;
            node.total_mass = body.mass;
            node.center_of_mass = body.barycenter;
            node.average_normal = body.normal;
            node.min_coords = body.barycenter;
            node.max_coords = body.barycenter;
            node.element_id = Some(body.element_id);
            node.element_ids = vec![body.element_id];
        }
        n => {
            let mut coords: Vec<f64> = bodies.iter().map(|b| body_coord(b, axis)).collect();
            let split_value = axis_splitting_plane(&mut coords);

            let mut lesser = Vec::with_capacity(n / 2 + 1);
            let mut greater = Vec::with_capacity(n / 2 + 1);
            for body in bodies.drain(..) {
                if body_coord(&body, axis) <= split_value {
                    lesser.push(body);
                } else {
                    greater.push(body);
                }
            }

            // All projected coordinates equal: fall back to an index-median
            // split so construction terminates.
            if lesser.is_empty() || greater.is_empty() {
                let mut all = if lesser.is_empty() { greater } else { lesser };
                let mid = all.len() / 2;
                greater = all.split_off(mid);
                lesser = all;
            }

            let element_ids: Vec<usize> = lesser
                .iter()
                .chain(greater.iter())
                .map(|b| b.element_id)
                .collect();

            let next_axis = (axis + 1) % 6;
            let left = build_node(nodes, lesser, next_axis, theta);
            let right = build_node(nodes, greater, next_axis, theta);

            let mut total_mass = 0.0;
            let mut center = DVec3::ZERO;
            let mut normal = DVec3::ZERO;
            let mut min_coords = DVec3::INFINITY;
            let mut max_coords = DVec3::NEG_INFINITY;
            let mut branch_nodes = 1;
            for &child in &[left, right] {
                let c = &nodes[child];
                branch_nodes += c.num_nodes_in_branch;
                if c.node_type == BvhNodeType::Empty {
                    continue;
                }
                total_mass += c.total_mass;
                center += c.total_mass * c.center_of_mass;
                normal += c.total_mass * c.average_normal;
                min_coords = vector_min(min_coords, c.min_coords);
                max_coords = vector_max(max_coords, c.max_coords);
            }

            let node = &mut nodes[id];
            node.node_type = BvhNodeType::Interior;
            node.total_mass = total_mass;
            node.center_of_mass = if total_mass > 0.0 {
                center / total_mass
            } else {
                (min_coords + max_coords) / 2.0
            };
            node.average_normal = normal.normalize_or_zero();
            node.min_coords = min_coords;
            node.max_coords = max_coords;
            node.element_ids = element_ids;
            node.num_nodes_in_branch = branch_nodes;
            node.split_value = split_value;
            node.children = [Some(left), Some(right)];
        }
    }

    id
}

/// Convenience constructor with the default separation parameter.
impl From<&SurfaceMesh> for FaceBvh {
    fn from(mesh: &SurfaceMesh) -> Self {
        FaceBvh::from_mesh(mesh, DEFAULT_SEPARATION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repulsor_utils::MeshShapes;

    fn brute_mass_and_center(bvh: &FaceBvh, bodies: &[FaceBody], id: usize) -> (f64, DVec3) {
        let node = bvh.node(id);
        let mut mass = 0.0;
        let mut center = DVec3::ZERO;
        for &elem in &node.element_ids {
            mass += bodies[elem].mass;
            center += bodies[elem].mass * bodies[elem].barycenter;
        }
        (mass, if mass > 0.0 { center / mass } else { DVec3::ZERO })
    }

    #[test]
    fn mass_and_centroid_invariants() {
        let mesh = MeshShapes::icosphere(1);
        let bodies = mesh.face_bodies();
        let bvh = FaceBvh::from_mesh(&mesh, 0.25);

        for id in 0..bvh.n_nodes() {
            let node = bvh.node(id);
            if node.node_type == BvhNodeType::Empty {
                continue;
            }
            let (mass, center) = brute_mass_and_center(&bvh, &bodies, id);
            assert!((node.total_mass - mass).abs() < 1e-10);
            assert!((node.center_of_mass - center).length() < 1e-10);
            assert!((node.average_normal.length() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn bounds_contain_descendant_barycenters() {
        let mesh = MeshShapes::icosphere(1);
        let bodies = mesh.face_bodies();
        let bvh = FaceBvh::from_mesh(&mesh, 0.25);

        for node in bvh.nodes() {
            if node.node_type == BvhNodeType::Empty {
                continue;
            }
            for &elem in &node.element_ids {
                assert!(node.box_contains(bodies[elem].barycenter));
            }
        }
    }

    #[test]
    fn preorder_ids_are_contiguous_per_branch() {
        let mesh = MeshShapes::icosphere(1);
        let bvh = FaceBvh::from_mesh(&mesh, 0.25);

        for (id, node) in bvh.nodes().iter().enumerate() {
            if node.node_type != BvhNodeType::Interior {
                assert_eq!(node.num_nodes_in_branch, 1);
                continue;
            }
            let [Some(left), Some(right)] = node.children else {
                panic!("interior node without two children");
            };
            assert_eq!(left, id + 1);
            assert_eq!(right, left + bvh.node(left).num_nodes_in_branch);
            assert_eq!(
                node.num_nodes_in_branch,
                1 + bvh.node(left).num_nodes_in_branch + bvh.node(right).num_nodes_in_branch
            );
        }
    }

    #[test]
    fn every_face_appears_in_exactly_one_leaf() {
        let mesh = MeshShapes::icosphere(1);
        let bvh = FaceBvh::from_mesh(&mesh, 0.25);

        let mut seen = vec![0usize; mesh.n_faces()];
        for node in bvh.nodes() {
            if node.node_type == BvhNodeType::Leaf {
                seen[node.element_id.unwrap()] += 1;
            }
        }
        assert!(seen.iter().all(|&count| count == 1));
        assert_eq!(bvh.root().n_elements(), mesh.n_faces());
    }

    #[test]
    fn admissibility_behaves_with_distance() {
        let mesh = MeshShapes::icosphere(1);
        let bvh = FaceBvh::from_mesh(&mesh, 0.25);
        let root = bvh.root();

        // The root can never be admissible from inside its own box.
        assert!(!root.is_admissible_from(root.center_of_mass));
        // Far away, every branch is admissible.
        let far = root.center_of_mass + DVec3::new(1e4, 0.0, 0.0);
        assert!(root.is_admissible_from(far));

        // A pair is never admissible with itself, and the two halves of a
        // sphere are not separated enough at theta = 0.25.
        assert!(!bvh.is_pair_admissible(0, 0, 0.25));
        let [Some(left), Some(right)] = root.children else {
            panic!("root should be interior");
        };
        assert!(!bvh.is_pair_admissible(left, right, 0.25));
    }

    #[test]
    fn degenerate_coordinates_still_build() {
        // A flat grid has identical normals, so the three normal axes are
        // fully degenerate splits.
        let mesh = MeshShapes::triangulated_grid(4);
        let bvh = FaceBvh::from_mesh(&mesh, 0.25);
        assert_eq!(bvh.root().n_elements(), mesh.n_faces());

        // Identical bodies degenerate on every axis.
        let body = FaceBody {
            mass: 1.0,
            barycenter: DVec3::ONE,
            normal: DVec3::Z,
            element_id: 0,
        };
        let clones: Vec<FaceBody> = (0..8)
            .map(|i| FaceBody {
                element_id: i,
                ..body
            })
            .collect();
        let bvh = FaceBvh::build(clones, 0.25);
        assert_eq!(bvh.root().n_elements(), 8);
    }

    #[test]
    fn refit_matches_rebuild_after_motion() {
        let mesh = MeshShapes::icosphere(1);
        let mut bvh = FaceBvh::from_mesh(&mesh, 0.25);

        let moved = MeshShapes::scaled(&mesh, 1.1);
        bvh.refit(&moved.face_bodies());
        let rebuilt = FaceBvh::from_mesh(&moved, 0.25);

        // Same topology, so aggregates must agree node by node.
        assert_eq!(bvh.n_nodes(), rebuilt.n_nodes());
        let root = bvh.root();
        let expected = rebuilt.root();
        assert!((root.total_mass - expected.total_mass).abs() < 1e-10);
        assert!((root.center_of_mass - expected.center_of_mass).length() < 1e-10);
        assert!((root.min_coords - expected.min_coords).length() < 1e-10);
        assert!((root.max_coords - expected.max_coords).length() < 1e-10);
    }
}
