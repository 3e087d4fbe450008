//! A static octree over the triangles of the walkable surface, used for ray picking.
//!
//! Triangles are never split: a triangle moves down into a child only if it lies completely
//! inside the child's cell. Triangles straddling a cell boundary stay with the parent.

use std::time::Instant;

use glam::Vec3A;
use slotmap::SlotMap;

use crate::{
    math::{Aabb3d, Segment, Triangle},
    trimesh::{TriMesh, TriMeshError},
};

slotmap::new_key_type! {
    /// A key for a node in an [`Octree`].
    pub struct OctreeNodeKey;
}

/// Builds an [`Octree`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct OctreeBuilder {
    /// Nodes holding this many triangles or fewer are not subdivided any further.
    pub min_triangles_per_node: usize,
}

impl Default for OctreeBuilder {
    fn default() -> Self {
        Self {
            min_triangles_per_node: 4,
        }
    }
}

impl OctreeBuilder {
    /// Builds an octree over the given triangle soup.
    ///
    /// An empty soup results in an empty octree that never reports a hit.
    pub fn build(self, triangles: Vec<Triangle>) -> Octree {
        let start = Instant::now();
        let bounds = triangles.iter().map(Triangle::aabb).reduce(|mut aabb, other| {
            aabb.merge(&other);
            aabb
        });
        let mut octree = Octree {
            triangles,
            nodes: SlotMap::with_key(),
            root: None,
        };
        let Some(aabb) = bounds else {
            return octree;
        };

        let root = octree.nodes.insert(OctreeNode {
            aabb,
            cell: aabb,
            parent: None,
            children: [None; 8],
            level: 0,
            triangles: (0..octree.triangles.len() as u32).collect(),
        });
        octree.root = Some(root);

        let mut pending = vec![root];
        while let Some(key) = pending.pop() {
            self.subdivide(&mut octree, key, &mut pending);
        }

        tracing::debug!(
            "Built octree over {} triangles with {} nodes in {:?}",
            octree.triangles.len(),
            octree.nodes.len(),
            start.elapsed()
        );
        octree
    }

    /// Builds an octree over the triangles of a [`TriMesh`].
    ///
    /// # Errors
    ///
    /// Returns an error if the mesh refers to vertices that do not exist.
    pub fn build_from_trimesh(self, trimesh: &TriMesh) -> Result<Octree, TriMeshError> {
        trimesh.validate()?;
        Ok(self.build(trimesh.triangles().collect()))
    }

    /// Distributes the triangles of a node onto up to 8 new children.
    /// Newly created children are queued in `pending`.
    fn subdivide(&self, octree: &mut Octree, key: OctreeNodeKey, pending: &mut Vec<OctreeNodeKey>) {
        let node = &octree.nodes[key];
        if node.aabb.is_empty() || node.triangles.len() <= self.min_triangles_per_node {
            return;
        }
        let middle = node.aabb.center();
        let corners = node.aabb.corners();
        let level = node.level + 1;

        let mut remaining = std::mem::take(&mut octree.nodes[key].triangles);
        for (child_index, corner) in corners.into_iter().enumerate() {
            let cell = Aabb3d {
                min: middle.min(corner),
                max: middle.max(corner),
            };

            let mut claimed = Vec::new();
            let mut aabb: Option<Aabb3d> = None;
            remaining.retain(|&index| {
                let triangle = &octree.triangles[index as usize];
                if !cell.contains_triangle(triangle) {
                    return true;
                }
                claimed.push(index);
                let triangle_aabb = triangle.aabb();
                aabb = Some(match aabb {
                    Some(mut aabb) => {
                        aabb.merge(&triangle_aabb);
                        aabb
                    }
                    None => triangle_aabb,
                });
                false
            });

            let Some(aabb) = aabb else {
                // Nothing fits into this cell, don't create the child at all
                continue;
            };
            let child = octree.nodes.insert(OctreeNode {
                aabb,
                cell,
                parent: Some(key),
                children: [None; 8],
                level,
                triangles: claimed,
            });
            octree.nodes[key].children[child_index] = Some(child);
            pending.push(child);
        }
        octree.nodes[key].triangles = remaining;
    }
}

/// A node of an [`Octree`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct OctreeNode {
    /// The tight bounding box of all triangles in this node and its descendants
    pub aabb: Aabb3d,
    /// The cell this node was created for. Every triangle of the node lies completely inside it.
    pub cell: Aabb3d,
    /// The parent node, `None` for the root
    pub parent: Option<OctreeNodeKey>,
    /// The child nodes. Children that would not have contained any triangle are `None`.
    pub children: [Option<OctreeNodeKey>; 8],
    /// Depth of the node, 0 for the root
    pub level: u32,
    /// Indices into [`Octree::triangles`] of the triangles that no child could claim
    pub triangles: Vec<u32>,
}

impl OctreeNode {
    /// Whether the node has no children.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.iter().all(Option::is_none)
    }

    /// Iterates over the keys of all existing children.
    pub fn child_keys(&self) -> impl Iterator<Item = OctreeNodeKey> + '_ {
        self.children.iter().flatten().copied()
    }
}

/// The closest intersection found by [`Octree::raycast`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// The intersection point
    pub point: Vec3A,
    /// The triangle that was hit
    pub triangle: Triangle,
    /// The index of the triangle in [`Octree::triangles`]
    pub triangle_index: usize,
    /// The squared distance from the ray's start to [`RayHit::point`]
    pub distance_squared: f32,
}

/// A static spatial index over a triangle soup. Build with [`OctreeBuilder`].
///
/// Every triangle of the soup is referenced by exactly one node.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Octree {
    triangles: Vec<Triangle>,
    nodes: SlotMap<OctreeNodeKey, OctreeNode>,
    root: Option<OctreeNodeKey>,
}

impl Octree {
    /// The key of the root node, `None` for an empty octree.
    #[inline]
    pub fn root(&self) -> Option<OctreeNodeKey> {
        self.root
    }

    /// Returns the node with the given key.
    #[inline]
    pub fn node(&self, key: OctreeNodeKey) -> Option<&OctreeNode> {
        self.nodes.get(key)
    }

    /// Iterates over all nodes in no particular order.
    pub fn nodes(&self) -> impl Iterator<Item = (OctreeNodeKey, &OctreeNode)> {
        self.nodes.iter()
    }

    /// The number of nodes.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All triangles the octree was built from, in input order.
    #[inline]
    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    /// The number of triangles the octree was built from.
    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Whether the octree contains no triangles.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// The bounding box of all triangles.
    pub fn aabb(&self) -> Option<Aabb3d> {
        self.root.map(|root| self.nodes[root].aabb)
    }

    /// Collects the indices of all triangles stored in nodes whose cell is crossed by `ray`.
    pub fn triangles_along_ray(&self, ray: &Segment, out: &mut Vec<usize>) {
        let Some(root) = self.root else {
            return;
        };
        let middle = ray.middle();
        let direction = ray.direction();
        let half_length = ray.length() * 0.5;
        if !self.nodes[root]
            .cell
            .intersects_line(middle, direction, half_length)
        {
            return;
        }

        let mut stack = vec![root];
        while let Some(key) = stack.pop() {
            let node = &self.nodes[key];
            out.extend(node.triangles.iter().map(|&index| index as usize));
            stack.extend(node.child_keys().filter(|&child| {
                self.nodes[child]
                    .cell
                    .intersects_line(middle, direction, half_length)
            }));
        }
    }

    /// Finds the closest triangle intersected by `ray`.
    ///
    /// Only hits closer to the ray's start than `sqrt(max_distance_squared)` are reported,
    /// pass [`f32::INFINITY`] to search the whole length of the ray.
    /// The returned [`RayHit::distance_squared`] can be used as the bound of a follow-up query.
    pub fn raycast(&self, ray: &Segment, max_distance_squared: f32) -> Option<RayHit> {
        let mut candidates = Vec::new();
        self.triangles_along_ray(ray, &mut candidates);

        let ray_aabb = ray.aabb();
        let mut best_distance_squared = max_distance_squared;
        let mut best = None;
        for index in candidates {
            let triangle = &self.triangles[index];
            // Cheap reject before the exact test
            if !ray_aabb.intersects_aabb(&triangle.aabb()) {
                continue;
            }
            let Some(point) = triangle.intersect_segment(ray.start, ray.end) else {
                continue;
            };
            let distance_squared = point.distance_squared(ray.start);
            if distance_squared < best_distance_squared {
                best_distance_squared = distance_squared;
                best = Some(RayHit {
                    point,
                    triangle: *triangle,
                    triangle_index: index,
                    distance_squared,
                });
            }
        }
        best
    }

    /// Collects the indices of all triangles with at least one vertex inside `aabb`.
    pub fn triangles_in_aabb(&self, aabb: &Aabb3d) -> Vec<usize> {
        let mut result = Vec::new();
        let Some(root) = self.root else {
            return result;
        };
        let mut stack = vec![root];
        while let Some(key) = stack.pop() {
            let node = &self.nodes[key];
            result.extend(
                node.triangles
                    .iter()
                    .map(|&index| index as usize)
                    .filter(|&index| {
                        let triangle = &self.triangles[index];
                        triangle
                            .vertices()
                            .into_iter()
                            .any(|vertex| aabb.contains_point(vertex))
                    }),
            );
            stack.extend(
                node.child_keys()
                    .filter(|&child| self.nodes[child].aabb.intersects_aabb(aabb)),
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A flat `n` x `n` grid of unit quads at height `y`, two triangles per quad.
    fn grid(n: usize, y: f32) -> Vec<Triangle> {
        let mut triangles = Vec::with_capacity(n * n * 2);
        for z in 0..n {
            for x in 0..n {
                let x0 = x as f32;
                let z0 = z as f32;
                triangles.push(Triangle::new(
                    [x0, y, z0],
                    [x0, y, z0 + 1.0],
                    [x0 + 1.0, y, z0 + 1.0],
                ));
                triangles.push(Triangle::new(
                    [x0, y, z0],
                    [x0 + 1.0, y, z0 + 1.0],
                    [x0 + 1.0, y, z0],
                ));
            }
        }
        triangles
    }

    #[test]
    fn empty_soup_builds_empty_octree() {
        let octree = OctreeBuilder::default().build(Vec::new());
        assert!(octree.is_empty());
        assert_eq!(octree.root(), None);
        let ray = Segment::new([0.0, 1.0, 0.0], [0.0, -1.0, 0.0]);
        assert_eq!(octree.raycast(&ray, f32::INFINITY), None);
    }

    #[test]
    fn every_triangle_lives_in_exactly_one_node() {
        let triangles = grid(16, 0.0);
        let count = triangles.len();
        let octree = OctreeBuilder::default().build(triangles);

        let mut seen = vec![0; count];
        for (_, node) in octree.nodes() {
            for &index in &node.triangles {
                seen[index as usize] += 1;
            }
        }
        assert!(seen.iter().all(|&n| n == 1));
        assert!(octree.node_count() > 1);
    }

    #[test]
    fn nodes_respect_their_cells() {
        let octree = OctreeBuilder::default().build(grid(8, 2.0));
        for (key, node) in octree.nodes() {
            for &index in &node.triangles {
                assert!(node.cell.contains_triangle(&octree.triangles()[index as usize]));
            }
            for child in node.child_keys() {
                let child = octree.node(child).unwrap();
                assert_eq!(child.parent, Some(key));
                assert_eq!(child.level, node.level + 1);
                assert!(!child.triangles.is_empty() || !child.is_leaf());
            }
        }
    }

    #[test]
    fn small_soup_is_not_subdivided() {
        let octree = OctreeBuilder::default().build(grid(1, 0.0));
        assert_eq!(octree.node_count(), 1);
        let root = octree.node(octree.root().unwrap()).unwrap();
        assert!(root.is_leaf());
        assert_eq!(root.triangles.len(), 2);
    }

    #[test]
    fn raycast_finds_closest_of_stacked_floors() {
        let mut triangles = grid(4, 0.0);
        triangles.extend(grid(4, 3.0));
        let octree = OctreeBuilder::default().build(triangles);

        let ray = Segment::new([1.5, 10.0, 2.25], [1.5, -10.0, 2.25]);
        let hit = octree.raycast(&ray, f32::INFINITY).unwrap();
        assert!((hit.point.y - 3.0).abs() < 1e-5);
        assert!((hit.distance_squared - 49.0).abs() < 1e-3);
        assert!(hit.triangle_index >= 32);

        // Capping the search radius excludes the floor
        assert_eq!(octree.raycast(&ray, 40.0), None);
    }

    #[test]
    fn raycast_outside_the_root_misses() {
        let octree = OctreeBuilder::default().build(grid(4, 0.0));
        let ray = Segment::new([10.0, 1.0, 10.0], [10.0, -1.0, 10.0]);
        assert_eq!(octree.raycast(&ray, f32::INFINITY), None);
    }

    #[test]
    fn ray_ending_above_the_floor_misses() {
        let octree = OctreeBuilder::default().build(grid(4, 0.0));
        let ray = Segment::new([1.5, 10.0, 1.5], [1.5, 0.5, 1.5]);
        assert_eq!(octree.raycast(&ray, f32::INFINITY), None);
    }

    #[test]
    fn box_query_returns_nearby_triangles() {
        let triangles = grid(8, 0.0);
        let octree = OctreeBuilder::default().build(triangles.clone());
        let aabb = Aabb3d {
            min: Vec3A::new(2.5, -1.0, 2.5),
            max: Vec3A::new(3.5, 1.0, 3.5),
        };
        let mut found = octree.triangles_in_aabb(&aabb);
        found.sort_unstable();

        let mut expected: Vec<usize> = triangles
            .iter()
            .enumerate()
            .filter(|(_, t)| t.vertices().into_iter().any(|v| aabb.contains_point(v)))
            .map(|(i, _)| i)
            .collect();
        expected.sort_unstable();
        assert_eq!(found, expected);
        assert!(!found.is_empty());
    }

    #[test]
    fn invalid_trimesh_is_rejected() {
        let trimesh = TriMesh {
            vertices: vec![Vec3A::ZERO],
            indices: vec![glam::UVec3::new(0, 1, 2)],
        };
        assert!(OctreeBuilder::default().build_from_trimesh(&trimesh).is_err());
    }
}
