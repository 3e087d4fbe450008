//! The walkable surface as produced by the navmesh builder, expressed as a [`TriMesh`].

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use glam::{UVec3, Vec3A};
use thiserror::Error;

use crate::math::{Aabb3d, Triangle};

/// A mesh describing the walkable surface.
/// Input for the [`Octree`](crate::Octree) and the [`WalkingTileMap`](crate::WalkingTileMap).
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TriMesh {
    /// The vertices composing the surface.
    /// Follows the convention of a triangle list.
    pub vertices: Vec<Vec3A>,

    /// The indices composing the surface.
    /// Follows the convention of a triangle list.
    pub indices: Vec<UVec3>,
}

impl TriMesh {
    /// Extends the trimesh with the vertices and indices of another trimesh.
    /// The indices of `other` will be offset by the number of vertices in `self`.
    ///
    /// # Panics
    ///
    /// Panics if the combined trimesh would have more than 2^32 vertices.
    pub fn extend(&mut self, other: TriMesh) {
        if self.vertices.len() > u32::MAX as usize {
            panic!("Cannot extend a trimesh with more than 2^32 vertices");
        }
        let next_vertex_index = self.vertices.len() as u32;
        self.vertices.extend(other.vertices);
        self.indices
            .extend(other.indices.iter().map(|i| i + next_vertex_index));
    }

    /// Computes the AABB of the trimesh.
    /// Returns `None` if the trimesh is empty.
    pub fn compute_aabb(&self) -> Option<Aabb3d> {
        Aabb3d::from_verts(&self.vertices)
    }

    /// The number of triangles in the mesh.
    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    /// Checks that every index refers to an existing vertex.
    pub fn validate(&self) -> Result<(), TriMeshError> {
        let vertex_count = self.vertices.len();
        for (triangle, indices) in self.indices.iter().enumerate() {
            for index in indices.to_array() {
                if index as usize >= vertex_count {
                    return Err(TriMeshError::IndexOutOfBounds {
                        triangle,
                        index,
                        vertex_count,
                    });
                }
            }
        }
        Ok(())
    }

    /// Returns the triangle at the given index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds or the triangle refers to a missing vertex.
    /// Use [`TriMesh::validate`] beforehand when the mesh comes from an untrusted source.
    #[inline]
    pub fn triangle(&self, index: usize) -> Triangle {
        let indices = self.indices[index];
        Triangle {
            a: self.vertices[indices.x as usize],
            b: self.vertices[indices.y as usize],
            c: self.vertices[indices.z as usize],
        }
    }

    /// Iterates over all triangles of the mesh.
    ///
    /// # Panics
    ///
    /// Same as [`TriMesh::triangle`].
    pub fn triangles(&self) -> impl ExactSizeIterator<Item = Triangle> + '_ {
        (0..self.indices.len()).map(|i| self.triangle(i))
    }

    /// Partitions the triangles into connected areas.
    ///
    /// Two triangles are connected when they share an edge, i.e. at least two vertex indices.
    /// Areas are numbered from 1 in the order their first triangle appears in [`TriMesh::indices`].
    /// The returned vector corresponds 1:1 to [`TriMesh::indices`].
    pub fn compute_areas(&self) -> Vec<AreaId> {
        let triangle_count = self.indices.len();

        // Index the triangles by their edges
        let mut edges: HashMap<(u32, u32), Vec<usize>> = HashMap::with_capacity(triangle_count * 3);
        for (i, indices) in self.indices.iter().enumerate() {
            for edge in triangle_edges(*indices) {
                let triangles = edges.entry(edge).or_default();
                // Degenerate triangles can list the same edge twice
                if triangles.last() != Some(&i) {
                    triangles.push(i);
                }
            }
        }

        let mut areas = vec![AreaId::NONE; triangle_count];
        let mut next_area = AreaId(1);
        let mut stack = Vec::new();
        for seed in 0..triangle_count {
            if areas[seed] != AreaId::NONE {
                continue;
            }
            areas[seed] = next_area;
            stack.push(seed);
            while let Some(current) = stack.pop() {
                for edge in triangle_edges(self.indices[current]) {
                    let Some(neighbours) = edges.get(&edge) else {
                        continue;
                    };
                    for &neighbour in neighbours {
                        if areas[neighbour] == AreaId::NONE {
                            areas[neighbour] = next_area;
                            stack.push(neighbour);
                        }
                    }
                }
            }
            *next_area += 1;
        }
        areas
    }
}

/// The undirected edges of a triangle, each with its smaller index first.
#[inline]
fn triangle_edges(indices: UVec3) -> [(u32, u32); 3] {
    let edge = |a: u32, b: u32| (a.min(b), a.max(b));
    [
        edge(indices.x, indices.y),
        edge(indices.y, indices.z),
        edge(indices.z, indices.x),
    ]
}

/// A connected part of the walkable surface. See [`TriMesh::compute_areas`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct AreaId(pub u32);

impl Deref for AreaId {
    type Target = u32;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for AreaId {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Default for AreaId {
    fn default() -> Self {
        Self::NONE
    }
}

impl From<u32> for AreaId {
    fn from(value: u32) -> Self {
        AreaId(value)
    }
}

impl AreaId {
    /// Not assigned to any area.
    pub const NONE: Self = Self(0);
}

/// Errors for malformed [`TriMesh`]es.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TriMeshError {
    /// A triangle refers to a vertex that does not exist.
    #[error(
        "triangle {triangle} refers to vertex {index}, but the mesh only has {vertex_count} vertices"
    )]
    IndexOutOfBounds {
        /// The index of the offending triangle
        triangle: usize,
        /// The vertex index that is out of bounds
        index: u32,
        /// The number of vertices in the mesh
        vertex_count: usize,
    },
}
