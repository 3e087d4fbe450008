//! Nodes of the [`WalkingTileMap`](crate::WalkingTileMap).

use std::ops::{Add, Sub};

#[cfg(feature = "bevy_reflect")]
use bevy_reflect::prelude::*;
use glam::{IVec3, Vec3A};

use crate::{math::Aabb3d, trimesh::AreaId};

/// Dense index of a [`Tile`] inside its [`WalkingTileMap`](crate::WalkingTileMap).
/// Only valid for the map that produced it, and only until the map is rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "bevy_reflect", derive(Reflect))]
#[repr(transparent)]
pub struct TileId(pub u32);

impl TileId {
    /// The id as an index into [`WalkingTileMap::tiles`](crate::WalkingTileMap::tiles).
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<TileId> for usize {
    fn from(value: TileId) -> Self {
        value.index()
    }
}

/// Integer coordinate of a grid cell.
///
/// `y` is the vertical layer, `x` and `z` span the ground plane.
/// Ordered by `(z, y, x)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "bevy_reflect", derive(Reflect))]
pub struct TileCoord {
    /// Column along the x-axis
    pub x: i32,
    /// Vertical layer
    pub y: i32,
    /// Row along the z-axis
    pub z: i32,
}

impl TileCoord {
    /// Creates a new coordinate.
    #[inline]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl Ord for TileCoord {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.z, self.y, self.x).cmp(&(other.z, other.y, other.x))
    }
}

impl PartialOrd for TileCoord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl From<IVec3> for TileCoord {
    fn from(value: IVec3) -> Self {
        Self::new(value.x, value.y, value.z)
    }
}

impl From<TileCoord> for IVec3 {
    fn from(value: TileCoord) -> Self {
        IVec3::new(value.x, value.y, value.z)
    }
}

impl Add for TileCoord {
    type Output = TileCoord;
    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for TileCoord {
    type Output = TileCoord;
    fn sub(self, rhs: Self) -> Self::Output {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// A walkable grid cell of a [`WalkingTileMap`](crate::WalkingTileMap).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Tile {
    /// Dense id, equal to the tile's index in the map
    pub id: TileId,
    /// Grid coordinate
    pub coord: TileCoord,
    /// World space bounds of the grid cell
    pub aabb: Aabb3d,
    /// The point on the walkable surface standing in for the whole tile.
    /// Found by probing straight down through the center of the cell.
    pub position: Vec3A,
    /// The connected part of the surface this tile lies on
    pub area: AreaId,
    /// Tiles reachable in a straight line from this one, sorted ascending.
    /// Adjacency is symmetric.
    pub neighbours: Vec<TileId>,
}

impl Tile {
    /// Whether `other` is a neighbour of this tile.
    #[inline]
    pub fn is_neighbour(&self, other: TileId) -> bool {
        self.neighbours.binary_search(&other).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coords_order_by_z_then_y_then_x() {
        let mut coords = vec![
            TileCoord::new(1, 0, 0),
            TileCoord::new(0, 0, 1),
            TileCoord::new(0, 1, 0),
            TileCoord::new(0, 0, 0),
        ];
        coords.sort();
        assert_eq!(
            coords,
            vec![
                TileCoord::new(0, 0, 0),
                TileCoord::new(1, 0, 0),
                TileCoord::new(0, 1, 0),
                TileCoord::new(0, 0, 1),
            ]
        );
    }

    #[test]
    fn coord_arithmetic() {
        let delta = TileCoord::new(3, 1, 2) - TileCoord::new(1, 1, 5);
        assert_eq!(delta, TileCoord::new(2, 0, -3));
        assert_eq!(IVec3::from(delta + TileCoord::new(0, 1, 0)), IVec3::new(2, 1, -3));
    }
}
