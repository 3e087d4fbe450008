//! The finished tile graph and the parameters used to build it.

use std::collections::HashMap;

#[cfg(feature = "bevy_reflect")]
use bevy_reflect::prelude::*;
use glam::Vec3A;
use thiserror::Error;

use crate::{
    generator::TileMapGenerator,
    math::Aabb3d,
    obstacle::ObstacleAvoidance,
    tile::{Tile, TileCoord, TileId},
    trimesh::{TriMesh, TriMeshError},
};

/// How far below and above the walkable surface the grid reaches, in world units.
/// Keeps surface points lying exactly on a layer boundary inside a tile.
pub(crate) const GRID_VERTICAL_SLACK: f32 = 0.1;

/// Parameters for building a [`WalkingTileMap`].
///
/// The defaults are tuned for human-sized agents in a level measured in meters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "bevy_reflect", derive(Reflect))]
#[cfg_attr(
    all(feature = "serialize", feature = "bevy_reflect"),
    reflect(Serialize, Deserialize)
)]
pub struct TileMapConfig {
    /// The size of a tile along the x- and z-axis. `[Limit: > 0] [Units: wu]`
    ///
    /// Larger tiles result in a coarser graph that is cheaper to build and search,
    /// but may link tiles whose representative points are far apart.
    pub tile_width: f32,

    /// The size of a tile along the y-axis. `[Limit: > 0] [Units: wu]`
    ///
    /// Also used as the height tolerance when checking boundary segments between two tiles,
    /// so it should be at least the height an agent can step up.
    pub tile_height: f32,

    /// Which pairs of tiles are candidates for a neighbour edge.
    pub link_range: LinkRange,

    /// Never link tiles lying on different connected parts of the surface.
    /// See [`TriMesh::compute_areas`].
    pub separate_areas: bool,

    /// Triangles distributed onto tiles per [`TileMapGenerator::update_generate`]. `[Limit: > 0]`
    pub collect_batch_size: usize,

    /// Tiles probed for their representative point per [`TileMapGenerator::update_generate`]. `[Limit: > 0]`
    pub probe_batch_size: usize,

    /// Tiles linked against all remaining tiles per [`TileMapGenerator::update_generate`]. `[Limit: > 0]`
    ///
    /// Each of these iterations is linear in the number of tiles.
    pub link_batch_size: usize,
}

impl Default for TileMapConfig {
    fn default() -> Self {
        Self {
            tile_width: 2.0,
            tile_height: 2.0,
            link_range: LinkRange::default(),
            separate_areas: true,
            collect_batch_size: 10,
            probe_batch_size: 200,
            link_batch_size: 10,
        }
    }
}

impl TileMapConfig {
    /// Checks that the tile dimensions are usable.
    pub fn validate(&self) -> Result<(), TileMapError> {
        let valid = |size: f32| size.is_finite() && size > 0.0;
        if !valid(self.tile_width) || !valid(self.tile_height) {
            return Err(TileMapError::InvalidTileSize {
                width: self.tile_width,
                height: self.tile_height,
            });
        }
        Ok(())
    }
}

/// Which pairs of tiles may be linked, in grid cells on the xz-plane.
///
/// In every mode, tiles more than one layer apart are never linked, and a boundary segment
/// between the two representative points blocks the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "bevy_reflect", derive(Reflect))]
pub enum LinkRange {
    /// Link any two tiles that can see each other.
    #[default]
    Visible,
    /// Link the up to 8 surrounding tiles, including diagonals.
    Surrounding,
    /// Link the up to 4 tiles sharing a side.
    Orthogonal,
}

impl LinkRange {
    /// Whether two tiles `delta` apart are in range.
    #[inline]
    pub fn contains(self, delta: TileCoord) -> bool {
        if delta.y.abs() > 1 {
            return false;
        }
        match self {
            LinkRange::Visible => true,
            LinkRange::Surrounding => delta.x.abs() <= 1 && delta.z.abs() <= 1,
            LinkRange::Orthogonal => delta.x.abs() + delta.z.abs() <= 1,
        }
    }
}

/// Errors when building or loading a [`WalkingTileMap`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TileMapError {
    /// A tile dimension is not a positive finite number.
    #[error("tile size must be positive and finite, got width {width} and height {height}")]
    InvalidTileSize {
        /// The configured tile width
        width: f32,
        /// The configured tile height
        height: f32,
    },
    /// The surface mesh is malformed.
    #[error("invalid surface mesh: {0}")]
    InvalidMesh(#[from] TriMeshError),
    /// A stored tile does not sit at the index its id claims.
    #[error("tile at index {index} has id {id}")]
    TileIdMismatch {
        /// Position of the tile in the stored list
        index: usize,
        /// The id stored with the tile
        id: u32,
    },
    /// A stored tile refers to a neighbour that does not exist.
    #[error("tile {tile} refers to neighbour {neighbour}, but the map only has {tile_count} tiles")]
    NeighbourOutOfBounds {
        /// The tile holding the reference
        tile: u32,
        /// The missing neighbour
        neighbour: u32,
        /// The number of tiles in the map
        tile_count: usize,
    },
}

/// A coarse graph over the walkable surface for path searches.
///
/// The bounding box of the surface is cut into a regular grid. Every grid cell containing
/// walkable surface becomes a [`Tile`], and tiles that can reach each other in a straight line
/// without crossing a boundary segment are linked. Tiles without any neighbour are dropped.
///
/// Build one in a single call with [`WalkingTileMap::generate`], or spread the work over
/// several frames with a [`TileMapGenerator`].
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serialize",
    serde(try_from = "SerializedTileMap", into = "SerializedTileMap")
)]
pub struct WalkingTileMap {
    tiles: Vec<Tile>,
    lookup: HashMap<TileCoord, TileId>,
    aabb: Aabb3d,
    grid: Aabb3d,
    tile_width: f32,
    tile_height: f32,
}

impl WalkingTileMap {
    /// Builds the whole tile map in one go.
    ///
    /// Runs exactly the same steps as [`TileMapGenerator`], just without returning in between.
    pub fn generate(
        config: &TileMapConfig,
        trimesh: &TriMesh,
        obstacle: &ObstacleAvoidance,
    ) -> Result<Self, TileMapError> {
        Ok(TileMapGenerator::begin_generate(config, trimesh, obstacle)?.into_tile_map())
    }

    /// Assembles a map from tiles whose ids already match their index.
    /// `grid` spans all grid cells, starting at the corner of cell `(0, 0, 0)`.
    pub(crate) fn from_tiles(
        tiles: Vec<Tile>,
        aabb: Aabb3d,
        grid: Aabb3d,
        tile_width: f32,
        tile_height: f32,
    ) -> Self {
        let lookup = tiles.iter().map(|tile| (tile.coord, tile.id)).collect();
        Self {
            tiles,
            lookup,
            aabb,
            grid,
            tile_width,
            tile_height,
        }
    }

    /// All tiles, indexed by [`TileId`].
    #[inline]
    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    /// Returns the tile with the given id.
    #[inline]
    pub fn tile(&self, id: TileId) -> Option<&Tile> {
        self.tiles.get(id.index())
    }

    /// Returns the tile at the given grid coordinate.
    #[inline]
    pub fn tile_at(&self, x: i32, y: i32, z: i32) -> Option<&Tile> {
        self.tile_by_coord(TileCoord::new(x, y, z))
    }

    /// Returns the tile at the given grid coordinate.
    pub fn tile_by_coord(&self, coord: TileCoord) -> Option<&Tile> {
        self.lookup.get(&coord).and_then(|&id| self.tile(id))
    }

    /// Returns the tile whose grid cell contains `position`.
    ///
    /// A position exactly on the boundary between two cells belongs to the cell with the
    /// higher coordinate. Positions outside the grid never have a tile.
    pub fn tile_by_position(&self, position: impl Into<Vec3A>) -> Option<&Tile> {
        let position = position.into();
        if !self.grid.contains_point(position) {
            return None;
        }
        self.tile_by_coord(self.coord_of(position))
    }

    /// The grid coordinate of the cell containing `position`. Not bounds checked.
    pub fn coord_of(&self, position: Vec3A) -> TileCoord {
        let size = Vec3A::new(self.tile_width, self.tile_height, self.tile_width);
        let cell = ((position - self.grid.min) / size).floor();
        TileCoord::new(cell.x as i32, cell.y as i32, cell.z as i32)
    }

    /// Iterates over the neighbours of a tile. Empty for unknown ids.
    pub fn neighbours(&self, id: TileId) -> impl Iterator<Item = &Tile> + '_ {
        self.tile(id)
            .into_iter()
            .flat_map(|tile| tile.neighbours.iter())
            .filter_map(|&neighbour| self.tile(neighbour))
    }

    /// The number of tiles.
    #[inline]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Whether the map has no tiles.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// The number of undirected neighbour edges.
    pub fn edge_count(&self) -> usize {
        self.tiles
            .iter()
            .map(|tile| tile.neighbours.len())
            .sum::<usize>()
            / 2
    }

    /// The bounds of the surface the map was built from.
    #[inline]
    pub fn aabb(&self) -> Aabb3d {
        self.aabb
    }

    /// The bounds of all grid cells, including the cells that did not become tiles.
    /// Reaches slightly below and above the surface.
    #[inline]
    pub fn grid_aabb(&self) -> Aabb3d {
        self.grid
    }

    /// The size of a tile along the x- and z-axis.
    #[inline]
    pub fn tile_width(&self) -> f32 {
        self.tile_width
    }

    /// The size of a tile along the y-axis.
    #[inline]
    pub fn tile_height(&self) -> f32 {
        self.tile_height
    }
}

/// The corner of grid cell `(0, 0, 0)` for a surface with bounds `aabb`.
#[inline]
pub(crate) fn grid_origin(aabb: &Aabb3d) -> Vec3A {
    aabb.min - Vec3A::new(0.0, GRID_VERTICAL_SLACK, 0.0)
}

/// The stored form of a [`WalkingTileMap`]. The coordinate lookup is rebuilt on load.
#[cfg(feature = "serialize")]
#[derive(serde::Serialize, serde::Deserialize)]
struct SerializedTileMap {
    tile_width: f32,
    tile_height: f32,
    aabb: Aabb3d,
    grid: Aabb3d,
    tiles: Vec<Tile>,
}

#[cfg(feature = "serialize")]
impl From<WalkingTileMap> for SerializedTileMap {
    fn from(value: WalkingTileMap) -> Self {
        Self {
            tile_width: value.tile_width,
            tile_height: value.tile_height,
            aabb: value.aabb,
            grid: value.grid,
            tiles: value.tiles,
        }
    }
}

#[cfg(feature = "serialize")]
impl TryFrom<SerializedTileMap> for WalkingTileMap {
    type Error = TileMapError;

    fn try_from(value: SerializedTileMap) -> Result<Self, Self::Error> {
        let tile_count = value.tiles.len();
        for (index, tile) in value.tiles.iter().enumerate() {
            if tile.id.index() != index {
                return Err(TileMapError::TileIdMismatch {
                    index,
                    id: tile.id.0,
                });
            }
            if let Some(neighbour) = tile.neighbours.iter().find(|n| n.index() >= tile_count) {
                return Err(TileMapError::NeighbourOutOfBounds {
                    tile: tile.id.0,
                    neighbour: neighbour.0,
                    tile_count,
                });
            }
        }
        Ok(Self::from_tiles(
            value.tiles,
            value.aabb,
            value.grid,
            value.tile_width,
            value.tile_height,
        ))
    }
}
