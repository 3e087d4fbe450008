#![doc = include_str!("../../../readme.md")]

mod generator;
pub(crate) mod math;
mod obstacle;
mod octree;
mod tile;
mod tile_map;
mod trimesh;

pub use generator::{GenerateStep, TileMapGenerator};
pub use math::{Aabb3d, Segment, Triangle};
pub use obstacle::{MAX_COLLIDE_DEPTH, ObstacleAvoidance};
pub use octree::{Octree, OctreeBuilder, OctreeNode, OctreeNodeKey, RayHit};
pub use tile::{Tile, TileCoord, TileId};
pub use tile_map::{LinkRange, TileMapConfig, TileMapError, WalkingTileMap};
pub use trimesh::{AreaId, TriMesh, TriMeshError};
