//! Resumable construction of a [`WalkingTileMap`].
//!
//! The build runs through the phases of [`GenerateStep`] in order. Each call to
//! [`TileMapGenerator::update_generate`] performs a bounded slice of the current phase,
//! so a large level can be processed over many frames without stalling any of them.

use std::time::Instant;

use glam::{UVec3, Vec3A};

use crate::{
    math::{Aabb3d, Segment},
    obstacle::ObstacleAvoidance,
    tile::{Tile, TileCoord, TileId},
    tile_map::{GRID_VERTICAL_SLACK, TileMapConfig, TileMapError, WalkingTileMap, grid_origin},
    trimesh::{AreaId, TriMesh},
};

/// The phase a [`TileMapGenerator`] is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenerateStep {
    /// Distributing the surface triangles onto the grid cells they overlap.
    CollectTile,
    /// Dropping cells without surface and finding the representative point of the others.
    RemoveEmptyTile,
    /// Linking tiles that can see each other.
    LinkNeighbours,
    /// Done. The tile map is available.
    Finish,
}

/// Progress reached at the start of each phase.
const COLLECT_PROGRESS: f32 = 0.0;
const REMOVE_EMPTY_PROGRESS: f32 = 0.25;
const LINK_PROGRESS: f32 = 0.5;

/// A grid cell while the map is being built.
#[derive(Debug, Clone)]
struct BuildTile {
    coord: TileCoord,
    aabb: Aabb3d,
    /// Indices of the surface triangles overlapping the cell. Dropped after probing.
    triangles: Vec<u32>,
    area: AreaId,
    position: Option<Vec3A>,
    /// Indices into the builder's tile list
    neighbours: Vec<usize>,
}

/// Builds a [`WalkingTileMap`] step by step.
///
/// ```
/// # use walkmap::*;
/// # let trimesh = TriMesh::default();
/// # let obstacle = ObstacleAvoidance::new();
/// let mut generator = TileMapGenerator::begin_generate(&TileMapConfig::default(), &trimesh, &obstacle)?;
/// // Typically called once per frame
/// while !generator.update_generate() {
///     println!("{:.0}%", generator.generate_percent() * 100.0);
/// }
/// let map = generator.into_tile_map();
/// assert!(map.is_empty());
/// # Ok::<(), TileMapError>(())
/// ```
#[derive(Debug)]
pub struct TileMapGenerator<'a> {
    trimesh: &'a TriMesh,
    obstacle: &'a ObstacleAvoidance,
    config: TileMapConfig,
    areas: Vec<AreaId>,
    aabb: Aabb3d,
    origin: Vec3A,
    dims: UVec3,
    tiles: Vec<BuildTile>,
    step: GenerateStep,
    /// Resume position inside the current phase
    cursor: usize,
    started: Instant,
    map: Option<WalkingTileMap>,
}

impl<'a> TileMapGenerator<'a> {
    /// Starts a new build: validates the input and lays out the grid.
    ///
    /// No triangle is processed yet, call [`TileMapGenerator::update_generate`] to make progress.
    /// An empty mesh or a mesh without extent finishes right away with an empty map.
    pub fn begin_generate(
        config: &TileMapConfig,
        trimesh: &'a TriMesh,
        obstacle: &'a ObstacleAvoidance,
    ) -> Result<Self, TileMapError> {
        config.validate()?;
        trimesh.validate()?;

        let mut config = config.clone();
        config.collect_batch_size = clamp_batch_size("collect_batch_size", config.collect_batch_size);
        config.probe_batch_size = clamp_batch_size("probe_batch_size", config.probe_batch_size);
        config.link_batch_size = clamp_batch_size("link_batch_size", config.link_batch_size);

        let mut generator = Self {
            trimesh,
            obstacle,
            areas: Vec::new(),
            aabb: Aabb3d::default(),
            origin: Vec3A::ZERO,
            dims: UVec3::ZERO,
            tiles: Vec::new(),
            step: GenerateStep::CollectTile,
            cursor: 0,
            started: Instant::now(),
            map: None,
            config,
        };

        let aabb = match trimesh.compute_aabb() {
            Some(aabb) if !trimesh.indices.is_empty() && !aabb.is_empty() => aabb,
            aabb => {
                generator.aabb = aabb.unwrap_or_default();
                generator.finish();
                return Ok(generator);
            }
        };
        generator.aabb = aabb;
        generator.origin = grid_origin(&aabb);
        generator.areas = trimesh.compute_areas();
        generator.generate_grid();
        tracing::debug!(
            "Laid out {}x{}x{} tile grid for {} triangles",
            generator.dims.x,
            generator.dims.y,
            generator.dims.z,
            trimesh.triangle_count()
        );
        Ok(generator)
    }

    /// Emits one tile per grid cell, layer by layer, row by row.
    fn generate_grid(&mut self) {
        let width = self.config.tile_width;
        let height = self.config.tile_height;
        let extent = self.aabb.size();
        self.dims = UVec3::new(
            ((extent.x / width).ceil() as u32).max(1),
            (((extent.y + 2.0 * GRID_VERTICAL_SLACK) / height).ceil() as u32).max(1),
            ((extent.z / width).ceil() as u32).max(1),
        );

        let size = Vec3A::new(width, height, width);
        self.tiles = Vec::with_capacity(cell_count(self.dims));
        for y in 0..self.dims.y {
            for z in 0..self.dims.z {
                for x in 0..self.dims.x {
                    let coord = TileCoord::new(x as i32, y as i32, z as i32);
                    let min = self.origin + Vec3A::new(x as f32, y as f32, z as f32) * size;
                    self.tiles.push(BuildTile {
                        coord,
                        aabb: Aabb3d {
                            min,
                            max: min + size,
                        },
                        triangles: Vec::new(),
                        area: AreaId::NONE,
                        position: None,
                        neighbours: Vec::new(),
                    });
                }
            }
        }
    }

    /// The phase the build is in.
    #[inline]
    pub fn step(&self) -> GenerateStep {
        self.step
    }

    /// Whether the build is done.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.step == GenerateStep::Finish
    }

    /// The configuration in use, with batch sizes clamped to at least 1.
    #[inline]
    pub fn config(&self) -> &TileMapConfig {
        &self.config
    }

    /// The finished map, once [`TileMapGenerator::update_generate`] returned `true`.
    #[inline]
    pub fn tile_map(&self) -> Option<&WalkingTileMap> {
        self.map.as_ref()
    }

    /// Progress of the build in `[0, 1]`.
    ///
    /// Collecting accounts for the first quarter, probing for the second quarter
    /// and linking for the remaining half.
    pub fn generate_percent(&self) -> f32 {
        let fraction = |done: usize, total: usize| {
            if total == 0 {
                1.0
            } else {
                (done as f32 / total as f32).min(1.0)
            }
        };
        match self.step {
            GenerateStep::CollectTile => {
                COLLECT_PROGRESS
                    + (REMOVE_EMPTY_PROGRESS - COLLECT_PROGRESS)
                        * fraction(self.cursor, self.trimesh.triangle_count())
            }
            GenerateStep::RemoveEmptyTile => {
                REMOVE_EMPTY_PROGRESS
                    + (LINK_PROGRESS - REMOVE_EMPTY_PROGRESS)
                        * fraction(self.cursor, self.tiles.len())
            }
            GenerateStep::LinkNeighbours => {
                LINK_PROGRESS
                    + (1.0 - LINK_PROGRESS)
                        * fraction(self.cursor, self.tiles.len().saturating_sub(1))
            }
            GenerateStep::Finish => 1.0,
        }
    }

    /// Performs a bounded amount of work.
    ///
    /// Returns `true` once the map is finished. Calling it again after that does nothing.
    pub fn update_generate(&mut self) -> bool {
        match self.step {
            GenerateStep::CollectTile => self.collect_tiles(),
            GenerateStep::RemoveEmptyTile => self.remove_empty_tiles(),
            GenerateStep::LinkNeighbours => self.link_neighbours(),
            GenerateStep::Finish => {}
        }
        self.is_finished()
    }

    /// Runs the remaining steps and returns the finished map.
    pub fn into_tile_map(mut self) -> WalkingTileMap {
        while !self.update_generate() {}
        self.map.take().unwrap_or_default()
    }

    fn collect_tiles(&mut self) {
        let triangle_count = self.trimesh.triangle_count();
        let end = (self.cursor + self.config.collect_batch_size).min(triangle_count);
        for index in self.cursor..end {
            let triangle_aabb = self.trimesh.triangle(index).aabb();
            let area = self.areas[index];
            for tile_index in self.overlapping_tiles(&triangle_aabb) {
                let tile = &mut self.tiles[tile_index];
                if tile.aabb.intersects_aabb(&triangle_aabb) {
                    tile.triangles.push(index as u32);
                    tile.area = area;
                }
            }
        }
        self.cursor = end;

        if self.cursor >= triangle_count {
            tracing::debug!(
                "Collected {triangle_count} triangles onto {} tiles",
                self.tiles.len()
            );
            self.enter(GenerateStep::RemoveEmptyTile);
        }
    }

    /// Indices of the grid cells that may overlap `aabb`.
    /// Cells touching `aabb` on their upper boundary are included.
    fn overlapping_tiles(&self, aabb: &Aabb3d) -> impl Iterator<Item = usize> + use<> {
        let size = Vec3A::new(
            self.config.tile_width,
            self.config.tile_height,
            self.config.tile_width,
        );
        let max_cell = self.dims.as_ivec3() - 1;
        let lower = (((aabb.min - self.origin) / size).floor().as_ivec3() - 1).clamp(
            glam::IVec3::ZERO,
            max_cell,
        );
        let upper = ((aabb.max - self.origin) / size)
            .floor()
            .as_ivec3()
            .clamp(glam::IVec3::ZERO, max_cell);
        let dims = self.dims.as_ivec3();

        (lower.y..=upper.y).flat_map(move |y| {
            (lower.z..=upper.z).flat_map(move |z| {
                (lower.x..=upper.x).map(move |x| ((y * dims.z + z) * dims.x + x) as usize)
            })
        })
    }

    fn remove_empty_tiles(&mut self) {
        let end = (self.cursor + self.config.probe_batch_size).min(self.tiles.len());
        for tile in &mut self.tiles[self.cursor..end] {
            let triangles = std::mem::take(&mut tile.triangles);
            if triangles.is_empty() {
                continue;
            }
            let center = tile.aabb.center();
            let probe = Segment::new(
                Vec3A::new(center.x, tile.aabb.max.y, center.z),
                Vec3A::new(center.x, tile.aabb.min.y, center.z),
            );
            tile.position = triangles.iter().find_map(|&index| {
                self.trimesh
                    .triangle(index as usize)
                    .intersect_segment(probe.start, probe.end)
            });
        }
        self.cursor = end;

        if self.cursor >= self.tiles.len() {
            let grid_cells = self.tiles.len();
            self.tiles.retain(|tile| tile.position.is_some());
            tracing::debug!(
                "Kept {} of {grid_cells} tiles with walkable surface",
                self.tiles.len()
            );
            self.enter(GenerateStep::LinkNeighbours);
        }
    }

    fn link_neighbours(&mut self) {
        let tile_count = self.tiles.len();
        // The last tile has no one left to pair with
        let row_count = tile_count.saturating_sub(1);
        let end = (self.cursor + self.config.link_batch_size).min(row_count);
        for i in self.cursor..end {
            for j in i + 1..tile_count {
                if self.can_link(&self.tiles[i], &self.tiles[j]) {
                    self.tiles[i].neighbours.push(j);
                    self.tiles[j].neighbours.push(i);
                }
            }
        }
        self.cursor = end;

        if self.cursor >= row_count {
            self.finish();
        }
    }

    fn can_link(&self, a: &BuildTile, b: &BuildTile) -> bool {
        if !self.config.link_range.contains(b.coord - a.coord) {
            return false;
        }
        if self.config.separate_areas && a.area != b.area {
            return false;
        }
        let (Some(from), Some(to)) = (a.position, b.position) else {
            return false;
        };
        self.obstacle
            .is_line_hit(from, to, self.config.tile_height)
            .is_none()
    }

    /// Drops tiles without neighbours and hands out the final dense ids.
    fn finish(&mut self) {
        let tiles = std::mem::take(&mut self.tiles);

        let mut ids = vec![None; tiles.len()];
        let mut next_id = 0;
        for (index, tile) in tiles.iter().enumerate() {
            if !tile.neighbours.is_empty() {
                ids[index] = Some(TileId(next_id));
                next_id += 1;
            }
        }

        let tiles: Vec<Tile> = tiles
            .into_iter()
            .zip(&ids)
            .filter_map(|(tile, id)| {
                let id = (*id)?;
                let position = tile.position?;
                let mut neighbours: Vec<TileId> = tile
                    .neighbours
                    .iter()
                    .filter_map(|&neighbour| ids[neighbour])
                    .collect();
                neighbours.sort_unstable();
                Some(Tile {
                    id,
                    coord: tile.coord,
                    aabb: tile.aabb,
                    position,
                    area: tile.area,
                    neighbours,
                })
            })
            .collect();

        let size = Vec3A::new(
            self.config.tile_width,
            self.config.tile_height,
            self.config.tile_width,
        );
        let grid = Aabb3d {
            min: self.origin,
            max: self.origin + self.dims.as_vec3a() * size,
        };
        let map = WalkingTileMap::from_tiles(
            tiles,
            self.aabb,
            grid,
            self.config.tile_width,
            self.config.tile_height,
        );
        tracing::debug!(
            "Finished tile map with {} tiles and {} edges in {:?}",
            map.len(),
            map.edge_count(),
            self.started.elapsed()
        );
        self.map = Some(map);
        self.areas = Vec::new();
        self.enter(GenerateStep::Finish);
    }

    fn enter(&mut self, step: GenerateStep) {
        self.step = step;
        self.cursor = 0;
    }
}

/// The number of cells in a grid of `dims` cells per axis.
fn cell_count(dims: UVec3) -> usize {
    dims.x as usize * dims.y as usize * dims.z as usize
}

fn clamp_batch_size(name: &str, size: usize) -> usize {
    if size == 0 {
        tracing::warn!("{name} of 0 would never make progress, using 1 instead");
        1
    } else {
        size
    }
}
