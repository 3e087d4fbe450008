use std::collections::HashSet;

use glam::Vec3A;
use walkmap::{
    LinkRange, ObstacleAvoidance, TileCoord, TileId, TileMapConfig, TileMapGenerator,
    WalkingTileMap,
};

mod common;

fn orthogonal() -> TileMapConfig {
    TileMapConfig {
        link_range: LinkRange::Orthogonal,
        ..Default::default()
    }
}

/// Ids of all tiles reachable from `start`.
fn component(map: &WalkingTileMap, start: TileId) -> HashSet<TileId> {
    let mut seen = HashSet::from([start]);
    let mut stack = vec![start];
    while let Some(id) = stack.pop() {
        for neighbour in map.neighbours(id) {
            if seen.insert(neighbour.id) {
                stack.push(neighbour.id);
            }
        }
    }
    seen
}

#[test]
fn flat_floor_has_a_tile_per_cell() {
    let trimesh = common::floor(10, 0.0);
    let map = WalkingTileMap::generate(&orthogonal(), &trimesh, &ObstacleAvoidance::new()).unwrap();

    assert_eq!(map.len(), 25);
    for tile in map.tiles() {
        let border_sides = [tile.coord.x, tile.coord.z]
            .into_iter()
            .filter(|&c| c == 0 || c == 4)
            .count();
        assert_eq!(tile.neighbours.len(), 4 - border_sides, "{:?}", tile.coord);
        assert_eq!(tile.coord.y, 0);
        approx::assert_relative_eq!(tile.position.y, 0.0, epsilon = 1e-5);
        approx::assert_relative_eq!(tile.position.x, tile.coord.x as f32 * 2.0 + 1.0);
        approx::assert_relative_eq!(tile.position.z, tile.coord.z as f32 * 2.0 + 1.0);
    }
    assert_eq!(map.edge_count(), 40);
}

#[test]
fn ids_are_dense_and_adjacency_symmetric() {
    let trimesh = common::floor(10, 0.0);
    let map = WalkingTileMap::generate(
        &TileMapConfig::default(),
        &trimesh,
        &common::wall_at_x(4.0),
    )
    .unwrap();
    for (index, tile) in map.tiles().iter().enumerate() {
        assert_eq!(tile.id.index(), index);
        assert!(!tile.neighbours.is_empty());
        assert_eq!(map.tile_by_coord(tile.coord).map(|t| t.id), Some(tile.id));
        for neighbour in map.neighbours(tile.id) {
            assert!(neighbour.is_neighbour(tile.id));
        }
    }
}

#[test]
fn wall_splits_floor_into_two_components() {
    let trimesh = common::floor(10, 0.0);
    for link_range in [LinkRange::Orthogonal, LinkRange::Surrounding, LinkRange::Visible] {
        let config = TileMapConfig {
            link_range,
            ..Default::default()
        };
        let map = WalkingTileMap::generate(&config, &trimesh, &common::wall_at_x(4.0)).unwrap();
        assert_eq!(map.len(), 25);

        let west = component(&map, map.tile_at(0, 0, 0).unwrap().id);
        let east = component(&map, map.tile_at(4, 0, 0).unwrap().id);
        assert_eq!(west.len(), 10, "{link_range:?}");
        assert_eq!(east.len(), 15, "{link_range:?}");
        assert!(west.is_disjoint(&east));

        for tile in map.tiles() {
            for neighbour in map.neighbours(tile.id) {
                assert_eq!(
                    tile.position.x < 4.0,
                    neighbour.position.x < 4.0,
                    "{:?} - {:?} crosses the wall",
                    tile.coord,
                    neighbour.coord
                );
            }
        }
    }
}

#[test]
fn step_wise_build_matches_one_shot_build() {
    let mut trimesh = common::floor(10, 0.0);
    trimesh.extend(common::floor(6, 1.2));
    let obstacle = common::wall_at_x(4.0);
    let config = TileMapConfig {
        collect_batch_size: 7,
        probe_batch_size: 3,
        link_batch_size: 2,
        ..Default::default()
    };

    let one_shot = WalkingTileMap::generate(&config, &trimesh, &obstacle).unwrap();

    let mut generator = TileMapGenerator::begin_generate(&config, &trimesh, &obstacle).unwrap();
    let mut updates = 0;
    while !generator.update_generate() {
        updates += 1;
    }
    assert!(updates > 10);
    let step_wise = generator.into_tile_map();

    assert_eq!(one_shot.len(), step_wise.len());
    for (a, b) in one_shot.tiles().iter().zip(step_wise.tiles()) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.coord, b.coord);
        assert_eq!(a.neighbours, b.neighbours);
        assert!(a.position.distance(b.position) < 1e-6);
    }
}

#[test]
fn stacked_floors_use_separate_layers() {
    let mut trimesh = common::floor(4, 0.0);
    trimesh.extend(common::floor(4, 5.0));
    let map = WalkingTileMap::generate(&orthogonal(), &trimesh, &ObstacleAvoidance::new()).unwrap();

    let layers: HashSet<i32> = map.tiles().iter().map(|tile| tile.coord.y).collect();
    assert_eq!(layers.len(), 2);
    assert_eq!(map.len(), 8);
    for tile in map.tiles() {
        for neighbour in map.neighbours(tile.id) {
            assert_eq!(neighbour.coord.y, tile.coord.y);
        }
    }
}

#[test]
fn tile_lookup_by_position_uses_floor_semantics() {
    let trimesh = common::floor(10, 0.0);
    let map = WalkingTileMap::generate(&orthogonal(), &trimesh, &ObstacleAvoidance::new()).unwrap();

    // Exactly on the upper x boundary of tile (0, 0, 0)
    let tile = map.tile_by_position([2.0, 0.0, 1.0]).unwrap();
    assert_eq!(tile.coord, TileCoord::new(1, 0, 0));
    let tile = map.tile_by_position([1.999, 0.0, 1.0]).unwrap();
    assert_eq!(tile.coord, TileCoord::new(0, 0, 0));
    let tile = map.tile_by_position(Vec3A::new(9.0, 0.0, 4.0)).unwrap();
    assert_eq!(tile.coord, TileCoord::new(4, 0, 2));

    // Positions slightly off the surface height are still inside the grid
    let tile = map.tile_by_position([1.0, 0.05, 1.0]).unwrap();
    assert_eq!(tile.coord, TileCoord::new(0, 0, 0));
    assert!(tile.aabb.contains_point(Vec3A::new(1.0, 0.05, 1.0)));
    let tile = map.tile_by_position([7.0, -0.05, 3.0]).unwrap();
    assert_eq!(tile.coord, TileCoord::new(3, 0, 1));

    assert!(map.tile_by_position([10.5, 0.0, 1.0]).is_none());
    assert!(map.tile_by_position([5.0, -1.0, 5.0]).is_none());
}

#[test]
fn isolated_tiles_are_pruned() {
    // A single tile worth of floor has nothing to link to
    let trimesh = common::floor(2, 0.0);
    let map = WalkingTileMap::generate(&orthogonal(), &trimesh, &ObstacleAvoidance::new()).unwrap();
    assert!(map.is_empty());
    assert_eq!(map.tile_at(0, 0, 0), None);
}

#[test]
fn invalid_tile_size_is_an_error() {
    let trimesh = common::floor(2, 0.0);
    let config = TileMapConfig {
        tile_height: -1.0,
        ..Default::default()
    };
    assert!(WalkingTileMap::generate(&config, &trimesh, &ObstacleAvoidance::new()).is_err());
}
