#![allow(dead_code)]

use glam::{UVec3, Vec3A};
use walkmap::{ObstacleAvoidance, TriMesh, Triangle};

/// A welded floor of `n` x `n` unit quads at height `y`, starting at the origin.
pub fn floor(n: u32, y: f32) -> TriMesh {
    let mut trimesh = TriMesh::default();
    for z in 0..=n {
        for x in 0..=n {
            trimesh.vertices.push(Vec3A::new(x as f32, y, z as f32));
        }
    }
    let vertex = |x: u32, z: u32| z * (n + 1) + x;
    for z in 0..n {
        for x in 0..n {
            trimesh.indices.push(UVec3::new(
                vertex(x, z),
                vertex(x, z + 1),
                vertex(x + 1, z + 1),
            ));
            trimesh.indices.push(UVec3::new(
                vertex(x, z),
                vertex(x + 1, z + 1),
                vertex(x + 1, z),
            ));
        }
    }
    trimesh
}

/// A pseudo random soup of small triangles scattered over a `size` x `size` area.
pub fn scattered_soup(count: usize, size: f32) -> Vec<Triangle> {
    let mut state = 0x2545_f491_u32;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        (state as f32 / u32::MAX as f32) * size
    };
    (0..count)
        .map(|_| {
            let a = Vec3A::new(next(), next() * 0.1, next());
            Triangle::new(
                a,
                a + Vec3A::new(0.5, 0.1, 0.0),
                a + Vec3A::new(0.0, 0.1, 0.5),
            )
        })
        .collect()
}

/// A single boundary segment running along the z-axis at `x`, well past the floor.
pub fn wall_at_x(x: f32) -> ObstacleAvoidance {
    let mut obstacle = ObstacleAvoidance::new();
    obstacle.add_segment([x, 0.0, -1.0], [x, 0.0, 11.0]);
    obstacle
}
