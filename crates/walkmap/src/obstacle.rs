//! Boundary segments of the walkable surface and the steering that keeps agents inside it.
//!
//! The segments are the unwalkable edges of the navmesh, e.g. the outline of walls and ledges.
//! Intersections are computed on the xz-plane; the y-coordinate is only used to ignore
//! segments that are clearly on another floor.

use glam::Vec3A;

use crate::math::{Aabb3d, Segment, intersect_ray_segment_2d};

/// Recursion limit of [`ObstacleAvoidance::collide`].
/// An agent squeezed between several walls may stop early.
pub const MAX_COLLIDE_DEPTH: u32 = 2;

/// How far [`ObstacleAvoidance::collide`] backs off from a hit wall before sliding along it.
const COLLIDE_NUDGE: f32 = 0.01;

/// An unordered set of boundary [`Segment`]s.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ObstacleAvoidance {
    segments: Vec<Segment>,
}

impl ObstacleAvoidance {
    /// Creates an empty obstacle set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a single segment. No deduplication is performed.
    pub fn add_segment(&mut self, start: impl Into<Vec3A>, end: impl Into<Vec3A>) {
        self.segments.push(Segment::new(start, end));
    }

    /// Adds all given segments.
    pub fn add_segments(&mut self, segments: impl IntoIterator<Item = Segment>) {
        self.segments.extend(segments);
    }

    /// Removes all segments.
    pub fn clear(&mut self) {
        self.segments.clear();
    }

    /// The segments, in insertion order.
    #[inline]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The number of segments.
    #[inline]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether there are no segments.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Appends every segment passing through `aabb` to `target`.
    pub fn copy_segments(&self, target: &mut ObstacleAvoidance, aabb: &Aabb3d) {
        target.segments.extend(
            self.segments
                .iter()
                .filter(|segment| aabb.intersects_segment(segment)),
        );
    }

    /// Checks whether the straight line from `a` to `b` crosses a segment.
    ///
    /// Only segments whose endpoints are both closer than `height_tolerance` to the height of `a`
    /// are considered. Returns the parameter along `a -> b` of the first crossing found,
    /// which is not necessarily the closest one.
    pub fn is_line_hit(&self, a: Vec3A, b: Vec3A, height_tolerance: f32) -> Option<f32> {
        let velocity = b - a;
        self.segments
            .iter()
            .filter(|segment| {
                (segment.start.y - a.y).abs() < height_tolerance
                    && (segment.end.y - a.y).abs() < height_tolerance
            })
            .find_map(|segment| {
                intersect_ray_segment_2d(a, velocity, segment.start, segment.end)
            })
    }

    /// Moves from `position` by `velocity`, sliding along any segment in the way.
    ///
    /// Segments with both endpoints more than `step_height` above or below `position` are ignored.
    /// Returns the position the motion ends at. After [`MAX_COLLIDE_DEPTH`] slides the agent
    /// stops where it is, even if the remaining motion would still be blocked.
    pub fn collide(&self, position: Vec3A, velocity: Vec3A, step_height: f32) -> Vec3A {
        self.collide_recursive(position, velocity, step_height, 0)
    }

    fn collide_recursive(
        &self,
        position: Vec3A,
        velocity: Vec3A,
        step_height: f32,
        depth: u32,
    ) -> Vec3A {
        if depth >= MAX_COLLIDE_DEPTH {
            // Could not resolve, stay put
            return position;
        }
        let direction = velocity.normalize_or_zero();
        if direction == Vec3A::ZERO {
            return position;
        }

        // Find the closest segment in the way
        let mut closest: Option<(f32, &Segment)> = None;
        for segment in &self.segments {
            if (segment.start.y - position.y).abs() > step_height
                && (segment.end.y - position.y).abs() > step_height
            {
                continue;
            }
            let Some(t) = intersect_ray_segment_2d(position, velocity, segment.start, segment.end)
            else {
                continue;
            };
            if closest.is_none_or(|(t_min, _)| t < t_min) {
                closest = Some((t, segment));
            }
        }

        let destination = position + velocity;
        let Some((t, segment)) = closest else {
            return destination;
        };

        let intersection = position + velocity * t;
        let mut normal = segment.vector().cross(Vec3A::Y).normalize_or_zero();
        if direction.dot(normal) < 0.0 {
            normal = -normal;
        }

        // Remove the part of the remaining motion that points into the wall
        let slid_destination = destination - normal * velocity.dot(normal) * (1.0 - t);
        let slid_velocity = slid_destination - intersection;
        self.collide_recursive(
            intersection - direction * COLLIDE_NUDGE,
            slid_velocity,
            step_height,
            depth + 1,
        )
    }
}

impl FromIterator<Segment> for ObstacleAvoidance {
    fn from_iter<T: IntoIterator<Item = Segment>>(iter: T) -> Self {
        Self {
            segments: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wall_at_x(x: f32) -> ObstacleAvoidance {
        let mut obstacle = ObstacleAvoidance::new();
        obstacle.add_segment([x, 0.0, -10.0], [x, 0.0, 10.0]);
        obstacle
    }

    #[test]
    fn line_across_wall_is_hit() {
        let obstacle = wall_at_x(1.0);
        let t = obstacle
            .is_line_hit(Vec3A::ZERO, Vec3A::new(4.0, 0.0, 0.0), 1.0)
            .unwrap();
        assert!((t - 0.25).abs() < 1e-6);
        assert_eq!(
            obstacle.is_line_hit(Vec3A::ZERO, Vec3A::new(-4.0, 0.0, 0.0), 1.0),
            None
        );
    }

    #[test]
    fn wall_on_other_floor_is_ignored() {
        let mut obstacle = ObstacleAvoidance::new();
        obstacle.add_segment([1.0, 3.0, -10.0], [1.0, 3.0, 10.0]);
        assert_eq!(
            obstacle.is_line_hit(Vec3A::ZERO, Vec3A::new(4.0, 0.0, 0.0), 2.0),
            None
        );
        assert!(
            obstacle
                .is_line_hit(Vec3A::ZERO, Vec3A::new(4.0, 0.0, 0.0), 4.0)
                .is_some()
        );
    }

    #[test]
    fn unobstructed_motion_reaches_destination() {
        let obstacle = wall_at_x(5.0);
        let position = Vec3A::new(0.0, 0.0, 0.0);
        let velocity = Vec3A::new(1.0, 0.0, 2.0);
        assert_eq!(obstacle.collide(position, velocity, 1.0), position + velocity);
    }

    #[test]
    fn zero_velocity_is_a_no_op() {
        let obstacle = wall_at_x(0.0);
        let position = Vec3A::new(0.0, 0.0, 3.0);
        assert_eq!(obstacle.collide(position, Vec3A::ZERO, 1.0), position);
    }

    #[test]
    fn head_on_motion_stops_before_wall() {
        let obstacle = wall_at_x(1.0);
        let end = obstacle.collide(Vec3A::ZERO, Vec3A::new(2.0, 0.0, 0.0), 1.0);
        assert!(end.x < 1.0);
        assert!(end.x > 0.0);
        assert!(end.z.abs() < 1e-5);
    }

    #[test]
    fn diagonal_motion_slides_along_wall() {
        let obstacle = wall_at_x(1.0);
        let end = obstacle.collide(Vec3A::ZERO, Vec3A::new(2.0, 0.0, 2.0), 1.0);
        assert!(end.x < 1.0);
        // Most of the motion along the wall survives
        assert!(end.z > 1.9, "{end}");
    }

    #[test]
    fn step_height_filters_segments() {
        let mut obstacle = ObstacleAvoidance::new();
        obstacle.add_segment([1.0, 5.0, -10.0], [1.0, 5.0, 10.0]);
        let velocity = Vec3A::new(2.0, 0.0, 0.0);
        assert_eq!(obstacle.collide(Vec3A::ZERO, velocity, 1.0), velocity);
    }

    #[test]
    fn copy_segments_keeps_only_overlapping() {
        let mut obstacle = wall_at_x(1.0);
        obstacle.add_segment([20.0, 0.0, 0.0], [25.0, 0.0, 0.0]);
        let mut target = ObstacleAvoidance::new();
        obstacle.copy_segments(&mut target, &Aabb3d::new(Vec3A::ZERO, [2.0, 2.0, 2.0]));
        assert_eq!(target.segments(), &obstacle.segments()[..1]);
    }
}
