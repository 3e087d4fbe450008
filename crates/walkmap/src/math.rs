//! Geometric primitives shared by the octree, the obstacle model and the tile map.

#[cfg(feature = "bevy_reflect")]
use bevy_reflect::prelude::*;
use glam::Vec3A;

/// Determinants below this are treated as a line running parallel to the triangle plane.
const TRIANGLE_PARALLEL_EPSILON: f32 = 1e-12;
/// Slack on the barycentric bounds so that lines through a shared edge hit at least one triangle.
const BARYCENTRIC_EPSILON: f32 = 1e-5;
/// Perp products below this are treated as parallel on the xz-plane.
const PERP_PARALLEL_EPSILON: f32 = 1e-6;

/// An axis-aligned bounding box in world units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "bevy_reflect", derive(Reflect))]
pub struct Aabb3d {
    /// The minimum corner
    pub min: Vec3A,
    /// The maximum corner
    pub max: Vec3A,
}

impl Aabb3d {
    /// Creates a box from its center and half extents.
    #[inline]
    pub fn new(center: impl Into<Vec3A>, half_size: impl Into<Vec3A>) -> Self {
        let center = center.into();
        let half_size = half_size.into();
        Self {
            min: center - half_size,
            max: center + half_size,
        }
    }

    /// Computes the box enclosing all given points.
    /// Returns `None` if `verts` is empty.
    pub fn from_verts(verts: &[Vec3A]) -> Option<Self> {
        let mut iter = verts.iter();
        let first = *iter.next()?;
        let mut aabb = Self {
            min: first,
            max: first,
        };
        for vert in iter {
            aabb.extend(*vert);
        }
        Some(aabb)
    }

    /// Grows the box so that it contains `point`.
    #[inline]
    pub fn extend(&mut self, point: Vec3A) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Grows the box so that it contains `other`.
    #[inline]
    pub fn merge(&mut self, other: &Aabb3d) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// The center of the box.
    #[inline]
    pub fn center(&self) -> Vec3A {
        (self.min + self.max) * 0.5
    }

    /// The full extent of the box along each axis.
    #[inline]
    pub fn size(&self) -> Vec3A {
        self.max - self.min
    }

    /// Half of [`Aabb3d::size`].
    #[inline]
    pub fn half_size(&self) -> Vec3A {
        self.size() * 0.5
    }

    /// Whether the box has collapsed into a single point.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min == self.max
    }

    /// The eight corners of the box.
    pub fn corners(&self) -> [Vec3A; 8] {
        let Self { min, max } = *self;
        [
            Vec3A::new(min.x, min.y, min.z),
            Vec3A::new(min.x, max.y, min.z),
            Vec3A::new(min.x, min.y, max.z),
            Vec3A::new(min.x, max.y, max.z),
            Vec3A::new(max.x, min.y, min.z),
            Vec3A::new(max.x, max.y, min.z),
            Vec3A::new(max.x, min.y, max.z),
            Vec3A::new(max.x, max.y, max.z),
        ]
    }

    /// Whether `point` lies inside the box. Points on the boundary count as inside.
    #[inline]
    pub fn contains_point(&self, point: Vec3A) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Whether all three vertices of `triangle` lie inside the box.
    #[inline]
    pub fn contains_triangle(&self, triangle: &Triangle) -> bool {
        self.contains_point(triangle.a)
            && self.contains_point(triangle.b)
            && self.contains_point(triangle.c)
    }

    /// Whether the two boxes overlap. Touching boxes count as overlapping.
    #[inline]
    pub fn intersects_aabb(&self, other: &Aabb3d) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    /// Separating-axis test between the box and a line segment given by its middle point,
    /// its normalized direction and half of its length.
    pub fn intersects_line(&self, middle: Vec3A, direction: Vec3A, half_length: f32) -> bool {
        let e = self.half_size();
        let t = self.center() - middle;
        let d = direction.abs();

        // Box axes
        if t.x.abs() > e.x + half_length * d.x
            || t.y.abs() > e.y + half_length * d.y
            || t.z.abs() > e.z + half_length * d.z
        {
            return false;
        }

        // Cross products of the segment direction with the box axes
        let r = e.y * d.z + e.z * d.y;
        if (t.y * direction.z - t.z * direction.y).abs() > r {
            return false;
        }
        let r = e.x * d.z + e.z * d.x;
        if (t.z * direction.x - t.x * direction.z).abs() > r {
            return false;
        }
        let r = e.x * d.y + e.y * d.x;
        if (t.x * direction.y - t.y * direction.x).abs() > r {
            return false;
        }
        true
    }

    /// Whether `segment` passes through the box.
    #[inline]
    pub fn intersects_segment(&self, segment: &Segment) -> bool {
        self.intersects_line(
            segment.middle(),
            segment.direction(),
            segment.length() * 0.5,
        )
    }
}

/// A triangle given by its three corners.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Triangle {
    /// The first vertex
    pub a: Vec3A,
    /// The second vertex
    pub b: Vec3A,
    /// The third vertex
    pub c: Vec3A,
}

impl Triangle {
    /// Creates a triangle from its three corners.
    #[inline]
    pub fn new(a: impl Into<Vec3A>, b: impl Into<Vec3A>, c: impl Into<Vec3A>) -> Self {
        Self {
            a: a.into(),
            b: b.into(),
            c: c.into(),
        }
    }

    /// The corners as an array.
    #[inline]
    pub fn vertices(&self) -> [Vec3A; 3] {
        [self.a, self.b, self.c]
    }

    /// The tight bounding box of the triangle.
    #[inline]
    pub fn aabb(&self) -> Aabb3d {
        Aabb3d {
            min: self.a.min(self.b).min(self.c),
            max: self.a.max(self.b).max(self.c),
        }
    }

    /// The unit normal following the winding order, or zero for degenerate triangles.
    #[inline]
    pub fn normal(&self) -> Vec3A {
        (self.b - self.a).cross(self.c - self.a).normalize_or_zero()
    }

    /// Intersects the triangle with the segment from `start` to `end`.
    ///
    /// Returns the intersection point, or `None` if the segment misses the triangle
    /// or runs parallel to its plane.
    pub fn intersect_segment(&self, start: Vec3A, end: Vec3A) -> Option<Vec3A> {
        let direction = end - start;
        let edge1 = self.b - self.a;
        let edge2 = self.c - self.a;

        let p = direction.cross(edge2);
        let det = edge1.dot(p);
        if det.abs() < TRIANGLE_PARALLEL_EPSILON {
            return None;
        }
        let inv_det = 1.0 / det;

        let s = start - self.a;
        let u = s.dot(p) * inv_det;
        if !(-BARYCENTRIC_EPSILON..=1.0 + BARYCENTRIC_EPSILON).contains(&u) {
            return None;
        }
        let q = s.cross(edge1);
        let v = direction.dot(q) * inv_det;
        if v < -BARYCENTRIC_EPSILON || u + v > 1.0 + BARYCENTRIC_EPSILON {
            return None;
        }

        let t = edge2.dot(q) * inv_det;
        if !(0.0..=1.0).contains(&t) {
            return None;
        }
        Some(start + direction * t)
    }
}

/// A line segment between two points.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Segment {
    /// The start point
    pub start: Vec3A,
    /// The end point
    pub end: Vec3A,
}

impl Segment {
    /// Creates a segment from `start` to `end`.
    #[inline]
    pub fn new(start: impl Into<Vec3A>, end: impl Into<Vec3A>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// `end - start`
    #[inline]
    pub fn vector(&self) -> Vec3A {
        self.end - self.start
    }

    /// The normalized direction from `start` to `end`, or zero for a point-like segment.
    #[inline]
    pub fn direction(&self) -> Vec3A {
        self.vector().normalize_or_zero()
    }

    /// The point halfway between `start` and `end`.
    #[inline]
    pub fn middle(&self) -> Vec3A {
        (self.start + self.end) * 0.5
    }

    /// The length of the segment.
    #[inline]
    pub fn length(&self) -> f32 {
        self.vector().length()
    }

    /// The squared length of the segment.
    #[inline]
    pub fn length_squared(&self) -> f32 {
        self.vector().length_squared()
    }

    /// The bounding box of both endpoints.
    #[inline]
    pub fn aabb(&self) -> Aabb3d {
        Aabb3d {
            min: self.start.min(self.end),
            max: self.start.max(self.end),
        }
    }
}

/// Perp product of `u` and `v` projected onto the xz-plane.
#[inline]
pub(crate) fn perp_2d(u: Vec3A, v: Vec3A) -> f32 {
    u.z * v.x - u.x * v.z
}

/// Intersects the motion `position -> position + velocity` with the segment
/// `segment_start -> segment_end` on the xz-plane.
///
/// Returns the parameter `t` along the motion, or `None` if the two miss each other
/// or are parallel. Collinear overlap is reported as a miss.
pub(crate) fn intersect_ray_segment_2d(
    position: Vec3A,
    velocity: Vec3A,
    segment_start: Vec3A,
    segment_end: Vec3A,
) -> Option<f32> {
    let v = segment_end - segment_start;
    let w = position - segment_start;

    let d = perp_2d(velocity, v);
    if d.abs() < PERP_PARALLEL_EPSILON {
        return None;
    }
    let d = 1.0 / d;

    let t = perp_2d(v, w) * d;
    if !(0.0..=1.0).contains(&t) {
        return None;
    }
    let s = perp_2d(velocity, w) * d;
    if !(0.0..=1.0).contains(&s) {
        return None;
    }
    Some(t)
}
