//! Axis-aligned bounding boxes.

use crate::{
    fph,
    quantities::{Orientation, Position},
};
use nalgebra::{Point3, Vector3};

/// An axis-aligned bounding box given by its lower and upper corner.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub lower: Position,
    pub upper: Position,
}

impl Aabb {
    pub fn new(lower: Position, upper: Position) -> Self {
        Self { lower, upper }
    }

    /// An empty box suitable as the identity for [`extend`](Self::extend).
    pub fn empty() -> Self {
        Self {
            lower: Point3::new(fph::INFINITY, fph::INFINITY, fph::INFINITY),
            upper: Point3::new(fph::NEG_INFINITY, fph::NEG_INFINITY, fph::NEG_INFINITY),
        }
    }

    /// The box covering all of space.
    pub fn unbounded() -> Self {
        Self {
            lower: Point3::new(fph::NEG_INFINITY, fph::NEG_INFINITY, fph::NEG_INFINITY),
            upper: Point3::new(fph::INFINITY, fph::INFINITY, fph::INFINITY),
        }
    }

    /// Computes the tightest box around the given points after applying the
    /// optional pose, inflated by `skin` on all sides.
    pub fn from_points<'a>(
        points: impl IntoIterator<Item = &'a Position>,
        position: Option<&Position>,
        orientation: Option<&Orientation>,
        skin: fph,
    ) -> Self {
        let mut aabb = Self::empty();
        for point in points {
            let mut p = *point;
            if let Some(orientation) = orientation {
                p = Position::from(orientation.transform_vector(&p.coords));
            }
            if let Some(position) = position {
                p += position.coords;
            }
            aabb.lower = aabb.lower.inf(&p);
            aabb.upper = aabb.upper.sup(&p);
        }
        if skin != 0.0 {
            let skin = Vector3::repeat(skin);
            aabb.lower -= skin;
            aabb.upper += skin;
        }
        aabb
    }

    /// Grows this box to also cover `other`.
    pub fn extend(&mut self, other: &Self) {
        self.lower = self.lower.inf(&other.lower);
        self.upper = self.upper.sup(&other.upper);
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        let l1 = &self.lower;
        let u1 = &self.upper;
        let l2 = &other.lower;
        let u2 = &other.upper;
        (l2.x <= u1.x && u1.x <= u2.x || l1.x <= u2.x && u2.x <= u1.x)
            && (l2.y <= u1.y && u1.y <= u2.y || l1.y <= u2.y && u2.y <= u1.y)
            && (l2.z <= u1.z && u1.z <= u2.z || l1.z <= u2.z && u2.z <= u1.z)
    }

    pub fn volume(&self) -> fph {
        let extent = self.upper - self.lower;
        extent.x * extent.y * extent.z
    }

    /// The eight corners of the box.
    pub fn corners(&self) -> [Position; 8] {
        let l = &self.lower;
        let u = &self.upper;
        [
            Point3::new(l.x, l.y, l.z),
            Point3::new(u.x, l.y, l.z),
            Point3::new(u.x, u.y, l.z),
            Point3::new(l.x, u.y, l.z),
            Point3::new(l.x, l.y, u.z),
            Point3::new(u.x, l.y, u.z),
            Point3::new(u.x, u.y, u.z),
            Point3::new(l.x, u.y, u.z),
        ]
    }

    /// The box covering this box after applying the given pose.
    pub fn to_world_frame(&self, position: &Position, orientation: &Orientation) -> Self {
        let corners = self.corners();
        Self::from_points(corners.iter(), Some(position), Some(orientation), 0.0)
    }

    /// The box covering this box expressed in the local frame of the pose.
    pub fn to_local_frame(&self, position: &Position, orientation: &Orientation) -> Self {
        let corners = self.corners();
        let mut aabb = Self::empty();
        for corner in &corners {
            let p = crate::quantities::point_to_local_frame(position, orientation, corner);
            aabb.lower = aabb.lower.inf(&p);
            aabb.upper = aabb.upper.sup(&p);
        }
        aabb
    }

    /// Slab test against the segment from `from` to `to`. Returns whether the
    /// segment passes through the box.
    pub fn overlaps_ray_segment(&self, from: &Position, to: &Position) -> bool {
        let dir = to - from;
        let mut t_min = fph::NEG_INFINITY;
        let mut t_max = fph::INFINITY;

        for axis in 0..3 {
            if dir[axis].abs() < fph::EPSILON {
                if from[axis] < self.lower[axis] || from[axis] > self.upper[axis] {
                    return false;
                }
            } else {
                let inv_d = 1.0 / dir[axis];
                let mut t1 = (self.lower[axis] - from[axis]) * inv_d;
                let mut t2 = (self.upper[axis] - from[axis]) * inv_d;
                if t1 > t2 {
                    std::mem::swap(&mut t1, &mut t2);
                }
                t_min = t_min.max(t1);
                t_max = t_max.min(t2);
                if t_min > t_max {
                    return false;
                }
            }
        }
        t_max >= 0.0
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}
