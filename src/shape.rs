//! Collision shape geometry.

pub mod convex;
pub mod heightfield;
pub mod trimesh;

use crate::{
    aabb::Aabb,
    fph,
    material::MaterialId,
    quantities::{Orientation, Position},
};
use bitflags::bitflags;
use convex::ConvexPolyhedron;
use heightfield::Heightfield;
use nalgebra::{Point3, Vector3};
use std::sync::atomic::{AtomicU32, Ordering};
use trimesh::Trimesh;

static SHAPE_ID_COUNTER: AtomicU32 = AtomicU32::new(0);

bitflags! {
    /// Bit-flag tag identifying a shape variant. Tags of two shapes are OR'ed
    /// together to form narrowphase dispatch keys.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ShapeType: u16 {
        const SPHERE = 1;
        const PLANE = 2;
        const BOX = 4;
        const CONVEX = 16;
        const HEIGHTFIELD = 32;
        const PARTICLE = 64;
        const CYLINDER = 128;
        const TRIMESH = 256;
    }
}

/// The closed set of geometry kinds the narrowphase dispatches over.
/// Cylinders are represented by their convex polyhedron and dispatch as
/// [`GeometryKind::Convex`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum GeometryKind {
    Sphere,
    Plane,
    Box,
    Convex,
    Heightfield,
    Particle,
    Trimesh,
}

/// A collision shape: geometry plus per-shape collision filtering and
/// material assignment. Shapes are attached to bodies with a local offset and
/// orientation.
#[derive(Clone, Debug)]
pub struct Shape {
    pub id: u32,
    pub shape_type: ShapeType,
    pub geometry: Geometry,
    pub collision_filter_group: u32,
    pub collision_filter_mask: u32,
    pub collision_response: bool,
    pub material: Option<MaterialId>,
}

/// Concrete shape geometry.
#[derive(Clone, Debug)]
pub enum Geometry {
    Sphere(Sphere),
    Plane,
    Box(Cuboid),
    Convex(ConvexPolyhedron),
    Particle,
    Heightfield(Heightfield),
    Trimesh(Trimesh),
}

#[derive(Clone, Copy, Debug)]
pub struct Sphere {
    pub radius: fph,
}

/// A box given by its half extents, carrying the equivalent convex
/// polyhedron used by the convex narrowphase handlers.
#[derive(Clone, Debug)]
pub struct Cuboid {
    pub half_extents: Vector3<fph>,
    convex: ConvexPolyhedron,
}

impl Shape {
    fn new(shape_type: ShapeType, geometry: Geometry) -> Self {
        Self {
            id: SHAPE_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            shape_type,
            geometry,
            collision_filter_group: 1,
            collision_filter_mask: u32::MAX,
            collision_response: true,
            material: None,
        }
    }

    pub fn sphere(radius: fph) -> Self {
        assert!(radius >= 0.0, "Sphere radius cannot be negative");
        Self::new(ShapeType::SPHERE, Geometry::Sphere(Sphere { radius }))
    }

    pub fn plane() -> Self {
        Self::new(ShapeType::PLANE, Geometry::Plane)
    }

    pub fn cuboid(half_extents: Vector3<fph>) -> Self {
        Self::new(ShapeType::BOX, Geometry::Box(Cuboid::new(half_extents)))
    }

    pub fn convex(polyhedron: ConvexPolyhedron) -> Self {
        Self::new(ShapeType::CONVEX, Geometry::Convex(polyhedron))
    }

    pub fn cylinder(radius_top: fph, radius_bottom: fph, height: fph, segments: usize) -> Self {
        Self::new(
            ShapeType::CYLINDER,
            Geometry::Convex(ConvexPolyhedron::cylinder(
                radius_top,
                radius_bottom,
                height,
                segments,
            )),
        )
    }

    pub fn particle() -> Self {
        Self::new(ShapeType::PARTICLE, Geometry::Particle)
    }

    pub fn heightfield(heightfield: Heightfield) -> Self {
        Self::new(ShapeType::HEIGHTFIELD, Geometry::Heightfield(heightfield))
    }

    pub fn trimesh(trimesh: Trimesh) -> Self {
        Self::new(ShapeType::TRIMESH, Geometry::Trimesh(trimesh))
    }

    pub fn with_material(mut self, material: MaterialId) -> Self {
        self.material = Some(material);
        self
    }

    pub fn kind(&self) -> GeometryKind {
        self.geometry.kind()
    }

    pub fn bounding_sphere_radius(&self) -> fph {
        self.geometry.bounding_sphere_radius()
    }

    /// The diagonal local inertia tensor of the shape for the given mass.
    pub fn local_inertia(&self, mass: fph) -> Vector3<fph> {
        self.geometry.local_inertia(mass)
    }

    /// The world AABB of the shape at the given pose.
    pub fn world_aabb(&self, position: &Position, orientation: &Orientation) -> Aabb {
        self.geometry.world_aabb(position, orientation)
    }

    pub fn volume(&self) -> fph {
        self.geometry.volume()
    }
}

impl Geometry {
    pub fn kind(&self) -> GeometryKind {
        match self {
            Self::Sphere(_) => GeometryKind::Sphere,
            Self::Plane => GeometryKind::Plane,
            Self::Box(_) => GeometryKind::Box,
            Self::Convex(_) => GeometryKind::Convex,
            Self::Particle => GeometryKind::Particle,
            Self::Heightfield(_) => GeometryKind::Heightfield,
            Self::Trimesh(_) => GeometryKind::Trimesh,
        }
    }

    pub fn bounding_sphere_radius(&self) -> fph {
        match self {
            Self::Sphere(sphere) => sphere.radius,
            Self::Plane => fph::MAX,
            Self::Box(cuboid) => cuboid.half_extents.norm(),
            Self::Convex(convex) => convex.bounding_sphere_radius(),
            Self::Particle => 0.0,
            Self::Heightfield(heightfield) => heightfield.bounding_sphere_radius(),
            Self::Trimesh(trimesh) => trimesh.bounding_sphere_radius(),
        }
    }

    pub fn local_inertia(&self, mass: fph) -> Vector3<fph> {
        match self {
            Self::Sphere(sphere) => {
                let i = 2.0 * mass * sphere.radius * sphere.radius / 5.0;
                Vector3::repeat(i)
            }
            Self::Plane | Self::Particle | Self::Heightfield(_) => Vector3::zeros(),
            Self::Box(cuboid) => cuboid_inertia(&cuboid.half_extents, mass),
            Self::Convex(convex) => {
                let aabb = convex.local_aabb();
                cuboid_inertia(&((aabb.upper - aabb.lower) * 0.5), mass)
            }
            Self::Trimesh(trimesh) => {
                let aabb = trimesh.local_aabb();
                cuboid_inertia(&((aabb.upper - aabb.lower) * 0.5), mass)
            }
        }
    }

    pub fn world_aabb(&self, position: &Position, orientation: &Orientation) -> Aabb {
        match self {
            Self::Sphere(sphere) => {
                let r = Vector3::repeat(sphere.radius);
                Aabb::new(position - r, position + r)
            }
            Self::Plane => {
                // Bounded only along an axis-aligned world normal.
                let normal = orientation.transform_vector(&Vector3::z());
                let mut aabb = Aabb::unbounded();
                for axis in 0..3 {
                    if normal[axis] == 1.0 {
                        aabb.upper[axis] = position[axis];
                    } else if normal[axis] == -1.0 {
                        aabb.lower[axis] = position[axis];
                    }
                }
                aabb
            }
            Self::Box(cuboid) => {
                let corners = Aabb::new(
                    Point3::from(-cuboid.half_extents),
                    Point3::from(cuboid.half_extents),
                )
                .corners();
                Aabb::from_points(corners.iter(), Some(position), Some(orientation), 0.0)
            }
            Self::Convex(convex) => Aabb::from_points(
                convex.vertices.iter(),
                Some(position),
                Some(orientation),
                0.0,
            ),
            Self::Particle => Aabb::new(*position, *position),
            Self::Heightfield(_) => Aabb::unbounded(),
            Self::Trimesh(trimesh) => trimesh.local_aabb().to_world_frame(position, orientation),
        }
    }

    pub fn volume(&self) -> fph {
        match self {
            Self::Sphere(sphere) => 4.0 * std::f64::consts::PI * sphere.radius.powi(3) / 3.0,
            Self::Plane | Self::Heightfield(_) => fph::MAX,
            Self::Box(cuboid) => {
                8.0 * cuboid.half_extents.x * cuboid.half_extents.y * cuboid.half_extents.z
            }
            Self::Convex(convex) => convex.local_aabb().volume(),
            Self::Particle => 0.0,
            Self::Trimesh(trimesh) => {
                4.0 * std::f64::consts::PI * trimesh.bounding_sphere_radius() / 3.0
            }
        }
    }

    /// The convex polyhedron standing in for this geometry in the convex
    /// narrowphase handlers, if there is one.
    pub fn as_convex(&self) -> Option<&ConvexPolyhedron> {
        match self {
            Self::Box(cuboid) => Some(&cuboid.convex),
            Self::Convex(convex) => Some(convex),
            _ => None,
        }
    }
}

impl Cuboid {
    pub fn new(half_extents: Vector3<fph>) -> Self {
        assert!(
            half_extents.iter().all(|e| *e > 0.0),
            "Box half extents must be positive"
        );
        let convex = ConvexPolyhedron::cuboid(&half_extents);
        Self {
            half_extents,
            convex,
        }
    }

    pub fn convex(&self) -> &ConvexPolyhedron {
        &self.convex
    }
}

pub(crate) fn cuboid_inertia(half_extents: &Vector3<fph>, mass: fph) -> Vector3<fph> {
    let e = half_extents;
    Vector3::new(
        (1.0 / 12.0) * mass * (4.0 * e.y * e.y + 4.0 * e.z * e.z),
        (1.0 / 12.0) * mass * (4.0 * e.x * e.x + 4.0 * e.z * e.z),
        (1.0 / 12.0) * mass * (4.0 * e.y * e.y + 4.0 * e.x * e.x),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::FRAC_PI_4;

    #[test]
    fn should_give_solid_sphere_inertia() {
        let sphere = Shape::sphere(2.0);
        let inertia = sphere.local_inertia(5.0);
        let expected = 2.0 * 5.0 * 4.0 / 5.0;
        assert_abs_diff_eq!(inertia.x, expected);
        assert_abs_diff_eq!(inertia.y, expected);
        assert_abs_diff_eq!(inertia.z, expected);
    }

    #[test]
    fn should_bound_rotated_box_by_rotated_corners() {
        let shape = Shape::cuboid(Vector3::new(1.0, 1.0, 1.0));
        let orientation = Orientation::from_axis_angle(&Vector3::z_axis(), FRAC_PI_4);
        let aabb = shape.world_aabb(&Position::origin(), &orientation);
        let expected = 2.0_f64.sqrt();
        assert_abs_diff_eq!(aabb.upper.x, expected, epsilon = 1e-12);
        assert_abs_diff_eq!(aabb.upper.y, expected, epsilon = 1e-12);
        assert_abs_diff_eq!(aabb.upper.z, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn should_bound_plane_along_world_axis_normal() {
        let shape = Shape::plane();
        let aabb = shape.world_aabb(&Position::new(0.0, 0.0, 3.0), &Orientation::identity());
        assert_abs_diff_eq!(aabb.upper.z, 3.0);
        assert_eq!(aabb.lower.z, fph::NEG_INFINITY);
        assert_eq!(aabb.upper.x, fph::INFINITY);
    }

    #[test]
    fn should_assign_distinct_shape_ids() {
        let a = Shape::sphere(1.0);
        let b = Shape::sphere(1.0);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn should_tag_cylinder_but_dispatch_as_convex() {
        let cylinder = Shape::cylinder(1.0, 1.0, 2.0, 8);
        assert_eq!(cylinder.shape_type, ShapeType::CYLINDER);
        assert_eq!(cylinder.kind(), GeometryKind::Convex);
    }

    #[test]
    #[should_panic(expected = "radius cannot be negative")]
    fn should_reject_negative_sphere_radius() {
        let _ = Shape::sphere(-1.0);
    }
}
