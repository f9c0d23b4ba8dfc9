//! Ray casting against shapes and bodies.

use crate::{
    aabb::Aabb,
    body::Body,
    fph,
    quantities::{Orientation, Position, point_to_local_frame, point_to_world_frame},
    shape::{Geometry, convex::ConvexPolyhedron, heightfield::Heightfield, trimesh::Trimesh},
};
use nalgebra::Vector3;

const PARALLEL_EPSILON: fph = 1e-12;

/// How many intersections a cast collects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RayMode {
    /// Stop at the first intersection found, in traversal order.
    Any,
    /// Keep only the intersection closest to the ray origin.
    Closest,
    /// Collect every intersection.
    All,
}

/// A single ray-shape intersection.
#[derive(Clone, Copy, Debug)]
pub struct RaycastHit {
    pub point: Position,
    pub normal: Vector3<fph>,
    /// Distance from the ray origin to the hit point.
    pub distance: fph,
    pub body_index: usize,
    pub shape_id: u32,
}

/// Collected intersections of one cast.
#[derive(Clone, Debug, Default)]
pub struct RaycastResult {
    hits: Vec<RaycastHit>,
    done: bool,
}

impl RaycastResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_hit(&self) -> bool {
        !self.hits.is_empty()
    }

    pub fn hits(&self) -> &[RaycastHit] {
        &self.hits
    }

    pub fn into_hits(self) -> Vec<RaycastHit> {
        self.hits
    }

    /// The closest hit collected so far.
    pub fn closest(&self) -> Option<&RaycastHit> {
        self.hits
            .iter()
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    /// Whether traversal can stop early.
    pub fn is_done(&self) -> bool {
        self.done
    }

    fn report(&mut self, mode: RayMode, hit: RaycastHit) {
        match mode {
            RayMode::All => self.hits.push(hit),
            RayMode::Any => {
                self.hits = vec![hit];
                self.done = true;
            }
            RayMode::Closest => {
                if self
                    .hits
                    .first()
                    .is_none_or(|closest| hit.distance < closest.distance)
                {
                    self.hits = vec![hit];
                }
            }
        }
    }
}

/// A finite ray segment with cast options.
#[derive(Clone, Debug)]
pub struct Ray {
    pub from: Position,
    pub to: Position,
    pub mode: RayMode,
    pub collision_filter_group: u32,
    pub collision_filter_mask: u32,
    /// Skip hits whose surface normal points along the ray direction.
    pub skip_backfaces: bool,
    /// Ignore bodies and shapes with collision response disabled.
    pub check_collision_response: bool,
}

impl Ray {
    pub fn new(from: Position, to: Position) -> Self {
        Self {
            from,
            to,
            mode: RayMode::Any,
            collision_filter_group: u32::MAX,
            collision_filter_mask: u32::MAX,
            skip_backfaces: false,
            check_collision_response: true,
        }
    }

    pub fn with_mode(mut self, mode: RayMode) -> Self {
        self.mode = mode;
        self
    }

    /// The world AABB covered by the segment, used for the broadphase query.
    pub fn aabb(&self) -> Aabb {
        Aabb::new(self.from.inf(&self.to), self.from.sup(&self.to))
    }

    fn direction(&self) -> Vector3<fph> {
        (self.to - self.from)
            .try_normalize(0.0)
            .unwrap_or_else(Vector3::z)
    }

    fn length(&self) -> fph {
        (self.to - self.from).norm()
    }

    /// Casts against every shape of the body.
    pub fn intersect_body(&self, body: &Body, result: &mut RaycastResult) {
        if self.check_collision_response && !body.collision_response {
            return;
        }
        if self.collision_filter_mask & body.collision_filter_group == 0
            || body.collision_filter_mask & self.collision_filter_group == 0
        {
            return;
        }

        for (index, shape) in body.shapes.iter().enumerate() {
            if result.is_done() {
                break;
            }
            if self.check_collision_response && !shape.collision_response {
                continue;
            }
            let (position, orientation) = body.shape_world_pose(index);
            self.intersect_shape(
                &shape.geometry,
                &position,
                &orientation,
                body.index,
                shape.id,
                result,
            );
        }
    }

    fn intersect_shape(
        &self,
        geometry: &Geometry,
        position: &Position,
        orientation: &Orientation,
        body_index: usize,
        shape_id: u32,
        result: &mut RaycastResult,
    ) {
        // Perpendicular distance from the shape center to the ray line.
        let to_center = position - self.from;
        let along = to_center.dot(&self.direction());
        let closest_on_line = self.from + self.direction() * along;
        if (position - closest_on_line).norm() > geometry.bounding_sphere_radius() {
            return;
        }

        match geometry {
            Geometry::Sphere(sphere) => {
                self.intersect_sphere(sphere.radius, position, body_index, shape_id, result);
            }
            Geometry::Plane => {
                self.intersect_plane(position, orientation, body_index, shape_id, result);
            }
            Geometry::Box(_) | Geometry::Convex(_) => {
                if let Some(convex) = geometry.as_convex() {
                    self.intersect_convex(
                        convex, position, orientation, body_index, shape_id, result,
                    );
                }
            }
            Geometry::Heightfield(heightfield) => {
                self.intersect_heightfield(
                    heightfield,
                    position,
                    orientation,
                    body_index,
                    shape_id,
                    result,
                );
            }
            Geometry::Trimesh(trimesh) => {
                self.intersect_trimesh(
                    trimesh,
                    position,
                    orientation,
                    body_index,
                    shape_id,
                    result,
                );
            }
            // A particle has no extent to hit.
            Geometry::Particle => {}
        }
    }

    fn report(
        &self,
        normal: Vector3<fph>,
        point: Position,
        body_index: usize,
        shape_id: u32,
        result: &mut RaycastResult,
    ) {
        if self.skip_backfaces && normal.dot(&self.direction()) > 0.0 {
            return;
        }
        let distance = (point - self.from).norm();
        if distance > self.length() {
            return;
        }
        result.report(
            self.mode,
            RaycastHit {
                point,
                normal,
                distance,
                body_index,
                shape_id,
            },
        );
    }

    /// Quadratic segment-sphere intersection; both roots inside the segment
    /// are reported, entry point first.
    fn intersect_sphere(
        &self,
        radius: fph,
        center: &Position,
        body_index: usize,
        shape_id: u32,
        result: &mut RaycastResult,
    ) {
        let d = self.to - self.from;
        let offset = self.from - center;
        let a = d.dot(&d);
        let b = 2.0 * d.dot(&offset);
        let c = offset.norm_squared() - radius * radius;

        let delta = b * b - 4.0 * a * c;
        if delta < 0.0 || a == 0.0 {
            return;
        }
        let roots = if delta == 0.0 {
            [Some(-b / (2.0 * a)), None]
        } else {
            let sqrt_delta = delta.sqrt();
            [
                Some((-b - sqrt_delta) / (2.0 * a)),
                Some((-b + sqrt_delta) / (2.0 * a)),
            ]
        };
        for t in roots.into_iter().flatten() {
            if !(0.0..=1.0).contains(&t) || result.is_done() {
                continue;
            }
            let point = self.from + d * t;
            let normal = (point - center).try_normalize(0.0).unwrap_or_else(Vector3::z);
            self.report(normal, point, body_index, shape_id, result);
        }
    }

    fn intersect_plane(
        &self,
        position: &Position,
        orientation: &Orientation,
        body_index: usize,
        shape_id: u32,
        result: &mut RaycastResult,
    ) {
        let normal = orientation.transform_vector(&Vector3::z());

        // The segment must cross the plane.
        let from_side = normal.dot(&(self.from - position));
        let to_side = normal.dot(&(self.to - position));
        if from_side * to_side > 0.0 {
            return;
        }

        let direction = self.direction();
        let n_dot_dir = normal.dot(&direction);
        if n_dot_dir.abs() < PARALLEL_EPSILON {
            return;
        }
        let t = -from_side / n_dot_dir;
        if t < 0.0 {
            return;
        }
        let point = self.from + direction * t;
        self.report(normal, point, body_index, shape_id, result);
    }

    /// Face scan: intersect the ray with each face plane and test the hit
    /// point against the face polygon by triangle fan.
    fn intersect_convex(
        &self,
        convex: &ConvexPolyhedron,
        position: &Position,
        orientation: &Orientation,
        body_index: usize,
        shape_id: u32,
        result: &mut RaycastResult,
    ) {
        let direction = self.direction();

        for (face_index, face) in convex.faces.iter().enumerate() {
            if result.is_done() {
                return;
            }
            let normal = convex.world_face_normal(face_index, orientation);
            let dot = direction.dot(&normal);
            if dot.abs() < PARALLEL_EPSILON {
                continue;
            }

            let a = convex.world_vertex(face[0], position, orientation);
            let scalar = (normal.dot(&a.coords) - normal.dot(&self.from.coords)) / dot;
            if scalar < 0.0 {
                continue;
            }
            let intersect = self.from + direction * scalar;

            for fan in 1..face.len() - 1 {
                let b = convex.world_vertex(face[fan], position, orientation);
                let c = convex.world_vertex(face[fan + 1], position, orientation);
                if point_in_triangle(&intersect, &a, &b, &c)
                    || point_in_triangle(&intersect, &b, &a, &c)
                {
                    self.report(normal, intersect, body_index, shape_id, result);
                    break;
                }
            }
        }
    }

    /// Grid walk: visit cells whose AABB the local-frame segment passes
    /// through and cast against both triangle pillars of each.
    #[allow(clippy::too_many_arguments)]
    fn intersect_heightfield(
        &self,
        heightfield: &Heightfield,
        position: &Position,
        orientation: &Orientation,
        body_index: usize,
        shape_id: u32,
        result: &mut RaycastResult,
    ) {
        let local_from = point_to_local_frame(position, orientation, &self.from);
        let local_to = point_to_local_frame(position, orientation, &self.to);

        let lower = local_from.inf(&local_to);
        let upper = local_from.sup(&local_to);
        let Some((i_min_x, i_min_y)) = heightfield.index_of_position(lower.x, lower.y, true)
        else {
            return;
        };
        let Some((i_max_x, i_max_y)) = heightfield.index_of_position(upper.x, upper.y, true)
        else {
            return;
        };

        for i in i_min_x..=i_max_x {
            for j in i_min_y..=i_max_y {
                if result.is_done() {
                    return;
                }
                if !heightfield
                    .aabb_at_index(i, j)
                    .overlaps_ray_segment(&local_from, &local_to)
                {
                    continue;
                }
                for upper_triangle in [false, true] {
                    let (pillar, offset) =
                        heightfield.convex_triangle_pillar(i, j, upper_triangle);
                    let world_pillar =
                        point_to_world_frame(position, orientation, &Position::from(offset));
                    self.intersect_convex(
                        &pillar,
                        &world_pillar,
                        orientation,
                        body_index,
                        shape_id,
                        result,
                    );
                }
            }
        }
    }

    /// Local triangle scan over the triangles whose bounds the segment's
    /// local AABB touches.
    fn intersect_trimesh(
        &self,
        trimesh: &Trimesh,
        position: &Position,
        orientation: &Orientation,
        body_index: usize,
        shape_id: u32,
        result: &mut RaycastResult,
    ) {
        let local_from = point_to_local_frame(position, orientation, &self.from);
        let local_to = point_to_local_frame(position, orientation, &self.to);
        let local_direction = orientation.inverse_transform_vector(&self.direction());
        let local_aabb = Aabb::new(local_from.inf(&local_to), local_from.sup(&local_to));

        for triangle in trimesh.triangles_in_aabb(&local_aabb) {
            if result.is_done() {
                return;
            }
            let [a, b, c] = trimesh.triangle_vertices(triangle);
            let normal = trimesh.triangle_normal(triangle);

            let dot = local_direction.dot(&normal);
            if dot.abs() < PARALLEL_EPSILON {
                continue;
            }
            let scalar = (normal.dot(&a.coords) - normal.dot(&local_from.coords)) / dot;
            if scalar < 0.0 {
                continue;
            }
            let local_intersect = local_from + local_direction * scalar;
            if !point_in_triangle(&local_intersect, &a, &b, &c) {
                continue;
            }
            let point = point_to_world_frame(position, orientation, &local_intersect);
            let world_normal = orientation.transform_vector(&normal);
            self.report(world_normal, point, body_index, shape_id, result);
        }
    }
}

/// Barycentric point-in-triangle test in 3D; the point is assumed to lie in
/// the triangle's plane.
pub(crate) fn point_in_triangle(p: &Position, a: &Position, b: &Position, c: &Position) -> bool {
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;
    let dot00 = v0.dot(&v0);
    let dot01 = v0.dot(&v1);
    let dot02 = v0.dot(&v2);
    let dot11 = v1.dot(&v1);
    let dot12 = v1.dot(&v2);
    let u = dot11 * dot02 - dot01 * dot12;
    let v = dot00 * dot12 - dot01 * dot02;
    u >= 0.0 && v >= 0.0 && u + v < dot00 * dot11 - dot01 * dot01
}
