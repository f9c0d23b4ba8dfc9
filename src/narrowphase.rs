//! Narrowphase contact generation: turns candidate body pairs into contact
//! and friction equations.

use crate::{
    aabb::Aabb,
    body::{Body, BodyType},
    equation::{Equation, EquationKind},
    fph,
    material::{ContactMaterial, ContactMaterialTable},
    quantities::{Orientation, Position, point_to_local_frame, point_to_world_frame},
    ray::point_in_triangle,
    shape::{
        Geometry, GeometryKind,
        convex::ConvexPolyhedron,
        heightfield::Heightfield,
        trimesh::Trimesh,
    },
};
use nalgebra::Vector3;

/// Per-step inputs for contact generation.
#[derive(Debug)]
pub struct NarrowphaseParams<'a> {
    pub dt: fph,
    pub gravity: Vector3<fph>,
    pub contact_materials: &'a ContactMaterialTable,
    pub default_contact_material: ContactMaterial,
}

/// Body pair context shared by all handlers. `body_a` corresponds to the
/// first shape of the canonically ordered geometry pair.
#[derive(Clone, Copy)]
struct PairInfo<'a> {
    body_a: &'a Body,
    body_b: &'a Body,
    enabled: bool,
}

/// Generates contact and friction equations from broadphase pairs. Handlers
/// are selected by matching on the canonically ordered pair of geometry
/// kinds; boxes dispatch through their convex polyhedron representation.
#[derive(Debug, Default)]
pub struct Narrowphase {
    pub contact_equations: Vec<Equation>,
    pub friction_equations: Vec<Equation>,
    /// Replace the two friction equations per contact with a single averaged
    /// pair per manifold for the multi-contact handlers.
    pub enable_friction_reduction: bool,
    /// Body id pairs whose shapes intersected this step, including pairs
    /// that produce no equations (kinematic/static combinations).
    pub body_overlaps: Vec<(u32, u32)>,
    /// Shape id pairs that intersected this step.
    pub shape_overlaps: Vec<(u32, u32)>,
    current_contact_material: ContactMaterial,
    current_dt: fph,
    gravity: Vector3<fph>,
}

impl Narrowphase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs contact generation for all candidate pairs against the body set.
    pub fn generate_contacts(
        &mut self,
        pairs: &[(usize, usize)],
        bodies: &[Body],
        params: &NarrowphaseParams<'_>,
    ) {
        self.contact_equations.clear();
        self.friction_equations.clear();
        self.body_overlaps.clear();
        self.shape_overlaps.clear();
        self.current_dt = params.dt;
        self.gravity = params.gravity;

        for &(a, b) in pairs {
            let (body_a, body_b) = (&bodies[a], &bodies[b]);

            let body_contact_material = match (body_a.material, body_b.material) {
                (Some(ma), Some(mb)) => params.contact_materials.get(ma, mb).copied(),
                _ => None,
            };

            // Kinematic bodies never get solved against other immobile
            // bodies; such pairs are only tested for overlap events.
            let kinematic_a = body_a.body_type.contains(BodyType::KINEMATIC);
            let kinematic_b = body_b.body_type.contains(BodyType::KINEMATIC);
            let static_a = body_a.body_type.contains(BodyType::STATIC);
            let static_b = body_b.body_type.contains(BodyType::STATIC);
            let just_test = (kinematic_a && static_b)
                || (static_a && kinematic_b)
                || (kinematic_a && kinematic_b);

            for i in 0..body_a.shapes.len() {
                let (xi, qi) = body_a.shape_world_pose(i);
                let si = &body_a.shapes[i];
                for j in 0..body_b.shapes.len() {
                    let (xj, qj) = body_b.shape_world_pose(j);
                    let sj = &body_b.shapes[j];

                    if si.collision_filter_mask & sj.collision_filter_group == 0
                        || sj.collision_filter_mask & si.collision_filter_group == 0
                    {
                        continue;
                    }
                    if (xj - xi).norm()
                        > si.bounding_sphere_radius() + sj.bounding_sphere_radius()
                    {
                        continue;
                    }

                    let shape_contact_material = match (si.material, sj.material) {
                        (Some(ma), Some(mb)) => params.contact_materials.get(ma, mb).copied(),
                        _ => None,
                    };
                    self.current_contact_material = shape_contact_material
                        .or(body_contact_material)
                        .unwrap_or(params.default_contact_material);

                    let enabled = body_a.collision_response
                        && body_b.collision_response
                        && si.collision_response
                        && sj.collision_response;

                    // Canonical ordering: the geometry kind enum order
                    // decides which body plays the "A" role.
                    let intersected = if si.kind() > sj.kind() {
                        let info = PairInfo {
                            body_a: body_b,
                            body_b: body_a,
                            enabled,
                        };
                        self.resolve(&info, &sj.geometry, &si.geometry, &xj, &qj, &xi, &qi, just_test)
                    } else {
                        let info = PairInfo {
                            body_a,
                            body_b,
                            enabled,
                        };
                        self.resolve(&info, &si.geometry, &sj.geometry, &xi, &qi, &xj, &qj, just_test)
                    };

                    if intersected {
                        self.body_overlaps.push((body_a.id, body_b.id));
                        self.shape_overlaps.push((si.id, sj.id));
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve(
        &mut self,
        info: &PairInfo<'_>,
        geometry_a: &Geometry,
        geometry_b: &Geometry,
        xi: &Position,
        qi: &Orientation,
        xj: &Position,
        qj: &Orientation,
        just_test: bool,
    ) -> bool {
        use GeometryKind::{Box as BoxKind, Convex, Heightfield as Field, Particle, Plane, Sphere, Trimesh as Mesh};
        match (geometry_a.kind(), geometry_b.kind()) {
            (Sphere, Sphere) => {
                let (Geometry::Sphere(sa), Geometry::Sphere(sb)) = (geometry_a, geometry_b)
                else {
                    return false;
                };
                self.sphere_sphere(info, sa.radius, sb.radius, xi, xj, just_test)
            }
            (Sphere, Plane) => {
                let Geometry::Sphere(sphere) = geometry_a else {
                    return false;
                };
                self.sphere_plane(info, sphere.radius, xi, xj, qj, just_test)
            }
            (Sphere, BoxKind | Convex) => {
                let (Geometry::Sphere(sphere), Some(convex)) =
                    (geometry_a, geometry_b.as_convex())
                else {
                    return false;
                };
                self.sphere_convex(info, sphere.radius, convex, xi, xj, qj, just_test)
            }
            (Sphere, Particle) => {
                let Geometry::Sphere(sphere) = geometry_a else {
                    return false;
                };
                self.sphere_particle(info, sphere.radius, xi, xj, just_test)
            }
            (Sphere, Field) => {
                let (Geometry::Sphere(sphere), Geometry::Heightfield(heightfield)) =
                    (geometry_a, geometry_b)
                else {
                    return false;
                };
                self.sphere_heightfield(info, sphere.radius, heightfield, xi, xj, qj, just_test)
            }
            (Sphere, Mesh) => {
                let (Geometry::Sphere(sphere), Geometry::Trimesh(trimesh)) =
                    (geometry_a, geometry_b)
                else {
                    return false;
                };
                self.sphere_trimesh(info, sphere.radius, trimesh, xi, xj, qj, just_test)
            }
            (Plane, BoxKind | Convex) => {
                let Some(convex) = geometry_b.as_convex() else {
                    return false;
                };
                self.plane_convex(info, convex, xi, qi, xj, qj, just_test)
            }
            (Plane, Particle) => self.plane_particle(info, xi, qi, xj, just_test),
            (Plane, Mesh) => {
                let Geometry::Trimesh(trimesh) = geometry_b else {
                    return false;
                };
                self.plane_trimesh(info, trimesh, xi, qi, xj, qj, just_test)
            }
            (BoxKind | Convex, BoxKind | Convex) => {
                let (Some(convex_a), Some(convex_b)) =
                    (geometry_a.as_convex(), geometry_b.as_convex())
                else {
                    return false;
                };
                self.convex_convex(info, convex_a, convex_b, xi, qi, xj, qj, just_test)
            }
            (BoxKind | Convex, Particle) => {
                let Some(convex) = geometry_a.as_convex() else {
                    return false;
                };
                self.convex_particle(info, convex, xi, qi, xj, just_test)
            }
            (BoxKind | Convex, Field) => {
                let (Some(convex), Geometry::Heightfield(heightfield)) =
                    (geometry_a.as_convex(), geometry_b)
                else {
                    return false;
                };
                self.convex_heightfield(info, convex, heightfield, xi, qi, xj, qj, just_test)
            }
            // Remaining combinations have no handler.
            _ => false,
        }
    }

    fn create_contact_equation(
        &self,
        info: &PairInfo<'_>,
        ri: Vector3<fph>,
        rj: Vector3<fph>,
        ni: Vector3<fph>,
    ) -> Equation {
        let cm = self.current_contact_material;
        let mut equation = Equation::contact(info.body_a.index, info.body_b.index, 1e6);
        equation.enabled = info.enabled;
        equation.set_spook_params(
            cm.contact_equation_stiffness,
            cm.contact_equation_relaxation,
            self.current_dt,
        );
        equation.kind = EquationKind::Contact {
            ri,
            rj,
            ni,
            restitution: cm.restitution,
        };
        equation
    }

    /// Creates the two tangential friction equations for the most recent
    /// contact. The slip force is the fixed bound `mu * |g| * reduced mass`.
    fn create_friction_equations_from_contact(&mut self, info: &PairInfo<'_>) -> bool {
        let cm = self.current_contact_material;
        if cm.friction <= 0.0 {
            return false;
        }
        let Some(contact) = self.contact_equations.last() else {
            return false;
        };
        let EquationKind::Contact { ri, rj, ni, .. } = contact.kind else {
            return false;
        };
        let enabled = contact.enabled;

        let mug = cm.friction * self.gravity.norm();
        let mut reduced_mass = info.body_a.inv_mass + info.body_b.inv_mass;
        if reduced_mass > 0.0 {
            reduced_mass = 1.0 / reduced_mass;
        }
        let slip_force = mug * reduced_mass;

        let (t1, t2) = tangents(&ni);
        for t in [t1, t2] {
            let mut equation =
                Equation::friction(info.body_a.index, info.body_b.index, slip_force);
            equation.enabled = enabled;
            equation.set_spook_params(
                cm.friction_equation_stiffness,
                cm.friction_equation_relaxation,
                self.current_dt,
            );
            equation.kind = EquationKind::Friction { ri, rj, t };
            self.friction_equations.push(equation);
        }
        true
    }

    /// Friction reduction: one averaged friction pair for the last
    /// `num_contacts` contacts of a manifold instead of a pair per contact.
    fn create_friction_from_average(&mut self, info: &PairInfo<'_>, num_contacts: usize) {
        if !self.create_friction_equations_from_contact(info) || num_contacts == 1 {
            return;
        }

        let mut average_normal = Vector3::zeros();
        let mut average_ri = Vector3::zeros();
        let mut average_rj = Vector3::zeros();
        let contact_count = self.contact_equations.len();
        for offset in 0..num_contacts {
            let EquationKind::Contact { ri, rj, ni, .. } =
                self.contact_equations[contact_count - 1 - offset].kind
            else {
                continue;
            };
            average_normal += ni;
            average_ri += ri;
            average_rj += rj;
        }
        let scale = 1.0 / num_contacts as fph;
        average_normal *= scale;
        average_ri *= scale;
        average_rj *= scale;

        let (t1, t2) = tangents(&average_normal);
        let friction_count = self.friction_equations.len();
        for (equation, t) in self.friction_equations[friction_count - 2..]
            .iter_mut()
            .zip([t1, t2])
        {
            equation.kind = EquationKind::Friction {
                ri: average_ri,
                rj: average_rj,
                t,
            };
        }
    }

    fn sphere_sphere(
        &mut self,
        info: &PairInfo<'_>,
        radius_a: fph,
        radius_b: fph,
        xi: &Position,
        xj: &Position,
        just_test: bool,
    ) -> bool {
        // The broadphase bounding-sphere precheck is exact for spheres.
        if just_test {
            let r = radius_a + radius_b;
            return (xj - xi).norm_squared() < r * r;
        }

        let ni = (xj - xi).try_normalize(0.0).unwrap_or_else(Vector3::z);
        let ri = ni * radius_a + (xi - info.body_a.position);
        let rj = -ni * radius_b + (xj - info.body_b.position);
        let equation = self.create_contact_equation(info, ri, rj, ni);
        self.contact_equations.push(equation);
        self.create_friction_equations_from_contact(info);
        true
    }

    fn sphere_plane(
        &mut self,
        info: &PairInfo<'_>,
        radius: fph,
        xi: &Position,
        xj: &Position,
        qj: &Orientation,
        just_test: bool,
    ) -> bool {
        // Contact normal points from the sphere into the plane.
        let ni = -qj.transform_vector(&Vector3::z());

        let point_on_plane_to_sphere = xi - xj;
        if -point_on_plane_to_sphere.dot(&ni) > radius {
            return false;
        }
        if just_test {
            return true;
        }

        let ri = ni * radius + (xi - info.body_a.position);
        // Project the sphere center onto the plane for the plane-side point.
        let plane_to_sphere_ortho = ni * ni.dot(&point_on_plane_to_sphere);
        let rj = point_on_plane_to_sphere - plane_to_sphere_ortho + (xj - info.body_b.position);

        let equation = self.create_contact_equation(info, ri, rj, ni);
        self.contact_equations.push(equation);
        self.create_friction_equations_from_contact(info);
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn sphere_convex(
        &mut self,
        info: &PairInfo<'_>,
        radius: fph,
        convex: &ConvexPolyhedron,
        xi: &Position,
        xj: &Position,
        qj: &Orientation,
        just_test: bool,
    ) -> bool {
        let radius_squared = radius * radius;

        // Corner contacts.
        for vertex in &convex.vertices {
            let world_corner = xj + qj.transform_vector(&vertex.coords);
            let sphere_to_corner = world_corner - xi;
            if sphere_to_corner.norm_squared() < radius_squared {
                if just_test {
                    return true;
                }
                let ni = sphere_to_corner
                    .try_normalize(0.0)
                    .unwrap_or_else(Vector3::z);
                let ri = ni * radius + (xi - info.body_a.position);
                let rj = world_corner - info.body_b.position;
                let equation = self.create_contact_equation(info, ri, rj, ni);
                self.contact_equations.push(equation);
                self.create_friction_equations_from_contact(info);
                return true;
            }
        }

        // Face contacts, with edge contacts as the fallback per face.
        for (face_index, face) in convex.faces.iter().enumerate() {
            let world_normal = convex.world_face_normal(face_index, qj);
            let world_point = convex.world_vertex(face[0], xj, qj);

            let closest_on_sphere = xi - world_normal * radius;
            let penetration = world_normal.dot(&(closest_on_sphere - world_point));
            if penetration >= 0.0 {
                continue;
            }

            let world_point_to_sphere = xi - world_point;
            let penetration_vec = world_normal * world_normal.dot(&world_point_to_sphere);
            let world_projected = xi - penetration_vec;

            let face_vertices: Vec<Position> = face
                .iter()
                .map(|&index| convex.world_vertex(index, xj, qj))
                .collect();

            if point_in_polygon(&face_vertices, &world_normal, &world_projected) {
                if just_test {
                    return true;
                }
                let ni = -world_normal;
                let ri = ni * radius + (xi - info.body_a.position);
                let rj = world_projected - info.body_b.position;
                let equation = self.create_contact_equation(info, ri, rj, ni);
                self.contact_equations.push(equation);
                self.create_friction_equations_from_contact(info);
                return true;
            }

            for edge in 0..face_vertices.len() {
                let v1 = face_vertices[edge];
                let v2 = face_vertices[(edge + 1) % face_vertices.len()];
                let edge_vector = v2 - v1;
                let edge_length = edge_vector.norm();
                if edge_length == 0.0 {
                    continue;
                }
                let edge_unit = edge_vector / edge_length;

                let along = (xi - v1).dot(&edge_unit);
                if along <= 0.0 || along >= edge_length {
                    continue;
                }
                let closest = v1 + edge_unit * along;
                if (xi - closest).norm_squared() < radius_squared {
                    if just_test {
                        return true;
                    }
                    let ni = (closest - xi)
                        .try_normalize(0.0)
                        .unwrap_or_else(Vector3::z);
                    let ri = ni * radius + (xi - info.body_a.position);
                    let rj = closest - info.body_b.position;
                    let equation = self.create_contact_equation(info, ri, rj, ni);
                    self.contact_equations.push(equation);
                    self.create_friction_equations_from_contact(info);
                    return true;
                }
            }
        }
        false
    }

    fn sphere_particle(
        &mut self,
        info: &PairInfo<'_>,
        radius: fph,
        xi: &Position,
        xj: &Position,
        just_test: bool,
    ) -> bool {
        let to_particle = xj - xi;
        if to_particle.norm_squared() > radius * radius {
            return false;
        }
        if just_test {
            return true;
        }

        let ni = to_particle.try_normalize(0.0).unwrap_or_else(Vector3::z);
        let ri = ni * radius + (xi - info.body_a.position);
        let rj = xj - info.body_b.position;
        let equation = self.create_contact_equation(info, ri, rj, ni);
        self.contact_equations.push(equation);
        self.create_friction_equations_from_contact(info);
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn sphere_heightfield(
        &mut self,
        info: &PairInfo<'_>,
        radius: fph,
        heightfield: &Heightfield,
        xi: &Position,
        xj: &Position,
        qj: &Orientation,
        just_test: bool,
    ) -> bool {
        let local = point_to_local_frame(xj, qj, xi);
        let w = heightfield.element_size();

        let i_min_x = ((local.x - radius) / w).floor() as isize - 1;
        let i_max_x = ((local.x + radius) / w).ceil() as isize + 1;
        let i_min_y = ((local.y - radius) / w).floor() as isize - 1;
        let i_max_y = ((local.y + radius) / w).ceil() as isize + 1;

        let last_x = heightfield.rows() as isize - 1;
        let last_y = heightfield.columns() as isize - 1;
        if i_max_x < 0 || i_max_y < 0 || i_min_x > last_x || i_min_y > last_y {
            return false;
        }
        let i_min_x = i_min_x.clamp(0, last_x) as usize;
        let i_max_x = i_max_x.clamp(0, last_x) as usize;
        let i_min_y = i_min_y.clamp(0, last_y) as usize;
        let i_max_y = i_max_y.clamp(0, last_y) as usize;

        let (min, max) = heightfield.rect_min_max(i_min_x, i_min_y, i_max_x, i_max_y);
        if local.z - radius > max || local.z + radius < min {
            return false;
        }

        let mut intersected = false;
        for i in i_min_x..i_max_x {
            for j in i_min_y..i_max_y {
                let contacts_before = self.contact_equations.len();
                for upper in [false, true] {
                    let (pillar, offset) = heightfield.convex_triangle_pillar(i, j, upper);
                    let world_pillar = point_to_world_frame(xj, qj, &Position::from(offset));
                    if self.sphere_convex(info, radius, &pillar, xi, &world_pillar, qj, just_test)
                    {
                        intersected = true;
                        if just_test {
                            return true;
                        }
                    }
                }
                if self.contact_equations.len() - contacts_before > 2 {
                    return intersected;
                }
            }
        }
        intersected
    }

    #[allow(clippy::too_many_arguments)]
    fn sphere_trimesh(
        &mut self,
        info: &PairInfo<'_>,
        radius: fph,
        trimesh: &Trimesh,
        xi: &Position,
        xj: &Position,
        qj: &Orientation,
        just_test: bool,
    ) -> bool {
        let local_sphere = point_to_local_frame(xj, qj, xi);
        let r = Vector3::repeat(radius);
        let local_aabb = Aabb::new(local_sphere - r, local_sphere + r);
        let candidates = trimesh.triangles_in_aabb(&local_aabb);
        let radius_squared = radius * radius;
        let mut intersected = false;

        // Vertex contacts.
        for &triangle in &candidates {
            for vertex in trimesh.triangle_vertices(triangle) {
                if (vertex - local_sphere).norm_squared() > radius_squared {
                    continue;
                }
                if just_test {
                    return true;
                }
                intersected = true;
                let world_vertex = point_to_world_frame(xj, qj, &vertex);
                let ni = (world_vertex - xi)
                    .try_normalize(0.0)
                    .unwrap_or_else(Vector3::z);
                let ri = ni * radius + (xi - info.body_a.position);
                let rj = world_vertex - info.body_b.position;
                let equation = self.create_contact_equation(info, ri, rj, ni);
                self.contact_equations.push(equation);
                self.create_friction_equations_from_contact(info);
            }
        }

        // Edge contacts: closest interior point of each triangle edge.
        for &triangle in &candidates {
            let vertices = trimesh.triangle_vertices(triangle);
            for edge in 0..3 {
                let v1 = vertices[edge];
                let v2 = vertices[(edge + 1) % 3];
                let edge_vector = v2 - v1;
                let edge_length = edge_vector.norm();
                if edge_length == 0.0 {
                    continue;
                }
                let edge_unit = edge_vector / edge_length;
                let along = (local_sphere - v1).dot(&edge_unit);
                if along <= 0.0 || along >= edge_length {
                    continue;
                }
                let closest = v1 + edge_unit * along;
                if (closest - local_sphere).norm_squared() >= radius_squared {
                    continue;
                }
                if just_test {
                    return true;
                }
                intersected = true;
                let world_closest = point_to_world_frame(xj, qj, &closest);
                let ni = (world_closest - xi)
                    .try_normalize(0.0)
                    .unwrap_or_else(Vector3::z);
                let ri = ni * radius + (xi - info.body_a.position);
                let rj = world_closest - info.body_b.position;
                let equation = self.create_contact_equation(info, ri, rj, ni);
                self.contact_equations.push(equation);
                self.create_friction_equations_from_contact(info);
            }
        }

        // Face contacts: sphere center projected into a triangle's plane.
        for &triangle in &candidates {
            let [a, b, c] = trimesh.triangle_vertices(triangle);
            let normal = trimesh.triangle_normal(triangle);
            let distance = (local_sphere - a).dot(&normal);
            if distance.abs() >= radius {
                continue;
            }
            let projected = local_sphere - normal * distance;
            if !point_in_triangle(&projected, &a, &b, &c) {
                continue;
            }
            if just_test {
                return true;
            }
            intersected = true;
            let world_projected = point_to_world_frame(xj, qj, &projected);
            let ni = (world_projected - xi)
                .try_normalize(0.0)
                .unwrap_or_else(Vector3::z);
            let ri = ni * radius + (xi - info.body_a.position);
            let rj = world_projected - info.body_b.position;
            let equation = self.create_contact_equation(info, ri, rj, ni);
            self.contact_equations.push(equation);
            self.create_friction_equations_from_contact(info);
        }

        intersected
    }

    #[allow(clippy::too_many_arguments)]
    fn plane_convex(
        &mut self,
        info: &PairInfo<'_>,
        convex: &ConvexPolyhedron,
        xi: &Position,
        qi: &Orientation,
        xj: &Position,
        qj: &Orientation,
        just_test: bool,
    ) -> bool {
        let world_normal = qi.transform_vector(&Vector3::z());

        let mut num_contacts = 0;
        for vertex in &convex.vertices {
            let world_vertex = xj + qj.transform_vector(&vertex.coords);
            let depth = world_normal.dot(&(world_vertex - xi));
            if depth > 0.0 {
                continue;
            }
            if just_test {
                return true;
            }

            // Plane-side contact point: vertex projected onto the plane.
            let projected = world_vertex - world_normal * depth;
            let ri = projected - info.body_a.position;
            let rj = world_vertex - info.body_b.position;
            let equation = self.create_contact_equation(info, ri, rj, world_normal);
            self.contact_equations.push(equation);
            num_contacts += 1;
            if !self.enable_friction_reduction {
                self.create_friction_equations_from_contact(info);
            }
        }
        if self.enable_friction_reduction && num_contacts > 0 {
            self.create_friction_from_average(info, num_contacts);
        }
        num_contacts > 0
    }

    fn plane_particle(
        &mut self,
        info: &PairInfo<'_>,
        xi: &Position,
        qi: &Orientation,
        xj: &Position,
        just_test: bool,
    ) -> bool {
        let world_normal = qi.transform_vector(&Vector3::z());
        let depth = world_normal.dot(&(xj - xi));
        if depth > 0.0 {
            return false;
        }
        if just_test {
            return true;
        }

        let projected = xj - world_normal * depth;
        let ri = projected - info.body_a.position;
        let rj = xj - info.body_b.position;
        let equation = self.create_contact_equation(info, ri, rj, world_normal);
        self.contact_equations.push(equation);
        self.create_friction_equations_from_contact(info);
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn plane_trimesh(
        &mut self,
        info: &PairInfo<'_>,
        trimesh: &Trimesh,
        xi: &Position,
        qi: &Orientation,
        xj: &Position,
        qj: &Orientation,
        just_test: bool,
    ) -> bool {
        let world_normal = qi.transform_vector(&Vector3::z());

        let mut intersected = false;
        for index in 0..trimesh.vertex_count() {
            let world_vertex = point_to_world_frame(xj, qj, &trimesh.vertex(index));
            let depth = world_normal.dot(&(world_vertex - xi));
            if depth > 0.0 {
                continue;
            }
            if just_test {
                return true;
            }
            intersected = true;

            let projected = world_vertex - world_normal * depth;
            let ri = projected - info.body_a.position;
            let rj = world_vertex - info.body_b.position;
            let equation = self.create_contact_equation(info, ri, rj, world_normal);
            self.contact_equations.push(equation);
            self.create_friction_equations_from_contact(info);
        }
        intersected
    }

    #[allow(clippy::too_many_arguments)]
    fn convex_convex(
        &mut self,
        info: &PairInfo<'_>,
        convex_a: &ConvexPolyhedron,
        convex_b: &ConvexPolyhedron,
        xi: &Position,
        qi: &Orientation,
        xj: &Position,
        qj: &Orientation,
        just_test: bool,
    ) -> bool {
        let Some(separating_axis) = convex_a.find_separating_axis(convex_b, xi, qi, xj, qj)
        else {
            return false;
        };
        let clipped = convex_a.clip_against_hull(
            xi,
            qi,
            convex_b,
            xj,
            qj,
            &separating_axis,
            -100.0,
            100.0,
        );
        if just_test {
            return !clipped.is_empty();
        }

        let mut num_contacts = 0;
        for point in &clipped {
            // Push the clipped point out to the reference hull's surface for
            // the A-side contact point.
            let q = point.normal * -point.depth;
            let ri = (point.point + q) - info.body_a.position;
            let rj = point.point - info.body_b.position;
            let ni = -separating_axis;
            let equation = self.create_contact_equation(info, ri, rj, ni);
            self.contact_equations.push(equation);
            num_contacts += 1;
            if !self.enable_friction_reduction {
                self.create_friction_equations_from_contact(info);
            }
        }
        if self.enable_friction_reduction && num_contacts > 0 {
            self.create_friction_from_average(info, num_contacts);
        }
        num_contacts > 0
    }

    fn convex_particle(
        &mut self,
        info: &PairInfo<'_>,
        convex: &ConvexPolyhedron,
        xi: &Position,
        qi: &Orientation,
        xj: &Position,
        just_test: bool,
    ) -> bool {
        let local = point_to_local_frame(xi, qi, xj);
        if !convex.point_is_inside(&local) {
            return false;
        }
        if just_test {
            return true;
        }

        // Face of least penetration.
        let mut min_penetration: Option<fph> = None;
        let mut penetrated_normal = Vector3::zeros();
        for (face_index, face) in convex.faces.iter().enumerate() {
            let world_normal = convex.world_face_normal(face_index, qi);
            let world_vertex = convex.world_vertex(face[0], xi, qi);
            let penetration = world_normal.dot(&(xj - world_vertex));
            if min_penetration.is_none_or(|min| penetration.abs() < min.abs()) {
                min_penetration = Some(penetration);
                penetrated_normal = world_normal;
            }
        }
        let Some(penetration) = min_penetration else {
            log::warn!("Particle inside convex hull but no penetrated face found");
            return false;
        };

        let surface_point = xj - penetrated_normal * penetration;
        let ri = surface_point - info.body_a.position;
        let rj = xj - info.body_b.position;
        let equation = self.create_contact_equation(info, ri, rj, penetrated_normal);
        self.contact_equations.push(equation);
        self.create_friction_equations_from_contact(info);
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn convex_heightfield(
        &mut self,
        info: &PairInfo<'_>,
        convex: &ConvexPolyhedron,
        heightfield: &Heightfield,
        xi: &Position,
        qi: &Orientation,
        xj: &Position,
        qj: &Orientation,
        just_test: bool,
    ) -> bool {
        let radius = convex.bounding_sphere_radius();
        let local = point_to_local_frame(xj, qj, xi);
        let w = heightfield.element_size();

        let i_min_x = ((local.x - radius) / w).floor() as isize - 1;
        let i_max_x = ((local.x + radius) / w).ceil() as isize + 1;
        let i_min_y = ((local.y - radius) / w).floor() as isize - 1;
        let i_max_y = ((local.y + radius) / w).ceil() as isize + 1;

        let last_x = heightfield.rows() as isize - 1;
        let last_y = heightfield.columns() as isize - 1;
        if i_max_x < 0 || i_max_y < 0 || i_min_x > last_x || i_min_y > last_y {
            return false;
        }
        let i_min_x = i_min_x.clamp(0, last_x) as usize;
        let i_max_x = i_max_x.clamp(0, last_x) as usize;
        let i_min_y = i_min_y.clamp(0, last_y) as usize;
        let i_max_y = i_max_y.clamp(0, last_y) as usize;

        let (min, max) = heightfield.rect_min_max(i_min_x, i_min_y, i_max_x, i_max_y);
        if local.z - radius > max || local.z + radius < min {
            return false;
        }

        let mut intersected = false;
        for i in i_min_x..i_max_x {
            for j in i_min_y..i_max_y {
                for upper in [false, true] {
                    let (pillar, offset) = heightfield.convex_triangle_pillar(i, j, upper);
                    let world_pillar = point_to_world_frame(xj, qj, &Position::from(offset));
                    if self.convex_convex(
                        info,
                        convex,
                        &pillar,
                        xi,
                        qi,
                        &world_pillar,
                        qj,
                        just_test,
                    ) {
                        intersected = true;
                        if just_test {
                            return true;
                        }
                    }
                }
            }
        }
        intersected
    }
}

/// Two arbitrary directions orthogonal to the given normal.
fn tangents(normal: &Vector3<fph>) -> (Vector3<fph>, Vector3<fph>) {
    let norm = normal.norm();
    if norm > 0.0 {
        let n = normal / norm;
        let reference = if n.x.abs() < 0.9 {
            Vector3::x()
        } else {
            Vector3::y()
        };
        let t1 = n.cross(&reference);
        let t2 = n.cross(&t1);
        (t1, t2)
    } else {
        (Vector3::x(), Vector3::y())
    }
}

/// Whether the point, assumed to lie in the polygon's plane, is inside the
/// convex polygon.
fn point_in_polygon(vertices: &[Position], normal: &Vector3<fph>, point: &Position) -> bool {
    let mut positive: Option<bool> = None;
    for i in 0..vertices.len() {
        let edge = vertices[(i + 1) % vertices.len()] - vertices[i];
        let edge_cross_normal = edge.cross(normal);
        let side = edge_cross_normal.dot(&(point - vertices[i])) > 0.0;
        match positive {
            None => positive = Some(side),
            Some(expected) if expected != side => return false,
            _ => {}
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::Material;
    use crate::shape::Shape;
    use approx::assert_abs_diff_eq;

    fn params<'a>(
        table: &'a ContactMaterialTable,
        default: ContactMaterial,
    ) -> NarrowphaseParams<'a> {
        NarrowphaseParams {
            dt: 1.0 / 60.0,
            gravity: Vector3::new(0.0, 0.0, -9.81),
            contact_materials: table,
            default_contact_material: default,
        }
    }

    fn indexed(mut bodies: Vec<Body>) -> Vec<Body> {
        for (index, body) in bodies.iter_mut().enumerate() {
            body.index = index;
        }
        bodies
    }

    #[test]
    fn should_generate_contact_between_overlapping_spheres() {
        let bodies = indexed(vec![
            Body::new(1.0).with_shape(Shape::sphere(0.5)),
            Body::new(1.0)
                .with_shape(Shape::sphere(0.5))
                .with_position(Position::new(0.9, 0.0, 0.0)),
        ]);
        let table = ContactMaterialTable::new();
        let mut narrowphase = Narrowphase::new();
        narrowphase.generate_contacts(
            &[(0, 1)],
            &bodies,
            &params(&table, ContactMaterial::default()),
        );

        assert_eq!(narrowphase.contact_equations.len(), 1);
        assert_eq!(narrowphase.friction_equations.len(), 2);
        let EquationKind::Contact { ni, ri, rj, .. } = narrowphase.contact_equations[0].kind
        else {
            panic!("expected contact equation");
        };
        assert_abs_diff_eq!(ni, Vector3::x(), epsilon = 1e-12);
        assert_abs_diff_eq!(ri, Vector3::new(0.5, 0.0, 0.0), epsilon = 1e-12);
        assert_abs_diff_eq!(rj, Vector3::new(-0.5, 0.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn should_generate_contact_for_sphere_resting_on_plane() {
        let bodies = indexed(vec![
            Body::new(1.0)
                .with_shape(Shape::sphere(1.0))
                .with_position(Position::new(0.0, 0.0, 0.95)),
            Body::new(0.0).with_shape(Shape::plane()),
        ]);
        let table = ContactMaterialTable::new();
        let mut narrowphase = Narrowphase::new();
        narrowphase.generate_contacts(
            &[(0, 1)],
            &bodies,
            &params(&table, ContactMaterial::default()),
        );

        assert_eq!(narrowphase.contact_equations.len(), 1);
        let EquationKind::Contact { ni, .. } = narrowphase.contact_equations[0].kind else {
            panic!("expected contact equation");
        };
        // Sphere is body A; the normal points down into the plane.
        assert_abs_diff_eq!(ni, -Vector3::z(), epsilon = 1e-12);
    }

    #[test]
    fn should_skip_separated_sphere_and_plane() {
        let bodies = indexed(vec![
            Body::new(1.0)
                .with_shape(Shape::sphere(1.0))
                .with_position(Position::new(0.0, 0.0, 1.5)),
            Body::new(0.0).with_shape(Shape::plane()),
        ]);
        let table = ContactMaterialTable::new();
        let mut narrowphase = Narrowphase::new();
        narrowphase.generate_contacts(
            &[(0, 1)],
            &bodies,
            &params(&table, ContactMaterial::default()),
        );
        assert!(narrowphase.contact_equations.is_empty());
        assert!(narrowphase.body_overlaps.is_empty());
    }

    #[test]
    fn should_build_four_point_manifold_for_box_on_plane() {
        let bodies = indexed(vec![
            Body::new(0.0).with_shape(Shape::plane()),
            Body::new(1.0)
                .with_shape(Shape::cuboid(Vector3::repeat(0.5)))
                .with_position(Position::new(0.0, 0.0, 0.45)),
        ]);
        let table = ContactMaterialTable::new();
        let mut narrowphase = Narrowphase::new();
        narrowphase.generate_contacts(
            &[(0, 1)],
            &bodies,
            &params(&table, ContactMaterial::default()),
        );

        assert_eq!(narrowphase.contact_equations.len(), 4);
        assert_eq!(narrowphase.friction_equations.len(), 8);
        for equation in &narrowphase.contact_equations {
            let EquationKind::Contact { ni, .. } = equation.kind else {
                panic!("expected contact equation");
            };
            assert_abs_diff_eq!(ni, Vector3::z(), epsilon = 1e-12);
        }
    }

    #[test]
    fn should_reduce_manifold_friction_to_single_pair() {
        let bodies = indexed(vec![
            Body::new(0.0).with_shape(Shape::plane()),
            Body::new(1.0)
                .with_shape(Shape::cuboid(Vector3::repeat(0.5)))
                .with_position(Position::new(0.0, 0.0, 0.45)),
        ]);
        let table = ContactMaterialTable::new();
        let mut narrowphase = Narrowphase::new();
        narrowphase.enable_friction_reduction = true;
        narrowphase.generate_contacts(
            &[(0, 1)],
            &bodies,
            &params(&table, ContactMaterial::default()),
        );
        assert_eq!(narrowphase.contact_equations.len(), 4);
        assert_eq!(narrowphase.friction_equations.len(), 2);
    }

    #[test]
    fn should_generate_contacts_for_overlapping_boxes() {
        let bodies = indexed(vec![
            Body::new(1.0).with_shape(Shape::cuboid(Vector3::repeat(0.5))),
            Body::new(1.0)
                .with_shape(Shape::cuboid(Vector3::repeat(0.5)))
                .with_position(Position::new(0.05, 0.05, 0.95)),
        ]);
        let table = ContactMaterialTable::new();
        let mut narrowphase = Narrowphase::new();
        narrowphase.generate_contacts(
            &[(0, 1)],
            &bodies,
            &params(&table, ContactMaterial::default()),
        );
        assert!(!narrowphase.contact_equations.is_empty());
        for equation in &narrowphase.contact_equations {
            let EquationKind::Contact { ni, .. } = equation.kind else {
                panic!("expected contact equation");
            };
            // Lower box is A; the normal points up toward the upper box.
            assert!(ni.z > 0.9);
        }
    }

    #[test]
    fn should_only_record_overlap_for_kinematic_static_pairs() {
        let bodies = indexed(vec![
            Body::new(1.0)
                .with_body_type(BodyType::KINEMATIC)
                .with_shape(Shape::sphere(0.5)),
            Body::new(0.0)
                .with_shape(Shape::sphere(0.5))
                .with_position(Position::new(0.5, 0.0, 0.0)),
        ]);
        let table = ContactMaterialTable::new();
        let mut narrowphase = Narrowphase::new();
        narrowphase.generate_contacts(
            &[(0, 1)],
            &bodies,
            &params(&table, ContactMaterial::default()),
        );
        assert!(narrowphase.contact_equations.is_empty());
        assert_eq!(narrowphase.body_overlaps.len(), 1);
        assert_eq!(narrowphase.shape_overlaps.len(), 1);
    }

    #[test]
    fn should_resolve_pairwise_contact_material() {
        let ice = Material::new("ice");
        let rubber = Material::new("rubber");
        let mut table = ContactMaterialTable::new();
        table.insert(
            ice.id,
            rubber.id,
            ContactMaterial {
                friction: 0.0,
                restitution: 0.9,
                ..ContactMaterial::default()
            },
        );

        let bodies = indexed(vec![
            Body::new(1.0)
                .with_material(ice.id)
                .with_shape(Shape::sphere(0.5)),
            Body::new(1.0)
                .with_material(rubber.id)
                .with_shape(Shape::sphere(0.5))
                .with_position(Position::new(0.9, 0.0, 0.0)),
        ]);
        let mut narrowphase = Narrowphase::new();
        narrowphase.generate_contacts(
            &[(0, 1)],
            &bodies,
            &params(&table, ContactMaterial::default()),
        );

        let EquationKind::Contact { restitution, .. } = narrowphase.contact_equations[0].kind
        else {
            panic!("expected contact equation");
        };
        assert_abs_diff_eq!(restitution, 0.9);
        // Zero friction: no friction equations.
        assert!(narrowphase.friction_equations.is_empty());
    }

    #[test]
    fn should_bound_friction_by_gravity_and_reduced_mass() {
        let bodies = indexed(vec![
            Body::new(2.0).with_shape(Shape::sphere(0.5)),
            Body::new(2.0)
                .with_shape(Shape::sphere(0.5))
                .with_position(Position::new(0.9, 0.0, 0.0)),
        ]);
        let table = ContactMaterialTable::new();
        let mut narrowphase = Narrowphase::new();
        narrowphase.generate_contacts(
            &[(0, 1)],
            &bodies,
            &params(&table, ContactMaterial::default()),
        );

        // mu * |g| * reduced mass = 0.3 * 9.81 * 1.0
        let expected = 0.3 * 9.81;
        assert_abs_diff_eq!(
            narrowphase.friction_equations[0].max_force,
            expected,
            epsilon = 1e-9
        );
        assert_abs_diff_eq!(
            narrowphase.friction_equations[0].min_force,
            -expected,
            epsilon = 1e-9
        );
    }

    #[test]
    fn should_find_contact_between_sphere_and_flat_heightfield() {
        let field = crate::shape::heightfield::Heightfield::new(vec![vec![0.0; 4]; 4], 1.0);
        let bodies = indexed(vec![
            Body::new(1.0)
                .with_shape(Shape::sphere(0.5))
                .with_position(Position::new(1.5, 1.5, 0.4)),
            Body::new(0.0).with_shape(Shape::heightfield(field)),
        ]);
        let table = ContactMaterialTable::new();
        let mut narrowphase = Narrowphase::new();
        narrowphase.generate_contacts(
            &[(0, 1)],
            &bodies,
            &params(&table, ContactMaterial::default()),
        );
        assert!(!narrowphase.contact_equations.is_empty());
    }

    #[test]
    fn should_find_contact_for_particle_inside_box() {
        let bodies = indexed(vec![
            Body::new(1.0).with_shape(Shape::cuboid(Vector3::repeat(0.5))),
            Body::new(1.0)
                .with_shape(Shape::particle())
                .with_position(Position::new(0.0, 0.0, 0.45)),
        ]);
        let table = ContactMaterialTable::new();
        let mut narrowphase = Narrowphase::new();
        narrowphase.generate_contacts(
            &[(0, 1)],
            &bodies,
            &params(&table, ContactMaterial::default()),
        );

        assert_eq!(narrowphase.contact_equations.len(), 1);
        let EquationKind::Contact { ni, .. } = narrowphase.contact_equations[0].kind else {
            panic!("expected contact equation");
        };
        // Least penetration is through the top face.
        assert_abs_diff_eq!(ni, Vector3::z(), epsilon = 1e-12);
    }

    #[test]
    fn should_find_contact_between_sphere_and_trimesh_face() {
        let mesh = Trimesh::new(
            vec![
                Position::new(-2.0, -2.0, 0.0),
                Position::new(2.0, -2.0, 0.0),
                Position::new(0.0, 2.0, 0.0),
            ],
            vec![[0, 1, 2]],
        );
        let bodies = indexed(vec![
            Body::new(1.0)
                .with_shape(Shape::sphere(0.5))
                .with_position(Position::new(0.0, 0.0, 0.4)),
            Body::new(0.0).with_shape(Shape::trimesh(mesh)),
        ]);
        let table = ContactMaterialTable::new();
        let mut narrowphase = Narrowphase::new();
        narrowphase.generate_contacts(
            &[(0, 1)],
            &bodies,
            &params(&table, ContactMaterial::default()),
        );
        assert!(!narrowphase.contact_equations.is_empty());
    }

    #[test]
    fn should_disable_equations_when_collision_response_is_off() {
        let mut sphere = Shape::sphere(0.5);
        sphere.collision_response = false;
        let bodies = indexed(vec![
            Body::new(1.0).with_shape(sphere),
            Body::new(1.0)
                .with_shape(Shape::sphere(0.5))
                .with_position(Position::new(0.9, 0.0, 0.0)),
        ]);
        let table = ContactMaterialTable::new();
        let mut narrowphase = Narrowphase::new();
        narrowphase.generate_contacts(
            &[(0, 1)],
            &bodies,
            &params(&table, ContactMaterial::default()),
        );
        assert!(!narrowphase.contact_equations[0].enabled);
    }

    #[test]
    fn should_make_orthonormal_tangent_frames() {
        let normal = Vector3::new(0.0, 0.0, 1.0);
        let (t1, t2) = tangents(&normal);
        assert_abs_diff_eq!(t1.dot(&normal), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(t2.dot(&normal), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(t1.dot(&t2), 0.0, epsilon = 1e-12);
    }
}
