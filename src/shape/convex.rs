//! Convex polyhedra and the separating-axis test / face-clipping machinery
//! backing the convex narrowphase handlers.

use crate::{
    aabb::Aabb,
    fph,
    quantities::{Orientation, Position},
};
use nalgebra::Vector3;
use tinyvec::TinyVec;

const PARALLEL_EPSILON: fph = 1e-6;

/// A convex polyhedron given by vertices and faces whose indices wind
/// counter-clockwise seen from outside. Face normals point out of the hull.
#[derive(Clone, Debug)]
pub struct ConvexPolyhedron {
    pub vertices: Vec<Position>,
    pub faces: Vec<Vec<usize>>,
    pub face_normals: Vec<Vector3<fph>>,
    /// Normalized edge directions with parallel duplicates removed, used for
    /// edge-cross-edge separating axis candidates.
    pub unique_edges: Vec<Vector3<fph>>,
    /// If present, face normal candidates are restricted to these axes
    /// (exploits symmetry of boxes and cylinders).
    pub unique_axes: Option<Vec<Vector3<fph>>>,
    bounding_sphere_radius: fph,
}

/// A contact point produced by clipping one hull's incident face against
/// another's reference face. `depth` is negative for penetrating points.
#[derive(Clone, Copy, Debug)]
pub struct ClippedPoint {
    pub point: Position,
    pub normal: Vector3<fph>,
    pub depth: fph,
}

impl Default for ClippedPoint {
    fn default() -> Self {
        Self {
            point: Position::origin(),
            normal: Vector3::zeros(),
            depth: 0.0,
        }
    }
}

impl ConvexPolyhedron {
    pub fn new(
        vertices: Vec<Position>,
        faces: Vec<Vec<usize>>,
        unique_axes: Option<Vec<Vector3<fph>>>,
    ) -> Self {
        assert!(!vertices.is_empty(), "Convex polyhedron must have vertices");
        assert!(
            faces.iter().all(|face| face.len() >= 3),
            "Convex polyhedron faces must have at least three vertices"
        );
        assert!(
            faces
                .iter()
                .flatten()
                .all(|&index| index < vertices.len()),
            "Convex polyhedron face index out of bounds"
        );

        let face_normals = compute_face_normals(&vertices, &faces);
        let unique_edges = compute_unique_edges(&vertices, &faces);
        let bounding_sphere_radius = vertices
            .iter()
            .map(|v| v.coords.norm())
            .fold(0.0, fph::max);

        Self {
            vertices,
            faces,
            face_normals,
            unique_edges,
            unique_axes,
            bounding_sphere_radius,
        }
    }

    /// The axis-aligned box hull with the given half extents.
    pub fn cuboid(half_extents: &Vector3<fph>) -> Self {
        let e = half_extents;
        let vertices = vec![
            Position::new(-e.x, -e.y, -e.z),
            Position::new(e.x, -e.y, -e.z),
            Position::new(e.x, e.y, -e.z),
            Position::new(-e.x, e.y, -e.z),
            Position::new(-e.x, -e.y, e.z),
            Position::new(e.x, -e.y, e.z),
            Position::new(e.x, e.y, e.z),
            Position::new(-e.x, e.y, e.z),
        ];
        let faces = vec![
            vec![3, 2, 1, 0],
            vec![4, 5, 6, 7],
            vec![5, 4, 0, 1],
            vec![2, 3, 7, 6],
            vec![0, 4, 7, 3],
            vec![1, 2, 6, 5],
        ];
        let axes = vec![Vector3::z(), Vector3::y(), Vector3::x()];
        Self::new(vertices, faces, Some(axes))
    }

    /// A convex cylinder aligned with the local y axis.
    pub fn cylinder(radius_top: fph, radius_bottom: fph, height: fph, segments: usize) -> Self {
        assert!(segments >= 3, "Cylinder needs at least three segments");
        assert!(
            radius_top >= 0.0 && radius_bottom >= 0.0 && height > 0.0,
            "Cylinder dimensions must be non-negative with positive height"
        );

        let n = segments;
        let mut vertices = Vec::with_capacity(2 * n);
        let mut faces: Vec<Vec<usize>> = Vec::with_capacity(n + 2);
        let mut axes = Vec::new();
        let mut bottom_face = vec![0];
        let mut top_face = vec![1];

        vertices.push(Position::new(0.0, -height * 0.5, radius_bottom));
        vertices.push(Position::new(0.0, height * 0.5, radius_top));

        for i in 0..n {
            let theta = 2.0 * std::f64::consts::PI / n as fph * (i as fph + 1.0);
            let theta_n = 2.0 * std::f64::consts::PI / n as fph * (i as fph + 0.5);
            if i < n - 1 {
                vertices.push(Position::new(
                    -radius_bottom * theta.sin(),
                    -height * 0.5,
                    radius_bottom * theta.cos(),
                ));
                bottom_face.push(2 * i + 2);
                vertices.push(Position::new(
                    -radius_top * theta.sin(),
                    height * 0.5,
                    radius_top * theta.cos(),
                ));
                top_face.push(2 * i + 3);
                faces.push(vec![2 * i, 2 * i + 1, 2 * i + 3, 2 * i + 2]);
            } else {
                faces.push(vec![2 * i, 2 * i + 1, 1, 0]);
            }
            // Half of the side normals suffice as axis candidates due to the
            // hull's point symmetry.
            if n % 2 == 1 || i < n / 2 {
                axes.push(Vector3::new(-theta_n.sin(), 0.0, theta_n.cos()));
            }
        }
        faces.push(bottom_face);
        axes.push(Vector3::y());
        top_face.reverse();
        faces.push(top_face);

        Self::new(vertices, faces, Some(axes))
    }

    pub fn bounding_sphere_radius(&self) -> fph {
        self.bounding_sphere_radius
    }

    pub fn local_aabb(&self) -> Aabb {
        Aabb::from_points(self.vertices.iter(), None, None, 0.0)
    }

    pub fn world_vertex(
        &self,
        index: usize,
        position: &Position,
        orientation: &Orientation,
    ) -> Position {
        position + orientation.transform_vector(&self.vertices[index].coords)
    }

    pub fn world_face_normal(&self, face_index: usize, orientation: &Orientation) -> Vector3<fph> {
        orientation.transform_vector(&self.face_normals[face_index])
    }

    /// Projects the hull onto the world axis, returning `(min, max)`.
    pub fn project(
        &self,
        axis: &Vector3<fph>,
        position: &Position,
        orientation: &Orientation,
    ) -> (fph, fph) {
        let mut min = fph::INFINITY;
        let mut max = fph::NEG_INFINITY;
        for vertex in &self.vertices {
            let world = position + orientation.transform_vector(&vertex.coords);
            let d = world.coords.dot(axis);
            min = min.min(d);
            max = max.max(d);
        }
        (min, max)
    }

    /// Overlap depth of the two hulls along the axis, or `None` if the axis
    /// separates them.
    pub fn test_separating_axis(
        &self,
        axis: &Vector3<fph>,
        other: &Self,
        position_a: &Position,
        orientation_a: &Orientation,
        position_b: &Position,
        orientation_b: &Orientation,
    ) -> Option<fph> {
        let (min_a, max_a) = self.project(axis, position_a, orientation_a);
        let (min_b, max_b) = other.project(axis, position_b, orientation_b);
        if max_a < min_b || max_b < min_a {
            return None;
        }
        let d0 = max_a - min_b;
        let d1 = max_b - min_a;
        Some(d0.min(d1))
    }

    /// Scans face normals (or unique axes) of both hulls and edge-cross-edge
    /// candidates for the minimum-overlap axis. Returns `None` if a
    /// separating axis exists (no collision); otherwise the axis of minimum
    /// penetration, oriented to point from `other` toward `self`.
    pub fn find_separating_axis(
        &self,
        other: &Self,
        position_a: &Position,
        orientation_a: &Orientation,
        position_b: &Position,
        orientation_b: &Orientation,
    ) -> Option<Vector3<fph>> {
        let mut min_depth = fph::INFINITY;
        let mut target = Vector3::zeros();

        let mut consider = |axis: Vector3<fph>| -> bool {
            match self.test_separating_axis(
                &axis,
                other,
                position_a,
                orientation_a,
                position_b,
                orientation_b,
            ) {
                Some(depth) => {
                    if depth < min_depth {
                        min_depth = depth;
                        target = axis;
                    }
                    true
                }
                None => false,
            }
        };

        match &self.unique_axes {
            Some(axes) => {
                for axis in axes {
                    if !consider(orientation_a.transform_vector(axis)) {
                        return None;
                    }
                }
            }
            None => {
                for normal in &self.face_normals {
                    if !consider(orientation_a.transform_vector(normal)) {
                        return None;
                    }
                }
            }
        }

        match &other.unique_axes {
            Some(axes) => {
                for axis in axes {
                    if !consider(orientation_b.transform_vector(axis)) {
                        return None;
                    }
                }
            }
            None => {
                for normal in &other.face_normals {
                    if !consider(orientation_b.transform_vector(normal)) {
                        return None;
                    }
                }
            }
        }

        for edge_a in &self.unique_edges {
            let world_edge_a = orientation_a.transform_vector(edge_a);
            for edge_b in &other.unique_edges {
                let world_edge_b = orientation_b.transform_vector(edge_b);
                let mut cross = world_edge_a.cross(&world_edge_b);
                if cross.norm() < PARALLEL_EPSILON {
                    continue;
                }
                cross.normalize_mut();
                if !consider(cross) {
                    return None;
                }
            }
        }

        if (position_b - position_a).dot(&target) > 0.0 {
            target = -target;
        }
        Some(target)
    }

    /// Clips the incident face of `other` (the face most anti-parallel to the
    /// separating normal) against this hull's reference face side planes,
    /// producing penetrating contact points.
    pub fn clip_against_hull(
        &self,
        position_a: &Position,
        orientation_a: &Orientation,
        other: &Self,
        position_b: &Position,
        orientation_b: &Orientation,
        separating_normal: &Vector3<fph>,
        min_dist: fph,
        max_dist: fph,
    ) -> TinyVec<[ClippedPoint; 4]> {
        let mut result = TinyVec::new();

        // Incident face on the other hull: world normal with max dot against
        // the separating normal.
        let mut closest_face_b = None;
        let mut dmax = fph::NEG_INFINITY;
        for face_index in 0..other.faces.len() {
            let world_normal = other.world_face_normal(face_index, orientation_b);
            let d = world_normal.dot(separating_normal);
            if d > dmax {
                dmax = d;
                closest_face_b = Some(face_index);
            }
        }
        let Some(face_b) = closest_face_b else {
            return result;
        };

        let world_verts_b: Vec<Position> = other.faces[face_b]
            .iter()
            .map(|&index| other.world_vertex(index, position_b, orientation_b))
            .collect();

        self.clip_face_against_hull(
            separating_normal,
            position_a,
            orientation_a,
            world_verts_b,
            min_dist,
            max_dist,
            &mut result,
        );
        result
    }

    fn clip_face_against_hull(
        &self,
        separating_normal: &Vector3<fph>,
        position_a: &Position,
        orientation_a: &Orientation,
        incident_face: Vec<Position>,
        min_dist: fph,
        max_dist: fph,
        result: &mut TinyVec<[ClippedPoint; 4]>,
    ) {
        // Reference face: world normal most anti-parallel to the separating
        // normal.
        let mut closest_face_a = None;
        let mut dmin = fph::INFINITY;
        for face_index in 0..self.faces.len() {
            let world_normal = self.world_face_normal(face_index, orientation_a);
            let d = world_normal.dot(separating_normal);
            if d < dmin {
                dmin = d;
                closest_face_a = Some(face_index);
            }
        }
        let Some(face_a) = closest_face_a else {
            return;
        };
        let reference = &self.faces[face_a];

        // Clip the incident polygon against the side planes: the planes of
        // all faces adjacent to the reference face.
        let mut clipped_in = incident_face;
        let mut clipped_out = Vec::with_capacity(clipped_in.len() + 1);
        for edge in 0..reference.len() {
            let a = reference[edge];
            let b = reference[(edge + 1) % reference.len()];
            let Some(adjacent) = self.face_sharing_edge(face_a, a, b) else {
                continue;
            };
            let plane_normal = self.world_face_normal(adjacent, orientation_a);
            let plane_constant =
                self.plane_constant(adjacent) - plane_normal.dot(&position_a.coords);

            clip_face_against_plane(&clipped_in, &mut clipped_out, &plane_normal, plane_constant);
            std::mem::swap(&mut clipped_in, &mut clipped_out);
            clipped_out.clear();
        }

        // Keep points behind the reference face.
        let reference_normal = self.world_face_normal(face_a, orientation_a);
        let reference_constant =
            self.plane_constant(face_a) - reference_normal.dot(&position_a.coords);
        for point in clipped_in {
            let mut depth = reference_normal.dot(&point.coords) + reference_constant;
            if depth <= min_dist {
                depth = min_dist;
            }
            if depth <= max_dist && depth <= 0.0 {
                result.push(ClippedPoint {
                    point,
                    normal: reference_normal,
                    depth,
                });
            }
        }
    }

    /// Whether the local-frame point lies inside the hull.
    pub fn point_is_inside(&self, point: &Position) -> bool {
        self.faces.iter().enumerate().all(|(face_index, face)| {
            let v0 = &self.vertices[face[0]];
            self.face_normals[face_index].dot(&(point - v0)) <= 0.0
        })
    }

    /// The plane constant `c` such that `n·p + c = 0` on the face plane,
    /// in the hull's local frame.
    pub fn plane_constant(&self, face_index: usize) -> fph {
        let v0 = &self.vertices[self.faces[face_index][0]];
        -self.face_normals[face_index].dot(&v0.coords)
    }

    fn face_sharing_edge(&self, face_index: usize, a: usize, b: usize) -> Option<usize> {
        self.faces
            .iter()
            .enumerate()
            .find(|(other, face)| *other != face_index && face.contains(&a) && face.contains(&b))
            .map(|(other, _)| other)
    }
}

fn compute_face_normals(vertices: &[Position], faces: &[Vec<usize>]) -> Vec<Vector3<fph>> {
    let centroid: Vector3<fph> = vertices
        .iter()
        .map(|v| v.coords)
        .sum::<Vector3<fph>>()
        / vertices.len() as fph;

    faces
        .iter()
        .map(|face| {
            let va = &vertices[face[0]];
            let vb = &vertices[face[1]];
            let vc = &vertices[face[2]];
            let mut normal = (vb - va).cross(&(vc - va));
            let norm = normal.norm();
            debug_assert!(norm > 0.0, "Degenerate convex polyhedron face");
            normal /= norm;
            // Orient outward relative to the hull centroid.
            if normal.dot(&(va.coords - centroid)) < 0.0 {
                normal = -normal;
            }
            normal
        })
        .collect()
}

fn compute_unique_edges(vertices: &[Position], faces: &[Vec<usize>]) -> Vec<Vector3<fph>> {
    let mut edges: Vec<Vector3<fph>> = Vec::new();
    for face in faces {
        for i in 0..face.len() {
            let a = &vertices[face[i]];
            let b = &vertices[face[(i + 1) % face.len()]];
            let mut edge = b - a;
            let norm = edge.norm();
            if norm < PARALLEL_EPSILON {
                continue;
            }
            edge /= norm;
            if !edges
                .iter()
                .any(|existing| existing.dot(&edge).abs() > 1.0 - PARALLEL_EPSILON)
            {
                edges.push(edge);
            }
        }
    }
    edges
}

/// Sutherland-Hodgman clip of a polygon against a single plane, keeping the
/// half space where `n·p + c <= 0`.
fn clip_face_against_plane(
    in_vertices: &[Position],
    out_vertices: &mut Vec<Position>,
    plane_normal: &Vector3<fph>,
    plane_constant: fph,
) {
    if in_vertices.len() < 2 {
        return;
    }

    let mut first = in_vertices[in_vertices.len() - 1];
    let mut n_dot_first = plane_normal.dot(&first.coords) + plane_constant;

    for &last in in_vertices {
        let n_dot_last = plane_normal.dot(&last.coords) + plane_constant;
        if n_dot_first < 0.0 {
            if n_dot_last < 0.0 {
                out_vertices.push(last);
            } else {
                let t = n_dot_first / (n_dot_first - n_dot_last);
                out_vertices.push(first + (last - first) * t);
            }
        } else if n_dot_last < 0.0 {
            let t = n_dot_first / (n_dot_first - n_dot_last);
            out_vertices.push(first + (last - first) * t);
            out_vertices.push(last);
        }
        first = last;
        n_dot_first = n_dot_last;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn unit_cube() -> ConvexPolyhedron {
        ConvexPolyhedron::cuboid(&Vector3::new(0.5, 0.5, 0.5))
    }

    #[test]
    fn should_give_unit_outward_cuboid_face_normals() {
        let hull = unit_cube();
        for (face_index, face) in hull.faces.iter().enumerate() {
            let normal = hull.face_normals[face_index];
            assert_abs_diff_eq!(normal.norm(), 1.0, epsilon = 1e-12);
            let v0 = hull.vertices[face[0]];
            assert!(normal.dot(&v0.coords) > 0.0);
        }
    }

    #[test]
    fn should_deduplicate_parallel_cuboid_edges() {
        let hull = unit_cube();
        assert_eq!(hull.unique_edges.len(), 3);
    }

    #[test]
    fn should_find_no_overlap_axis_for_separated_cubes() {
        let a = unit_cube();
        let b = unit_cube();
        let axis = a.find_separating_axis(
            &b,
            &Position::origin(),
            &Orientation::identity(),
            &Position::new(3.0, 0.0, 0.0),
            &Orientation::identity(),
        );
        assert!(axis.is_none());
    }

    #[test]
    fn should_find_min_penetration_axis_for_overlapping_cubes() {
        let a = unit_cube();
        let b = unit_cube();
        let axis = a
            .find_separating_axis(
                &b,
                &Position::origin(),
                &Orientation::identity(),
                &Position::new(0.9, 0.1, 0.0),
                &Orientation::identity(),
            )
            .unwrap();
        // Minimum overlap along x; axis points from B toward A.
        assert_abs_diff_eq!(axis.x, -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(axis.y, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn should_clip_face_overlap_into_contact_manifold() {
        let a = unit_cube();
        let b = unit_cube();
        let position_b = Position::new(0.05, 0.05, 0.95);
        let separating_normal = a
            .find_separating_axis(
                &b,
                &Position::origin(),
                &Orientation::identity(),
                &position_b,
                &Orientation::identity(),
            )
            .unwrap();
        let contacts = a.clip_against_hull(
            &Position::origin(),
            &Orientation::identity(),
            &b,
            &position_b,
            &Orientation::identity(),
            &separating_normal,
            -100.0,
            100.0,
        );
        assert_eq!(contacts.len(), 4);
        for contact in &contacts {
            assert!(contact.depth <= 0.0);
            assert_abs_diff_eq!(contact.depth, -0.05, epsilon = 1e-9);
        }
    }

    #[test]
    fn should_classify_points_against_hull_interior() {
        let hull = unit_cube();
        assert!(hull.point_is_inside(&Position::new(0.0, 0.0, 0.0)));
        assert!(hull.point_is_inside(&Position::new(0.49, 0.49, 0.49)));
        assert!(!hull.point_is_inside(&Position::new(0.6, 0.0, 0.0)));
    }

    #[test]
    fn should_build_cylinder_with_expected_vertex_count() {
        let cylinder = ConvexPolyhedron::cylinder(1.0, 1.0, 2.0, 8);
        assert_eq!(cylinder.vertices.len(), 16);
        assert_eq!(cylinder.faces.len(), 10);
        assert_abs_diff_eq!(
            cylinder.bounding_sphere_radius(),
            (1.0_f64 + 1.0).sqrt(),
            epsilon = 1e-12
        );
    }
}
