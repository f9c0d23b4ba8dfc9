//! Triangle mesh shapes.

use crate::{aabb::Aabb, fph, quantities::Position};
use nalgebra::Vector3;

/// An indexed triangle mesh with per-triangle normals and a cached local
/// AABB. Triangle lookup for narrowphase queries is a linear scan over
/// per-triangle bounds.
#[derive(Clone, Debug)]
pub struct Trimesh {
    vertices: Vec<Position>,
    indices: Vec<[usize; 3]>,
    normals: Vec<Vector3<fph>>,
    scale: Vector3<fph>,
    local_aabb: Aabb,
    bounding_sphere_radius: fph,
}

impl Trimesh {
    pub fn new(vertices: Vec<Position>, indices: Vec<[usize; 3]>) -> Self {
        assert!(
            indices
                .iter()
                .flatten()
                .all(|&index| index < vertices.len()),
            "Trimesh index out of bounds"
        );

        let mut mesh = Self {
            vertices,
            indices,
            normals: Vec::new(),
            scale: Vector3::repeat(1.0),
            local_aabb: Aabb::empty(),
            bounding_sphere_radius: 0.0,
        };
        mesh.update_normals();
        mesh.update_local_aabb();
        mesh.update_bounding_sphere_radius();
        mesh
    }

    /// A torus in the local xy plane, useful as a non-convex test subject.
    pub fn torus(
        radius: fph,
        tube: fph,
        radial_segments: usize,
        tubular_segments: usize,
    ) -> Self {
        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        for j in 0..=radial_segments {
            for i in 0..=tubular_segments {
                let u = i as fph / tubular_segments as fph * 2.0 * std::f64::consts::PI;
                let v = j as fph / radial_segments as fph * 2.0 * std::f64::consts::PI;
                vertices.push(Position::new(
                    (radius + tube * v.cos()) * u.cos(),
                    (radius + tube * v.cos()) * u.sin(),
                    tube * v.sin(),
                ));
            }
        }
        for j in 1..=radial_segments {
            for i in 1..=tubular_segments {
                let a = (tubular_segments + 1) * j + i - 1;
                let b = (tubular_segments + 1) * (j - 1) + i - 1;
                let c = (tubular_segments + 1) * (j - 1) + i;
                let d = (tubular_segments + 1) * j + i;
                indices.push([a, b, d]);
                indices.push([b, c, d]);
            }
        }
        Self::new(vertices, indices)
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// A vertex in the mesh's (scaled) local frame.
    pub fn vertex(&self, index: usize) -> Position {
        Position::from(self.vertices[index].coords.component_mul(&self.scale))
    }

    pub fn triangle_vertices(&self, triangle: usize) -> [Position; 3] {
        let [a, b, c] = self.indices[triangle];
        [self.vertex(a), self.vertex(b), self.vertex(c)]
    }

    pub fn triangle_normal(&self, triangle: usize) -> Vector3<fph> {
        self.normals[triangle]
    }

    pub fn scale(&self) -> &Vector3<fph> {
        &self.scale
    }

    pub fn set_scale(&mut self, scale: Vector3<fph>) {
        assert!(
            scale.iter().all(|s| *s > 0.0),
            "Trimesh scale must be positive"
        );
        self.scale = scale;
        self.update_normals();
        self.update_local_aabb();
        self.update_bounding_sphere_radius();
    }

    pub fn local_aabb(&self) -> &Aabb {
        &self.local_aabb
    }

    pub fn bounding_sphere_radius(&self) -> fph {
        self.bounding_sphere_radius
    }

    /// Indices of all triangles whose bounds overlap the local-frame query
    /// box.
    pub fn triangles_in_aabb(&self, aabb: &Aabb) -> Vec<usize> {
        (0..self.triangle_count())
            .filter(|&triangle| {
                let corners = self.triangle_vertices(triangle);
                Aabb::from_points(corners.iter(), None, None, 0.0).overlaps(aabb)
            })
            .collect()
    }

    fn update_normals(&mut self) {
        self.normals = self
            .indices
            .iter()
            .map(|&[a, b, c]| {
                let va = self.vertex_raw_scaled(a);
                let vb = self.vertex_raw_scaled(b);
                let vc = self.vertex_raw_scaled(c);
                let normal = (vb - va).cross(&(vc - va));
                let norm = normal.norm();
                if norm > 0.0 { normal / norm } else { normal }
            })
            .collect();
    }

    fn vertex_raw_scaled(&self, index: usize) -> Position {
        Position::from(self.vertices[index].coords.component_mul(&self.scale))
    }

    fn update_local_aabb(&mut self) {
        let scale = self.scale;
        self.local_aabb = Aabb::from_points(
            self.vertices
                .iter()
                .map(|v| Position::from(v.coords.component_mul(&scale)))
                .collect::<Vec<_>>()
                .iter(),
            None,
            None,
            0.0,
        );
    }

    fn update_bounding_sphere_radius(&mut self) {
        self.bounding_sphere_radius = (0..self.vertex_count())
            .map(|index| self.vertex(index).coords.norm_squared())
            .fold(0.0, fph::max)
            .sqrt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn single_triangle() -> Trimesh {
        Trimesh::new(
            vec![
                Position::new(0.0, 0.0, 0.0),
                Position::new(1.0, 0.0, 0.0),
                Position::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2]],
        )
    }

    #[test]
    fn should_compute_unit_triangle_normal() {
        let mesh = single_triangle();
        let normal = mesh.triangle_normal(0);
        assert_abs_diff_eq!(normal, Vector3::z(), epsilon = 1e-12);
    }

    #[test]
    fn should_scale_vertices_and_bounds() {
        let mut mesh = single_triangle();
        mesh.set_scale(Vector3::new(2.0, 3.0, 1.0));
        assert_abs_diff_eq!(mesh.vertex(1).x, 2.0);
        assert_abs_diff_eq!(mesh.local_aabb().upper.y, 3.0);
        assert_abs_diff_eq!(mesh.bounding_sphere_radius(), 3.0);
    }

    #[test]
    fn should_find_triangles_overlapping_query_box() {
        let mesh = single_triangle();
        let hits = mesh.triangles_in_aabb(&Aabb::new(
            Position::new(-0.1, -0.1, -0.1),
            Position::new(0.1, 0.1, 0.1),
        ));
        assert_eq!(hits, vec![0]);

        let misses = mesh.triangles_in_aabb(&Aabb::new(
            Position::new(5.0, 5.0, 5.0),
            Position::new(6.0, 6.0, 6.0),
        ));
        assert!(misses.is_empty());
    }

    #[test]
    fn should_build_closed_torus() {
        let torus = Trimesh::torus(1.0, 0.25, 8, 12);
        assert_eq!(torus.triangle_count(), 2 * 8 * 12);
        assert!(torus.bounding_sphere_radius() > 1.0);
    }
}
