//! Heightfield terrain shapes.

use crate::{
    aabb::Aabb,
    fph,
    quantities::Position,
    shape::convex::ConvexPolyhedron,
};
use nalgebra::Vector3;

/// A grid of height values in the local xy plane, `elementSize` apart along
/// both axes. Each grid cell is split into a lower and an upper triangle;
/// narrowphase tests run against convex "pillar" prisms extruded from the
/// triangles down past the field's minimum value.
#[derive(Clone, Debug)]
pub struct Heightfield {
    data: Vec<Vec<fph>>,
    element_size: fph,
    min_value: fph,
    max_value: fph,
}

impl Heightfield {
    pub fn new(data: Vec<Vec<fph>>, element_size: fph) -> Self {
        assert!(element_size > 0.0, "Heightfield element size must be positive");
        assert!(
            data.len() >= 2 && data[0].len() >= 2,
            "Heightfield needs at least a 2x2 grid"
        );
        assert!(
            data.iter().all(|row| row.len() == data[0].len()),
            "Heightfield rows must have equal length"
        );

        let mut heightfield = Self {
            data,
            element_size,
            min_value: 0.0,
            max_value: 0.0,
        };
        heightfield.update_min_and_max_values();
        heightfield
    }

    pub fn data(&self) -> &[Vec<fph>] {
        &self.data
    }

    pub fn element_size(&self) -> fph {
        self.element_size
    }

    pub fn min_value(&self) -> fph {
        self.min_value
    }

    pub fn max_value(&self) -> fph {
        self.max_value
    }

    /// Number of grid points along the local x axis.
    pub fn rows(&self) -> usize {
        self.data.len()
    }

    /// Number of grid points along the local y axis.
    pub fn columns(&self) -> usize {
        self.data[0].len()
    }

    pub fn set_height_at_index(&mut self, xi: usize, yi: usize, value: fph) {
        self.data[xi][yi] = value;
        self.update_min_and_max_values();
    }

    fn update_min_and_max_values(&mut self) {
        let mut min = self.data[0][0];
        let mut max = self.data[0][0];
        for row in &self.data {
            for &height in row {
                min = min.min(height);
                max = max.max(height);
            }
        }
        self.min_value = min;
        self.max_value = max;
    }

    /// The grid cell containing the local position, clamped into the valid
    /// cell range when `clamp` is set; otherwise `None` for positions outside
    /// the grid.
    pub fn index_of_position(&self, x: fph, y: fph, clamp: bool) -> Option<(usize, usize)> {
        let xi = (x / self.element_size).floor() as isize;
        let yi = (y / self.element_size).floor() as isize;
        let max_xi = self.rows() as isize - 2;
        let max_yi = self.columns() as isize - 2;
        if clamp {
            Some((
                xi.clamp(0, max_xi) as usize,
                yi.clamp(0, max_yi) as usize,
            ))
        } else if xi < 0 || yi < 0 || xi > max_xi || yi > max_yi {
            None
        } else {
            Some((xi as usize, yi as usize))
        }
    }

    /// Minimum and maximum height over the inclusive index rectangle. The
    /// minimum is conservatively the field's global minimum.
    pub fn rect_min_max(
        &self,
        i_min_x: usize,
        i_min_y: usize,
        i_max_x: usize,
        i_max_y: usize,
    ) -> (fph, fph) {
        let mut max = self.min_value;
        for row in &self.data[i_min_x..=i_max_x] {
            for &height in &row[i_min_y..=i_max_y] {
                max = max.max(height);
            }
        }
        (self.min_value, max)
    }

    /// The local-frame vertices of the lower or upper triangle of a cell.
    pub fn triangle(&self, xi: usize, yi: usize, upper: bool) -> [Position; 3] {
        let w = self.element_size;
        let data = &self.data;
        if upper {
            [
                Position::new((xi + 1) as fph * w, (yi + 1) as fph * w, data[xi + 1][yi + 1]),
                Position::new(xi as fph * w, (yi + 1) as fph * w, data[xi][yi + 1]),
                Position::new((xi + 1) as fph * w, yi as fph * w, data[xi + 1][yi]),
            ]
        } else {
            [
                Position::new(xi as fph * w, yi as fph * w, data[xi][yi]),
                Position::new((xi + 1) as fph * w, yi as fph * w, data[xi + 1][yi]),
                Position::new(xi as fph * w, (yi + 1) as fph * w, data[xi][yi + 1]),
            ]
        }
    }

    /// The triangle under the local position, and whether it is the upper
    /// one.
    pub fn triangle_at(&self, x: fph, y: fph) -> ([Position; 3], bool) {
        let (xi, yi) = self
            .index_of_position(x, y, true)
            .unwrap_or((0, 0));
        let w = self.element_size;
        let lower_dist2 = (x / w - xi as fph).powi(2) + (y / w - yi as fph).powi(2);
        let upper_dist2 = (x / w - (xi + 1) as fph).powi(2) + (y / w - (yi + 1) as fph).powi(2);
        let upper = lower_dist2 > upper_dist2;
        (self.triangle(xi, yi, upper), upper)
    }

    /// Interpolated terrain height at the local position.
    pub fn height_at(&self, x: fph, y: fph) -> fph {
        let ([a, b, c], _) = self.triangle_at(x, y);
        let (wa, wb, wc) = barycentric_weights(x, y, a.x, a.y, b.x, b.y, c.x, c.y);
        a.z * wa + b.z * wb + c.z * wc
    }

    /// Terrain surface normal at the local position.
    pub fn normal_at(&self, x: fph, y: fph) -> Vector3<fph> {
        let ([a, b, c], _) = self.triangle_at(x, y);
        (b - a).cross(&(c - a)).normalize()
    }

    /// The local AABB of a grid cell, spanning the heights stored at its
    /// lower and upper corner.
    pub fn aabb_at_index(&self, xi: usize, yi: usize) -> Aabb {
        let w = self.element_size;
        Aabb::new(
            Position::new(xi as fph * w, yi as fph * w, self.data[xi][yi]),
            Position::new(
                (xi + 1) as fph * w,
                (yi + 1) as fph * w,
                self.data[xi + 1][yi + 1],
            ),
        )
    }

    /// Builds the convex prism under one cell triangle: a thin top slab at
    /// the triangle, extruded down below the field minimum. Returns the hull
    /// together with its offset in the heightfield's local frame.
    pub fn convex_triangle_pillar(
        &self,
        xi: usize,
        yi: usize,
        upper: bool,
    ) -> (ConvexPolyhedron, Vector3<fph>) {
        let w = self.element_size;
        let data = &self.data;
        let h = (data[xi][yi]
            .min(data[xi + 1][yi])
            .min(data[xi][yi + 1])
            .min(data[xi + 1][yi + 1])
            - self.min_value)
            / 2.0
            + self.min_value;
        let bottom = -h.abs() - 1.0;

        let (offset, vertices, faces) = if upper {
            (
                Vector3::new((xi as fph + 0.75) * w, (yi as fph + 0.75) * w, h),
                vec![
                    Position::new(0.25 * w, 0.25 * w, data[xi + 1][yi + 1] - h),
                    Position::new(-0.75 * w, 0.25 * w, data[xi][yi + 1] - h),
                    Position::new(0.25 * w, -0.75 * w, data[xi + 1][yi] - h),
                    Position::new(0.25 * w, 0.25 * w, bottom),
                    Position::new(-0.75 * w, 0.25 * w, bottom),
                    Position::new(0.25 * w, -0.75 * w, bottom),
                ],
                vec![
                    vec![0, 1, 2],
                    vec![5, 4, 3],
                    vec![2, 5, 3, 0],
                    vec![3, 4, 1, 0],
                    vec![1, 4, 5, 2],
                ],
            )
        } else {
            (
                Vector3::new((xi as fph + 0.25) * w, (yi as fph + 0.25) * w, h),
                vec![
                    Position::new(-0.25 * w, -0.25 * w, data[xi][yi] - h),
                    Position::new(0.75 * w, -0.25 * w, data[xi + 1][yi] - h),
                    Position::new(-0.25 * w, 0.75 * w, data[xi][yi + 1] - h),
                    Position::new(-0.25 * w, -0.25 * w, bottom),
                    Position::new(0.75 * w, -0.25 * w, bottom),
                    Position::new(-0.25 * w, 0.75 * w, bottom),
                ],
                vec![
                    vec![0, 1, 2],
                    vec![5, 4, 3],
                    vec![0, 2, 5, 3],
                    vec![1, 0, 3, 4],
                    vec![4, 5, 2, 1],
                ],
            )
        };

        (ConvexPolyhedron::new(vertices, faces, None), offset)
    }

    pub fn bounding_sphere_radius(&self) -> fph {
        let s = self.element_size;
        Vector3::new(
            self.rows() as fph * s,
            self.columns() as fph * s,
            self.max_value.abs().max(self.min_value.abs()),
        )
        .norm()
    }
}

/// Barycentric weights of `(x, y)` with respect to the triangle
/// `(ax, ay), (bx, by), (cx, cy)`.
#[allow(clippy::too_many_arguments)]
fn barycentric_weights(
    x: fph,
    y: fph,
    ax: fph,
    ay: fph,
    bx: fph,
    by: fph,
    cx: fph,
    cy: fph,
) -> (fph, fph, fph) {
    let wa = ((by - cy) * (x - cx) + (cx - bx) * (y - cy))
        / ((by - cy) * (ax - cx) + (cx - bx) * (ay - cy));
    let wb = ((cy - ay) * (x - cx) + (ax - cx) * (y - cy))
        / ((by - cy) * (ax - cx) + (cx - bx) * (ay - cy));
    (wa, wb, 1.0 - wa - wb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn flat_field(height: fph) -> Heightfield {
        Heightfield::new(vec![vec![height; 3]; 3], 1.0)
    }

    #[test]
    fn should_track_min_and_max_heights() {
        let mut field = flat_field(1.0);
        assert_abs_diff_eq!(field.min_value(), 1.0);
        assert_abs_diff_eq!(field.max_value(), 1.0);
        field.set_height_at_index(1, 1, 4.0);
        assert_abs_diff_eq!(field.max_value(), 4.0);
        let (min, max) = field.rect_min_max(0, 0, 1, 1);
        assert_abs_diff_eq!(min, 1.0);
        assert_abs_diff_eq!(max, 4.0);
    }

    #[test]
    fn should_map_positions_to_cells() {
        let field = flat_field(0.0);
        assert_eq!(field.index_of_position(0.5, 0.5, false), Some((0, 0)));
        assert_eq!(field.index_of_position(1.5, 0.5, false), Some((1, 0)));
        assert_eq!(field.index_of_position(-0.5, 0.5, false), None);
        assert_eq!(field.index_of_position(-0.5, 9.0, true), Some((0, 1)));
    }

    #[test]
    fn should_interpolate_height_on_flat_field() {
        let field = flat_field(2.0);
        assert_abs_diff_eq!(field.height_at(0.3, 0.7), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(field.height_at(1.6, 1.6), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn should_give_upward_normal_on_flat_field() {
        let field = flat_field(0.0);
        let normal = field.normal_at(0.5, 0.5);
        assert_abs_diff_eq!(normal.z.abs(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn should_build_pillar_with_top_face_at_triangle_height() {
        let field = flat_field(1.0);
        let (pillar, offset) = field.convex_triangle_pillar(0, 0, false);
        assert_eq!(pillar.vertices.len(), 6);
        assert_eq!(pillar.faces.len(), 5);
        // Flat field of height 1: pillar offset sits at the (degenerate) slab
        // midpoint, top vertices at the surface.
        assert_abs_diff_eq!(offset.z + pillar.vertices[0].z, 1.0, epsilon = 1e-12);
    }
}
