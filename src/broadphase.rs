//! Broadphase candidate-pair generation.

use crate::{
    aabb::Aabb,
    body::{Body, BodyType},
    fph,
};
use std::fmt;

/// Produces candidate body pairs for the narrowphase and answers AABB
/// queries. Implementations take `&mut [Body]` so lazily invalidated body
/// AABBs can be recomputed on demand.
pub trait Broadphase: fmt::Debug {
    /// All candidate pairs of body indices that may be in contact.
    fn collision_pairs(&mut self, bodies: &mut [Body]) -> Vec<(usize, usize)>;

    /// Indices of all bodies whose AABB overlaps the query box.
    fn aabb_query(&mut self, bodies: &mut [Body], aabb: &Aabb) -> Vec<usize>;

    /// Marks internal acceleration state as stale. Called by the world when
    /// the body set changes and after every step.
    fn set_dirty(&mut self);
}

/// The filtering rule applied before any geometric test: group/mask bits
/// must intersect both ways, and at least one side must be able to move.
pub fn needs_broadphase_collision(body_a: &Body, body_b: &Body) -> bool {
    if body_a.collision_filter_group & body_b.collision_filter_mask == 0
        || body_b.collision_filter_group & body_a.collision_filter_mask == 0
    {
        return false;
    }
    let immobile = |body: &Body| body.body_type.contains(BodyType::STATIC) || body.is_sleeping();
    !(immobile(body_a) && immobile(body_b))
}

/// Bounding-sphere overlap test between two bodies.
pub fn bounding_spheres_overlap(body_a: &Body, body_b: &Body) -> bool {
    let r = body_a.bounding_radius + body_b.bounding_radius;
    (body_b.position - body_a.position).norm_squared() < r * r
}

fn aabbs_overlap(bodies: &mut [Body], a: usize, b: usize) -> bool {
    for index in [a, b] {
        if bodies[index].aabb_needs_update {
            bodies[index].update_aabb();
        }
    }
    bodies[a].aabb.overlaps(&bodies[b].aabb)
}

fn intersection_test(bodies: &mut [Body], a: usize, b: usize, use_bounding_boxes: bool) -> bool {
    if use_bounding_boxes {
        aabbs_overlap(bodies, a, b)
    } else {
        bounding_spheres_overlap(&bodies[a], &bodies[b])
    }
}

/// Normalizes, sorts and deduplicates unordered pairs.
pub fn make_pairs_unique(pairs: &mut Vec<(usize, usize)>) {
    for pair in pairs.iter_mut() {
        if pair.0 > pair.1 {
            *pair = (pair.1, pair.0);
        }
    }
    pairs.sort_unstable();
    pairs.dedup();
}

/// O(n²) pairwise scan. Always correct; the baseline for small scenes.
#[derive(Clone, Debug, Default)]
pub struct NaiveBroadphase {
    pub use_bounding_boxes: bool,
}

impl NaiveBroadphase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Broadphase for NaiveBroadphase {
    fn collision_pairs(&mut self, bodies: &mut [Body]) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for a in 0..bodies.len() {
            for b in (a + 1)..bodies.len() {
                if !needs_broadphase_collision(&bodies[a], &bodies[b]) {
                    continue;
                }
                if intersection_test(bodies, a, b, self.use_bounding_boxes) {
                    pairs.push((a, b));
                }
            }
        }
        pairs
    }

    fn aabb_query(&mut self, bodies: &mut [Body], aabb: &Aabb) -> Vec<usize> {
        (0..bodies.len())
            .filter(|&index| {
                if bodies[index].aabb_needs_update {
                    bodies[index].update_aabb();
                }
                bodies[index].aabb.overlaps(aabb)
            })
            .collect()
    }

    fn set_dirty(&mut self) {}
}

/// Single-axis sweep-and-prune. Bodies are kept in an insertion-sorted list
/// along the axis of maximum positional variance; the forward sweep stops
/// once the next body's lower bound passes the current body's upper bound.
///
/// The early break compares positions plus bounding radii rather than AABB
/// bounds, which can under-report pairs for bodies with highly asymmetric
/// bounds.
#[derive(Clone, Debug)]
pub struct SapBroadphase {
    axis_list: Vec<usize>,
    axis: usize,
    dirty: bool,
    pub use_bounding_boxes: bool,
    pub auto_detect_axis: bool,
}

impl SapBroadphase {
    pub fn new() -> Self {
        Self {
            axis_list: Vec::new(),
            axis: 0,
            dirty: true,
            use_bounding_boxes: false,
            auto_detect_axis: true,
        }
    }

    pub fn axis(&self) -> usize {
        self.axis
    }

    /// Keeps the axis list membership in sync with the body list while
    /// preserving the temporal-coherence ordering of surviving entries.
    fn sync_axis_list(&mut self, body_count: usize) {
        if self.axis_list.len() > body_count {
            self.axis_list.retain(|&index| index < body_count);
            self.dirty = true;
        }
        while self.axis_list.len() < body_count {
            self.axis_list.push(self.axis_list.len());
            self.dirty = true;
        }
    }

    /// Picks the sweep axis with maximum positional variance.
    fn update_axis(&mut self, bodies: &[Body]) {
        if bodies.is_empty() {
            return;
        }
        let n = bodies.len() as fph;
        let mut sum = [0.0; 3];
        let mut sum_squared = [0.0; 3];
        for body in bodies {
            for axis in 0..3 {
                sum[axis] += body.position[axis];
                sum_squared[axis] += body.position[axis] * body.position[axis];
            }
        }
        let mut best_axis = 0;
        let mut best_variance = fph::NEG_INFINITY;
        for axis in 0..3 {
            let variance = sum_squared[axis] - sum[axis] * sum[axis] / n;
            if variance > best_variance {
                best_variance = variance;
                best_axis = axis;
            }
        }
        self.axis = best_axis;
    }

    /// Insertion sort by AABB lower bound; near-linear for temporally
    /// coherent scenes.
    fn sort_axis_list(&mut self, bodies: &[Body]) {
        let axis = self.axis;
        let list = &mut self.axis_list;
        for i in 1..list.len() {
            let current = list[i];
            let key = bodies[current].aabb.lower[axis];
            let mut j = i;
            while j > 0 && bodies[list[j - 1]].aabb.lower[axis] > key {
                list[j] = list[j - 1];
                j -= 1;
            }
            list[j] = current;
        }
    }

    fn check_bounds(bodies: &[Body], a: usize, b: usize, axis: usize) -> bool {
        let position_a = bodies[a].position[axis];
        let position_b = bodies[b].position[axis];
        position_b - bodies[b].bounding_radius < position_a + bodies[a].bounding_radius
    }
}

impl Default for SapBroadphase {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadphase for SapBroadphase {
    fn collision_pairs(&mut self, bodies: &mut [Body]) -> Vec<(usize, usize)> {
        self.sync_axis_list(bodies.len());

        if self.dirty {
            for body in bodies.iter_mut() {
                if body.aabb_needs_update {
                    body.update_aabb();
                }
            }
            if self.auto_detect_axis {
                self.update_axis(bodies);
            }
            self.sort_axis_list(bodies);
            self.dirty = false;
        }

        let mut pairs = Vec::new();
        for i in 0..self.axis_list.len() {
            let a = self.axis_list[i];
            for j in (i + 1)..self.axis_list.len() {
                let b = self.axis_list[j];
                if !Self::check_bounds(bodies, a, b, self.axis) {
                    break;
                }
                if !needs_broadphase_collision(&bodies[a], &bodies[b]) {
                    continue;
                }
                if intersection_test(bodies, a, b, self.use_bounding_boxes) {
                    pairs.push((a, b));
                }
            }
        }
        make_pairs_unique(&mut pairs);
        pairs
    }

    fn aabb_query(&mut self, bodies: &mut [Body], aabb: &Aabb) -> Vec<usize> {
        (0..bodies.len())
            .filter(|&index| {
                if bodies[index].aabb_needs_update {
                    bodies[index].update_aabb();
                }
                bodies[index].aabb.overlaps(aabb)
            })
            .collect()
    }

    fn set_dirty(&mut self) {
        self.dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantities::Position;
    use crate::shape::Shape;

    fn sphere_body_at(position: Position, mass: fph) -> Body {
        Body::new(mass)
            .with_shape(Shape::sphere(0.5))
            .with_position(position)
    }

    fn scattered_scene() -> Vec<Body> {
        // Deterministic pseudo-random cluster with several overlaps.
        let mut bodies = Vec::new();
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..30 {
            let mut next = || {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((seed >> 33) as fph / (u32::MAX as fph) - 0.5) * 6.0
            };
            let position = Position::new(next(), next(), next());
            bodies.push(sphere_body_at(position, 1.0));
        }
        for (index, body) in bodies.iter_mut().enumerate() {
            body.index = index;
        }
        bodies
    }

    #[test]
    fn should_pair_overlapping_spheres() {
        let mut bodies = vec![
            sphere_body_at(Position::origin(), 1.0),
            sphere_body_at(Position::new(0.8, 0.0, 0.0), 1.0),
            sphere_body_at(Position::new(5.0, 0.0, 0.0), 1.0),
        ];
        let mut broadphase = NaiveBroadphase::new();
        let pairs = broadphase.collision_pairs(&mut bodies);
        assert_eq!(pairs, vec![(0, 1)]);
    }

    #[test]
    fn should_reject_pairs_of_immobile_bodies() {
        let mut bodies = vec![
            sphere_body_at(Position::origin(), 0.0),
            sphere_body_at(Position::new(0.5, 0.0, 0.0), 0.0),
        ];
        let mut broadphase = NaiveBroadphase::new();
        assert!(broadphase.collision_pairs(&mut bodies).is_empty());

        let mut bodies = vec![
            sphere_body_at(Position::origin(), 1.0),
            sphere_body_at(Position::new(0.5, 0.0, 0.0), 1.0),
        ];
        bodies[0].sleep();
        bodies[1].sleep();
        assert!(broadphase.collision_pairs(&mut bodies).is_empty());
    }

    #[test]
    fn should_reject_pairs_with_disjoint_filter_groups() {
        let mut bodies = vec![
            sphere_body_at(Position::origin(), 1.0),
            sphere_body_at(Position::new(0.5, 0.0, 0.0), 1.0),
        ];
        bodies[0].collision_filter_group = 0b01;
        bodies[0].collision_filter_mask = 0b01;
        bodies[1].collision_filter_group = 0b10;
        bodies[1].collision_filter_mask = 0b10;
        let mut broadphase = NaiveBroadphase::new();
        assert!(broadphase.collision_pairs(&mut bodies).is_empty());
    }

    #[test]
    fn should_produce_same_pairs_as_naive_scan() {
        let mut bodies = scattered_scene();
        let mut naive_pairs = NaiveBroadphase::new().collision_pairs(&mut bodies);
        make_pairs_unique(&mut naive_pairs);
        let sap_pairs = SapBroadphase::new().collision_pairs(&mut bodies);

        for pair in &sap_pairs {
            assert!(naive_pairs.contains(pair));
        }
        // Uniform spheres: the position-based early break is exact here.
        assert_eq!(naive_pairs, sap_pairs);
    }

    #[test]
    fn should_select_axis_of_maximum_spread() {
        let mut bodies = vec![
            sphere_body_at(Position::new(0.0, -10.0, 0.0), 1.0),
            sphere_body_at(Position::new(0.0, 0.0, 0.0), 1.0),
            sphere_body_at(Position::new(0.0, 10.0, 0.0), 1.0),
        ];
        let mut broadphase = SapBroadphase::new();
        let _ = broadphase.collision_pairs(&mut bodies);
        assert_eq!(broadphase.axis(), 1);
    }

    #[test]
    fn should_deduplicate_unordered_pairs() {
        let mut pairs = vec![(2, 1), (1, 2), (0, 3)];
        make_pairs_unique(&mut pairs);
        assert_eq!(pairs, vec![(0, 3), (1, 2)]);
    }

    #[test]
    fn should_answer_aabb_queries() {
        let mut bodies = vec![
            sphere_body_at(Position::origin(), 1.0),
            sphere_body_at(Position::new(10.0, 0.0, 0.0), 1.0),
        ];
        let mut broadphase = NaiveBroadphase::new();
        let hits = broadphase.aabb_query(
            &mut bodies,
            &Aabb::new(Position::new(-1.0, -1.0, -1.0), Position::new(1.0, 1.0, 1.0)),
        );
        assert_eq!(hits, vec![0]);
    }
}
