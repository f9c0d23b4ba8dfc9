//! The simulation world: body registry, step orchestration and events.

use crate::{
    body::{Body, BodyId, BodyType, SleepEvent},
    broadphase::{Broadphase, SapBroadphase},
    constraint::Constraint,
    fph,
    material::{ContactMaterial, ContactMaterialTable, MaterialId},
    narrowphase::{Narrowphase, NarrowphaseParams},
    overlap::{CollisionMatrix, OverlapKeeper},
    quantities::Position,
    ray::{Ray, RayMode, RaycastHit, RaycastResult},
    solver::{GaussSeidelSolver, Solver, SplitSolver},
};
use anyhow::{Result, bail};
use nalgebra::Vector3;
use std::time::Instant;

/// Simulation event emitted during a step, drained by the caller.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Event {
    BodyAdded {
        body: BodyId,
    },
    BodyRemoved {
        body: BodyId,
    },
    /// Two bodies started colliding this step (fresh collision matrix entry).
    Collide {
        body_a: BodyId,
        body_b: BodyId,
        impact_velocity: fph,
    },
    BeginContact {
        body_a: BodyId,
        body_b: BodyId,
    },
    EndContact {
        body_a: BodyId,
        body_b: BodyId,
    },
    BeginShapeContact {
        shape_a: u32,
        shape_b: u32,
    },
    EndShapeContact {
        shape_a: u32,
        shape_b: u32,
    },
    /// Fired once per internal step, after damping and immediately before
    /// integration.
    PreStep,
    /// Fired once per internal step, after forces are cleared and before the
    /// sleep pass.
    PostStep,
    Wake {
        body: BodyId,
    },
    Sleepy {
        body: BodyId,
    },
    Sleep {
        body: BodyId,
    },
}

/// World construction parameters.
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
#[derive(Clone, Debug)]
pub struct WorldConfig {
    pub gravity: Vector3<fph>,
    pub allow_sleep: bool,
    /// Number of integration steps between quaternion renormalizations.
    pub quat_normalize_skip: usize,
    /// Use first-order quaternion normalization instead of an exact one.
    pub quat_normalize_fast: bool,
    pub solver_iterations: usize,
    pub solver_tolerance: fph,
    /// Solve constraint islands independently instead of as one system.
    pub split_solver: bool,
    pub default_friction: fph,
    pub default_restitution: fph,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            gravity: Vector3::zeros(),
            allow_sleep: false,
            quat_normalize_skip: 0,
            quat_normalize_fast: false,
            solver_iterations: 10,
            solver_tolerance: 1e-7,
            split_solver: false,
            default_friction: 0.3,
            default_restitution: 0.0,
        }
    }
}

impl WorldConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.gravity.iter().all(|component| component.is_finite()) {
            bail!("Gravity must be finite, got {:?}", self.gravity);
        }
        if self.solver_iterations == 0 {
            bail!("Solver iteration count must be at least 1");
        }
        if self.solver_tolerance < 0.0 {
            bail!(
                "Solver tolerance must be non-negative, got {}",
                self.solver_tolerance
            );
        }
        if self.default_friction < 0.0 {
            bail!(
                "Default friction must be non-negative, got {}",
                self.default_friction
            );
        }
        if self.default_restitution < 0.0 {
            bail!(
                "Default restitution must be non-negative, got {}",
                self.default_restitution
            );
        }
        Ok(())
    }
}

/// The physics world. Owns all bodies, constraints and collision state and
/// advances them with [`step`](Self::step).
#[derive(Debug)]
pub struct World {
    pub bodies: Vec<Body>,
    pub gravity: Vector3<fph>,
    pub allow_sleep: bool,
    pub default_contact_material: ContactMaterial,

    broadphase: Box<dyn Broadphase>,
    narrowphase: Narrowphase,
    solver: Box<dyn Solver>,
    constraints: Vec<Box<dyn Constraint>>,
    contact_materials: ContactMaterialTable,

    collision_matrix: CollisionMatrix,
    collision_matrix_previous: CollisionMatrix,
    body_overlap_keeper: OverlapKeeper,
    shape_overlap_keeper: OverlapKeeper,

    events: Vec<Event>,

    pub time: fph,
    pub step_number: usize,
    accumulator: fph,
    quat_normalize_skip: usize,
    quat_normalize_fast: bool,
}

impl World {
    pub fn new(config: &WorldConfig) -> Result<Self> {
        config.validate()?;

        let solver: Box<dyn Solver> = if config.split_solver {
            let mut solver = SplitSolver::new();
            solver.iterations = config.solver_iterations;
            solver.tolerance = config.solver_tolerance;
            Box::new(solver)
        } else {
            let mut solver = GaussSeidelSolver::new();
            solver.iterations = config.solver_iterations;
            solver.tolerance = config.solver_tolerance;
            Box::new(solver)
        };

        Ok(Self {
            bodies: Vec::new(),
            gravity: config.gravity,
            allow_sleep: config.allow_sleep,
            default_contact_material: ContactMaterial {
                friction: config.default_friction,
                restitution: config.default_restitution,
                ..ContactMaterial::default()
            },
            broadphase: Box::new(SapBroadphase::new()),
            narrowphase: Narrowphase::new(),
            solver,
            constraints: Vec::new(),
            contact_materials: ContactMaterialTable::new(),
            collision_matrix: CollisionMatrix::new(),
            collision_matrix_previous: CollisionMatrix::new(),
            body_overlap_keeper: OverlapKeeper::new(),
            shape_overlap_keeper: OverlapKeeper::new(),
            events: Vec::new(),
            time: 0.0,
            step_number: 0,
            accumulator: 0.0,
            quat_normalize_skip: config.quat_normalize_skip,
            quat_normalize_fast: config.quat_normalize_fast,
        })
    }

    pub fn set_broadphase(&mut self, broadphase: Box<dyn Broadphase>) {
        self.broadphase = broadphase;
        self.broadphase.set_dirty();
    }

    pub fn narrowphase_mut(&mut self) -> &mut Narrowphase {
        &mut self.narrowphase
    }

    /// Adds a body and returns its index in the body list.
    pub fn add_body(&mut self, mut body: Body) -> usize {
        let index = self.bodies.len();
        body.index = index;
        body.update_aabb();
        let id = body.id;
        self.bodies.push(body);
        self.broadphase.set_dirty();
        self.events.push(Event::BodyAdded { body: id });
        index
    }

    /// Removes the body at the given index. All bodies after it are
    /// reindexed, and the collision matrices are reset since their entries
    /// are keyed by index.
    pub fn remove_body(&mut self, index: usize) -> Option<Body> {
        if index >= self.bodies.len() {
            return None;
        }
        let body = self.bodies.remove(index);
        for (new_index, remaining) in self.bodies.iter_mut().enumerate().skip(index) {
            remaining.index = new_index;
        }
        self.collision_matrix.reset(self.bodies.len());
        self.collision_matrix_previous.reset(self.bodies.len());
        self.broadphase.set_dirty();
        self.events.push(Event::BodyRemoved { body: body.id });
        Some(body)
    }

    /// Registers a constraint and wakes both constrained bodies.
    pub fn add_constraint(&mut self, constraint: Box<dyn Constraint>) {
        for index in [constraint.body_a(), constraint.body_b()] {
            if let Some(SleepEvent::Woken) = self.bodies[index].wake_up() {
                self.events.push(Event::Wake {
                    body: self.bodies[index].id,
                });
            }
        }
        self.constraints.push(constraint);
    }

    pub fn remove_constraint(&mut self, index: usize) -> Option<Box<dyn Constraint>> {
        (index < self.constraints.len()).then(|| self.constraints.remove(index))
    }

    pub fn add_contact_material(
        &mut self,
        material_a: MaterialId,
        material_b: MaterialId,
        contact_material: ContactMaterial,
    ) {
        self.contact_materials
            .insert(material_a, material_b, contact_material);
    }

    /// Takes all events emitted since the last drain.
    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Advances the simulation. Without `time_since_last_called` this runs
    /// exactly one fixed step of `dt`. With it, elapsed wall-clock time is
    /// accumulated and as many fixed steps as fit are run, capped by
    /// `max_sub_steps` and by a wall-clock budget of `dt * max_sub_steps`;
    /// leftover time is carried over and each body's interpolated pose is
    /// set to the fractional remainder.
    pub fn step(&mut self, dt: fph, time_since_last_called: Option<fph>, max_sub_steps: usize) {
        let Some(elapsed) = time_since_last_called else {
            self.internal_step(dt);
            return;
        };

        self.accumulator += elapsed;
        let budget_start = Instant::now();
        let wall_clock_budget = dt * max_sub_steps as fph;

        let mut substeps = 0;
        while self.accumulator >= dt && substeps < max_sub_steps {
            self.internal_step(dt);
            self.accumulator -= dt;
            substeps += 1;
            if budget_start.elapsed().as_secs_f64() > wall_clock_budget {
                // Out of budget: defer remaining substeps to the next call.
                break;
            }
        }
        self.accumulator %= dt;

        let t = (self.accumulator / dt).clamp(0.0, 1.0);
        for body in &mut self.bodies {
            body.interpolated_position = Position::from(
                body.previous_position
                    .coords
                    .lerp(&body.position.coords, t),
            );
            body.interpolated_orientation = body
                .previous_orientation
                .try_slerp(&body.orientation, t, 1e-9)
                .unwrap_or(body.orientation);
        }
    }

    fn internal_step(&mut self, dt: fph) {
        // Gravity acts as an accumulated force so that it participates in
        // the same integration path as user-applied forces.
        for body in &mut self.bodies {
            if body.body_type == BodyType::DYNAMIC {
                body.force += self.gravity * body.mass;
            }
        }

        let mut pairs = self.broadphase.collision_pairs(&mut self.bodies);

        for constraint in &self.constraints {
            if constraint.collide_connected() {
                continue;
            }
            let (a, b) = (constraint.body_a(), constraint.body_b());
            pairs.retain(|&(i, j)| (i, j) != (a, b) && (i, j) != (b, a));
        }

        std::mem::swap(&mut self.collision_matrix, &mut self.collision_matrix_previous);
        self.collision_matrix.reset(self.bodies.len());
        self.body_overlap_keeper.tick();
        self.shape_overlap_keeper.tick();

        let params = NarrowphaseParams {
            dt,
            gravity: self.gravity,
            contact_materials: &self.contact_materials,
            default_contact_material: self.default_contact_material,
        };
        self.narrowphase
            .generate_contacts(&pairs, &self.bodies, &params);

        for &(id_a, id_b) in &self.narrowphase.body_overlaps {
            self.body_overlap_keeper.set(id_a, id_b);
        }
        for &(id_a, id_b) in &self.narrowphase.shape_overlaps {
            self.shape_overlap_keeper.set(id_a, id_b);
        }

        // The equations are drained rather than moved out wholesale so the
        // narrowphase buffers keep their capacity for the next step.
        for equation in self.narrowphase.friction_equations.drain(..) {
            self.solver.add_equation(equation);
        }
        for equation in self.narrowphase.contact_equations.drain(..) {
            let (index_a, index_b) = (equation.body_a, equation.body_b);

            Self::flag_sleeper_for_wake_up(&mut self.bodies, index_a, index_b);
            Self::flag_sleeper_for_wake_up(&mut self.bodies, index_b, index_a);

            if !self.collision_matrix_previous.get(index_a, index_b)
                && !self.collision_matrix.get(index_a, index_b)
            {
                self.events.push(Event::Collide {
                    body_a: self.bodies[index_a].id,
                    body_b: self.bodies[index_b].id,
                    impact_velocity: equation.impact_velocity_along_normal(&self.bodies),
                });
            }
            self.collision_matrix.set(index_a, index_b, true);

            self.solver.add_equation(equation);
        }

        let (begin_contact, end_contact) = self.body_overlap_keeper.diff();
        for (body_a, body_b) in begin_contact {
            self.events.push(Event::BeginContact { body_a, body_b });
        }
        for (body_a, body_b) in end_contact {
            self.events.push(Event::EndContact { body_a, body_b });
        }
        let (begin_shape, end_shape) = self.shape_overlap_keeper.diff();
        for (shape_a, shape_b) in begin_shape {
            self.events.push(Event::BeginShapeContact { shape_a, shape_b });
        }
        for (shape_a, shape_b) in end_shape {
            self.events.push(Event::EndShapeContact { shape_a, shape_b });
        }

        // Wake flagged sleepers before solving so their solve-time mass
        // properties are correct for this step.
        for body in &mut self.bodies {
            if body.wake_up_after_narrowphase {
                if let Some(SleepEvent::Woken) = body.wake_up() {
                    self.events.push(Event::Wake { body: body.id });
                }
            }
            body.update_solve_mass_properties();
        }

        for constraint in &mut self.constraints {
            constraint.update(&self.bodies);
            for equation in constraint.equations() {
                self.solver.add_equation(equation.clone());
            }
        }

        let iterations = self.solver.solve(dt, &mut self.bodies);
        log::debug!("Solver used {iterations} iterations");
        self.solver.clear_equations();

        for body in &mut self.bodies {
            if body.body_type != BodyType::DYNAMIC || body.is_sleeping() {
                continue;
            }
            body.velocity *= (1.0 - body.linear_damping).powf(dt);
            body.angular_velocity *= (1.0 - body.angular_damping).powf(dt);
        }

        self.events.push(Event::PreStep);

        let quat_normalize = self.step_number % (self.quat_normalize_skip + 1) == 0;
        for body in &mut self.bodies {
            body.integrate(dt, quat_normalize, self.quat_normalize_fast);
            body.force = Vector3::zeros();
            body.torque = Vector3::zeros();
        }
        self.broadphase.set_dirty();

        self.events.push(Event::PostStep);

        if self.allow_sleep {
            for body in &mut self.bodies {
                let event = match body.sleep_tick(self.time) {
                    Some(SleepEvent::Woken) => Event::Wake { body: body.id },
                    Some(SleepEvent::BecameSleepy) => Event::Sleepy { body: body.id },
                    Some(SleepEvent::FellAsleep) => Event::Sleep { body: body.id },
                    None => continue,
                };
                self.events.push(event);
            }
        }

        self.time += dt;
        self.step_number += 1;
    }

    /// Flags a sleeping dynamic body for wake-up when the other body of a
    /// fresh contact moves noticeably faster than the sleep speed limit.
    fn flag_sleeper_for_wake_up(bodies: &mut [Body], sleeper: usize, other: usize) {
        let other_body = &bodies[other];
        if other_body.body_type.contains(BodyType::STATIC) || !other_body.is_awake() {
            return;
        }
        let speed_squared =
            other_body.velocity.norm_squared() + other_body.angular_velocity.norm_squared();

        let sleeper_body = &bodies[sleeper];
        if sleeper_body.body_type == BodyType::DYNAMIC
            && sleeper_body.allow_sleep
            && sleeper_body.is_sleeping()
            && speed_squared >= 2.0 * sleeper_body.sleep_speed_limit * sleeper_body.sleep_speed_limit
        {
            bodies[sleeper].wake_up_after_narrowphase = true;
        }
    }

    /// Casts a ray against all bodies whose AABB the segment touches,
    /// collecting hits into `result` according to the ray's mode.
    pub fn ray_test(&mut self, ray: &Ray, result: &mut RaycastResult) {
        let aabb = ray.aabb();
        for index in self.broadphase.aabb_query(&mut self.bodies, &aabb) {
            if result.is_done() {
                break;
            }
            ray.intersect_body(&self.bodies[index], result);
        }
    }

    /// The first hit found along the segment, in traversal order.
    pub fn raycast_any(&mut self, from: Position, to: Position) -> Option<RaycastHit> {
        let ray = Ray::new(from, to).with_mode(RayMode::Any);
        let mut result = RaycastResult::new();
        self.ray_test(&ray, &mut result);
        result.into_hits().into_iter().next()
    }

    /// The hit closest to `from`.
    pub fn raycast_closest(&mut self, from: Position, to: Position) -> Option<RaycastHit> {
        let ray = Ray::new(from, to).with_mode(RayMode::Closest);
        let mut result = RaycastResult::new();
        self.ray_test(&ray, &mut result);
        result.into_hits().into_iter().next()
    }

    /// All hits along the segment, unordered.
    pub fn raycast_all(&mut self, from: Position, to: Position) -> Vec<RaycastHit> {
        let ray = Ray::new(from, to).with_mode(RayMode::All);
        let mut result = RaycastResult::new();
        self.ray_test(&ray, &mut result);
        result.into_hits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;
    use approx::assert_abs_diff_eq;

    fn world_with_gravity(gravity: Vector3<fph>) -> World {
        let config = WorldConfig {
            gravity,
            ..WorldConfig::default()
        };
        World::new(&config).unwrap()
    }

    fn sphere_body(mass: fph, radius: fph, position: Position) -> Body {
        Body::new(mass)
            .with_shape(Shape::sphere(radius))
            .with_position(position)
    }

    #[test]
    fn should_reject_invalid_config() {
        let config = WorldConfig {
            solver_iterations: 0,
            ..WorldConfig::default()
        };
        assert!(config.validate().is_err());

        let config = WorldConfig {
            gravity: Vector3::new(0.0, 0.0, fph::NAN),
            ..WorldConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_emit_body_lifecycle_events() {
        let mut world = world_with_gravity(Vector3::zeros());
        let index = world.add_body(sphere_body(1.0, 0.5, Position::origin()));
        let id = world.bodies[index].id;
        world.remove_body(index);

        assert_eq!(
            world.drain_events(),
            vec![Event::BodyAdded { body: id }, Event::BodyRemoved { body: id }]
        );
    }

    #[test]
    fn should_reindex_bodies_after_removal() {
        let mut world = world_with_gravity(Vector3::zeros());
        world.add_body(sphere_body(1.0, 0.5, Position::new(0.0, 0.0, 0.0)));
        world.add_body(sphere_body(1.0, 0.5, Position::new(5.0, 0.0, 0.0)));
        world.add_body(sphere_body(1.0, 0.5, Position::new(10.0, 0.0, 0.0)));
        world.remove_body(0);

        for (index, body) in world.bodies.iter().enumerate() {
            assert_eq!(body.index, index);
        }
    }

    #[test]
    fn should_let_a_body_fall_under_gravity() {
        let mut world = world_with_gravity(Vector3::new(0.0, 0.0, -10.0));
        let index = world.add_body(sphere_body(1.0, 0.5, Position::new(0.0, 0.0, 10.0)));

        let dt = 1.0 / 60.0;
        for _ in 0..60 {
            world.step(dt, None, 10);
        }
        let body = &world.bodies[index];
        // After one second of free fall: v = -10, z = 10 - g t^2 / 2 (give or
        // take discretization and default damping).
        assert!(body.velocity.z < -9.0);
        assert!(body.position.z < 5.5);
    }

    #[test]
    fn should_reduce_overlap_relative_to_solver_free_run() {
        let dt = 1.0 / 60.0;
        let gravity = Vector3::new(0.0, 0.0, -10.0);

        let overlap_after_step = |respond: bool| {
            let mut world = world_with_gravity(gravity);
            let mut lower = sphere_body(1.0, 0.5, Position::new(0.0, 0.0, 0.0));
            let mut upper = sphere_body(1.0, 0.5, Position::new(0.0, 0.0, 0.9));
            lower.collision_response = respond;
            upper.collision_response = respond;
            let a = world.add_body(lower);
            let b = world.add_body(upper);
            world.step(dt, None, 10);
            1.0 - (world.bodies[b].position.z - world.bodies[a].position.z)
        };

        assert!(overlap_after_step(true) < overlap_after_step(false));
    }

    #[test]
    fn should_conserve_momentum_in_symmetric_collision() {
        let mut world = world_with_gravity(Vector3::zeros());
        let mut left = sphere_body(1.0, 0.5, Position::new(-0.45, 0.0, 0.0));
        let mut right = sphere_body(1.0, 0.5, Position::new(0.45, 0.0, 0.0));
        left.velocity = Vector3::new(1.0, 0.0, 0.0);
        right.velocity = Vector3::new(-1.0, 0.0, 0.0);
        left.linear_damping = 0.0;
        right.linear_damping = 0.0;
        let a = world.add_body(left);
        let b = world.add_body(right);

        world.step(1.0 / 60.0, None, 10);

        let momentum = world.bodies[a].velocity + world.bodies[b].velocity;
        assert_abs_diff_eq!(momentum.norm(), 0.0, epsilon = 1e-9);
        // The spheres must be separating (or at least not approaching).
        let relative =
            (world.bodies[b].velocity - world.bodies[a].velocity).dot(&Vector3::x());
        assert!(relative >= -1e-9);
    }

    #[test]
    fn should_not_sink_into_a_static_plane() {
        let mut world = world_with_gravity(Vector3::new(0.0, 0.0, -10.0));
        world.add_body(Body::new(0.0).with_shape(Shape::plane()));
        let index = world.add_body(sphere_body(1.0, 1.0, Position::new(0.0, 0.0, 1.0)));

        let dt = 1.0 / 60.0;
        let mut min_z = fph::INFINITY;
        for _ in 0..120 {
            world.step(dt, None, 10);
            min_z = min_z.min(world.bodies[index].position.z);
        }
        // The resting height may dip slightly below the radius but must not
        // keep sinking.
        assert!(world.bodies[index].position.z > 0.9);
        assert!(min_z > 0.8);
    }

    #[test]
    fn should_emit_begin_and_end_contact_events() {
        let mut world = world_with_gravity(Vector3::zeros());
        let mut mover = sphere_body(1.0, 0.5, Position::new(-2.0, 0.0, 0.0));
        mover.velocity = Vector3::new(4.0, 0.0, 0.0);
        mover.linear_damping = 0.0;
        let a = world.add_body(mover);
        let b = world.add_body(sphere_body(0.0, 0.5, Position::new(0.0, 0.0, 0.0)));
        let (id_a, id_b) = (world.bodies[a].id, world.bodies[b].id);
        world.drain_events();

        let dt = 1.0 / 60.0;
        let mut began = false;
        let mut ended = false;
        for _ in 0..180 {
            world.step(dt, None, 10);
            for event in world.drain_events() {
                match event {
                    Event::BeginContact { body_a, body_b } => {
                        assert_eq!(
                            (body_a.max(body_b), body_a.min(body_b)),
                            (id_a.max(id_b), id_a.min(id_b))
                        );
                        began = true;
                    }
                    Event::EndContact { .. } => ended = true,
                    _ => {}
                }
            }
        }
        assert!(began);
        assert!(ended);
    }

    #[test]
    fn should_fire_step_hooks_around_integration() {
        let mut world = world_with_gravity(Vector3::new(0.0, 0.0, -10.0));
        world.add_body(sphere_body(1.0, 0.5, Position::new(0.0, 0.0, 0.0)));
        world.add_body(sphere_body(1.0, 0.5, Position::new(0.0, 0.0, 0.9)));
        world.drain_events();

        world.step(1.0 / 60.0, None, 10);
        let events = world.drain_events();
        let pre = events.iter().position(|e| *e == Event::PreStep).unwrap();
        let post = events.iter().position(|e| *e == Event::PostStep).unwrap();
        let collide = events
            .iter()
            .position(|e| matches!(e, Event::Collide { .. }))
            .unwrap();
        // Contact resolution happens before the pre-integration hook, and
        // the post hook closes the step.
        assert!(collide < pre);
        assert!(pre < post);
    }

    #[test]
    fn should_fire_step_hooks_once_per_substep() {
        let mut world = world_with_gravity(Vector3::zeros());
        world.add_body(sphere_body(1.0, 0.5, Position::origin()));
        world.drain_events();

        let dt = 1.0 / 60.0;
        world.step(dt, Some(2.5 * dt), 10);
        let events = world.drain_events();
        assert_eq!(events.iter().filter(|e| **e == Event::PreStep).count(), 2);
        assert_eq!(events.iter().filter(|e| **e == Event::PostStep).count(), 2);
    }

    #[test]
    fn should_retain_equation_buffer_capacity_across_steps() {
        let mut world = world_with_gravity(Vector3::new(0.0, 0.0, -10.0));
        world.add_body(sphere_body(1.0, 0.5, Position::new(0.0, 0.0, 0.0)));
        world.add_body(sphere_body(1.0, 0.5, Position::new(0.0, 0.0, 0.9)));

        world.step(1.0 / 60.0, None, 10);

        // The equations were handed to the solver, but the narrowphase
        // buffers keep their storage for the next step.
        let narrowphase = world.narrowphase_mut();
        assert!(narrowphase.contact_equations.is_empty());
        assert!(narrowphase.friction_equations.is_empty());
        assert!(narrowphase.contact_equations.capacity() > 0);
        assert!(narrowphase.friction_equations.capacity() > 0);
    }

    #[test]
    fn should_emit_collide_event_with_impact_velocity() {
        let mut world = world_with_gravity(Vector3::zeros());
        let mut mover = sphere_body(1.0, 0.5, Position::new(-1.05, 0.0, 0.0));
        mover.velocity = Vector3::new(2.0, 0.0, 0.0);
        mover.linear_damping = 0.0;
        world.add_body(mover);
        world.add_body(sphere_body(0.0, 0.5, Position::new(0.0, 0.0, 0.0)));
        world.drain_events();

        let dt = 1.0 / 60.0;
        let mut impact = None;
        for _ in 0..20 {
            world.step(dt, None, 10);
            for event in world.drain_events() {
                if let Event::Collide {
                    impact_velocity, ..
                } = event
                {
                    impact = Some(impact_velocity);
                }
            }
            if impact.is_some() {
                break;
            }
        }
        // Approach speed along the normal at first touch.
        assert!(impact.is_some_and(|v| v > 1.0));
    }

    #[test]
    fn should_put_a_slow_body_to_sleep_and_emit_events() {
        let config = WorldConfig {
            allow_sleep: true,
            ..WorldConfig::default()
        };
        let mut world = World::new(&config).unwrap();
        let mut body = sphere_body(1.0, 0.5, Position::origin());
        body.velocity = Vector3::new(0.01, 0.0, 0.0);
        let index = world.add_body(body);
        world.drain_events();

        let dt = 1.0 / 60.0;
        let mut saw_sleepy = false;
        let mut saw_sleep = false;
        for _ in 0..120 {
            world.step(dt, None, 10);
            for event in world.drain_events() {
                match event {
                    Event::Sleepy { .. } => saw_sleepy = true,
                    Event::Sleep { .. } => saw_sleep = true,
                    _ => {}
                }
            }
        }
        assert!(saw_sleepy);
        assert!(saw_sleep);
        assert!(world.bodies[index].is_sleeping());
    }

    #[test]
    fn should_run_substeps_from_accumulated_wall_clock_time() {
        let mut world = world_with_gravity(Vector3::new(0.0, 0.0, -10.0));
        world.add_body(sphere_body(1.0, 0.5, Position::new(0.0, 0.0, 10.0)));

        let dt = 1.0 / 60.0;
        world.step(dt, Some(2.5 * dt), 10);
        assert_eq!(world.step_number, 2);
        // Half a step of leftover time interpolates the render pose.
        let body = &world.bodies[0];
        assert!(body.interpolated_position.z < body.previous_position.z);
        assert!(body.interpolated_position.z > body.position.z);
    }

    #[test]
    fn should_cap_substeps_at_the_configured_maximum() {
        let mut world = world_with_gravity(Vector3::zeros());
        world.add_body(sphere_body(1.0, 0.5, Position::origin()));
        world.step(1.0 / 60.0, Some(1.0), 3);
        assert_eq!(world.step_number, 3);
    }

    #[test]
    fn should_find_closest_body_with_raycast() {
        let mut world = world_with_gravity(Vector3::zeros());
        world.add_body(sphere_body(1.0, 0.5, Position::new(3.0, 0.0, 0.0)));
        let near = world.add_body(sphere_body(1.0, 0.5, Position::new(1.5, 0.0, 0.0)));

        let hit = world
            .raycast_closest(Position::origin(), Position::new(10.0, 0.0, 0.0))
            .unwrap();
        assert_eq!(hit.body_index, near);
        assert_abs_diff_eq!(hit.distance, 1.0, epsilon = 1e-9);

        let all = world.raycast_all(Position::origin(), Position::new(10.0, 0.0, 0.0));
        assert_eq!(all.len(), 4);

        assert!(
            world
                .raycast_any(Position::origin(), Position::new(0.0, 10.0, 0.0))
                .is_none()
        );
    }
}
