//! Rigid bodies: mass properties, integration and the sleep state machine.

use crate::{
    aabb::Aabb,
    fph,
    material::MaterialId,
    quantities::{AngularVelocity, Force, Impulse, Orientation, Position, Torque, Velocity},
    shape::Shape,
};
use bitflags::bitflags;
use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};
use std::sync::atomic::{AtomicU32, Ordering};

static BODY_ID_COUNTER: AtomicU32 = AtomicU32::new(0);

pub type BodyId = u32;

bitflags! {
    /// Kinematic category of a body. The flags are OR-able so immobility
    /// checks can test several categories at once.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct BodyType: u8 {
        /// Fully simulated: affected by forces and constraints.
        const DYNAMIC = 1;
        /// Immovable, infinite effective mass.
        const STATIC = 2;
        /// Moved only by direct velocity manipulation, infinite effective
        /// mass for solving.
        const KINEMATIC = 4;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SleepState {
    Awake,
    Sleepy,
    Sleeping,
}

/// Sleep-state transition reported by a body, turned into a world event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SleepEvent {
    Woken,
    BecameSleepy,
    FellAsleep,
}

/// A rigid body with attached collision shapes.
#[derive(Clone, Debug)]
pub struct Body {
    pub id: BodyId,
    /// Index into the world's body list; assigned by the world.
    pub index: usize,
    pub body_type: BodyType,
    pub mass: fph,
    pub inv_mass: fph,
    /// Inverse mass used by the solver: zero for sleeping and kinematic
    /// bodies regardless of configured mass.
    pub inv_mass_solve: fph,

    pub position: Position,
    pub previous_position: Position,
    pub interpolated_position: Position,
    pub orientation: Orientation,
    pub previous_orientation: Orientation,
    pub interpolated_orientation: Orientation,
    pub velocity: Velocity,
    pub angular_velocity: AngularVelocity,
    pub force: Force,
    pub torque: Torque,

    pub linear_factor: Vector3<fph>,
    pub angular_factor: Vector3<fph>,
    pub linear_damping: fph,
    pub angular_damping: fph,
    pub fixed_rotation: bool,

    pub collision_filter_group: u32,
    pub collision_filter_mask: u32,
    pub collision_response: bool,
    pub material: Option<MaterialId>,

    pub shapes: Vec<Shape>,
    pub shape_offsets: Vec<Vector3<fph>>,
    pub shape_orientations: Vec<Orientation>,

    pub aabb: Aabb,
    pub aabb_needs_update: bool,
    pub bounding_radius: fph,

    inertia: Vector3<fph>,
    pub inv_inertia: Vector3<fph>,
    pub inv_inertia_world: Matrix3<fph>,
    pub inv_inertia_solve: Vector3<fph>,
    pub inv_inertia_world_solve: Matrix3<fph>,

    pub allow_sleep: bool,
    sleep_state: SleepState,
    pub sleep_speed_limit: fph,
    pub sleep_time_limit: fph,
    time_last_sleepy: fph,
    pub wake_up_after_narrowphase: bool,

    /// Solver scratch delta-velocities, committed into the real velocities
    /// after convergence.
    pub vlambda: Vector3<fph>,
    pub wlambda: Vector3<fph>,
}

impl Body {
    /// Creates a body with the given mass. Zero mass yields a STATIC body.
    pub fn new(mass: fph) -> Self {
        assert!(mass >= 0.0, "Body mass cannot be negative");
        let body_type = if mass <= 0.0 {
            BodyType::STATIC
        } else {
            BodyType::DYNAMIC
        };
        let mut body = Self {
            id: BODY_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            index: usize::MAX,
            body_type,
            mass,
            inv_mass: if mass > 0.0 { 1.0 / mass } else { 0.0 },
            inv_mass_solve: 0.0,
            position: Position::origin(),
            previous_position: Position::origin(),
            interpolated_position: Position::origin(),
            orientation: Orientation::identity(),
            previous_orientation: Orientation::identity(),
            interpolated_orientation: Orientation::identity(),
            velocity: Velocity::zeros(),
            angular_velocity: AngularVelocity::zeros(),
            force: Force::zeros(),
            torque: Torque::zeros(),
            linear_factor: Vector3::repeat(1.0),
            angular_factor: Vector3::repeat(1.0),
            linear_damping: 0.01,
            angular_damping: 0.01,
            fixed_rotation: false,
            collision_filter_group: 1,
            collision_filter_mask: u32::MAX,
            collision_response: true,
            material: None,
            shapes: Vec::new(),
            shape_offsets: Vec::new(),
            shape_orientations: Vec::new(),
            aabb: Aabb::empty(),
            aabb_needs_update: true,
            bounding_radius: 0.0,
            inertia: Vector3::zeros(),
            inv_inertia: Vector3::zeros(),
            inv_inertia_world: Matrix3::zeros(),
            inv_inertia_solve: Vector3::zeros(),
            inv_inertia_world_solve: Matrix3::zeros(),
            allow_sleep: true,
            sleep_state: SleepState::Awake,
            sleep_speed_limit: 0.1,
            sleep_time_limit: 1.0,
            time_last_sleepy: 0.0,
            wake_up_after_narrowphase: false,
            vlambda: Vector3::zeros(),
            wlambda: Vector3::zeros(),
        };
        body.update_mass_properties();
        body
    }

    pub fn with_body_type(mut self, body_type: BodyType) -> Self {
        self.body_type = body_type;
        self
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = position;
        self.previous_position = position;
        self.interpolated_position = position;
        self
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self.previous_orientation = orientation;
        self.interpolated_orientation = orientation;
        self
    }

    pub fn with_material(mut self, material: MaterialId) -> Self {
        self.material = Some(material);
        self
    }

    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.add_shape(shape, Vector3::zeros(), Orientation::identity());
        self
    }

    /// Attaches a shape at the given local offset and orientation.
    pub fn add_shape(&mut self, shape: Shape, offset: Vector3<fph>, orientation: Orientation) {
        self.shapes.push(shape);
        self.shape_offsets.push(offset);
        self.shape_orientations.push(orientation);
        self.update_mass_properties();
        self.update_bounding_radius();
        self.aabb_needs_update = true;
    }

    pub fn sleep_state(&self) -> SleepState {
        self.sleep_state
    }

    pub fn is_awake(&self) -> bool {
        self.sleep_state == SleepState::Awake
    }

    pub fn is_sleeping(&self) -> bool {
        self.sleep_state == SleepState::Sleeping
    }

    /// Wakes the body. Returns the transition event if it was sleeping.
    pub fn wake_up(&mut self) -> Option<SleepEvent> {
        let was_sleeping = self.sleep_state == SleepState::Sleeping;
        self.sleep_state = SleepState::Awake;
        self.wake_up_after_narrowphase = false;
        was_sleeping.then_some(SleepEvent::Woken)
    }

    /// Forces the body to sleep, zeroing its velocities.
    pub fn sleep(&mut self) {
        self.sleep_state = SleepState::Sleeping;
        self.velocity = Velocity::zeros();
        self.angular_velocity = AngularVelocity::zeros();
        self.wake_up_after_narrowphase = false;
    }

    /// Advances the sleep state machine; called once per step with the
    /// current world time.
    pub fn sleep_tick(&mut self, time: fph) -> Option<SleepEvent> {
        if !self.allow_sleep {
            return None;
        }
        let speed_squared = self.velocity.norm_squared() + self.angular_velocity.norm_squared();
        let speed_limit_squared = self.sleep_speed_limit * self.sleep_speed_limit;

        match self.sleep_state {
            SleepState::Awake if speed_squared < speed_limit_squared => {
                self.sleep_state = SleepState::Sleepy;
                self.time_last_sleepy = time;
                Some(SleepEvent::BecameSleepy)
            }
            SleepState::Sleepy if speed_squared > speed_limit_squared => {
                self.wake_up();
                Some(SleepEvent::Woken)
            }
            SleepState::Sleepy if time - self.time_last_sleepy > self.sleep_time_limit => {
                self.sleep();
                Some(SleepEvent::FellAsleep)
            }
            _ => None,
        }
    }

    /// Recomputes inverse mass and the diagonal local inertia. A single
    /// shape attached at the body origin without rotation contributes its
    /// exact inertia; any other arrangement uses the inertia of the box
    /// bounding all shapes.
    pub fn update_mass_properties(&mut self) {
        self.inv_mass = if self.mass > 0.0 { 1.0 / self.mass } else { 0.0 };

        let single_centered_shape = self.shapes.len() == 1
            && self.shape_offsets[0] == Vector3::zeros()
            && self.shape_orientations[0] == Orientation::identity();
        self.inertia = if single_centered_shape {
            self.shapes[0].local_inertia(self.mass)
        } else {
            self.update_aabb();
            let half_extents = (self.aabb.upper - self.aabb.lower) * 0.5;
            crate::shape::cuboid_inertia(&half_extents, self.mass)
        };

        let fixed = self.fixed_rotation;
        self.inv_inertia = self.inertia.map(|i| {
            if i.is_finite() && i > 0.0 && !fixed {
                1.0 / i
            } else {
                0.0
            }
        });
        self.update_inertia_world(true);
    }

    /// Updates the world-frame inverse inertia tensor from the current
    /// orientation. Skipped for isotropic inertia unless forced.
    pub fn update_inertia_world(&mut self, force: bool) {
        let inv = &self.inv_inertia;
        if !force && inv.x == inv.y && inv.y == inv.z {
            // World tensor equals the local one for isotropic inertia.
            return;
        }
        let rotation = self.orientation.to_rotation_matrix();
        self.inv_inertia_world =
            rotation.matrix() * Matrix3::from_diagonal(inv) * rotation.matrix().transpose();
    }

    /// Refreshes the solve-time mass properties: sleeping and kinematic
    /// bodies act as immovable anchors.
    pub fn update_solve_mass_properties(&mut self) {
        if self.is_sleeping() || self.body_type == BodyType::KINEMATIC {
            self.inv_mass_solve = 0.0;
            self.inv_inertia_solve = Vector3::zeros();
            self.inv_inertia_world_solve = Matrix3::zeros();
        } else {
            self.inv_mass_solve = self.inv_mass;
            self.inv_inertia_solve = self.inv_inertia;
            self.inv_inertia_world_solve = self.inv_inertia_world;
        }
    }

    /// Recomputes the body AABB as the union of all shape world AABBs.
    pub fn update_aabb(&mut self) {
        let mut aabb = Aabb::empty();
        for (shape_index, shape) in self.shapes.iter().enumerate() {
            let (world_position, world_orientation) = self.shape_world_pose(shape_index);
            aabb.extend(&shape.world_aabb(&world_position, &world_orientation));
        }
        if self.shapes.is_empty() {
            aabb = Aabb::new(self.position, self.position);
        }
        self.aabb = aabb;
        self.aabb_needs_update = false;
    }

    /// The world pose of an attached shape.
    pub fn shape_world_pose(&self, shape_index: usize) -> (Position, Orientation) {
        let offset = self
            .orientation
            .transform_vector(&self.shape_offsets[shape_index]);
        (
            self.position + offset,
            self.orientation * self.shape_orientations[shape_index],
        )
    }

    /// Recomputes the bounding sphere radius around the body origin.
    pub fn update_bounding_radius(&mut self) {
        self.bounding_radius = self
            .shapes
            .iter()
            .zip(&self.shape_offsets)
            .map(|(shape, offset)| offset.norm() + shape.bounding_sphere_radius())
            .fold(0.0, fph::max);
    }

    pub fn point_to_local_frame(&self, world_point: &Position) -> Position {
        crate::quantities::point_to_local_frame(&self.position, &self.orientation, world_point)
    }

    pub fn point_to_world_frame(&self, local_point: &Position) -> Position {
        crate::quantities::point_to_world_frame(&self.position, &self.orientation, local_point)
    }

    pub fn vector_to_local_frame(&self, world_vector: &Vector3<fph>) -> Vector3<fph> {
        self.orientation.inverse_transform_vector(world_vector)
    }

    pub fn vector_to_world_frame(&self, local_vector: &Vector3<fph>) -> Vector3<fph> {
        self.orientation.transform_vector(local_vector)
    }

    /// Accumulates a world-frame force applied at a world-frame offset from
    /// the center of mass.
    pub fn apply_force(&mut self, force: &Force, relative_point: &Vector3<fph>) {
        if self.body_type != BodyType::DYNAMIC {
            return;
        }
        if self.is_sleeping() {
            self.wake_up();
        }
        self.force += force;
        self.torque += relative_point.cross(force);
    }

    /// Accumulates a local-frame force applied at a local point.
    pub fn apply_local_force(&mut self, local_force: &Force, local_point: &Vector3<fph>) {
        let world_force = self.vector_to_world_frame(local_force);
        let relative_point = self.vector_to_world_frame(local_point);
        self.apply_force(&world_force, &relative_point);
    }

    /// Applies a world-frame impulse at a world-frame offset from the center
    /// of mass, changing velocities immediately.
    pub fn apply_impulse(&mut self, impulse: &Impulse, relative_point: &Vector3<fph>) {
        if self.body_type != BodyType::DYNAMIC {
            return;
        }
        if self.is_sleeping() {
            self.wake_up();
        }
        self.velocity += impulse * self.inv_mass;
        self.angular_velocity += self.inv_inertia_world * relative_point.cross(impulse);
    }

    /// Applies a local-frame impulse at a local point.
    pub fn apply_local_impulse(&mut self, local_impulse: &Impulse, local_point: &Vector3<fph>) {
        let world_impulse = self.vector_to_world_frame(local_impulse);
        let relative_point = self.vector_to_world_frame(local_point);
        self.apply_impulse(&world_impulse, &relative_point);
    }

    /// The velocity of the body at a world point (rigid velocity field).
    pub fn velocity_at_world_point(&self, world_point: &Position) -> Velocity {
        let r = world_point - self.position;
        self.angular_velocity.cross(&r) + self.velocity
    }

    /// Semi-implicit Euler step: accumulates force/torque into velocities,
    /// then advances position and orientation. `quat_normalize` controls
    /// whether the orientation is renormalized this step; `fast` selects a
    /// first-order normalization.
    pub fn integrate(&mut self, dt: fph, quat_normalize: bool, quat_normalize_fast: bool) {
        self.previous_position = self.position;
        self.previous_orientation = self.orientation;

        if !(self.body_type.intersects(BodyType::DYNAMIC | BodyType::KINEMATIC))
            || self.is_sleeping()
        {
            return;
        }

        let inv_mass_dt = self.inv_mass * dt;
        self.velocity += (self.force * inv_mass_dt).component_mul(&self.linear_factor);
        self.angular_velocity += (self.inv_inertia_world
            * self.torque.component_mul(&self.angular_factor))
            * dt;

        self.position += self.velocity * dt;

        let omega = self.angular_velocity.component_mul(&self.angular_factor);
        let derivative = Quaternion::from_imag(omega) * self.orientation.into_inner();
        let integrated = self.orientation.into_inner() + derivative * (0.5 * dt);

        self.orientation = if quat_normalize {
            if quat_normalize_fast {
                // First-order normalization: scale by (3 - |q|^2) / 2.
                let scale = (3.0 - integrated.norm_squared()) * 0.5;
                UnitQuaternion::new_unchecked(integrated * scale)
            } else {
                UnitQuaternion::new_normalize(integrated)
            }
        } else {
            UnitQuaternion::new_unchecked(integrated)
        };

        self.aabb_needs_update = true;
        self.update_inertia_world(false);
    }
}
