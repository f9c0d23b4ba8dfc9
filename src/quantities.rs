//! Physical quantities used across the simulation.

use crate::fph;
use nalgebra::{Point3, UnitQuaternion, Vector3};

/// A position in 3D space.
pub type Position = Point3<fph>;

/// An orientation in 3D space.
pub type Orientation = UnitQuaternion<fph>;

/// A linear velocity.
pub type Velocity = Vector3<fph>;

/// An angular velocity about the coordinate axes.
pub type AngularVelocity = Vector3<fph>;

/// A force.
pub type Force = Vector3<fph>;

/// A torque.
pub type Torque = Vector3<fph>;

/// An impulse (momentum transfer).
pub type Impulse = Vector3<fph>;

/// Transforms a point given in the local frame of a pose into world space.
pub fn point_to_world_frame(
    position: &Position,
    orientation: &Orientation,
    local_point: &Position,
) -> Position {
    position + orientation.transform_vector(&local_point.coords)
}

/// Transforms a world-space point into the local frame of a pose.
pub fn point_to_local_frame(
    position: &Position,
    orientation: &Orientation,
    world_point: &Position,
) -> Position {
    Position::from(orientation.inverse_transform_vector(&(world_point - position)))
}

/// Rotates a world-space vector into the local frame of a pose.
pub fn vector_to_local_frame(orientation: &Orientation, world_vector: &Vector3<fph>) -> Vector3<fph> {
    orientation.inverse_transform_vector(world_vector)
}

/// Rotates a local-frame vector into world space.
pub fn vector_to_world_frame(orientation: &Orientation, local_vector: &Vector3<fph>) -> Vector3<fph> {
    orientation.transform_vector(local_vector)
}
