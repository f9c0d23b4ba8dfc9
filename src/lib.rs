//! Discrete-time rigid-body physics: broadphase pair pruning, per-shape-pair
//! narrowphase contact generation, a projected Gauss-Seidel constraint solver
//! with SPOOK stabilization, semi-implicit Euler integration and a sleep
//! state machine, orchestrated by a [`World`](world::World).

pub mod aabb;
pub mod body;
pub mod broadphase;
pub mod constraint;
pub mod equation;
pub mod material;
pub mod narrowphase;
pub mod overlap;
pub mod quantities;
pub mod ray;
pub mod shape;
pub mod solver;
pub mod world;

/// Floating point type used for physical quantities.
#[allow(non_camel_case_types)]
pub type fph = f64;

pub use aabb::Aabb;
pub use body::{Body, BodyType, SleepState};
pub use broadphase::{Broadphase, NaiveBroadphase, SapBroadphase};
pub use constraint::Constraint;
pub use material::{ContactMaterial, Material};
pub use ray::{Ray, RayMode, RaycastHit, RaycastResult};
pub use shape::Shape;
pub use solver::{GaussSeidelSolver, Solver, SplitSolver};
pub use world::{Event, World, WorldConfig};
