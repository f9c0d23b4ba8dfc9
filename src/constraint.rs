//! Persistent constraints between body pairs.

use crate::{body::Body, equation::Equation};
use std::fmt;

/// A persistent constraint contributing equations to the solver every step.
/// Contact and friction equations are transient and bypass this trait;
/// implementors are long-lived joints between two bodies.
pub trait Constraint: fmt::Debug {
    /// World index of the first constrained body.
    fn body_a(&self) -> usize;

    /// World index of the second constrained body.
    fn body_b(&self) -> usize;

    /// Refreshes the constraint's equations from the current body states.
    fn update(&mut self, bodies: &[Body]);

    fn equations(&self) -> &[Equation];

    fn equations_mut(&mut self) -> &mut [Equation];

    /// Whether narrowphase contacts between the connected bodies are kept.
    /// When false, the world drops the pair before contact generation.
    fn collide_connected(&self) -> bool {
        true
    }

    fn set_enabled(&mut self, enabled: bool) {
        for equation in self.equations_mut() {
            equation.enabled = enabled;
        }
    }
}
