//! SPOOK-stabilized velocity constraint equations.

use crate::{body::Body, fph};
use nalgebra::Vector3;
use std::sync::atomic::{AtomicU32, Ordering};

static EQUATION_ID_COUNTER: AtomicU32 = AtomicU32::new(0);

/// One body's block of a constraint Jacobian: a spatial (linear) and a
/// rotational (angular) part.
#[derive(Clone, Copy, Debug, Default)]
pub struct JacobianElement {
    pub spatial: Vector3<fph>,
    pub rotational: Vector3<fph>,
}

impl JacobianElement {
    /// `G · W` for this block given the body's linear and angular velocity.
    pub fn multiply_vectors(&self, spatial: &Vector3<fph>, rotational: &Vector3<fph>) -> fph {
        self.spatial.dot(spatial) + self.rotational.dot(rotational)
    }
}

/// The concrete constraint behind an [`Equation`].
#[derive(Clone, Copy, Debug)]
pub enum EquationKind {
    /// Non-penetration along the contact normal.
    Contact {
        /// Contact point relative to body A's center of mass, world frame.
        ri: Vector3<fph>,
        /// Contact point relative to body B's center of mass, world frame.
        rj: Vector3<fph>,
        /// Unit contact normal pointing from body A toward body B.
        ni: Vector3<fph>,
        restitution: fph,
    },
    /// Tangential friction bounded by a fixed slip force.
    Friction {
        ri: Vector3<fph>,
        rj: Vector3<fph>,
        /// Unit tangent direction.
        t: Vector3<fph>,
    },
}

/// A scalar velocity constraint between two bodies (referenced by world
/// index), with force bounds and SPOOK stabilization parameters.
#[derive(Clone, Debug)]
pub struct Equation {
    pub id: u32,
    pub body_a: usize,
    pub body_b: usize,
    pub min_force: fph,
    pub max_force: fph,
    pub stiffness: fph,
    pub relaxation: fph,
    /// SPOOK position-error coefficient.
    pub a: fph,
    /// SPOOK velocity-error coefficient.
    pub b: fph,
    /// SPOOK softness (regularization) term.
    pub eps: fph,
    pub jacobian_a: JacobianElement,
    pub jacobian_b: JacobianElement,
    pub enabled: bool,
    /// Resolved constraint force (impulse / dt), reported after solving.
    pub multiplier: fph,
    pub kind: EquationKind,
}

impl Equation {
    fn new(body_a: usize, body_b: usize, min_force: fph, max_force: fph, kind: EquationKind) -> Self {
        let mut equation = Self {
            id: EQUATION_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            body_a,
            body_b,
            min_force,
            max_force,
            stiffness: 1e7,
            relaxation: 4.0,
            a: 0.0,
            b: 0.0,
            eps: 0.0,
            jacobian_a: JacobianElement::default(),
            jacobian_b: JacobianElement::default(),
            enabled: true,
            multiplier: 0.0,
            kind,
        };
        equation.set_spook_params(equation.stiffness, equation.relaxation, 1.0 / 60.0);
        equation
    }

    pub fn contact(body_a: usize, body_b: usize, max_force: fph) -> Self {
        Self::new(
            body_a,
            body_b,
            0.0,
            max_force,
            EquationKind::Contact {
                ri: Vector3::zeros(),
                rj: Vector3::zeros(),
                ni: Vector3::zeros(),
                restitution: 0.0,
            },
        )
    }

    pub fn friction(body_a: usize, body_b: usize, slip_force: fph) -> Self {
        Self::new(
            body_a,
            body_b,
            -slip_force,
            slip_force,
            EquationKind::Friction {
                ri: Vector3::zeros(),
                rj: Vector3::zeros(),
                t: Vector3::zeros(),
            },
        )
    }

    /// Recomputes the SPOOK coefficients from stiffness `k`, relaxation `d`
    /// and time step `h`.
    pub fn set_spook_params(&mut self, stiffness: fph, relaxation: fph, dt: fph) {
        let k = stiffness;
        let d = relaxation;
        let h = dt;
        self.stiffness = k;
        self.relaxation = d;
        self.a = 4.0 / (h * (1.0 + 4.0 * d));
        self.b = 4.0 * d / (1.0 + 4.0 * d);
        self.eps = 4.0 / (h * h * k * (1.0 + 4.0 * d));
    }

    /// Refreshes the Jacobian blocks from the constraint geometry and
    /// returns the right-hand-side bias `B` for time step `h`.
    pub fn compute_b(&mut self, h: fph, bodies: &[Body]) -> fph {
        let (body_a, body_b) = (&bodies[self.body_a], &bodies[self.body_b]);
        match self.kind {
            EquationKind::Contact {
                ri,
                rj,
                ni,
                restitution,
            } => {
                let rixn = ri.cross(&ni);
                let rjxn = rj.cross(&ni);
                self.jacobian_a.spatial = -ni;
                self.jacobian_a.rotational = -rixn;
                self.jacobian_b.spatial = ni;
                self.jacobian_b.rotational = rjxn;

                // Penetration depth along the normal.
                let g = (body_b.position.coords + rj - body_a.position.coords - ri).dot(&ni);

                // Relative normal velocity, restitution-weighted for the
                // linear part.
                let gw = (1.0 + restitution)
                    * (body_b.velocity.dot(&ni) - body_a.velocity.dot(&ni))
                    + body_b.angular_velocity.dot(&rjxn)
                    - body_a.angular_velocity.dot(&rixn);

                let gi_mf = self.compute_gi_mf(bodies);
                -g * self.a - gw * self.b - h * gi_mf
            }
            EquationKind::Friction { ri, rj, t } => {
                let rixt = ri.cross(&t);
                let rjxt = rj.cross(&t);
                self.jacobian_a.spatial = -t;
                self.jacobian_a.rotational = -rixt;
                self.jacobian_b.spatial = t;
                self.jacobian_b.rotational = rjxt;

                let gw = self.compute_gw(bodies);
                let gi_mf = self.compute_gi_mf(bodies);
                -gw * self.b - h * gi_mf
            }
        }
    }

    /// The diagonal mass term `G·M⁻¹·Gᵀ + eps`.
    pub fn compute_c(&self, bodies: &[Body]) -> fph {
        let (body_a, body_b) = (&bodies[self.body_a], &bodies[self.body_b]);
        let mut c = body_a.inv_mass_solve + body_b.inv_mass_solve + self.eps;
        c += (body_a.inv_inertia_world_solve * self.jacobian_a.rotational)
            .dot(&self.jacobian_a.rotational);
        c += (body_b.inv_inertia_world_solve * self.jacobian_b.rotational)
            .dot(&self.jacobian_b.rotational);
        debug_assert!(c.is_finite(), "Non-finite constraint mass term");
        c
    }

    /// `G·W` over the bodies' real velocities.
    pub fn compute_gw(&self, bodies: &[Body]) -> fph {
        let (body_a, body_b) = (&bodies[self.body_a], &bodies[self.body_b]);
        self.jacobian_a
            .multiply_vectors(&body_a.velocity, &body_a.angular_velocity)
            + self
                .jacobian_b
                .multiply_vectors(&body_b.velocity, &body_b.angular_velocity)
    }

    /// `G·W` over the bodies' scratch delta-velocities.
    pub fn compute_gw_lambda(&self, bodies: &[Body]) -> fph {
        let (body_a, body_b) = (&bodies[self.body_a], &bodies[self.body_b]);
        self.jacobian_a
            .multiply_vectors(&body_a.vlambda, &body_a.wlambda)
            + self
                .jacobian_b
                .multiply_vectors(&body_b.vlambda, &body_b.wlambda)
    }

    /// `G·M⁻¹·f` over the bodies' accumulated external forces and torques.
    fn compute_gi_mf(&self, bodies: &[Body]) -> fph {
        let (body_a, body_b) = (&bodies[self.body_a], &bodies[self.body_b]);
        self.jacobian_a.spatial.dot(&(body_a.force * body_a.inv_mass_solve))
            + self
                .jacobian_a
                .rotational
                .dot(&(body_a.inv_inertia_world_solve * body_a.torque))
            + self.jacobian_b.spatial.dot(&(body_b.force * body_b.inv_mass_solve))
            + self
                .jacobian_b
                .rotational
                .dot(&(body_b.inv_inertia_world_solve * body_b.torque))
    }

    /// Applies an impulse-space correction to both bodies' scratch
    /// velocities through the Jacobian.
    pub fn add_to_w_lambda(&self, deltalambda: fph, bodies: &mut [Body]) {
        {
            let body_a = &mut bodies[self.body_a];
            body_a.vlambda += self.jacobian_a.spatial * (body_a.inv_mass_solve * deltalambda);
            body_a.wlambda +=
                (body_a.inv_inertia_world_solve * self.jacobian_a.rotational) * deltalambda;
        }
        {
            let body_b = &mut bodies[self.body_b];
            body_b.vlambda += self.jacobian_b.spatial * (body_b.inv_mass_solve * deltalambda);
            body_b.wlambda +=
                (body_b.inv_inertia_world_solve * self.jacobian_b.rotational) * deltalambda;
        }
    }

    /// Relative velocity of the contact points along the contact normal,
    /// negative when approaching. Zero for non-contact equations.
    pub fn impact_velocity_along_normal(&self, bodies: &[Body]) -> fph {
        let EquationKind::Contact { ri, rj, ni, .. } = &self.kind else {
            return 0.0;
        };
        let (body_a, body_b) = (&bodies[self.body_a], &bodies[self.body_b]);
        let vi = body_a.velocity + body_a.angular_velocity.cross(ri);
        let vj = body_b.velocity + body_b.angular_velocity.cross(rj);
        ni.dot(&(vi - vj))
    }
}
