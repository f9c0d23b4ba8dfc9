//! Constraint solvers.

use crate::{body::Body, body::BodyType, equation::Equation, fph};
use nalgebra::Vector3;
use std::fmt;

/// Resolves a batch of [`Equation`]s against the body set each step.
pub trait Solver: fmt::Debug {
    fn add_equation(&mut self, equation: Equation);

    fn clear_equations(&mut self);

    /// Solves the queued equations and commits the resulting velocity
    /// changes to the bodies. Returns the number of iterations used.
    fn solve(&mut self, dt: fph, bodies: &mut [Body]) -> usize;
}

/// Projected Gauss-Seidel over the queued equations. Each equation's
/// accumulated impulse is clamped into its force bounds after every update.
fn gauss_seidel(
    equations: &mut [Equation],
    dt: fph,
    bodies: &mut [Body],
    max_iterations: usize,
    tolerance: fph,
) -> usize {
    if equations.is_empty() {
        return 0;
    }

    let tolerance_squared = tolerance * tolerance;
    let h = dt;

    for body in bodies.iter_mut() {
        body.vlambda = Vector3::zeros();
        body.wlambda = Vector3::zeros();
    }

    let mut lambdas = vec![0.0; equations.len()];
    let mut inv_cs = vec![0.0; equations.len()];
    let mut bs = vec![0.0; equations.len()];
    for (index, equation) in equations.iter_mut().enumerate() {
        if !equation.enabled {
            continue;
        }
        equation.multiplier = 0.0;
        bs[index] = equation.compute_b(h, bodies);
        inv_cs[index] = 1.0 / equation.compute_c(bodies);
    }

    let mut iterations = 0;
    while iterations < max_iterations {
        iterations += 1;

        let mut delta_lambda_total = 0.0;
        for (index, equation) in equations.iter().enumerate() {
            if !equation.enabled {
                continue;
            }

            let gw_lambda = equation.compute_gw_lambda(bodies);
            let mut delta_lambda =
                inv_cs[index] * (bs[index] - gw_lambda - equation.eps * lambdas[index]);

            // Clamp the accumulated impulse, not the increment.
            if lambdas[index] + delta_lambda < equation.min_force {
                delta_lambda = equation.min_force - lambdas[index];
            } else if lambdas[index] + delta_lambda > equation.max_force {
                delta_lambda = equation.max_force - lambdas[index];
            }
            lambdas[index] += delta_lambda;

            delta_lambda_total += delta_lambda.abs();
            equation.add_to_w_lambda(delta_lambda, bodies);
        }

        if delta_lambda_total * delta_lambda_total < tolerance_squared {
            break;
        }
    }

    for body in bodies.iter_mut() {
        body.velocity += body.vlambda.component_mul(&body.linear_factor);
        body.angular_velocity += body.wlambda.component_mul(&body.angular_factor);
    }
    for (equation, lambda) in equations.iter_mut().zip(&lambdas) {
        equation.multiplier = lambda / h;
    }

    iterations
}

/// Monolithic iterative solver treating all queued equations as one system.
#[derive(Debug)]
pub struct GaussSeidelSolver {
    pub iterations: usize,
    pub tolerance: fph,
    equations: Vec<Equation>,
}

impl GaussSeidelSolver {
    pub fn new() -> Self {
        Self {
            iterations: 10,
            tolerance: 1e-7,
            equations: Vec::new(),
        }
    }

    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }
}

impl Default for GaussSeidelSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Solver for GaussSeidelSolver {
    fn add_equation(&mut self, equation: Equation) {
        self.equations.push(equation);
    }

    fn clear_equations(&mut self) {
        self.equations.clear();
    }

    fn solve(&mut self, dt: fph, bodies: &mut [Body]) -> usize {
        gauss_seidel(
            &mut self.equations,
            dt,
            bodies,
            self.iterations,
            self.tolerance,
        )
    }
}

/// Splits the queued equations into independent constraint islands and
/// solves each island separately. Islands are connected components of the
/// body-equation graph; static and sleeping bodies do not join islands
/// together.
#[derive(Debug)]
pub struct SplitSolver {
    pub iterations: usize,
    pub tolerance: fph,
    equations: Vec<Equation>,
    island_count: usize,
}

impl SplitSolver {
    pub fn new() -> Self {
        Self {
            iterations: 10,
            tolerance: 1e-7,
            equations: Vec::new(),
            island_count: 0,
        }
    }

    /// Number of islands found in the most recent solve.
    pub fn island_count(&self) -> usize {
        self.island_count
    }

    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }

    fn propagates(body: &Body) -> bool {
        !body.body_type.contains(BodyType::STATIC) && !body.is_sleeping()
    }

    /// Partitions equation indices into islands by breadth-first search.
    fn split(&self, bodies: &[Body]) -> Vec<Vec<usize>> {
        let mut body_equations: Vec<Vec<usize>> = vec![Vec::new(); bodies.len()];
        for (index, equation) in self.equations.iter().enumerate() {
            body_equations[equation.body_a].push(index);
            body_equations[equation.body_b].push(index);
        }

        let mut body_visited = vec![false; bodies.len()];
        let mut equation_taken = vec![false; self.equations.len()];
        let mut islands = Vec::new();

        for root in 0..bodies.len() {
            if body_visited[root]
                || body_equations[root].is_empty()
                || !Self::propagates(&bodies[root])
            {
                continue;
            }

            let mut island = Vec::new();
            let mut queue = vec![root];
            body_visited[root] = true;
            while let Some(current) = queue.pop() {
                for &equation_index in &body_equations[current] {
                    if equation_taken[equation_index] {
                        continue;
                    }
                    equation_taken[equation_index] = true;
                    island.push(equation_index);

                    let equation = &self.equations[equation_index];
                    let other = if equation.body_a == current {
                        equation.body_b
                    } else {
                        equation.body_a
                    };
                    if !body_visited[other] && Self::propagates(&bodies[other]) {
                        body_visited[other] = true;
                        queue.push(other);
                    }
                }
            }
            if !island.is_empty() {
                island.sort_unstable_by_key(|&index| self.equations[index].id);
                islands.push(island);
            }
        }
        islands
    }
}

impl Default for SplitSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Solver for SplitSolver {
    fn add_equation(&mut self, equation: Equation) {
        self.equations.push(equation);
    }

    fn clear_equations(&mut self) {
        self.equations.clear();
    }

    fn solve(&mut self, dt: fph, bodies: &mut [Body]) -> usize {
        let islands = self.split(bodies);
        self.island_count = islands.len();
        log::trace!(
            "Solving {} equations in {} islands",
            self.equations.len(),
            islands.len()
        );

        let mut iterations = 0;
        for island in islands {
            let mut island_equations: Vec<Equation> = island
                .iter()
                .map(|&index| self.equations[index].clone())
                .collect();
            iterations += gauss_seidel(
                &mut island_equations,
                dt,
                bodies,
                self.iterations,
                self.tolerance,
            );
            for (equation, solved) in island.iter().zip(&island_equations) {
                self.equations[*equation].multiplier = solved.multiplier;
            }
        }
        iterations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equation::EquationKind;
    use crate::quantities::Position;
    use crate::shape::Shape;
    use approx::assert_abs_diff_eq;

    fn overlapping_sphere_pair(offset: fph) -> Vec<Body> {
        let mut bodies = vec![
            Body::new(1.0)
                .with_shape(Shape::sphere(0.5))
                .with_position(Position::new(offset, 0.0, 0.0)),
            Body::new(1.0)
                .with_shape(Shape::sphere(0.5))
                .with_position(Position::new(offset, 0.0, 0.9)),
        ];
        for body in &mut bodies {
            body.update_solve_mass_properties();
        }
        bodies
    }

    fn contact_between(body_a: usize, body_b: usize) -> Equation {
        let mut equation = Equation::contact(body_a, body_b, 1e6);
        let EquationKind::Contact { ri, rj, ni, .. } = &mut equation.kind else {
            unreachable!();
        };
        *ni = Vector3::new(0.0, 0.0, 1.0);
        *ri = Vector3::new(0.0, 0.0, 0.5);
        *rj = Vector3::new(0.0, 0.0, -0.5);
        equation
    }

    #[test]
    fn should_push_penetrating_bodies_apart() {
        let mut bodies = overlapping_sphere_pair(0.0);
        let mut solver = GaussSeidelSolver::new();
        solver.add_equation(contact_between(0, 1));

        let iterations = solver.solve(1.0 / 60.0, &mut bodies);
        assert!(iterations > 0);
        assert!(bodies[0].velocity.z < 0.0);
        assert!(bodies[1].velocity.z > 0.0);
        assert_abs_diff_eq!(bodies[0].velocity.z, -bodies[1].velocity.z, epsilon = 1e-9);
    }

    #[test]
    fn should_report_positive_multiplier_for_active_contact() {
        let mut bodies = overlapping_sphere_pair(0.0);
        let mut solver = GaussSeidelSolver::new();
        solver.add_equation(contact_between(0, 1));
        let _ = solver.solve(1.0 / 60.0, &mut bodies);
        assert!(solver.equations()[0].multiplier > 0.0);
    }

    #[test]
    fn should_freeze_velocity_components_with_zero_linear_factor() {
        let mut bodies = overlapping_sphere_pair(0.0);
        bodies[0].linear_factor = Vector3::zeros();
        let mut solver = GaussSeidelSolver::new();
        solver.add_equation(contact_between(0, 1));
        let _ = solver.solve(1.0 / 60.0, &mut bodies);
        assert_abs_diff_eq!(bodies[0].velocity.z, 0.0, epsilon = 1e-12);
        assert!(bodies[1].velocity.z > 0.0);
    }

    #[test]
    fn should_split_disjoint_pairs_into_islands() {
        let mut bodies = overlapping_sphere_pair(0.0);
        bodies.extend(overlapping_sphere_pair(100.0));
        for (index, body) in bodies.iter_mut().enumerate() {
            body.index = index;
        }

        let mut solver = SplitSolver::new();
        solver.add_equation(contact_between(0, 1));
        solver.add_equation(contact_between(2, 3));
        let _ = solver.solve(1.0 / 60.0, &mut bodies);

        assert_eq!(solver.island_count(), 2);
        assert!(bodies[1].velocity.z > 0.0);
        assert!(bodies[3].velocity.z > 0.0);
    }

    #[test]
    fn should_not_bridge_islands_through_static_bodies() {
        let mut bodies = overlapping_sphere_pair(0.0);
        bodies.push(Body::new(0.0).with_shape(Shape::sphere(0.5)));
        for (index, body) in bodies.iter_mut().enumerate() {
            body.index = index;
        }
        bodies[2].update_solve_mass_properties();

        let mut solver = SplitSolver::new();
        solver.add_equation(contact_between(0, 2));
        solver.add_equation(contact_between(1, 2));
        let _ = solver.solve(1.0 / 60.0, &mut bodies);
        assert_eq!(solver.island_count(), 2);
    }

    #[test]
    fn should_respect_force_bounds() {
        let mut bodies = overlapping_sphere_pair(0.0);
        let mut equation = contact_between(0, 1);
        equation.max_force = 0.0;
        let mut solver = GaussSeidelSolver::new();
        solver.add_equation(equation);
        let _ = solver.solve(1.0 / 60.0, &mut bodies);
        assert_abs_diff_eq!(bodies[1].velocity.z, 0.0, epsilon = 1e-12);
    }
}
