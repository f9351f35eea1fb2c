//! Sequential quadratic programming for smooth objectives under affine
//! constraints and box bounds.
//!
//! Each iteration solves a QP built from a damped-BFGS model of the
//! objective's Hessian, then backtracks along the QP step on an L1
//! exact-penalty merit function. Iterates always satisfy the bounds.

use tracing::{debug, warn};

use super::linalg::{identity, mat_vec_multiply, norm_inf, vec_dot};
use super::objective::Objective;
use super::qp::{solve_qp, QpError};
use super::solver::{
    gradient_of, max_violation, Bound, ConstrainedSolver, LinearConstraint, SolverDiagnostics,
    SolverReport,
};
use crate::config::SolverSettings;

/// Sufficient-decrease fraction for the merit line search.
const ARMIJO: f64 = 1e-4;
/// Step halvings before the line search gives up.
const MAX_BACKTRACKS: u32 = 40;
/// QP steps below this length are treated as stationary when a line search stalls.
const STALL_STEP: f64 = 1e-7;

#[derive(Debug, Clone, Default)]
pub struct SqpSolver {
    pub settings: SolverSettings,
}

impl SqpSolver {
    pub fn new(settings: SolverSettings) -> Self {
        Self { settings }
    }
}

impl ConstrainedSolver for SqpSolver {
    fn name(&self) -> &'static str {
        "sqp"
    }

    fn minimize(
        &self,
        objective: &dyn Objective,
        constraints: &[LinearConstraint],
        bounds: &[Bound],
        initial_point: &[f64],
    ) -> SolverReport {
        let n = initial_point.len();
        if let Some(reason) = check_dimensions(constraints, bounds, n) {
            return finish(
                initial_point.to_vec(),
                false,
                0,
                f64::NAN,
                constraints,
                bounds,
                reason,
            );
        }

        let s = &self.settings;
        let mut x = project_onto_bounds(initial_point, bounds);
        let mut f = objective.value(&x);
        if !f.is_finite() {
            return finish(
                x,
                false,
                0,
                f,
                constraints,
                bounds,
                "Objective is not finite at the initial point".into(),
            );
        }
        let mut g = gradient_of(objective, &x);
        if g.iter().any(|v| !v.is_finite()) {
            return finish(
                x,
                false,
                0,
                f,
                constraints,
                bounds,
                "Gradient is not finite at the initial point".into(),
            );
        }

        let mut hessian = identity(n);
        let mut penalties = vec![0.0; constraints.len()];

        for iteration in 1..=s.max_iterations {
            let subproblem = subproblem_constraints(constraints, bounds, &x);
            let qp = match solve_qp(&hessian, &g, &subproblem) {
                Ok(qp) => qp,
                Err(e) => {
                    let reason = match e {
                        QpError::Infeasible => "Inequality constraints incompatible",
                        QpError::Singular => "Singular matrix in quadratic subproblem",
                        QpError::IterationLimit => "Quadratic subproblem iteration limit reached",
                    };
                    return finish(x, false, iteration, f, constraints, bounds, reason.into());
                }
            };
            let d = qp.x;
            let violation = general_violation(constraints, &x);

            if norm_inf(&d) <= s.step_tolerance && violation <= s.constraint_tolerance {
                return finish(
                    x,
                    true,
                    iteration,
                    f,
                    constraints,
                    bounds,
                    "Optimization terminated successfully".into(),
                );
            }

            // Penalties must dominate the multipliers for d to be a descent
            // direction of the merit function.
            for (pen, lam) in penalties.iter_mut().zip(qp.multipliers.iter()) {
                let lam = lam.abs();
                *pen = if iteration == 1 {
                    lam
                } else {
                    lam.max(0.5 * (*pen + lam))
                };
            }

            let merit = f + penalty_term(constraints, &penalties, &x);
            let slope = (vec_dot(&g, &d) - penalty_term(constraints, &penalties, &x)).min(0.0);
            let noise = 16.0 * f64::EPSILON * (1.0 + merit.abs());

            let mut alpha = 1.0;
            let mut accepted = None;
            for _ in 0..MAX_BACKTRACKS {
                let trial: Vec<f64> = x
                    .iter()
                    .zip(d.iter())
                    .map(|(xi, di)| xi + alpha * di)
                    .collect();
                let trial = project_onto_bounds(&trial, bounds);
                let f_trial = objective.value(&trial);
                if f_trial.is_finite() {
                    let merit_trial = f_trial + penalty_term(constraints, &penalties, &trial);
                    if merit_trial <= merit + ARMIJO * alpha * slope + noise {
                        accepted = Some((trial, f_trial));
                        break;
                    }
                }
                alpha *= 0.5;
            }

            let Some((x_new, f_new)) = accepted else {
                if violation <= s.constraint_tolerance && norm_inf(&d) <= STALL_STEP {
                    return finish(
                        x,
                        true,
                        iteration,
                        f,
                        constraints,
                        bounds,
                        "Optimization terminated successfully".into(),
                    );
                }
                return finish(
                    x,
                    false,
                    iteration,
                    f,
                    constraints,
                    bounds,
                    "Line search failed to reduce the merit function".into(),
                );
            };

            let g_new = gradient_of(objective, &x_new);
            if g_new.iter().any(|v| !v.is_finite()) {
                return finish(
                    x_new,
                    false,
                    iteration,
                    f_new,
                    constraints,
                    bounds,
                    "Gradient is not finite".into(),
                );
            }

            let step: Vec<f64> = x_new.iter().zip(x.iter()).map(|(a, b)| a - b).collect();
            let delta_f = (f_new - f).abs();
            let violation_new = general_violation(constraints, &x_new);

            debug!(
                iteration,
                objective = f_new,
                step = norm_inf(&step),
                alpha,
                violation = violation_new,
                "SQP iteration"
            );

            x = x_new;
            f = f_new;

            if violation_new <= s.constraint_tolerance
                && (delta_f <= s.function_tolerance || norm_inf(&step) <= s.step_tolerance)
            {
                return finish(
                    x,
                    true,
                    iteration,
                    f,
                    constraints,
                    bounds,
                    "Optimization terminated successfully".into(),
                );
            }

            // Constraints are affine, so the Lagrangian gradient difference
            // equals the objective gradient difference.
            let y: Vec<f64> = g_new.iter().zip(g.iter()).map(|(a, b)| a - b).collect();
            damped_bfgs_update(&mut hessian, &step, &y);
            g = g_new;
        }

        warn!(
            max_iterations = s.max_iterations,
            "SQP iteration limit reached"
        );
        finish(
            x,
            false,
            s.max_iterations,
            f,
            constraints,
            bounds,
            "Iteration limit reached".into(),
        )
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn check_dimensions(
    constraints: &[LinearConstraint],
    bounds: &[Bound],
    n: usize,
) -> Option<String> {
    if n == 0 {
        return Some("Empty decision vector".into());
    }
    if bounds.len() != n {
        return Some(format!("Expected {} bounds but got {}", n, bounds.len()));
    }
    if let Some(i) = bounds
        .iter()
        .position(|b| b.lower.is_nan() || b.upper.is_nan() || b.lower > b.upper)
    {
        return Some(format!("Bound {} has lower > upper", i));
    }
    if let Some(i) = constraints.iter().position(|c| c.coefficients.len() != n) {
        return Some(format!("Constraint {} has the wrong number of coefficients", i));
    }
    None
}

fn project_onto_bounds(x: &[f64], bounds: &[Bound]) -> Vec<f64> {
    x.iter()
        .zip(bounds.iter())
        .map(|(v, b)| b.clamp(*v))
        .collect()
}

fn general_violation(constraints: &[LinearConstraint], x: &[f64]) -> f64 {
    constraints
        .iter()
        .map(|c| c.violation(x))
        .fold(0.0, f64::max)
}

fn penalty_term(constraints: &[LinearConstraint], penalties: &[f64], x: &[f64]) -> f64 {
    constraints
        .iter()
        .zip(penalties.iter())
        .map(|(c, p)| p * c.violation(x))
        .sum()
}

/// Constraints of the QP in the step `d`: the problem constraints shifted to
/// `x`, followed by the bounds as `d_i >= lower_i - x_i`, `-d_i >= x_i - upper_i`.
fn subproblem_constraints(
    constraints: &[LinearConstraint],
    bounds: &[Bound],
    x: &[f64],
) -> Vec<LinearConstraint> {
    let n = x.len();
    let mut rows = Vec::with_capacity(constraints.len() + 2 * n);
    for c in constraints {
        rows.push(LinearConstraint {
            kind: c.kind,
            coefficients: c.coefficients.clone(),
            rhs: -c.residual(x),
        });
    }
    for (i, b) in bounds.iter().enumerate() {
        if b.lower.is_finite() {
            let mut e = vec![0.0; n];
            e[i] = 1.0;
            rows.push(LinearConstraint::at_least(e, b.lower - x[i]));
        }
        if b.upper.is_finite() {
            let mut e = vec![0.0; n];
            e[i] = -1.0;
            rows.push(LinearConstraint::at_least(e, x[i] - b.upper));
        }
    }
    rows
}

/// Powell-damped BFGS update; keeps the model Hessian positive definite.
fn damped_bfgs_update(hessian: &mut [Vec<f64>], s: &[f64], y: &[f64]) {
    let bs = mat_vec_multiply(hessian, s);
    let sbs = vec_dot(s, &bs);
    if sbs.is_nan() || sbs <= f64::EPSILON * vec_dot(s, s) {
        return;
    }
    let sy = vec_dot(s, y);
    let theta = if sy >= 0.2 * sbs {
        1.0
    } else {
        0.8 * sbs / (sbs - sy)
    };
    let r: Vec<f64> = y
        .iter()
        .zip(bs.iter())
        .map(|(yi, bsi)| theta * yi + (1.0 - theta) * bsi)
        .collect();
    let sr = vec_dot(s, &r);
    if sr.is_nan() || sr <= 0.0 {
        return;
    }
    for (i, row) in hessian.iter_mut().enumerate() {
        for (j, h) in row.iter_mut().enumerate() {
            *h += r[i] * r[j] / sr - bs[i] * bs[j] / sbs;
        }
    }
}

fn finish(
    x: Vec<f64>,
    converged: bool,
    iterations: u32,
    objective_value: f64,
    constraints: &[LinearConstraint],
    bounds: &[Bound],
    message: String,
) -> SolverReport {
    let constraint_violation = if x.len() == bounds.len() {
        max_violation(constraints, bounds, &x)
    } else {
        f64::NAN
    };
    if converged {
        debug!(iterations, objective_value, "{}", message);
    } else {
        warn!(
            iterations,
            objective_value,
            constraint_violation,
            "{}",
            message
        );
    }
    SolverReport {
        x,
        converged,
        diagnostics: SolverDiagnostics {
            iterations,
            objective_value,
            constraint_violation,
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Squared distance to a fixed point; no analytic gradient.
    struct Distance {
        target: Vec<f64>,
    }

    impl Distance {
        fn towards(target: Vec<f64>) -> Self {
            Self { target }
        }
    }

    impl Objective for Distance {
        fn value(&self, x: &[f64]) -> f64 {
            x.iter()
                .zip(self.target.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum()
        }
    }

    fn simplex(n: usize) -> (Vec<LinearConstraint>, Vec<Bound>) {
        (
            vec![LinearConstraint::equality(vec![1.0; n], 1.0)],
            vec![Bound::UNIT; n],
        )
    }

    #[test]
    fn test_interior_solution_with_numerical_gradient() {
        let (cons, bounds) = simplex(2);
        let obj = Distance::towards(vec![0.3, 0.7]);
        let report = SqpSolver::default().minimize(&obj, &cons, &bounds, &[0.5, 0.5]);
        assert!(report.converged, "{}", report.diagnostics.message);
        assert_abs_diff_eq!(report.x[0], 0.3, epsilon = 1e-6);
        assert_abs_diff_eq!(report.x[1], 0.7, epsilon = 1e-6);
    }

    #[test]
    fn test_projection_onto_simplex_vertex() {
        let (cons, bounds) = simplex(3);
        let obj = Distance::towards(vec![2.0, -1.0, 0.0]);
        let third = 1.0 / 3.0;
        let report = SqpSolver::default().minimize(&obj, &cons, &bounds, &[third; 3]);
        assert!(report.converged, "{}", report.diagnostics.message);
        assert_abs_diff_eq!(report.x[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(report.x[1], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(report.x[2], 0.0, epsilon = 1e-6);
        assert!(report.diagnostics.constraint_violation < 1e-8);
    }

    #[test]
    fn test_inequality_constraint_active() {
        // Closest simplex point to (0.5, 0.5) with 0.1 x0 + 0.2 x1 >= 0.18 is (0.2, 0.8)
        let (mut cons, bounds) = simplex(2);
        cons.push(LinearConstraint::at_least(vec![0.1, 0.2], 0.18));
        let obj = Distance::towards(vec![0.5, 0.5]);
        let report = SqpSolver::default().minimize(&obj, &cons, &bounds, &[0.5, 0.5]);
        assert!(report.converged, "{}", report.diagnostics.message);
        assert_abs_diff_eq!(report.x[0], 0.2, epsilon = 1e-6);
        assert_abs_diff_eq!(report.x[1], 0.8, epsilon = 1e-6);
    }

    #[test]
    fn test_incompatible_constraints_reported() {
        let (mut cons, bounds) = simplex(2);
        cons.push(LinearConstraint::at_least(vec![0.1, 0.2], 0.5));
        let obj = Distance::towards(vec![0.5, 0.5]);
        let report = SqpSolver::default().minimize(&obj, &cons, &bounds, &[0.5, 0.5]);
        assert!(!report.converged);
        assert_eq!(
            report.diagnostics.message,
            "Inequality constraints incompatible"
        );
    }

    #[test]
    fn test_non_finite_start_reported() {
        struct Singular;
        impl Objective for Singular {
            fn value(&self, _x: &[f64]) -> f64 {
                f64::INFINITY
            }
        }
        let (cons, bounds) = simplex(1);
        let report = SqpSolver::default().minimize(&Singular, &cons, &bounds, &[1.0]);
        assert!(!report.converged);
        assert_eq!(report.diagnostics.iterations, 0);
    }

    #[test]
    fn test_dimension_mismatch_reported() {
        let obj = Distance::towards(vec![0.0, 0.0]);
        let report = SqpSolver::default().minimize(&obj, &[], &[Bound::UNIT], &[0.5, 0.5]);
        assert!(!report.converged);
        assert!(report.diagnostics.message.contains("bounds"));
    }

    #[test]
    fn test_bfgs_update_keeps_positive_curvature() {
        let mut h = identity(2);
        // Negative curvature pair gets damped
        damped_bfgs_update(&mut h, &[1.0, 0.0], &[-1.0, 0.0]);
        let q = vec_dot(&[1.0, 0.0], &mat_vec_multiply(&h, &[1.0, 0.0]));
        assert!(q > 0.0);
    }
}
