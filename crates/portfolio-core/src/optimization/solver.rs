use serde::{Deserialize, Serialize};

use super::linalg::vec_dot;
use super::objective::Objective;

// ---------------------------------------------------------------------------
// Problem description
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    /// `c . x = rhs`
    Equality,
    /// `c . x >= rhs`
    Inequality,
}

/// An affine constraint on the decision vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearConstraint {
    pub kind: ConstraintKind,
    pub coefficients: Vec<f64>,
    pub rhs: f64,
}

impl LinearConstraint {
    pub fn equality(coefficients: Vec<f64>, rhs: f64) -> Self {
        Self {
            kind: ConstraintKind::Equality,
            coefficients,
            rhs,
        }
    }

    pub fn at_least(coefficients: Vec<f64>, rhs: f64) -> Self {
        Self {
            kind: ConstraintKind::Inequality,
            coefficients,
            rhs,
        }
    }

    /// `c . x - rhs`
    pub fn residual(&self, x: &[f64]) -> f64 {
        vec_dot(&self.coefficients, x) - self.rhs
    }

    /// Amount by which `x` breaks the constraint (zero when satisfied).
    pub fn violation(&self, x: &[f64]) -> f64 {
        let r = self.residual(x);
        match self.kind {
            ConstraintKind::Equality => r.abs(),
            ConstraintKind::Inequality => (-r).max(0.0),
        }
    }
}

/// Box bound on one decision variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub lower: f64,
    pub upper: f64,
}

impl Bound {
    pub const UNIT: Bound = Bound {
        lower: 0.0,
        upper: 1.0,
    };

    pub fn clamp(&self, v: f64) -> f64 {
        v.max(self.lower).min(self.upper)
    }
}

// ---------------------------------------------------------------------------
// Solver result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverDiagnostics {
    pub iterations: u32,
    pub objective_value: f64,
    /// Largest violation over constraints and bounds at the returned point.
    pub constraint_violation: f64,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct SolverReport {
    pub x: Vec<f64>,
    pub converged: bool,
    pub diagnostics: SolverDiagnostics,
}

/// A local solver for `min f(x)` under affine constraints and box bounds.
pub trait ConstrainedSolver {
    fn name(&self) -> &'static str;

    fn minimize(
        &self,
        objective: &dyn Objective,
        constraints: &[LinearConstraint],
        bounds: &[Bound],
        initial_point: &[f64],
    ) -> SolverReport;
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Largest violation of `constraints` and `bounds` at `x`.
pub fn max_violation(constraints: &[LinearConstraint], bounds: &[Bound], x: &[f64]) -> f64 {
    let general = constraints
        .iter()
        .map(|c| c.violation(x))
        .fold(0.0, f64::max);
    let boxed = bounds
        .iter()
        .zip(x.iter())
        .map(|(b, v)| (b.lower - v).max(v - b.upper).max(0.0))
        .fold(0.0, f64::max);
    general.max(boxed)
}

/// Central finite-difference gradient.
pub fn numerical_gradient(objective: &dyn Objective, x: &[f64]) -> Vec<f64> {
    let mut probe = x.to_vec();
    (0..x.len())
        .map(|i| {
            let h = 1e-7 * x[i].abs().max(1.0);
            probe[i] = x[i] + h;
            let up = objective.value(&probe);
            probe[i] = x[i] - h;
            let down = objective.value(&probe);
            probe[i] = x[i];
            (up - down) / (2.0 * h)
        })
        .collect()
}

/// Analytic gradient when the objective provides one, finite differences otherwise.
pub fn gradient_of(objective: &dyn Objective, x: &[f64]) -> Vec<f64> {
    objective
        .gradient(x)
        .unwrap_or_else(|| numerical_gradient(objective, x))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Quadratic;

    impl Objective for Quadratic {
        fn value(&self, x: &[f64]) -> f64 {
            (x[0] - 1.0).powi(2) + 3.0 * x[1] * x[1]
        }
    }

    #[test]
    fn test_violation_kinds() {
        let eq = LinearConstraint::equality(vec![1.0, 1.0], 1.0);
        let ineq = LinearConstraint::at_least(vec![0.1, 0.2], 0.18);
        assert_relative_eq!(eq.violation(&[0.6, 0.6]), 0.2, epsilon = 1e-15);
        assert_relative_eq!(ineq.violation(&[0.5, 0.5]), 0.03, epsilon = 1e-15);
        assert_eq!(ineq.violation(&[0.0, 1.0]), 0.0);
    }

    #[test]
    fn test_max_violation_includes_bounds() {
        let v = max_violation(&[], &[Bound::UNIT, Bound::UNIT], &[1.5, -0.25]);
        assert_relative_eq!(v, 0.5);
    }

    #[test]
    fn test_numerical_gradient_fallback() {
        let g = gradient_of(&Quadratic, &[0.0, 1.0]);
        assert_relative_eq!(g[0], -2.0, epsilon = 1e-6);
        assert_relative_eq!(g[1], 6.0, epsilon = 1e-6);
    }
}
