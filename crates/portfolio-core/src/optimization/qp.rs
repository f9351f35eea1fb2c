//! Dual active-set solver for strictly convex quadratic programs
//!
//! `min 0.5 x'Gx + a'x` subject to affine equalities and `>=` inequalities,
//! with `G` positive definite. Starts from the unconstrained minimum and adds
//! violated constraints one at a time (Goldfarb-Idnani), so no feasible
//! starting point is needed and infeasibility is detected directly. Each step
//! re-solves the KKT system of the working set densely; problems here have at
//! most a few hundred rows.

use super::linalg::{norm_inf, solve_linear_system, vec_dot};
use super::solver::{ConstraintKind, LinearConstraint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QpError {
    /// No point satisfies the constraints.
    Infeasible,
    /// The Hessian or a working-set KKT system could not be factorized.
    Singular,
    IterationLimit,
}

#[derive(Debug, Clone)]
pub struct QpSolution {
    pub x: Vec<f64>,
    /// Lagrange multipliers, one per constraint in input order.
    pub multipliers: Vec<f64>,
    pub iterations: usize,
}

/// Working-set entry: constraint index, orientation of its normal, multiplier.
#[derive(Debug, Clone, Copy)]
struct Active {
    index: usize,
    sign: f64,
    multiplier: f64,
}

pub fn solve_qp(
    hessian: &[Vec<f64>],
    linear: &[f64],
    constraints: &[LinearConstraint],
) -> Result<QpSolution, QpError> {
    let n = linear.len();
    let max_iterations = 20 * (n + constraints.len()) + 50;

    let neg_a: Vec<f64> = linear.iter().map(|v| -v).collect();
    let mut x = solve_linear_system(hessian, &neg_a).ok_or(QpError::Singular)?;

    let h_scale = hessian
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0_f64, |m, v| m.max(v.abs()))
        .max(f64::MIN_POSITIVE);

    let mut active: Vec<Active> = Vec::new();
    let mut redundant = vec![false; constraints.len()];
    let mut iterations = 0usize;

    loop {
        let Some(p) = pick_violated(constraints, &active, &redundant, &x) else {
            break;
        };

        let residual = constraints[p].residual(&x);
        let sign = match constraints[p].kind {
            ConstraintKind::Equality if residual > 0.0 => -1.0,
            _ => 1.0,
        };
        let normal: Vec<f64> = constraints[p]
            .coefficients
            .iter()
            .map(|c| sign * c)
            .collect();
        let mut slack = sign * residual;
        let mut u_p = 0.0;

        loop {
            iterations += 1;
            if iterations > max_iterations {
                return Err(QpError::IterationLimit);
            }

            let (z, r) =
                step_directions(hessian, constraints, &active, &normal).ok_or(QpError::Singular)?;

            // Dual step length: the first inequality whose multiplier hits zero.
            let mut t1 = f64::INFINITY;
            let mut drop_at = None;
            for (k, a) in active.iter().enumerate() {
                if constraints[a.index].kind == ConstraintKind::Inequality && r[k] > 0.0 {
                    let t = a.multiplier / r[k];
                    if t < t1 {
                        t1 = t;
                        drop_at = Some(k);
                    }
                }
            }

            // Primal step length: where constraint p becomes satisfied.
            let zn = vec_dot(&z, &normal);
            let z_is_zero = zn <= 1e-12 * vec_dot(&normal, &normal) / h_scale;
            let t2 = if z_is_zero {
                f64::INFINITY
            } else {
                -slack / zn
            };

            if z_is_zero && drop_at.is_none() {
                if constraints[p].kind == ConstraintKind::Equality
                    && slack.abs() <= feasibility_tolerance(&constraints[p], &x)
                {
                    // Linearly dependent on the working set and already satisfied.
                    redundant[p] = true;
                    break;
                }
                return Err(QpError::Infeasible);
            }

            let t = t1.min(t2);
            if !z_is_zero {
                for (xi, zi) in x.iter_mut().zip(z.iter()) {
                    *xi += t * zi;
                }
            }
            for (a, rk) in active.iter_mut().zip(r.iter()) {
                a.multiplier -= t * rk;
            }
            u_p += t;

            if !z_is_zero && t2 <= t1 {
                active.push(Active {
                    index: p,
                    sign,
                    multiplier: u_p,
                });
                break;
            }

            if let Some(k) = drop_at {
                active.remove(k);
            }
            slack = sign * constraints[p].residual(&x);
        }
    }

    let mut multipliers = vec![0.0; constraints.len()];
    for a in &active {
        multipliers[a.index] = a.sign * a.multiplier;
    }

    Ok(QpSolution {
        x,
        multipliers,
        iterations,
    })
}

fn feasibility_tolerance(constraint: &LinearConstraint, x: &[f64]) -> f64 {
    let scale = 1.0 + constraint.rhs.abs() + norm_inf(&constraint.coefficients) * norm_inf(x);
    1e-12 * scale
}

/// Next constraint to enforce: pending equalities first, then the most
/// violated inequality.
fn pick_violated(
    constraints: &[LinearConstraint],
    active: &[Active],
    redundant: &[bool],
    x: &[f64],
) -> Option<usize> {
    let is_active = |i: usize| active.iter().any(|a| a.index == i);

    for (i, c) in constraints.iter().enumerate() {
        if c.kind == ConstraintKind::Equality && !redundant[i] && !is_active(i) {
            return Some(i);
        }
    }

    let mut worst = None;
    let mut worst_violation = 0.0;
    for (i, c) in constraints.iter().enumerate() {
        if c.kind != ConstraintKind::Inequality || is_active(i) {
            continue;
        }
        let violation = -c.residual(x);
        if violation > feasibility_tolerance(c, x) && violation > worst_violation {
            worst_violation = violation;
            worst = Some(i);
        }
    }
    worst
}

// TODO: carry Goldfarb-Idnani's J = L^-T Q factorization and update it on each
// add/drop instead of re-solving the dense KKT system here.
/// Primal direction `z = H n` and dual direction `r = N* n` for the working
/// set, from the KKT system `[G -N; N' 0] [z; mu] = [n; 0]`, `r = -mu`.
fn step_directions(
    hessian: &[Vec<f64>],
    constraints: &[LinearConstraint],
    active: &[Active],
    normal: &[f64],
) -> Option<(Vec<f64>, Vec<f64>)> {
    let n = normal.len();
    let m = active.len();
    let size = n + m;

    let mut kkt = vec![vec![0.0; size]; size];
    for i in 0..n {
        kkt[i][..n].copy_from_slice(&hessian[i]);
    }
    for (k, a) in active.iter().enumerate() {
        for (i, c) in constraints[a.index].coefficients.iter().enumerate() {
            let v = a.sign * c;
            kkt[i][n + k] = -v;
            kkt[n + k][i] = v;
        }
    }

    let mut rhs = vec![0.0; size];
    rhs[..n].copy_from_slice(normal);

    let sol = solve_linear_system(&kkt, &rhs)?;
    let z = sol[..n].to_vec();
    let r = sol[n..].iter().map(|mu| -mu).collect();
    Some((z, r))
}
