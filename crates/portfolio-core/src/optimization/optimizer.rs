use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::objective::{zero_volatility_floor, NegativeSharpe, Objective, Volatility};
use super::solver::{max_violation, Bound, ConstrainedSolver, LinearConstraint, SolverDiagnostics};
use crate::config::{OptimizationMethod, SolverSettings};
use crate::estimation::AssetStatistics;
use crate::types::Rate;

/// Raw solver output for one optimization, before reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    /// Final weights, aligned with the statistics' symbols.
    pub weights: Vec<f64>,
    pub success: bool,
    pub error: Option<String>,
    pub diagnostics: SolverDiagnostics,
}

/// Equal weights for n assets.
pub fn equal_weights(n: usize) -> Vec<f64> {
    vec![1.0 / n as f64; n]
}

/// Long-only, fully invested portfolio problem:
/// `sum(w) = 1`, `0 <= w_i <= 1`, and `w . r >= target` when a target is given.
pub fn portfolio_constraints(
    expected_returns: &[f64],
    target_return: Option<Rate>,
) -> (Vec<LinearConstraint>, Vec<Bound>) {
    let n = expected_returns.len();
    let mut constraints = vec![LinearConstraint::equality(vec![1.0; n], 1.0)];
    if let Some(target) = target_return {
        constraints.push(LinearConstraint::at_least(
            expected_returns.to_vec(),
            target,
        ));
    }
    (constraints, vec![Bound::UNIT; n])
}

/// Riskless asset that leaves the Sharpe ratio without a maximum.
///
/// A zero-variance asset earning more than `risk_free_rate` drives the ratio
/// to infinity as weight moves onto it. Among such assets (that also meet the
/// target) the highest-returning one wins, lowest index on ties.
pub fn riskless_sharpe_asset(
    stats: &AssetStatistics,
    risk_free_rate: Rate,
    target_return: Option<Rate>,
) -> Option<usize> {
    let floor = zero_volatility_floor(&stats.covariance);
    let mut best: Option<usize> = None;
    for (i, &r) in stats.expected_returns.iter().enumerate() {
        let riskless = stats.covariance[i][i].max(0.0).sqrt() <= floor;
        let meets_target = target_return.map_or(true, |t| r >= t);
        if riskless && r > risk_free_rate && meets_target {
            match best {
                Some(b) if stats.expected_returns[b] >= r => {}
                _ => best = Some(i),
            }
        }
    }
    best
}

/// Solve for portfolio weights from the uniform starting point.
///
/// MAX_SHARPE over a universe with a riskless asset above the risk-free rate
/// has no interior optimum; it returns the whole portfolio in that asset
/// without calling the solver (see [`riskless_sharpe_asset`]).
///
/// Never fails with an `Err`: solver trouble is reported through
/// `success = false` and `error`.
pub fn optimize(
    method: OptimizationMethod,
    stats: &AssetStatistics,
    risk_free_rate: Rate,
    target_return: Option<Rate>,
    solver: &dyn ConstrainedSolver,
    settings: &SolverSettings,
) -> OptimizationOutcome {
    let n = stats.len();
    let (constraints, bounds) = portfolio_constraints(&stats.expected_returns, target_return);

    if method == OptimizationMethod::MaxSharpe {
        if let Some(i) = riskless_sharpe_asset(stats, risk_free_rate, target_return) {
            debug!(
                symbol = %stats.symbols[i],
                "Sharpe ratio unbounded at a riskless asset; holding it outright"
            );
            let mut weights = vec![0.0; n];
            weights[i] = 1.0;
            let diagnostics = SolverDiagnostics {
                iterations: 0,
                objective_value: f64::INFINITY,
                constraint_violation: max_violation(&constraints, &bounds, &weights),
                message: format!(
                    "Sharpe ratio is unbounded at riskless asset {}",
                    stats.symbols[i]
                ),
            };
            return OptimizationOutcome {
                weights,
                success: true,
                error: None,
                diagnostics,
            };
        }
    }

    let start = equal_weights(n);

    let sharpe = NegativeSharpe {
        expected_returns: &stats.expected_returns,
        covariance: &stats.covariance,
        risk_free_rate,
    };
    let volatility = Volatility {
        covariance: &stats.covariance,
    };
    let objective: &dyn Objective = match method {
        OptimizationMethod::MaxSharpe => &sharpe,
        OptimizationMethod::MinVolatility => &volatility,
    };

    debug!(
        method = %method,
        assets = n,
        solver = solver.name(),
        target_return = ?target_return,
        "Starting optimization"
    );

    let report = solver.minimize(objective, &constraints, &bounds, &start);

    // Converged points still have to sit inside the feasible set.
    let feasible = report.diagnostics.constraint_violation <= settings.constraint_tolerance;
    let success = report.converged && feasible;
    let error = if success {
        None
    } else if report.converged {
        Some(format!(
            "Optimization failed: constraint violation {:.3e} exceeds tolerance",
            report.diagnostics.constraint_violation
        ))
    } else {
        Some(format!("Optimization failed: {}", report.diagnostics.message))
    };

    if let Some(ref e) = error {
        warn!(method = %method, "{}", e);
    }

    OptimizationOutcome {
        weights: report.x,
        success,
        error,
        diagnostics: report.diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(returns: Vec<f64>, variances: &[f64]) -> AssetStatistics {
        let n = variances.len();
        let mut covariance = vec![vec![0.0; n]; n];
        for (i, v) in variances.iter().enumerate() {
            covariance[i][i] = *v;
        }
        let symbols = (0..n).map(|i| format!("A{}", i)).collect();
        AssetStatistics::new(symbols, returns, covariance).unwrap()
    }

    #[test]
    fn test_riskless_asset_needs_positive_excess_return() {
        let s = stats(vec![0.03, 0.10], &[0.0, 0.04]);
        assert_eq!(riskless_sharpe_asset(&s, 0.0, None), Some(0));
        assert_eq!(riskless_sharpe_asset(&s, 0.03, None), None);
        assert_eq!(riskless_sharpe_asset(&s, 0.0, Some(0.05)), None);
    }

    #[test]
    fn test_riskless_asset_prefers_highest_return() {
        let s = stats(vec![0.02, 0.04, 0.04, 0.10], &[0.0, 0.0, 0.0, 0.04]);
        assert_eq!(riskless_sharpe_asset(&s, 0.0, None), Some(1));
    }

    #[test]
    fn test_riskless_outcome_skips_solver() {
        let s = stats(vec![0.03, 0.10], &[0.0, 0.04]);
        let settings = SolverSettings::default();
        let solver = crate::optimization::SqpSolver::new(settings.clone());
        let outcome = optimize(
            OptimizationMethod::MaxSharpe,
            &s,
            0.0,
            None,
            &solver,
            &settings,
        );
        assert!(outcome.success);
        assert_eq!(outcome.weights, vec![1.0, 0.0]);
        assert_eq!(outcome.diagnostics.iterations, 0);
    }
}
