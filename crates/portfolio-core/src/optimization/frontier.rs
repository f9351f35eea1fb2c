use serde::{Deserialize, Serialize};
use tracing::debug;

use super::assembler::{assemble, OptimizationResult};
use super::optimizer::optimize;
use super::solver::ConstrainedSolver;
use crate::config::{OptimizationMethod, SolverSettings};
use crate::error::PortfolioError;
use crate::estimation::AssetStatistics;
use crate::types::Rate;
use crate::PortfolioResult;

/// Default number of points when a caller does not ask for a count.
pub const DEFAULT_FRONTIER_POINTS: usize = 20;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Minimum-volatility portfolio for one target return.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontierPoint {
    pub target_return: Rate,
    #[serde(flatten)]
    pub portfolio: OptimizationResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EfficientFrontier {
    pub symbols: Vec<String>,
    /// Expected return of the unconstrained minimum-volatility portfolio.
    pub min_volatility_return: Option<Rate>,
    /// Highest single-asset expected return; the top of the sweep.
    pub max_asset_return: Rate,
    pub points: Vec<FrontierPoint>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Sweep target returns evenly from the minimum-volatility portfolio's
/// return up to the best single asset, solving MIN_VOLATILITY at each.
///
/// Points whose solve fails are kept with `success = false`.
pub fn efficient_frontier(
    stats: &AssetStatistics,
    num_points: usize,
    solver: &dyn ConstrainedSolver,
    settings: &SolverSettings,
    negligible_weight: f64,
) -> PortfolioResult<EfficientFrontier> {
    if stats.is_empty() {
        return Err(PortfolioError::EmptyUniverse(
            "No assets to build a frontier from".into(),
        ));
    }
    if num_points == 0 {
        return Err(PortfolioError::InvalidInput {
            field: "points".into(),
            reason: "Must be at least 1".into(),
        });
    }

    let solve = |target: Option<Rate>| -> OptimizationResult {
        let outcome = optimize(
            OptimizationMethod::MinVolatility,
            stats,
            0.0,
            target,
            solver,
            settings,
        );
        assemble(
            &stats.symbols,
            &outcome.weights,
            &stats.expected_returns,
            &stats.covariance,
            outcome.success,
            outcome.error,
            negligible_weight,
        )
    };

    let max_asset_return = stats
        .expected_returns
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);

    let min_vol = solve(None);
    let Some(min_ret) = min_vol.expected_return else {
        return Ok(EfficientFrontier {
            symbols: stats.symbols.clone(),
            min_volatility_return: None,
            max_asset_return,
            points: vec![FrontierPoint {
                target_return: max_asset_return,
                portfolio: min_vol,
            }],
        });
    };

    let points = if num_points == 1 || max_asset_return <= min_ret {
        vec![FrontierPoint {
            target_return: min_ret,
            portfolio: min_vol,
        }]
    } else {
        let step = (max_asset_return - min_ret) / (num_points - 1) as f64;
        (0..num_points)
            .map(|i| {
                let target = min_ret + step * i as f64;
                FrontierPoint {
                    target_return: target,
                    portfolio: solve(Some(target)),
                }
            })
            .collect()
    };

    debug!(
        points = points.len(),
        solved = points.iter().filter(|p| p.portfolio.success).count(),
        "Computed efficient frontier"
    );

    Ok(EfficientFrontier {
        symbols: stats.symbols.clone(),
        min_volatility_return: Some(min_ret),
        max_asset_return,
        points,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::SqpSolver;

    fn three_assets() -> AssetStatistics {
        AssetStatistics::new(
            vec!["LOW".into(), "MID".into(), "HIGH".into()],
            vec![0.04, 0.08, 0.14],
            vec![
                vec![0.010, 0.002, 0.001],
                vec![0.002, 0.040, 0.010],
                vec![0.001, 0.010, 0.090],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_frontier_is_monotone_in_return() {
        let stats = three_assets();
        let settings = SolverSettings::default();
        let solver = SqpSolver::new(settings.clone());
        let frontier = efficient_frontier(&stats, 6, &solver, &settings, 0.0).unwrap();

        assert_eq!(frontier.points.len(), 6);
        assert!(frontier.points[0].portfolio.success);

        let solved: Vec<&FrontierPoint> = frontier
            .points
            .iter()
            .filter(|p| p.portfolio.success)
            .collect();
        assert!(solved.len() >= 5);
        for pair in solved.windows(2) {
            let (a, b) = (&pair[0].portfolio, &pair[1].portfolio);
            assert!(b.expected_return.unwrap() >= a.expected_return.unwrap() - 1e-6);
            assert!(b.volatility.unwrap() >= a.volatility.unwrap() - 1e-6);
        }
        for p in &solved {
            assert!(p.portfolio.expected_return.unwrap() >= p.target_return - 1e-6);
        }
    }

    #[test]
    fn test_single_point_is_min_volatility() {
        let stats = three_assets();
        let settings = SolverSettings::default();
        let solver = SqpSolver::new(settings.clone());
        let frontier = efficient_frontier(&stats, 1, &solver, &settings, 0.0).unwrap();
        assert_eq!(frontier.points.len(), 1);
        assert_eq!(
            Some(frontier.points[0].target_return),
            frontier.min_volatility_return
        );
    }

    #[test]
    fn test_zero_points_rejected() {
        let stats = three_assets();
        let settings = SolverSettings::default();
        let solver = SqpSolver::new(settings.clone());
        assert!(efficient_frontier(&stats, 0, &solver, &settings, 0.0).is_err());
    }
}
