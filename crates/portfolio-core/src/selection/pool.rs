use std::cmp::Ordering;

use tracing::debug;

use crate::config::PoolRanking;
use crate::error::PortfolioError;
use crate::estimation::AssetStatistics;
use crate::types::Rate;
use crate::PortfolioResult;

// ---------------------------------------------------------------------------
// Ranking strategies
// ---------------------------------------------------------------------------

/// Scores an asset for pool selection; higher scores rank first.
pub trait RankingKey {
    fn name(&self) -> &'static str;

    fn score(&self, stats: &AssetStatistics, index: usize) -> f64;
}

/// Descending annualized expected return.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpectedReturnRanking;

impl RankingKey for ExpectedReturnRanking {
    fn name(&self) -> &'static str {
        "expected_return"
    }

    fn score(&self, stats: &AssetStatistics, index: usize) -> f64 {
        stats.expected_returns[index]
    }
}

/// Descending standalone Sharpe ratio.
///
/// A zero-volatility asset scores +inf, 0 or -inf by the sign of its excess
/// return.
#[derive(Debug, Clone, Copy, Default)]
pub struct SharpeRanking {
    pub risk_free_rate: Rate,
}

impl RankingKey for SharpeRanking {
    fn name(&self) -> &'static str {
        "sharpe"
    }

    fn score(&self, stats: &AssetStatistics, index: usize) -> f64 {
        let excess = stats.expected_returns[index] - self.risk_free_rate;
        let vol = stats.covariance[index][index].max(0.0).sqrt();
        if vol == 0.0 {
            if excess > 0.0 {
                f64::INFINITY
            } else if excess < 0.0 {
                f64::NEG_INFINITY
            } else {
                0.0
            }
        } else {
            excess / vol
        }
    }
}

/// Ascending standalone variance.
#[derive(Debug, Clone, Copy, Default)]
pub struct LowVolatilityRanking;

impl RankingKey for LowVolatilityRanking {
    fn name(&self) -> &'static str {
        "low_volatility"
    }

    fn score(&self, stats: &AssetStatistics, index: usize) -> f64 {
        -stats.covariance[index][index]
    }
}

/// Ranking strategy named by `kind`. Sharpe ranking scores excess return over
/// `risk_free_rate`.
pub fn ranking_for(kind: PoolRanking, risk_free_rate: Rate) -> Box<dyn RankingKey + Send + Sync> {
    match kind {
        PoolRanking::ExpectedReturn => Box::new(ExpectedReturnRanking),
        PoolRanking::Sharpe => Box::new(SharpeRanking { risk_free_rate }),
        PoolRanking::LowVolatility => Box::new(LowVolatilityRanking),
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Indices of the top `pool_size` assets by `ranking`, best first.
///
/// Ties keep input order. `None` keeps every asset.
pub fn select_pool(
    stats: &AssetStatistics,
    pool_size: Option<usize>,
    ranking: &dyn RankingKey,
) -> PortfolioResult<Vec<usize>> {
    let n = stats.len();
    if n == 0 {
        return Err(PortfolioError::EmptyUniverse(
            "No assets available for selection".into(),
        ));
    }
    if pool_size == Some(0) {
        return Err(PortfolioError::InvalidInput {
            field: "pool_size".into(),
            reason: "Must be at least 1".into(),
        });
    }

    let scores: Vec<f64> = (0..n).map(|i| ranking.score(stats, i)).collect();
    let mut order: Vec<usize> = (0..n).collect();
    // sort_by is stable; NaN scores sink to the bottom
    order.sort_by(|&a, &b| compare_desc(scores[a], scores[b]));

    let keep = pool_size.unwrap_or(n).min(n);
    order.truncate(keep);

    debug!(
        ranking = ranking.name(),
        universe = n,
        selected = keep,
        "Selected asset pool"
    );

    Ok(order)
}

/// Symbols of the selected pool, best first.
pub fn select(
    stats: &AssetStatistics,
    pool_size: Option<usize>,
    ranking: &dyn RankingKey,
) -> PortfolioResult<Vec<String>> {
    Ok(select_pool(stats, pool_size, ranking)?
        .into_iter()
        .map(|i| stats.symbols[i].clone())
        .collect())
}

fn compare_desc(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(returns: &[f64], variances: &[f64]) -> AssetStatistics {
        let n = returns.len();
        let symbols = (0..n).map(|i| format!("S{}", i)).collect();
        let covariance = (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| if i == j { variances[i] } else { 0.0 })
                    .collect()
            })
            .collect();
        AssetStatistics::new(symbols, returns.to_vec(), covariance).unwrap()
    }

    #[test]
    fn test_ranks_by_expected_return() {
        let s = stats(&[0.05, 0.20, 0.10], &[0.04, 0.04, 0.04]);
        let picked = select(&s, Some(2), &ExpectedReturnRanking).unwrap();
        assert_eq!(picked, vec!["S1".to_string(), "S2".to_string()]);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let s = stats(&[0.10, 0.30, 0.10, 0.10], &[0.04; 4]);
        let picked = select_pool(&s, None, &ExpectedReturnRanking).unwrap();
        assert_eq!(picked, vec![1, 0, 2, 3]);
    }

    #[test]
    fn test_pool_larger_than_universe() {
        let s = stats(&[0.1, 0.2], &[0.04, 0.04]);
        let picked = select_pool(&s, Some(90), &ExpectedReturnRanking).unwrap();
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn test_empty_universe() {
        let s = AssetStatistics::new(vec![], vec![], vec![]).unwrap();
        assert!(matches!(
            select_pool(&s, None, &ExpectedReturnRanking),
            Err(PortfolioError::EmptyUniverse(_))
        ));
    }

    #[test]
    fn test_zero_pool_size() {
        let s = stats(&[0.1], &[0.04]);
        assert!(select_pool(&s, Some(0), &ExpectedReturnRanking).is_err());
    }

    #[test]
    fn test_sharpe_ranking() {
        // S0: 0.10/0.10 = 1.0, S1: 0.20/0.40 = 0.5, S2: riskless positive
        let s = stats(&[0.10, 0.20, 0.03], &[0.01, 0.16, 0.0]);
        let picked = select_pool(&s, None, &SharpeRanking::default()).unwrap();
        assert_eq!(picked, vec![2, 0, 1]);
    }

    #[test]
    fn test_ranking_for_config_kind() {
        let s = stats(&[0.10, 0.20, 0.03], &[0.01, 0.16, 0.0]);
        let ranking = ranking_for(PoolRanking::Sharpe, 0.05);
        assert_eq!(ranking.name(), "sharpe");
        // Excess over 5%: S0 0.5, S1 0.375, S2 riskless below the rate
        let picked = select_pool(&s, None, ranking.as_ref()).unwrap();
        assert_eq!(picked, vec![0, 1, 2]);

        let ranking = ranking_for(PoolRanking::LowVolatility, 0.0);
        let picked = select_pool(&s, Some(1), ranking.as_ref()).unwrap();
        assert_eq!(picked, vec![2]);
    }

    #[test]
    fn test_low_volatility_ranking() {
        let s = stats(&[0.1, 0.1, 0.1], &[0.09, 0.01, 0.04]);
        let picked = select_pool(&s, Some(2), &LowVolatilityRanking).unwrap();
        assert_eq!(picked, vec![1, 2]);
    }
}
