use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::debug;

use super::price_table::PriceTable;
use crate::error::PortfolioError;
use crate::PortfolioResult;

/// Minimum number of return observations needed for a sample covariance.
const MIN_OBSERVATIONS: usize = 2;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Period-over-period simple returns, one column per symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnSeries {
    pub symbols: Vec<String>,
    /// `columns[i]` holds the returns of `symbols[i]` in date order.
    pub columns: Vec<Vec<f64>>,
}

impl ReturnSeries {
    pub fn num_observations(&self) -> usize {
        self.columns.first().map_or(0, |c| c.len())
    }
}

/// Annualized expected returns and covariance, index-aligned by symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetStatistics {
    pub symbols: Vec<String>,
    pub expected_returns: Vec<f64>,
    pub covariance: Vec<Vec<f64>>,
}

impl AssetStatistics {
    /// Build from pre-computed parts, checking alignment and symmetry.
    pub fn new(
        symbols: Vec<String>,
        expected_returns: Vec<f64>,
        covariance: Vec<Vec<f64>>,
    ) -> PortfolioResult<Self> {
        let stats = Self {
            symbols,
            expected_returns,
            covariance,
        };
        stats.validate()?;
        Ok(stats)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Standalone annualized volatility of each asset.
    pub fn volatilities(&self) -> Vec<f64> {
        (0..self.len())
            .map(|i| self.covariance[i][i].max(0.0).sqrt())
            .collect()
    }

    /// Returns and covariance restricted to `indices`, permuted together.
    pub fn subset(&self, indices: &[usize]) -> AssetStatistics {
        AssetStatistics {
            symbols: indices.iter().map(|&i| self.symbols[i].clone()).collect(),
            expected_returns: indices.iter().map(|&i| self.expected_returns[i]).collect(),
            covariance: indices
                .iter()
                .map(|&i| indices.iter().map(|&j| self.covariance[i][j]).collect())
                .collect(),
        }
    }

    pub fn validate(&self) -> PortfolioResult<()> {
        let n = self.symbols.len();
        if self.expected_returns.len() != n {
            return Err(PortfolioError::InvalidInput {
                field: "expected_returns".into(),
                reason: format!(
                    "Expected {} returns but got {}",
                    n,
                    self.expected_returns.len()
                ),
            });
        }
        if let Some(i) = self.expected_returns.iter().position(|r| !r.is_finite()) {
            return Err(PortfolioError::InvalidInput {
                field: format!("expected_returns[{}]", i),
                reason: "Must be finite".into(),
            });
        }
        validate_covariance_matrix(&self.covariance, n)
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Simple returns `(p[t] - p[t-1]) / p[t-1]` of a cleaned price table.
///
/// Rows with any non-finite return (e.g. a zero previous close) are dropped
/// across all symbols so the columns stay aligned.
pub fn period_returns(prices: &PriceTable) -> PortfolioResult<ReturnSeries> {
    let n = prices.symbols().len();
    if n == 0 {
        return Err(PortfolioError::InsufficientData(
            "At least one asset required".into(),
        ));
    }

    let cleaned = prices.clean();
    let rows = cleaned.rows();
    let mut columns: Vec<Vec<f64>> = vec![Vec::with_capacity(rows.len()); n];
    let mut dropped = 0usize;

    for pair in rows.windows(2) {
        let ret: Vec<f64> = pair[0]
            .closes
            .iter()
            .zip(pair[1].closes.iter())
            .map(|(prev, cur)| (cur - prev) / prev)
            .collect();
        if ret.iter().all(|r| r.is_finite()) {
            for (col, r) in columns.iter_mut().zip(ret) {
                col.push(r);
            }
        } else {
            dropped += 1;
        }
    }

    if dropped > 0 || cleaned.num_rows() != prices.num_rows() {
        debug!(
            dropped_price_rows = prices.num_rows() - cleaned.num_rows(),
            dropped_return_rows = dropped,
            "Dropped non-finite observations"
        );
    }

    Ok(ReturnSeries {
        symbols: prices.symbols().to_vec(),
        columns,
    })
}

/// Annualized mean returns and sample covariance from a price table.
pub fn estimate(prices: &PriceTable, periods_per_year: u32) -> PortfolioResult<AssetStatistics> {
    if periods_per_year == 0 {
        return Err(PortfolioError::InvalidInput {
            field: "trading_periods_per_year".into(),
            reason: "Must be positive".into(),
        });
    }

    let series = period_returns(prices)?;
    let obs = series.num_observations();
    if obs < MIN_OBSERVATIONS {
        return Err(PortfolioError::InsufficientData(format!(
            "Need at least {} valid return observations, got {}",
            MIN_OBSERVATIONS, obs
        )));
    }

    let factor = periods_per_year as f64;
    let n = series.symbols.len();

    let expected_returns: Vec<f64> = series
        .columns
        .iter()
        .map(|col| col.iter().mean() * factor)
        .collect();

    let mut covariance = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in i..n {
            let (a, b) = (&series.columns[i], &series.columns[j]);
            let c = a.iter().covariance(b.iter()) * factor;
            covariance[i][j] = c;
            covariance[j][i] = c;
        }
    }

    debug!(
        assets = n,
        observations = obs,
        "Estimated annualized statistics"
    );

    Ok(AssetStatistics {
        symbols: series.symbols,
        expected_returns,
        covariance,
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[allow(clippy::needless_range_loop)]
fn validate_covariance_matrix(cov: &[Vec<f64>], n: usize) -> PortfolioResult<()> {
    if cov.len() != n {
        return Err(PortfolioError::InvalidInput {
            field: "covariance".into(),
            reason: format!("Expected {}x{} matrix but got {} rows", n, n, cov.len()),
        });
    }
    for (i, row) in cov.iter().enumerate() {
        if row.len() != n {
            return Err(PortfolioError::InvalidInput {
                field: "covariance".into(),
                reason: format!("Row {} has {} columns, expected {}", i, row.len(), n),
            });
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(PortfolioError::InvalidInput {
                field: "covariance".into(),
                reason: format!("Row {} contains a non-finite value", i),
            });
        }
    }
    let tolerance = 1e-10;
    for i in 0..n {
        if cov[i][i] < 0.0 {
            return Err(PortfolioError::InvalidInput {
                field: "covariance".into(),
                reason: format!("Negative variance at [{},{}]: {}", i, i, cov[i][i]),
            });
        }
        for j in (i + 1)..n {
            let scale = 1.0 + cov[i][j].abs().max(cov[j][i].abs());
            if (cov[i][j] - cov[j][i]).abs() > tolerance * scale {
                return Err(PortfolioError::InvalidInput {
                    field: "covariance".into(),
                    reason: format!(
                        "Not symmetric: [{},{}]={} != [{},{}]={}",
                        i, j, cov[i][j], j, i, cov[j][i]
                    ),
                });
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
