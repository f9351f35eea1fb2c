use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PortfolioError;
use crate::types::Rate;
use crate::PortfolioResult;

/// Trading days per year used to annualize daily statistics.
pub const DEFAULT_PERIODS_PER_YEAR: u32 = 252;

// ---------------------------------------------------------------------------
// Engine configuration
// ---------------------------------------------------------------------------

/// Tolerances and limits for the constrained solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// Iteration cap; hitting it without convergence is a failure.
    pub max_iterations: u32,
    /// Largest acceptable constraint violation at a solution.
    pub constraint_tolerance: f64,
    /// Step size (infinity norm) below which the iterate is considered fixed.
    pub step_tolerance: f64,
    /// Objective change below which the iterate is considered fixed.
    pub function_tolerance: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            constraint_tolerance: 1e-8,
            step_tolerance: 1e-10,
            function_tolerance: 1e-12,
        }
    }
}

/// Explicit configuration value the engine is constructed with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Annualization factor (252 for daily data, 52 weekly, 12 monthly).
    pub trading_periods_per_year: u32,
    /// Risk-free rate used when a request does not carry one.
    pub default_risk_free_rate: Rate,
    /// Weights at or below this value are omitted from reported allocations.
    pub negligible_weight: f64,
    /// Rule that orders assets before `pool_size` truncation.
    pub pool_ranking: PoolRanking,
    pub solver: SolverSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trading_periods_per_year: DEFAULT_PERIODS_PER_YEAR,
            default_risk_free_rate: 0.0,
            negligible_weight: 0.0,
            pool_ranking: PoolRanking::default(),
            solver: SolverSettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> PortfolioResult<()> {
        if self.trading_periods_per_year == 0 {
            return Err(PortfolioError::InvalidInput {
                field: "trading_periods_per_year".into(),
                reason: "Must be positive".into(),
            });
        }
        if !self.default_risk_free_rate.is_finite() {
            return Err(PortfolioError::InvalidInput {
                field: "default_risk_free_rate".into(),
                reason: "Must be finite".into(),
            });
        }
        if self.negligible_weight.is_nan()
            || self.negligible_weight < 0.0
            || self.negligible_weight >= 1.0
        {
            return Err(PortfolioError::InvalidInput {
                field: "negligible_weight".into(),
                reason: "Must be in [0, 1)".into(),
            });
        }
        if self.solver.max_iterations == 0 {
            return Err(PortfolioError::InvalidInput {
                field: "solver.max_iterations".into(),
                reason: "Must be positive".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Optimization method
// ---------------------------------------------------------------------------

/// What the optimizer minimizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OptimizationMethod {
    /// Minimize the negative Sharpe ratio.
    #[default]
    MaxSharpe,
    /// Minimize portfolio volatility.
    MinVolatility,
}

impl OptimizationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationMethod::MaxSharpe => "sharpe",
            OptimizationMethod::MinVolatility => "min_volatility",
        }
    }
}

impl fmt::Display for OptimizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizationMethod {
    type Err = PortfolioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sharpe" | "max_sharpe" => Ok(OptimizationMethod::MaxSharpe),
            "min_volatility" | "min_vol" => Ok(OptimizationMethod::MinVolatility),
            _ => Err(PortfolioError::InvalidMethod(s.to_string())),
        }
    }
}

impl TryFrom<String> for OptimizationMethod {
    type Error = PortfolioError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OptimizationMethod> for String {
    fn from(method: OptimizationMethod) -> Self {
        method.as_str().to_string()
    }
}

/// Which ranking rule selects the asset pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PoolRanking {
    /// Descending expected return.
    #[default]
    ExpectedReturn,
    /// Descending standalone Sharpe ratio at the default risk-free rate.
    Sharpe,
    /// Ascending variance.
    LowVolatility,
}

impl PoolRanking {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolRanking::ExpectedReturn => "expected_return",
            PoolRanking::Sharpe => "sharpe",
            PoolRanking::LowVolatility => "low_volatility",
        }
    }
}

impl fmt::Display for PoolRanking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolRanking {
    type Err = PortfolioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "expected_return" | "return" => Ok(PoolRanking::ExpectedReturn),
            "sharpe" => Ok(PoolRanking::Sharpe),
            "low_volatility" | "low_vol" => Ok(PoolRanking::LowVolatility),
            _ => Err(PortfolioError::InvalidInput {
                field: "pool_ranking".into(),
                reason: format!(
                    "Unknown ranking '{}' (expected_return, sharpe, low_volatility)",
                    s
                ),
            }),
        }
    }
}

impl TryFrom<String> for PoolRanking {
    type Error = PortfolioError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PoolRanking> for String {
    fn from(ranking: PoolRanking) -> Self {
        ranking.as_str().to_string()
    }
}

// ---------------------------------------------------------------------------
// Per-call request
// ---------------------------------------------------------------------------

/// Per-call optimization parameters. Unset fields fall back to the engine
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationRequest {
    /// Universe to optimize over; `None` uses every column of the price table.
    #[serde(default)]
    pub tickers: Option<Vec<String>>,
    /// Number of top-ranked assets handed to the optimizer (default: all).
    #[serde(default)]
    pub pool_size: Option<usize>,
    /// Minimum acceptable annualized portfolio return.
    #[serde(default)]
    pub target_return: Option<Rate>,
    #[serde(default)]
    pub risk_free_rate: Option<Rate>,
    #[serde(default)]
    pub method: OptimizationMethod,
    #[serde(default)]
    pub trading_periods_per_year: Option<u32>,
}

impl OptimizationRequest {
    pub fn new(method: OptimizationMethod) -> Self {
        Self {
            tickers: None,
            pool_size: None,
            target_return: None,
            risk_free_rate: None,
            method,
            trading_periods_per_year: None,
        }
    }

    pub fn validate(&self) -> PortfolioResult<()> {
        if let Some(ref tickers) = self.tickers {
            if tickers.is_empty() {
                return Err(PortfolioError::EmptyUniverse(
                    "Request lists no tickers".into(),
                ));
            }
        }
        if self.pool_size == Some(0) {
            return Err(PortfolioError::InvalidInput {
                field: "pool_size".into(),
                reason: "Must be at least 1".into(),
            });
        }
        if let Some(t) = self.target_return {
            if !t.is_finite() {
                return Err(PortfolioError::InvalidInput {
                    field: "target_return".into(),
                    reason: "Must be finite".into(),
                });
            }
        }
        if let Some(rf) = self.risk_free_rate {
            if !rf.is_finite() {
                return Err(PortfolioError::InvalidInput {
                    field: "risk_free_rate".into(),
                    reason: "Must be finite".into(),
                });
            }
        }
        if self.trading_periods_per_year == Some(0) {
            return Err(PortfolioError::InvalidInput {
                field: "trading_periods_per_year".into(),
                reason: "Must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Per-call parameters for an efficient-frontier sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontierRequest {
    pub tickers: Option<Vec<String>>,
    pub pool_size: Option<usize>,
    /// Number of target returns to solve for (default 20).
    pub points: Option<usize>,
    pub trading_periods_per_year: Option<u32>,
}

impl FrontierRequest {
    pub fn validate(&self) -> PortfolioResult<()> {
        if let Some(ref tickers) = self.tickers {
            if tickers.is_empty() {
                return Err(PortfolioError::EmptyUniverse(
                    "Request lists no tickers".into(),
                ));
            }
        }
        if self.pool_size == Some(0) {
            return Err(PortfolioError::InvalidInput {
                field: "pool_size".into(),
                reason: "Must be at least 1".into(),
            });
        }
        if self.points == Some(0) {
            return Err(PortfolioError::InvalidInput {
                field: "points".into(),
                reason: "Must be at least 1".into(),
            });
        }
        if self.trading_periods_per_year == Some(0) {
            return Err(PortfolioError::InvalidInput {
                field: "trading_periods_per_year".into(),
                reason: "Must be positive".into(),
            });
        }
        Ok(())
    }
}
