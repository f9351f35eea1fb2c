use std::time::Instant;

use tracing::{info, warn};

use crate::config::{EngineConfig, OptimizationRequest};
use crate::error::PortfolioError;
use crate::estimation::{estimate, AssetStatistics, PriceTable};
use crate::optimization::{assemble, optimize, ConstrainedSolver, OptimizationResult, SqpSolver};
use crate::selection::{ranking_for, select_pool, RankingKey};
use crate::types::{with_metadata, ComputationOutput, Rate};
use crate::PortfolioResult;

#[cfg(feature = "frontier")]
use crate::config::FrontierRequest;
#[cfg(feature = "frontier")]
use crate::optimization::{efficient_frontier, EfficientFrontier, DEFAULT_FRONTIER_POINTS};

/// Weight above which a holding is flagged as concentrated.
const CONCENTRATION_LIMIT: f64 = 0.40;

/// Entry point for estimation and optimization.
///
/// Holds no mutable state; one engine can serve concurrent callers.
pub struct PortfolioEngine {
    config: EngineConfig,
    solver: Box<dyn ConstrainedSolver + Send + Sync>,
    ranking: Box<dyn RankingKey + Send + Sync>,
}

impl std::fmt::Debug for PortfolioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortfolioEngine")
            .field("config", &self.config)
            .field("solver", &self.solver.name())
            .field("ranking", &self.ranking.name())
            .finish()
    }
}

impl PortfolioEngine {
    /// Engine with the SQP solver and the configured pool ranking.
    pub fn new(config: EngineConfig) -> PortfolioResult<Self> {
        config.validate()?;
        let solver = SqpSolver::new(config.solver.clone());
        let ranking = ranking_for(config.pool_ranking, config.default_risk_free_rate);
        Ok(Self {
            config,
            solver: Box::new(solver),
            ranking,
        })
    }

    pub fn with_solver(mut self, solver: Box<dyn ConstrainedSolver + Send + Sync>) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_ranking(mut self, ranking: Box<dyn RankingKey + Send + Sync>) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Estimation
    // -----------------------------------------------------------------------

    /// Annualized expected returns and covariance for every symbol in `prices`.
    pub fn estimate(
        &self,
        prices: &PriceTable,
        periods_per_year: Option<u32>,
    ) -> PortfolioResult<ComputationOutput<AssetStatistics>> {
        let start = Instant::now();
        let periods = periods_per_year.unwrap_or(self.config.trading_periods_per_year);
        let stats = estimate(prices, periods)?;

        let mut warnings = Vec::new();
        for (symbol, vol) in stats.symbols.iter().zip(stats.volatilities()) {
            if vol == 0.0 {
                warnings.push(format!("Zero volatility: {} has constant prices", symbol));
            }
        }

        let elapsed = start.elapsed().as_micros() as u64;
        Ok(with_metadata(
            "Annualized mean and sample covariance of simple returns",
            &serde_json::json!({
                "periods_per_year": periods,
                "price_rows": prices.num_rows(),
                "assets": stats.len(),
                "covariance": "sample (n - 1)",
            }),
            warnings,
            elapsed,
            stats,
        ))
    }

    // -----------------------------------------------------------------------
    // Optimization
    // -----------------------------------------------------------------------

    /// Estimate statistics from `prices`, select a pool and optimize it.
    ///
    /// Solver failure is not an `Err`: the result carries `success = false`.
    pub fn optimize(
        &self,
        prices: &PriceTable,
        request: &OptimizationRequest,
    ) -> PortfolioResult<ComputationOutput<OptimizationResult>> {
        let start = Instant::now();
        request.validate()?;

        let table = match request.tickers {
            Some(ref tickers) => prices.restrict(tickers)?,
            None => prices.clone(),
        };
        let periods = request
            .trading_periods_per_year
            .unwrap_or(self.config.trading_periods_per_year);
        let stats = estimate(&table, periods)?;

        self.run_optimization(&stats, request, periods, start)
    }

    /// Optimize over statistics the caller already holds.
    pub fn optimize_statistics(
        &self,
        stats: &AssetStatistics,
        request: &OptimizationRequest,
    ) -> PortfolioResult<ComputationOutput<OptimizationResult>> {
        let start = Instant::now();
        request.validate()?;
        stats.validate()?;

        let stats = match request.tickers {
            Some(ref tickers) => stats.subset(&ticker_indices(&stats.symbols, tickers)?),
            None => stats.clone(),
        };
        let periods = request
            .trading_periods_per_year
            .unwrap_or(self.config.trading_periods_per_year);

        self.run_optimization(&stats, request, periods, start)
    }

    fn run_optimization(
        &self,
        stats: &AssetStatistics,
        request: &OptimizationRequest,
        periods: u32,
        start: Instant,
    ) -> PortfolioResult<ComputationOutput<OptimizationResult>> {
        let mut warnings: Vec<String> = Vec::new();
        let rf: Rate = request
            .risk_free_rate
            .unwrap_or(self.config.default_risk_free_rate);

        let pool = select_pool(stats, request.pool_size, self.ranking.as_ref())?;
        if pool.len() < stats.len() {
            warnings.push(format!(
                "Asset pool truncated from {} to {} by {} ranking",
                stats.len(),
                pool.len(),
                self.ranking.name()
            ));
        }
        let candidates = stats.subset(&pool);

        let outcome = optimize(
            request.method,
            &candidates,
            rf,
            request.target_return,
            self.solver.as_ref(),
            &self.config.solver,
        );
        let diagnostics = outcome.diagnostics.clone();

        let result = assemble(
            &candidates.symbols,
            &outcome.weights,
            &candidates.expected_returns,
            &candidates.covariance,
            outcome.success,
            outcome.error,
            self.config.negligible_weight,
        );

        if result.success {
            for (symbol, weight) in result.weights.iter() {
                if weight > CONCENTRATION_LIMIT {
                    warnings.push(format!(
                        "Concentrated position: {} has weight {:.4}",
                        symbol, weight
                    ));
                }
            }
            if rf != 0.0 {
                warnings.push(format!(
                    "sharpe_ratio is reported as expected_return / volatility; \
                     the risk-free rate ({}) is used only by the optimizer",
                    rf
                ));
            }
            info!(
                method = %request.method,
                assets = candidates.len(),
                holdings = result.weights.len(),
                iterations = diagnostics.iterations,
                "Optimization complete"
            );
        } else {
            let reason = result.error.clone().unwrap_or_default();
            warn!(method = %request.method, "{}", reason);
            warnings.push(format!("Solver did not converge: {}", diagnostics.message));
        }

        let elapsed = start.elapsed().as_micros() as u64;
        Ok(with_metadata(
            "Long-only mean-variance optimization (SQP)",
            &serde_json::json!({
                "method": request.method,
                "risk_free_rate": rf,
                "target_return": request.target_return,
                "periods_per_year": periods,
                "universe_size": stats.len(),
                "pool_size": candidates.len(),
                "ranking": self.ranking.name(),
                "solver": self.solver.name(),
                "diagnostics": diagnostics,
            }),
            warnings,
            elapsed,
            result,
        ))
    }

    // -----------------------------------------------------------------------
    // Efficient frontier
    // -----------------------------------------------------------------------

    #[cfg(feature = "frontier")]
    pub fn efficient_frontier(
        &self,
        prices: &PriceTable,
        request: &FrontierRequest,
    ) -> PortfolioResult<ComputationOutput<EfficientFrontier>> {
        let start = Instant::now();
        request.validate()?;

        let table = match request.tickers {
            Some(ref tickers) => prices.restrict(tickers)?,
            None => prices.clone(),
        };
        let periods = request
            .trading_periods_per_year
            .unwrap_or(self.config.trading_periods_per_year);
        let stats = estimate(&table, periods)?;

        self.run_frontier(&stats, request, periods, start)
    }

    #[cfg(feature = "frontier")]
    pub fn efficient_frontier_statistics(
        &self,
        stats: &AssetStatistics,
        request: &FrontierRequest,
    ) -> PortfolioResult<ComputationOutput<EfficientFrontier>> {
        let start = Instant::now();
        request.validate()?;
        stats.validate()?;

        let stats = match request.tickers {
            Some(ref tickers) => stats.subset(&ticker_indices(&stats.symbols, tickers)?),
            None => stats.clone(),
        };
        let periods = request
            .trading_periods_per_year
            .unwrap_or(self.config.trading_periods_per_year);

        self.run_frontier(&stats, request, periods, start)
    }

    #[cfg(feature = "frontier")]
    fn run_frontier(
        &self,
        stats: &AssetStatistics,
        request: &FrontierRequest,
        periods: u32,
        start: Instant,
    ) -> PortfolioResult<ComputationOutput<EfficientFrontier>> {
        let mut warnings: Vec<String> = Vec::new();
        let pool = select_pool(stats, request.pool_size, self.ranking.as_ref())?;
        if pool.len() < stats.len() {
            warnings.push(format!(
                "Asset pool truncated from {} to {} by {} ranking",
                stats.len(),
                pool.len(),
                self.ranking.name()
            ));
        }
        let candidates = stats.subset(&pool);
        let num_points = request.points.unwrap_or(DEFAULT_FRONTIER_POINTS);

        let frontier = efficient_frontier(
            &candidates,
            num_points,
            self.solver.as_ref(),
            &self.config.solver,
            self.config.negligible_weight,
        )?;

        let failed = frontier
            .points
            .iter()
            .filter(|p| !p.portfolio.success)
            .count();
        if failed > 0 {
            warnings.push(format!(
                "{} of {} frontier points did not solve",
                failed,
                frontier.points.len()
            ));
        }

        info!(
            points = frontier.points.len(),
            failed,
            assets = candidates.len(),
            "Efficient frontier complete"
        );

        let elapsed = start.elapsed().as_micros() as u64;
        Ok(with_metadata(
            "Minimum-volatility efficient frontier (SQP)",
            &serde_json::json!({
                "points": num_points,
                "periods_per_year": periods,
                "universe_size": stats.len(),
                "pool_size": candidates.len(),
                "ranking": self.ranking.name(),
                "solver": self.solver.name(),
                "sharpe_ratio": "expected_return / volatility",
            }),
            warnings,
            elapsed,
            frontier,
        ))
    }
}

/// Positions of `tickers` in `symbols`, skipping repeats.
fn ticker_indices(symbols: &[String], tickers: &[String]) -> PortfolioResult<Vec<usize>> {
    let mut indices: Vec<usize> = Vec::with_capacity(tickers.len());
    for ticker in tickers {
        let index = symbols
            .iter()
            .position(|s| s == ticker)
            .ok_or_else(|| {
                PortfolioError::InsufficientData(format!("No statistics for ticker '{}'", ticker))
            })?;
        if !indices.contains(&index) {
            indices.push(index);
        }
    }
    Ok(indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OptimizationMethod, PoolRanking};
    use approx::assert_abs_diff_eq;
    use tracing_test::traced_test;

    fn two_assets() -> AssetStatistics {
        AssetStatistics::new(
            vec!["BOND".into(), "EQUITY".into()],
            vec![0.10, 0.20],
            vec![vec![0.04, 0.01], vec![0.01, 0.09]],
        )
        .unwrap()
    }

    fn engine() -> PortfolioEngine {
        PortfolioEngine::new(EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PortfolioEngine>();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            trading_periods_per_year: 0,
            ..EngineConfig::default()
        };
        assert!(PortfolioEngine::new(config).is_err());
    }

    #[test]
    fn test_two_asset_max_sharpe_at_zero_rate() {
        let request = OptimizationRequest::new(OptimizationMethod::MaxSharpe);
        let out = engine()
            .optimize_statistics(&two_assets(), &request)
            .unwrap();
        let result = &out.result;
        assert!(result.success, "{:?}", result.error);
        let bond = result.weights.get("BOND").unwrap_or(0.0);
        let equity = result.weights.get("EQUITY").unwrap_or(0.0);
        assert!(equity >= bond - 1e-4);
        assert_abs_diff_eq!(bond + equity, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_two_asset_max_sharpe_with_rate_favours_equity() {
        let mut request = OptimizationRequest::new(OptimizationMethod::MaxSharpe);
        request.risk_free_rate = Some(0.02);
        let out = engine()
            .optimize_statistics(&two_assets(), &request)
            .unwrap();
        let result = &out.result;
        assert!(result.success, "{:?}", result.error);
        let bond = result.weights.get("BOND").unwrap();
        let equity = result.weights.get("EQUITY").unwrap();
        assert!(equity > bond);
        assert_abs_diff_eq!(equity, 0.5424, epsilon = 1e-3);
        assert!(out.warnings.iter().any(|w| w.contains("risk-free rate")));
    }

    #[test]
    fn test_unknown_ticker_in_statistics() {
        let mut request = OptimizationRequest::new(OptimizationMethod::MinVolatility);
        request.tickers = Some(vec!["BOND".into(), "GOLD".into()]);
        let err = engine()
            .optimize_statistics(&two_assets(), &request)
            .unwrap_err();
        assert!(matches!(err, PortfolioError::InsufficientData(_)));
    }

    #[test]
    fn test_pool_truncation_warned() {
        let mut request = OptimizationRequest::new(OptimizationMethod::MinVolatility);
        request.pool_size = Some(1);
        let out = engine()
            .optimize_statistics(&two_assets(), &request)
            .unwrap();
        assert!(out.result.success);
        assert_eq!(out.result.weights.symbols(), vec!["EQUITY"]);
        assert!(out.warnings.iter().any(|w| w.contains("truncated")));
    }

    #[test]
    fn test_infeasible_target_is_not_an_error() {
        let mut request = OptimizationRequest::new(OptimizationMethod::MinVolatility);
        request.target_return = Some(0.50);
        let out = engine()
            .optimize_statistics(&two_assets(), &request)
            .unwrap();
        assert!(!out.result.success);
        assert!(out.result.error.is_some());
        assert!(out.result.weights.is_empty());
        assert_eq!(
            out.assumptions["diagnostics"]["message"],
            "Inequality constraints incompatible"
        );
    }

    #[test]
    #[traced_test]
    fn test_logs_completion_and_failure() {
        let ok = OptimizationRequest::new(OptimizationMethod::MinVolatility);
        engine().optimize_statistics(&two_assets(), &ok).unwrap();
        assert!(logs_contain("Optimization complete"));

        let mut bad = OptimizationRequest::new(OptimizationMethod::MinVolatility);
        bad.target_return = Some(0.50);
        engine().optimize_statistics(&two_assets(), &bad).unwrap();
        assert!(logs_contain("Inequality constraints incompatible"));
    }

    #[test]
    fn test_configured_low_volatility_ranking_picks_pool() {
        let config = EngineConfig {
            pool_ranking: PoolRanking::LowVolatility,
            ..EngineConfig::default()
        };
        let engine = PortfolioEngine::new(config).unwrap();
        let mut request = OptimizationRequest::new(OptimizationMethod::MinVolatility);
        request.pool_size = Some(1);
        let out = engine.optimize_statistics(&two_assets(), &request).unwrap();
        assert_eq!(out.result.weights.symbols(), vec!["BOND"]);
        assert_eq!(out.assumptions["ranking"], "low_volatility");
    }

    fn cash_and_equity() -> AssetStatistics {
        AssetStatistics::new(
            vec!["CASH".into(), "EQ".into()],
            vec![0.03, 0.10],
            vec![vec![0.0, 0.0], vec![0.0, 0.04]],
        )
        .unwrap()
    }

    #[test]
    fn test_max_sharpe_with_riskless_asset_holds_it_outright() {
        let request = OptimizationRequest::new(OptimizationMethod::MaxSharpe);
        let out = engine()
            .optimize_statistics(&cash_and_equity(), &request)
            .unwrap();
        let result = &out.result;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.weights.symbols(), vec!["CASH"]);
        assert_eq!(result.weights.get("CASH"), Some(1.0));
        assert_eq!(result.volatility, Some(0.0));
        assert_eq!(result.expected_return, Some(0.03));
        assert!(result.sharpe_ratio.is_none());
        assert_eq!(
            out.assumptions["diagnostics"]["message"],
            "Sharpe ratio is unbounded at riskless asset CASH"
        );
    }

    #[test]
    fn test_max_sharpe_with_riskless_asset_below_rate_uses_solver() {
        let mut request = OptimizationRequest::new(OptimizationMethod::MaxSharpe);
        request.risk_free_rate = Some(0.05);
        let out = engine()
            .optimize_statistics(&cash_and_equity(), &request)
            .unwrap();
        let result = &out.result;
        assert!(result.success, "{:?}", result.error);
        assert!(result.weights.get("EQ").unwrap() > 0.999);
        assert!(result.sharpe_ratio.unwrap().is_finite());
    }

    #[test]
    fn test_ticker_indices_skip_repeats() {
        let symbols: Vec<String> = vec!["A".into(), "B".into(), "C".into()];
        let idx = ticker_indices(&symbols, &["C".into(), "A".into(), "C".into()]).unwrap();
        assert_eq!(idx, vec![2, 0]);
    }
}
