use clap::Args;
use serde_json::Value;

use portfolio_core::{OptimizationMethod, OptimizationRequest, PortfolioEngine};

use super::PriceArgs;
use crate::input;

/// Arguments for portfolio optimization
#[derive(Args)]
pub struct OptimizeArgs {
    #[command(flatten)]
    pub source: PriceArgs,

    /// Request file (JSON or YAML); flags below override its fields
    #[arg(long)]
    pub request: Option<String>,

    /// Objective: sharpe or min_volatility
    #[arg(long)]
    pub method: Option<String>,

    /// Keep only the N top-ranked assets (see --ranking)
    #[arg(long)]
    pub pool_size: Option<usize>,

    /// Minimum annualized portfolio return (e.g. 0.12 for 12%)
    #[arg(long, allow_hyphen_values = true)]
    pub target_return: Option<f64>,

    /// Annualized risk-free rate used by the Sharpe objective
    #[arg(long, allow_hyphen_values = true)]
    pub risk_free_rate: Option<f64>,
}

pub fn run_optimize(
    engine: &PortfolioEngine,
    args: OptimizeArgs,
) -> Result<Value, Box<dyn std::error::Error>> {
    let request = build_request(&args)?;
    let prices = input::load_prices(args.source.prices.as_deref())?;
    let result = engine.optimize(&prices, &request)?;
    Ok(serde_json::to_value(result)?)
}

/// Merge the optional request file with command-line overrides.
fn build_request(args: &OptimizeArgs) -> Result<OptimizationRequest, Box<dyn std::error::Error>> {
    let method = args
        .method
        .as_deref()
        .map(str::parse::<OptimizationMethod>)
        .transpose()?;

    let mut request = match args.request {
        Some(ref path) => input::file::read_structured::<OptimizationRequest>(path)?,
        None => OptimizationRequest::new(method.unwrap_or(OptimizationMethod::MaxSharpe)),
    };

    if let Some(method) = method {
        request.method = method;
    }
    if let Some(ref tickers) = args.source.tickers {
        request.tickers = Some(tickers.clone());
    }
    if let Some(periods) = args.source.periods_per_year {
        request.trading_periods_per_year = Some(periods);
    }
    if let Some(pool_size) = args.pool_size {
        request.pool_size = Some(pool_size);
    }
    if let Some(target) = args.target_return {
        request.target_return = Some(target);
    }
    if let Some(rf) = args.risk_free_rate {
        request.risk_free_rate = Some(rf);
    }

    request.validate()?;
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn args() -> OptimizeArgs {
        OptimizeArgs {
            source: PriceArgs {
                prices: None,
                tickers: None,
                periods_per_year: None,
            },
            request: None,
            method: None,
            pool_size: None,
            target_return: None,
            risk_free_rate: None,
        }
    }

    #[test]
    fn test_defaults_to_max_sharpe() {
        let request = build_request(&args()).unwrap();
        assert_eq!(request.method, OptimizationMethod::MaxSharpe);
        assert!(request.target_return.is_none());
    }

    #[test]
    fn test_unknown_method_rejected() {
        let mut a = args();
        a.method = Some("max_return".into());
        let err = build_request(&a).unwrap_err();
        assert!(err.to_string().contains("Invalid method"));
    }

    #[test]
    fn test_flags_override_request_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"method": "sharpe", "pool_size": 90, "risk_free_rate": 0.01}}"#
        )
        .unwrap();

        let mut a = args();
        a.request = Some(file.path().to_str().unwrap().to_string());
        a.method = Some("min_volatility".into());
        a.target_return = Some(0.12);

        let request = build_request(&a).unwrap();
        assert_eq!(request.method, OptimizationMethod::MinVolatility);
        assert_eq!(request.pool_size, Some(90));
        assert_eq!(request.risk_free_rate, Some(0.01));
        assert_eq!(request.target_return, Some(0.12));
    }

    #[test]
    fn test_request_file_without_method() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"pool_size": 10}}"#).unwrap();

        let mut a = args();
        a.request = Some(file.path().to_str().unwrap().to_string());
        let request = build_request(&a).unwrap();
        assert_eq!(request.method, OptimizationMethod::MaxSharpe);
        assert_eq!(request.pool_size, Some(10));

        a.method = Some("min_vol".into());
        let request = build_request(&a).unwrap();
        assert_eq!(request.method, OptimizationMethod::MinVolatility);
    }
}
