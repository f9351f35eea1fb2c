use clap::Args;
use serde_json::Value;

use portfolio_core::PortfolioEngine;

use super::PriceArgs;
use crate::input;

/// Arguments for return/covariance estimation
#[derive(Args)]
pub struct EstimateArgs {
    #[command(flatten)]
    pub source: PriceArgs,
}

pub fn run_estimate(
    engine: &PortfolioEngine,
    args: EstimateArgs,
) -> Result<Value, Box<dyn std::error::Error>> {
    let prices = input::load_prices(args.source.prices.as_deref())?;
    let prices = match args.source.tickers {
        Some(ref tickers) => prices.restrict(tickers)?,
        None => prices,
    };
    let result = engine.estimate(&prices, args.source.periods_per_year)?;
    Ok(serde_json::to_value(result)?)
}
