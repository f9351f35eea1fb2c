use clap::Args;
use serde_json::Value;

use portfolio_core::{FrontierRequest, PortfolioEngine};

use super::PriceArgs;
use crate::input;

/// Arguments for an efficient-frontier sweep
#[derive(Args)]
pub struct FrontierArgs {
    #[command(flatten)]
    pub source: PriceArgs,

    /// Request file (JSON or YAML); flags below override its fields
    #[arg(long)]
    pub request: Option<String>,

    /// Number of frontier points (default 20)
    #[arg(long)]
    pub points: Option<usize>,

    /// Keep only the N top-ranked assets (see --ranking)
    #[arg(long)]
    pub pool_size: Option<usize>,
}

pub fn run_frontier(
    engine: &PortfolioEngine,
    args: FrontierArgs,
) -> Result<Value, Box<dyn std::error::Error>> {
    let mut request: FrontierRequest = match args.request {
        Some(ref path) => input::file::read_structured(path)?,
        None => FrontierRequest::default(),
    };
    if let Some(ref tickers) = args.source.tickers {
        request.tickers = Some(tickers.clone());
    }
    if let Some(periods) = args.source.periods_per_year {
        request.trading_periods_per_year = Some(periods);
    }
    if args.points.is_some() {
        request.points = args.points;
    }
    if args.pool_size.is_some() {
        request.pool_size = args.pool_size;
    }

    let prices = input::load_prices(args.source.prices.as_deref())?;
    let result = engine.efficient_frontier(&prices, &request)?;
    Ok(serde_json::to_value(result)?)
}
