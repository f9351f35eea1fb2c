pub mod estimate;
pub mod frontier;
pub mod optimize;

use clap::Args;

/// Where the close-price history comes from.
#[derive(Args, Debug, Clone)]
pub struct PriceArgs {
    /// Price table: CSV (`date,SYM1,SYM2,...`) or JSON; stdin when omitted
    #[arg(long)]
    pub prices: Option<String>,

    /// Comma-separated tickers to restrict the universe to
    #[arg(long, value_delimiter = ',')]
    pub tickers: Option<Vec<String>>,

    /// Return observations per year used for annualization (252 for daily data)
    #[arg(long)]
    pub periods_per_year: Option<u32>,
}
