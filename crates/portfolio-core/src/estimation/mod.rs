pub mod price_table;
pub mod statistics;

pub use price_table::{PriceRow, PriceTable};
pub use statistics::{estimate, period_returns, AssetStatistics, ReturnSeries};
