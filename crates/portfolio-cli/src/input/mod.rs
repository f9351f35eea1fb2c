pub mod file;
pub mod stdin;

use portfolio_core::PriceTable;
use tracing::debug;

/// Price table from `--prices <file>` or, failing that, piped stdin.
pub fn load_prices(path: Option<&str>) -> Result<PriceTable, Box<dyn std::error::Error>> {
    let table = if let Some(path) = path {
        file::read_prices(path)?
    } else if let Some(table) = stdin::read_stdin_prices()? {
        table
    } else {
        return Err("--prices <file.csv|file.json> or a price table on stdin required".into());
    };

    debug!(
        symbols = table.symbols().len(),
        rows = table.num_rows(),
        source = path.unwrap_or("stdin"),
        "Loaded price table"
    );
    Ok(table)
}
