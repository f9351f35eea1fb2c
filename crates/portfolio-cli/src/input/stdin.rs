use portfolio_core::PriceTable;
use std::io::{self, Read};

use super::file::parse_price_csv;

/// Read a price table piped on stdin, as JSON or CSV.
/// Returns None if stdin is a TTY (interactive) or empty.
pub fn read_stdin_prices() -> Result<Option<PriceTable>, Box<dyn std::error::Error>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }

    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer)?;
    parse_prices(&buffer)
}

fn parse_prices(buffer: &str) -> Result<Option<PriceTable>, Box<dyn std::error::Error>> {
    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    if trimmed.starts_with('{') {
        let table: PriceTable = serde_json::from_str(trimmed)?;
        Ok(Some(table))
    } else {
        Ok(Some(parse_price_csv(trimmed.as_bytes())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_prices() {
        let raw = r#"{
            "symbols": ["AAA"],
            "rows": [
                {"date": "2024-01-02", "closes": [10.0]},
                {"date": "2024-01-03", "closes": [10.5]}
            ]
        }"#;
        let table = parse_prices(raw).unwrap().unwrap();
        assert_eq!(table.num_rows(), 2);
    }

    #[test]
    fn test_csv_prices() {
        let table = parse_prices("date,AAA\n2024-01-02,10\n").unwrap().unwrap();
        assert_eq!(table.symbols().len(), 1);
    }

    #[test]
    fn test_blank_input_is_none() {
        assert!(parse_prices("  \n").unwrap().is_none());
    }
}
