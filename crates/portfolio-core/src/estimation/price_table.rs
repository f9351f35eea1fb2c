use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::PortfolioError;
use crate::PortfolioResult;

/// One observation date with a close per symbol, in column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    pub date: NaiveDate,
    pub closes: Vec<f64>,
}

/// Adjusted close prices, one column per symbol, rows ascending by date.
///
/// Construction validates the shape; values may still be non-finite until
/// [`PriceTable::clean`] is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPriceTable")]
pub struct PriceTable {
    symbols: Vec<String>,
    rows: Vec<PriceRow>,
}

#[derive(Deserialize)]
struct RawPriceTable {
    symbols: Vec<String>,
    rows: Vec<PriceRow>,
}

impl TryFrom<RawPriceTable> for PriceTable {
    type Error = PortfolioError;

    fn try_from(raw: RawPriceTable) -> Result<Self, Self::Error> {
        PriceTable::new(raw.symbols, raw.rows)
    }
}

impl PriceTable {
    pub fn new(symbols: Vec<String>, rows: Vec<PriceRow>) -> PortfolioResult<Self> {
        let mut seen = HashSet::with_capacity(symbols.len());
        for s in &symbols {
            if s.trim().is_empty() {
                return Err(PortfolioError::InvalidInput {
                    field: "symbols".into(),
                    reason: "Symbol must not be empty".into(),
                });
            }
            if !seen.insert(s.as_str()) {
                return Err(PortfolioError::InvalidInput {
                    field: "symbols".into(),
                    reason: format!("Duplicate symbol '{}'", s),
                });
            }
        }

        for (i, row) in rows.iter().enumerate() {
            if row.closes.len() != symbols.len() {
                return Err(PortfolioError::InvalidInput {
                    field: format!("rows[{}]", i),
                    reason: format!(
                        "Expected {} closes but got {}",
                        symbols.len(),
                        row.closes.len()
                    ),
                });
            }
        }

        for (i, pair) in rows.windows(2).enumerate() {
            if pair[1].date <= pair[0].date {
                return Err(PortfolioError::InvalidInput {
                    field: format!("rows[{}]", i + 1),
                    reason: format!(
                        "Dates must be strictly ascending ({} follows {})",
                        pair[1].date, pair[0].date
                    ),
                });
            }
        }

        Ok(Self { symbols, rows })
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn rows(&self) -> &[PriceRow] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty() || self.rows.is_empty()
    }

    /// Closes for one symbol, in date order.
    pub fn column(&self, index: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r.closes[index]).collect()
    }

    /// Copy of the table without any row holding a non-finite close.
    pub fn clean(&self) -> PriceTable {
        let rows = self
            .rows
            .iter()
            .filter(|r| r.closes.iter().all(|p| p.is_finite()))
            .cloned()
            .collect();
        PriceTable {
            symbols: self.symbols.clone(),
            rows,
        }
    }

    /// Project onto `tickers`, in the order given.
    pub fn restrict(&self, tickers: &[String]) -> PortfolioResult<PriceTable> {
        let mut indices = Vec::with_capacity(tickers.len());
        let mut seen = HashSet::with_capacity(tickers.len());
        for t in tickers {
            if !seen.insert(t.as_str()) {
                continue;
            }
            match self.symbols.iter().position(|s| s == t) {
                Some(idx) => indices.push(idx),
                None => {
                    return Err(PortfolioError::InsufficientData(format!(
                        "No price history for '{}'",
                        t
                    )))
                }
            }
        }

        let symbols = indices.iter().map(|&i| self.symbols[i].clone()).collect();
        let rows = self
            .rows
            .iter()
            .map(|r| PriceRow {
                date: r.date,
                closes: indices.iter().map(|&i| r.closes[i]).collect(),
            })
            .collect();
        Ok(PriceTable { symbols, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn row(day: u32, closes: &[f64]) -> PriceRow {
        PriceRow {
            date: d(day),
            closes: closes.to_vec(),
        }
    }

    fn table() -> PriceTable {
        PriceTable::new(
            vec!["AAPL".into(), "MSFT".into()],
            vec![
                row(2, &[100.0, 200.0]),
                row(3, &[f64::NAN, 202.0]),
                row(4, &[102.0, 204.0]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_duplicate_symbols_rejected() {
        let err = PriceTable::new(vec!["A".into(), "A".into()], vec![]).unwrap_err();
        assert!(err.to_string().contains("Duplicate symbol"));
    }

    #[test]
    fn test_ragged_row_rejected() {
        let rows = vec![row(2, &[1.0])];
        assert!(PriceTable::new(vec!["A".into(), "B".into()], rows).is_err());
    }

    #[test]
    fn test_unsorted_dates_rejected() {
        let rows = vec![row(3, &[1.0]), row(2, &[1.0])];
        assert!(PriceTable::new(vec!["A".into()], rows).is_err());
    }

    #[test]
    fn test_clean_drops_non_finite_rows() {
        let cleaned = table().clean();
        assert_eq!(cleaned.num_rows(), 2);
        assert_eq!(cleaned.column(0), vec![100.0, 102.0]);
    }

    #[test]
    fn test_restrict_reorders_columns() {
        let t = table().restrict(&["MSFT".into(), "AAPL".into()]).unwrap();
        assert_eq!(t.symbols(), &["MSFT".to_string(), "AAPL".to_string()]);
        assert_eq!(t.rows()[0].closes, vec![200.0, 100.0]);
    }

    #[test]
    fn test_restrict_unknown_ticker() {
        let err = table().restrict(&["TSLA".into()]).unwrap_err();
        assert!(matches!(err, PortfolioError::InsufficientData(_)));
    }

    #[test]
    fn test_deserialize_validates() {
        let raw = r#"{"symbols": ["A", "A"], "rows": []}"#;
        assert!(serde_json::from_str::<PriceTable>(raw).is_err());
    }
}
