use chrono::NaiveDate;
use portfolio_core::{PriceRow, PriceTable};
use serde::de::DeserializeOwned;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Read a JSON file and deserialise into a typed struct.
pub fn read_json<T: DeserializeOwned>(path: &str) -> Result<T, Box<dyn std::error::Error>> {
    let canonical = resolve_path(path)?;
    let contents = fs::read_to_string(&canonical)
        .map_err(|e| format!("Failed to read '{}': {}", canonical.display(), e))?;
    let value: T = serde_json::from_str(&contents)
        .map_err(|e| format!("Failed to parse '{}': {}", canonical.display(), e))?;
    Ok(value)
}

/// Read a YAML file and deserialise into a typed struct.
pub fn read_yaml<T: DeserializeOwned>(path: &str) -> Result<T, Box<dyn std::error::Error>> {
    let canonical = resolve_path(path)?;
    let contents = fs::read_to_string(&canonical)
        .map_err(|e| format!("Failed to read '{}': {}", canonical.display(), e))?;
    let value: T = serde_yaml::from_str(&contents)
        .map_err(|e| format!("Failed to parse '{}': {}", canonical.display(), e))?;
    Ok(value)
}

/// JSON or YAML, chosen by file extension (JSON when unknown).
pub fn read_structured<T: DeserializeOwned>(path: &str) -> Result<T, Box<dyn std::error::Error>> {
    match extension(path).as_deref() {
        Some("yaml") | Some("yml") => read_yaml(path),
        _ => read_json(path),
    }
}

/// Load a price table from `.csv` (`date,SYM1,SYM2,...`) or JSON
/// (`{"symbols": [...], "rows": [{"date": ..., "closes": [...]}]}`).
pub fn read_prices(path: &str) -> Result<PriceTable, Box<dyn std::error::Error>> {
    if extension(path).as_deref() == Some("csv") {
        let canonical = resolve_path(path)?;
        let file = fs::File::open(&canonical)
            .map_err(|e| format!("Failed to read '{}': {}", canonical.display(), e))?;
        parse_price_csv(file)
            .map_err(|e| format!("Failed to parse '{}': {}", canonical.display(), e).into())
    } else {
        read_json(path)
    }
}

/// Parse close prices from CSV with a leading date column.
///
/// Blank or unparseable closes become NaN and are dropped later by the
/// estimator's cleaning step. Rows may arrive in any date order.
pub fn parse_price_csv<R: Read>(reader: R) -> Result<PriceTable, Box<dyn std::error::Error>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let headers = rdr.headers()?.clone();
    if headers.len() < 2 {
        return Err("Price CSV needs a date column and at least one symbol column".into());
    }
    let symbols: Vec<String> = headers.iter().skip(1).map(|h| h.to_string()).collect();

    let mut rows = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record?;
        let raw_date = record.get(0).unwrap_or_default();
        let date = NaiveDate::parse_from_str(raw_date, DATE_FORMAT)
            .map_err(|e| format!("Row {}: invalid date '{}': {}", line + 1, raw_date, e))?;
        let closes = (1..headers.len())
            .map(|i| {
                record
                    .get(i)
                    .and_then(|v| v.parse::<f64>().ok())
                    .unwrap_or(f64::NAN)
            })
            .collect();
        rows.push(PriceRow { date, closes });
    }
    rows.sort_by_key(|r| r.date);

    Ok(PriceTable::new(symbols, rows)?)
}

fn extension(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Resolve and validate the path, preventing directory traversal.
fn resolve_path(path: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let p = Path::new(path);
    let canonical = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()?.join(p)
    };

    if !canonical.exists() {
        return Err(format!("File not found: {}", canonical.display()).into());
    }

    if !canonical.is_file() {
        return Err(format!("Not a file: {}", canonical.display()).into());
    }

    Ok(canonical)
}
