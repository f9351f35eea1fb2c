use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

use super::objective::{portfolio_return, portfolio_volatility, zero_volatility_floor};
use crate::types::{Rate, Weight};

/// Weights at or below this are solver residue and never listed.
pub const DUST_WEIGHT: Weight = 1e-15;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Symbol -> weight pairs in descending weight order.
///
/// Serializes as a JSON object whose keys keep that order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Allocation(Vec<(String, Weight)>);

impl Allocation {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, symbol: &str) -> Option<Weight> {
        self.0.iter().find(|(s, _)| s == symbol).map(|(_, w)| *w)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Weight)> {
        self.0.iter().map(|(s, w)| (s.as_str(), *w))
    }

    pub fn symbols(&self) -> Vec<&str> {
        self.0.iter().map(|(s, _)| s.as_str()).collect()
    }

    pub fn total(&self) -> Weight {
        self.0.iter().map(|(_, w)| w).sum()
    }
}

impl Serialize for Allocation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (symbol, weight) in &self.0 {
            map.serialize_entry(symbol, weight)?;
        }
        map.end()
    }
}

struct AllocationVisitor;

impl<'de> Visitor<'de> for AllocationVisitor {
    type Value = Allocation;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of symbol to weight")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Allocation, A::Error> {
        let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((symbol, weight)) = access.next_entry::<String, Weight>()? {
            entries.push((symbol, weight));
        }
        Ok(Allocation(entries))
    }
}

impl<'de> Deserialize<'de> for Allocation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(AllocationVisitor)
    }
}

/// Final portfolio as reported to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub weights: Allocation,
    #[serde(alias = "expected_annual_return")]
    pub expected_return: Option<Rate>,
    #[serde(alias = "annual_volatility")]
    pub volatility: Option<Rate>,
    pub sharpe_ratio: Option<f64>,
    pub success: bool,
    pub error: Option<String>,
}

impl OptimizationResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            weights: Allocation::default(),
            expected_return: None,
            volatility: None,
            sharpe_ratio: None,
            success: false,
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Turn the solver's raw weight vector into a reportable result.
///
/// Return and volatility come from the full vector, including weights that
/// fall at or below `negligible_weight` (or [`DUST_WEIGHT`]) and are left out
/// of the allocation. The Sharpe ratio here is `return / volatility` with no
/// risk-free rate, and is `None` at or below the zero-volatility floor.
#[allow(clippy::too_many_arguments)]
pub fn assemble(
    symbols: &[String],
    raw_weights: &[Weight],
    expected_returns: &[Rate],
    covariance: &[Vec<f64>],
    success: bool,
    error: Option<String>,
    negligible_weight: Weight,
) -> OptimizationResult {
    if !success {
        return OptimizationResult::failed(
            error.unwrap_or_else(|| "Optimization failed.".to_string()),
        );
    }

    let cutoff = negligible_weight.max(DUST_WEIGHT);
    let mut kept: Vec<(String, Weight)> = symbols
        .iter()
        .zip(raw_weights.iter())
        .filter(|(_, w)| **w > cutoff)
        .map(|(s, w)| (s.clone(), *w))
        .collect();
    // sort_by is stable, so equal weights keep symbol order
    kept.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    let expected_return = portfolio_return(raw_weights, expected_returns);
    let volatility = portfolio_volatility(raw_weights, covariance);
    let sharpe_ratio = if volatility > zero_volatility_floor(covariance) {
        Some(expected_return / volatility)
    } else {
        None
    };

    OptimizationResult {
        weights: Allocation(kept),
        expected_return: Some(expected_return),
        volatility: Some(volatility),
        sharpe_ratio,
        success: true,
        error,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    fn symbols(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("asset{}", i)).collect()
    }

    fn diagonal(variances: &[f64]) -> Vec<Vec<f64>> {
        let n = variances.len();
        let mut covariance = vec![vec![0.0; n]; n];
        for (i, v) in variances.iter().enumerate() {
            covariance[i][i] = *v;
        }
        covariance
    }

    #[test]
    fn test_single_holding() {
        let result = assemble(
            &symbols(3),
            &[1.0, 0.0, 0.0],
            &[0.08, 0.12, 0.03],
            &diagonal(&[0.04, 0.09, 0.01]),
            true,
            None,
            0.0,
        );
        assert!(result.success);
        assert_eq!(result.weights.len(), 1);
        assert_eq!(result.weights.get("asset0"), Some(1.0));
        assert_relative_eq!(result.volatility.unwrap(), 0.2, epsilon = 1e-12);
        assert_relative_eq!(result.expected_return.unwrap(), 0.08, epsilon = 1e-12);
        assert_relative_eq!(result.sharpe_ratio.unwrap(), 0.4, epsilon = 1e-12);
    }

    #[test]
    fn test_descending_order_with_stable_ties() {
        let result = assemble(
            &symbols(4),
            &[0.2, 0.4, 0.2, 0.2],
            &[0.1; 4],
            &diagonal(&[0.04; 4]),
            true,
            None,
            0.0,
        );
        assert_eq!(
            result.weights.symbols(),
            vec!["asset1", "asset0", "asset2", "asset3"]
        );
    }

    #[test]
    fn test_threshold_drops_dust_but_not_from_statistics() {
        let result = assemble(
            &symbols(2),
            &[0.999, 0.001],
            &[0.1, 0.5],
            &diagonal(&[0.04, 0.04]),
            true,
            None,
            0.01,
        );
        assert_eq!(result.weights.symbols(), vec!["asset0"]);
        assert_relative_eq!(
            result.expected_return.unwrap(),
            0.999 * 0.1 + 0.001 * 0.5,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_zero_volatility_has_no_sharpe() {
        let result = assemble(
            &symbols(1),
            &[1.0],
            &[0.03],
            &diagonal(&[0.0]),
            true,
            None,
            0.0,
        );
        assert!(result.success);
        assert_eq!(result.volatility, Some(0.0));
        assert!(result.sharpe_ratio.is_none());
    }

    #[test]
    fn test_rounding_level_volatility_has_no_sharpe_and_no_dust() {
        let result = assemble(
            &symbols(2),
            &[1.0 - 8e-16, 7.77e-16],
            &[0.03, 0.10],
            &diagonal(&[0.0, 0.04]),
            true,
            None,
            0.0,
        );
        assert!(result.success);
        assert_eq!(result.weights.symbols(), vec!["asset0"]);
        assert!(result.volatility.unwrap() < 1e-12);
        assert!(result.sharpe_ratio.is_none());
    }

    #[test]
    fn test_failure_reports_nothing_numeric() {
        let result = assemble(
            &symbols(2),
            &[0.5, 0.5],
            &[0.1, 0.2],
            &diagonal(&[0.04, 0.09]),
            false,
            Some("Optimization failed: Iteration limit reached".into()),
            0.0,
        );
        assert!(!result.success);
        assert!(result.weights.is_empty());
        assert!(result.expected_return.is_none());
        assert!(result.volatility.is_none());
        assert!(result.sharpe_ratio.is_none());
        assert!(result.error.unwrap().contains("Iteration limit"));
    }

    #[test]
    fn test_allocation_json_keeps_order() {
        let result = assemble(
            &symbols(3),
            &[0.1, 0.6, 0.3],
            &[0.1; 3],
            &diagonal(&[0.04; 3]),
            true,
            None,
            0.0,
        );
        let json = serde_json::to_string(&result.weights).unwrap();
        assert_eq!(json, r#"{"asset1":0.6,"asset2":0.3,"asset0":0.1}"#);

        let full = serde_json::to_value(&result).unwrap();
        assert!(full.get("error").unwrap().is_null());
    }

    #[test]
    fn test_result_accepts_annual_field_names() {
        let raw = r#"{
            "weights": {"AAA": 0.7, "BBB": 0.3},
            "expected_annual_return": 0.12,
            "annual_volatility": 0.18,
            "sharpe_ratio": 0.6667,
            "success": true,
            "error": null
        }"#;
        let result: OptimizationResult = serde_json::from_str(raw).unwrap();
        assert_eq!(result.expected_return, Some(0.12));
        assert_eq!(result.volatility, Some(0.18));
        assert_eq!(result.weights.symbols(), vec!["AAA", "BBB"]);
    }
}
