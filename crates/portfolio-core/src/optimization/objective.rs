use super::linalg::{mat_vec_multiply, quadratic_form, vec_dot};
use crate::types::Rate;

// ---------------------------------------------------------------------------
// Portfolio math
// ---------------------------------------------------------------------------

/// Expected portfolio return `w . r`.
pub fn portfolio_return(weights: &[f64], expected_returns: &[f64]) -> f64 {
    vec_dot(weights, expected_returns)
}

/// Portfolio standard deviation `sqrt(w' * Sigma * w)`.
///
/// The radicand is clamped at zero so rounding on a PSD matrix can never
/// produce a negative volatility or NaN.
pub fn portfolio_volatility(weights: &[f64], covariance: &[Vec<f64>]) -> f64 {
    quadratic_form(covariance, weights).max(0.0).sqrt()
}

/// Volatility at or below which a portfolio counts as riskless.
///
/// Scaled by the largest variance so the cut-off tracks the units of `Sigma`.
pub fn zero_volatility_floor(covariance: &[Vec<f64>]) -> f64 {
    let max_variance = covariance
        .iter()
        .enumerate()
        .filter_map(|(i, row)| row.get(i))
        .fold(0.0_f64, |acc, v| acc.max(*v));
    1e-12 * (1.0 + max_variance)
}

/// `-(w . r - rf) / vol`, or `+inf` when the volatility is at or below
/// [`zero_volatility_floor`].
pub fn negative_sharpe(
    weights: &[f64],
    expected_returns: &[f64],
    covariance: &[Vec<f64>],
    risk_free_rate: Rate,
) -> f64 {
    let vol = portfolio_volatility(weights, covariance);
    if vol <= zero_volatility_floor(covariance) {
        return f64::INFINITY;
    }
    -(portfolio_return(weights, expected_returns) - risk_free_rate) / vol
}

// ---------------------------------------------------------------------------
// Objective seam for the solver
// ---------------------------------------------------------------------------

/// A scalar function the constrained solver minimizes.
pub trait Objective {
    fn value(&self, x: &[f64]) -> f64;

    /// Analytic gradient, if available. The solver falls back to finite
    /// differences on `None`.
    fn gradient(&self, _x: &[f64]) -> Option<Vec<f64>> {
        None
    }
}

/// Minimizes the negative Sharpe ratio.
#[derive(Debug, Clone, Copy)]
pub struct NegativeSharpe<'a> {
    pub expected_returns: &'a [f64],
    pub covariance: &'a [Vec<f64>],
    pub risk_free_rate: Rate,
}

impl Objective for NegativeSharpe<'_> {
    fn value(&self, x: &[f64]) -> f64 {
        negative_sharpe(
            x,
            self.expected_returns,
            self.covariance,
            self.risk_free_rate,
        )
    }

    /// d/dw [-(w.r - rf)/s] = -r/s + (w.r - rf) * Sigma w / s^3
    fn gradient(&self, x: &[f64]) -> Option<Vec<f64>> {
        let sigma_w = mat_vec_multiply(self.covariance, x);
        let vol = vec_dot(x, &sigma_w).max(0.0).sqrt();
        if vol <= zero_volatility_floor(self.covariance) {
            return Some(vec![f64::NAN; x.len()]);
        }
        let excess = portfolio_return(x, self.expected_returns) - self.risk_free_rate;
        let vol_cubed = vol * vol * vol;
        Some(
            self.expected_returns
                .iter()
                .zip(sigma_w.iter())
                .map(|(r, sw)| -r / vol + excess * sw / vol_cubed)
                .collect(),
        )
    }
}

/// Minimizes portfolio volatility.
#[derive(Debug, Clone, Copy)]
pub struct Volatility<'a> {
    pub covariance: &'a [Vec<f64>],
}

impl Objective for Volatility<'_> {
    fn value(&self, x: &[f64]) -> f64 {
        portfolio_volatility(x, self.covariance)
    }

    /// Sigma w / s, taken as zero at a zero-volatility point (a minimum).
    fn gradient(&self, x: &[f64]) -> Option<Vec<f64>> {
        let sigma_w = mat_vec_multiply(self.covariance, x);
        let vol = vec_dot(x, &sigma_w).max(0.0).sqrt();
        if vol == 0.0 {
            return Some(vec![0.0; x.len()]);
        }
        Some(sigma_w.iter().map(|sw| sw / vol).collect())
    }
}
