//! # Portfolio Evaluator
//!
//! $$
//! R_p=\mathbf w^\top\mu,\qquad \sigma_p=\sqrt{\max(\mathbf w^\top\Sigma\mathbf w,0)},\qquad
//! S_p=\frac{R_p-r_f}{\sigma_p}
//! $$
//!
//! Pure evaluation of a weight vector against estimated statistics.

use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use tracing::debug;

use crate::PortfolioOutcome;
use crate::error::PortfolioError;
use super::statistics::AssetStatistics;
use super::types::PortfolioResult;
use super::types::Weights;

/// Volatility below which a portfolio is treated as riskless and its Sharpe ratio is zero.
pub const VOLATILITY_FLOOR: f64 = 1e-10;

/// Expected return, volatility and Sharpe ratio of `weights`.
///
/// Weights are not required to satisfy the optimizer constraints; only their length is
/// checked.
pub fn evaluate(
  weights: &[f64],
  statistics: &AssetStatistics,
  risk_free_rate: f64,
) -> PortfolioOutcome<PortfolioResult> {
  let n = statistics.n_assets();
  if weights.len() != n {
    return Err(PortfolioError::MisalignedSeries {
      series: "weights".to_string(),
      expected: n,
      actual: weights.len(),
    });
  }

  let w = ArrayView1::from(weights);
  let daily_return = portfolio_return(w, statistics.mean_returns());
  let raw_variance = portfolio_variance(w, statistics.covariance());

  let variance = if raw_variance < 0.0 {
    debug!(raw_variance, "negative portfolio variance clipped to zero");
    0.0
  } else {
    raw_variance
  };
  let daily_volatility = variance.sqrt();

  Ok(PortfolioResult {
    weights: Weights::new(weights.to_vec()),
    daily_return,
    daily_volatility,
    daily_sharpe: sharpe_ratio(daily_return, daily_volatility, risk_free_rate),
  })
}

/// `(ret - rf) / vol`, or zero when `vol` is under [`VOLATILITY_FLOOR`].
pub fn sharpe_ratio(daily_return: f64, daily_volatility: f64, risk_free_rate: f64) -> f64 {
  if daily_volatility < VOLATILITY_FLOOR {
    debug!(
      daily_volatility,
      "volatility below floor, Sharpe ratio reported as zero"
    );
    return 0.0;
  }
  (daily_return - risk_free_rate) / daily_volatility
}

pub(crate) fn portfolio_return(w: ArrayView1<'_, f64>, mean_returns: &Array1<f64>) -> f64 {
  w.dot(mean_returns)
}

/// Raw quadratic form `w' Sigma w`, possibly slightly negative from round-off.
pub(crate) fn portfolio_variance(w: ArrayView1<'_, f64>, covariance: &Array2<f64>) -> f64 {
  w.dot(&covariance.dot(&w))
}
