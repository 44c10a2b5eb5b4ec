//! # Portfolio Types
//!
//! $$
//! \mathbf{w}^\*=\arg\max_{\mathbf{w}} \frac{\mathbb E[R_p]-r_f}{\sigma_p}
//! $$
//!
//! Shared enums and result containers for portfolio optimization.

use std::fmt;
use std::ops::Deref;

use crate::PortfolioOutcome;
use crate::error::PortfolioError;

/// Objective minimised by a constrained optimizer run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Objective {
  /// Minimise the negative Sharpe ratio.
  MaxSharpe,
  /// Minimise portfolio variance.
  MinVariance,
  /// Minimise variance subject to a fixed expected return.
  TargetReturn,
}

impl fmt::Display for Objective {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Objective::MaxSharpe => write!(f, "max-Sharpe"),
      Objective::MinVariance => write!(f, "min-variance"),
      Objective::TargetReturn => write!(f, "target-return"),
    }
  }
}

/// Long-only allocation, one entry per asset.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Weights(Vec<f64>);

impl Weights {
  /// Allowed deviation of the weight sum from one.
  pub const SUM_TOLERANCE: f64 = 1e-6;

  pub fn new(values: Vec<f64>) -> Self {
    Self(values)
  }

  /// `1/n` in every asset.
  pub fn equal(n: usize) -> Self {
    if n == 0 {
      return Self(Vec::new());
    }
    Self(vec![1.0 / n as f64; n])
  }

  /// Build weights and check the full-investment and position-cap constraints.
  pub fn validated(values: Vec<f64>, max_position: f64) -> PortfolioOutcome<Self> {
    let weights = Self(values);
    weights.check(max_position)?;
    Ok(weights)
  }

  pub fn sum(&self) -> f64 {
    self.0.iter().sum()
  }

  pub fn check(&self, max_position: f64) -> PortfolioOutcome<()> {
    if self.0.is_empty() {
      return Err(PortfolioError::invalid_input("weights", "empty weight vector"));
    }

    let out_of_bounds = |w: f64| {
      !w.is_finite() || w < -Self::SUM_TOLERANCE || w > max_position + Self::SUM_TOLERANCE
    };
    if let Some((i, w)) = self.0.iter().enumerate().find(|(_, w)| out_of_bounds(**w)) {
      return Err(PortfolioError::invalid_input(
        format!("weights[{i}]"),
        format!("{w} is outside [0, {max_position}]"),
      ));
    }

    let total = self.sum();
    if (total - 1.0).abs() > Self::SUM_TOLERANCE {
      return Err(PortfolioError::invalid_input(
        "weights",
        format!("weights sum to {total}, expected 1"),
      ));
    }

    Ok(())
  }

  pub fn as_slice(&self) -> &[f64] {
    &self.0
  }

  pub fn into_inner(self) -> Vec<f64> {
    self.0
  }
}

impl Deref for Weights {
  type Target = [f64];

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

impl From<Vec<f64>> for Weights {
  fn from(values: Vec<f64>) -> Self {
    Self(values)
  }
}

/// Output of a portfolio evaluation or optimization run, in per-period (daily) units.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PortfolioResult {
  /// Final portfolio weights.
  pub weights: Weights,
  /// `sum_i w_i * mu_i`.
  pub daily_return: f64,
  /// `sqrt(w' Sigma w)` with negative round-off variance clipped to zero.
  pub daily_volatility: f64,
  /// `(daily_return - rf) / daily_volatility`, zero for an effectively riskless portfolio.
  pub daily_sharpe: f64,
}

/// Annual view of a per-period result.
///
/// Uses `return * P`, `volatility * sqrt(P)` and `sharpe * sqrt(P)`. These scalings are exact
/// only for i.i.d. returns; they are kept as the conventional approximation.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AnnualizedMetrics {
  pub expected_return: f64,
  pub volatility: f64,
  pub sharpe: f64,
}

impl PortfolioResult {
  pub fn annualized(&self, periods_per_year: f64) -> AnnualizedMetrics {
    let root = periods_per_year.sqrt();
    AnnualizedMetrics {
      expected_return: self.daily_return * periods_per_year,
      volatility: self.daily_volatility * root,
      sharpe: self.daily_sharpe * root,
    }
  }

  /// Pair each weight with its asset name, in asset order.
  pub fn allocations<'a>(&'a self, assets: &'a [String]) -> Vec<(&'a str, f64)> {
    assets
      .iter()
      .map(String::as_str)
      .zip(self.weights.iter().copied())
      .collect()
  }
}

/// One efficient-frontier portfolio tagged with the target return it was solved for.
#[derive(Clone, Debug, PartialEq)]
pub struct FrontierPoint {
  pub target_return: f64,
  pub portfolio: PortfolioResult,
}
