//! # Errors
//!
//! Typed failures of the optimization engine. Variants map onto four kinds
//! (data quality, numerical conditioning, optimization, aggregate) plus usage errors.

use std::fmt;

use thiserror::Error;

use crate::portfolio::types::Objective;

/// Two assets whose sample correlation exceeds the near-duplicate threshold.
#[derive(Clone, Debug, PartialEq)]
pub struct CorrelatedPair {
  pub first: String,
  pub second: String,
  pub correlation: f64,
}

impl fmt::Display for CorrelatedPair {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{} (rho = {:.4})", self.first, self.second, self.correlation)
  }
}

fn describe_pairs(pairs: &[CorrelatedPair]) -> String {
  if pairs.is_empty() {
    return "no pair above the correlation threshold; check for constant or linearly dependent assets"
      .to_string();
  }

  let listed: Vec<String> = pairs.iter().map(ToString::to_string).collect();
  format!("near-duplicate assets: {}", listed.join(", "))
}

#[derive(Debug, Error)]
pub enum PortfolioError {
  #[error("insufficient data: {rows} rows available, at least {required} required")]
  InsufficientData { rows: usize, required: usize },

  #[error("misaligned series `{series}`: expected {expected} observations, got {actual}")]
  MisalignedSeries {
    series: String,
    expected: usize,
    actual: usize,
  },

  #[error(
    "ill-conditioned covariance matrix (condition number {condition_number:.3e} > {threshold:.1e}): {}",
    describe_pairs(.pairs)
  )]
  IllConditionedCovariance {
    condition_number: f64,
    threshold: f64,
    pairs: Vec<CorrelatedPair>,
  },

  #[error("{objective} optimization did not converge after {iterations} iterations: {message}")]
  OptimizationDidNotConverge {
    objective: Objective,
    iterations: u64,
    message: String,
  },

  #[error("target return {target:.6e} is outside the achievable range [{min:.6e}, {max:.6e}]")]
  InfeasibleTargetReturn { target: f64, min: f64, max: f64 },

  #[error("efficient frontier is empty: all {requested} target returns failed")]
  EmptyFrontier { requested: usize },

  #[error(
    "position cap {max_position} cannot fully invest {n_assets} assets (n * cap must be >= 1)"
  )]
  InfeasibleBounds { n_assets: usize, max_position: f64 },

  #[error("capital market line is degenerate: market Sharpe ratio {sharpe:.3e} is ~0")]
  DegenerateCapitalMarketLine { sharpe: f64 },

  #[error("invalid input: {field} - {reason}")]
  InvalidInput { field: String, reason: String },

  #[error("invalid configuration: {field} - {reason}")]
  InvalidConfig { field: String, reason: String },

  #[error(transparent)]
  Evaluation(#[from] anyhow::Error),
}

/// Coarse classification used by callers to decide how to react.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
  /// Raised before any optimization; never recovered automatically.
  DataQuality,
  /// Covariance matrix too close to singular.
  NumericalConditioning,
  /// Per-call solver failure; recoverable inside a frontier sweep.
  Optimization,
  /// Every point of a sweep failed.
  Aggregate,
  /// Caller passed arguments or configuration the engine cannot work with.
  Usage,
}

impl PortfolioError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::InsufficientData { .. } | Self::MisalignedSeries { .. } => ErrorKind::DataQuality,
      Self::IllConditionedCovariance { .. } => ErrorKind::NumericalConditioning,
      Self::OptimizationDidNotConverge { .. }
      | Self::InfeasibleTargetReturn { .. }
      | Self::Evaluation(_) => ErrorKind::Optimization,
      Self::EmptyFrontier { .. } => ErrorKind::Aggregate,
      Self::InfeasibleBounds { .. }
      | Self::DegenerateCapitalMarketLine { .. }
      | Self::InvalidInput { .. }
      | Self::InvalidConfig { .. } => ErrorKind::Usage,
    }
  }

  /// Whether a frontier sweep may drop the point that produced this error.
  pub fn is_skippable(&self) -> bool {
    matches!(
      self,
      Self::OptimizationDidNotConverge { .. } | Self::InfeasibleTargetReturn { .. }
    )
  }

  pub(crate) fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
    Self::InvalidInput {
      field: field.into(),
      reason: reason.into(),
    }
  }

  pub(crate) fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
    Self::InvalidConfig {
      field: field.into(),
      reason: reason.into(),
    }
  }
}
