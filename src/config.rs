//! # Configuration
//!
//! Recognised engine options. All rates and returns inside the engine are per-period
//! (daily) decimals; `trading_periods_per_year` is consulted only when converting to or from
//! annual figures.

use crate::PortfolioOutcome;
use crate::error::PortfolioError;

/// Default cap on a single asset weight.
pub const DEFAULT_MAX_POSITION_SIZE: f64 = 0.40;
/// Roughly one trading year of daily observations.
pub const DEFAULT_MIN_REQUIRED_DAYS: usize = 252;
/// Default number of target returns swept by the frontier generator.
pub const DEFAULT_FRONTIER_POINTS: usize = 100;
/// Trading days per year.
pub const DEFAULT_TRADING_PERIODS_PER_YEAR: f64 = 252.0;
/// Covariance condition number above which the statistics are rejected.
pub const DEFAULT_CONDITION_NUMBER_THRESHOLD: f64 = 1e10;
/// Pairwise correlation above which two assets are reported as near-duplicates.
pub const DEFAULT_CORRELATION_FLAG_THRESHOLD: f64 = 0.95;

/// Stopping rules of the projected-gradient solver.
#[derive(Clone, Debug)]
pub struct SolverConfig {
  /// Iteration cap of a single projected-gradient run.
  pub max_iters: u64,
  /// Projected-gradient stationarity tolerance (infinity norm, on the scaled objective),
  /// relative to the largest starting gradient entry when that exceeds one.
  pub tolerance: f64,
  /// Allowed violation of the target-return equality.
  pub constraint_tolerance: f64,
  /// Augmented-Lagrangian outer iterations for the target-return problem.
  pub max_outer_iters: u64,
}

impl Default for SolverConfig {
  fn default() -> Self {
    Self {
      max_iters: 5000,
      tolerance: 1e-9,
      constraint_tolerance: 1e-10,
      max_outer_iters: 50,
    }
  }
}

/// Runtime configuration for [`crate::portfolio::PortfolioEngine`].
#[derive(Clone, Debug)]
pub struct EngineConfig {
  /// Upper bound of every asset weight, in `(0, 1]`.
  pub max_position_size: f64,
  /// Minimum number of aligned return rows accepted by the statistics builder.
  pub min_required_days: usize,
  /// Number of target returns swept when tracing the frontier (>= 2).
  pub frontier_points: usize,
  /// Periods per year used at the annualisation boundary.
  pub trading_periods_per_year: f64,
  /// Condition number above which the covariance matrix is rejected.
  pub condition_number_threshold: f64,
  /// Correlation above which an asset pair is flagged as near-duplicate.
  pub correlation_flag_threshold: f64,
  /// Solve frontier points on the rayon thread pool.
  pub parallel_frontier: bool,
  pub solver: SolverConfig,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      max_position_size: DEFAULT_MAX_POSITION_SIZE,
      min_required_days: DEFAULT_MIN_REQUIRED_DAYS,
      frontier_points: DEFAULT_FRONTIER_POINTS,
      trading_periods_per_year: DEFAULT_TRADING_PERIODS_PER_YEAR,
      condition_number_threshold: DEFAULT_CONDITION_NUMBER_THRESHOLD,
      correlation_flag_threshold: DEFAULT_CORRELATION_FLAG_THRESHOLD,
      parallel_frontier: true,
      solver: SolverConfig::default(),
    }
  }
}

impl EngineConfig {
  pub fn with_max_position_size(mut self, max_position_size: f64) -> Self {
    self.max_position_size = max_position_size;
    self
  }

  pub fn with_min_required_days(mut self, min_required_days: usize) -> Self {
    self.min_required_days = min_required_days;
    self
  }

  pub fn with_frontier_points(mut self, frontier_points: usize) -> Self {
    self.frontier_points = frontier_points;
    self
  }

  pub fn with_trading_periods_per_year(mut self, periods: f64) -> Self {
    self.trading_periods_per_year = periods;
    self
  }

  pub fn with_parallel_frontier(mut self, parallel: bool) -> Self {
    self.parallel_frontier = parallel;
    self
  }

  pub fn with_solver(mut self, solver: SolverConfig) -> Self {
    self.solver = solver;
    self
  }

  /// Check every option against its documented range.
  pub fn validate(&self) -> PortfolioOutcome<()> {
    validate_max_position(self.max_position_size)?;

    if self.min_required_days < 2 {
      return Err(PortfolioError::invalid_config(
        "min_required_days",
        "at least 2 observations are needed for a sample covariance",
      ));
    }

    validate_frontier_points(self.frontier_points)?;

    if !(self.trading_periods_per_year.is_finite() && self.trading_periods_per_year > 0.0) {
      return Err(PortfolioError::invalid_config(
        "trading_periods_per_year",
        format!("must be positive, got {}", self.trading_periods_per_year),
      ));
    }

    if !(self.condition_number_threshold > 1.0) {
      return Err(PortfolioError::invalid_config(
        "condition_number_threshold",
        format!("must exceed 1, got {}", self.condition_number_threshold),
      ));
    }

    if !(self.correlation_flag_threshold > 0.0 && self.correlation_flag_threshold <= 1.0) {
      return Err(PortfolioError::invalid_config(
        "correlation_flag_threshold",
        format!("must lie in (0, 1], got {}", self.correlation_flag_threshold),
      ));
    }

    self.solver.validate()
  }

  /// Convert an annual risk-free rate to the per-period unit of the returns.
  pub fn daily_risk_free_rate(&self, annual_rate: f64) -> f64 {
    annual_rate / self.trading_periods_per_year
  }
}

impl SolverConfig {
  pub fn validate(&self) -> PortfolioOutcome<()> {
    if self.max_iters == 0 || self.max_outer_iters == 0 {
      return Err(PortfolioError::invalid_config(
        "solver",
        "iteration caps must be positive",
      ));
    }

    if !(self.tolerance > 0.0 && self.constraint_tolerance > 0.0) {
      return Err(PortfolioError::invalid_config(
        "solver",
        "tolerances must be positive",
      ));
    }

    Ok(())
  }
}

pub(crate) fn validate_max_position(max_position_size: f64) -> PortfolioOutcome<()> {
  if max_position_size > 0.0 && max_position_size <= 1.0 {
    Ok(())
  } else {
    Err(PortfolioError::invalid_config(
      "max_position_size",
      format!("must lie in (0, 1], got {max_position_size}"),
    ))
  }
}

pub(crate) fn validate_frontier_points(frontier_points: usize) -> PortfolioOutcome<()> {
  if frontier_points < 2 {
    return Err(PortfolioError::invalid_config(
      "frontier_points",
      format!("at least 2 points are required, got {frontier_points}"),
    ));
  }
  Ok(())
}
