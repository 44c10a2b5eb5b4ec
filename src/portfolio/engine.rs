//! # Portfolio Engine
//!
//! $$
//! \mathbf{w}^\* = \operatorname{Optimize}(\hat\mu, \hat\Sigma, r_f, w_{\max})
//! $$
//!
//! High-level orchestration API: one validated configuration driving statistics,
//! optimizers, frontier, CML and SML.

use tracing::info;
use tracing::warn;

use crate::PortfolioOutcome;
use crate::config::EngineConfig;
use super::cml::CapitalMarketLine;
use super::data::ReturnsSample;
use super::frontier::generate_with;
use super::optimizers::ConstrainedOptimizer;
use super::sml::BetaAlphaResult;
use super::sml::analyze_sample;
use super::statistics::AssetStatistics;
use super::statistics::ConditioningLimits;
use super::types::FrontierPoint;
use super::types::PortfolioResult;

/// Everything a report needs from one optimization session.
#[derive(Clone, Debug)]
pub struct PortfolioAnalysis {
  pub statistics: AssetStatistics,
  pub max_sharpe: PortfolioResult,
  pub min_variance: PortfolioResult,
  pub frontier: Vec<FrontierPoint>,
  pub capital_market_line: CapitalMarketLine,
}

/// Single entry-point engine for mean-variance workflows.
#[derive(Clone, Debug)]
pub struct PortfolioEngine {
  config: EngineConfig,
}

impl PortfolioEngine {
  /// Construct a new engine, rejecting out-of-range options.
  pub fn new(config: EngineConfig) -> PortfolioOutcome<Self> {
    config.validate()?;
    Ok(Self { config })
  }

  /// Borrow engine configuration.
  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub fn statistics(&self, sample: &ReturnsSample) -> PortfolioOutcome<AssetStatistics> {
    let limits = ConditioningLimits {
      max_condition_number: self.config.condition_number_threshold,
      correlation_flag: self.config.correlation_flag_threshold,
    };
    AssetStatistics::build_with(sample, self.config.min_required_days, &limits)
  }

  /// Optimizer bound to this engine's position cap and solver settings.
  pub fn optimizer<'a>(
    &self,
    statistics: &'a AssetStatistics,
    risk_free_rate: f64,
  ) -> PortfolioOutcome<ConstrainedOptimizer<'a>> {
    Ok(
      ConstrainedOptimizer::new(statistics, risk_free_rate, self.config.max_position_size)?
        .with_solver(self.config.solver.clone()),
    )
  }

  pub fn max_sharpe(
    &self,
    statistics: &AssetStatistics,
    risk_free_rate: f64,
  ) -> PortfolioOutcome<PortfolioResult> {
    self
      .optimizer(statistics, risk_free_rate)?
      .max_sharpe()
      .inspect_err(|err| warn!(error = %err, "max-Sharpe optimization failed"))
  }

  pub fn min_variance(
    &self,
    statistics: &AssetStatistics,
    risk_free_rate: f64,
  ) -> PortfolioOutcome<PortfolioResult> {
    self
      .optimizer(statistics, risk_free_rate)?
      .min_variance()
      .inspect_err(|err| warn!(error = %err, "min-variance optimization failed"))
  }

  pub fn for_target_return(
    &self,
    statistics: &AssetStatistics,
    risk_free_rate: f64,
    target_return: f64,
  ) -> PortfolioOutcome<PortfolioResult> {
    self
      .optimizer(statistics, risk_free_rate)?
      .for_target_return(target_return)
      .inspect_err(|err| warn!(error = %err, target_return, "target-return optimization failed"))
  }

  /// Efficient frontier over `frontier_points` evenly spaced targets.
  pub fn frontier(
    &self,
    statistics: &AssetStatistics,
    risk_free_rate: f64,
  ) -> PortfolioOutcome<Vec<FrontierPoint>> {
    let optimizer = self.optimizer(statistics, risk_free_rate)?;
    generate_with(
      &optimizer,
      self.config.frontier_points,
      self.config.parallel_frontier,
    )
  }

  /// CML anchored at the maximum-Sharpe portfolio.
  pub fn capital_market_line(
    &self,
    statistics: &AssetStatistics,
    risk_free_rate: f64,
  ) -> PortfolioOutcome<CapitalMarketLine> {
    let market = self.max_sharpe(statistics, risk_free_rate)?;
    Ok(CapitalMarketLine::new(risk_free_rate, &market))
  }

  /// CAPM beta and alpha of every asset of `sample` against `market`.
  pub fn security_market_line(
    &self,
    sample: &ReturnsSample,
    market: &[f64],
    risk_free_rate: f64,
  ) -> PortfolioOutcome<Vec<BetaAlphaResult>> {
    analyze_sample(sample, market, risk_free_rate)
  }

  /// Statistics, both single-portfolio optimizations, frontier and CML of one sample.
  pub fn analyze(
    &self,
    sample: &ReturnsSample,
    risk_free_rate: f64,
  ) -> PortfolioOutcome<PortfolioAnalysis> {
    let statistics = self.statistics(sample)?;
    let max_sharpe = self.max_sharpe(&statistics, risk_free_rate)?;
    let min_variance = self.min_variance(&statistics, risk_free_rate)?;
    let frontier = self.frontier(&statistics, risk_free_rate)?;
    let capital_market_line = CapitalMarketLine::new(risk_free_rate, &max_sharpe);

    info!(
      assets = statistics.n_assets(),
      observations = statistics.n_observations(),
      frontier_points = frontier.len(),
      daily_sharpe = max_sharpe.daily_sharpe,
      "portfolio analysis complete"
    );

    Ok(PortfolioAnalysis {
      statistics,
      max_sharpe,
      min_variance,
      frontier,
      capital_market_line,
    })
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use tracing_test::traced_test;

  use crate::error::PortfolioError;
  use crate::portfolio::evaluator::evaluate;
  use crate::portfolio::fixtures;
  use crate::portfolio::types::Weights;
  use super::*;

  fn engine() -> PortfolioEngine {
    PortfolioEngine::new(EngineConfig::default()).unwrap()
  }

  #[test]
  fn invalid_configuration_is_rejected() {
    let err = PortfolioEngine::new(EngineConfig::default().with_max_position_size(1.5)).unwrap_err();
    assert!(matches!(err, PortfolioError::InvalidConfig { .. }));
  }

  #[test]
  fn default_frontier_drops_extremes_without_failing() {
    let engine = engine();
    let stats = engine.statistics(&fixtures::ten_asset_sample(42)).unwrap();
    let frontier = engine.frontier(&stats, 0.0001).unwrap();

    assert!(!frontier.is_empty());
    assert!(frontier.len() < 100);
    for pair in frontier.windows(2) {
      assert!(pair[0].target_return < pair[1].target_return);
    }
  }

  #[test]
  #[traced_test]
  fn analysis_bundles_consistent_results() {
    let engine = PortfolioEngine::new(EngineConfig::default().with_frontier_points(30)).unwrap();
    let analysis = engine.analyze(&fixtures::ten_asset_sample(5), 0.0001).unwrap();

    let cml = analysis.capital_market_line;
    assert_eq!(cml.market_sharpe(), analysis.max_sharpe.daily_sharpe);
    assert_abs_diff_eq!(
      cml.expected_return(analysis.max_sharpe.daily_volatility),
      analysis.max_sharpe.daily_return,
      epsilon = 1e-12
    );

    // no frontier portfolio beats the tangency Sharpe or the minimum volatility
    for p in &analysis.frontier {
      assert!(p.portfolio.daily_sharpe <= analysis.max_sharpe.daily_sharpe + 1e-9);
      assert!(p.portfolio.daily_volatility >= analysis.min_variance.daily_volatility - 1e-9);
    }
    assert!(logs_contain("portfolio analysis complete"));
  }

  #[test]
  fn uncapped_optimizers_beat_single_assets_and_equal_weight() {
    let engine = PortfolioEngine::new(EngineConfig::default().with_max_position_size(1.0)).unwrap();
    let stats = engine.statistics(&fixtures::ten_asset_sample(13)).unwrap();
    let rf = 0.0001;

    let tangency = engine.max_sharpe(&stats, rf).unwrap();
    let min_var = engine.min_variance(&stats, rf).unwrap();

    for (i, sd) in stats.std_devs().iter().enumerate() {
      assert!(min_var.daily_volatility <= sd + 1e-12);

      let mut single = vec![0.0; stats.n_assets()];
      single[i] = 1.0;
      let single = evaluate(&single, &stats, rf).unwrap();
      assert!(tangency.daily_sharpe >= single.daily_sharpe - 1e-9);
    }

    let equal = evaluate(&Weights::equal(stats.n_assets()), &stats, rf).unwrap();
    assert!(min_var.daily_volatility <= equal.daily_volatility + 1e-12);
    assert!(tangency.daily_sharpe >= min_var.daily_sharpe - 1e-9);
  }

  #[test]
  fn short_samples_fail_before_optimizing() {
    let sample = fixtures::ten_asset_sample(1).tail(100);
    let err = engine().analyze(&sample, 0.0).unwrap_err();
    assert!(matches!(
      err,
      PortfolioError::InsufficientData {
        rows: 100,
        required: 252
      }
    ));
  }

  #[test]
  fn security_market_line_uses_the_sample_columns() {
    let sample = fixtures::ten_asset_sample(2);
    let market: Vec<f64> = sample
      .values()
      .rows()
      .into_iter()
      .map(|row| row.mean().unwrap_or(0.0))
      .collect();

    let results = engine()
      .security_market_line(&sample, &market, 0.0001)
      .unwrap();
    assert_eq!(results.len(), 10);
    let average_beta = results.iter().map(|r| r.beta).sum::<f64>() / 10.0;
    assert_abs_diff_eq!(average_beta, 1.0, epsilon = 1e-9);
  }
}
