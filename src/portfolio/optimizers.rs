//! # Constrained Optimizers
//!
//! $$
//! \min_{\mathbf w\in\mathcal C} f(\mathbf w),\qquad
//! f\in\Big\{-\frac{\mathbf w^\top\mu-r_f}{\sigma_p},\ \mathbf w^\top\Sigma\mathbf w\Big\},\qquad
//! \text{optionally s.t. } \mathbf w^\top\mu=r^\*
//! $$
//!
//! Long-only, fully invested, position-capped max-Sharpe, min-variance and target-return
//! optimizers. The target-return equality is handled by an augmented Lagrangian around the
//! projected-gradient solver.

use argmin::core::CostFunction;
use argmin::core::Gradient;
use ndarray::ArrayView1;
use tracing::debug;

use crate::PortfolioOutcome;
use crate::config::SolverConfig;
use crate::error::PortfolioError;
use super::evaluator::VOLATILITY_FLOOR;
use super::evaluator::evaluate;
use super::evaluator::portfolio_return;
use super::evaluator::portfolio_variance;
use super::solver::CappedSimplex;
use super::solver::SolverReport;
use super::solver::SpgOptions;
use super::solver::minimize;
use super::statistics::AssetStatistics;
use super::types::Objective;
use super::types::PortfolioResult;
use super::types::Weights;

const INITIAL_PENALTY: f64 = 10.0;
const MAX_PENALTY: f64 = 1e12;

#[derive(Clone)]
struct NegativeSharpe<'a> {
  statistics: &'a AssetStatistics,
  risk_free_rate: f64,
}

impl NegativeSharpe<'_> {
  fn moments(&self, w: ArrayView1<'_, f64>) -> (f64, f64) {
    let ret = portfolio_return(w, self.statistics.mean_returns());
    let vol = portfolio_variance(w, self.statistics.covariance()).max(0.0).sqrt();
    (ret, vol)
  }
}

impl CostFunction for NegativeSharpe<'_> {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, w: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
    let (ret, vol) = self.moments(ArrayView1::from(w.as_slice()));
    if vol < VOLATILITY_FLOOR {
      return Ok(0.0);
    }
    Ok(-(ret - self.risk_free_rate) / vol)
  }
}

impl Gradient for NegativeSharpe<'_> {
  type Param = Vec<f64>;
  type Gradient = Vec<f64>;

  fn gradient(&self, w: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
    let wv = ArrayView1::from(w.as_slice());
    let (ret, vol) = self.moments(wv);
    if vol < VOLATILITY_FLOOR {
      return Ok(vec![0.0; w.len()]);
    }

    let sigma_w = self.statistics.covariance().dot(&wv);
    let excess = ret - self.risk_free_rate;
    let vol3 = vol * vol * vol;
    let grad = self
      .statistics
      .mean_returns()
      .iter()
      .zip(sigma_w.iter())
      .map(|(mu, sw)| -mu / vol + excess * sw / vol3)
      .collect();

    Ok(grad)
  }
}

/// `w' Sigma w / scale`; the scale brings daily variances to order one.
#[derive(Clone)]
struct ScaledVariance<'a> {
  statistics: &'a AssetStatistics,
  scale: f64,
}

impl CostFunction for ScaledVariance<'_> {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, w: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
    let wv = ArrayView1::from(w.as_slice());
    Ok(portfolio_variance(wv, self.statistics.covariance()) / self.scale)
  }
}

impl Gradient for ScaledVariance<'_> {
  type Param = Vec<f64>;
  type Gradient = Vec<f64>;

  fn gradient(&self, w: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
    let wv = ArrayView1::from(w.as_slice());
    let sigma_w = self.statistics.covariance().dot(&wv);
    Ok(sigma_w.iter().map(|sw| 2.0 * sw / self.scale).collect())
  }
}

/// Augmented Lagrangian of the scaled variance under `(mu' w - target) / return_scale = 0`.
#[derive(Clone)]
struct TargetReturnLagrangian<'a> {
  variance: ScaledVariance<'a>,
  target: f64,
  return_scale: f64,
  multiplier: f64,
  penalty: f64,
}

impl TargetReturnLagrangian<'_> {
  fn residual(&self, w: &[f64]) -> f64 {
    let ret = portfolio_return(ArrayView1::from(w), self.variance.statistics.mean_returns());
    (ret - self.target) / self.return_scale
  }
}

impl CostFunction for TargetReturnLagrangian<'_> {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, w: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
    let h = self.residual(w);
    Ok(self.variance.cost(w)? + self.multiplier * h + 0.5 * self.penalty * h * h)
  }
}

impl Gradient for TargetReturnLagrangian<'_> {
  type Param = Vec<f64>;
  type Gradient = Vec<f64>;

  fn gradient(&self, w: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
    let h = self.residual(w);
    let coeff = (self.multiplier + self.penalty * h) / self.return_scale;
    let grad = self
      .variance
      .gradient(w)?
      .iter()
      .zip(self.variance.statistics.mean_returns().iter())
      .map(|(g, mu)| g + coeff * mu)
      .collect();
    Ok(grad)
  }
}

/// Optimizers over one set of statistics, risk-free rate and position cap.
#[derive(Clone, Debug)]
pub struct ConstrainedOptimizer<'a> {
  statistics: &'a AssetStatistics,
  risk_free_rate: f64,
  feasible: CappedSimplex,
  solver: SolverConfig,
}

impl<'a> ConstrainedOptimizer<'a> {
  /// Fails with [`PortfolioError::InfeasibleBounds`] when `n * max_position_size < 1`.
  pub fn new(
    statistics: &'a AssetStatistics,
    risk_free_rate: f64,
    max_position_size: f64,
  ) -> PortfolioOutcome<Self> {
    if !risk_free_rate.is_finite() {
      return Err(PortfolioError::invalid_input(
        "risk_free_rate",
        format!("must be finite, got {risk_free_rate}"),
      ));
    }

    let feasible = CappedSimplex::new(statistics.n_assets(), max_position_size)?;
    Ok(Self {
      statistics,
      risk_free_rate,
      feasible,
      solver: SolverConfig::default(),
    })
  }

  pub fn with_solver(mut self, solver: SolverConfig) -> Self {
    self.solver = solver;
    self
  }

  pub fn statistics(&self) -> &'a AssetStatistics {
    self.statistics
  }

  pub fn risk_free_rate(&self) -> f64 {
    self.risk_free_rate
  }

  pub fn max_position_size(&self) -> f64 {
    self.feasible.upper()
  }

  /// Tangency portfolio: maximise `(mu' w - rf) / sigma_p`.
  pub fn max_sharpe(&self) -> PortfolioOutcome<PortfolioResult> {
    let problem = NegativeSharpe {
      statistics: self.statistics,
      risk_free_rate: self.risk_free_rate,
    };
    let report = minimize(problem, &self.feasible, &self.start(), &self.options())?;
    self.conclude(Objective::MaxSharpe, report)
  }

  /// Global minimum-variance portfolio.
  pub fn min_variance(&self) -> PortfolioOutcome<PortfolioResult> {
    let problem = self.scaled_variance();
    let report = minimize(problem, &self.feasible, &self.start(), &self.options())?;
    self.conclude(Objective::MinVariance, report)
  }

  /// Minimum-volatility portfolio whose expected return equals `target_return`.
  ///
  /// Targets outside the single-asset return range, or outside what the position cap can
  /// reach, fail with [`PortfolioError::InfeasibleTargetReturn`] before any solve.
  pub fn for_target_return(&self, target_return: f64) -> PortfolioOutcome<PortfolioResult> {
    if !target_return.is_finite() {
      return Err(PortfolioError::invalid_input(
        "target_return",
        format!("must be finite, got {target_return}"),
      ));
    }

    let (min, max) = self.statistics.return_range();
    if target_return < min || target_return > max {
      return Err(PortfolioError::InfeasibleTargetReturn {
        target: target_return,
        min,
        max,
      });
    }

    let (lo, hi) = self.achievable_return_range();
    let slack = 1e-12 * lo.abs().max(hi.abs());
    if target_return < lo - slack || target_return > hi + slack {
      return Err(PortfolioError::InfeasibleTargetReturn {
        target: target_return,
        min: lo,
        max: hi,
      });
    }

    let return_scale = self
      .statistics
      .mean_returns()
      .iter()
      .map(|mu| (mu - target_return).abs())
      .fold(0.0, f64::max);

    let mut problem = TargetReturnLagrangian {
      variance: self.scaled_variance(),
      target: target_return,
      return_scale: if return_scale > 0.0 { return_scale } else { 1.0 },
      multiplier: 0.0,
      penalty: INITIAL_PENALTY,
    };

    let options = self.options();
    let mut w = self.start();
    let mut iterations = 0;
    let mut last_residual = f64::INFINITY;

    for _ in 0..self.solver.max_outer_iters {
      let report = minimize(problem.clone(), &self.feasible, &w, &options)?;
      iterations += report.iterations;
      if !report.converged {
        return Err(not_converged(
          Objective::TargetReturn,
          iterations,
          report.message,
        ));
      }

      w = report.param;
      let h = problem.residual(&w);
      if (h * problem.return_scale).abs() <= self.solver.constraint_tolerance {
        return self.accept(Objective::TargetReturn, iterations, w);
      }

      problem.multiplier += problem.penalty * h;
      if h.abs() > 0.25 * last_residual {
        problem.penalty = (problem.penalty * 10.0).min(MAX_PENALTY);
      }
      last_residual = h.abs();
    }

    let violation = last_residual * problem.return_scale;
    Err(not_converged(
      Objective::TargetReturn,
      iterations,
      format!(
        "return constraint still violated by {violation:.3e} after {} outer iterations",
        self.solver.max_outer_iters
      ),
    ))
  }

  /// Lowest and highest expected return reachable under the position cap.
  ///
  /// Greedy: fill the best (worst) assets up to the cap until fully invested.
  pub fn achievable_return_range(&self) -> (f64, f64) {
    let mut means = self.statistics.mean_returns().to_vec();
    means.sort_by(|a, b| a.total_cmp(b));
    let lo = fill_up_to_cap(means.iter().copied(), self.feasible.upper());
    let hi = fill_up_to_cap(means.iter().rev().copied(), self.feasible.upper());
    (lo, hi)
  }

  fn scaled_variance(&self) -> ScaledVariance<'a> {
    let diag = self.statistics.covariance().diag();
    let scale = diag.sum() / diag.len() as f64;
    ScaledVariance {
      statistics: self.statistics,
      scale: if scale > 0.0 { scale } else { 1.0 },
    }
  }

  fn options(&self) -> SpgOptions {
    SpgOptions {
      max_iters: self.solver.max_iters,
      tolerance: self.solver.tolerance,
    }
  }

  fn start(&self) -> Vec<f64> {
    Weights::equal(self.statistics.n_assets()).into_inner()
  }

  fn conclude(
    &self,
    objective: Objective,
    report: SolverReport,
  ) -> PortfolioOutcome<PortfolioResult> {
    if !report.converged {
      return Err(not_converged(objective, report.iterations, report.message));
    }
    self.accept(objective, report.iterations, report.param)
  }

  fn accept(
    &self,
    objective: Objective,
    iterations: u64,
    param: Vec<f64>,
  ) -> PortfolioOutcome<PortfolioResult> {
    let cap = self.feasible.upper();
    let clipped: Vec<f64> = param.into_iter().map(|w| w.clamp(0.0, cap)).collect();
    let weights = Weights::validated(clipped, cap).map_err(|err| {
      not_converged(objective, iterations, format!("solution is infeasible: {err}"))
    })?;

    let result = evaluate(&weights, self.statistics, self.risk_free_rate)?;
    debug!(
      %objective,
      iterations,
      daily_return = result.daily_return,
      daily_volatility = result.daily_volatility,
      daily_sharpe = result.daily_sharpe,
      "optimization converged"
    );
    Ok(result)
  }
}

fn fill_up_to_cap(means: impl Iterator<Item = f64>, cap: f64) -> f64 {
  let mut remaining = 1.0_f64;
  let mut total = 0.0;
  for mu in means {
    if remaining <= 0.0 {
      break;
    }
    let take = remaining.min(cap);
    total += take * mu;
    remaining -= take;
  }
  total
}

fn not_converged(objective: Objective, iterations: u64, message: String) -> PortfolioError {
  debug!(%objective, iterations, %message, "optimization did not converge");
  PortfolioError::OptimizationDidNotConverge {
    objective,
    iterations,
    message,
  }
}

/// Maximum-Sharpe portfolio with the default solver settings.
pub fn max_sharpe(
  statistics: &AssetStatistics,
  risk_free_rate: f64,
  max_position_size: f64,
) -> PortfolioOutcome<PortfolioResult> {
  ConstrainedOptimizer::new(statistics, risk_free_rate, max_position_size)?.max_sharpe()
}

/// Minimum-variance portfolio; `risk_free_rate` only enters the reported Sharpe ratio.
pub fn min_variance(
  statistics: &AssetStatistics,
  risk_free_rate: f64,
  max_position_size: f64,
) -> PortfolioOutcome<PortfolioResult> {
  ConstrainedOptimizer::new(statistics, risk_free_rate, max_position_size)?.min_variance()
}

pub fn for_target_return(
  statistics: &AssetStatistics,
  risk_free_rate: f64,
  target_return: f64,
  max_position_size: f64,
) -> PortfolioOutcome<PortfolioResult> {
  ConstrainedOptimizer::new(statistics, risk_free_rate, max_position_size)?
    .for_target_return(target_return)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use rand::Rng;
  use rand::SeedableRng;
  use rand::rngs::StdRng;

  use crate::portfolio::fixtures;
  use super::*;

  const CAP: f64 = 0.40;

  fn ten_asset_statistics() -> AssetStatistics {
    AssetStatistics::build(&fixtures::ten_asset_sample(42), 252).unwrap()
  }

  fn random_feasible(n: usize, cap: f64, count: usize, seed: u64) -> Vec<Vec<f64>> {
    let set = CappedSimplex::new(n, cap).unwrap();
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
      .map(|_| {
        let v: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..1.0)).collect();
        set.project(&v)
      })
      .collect()
  }

  fn assert_feasible(result: &PortfolioResult, cap: f64) {
    assert_abs_diff_eq!(result.weights.sum(), 1.0, epsilon = 1e-6);
    for &w in result.weights.iter() {
      assert!(w >= -1e-6 && w <= cap + 1e-6, "weight {w} outside [0, {cap}]");
    }
  }

  #[test]
  fn two_asset_tangency_and_minimum_variance() {
    let stats = fixtures::constant_correlation_statistics(&[0.0008, 0.0006], 0.01, 0.3);

    // Sigma^-1 (mu - rf) is proportional to [0.00062, 0.00036]
    let tangency = max_sharpe(&stats, 0.0, 1.0).unwrap();
    assert!(tangency.weights[0] >= tangency.weights[1]);
    assert_abs_diff_eq!(tangency.weights[0], 0.62 / 0.98, epsilon = 1e-5);

    let min_var = min_variance(&stats, 0.0, 1.0).unwrap();
    assert_abs_diff_eq!(min_var.weights[0], 0.5, epsilon = 1e-6);
    assert_abs_diff_eq!(min_var.weights[1], 0.5, epsilon = 1e-6);
  }

  #[test]
  fn interior_targets_converge_on_two_assets() {
    let stats = fixtures::constant_correlation_statistics(&[0.0008, 0.0006], 0.01, 0.3);
    let optimizer = ConstrainedOptimizer::new(&stats, 0.0, 1.0).unwrap();

    for k in 1..10 {
      let target = 0.0006 + 0.0002 * k as f64 / 10.0;
      let result = optimizer.for_target_return(target).unwrap();
      assert_abs_diff_eq!(result.weights[0], (target - 0.0006) / 0.0002, epsilon = 1e-6);
      assert_abs_diff_eq!(result.daily_return, target, epsilon = 1e-9);
    }
  }

  #[test]
  fn every_objective_respects_budget_and_cap() {
    let stats = ten_asset_statistics();
    let optimizer = ConstrainedOptimizer::new(&stats, 0.0001, CAP).unwrap();

    assert_feasible(&optimizer.max_sharpe().unwrap(), CAP);
    assert_feasible(&optimizer.min_variance().unwrap(), CAP);

    let (lo, hi) = optimizer.achievable_return_range();
    let target = 0.5 * (lo + hi);
    let result = optimizer.for_target_return(target).unwrap();
    assert_feasible(&result, CAP);
    assert_abs_diff_eq!(result.daily_return, target, epsilon = 1e-9);
  }

  #[test]
  fn max_sharpe_dominates_feasible_portfolios() {
    let stats = ten_asset_statistics();
    let rf = 0.0001;
    let optimizer = ConstrainedOptimizer::new(&stats, rf, CAP).unwrap();
    let best = optimizer.max_sharpe().unwrap();

    for w in random_feasible(10, CAP, 200, 9) {
      let other = evaluate(&w, &stats, rf).unwrap();
      assert!(best.daily_sharpe >= other.daily_sharpe - 1e-9);
    }
    let min_var = optimizer.min_variance().unwrap();
    assert!(best.daily_sharpe >= min_var.daily_sharpe - 1e-9);
  }

  #[test]
  fn min_variance_dominates_feasible_portfolios() {
    let stats = ten_asset_statistics();
    let optimizer = ConstrainedOptimizer::new(&stats, 0.0, CAP).unwrap();
    let best = optimizer.min_variance().unwrap();

    for w in random_feasible(10, CAP, 200, 10) {
      let other = evaluate(&w, &stats, 0.0).unwrap();
      assert!(best.daily_volatility <= other.daily_volatility + 1e-12);
    }
    let tangency = optimizer.max_sharpe().unwrap();
    assert!(best.daily_volatility <= tangency.daily_volatility + 1e-12);
  }

  #[test]
  fn target_return_is_min_volatility_for_its_return() {
    let stats = ten_asset_statistics();
    let optimizer = ConstrainedOptimizer::new(&stats, 0.0, CAP).unwrap();
    let min_var = optimizer.min_variance().unwrap();

    // the min-variance portfolio solved as a target-return problem lands on itself
    let again = optimizer.for_target_return(min_var.daily_return).unwrap();
    assert_abs_diff_eq!(
      again.daily_volatility,
      min_var.daily_volatility,
      epsilon = 1e-9
    );
  }

  #[test]
  fn targets_outside_asset_range_are_infeasible() {
    let stats = ten_asset_statistics();
    let (min, max) = stats.return_range();

    let err = for_target_return(&stats, 0.0, max + 1e-4, CAP).unwrap_err();
    assert!(matches!(err, PortfolioError::InfeasibleTargetReturn { .. }));
    assert!(err.is_skippable());

    let err = for_target_return(&stats, 0.0, min - 1e-4, CAP).unwrap_err();
    assert!(matches!(err, PortfolioError::InfeasibleTargetReturn { .. }));
  }

  #[test]
  fn targets_beyond_the_cap_are_infeasible() {
    let stats = ten_asset_statistics();
    let optimizer = ConstrainedOptimizer::new(&stats, 0.0, CAP).unwrap();
    let (_, max) = stats.return_range();
    let (_, hi) = optimizer.achievable_return_range();
    assert!(hi < max);

    let err = optimizer.for_target_return(0.5 * (hi + max)).unwrap_err();
    match err {
      PortfolioError::InfeasibleTargetReturn { max: reported, .. } => {
        assert_abs_diff_eq!(reported, hi)
      }
      other => panic!("unexpected error {other:?}"),
    }
  }

  #[test]
  fn achievable_range_fills_best_assets_first() {
    let stats = fixtures::constant_correlation_statistics(&[0.001, 0.003, 0.002], 0.01, 0.2);
    let optimizer = ConstrainedOptimizer::new(&stats, 0.0, 0.4).unwrap();
    let (lo, hi) = optimizer.achievable_return_range();

    assert_abs_diff_eq!(hi, 0.4 * 0.003 + 0.4 * 0.002 + 0.2 * 0.001, epsilon = 1e-15);
    assert_abs_diff_eq!(lo, 0.4 * 0.001 + 0.4 * 0.002 + 0.2 * 0.003, epsilon = 1e-15);
  }

  #[test]
  fn infeasible_cap_is_reported_before_solving() {
    let stats = fixtures::constant_correlation_statistics(&[0.0008, 0.0006], 0.01, 0.3);
    let err = max_sharpe(&stats, 0.0, 0.40).unwrap_err();
    assert!(matches!(
      err,
      PortfolioError::InfeasibleBounds { n_assets: 2, .. }
    ));
  }

  #[test]
  fn iteration_cap_yields_non_convergence() {
    let stats = ten_asset_statistics();
    let solver = SolverConfig {
      max_iters: 1,
      ..SolverConfig::default()
    };
    let optimizer = ConstrainedOptimizer::new(&stats, 0.0, CAP)
      .unwrap()
      .with_solver(solver);

    let err = optimizer.max_sharpe().unwrap_err();
    match err {
      PortfolioError::OptimizationDidNotConverge { objective, .. } => {
        assert_eq!(objective, Objective::MaxSharpe)
      }
      other => panic!("unexpected error {other:?}"),
    }
  }

  #[test]
  fn repeated_runs_are_identical() {
    let stats = ten_asset_statistics();
    let first = max_sharpe(&stats, 0.0001, CAP).unwrap();
    let second = max_sharpe(&stats, 0.0001, CAP).unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn reported_metrics_match_reevaluation() {
    let stats = ten_asset_statistics();
    let result = max_sharpe(&stats, 0.0001, CAP).unwrap();
    let again = evaluate(&result.weights, &stats, 0.0001).unwrap();
    assert_eq!(result, again);
  }
}
