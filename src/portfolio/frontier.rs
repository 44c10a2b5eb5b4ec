//! # Efficient Frontier
//!
//! $$
//! r_k = \mu_{\min} + \frac{k}{N-1}\,(\mu_{\max}-\mu_{\min}),\qquad
//! \mathbf w_k=\arg\min_{\mathbf w\in\mathcal C,\ \mathbf w^\top\mu=r_k}\ \mathbf w^\top\Sigma\mathbf w
//! $$
//!
//! Sweeps evenly spaced target returns, solving each point independently and dropping the
//! ones that are infeasible or fail to converge.

use rayon::prelude::*;
use tracing::debug;
use tracing::info;

use crate::PortfolioOutcome;
use crate::config::SolverConfig;
use crate::config::validate_frontier_points;
use crate::error::PortfolioError;
use super::optimizers::ConstrainedOptimizer;
use super::statistics::AssetStatistics;
use super::types::FrontierPoint;

/// `n_points` evenly spaced values from `min` to `max`, both included.
pub fn target_grid(min: f64, max: f64, n_points: usize) -> Vec<f64> {
  match n_points {
    0 => Vec::new(),
    1 => vec![min],
    _ => {
      let step = (max - min) / (n_points - 1) as f64;
      (0..n_points)
        .map(|k| {
          if k == n_points - 1 {
            max
          } else {
            min + step * k as f64
          }
        })
        .collect()
    }
  }
}

/// Frontier with the default solver settings, solved in parallel.
pub fn generate(
  statistics: &AssetStatistics,
  risk_free_rate: f64,
  n_points: usize,
  max_position_size: f64,
) -> PortfolioOutcome<Vec<FrontierPoint>> {
  let optimizer = ConstrainedOptimizer::new(statistics, risk_free_rate, max_position_size)?;
  generate_with(&optimizer, n_points, true)
}

/// Frontier points in ascending target order.
///
/// A target whose solve is infeasible or does not converge is logged and skipped; any other
/// error aborts the sweep. Fails with [`PortfolioError::EmptyFrontier`] when nothing is left.
pub fn generate_with(
  optimizer: &ConstrainedOptimizer<'_>,
  n_points: usize,
  parallel: bool,
) -> PortfolioOutcome<Vec<FrontierPoint>> {
  validate_frontier_points(n_points)?;

  let (min, max) = optimizer.statistics().return_range();
  let targets = target_grid(min, max, n_points);

  let solve = |&target_return: &f64| -> PortfolioOutcome<Option<FrontierPoint>> {
    match optimizer.for_target_return(target_return) {
      Ok(portfolio) => Ok(Some(FrontierPoint {
        target_return,
        portfolio,
      })),
      Err(err) if err.is_skippable() => {
        debug!(target_return, error = %err, "frontier point skipped");
        Ok(None)
      }
      Err(err) => Err(err),
    }
  };

  let solved: Vec<Option<FrontierPoint>> = if parallel {
    targets.par_iter().map(solve).collect::<PortfolioOutcome<_>>()?
  } else {
    targets.iter().map(solve).collect::<PortfolioOutcome<_>>()?
  };

  let points: Vec<FrontierPoint> = solved.into_iter().flatten().collect();
  info!(
    requested = n_points,
    solved = points.len(),
    skipped = n_points - points.len(),
    "efficient frontier generated"
  );

  if points.is_empty() {
    return Err(PortfolioError::EmptyFrontier {
      requested: n_points,
    });
  }

  Ok(points)
}

/// Frontier with explicit solver settings.
pub fn generate_with_solver(
  statistics: &AssetStatistics,
  risk_free_rate: f64,
  n_points: usize,
  max_position_size: f64,
  solver: SolverConfig,
  parallel: bool,
) -> PortfolioOutcome<Vec<FrontierPoint>> {
  let optimizer = ConstrainedOptimizer::new(statistics, risk_free_rate, max_position_size)?
    .with_solver(solver);
  generate_with(&optimizer, n_points, parallel)
}
