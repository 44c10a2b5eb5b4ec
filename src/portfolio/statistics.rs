//! # Asset Statistics
//!
//! $$
//! \hat\mu_i=\frac1T\sum_t r_{t,i},\qquad
//! \hat\Sigma_{ij}=\frac1{T-1}\sum_t (r_{t,i}-\hat\mu_i)(r_{t,j}-\hat\mu_j),\qquad
//! \kappa(\hat\Sigma)=\frac{\lambda_{\max}}{\lambda_{\min}}
//! $$
//!
//! Sample moments of a [`ReturnsSample`] together with the conditioning check that guards
//! every optimizer downstream.

use nalgebra::DMatrix;
use nalgebra::SymmetricEigen;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::Axis;
use ndarray_stats::CorrelationExt;
use tracing::debug;
use tracing::warn;

use crate::PortfolioOutcome;
use crate::config::DEFAULT_CONDITION_NUMBER_THRESHOLD;
use crate::config::DEFAULT_CORRELATION_FLAG_THRESHOLD;
use crate::error::CorrelatedPair;
use crate::error::PortfolioError;
use super::data::ReturnsSample;

/// Thresholds of the covariance conditioning check.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConditioningLimits {
  /// Largest accepted ratio of extreme eigenvalues.
  pub max_condition_number: f64,
  /// Correlation above which a pair is reported in the rejection.
  pub correlation_flag: f64,
}

impl Default for ConditioningLimits {
  fn default() -> Self {
    Self {
      max_condition_number: DEFAULT_CONDITION_NUMBER_THRESHOLD,
      correlation_flag: DEFAULT_CORRELATION_FLAG_THRESHOLD,
    }
  }
}

/// Average, highest and lowest off-diagonal correlation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CorrelationSummary {
  pub average: f64,
  pub highest: f64,
  pub lowest: f64,
}

/// Per-period mean vector, covariance, standard deviations and correlation of a set of
/// assets, with the covariance known to be well conditioned.
#[derive(Clone, Debug)]
pub struct AssetStatistics {
  assets: Vec<String>,
  n_observations: usize,
  mean_returns: Array1<f64>,
  covariance: Array2<f64>,
  std_devs: Array1<f64>,
  correlation: Array2<f64>,
  condition_number: f64,
}

impl AssetStatistics {
  /// Estimate the statistics of `sample` with the default conditioning limits.
  pub fn build(sample: &ReturnsSample, min_required_days: usize) -> PortfolioOutcome<Self> {
    Self::build_with(sample, min_required_days, &ConditioningLimits::default())
  }

  pub fn build_with(
    sample: &ReturnsSample,
    min_required_days: usize,
    limits: &ConditioningLimits,
  ) -> PortfolioOutcome<Self> {
    let rows = sample.n_rows();
    let required = min_required_days.max(2);
    if rows < required {
      return Err(PortfolioError::InsufficientData { rows, required });
    }

    let values = sample.values();
    let mean_returns = values
      .mean_axis(Axis(0))
      .ok_or(PortfolioError::InsufficientData { rows, required })?;

    // variables are rows for ndarray-stats, so feed assets x periods
    let covariance = values
      .t()
      .cov(1.0)
      .map_err(|_| PortfolioError::InsufficientData { rows, required })?;

    let stats = Self::assemble(
      sample.assets().to_vec(),
      rows,
      mean_returns,
      covariance,
      limits,
    )?;

    debug!(
      assets = stats.n_assets(),
      observations = rows,
      condition_number = stats.condition_number,
      "asset statistics estimated"
    );

    Ok(stats)
  }

  /// Wrap externally estimated per-period moments, running the same conditioning check.
  pub fn from_moments(
    assets: Vec<String>,
    mean_returns: Array1<f64>,
    covariance: Array2<f64>,
    limits: &ConditioningLimits,
  ) -> PortfolioOutcome<Self> {
    let n = assets.len();
    if n == 0 {
      return Err(PortfolioError::invalid_input(
        "assets",
        "at least one asset is required",
      ));
    }
    if mean_returns.len() != n {
      return Err(PortfolioError::MisalignedSeries {
        series: "mean_returns".to_string(),
        expected: n,
        actual: mean_returns.len(),
      });
    }
    if covariance.dim() != (n, n) {
      return Err(PortfolioError::invalid_input(
        "covariance",
        format!("expected a {n}x{n} matrix, got {:?}", covariance.dim()),
      ));
    }
    if mean_returns.iter().chain(covariance.iter()).any(|v| !v.is_finite()) {
      return Err(PortfolioError::invalid_input(
        "moments",
        "mean returns and covariance must be finite",
      ));
    }

    Self::assemble(assets, 0, mean_returns, covariance, limits)
  }

  /// Moments taken as given, skipping the conditioning check.
  #[cfg(test)]
  pub(crate) fn unchecked(
    assets: Vec<String>,
    mean_returns: Array1<f64>,
    covariance: Array2<f64>,
  ) -> Self {
    let std_devs = covariance.diag().mapv(|v| v.max(0.0).sqrt());
    let correlation = corr_from_cov(&covariance);
    let condition_number = condition_number(&covariance);
    Self {
      assets,
      n_observations: 0,
      mean_returns,
      covariance,
      std_devs,
      correlation,
      condition_number,
    }
  }

  fn assemble(
    assets: Vec<String>,
    n_observations: usize,
    mean_returns: Array1<f64>,
    covariance: Array2<f64>,
    limits: &ConditioningLimits,
  ) -> PortfolioOutcome<Self> {
    let covariance = symmetrize(covariance);
    let std_devs = covariance.diag().mapv(|v| v.max(0.0).sqrt());
    let correlation = corr_from_cov(&covariance);
    let condition_number = condition_number(&covariance);

    if !(condition_number <= limits.max_condition_number) {
      let pairs = correlated_pairs(&assets, &correlation, limits.correlation_flag);
      warn!(
        condition_number,
        threshold = limits.max_condition_number,
        flagged_pairs = pairs.len(),
        "covariance matrix rejected as ill-conditioned"
      );
      return Err(PortfolioError::IllConditionedCovariance {
        condition_number,
        threshold: limits.max_condition_number,
        pairs,
      });
    }

    Ok(Self {
      assets,
      n_observations,
      mean_returns,
      covariance,
      std_devs,
      correlation,
      condition_number,
    })
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn n_assets(&self) -> usize {
    self.assets.len()
  }

  /// Rows the moments were estimated from; zero for [`AssetStatistics::from_moments`].
  pub fn n_observations(&self) -> usize {
    self.n_observations
  }

  pub fn mean_returns(&self) -> &Array1<f64> {
    &self.mean_returns
  }

  pub fn covariance(&self) -> &Array2<f64> {
    &self.covariance
  }

  pub fn std_devs(&self) -> &Array1<f64> {
    &self.std_devs
  }

  pub fn correlation(&self) -> &Array2<f64> {
    &self.correlation
  }

  pub fn condition_number(&self) -> f64 {
    self.condition_number
  }

  /// Lowest and highest single-asset mean return.
  pub fn return_range(&self) -> (f64, f64) {
    self
      .mean_returns
      .iter()
      .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &m| {
        (lo.min(m), hi.max(m))
      })
  }

  pub fn annualized_mean_returns(&self, periods_per_year: f64) -> Array1<f64> {
    &self.mean_returns * periods_per_year
  }

  pub fn annualized_std_devs(&self, periods_per_year: f64) -> Array1<f64> {
    &self.std_devs * periods_per_year.sqrt()
  }

  pub fn annualized_covariance(&self, periods_per_year: f64) -> Array2<f64> {
    &self.covariance * periods_per_year
  }

  /// Summary of the upper-triangle correlations; `None` for a single asset.
  pub fn correlation_summary(&self) -> Option<CorrelationSummary> {
    let n = self.n_assets();
    if n < 2 {
      return None;
    }

    let mut sum = 0.0;
    let mut highest = f64::NEG_INFINITY;
    let mut lowest = f64::INFINITY;
    for i in 0..n {
      for j in (i + 1)..n {
        let rho = self.correlation[[i, j]];
        sum += rho;
        highest = highest.max(rho);
        lowest = lowest.min(rho);
      }
    }

    let count = (n * (n - 1) / 2) as f64;
    Some(CorrelationSummary {
      average: sum / count,
      highest,
      lowest,
    })
  }
}

fn symmetrize(cov: Array2<f64>) -> Array2<f64> {
  let transposed = cov.t().to_owned();
  (cov + transposed) * 0.5
}

/// Ratio of the largest to the smallest eigenvalue.
///
/// `inf` for a singular or indefinite matrix, so a "covariance" with a negative eigenvalue never
/// passes as well-conditioned.
pub fn condition_number(cov: &Array2<f64>) -> f64 {
  let (n, m) = cov.dim();
  if n == 0 || n != m {
    return f64::INFINITY;
  }

  let mat = DMatrix::from_fn(n, n, |i, j| cov[[i, j]]);
  let eigenvalues = SymmetricEigen::new(mat).eigenvalues;
  let l_max = eigenvalues.max();
  let l_min = eigenvalues.min();

  if !(l_min > 0.0) || !l_max.is_finite() {
    f64::INFINITY
  } else {
    l_max / l_min
  }
}

pub(crate) fn corr_from_cov(cov: &Array2<f64>) -> Array2<f64> {
  let n = cov.nrows();
  let sd = cov.diag().mapv(|v| v.max(0.0).sqrt());

  Array2::from_shape_fn((n, n), |(i, j)| {
    let denom = sd[i] * sd[j];
    if i == j {
      1.0
    } else if denom > 1e-15 {
      (cov[[i, j]] / denom).clamp(-1.0, 1.0)
    } else {
      0.0
    }
  })
}

fn correlated_pairs(assets: &[String], corr: &Array2<f64>, flag: f64) -> Vec<CorrelatedPair> {
  let n = assets.len();
  let mut pairs = Vec::new();
  for i in 0..n {
    for j in (i + 1)..n {
      let correlation = corr[[i, j]];
      if correlation > flag {
        pairs.push(CorrelatedPair {
          first: assets[i].clone(),
          second: assets[j].clone(),
          correlation,
        });
      }
    }
  }
  pairs
}

pub(crate) fn sample_mean(xs: ArrayView1<'_, f64>) -> f64 {
  if xs.is_empty() {
    0.0
  } else {
    xs.sum() / xs.len() as f64
  }
}

/// Unbiased (`ddof = 1`) sample covariance of two equally long series.
pub(crate) fn sample_covariance(x: ArrayView1<'_, f64>, y: ArrayView1<'_, f64>) -> f64 {
  let n = x.len().min(y.len());
  if n < 2 {
    return 0.0;
  }

  let mx = sample_mean(x);
  let my = sample_mean(y);
  let cov: f64 = x
    .iter()
    .zip(y.iter())
    .map(|(xi, yi)| (xi - mx) * (yi - my))
    .sum();

  cov / (n - 1) as f64
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use approx::assert_relative_eq;
  use ndarray::array;

  use crate::portfolio::fixtures;
  use super::*;

  #[test]
  fn moments_match_hand_computation() {
    let values = array![[0.01, 0.02], [0.03, -0.01], [-0.02, 0.00], [0.00, 0.03]];
    let sample = fixtures::sample_from(values, &["A", "B"]);

    let stats = AssetStatistics::build(&sample, 4).unwrap();
    assert_abs_diff_eq!(stats.mean_returns()[0], 0.005, epsilon = 1e-15);
    assert_abs_diff_eq!(stats.mean_returns()[1], 0.01, epsilon = 1e-15);

    // var(A) = (0.005^2 + 0.025^2 + 0.025^2 + 0.005^2) / 3
    let var_a = (2.0 * 0.005f64.powi(2) + 2.0 * 0.025f64.powi(2)) / 3.0;
    assert_abs_diff_eq!(stats.covariance()[[0, 0]], var_a, epsilon = 1e-15);

    let cov_ab = (0.005 * 0.01 + 0.025 * -0.02 + -0.025 * -0.01 + -0.005 * 0.02) / 3.0;
    assert_abs_diff_eq!(stats.covariance()[[0, 1]], cov_ab, epsilon = 1e-15);
    assert_abs_diff_eq!(stats.covariance()[[1, 0]], cov_ab, epsilon = 1e-15);
    assert_abs_diff_eq!(stats.std_devs()[0], var_a.sqrt(), epsilon = 1e-15);
    assert_eq!(stats.n_observations(), 4);
  }

  #[test]
  fn rejects_short_samples() {
    let sample = fixtures::correlated_sample(&[0.0005, 0.0003], &[0.01, 0.02], 0.2, 251, 7);
    let err = AssetStatistics::build(&sample, 252).unwrap_err();
    assert!(matches!(
      err,
      PortfolioError::InsufficientData {
        rows: 251,
        required: 252
      }
    ));
  }

  #[test]
  fn correlation_is_unit_diagonal_and_bounded() {
    let sample = fixtures::correlated_sample(
      &[0.0005, 0.0003, 0.0004, 0.0002],
      &[0.01, 0.02, 0.015, 0.008],
      0.4,
      500,
      11,
    );
    let stats = AssetStatistics::build(&sample, 252).unwrap();
    let corr = stats.correlation();

    for i in 0..4 {
      assert_eq!(corr[[i, i]], 1.0);
      for j in 0..4 {
        assert!(corr[[i, j]].abs() <= 1.0);
        assert_eq!(corr[[i, j]], corr[[j, i]]);
      }
    }

    let summary = stats.correlation_summary().unwrap();
    assert!(summary.lowest <= summary.average && summary.average <= summary.highest);
    assert!(summary.average > 0.2 && summary.average < 0.6);
  }

  #[test]
  fn near_duplicate_assets_are_rejected_with_the_pair() {
    let base = fixtures::correlated_sample(&[0.0005, 0.0003], &[0.01, 0.02], 0.1, 300, 3);
    let mut values = Array2::<f64>::zeros((300, 3));
    values.column_mut(0).assign(&base.values().column(0));
    values.column_mut(1).assign(&base.values().column(1));
    values.column_mut(2).assign(&base.values().column(0));
    let sample = fixtures::sample_from(values, &["SPY", "TLT", "VOO"]);

    let err = AssetStatistics::build(&sample, 252).unwrap_err();
    match err {
      PortfolioError::IllConditionedCovariance {
        condition_number,
        pairs,
        ..
      } => {
        assert!(condition_number > 1e10);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].first, "SPY");
        assert_eq!(pairs[0].second, "VOO");
      }
      other => panic!("unexpected error {other:?}"),
    }
  }

  #[test]
  fn perfectly_correlated_pair_is_rejected() {
    let base = fixtures::correlated_sample(&[0.0005], &[0.01], 0.0, 300, 19);
    let column = base.values().column(0);
    let mut values = Array2::<f64>::zeros((300, 2));
    values.column_mut(0).assign(&column);
    values.column_mut(1).assign(&column);
    let sample = fixtures::sample_from(values, &["A", "B"]);

    let err = AssetStatistics::build(&sample, 252).unwrap_err();
    assert_eq!(err.kind(), crate::error::ErrorKind::NumericalConditioning);
  }

  #[test]
  fn constant_asset_is_ill_conditioned_without_pairs() {
    let base = fixtures::correlated_sample(&[0.0005, 0.0003], &[0.01, 0.02], 0.1, 300, 5);
    let mut values = base.values().clone();
    values.column_mut(1).fill(0.0);
    let sample = fixtures::sample_from(values, &["A", "CASH"]);

    let err = AssetStatistics::build(&sample, 252).unwrap_err();
    match &err {
      PortfolioError::IllConditionedCovariance { pairs, .. } => assert!(pairs.is_empty()),
      other => panic!("unexpected error {other:?}"),
    }
    assert!(err.to_string().contains("constant or linearly dependent"));
  }

  #[test]
  fn condition_number_of_diagonal_matrix() {
    let cov = array![[4.0, 0.0], [0.0, 1.0]];
    assert_relative_eq!(condition_number(&cov), 4.0, epsilon = 1e-12);
    assert!(condition_number(&array![[1.0, 1.0], [1.0, 1.0]]) > 1e15);
  }

  #[test]
  fn from_moments_runs_conditioning_check() {
    let assets = vec!["A".to_string(), "B".to_string()];
    let singular = AssetStatistics::from_moments(
      assets.clone(),
      array![0.001, 0.002],
      array![[1e-4, 1e-4], [1e-4, 1e-4]],
      &ConditioningLimits::default(),
    );
    assert!(singular.is_err());

    let stats = AssetStatistics::from_moments(
      assets,
      array![0.001, 0.002],
      array![[1e-4, 2e-5], [2e-5, 4e-4]],
      &ConditioningLimits::default(),
    )
    .unwrap();
    assert_abs_diff_eq!(stats.correlation()[[0, 1]], 0.1, epsilon = 1e-12);
    assert_eq!(stats.return_range(), (0.001, 0.002));
    assert_abs_diff_eq!(stats.annualized_mean_returns(252.0)[1], 0.504, epsilon = 1e-12);
  }

  #[test]
  fn indefinite_covariance_is_rejected() {
    // singular values 3e-4 and 1e-4, eigenvalues 3e-4 and -1e-4
    let cov = array![[1e-4, -2e-4], [-2e-4, 1e-4]];
    assert!(condition_number(&cov).is_infinite());

    let err = AssetStatistics::from_moments(
      fixtures::names(2),
      array![0.001, 0.002],
      cov,
      &ConditioningLimits::default(),
    )
    .unwrap_err();
    assert!(matches!(
      err,
      PortfolioError::IllConditionedCovariance { .. }
    ));
  }

  #[test]
  fn sample_covariance_is_unbiased() {
    let x = array![1.0, 2.0, 3.0, 4.0];
    let y = array![2.0, 4.0, 6.0, 8.0];
    assert_abs_diff_eq!(sample_covariance(x.view(), y.view()), 10.0 / 3.0, epsilon = 1e-12);
    assert_abs_diff_eq!(sample_covariance(x.view(), x.view()), 5.0 / 3.0, epsilon = 1e-12);
  }
}
