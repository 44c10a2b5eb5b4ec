//! Seeded synthetic return samples shared by the unit tests.

use chrono::Duration;
use chrono::NaiveDate;
use ndarray::Array1;
use ndarray::Array2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::Distribution;
use rand_distr::Normal;

use super::data::ReturnsSample;
use super::statistics::AssetStatistics;
use super::statistics::ConditioningLimits;

pub(crate) fn dates(n: usize) -> Vec<NaiveDate> {
  let start = NaiveDate::from_ymd_opt(2015, 1, 2).unwrap();
  (0..n).map(|i| start + Duration::days(i as i64)).collect()
}

pub(crate) fn names(n: usize) -> Vec<String> {
  (0..n).map(|i| format!("A{i}")).collect()
}

pub(crate) fn sample_from(values: Array2<f64>, assets: &[&str]) -> ReturnsSample {
  let rows = values.nrows();
  let assets = assets.iter().map(|a| a.to_string()).collect();
  ReturnsSample::new(dates(rows), assets, values).unwrap()
}

/// One-factor Gaussian returns: every pair shares correlation `rho` in expectation.
pub(crate) fn correlated_sample(
  means: &[f64],
  vols: &[f64],
  rho: f64,
  rows: usize,
  seed: u64,
) -> ReturnsSample {
  let n = means.len();
  let mut rng = StdRng::seed_from_u64(seed);
  let normal = Normal::new(0.0, 1.0).unwrap();
  let (common, own) = (rho.sqrt(), (1.0 - rho).sqrt());

  let mut values = Array2::<f64>::zeros((rows, n));
  for t in 0..rows {
    let market: f64 = normal.sample(&mut rng);
    for j in 0..n {
      let shock: f64 = normal.sample(&mut rng);
      values[[t, j]] = means[j] + vols[j] * (common * market + own * shock);
    }
  }

  ReturnsSample::new(dates(rows), names(n), values).unwrap()
}

/// Statistics straight from moments with equal volatilities and a constant correlation.
pub(crate) fn constant_correlation_statistics(
  means: &[f64],
  vol: f64,
  rho: f64,
) -> AssetStatistics {
  let n = means.len();
  let cov = Array2::from_shape_fn((n, n), |(i, j)| {
    if i == j {
      vol * vol
    } else {
      rho * vol * vol
    }
  });

  AssetStatistics::from_moments(
    names(n),
    Array1::from(means.to_vec()),
    cov,
    &ConditioningLimits::default(),
  )
  .unwrap()
}

/// A ten-asset universe with distinct means and volatilities, 2520 daily rows.
pub(crate) fn ten_asset_sample(seed: u64) -> ReturnsSample {
  let means: Vec<f64> = (0..10).map(|i| 0.0001 + 0.0001 * i as f64).collect();
  let vols: Vec<f64> = (0..10).map(|i| 0.008 + 0.002 * i as f64).collect();
  correlated_sample(&means, &vols, 0.3, 2520, seed)
}
