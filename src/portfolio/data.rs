//! # Portfolio Data Utilities
//!
//! $$
//! r_t = \frac{P_t}{P_{t-1}} - 1
//! $$
//!
//! Dated, gap-free return samples and the helpers that build them from raw price or
//! return columns. Rows with any missing cell are removed explicitly and the reduction is
//! reported, never applied silently.

use std::collections::HashSet;

use chrono::NaiveDate;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::Axis;
use ndarray::s;
use tracing::warn;

use crate::PortfolioOutcome;
use crate::error::PortfolioError;

/// Row-count bookkeeping of [`ReturnsSample::align`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AlignmentReport {
  /// Rows offered before alignment.
  pub rows_in: usize,
  /// Rows removed because at least one asset had no value.
  pub rows_dropped: usize,
  /// Rows kept in the sample.
  pub rows_out: usize,
}

/// Periodic returns of several assets on a shared date index.
///
/// Rows are periods in ascending date order, columns are assets. Every cell is a finite
/// decimal return.
#[derive(Clone, Debug)]
pub struct ReturnsSample {
  dates: Vec<NaiveDate>,
  assets: Vec<String>,
  values: Array2<f64>,
}

impl ReturnsSample {
  /// Build a sample from an already aligned `rows x assets` matrix.
  pub fn new(
    dates: Vec<NaiveDate>,
    assets: Vec<String>,
    values: Array2<f64>,
  ) -> PortfolioOutcome<Self> {
    validate_assets(&assets)?;

    if values.ncols() != assets.len() {
      return Err(PortfolioError::invalid_input(
        "values",
        format!(
          "{} columns for {} assets",
          values.ncols(),
          assets.len()
        ),
      ));
    }

    if values.nrows() != dates.len() {
      return Err(PortfolioError::MisalignedSeries {
        series: "dates".to_string(),
        expected: values.nrows(),
        actual: dates.len(),
      });
    }

    validate_dates(&dates)?;

    for (row, cells) in values.axis_iter(Axis(0)).enumerate() {
      if let Some(col) = cells.iter().position(|v| !v.is_finite()) {
        return Err(PortfolioError::invalid_input(
          format!("values[{row}][{}]", assets[col]),
          "missing or non-finite return; use ReturnsSample::align for gappy data",
        ));
      }
    }

    Ok(Self {
      dates,
      assets,
      values,
    })
  }

  /// Align per-asset return columns on a shared date index, dropping incomplete rows.
  ///
  /// `columns[j][t]` is the return of asset `j` on `dates[t]`; `None` or a non-finite value
  /// marks a gap.
  pub fn align(
    dates: Vec<NaiveDate>,
    assets: Vec<String>,
    columns: Vec<Vec<Option<f64>>>,
  ) -> PortfolioOutcome<(Self, AlignmentReport)> {
    validate_assets(&assets)?;

    if columns.len() != assets.len() {
      return Err(PortfolioError::invalid_input(
        "columns",
        format!("{} columns for {} assets", columns.len(), assets.len()),
      ));
    }

    for (asset, column) in assets.iter().zip(columns.iter()) {
      if column.len() != dates.len() {
        return Err(PortfolioError::MisalignedSeries {
          series: asset.clone(),
          expected: dates.len(),
          actual: column.len(),
        });
      }
    }

    validate_dates(&dates)?;

    let keep: Vec<usize> = (0..dates.len())
      .filter(|&t| {
        columns
          .iter()
          .all(|column| column[t].is_some_and(f64::is_finite))
      })
      .collect();

    let report = AlignmentReport {
      rows_in: dates.len(),
      rows_dropped: dates.len() - keep.len(),
      rows_out: keep.len(),
    };

    if report.rows_dropped > 0 {
      warn!(
        rows_in = report.rows_in,
        rows_dropped = report.rows_dropped,
        rows_out = report.rows_out,
        "dropped return rows with missing values during alignment"
      );
    }

    let n = assets.len();
    let mut values = Array2::<f64>::zeros((keep.len(), n));
    for (row, &t) in keep.iter().enumerate() {
      for (j, column) in columns.iter().enumerate() {
        values[[row, j]] = column[t].unwrap_or(f64::NAN);
      }
    }

    let dates = keep.iter().map(|&t| dates[t]).collect();
    let sample = Self::new(dates, assets, values)?;
    Ok((sample, report))
  }

  /// Convert per-asset close prices to simple returns and align them.
  ///
  /// The first price row only seeds the first return, so the sample is indexed by
  /// `dates[1..]`. A return is a gap when either of its two prices is missing or
  /// non-positive.
  pub fn from_prices(
    dates: Vec<NaiveDate>,
    assets: Vec<String>,
    prices: Vec<Vec<Option<f64>>>,
  ) -> PortfolioOutcome<(Self, AlignmentReport)> {
    if dates.len() < 2 {
      return Err(PortfolioError::InsufficientData {
        rows: dates.len(),
        required: 2,
      });
    }

    for (asset, column) in assets.iter().zip(prices.iter()) {
      if column.len() != dates.len() {
        return Err(PortfolioError::MisalignedSeries {
          series: asset.clone(),
          expected: dates.len(),
          actual: column.len(),
        });
      }
    }

    let columns = prices
      .iter()
      .map(|column| simple_returns_series(column))
      .collect();

    Self::align(dates[1..].to_vec(), assets, columns)
  }

  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  /// `rows x assets` return matrix.
  pub fn values(&self) -> &Array2<f64> {
    &self.values
  }

  pub fn n_rows(&self) -> usize {
    self.values.nrows()
  }

  pub fn n_assets(&self) -> usize {
    self.values.ncols()
  }

  pub fn asset_index(&self, asset: &str) -> Option<usize> {
    self.assets.iter().position(|a| a == asset)
  }

  pub fn column(&self, asset: &str) -> Option<ArrayView1<'_, f64>> {
    self
      .asset_index(asset)
      .map(|j| self.values.column(j))
  }

  pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
    Some((*self.dates.first()?, *self.dates.last()?))
  }

  /// Most recent `n` rows (all rows if the sample is shorter).
  pub fn tail(&self, n: usize) -> Self {
    let start = self.n_rows().saturating_sub(n);
    Self {
      dates: self.dates[start..].to_vec(),
      assets: self.assets.clone(),
      values: self.values.slice(s![start.., ..]).to_owned(),
    }
  }
}

fn validate_assets(assets: &[String]) -> PortfolioOutcome<()> {
  if assets.is_empty() {
    return Err(PortfolioError::invalid_input(
      "assets",
      "at least one asset is required",
    ));
  }

  let mut seen = HashSet::with_capacity(assets.len());
  for asset in assets {
    if !seen.insert(asset.as_str()) {
      return Err(PortfolioError::invalid_input(
        "assets",
        format!("duplicate asset name `{asset}`"),
      ));
    }
  }

  Ok(())
}

fn validate_dates(dates: &[NaiveDate]) -> PortfolioOutcome<()> {
  if let Some(w) = dates.windows(2).find(|w| w[1] <= w[0]) {
    return Err(PortfolioError::invalid_input(
      "dates",
      format!("dates must be strictly increasing ({} then {})", w[0], w[1]),
    ));
  }
  Ok(())
}

/// Simple returns of a close-price series; `None` where a price is missing or non-positive.
pub fn simple_returns_series(closes: &[Option<f64>]) -> Vec<Option<f64>> {
  closes
    .windows(2)
    .map(|w| match (w[0], w[1]) {
      (Some(prev), Some(cur)) if prev > 0.0 && cur > 0.0 => Some(cur / prev - 1.0),
      _ => None,
    })
    .collect()
}

/// Log returns of a close-price series; `None` where a price is missing or non-positive.
pub fn log_returns_series(closes: &[Option<f64>]) -> Vec<Option<f64>> {
  closes
    .windows(2)
    .map(|w| match (w[0], w[1]) {
      (Some(prev), Some(cur)) if prev > 0.0 && cur > 0.0 => Some((cur / prev).ln()),
      _ => None,
    })
    .collect()
}
