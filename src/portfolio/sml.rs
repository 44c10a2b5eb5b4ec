//! # Security Market Line
//!
//! $$
//! \beta_i=\frac{\operatorname{Cov}(r_i,r_M)}{\operatorname{Var}(r_M)},\qquad
//! \mathbb E[r_i]^{\text{CAPM}}=r_f+\beta_i(\bar r_M-r_f),\qquad
//! \alpha_i=\bar r_i-\mathbb E[r_i]^{\text{CAPM}}
//! $$
//!
//! CAPM beta, required return, alpha and valuation of each asset against a market proxy.

use std::fmt;

use impl_new_derive::ImplNew;
use ndarray::ArrayView1;
use tracing::debug;

use crate::PortfolioOutcome;
use crate::error::PortfolioError;
use super::data::ReturnsSample;
use super::statistics::sample_covariance;
use super::statistics::sample_mean;

/// Market variance below which beta is reported as zero.
pub const MARKET_VARIANCE_FLOOR: f64 = 1e-10;

/// Sign of an asset's alpha.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Valuation {
  /// Positive alpha: the asset earned more than CAPM requires.
  Undervalued,
  /// Negative alpha.
  Overvalued,
  /// Alpha exactly zero.
  FairlyValued,
}

impl Valuation {
  pub fn from_alpha(alpha: f64) -> Self {
    if alpha > 0.0 {
      Valuation::Undervalued
    } else if alpha < 0.0 {
      Valuation::Overvalued
    } else {
      Valuation::FairlyValued
    }
  }
}

impl fmt::Display for Valuation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Valuation::Undervalued => write!(f, "undervalued"),
      Valuation::Overvalued => write!(f, "overvalued"),
      Valuation::FairlyValued => write!(f, "fairly valued"),
    }
  }
}

/// CAPM analytics of one asset, in per-period units.
#[derive(Clone, Debug, PartialEq)]
pub struct BetaAlphaResult {
  pub asset: String,
  pub beta: f64,
  /// Sample mean of the asset's returns.
  pub mean_return: f64,
  /// `rf + beta * (mean_market - rf)`.
  pub capm_return: f64,
  /// `mean_return - capm_return`.
  pub alpha: f64,
  pub valuation: Valuation,
}

/// CAPM line of a market proxy.
#[derive(ImplNew, Clone, Debug, PartialEq)]
pub struct SecurityMarketLine {
  /// Daily risk-free rate
  pub risk_free_rate: f64,
  /// Mean market proxy return
  pub market_return: f64,
  /// Sample standard deviation of the market proxy
  pub market_volatility: f64,
}

impl SecurityMarketLine {
  pub fn from_market_returns(market: &[f64], risk_free_rate: f64) -> PortfolioOutcome<Self> {
    if market.len() < 2 {
      return Err(PortfolioError::InsufficientData {
        rows: market.len(),
        required: 2,
      });
    }
    if !risk_free_rate.is_finite() {
      return Err(PortfolioError::invalid_input(
        "risk_free_rate",
        format!("must be finite, got {risk_free_rate}"),
      ));
    }
    ensure_finite("market", market)?;
    let market = ArrayView1::from(market);
    Ok(Self::new(
      risk_free_rate,
      sample_mean(market),
      sample_covariance(market, market).max(0.0).sqrt(),
    ))
  }

  pub fn market_risk_premium(&self) -> f64 {
    self.market_return - self.risk_free_rate
  }

  pub fn required_return(&self, beta: f64) -> f64 {
    self.risk_free_rate + beta * self.market_risk_premium()
  }

  /// Excess of a realised mean return over what CAPM requires for `beta`.
  pub fn alpha(&self, mean_return: f64, beta: f64) -> f64 {
    mean_return - self.required_return(beta)
  }

  /// `(beta, required_return)` pairs along the line.
  pub fn points(&self, betas: &[f64]) -> Vec<(f64, f64)> {
    betas
      .iter()
      .map(|&b| (b, self.required_return(b)))
      .collect()
  }

  pub fn assess(
    &self,
    asset: &str,
    asset_returns: ArrayView1<'_, f64>,
    market: ArrayView1<'_, f64>,
  ) -> BetaAlphaResult {
    let beta = beta(asset_returns, market);
    let mean_return = sample_mean(asset_returns);
    let capm_return = self.required_return(beta);
    let alpha = self.alpha(mean_return, beta);

    BetaAlphaResult {
      asset: asset.to_string(),
      beta,
      mean_return,
      capm_return,
      alpha,
      valuation: Valuation::from_alpha(alpha),
    }
  }
}

/// Sample-covariance beta; zero when the market variance is under [`MARKET_VARIANCE_FLOOR`].
pub fn beta(asset: ArrayView1<'_, f64>, market: ArrayView1<'_, f64>) -> f64 {
  let market_variance = sample_covariance(market, market);
  if market_variance < MARKET_VARIANCE_FLOOR {
    debug!(market_variance, "market variance below floor, beta reported as zero");
    return 0.0;
  }
  sample_covariance(asset, market) / market_variance
}

/// Beta and alpha of every named series against `market`.
///
/// Every series must have exactly as many observations as the market proxy.
pub fn analyze(
  assets: &[(String, Vec<f64>)],
  market: &[f64],
  risk_free_rate: f64,
) -> PortfolioOutcome<Vec<BetaAlphaResult>> {
  for (name, series) in assets {
    if series.len() != market.len() {
      return Err(PortfolioError::MisalignedSeries {
        series: name.clone(),
        expected: market.len(),
        actual: series.len(),
      });
    }
    ensure_finite(name, series)?;
  }

  let line = SecurityMarketLine::from_market_returns(market, risk_free_rate)?;
  let market = ArrayView1::from(market);
  Ok(
    assets
      .iter()
      .map(|(name, series)| line.assess(name, ArrayView1::from(series.as_slice()), market))
      .collect(),
  )
}

fn ensure_finite(series: &str, values: &[f64]) -> PortfolioOutcome<()> {
  match values.iter().position(|v| !v.is_finite()) {
    Some(i) => Err(PortfolioError::invalid_input(
      format!("{series}[{i}]"),
      format!("non-finite return {}", values[i]),
    )),
    None => Ok(()),
  }
}

/// [`analyze`] over every column of an aligned sample.
pub fn analyze_sample(
  sample: &ReturnsSample,
  market: &[f64],
  risk_free_rate: f64,
) -> PortfolioOutcome<Vec<BetaAlphaResult>> {
  if sample.n_rows() != market.len() {
    return Err(PortfolioError::MisalignedSeries {
      series: "market".to_string(),
      expected: sample.n_rows(),
      actual: market.len(),
    });
  }

  let line = SecurityMarketLine::from_market_returns(market, risk_free_rate)?;
  let market = ArrayView1::from(market);
  Ok(
    sample
      .assets()
      .iter()
      .enumerate()
      .map(|(j, name)| line.assess(name, sample.values().column(j), market))
      .collect(),
  )
}
