//! # Capital Market Line
//!
//! $$
//! \mathbb E[R](\sigma)=r_f+S_M\,\sigma,\qquad S_M=\frac{\mathbb E[R_M]-r_f}{\sigma_M}
//! $$
//!
//! Line through the risk-free asset and the maximum-Sharpe (market) portfolio.

use crate::PortfolioOutcome;
use crate::error::PortfolioError;
use super::evaluator::VOLATILITY_FLOOR;
use super::evaluator::sharpe_ratio;
use super::types::PortfolioResult;

/// Slope magnitude below which the line cannot be inverted.
pub const DEGENERATE_SLOPE: f64 = 1e-10;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CapitalMarketLine {
  risk_free_rate: f64,
  market_return: f64,
  market_volatility: f64,
  market_sharpe: f64,
}

/// Annual view of a [`CapitalMarketLine`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnnualizedCapitalMarketLine {
  pub risk_free_rate: f64,
  pub market_return: f64,
  pub market_volatility: f64,
  pub market_sharpe: f64,
}

impl CapitalMarketLine {
  /// Anchor the line at the daily risk-free rate and the market portfolio.
  ///
  /// The slope is recomputed against `risk_free_rate`; the Sharpe ratio stored on `market` is
  /// not trusted.
  pub fn new(risk_free_rate: f64, market: &PortfolioResult) -> Self {
    Self {
      risk_free_rate,
      market_return: market.daily_return,
      market_volatility: market.daily_volatility,
      market_sharpe: sharpe_ratio(market.daily_return, market.daily_volatility, risk_free_rate),
    }
  }

  pub fn risk_free_rate(&self) -> f64 {
    self.risk_free_rate
  }

  pub fn market_return(&self) -> f64 {
    self.market_return
  }

  pub fn market_volatility(&self) -> f64 {
    self.market_volatility
  }

  /// Slope of the line.
  pub fn market_sharpe(&self) -> f64 {
    self.market_sharpe
  }

  pub fn expected_return(&self, volatility: f64) -> f64 {
    self.risk_free_rate + self.market_sharpe * volatility
  }

  /// Volatility at which the line reaches `target_return`.
  ///
  /// Pure inverse of [`CapitalMarketLine::expected_return`]: a target below the risk-free
  /// rate on a rising line yields a negative volatility, which callers must interpret.
  pub fn required_volatility(&self, target_return: f64) -> PortfolioOutcome<f64> {
    if self.market_sharpe.abs() < DEGENERATE_SLOPE {
      return Err(PortfolioError::DegenerateCapitalMarketLine {
        sharpe: self.market_sharpe,
      });
    }
    Ok((target_return - self.risk_free_rate) / self.market_sharpe)
  }

  /// `(volatility, expected_return)` pairs along the line.
  pub fn points(&self, volatilities: &[f64]) -> Vec<(f64, f64)> {
    volatilities
      .iter()
      .map(|&v| (v, self.expected_return(v)))
      .collect()
  }

  /// Fraction of wealth in the market portfolio needed to reach `target_return`.
  pub fn market_allocation(&self, target_return: f64) -> PortfolioOutcome<f64> {
    if self.market_volatility < VOLATILITY_FLOOR {
      return Err(PortfolioError::DegenerateCapitalMarketLine {
        sharpe: self.market_sharpe,
      });
    }
    Ok(self.required_volatility(target_return)? / self.market_volatility)
  }

  pub fn annualized(&self, periods_per_year: f64) -> AnnualizedCapitalMarketLine {
    let root = periods_per_year.sqrt();
    AnnualizedCapitalMarketLine {
      risk_free_rate: self.risk_free_rate * periods_per_year,
      market_return: self.market_return * periods_per_year,
      market_volatility: self.market_volatility * root,
      market_sharpe: self.market_sharpe * root,
    }
  }
}
