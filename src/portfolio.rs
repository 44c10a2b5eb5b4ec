//! # Portfolio
//!
//! $$
//! \sigma_p^2 = \mathbf{w}^\top \Sigma \mathbf{w}
//! $$
//!
//! Mean-variance portfolio optimization, efficient frontier and CAPM analytics.

pub mod cml;
pub mod data;
pub mod engine;
pub mod evaluator;
pub mod frontier;
pub mod optimizers;
pub mod sml;
pub mod solver;
pub mod statistics;
pub mod types;

#[cfg(test)]
pub(crate) mod fixtures;

pub use cml::AnnualizedCapitalMarketLine;
pub use cml::CapitalMarketLine;
pub use data::AlignmentReport;
pub use data::ReturnsSample;
pub use data::log_returns_series;
pub use data::simple_returns_series;
pub use engine::PortfolioAnalysis;
pub use engine::PortfolioEngine;
pub use evaluator::evaluate;
pub use evaluator::sharpe_ratio;
pub use frontier::generate as generate_frontier;
pub use optimizers::ConstrainedOptimizer;
pub use optimizers::for_target_return;
pub use optimizers::max_sharpe;
pub use optimizers::min_variance;
pub use sml::BetaAlphaResult;
pub use sml::SecurityMarketLine;
pub use sml::Valuation;
pub use sml::analyze as analyze_security_market_line;
pub use statistics::AssetStatistics;
pub use statistics::ConditioningLimits;
pub use statistics::CorrelationSummary;
pub use types::AnnualizedMetrics;
pub use types::FrontierPoint;
pub use types::Objective;
pub use types::PortfolioResult;
pub use types::Weights;
