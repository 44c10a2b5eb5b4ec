//! # frontier-rs
//!
//! $$
//! \max_{\mathbf{w}} \frac{\mathbf{w}^\top\mu-r_f}{\sqrt{\mathbf{w}^\top\Sigma\mathbf{w}}}
//! \quad \text{s.t.}\quad \mathbf 1^\top\mathbf w=1,\ 0\le w_i\le w_{\max}
//! $$
//!
//! Mean-variance portfolio optimization over a static sample of periodic asset returns:
//! statistics with a conditioning check, portfolio evaluation, long-only capped optimizers,
//! efficient frontier, Capital Market Line and CAPM / Security Market Line analytics.
//!
//! Everything inside the engine works in the per-period unit of the input returns (daily
//! decimals). Annualisation happens only through the explicit `annualized` views.

pub mod config;
pub mod error;
pub mod portfolio;

pub use config::EngineConfig;
pub use config::SolverConfig;
pub use error::CorrelatedPair;
pub use error::ErrorKind;
pub use error::PortfolioError;

/// Result alias of every fallible engine operation.
pub type PortfolioOutcome<T> = Result<T, PortfolioError>;
