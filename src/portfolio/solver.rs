//! # Projected Gradient Solver
//!
//! $$
//! \mathcal C=\{\mathbf w:\ \mathbf 1^\top\mathbf w=1,\ 0\le w_i\le u\},\qquad
//! \mathbf w_{k+1}=\mathbf w_k+\alpha_k\big(P_{\mathcal C}(\mathbf w_k-\lambda_k\nabla f(\mathbf w_k))-\mathbf w_k\big)
//! $$
//!
//! Spectral projected gradient (Birgin, Martinez and Raydan) over the capped simplex, with a
//! Barzilai-Borwein step and a nonmonotone Armijo line search, run as an argmin [`Solver`]
//! through an [`Executor`]. Objectives are argmin [`CostFunction`] + [`Gradient`] problems.

use std::collections::VecDeque;

use anyhow::anyhow;
use argmin::core::CostFunction;
use argmin::core::Error;
use argmin::core::Executor;
use argmin::core::Gradient;
use argmin::core::IterState;
use argmin::core::KV;
use argmin::core::Problem;
use argmin::core::Solver;
use argmin::core::State;
use argmin::core::TerminationReason;
use argmin::core::TerminationStatus;
use tracing::trace;

use crate::PortfolioOutcome;
use crate::config::validate_max_position;
use crate::error::PortfolioError;

const LAMBDA_MIN: f64 = 1e-10;
const LAMBDA_MAX: f64 = 1e10;
/// Armijo sufficient-decrease constant.
const GAMMA: f64 = 1e-4;
/// Number of past objective values in the nonmonotone reference.
const MEMORY: usize = 10;
const MAX_BACKTRACKS: usize = 60;
const MAX_BISECTIONS: usize = 200;
/// A run that can no longer descend is accepted when its stationarity is within this multiple
/// of the tolerance.
const STALL_FACTOR: f64 = 1e3;

type SpgState = IterState<Vec<f64>, Vec<f64>, (), (), (), f64>;

/// Feasible set `{w : sum(w) = 1, 0 <= w_i <= upper}`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CappedSimplex {
  n: usize,
  upper: f64,
}

impl CappedSimplex {
  /// Fails with [`PortfolioError::InfeasibleBounds`] when `n * upper < 1`.
  pub fn new(n: usize, upper: f64) -> PortfolioOutcome<Self> {
    if n == 0 {
      return Err(PortfolioError::invalid_input(
        "assets",
        "at least one asset is required",
      ));
    }
    validate_max_position(upper)?;
    if (n as f64) * upper < 1.0 - 1e-12 {
      return Err(PortfolioError::InfeasibleBounds {
        n_assets: n,
        max_position: upper,
      });
    }
    Ok(Self { n, upper })
  }

  pub fn dim(&self) -> usize {
    self.n
  }

  pub fn upper(&self) -> f64 {
    self.upper
  }

  /// Euclidean projection: `w_i = clip(v_i - tau, 0, upper)` with `tau` found by bisection.
  pub fn project(&self, v: &[f64]) -> Vec<f64> {
    let u = self.upper;
    let filled = |tau: f64| -> f64 { v.iter().map(|&vi| (vi - tau).clamp(0.0, u)).sum() };

    let v_min = v.iter().copied().fold(f64::INFINITY, f64::min);
    let v_max = v.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    // filled(lo) = n * u >= 1, filled(hi) = 0
    let mut lo = v_min - u;
    let mut hi = v_max;
    for _ in 0..MAX_BISECTIONS {
      let mid = 0.5 * (lo + hi);
      if mid <= lo || mid >= hi {
        break;
      }
      if filled(mid) > 1.0 {
        lo = mid;
      } else {
        hi = mid;
      }
    }

    let tau = 0.5 * (lo + hi);
    v.iter().map(|&vi| (vi - tau).clamp(0.0, u)).collect()
  }

  /// Infinity norm of `P(w - g) - w`, zero exactly at a stationary point.
  pub fn stationarity(&self, w: &[f64], g: &[f64]) -> f64 {
    let step: Vec<f64> = w.iter().zip(g).map(|(wi, gi)| wi - gi).collect();
    self
      .project(&step)
      .iter()
      .zip(w)
      .map(|(pi, wi)| (pi - wi).abs())
      .fold(0.0, f64::max)
  }
}

#[derive(Clone, Copy, Debug)]
pub struct SpgOptions {
  pub max_iters: u64,
  /// Stationarity tolerance, relative to `max(1, |g0|_inf)`.
  pub tolerance: f64,
}

/// Final state of a solver run.
#[derive(Clone, Debug)]
pub struct SolverReport {
  pub param: Vec<f64>,
  pub cost: f64,
  pub iterations: u64,
  pub stationarity: f64,
  pub converged: bool,
  /// Termination reason.
  pub message: String,
}

/// Spectral projected gradient over a [`CappedSimplex`].
#[derive(Clone, Debug)]
pub struct SpgSolver {
  feasible: CappedSimplex,
  tolerance: f64,
  /// Absolute tolerance fixed at `init` from the starting gradient.
  threshold: f64,
  lambda: f64,
  history: VecDeque<f64>,
  stationarity: f64,
  stalled: bool,
}

impl SpgSolver {
  pub fn new(feasible: CappedSimplex, tolerance: f64) -> Self {
    Self {
      feasible,
      tolerance,
      threshold: tolerance,
      lambda: 1.0,
      history: VecDeque::with_capacity(MEMORY),
      stationarity: f64::NAN,
      stalled: false,
    }
  }

  /// Stationarity of the current iterate.
  pub fn stationarity(&self) -> f64 {
    self.stationarity
  }

  /// Exit of a step that cannot decrease the objective any further.
  fn stall(&mut self, reason: String) -> TerminationReason {
    if self.stationarity <= STALL_FACTOR * self.threshold {
      self.stalled = true;
      TerminationReason::SolverConverged
    } else {
      TerminationReason::SolverExit(reason)
    }
  }
}

impl<O> Solver<O, SpgState> for SpgSolver
where
  O: CostFunction<Param = Vec<f64>, Output = f64> + Gradient<Param = Vec<f64>, Gradient = Vec<f64>>,
{
  const NAME: &'static str = "Spectral projected gradient";

  fn init(
    &mut self,
    problem: &mut Problem<O>,
    mut state: SpgState,
  ) -> Result<(SpgState, Option<KV>), Error> {
    let x0 = state
      .take_param()
      .ok_or_else(|| anyhow!("spectral projected gradient needs initial weights"))?;
    let x = self.feasible.project(&x0);
    let f = problem.cost(&x)?;
    let g = problem.gradient(&x)?;

    if !f.is_finite() || g.iter().any(|gi| !gi.is_finite()) {
      let reason = TerminationReason::SolverExit("non-finite objective at start".into());
      return Ok((state.param(x).cost(f).terminate_with(reason), None));
    }

    let g_scale = g.iter().fold(1.0_f64, |m, gi| m.max(gi.abs()));
    self.threshold = self.tolerance * g_scale;
    self.stationarity = self.feasible.stationarity(&x, &g);
    self.lambda = if self.stationarity > 0.0 {
      (1.0 / self.stationarity).clamp(LAMBDA_MIN, LAMBDA_MAX)
    } else {
      1.0
    };
    self.history.clear();
    self.history.push_back(f);
    self.stalled = false;

    Ok((state.param(x).cost(f).gradient(g), None))
  }

  fn next_iter(
    &mut self,
    problem: &mut Problem<O>,
    mut state: SpgState,
  ) -> Result<(SpgState, Option<KV>), Error> {
    let x = state
      .take_param()
      .ok_or_else(|| anyhow!("spectral projected gradient lost its iterate"))?;
    let g = state
      .take_gradient()
      .ok_or_else(|| anyhow!("spectral projected gradient lost its gradient"))?;
    let f = state.get_cost();
    let pg = self.stationarity;

    let step: Vec<f64> = x.iter().zip(&g).map(|(xi, gi)| xi - self.lambda * gi).collect();
    let d: Vec<f64> = self
      .feasible
      .project(&step)
      .iter()
      .zip(&x)
      .map(|(pi, xi)| pi - xi)
      .collect();
    // d sums to zero, so the budget component of g only adds round-off
    let g_mean = g.iter().sum::<f64>() / g.len() as f64;
    let gtd: f64 = g.iter().zip(&d).map(|(gi, di)| (gi - g_mean) * di).sum();
    if !(gtd < 0.0) {
      let reason = self.stall(format!(
        "no descent direction (g'd = {gtd:.3e}, stationarity {pg:.3e})"
      ));
      return Ok((state.param(x).cost(f).gradient(g).terminate_with(reason), None));
    }

    let f_ref = self.history.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut alpha = 1.0;
    let mut accepted = None;
    for _ in 0..MAX_BACKTRACKS {
      let trial: Vec<f64> = x.iter().zip(&d).map(|(xi, di)| xi + alpha * di).collect();
      let f_trial = problem.cost(&trial)?;
      if f_trial <= f_ref + GAMMA * alpha * gtd {
        accepted = Some((trial, f_trial));
        break;
      }

      // safeguarded quadratic interpolation
      let denom = f_trial - f - alpha * gtd;
      let candidate = if denom > 0.0 {
        -0.5 * alpha * alpha * gtd / denom
      } else {
        f64::NAN
      };
      alpha = if candidate >= 0.1 * alpha && candidate <= 0.9 * alpha {
        candidate
      } else {
        0.5 * alpha
      };
    }

    let Some((x_new, f_new)) = accepted else {
      let reason = self.stall(format!("line search failed (stationarity {pg:.3e})"));
      return Ok((state.param(x).cost(f).gradient(g).terminate_with(reason), None));
    };

    let g_new = problem.gradient(&x_new)?;
    if g_new.iter().any(|gi| !gi.is_finite()) {
      let reason = TerminationReason::SolverExit("non-finite gradient".into());
      return Ok((state.param(x).cost(f).gradient(g).terminate_with(reason), None));
    }

    let s: Vec<f64> = x_new.iter().zip(&x).map(|(a, b)| a - b).collect();
    let y: Vec<f64> = g_new.iter().zip(&g).map(|(a, b)| a - b).collect();
    let sty = dot(&s, &y);
    self.lambda = if sty > 0.0 {
      (dot(&s, &s) / sty).clamp(LAMBDA_MIN, LAMBDA_MAX)
    } else {
      LAMBDA_MAX
    };

    if self.history.len() == MEMORY {
      self.history.pop_front();
    }
    self.history.push_back(f_new);
    self.stationarity = self.feasible.stationarity(&x_new, &g_new);

    trace!(
      iteration = state.get_iter(),
      cost = f_new,
      stationarity = self.stationarity,
      lambda = self.lambda,
      "spg step"
    );
    Ok((state.param(x_new).cost(f_new).gradient(g_new), None))
  }

  fn terminate(&mut self, _state: &SpgState) -> TerminationStatus {
    if self.stationarity <= self.threshold {
      TerminationStatus::Terminated(TerminationReason::SolverConverged)
    } else {
      TerminationStatus::NotTerminated
    }
  }
}

/// Minimise `problem` over `feasible`, starting from the projection of `x0`.
///
/// Errors raised by the problem itself are returned as [`PortfolioError::Evaluation`]; a
/// run that stops without meeting the tolerance comes back with `converged == false`.
pub fn minimize<P>(
  problem: P,
  feasible: &CappedSimplex,
  x0: &[f64],
  options: &SpgOptions,
) -> PortfolioOutcome<SolverReport>
where
  P: CostFunction<Param = Vec<f64>, Output = f64> + Gradient<Param = Vec<f64>, Gradient = Vec<f64>>,
{
  let solver = SpgSolver::new(*feasible, options.tolerance);
  let x_init = x0.to_vec();
  let result = Executor::new(problem, solver)
    .configure(|state| state.param(x_init).max_iters(options.max_iters))
    .ctrlc(false)
    .timer(false)
    .run()?;

  let solver = result.solver;
  let mut state = result.state;
  let iterations = state.get_iter();
  let cost = state.get_cost();
  let reason = state.get_termination_reason().cloned().unwrap_or_default();
  let param = state
    .take_param()
    .ok_or_else(|| anyhow!("spectral projected gradient returned no weights"))?;
  let pg = solver.stationarity();

  let (converged, message) = match reason {
    TerminationReason::SolverConverged if solver.stalled => (
      true,
      format!("stalled at round-off with stationarity {pg:.3e}"),
    ),
    TerminationReason::SolverConverged => (true, "projected gradient below tolerance".into()),
    TerminationReason::MaxItersReached => (
      false,
      format!(
        "iteration limit {} reached with stationarity {pg:.3e} > {:.1e}",
        options.max_iters, solver.threshold
      ),
    ),
    other => (false, other.to_string()),
  };

  Ok(SolverReport {
    param,
    cost,
    iterations,
    stationarity: pg,
    converged,
    message,
  })
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
  a.iter().zip(b).map(|(x, y)| x * y).sum()
}
