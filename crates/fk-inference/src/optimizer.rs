//! Bounded L-BFGS minimization on top of `argmin`.
//!
//! Bounds are handled by clamping every trial point into the box and projecting the
//! gradient at active bounds.

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use fk_core::traits::central_difference_gradient;
use fk_core::{Error, LogDensityModel, Result};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Configuration for the bounded L-BFGS optimizer
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Maximum number of iterations
    pub max_iter: u64,
    /// Convergence tolerance on the gradient norm
    pub tol: f64,
    /// Number of stored corrections (L-BFGS memory)
    pub m: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: 1000, tol: 1e-6, m: 10 }
    }
}

/// Result of optimization
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Best parameters found (inside the bounds)
    pub parameters: Vec<f64>,
    /// Objective value at `parameters`
    pub fval: f64,
    /// Number of iterations
    pub n_iter: u64,
    /// Number of objective evaluations.
    pub n_fev: usize,
    /// Number of gradient evaluations.
    pub n_gev: usize,
    /// Whether a convergence criterion was met (as opposed to the iteration limit)
    pub converged: bool,
    /// Termination message
    pub message: String,
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizationResult(fval={:.6}, n_iter={}, n_fev={}, n_gev={}, converged={})",
            self.fval, self.n_iter, self.n_fev, self.n_gev, self.converged
        )
    }
}

/// Objective function for optimization
pub trait ObjectiveFunction: Send + Sync {
    /// Evaluate function at given parameters
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Gradient at given parameters (central differences if not overridden)
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        central_difference_gradient(params, |p| self.eval(p))
    }
}

/// Any [`LogDensityModel`] as an objective: its NLL and gradient.
pub struct ModelObjective<'a, M: LogDensityModel + ?Sized>(pub &'a M);

impl<M: LogDensityModel + ?Sized> ObjectiveFunction for ModelObjective<'_, M> {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        self.0.nll(params)
    }

    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        self.0.grad_nll(params)
    }
}

/// Wrapper to make ObjectiveFunction compatible with argmin.
///
/// The solver works in scaled coordinates `u = x / scale`, so parameters of very
/// different magnitude (yields in the thousands next to slopes of 0.01) get comparable
/// curvature.
struct ArgminProblem<'a> {
    objective: &'a dyn ObjectiveFunction,
    bounds: &'a [(f64, f64)],
    scales: &'a [f64],
    counts: Arc<FuncCounts>,
    guard: Mutex<DomainGuard>,
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds.iter()).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

#[derive(Default)]
struct FuncCounts {
    cost: AtomicUsize,
    grad: AtomicUsize,
    rejected: AtomicUsize,
}

/// Values seen at points where the objective could be evaluated.
///
/// Trial points outside the objective's domain (a computation error or a non-finite
/// value) get a cost above every cost seen so far and the last good gradient, so the
/// line search shrinks the step instead of aborting.
#[derive(Default)]
struct DomainGuard {
    max_cost: Option<f64>,
    last_grad: Option<Vec<f64>>,
}

impl DomainGuard {
    fn penalty(&self) -> Option<f64> {
        self.max_cost.map(|f| f + 1.0 + f.abs())
    }
}

/// Errors a trial point may raise without ending the run.
fn is_domain_error(e: &Error) -> bool {
    matches!(e, Error::Computation(_))
}

impl ArgminProblem<'_> {
    fn to_external(&self, u: &[f64]) -> Vec<f64> {
        let x: Vec<f64> = u.iter().zip(self.scales).map(|(&ui, &s)| ui * s).collect();
        clamp_params(&x, self.bounds)
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, DomainGuard> {
        self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CostFunction for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.counts.cost.fetch_add(1, Ordering::Relaxed);
        let x = self.to_external(params);
        let outcome = self.objective.eval(&x);
        let mut guard = self.guard();
        match outcome {
            Ok(f) if f.is_finite() => {
                guard.max_cost = Some(guard.max_cost.map_or(f, |m| m.max(f)));
                Ok(f)
            }
            Ok(f) => guard.penalty().map(|p| self.reject(p)).ok_or_else(|| {
                argmin::core::Error::msg(format!("objective is {f} at the starting point"))
            }),
            Err(e) if is_domain_error(&e) => guard
                .penalty()
                .map(|p| self.reject(p))
                .ok_or_else(|| argmin::core::Error::msg(e.to_string())),
            Err(e) => Err(argmin::core::Error::msg(e.to_string())),
        }
    }
}

impl ArgminProblem<'_> {
    fn reject(&self, penalty: f64) -> f64 {
        self.counts.rejected.fetch_add(1, Ordering::Relaxed);
        penalty
    }
}

impl Gradient for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(
        &self,
        params: &Self::Param,
    ) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        self.counts.grad.fetch_add(1, Ordering::Relaxed);
        let x = self.to_external(params);
        let outcome = self.objective.gradient(&x);
        let mut guard = self.guard();
        let mut g = match outcome {
            Ok(g) if g.iter().all(|v| v.is_finite()) => g,
            Ok(_) => {
                return guard
                    .last_grad
                    .clone()
                    .ok_or_else(|| argmin::core::Error::msg("non-finite gradient at the starting point"));
            }
            Err(e) if is_domain_error(&e) => {
                return guard.last_grad.clone().ok_or_else(|| argmin::core::Error::msg(e.to_string()));
            }
            Err(e) => return Err(argmin::core::Error::msg(e.to_string())),
        };

        // Zero components that point out of the box at an active bound; the clamped
        // objective is flat there.
        const EPS: f64 = 1e-12;
        for (i, (&xi, &(lo, hi))) in x.iter().zip(self.bounds.iter()).enumerate() {
            if xi <= lo + EPS && g[i] > 0.0 {
                g[i] = 0.0;
            }
            if xi >= hi - EPS && g[i] < 0.0 {
                g[i] = 0.0;
            }
            g[i] *= self.scales[i];
        }

        guard.last_grad = Some(g.clone());
        Ok(g)
    }
}

/// L-BFGS optimizer with box constraints
pub struct LbfgsbOptimizer {
    config: OptimizerConfig,
}

impl LbfgsbOptimizer {
    /// Create a new optimizer with the given configuration
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Minimize objective function with bounds
    ///
    /// # Arguments
    /// * `objective` - Objective function to minimize
    /// * `init_params` - Initial parameter values
    /// * `bounds` - Parameter bounds as (lower, upper) for each parameter
    ///
    /// # Returns
    /// Optimization result with best-fit parameters
    pub fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init_params: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        let scales = vec![1.0; init_params.len()];
        self.minimize_scaled(objective, init_params, bounds, &scales)
    }

    /// Like [`minimize`](Self::minimize), with the solver stepping in units of
    /// `scales[i]` along parameter `i` (typically the expected uncertainty).
    ///
    /// The gradient-norm tolerance applies to the scaled gradient `gᵢ · scaleᵢ`.
    pub fn minimize_scaled(
        &self,
        objective: &dyn ObjectiveFunction,
        init_params: &[f64],
        bounds: &[(f64, f64)],
        scales: &[f64],
    ) -> Result<OptimizationResult> {
        if init_params.len() != bounds.len() || scales.len() != bounds.len() {
            return Err(Error::Validation(format!(
                "Parameter, bounds and scales length mismatch: {} / {} / {}",
                init_params.len(),
                bounds.len(),
                scales.len()
            )));
        }
        if let Some(s) = scales.iter().find(|s| !(s.is_finite() && **s > 0.0)) {
            return Err(Error::Validation(format!("parameter scales must be finite and > 0, got {s}")));
        }

        let init_scaled: Vec<f64> =
            clamp_params(init_params, bounds).iter().zip(scales).map(|(&x, &s)| x / s).collect();

        let counts = Arc::new(FuncCounts::default());

        // Create argmin problem
        let problem = ArgminProblem {
            objective,
            bounds,
            scales,
            counts: counts.clone(),
            guard: Mutex::new(DomainGuard::default()),
        };

        // Create L-BFGS solver with line search
        let linesearch = MoreThuenteLineSearch::new();
        // argmin's default cost tolerance is ~EPS, far below what NLL scales resolve.
        let tol_cost =
            if self.config.tol == 0.0 { 0.0 } else { (0.1 * self.config.tol).max(1e-12) };
        let solver = LBFGS::new(linesearch, self.config.m)
            .with_tolerance_grad(self.config.tol)
            .map_err(|e| {
                Error::Validation(format!("Invalid optimizer configuration (tol): {e}"))
            })?;
        let solver = solver.with_tolerance_cost(tol_cost).map_err(|e| {
            Error::Validation(format!("Invalid optimizer configuration (tol_cost): {e}"))
        })?;

        // Create executor
        let res = Executor::new(problem, solver)
            .configure(|state| state.param(init_scaled).max_iters(self.config.max_iter))
            .run()
            .map_err(|e| Error::Computation(format!("optimization failed: {e}")))?;

        // Extract results
        let state = res.state();
        let best_scaled = state
            .get_best_param()
            .ok_or_else(|| Error::Computation("no best parameters found".to_string()))?;
        let best: Vec<f64> = best_scaled.iter().zip(scales).map(|(&u, &s)| u * s).collect();
        let best_params = clamp_params(&best, bounds);
        let fval = state.get_best_cost();
        let n_iter = state.get_iter();
        let n_fev = counts.cost.load(Ordering::Relaxed);
        let n_gev = counts.grad.load(Ordering::Relaxed);
        let rejected = counts.rejected.load(Ordering::Relaxed);
        if rejected > 0 {
            log::debug!("{rejected} trial points fell outside the objective's domain");
        }

        // Check convergence
        let termination = state.get_termination_status();
        let converged = matches!(
            termination,
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
                | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
        );
        let message = termination.to_string();

        Ok(OptimizationResult {
            parameters: best_params,
            fval,
            n_iter,
            n_fev,
            n_gev,
            converged,
            message,
        })
    }
}

impl Default for LbfgsbOptimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}
