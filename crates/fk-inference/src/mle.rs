//! Maximum-likelihood fits of [`UnbinnedNll`] objectives.

use crate::optimizer::{LbfgsbOptimizer, ModelObjective, OptimizationResult, OptimizerConfig};
use crate::result::{FitResult, FittedParameter};
use fk_core::{Error, GradientSource, LogDensityModel, Result};
use fk_unbinned::spec::MinimizerSpec;
use fk_unbinned::{BoundNll, ParameterRegistry, UnbinnedNll};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Additional L-BFGS passes allowed while the EDM is above target.
const MAX_REFINE_PASSES: usize = 3;

/// Minimizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinimizerConfig {
    /// EDM tolerance: a minimum is valid once `EDM < 0.001 · tol`.
    pub tol: f64,
    /// 0 is silent; 1–4 logs fit summaries; 5+ logs every pass; 7+ also logs Hessians.
    pub verbosity: u8,
    /// Gradient used by the optimizer and the Hessian.
    pub gradient: GradientSource,
    /// Iteration limit per pass.
    pub max_iter: u64,
    /// L-BFGS memory.
    pub m: usize,
}

impl Default for MinimizerConfig {
    fn default() -> Self {
        Self { tol: 1e-3, verbosity: 0, gradient: GradientSource::Automatic, max_iter: 1000, m: 10 }
    }
}

impl MinimizerConfig {
    /// Defaults overridden by the fields set in a model file.
    pub fn from_spec(spec: &MinimizerSpec) -> Self {
        let d = Self::default();
        Self {
            tol: spec.tol.unwrap_or(d.tol),
            verbosity: spec.verbosity.unwrap_or(d.verbosity),
            gradient: spec.gradient.unwrap_or(d.gradient),
            max_iter: spec.max_iter.unwrap_or(d.max_iter),
            m: spec.m.unwrap_or(d.m),
        }
    }

    /// EDM below which a minimum counts as valid.
    pub fn edm_target(&self) -> f64 {
        0.001 * self.tol
    }

    fn validate(&self) -> Result<()> {
        if !(self.tol.is_finite() && self.tol > 0.0) {
            return Err(Error::Validation(format!("minimizer tol must be > 0, got {}", self.tol)));
        }
        if self.m == 0 || self.max_iter == 0 {
            return Err(Error::Validation("minimizer m and max_iter must be > 0".into()));
        }
        Ok(())
    }

    fn optimizer(&self) -> LbfgsbOptimizer {
        LbfgsbOptimizer::new(OptimizerConfig {
            max_iter: self.max_iter,
            tol: (1e-3 * self.tol).max(1e-10),
            m: self.m,
        })
    }
}

/// Bounded quasi-Newton minimizer over the floating parameters of a registry.
#[derive(Debug, Clone, Default)]
pub struct Minimizer {
    config: MinimizerConfig,
}

impl Minimizer {
    /// Minimizer with the given settings.
    pub fn new(config: MinimizerConfig) -> Self {
        Self { config }
    }

    /// Settings in use.
    pub fn config(&self) -> &MinimizerConfig {
        &self.config
    }

    /// Minimize `nll` over the floating parameters of `registry`, starting from their current
    /// values, and write the best values back into `registry`.
    ///
    /// Hitting the iteration limit is not an error: the result has `converged = false`.
    pub fn minimize(&self, nll: &UnbinnedNll, registry: &mut ParameterRegistry) -> Result<FitResult> {
        self.config.validate()?;
        let bound = nll.bind(registry, self.config.gradient)?;
        let n = bound.dim();

        if n == 0 {
            let fval = bound.nll(&[])?;
            if self.config.verbosity >= 1 {
                log::info!("no floating parameters; NLL = {fval}");
            }
            let values = registry.values();
            return Ok(FitResult::new(
                Vec::new(),
                values,
                fval,
                0.0,
                true,
                true,
                OptimizationCounts::default(),
                "no floating parameters".into(),
                self.config.clone(),
            ));
        }

        let bounds = bound.parameter_bounds();
        let init = bound.parameter_init();
        let steps: Vec<f64> = bound.free_ids().iter().map(|&id| registry.get(id).step_size).collect();
        let optimizer = self.config.optimizer();

        let mut scales = match compute_hessian(&bound, &init, &bounds) {
            Ok(h) => curvature_scales(&h, &steps),
            Err(e) => {
                log::debug!("no curvature at the starting point ({e}); scaling by step sizes");
                steps.clone()
            }
        };
        let mut opt = optimizer.minimize_scaled(&ModelObjective(&bound), &init, &bounds, &scales)?;
        let mut counts = OptimizationCounts::from(&opt);
        if self.config.verbosity >= 5 {
            log::debug!("pass 1: {opt}");
        }

        let target = self.config.edm_target();
        let mut hessian = compute_hessian(&bound, &opt.parameters, &bounds)?;
        let mut edm = estimated_distance(&bound, &opt.parameters, &hessian)?;
        let mut pass = 1;
        while opt.converged && edm > target && pass <= MAX_REFINE_PASSES {
            pass += 1;
            scales = curvature_scales(&hessian, &scales);
            let next =
                optimizer.minimize_scaled(&ModelObjective(&bound), &opt.parameters, &bounds, &scales)?;
            counts.add(&next);
            if self.config.verbosity >= 5 {
                log::debug!("pass {pass}: {next} (EDM before {edm:.3e})");
            }
            if next.fval <= opt.fval {
                opt = next;
            } else {
                opt.converged = next.converged;
            }
            hessian = compute_hessian(&bound, &opt.parameters, &bounds)?;
            edm = estimated_distance(&bound, &opt.parameters, &hessian)?;
        }
        if self.config.verbosity >= 7 {
            log::debug!("Hessian at minimum: {hessian}");
        }

        for (id, &v) in bound.free_ids().iter().zip(&opt.parameters) {
            registry.set_value(*id, v)?;
        }

        let valid = opt.converged && edm <= target;
        if !opt.converged {
            log::warn!(
                "minimization did not converge after {} iterations: {}",
                counts.n_iter,
                opt.message
            );
        } else if !valid {
            log::warn!("minimum has EDM {edm:.3e} above target {target:.3e}");
        }
        if self.config.verbosity >= 1 {
            log::info!(
                "minimum NLL = {:.6} (EDM {edm:.3e}, {pass} passes, {} evaluations)",
                opt.fval,
                counts.n_fev
            );
        }

        let params = bound
            .free_ids()
            .iter()
            .map(|&id| FittedParameter::from_registry(registry, id))
            .collect();
        Ok(FitResult::new(
            params,
            registry.values(),
            opt.fval,
            edm,
            opt.converged,
            valid,
            counts,
            opt.message,
            self.config.clone(),
        ))
    }
}

/// Accumulated optimizer work over all passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationCounts {
    /// Iterations.
    pub n_iter: u64,
    /// Objective evaluations.
    pub n_fev: usize,
    /// Gradient evaluations.
    pub n_gev: usize,
}

impl OptimizationCounts {
    fn add(&mut self, r: &OptimizationResult) {
        self.n_iter += r.n_iter;
        self.n_fev += r.n_fev;
        self.n_gev += r.n_gev;
    }
}

impl From<&OptimizationResult> for OptimizationCounts {
    fn from(r: &OptimizationResult) -> Self {
        Self { n_iter: r.n_iter, n_fev: r.n_fev, n_gev: r.n_gev }
    }
}

/// Centre of a symmetric stencil of half-width `h` around `x`, moved inside `(lo, hi)`
/// when `x` sits closer than `h` to a bound.
fn stencil_center(x: f64, h: f64, (lo, hi): (f64, f64)) -> f64 {
    if hi - lo <= 2.0 * h {
        return x;
    }
    x.clamp(lo + h, hi - h)
}

fn hessian_step(x: f64) -> f64 {
    1e-4 * x.abs().max(1.0)
}

/// Finite-difference Hessian of the NLL at `best`.
///
/// Automatic gradients: forward differences of the gradient. Numerical gradients:
/// second differences of the objective.
pub(crate) fn compute_hessian(
    model: &BoundNll<'_>,
    best: &[f64],
    bounds: &[(f64, f64)],
) -> Result<DMatrix<f64>> {
    let n = best.len();
    let mut hessian = DMatrix::zeros(n, n);

    match model.gradient_source() {
        GradientSource::Automatic => {
            let grad_center = model.grad_nll(best)?;
            for j in 0..n {
                let mut eps = hessian_step(best[j]);
                if best[j] + eps > bounds[j].1 {
                    eps = -eps;
                }
                let mut plus = best.to_vec();
                plus[j] += eps;
                let grad_plus = model.grad_nll(&plus)?;
                for i in 0..n {
                    hessian[(i, j)] = (grad_plus[i] - grad_center[i]) / eps;
                }
            }
        }
        GradientSource::Numerical => {
            let h: Vec<f64> = best.iter().map(|&x| hessian_step(x)).collect();
            let center: Vec<f64> =
                best.iter().zip(&h).zip(bounds).map(|((&x, &hx), &b)| stencil_center(x, hx, b)).collect();
            let f0 = model.nll(&center)?;
            let eval = |di: (usize, f64), dj: Option<(usize, f64)>| -> Result<f64> {
                let mut p = center.clone();
                p[di.0] += di.1;
                if let Some((j, d)) = dj {
                    p[j] += d;
                }
                model.nll(&p)
            };
            for i in 0..n {
                let fp = eval((i, h[i]), None)?;
                let fm = eval((i, -h[i]), None)?;
                hessian[(i, i)] = (fp - 2.0 * f0 + fm) / (h[i] * h[i]);
                for j in 0..i {
                    let fpp = eval((i, h[i]), Some((j, h[j])))?;
                    let fpm = eval((i, h[i]), Some((j, -h[j])))?;
                    let fmp = eval((i, -h[i]), Some((j, h[j])))?;
                    let fmm = eval((i, -h[i]), Some((j, -h[j])))?;
                    let hij = (fpp - fpm - fmp + fmm) / (4.0 * h[i] * h[j]);
                    hessian[(i, j)] = hij;
                    hessian[(j, i)] = hij;
                }
            }
        }
    }

    let ht = hessian.transpose();
    Ok((&hessian + &ht) * 0.5)
}

/// Invert the Hessian by damped Cholesky; `None` if it is not usable as a covariance.
pub(crate) fn invert_hessian(hessian: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let n = hessian.nrows();
    let identity = DMatrix::identity(n, n);
    let diag_scale = (0..n).map(|i| hessian[(i, i)].abs()).fold(0.0_f64, f64::max).max(1.0);

    let mut h_damped = hessian.clone();
    let mut damping = 0.0_f64;
    let max_attempts = 10;

    for attempt in 0..max_attempts {
        if let Some(chol) = nalgebra::linalg::Cholesky::new(h_damped.clone()) {
            if damping > 0.0 {
                log::debug!("Hessian needed diagonal damping {damping:.3e} to factorize");
            }
            return Some(chol.solve(&identity));
        }
        if attempt + 1 == max_attempts {
            break;
        }
        let next = if damping == 0.0 { diag_scale * 1e-9 } else { damping * 10.0 };
        for i in 0..n {
            h_damped[(i, i)] += next - damping;
        }
        damping = next;
    }

    let cov = h_damped.lu().try_inverse()?;
    (0..n).all(|i| cov[(i, i)].is_finite() && cov[(i, i)] > 0.0).then_some(cov)
}

/// `1 / sqrt(H_ii)` per parameter, or `fallback[i]` where the curvature is not positive.
fn curvature_scales(hessian: &DMatrix<f64>, fallback: &[f64]) -> Vec<f64> {
    fallback
        .iter()
        .enumerate()
        .map(|(i, &f)| {
            let h = hessian[(i, i)];
            if h.is_finite() && h > 0.0 { 1.0 / h.sqrt() } else { f }
        })
        .collect()
}

/// `1 / sqrt(|H_ii|)` per parameter.
pub(crate) fn diagonal_uncertainties(hessian: &DMatrix<f64>) -> Vec<f64> {
    (0..hessian.nrows()).map(|i| 1.0 / hessian[(i, i)].abs().max(1e-12).sqrt()).collect()
}

/// Estimated distance to minimum `½ gᵀ H⁻¹ g`, with the gradient projected at active bounds.
fn estimated_distance(model: &BoundNll<'_>, best: &[f64], hessian: &DMatrix<f64>) -> Result<f64> {
    let mut g = model.grad_nll(best)?;
    for ((gi, &x), &(lo, hi)) in g.iter_mut().zip(best).zip(&model.parameter_bounds()) {
        let tol = 1e-10 * x.abs().max(1.0);
        if (x - lo <= tol && *gi > 0.0) || (hi - x <= tol && *gi < 0.0) {
            *gi = 0.0;
        }
    }
    let g = DVector::from_vec(g);
    let edm = match invert_hessian(hessian) {
        Some(cov) => 0.5 * g.dot(&(&cov * &g)),
        None => {
            let d = diagonal_uncertainties(hessian);
            0.5 * g.iter().zip(&d).map(|(gi, di)| gi * gi * di * di).sum::<f64>()
        }
    };
    Ok(edm.abs())
}
