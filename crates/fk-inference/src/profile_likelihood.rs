//! Profile likelihood: scans and asymmetric errors.
//!
//! The profiled NLL of a parameter at value `v` is the NLL minimized over all other
//! floating parameters with the parameter fixed at `v`.

use crate::mle::{Minimizer, MinimizerConfig};
use fk_core::{Error, Result};
use fk_unbinned::{ParamId, ParameterRegistry, UnbinnedNll};
use serde::{Deserialize, Serialize};

/// Maximum number of bracket doublings per side.
const MAX_BRACKET_STEPS: usize = 30;
/// Maximum number of false-position iterations per side.
const MAX_REFINE_ITER: usize = 60;
/// NLL decrease that counts as a new minimum.
const NEW_MINIMUM_TOL: f64 = 1e-6;

/// Single point in a profile likelihood scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilePoint {
    /// Tested parameter value.
    pub value: f64,
    /// Conditional minimum NLL at `value`.
    pub nll: f64,
    /// `2 (nll − nll_hat)`, clipped at 0.
    pub delta_two_nll: f64,
    /// Conditional fit convergence.
    pub converged: bool,
}

/// Profile likelihood scan result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileLikelihoodScan {
    /// Scanned parameter.
    pub param: String,
    /// Unconditional best-fit value.
    pub best_value: f64,
    /// Unconditional minimum NLL.
    pub nll_hat: f64,
    /// Per-point results in input order.
    pub points: Vec<ProfilePoint>,
}

/// Asymmetric interval from the profile likelihood.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileInterval {
    /// Lower end (a parameter bound if `lower_at_limit`).
    pub lower: f64,
    /// Upper end (a parameter bound if `upper_at_limit`).
    pub upper: f64,
    /// The profile stays below the threshold down to the lower bound.
    pub lower_at_limit: bool,
    /// The profile stays below the threshold up to the upper bound.
    pub upper_at_limit: bool,
    /// Lowest NLL seen if the profile fits went below the reported minimum.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_minimum: Option<f64>,
}

/// Conditional fits of one parameter, warm-started from the previous point.
struct Profiler<'a> {
    nll: &'a UnbinnedNll,
    minimizer: Minimizer,
    registry: ParameterRegistry,
    id: ParamId,
    lowest: f64,
}

impl<'a> Profiler<'a> {
    fn new(
        nll: &'a UnbinnedNll,
        at_min: &ParameterRegistry,
        config: &MinimizerConfig,
        id: ParamId,
    ) -> Result<Self> {
        let mut registry = at_min.clone();
        registry.set_floating(id, false)?;
        // Conditional fits are logged only at high verbosity.
        let verbosity = config.verbosity.saturating_sub(4);
        let minimizer = Minimizer::new(MinimizerConfig { verbosity, ..config.clone() });
        Ok(Self { nll, minimizer, registry, id, lowest: f64::INFINITY })
    }

    /// Conditional minimum at `value`.
    fn eval(&mut self, value: f64) -> Result<(f64, bool)> {
        self.registry.set_value(self.id, value)?;
        let r = self.minimizer.minimize(self.nll, &mut self.registry)?;
        self.lowest = self.lowest.min(r.fval);
        Ok((r.fval, r.converged))
    }

    /// Profile excess over the threshold at `value`.
    fn excess(&mut self, value: f64, fmin: f64, up: f64) -> Result<f64> {
        Ok(self.eval(value)?.0 - fmin - up)
    }
}

/// Profile scan of `id` over `values`.
///
/// `registry` supplies starting values; it is not modified.
pub fn scan(
    nll: &UnbinnedNll,
    registry: &ParameterRegistry,
    config: &MinimizerConfig,
    id: ParamId,
    values: &[f64],
) -> Result<ProfileLikelihoodScan> {
    let mut global = registry.clone();
    let free = Minimizer::new(config.clone()).minimize(nll, &mut global)?;
    let best_value = global.value(id);
    let nll_hat = free.fval;

    let mut profiler = Profiler::new(nll, &global, config, id)?;
    let mut points = Vec::with_capacity(values.len());
    for &v in values {
        let (f, converged) = profiler.eval(v)?;
        if !converged {
            log::warn!("conditional fit at {} = {v} did not converge", global.get(id).name);
        }
        let delta_two_nll = (2.0 * (f - nll_hat)).max(0.0);
        points.push(ProfilePoint { value: v, nll: f, delta_two_nll, converged });
    }
    Ok(ProfileLikelihoodScan { param: global.get(id).name.clone(), best_value, nll_hat, points })
}

/// Evenly spaced scan grid (`n >= 2` points including both ends).
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    if n < 2 {
        return vec![start];
    }
    let step = (stop - start) / (n - 1) as f64;
    (0..n).map(|i| start + i as f64 * step).collect()
}

/// Values where the profile of `id` crosses `fmin + sigma²/2` on each side of the minimum.
///
/// `at_min` must hold the best-fit values; `step` is an initial bracket width (the Hessian
/// error when known, the parameter step size otherwise).
pub(crate) fn profile_interval(
    nll: &UnbinnedNll,
    at_min: &ParameterRegistry,
    config: &MinimizerConfig,
    id: ParamId,
    step: Option<f64>,
    fmin: f64,
    sigma: f64,
) -> Result<ProfileInterval> {
    let p = at_min.get(id);
    let x0 = p.value;
    let (lo, hi) = p.bounds;
    let step = step.filter(|s| s.is_finite() && *s > 0.0).unwrap_or(p.step_size);
    let up = 0.5 * sigma * sigma;

    let mut profiler = Profiler::new(nll, at_min, config, id)?;
    let (upper, upper_at_limit) = crossing(&mut profiler, x0, step, hi, fmin, up)?;
    profiler.registry = at_min.clone();
    profiler.registry.set_floating(id, false)?;
    let (lower, lower_at_limit) = crossing(&mut profiler, x0, -step, lo, fmin, up)?;

    let new_minimum = (profiler.lowest < fmin - NEW_MINIMUM_TOL).then_some(profiler.lowest);
    Ok(ProfileInterval { lower, upper, lower_at_limit, upper_at_limit, new_minimum })
}

/// Crossing of `g(v) = profile(v) − fmin − up` starting at `x0` in the direction of `step`.
fn crossing(
    profiler: &mut Profiler<'_>,
    x0: f64,
    step: f64,
    limit: f64,
    fmin: f64,
    up: f64,
) -> Result<(f64, bool)> {
    let toward = |v: f64| if step > 0.0 { v.min(limit) } else { v.max(limit) };

    // Bracket: a is inside (g < 0), b is outside (g >= 0).
    let (mut a, mut ga) = (x0, -up);
    let mut width = step;
    let (mut b, mut gb);
    let mut steps = 0;
    loop {
        b = toward(a + width);
        if b == a {
            return Ok((limit, true));
        }
        gb = profiler.excess(b, fmin, up)?;
        if gb >= 0.0 {
            break;
        }
        if b == limit {
            return Ok((limit, true));
        }
        a = b;
        ga = gb;
        width *= 2.0;
        steps += 1;
        if steps >= MAX_BRACKET_STEPS {
            return Err(Error::Computation(format!(
                "profile did not reach ΔNLL = {up} within {steps} bracket steps"
            )));
        }
    }

    // Illinois false position.
    let tol = 1e-6 * step.abs();
    let mut side = 0i8;
    for _ in 0..MAX_REFINE_ITER {
        let c = (a * gb - b * ga) / (gb - ga);
        let gc = profiler.excess(c, fmin, up)?;
        if gc.abs() < 1e-6 || (b - a).abs() < tol {
            return Ok((c, false));
        }
        if gc < 0.0 {
            a = c;
            ga = gc;
            if side == -1 {
                gb *= 0.5;
            }
            side = -1;
        } else {
            b = c;
            gb = gc;
            if side == 1 {
                ga *= 0.5;
            }
            side = 1;
        }
    }
    log::warn!("profile crossing refinement hit the iteration limit");
    Ok(((a * gb - b * ga) / (gb - ga), false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use fk_unbinned::{Dataset, Density, ParameterSpec, Space};

    /// Unit-width Gaussian with free mean on fixed data: NLL is exactly quadratic in mu.
    fn fixed_sigma_problem() -> (ParameterRegistry, UnbinnedNll, ParamId) {
        let space = Space::new("x", (-50.0, 50.0)).unwrap();
        let mut reg = ParameterRegistry::new();
        let mu = reg.create(ParameterSpec::new("mu", 0.5)).unwrap();
        let sigma = reg.create(ParameterSpec::new("sigma", 1.0).floating(false)).unwrap();
        let xs = vec![-1.0, -0.5, 0.0, 0.3, 0.7, 1.2, 1.6, 2.1];
        let data = Dataset::new(space.clone(), xs).unwrap();
        let nll = UnbinnedNll::new(Density::gaussian("g", space, mu, sigma), data).unwrap();
        (reg, nll, mu)
    }

    #[test]
    fn test_scan_is_parabola_for_gaussian_mean() {
        let (reg, nll, mu) = fixed_sigma_problem();
        let grid = linspace(-0.5, 1.5, 5);
        let scan = scan(&nll, &reg, &MinimizerConfig::default(), mu, &grid).unwrap();
        // mean of the data
        assert_relative_eq!(scan.best_value, 0.55, epsilon = 1e-4);
        for p in &scan.points {
            // 2ΔNLL = N (v − mean)² / σ²
            assert_relative_eq!(p.delta_two_nll, 8.0 * (p.value - 0.55).powi(2), epsilon = 1e-4);
        }
    }

    #[test]
    fn test_profile_interval_symmetric_for_gaussian_mean() {
        let (mut reg, nll, mu) = fixed_sigma_problem();
        let cfg = MinimizerConfig::default();
        let fit = Minimizer::new(cfg.clone()).minimize(&nll, &mut reg).unwrap();
        let iv = profile_interval(&nll, &reg, &cfg, mu, None, fit.fval, 1.0).unwrap();
        let expected = 1.0 / 8.0_f64.sqrt();
        assert_relative_eq!(reg.value(mu) - iv.lower, expected, epsilon = 1e-4);
        assert_relative_eq!(iv.upper - reg.value(mu), expected, epsilon = 1e-4);
        assert!(!iv.lower_at_limit && !iv.upper_at_limit);
        assert!(iv.new_minimum.is_none());
    }

    #[test]
    fn test_profile_interval_stops_at_bound() {
        let (mut reg, nll, mu) = fixed_sigma_problem();
        reg.set_bounds(mu, 0.4, 10.0).unwrap();
        let cfg = MinimizerConfig::default();
        let fit = Minimizer::new(cfg.clone()).minimize(&nll, &mut reg).unwrap();
        let iv = profile_interval(&nll, &reg, &cfg, mu, Some(0.3), fit.fval, 2.0).unwrap();
        assert!(iv.lower_at_limit);
        assert_eq!(iv.lower, 0.4);
        assert!(!iv.upper_at_limit);
    }

    #[test]
    fn test_linspace_endpoints() {
        let v = linspace(1.0, 2.0, 3);
        assert_eq!(v, vec![1.0, 1.5, 2.0]);
        assert_eq!(linspace(3.0, 4.0, 1), vec![3.0]);
    }
}
