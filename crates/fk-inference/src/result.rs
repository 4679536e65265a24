//! Fit results and their uncertainties.

use crate::mle::{
    MinimizerConfig, OptimizationCounts, compute_hessian, diagonal_uncertainties, invert_hessian,
};
use crate::profile_likelihood::{ProfileInterval, profile_interval};
use fk_core::{Error, LogDensityModel, Result};
use fk_unbinned::{ParamId, ParameterRegistry, UnbinnedNll};
use serde::Serialize;
use std::fmt;

/// One free parameter at the minimum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FittedParameter {
    /// Parameter name.
    pub name: String,
    /// Registry handle.
    pub id: ParamId,
    /// Best-fit value.
    pub value: f64,
    /// Parameter bounds.
    pub bounds: (f64, f64),
    /// Whether the value sits on a bound.
    pub at_limit: bool,
    /// Symmetric (Hessian) error, after [`FitResult::hesse`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<f64>,
    /// Asymmetric (profile) errors, after [`FitResult::errors`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileInterval>,
}

impl FittedParameter {
    pub(crate) fn from_registry(registry: &ParameterRegistry, id: ParamId) -> Self {
        let p = registry.get(id);
        Self {
            name: p.name.clone(),
            id,
            value: p.value,
            bounds: p.bounds,
            at_limit: p.at_limit(),
            error: None,
            profile: None,
        }
    }
}

/// Snapshot of a minimization.
///
/// The snapshot does not follow later changes to the registry; use [`FitResult::apply`]
/// to restore it.
#[derive(Debug, Clone, Serialize)]
pub struct FitResult {
    /// Free parameters in optimizer order.
    pub params: Vec<FittedParameter>,
    /// Full registry value vector at the minimum (fixed parameters included).
    pub values: Vec<f64>,
    /// Minimum NLL.
    pub fval: f64,
    /// Estimated distance to minimum.
    pub edm: f64,
    /// Whether the optimizer met its convergence criteria.
    pub converged: bool,
    /// `converged` and EDM below target.
    pub valid: bool,
    /// Optimizer work over all passes.
    pub counts: OptimizationCounts,
    /// Optimizer termination message.
    pub message: String,
    /// Covariance of the free parameters (row-major), after [`FitResult::hesse`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub covariance: Option<Vec<Vec<f64>>>,
    /// Settings the fit ran with; profile errors reuse them.
    #[serde(skip)]
    pub config: MinimizerConfig,
}

impl FitResult {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        params: Vec<FittedParameter>,
        values: Vec<f64>,
        fval: f64,
        edm: f64,
        converged: bool,
        valid: bool,
        counts: OptimizationCounts,
        message: String,
        config: MinimizerConfig,
    ) -> Self {
        Self { params, values, fval, edm, converged, valid, counts, message, covariance: None, config }
    }

    /// Fitted parameter by name.
    pub fn param(&self, name: &str) -> Option<&FittedParameter> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Best-fit value by name.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.param(name).map(|p| p.value)
    }

    /// Hessian error by name.
    pub fn error(&self, name: &str) -> Option<f64> {
        self.param(name).and_then(|p| p.error)
    }

    /// Error unless the minimization converged to a valid minimum (EDM within target).
    pub fn ensure_converged(&self) -> Result<&Self> {
        if !self.converged {
            return Err(Error::NotConverged(self.message.clone()));
        }
        if !self.valid {
            return Err(Error::NotConverged(format!(
                "EDM {:.3e} above target {:.3e}",
                self.edm,
                self.config.edm_target()
            )));
        }
        Ok(self)
    }

    /// Write the snapshot values back into `registry`.
    pub fn apply(&self, registry: &mut ParameterRegistry) -> Result<()> {
        registry.set_values(&self.values)
    }

    fn registry_at_minimum(&self, registry: &ParameterRegistry) -> Result<ParameterRegistry> {
        let mut reg = registry.clone();
        reg.set_values(&self.values)?;
        Ok(reg)
    }

    /// Symmetric errors and covariance from the Hessian at the minimum.
    ///
    /// Falls back to `1/sqrt(|H_ii|)` without covariance if the Hessian cannot be inverted.
    pub fn hesse(&mut self, nll: &UnbinnedNll, registry: &ParameterRegistry) -> Result<()> {
        if self.params.is_empty() {
            return Ok(());
        }
        let reg = self.registry_at_minimum(registry)?;
        let bound = nll.bind(&reg, self.config.gradient)?;
        if bound.free_ids().len() != self.params.len()
            || bound.free_ids().iter().zip(&self.params).any(|(id, p)| *id != p.id)
        {
            return Err(Error::Validation(
                "registry floating parameters changed since the fit".into(),
            ));
        }
        let best: Vec<f64> = self.params.iter().map(|p| p.value).collect();
        let hessian = compute_hessian(&bound, &best, &bound.parameter_bounds())?;
        let n = best.len();

        match invert_hessian(&hessian) {
            Some(cov) => {
                for (i, p) in self.params.iter_mut().enumerate() {
                    p.error = Some(cov[(i, i)].sqrt());
                }
                self.covariance = Some((0..n).map(|i| (0..n).map(|j| cov[(i, j)]).collect()).collect());
            }
            None => {
                log::warn!("Hessian inversion failed, using diagonal approximation");
                for (p, e) in self.params.iter_mut().zip(diagonal_uncertainties(&hessian)) {
                    p.error = Some(e);
                }
                self.covariance = None;
            }
        }
        Ok(())
    }

    /// Correlation between free parameters `i` and `j` (requires [`hesse`](Self::hesse)).
    pub fn correlation(&self, i: usize, j: usize) -> Option<f64> {
        let c = self.covariance.as_ref()?;
        let v = c.get(i)?.get(j)?;
        Some(v / (c[i][i] * c[j][j]).sqrt())
    }

    /// Full correlation matrix (requires [`hesse`](Self::hesse)).
    pub fn correlation_matrix(&self) -> Option<Vec<Vec<f64>>> {
        let n = self.params.len();
        self.covariance.as_ref()?;
        (0..n).map(|i| (0..n).map(|j| self.correlation(i, j)).collect()).collect()
    }

    /// Asymmetric profile-likelihood errors for `names` (all free parameters when empty)
    /// at `sigma` standard deviations (`ΔNLL = sigma² / 2`).
    ///
    /// If a profile fit finds a lower NLL than this result, the interval is flagged with
    /// `new_minimum` and a warning is logged.
    pub fn errors(
        &mut self,
        nll: &UnbinnedNll,
        registry: &ParameterRegistry,
        names: &[&str],
        sigma: f64,
    ) -> Result<()> {
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(Error::Validation(format!("sigma must be > 0, got {sigma}")));
        }
        let reg = self.registry_at_minimum(registry)?;
        let targets: Vec<usize> = if names.is_empty() {
            (0..self.params.len()).collect()
        } else {
            names
                .iter()
                .map(|n| {
                    self.params.iter().position(|p| p.name == *n).ok_or_else(|| {
                        Error::Validation(format!("'{n}' is not a free parameter of this fit"))
                    })
                })
                .collect::<Result<_>>()?
        };

        for i in targets {
            let p = &self.params[i];
            let interval = profile_interval(nll, &reg, &self.config, p.id, p.error, self.fval, sigma)?;
            if let Some(lower) = interval.new_minimum {
                log::warn!("profile of '{}' found a lower NLL ({lower}) than the fit", p.name);
            }
            self.params[i].profile = Some(interval);
        }
        Ok(())
    }
}

impl fmt::Display for FitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "FitResult(fval={:.6}, edm={:.3e}, converged={}, valid={})",
            self.fval, self.edm, self.converged, self.valid
        )?;
        for p in &self.params {
            write!(f, "  {:<16} {:>14.6}", p.name, p.value)?;
            if let Some(e) = p.error {
                write!(f, " +/- {e:.6}")?;
            }
            if let Some(pr) = &p.profile {
                write!(f, "  [{:+.6}, {:+.6}]", pr.lower - p.value, pr.upper - p.value)?;
            }
            if p.at_limit {
                write!(f, "  (at limit)")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
