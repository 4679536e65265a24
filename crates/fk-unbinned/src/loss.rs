//! Unbinned negative log-likelihoods.
//!
//! `NLL = Σ_terms [ −Σᵢ wᵢ ln p(xᵢ) + (ν − N_w ln ν if extended) ] + Σ constraints`.

use crate::dataset::Dataset;
use crate::density::Density;
use crate::parameter::{ParamId, ParameterRegistry};
use crate::pdf::PdfScalar;
use fk_ad::{Dual, Scalar};
use fk_core::traits::central_difference_gradient;
use fk_core::{Error, GradientSource, LogDensityModel, Result};
use fk_prob::normal::LN_SQRT_2PI;
use fk_prob::poisson::extended_term;
use rayon::prelude::*;

/// Penalty term on a single parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constraint {
    /// Gaussian constraint `N(mean, sigma)`.
    Gaussian {
        /// Constraint mean.
        mean: f64,
        /// Constraint sigma, finite and > 0.
        sigma: f64,
    },
}

impl Constraint {
    fn nll<S: Scalar>(&self, x: S) -> S {
        match *self {
            Constraint::Gaussian { mean, sigma } => {
                let z = (x - S::from_f64(mean)) / S::from_f64(sigma);
                S::from_f64(0.5) * z * z + S::from_f64(sigma.ln() + LN_SQRT_2PI)
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Term {
    density: Density,
    data: Dataset,
    sum_weights: f64,
}

/// Negative log-likelihood of one or more density/dataset pairs.
///
/// The objective references parameters by [`ParamId`] and reads their values from the
/// registry (or a value vector) at evaluation time.
#[derive(Debug, Clone)]
pub struct UnbinnedNll {
    terms: Vec<Term>,
    constraints: Vec<(ParamId, Constraint)>,
}

impl UnbinnedNll {
    /// Objective for `density` on `data`; extended densities add the Poisson yield term.
    pub fn new(density: Density, data: Dataset) -> Result<Self> {
        Ok(Self { terms: vec![Self::term(density, data)?], constraints: Vec::new() })
    }

    /// Sum of independent objectives (one per channel), sharing parameters by id.
    pub fn simultaneous(pairs: Vec<(Density, Dataset)>) -> Result<Self> {
        if pairs.is_empty() {
            return Err(Error::Validation("simultaneous NLL needs at least one term".into()));
        }
        let terms = pairs.into_iter().map(|(d, x)| Self::term(d, x)).collect::<Result<_>>()?;
        Ok(Self { terms, constraints: Vec::new() })
    }

    fn term(density: Density, data: Dataset) -> Result<Term> {
        density.space().ensure_same_observable(data.space())?;
        let (lo, hi) = density.space().limits();
        let (dlo, dhi) = data.space().limits();
        if dlo < lo || dhi > hi {
            return Err(Error::Validation(format!(
                "data range ({dlo}, {dhi}) exceeds density '{}' range ({lo}, {hi})",
                density.name()
            )));
        }
        let sum_weights = data.sum_weights();
        Ok(Term { density, data, sum_weights })
    }

    /// Merge two objectives into their sum.
    pub fn combine(mut self, other: UnbinnedNll) -> Self {
        self.terms.extend(other.terms);
        self.constraints.extend(other.constraints);
        self
    }

    /// Add a Gaussian constraint `N(mean, sigma)` on `id`.
    pub fn with_constraint(mut self, id: ParamId, mean: f64, sigma: f64) -> Result<Self> {
        if !(mean.is_finite() && sigma.is_finite() && sigma > 0.0) {
            return Err(Error::Validation(format!(
                "Gaussian constraint requires finite mean and sigma > 0, got ({mean}, {sigma})"
            )));
        }
        self.constraints.push((id, Constraint::Gaussian { mean, sigma }));
        Ok(self)
    }

    /// Densities in term order.
    pub fn densities(&self) -> impl Iterator<Item = &Density> {
        self.terms.iter().map(|t| &t.density)
    }

    /// Datasets in term order.
    pub fn datasets(&self) -> impl Iterator<Item = &Dataset> {
        self.terms.iter().map(|t| &t.data)
    }

    /// Constraints with the parameter they act on.
    pub fn constraints(&self) -> &[(ParamId, Constraint)] {
        &self.constraints
    }

    /// Total (weighted) number of events.
    pub fn sum_weights(&self) -> f64 {
        self.terms.iter().map(|t| t.sum_weights).sum()
    }

    /// Every parameter the objective depends on, in order of first appearance.
    pub fn parameters(&self) -> Vec<ParamId> {
        let mut out: Vec<ParamId> = Vec::new();
        let ids = self.terms.iter().flat_map(|t| t.density.parameters());
        for id in ids.chain(self.constraints.iter().map(|(id, _)| *id)) {
            if !out.contains(&id) {
                out.push(id);
            }
        }
        out
    }

    /// Error unless every referenced parameter is in `registry`.
    pub fn check_registry(&self, registry: &ParameterRegistry) -> Result<()> {
        for t in &self.terms {
            t.density.check_registry(registry)?;
        }
        if let Some((id, _)) = self.constraints.iter().find(|(id, _)| id.index() >= registry.len()) {
            return Err(Error::Validation(format!(
                "constraint references parameter #{} not in registry",
                id.index()
            )));
        }
        Ok(())
    }

    /// Objective at the current registry values.
    pub fn value(&self, registry: &ParameterRegistry) -> Result<f64> {
        self.check_registry(registry)?;
        self.eval(&registry.values())
    }

    /// Objective over the full registry value vector, in any [`PdfScalar`].
    pub fn eval<S: PdfScalar>(&self, values: &[S]) -> Result<S> {
        let mut nll = S::from_f64(0.0);
        for t in &self.terms {
            let xs = t.data.values();
            let norm = t.density.space().limits();
            let mut lp = vec![S::from_f64(0.0); xs.len()];
            t.density.log_prob_into(xs, values, norm, &mut lp)?;

            let sum_logp: S = match t.data.weights() {
                Some(w) => lp.par_iter().zip(w.par_iter()).map(|(&l, &wi)| S::from_f64(wi) * l).sum(),
                None => lp.par_iter().copied().sum(),
            };
            nll = nll - sum_logp;

            if t.density.is_extended() {
                let nu = t.density.yield_s(values)?;
                nll = nll + extended_term(nu, t.sum_weights);
            }
        }
        for (id, c) in &self.constraints {
            nll = nll + c.nll(values[id.index()]);
        }
        if nll.value().is_nan() || nll.value() == f64::NEG_INFINITY {
            return Err(Error::Computation(format!("NLL evaluated to {}", nll.value())));
        }
        Ok(nll)
    }

    /// Gradient with respect to `ids` by forward-mode AD, at the current registry values.
    pub fn gradient(&self, registry: &ParameterRegistry, ids: &[ParamId]) -> Result<Vec<f64>> {
        self.check_registry(registry)?;
        let values = registry.values();
        ids.iter().map(|id| Ok(self.eval(&Dual::seed(&values, id.index()))?.dot)).collect()
    }

    /// View over the registry's floating parameters, suitable for a minimizer.
    pub fn bind(&self, registry: &ParameterRegistry, gradient: GradientSource) -> Result<BoundNll<'_>> {
        self.check_registry(registry)?;
        let used = self.parameters();
        let free: Vec<ParamId> =
            registry.floating_ids().into_iter().filter(|id| used.contains(id)).collect();
        let names = free.iter().map(|&id| registry.get(id).name.clone()).collect();
        let bounds = free.iter().map(|&id| registry.get(id).bounds).collect();
        Ok(BoundNll { nll: self, values: registry.values(), free, names, bounds, gradient })
    }
}

/// An [`UnbinnedNll`] restricted to a set of free parameters; all others are held at
/// the values captured when binding.
#[derive(Debug, Clone)]
pub struct BoundNll<'a> {
    nll: &'a UnbinnedNll,
    values: Vec<f64>,
    free: Vec<ParamId>,
    names: Vec<String>,
    bounds: Vec<(f64, f64)>,
    gradient: GradientSource,
}

impl BoundNll<'_> {
    /// Free parameter ids, in the order of the flat parameter vector.
    pub fn free_ids(&self) -> &[ParamId] {
        &self.free
    }

    /// Full registry value vector with the free parameters replaced by `params`.
    pub fn full_values(&self, params: &[f64]) -> Result<Vec<f64>> {
        if params.len() != self.free.len() {
            return Err(Error::Validation(format!(
                "expected {} free parameters, got {}",
                self.free.len(),
                params.len()
            )));
        }
        let mut v = self.values.clone();
        for (id, &p) in self.free.iter().zip(params) {
            v[id.index()] = p;
        }
        Ok(v)
    }
}

impl LogDensityModel for BoundNll<'_> {
    fn dim(&self) -> usize {
        self.free.len()
    }

    fn parameter_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn parameter_bounds(&self) -> Vec<(f64, f64)> {
        self.bounds.clone()
    }

    fn parameter_init(&self) -> Vec<f64> {
        self.free.iter().map(|id| self.values[id.index()]).collect()
    }

    fn nll(&self, params: &[f64]) -> Result<f64> {
        self.nll.eval(&self.full_values(params)?)
    }

    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
        match self.gradient {
            GradientSource::Numerical => central_difference_gradient(params, |p| self.nll(p)),
            GradientSource::Automatic => {
                let full = self.full_values(params)?;
                self.free
                    .iter()
                    .map(|id| Ok(self.nll.eval(&Dual::seed(&full, id.index()))?.dot))
                    .collect()
            }
        }
    }

    fn gradient_source(&self) -> GradientSource {
        self.gradient
    }
}
