//! Densities: shapes and weighted sums over an observable space, optionally extended.

use crate::dataset::Dataset;
use crate::parameter::{ParamId, ParameterRegistry};
use crate::pdf::{
    Bandwidth, ChebyshevPdf, CrystalBallPdf, ExponentialPdf, GaussianPdf, KdePdf, PdfScalar,
    UniformPdf, UnbinnedPdf,
};
use crate::sampling::{multinomial_counts, poisson_count};
use crate::space::Space;
use fk_ad::Scalar;
use fk_core::{Error, Result};
use fk_prob::math::logsumexp;
use rand::RngCore;
use rand::seq::SliceRandom;
use std::sync::Arc;

/// Weights below this magnitude count as zero when combining sum components.
const WEIGHT_EPS: f64 = 1e-12;

/// How an extended density's expected event count depends on parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum YieldExpr {
    /// Fixed number of expected events.
    Fixed(f64),
    /// A free yield parameter `ν`.
    Parameter(ParamId),
    /// `base × scale` (signal-strength pattern).
    Scaled {
        /// Base expected yield (non-negative).
        base: f64,
        /// Scale parameter.
        scale: ParamId,
    },
    /// Sum of component yields (used by sums built from extended components).
    Sum(Vec<YieldExpr>),
}

impl YieldExpr {
    /// Evaluate against the full registry value vector.
    pub fn value<S: Scalar>(&self, values: &[S]) -> Result<S> {
        let v = match self {
            YieldExpr::Fixed(v) => S::from_f64(*v),
            YieldExpr::Parameter(id) => values[id.index()],
            YieldExpr::Scaled { base, scale } => S::from_f64(*base) * values[scale.index()],
            YieldExpr::Sum(parts) => {
                let mut acc = S::from_f64(0.0);
                for p in parts {
                    acc = acc + p.value(values)?;
                }
                acc
            }
        };
        if !v.value().is_finite() || v.value() < 0.0 {
            return Err(Error::Computation(format!("yield must be finite and >= 0, got {}", v.value())));
        }
        Ok(v)
    }

    fn collect_params(&self, out: &mut Vec<ParamId>) {
        match self {
            YieldExpr::Fixed(_) => {}
            YieldExpr::Parameter(id) => out.push(*id),
            YieldExpr::Scaled { scale, .. } => out.push(*scale),
            YieldExpr::Sum(parts) => parts.iter().for_each(|p| p.collect_params(out)),
        }
    }
}

impl From<ParamId> for YieldExpr {
    fn from(id: ParamId) -> Self {
        YieldExpr::Parameter(id)
    }
}

impl From<f64> for YieldExpr {
    fn from(v: f64) -> Self {
        YieldExpr::Fixed(v)
    }
}

/// Interpretation of the fraction parameters of a sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FractionMode {
    /// `N−1` fractions; the last weight is `1 − Σ fᵢ`.
    Implicit,
    /// `N` fractions used as relative weights `fᵢ / Σ f`.
    Relative,
    /// No fractions; weights are the component yields `νᵢ / Σ ν`.
    Yields,
}

#[derive(Debug, Clone)]
enum Node {
    Shape { pdf: Arc<dyn UnbinnedPdf>, params: Vec<ParamId> },
    Sum { components: Vec<Density>, fracs: Vec<ParamId>, mode: FractionMode },
}

/// A named density over a [`Space`].
///
/// Densities are immutable value trees; parameter values are read from the
/// [`ParameterRegistry`] passed to each evaluation.
#[derive(Debug, Clone)]
pub struct Density {
    name: String,
    space: Space,
    node: Node,
    yield_expr: Option<YieldExpr>,
}

impl Density {
    /// Wrap any shape; `params` feed its shape parameters in order.
    pub fn from_pdf(
        name: impl Into<String>,
        space: Space,
        pdf: Arc<dyn UnbinnedPdf>,
        params: Vec<ParamId>,
    ) -> Result<Self> {
        let name = name.into();
        if params.len() != pdf.n_params() {
            return Err(Error::Validation(format!(
                "density '{name}': {} expects {} params, got {}",
                pdf.kind(),
                pdf.n_params(),
                params.len()
            )));
        }
        Ok(Self { name, space, node: Node::Shape { pdf, params }, yield_expr: None })
    }

    fn shape(name: impl Into<String>, space: Space, pdf: Arc<dyn UnbinnedPdf>, params: Vec<ParamId>) -> Self {
        Self { name: name.into(), space, node: Node::Shape { pdf, params }, yield_expr: None }
    }

    /// Gaussian `N(mu, sigma)` truncated to the space.
    pub fn gaussian(name: impl Into<String>, space: Space, mu: ParamId, sigma: ParamId) -> Self {
        Self::shape(name, space, Arc::new(GaussianPdf), vec![mu, sigma])
    }

    /// Exponential `∝ exp(λ x)`.
    pub fn exponential(name: impl Into<String>, space: Space, lambda: ParamId) -> Self {
        Self::shape(name, space, Arc::new(ExponentialPdf), vec![lambda])
    }

    /// Flat density.
    pub fn uniform(name: impl Into<String>, space: Space) -> Self {
        Self::shape(name, space, Arc::new(UniformPdf), Vec::new())
    }

    /// Chebyshev series `1 + Σ c_k T_k` on the space.
    pub fn chebyshev(name: impl Into<String>, space: Space, coeffs: Vec<ParamId>) -> Result<Self> {
        let pdf = ChebyshevPdf::new(coeffs.len(), space.limits())?;
        Ok(Self::shape(name, space, Arc::new(pdf), coeffs))
    }

    /// Crystal Ball line shape.
    pub fn crystal_ball(
        name: impl Into<String>,
        space: Space,
        mu: ParamId,
        sigma: ParamId,
        alpha: ParamId,
        n: ParamId,
    ) -> Self {
        Self::shape(name, space, Arc::new(CrystalBallPdf), vec![mu, sigma, alpha, n])
    }

    /// Gaussian kernel density estimate of `data`.
    pub fn kde(name: impl Into<String>, space: Space, data: &Dataset, bandwidth: Bandwidth) -> Result<Self> {
        space.ensure_same_observable(data.space())?;
        let pdf =
            KdePdf::from_samples(data.values().to_vec(), data.weights().map(<[f64]>::to_vec), bandwidth)?;
        Ok(Self::shape(name, space, Arc::new(pdf), Vec::new()))
    }

    /// Weighted sum of densities on the same observable.
    ///
    /// - `N−1` fractions: last weight is `1 − Σ fᵢ`
    /// - `N` fractions: relative weights `fᵢ / Σ f` (overall scale is degenerate)
    /// - no fractions with all components extended: weights `νᵢ / Σ ν`, and the sum
    ///   is extended with yield `Σ νᵢ`
    pub fn sum(name: impl Into<String>, components: Vec<Density>, fracs: Vec<ParamId>) -> Result<Self> {
        let name = name.into();
        let Some(first) = components.first() else {
            return Err(Error::Validation(format!("sum '{name}' needs at least one component")));
        };
        let space = first.space.clone();
        for c in &components[1..] {
            space.ensure_same_observable(&c.space)?;
        }

        let n = components.len();
        let all_extended = components.iter().all(Density::is_extended);
        let mode = if fracs.is_empty() && all_extended {
            FractionMode::Yields
        } else if fracs.len() + 1 == n {
            FractionMode::Implicit
        } else if fracs.len() == n {
            log::debug!("sum '{name}': {n} fractions for {n} components, using relative weights");
            FractionMode::Relative
        } else {
            return Err(Error::Validation(format!(
                "sum '{name}' with {n} components needs {} or {n} fractions, got {}{}",
                n - 1,
                fracs.len(),
                if fracs.is_empty() { " (or extended components)" } else { "" }
            )));
        };

        let yield_expr = match mode {
            FractionMode::Yields => Some(YieldExpr::Sum(
                components.iter().filter_map(|c| c.yield_expr.clone()).collect(),
            )),
            _ => None,
        };
        Ok(Self { name, space, node: Node::Sum { components, fracs, mode }, yield_expr })
    }

    /// A copy of this density carrying `yield_expr`. Fails if already extended.
    pub fn create_extended(&self, yield_expr: impl Into<YieldExpr>) -> Result<Self> {
        if self.is_extended() {
            return Err(Error::Validation(format!("density '{}' is already extended", self.name)));
        }
        let mut out = self.clone();
        out.yield_expr = Some(yield_expr.into());
        Ok(out)
    }

    /// Density name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Observable space (default normalization range).
    pub fn space(&self) -> &Space {
        &self.space
    }

    /// Whether a yield is attached.
    pub fn is_extended(&self) -> bool {
        self.yield_expr.is_some()
    }

    /// Yield expression, if extended.
    pub fn yield_expr(&self) -> Option<&YieldExpr> {
        self.yield_expr.as_ref()
    }

    /// Sum components (empty for shapes).
    pub fn components(&self) -> &[Density] {
        match &self.node {
            Node::Shape { .. } => &[],
            Node::Sum { components, .. } => components,
        }
    }

    /// Fraction mode of a sum (`None` for shapes).
    pub fn fraction_mode(&self) -> Option<FractionMode> {
        match &self.node {
            Node::Shape { .. } => None,
            Node::Sum { mode, .. } => Some(*mode),
        }
    }

    /// Shape identifier, or `"sum"`.
    pub fn kind(&self) -> &'static str {
        match &self.node {
            Node::Shape { pdf, .. } => pdf.kind(),
            Node::Sum { .. } => "sum",
        }
    }

    /// Every parameter this density depends on (shape, fraction and yield), deduplicated,
    /// in order of first appearance.
    pub fn parameters(&self) -> Vec<ParamId> {
        let mut out = Vec::new();
        self.collect_params(&mut out);
        let mut seen = std::collections::HashSet::new();
        out.retain(|id| seen.insert(*id));
        out
    }

    fn collect_params(&self, out: &mut Vec<ParamId>) {
        match &self.node {
            Node::Shape { params, .. } => out.extend_from_slice(params),
            Node::Sum { components, fracs, .. } => {
                for c in components {
                    c.collect_params(out);
                }
                out.extend_from_slice(fracs);
            }
        }
        if let Some(y) = &self.yield_expr {
            y.collect_params(out);
        }
    }

    /// Error unless every referenced parameter exists in `registry`.
    pub fn check_registry(&self, registry: &ParameterRegistry) -> Result<()> {
        if let Some(id) = self.parameters().into_iter().find(|id| id.index() >= registry.len()) {
            return Err(Error::Validation(format!(
                "density '{}' references parameter #{} not in registry (len {})",
                self.name,
                id.index(),
                registry.len()
            )));
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Generic evaluation (f64 or Dual), over the full registry value vector
    // ---------------------------------------------------------------------

    /// Component weights of a sum; `[1]` for a shape.
    pub(crate) fn weights_s<S: Scalar>(&self, values: &[S]) -> Result<Vec<S>> {
        let Node::Sum { components, fracs, mode } = &self.node else {
            return Ok(vec![S::from_f64(1.0)]);
        };
        let w: Vec<S> = match mode {
            FractionMode::Implicit => {
                let mut w: Vec<S> = fracs.iter().map(|id| values[id.index()]).collect();
                let rest = w.iter().fold(S::from_f64(1.0), |acc, &f| acc - f);
                w.push(rest);
                w
            }
            FractionMode::Relative => {
                let f: Vec<S> = fracs.iter().map(|id| values[id.index()]).collect();
                let total: S = f.iter().copied().sum();
                if !(total.value().is_finite() && total.value() > 0.0) {
                    return Err(Error::Computation(format!(
                        "sum '{}' fractions add up to {}",
                        self.name,
                        total.value()
                    )));
                }
                f.into_iter().map(|x| x / total).collect()
            }
            FractionMode::Yields => {
                let nus = components
                    .iter()
                    .map(|c| c.yield_s(values))
                    .collect::<Result<Vec<S>>>()?;
                let total: S = nus.iter().copied().sum();
                if !(total.value() > 0.0) {
                    return Err(Error::Computation(format!(
                        "sum '{}' component yields add up to {}",
                        self.name,
                        total.value()
                    )));
                }
                nus.into_iter().map(|x| x / total).collect()
            }
        };
        if let Some((i, bad)) = w.iter().enumerate().find(|(_, x)| x.value() < -WEIGHT_EPS) {
            return Err(Error::Computation(format!(
                "sum '{}' has negative weight {} for component {i}",
                self.name,
                bad.value()
            )));
        }
        Ok(w)
    }

    pub(crate) fn yield_s<S: Scalar>(&self, values: &[S]) -> Result<S> {
        self.yield_expr
            .as_ref()
            .ok_or_else(|| Error::NotExtended(self.name.clone()))?
            .value(values)
    }

    /// `log p(x)` normalized on `norm`, written into `out`.
    pub(crate) fn log_prob_into<S: PdfScalar>(
        &self,
        xs: &[f64],
        values: &[S],
        norm: (f64, f64),
        out: &mut [S],
    ) -> Result<()> {
        match &self.node {
            Node::Shape { pdf, params } => {
                let p: Vec<S> = params.iter().map(|id| values[id.index()]).collect();
                S::log_prob_batch(pdf.as_ref(), xs, &p, norm, out)
            }
            Node::Sum { components, .. } => {
                let weights = self.weights_s(values)?;
                let mut per_comp: Vec<(S, Vec<S>)> = Vec::with_capacity(components.len());
                for (c, &w) in components.iter().zip(&weights) {
                    if w.value() <= WEIGHT_EPS {
                        continue;
                    }
                    let mut lp = vec![S::from_f64(0.0); xs.len()];
                    c.log_prob_into(xs, values, norm, &mut lp)?;
                    per_comp.push((w.ln(), lp));
                }
                if per_comp.is_empty() {
                    return Err(Error::Computation(format!(
                        "sum '{}' has no component with positive weight",
                        self.name
                    )));
                }
                let mut terms = vec![S::from_f64(0.0); per_comp.len()];
                for (i, o) in out.iter_mut().enumerate() {
                    for (t, (lw, lp)) in terms.iter_mut().zip(&per_comp) {
                        *t = *lw + lp[i];
                    }
                    *o = logsumexp(&terms);
                }
                Ok(())
            }
        }
    }

    /// Probability mass in `limits` of the density normalized on `norm`.
    fn integrate_values(&self, values: &[f64], norm: (f64, f64), limits: (f64, f64)) -> Result<f64> {
        let l = limits.0.max(norm.0);
        let u = limits.1.min(norm.1);
        if !(l < u) {
            return Ok(0.0);
        }
        match &self.node {
            Node::Shape { pdf, params } => {
                let p: Vec<f64> = params.iter().map(|id| values[id.index()]).collect();
                let log_num = pdf.log_integral(&p, (l, u))?;
                let log_den = pdf.log_integral(&p, norm)?;
                Ok((log_num - log_den).exp())
            }
            Node::Sum { components, .. } => {
                let weights = self.weights_s(values)?;
                let mut total = 0.0;
                for (c, w) in components.iter().zip(weights) {
                    if w > WEIGHT_EPS {
                        total += w * c.integrate_values(values, norm, (l, u))?;
                    }
                }
                Ok(total)
            }
        }
    }

    fn sample_values(
        &self,
        n: usize,
        values: &[f64],
        limits: (f64, f64),
        rng: &mut dyn RngCore,
    ) -> Result<Vec<f64>> {
        match &self.node {
            Node::Shape { pdf, params } => {
                let p: Vec<f64> = params.iter().map(|id| values[id.index()]).collect();
                pdf.sample(&p, limits, n, rng)
            }
            Node::Sum { components, .. } => {
                // Component probabilities inside `limits`: weight × mass in range.
                let weights = self.weights_s(values)?;
                let norm = self.space.limits();
                let mut probs = Vec::with_capacity(components.len());
                for (c, w) in components.iter().zip(&weights) {
                    let m = if *w > WEIGHT_EPS { w * c.integrate_values(values, norm, limits)? } else { 0.0 };
                    probs.push(m);
                }
                let counts = multinomial_counts(n, &probs, rng)?;
                let mut out = Vec::with_capacity(n);
                for (c, k) in components.iter().zip(counts) {
                    if k > 0 {
                        out.extend(c.sample_values(k, values, limits, rng)?);
                    }
                }
                out.shuffle(rng);
                Ok(out)
            }
        }
    }

    // ---------------------------------------------------------------------
    // Public f64 API
    // ---------------------------------------------------------------------

    fn values_for(&self, registry: &ParameterRegistry) -> Result<Vec<f64>> {
        self.check_registry(registry)?;
        Ok(registry.values())
    }

    /// `log p(x)` normalized on the space.
    pub fn log_pdf(&self, xs: &[f64], registry: &ParameterRegistry) -> Result<Vec<f64>> {
        self.log_pdf_in(xs, registry, self.space.limits())
    }

    /// `log p(x)` normalized on `norm`.
    pub fn log_pdf_in(&self, xs: &[f64], registry: &ParameterRegistry, norm: (f64, f64)) -> Result<Vec<f64>> {
        check_range(norm)?;
        let values = self.values_for(registry)?;
        let mut out = vec![0.0; xs.len()];
        self.log_prob_into(xs, &values, norm, &mut out)?;
        Ok(out)
    }

    /// `p(x)` normalized on the space.
    pub fn pdf(&self, xs: &[f64], registry: &ParameterRegistry) -> Result<Vec<f64>> {
        self.pdf_in(xs, registry, self.space.limits())
    }

    /// `p(x)` normalized on `norm`.
    pub fn pdf_in(&self, xs: &[f64], registry: &ParameterRegistry, norm: (f64, f64)) -> Result<Vec<f64>> {
        Ok(self.log_pdf_in(xs, registry, norm)?.into_iter().map(f64::exp).collect())
    }

    /// Probability mass of the (space-normalized) density inside `limits`.
    pub fn integrate(&self, limits: (f64, f64), registry: &ParameterRegistry) -> Result<f64> {
        check_range(limits)?;
        let values = self.values_for(registry)?;
        self.integrate_values(&values, self.space.limits(), limits)
    }

    /// Current yield `ν`. Fails with [`Error::NotExtended`] on non-extended densities.
    pub fn get_yield(&self, registry: &ParameterRegistry) -> Result<f64> {
        let values = self.values_for(registry)?;
        self.yield_s(&values)
    }

    /// `ν · p(x)`.
    pub fn ext_pdf(&self, xs: &[f64], registry: &ParameterRegistry) -> Result<Vec<f64>> {
        let nu = self.get_yield(registry)?;
        Ok(self.pdf(xs, registry)?.into_iter().map(|p| nu * p).collect())
    }

    /// `ν · ∫_limits p`.
    pub fn ext_integrate(&self, limits: (f64, f64), registry: &ParameterRegistry) -> Result<f64> {
        let nu = self.get_yield(registry)?;
        Ok(nu * self.integrate(limits, registry)?)
    }

    /// Current component weights of a sum (`[1]` for a shape).
    pub fn component_weights(&self, registry: &ParameterRegistry) -> Result<Vec<f64>> {
        let values = self.values_for(registry)?;
        self.weights_s(&values)
    }

    /// Draw `n` events restricted to `limits` (default: the space).
    pub fn sample(
        &self,
        n: usize,
        registry: &ParameterRegistry,
        rng: &mut dyn RngCore,
        limits: Option<(f64, f64)>,
    ) -> Result<Dataset> {
        let space = match limits {
            Some(l) => self.space.with_limits(l)?,
            None => self.space.clone(),
        };
        let values = self.values_for(registry)?;
        let xs = self.sample_values(n, &values, space.limits(), rng)?;
        Dataset::new(space, xs)
    }

    /// Draw `ν` events (or `Poisson(ν)` when `fluctuate`) over the space.
    pub fn sample_extended(
        &self,
        registry: &ParameterRegistry,
        rng: &mut dyn RngCore,
        fluctuate: bool,
    ) -> Result<Dataset> {
        let nu = self.get_yield(registry)?;
        let n = if fluctuate { poisson_count(nu, rng)? } else { nu.round() as usize };
        self.sample(n, registry, rng, None)
    }
}

fn check_range(r: (f64, f64)) -> Result<()> {
    if !(r.0.is_finite() && r.1.is_finite() && r.0 < r.1) {
        return Err(Error::Validation(format!("invalid range ({}, {})", r.0, r.1)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::ParameterSpec;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn trapezoid(d: &Density, reg: &ParameterRegistry, n: usize) -> f64 {
        let (a, b) = d.space().limits();
        let h = (b - a) / n as f64;
        let xs: Vec<f64> = (0..=n).map(|i| a + i as f64 * h).collect();
        let p = d.pdf(&xs, reg).unwrap();
        h * (p.iter().sum::<f64>() - 0.5 * (p[0] + p[n]))
    }

    fn two_gauss() -> (ParameterRegistry, Density, ParamId) {
        let space = Space::new("x", (-5.0, 5.0)).unwrap();
        let mut reg = ParameterRegistry::new();
        let m1 = reg.create(ParameterSpec::new("m1", -1.0)).unwrap();
        let m2 = reg.create(ParameterSpec::new("m2", 2.0)).unwrap();
        let s = reg.create(ParameterSpec::new("s", 0.7).lower(0.01)).unwrap();
        let f = reg.create(ParameterSpec::new("f", 0.3).bounds(0.0, 1.0)).unwrap();
        let a = Density::gaussian("a", space.clone(), m1, s);
        let b = Density::gaussian("b", space, m2, s);
        (reg, Density::sum("ab", vec![a, b], vec![f]).unwrap(), f)
    }

    #[test]
    fn test_implicit_fraction_weights_and_normalization() {
        let (reg, sum, _) = two_gauss();
        assert_eq!(sum.fraction_mode(), Some(FractionMode::Implicit));
        let w = sum.component_weights(&reg).unwrap();
        assert_relative_eq!(w[1], 0.7, epsilon = 1e-15);
        assert_relative_eq!(trapezoid(&sum, &reg, 4000), 1.0, epsilon = 1e-6);
        assert_relative_eq!(sum.integrate((-5.0, 5.0), &reg).unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_implicit_fractions_above_one_fail_at_evaluation() {
        let space = Space::new("x", (0.0, 1.0)).unwrap();
        let mut reg = ParameterRegistry::new();
        let f1 = reg.create(ParameterSpec::new("f1", 0.7)).unwrap();
        let f2 = reg.create(ParameterSpec::new("f2", 0.6)).unwrap();
        let comps = vec![
            Density::uniform("u1", space.clone()),
            Density::uniform("u2", space.clone()),
            Density::uniform("u3", space),
        ];
        let sum = Density::sum("s", comps, vec![f1, f2]).unwrap();
        assert!(matches!(sum.pdf(&[0.5], &reg), Err(Error::Computation(_))));
    }

    #[test]
    fn test_relative_fractions_need_not_add_to_one() {
        let space = Space::new("x", (0.0, 2.0)).unwrap();
        let mut reg = ParameterRegistry::new();
        let lam = reg.create(ParameterSpec::new("lam", -1.0)).unwrap();
        let f1 = reg.create(ParameterSpec::new("f1", 3.0)).unwrap();
        let f2 = reg.create(ParameterSpec::new("f2", 1.0)).unwrap();
        let sum = Density::sum(
            "s",
            vec![Density::uniform("u", space.clone()), Density::exponential("e", space, lam)],
            vec![f1, f2],
        )
        .unwrap();
        assert_eq!(sum.fraction_mode(), Some(FractionMode::Relative));
        let w = sum.component_weights(&reg).unwrap();
        assert_relative_eq!(w[0], 0.75, epsilon = 1e-15);
        assert_relative_eq!(trapezoid(&sum, &reg, 2000), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_wrong_fraction_count_is_validation_error() {
        let space = Space::new("x", (0.0, 1.0)).unwrap();
        let mut reg = ParameterRegistry::new();
        let f = reg.create(ParameterSpec::new("f", 0.5)).unwrap();
        let comps = vec![
            Density::uniform("u1", space.clone()),
            Density::uniform("u2", space.clone()),
            Density::uniform("u3", space),
        ];
        assert!(matches!(Density::sum("s", comps.clone(), vec![f]), Err(Error::Validation(_))));
        assert!(matches!(Density::sum("s", comps, vec![]), Err(Error::Validation(_))));
    }

    #[test]
    fn test_sum_of_extended_components_is_extended() {
        let space = Space::new("x", (0.0, 1.0)).unwrap();
        let mut reg = ParameterRegistry::new();
        let n1 = reg.create(ParameterSpec::new("n1", 300.0).lower(0.0)).unwrap();
        let n2 = reg.create(ParameterSpec::new("n2", 100.0).lower(0.0)).unwrap();
        let a = Density::uniform("a", space.clone()).create_extended(n1).unwrap();
        let b = Density::uniform("b", space).create_extended(n2).unwrap();
        let sum = Density::sum("ab", vec![a, b], vec![]).unwrap();
        assert!(sum.is_extended());
        assert_eq!(sum.fraction_mode(), Some(FractionMode::Yields));
        assert_relative_eq!(sum.get_yield(&reg).unwrap(), 400.0);
        assert_relative_eq!(sum.component_weights(&reg).unwrap()[0], 0.75);
        assert_eq!(sum.parameters(), vec![n1, n2]);
    }

    #[test]
    fn test_extension_rules() {
        let space = Space::new("x", (0.0, 4.0)).unwrap();
        let reg = ParameterRegistry::new();
        let u = Density::uniform("u", space);
        assert!(matches!(u.get_yield(&reg), Err(Error::NotExtended(_))));
        assert!(matches!(u.ext_pdf(&[1.0], &reg), Err(Error::NotExtended(_))));

        let ext = u.create_extended(20.0).unwrap();
        assert!(!u.is_extended());
        assert!(matches!(ext.create_extended(5.0), Err(Error::Validation(_))));
        assert_relative_eq!(ext.ext_pdf(&[1.0], &reg).unwrap()[0], 5.0, epsilon = 1e-12);
        assert_relative_eq!(ext.ext_integrate((0.0, 1.0), &reg).unwrap(), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_registry_updates_are_seen() {
        let (mut reg, sum, f) = two_gauss();
        let before = sum.pdf(&[-1.0], &reg).unwrap()[0];
        reg.set_value(f, 0.9).unwrap();
        let after = sum.pdf(&[-1.0], &reg).unwrap()[0];
        assert!(after > before);
    }

    #[test]
    fn test_pdf_in_renormalizes_on_subrange() {
        let space = Space::new("x", (0.0, 4.0)).unwrap();
        let reg = ParameterRegistry::new();
        let u = Density::uniform("u", space);
        assert_relative_eq!(u.pdf_in(&[0.5], &reg, (0.0, 1.0)).unwrap()[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(u.integrate((-3.0, 1.0), &reg).unwrap(), 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_sum_sampling_respects_weights_and_limits() {
        let (reg, sum, _) = two_gauss();
        let mut rng = StdRng::seed_from_u64(11);
        let data = sum.sample(5000, &reg, &mut rng, Some((-4.0, 4.0))).unwrap();
        assert_eq!(data.n_events(), 5000);
        assert_eq!(data.space().limits(), (-4.0, 4.0));
        let near_second = data.values().iter().filter(|&&x| x > 0.5).count() as f64 / 5000.0;
        assert!((near_second - 0.7).abs() < 0.03, "{near_second}");
    }

    #[test]
    fn test_sample_extended_fixed_count() {
        let space = Space::new("x", (0.0, 1.0)).unwrap();
        let reg = ParameterRegistry::new();
        let d = Density::uniform("u", space).create_extended(123.4).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(d.sample_extended(&reg, &mut rng, false).unwrap().n_events(), 123);
    }

    #[test]
    fn test_unknown_parameter_is_rejected() {
        let (_, sum, _) = two_gauss();
        let small = ParameterRegistry::new();
        assert!(matches!(sum.pdf(&[0.0], &small), Err(Error::Validation(_))));
    }
}
