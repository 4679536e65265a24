//! One-dimensional probability density shapes.
//!
//! Shapes implement [`ShapeKernel`] once, generically over the evaluation scalar, and
//! get the object-safe [`UnbinnedPdf`] interface through a blanket impl. Densities keep
//! shapes behind `Arc<dyn UnbinnedPdf>` and call them through [`PdfScalar`], which picks
//! the `f64` or [`Dual`] batch entry point for the scalar in use.

use fk_ad::{Dual, Scalar};
use fk_core::{Error, Result};
use rand::RngCore;

mod chebyshev;
mod crystal_ball;
mod exponential;
mod gaussian;
mod kde;
mod uniform;

pub use chebyshev::ChebyshevPdf;
pub use crystal_ball::CrystalBallPdf;
pub use exponential::ExponentialPdf;
pub use gaussian::GaussianPdf;
pub use kde::{Bandwidth, KdePdf};
pub use uniform::UniformPdf;

/// Normalized 1-D density with shape parameters supplied at call time.
///
/// `norm` is the range the density is normalized on; `xs` are expected to lie inside it.
pub trait UnbinnedPdf: Send + Sync + std::fmt::Debug {
    /// Short shape identifier (e.g. `"gaussian"`).
    fn kind(&self) -> &'static str;

    /// Number of shape parameters.
    fn n_params(&self) -> usize;

    /// `log p(x | params)` for every `x` in `xs`, normalized on `norm`.
    fn log_prob_batch(
        &self,
        xs: &[f64],
        params: &[f64],
        norm: (f64, f64),
        out: &mut [f64],
    ) -> Result<()>;

    /// Same as [`log_prob_batch`](Self::log_prob_batch) with dual-number parameters, so the
    /// tangents carry `∂ log p / ∂θ` along the seeded direction.
    fn log_prob_batch_dual(
        &self,
        xs: &[f64],
        params: &[Dual],
        norm: (f64, f64),
        out: &mut [Dual],
    ) -> Result<()>;

    /// `log ∫_limits f(x) dx` of the unnormalized shape.
    fn log_integral(&self, params: &[f64], limits: (f64, f64)) -> Result<f64>;

    /// Draw `n` values from the shape restricted to `limits`.
    fn sample(
        &self,
        params: &[f64],
        limits: (f64, f64),
        n: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<f64>>;
}

/// Shape definition written once for any [`Scalar`].
pub trait ShapeKernel: Send + Sync + std::fmt::Debug {
    /// Short shape identifier.
    const KIND: &'static str;

    /// Number of shape parameters.
    fn arity(&self) -> usize;

    /// Reject parameter values outside the shape's domain.
    fn check_params(&self, _params: &[f64]) -> Result<()> {
        Ok(())
    }

    /// Log of the unnormalized shape at `x`.
    fn log_shape<S: Scalar>(&self, x: f64, params: &[S]) -> S;

    /// Batched [`log_shape`](Self::log_shape).
    fn log_shape_batch<S: Scalar>(&self, xs: &[f64], params: &[S], out: &mut [S]) {
        for (o, &x) in out.iter_mut().zip(xs) {
            *o = self.log_shape(x, params);
        }
    }

    /// `log ∫_limits exp(log_shape(x)) dx`.
    fn log_shape_integral<S: Scalar>(&self, params: &[S], limits: (f64, f64)) -> Result<S>;

    /// Draw `n` values on `limits`; accept-reject on the shape by default.
    fn draw(
        &self,
        params: &[f64],
        limits: (f64, f64),
        n: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<f64>> {
        crate::sampling::accept_reject(|x| self.log_shape(x, params), limits, n, rng, &[])
    }
}

fn log_prob_generic<K: ShapeKernel, S: Scalar>(
    kernel: &K,
    xs: &[f64],
    params: &[S],
    norm: (f64, f64),
    out: &mut [S],
) -> Result<()> {
    if params.len() != kernel.arity() {
        return Err(Error::Validation(format!(
            "{} expects {} params, got {}",
            K::KIND,
            kernel.arity(),
            params.len()
        )));
    }
    if out.len() != xs.len() {
        return Err(Error::Validation(format!(
            "{} out length mismatch: expected {}, got {}",
            K::KIND,
            xs.len(),
            out.len()
        )));
    }
    let values: Vec<f64> = params.iter().map(|p| p.value()).collect();
    kernel.check_params(&values)?;

    let log_z = kernel.log_shape_integral(params, norm)?;
    if !log_z.value().is_finite() {
        return Err(Error::Computation(format!(
            "{} normalization is not finite on ({}, {}): log Z = {}",
            K::KIND,
            norm.0,
            norm.1,
            log_z.value()
        )));
    }

    kernel.log_shape_batch(xs, params, out);
    for (o, &x) in out.iter_mut().zip(xs) {
        *o = *o - log_z;
        if o.value().is_nan() {
            return Err(Error::Computation(format!("{} log-density is NaN at x={x}", K::KIND)));
        }
    }
    Ok(())
}

impl<K: ShapeKernel> UnbinnedPdf for K {
    fn kind(&self) -> &'static str {
        K::KIND
    }

    fn n_params(&self) -> usize {
        self.arity()
    }

    fn log_prob_batch(
        &self,
        xs: &[f64],
        params: &[f64],
        norm: (f64, f64),
        out: &mut [f64],
    ) -> Result<()> {
        log_prob_generic(self, xs, params, norm, out)
    }

    fn log_prob_batch_dual(
        &self,
        xs: &[f64],
        params: &[Dual],
        norm: (f64, f64),
        out: &mut [Dual],
    ) -> Result<()> {
        log_prob_generic(self, xs, params, norm, out)
    }

    fn log_integral(&self, params: &[f64], limits: (f64, f64)) -> Result<f64> {
        self.check_params(params)?;
        self.log_shape_integral(params, limits)
    }

    fn sample(
        &self,
        params: &[f64],
        limits: (f64, f64),
        n: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<f64>> {
        self.check_params(params)?;
        self.draw(params, limits, n, rng)
    }
}

/// Scalars a density can be evaluated in.
pub trait PdfScalar: Scalar {
    /// Dispatch to the matching [`UnbinnedPdf`] batch method.
    fn log_prob_batch(
        pdf: &dyn UnbinnedPdf,
        xs: &[f64],
        params: &[Self],
        norm: (f64, f64),
        out: &mut [Self],
    ) -> Result<()>;
}

impl PdfScalar for f64 {
    fn log_prob_batch(
        pdf: &dyn UnbinnedPdf,
        xs: &[f64],
        params: &[f64],
        norm: (f64, f64),
        out: &mut [f64],
    ) -> Result<()> {
        pdf.log_prob_batch(xs, params, norm, out)
    }
}

impl PdfScalar for Dual {
    fn log_prob_batch(
        pdf: &dyn UnbinnedPdf,
        xs: &[f64],
        params: &[Dual],
        norm: (f64, f64),
        out: &mut [Dual],
    ) -> Result<()> {
        pdf.log_prob_batch_dual(xs, params, norm, out)
    }
}

/// Attach a derivative to a value computed in `f64`: returns `value + slope·(p − p.value())`.
///
/// For `f64` this is just `value`; for [`Dual`] the tangent becomes `slope · p.dot`.
#[inline]
pub(crate) fn with_slope<S: Scalar>(value: f64, p: S, slope: f64) -> S {
    S::from_f64(value) + (p - S::from_f64(p.value())) * S::from_f64(slope)
}
