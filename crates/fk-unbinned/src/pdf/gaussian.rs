use crate::pdf::ShapeKernel;
use fk_ad::Scalar;
use fk_core::{Error, Result};
use fk_prob::normal::{LN_SQRT_2PI, std_interval_mass, truncated_inverse_cdf};
use rand::{Rng, RngCore};

/// Truncated Gaussian `N(μ, σ)` normalized on the requested range.
///
/// Shape parameters: `[mu, sigma]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GaussianPdf;

impl ShapeKernel for GaussianPdf {
    const KIND: &'static str = "gaussian";

    fn arity(&self) -> usize {
        2
    }

    fn check_params(&self, params: &[f64]) -> Result<()> {
        let (mu, sigma) = (params[0], params[1]);
        if !mu.is_finite() || !sigma.is_finite() || sigma <= 0.0 {
            return Err(Error::Validation(format!(
                "GaussianPdf parameters must be finite with sigma > 0, got mu={mu}, sigma={sigma}"
            )));
        }
        Ok(())
    }

    #[inline]
    fn log_shape<S: Scalar>(&self, x: f64, params: &[S]) -> S {
        let z = (S::from_f64(x) - params[0]) / params[1];
        S::from_f64(-0.5) * z * z
    }

    fn log_shape_integral<S: Scalar>(&self, params: &[S], limits: (f64, f64)) -> Result<S> {
        let (mu, sigma) = (params[0], params[1]);
        let z_a = (S::from_f64(limits.0) - mu) / sigma;
        let z_b = (S::from_f64(limits.1) - mu) / sigma;

        // Z = σ √(2π) [Φ(z_b) − Φ(z_a)]
        let mut mass = std_interval_mass(z_a, z_b);
        if !mass.value().is_finite() || mass.value() <= 0.0 {
            // Extreme truncation: keep the cost finite.
            mass = S::from_f64(f64::MIN_POSITIVE);
        }
        Ok(sigma.ln() + S::from_f64(LN_SQRT_2PI) + mass.ln())
    }

    fn draw(
        &self,
        params: &[f64],
        limits: (f64, f64),
        n: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<f64>> {
        let (mu, sigma) = (params[0], params[1]);
        Ok((0..n)
            .map(|_| truncated_inverse_cdf(rng.gen_range(0.0..1.0), mu, sigma, limits.0, limits.1))
            .collect())
    }
}
