use crate::pdf::{ShapeKernel, with_slope};
use fk_ad::Scalar;
use fk_core::{Error, Result};
use fk_prob::math::log_diff_exp;
use rand::{Rng, RngCore};

/// Below this `|λ|` the shape is treated as uniform.
const UNIFORM_LIMIT: f64 = 1e-12;

/// Exponential-family PDF `p(x) ∝ exp(λ x)` normalized on the requested range.
///
/// Unlike the "rate-parameter exponential", `λ` may be any real number.
///
/// Shape parameters: `[lambda]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExponentialPdf;

impl ShapeKernel for ExponentialPdf {
    const KIND: &'static str = "exponential";

    fn arity(&self) -> usize {
        1
    }

    fn check_params(&self, params: &[f64]) -> Result<()> {
        if !params[0].is_finite() {
            return Err(Error::Validation(format!(
                "ExponentialPdf parameter must be finite, got lambda={}",
                params[0]
            )));
        }
        Ok(())
    }

    #[inline]
    fn log_shape<S: Scalar>(&self, x: f64, params: &[S]) -> S {
        params[0] * S::from_f64(x)
    }

    fn log_shape_integral<S: Scalar>(&self, params: &[S], limits: (f64, f64)) -> Result<S> {
        let lambda = params[0];
        let (log_z, ex) = logz_and_ex(lambda.value(), limits.0, limits.1)?;
        // d/dλ log Z = E[x]
        Ok(with_slope(log_z, lambda, ex))
    }

    fn draw(
        &self,
        params: &[f64],
        limits: (f64, f64),
        n: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<f64>> {
        let lambda = params[0];
        let (a, b) = limits;
        let w = b - a;
        let draw_one = |u: f64| -> f64 {
            let x = if lambda.abs() < UNIFORM_LIMIT {
                a + u * w
            } else if lambda < 0.0 {
                a + (u * (lambda * w).exp_m1()).ln_1p() / lambda
            } else {
                // Anchor at the upper edge so exp(λw) never overflows.
                b + (-(1.0 - u) * -(-lambda * w).exp_m1()).ln_1p() / lambda
            };
            x.clamp(a, b)
        };
        Ok((0..n).map(|_| draw_one(rng.gen_range(0.0..1.0))).collect())
    }
}

/// Return `(logZ, E[x])` for the bounded exponential family `p(x) ∝ exp(λ x)` on `[a,b]`.
fn logz_and_ex(lambda: f64, a: f64, b: f64) -> Result<(f64, f64)> {
    let w = b - a;
    if !(w.is_finite() && w > 0.0) {
        return Err(Error::Validation(format!("invalid limits for ExponentialPdf: ({a}, {b})")));
    }

    // Small-λ limit: uniform on [a,b] to first order in λ.
    if lambda.abs() < UNIFORM_LIMIT {
        let mid = 0.5 * (a + b);
        return Ok((w.ln() + lambda * mid, mid));
    }

    let t_a = lambda * a;
    let t_b = lambda * b;
    let (hi_t, lo_t) = if t_b >= t_a { (t_b, t_a) } else { (t_a, t_b) };
    let log_z = log_diff_exp(hi_t, lo_t) - lambda.abs().ln();

    // E[x] = (x_hi - x_lo*r)/(1-r) - 1/λ, where r = exp(lo-hi).
    let (x_hi, x_lo, r) =
        if t_b >= t_a { (b, a, (t_a - t_b).exp()) } else { (a, b, (t_b - t_a).exp()) };
    let denom = 1.0 - r;
    if denom <= 0.0 {
        return Ok((w.ln(), 0.5 * (a + b)));
    }
    let ex = (x_hi - x_lo * r) / denom - 1.0 / lambda;

    Ok((log_z, ex))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::UnbinnedPdf;
    use approx::assert_relative_eq;
    use fk_ad::Dual;
    use rand::SeedableRng;

    #[test]
    fn test_log_z_matches_closed_form() {
        let (lz, _) = logz_and_ex(-0.01, 700.0, 1000.0).unwrap();
        let z = ((-0.01f64 * 1000.0).exp() - (-0.01f64 * 700.0).exp()) / -0.01;
        assert_relative_eq!(lz, z.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_small_lambda_is_uniform() {
        let mut out = [0.0; 2];
        ExponentialPdf.log_prob_batch(&[0.0, 4.0], &[0.0], (0.0, 4.0), &mut out).unwrap();
        assert_relative_eq!(out[0], -(4.0f64).ln(), epsilon = 1e-12);
        assert_relative_eq!(out[1], -(4.0f64).ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_dual_gradient_is_x_minus_mean() {
        let norm = (700.0, 1000.0);
        let mut out = [Dual::default()];
        ExponentialPdf.log_prob_batch_dual(&[800.0], &[Dual::var(-0.01)], norm, &mut out).unwrap();
        let (_, ex) = logz_and_ex(-0.01, norm.0, norm.1).unwrap();
        assert_relative_eq!(out[0].dot, 800.0 - ex, epsilon = 1e-9);
    }

    #[test]
    fn test_large_positive_lambda_sampling_is_finite() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let xs = ExponentialPdf.sample(&[5.0], (0.0, 1000.0), 200, &mut rng).unwrap();
        assert!(xs.iter().all(|x| x.is_finite() && (0.0..=1000.0).contains(x)));
        assert!(xs.iter().all(|&x| x > 990.0));
    }

    #[test]
    fn test_sample_mean_matches_expectation() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        let xs = ExponentialPdf.sample(&[-0.01], (700.0, 1000.0), 20_000, &mut rng).unwrap();
        let mean = xs.iter().sum::<f64>() / xs.len() as f64;
        let (_, ex) = logz_and_ex(-0.01, 700.0, 1000.0).unwrap();
        assert!((mean - ex).abs() < 2.0, "mean={mean}, E[x]={ex}");
    }
}
