use crate::pdf::ShapeKernel;
use fk_ad::Scalar;
use fk_core::{Error, Result};
use fk_prob::normal::std_interval_mass;
use rand::RngCore;

/// `√(2π)`
const SQRT_2PI: f64 = 2.506_628_274_631_000_7;

/// Crystal Ball line shape: Gaussian core with a power-law low-side tail.
///
/// With `t = (x − μ)/σ`:
///
/// - `t > −α`: `f = exp(−t²/2)`
/// - `t ≤ −α`: `f = A (B − t)^{−n}`, `A = (n/α)^n exp(−α²/2)`, `B = n/α − α`
///
/// Shape parameters: `[mu, sigma, alpha, n]` with `sigma, alpha, n > 0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrystalBallPdf;

impl CrystalBallPdf {
    /// `(ln A, B)` of the tail.
    #[inline]
    fn tail_constants<S: Scalar>(alpha: S, n: S) -> (S, S) {
        let n_over_a = n / alpha;
        let log_a = n * n_over_a.ln() - S::from_f64(0.5) * alpha * alpha;
        (log_a, n_over_a - alpha)
    }
}

impl ShapeKernel for CrystalBallPdf {
    const KIND: &'static str = "crystal_ball";

    fn arity(&self) -> usize {
        4
    }

    fn check_params(&self, params: &[f64]) -> Result<()> {
        let (mu, sigma, alpha, n) = (params[0], params[1], params[2], params[3]);
        if !mu.is_finite() || !(sigma.is_finite() && sigma > 0.0) {
            return Err(Error::Validation(format!(
                "CrystalBallPdf requires finite mu and sigma > 0, got mu={mu}, sigma={sigma}"
            )));
        }
        if !(alpha.is_finite() && alpha > 0.0) || !(n.is_finite() && n > 0.0) {
            return Err(Error::Validation(format!(
                "CrystalBallPdf requires alpha > 0 and n > 0, got alpha={alpha}, n={n}"
            )));
        }
        Ok(())
    }

    fn log_shape<S: Scalar>(&self, x: f64, params: &[S]) -> S {
        let (mu, sigma, alpha, n) = (params[0], params[1], params[2], params[3]);
        let t = (S::from_f64(x) - mu) / sigma;
        if t.value() > -alpha.value() {
            S::from_f64(-0.5) * t * t
        } else {
            let (log_a, b) = Self::tail_constants(alpha, n);
            log_a - n * (b - t).ln()
        }
    }

    fn log_shape_integral<S: Scalar>(&self, params: &[S], limits: (f64, f64)) -> Result<S> {
        let (mu, sigma, alpha, n) = (params[0], params[1], params[2], params[3]);
        let t1 = (S::from_f64(limits.0) - mu) / sigma;
        let t2 = (S::from_f64(limits.1) - mu) / sigma;
        let thr = -alpha;

        let mut total = S::from_f64(0.0);

        // Gaussian core on [max(t1, −α), t2].
        if t2.value() > thr.value() {
            let lo = if t1.value() > thr.value() { t1 } else { thr };
            total = total + S::from_f64(SQRT_2PI) * std_interval_mass(lo, t2);
        }

        // Power-law tail on [t1, min(t2, −α)].
        if t1.value() < thr.value() {
            let hi = if t2.value() < thr.value() { t2 } else { thr };
            let (log_a, b) = Self::tail_constants(alpha, n);
            let one = S::from_f64(1.0);
            let tail = if (n.value() - 1.0).abs() < 1e-9 {
                log_a.exp() * ((b - t1).ln() - (b - hi).ln())
            } else {
                // ∫ (B − t)^{−n} dt = (B − t)^{1−n} / (n − 1)
                let p = one - n;
                ((log_a + p * (b - hi).ln()).exp() - (log_a + p * (b - t1).ln()).exp()) / (n - one)
            };
            total = total + tail;
        }

        if !total.value().is_finite() || total.value() <= 0.0 {
            return Err(Error::Computation(format!(
                "CrystalBallPdf normalization integral is not finite/positive: {}",
                total.value()
            )));
        }
        Ok(sigma.ln() + total.ln())
    }

    fn draw(
        &self,
        params: &[f64],
        limits: (f64, f64),
        n: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<f64>> {
        crate::sampling::accept_reject(|x| self.log_shape(x, params), limits, n, rng, &[params[0]])
    }
}
