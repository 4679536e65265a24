use crate::pdf::ShapeKernel;
use fk_ad::Scalar;
use fk_core::{Error, Result};

/// Chebyshev polynomial PDF on a fixed domain `[a, b]`.
///
/// The unnormalized shape is:
///
/// `f(x) = 1 + Σ_{k=1..m} c_k T_k(x')`
///
/// where `x'` maps the domain `[a,b]` to `[-1,1]`:
///
/// `x' = (2x - (a+b)) / (b-a)`
///
/// and `T_k` is the Chebyshev polynomial of the first kind. The domain is fixed at
/// construction (usually the observable space), so the shape does not move when the
/// normalization range changes.
///
/// `f(x) > 0` is required on the full domain. A guardrail checks positivity on a fixed
/// grid in `x'` before every evaluation.
#[derive(Debug, Clone)]
pub struct ChebyshevPdf {
    order: usize,
    domain: (f64, f64),
}

impl ChebyshevPdf {
    /// Create a Chebyshev PDF of the given order (number of coefficients `c_1..c_order`).
    pub fn new(order: usize, domain: (f64, f64)) -> Result<Self> {
        if order == 0 {
            return Err(Error::Validation(
                "ChebyshevPdf order must be >= 1 (provide at least one coefficient)".into(),
            ));
        }
        let (a, b) = domain;
        if !a.is_finite() || !b.is_finite() || a >= b {
            return Err(Error::Validation(format!(
                "ChebyshevPdf domain must be finite with low < high, got ({a}, {b})"
            )));
        }
        Ok(Self { order, domain })
    }

    /// Polynomial order.
    pub fn order(&self) -> usize {
        self.order
    }

    #[inline]
    fn xprime(&self, x: f64) -> f64 {
        let (a, b) = self.domain;
        ((2.0 * x - (a + b)) / (b - a)).clamp(-1.0, 1.0)
    }

    /// Fill `out[k] = T_k(xp)` for `k = 0..out.len()`.
    #[inline]
    fn fill_t_values(xp: f64, out: &mut [f64]) {
        let m = out.len();
        if m == 0 {
            return;
        }
        out[0] = 1.0;
        if m == 1 {
            return;
        }
        out[1] = xp;
        // Recurrence: T_{k+1}(x) = 2x T_k(x) - T_{k-1}(x)
        for k in 2..m {
            out[k] = 2.0 * xp * out[k - 1] - out[k - 2];
        }
    }

    /// Antiderivatives `F_k(x') = ∫ T_k(x') dx'` for `k = 0..=order`.
    fn antiderivatives(&self, xp: f64) -> Vec<f64> {
        let mut t = vec![0.0; self.order + 2];
        Self::fill_t_values(xp, &mut t);
        (0..=self.order)
            .map(|k| match k {
                0 => xp,
                1 => 0.5 * xp * xp,
                _ => {
                    let kf = k as f64;
                    t[k + 1] / (2.0 * (kf + 1.0)) - t[k - 1] / (2.0 * (kf - 1.0))
                }
            })
            .collect()
    }

    fn guardrail_check_positive(&self, params: &[f64]) -> Result<()> {
        // Conservative check: evaluate f(x') on a small fixed grid in [-1,1].
        let n_grid = 128usize;
        let mut t = vec![0.0f64; self.order + 1];
        for i in 0..=n_grid {
            let xp = -1.0 + 2.0 * (i as f64) / (n_grid as f64);
            Self::fill_t_values(xp, &mut t);
            let f = 1.0 + params.iter().zip(&t[1..]).map(|(c, tk)| c * tk).sum::<f64>();
            if !f.is_finite() || f <= 0.0 {
                return Err(Error::Validation(format!(
                    "ChebyshevPdf is non-positive on its domain: f(x')={f} at x'={xp}"
                )));
            }
        }
        Ok(())
    }
}

impl ShapeKernel for ChebyshevPdf {
    const KIND: &'static str = "chebyshev";

    fn arity(&self) -> usize {
        self.order
    }

    fn check_params(&self, params: &[f64]) -> Result<()> {
        if params.iter().any(|x| !x.is_finite()) {
            return Err(Error::Validation("ChebyshevPdf params must be finite".into()));
        }
        self.guardrail_check_positive(params)
    }

    fn log_shape<S: Scalar>(&self, x: f64, params: &[S]) -> S {
        let mut t = vec![0.0f64; self.order + 1];
        Self::fill_t_values(self.xprime(x), &mut t);
        let f = S::from_f64(1.0)
            + params.iter().zip(&t[1..]).map(|(&c, &tk)| c * S::from_f64(tk)).sum::<S>();
        f.ln()
    }

    fn log_shape_batch<S: Scalar>(&self, xs: &[f64], params: &[S], out: &mut [S]) {
        let mut t = vec![0.0f64; self.order + 1];
        for (o, &x) in out.iter_mut().zip(xs) {
            Self::fill_t_values(self.xprime(x), &mut t);
            let f = S::from_f64(1.0)
                + params.iter().zip(&t[1..]).map(|(&c, &tk)| c * S::from_f64(tk)).sum::<S>();
            *o = f.ln();
        }
    }

    fn log_shape_integral<S: Scalar>(&self, params: &[S], limits: (f64, f64)) -> Result<S> {
        let (a, b) = self.domain;
        let lo = self.antiderivatives(self.xprime(limits.0));
        let hi = self.antiderivatives(self.xprime(limits.1));

        // dx = (b-a)/2 dx'
        let half_w = 0.5 * (b - a);
        let mut i = S::from_f64(half_w * (hi[0] - lo[0]));
        for (k, &c) in params.iter().enumerate() {
            i = i + c * S::from_f64(half_w * (hi[k + 1] - lo[k + 1]));
        }
        if !i.value().is_finite() || i.value() <= 0.0 {
            return Err(Error::Computation(format!(
                "ChebyshevPdf normalization integral is not finite/positive: {}",
                i.value()
            )));
        }
        Ok(i.ln())
    }
}
