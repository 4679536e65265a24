//! Small numerically-stable math utilities used across probability code.

use fk_ad::Scalar;

/// Stable `log(Σ exp(xᵢ))`, generic over the evaluation scalar.
///
/// Returns `-inf` for an empty slice or when every term is `-inf`.
pub fn logsumexp<S: Scalar>(xs: &[S]) -> S {
    let Some(&first) = xs.first() else {
        return S::from_f64(f64::NEG_INFINITY);
    };
    let m = xs.iter().skip(1).fold(first, |acc, &x| acc.max_s(x));
    if !m.value().is_finite() {
        return m;
    }
    let s: S = xs.iter().map(|&x| (x - m).exp()).sum();
    m + s.ln()
}

/// Stable `log(exp(a) - exp(b))` for `a >= b`.
///
/// Returns `-inf` when `a == b`, `NaN` when `a < b`.
#[inline]
pub fn log_diff_exp(a: f64, b: f64) -> f64 {
    if b == f64::NEG_INFINITY {
        return a;
    }
    if a < b {
        return f64::NAN;
    }
    a + (-(b - a).exp_m1()).ln()
}

/// Exponential with a conservative clamp to avoid overflow and underflow to zero.
///
/// Keeps extended-likelihood yields strictly positive so `ln ν` stays finite during
/// line searches.
#[inline]
pub fn exp_clamped(x: f64) -> f64 {
    x.clamp(-700.0, 700.0).exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use fk_ad::Dual;

    #[test]
    fn test_logsumexp_matches_naive() {
        let xs = [-1.0, 0.5, 2.0];
        let naive: f64 = xs.iter().map(|x: &f64| x.exp()).sum::<f64>().ln();
        assert_relative_eq!(logsumexp(&xs), naive, epsilon = 1e-14);
    }

    #[test]
    fn test_logsumexp_large_values_finite() {
        let v = logsumexp(&[1000.0, 1000.0]);
        assert_relative_eq!(v, 1000.0 + 2.0_f64.ln(), epsilon = 1e-12);
        assert_eq!(logsumexp::<f64>(&[]), f64::NEG_INFINITY);
        assert_eq!(logsumexp(&[f64::NEG_INFINITY, f64::NEG_INFINITY]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_logsumexp_dual_gradient_is_softmax() {
        // d/dx0 log(e^x0 + e^x1) = softmax_0
        let xs = [Dual::var(0.3), Dual::constant(-0.4)];
        let v = logsumexp(&xs);
        let soft0 = 0.3_f64.exp() / (0.3_f64.exp() + (-0.4_f64).exp());
        assert_relative_eq!(v.dot, soft0, epsilon = 1e-12);
    }

    #[test]
    fn test_log_diff_exp() {
        let v = log_diff_exp(2.0, 1.0);
        assert_relative_eq!(v, (2.0_f64.exp() - 1.0_f64.exp()).ln(), epsilon = 1e-12);
        assert_eq!(log_diff_exp(1.0, 1.0), f64::NEG_INFINITY);
        assert_eq!(log_diff_exp(1.0, f64::NEG_INFINITY), 1.0);
        assert!(log_diff_exp(0.0, 1.0).is_nan());
    }

    #[test]
    fn test_exp_clamped_is_finite_extremes() {
        for x in [-1e6, -100.0, 100.0, 1e6] {
            let y = exp_clamped(x);
            assert!(y.is_finite() && y > 0.0, "x={x} produced {y}");
        }
    }
}
