//! Normal distribution utilities.
//!
//! The standard-normal helpers are generic over [`Scalar`] so truncated-Gaussian
//! normalizations differentiate through the same code that evaluates them.

use fk_ad::Scalar;
use fk_core::{Error, Result};
use statrs::function::erf;
use std::f64::consts::{FRAC_1_SQRT_2, SQRT_2};

/// Natural log of `sqrt(2π)`.
pub const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_7;

/// Log-PDF of a Normal distribution `N(mu, sigma)` at `x`.
///
/// `log p(x) = -0.5 * ((x-mu)/sigma)^2 - ln(sigma) - ln(sqrt(2π))`
pub fn logpdf(x: f64, mu: f64, sigma: f64) -> Result<f64> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(Error::Validation(format!("sigma must be finite and > 0, got {}", sigma)));
    }
    let z = (x - mu) / sigma;
    Ok(-0.5 * z * z - sigma.ln() - LN_SQRT_2PI)
}

/// Standard-normal log density at `z`.
#[inline]
pub fn std_logpdf<S: Scalar>(z: S) -> S {
    S::from_f64(-0.5) * z * z - S::from_f64(LN_SQRT_2PI)
}

/// Standard-normal CDF `Φ(z)`.
#[inline]
pub fn std_cdf<S: Scalar>(z: S) -> S {
    S::from_f64(0.5) * (-z * S::from_f64(FRAC_1_SQRT_2)).erfc()
}

/// Probability mass `Φ(z_b) − Φ(z_a)` of the interval `[z_a, z_b]`.
///
/// Uses `erfc` in the tails so masses far from the mode do not cancel to zero.
pub fn std_interval_mass<S: Scalar>(z_a: S, z_b: S) -> S {
    let half = S::from_f64(0.5);
    let k = S::from_f64(FRAC_1_SQRT_2);
    if z_a.value() >= 0.0 {
        half * ((z_a * k).erfc() - (z_b * k).erfc())
    } else if z_b.value() <= 0.0 {
        half * ((-z_b * k).erfc() - (-z_a * k).erfc())
    } else {
        half * ((z_b * k).erf() - (z_a * k).erf())
    }
}

/// Standard-normal quantile `Φ⁻¹(p)` for `p ∈ (0, 1)`.
pub fn std_quantile(p: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    if p < 0.5 {
        -SQRT_2 * erf::erfc_inv(2.0 * p)
    } else {
        SQRT_2 * erf::erf_inv(2.0 * p - 1.0)
    }
}

/// Draw from `N(mu, sigma)` truncated to `[a, b]` by inverting the CDF at `u ∈ [0, 1)`.
///
/// Inversion runs from the tail nearest to the interval so the mapping stays accurate
/// when `[a, b]` sits far from `mu`.
pub fn truncated_inverse_cdf(u: f64, mu: f64, sigma: f64, a: f64, b: f64) -> f64 {
    let z_a = (a - mu) / sigma;
    let z_b = (b - mu) / sigma;
    let z = if z_a >= 0.0 {
        // Upper tail: work with survival functions Q(z) = Φ(−z).
        let q_a = std_cdf(-z_a);
        let q_b = std_cdf(-z_b);
        -std_quantile(q_a - u * (q_a - q_b))
    } else {
        let p_a = std_cdf(z_a);
        let p_b = std_cdf(z_b);
        std_quantile(p_a + u * (p_b - p_a))
    };
    (mu + sigma * z).clamp(a, b)
}
