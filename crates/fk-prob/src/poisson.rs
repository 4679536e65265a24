//! Poisson helpers for extended likelihoods.

use fk_ad::Scalar;

/// Extended-likelihood term `ν − n ln ν` (the Poisson log-probability up to `ln n!`).
///
/// `n` is the observed (possibly weighted) event count.
#[inline]
pub fn extended_term<S: Scalar>(nu: S, n: f64) -> S {
    if n == 0.0 {
        return nu;
    }
    nu - S::from_f64(n) * nu.ln()
}

/// Full Poisson log-probability `n ln ν − ν − ln Γ(n+1)`.
pub fn logpmf(n: f64, nu: f64) -> f64 {
    if n == 0.0 {
        return -nu;
    }
    n * nu.ln() - nu - statrs::function::gamma::ln_gamma(n + 1.0)
}
