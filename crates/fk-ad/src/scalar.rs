//! [`Scalar`] trait: abstraction over `f64` and [`Dual`](crate::dual::Dual)
//! that lets density and NLL code be written once, then reused
//! for both evaluation **and** forward-mode gradient computation.

use crate::dual::Dual;
use statrs::function::erf;
use std::iter::Sum;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// A scalar type suitable for likelihood computation.
///
/// Implemented for `f64` (plain evaluation) and `Dual` (forward-mode AD).
pub trait Scalar:
    Copy
    + Send
    + Sync
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + Sum
    + PartialOrd
    + Sized
{
    /// Wrap an `f64` constant (derivative = 0 for AD types).
    fn from_f64(v: f64) -> Self;

    /// Extract the primal (function) value.
    fn value(&self) -> f64;

    /// Natural logarithm.
    fn ln(self) -> Self;

    /// Exponential.
    fn exp(self) -> Self;

    /// Power with f64 exponent.
    fn powf(self, n: f64) -> Self;

    /// Integer power.
    fn powi(self, n: i32) -> Self;

    /// Square root.
    fn sqrt(self) -> Self;

    /// Absolute value.
    fn abs(self) -> Self;

    /// Error function.
    fn erf(self) -> Self;

    /// Complementary error function.
    fn erfc(self) -> Self;

    /// Larger of two values by primal value; the winner keeps its derivative.
    fn max_s(self, other: Self) -> Self;
}

// --- f64 implementation ---

impl Scalar for f64 {
    #[inline]
    fn from_f64(v: f64) -> Self {
        v
    }

    #[inline]
    fn value(&self) -> f64 {
        *self
    }

    #[inline]
    fn ln(self) -> Self {
        f64::ln(self)
    }

    #[inline]
    fn exp(self) -> Self {
        f64::exp(self)
    }

    #[inline]
    fn powf(self, n: f64) -> Self {
        f64::powf(self, n)
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        f64::powi(self, n)
    }

    #[inline]
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }

    #[inline]
    fn abs(self) -> Self {
        f64::abs(self)
    }

    #[inline]
    fn erf(self) -> Self {
        erf::erf(self)
    }

    #[inline]
    fn erfc(self) -> Self {
        erf::erfc(self)
    }

    #[inline]
    fn max_s(self, other: Self) -> Self {
        f64::max(self, other)
    }
}

// --- Dual implementation ---

impl Scalar for Dual {
    #[inline]
    fn from_f64(v: f64) -> Self {
        Dual::constant(v)
    }

    #[inline]
    fn value(&self) -> f64 {
        self.val
    }

    #[inline]
    fn ln(self) -> Self {
        Dual::ln(self)
    }

    #[inline]
    fn exp(self) -> Self {
        Dual::exp(self)
    }

    #[inline]
    fn powf(self, n: f64) -> Self {
        Dual::powf(self, n)
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        Dual::powi(self, n)
    }

    #[inline]
    fn sqrt(self) -> Self {
        Dual::sqrt(self)
    }

    #[inline]
    fn abs(self) -> Self {
        Dual::abs(self)
    }

    #[inline]
    fn erf(self) -> Self {
        Dual::erf(self)
    }

    #[inline]
    fn erfc(self) -> Self {
        Dual::erfc(self)
    }

    #[inline]
    fn max_s(self, other: Self) -> Self {
        if self.val >= other.val { self } else { other }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Extended Poisson term `ν - n ln ν`.
    fn poisson_term<S: Scalar>(n: f64, nu: S) -> S {
        nu - S::from_f64(n) * nu.ln()
    }

    #[test]
    fn test_scalar_f64_poisson() {
        let v = poisson_term::<f64>(10.0, 12.0);
        assert_relative_eq!(v, 12.0 - 10.0 * 12.0_f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_scalar_dual_poisson_gradient() {
        // d/dν [ν - n ln ν] = 1 - n/ν
        let v = poisson_term(10.0, Dual::var(12.0));
        assert_relative_eq!(v.dot, 1.0 - 10.0 / 12.0, epsilon = 1e-12);
    }

    #[test]
    fn test_scalar_generic_code_works_for_both() {
        fn std_normal_cdf<S: Scalar>(z: S) -> S {
            S::from_f64(0.5) * (S::from_f64(1.0) + (z / S::from_f64(std::f64::consts::SQRT_2)).erf())
        }

        let val: f64 = std_normal_cdf(0.0);
        assert_relative_eq!(val, 0.5, epsilon = 1e-15);

        // d/dz Φ(z) at 0 is φ(0) = 1/sqrt(2π)
        let d = std_normal_cdf(Dual::var(0.0));
        assert_relative_eq!(d.dot, 1.0 / (2.0 * std::f64::consts::PI).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_max_s_keeps_winner_tangent() {
        assert_eq!(Scalar::max_s(2.0_f64, -1.0), 2.0);
        let a = Dual::new(1.0, 3.0);
        let b = Dual::new(4.0, -2.0);
        let m = a.max_s(b);
        assert_eq!((m.val, m.dot), (4.0, -2.0));
    }
}
