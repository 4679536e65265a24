//! Forward-mode automatic differentiation via dual numbers.
//!
//! A [`Dual`] carries a value and its derivative along one seeded direction. Seeding
//! parameter `j` with `dot = 1` (all others `0`) and evaluating an objective yields
//! `∂f/∂θ_j` in `dot`.

use statrs::function::erf;
use std::iter::Sum;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// `2 / sqrt(π)`, the derivative scale of `erf`.
const TWO_OVER_SQRT_PI: f64 = 1.128_379_167_095_512_6;

/// A dual number for forward-mode AD.
///
/// `val` holds the primal value, `dot` holds the derivative.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Dual {
    /// Primal (function) value.
    pub val: f64,
    /// Tangent (derivative) value.
    pub dot: f64,
}

impl Dual {
    /// Create a constant (derivative = 0).
    #[inline]
    pub fn constant(val: f64) -> Self {
        Self { val, dot: 0.0 }
    }

    /// Create an independent variable (derivative = 1).
    #[inline]
    pub fn var(val: f64) -> Self {
        Self { val, dot: 1.0 }
    }

    /// Create a dual with explicit tangent.
    #[inline]
    pub fn new(val: f64, dot: f64) -> Self {
        Self { val, dot }
    }

    /// Seed a whole parameter vector along coordinate `direction`.
    pub fn seed(values: &[f64], direction: usize) -> Vec<Dual> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| if i == direction { Dual::var(v) } else { Dual::constant(v) })
            .collect()
    }

    /// Natural logarithm: d/dx ln(x) = 1/x.
    #[inline]
    pub fn ln(self) -> Self {
        Self { val: self.val.ln(), dot: self.dot / self.val }
    }

    /// Exponential: d/dx exp(x) = exp(x).
    #[inline]
    pub fn exp(self) -> Self {
        let e = self.val.exp();
        Self { val: e, dot: self.dot * e }
    }

    /// Power with f64 exponent: d/dx x^n = n * x^(n-1).
    #[inline]
    pub fn powf(self, n: f64) -> Self {
        Self { val: self.val.powf(n), dot: self.dot * n * self.val.powf(n - 1.0) }
    }

    /// Integer power: d/dx x^n = n * x^(n-1).
    #[inline]
    pub fn powi(self, n: i32) -> Self {
        Self { val: self.val.powi(n), dot: self.dot * (n as f64) * self.val.powi(n - 1) }
    }

    /// Square root: d/dx sqrt(x) = 1/(2*sqrt(x)).
    #[inline]
    pub fn sqrt(self) -> Self {
        let s = self.val.sqrt();
        Self { val: s, dot: self.dot / (2.0 * s) }
    }

    /// Absolute value: d/dx |x| = sign(x).
    #[inline]
    pub fn abs(self) -> Self {
        Self { val: self.val.abs(), dot: self.dot * self.val.signum() }
    }

    /// Error function: d/dx erf(x) = 2/sqrt(π) exp(-x²).
    #[inline]
    pub fn erf(self) -> Self {
        let d = TWO_OVER_SQRT_PI * (-self.val * self.val).exp();
        Self { val: erf::erf(self.val), dot: self.dot * d }
    }

    /// Complementary error function: d/dx erfc(x) = -2/sqrt(π) exp(-x²).
    #[inline]
    pub fn erfc(self) -> Self {
        let d = -TWO_OVER_SQRT_PI * (-self.val * self.val).exp();
        Self { val: erf::erfc(self.val), dot: self.dot * d }
    }
}

// --- Arithmetic: Dual op Dual ---

impl Add for Dual {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self { val: self.val + rhs.val, dot: self.dot + rhs.dot }
    }
}

impl Sub for Dual {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self { val: self.val - rhs.val, dot: self.dot - rhs.dot }
    }
}

impl Mul for Dual {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        Self { val: self.val * rhs.val, dot: self.dot * rhs.val + self.val * rhs.dot }
    }
}

impl Div for Dual {
    type Output = Self;
    #[inline]
    fn div(self, rhs: Self) -> Self {
        Self {
            val: self.val / rhs.val,
            dot: (self.dot * rhs.val - self.val * rhs.dot) / (rhs.val * rhs.val),
        }
    }
}

impl Neg for Dual {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Self { val: -self.val, dot: -self.dot }
    }
}

// --- Sum ---

impl Sum for Dual {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Dual::constant(0.0), |acc, x| acc + x)
    }
}

// --- From ---

impl From<f64> for Dual {
    fn from(val: f64) -> Self {
        Self::constant(val)
    }
}

// --- PartialOrd ---

impl PartialOrd for Dual {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.val.partial_cmp(&other.val)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_constant_has_zero_derivative() {
        let c = Dual::constant(5.0);
        assert_eq!(c.val, 5.0);
        assert_eq!(c.dot, 0.0);
    }

    #[test]
    fn test_seed_marks_single_direction() {
        let d = Dual::seed(&[1.0, 2.0, 3.0], 1);
        assert_eq!(d.iter().map(|x| x.dot).collect::<Vec<_>>(), vec![0.0, 1.0, 0.0]);
        assert_eq!(d[2].val, 3.0);
    }

    #[test]
    fn test_ln_exp_derivatives() {
        let y = Dual::var(2.0).ln();
        assert_relative_eq!(y.dot, 0.5, epsilon = 1e-15);

        let y = Dual::var(1.0).exp();
        assert_relative_eq!(y.dot, 1.0_f64.exp(), epsilon = 1e-15);
    }

    #[test]
    fn test_quotient_rule() {
        // d/dx x / (1 + x) = 1 / (1 + x)^2
        let x = Dual::var(3.0);
        let y = x / (Dual::constant(1.0) + x);
        assert_relative_eq!(y.dot, 1.0 / 16.0, epsilon = 1e-15);
    }

    #[test]
    fn test_erf_matches_finite_difference() {
        for &x0 in &[-2.0, -0.3, 0.0, 0.7, 2.5] {
            let h = 1e-6;
            let fd = (erf::erf(x0 + h) - erf::erf(x0 - h)) / (2.0 * h);
            assert_relative_eq!(Dual::var(x0).erf().dot, fd, epsilon = 1e-8);

            let fd_c = (erf::erfc(x0 + h) - erf::erfc(x0 - h)) / (2.0 * h);
            assert_relative_eq!(Dual::var(x0).erfc().dot, fd_c, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_sqrt_and_powf() {
        let x = Dual::var(4.0);
        assert_relative_eq!(x.sqrt().dot, 0.25, epsilon = 1e-15);
        assert_relative_eq!(x.powf(1.5).dot, 1.5 * 2.0, epsilon = 1e-12);
    }
}
