//! Core traits for FitKit
//!
//! Likelihood construction and minimization only meet through
//! [`LogDensityModel`]: `fk-unbinned` implements it, `fk-inference` consumes it.

use crate::Result;
use serde::{Deserialize, Serialize};

/// Where objective gradients come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradientSource {
    /// Central finite differences of the objective.
    Numerical,
    /// Forward-mode automatic differentiation through the density code.
    #[default]
    Automatic,
}

impl std::fmt::Display for GradientSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GradientSource::Numerical => f.write_str("numerical"),
            GradientSource::Automatic => f.write_str("automatic"),
        }
    }
}

/// Relative step for central differences: `cbrt(machine epsilon)`.
pub const CENTRAL_DIFF_STEP: f64 = 6.055_454_452_393_343e-6;

/// A negative log-likelihood over a flat vector of free parameters.
pub trait LogDensityModel: Send + Sync {
    /// Number of free parameters.
    fn dim(&self) -> usize;

    /// Parameter names (stable order, length `dim()`).
    fn parameter_names(&self) -> Vec<String>;

    /// Parameter bounds `(low, high)`; unbounded sides are infinite.
    fn parameter_bounds(&self) -> Vec<(f64, f64)>;

    /// Suggested starting point.
    fn parameter_init(&self) -> Vec<f64>;

    /// Evaluate `-log L(params)`.
    fn nll(&self, params: &[f64]) -> Result<f64>;

    /// Gradient of [`nll`](Self::nll) (central differences unless overridden).
    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
        central_difference_gradient(params, |p| self.nll(p))
    }

    /// How [`grad_nll`](Self::grad_nll) is computed; drives the Hessian strategy.
    fn gradient_source(&self) -> GradientSource {
        GradientSource::Numerical
    }
}

/// Central-difference gradient with a step scaled to each coordinate.
pub fn central_difference_gradient<F>(params: &[f64], f: F) -> Result<Vec<f64>>
where
    F: Fn(&[f64]) -> Result<f64>,
{
    let n = params.len();
    let mut grad = vec![0.0; n];
    let mut work = params.to_vec();

    for i in 0..n {
        let eps = CENTRAL_DIFF_STEP * params[i].abs().max(1.0);

        work[i] = params[i] + eps;
        let f_plus = f(&work)?;
        work[i] = params[i] - eps;
        let f_minus = f(&work)?;
        work[i] = params[i];

        grad[i] = (f_plus - f_minus) / (2.0 * eps);
    }

    Ok(grad)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Paraboloid;

    impl LogDensityModel for Paraboloid {
        fn dim(&self) -> usize {
            2
        }

        fn parameter_names(&self) -> Vec<String> {
            vec!["x".into(), "y".into()]
        }

        fn parameter_bounds(&self) -> Vec<(f64, f64)> {
            vec![(f64::NEG_INFINITY, f64::INFINITY); 2]
        }

        fn parameter_init(&self) -> Vec<f64> {
            vec![0.0, 0.0]
        }

        fn nll(&self, params: &[f64]) -> Result<f64> {
            Ok((params[0] - 1.0).powi(2) + 3.0 * (params[1] + 2.0).powi(2))
        }
    }

    #[test]
    fn test_default_gradient_is_central_difference() {
        let g = Paraboloid.grad_nll(&[0.5, 0.0]).unwrap();
        assert!((g[0] - (-1.0)).abs() < 1e-6, "{g:?}");
        assert!((g[1] - 12.0).abs() < 1e-6, "{g:?}");
        assert_eq!(Paraboloid.gradient_source(), GradientSource::Numerical);
    }

    #[test]
    fn test_gradient_source_serde_names() {
        let g: GradientSource = serde_json::from_str("\"automatic\"").unwrap();
        assert_eq!(g, GradientSource::Automatic);
        assert_eq!(GradientSource::Numerical.to_string(), "numerical");
    }
}
