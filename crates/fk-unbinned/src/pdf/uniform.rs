use crate::pdf::ShapeKernel;
use fk_ad::Scalar;
use fk_core::{Error, Result};
use rand::{Rng, RngCore};

/// Flat density on the requested range. No shape parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformPdf;

impl ShapeKernel for UniformPdf {
    const KIND: &'static str = "uniform";

    fn arity(&self) -> usize {
        0
    }

    #[inline]
    fn log_shape<S: Scalar>(&self, _x: f64, _params: &[S]) -> S {
        S::from_f64(0.0)
    }

    fn log_shape_integral<S: Scalar>(&self, _params: &[S], limits: (f64, f64)) -> Result<S> {
        let w = limits.1 - limits.0;
        if !(w.is_finite() && w > 0.0) {
            return Err(Error::Validation(format!(
                "invalid limits for UniformPdf: ({}, {})",
                limits.0, limits.1
            )));
        }
        Ok(S::from_f64(w.ln()))
    }

    fn draw(
        &self,
        _params: &[f64],
        limits: (f64, f64),
        n: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<f64>> {
        Ok((0..n).map(|_| rng.gen_range(limits.0..limits.1)).collect())
    }
}
