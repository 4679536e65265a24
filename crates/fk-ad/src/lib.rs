//! # fk-ad
//!
//! Automatic differentiation (AD) primitives for FitKit.
//!
//! Provides:
//! - **Forward-mode AD** via [`dual::Dual`] numbers (one pass per parameter, which is the
//!   right trade-off for the handful of shape parameters a density carries)
//! - [`scalar::Scalar`] trait for writing density code once over `f64` and `Dual`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dual;
pub mod scalar;

pub use dual::Dual;
pub use scalar::Scalar;
