//! # fk-inference
//!
//! Maximum-likelihood inference for FitKit.
//!
//! This crate provides:
//! - A bounded L-BFGS optimizer over any [`fk_core::LogDensityModel`] ([`optimizer`]).
//! - [`Minimizer`]: fits of [`fk_unbinned::UnbinnedNll`] objectives that write the best
//!   values back into the parameter registry.
//! - [`FitResult`]: Hessian errors, covariance and profile-likelihood errors.
//! - Profile likelihood scans ([`profile_likelihood`]).

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Maximum-likelihood minimization and Hessians.
pub mod mle;
/// Generic numerical optimizer (bounded L-BFGS backend).
pub mod optimizer;
/// Profile likelihood scans and intervals.
pub mod profile_likelihood;
/// Fit results.
pub mod result;

pub use mle::{Minimizer, MinimizerConfig, OptimizationCounts};
pub use optimizer::{
    LbfgsbOptimizer, ModelObjective, ObjectiveFunction, OptimizationResult, OptimizerConfig,
};
pub use profile_likelihood::{ProfileInterval, ProfileLikelihoodScan, ProfilePoint, scan};
pub use result::{FitResult, FittedParameter};
