//! # fk-unbinned
//!
//! Event-level (unbinned) likelihood building blocks for FitKit.
//!
//! This crate provides:
//! - [`ParameterRegistry`]: an arena of named parameters referenced by [`ParamId`].
//! - [`Space`] and [`Dataset`]: bounded 1-D observables and (optionally weighted) events.
//! - Shapes ([`pdf`]) and composable [`Density`] trees with fractions and yields.
//! - [`UnbinnedNll`]: weighted/extended/simultaneous negative log-likelihoods, exposed to
//!   `fk-inference` through [`fk_core::LogDensityModel`].
//! - [`spec`]: the `fitkit_model_v0` model file.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dataset;
#[cfg(feature = "arrow-io")]
pub mod dataset_parquet;
pub mod density;
pub mod loss;
pub mod parameter;
pub mod pdf;
pub mod sampling;
pub mod space;
pub mod spec;

pub use dataset::{Dataset, DatasetSummary};
pub use density::{Density, FractionMode, YieldExpr};
pub use loss::{BoundNll, Constraint, UnbinnedNll};
pub use parameter::{ParamId, Parameter, ParameterRegistry, ParameterSpec};
pub use pdf::{
    Bandwidth, ChebyshevPdf, CrystalBallPdf, ExponentialPdf, GaussianPdf, KdePdf, UniformPdf,
    UnbinnedPdf,
};
pub use space::Space;

#[cfg(test)]
mod tests;
