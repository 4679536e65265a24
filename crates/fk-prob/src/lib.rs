//! Probability building blocks for FitKit.
//!
//! This crate hosts reusable probability math used by the density and likelihood code:
//! - standard normal helpers (log-pdf, CDF, interval mass, quantile)
//! - the extended-likelihood Poisson term
//! - small numeric helpers (stable log-sum-exp primitives)
//!
//! Everything that may sit on a gradient path is generic over [`fk_ad::Scalar`].

pub mod math;
pub mod normal;
pub mod poisson;
