//! # fk-core
//!
//! Core types and traits shared by every FitKit crate.
//!
//! - [`Error`] / [`Result`]: the workspace-wide error type.
//! - [`traits::LogDensityModel`]: the seam between likelihood construction
//!   (`fk-unbinned`) and minimization (`fk-inference`).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;

pub use error::{Error, Result};
pub use traits::{GradientSource, LogDensityModel};

/// Crate version, shared by the CLI `version` subcommand.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
