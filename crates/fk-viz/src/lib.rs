//! # fk-viz
//!
//! Visualization data artifacts for FitKit.
//!
//! This crate is intentionally dependency-light and focuses on emitting
//! plot-friendly JSON structures (arrays instead of nested objects).

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Scaled density overlays on top of a data histogram.
pub mod overlay;

/// Profile likelihood artifacts (2ΔNLL curves).
pub mod profile;

pub use overlay::{
    HistogramSeries, OVERLAY_SCHEMA_V0, OverlayArtifact, OverlayCurve, OverlayOptions,
    plot_scaled_pdf,
};
pub use profile::{ProfileCurveArtifact, ProfileCurvePoint};
