//! Error types for FitKit

use thiserror::Error;

/// FitKit error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A parameter with this name already exists in the registry.
    #[error("parameter name collision: '{0}' already exists")]
    NameCollision(String),

    /// A yield-dependent operation was requested on a density without a yield.
    #[error("density '{0}' is not extended; create it with a yield first")]
    NotExtended(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),

    /// Minimization finished without meeting its convergence criteria.
    #[error("minimization did not converge: {0}")]
    NotConverged(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
