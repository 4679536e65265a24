//! One-dimensional observable spaces.

use fk_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// A named observable with finite limits `[low, high]`.
///
/// A space bounds the data tied to it and is the default normalization range of any
/// density defined on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Space {
    name: String,
    low: f64,
    high: f64,
}

impl Space {
    /// Create a space; limits must be finite with `low < high`.
    pub fn new(name: impl Into<String>, limits: (f64, f64)) -> Result<Self> {
        let name = name.into();
        let (low, high) = limits;
        validate_limits(&name, low, high)?;
        Ok(Self { name, low, high })
    }

    /// Observable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Limits `(low, high)`.
    pub fn limits(&self) -> (f64, f64) {
        (self.low, self.high)
    }

    /// Lower limit.
    pub fn low(&self) -> f64 {
        self.low
    }

    /// Upper limit.
    pub fn high(&self) -> f64 {
        self.high
    }

    /// Width `high - low`.
    pub fn width(&self) -> f64 {
        self.high - self.low
    }

    /// Whether `x` lies inside the closed interval.
    #[inline]
    pub fn contains(&self, x: f64) -> bool {
        x >= self.low && x <= self.high
    }

    /// Same observable restricted to a sub-range of the current limits.
    pub fn with_limits(&self, limits: (f64, f64)) -> Result<Self> {
        let (low, high) = limits;
        validate_limits(&self.name, low, high)?;
        if low < self.low || high > self.high {
            return Err(Error::Validation(format!(
                "limits ({low}, {high}) exceed space '{}' ({}, {})",
                self.name, self.low, self.high
            )));
        }
        Ok(Self { name: self.name.clone(), low, high })
    }

    /// Error unless `other` describes the same observable.
    pub fn ensure_same_observable(&self, other: &Space) -> Result<()> {
        if self.name != other.name {
            return Err(Error::Validation(format!(
                "observable mismatch: '{}' vs '{}'",
                self.name, other.name
            )));
        }
        Ok(())
    }
}

fn validate_limits(name: &str, low: f64, high: f64) -> Result<()> {
    if !low.is_finite() || !high.is_finite() || low >= high {
        return Err(Error::Validation(format!(
            "invalid limits for '{name}': expected finite low < high, got ({low}, {high})"
        )));
    }
    Ok(())
}
