//! Observed (or generated) 1-D datasets.

use crate::space::Space;
use fk_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Ordered observable values tied to a [`Space`], with optional non-negative weights.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    space: Space,
    values: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    weights: Option<Vec<f64>>,
}

/// Weighted summary statistics of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DatasetSummary {
    /// Number of events.
    pub n_events: usize,
    /// `Σ wᵢ` (equals `n_events` when unweighted).
    pub sum_weights: f64,
    /// Weighted mean.
    pub mean: f64,
    /// Weighted standard deviation (population form).
    pub std: f64,
}

impl Dataset {
    /// Unweighted dataset. Values must be finite and inside the space limits.
    pub fn new(space: Space, values: Vec<f64>) -> Result<Self> {
        Self::with_weights(space, values, None)
    }

    /// Dataset with optional per-event weights (finite, `>= 0`, same length as values).
    pub fn with_weights(space: Space, values: Vec<f64>, weights: Option<Vec<f64>>) -> Result<Self> {
        if values.iter().any(|x| !x.is_finite()) {
            return Err(Error::Validation(format!(
                "observable '{}' contains non-finite values",
                space.name()
            )));
        }
        if let Some(x) = values.iter().find(|&&x| !space.contains(x)) {
            let (lo, hi) = space.limits();
            return Err(Error::Validation(format!(
                "observable '{}' contains value {x} outside limits ({lo}, {hi})",
                space.name()
            )));
        }
        if let Some(w) = &weights {
            if w.len() != values.len() {
                return Err(Error::Validation(format!(
                    "weights length mismatch: expected {}, got {}",
                    values.len(),
                    w.len()
                )));
            }
            if w.iter().any(|x| !x.is_finite()) {
                return Err(Error::Validation("weights must be finite".into()));
            }
            if w.iter().any(|x| *x < 0.0) {
                return Err(Error::Validation("negative event weights are not supported".into()));
            }
        }
        Ok(Self { space, values, weights })
    }

    /// Keep only the events inside the space limits (and finite), dropping the rest.
    pub fn filtered(space: Space, values: Vec<f64>, weights: Option<Vec<f64>>) -> Result<Self> {
        let keep: Vec<bool> = values.iter().map(|&x| x.is_finite() && space.contains(x)).collect();
        let dropped = keep.iter().filter(|k| !**k).count();
        if dropped > 0 {
            log::debug!("dropping {dropped} events outside '{}' limits", space.name());
        }
        let vals = values.iter().zip(&keep).filter(|(_, k)| **k).map(|(x, _)| *x).collect();
        let wts = match weights {
            Some(w) => {
                if w.len() != values.len() {
                    return Err(Error::Validation(format!(
                        "weights length mismatch: expected {}, got {}",
                        values.len(),
                        w.len()
                    )));
                }
                Some(w.into_iter().zip(&keep).filter(|(_, k)| **k).map(|(x, _)| x).collect())
            }
            None => None,
        };
        Self::with_weights(space, vals, wts)
    }

    /// Read a JSON dataset: either a bare array of values or `{"values": [...], "weights": [...]}`.
    pub fn from_json_file(space: Space, path: &Path) -> Result<Self> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum JsonData {
            Bare(Vec<f64>),
            Columns {
                values: Vec<f64>,
                #[serde(default)]
                weights: Option<Vec<f64>>,
            },
        }

        let bytes = std::fs::read(path)?;
        let (values, weights) = match serde_json::from_slice::<JsonData>(&bytes)? {
            JsonData::Bare(v) => (v, None),
            JsonData::Columns { values, weights } => (values, weights),
        };
        Self::with_weights(space, values, weights)
    }

    /// Write as `{"space": ..., "values": [...], "weights": [...]}`.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    /// The observable space.
    pub fn space(&self) -> &Space {
        &self.space
    }

    /// Event values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Optional per-event weights.
    pub fn weights(&self) -> Option<&[f64]> {
        self.weights.as_deref()
    }

    /// Weight of event `i` (1 when unweighted).
    #[inline]
    pub fn weight(&self, i: usize) -> f64 {
        self.weights.as_ref().map_or(1.0, |w| w[i])
    }

    /// Number of events.
    pub fn n_events(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no events.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `Σ wᵢ`.
    pub fn sum_weights(&self) -> f64 {
        match &self.weights {
            Some(w) => w.iter().sum(),
            None => self.values.len() as f64,
        }
    }

    /// Weighted mean and standard deviation.
    pub fn summary(&self) -> DatasetSummary {
        let sw = self.sum_weights();
        let (mean, std) = if sw > 0.0 {
            let mean =
                self.values.iter().enumerate().map(|(i, x)| self.weight(i) * x).sum::<f64>() / sw;
            let var = self
                .values
                .iter()
                .enumerate()
                .map(|(i, x)| self.weight(i) * (x - mean).powi(2))
                .sum::<f64>()
                / sw;
            (mean, var.sqrt())
        } else {
            (f64::NAN, f64::NAN)
        };
        DatasetSummary { n_events: self.n_events(), sum_weights: sw, mean, std }
    }

    /// Concatenate two datasets on the same observable; the result spans the wider limits.
    pub fn concat(&self, other: &Dataset) -> Result<Self> {
        self.space.ensure_same_observable(&other.space)?;
        let (a0, b0) = self.space.limits();
        let (a1, b1) = other.space.limits();
        let space = Space::new(self.space.name(), (a0.min(a1), b0.max(b1)))?;
        let mut values = self.values.clone();
        values.extend_from_slice(&other.values);
        let weights = match (&self.weights, &other.weights) {
            (None, None) => None,
            _ => Some(
                (0..self.n_events())
                    .map(|i| self.weight(i))
                    .chain((0..other.n_events()).map(|i| other.weight(i)))
                    .collect(),
            ),
        };
        Self::with_weights(space, values, weights)
    }
}
