//! Named fit parameters stored in an explicit arena.
//!
//! Densities never own parameter values: they hold [`ParamId`] handles into a
//! [`ParameterRegistry`] and read the current values each time they are evaluated.

use fk_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Handle to a parameter inside a [`ParameterRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParamId(usize);

impl ParamId {
    /// Position of the parameter in the registry's value vector.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Builder describing a parameter to create.
#[derive(Debug, Clone)]
pub struct ParameterSpec {
    name: String,
    value: f64,
    lower: f64,
    upper: f64,
    step_size: Option<f64>,
    floating: bool,
}

impl ParameterSpec {
    /// A floating, unbounded parameter starting at `value`.
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
            step_size: None,
            floating: true,
        }
    }

    /// Set both bounds.
    pub fn bounds(mut self, lower: f64, upper: f64) -> Self {
        self.lower = lower;
        self.upper = upper;
        self
    }

    /// Set the lower bound.
    pub fn lower(mut self, lower: f64) -> Self {
        self.lower = lower;
        self
    }

    /// Set the upper bound.
    pub fn upper(mut self, upper: f64) -> Self {
        self.upper = upper;
        self
    }

    /// Initial step size used to bracket profile scans.
    pub fn step_size(mut self, step: f64) -> Self {
        self.step_size = Some(step);
        self
    }

    /// Whether the minimizer may move this parameter.
    pub fn floating(mut self, floating: bool) -> Self {
        self.floating = floating;
        self
    }
}

/// A parameter as stored in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Unique name within the registry.
    pub name: String,
    /// Current value.
    pub value: f64,
    /// Bounds `(lower, upper)`; unbounded sides are infinite.
    pub bounds: (f64, f64),
    /// Step size (defaults to `0.01 * max(|value|, 1)`).
    pub step_size: f64,
    /// Whether the parameter is free in fits.
    pub floating: bool,
}

impl Parameter {
    /// Whether `value` hits one of the bounds (relative tolerance `1e-8`).
    pub fn at_limit(&self) -> bool {
        let (lo, hi) = self.bounds;
        let tol = 1e-8 * self.value.abs().max(1.0);
        (lo.is_finite() && self.value - lo <= tol) || (hi.is_finite() && hi - self.value <= tol)
    }
}

/// Arena of named parameters.
#[derive(Debug, Clone, Default)]
pub struct ParameterRegistry {
    params: Vec<Parameter>,
    by_name: HashMap<String, ParamId>,
}

impl ParameterRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a parameter. Fails with [`Error::NameCollision`] on a duplicate name.
    pub fn create(&mut self, spec: ParameterSpec) -> Result<ParamId> {
        if self.by_name.contains_key(&spec.name) {
            return Err(Error::NameCollision(spec.name));
        }
        if spec.name.is_empty() {
            return Err(Error::Validation("parameter name must be non-empty".into()));
        }
        if !spec.value.is_finite() {
            return Err(Error::Validation(format!(
                "parameter '{}' value must be finite, got {}",
                spec.name, spec.value
            )));
        }
        check_bounds(&spec.name, spec.lower, spec.upper)?;
        if spec.value < spec.lower || spec.value > spec.upper {
            return Err(Error::Validation(format!(
                "parameter '{}' value {} outside bounds ({}, {})",
                spec.name, spec.value, spec.lower, spec.upper
            )));
        }
        let step_size = match spec.step_size {
            Some(s) if !(s.is_finite() && s > 0.0) => {
                return Err(Error::Validation(format!(
                    "parameter '{}' step size must be finite and > 0, got {s}",
                    spec.name
                )));
            }
            Some(s) => s,
            None => 0.01 * spec.value.abs().max(1.0),
        };

        let id = ParamId(self.params.len());
        self.by_name.insert(spec.name.clone(), id);
        self.params.push(Parameter {
            name: spec.name,
            value: spec.value,
            bounds: (spec.lower, spec.upper),
            step_size,
            floating: spec.floating,
        });
        Ok(id)
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Look up a handle by name.
    pub fn id_of(&self, name: &str) -> Option<ParamId> {
        self.by_name.get(name).copied()
    }

    /// Look up a handle by name, failing with a validation error.
    pub fn require(&self, name: &str) -> Result<ParamId> {
        self.id_of(name)
            .ok_or_else(|| Error::Validation(format!("unknown parameter '{name}'")))
    }

    /// Parameter record behind a handle.
    ///
    /// Panics if `id` comes from a different registry with more parameters.
    pub fn get(&self, id: ParamId) -> &Parameter {
        &self.params[id.0]
    }

    /// Current value.
    #[inline]
    pub fn value(&self, id: ParamId) -> f64 {
        self.params[id.0].value
    }

    /// All current values, indexed by [`ParamId::index`].
    pub fn values(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.value).collect()
    }

    /// Iterate `(id, parameter)` pairs in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (ParamId, &Parameter)> {
        self.params.iter().enumerate().map(|(i, p)| (ParamId(i), p))
    }

    /// Set a value; it must be finite and inside the bounds.
    pub fn set_value(&mut self, id: ParamId, value: f64) -> Result<()> {
        let p = self.param_mut(id)?;
        check_in_bounds(p, value)?;
        p.value = value;
        Ok(())
    }

    /// Overwrite every value at once (e.g. restoring a fit snapshot).
    pub fn set_values(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.params.len() {
            return Err(Error::Validation(format!(
                "value vector length mismatch: expected {}, got {}",
                self.params.len(),
                values.len()
            )));
        }
        // Nothing is written unless every value is acceptable.
        for (p, &v) in self.params.iter().zip(values) {
            check_in_bounds(p, v)?;
        }
        for (p, &v) in self.params.iter_mut().zip(values) {
            p.value = v;
        }
        Ok(())
    }

    /// Fix or release a parameter.
    pub fn set_floating(&mut self, id: ParamId, floating: bool) -> Result<()> {
        self.param_mut(id)?.floating = floating;
        Ok(())
    }

    /// Replace the bounds; the current value must stay inside them.
    pub fn set_bounds(&mut self, id: ParamId, lower: f64, upper: f64) -> Result<()> {
        let p = self.param_mut(id)?;
        check_bounds(&p.name, lower, upper)?;
        if p.value < lower || p.value > upper {
            return Err(Error::Validation(format!(
                "parameter '{}' value {} outside new bounds ({lower}, {upper})",
                p.name, p.value
            )));
        }
        p.bounds = (lower, upper);
        Ok(())
    }

    /// Handles of the floating parameters, in creation order.
    pub fn floating_ids(&self) -> Vec<ParamId> {
        self.iter().filter(|(_, p)| p.floating).map(|(id, _)| id).collect()
    }

    fn param_mut(&mut self, id: ParamId) -> Result<&mut Parameter> {
        self.params
            .get_mut(id.0)
            .ok_or_else(|| Error::Validation(format!("parameter id {} out of range", id.0)))
    }
}

fn check_bounds(name: &str, lower: f64, upper: f64) -> Result<()> {
    if lower.is_nan() || upper.is_nan() || lower > upper {
        return Err(Error::Validation(format!(
            "parameter '{name}' has invalid bounds ({lower}, {upper})"
        )));
    }
    Ok(())
}

fn check_in_bounds(p: &Parameter, value: f64) -> Result<()> {
    if !value.is_finite() || value < p.bounds.0 || value > p.bounds.1 {
        return Err(Error::Validation(format!(
            "value {value} for parameter '{}' outside bounds ({}, {})",
            p.name, p.bounds.0, p.bounds.1
        )));
    }
    Ok(())
}
