//! Model configuration file (`fitkit_model_v0`) parsing and compilation.
//!
//! A model file (YAML or JSON) names one observable space, a list of parameters, a
//! density tree, an optional dataset and optional Gaussian constraints:
//!
//! ```yaml
//! schema_version: fitkit_model_v0
//! space: { name: x, limits: [-5.0, 10.0] }
//! parameters:
//!   - { name: mu, value: 1.0 }
//!   - { name: sigma, value: 1.0, bounds: [0.01, 10.0] }
//! model: { type: gaussian, name: signal, params: [mu, sigma] }
//! data: { type: toy, n: 10000, seed: 42 }
//! ```

#![allow(missing_docs)]

use anyhow::{Context, Result};
use fk_core::GradientSource;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Bandwidth, Dataset, Density, ParamId, ParameterRegistry, ParameterSpec, Space, UnbinnedNll, YieldExpr};

pub const FITKIT_MODEL_V0: &str = "fitkit_model_v0";

#[derive(Debug, Clone, Deserialize)]
pub struct ModelFileV0 {
    pub schema_version: String,
    pub space: SpaceSpec,
    #[serde(default)]
    pub parameters: Vec<ParameterEntry>,
    pub model: DensitySpec,
    #[serde(default)]
    pub data: Option<DataSpec>,
    #[serde(default)]
    pub constraints: Vec<ConstraintSpec>,
    #[serde(default)]
    pub minimizer: MinimizerSpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpaceSpec {
    pub name: String,
    pub limits: [f64; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParameterEntry {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub bounds: Option<[f64; 2]>,
    #[serde(default)]
    pub step_size: Option<f64>,
    #[serde(default = "default_true")]
    pub floating: bool,
}

fn default_true() -> bool {
    true
}

/// A node of the density tree.
#[derive(Debug, Clone, Deserialize)]
pub struct DensitySpec {
    /// Density name (defaults to the shape type).
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub shape: ShapeSpec,
    #[serde(default, rename = "yield")]
    pub yield_spec: Option<YieldSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShapeSpec {
    /// `params: [mu, sigma]`
    Gaussian { params: Vec<String> },
    /// `params: [lambda]`
    Exponential { params: Vec<String> },
    Uniform,
    /// `params: [c1, c2, ...]`
    Chebyshev { params: Vec<String> },
    /// `params: [mu, sigma, alpha, n]`
    CrystalBall { params: Vec<String> },
    Kde {
        data: DataSpec,
        #[serde(default)]
        bandwidth: Bandwidth,
    },
    Sum {
        components: Vec<DensitySpec>,
        /// `N−1` or `N` fraction parameters, or none when every component has a yield.
        #[serde(default)]
        fractions: Vec<String>,
    },
}

impl ShapeSpec {
    fn type_name(&self) -> &'static str {
        match self {
            ShapeSpec::Gaussian { .. } => "gaussian",
            ShapeSpec::Exponential { .. } => "exponential",
            ShapeSpec::Uniform => "uniform",
            ShapeSpec::Chebyshev { .. } => "chebyshev",
            ShapeSpec::CrystalBall { .. } => "crystal_ball",
            ShapeSpec::Kde { .. } => "kde",
            ShapeSpec::Sum { .. } => "sum",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum YieldSpec {
    Fixed { value: f64 },
    Parameter { name: String },
    Scaled { base_yield: f64, scale: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataSpec {
    Inline {
        values: Vec<f64>,
        #[serde(default)]
        weights: Option<Vec<f64>>,
    },
    /// JSON array or `{values, weights}` object; path relative to the model file.
    Json { file: PathBuf },
    /// Parquet column (requires the `arrow-io` feature).
    Parquet {
        file: PathBuf,
        /// Defaults to the space name.
        #[serde(default)]
        column: Option<String>,
        #[serde(default)]
        weight_column: Option<String>,
    },
    /// Pseudo-data drawn from the model itself.
    ///
    /// With `n` omitted the model must be extended and `ν` (or `Poisson(ν)` with
    /// `fluctuate`) events are drawn.
    Toy {
        #[serde(default)]
        n: Option<usize>,
        seed: u64,
        #[serde(default)]
        fluctuate: bool,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConstraintSpec {
    Gaussian { param: String, mean: f64, sigma: f64 },
}

/// Minimizer settings; unset fields keep the minimizer's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinimizerSpec {
    pub tol: Option<f64>,
    pub verbosity: Option<u8>,
    pub gradient: Option<GradientSource>,
    pub max_iter: Option<u64>,
    pub m: Option<usize>,
}

/// Everything a model file describes, ready to fit.
#[derive(Debug, Clone)]
pub struct CompiledModel {
    pub registry: ParameterRegistry,
    pub density: Density,
    pub dataset: Option<Dataset>,
    pub constraints: Vec<(ParamId, f64, f64)>,
    pub minimizer: MinimizerSpec,
}

impl CompiledModel {
    /// Objective of the model on its dataset, with constraints.
    pub fn nll(&self) -> Result<UnbinnedNll> {
        let data = self
            .dataset
            .clone()
            .ok_or_else(|| anyhow::anyhow!("model file has no `data` section"))?;
        let mut nll = UnbinnedNll::new(self.density.clone(), data)?;
        for &(id, mean, sigma) in &self.constraints {
            nll = nll.with_constraint(id, mean, sigma)?;
        }
        Ok(nll)
    }
}

pub fn read_model_file(path: &Path) -> Result<ModelFileV0> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_model_file(&bytes)
        .with_context(|| format!("failed to parse model file (YAML/JSON) from {}", path.display()))
}

pub fn parse_model_file(bytes: &[u8]) -> Result<ModelFileV0> {
    let spec: ModelFileV0 = serde_yaml_ng::from_slice(bytes)?;
    if spec.schema_version != FITKIT_MODEL_V0 {
        anyhow::bail!(
            "unsupported schema_version: {} (expected {})",
            spec.schema_version,
            FITKIT_MODEL_V0
        );
    }
    Ok(spec)
}

/// Build registry, density and data; relative data paths resolve against `base_dir`.
pub fn compile_model(spec: &ModelFileV0, base_dir: &Path) -> Result<CompiledModel> {
    let space = Space::new(spec.space.name.clone(), (spec.space.limits[0], spec.space.limits[1]))
        .context("invalid `space`")?;

    let mut registry = ParameterRegistry::new();
    for p in &spec.parameters {
        let mut ps = ParameterSpec::new(p.name.clone(), p.value).floating(p.floating);
        if let Some([lo, hi]) = p.bounds {
            ps = ps.bounds(lo, hi);
        }
        if let Some(s) = p.step_size {
            ps = ps.step_size(s);
        }
        registry.create(ps).with_context(|| format!("parameter '{}'", p.name))?;
    }

    let density = build_density(&spec.model, &space, &registry, base_dir)?;

    let constraints = spec
        .constraints
        .iter()
        .map(|ConstraintSpec::Gaussian { param, mean, sigma }| {
            Ok((lookup(&registry, param)?, *mean, *sigma))
        })
        .collect::<Result<Vec<_>>>()?;

    let dataset = match &spec.data {
        None => None,
        Some(DataSpec::Toy { n, seed, fluctuate }) => {
            let mut rng = StdRng::seed_from_u64(*seed);
            let data = match n {
                Some(n) => density.sample(*n, &registry, &mut rng, None)?,
                None => density
                    .sample_extended(&registry, &mut rng, *fluctuate)
                    .context("toy data without `n` needs an extended model")?,
            };
            log::debug!("generated {} toy events (seed {seed})", data.n_events());
            Some(data)
        }
        Some(other) => Some(load_data(other, &space, base_dir)?),
    };

    Ok(CompiledModel { registry, density, dataset, constraints, minimizer: spec.minimizer.clone() })
}

fn lookup(registry: &ParameterRegistry, name: &str) -> Result<ParamId> {
    registry.id_of(name).ok_or_else(|| anyhow::anyhow!("unknown parameter name: '{name}'"))
}

fn lookup_all(registry: &ParameterRegistry, names: &[String]) -> Result<Vec<ParamId>> {
    names.iter().map(|n| lookup(registry, n)).collect()
}

fn fixed_arity(kind: &str, names: &[String], arity: usize) -> Result<()> {
    if names.len() != arity {
        anyhow::bail!("{kind} needs {arity} params, got {}", names.len());
    }
    Ok(())
}

pub fn build_density(
    spec: &DensitySpec,
    space: &Space,
    registry: &ParameterRegistry,
    base_dir: &Path,
) -> Result<Density> {
    let name = spec.name.clone().unwrap_or_else(|| spec.shape.type_name().to_string());
    let space = space.clone();
    let density = match &spec.shape {
        ShapeSpec::Gaussian { params } => {
            fixed_arity("gaussian", params, 2)?;
            let p = lookup_all(registry, params)?;
            Density::gaussian(&name, space, p[0], p[1])
        }
        ShapeSpec::Exponential { params } => {
            fixed_arity("exponential", params, 1)?;
            Density::exponential(&name, space, lookup(registry, &params[0])?)
        }
        ShapeSpec::Uniform => Density::uniform(&name, space),
        ShapeSpec::Chebyshev { params } => {
            Density::chebyshev(&name, space, lookup_all(registry, params)?)?
        }
        ShapeSpec::CrystalBall { params } => {
            fixed_arity("crystal_ball", params, 4)?;
            let p = lookup_all(registry, params)?;
            Density::crystal_ball(&name, space, p[0], p[1], p[2], p[3])
        }
        ShapeSpec::Kde { data, bandwidth } => {
            if matches!(data, DataSpec::Toy { .. }) {
                anyhow::bail!("kde '{name}': template data cannot be a toy sample");
            }
            let template = load_data(data, &space, base_dir)
                .with_context(|| format!("kde '{name}' template data"))?;
            Density::kde(&name, space, &template, *bandwidth)?
        }
        ShapeSpec::Sum { components, fractions } => {
            let comps = components
                .iter()
                .map(|c| build_density(c, &space, registry, base_dir))
                .collect::<Result<Vec<_>>>()?;
            Density::sum(&name, comps, lookup_all(registry, fractions)?)
                .with_context(|| format!("sum '{name}'"))?
        }
    };

    match &spec.yield_spec {
        None => Ok(density),
        Some(y) => {
            let expr = match y {
                YieldSpec::Fixed { value } => YieldExpr::Fixed(*value),
                YieldSpec::Parameter { name } => YieldExpr::Parameter(lookup(registry, name)?),
                YieldSpec::Scaled { base_yield, scale } => {
                    YieldExpr::Scaled { base: *base_yield, scale: lookup(registry, scale)? }
                }
            };
            Ok(density.create_extended(expr)?)
        }
    }
}

fn resolve(base_dir: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() { file.to_path_buf() } else { base_dir.join(file) }
}

fn load_data(spec: &DataSpec, space: &Space, base_dir: &Path) -> Result<Dataset> {
    match spec {
        DataSpec::Inline { values, weights } => {
            Ok(Dataset::with_weights(space.clone(), values.clone(), weights.clone())?)
        }
        DataSpec::Json { file } => {
            let path = resolve(base_dir, file);
            Dataset::from_json_file(space.clone(), &path)
                .with_context(|| format!("failed to load data from {}", path.display()))
        }
        #[cfg(feature = "arrow-io")]
        DataSpec::Parquet { file, column, weight_column } => {
            let path = resolve(base_dir, file);
            let column = column.as_deref().unwrap_or(space.name());
            crate::dataset_parquet::read_dataset_parquet(&path, space, column, weight_column.as_deref(), true)
                .with_context(|| format!("failed to load column '{column}' from {}", path.display()))
        }
        #[cfg(not(feature = "arrow-io"))]
        DataSpec::Parquet { file, .. } => {
            anyhow::bail!("reading {} requires the `arrow-io` feature", file.display())
        }
        DataSpec::Toy { .. } => anyhow::bail!("toy data needs a model to sample from"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SUM_MODEL: &str = r#"
schema_version: fitkit_model_v0
space: { name: x, limits: [0.0, 10.0] }
parameters:
  - { name: mu, value: 5.0, bounds: [0.0, 10.0] }
  - { name: sigma, value: 0.5, bounds: [0.05, 5.0] }
  - { name: lam, value: -0.3 }
  - { name: n_sig, value: 200.0, bounds: [0.0, 10000.0] }
  - { name: n_bkg, value: 800.0, bounds: [0.0, 10000.0] }
model:
  type: sum
  name: total
  components:
    - { type: gaussian, name: sig, params: [mu, sigma], yield: { type: parameter, name: n_sig } }
    - { type: exponential, name: bkg, params: [lam], yield: { type: parameter, name: n_bkg } }
data: { type: toy, seed: 7 }
constraints:
  - { type: gaussian, param: sigma, mean: 0.5, sigma: 0.1 }
minimizer: { tol: 0.0001, gradient: numerical }
"#;

    #[test]
    fn test_compile_extended_sum_with_toy_data() {
        let spec = parse_model_file(SUM_MODEL.as_bytes()).unwrap();
        let compiled = compile_model(&spec, Path::new(".")).unwrap();
        assert!(compiled.density.is_extended());
        assert_eq!(compiled.density.components().len(), 2);
        assert_eq!(compiled.dataset.as_ref().unwrap().n_events(), 1000);
        assert_eq!(compiled.minimizer.gradient, Some(GradientSource::Numerical));
        assert_eq!(compiled.minimizer.max_iter, None);
        let nll = compiled.nll().unwrap();
        assert_eq!(nll.constraints().len(), 1);
        assert!(nll.value(&compiled.registry).unwrap().is_finite());
    }

    #[test]
    fn test_json_model_and_inline_data() {
        let text = r#"{
            "schema_version": "fitkit_model_v0",
            "space": {"name": "x", "limits": [-1.0, 1.0]},
            "parameters": [{"name": "c1", "value": 0.2}],
            "model": {"type": "chebyshev", "params": ["c1"]},
            "data": {"type": "inline", "values": [-0.5, 0.0, 0.5], "weights": [1.0, 2.0, 1.0]}
        }"#;
        let spec = parse_model_file(text.as_bytes()).unwrap();
        let compiled = compile_model(&spec, Path::new(".")).unwrap();
        assert_eq!(compiled.density.name(), "chebyshev");
        assert_relative_eq!(compiled.dataset.unwrap().sum_weights(), 4.0);
    }

    #[test]
    fn test_json_data_file_relative_to_model() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.json"), "[0.1, 0.2, 0.9]").unwrap();
        let text = r#"
schema_version: fitkit_model_v0
space: { name: x, limits: [0.0, 1.0] }
model: { type: uniform }
data: { type: json, file: data.json }
"#;
        let spec = parse_model_file(text.as_bytes()).unwrap();
        let compiled = compile_model(&spec, dir.path()).unwrap();
        assert_eq!(compiled.dataset.unwrap().n_events(), 3);
    }

    #[test]
    fn test_rejects_bad_files() {
        let wrong_version = SUM_MODEL.replace("fitkit_model_v0", "fitkit_model_v9");
        assert!(parse_model_file(wrong_version.as_bytes()).is_err());

        let unknown = SUM_MODEL.replace("params: [lam]", "params: [lambda]");
        let spec = parse_model_file(unknown.as_bytes()).unwrap();
        let err = compile_model(&spec, Path::new(".")).unwrap_err();
        assert!(format!("{err:#}").contains("lambda"), "{err:#}");

        let dup = SUM_MODEL.replace("name: lam,", "name: mu,");
        let spec = parse_model_file(dup.as_bytes()).unwrap();
        assert!(compile_model(&spec, Path::new(".")).is_err());
    }
}
