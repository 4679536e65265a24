//! Scaled density overlays (numbers-first).
//!
//! A density is drawn in "events per bin" units so it sits directly on top of a
//! histogram of the data: `y(x) = p(x) · N_w · (width / n_bins) · scale`.

use fk_core::{Error, Result};
use fk_unbinned::{Dataset, Density, ParameterRegistry};
use serde::{Deserialize, Serialize};

/// Schema tag of [`OverlayArtifact`].
pub const OVERLAY_SCHEMA_V0: &str = "fitkit_overlay_v0";

/// Options for [`plot_scaled_pdf`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayOptions {
    /// Histogram bins (also sets the curve scale).
    pub n_bins: usize,
    /// Grid points of the density curve.
    pub n_points: usize,
    /// Extra multiplicative scale of the curves.
    pub scale: f64,
    /// Emit one curve per sum component.
    pub components: bool,
    /// Emit the data histogram.
    pub histogram: bool,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self { n_bins: 50, n_points: 500, scale: 1.0, components: true, histogram: true }
    }
}

/// Named curve aligned with [`OverlayArtifact::x`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayCurve {
    /// Component name.
    pub name: String,
    /// Scaled values.
    pub y: Vec<f64>,
}

/// Binned data with `sqrt(Σ w²)` errors (`√N` for unweighted data).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramSeries {
    /// `n_bins + 1` edges.
    pub bin_edges: Vec<f64>,
    /// Bin centers.
    pub bin_centers: Vec<f64>,
    /// (Weighted) counts.
    pub counts: Vec<f64>,
    /// Per-bin errors.
    pub errors: Vec<f64>,
}

/// Plot-friendly artifact of a density overlaid on data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayArtifact {
    /// Always [`OVERLAY_SCHEMA_V0`].
    pub schema_version: String,
    /// Density name.
    pub name: String,
    /// Observable name (x-axis label).
    pub observable: String,
    /// Plot range (the dataset's space).
    pub limits: (f64, f64),
    /// Number of histogram bins the curves are scaled to.
    pub n_bins: usize,
    /// Sum of event weights.
    pub sum_weights: f64,
    /// `N_w · (width / n_bins) · scale`.
    pub scale_factor: f64,
    /// Curve x-values.
    pub x: Vec<f64>,
    /// Scaled total density.
    pub total: Vec<f64>,
    /// Scaled sum components (empty for shapes or when disabled).
    pub components: Vec<OverlayCurve>,
    /// Data histogram.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub histogram: Option<HistogramSeries>,
}

/// Evaluate `density` over the space of `data` and scale it to the data histogram.
pub fn plot_scaled_pdf(
    density: &Density,
    data: &Dataset,
    registry: &ParameterRegistry,
    opts: &OverlayOptions,
) -> Result<OverlayArtifact> {
    if opts.n_bins == 0 {
        return Err(Error::Validation("n_bins must be >= 1".into()));
    }
    if opts.n_points < 2 {
        return Err(Error::Validation("n_points must be >= 2".into()));
    }
    if !(opts.scale.is_finite() && opts.scale > 0.0) {
        return Err(Error::Validation(format!("scale must be finite and > 0, got {}", opts.scale)));
    }
    density.space().ensure_same_observable(data.space())?;

    let limits = data.space().limits();
    let (lo, hi) = limits;
    let sum_weights = data.sum_weights();
    let scale_factor = sum_weights * (hi - lo) / opts.n_bins as f64 * opts.scale;

    let step = (hi - lo) / (opts.n_points - 1) as f64;
    let x: Vec<f64> = (0..opts.n_points).map(|i| (lo + i as f64 * step).min(hi)).collect();
    let total: Vec<f64> =
        density.pdf_in(&x, registry, limits)?.into_iter().map(|p| p * scale_factor).collect();

    let mut components = Vec::new();
    if opts.components && !density.components().is_empty() {
        // Component curves share the total's normalization over the plot range.
        let norm = density.integrate(limits, registry)?;
        let weights = density.component_weights(registry)?;
        for (c, w) in density.components().iter().zip(weights) {
            let y = c
                .pdf(&x, registry)?
                .into_iter()
                .map(|p| w * p / norm * scale_factor)
                .collect();
            components.push(OverlayCurve { name: c.name().to_string(), y });
        }
    }

    let histogram = opts.histogram.then(|| histogram(data, opts.n_bins));

    Ok(OverlayArtifact {
        schema_version: OVERLAY_SCHEMA_V0.to_string(),
        name: density.name().to_string(),
        observable: data.space().name().to_string(),
        limits,
        n_bins: opts.n_bins,
        sum_weights,
        scale_factor,
        x,
        total,
        components,
        histogram,
    })
}

fn histogram(data: &Dataset, n_bins: usize) -> HistogramSeries {
    let (lo, hi) = data.space().limits();
    let width = (hi - lo) / n_bins as f64;
    let bin_edges: Vec<f64> = (0..=n_bins).map(|i| lo + i as f64 * width).collect();
    let bin_centers: Vec<f64> = (0..n_bins).map(|i| lo + (i as f64 + 0.5) * width).collect();

    let mut counts = vec![0.0; n_bins];
    let mut sum_w2 = vec![0.0; n_bins];
    for (i, &x) in data.values().iter().enumerate() {
        // The upper edge belongs to the last bin.
        let b = (((x - lo) / width) as usize).min(n_bins - 1);
        let w = data.weight(i);
        counts[b] += w;
        sum_w2[b] += w * w;
    }
    let errors = sum_w2.into_iter().map(f64::sqrt).collect();

    HistogramSeries { bin_edges, bin_centers, counts, errors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use fk_unbinned::{ParameterSpec, Space};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn trapezoid(x: &[f64], y: &[f64]) -> f64 {
        x.windows(2).zip(y.windows(2)).map(|(xw, yw)| 0.5 * (xw[1] - xw[0]) * (yw[0] + yw[1])).sum()
    }

    fn mixture() -> (ParameterRegistry, Density, Dataset) {
        let space = Space::new("x", (0.0, 10.0)).unwrap();
        let mut reg = ParameterRegistry::new();
        let mu = reg.create(ParameterSpec::new("mu", 5.0)).unwrap();
        let sigma = reg.create(ParameterSpec::new("sigma", 0.7).lower(0.01)).unwrap();
        let frac = reg.create(ParameterSpec::new("frac", 0.3).bounds(0.0, 1.0)).unwrap();
        let model = Density::sum(
            "model",
            vec![Density::gaussian("sig", space.clone(), mu, sigma), Density::uniform("flat", space)],
            vec![frac],
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(17);
        let data = model.sample(4000, &reg, &mut rng, None).unwrap();
        (reg, model, data)
    }

    #[test]
    fn test_scaled_curve_integrates_to_event_count() {
        let (reg, model, data) = mixture();
        let opts = OverlayOptions { n_points: 2001, ..Default::default() };
        let art = plot_scaled_pdf(&model, &data, &reg, &opts).unwrap();
        let bin_width = 10.0 / 50.0;
        assert_relative_eq!(art.scale_factor, 4000.0 * bin_width, epsilon = 1e-9);
        assert_relative_eq!(trapezoid(&art.x, &art.total) / bin_width, 4000.0, max_relative = 1e-3);

        let hist = art.histogram.as_ref().unwrap();
        assert_relative_eq!(hist.counts.iter().sum::<f64>(), 4000.0, epsilon = 1e-9);
        assert_eq!(hist.bin_edges.len(), 51);
        for (c, e) in hist.counts.iter().zip(&hist.errors) {
            assert_relative_eq!(*e, c.sqrt(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_components_add_up_to_total() {
        let (reg, model, data) = mixture();
        let art = plot_scaled_pdf(&model, &data, &reg, &OverlayOptions::default()).unwrap();
        assert_eq!(art.components.len(), 2);
        assert_eq!(art.components[0].name, "sig");
        for i in 0..art.x.len() {
            let s: f64 = art.components.iter().map(|c| c.y[i]).sum();
            assert_relative_eq!(s, art.total[i], max_relative = 1e-9, epsilon = 1e-12);
        }
        // Flat component: 70% of the events spread uniformly over 50 bins.
        assert_relative_eq!(art.components[1].y[0], 0.7 * 4000.0 / 50.0, max_relative = 1e-9);
    }

    #[test]
    fn test_scale_and_toggles() {
        let (reg, model, data) = mixture();
        let base = plot_scaled_pdf(&model, &data, &reg, &OverlayOptions::default()).unwrap();
        let opts = OverlayOptions { scale: 2.0, components: false, histogram: false, ..Default::default() };
        let art = plot_scaled_pdf(&model, &data, &reg, &opts).unwrap();
        assert!(art.components.is_empty());
        assert!(art.histogram.is_none());
        assert_relative_eq!(art.total[250], 2.0 * base.total[250], max_relative = 1e-12);

        let json = serde_json::to_value(&art).unwrap();
        assert_eq!(json["schema_version"], OVERLAY_SCHEMA_V0);
        assert!(json.get("histogram").is_none());
    }

    #[test]
    fn test_invalid_options() {
        let (reg, model, data) = mixture();
        for opts in [
            OverlayOptions { n_bins: 0, ..Default::default() },
            OverlayOptions { n_points: 1, ..Default::default() },
            OverlayOptions { scale: -1.0, ..Default::default() },
        ] {
            assert!(plot_scaled_pdf(&model, &data, &reg, &opts).is_err());
        }
    }

    #[test]
    fn test_weighted_histogram_errors() {
        let space = Space::new("x", (0.0, 1.0)).unwrap();
        let data = Dataset::with_weights(space.clone(), vec![0.1, 0.15, 0.9, 1.0], Some(vec![2.0, 1.0, 0.5, 1.5]))
            .unwrap();
        let reg = ParameterRegistry::new();
        let flat = Density::uniform("flat", space);
        let opts = OverlayOptions { n_bins: 2, ..Default::default() };
        let art = plot_scaled_pdf(&flat, &data, &reg, &opts).unwrap();
        let hist = art.histogram.unwrap();
        assert_eq!(hist.counts, vec![3.0, 2.0]);
        assert_relative_eq!(hist.errors[0], 5.0_f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(hist.errors[1], 2.5_f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(art.sum_weights, 5.0, epsilon = 1e-12);
        assert_relative_eq!(art.total[0], 5.0 / 2.0, epsilon = 1e-12);
    }
}
