//! Parameter recovery on pseudo-data drawn from the fitted model itself.

use fk_core::GradientSource;
use fk_inference::{Minimizer, MinimizerConfig};
use fk_unbinned::spec::{compile_model, parse_model_file};
use fk_unbinned::{Density, ParameterRegistry, ParameterSpec, Space, UnbinnedNll};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::Path;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn assert_within(name: &str, value: f64, truth: f64, error: f64, n_sigma: f64) {
    assert!(
        (value - truth).abs() < n_sigma * error,
        "{name}: {value} vs truth {truth} (error {error})"
    );
}

// ---------------------------------------------------------------------------
// Single shapes
// ---------------------------------------------------------------------------

#[test]
fn gaussian_mean_and_width_recovered() {
    let space = Space::new("obs", (-5.0, 10.0)).unwrap();
    let mut reg = ParameterRegistry::new();
    let mu = reg.create(ParameterSpec::new("mu", 1.0).bounds(-4.0, 9.0)).unwrap();
    let sigma = reg.create(ParameterSpec::new("sigma", 1.0).bounds(0.1, 5.0)).unwrap();
    let model = Density::gaussian("gauss", space, mu, sigma);

    let mut rng = StdRng::seed_from_u64(42);
    let data = model.sample(10_000, &reg, &mut rng, None).unwrap();
    let nll = UnbinnedNll::new(model, data).unwrap();

    reg.set_value(mu, 0.6).unwrap();
    reg.set_value(sigma, 1.4).unwrap();
    let mut result = Minimizer::default().minimize(&nll, &mut reg).unwrap();
    result.ensure_converged().unwrap();
    result.hesse(&nll, &reg).unwrap();

    let err_mu = result.error("mu").unwrap();
    let err_sigma = result.error("sigma").unwrap();
    // σ/√N and σ/√(2N)
    assert!((err_mu - 0.01).abs() < 0.001, "{err_mu}");
    assert!((err_sigma - 0.00707).abs() < 0.001, "{err_sigma}");
    assert_within("mu", result.value("mu").unwrap(), 1.0, err_mu, 4.0);
    assert_within("sigma", result.value("sigma").unwrap(), 1.0, err_sigma, 4.0);
    assert!(result.correlation(0, 1).unwrap().abs() < 0.1);

    // Profile errors of a Gaussian mean are symmetric and match the Hessian.
    result.errors(&nll, &reg, &["mu"], 1.0).unwrap();
    let p = result.param("mu").unwrap();
    let iv = p.profile.as_ref().unwrap();
    assert!(((p.value - iv.lower) / err_mu - 1.0).abs() < 0.05, "{iv:?}");
    assert!(((iv.upper - p.value) / err_mu - 1.0).abs() < 0.05, "{iv:?}");
    assert!(iv.new_minimum.is_none());
}

#[test]
fn exponential_slope_recovered_far_from_origin() {
    let space = Space::new("t", (700.0, 1000.0)).unwrap();
    let mut reg = ParameterRegistry::new();
    let lam = reg.create(ParameterSpec::new("lambda", -0.01).bounds(-0.1, 0.1)).unwrap();
    let model = Density::exponential("decay", space, lam);

    let mut rng = StdRng::seed_from_u64(7);
    let data = model.sample(5_000, &reg, &mut rng, None).unwrap();
    let nll = UnbinnedNll::new(model, data).unwrap();

    for gradient in [GradientSource::Automatic, GradientSource::Numerical] {
        let mut reg = reg.clone();
        reg.set_value(lam, -0.008).unwrap();
        let minimizer = Minimizer::new(MinimizerConfig { gradient, ..Default::default() });
        let mut result = minimizer.minimize(&nll, &mut reg).unwrap();
        assert!(result.converged, "{gradient}: {}", result.message);
        result.hesse(&nll, &reg).unwrap();
        let err = result.error("lambda").unwrap();
        assert!(err > 0.0 && err < 1e-3, "{err}");
        assert_within("lambda", result.value("lambda").unwrap(), -0.01, err, 4.0);
    }
}

// ---------------------------------------------------------------------------
// Composite models
// ---------------------------------------------------------------------------

#[test]
fn extended_signal_plus_background_yields_recovered() {
    let space = Space::new("m", (100.0, 160.0)).unwrap();
    let mut reg = ParameterRegistry::new();
    let mu = reg.create(ParameterSpec::new("mass", 125.0).bounds(110.0, 140.0)).unwrap();
    let width = reg.create(ParameterSpec::new("width", 2.5).bounds(0.5, 10.0)).unwrap();
    let slope = reg.create(ParameterSpec::new("slope", -0.03).bounds(-0.5, 0.5)).unwrap();
    let n_sig = reg.create(ParameterSpec::new("n_sig", 400.0).bounds(0.0, 5000.0)).unwrap();
    let n_bkg = reg.create(ParameterSpec::new("n_bkg", 2000.0).bounds(0.0, 20000.0)).unwrap();

    let sig = Density::gaussian("sig", space.clone(), mu, width).create_extended(n_sig).unwrap();
    let bkg = Density::exponential("bkg", space, slope).create_extended(n_bkg).unwrap();
    let model = Density::sum("model", vec![sig, bkg], vec![]).unwrap();

    let mut rng = StdRng::seed_from_u64(2718);
    let data = model.sample_extended(&reg, &mut rng, true).unwrap();
    let n_obs = data.n_events() as f64;
    let nll = UnbinnedNll::new(model, data).unwrap();

    reg.set_value(n_sig, 300.0).unwrap();
    reg.set_value(n_bkg, 2200.0).unwrap();
    reg.set_value(mu, 124.0).unwrap();
    let mut result = Minimizer::default().minimize(&nll, &mut reg).unwrap();
    result.ensure_converged().unwrap();
    assert!(result.valid && result.edm <= result.config.edm_target(), "{result}");
    result.hesse(&nll, &reg).unwrap();

    // Extended ML: fitted yields add up to the observed count.
    let total = result.value("n_sig").unwrap() + result.value("n_bkg").unwrap();
    assert!((total - n_obs).abs() < 0.1 * n_obs.sqrt(), "{total} vs {n_obs}");
    assert_within("n_sig", result.value("n_sig").unwrap(), 400.0, result.error("n_sig").unwrap(), 4.0);
    assert_within("mass", result.value("mass").unwrap(), 125.0, result.error("mass").unwrap(), 4.0);
}

#[test]
fn three_components_with_implicit_last_fraction() {
    let space = Space::new("x", (0.0, 10.0)).unwrap();
    let mut reg = ParameterRegistry::new();
    let mu1 = reg.create(ParameterSpec::new("mu1", 2.0).bounds(0.0, 5.0)).unwrap();
    let s1 = reg.create(ParameterSpec::new("s1", 0.5).bounds(0.1, 3.0)).unwrap();
    let mu2 = reg.create(ParameterSpec::new("mu2", 6.5).bounds(5.0, 10.0)).unwrap();
    let s2 = reg.create(ParameterSpec::new("s2", 0.8).bounds(0.1, 3.0)).unwrap();
    let f1 = reg.create(ParameterSpec::new("f1", 0.3).bounds(0.0, 1.0)).unwrap();
    let f2 = reg.create(ParameterSpec::new("f2", 0.25).bounds(0.0, 1.0)).unwrap();
    let model = Density::sum(
        "model",
        vec![
            Density::gaussian("g1", space.clone(), mu1, s1),
            Density::gaussian("g2", space.clone(), mu2, s2),
            Density::uniform("flat", space),
        ],
        vec![f1, f2],
    )
    .unwrap();

    let mut rng = StdRng::seed_from_u64(5150);
    let data = model.sample(5000, &reg, &mut rng, None).unwrap();
    let nll = UnbinnedNll::new(model, data).unwrap();

    // Both fractions pinned to 1 would leave the flat component a weight of -1; the fit
    // has to stay inside the simplex on its own.
    reg.set_value(f1, 0.1).unwrap();
    reg.set_value(f2, 0.1).unwrap();
    let mut result = Minimizer::default().minimize(&nll, &mut reg).unwrap();
    result.ensure_converged().unwrap();
    result.hesse(&nll, &reg).unwrap();

    let (v1, v2) = (result.value("f1").unwrap(), result.value("f2").unwrap());
    assert!(v1 + v2 <= 1.0, "implied weight {}", 1.0 - v1 - v2);
    assert_within("f1", v1, 0.3, result.error("f1").unwrap(), 4.0);
    assert_within("f2", v2, 0.25, result.error("f2").unwrap(), 4.0);
    assert_within("mu2", result.value("mu2").unwrap(), 6.5, result.error("mu2").unwrap(), 4.0);
}

#[test]
fn model_file_fit_round() {
    let text = r#"
schema_version: fitkit_model_v0
space: { name: x, limits: [0.0, 10.0] }
parameters:
  - { name: mu, value: 4.0, bounds: [0.0, 10.0] }
  - { name: sigma, value: 0.8, bounds: [0.1, 5.0] }
  - { name: frac, value: 0.4, bounds: [0.0, 1.0] }
model:
  type: sum
  fractions: [frac]
  components:
    - { type: gaussian, params: [mu, sigma] }
    - { type: uniform }
data: { type: toy, n: 3000, seed: 11 }
"#;
    let spec = parse_model_file(text.as_bytes()).unwrap();
    let mut compiled = compile_model(&spec, Path::new(".")).unwrap();
    let nll = compiled.nll().unwrap();
    let cfg = MinimizerConfig::from_spec(&compiled.minimizer);
    let mut result = Minimizer::new(cfg).minimize(&nll, &mut compiled.registry).unwrap();
    result.ensure_converged().unwrap();
    result.hesse(&nll, &compiled.registry).unwrap();
    assert_within("frac", result.value("frac").unwrap(), 0.4, result.error("frac").unwrap(), 4.0);
    assert_within("mu", result.value("mu").unwrap(), 4.0, result.error("mu").unwrap(), 4.0);
}
