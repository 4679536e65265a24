use crate::density::Density;
use crate::loss::UnbinnedNll;
use crate::parameter::{ParameterRegistry, ParameterSpec};
use crate::pdf::Bandwidth;
use crate::space::Space;
use approx::assert_relative_eq;
use fk_core::{GradientSource, LogDensityModel};
use rand::prelude::*;
use rand_distr::Normal;

fn simpson(d: &Density, reg: &ParameterRegistry, n: usize) -> f64 {
    simpson_range(d, reg, d.space().limits(), n)
}

fn simpson_range(d: &Density, reg: &ParameterRegistry, (a, b): (f64, f64), n: usize) -> f64 {
    let n = n + n % 2;
    let h = (b - a) / n as f64;
    let xs: Vec<f64> = (0..=n).map(|i| a + i as f64 * h).collect();
    let p = d.pdf(&xs, reg).unwrap();
    let inner: f64 = p[1..n].iter().enumerate().map(|(i, v)| if i % 2 == 0 { 4.0 * v } else { 2.0 * v }).sum();
    h / 3.0 * (p[0] + p[n] + inner)
}

struct Zoo {
    reg: ParameterRegistry,
    densities: Vec<Density>,
}

fn zoo() -> Zoo {
    let space = Space::new("x", (-3.0, 7.0)).unwrap();
    let mut reg = ParameterRegistry::new();
    let mu = reg.create(ParameterSpec::new("mu", 1.5)).unwrap();
    let sigma = reg.create(ParameterSpec::new("sigma", 0.8).lower(0.01)).unwrap();
    let lam = reg.create(ParameterSpec::new("lam", -0.4)).unwrap();
    let alpha = reg.create(ParameterSpec::new("alpha", 1.2).lower(0.01)).unwrap();
    let n = reg.create(ParameterSpec::new("n", 3.0).lower(1.01)).unwrap();
    let c1 = reg.create(ParameterSpec::new("c1", 0.3)).unwrap();
    let c2 = reg.create(ParameterSpec::new("c2", 0.1)).unwrap();
    let f1 = reg.create(ParameterSpec::new("f1", 0.2).bounds(0.0, 1.0)).unwrap();
    let f2 = reg.create(ParameterSpec::new("f2", 0.5).bounds(0.0, 1.0)).unwrap();

    let mut rng = StdRng::seed_from_u64(5);
    let normal = Normal::new(2.0, 1.0).unwrap();
    let template: Vec<f64> = (0..400).map(|_| normal.sample(&mut rng)).filter(|x| space.contains(*x)).collect();
    let template = crate::Dataset::new(space.clone(), template).unwrap();

    let gauss = Density::gaussian("gauss", space.clone(), mu, sigma);
    let expo = Density::exponential("expo", space.clone(), lam);
    let cb = Density::crystal_ball("cb", space.clone(), mu, sigma, alpha, n);
    let cheb = Density::chebyshev("cheb", space.clone(), vec![c1, c2]).unwrap();
    let kde = Density::kde("kde", space.clone(), &template, Bandwidth::Silverman).unwrap();
    let akde = Density::kde("akde", space.clone(), &template, Bandwidth::Adaptive).unwrap();
    let sum = Density::sum("sum", vec![gauss.clone(), expo.clone(), cheb.clone()], vec![f1, f2]).unwrap();
    let uniform = Density::uniform("flat", space);

    Zoo { reg, densities: vec![gauss, expo, cb, cheb, kde, akde, sum, uniform] }
}

#[test]
fn test_every_density_is_normalized_on_its_space() {
    let z = zoo();
    for d in &z.densities {
        let integral = simpson(d, &z.reg, 20_000);
        assert_relative_eq!(integral, 1.0, epsilon = 1e-4);
        assert_relative_eq!(d.integrate(d.space().limits(), &z.reg).unwrap(), 1.0, epsilon = 1e-9);
    }
}

#[test]
fn test_partial_integrals_match_quadrature() {
    let z = zoo();
    for d in &z.densities {
        let mass = simpson_range(d, &z.reg, (0.0, 2.5), 10_000);
        assert_relative_eq!(d.integrate((0.0, 2.5), &z.reg).unwrap(), mass, epsilon = 1e-6);
    }
}

#[test]
fn test_samples_have_positive_density() {
    let z = zoo();
    let mut rng = StdRng::seed_from_u64(17);
    for d in &z.densities {
        let data = d.sample(500, &z.reg, &mut rng, None).unwrap();
        assert_eq!(data.n_events(), 500);
        let p = d.pdf(data.values(), &z.reg).unwrap();
        assert!(p.iter().all(|v| *v > 0.0), "{}: non-positive density at a sample", d.name());
    }
}

#[test]
fn test_implied_last_fraction() {
    let z = zoo();
    let sum = &z.densities[6];
    let w = sum.component_weights(&z.reg).unwrap();
    assert_relative_eq!(w[2], 1.0 - 0.2 - 0.5, epsilon = 1e-15);
}

#[test]
fn test_ext_pdf_is_yield_times_pdf() {
    let mut z = zoo();
    let nu = z.reg.create(ParameterSpec::new("nu", 1234.5).lower(0.0)).unwrap();
    let xs = [-2.0, 0.0, 1.0, 6.5];
    for d in &z.densities {
        let ext = d.create_extended(nu).unwrap();
        let p = d.pdf(&xs, &z.reg).unwrap();
        let e = ext.ext_pdf(&xs, &z.reg).unwrap();
        for (pi, ei) in p.iter().zip(&e) {
            assert_relative_eq!(*ei, 1234.5 * pi, max_relative = 1e-12);
        }
    }
}

#[test]
fn test_gaussian_sample_moments() {
    let space = Space::new("obs", (-5.0, 10.0)).unwrap();
    let mut reg = ParameterRegistry::new();
    let mu = reg.create(ParameterSpec::new("mu", 1.0)).unwrap();
    let sigma = reg.create(ParameterSpec::new("sigma", 1.0)).unwrap();
    let g = Density::gaussian("gauss", space, mu, sigma);
    let mut rng = StdRng::seed_from_u64(2024);
    let s = g.sample(10_000, &reg, &mut rng, None).unwrap().summary();
    // standard error of the mean is 0.01
    assert!((s.mean - 1.0).abs() < 0.04, "mean {}", s.mean);
    assert!((s.std - 1.0).abs() < 0.03, "std {}", s.std);
}

fn grad_check(nll: &UnbinnedNll, reg: &ParameterRegistry) {
    let ad = nll.bind(reg, GradientSource::Automatic).unwrap();
    let x = ad.parameter_init();
    let g = ad.grad_nll(&x).unwrap();
    for j in 0..x.len() {
        let h = 1e-6 * x[j].abs().max(1.0);
        let mut xp = x.clone();
        let mut xm = x.clone();
        xp[j] += h;
        xm[j] -= h;
        let fd = (ad.nll(&xp).unwrap() - ad.nll(&xm).unwrap()) / (2.0 * h);
        assert_relative_eq!(g[j], fd, epsilon = 1e-4, max_relative = 1e-5);
    }
}

#[test]
fn test_ad_gradients_match_finite_differences() {
    let z = zoo();
    let mut rng = StdRng::seed_from_u64(99);
    for i in [0usize, 1, 2, 3, 6] {
        let d = &z.densities[i];
        let data = d.sample(200, &z.reg, &mut rng, None).unwrap();
        let nll = UnbinnedNll::new(d.clone(), data).unwrap();
        grad_check(&nll, &z.reg);
    }
}

#[test]
fn test_extended_sum_gradient() {
    let space = Space::new("m", (100.0, 150.0)).unwrap();
    let mut reg = ParameterRegistry::new();
    let mu = reg.create(ParameterSpec::new("mu", 125.0)).unwrap();
    let sigma = reg.create(ParameterSpec::new("sigma", 2.0).lower(0.1)).unwrap();
    let lam = reg.create(ParameterSpec::new("lam", -0.03)).unwrap();
    let ns = reg.create(ParameterSpec::new("ns", 50.0).lower(0.0)).unwrap();
    let nb = reg.create(ParameterSpec::new("nb", 450.0).lower(0.0)).unwrap();
    let sig = Density::gaussian("sig", space.clone(), mu, sigma).create_extended(ns).unwrap();
    let bkg = Density::exponential("bkg", space, lam).create_extended(nb).unwrap();
    let model = Density::sum("model", vec![sig, bkg], vec![]).unwrap();
    let mut rng = StdRng::seed_from_u64(1);
    let data = model.sample_extended(&reg, &mut rng, true).unwrap();
    let nll = UnbinnedNll::new(model, data).unwrap();
    grad_check(&nll, &reg);
}

#[test]
fn test_nll_reads_registry_at_evaluation_time() {
    let z = zoo();
    let mut reg = z.reg.clone();
    let d = &z.densities[0];
    let mut rng = StdRng::seed_from_u64(4);
    let data = d.sample(300, &reg, &mut rng, None).unwrap();
    let nll = UnbinnedNll::new(d.clone(), data).unwrap();
    let at_truth = nll.value(&reg).unwrap();
    let mu = reg.id_of("mu").unwrap();
    reg.set_value(mu, 3.0).unwrap();
    assert!(nll.value(&reg).unwrap() > at_truth);
}

/// `1 + a·x`, a user shape outside the built-in set.
#[derive(Debug)]
struct Ramp;

impl crate::pdf::ShapeKernel for Ramp {
    const KIND: &'static str = "ramp";

    fn arity(&self) -> usize {
        1
    }

    fn log_shape<S: fk_ad::Scalar>(&self, x: f64, params: &[S]) -> S {
        (S::from_f64(1.0) + params[0] * S::from_f64(x)).ln()
    }

    fn log_shape_integral<S: fk_ad::Scalar>(
        &self,
        params: &[S],
        (lo, hi): (f64, f64),
    ) -> fk_core::Result<S> {
        Ok((S::from_f64(hi - lo) + params[0] * S::from_f64(0.5 * (hi * hi - lo * lo))).ln())
    }
}

#[test]
fn test_user_shape_through_from_pdf() {
    use std::sync::Arc;

    let space = Space::new("x", (0.0, 2.0)).unwrap();
    let mut reg = ParameterRegistry::new();
    let a = reg.create(ParameterSpec::new("a", 0.8).bounds(-0.49, 5.0)).unwrap();
    let b = reg.create(ParameterSpec::new("b", 0.0)).unwrap();

    let err = Density::from_pdf("bad", space.clone(), Arc::new(Ramp), vec![a, b]).unwrap_err();
    assert!(err.to_string().contains("ramp expects 1"), "{err}");

    let ramp = Density::from_pdf("ramp", space, Arc::new(Ramp), vec![a]).unwrap();
    assert_eq!(ramp.parameters(), vec![a]);
    assert_relative_eq!(simpson(&ramp, &reg, 400), 1.0, epsilon = 1e-9);
    // 1 + 0.8·x normalized on [0, 2]: ∫ = 2 + 1.6 = 3.6.
    assert_relative_eq!(ramp.pdf(&[1.0], &reg).unwrap()[0], 1.8 / 3.6, epsilon = 1e-12);

    let mut rng = StdRng::seed_from_u64(21);
    let data = ramp.sample(500, &reg, &mut rng, None).unwrap();
    let nll = UnbinnedNll::new(ramp, data).unwrap();
    grad_check(&nll, &reg);
}
