use crate::pdf::ShapeKernel;
use fk_ad::Scalar;
use fk_core::{Error, Result};
use fk_prob::normal::{LN_SQRT_2PI, std_interval_mass};
use rand::RngCore;
use rand::distributions::{Distribution, WeightedIndex};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Bandwidth choice for [`KdePdf`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bandwidth {
    /// Same fixed bandwidth for every kernel.
    Fixed(f64),
    /// Silverman's rule: `0.9 · min(σ, IQR/1.34) · n^{-1/5}`.
    #[default]
    Silverman,
    /// Scott's rule: `1.059 · σ · n^{-1/5}`.
    Scott,
    /// Abramson's adaptive bandwidths on top of a Silverman pilot:
    /// `hᵢ = h · (g / f̃(xᵢ))^{1/2}`, `g` the geometric mean of the pilot densities.
    Adaptive,
}

/// 1D Gaussian kernel density estimator.
///
/// `f(x) = Σ_i w_i · φ((x - x_i)/h_i) / h_i`
///
/// The sum of full (untruncated) kernels is renormalized as a whole on the requested
/// range, so mass leaking over the edges is redistributed proportionally.
#[derive(Debug, Clone)]
pub struct KdePdf {
    centers: Vec<f64>,
    weights: Vec<f64>,
    bandwidths: Vec<f64>,
    /// Per-kernel log prefactor: `ln(w_i) - ln(h_i) - ln√(2π)`.
    kernel_log_prefactor: Vec<f64>,
}

impl KdePdf {
    /// Build a KDE from samples and an optional non-negative weight per sample.
    pub fn from_samples(
        centers: Vec<f64>,
        weights: Option<Vec<f64>>,
        bandwidth: Bandwidth,
    ) -> Result<Self> {
        if centers.is_empty() {
            return Err(Error::Validation("KdePdf requires at least one center".into()));
        }
        if centers.iter().any(|x| !x.is_finite()) {
            return Err(Error::Validation("KdePdf centers must be finite".into()));
        }
        let weights = match weights {
            Some(w) => {
                if w.len() != centers.len() {
                    return Err(Error::Validation(format!(
                        "KdePdf weights length mismatch: expected {}, got {}",
                        centers.len(),
                        w.len()
                    )));
                }
                if w.iter().any(|x| !x.is_finite() || *x < 0.0) {
                    return Err(Error::Validation("KdePdf weights must be finite and >= 0".into()));
                }
                w
            }
            None => vec![1.0; centers.len()],
        };
        let sum_w: f64 = weights.iter().sum();
        if !(sum_w.is_finite() && sum_w > 0.0) {
            return Err(Error::Validation(format!(
                "KdePdf requires sum(weights) > 0, got {sum_w}"
            )));
        }

        let bandwidths = match bandwidth {
            Bandwidth::Fixed(h) => {
                if !h.is_finite() || h <= 0.0 {
                    return Err(Error::Validation(format!(
                        "KdePdf bandwidth must be finite and > 0, got {h}"
                    )));
                }
                vec![h; centers.len()]
            }
            Bandwidth::Silverman => vec![silverman(&centers, &weights)?; centers.len()],
            Bandwidth::Scott => vec![scott(&centers, &weights)?; centers.len()],
            Bandwidth::Adaptive => abramson(&centers, &weights, silverman(&centers, &weights)?),
        };

        let kernel_log_prefactor = weights
            .iter()
            .zip(&bandwidths)
            .map(|(&w, &h)| {
                if w > 0.0 { w.ln() - h.ln() - LN_SQRT_2PI } else { f64::NEG_INFINITY }
            })
            .collect();

        Ok(Self { centers, weights, bandwidths, kernel_log_prefactor })
    }

    /// Per-kernel bandwidths.
    pub fn bandwidths(&self) -> &[f64] {
        &self.bandwidths
    }

    #[inline]
    fn log_sum_kernels_at(&self, x: f64) -> f64 {
        // Online logsumexp: keep (m, s) so that log(Σ exp(t_i)) = m + ln(s).
        let mut m = f64::NEG_INFINITY;
        let mut s = 0.0f64;

        for ((x0, h), lpref) in self.centers.iter().zip(&self.bandwidths).zip(&self.kernel_log_prefactor) {
            if !lpref.is_finite() {
                continue;
            }
            let z = (x - x0) / h;
            let t = lpref - 0.5 * z * z;
            if t > m {
                s = if m.is_finite() { s * (m - t).exp() + 1.0 } else { 1.0 };
                m = t;
            } else {
                s += (t - m).exp();
            }
        }

        if !m.is_finite() {
            return f64::NEG_INFINITY;
        }
        m + s.ln()
    }
}

impl ShapeKernel for KdePdf {
    const KIND: &'static str = "kde";

    fn arity(&self) -> usize {
        0
    }

    fn log_shape<S: Scalar>(&self, x: f64, _params: &[S]) -> S {
        S::from_f64(self.log_sum_kernels_at(x))
    }

    fn log_shape_batch<S: Scalar>(&self, xs: &[f64], _params: &[S], out: &mut [S]) {
        out.par_iter_mut()
            .zip(xs.par_iter())
            .for_each(|(o, &x)| *o = S::from_f64(self.log_sum_kernels_at(x)));
    }

    fn log_shape_integral<S: Scalar>(&self, _params: &[S], limits: (f64, f64)) -> Result<S> {
        let (a, b) = limits;
        let mass: f64 = self
            .centers
            .iter()
            .zip(&self.bandwidths)
            .zip(&self.weights)
            .map(|((&x0, &h), &w)| w * std_interval_mass((a - x0) / h, (b - x0) / h))
            .sum();
        if !(mass.is_finite() && mass > 0.0) {
            return Err(Error::Computation(format!(
                "KdePdf has no mass on ({a}, {b}): {mass}"
            )));
        }
        Ok(S::from_f64(mass.ln()))
    }

    fn draw(
        &self,
        _params: &[f64],
        limits: (f64, f64),
        n: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<f64>> {
        let (a, b) = limits;
        // Reject-outside-range is exact for a globally renormalized mixture; bail out if
        // the acceptance would be hopeless.
        let log_mass = self.log_shape_integral::<f64>(&[], limits)?;
        let total: f64 = self.weights.iter().sum();
        let acceptance = (log_mass - total.ln()).exp();
        if acceptance < 1e-6 {
            return Err(Error::Computation(format!(
                "KdePdf sampling acceptance on ({a}, {b}) too small: {acceptance:e}"
            )));
        }

        let pick = WeightedIndex::new(&self.weights)
            .map_err(|e| Error::Computation(format!("KdePdf weights unusable for sampling: {e}")))?;
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            let i = pick.sample(&mut *rng);
            let z: f64 = StandardNormal.sample(&mut *rng);
            let x = self.centers[i] + self.bandwidths[i] * z;
            if x >= a && x <= b {
                out.push(x);
            }
        }
        Ok(out)
    }
}

/// Weighted mean, standard deviation and effective sample size `(Σw)² / Σw²`.
fn weighted_moments(xs: &[f64], ws: &[f64]) -> (f64, f64, f64) {
    let sw: f64 = ws.iter().sum();
    let sw2: f64 = ws.iter().map(|w| w * w).sum();
    let mean = xs.iter().zip(ws).map(|(x, w)| w * x).sum::<f64>() / sw;
    let var = xs.iter().zip(ws).map(|(x, w)| w * (x - mean).powi(2)).sum::<f64>() / sw;
    (mean, var.sqrt(), sw * sw / sw2)
}

/// Weighted quantile by cumulative weight on the sorted sample.
fn weighted_quantile(xs: &[f64], ws: &[f64], q: f64) -> f64 {
    let mut idx: Vec<usize> = (0..xs.len()).collect();
    idx.sort_by(|&i, &j| xs[i].total_cmp(&xs[j]));
    let target = q * ws.iter().sum::<f64>();
    let mut acc = 0.0;
    for &i in &idx {
        acc += ws[i];
        if acc >= target {
            return xs[i];
        }
    }
    xs[idx[idx.len() - 1]]
}

fn silverman(xs: &[f64], ws: &[f64]) -> Result<f64> {
    let (_, sd, n_eff) = weighted_moments(xs, ws);
    let iqr = weighted_quantile(xs, ws, 0.75) - weighted_quantile(xs, ws, 0.25);
    let spread = if iqr > 0.0 { sd.min(iqr / 1.34) } else { sd };
    finite_bandwidth(0.9 * spread * n_eff.powf(-0.2), "silverman")
}

fn scott(xs: &[f64], ws: &[f64]) -> Result<f64> {
    let (_, sd, n_eff) = weighted_moments(xs, ws);
    finite_bandwidth(1.059 * sd * n_eff.powf(-0.2), "scott")
}

fn finite_bandwidth(h: f64, rule: &str) -> Result<f64> {
    if !(h.is_finite() && h > 0.0) {
        return Err(Error::Validation(format!(
            "KdePdf {rule} bandwidth is degenerate ({h}); the sample needs spread"
        )));
    }
    Ok(h)
}

/// Abramson local bandwidths from a fixed-bandwidth pilot estimate.
fn abramson(xs: &[f64], ws: &[f64], h: f64) -> Vec<f64> {
    let sw: f64 = ws.iter().sum();
    let norm = 1.0 / (sw * h * (2.0 * std::f64::consts::PI).sqrt());
    let pilot: Vec<f64> = xs
        .par_iter()
        .map(|&x| {
            let s: f64 = xs
                .iter()
                .zip(ws)
                .map(|(&x0, &w)| {
                    let z = (x - x0) / h;
                    w * (-0.5 * z * z).exp()
                })
                .sum();
            (s * norm).max(f64::MIN_POSITIVE)
        })
        .collect();

    let log_g = pilot.iter().zip(ws).map(|(f, w)| w * f.ln()).sum::<f64>() / sw;
    let g = log_g.exp();
    pilot.iter().map(|f| h * (g / f).sqrt()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::UnbinnedPdf;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    fn sample_centers() -> Vec<f64> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        (0..400).map(|_| StandardNormal.sample(&mut rng)).collect()
    }

    #[test]
    fn test_bandwidth_rules_scale_like_n_pow_minus_fifth() {
        let xs = sample_centers();
        let ws = vec![1.0; xs.len()];
        let h_scott = scott(&xs, &ws).unwrap();
        let expected = 1.059 * (400.0f64).powf(-0.2);
        assert!((h_scott / expected - 1.0).abs() < 0.15, "h={h_scott}, expected≈{expected}");
        assert!(silverman(&xs, &ws).unwrap() < h_scott);
        assert!(scott(&[1.0, 1.0], &[1.0, 1.0]).is_err());
    }

    #[test]
    fn test_adaptive_bandwidths_widen_in_tails() {
        let xs = sample_centers();
        let kde = KdePdf::from_samples(xs.clone(), None, Bandwidth::Adaptive).unwrap();
        let (i_tail, _) = xs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .unwrap();
        let (i_core, _) = xs
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .unwrap();
        assert!(kde.bandwidths()[i_tail] > kde.bandwidths()[i_core]);
    }

    #[test]
    fn test_normalized_on_range() {
        let kde = KdePdf::from_samples(vec![-1.0, 0.0, 0.5, 2.0], None, Bandwidth::Fixed(0.7)).unwrap();
        let (a, b) = (-1.5, 2.5);
        let n = 40_000;
        let h = (b - a) / n as f64;
        let xs: Vec<f64> = (0..n).map(|i| a + (i as f64 + 0.5) * h).collect();
        let mut out = vec![0.0; n];
        kde.log_prob_batch(&xs, &[], (a, b), &mut out).unwrap();
        let total: f64 = out.iter().map(|lp| lp.exp() * h).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_sampling_respects_limits() {
        let kde = KdePdf::from_samples(vec![0.0, 1.0], Some(vec![1.0, 3.0]), Bandwidth::Fixed(0.5)).unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(9);
        let xs = kde.sample(&[], (0.0, 1.0), 300, &mut rng).unwrap();
        assert_eq!(xs.len(), 300);
        assert!(xs.iter().all(|x| (0.0..=1.0).contains(x)));
        assert!(kde.sample(&[], (50.0, 51.0), 1, &mut rng).is_err());
    }
}
