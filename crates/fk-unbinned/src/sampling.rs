//! Random draws used to generate pseudo-data.

use fk_core::{Error, Result};
use rand::{Rng, RngCore};
use rand_distr::{Binomial, Distribution, Poisson};

/// Grid points scanned to bound a shape before accept-reject.
const ENVELOPE_GRID: usize = 1024;

/// Safety factor applied on top of the scanned maximum.
const ENVELOPE_MARGIN: f64 = 1.25;

/// Accept-reject sampling of `exp(log_f)` on `limits` under a flat envelope.
///
/// The envelope is the maximum of `log_f` over a regular grid plus `hints` (e.g. known
/// modes), widened by a constant factor. If a draw ever exceeds the envelope it is
/// raised and the draws accepted so far are discarded, since they came from the
/// clipped density.
pub fn accept_reject<F>(
    log_f: F,
    limits: (f64, f64),
    n: usize,
    rng: &mut dyn RngCore,
    hints: &[f64],
) -> Result<Vec<f64>>
where
    F: Fn(f64) -> f64,
{
    let (a, b) = limits;
    if !(a.is_finite() && b.is_finite() && a < b) {
        return Err(Error::Validation(format!("invalid sampling limits ({a}, {b})")));
    }

    let step = (b - a) / ENVELOPE_GRID as f64;
    let log_max = (0..=ENVELOPE_GRID)
        .map(|i| a + i as f64 * step)
        .chain(hints.iter().copied().filter(|x| *x >= a && *x <= b))
        .map(&log_f)
        .filter(|v| !v.is_nan())
        .fold(f64::NEG_INFINITY, f64::max);
    if !log_max.is_finite() {
        return Err(Error::Computation(format!(
            "cannot bound density for sampling on ({a}, {b}): max log f = {log_max}"
        )));
    }
    let mut log_env = log_max + ENVELOPE_MARGIN.ln();

    let max_attempts = 1000usize.saturating_mul(n).saturating_add(100_000);
    let mut out = Vec::with_capacity(n);
    let mut attempts = 0usize;
    while out.len() < n {
        attempts += 1;
        if attempts > max_attempts {
            return Err(Error::Computation(format!(
                "accept-reject gave up after {max_attempts} attempts ({} of {n} accepted)",
                out.len()
            )));
        }
        let x = rng.gen_range(a..b);
        let lf = log_f(x);
        if lf > log_env {
            log::debug!("raising sampling envelope at x={x}: {lf} > {log_env}");
            log_env = lf + ENVELOPE_MARGIN.ln();
            out.clear();
        }
        let u: f64 = rng.gen_range(0.0..1.0);
        if u.ln() + log_env < lf {
            out.push(x);
        }
    }
    Ok(out)
}

/// Split `n` draws over categories with probabilities `probs` (need not be normalized).
pub fn multinomial_counts(n: usize, probs: &[f64], rng: &mut dyn RngCore) -> Result<Vec<usize>> {
    if probs.iter().any(|p| !p.is_finite() || *p < 0.0) {
        return Err(Error::Validation(format!("invalid category probabilities {probs:?}")));
    }
    let total: f64 = probs.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return Err(Error::Validation("category probabilities sum to zero".into()));
    }

    let mut counts = vec![0usize; probs.len()];
    let mut left = n as u64;
    let mut mass_left = total;
    for (i, &p) in probs.iter().enumerate() {
        if left == 0 {
            break;
        }
        if i + 1 == probs.len() || mass_left <= p {
            counts[i] = left as usize;
            break;
        }
        let q = (p / mass_left).clamp(0.0, 1.0);
        let k = Binomial::new(left, q)
            .map_err(|e| Error::Computation(format!("binomial draw failed: {e}")))?
            .sample(&mut *rng);
        counts[i] = k as usize;
        left -= k;
        mass_left -= p;
    }
    Ok(counts)
}

/// Poisson-distributed event count with mean `nu`.
pub fn poisson_count(nu: f64, rng: &mut dyn RngCore) -> Result<usize> {
    if !(nu.is_finite() && nu >= 0.0) {
        return Err(Error::Validation(format!("Poisson mean must be finite and >= 0, got {nu}")));
    }
    if nu == 0.0 {
        return Ok(0);
    }
    let k: f64 = Poisson::new(nu)
        .map_err(|e| Error::Computation(format!("Poisson draw failed: {e}")))?
        .sample(&mut *rng);
    Ok(k as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_accept_reject_triangle_mean() {
        let mut rng = StdRng::seed_from_u64(1);
        // f(x) = x on [0, 1] has mean 2/3.
        let xs = accept_reject(|x: f64| x.ln(), (0.0, 1.0), 20_000, &mut rng, &[]).unwrap();
        let mean = xs.iter().sum::<f64>() / xs.len() as f64;
        assert!((mean - 2.0 / 3.0).abs() < 0.01, "{mean}");
    }

    #[test]
    fn test_accept_reject_spike_between_grid_points() {
        // Narrow peak centred between two scan points: the scanned envelope clips it.
        let (c, w) = (0.5 + 0.5 / ENVELOPE_GRID as f64, 2e-4);
        let log_f = |x: f64| (1.0 + 20.0 * (-0.5 * ((x - c) / w).powi(2)).exp()).ln();
        let mut rng = StdRng::seed_from_u64(9);
        let n = 20_000;
        let xs = accept_reject(log_f, (0.0, 1.0), n, &mut rng, &[]).unwrap();
        assert_eq!(xs.len(), n);

        let peak_mass = 20.0 * w * (2.0 * std::f64::consts::PI).sqrt();
        let expected = (10.0 * w + peak_mass) / (1.0 + peak_mass);
        let near = xs.iter().filter(|x| (*x - c).abs() < 5.0 * w).count() as f64 / n as f64;
        let sd = (expected * (1.0 - expected) / n as f64).sqrt();
        assert!((near - expected).abs() < 4.0 * sd, "{near} vs {expected}");
    }

    #[test]
    fn test_accept_reject_rejects_empty_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(accept_reject(|_| f64::NEG_INFINITY, (0.0, 1.0), 1, &mut rng, &[]).is_err());
    }

    #[test]
    fn test_multinomial_counts_sum_to_n() {
        let mut rng = StdRng::seed_from_u64(2);
        let c = multinomial_counts(10_000, &[0.2, 0.0, 0.8], &mut rng).unwrap();
        assert_eq!(c.iter().sum::<usize>(), 10_000);
        assert_eq!(c[1], 0);
        assert!((c[0] as f64 - 2000.0).abs() < 200.0, "{c:?}");
        assert!(multinomial_counts(5, &[0.0, 0.0], &mut rng).is_err());
    }

    #[test]
    fn test_poisson_count_mean() {
        let mut rng = StdRng::seed_from_u64(3);
        let total: usize = (0..2000).map(|_| poisson_count(4.0, &mut rng).unwrap()).sum();
        let mean = total as f64 / 2000.0;
        assert!((mean - 4.0).abs() < 0.2, "{mean}");
        assert_eq!(poisson_count(0.0, &mut rng).unwrap(), 0);
    }
}
