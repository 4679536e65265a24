use fk_inference::ProfileLikelihoodScan;
use serde::{Deserialize, Serialize};

/// Single point in a profile likelihood curve artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileCurvePoint {
    /// Tested parameter value.
    pub value: f64,
    /// Conditional NLL at `value`.
    pub nll: f64,
    /// Whether the conditional fit converged.
    pub converged: bool,
}

/// Plot-friendly artifact for a profile likelihood scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileCurveArtifact {
    /// Scanned parameter name.
    pub param: String,
    /// Unconditional best-fit value.
    pub best_value: f64,
    /// Unconditional NLL at the global minimum.
    pub nll_hat: f64,
    /// Per-point results.
    pub points: Vec<ProfileCurvePoint>,
    /// Scan x-values (same as `points[*].value`).
    pub values: Vec<f64>,
    /// `2 * (nll - nll_hat)` aligned with `values`.
    pub twice_delta_nll: Vec<f64>,
}

impl ProfileCurveArtifact {
    /// Linear interpolation of the scan where `2ΔNLL` crosses `level`, walking outwards
    /// from the best-fit value. `None` on a side the scan never crosses.
    pub fn crossings(&self, level: f64) -> (Option<f64>, Option<f64>) {
        let mut order: Vec<usize> = (0..self.values.len()).collect();
        order.sort_by(|&a, &b| self.values[a].total_cmp(&self.values[b]));
        let xs: Vec<f64> = order.iter().map(|&i| self.values[i]).collect();
        let ys: Vec<f64> = order.iter().map(|&i| self.twice_delta_nll[i]).collect();
        if xs.len() < 2 {
            return (None, None);
        }
        let split = xs.partition_point(|&x| x < self.best_value);

        let interp = |i: usize, j: usize| {
            let t = (level - ys[i]) / (ys[j] - ys[i]);
            xs[i] + t * (xs[j] - xs[i])
        };
        let lower = (1..=split.min(xs.len() - 1))
            .rev()
            .find(|&j| ys[j] <= level && ys[j - 1] > level)
            .map(|j| interp(j, j - 1));
        let upper = (split.max(1)..xs.len())
            .find(|&j| ys[j - 1] <= level && ys[j] > level)
            .map(|j| interp(j - 1, j));
        (lower, upper)
    }
}

impl From<ProfileLikelihoodScan> for ProfileCurveArtifact {
    fn from(scan: ProfileLikelihoodScan) -> Self {
        let ProfileLikelihoodScan { param, best_value, nll_hat, points } = scan;

        let mut out_points = Vec::with_capacity(points.len());
        let mut values = Vec::with_capacity(points.len());
        let mut twice_delta_nll = Vec::with_capacity(points.len());

        for p in points {
            values.push(p.value);
            twice_delta_nll.push(p.delta_two_nll);
            out_points.push(ProfileCurvePoint { value: p.value, nll: p.nll, converged: p.converged });
        }

        Self { param, best_value, nll_hat, points: out_points, values, twice_delta_nll }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use fk_inference::ProfilePoint;

    fn parabola_scan() -> ProfileLikelihoodScan {
        let points = (0..=20)
            .map(|i| {
                let v = -2.0 + 0.2 * i as f64;
                ProfilePoint { value: v, nll: 10.0 + 0.5 * v * v, delta_two_nll: v * v, converged: true }
            })
            .collect();
        ProfileLikelihoodScan { param: "mu".into(), best_value: 0.0, nll_hat: 10.0, points }
    }

    #[test]
    fn test_arrays_are_aligned() {
        let art = ProfileCurveArtifact::from(parabola_scan());
        assert_eq!(art.values.len(), 21);
        assert_eq!(art.twice_delta_nll.len(), 21);
        assert_relative_eq!(art.twice_delta_nll[0], 4.0, epsilon = 1e-12);
        assert_eq!(art.points[10].value, art.values[10]);
    }

    #[test]
    fn test_crossings_of_a_parabola() {
        let art = ProfileCurveArtifact::from(parabola_scan());
        let (lo, hi) = art.crossings(1.0);
        assert_relative_eq!(lo.unwrap(), -1.0, epsilon = 1e-9);
        assert_relative_eq!(hi.unwrap(), 1.0, epsilon = 1e-9);
        assert_eq!(art.crossings(9.0), (None, None));
    }
}
