//! # Discrete Exponential Family
//!
//! A distribution on a finite support `t_1 < ... < t_n` with base log weights
//! `w_i`, tilted by a natural parameter `η`:
//!
//! ```text
//! P_η(T = t_i) ∝ exp(w_i + η t_i)
//! ```
//!
//! All sums are taken after subtracting the maximal exponent, so extreme tilts
//! do not overflow.

use ndarray::{Array1, ArrayView1};

#[derive(Debug, Clone)]
pub struct DiscreteFamily {
    support: Array1<f64>,
    log_weights: Array1<f64>,
}

impl DiscreteFamily {
    /// Builds a family from paired support points and log weights. Pairs with
    /// a non-finite entry are dropped; `None` if nothing is left.
    pub fn new(support: ArrayView1<f64>, log_weights: ArrayView1<f64>) -> Option<Self> {
        let (kept_support, kept_weights): (Vec<f64>, Vec<f64>) = support
            .iter()
            .zip(log_weights.iter())
            .filter(|&(&t, &w)| t.is_finite() && w.is_finite())
            .map(|(&t, &w)| (t, w))
            .unzip();
        if kept_support.is_empty() {
            return None;
        }
        Some(Self {
            support: Array1::from(kept_support),
            log_weights: Array1::from(kept_weights),
        })
    }

    pub fn support(&self) -> ArrayView1<'_, f64> {
        self.support.view()
    }

    pub fn log_weights(&self) -> ArrayView1<'_, f64> {
        self.log_weights.view()
    }

    pub fn len(&self) -> usize {
        self.support.len()
    }

    pub fn is_empty(&self) -> bool {
        self.support.is_empty()
    }

    fn tilted(&self, theta: f64) -> Array1<f64> {
        let exponents = &self.log_weights + &(&self.support * theta);
        let top = exponents.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
        exponents.mapv(|v| (v - top).exp())
    }

    /// `(P_θ(T <= x), P_θ(T > x))`, each summed directly so neither tail
    /// loses precision to cancellation.
    pub fn tails(&self, theta: f64, x: f64) -> (f64, f64) {
        let masses = self.tilted(theta);
        let mut lower = 0.0;
        let mut upper = 0.0;
        for (&t, &m) in self.support.iter().zip(masses.iter()) {
            if t <= x {
                lower += m;
            } else {
                upper += m;
            }
        }
        let total = lower + upper;
        (lower / total, upper / total)
    }

    /// `P_θ(T <= x)`.
    pub fn cdf(&self, theta: f64, x: f64) -> f64 {
        self.tails(theta, x).0
    }
}

/// Resamples `values`, known at the increasing `nodes`, onto `points` by
/// linear interpolation. Non-finite values are skipped; points outside the
/// finite range come back as NaN.
pub(crate) fn interpolate_linear(
    nodes: ArrayView1<f64>,
    values: ArrayView1<f64>,
    points: ArrayView1<f64>,
) -> Array1<f64> {
    let known: Vec<(f64, f64)> = nodes
        .iter()
        .zip(values.iter())
        .filter(|&(_, &v)| v.is_finite())
        .map(|(&x, &v)| (x, v))
        .collect();

    points.mapv(|p| {
        let upper = known.partition_point(|&(x, _)| x < p);
        match (upper.checked_sub(1).and_then(|i| known.get(i)), known.get(upper)) {
            (_, Some(&(x1, v1))) if x1 == p => v1,
            (Some(&(x0, v0)), Some(&(x1, v1))) => {
                let weight = (p - x0) / (x1 - x0);
                v0 + weight * (v1 - v0)
            }
            _ => f64::NAN,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::array;

    #[test]
    fn non_finite_weights_are_dropped() {
        let family = DiscreteFamily::new(
            array![0.0, 1.0, 2.0, 3.0].view(),
            array![0.0, f64::NAN, 0.0, f64::NEG_INFINITY].view(),
        )
        .expect("two points survive");
        assert_eq!(family.len(), 2);
        assert_eq!(family.support(), array![0.0, 2.0].view());
        assert!(DiscreteFamily::new(array![0.0].view(), array![f64::NAN].view()).is_none());
    }

    #[test]
    fn tilt_matches_direct_computation() {
        let support = array![-1.0, 0.0, 1.0, 2.0];
        let weights = array![0.3, -0.2, 0.1, -1.0];
        let family = DiscreteFamily::new(support.view(), weights.view()).expect("family");
        let theta = 0.7;
        let raw: Vec<f64> = support
            .iter()
            .zip(weights.iter())
            .map(|(&t, &w)| (w + theta * t).exp())
            .collect();
        let total: f64 = raw.iter().sum();
        assert_relative_eq!(family.cdf(theta, 0.5), (raw[0] + raw[1]) / total, max_relative = 1e-12);
        let (lower, upper) = family.tails(theta, 0.5);
        assert_relative_eq!(lower + upper, 1.0, max_relative = 1e-12);
    }

    #[test]
    fn extreme_tilts_do_not_overflow() {
        let support = Array1::linspace(-5.0, 5.0, 101);
        let weights = support.mapv(|t: f64| -0.5 * t * t);
        let family = DiscreteFamily::new(support.view(), weights.view()).expect("family");
        assert_abs_diff_eq!(family.cdf(1e4, 0.0), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(family.cdf(-1e4, 0.0), 1.0, epsilon = 1e-12);
        assert!(family.cdf(1e4, 0.0).is_finite());
    }

    #[test]
    fn cdf_decreases_in_the_natural_parameter() {
        let support = Array1::linspace(-3.0, 3.0, 61);
        let weights = support.mapv(|t: f64| -0.5 * t * t);
        let family = DiscreteFamily::new(support.view(), weights.view()).expect("family");
        let mut previous = 1.0;
        for step in -20..=20 {
            let current = family.cdf(step as f64 * 0.25, 0.05);
            assert!(current <= previous + 1e-15);
            previous = current;
        }
    }

    #[test]
    fn interpolation_skips_missing_nodes() {
        let nodes = array![0.0, 1.0, 2.0, 3.0];
        let values = array![0.0, f64::NAN, 2.0, 6.0];
        let points = array![-0.5, 0.0, 0.5, 1.5, 2.5, 3.0, 3.5];
        let resampled = interpolate_linear(nodes.view(), values.view(), points.view());
        assert!(resampled[0].is_nan());
        assert_relative_eq!(resampled[1], 0.0);
        assert_relative_eq!(resampled[2], 0.5);
        assert_relative_eq!(resampled[3], 1.5);
        assert_relative_eq!(resampled[4], 4.0);
        assert_relative_eq!(resampled[5], 6.0);
        assert!(resampled[6].is_nan());
    }
}
