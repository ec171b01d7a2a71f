//! Stratified variance kernels.
//!
//! Pure numeric functions implementing the FIA design-based estimators:
//! the stratified SRS total (no finite-population correction at this
//! layer, per the published convention) and the ratio-of-means estimator
//! with its Taylor-series variance. Inputs arrive as per-stratum moment
//! sums so zero-valued plots can be completed algebraically.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Per-stratum moment sums over the plot values.
///
/// `n` is the phase-2 plot count (`P2POINTCNT`), not the number of
/// non-zero plots; plots absent from the sums contribute zero to each.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StratumMoments {
    /// Stratum expansion factor (`EXPNS`, acres per plot).
    pub weight: f64,
    /// Phase-2 plot count.
    pub n: f64,
    /// Sum of numerator plot values.
    pub sum_y: f64,
    /// Sum of squared numerator plot values.
    pub sum_y2: f64,
    /// Sum of denominator plot values.
    pub sum_x: f64,
    /// Sum of squared denominator plot values.
    pub sum_x2: f64,
    /// Sum of per-plot numerator×denominator products.
    pub sum_xy: f64,
}

impl StratumMoments {
    /// Stratum plot mean of the numerator.
    #[must_use]
    pub fn ybar(&self) -> f64 {
        if self.n > 0.0 { self.sum_y / self.n } else { 0.0 }
    }

    /// Stratum plot mean of the denominator.
    #[must_use]
    pub fn xbar(&self) -> f64 {
        if self.n > 0.0 { self.sum_x / self.n } else { 0.0 }
    }

    /// Sample variance of the numerator plot values; 0 for single-plot
    /// strata (their squared deviation is undefined).
    #[must_use]
    pub fn s2_y(&self) -> f64 {
        sample_variance(self.sum_y, self.sum_y2, self.n)
    }

    /// Sample variance of the denominator plot values.
    #[must_use]
    pub fn s2_x(&self) -> f64 {
        sample_variance(self.sum_x, self.sum_x2, self.n)
    }

    /// Sample covariance between numerator and denominator plot values.
    #[must_use]
    pub fn cov_xy(&self) -> f64 {
        if self.n <= 1.0 {
            return 0.0;
        }
        (self.sum_xy - self.n * self.ybar() * self.xbar()) / (self.n - 1.0)
    }
}

fn sample_variance(sum: f64, sum_sq: f64, n: f64) -> f64 {
    if n <= 1.0 {
        return 0.0;
    }
    let mean = sum / n;
    // Guard the algebraic form against tiny negative rounding residue.
    ((sum_sq - n * mean * mean) / (n - 1.0)).max(0.0)
}

/// A population total with its variance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TotalEstimate {
    /// Expanded population total.
    pub total: f64,
    /// Stratified SRS variance of the total.
    pub variance: f64,
}

/// A ratio-of-means estimate with its Taylor variance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatioEstimate {
    /// The ratio `Ŷ / X̂` (per-acre value).
    pub ratio: f64,
    /// Taylor-series variance of the ratio, floored at 0.
    pub variance: f64,
    /// Numerator total.
    pub total_y: f64,
    /// Denominator total.
    pub total_x: f64,
    /// True when `X̂ = 0` forced the degenerate `R = 0, Var = 0` outcome.
    pub degenerate: bool,
}

/// Stratified total: `Ŷ = Σ_h w_h·Σy_i` with
/// `Var(Ŷ) = Σ_h w_h²·n_h·s²_{y,h}`.
#[must_use]
pub fn stratified_total(moments: &[StratumMoments]) -> TotalEstimate {
    let weight = Array1::from_iter(moments.iter().map(|m| m.weight));
    let n = Array1::from_iter(moments.iter().map(|m| m.n));
    let sum_y = Array1::from_iter(moments.iter().map(|m| m.sum_y));
    let s2 = Array1::from_iter(moments.iter().map(StratumMoments::s2_y));

    let total = (&weight * &sum_y).sum();
    let variance = (&weight * &weight * &n * &s2).sum();
    TotalEstimate { total, variance }
}

/// Ratio of means: `R = Ŷ/X̂` with
/// `Var(R) = (1/X̂²)·Σ_h w_h²·n_h·[s²_y + R²·s²_x − 2R·s_yx]`.
///
/// The variance is floored at 0 before any square root (sampling noise can
/// push the Taylor form slightly negative). `X̂ = 0` yields the degenerate
/// `R = 0, Var = 0` with the diagnostic flag set.
#[must_use]
pub fn ratio_of_means(moments: &[StratumMoments]) -> RatioEstimate {
    let total_y = moments.iter().map(|m| m.weight * m.sum_y).sum::<f64>();
    let total_x = moments.iter().map(|m| m.weight * m.sum_x).sum::<f64>();

    if total_x == 0.0 {
        return RatioEstimate {
            ratio: 0.0,
            variance: 0.0,
            total_y,
            total_x,
            degenerate: true,
        };
    }

    let ratio = total_y / total_x;
    let mut acc = 0.0;
    for m in moments {
        let term = m.s2_y() + ratio * ratio * m.s2_x() - 2.0 * ratio * m.cov_xy();
        acc += m.weight * m.weight * m.n * term;
    }
    let variance = (acc / (total_x * total_x)).max(0.0);

    RatioEstimate {
        ratio,
        variance,
        total_y,
        total_x,
        degenerate: false,
    }
}

/// Standard error from a variance (negative residue floors to 0).
#[must_use]
pub fn standard_error(variance: f64) -> f64 {
    variance.max(0.0).sqrt()
}

/// Coefficient of variation in percent; 0 when the estimate is 0.
#[must_use]
pub fn cv_percent(se: f64, estimate: f64) -> f64 {
    if estimate == 0.0 {
        0.0
    } else {
        100.0 * se / estimate.abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    /// Moments from explicit plot values, padding with zeros up to `n`.
    fn moments_from_plots(weight: f64, n: usize, y: &[f64], x: &[f64]) -> StratumMoments {
        assert!(y.len() <= n && x.len() <= n);
        let mut m = StratumMoments {
            weight,
            n: n as f64,
            ..Default::default()
        };
        for (i, &yi) in y.iter().enumerate() {
            let xi = x.get(i).copied().unwrap_or(0.0);
            m.sum_y += yi;
            m.sum_y2 += yi * yi;
            m.sum_xy += yi * xi;
        }
        for &xi in x {
            m.sum_x += xi;
            m.sum_x2 += xi * xi;
        }
        m
    }

    #[test]
    fn test_stratified_total_hand_computed() {
        // Two strata; second has a zero-valued plot completed implicitly.
        let a = moments_from_plots(100.0, 2, &[1.0, 3.0], &[]);
        let b = moments_from_plots(50.0, 2, &[4.0], &[]);
        let est = stratified_total(&[a, b]);

        // Totals: 100·4 + 50·4 = 600.
        assert_relative_eq!(est.total, 600.0);
        // s² for a: ((1-2)²+(3-2)²)/1 = 2; for b: ((4-2)²+(0-2)²)/1 = 8.
        assert_relative_eq!(a.s2_y(), 2.0);
        assert_relative_eq!(b.s2_y(), 8.0);
        // Var = 100²·2·2 + 50²·2·8 = 40000 + 40000.
        assert_relative_eq!(est.variance, 80_000.0);
    }

    #[test]
    fn test_single_plot_stratum_contributes_zero_variance() {
        let m = moments_from_plots(100.0, 1, &[5.0], &[]);
        assert_relative_eq!(m.s2_y(), 0.0);
        let est = stratified_total(&[m]);
        assert_relative_eq!(est.total, 500.0);
        assert_relative_eq!(est.variance, 0.0);
    }

    #[test]
    fn test_ratio_of_means_hand_computed() {
        // One stratum, 2 plots: y = (2, 4), x = (1, 1).
        let m = moments_from_plots(10.0, 2, &[2.0, 4.0], &[1.0, 1.0]);
        let est = ratio_of_means(&[m]);
        assert!(!est.degenerate);
        assert_relative_eq!(est.total_y, 60.0);
        assert_relative_eq!(est.total_x, 20.0);
        assert_relative_eq!(est.ratio, 3.0);
        // s²_y = 2, s²_x = 0, cov = (2+4 − 2·3·1)/1 = 0.
        // Var = (1/400)·100·2·2 = 1.0.
        assert_relative_eq!(est.variance, 1.0);
    }

    #[test]
    fn test_ratio_with_covariance() {
        // Perfectly proportional y and x: the ratio is exact, variance 0.
        let m = moments_from_plots(10.0, 2, &[2.0, 4.0], &[1.0, 2.0]);
        let est = ratio_of_means(&[m]);
        assert_relative_eq!(est.ratio, 2.0);
        assert_relative_eq!(est.variance, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_denominator_degenerates() {
        let m = moments_from_plots(10.0, 2, &[2.0, 4.0], &[]);
        let est = ratio_of_means(&[m]);
        assert!(est.degenerate);
        assert_relative_eq!(est.ratio, 0.0);
        assert_relative_eq!(est.variance, 0.0);
    }

    #[test]
    fn test_se_and_cv() {
        assert_relative_eq!(standard_error(16.0), 4.0);
        assert_relative_eq!(standard_error(-1e-9), 0.0);
        assert_relative_eq!(cv_percent(4.0, 100.0), 4.0);
        assert_relative_eq!(cv_percent(4.0, -100.0), 4.0);
        assert_relative_eq!(cv_percent(4.0, 0.0), 0.0);
    }

    #[test]
    fn test_ratio_reduces_to_scaled_total_variance() {
        // With s_x = s_xy = 0 and X > 0: Var(R) = Σ w²·n·s²_y / X².
        let mut m = moments_from_plots(10.0, 3, &[1.0, 2.0, 3.0], &[]);
        m.sum_x = 3.0; // constant x = 1 per plot
        m.sum_x2 = 3.0;
        m.sum_xy = 1.0 + 2.0 + 3.0;
        // Make x constant so s²_x = 0 and cov = 0.
        assert_relative_eq!(m.s2_x(), 0.0);
        assert_relative_eq!(m.cov_xy(), 0.0);

        let est = ratio_of_means(&[m]);
        let expected = 100.0 * 3.0 * m.s2_y() / (30.0 * 30.0);
        assert_relative_eq!(est.variance, expected);
    }

    proptest! {
        #[test]
        fn prop_variance_nonnegative(
            weights in proptest::collection::vec(0.1f64..1e4, 1..6),
            values in proptest::collection::vec(proptest::collection::vec(-1e3f64..1e3, 0..8), 1..6),
        ) {
            let moments: Vec<StratumMoments> = weights
                .iter()
                .zip(values.iter())
                .map(|(w, plot_values)| {
                    moments_from_plots(*w, plot_values.len().max(1), plot_values, &[])
                })
                .collect();
            let est = stratified_total(&moments);
            prop_assert!(est.variance >= 0.0);
            prop_assert!(standard_error(est.variance) >= 0.0);
        }

        #[test]
        fn prop_ratio_variance_nonnegative(
            y in proptest::collection::vec(0.0f64..1e3, 2..8),
            x in proptest::collection::vec(0.0f64..10.0, 2..8),
        ) {
            let n = y.len().max(x.len());
            let m = moments_from_plots(25.0, n, &y, &x);
            let est = ratio_of_means(&[m]);
            prop_assert!(est.variance >= 0.0);
        }

        #[test]
        fn prop_total_scales_linearly(scale in 0.1f64..10.0) {
            let base = moments_from_plots(100.0, 3, &[1.0, 2.0, 3.0], &[]);
            let scaled = StratumMoments {
                sum_y: base.sum_y * scale,
                sum_y2: base.sum_y2 * scale * scale,
                ..base
            };
            let a = stratified_total(&[base]);
            let b = stratified_total(&[scaled]);
            prop_assert!((b.total - a.total * scale).abs() < 1e-6 * a.total.abs().max(1.0));
            prop_assert!(
                (b.variance - a.variance * scale * scale).abs()
                    < 1e-6 * a.variance.abs().max(1.0)
            );
        }
    }
}
