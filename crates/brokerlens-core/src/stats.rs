//! Small statistics toolkit used by the experiment, aggregation and
//! reporting services.

use serde::{Deserialize, Serialize};

/// Two-sided 95% critical value of the standard normal distribution.
pub const Z_95: f64 = 1.96;

/// Smallest arm size for which the normal approximation is trusted.
pub const MIN_SAMPLES_FOR_TEST: u64 = 30;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator). `None` below two samples.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Pearson correlation coefficient.
///
/// Returns 0.0 for empty or mismatched inputs and when either series has
/// zero variance.
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    if xs.is_empty() || xs.len() != ys.len() {
        return 0.0;
    }
    let n = xs.len() as f64;
    let sum_x: f64 = xs.iter().sum();
    let sum_y: f64 = ys.iter().sum();
    let sum_xy: f64 = xs.iter().zip(ys).map(|(x, y)| x * y).sum();
    let sum_x2: f64 = xs.iter().map(|x| x * x).sum();
    let sum_y2: f64 = ys.iter().map(|y| y * y).sum();

    let numerator = n * sum_xy - sum_x * sum_y;
    let denominator = ((n * sum_x2 - sum_x * sum_x) * (n * sum_y2 - sum_y * sum_y)).sqrt();
    if denominator == 0.0 || !denominator.is_finite() {
        return 0.0;
    }
    (numerator / denominator).clamp(-1.0, 1.0)
}

/// Abramowitz and Stegun 7.1.26, max absolute error 1.5e-7.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}

pub fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ZTest {
    pub z: f64,
    pub p_value: f64,
}

/// Pooled two-proportion z-test, two-sided.
///
/// Arm `a` is the baseline. A positive `z` means arm `b` converts better.
/// When either arm has fewer than [`MIN_SAMPLES_FOR_TEST`] trials the test
/// is not run and `p_value` is 1.0.
pub fn two_proportion_z_test(conv_a: u64, n_a: u64, conv_b: u64, n_b: u64) -> ZTest {
    if n_a < MIN_SAMPLES_FOR_TEST || n_b < MIN_SAMPLES_FOR_TEST {
        return ZTest {
            z: 0.0,
            p_value: 1.0,
        };
    }
    let (na, nb) = (n_a as f64, n_b as f64);
    let p_a = conv_a.min(n_a) as f64 / na;
    let p_b = conv_b.min(n_b) as f64 / nb;
    let pooled = (conv_a.min(n_a) + conv_b.min(n_b)) as f64 / (na + nb);
    let se = (pooled * (1.0 - pooled) * (1.0 / na + 1.0 / nb)).sqrt();
    if se == 0.0 {
        return ZTest {
            z: 0.0,
            p_value: 1.0,
        };
    }
    let z = (p_b - p_a) / se;
    let p_value = (2.0 * (1.0 - normal_cdf(z.abs()))).clamp(0.0, 1.0);
    ZTest { z, p_value }
}

/// Normal-approximation interval for a proportion, clamped to [0, 1].
pub fn proportion_ci(successes: u64, trials: u64, z: f64) -> (f64, f64) {
    if trials == 0 {
        return (0.0, 0.0);
    }
    let n = trials as f64;
    let p = successes.min(trials) as f64 / n;
    let margin = z * (p * (1.0 - p) / n).sqrt();
    ((p - margin).max(0.0), (p + margin).min(1.0))
}

/// Interval for the relative lift of `b` over `a`, via the unpooled
/// standard error of the difference divided by the baseline rate.
pub fn lift_ci(conv_a: u64, n_a: u64, conv_b: u64, n_b: u64, z: f64) -> (f64, f64) {
    if n_a == 0 || n_b == 0 || conv_a == 0 {
        return (0.0, 0.0);
    }
    let p_a = conv_a.min(n_a) as f64 / n_a as f64;
    let p_b = conv_b.min(n_b) as f64 / n_b as f64;
    let se = (p_a * (1.0 - p_a) / n_a as f64 + p_b * (1.0 - p_b) / n_b as f64).sqrt();
    let diff = p_b - p_a;
    ((diff - z * se) / p_a, (diff + z * se) / p_a)
}

/// Per-arm sample size by Lehr's rule (alpha 0.05, power 0.8).
///
/// `mde` is the minimum detectable effect relative to `baseline`.
pub fn lehr_sample_size(baseline: f64, mde: f64) -> u64 {
    let p = baseline.clamp(1e-6, 1.0 - 1e-6);
    let delta = p * mde.abs();
    if delta <= 0.0 {
        return 0;
    }
    (16.0 * p * (1.0 - p) / (delta * delta)).ceil() as u64
}

/// Ordinary least squares fit of `values` against their index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LinearTrend {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

impl LinearTrend {
    pub fn at(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

pub fn linear_trend(values: &[f64]) -> Option<LinearTrend> {
    if values.len() < 2 {
        return None;
    }
    let xs: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    let mx = mean(&xs)?;
    let my = mean(values)?;
    let sxx: f64 = xs.iter().map(|x| (x - mx).powi(2)).sum();
    let sxy: f64 = xs.iter().zip(values).map(|(x, y)| (x - mx) * (y - my)).sum();
    if sxx == 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    let intercept = my - slope * mx;
    let r = pearson(&xs, values);
    Some(LinearTrend {
        slope,
        intercept,
        r_squared: r * r,
    })
}

/// Standard score of `value` within `history`. `None` when the history
/// cannot define a spread.
pub fn z_score(value: f64, history: &[f64]) -> Option<f64> {
    let m = mean(history)?;
    let sd = std_dev(history)?;
    if sd == 0.0 {
        return None;
    }
    Some((value - m) / sd)
}

/// Percentage of `part` in `whole`, 0 when `whole` is zero.
pub fn percent(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        0.0
    } else {
        part / whole * 100.0
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pearson_degrades_to_zero() {
        assert_eq!(pearson(&[], &[]), 0.0);
        assert_eq!(pearson(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[2.0, 3.0, 4.0]), 0.0);
        assert_eq!(pearson(&[5.0], &[7.0]), 0.0);
    }

    #[test]
    fn pearson_detects_linear_relationships() {
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0];
        let ys = [2.0, 4.0, 6.0, 8.0, 10.0];
        assert!((pearson(&xs, &ys) - 1.0).abs() < 1e-9);
        let inverse = [10.0, 8.0, 6.0, 4.0, 2.0];
        assert!((pearson(&xs, &inverse) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn normal_cdf_matches_known_points() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-6);
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-3);
        assert!((normal_cdf(-1.96) - 0.025).abs() < 1e-3);
    }

    #[test]
    fn z_test_finds_significant_difference() {
        let t = two_proportion_z_test(50, 1000, 80, 1000);
        assert!(t.z > 2.5 && t.z < 3.0, "z = {}", t.z);
        assert!(t.p_value < 0.01, "p = {}", t.p_value);
    }

    #[test]
    fn z_test_requires_minimum_samples() {
        let t = two_proportion_z_test(1, 10, 9, 10);
        assert_eq!(t.p_value, 1.0);
    }

    #[test]
    fn proportion_ci_is_clamped() {
        let (lo, hi) = proportion_ci(0, 50, Z_95);
        assert_eq!(lo, 0.0);
        assert_eq!(hi, 0.0);
        let (lo, hi) = proportion_ci(50, 1000, Z_95);
        assert!(lo > 0.03 && lo < 0.05);
        assert!(hi > 0.05 && hi < 0.07);
        assert_eq!(proportion_ci(0, 0, Z_95), (0.0, 0.0));
    }

    #[test]
    fn lehr_rule_for_three_percent_baseline() {
        // 16 * 0.03 * 0.97 / (0.006)^2
        assert_eq!(lehr_sample_size(0.03, 0.20), 12934);
        assert_eq!(lehr_sample_size(0.03, 0.0), 0);
    }

    #[test]
    fn linear_trend_fits_a_line() {
        let t = linear_trend(&[1.0, 3.0, 5.0, 7.0]).unwrap();
        assert!((t.slope - 2.0).abs() < 1e-9);
        assert!((t.intercept - 1.0).abs() < 1e-9);
        assert!((t.at(4.0) - 9.0).abs() < 1e-9);
        assert!(linear_trend(&[1.0]).is_none());
    }

    #[test]
    fn z_score_needs_spread() {
        assert!(z_score(5.0, &[1.0, 1.0, 1.0]).is_none());
        let z = z_score(10.0, &[1.0, 2.0, 3.0]).unwrap();
        assert!(z > 3.0);
    }

    #[test]
    fn summary_statistics_handle_empty_input() {
        assert!(mean(&[]).is_none());
        assert!(std_dev(&[1.0]).is_none());
        assert_eq!(percent(1.0, 0.0), 0.0);
        assert_eq!(round2(1.23456), 1.23);
    }
}
