//! Threshold estimation over the reversal list.
//!
//! The estimate is a pure function of the reversals and is recomputed on every
//! call, so it can never go stale relative to the session it was taken from.

use crate::config::EstimateConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatorKind {
    /// Mean of ln(contrast), exponentiated. Matches the log-spaced staircase levels.
    #[default]
    Geometric,
    /// Plain mean of contrast values
    Arithmetic,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdEstimate {
    /// Contrast as percent of the luminance range
    pub percent_range: f64,
    /// RMS contrast of uniform noise at `percent_range`, two decimals
    pub rms_percent: f64,
    pub kind: EstimatorKind,
    /// Number of reversals averaged
    pub reversals_used: usize,
}

/// Percent-of-range contrast converted to RMS percent, rounded to two decimals
pub fn rms_percent(percent_range: f64) -> f64 {
    round2(percent_range / 100.0 / 3f64.sqrt() * 100.0)
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// `None` until `config.min_reversals` reversals exist
pub fn estimate_threshold(reversals: &[f64], config: &EstimateConfig) -> Option<ThresholdEstimate> {
    if reversals.len() < config.min_reversals.max(1) {
        return None;
    }
    let window = config.window.max(1).min(reversals.len());
    let recent = &reversals[reversals.len() - window..];
    let n = recent.len() as f64;

    let percent_range = match config.kind {
        EstimatorKind::Geometric => {
            let log_mean = recent.iter().map(|r| r.ln()).sum::<f64>() / n;
            log_mean.exp()
        }
        EstimatorKind::Arithmetic => recent.iter().sum::<f64>() / n,
    };
    if !percent_range.is_finite() {
        return None;
    }

    Some(ThresholdEstimate {
        percent_range,
        rms_percent: rms_percent(percent_range),
        kind: config.kind,
        reversals_used: window,
    })
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    var.max(0.0).sqrt()
}

/// Population standard deviation of ln(values)
pub fn log_std_dev(values: &[f64]) -> f64 {
    let logs: Vec<f64> = values.iter().map(|v| v.ln()).collect();
    std_dev(&logs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn absent_below_minimum_reversals() {
        let cfg = EstimateConfig::default();
        assert!(estimate_threshold(&[], &cfg).is_none());
        assert!(estimate_threshold(&[10.0, 8.0, 9.0], &cfg).is_none());
        assert!(estimate_threshold(&[10.0, 8.0, 9.0, 7.0], &cfg).is_some());
    }

    #[test]
    fn geometric_mean_uses_last_window() {
        let cfg = EstimateConfig::default();
        let reversals = [50.0, 40.0, 2.0, 8.0, 2.0, 8.0, 2.0, 8.0];
        let est = estimate_threshold(&reversals, &cfg).unwrap();
        assert_relative_eq!(est.percent_range, 4.0, max_relative = 1e-12);
        assert_eq!(est.reversals_used, 6);
        assert_eq!(est.kind, EstimatorKind::Geometric);
    }

    #[test]
    fn arithmetic_mean_is_the_legacy_option() {
        let cfg = EstimateConfig {
            kind: EstimatorKind::Arithmetic,
            ..EstimateConfig::default()
        };
        let est = estimate_threshold(&[2.0, 8.0, 2.0, 8.0], &cfg).unwrap();
        assert_relative_eq!(est.percent_range, 5.0);
        assert_eq!(est.reversals_used, 4);
    }

    #[test]
    fn rms_conversion_rounds_to_two_decimals() {
        assert_eq!(rms_percent(15.0), 8.66);
        assert_eq!(rms_percent(100.0), 57.74);
        assert_eq!(rms_percent(0.1), 0.06);
    }

    #[test]
    fn log_spread_is_scale_free() {
        assert_relative_eq!(log_std_dev(&[1.0, 1.0, 1.0]), 0.0);
        assert_relative_eq!(
            log_std_dev(&[2.0, 4.0]),
            log_std_dev(&[20.0, 40.0]),
            max_relative = 1e-12
        );
        assert_relative_eq!(log_std_dev(&[1.0, std::f64::consts::E]), 0.5, max_relative = 1e-12);
    }
}
