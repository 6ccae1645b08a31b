//! Noise field synthesis with exact RMS normalisation.
//!
//! Each pixel starts as a uniform deviate around mid-gray. The realised field is
//! then rescaled so its standard deviation equals the theoretical RMS of uniform
//! noise at the requested contrast and recentred on mid-gray. Only variance
//! differs between a noise interval and a blank one; mean luminance does not.

use vss_core::Mulberry32;

/// Centre of the 8-bit luminance range
pub const MID_GRAY: f64 = 127.5;

const MAX_LUMA: f64 = 255.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldStats {
    /// Standard deviation before normalisation
    pub raw_std_dev: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub target_std_dev: f64,
}

/// Theoretical luminance SD of uniform noise spanning ±contrast around mid-gray
pub fn target_std_dev(contrast_pct: f64) -> f64 {
    contrast_fraction(contrast_pct) / 3f64.sqrt() * MID_GRAY
}

fn contrast_fraction(contrast_pct: f64) -> f64 {
    if contrast_pct.is_finite() {
        (contrast_pct / 100.0).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Population mean and standard deviation
pub fn mean_std_dev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (MID_GRAY, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.max(0.0).sqrt())
}

/// Reusable luminance buffer for one noise frame
#[derive(Debug, Clone, Default)]
pub struct NoiseField {
    width: u32,
    height: u32,
    values: Vec<f64>,
}

impl NoiseField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Reallocate only when the requested dimensions change. Returns true if it did.
    pub fn ensure_size(&mut self, width: u32, height: u32) -> bool {
        if self.width == width && self.height == height && !self.values.is_empty() {
            return false;
        }
        self.width = width;
        self.height = height;
        self.values = vec![MID_GRAY; width as usize * height as usize];
        true
    }

    /// Fill the field for `seed` at `contrast_pct` (percent of range)
    pub fn synthesize(&mut self, seed: u32, contrast_pct: f64, width: u32, height: u32) -> FieldStats {
        self.ensure_size(width.max(1), height.max(1));

        let c = contrast_fraction(contrast_pct);
        let amp = c * MID_GRAY;
        let mut rng = Mulberry32::new(seed);
        for v in self.values.iter_mut() {
            *v = (MID_GRAY + rng.next_signed() * amp).clamp(0.0, MAX_LUMA);
        }

        let (raw_mean, raw_sd) = mean_std_dev(&self.values);
        // all-equal samples: treat the divisor as 1
        let sd = if raw_sd > 0.0 { raw_sd } else { 1.0 };
        let target = target_std_dev(contrast_pct);
        let gain = target / sd;
        for v in self.values.iter_mut() {
            *v = (MID_GRAY + (*v - raw_mean) * gain).clamp(0.0, MAX_LUMA);
        }

        let (mean, std_dev) = mean_std_dev(&self.values);
        FieldStats {
            raw_std_dev: raw_sd,
            mean,
            std_dev,
            target_std_dev: target,
        }
    }

    /// Quantised luminance at sample index `i`
    #[inline]
    pub fn luma(&self, i: usize) -> u8 {
        self.values[i].round() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn normalised_field_hits_target_rms_and_mid_gray() {
        let mut field = NoiseField::new();
        for (i, &pct) in [0.1, 0.5, 1.0, 4.2, 15.0, 33.3, 60.0, 80.0].iter().enumerate() {
            let stats = field.synthesize(12_345 + i as u32 * 7, pct, 160, 90);
            assert_relative_eq!(stats.std_dev, target_std_dev(pct), max_relative = 1e-9);
            assert_abs_diff_eq!(stats.mean, MID_GRAY, epsilon = 1e-9);
        }
    }

    #[test]
    fn full_contrast_stays_close_to_target() {
        let mut field = NoiseField::new();
        let stats = field.synthesize(42, 100.0, 200, 100);
        // a handful of samples may clip at the range ends
        assert_relative_eq!(stats.std_dev, stats.target_std_dev, max_relative = 1e-2);
        assert_abs_diff_eq!(stats.mean, MID_GRAY, epsilon = 0.5);
        assert!(field.values().iter().all(|v| (0.0..=255.0).contains(v)));
    }

    #[test]
    fn zero_contrast_is_flat_mid_gray() {
        let mut field = NoiseField::new();
        let stats = field.synthesize(1, 0.0, 8, 8);
        assert_eq!(stats.raw_std_dev, 0.0);
        assert_eq!(stats.std_dev, 0.0);
        assert!(field.values().iter().all(|&v| v == MID_GRAY));
    }

    #[test]
    fn same_seed_reproduces_field() {
        let mut a = NoiseField::new();
        let mut b = NoiseField::new();
        a.synthesize(777, 12.0, 32, 24);
        b.synthesize(777, 12.0, 32, 24);
        assert_eq!(a.values(), b.values());
        b.synthesize(778, 12.0, 32, 24);
        assert_ne!(a.values(), b.values());
    }

    #[test]
    fn buffer_reallocates_only_on_size_change() {
        let mut field = NoiseField::new();
        assert!(field.ensure_size(10, 10));
        assert!(!field.ensure_size(10, 10));
        assert!(field.ensure_size(12, 10));
        assert_eq!(field.values().len(), 120);
    }

    #[test]
    fn target_rms_matches_uniform_formula() {
        assert_relative_eq!(target_std_dev(100.0), 127.5 / 3f64.sqrt());
        assert_relative_eq!(target_std_dev(15.0), 0.15 / 3f64.sqrt() * 127.5);
        assert_eq!(target_std_dev(f64::NAN), 0.0);
    }
}
