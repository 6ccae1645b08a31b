use crate::error::ConfigError;
use crate::estimate::EstimatorKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

/// Step size in effect once `reversals` reversals have been recorded
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepMilestone {
    pub reversals: usize,
    pub step_pct: f64,
}

/// Multiplicative n-down/1-up staircase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaircaseConfig {
    #[serde(default = "StaircaseConfig::default_initial_contrast_pct")]
    pub initial_contrast_pct: f64,
    #[serde(default = "StaircaseConfig::default_initial_step_pct")]
    pub initial_step_pct: f64,
    #[serde(default = "StaircaseConfig::default_step_schedule")]
    pub step_schedule: Vec<StepMilestone>,
    /// Consecutive correct responses before the level gets harder
    #[serde(default = "StaircaseConfig::default_n_down")]
    pub n_down: u32,
    #[serde(default = "StaircaseConfig::default_floor_pct")]
    pub floor_pct: f64,
    #[serde(default = "StaircaseConfig::default_ceiling_pct")]
    pub ceiling_pct: f64,
}

impl StaircaseConfig {
    fn default_initial_contrast_pct() -> f64 {
        15.0
    }
    fn default_initial_step_pct() -> f64 {
        15.0
    }
    fn default_step_schedule() -> Vec<StepMilestone> {
        vec![
            StepMilestone {
                reversals: 3,
                step_pct: 8.0,
            },
            StepMilestone {
                reversals: 6,
                step_pct: 4.0,
            },
        ]
    }
    fn default_n_down() -> u32 {
        3
    }
    fn default_floor_pct() -> f64 {
        0.1
    }
    fn default_ceiling_pct() -> f64 {
        100.0
    }
}

impl Default for StaircaseConfig {
    fn default() -> Self {
        Self {
            initial_contrast_pct: Self::default_initial_contrast_pct(),
            initial_step_pct: Self::default_initial_step_pct(),
            step_schedule: Self::default_step_schedule(),
            n_down: Self::default_n_down(),
            floor_pct: Self::default_floor_pct(),
            ceiling_pct: Self::default_ceiling_pct(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopConfig {
    #[serde(default = "StopConfig::default_max_trials")]
    pub max_trials: usize,
    #[serde(default = "StopConfig::default_max_reversals")]
    pub max_reversals: usize,
    /// Number of most recent reversals checked for convergence
    #[serde(default = "StopConfig::default_convergence_reversals")]
    pub convergence_reversals: usize,
    /// Maximum SD of ln(reversal contrast) that counts as converged
    #[serde(default = "StopConfig::default_convergence_log_sd")]
    pub convergence_log_sd: f64,
}

impl StopConfig {
    fn default_max_trials() -> usize {
        80
    }
    fn default_max_reversals() -> usize {
        10
    }
    fn default_convergence_reversals() -> usize {
        6
    }
    fn default_convergence_log_sd() -> f64 {
        0.02
    }
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            max_trials: Self::default_max_trials(),
            max_reversals: Self::default_max_reversals(),
            convergence_reversals: Self::default_convergence_reversals(),
            convergence_log_sd: Self::default_convergence_log_sd(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateConfig {
    #[serde(default)]
    pub kind: EstimatorKind,
    #[serde(default = "EstimateConfig::default_min_reversals")]
    pub min_reversals: usize,
    #[serde(default = "EstimateConfig::default_window")]
    pub window: usize,
}

impl EstimateConfig {
    fn default_min_reversals() -> usize {
        4
    }
    fn default_window() -> usize {
        6
    }
}

impl Default for EstimateConfig {
    fn default() -> Self {
        Self {
            kind: EstimatorKind::default(),
            min_reversals: Self::default_min_reversals(),
            window: Self::default_window(),
        }
    }
}

/// Trial timeline. Ranges are half-open `[min, max)` in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "TimingConfig::default_lead_in_ms")]
    pub lead_in_ms: u64,
    #[serde(default = "TimingConfig::default_interval_range_ms")]
    pub interval_range_ms: (u64, u64),
    #[serde(default = "TimingConfig::default_mask_ms")]
    pub mask_ms: u64,
    #[serde(default = "TimingConfig::default_isi_range_ms")]
    pub isi_range_ms: (u64, u64),
    #[serde(default = "TimingConfig::default_inter_trial_ms")]
    pub inter_trial_ms: u64,
    /// Stimulus updates per second during a noise interval
    #[serde(default = "TimingConfig::default_update_hz")]
    pub update_hz: f64,
    #[serde(default = "TimingConfig::default_fallback_refresh_hz")]
    pub fallback_refresh_hz: f64,
}

impl TimingConfig {
    fn default_lead_in_ms() -> u64 {
        200
    }
    fn default_interval_range_ms() -> (u64, u64) {
        (400, 600)
    }
    fn default_mask_ms() -> u64 {
        300
    }
    fn default_isi_range_ms() -> (u64, u64) {
        (250, 450)
    }
    fn default_inter_trial_ms() -> u64 {
        400
    }
    fn default_update_hz() -> f64 {
        15.0
    }
    fn default_fallback_refresh_hz() -> f64 {
        60.0
    }

    /// Update rate clamped to what a display can present
    pub fn effective_update_hz(&self) -> f64 {
        self.update_hz.clamp(1.0, 60.0)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            lead_in_ms: Self::default_lead_in_ms(),
            interval_range_ms: Self::default_interval_range_ms(),
            mask_ms: Self::default_mask_ms(),
            isi_range_ms: Self::default_isi_range_ms(),
            inter_trial_ms: Self::default_inter_trial_ms(),
            update_hz: Self::default_update_hz(),
            fallback_refresh_hz: Self::default_fallback_refresh_hz(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StimulusConfig {
    /// Display pixels per noise sample along each axis
    #[serde(default = "StimulusConfig::default_block_px")]
    pub block_px: u32,
    #[serde(default = "StimulusConfig::default_base_seed")]
    pub base_seed: u32,
    #[serde(default = "StimulusConfig::default_first_seed_offset")]
    pub first_seed_offset: u32,
    #[serde(default = "StimulusConfig::default_second_seed_offset")]
    pub second_seed_offset: u32,
}

impl StimulusConfig {
    fn default_block_px() -> u32 {
        2
    }
    fn default_base_seed() -> u32 {
        12_345
    }
    fn default_first_seed_offset() -> u32 {
        101
    }
    fn default_second_seed_offset() -> u32 {
        303
    }
}

impl Default for StimulusConfig {
    fn default() -> Self {
        Self {
            block_px: Self::default_block_px(),
            base_seed: Self::default_base_seed(),
            first_seed_offset: Self::default_first_seed_offset(),
            second_seed_offset: Self::default_second_seed_offset(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub staircase: StaircaseConfig,
    #[serde(default)]
    pub stop: StopConfig,
    #[serde(default)]
    pub estimate: EstimateConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub stimulus: StimulusConfig,
}

impl ExperimentConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Defaults when `path` does not exist; a present but invalid file is an error
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "config not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.staircase;
        if !(s.floor_pct > 0.0 && s.floor_pct < s.ceiling_pct && s.ceiling_pct <= 100.0) {
            return Err(ConfigError::Range {
                name: "staircase.floor_pct..ceiling_pct",
                min: s.floor_pct,
                max: s.ceiling_pct,
            });
        }
        if !(s.initial_contrast_pct >= s.floor_pct && s.initial_contrast_pct <= s.ceiling_pct) {
            return Err(ConfigError::Value {
                name: "staircase.initial_contrast_pct",
                expected: "within [floor_pct, ceiling_pct]",
                value: s.initial_contrast_pct,
            });
        }
        positive("staircase.initial_step_pct", s.initial_step_pct)?;
        if s.n_down == 0 {
            return Err(ConfigError::Value {
                name: "staircase.n_down",
                expected: "at least 1",
                value: 0.0,
            });
        }
        let mut last_count = 0;
        for m in &s.step_schedule {
            positive("staircase.step_schedule.step_pct", m.step_pct)?;
            if m.reversals <= last_count {
                return Err(ConfigError::Value {
                    name: "staircase.step_schedule.reversals",
                    expected: "strictly increasing and above 0",
                    value: m.reversals as f64,
                });
            }
            last_count = m.reversals;
        }

        if self.stop.convergence_reversals < 2 {
            return Err(ConfigError::Value {
                name: "stop.convergence_reversals",
                expected: "at least 2",
                value: self.stop.convergence_reversals as f64,
            });
        }
        if !(self.stop.convergence_log_sd >= 0.0) {
            return Err(ConfigError::Value {
                name: "stop.convergence_log_sd",
                expected: "non-negative",
                value: self.stop.convergence_log_sd,
            });
        }
        if self.stop.max_trials == 0 {
            return Err(ConfigError::Value {
                name: "stop.max_trials",
                expected: "at least 1",
                value: 0.0,
            });
        }

        if self.estimate.window == 0 {
            return Err(ConfigError::Value {
                name: "estimate.window",
                expected: "at least 1",
                value: 0.0,
            });
        }

        let t = &self.timing;
        range_ms("timing.interval_range_ms", t.interval_range_ms)?;
        range_ms("timing.isi_range_ms", t.isi_range_ms)?;
        positive("timing.update_hz", t.update_hz)?;
        positive("timing.fallback_refresh_hz", t.fallback_refresh_hz)?;

        if self.stimulus.block_px == 0 {
            return Err(ConfigError::Value {
                name: "stimulus.block_px",
                expected: "at least 1",
                value: 0.0,
            });
        }
        Ok(())
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Value {
            name,
            expected: "a positive number",
            value,
        })
    }
}

fn range_ms(name: &'static str, (min, max): (u64, u64)) -> Result<(), ConfigError> {
    if min < max {
        Ok(())
    } else {
        Err(ConfigError::Range {
            name,
            min: min as f64,
            max: max as f64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_path(name: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("vss_{}_{}_{}", std::process::id(), nanos, name))
    }

    #[test]
    fn defaults_are_valid() {
        ExperimentConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let cfg = ExperimentConfig::from_toml_str(
            r#"
            [staircase]
            n_down = 2

            [timing]
            isi_range_ms = [100, 200]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.staircase.n_down, 2);
        assert_eq!(cfg.staircase.initial_contrast_pct, 15.0);
        assert_eq!(cfg.timing.isi_range_ms, (100, 200));
        assert_eq!(cfg.timing.interval_range_ms, (400, 600));
        assert_eq!(cfg.stop, StopConfig::default());
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = ExperimentConfig::default();
        let text = cfg.to_toml_string().unwrap();
        assert_eq!(ExperimentConfig::from_toml_str(&text).unwrap(), cfg);
    }

    #[test]
    fn rejects_inverted_ranges_and_bad_values() {
        let err = ExperimentConfig::from_toml_str("[timing]\ninterval_range_ms = [600, 400]\n");
        assert!(matches!(err, Err(ConfigError::Range { .. })));

        let err = ExperimentConfig::from_toml_str("[staircase]\nn_down = 0\n");
        assert!(matches!(err, Err(ConfigError::Value { name: "staircase.n_down", .. })));

        let err = ExperimentConfig::from_toml_str("[staircase]\nfloor_pct = 0.0\n");
        assert!(matches!(err, Err(ConfigError::Range { .. })));

        let err = ExperimentConfig::from_toml_str(
            "[[staircase.step_schedule]]\nreversals = 4\nstep_pct = 8.0\n[[staircase.step_schedule]]\nreversals = 2\nstep_pct = 4.0\n",
        );
        assert!(matches!(err, Err(ConfigError::Value { .. })));

        let err = ExperimentConfig::from_toml_str("[stop]\nconvergence_reversals = 1\n");
        assert!(matches!(err, Err(ConfigError::Value { .. })));
    }

    #[test]
    fn parse_errors_are_reported() {
        let err = ExperimentConfig::from_toml_str("[staircase\n");
        assert!(matches!(err, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn load_or_default_handles_missing_and_present_files() {
        let path = unique_path("missing.toml");
        let cfg = ExperimentConfig::load_or_default(&path).unwrap();
        assert_eq!(cfg, ExperimentConfig::default());

        let path = unique_path("present.toml");
        fs::write(&path, "[stop]\nmax_trials = 40\n").unwrap();
        let cfg = ExperimentConfig::load_or_default(&path).unwrap();
        assert_eq!(cfg.stop.max_trials, 40);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn update_rate_is_clamped() {
        let mut t = TimingConfig::default();
        t.update_hz = 240.0;
        assert_eq!(t.effective_update_hz(), 60.0);
        t.update_hz = 0.2;
        assert_eq!(t.effective_update_hz(), 1.0);
    }
}
