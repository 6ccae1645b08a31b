use crate::config::{StimulusConfig, TimingConfig};
use rand::Rng;
use vss_core::Interval;

/// Everything decided about a trial before its first frame is shown
#[derive(Debug, Clone, PartialEq)]
pub struct TrialPlan {
    /// 1-based, unique within a session
    pub id: usize,
    pub correct_interval: Interval,
    /// Contrast at presentation time
    pub contrast_pct: f64,
    pub durations: TrialDurations,
    /// Seed base for the noise interval; frame `i` uses `frame_seed(seed_base, i)`
    pub seed_base: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialDurations {
    pub lead_in_ms: u64,
    /// Shared by both intervals
    pub interval_ms: u64,
    pub mask_ms: u64,
    pub isi_ms: u64,
}

/// Monotonic nanosecond stamps of the presentation milestones
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrialTimestamps {
    pub start: u64,
    pub interval1_start: Option<u64>,
    pub interval2_start: Option<u64>,
    pub prompt: Option<u64>,
    pub response: Option<u64>,
}

impl TrialTimestamps {
    pub fn new(start: u64) -> Self {
        Self {
            start,
            ..Self::default()
        }
    }

    /// Prompt-to-response latency in nanoseconds
    pub fn response_latency_ns(&self) -> Option<u64> {
        Some(self.response?.saturating_sub(self.prompt?))
    }
}

impl TrialPlan {
    /// Draw the signal interval and jittered durations for trial `id`
    pub fn draw<R: Rng>(
        id: usize,
        contrast_pct: f64,
        timing: &TimingConfig,
        stimulus: &StimulusConfig,
        rng: &mut R,
    ) -> Self {
        let correct_interval = if rng.random_bool(0.5) {
            Interval::First
        } else {
            Interval::Second
        };
        let (imin, imax) = timing.interval_range_ms;
        let (smin, smax) = timing.isi_range_ms;
        let durations = TrialDurations {
            lead_in_ms: timing.lead_in_ms,
            interval_ms: rng.random_range(imin..imax),
            mask_ms: timing.mask_ms,
            isi_ms: rng.random_range(smin..smax),
        };
        let offset = match correct_interval {
            Interval::First => stimulus.first_seed_offset,
            Interval::Second => stimulus.second_seed_offset,
        };

        Self {
            id,
            correct_interval,
            contrast_pct,
            durations,
            seed_base: stimulus.base_seed.wrapping_add(offset),
        }
    }
}
