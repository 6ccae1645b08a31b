use crate::config::StaircaseConfig;
use vss_core::{Direction, QualityMetrics, ResponseStats, StopReason, TrialRecord};

/// State of one staircase run. Owned by [`crate::Staircase`]; replaced
/// wholesale when a new session starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub running: bool,
    /// Trials scored so far
    pub trial_index: usize,
    pub stats: ResponseStats,
    pub contrast_pct: f64,
    pub step_pct: f64,
    /// Pre-update contrast at each direction change, in order
    pub reversals: Vec<f64>,
    pub consecutive_correct: u32,
    pub last_direction: Option<Direction>,
    pub stop_reason: Option<StopReason>,
    /// Finalized trials, append-only
    pub trials: Vec<TrialRecord>,
    pub quality_log: Vec<QualityMetrics>,
}

impl Session {
    pub fn new(config: &StaircaseConfig) -> Self {
        Self {
            running: false,
            trial_index: 0,
            stats: ResponseStats::default(),
            contrast_pct: config.initial_contrast_pct,
            step_pct: config.initial_step_pct,
            reversals: Vec::new(),
            consecutive_correct: 0,
            last_direction: None,
            stop_reason: None,
            trials: Vec::new(),
            quality_log: Vec::new(),
        }
    }

    pub fn reversal_count(&self) -> usize {
        self.reversals.len()
    }

    /// 1-based id of the trial that would be presented next
    pub fn next_trial_id(&self) -> usize {
        self.trial_index + 1
    }
}
