use crate::stimulus::{Choice, Interval};
use serde::{Deserialize, Serialize};

/// Trial sequencer states, in presentation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrialState {
    #[default]
    Idle,
    LeadIn,
    Interval1,
    Mask,
    Isi,
    Interval2,
    AwaitingResponse,
    /// Fixed pause after scoring, before the next trial begins
    InterTrial,
}

impl TrialState {
    /// The presentation interval this state shows, if any
    pub fn interval(&self) -> Option<Interval> {
        match self {
            TrialState::Interval1 => Some(Interval::First),
            TrialState::Interval2 => Some(Interval::Second),
            _ => None,
        }
    }
}

/// Staircase adjustment direction. Harder lowers contrast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Harder,
    Easier,
}

impl Direction {
    pub fn sign(self) -> i8 {
        match self {
            Direction::Harder => -1,
            Direction::Easier => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    Trials,
    Reversals,
    Converged,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            StopReason::Trials => "reached the maximum number of trials",
            StopReason::Reversals => "reached the maximum number of reversals",
            StopReason::Converged => "staircase converged",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseStats {
    pub correct: usize,
    pub incorrect: usize,
}

impl ResponseStats {
    pub fn record(&mut self, correct: bool) {
        if correct {
            self.correct += 1;
        } else {
            self.incorrect += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.correct + self.incorrect
    }
}

/// Display timing diagnostics for one rendered noise interval.
/// Reporting only; never read by the staircase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub refresh_hz: f64,
    pub frames_per_update: u32,
    pub intended_hz: f64,
    pub effective_hz: f64,
    pub updates: u32,
    pub elapsed_ms: f64,
    pub contrast_pct: f64,
    pub trial_num: usize,
}

/// Finalized trial, appended to the session log once scored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    /// 1-based
    pub trial_num: usize,
    pub contrast_pct: f64,
    pub rms_percent: f64,
    pub correct_interval: Interval,
    pub interval_ms: u64,
    pub isi_ms: u64,
    pub response: Choice,
    pub correct: bool,
    pub quality: Option<QualityMetrics>,
}
