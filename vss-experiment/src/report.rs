use crate::error::ReportError;
use crate::estimate::ThresholdEstimate;
use crate::staircase::Staircase;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::info;
use vss_core::{QualityMetrics, ResponseStats, StopReason, TrialRecord};

/// Summary of a finished or stopped session, for export and analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    /// `None` when the session was stopped by hand
    pub stop_reason: Option<StopReason>,
    pub trials_run: usize,
    pub stats: ResponseStats,
    pub reversals: Vec<f64>,
    pub final_contrast_pct: f64,
    pub final_step_pct: f64,
    pub threshold: Option<ThresholdEstimate>,
    pub trials: Vec<TrialRecord>,
    pub quality: Vec<QualityMetrics>,
}

impl SessionReport {
    pub fn from_staircase(staircase: &Staircase) -> Self {
        let s = staircase.session();
        Self {
            stop_reason: s.stop_reason,
            trials_run: s.trial_index,
            stats: s.stats,
            reversals: s.reversals.clone(),
            final_contrast_pct: s.contrast_pct,
            final_step_pct: s.step_pct,
            threshold: staircase.estimate(),
            trials: s.trials.clone(),
            quality: s.quality_log.clone(),
        }
    }

    pub fn accuracy(&self) -> Option<f64> {
        let total = self.stats.total();
        (total > 0).then(|| self.stats.correct as f64 / total as f64)
    }

    pub fn to_json_pretty(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        info!(path = %path.display(), trials = self.trials_run, "session report written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EstimateConfig, StaircaseConfig, StopConfig};
    use crate::trial::{TrialDurations, TrialPlan};
    use vss_core::Interval;

    fn played(responses: &[bool]) -> Staircase {
        let mut sc = Staircase::new(
            StaircaseConfig::default(),
            StopConfig::default(),
            EstimateConfig::default(),
        );
        sc.start_session();
        for &correct in responses {
            let plan = TrialPlan {
                id: sc.session().next_trial_id(),
                correct_interval: Interval::Second,
                contrast_pct: sc.contrast_pct(),
                durations: TrialDurations {
                    lead_in_ms: 200,
                    interval_ms: 450,
                    mask_ms: 300,
                    isi_ms: 260,
                },
                seed_base: 12_648,
            };
            let choice = if correct { Interval::Second } else { Interval::First };
            sc.record_response(&plan, choice, None);
        }
        sc
    }

    #[test]
    fn summarises_the_session() {
        let sc = played(&[true, true, true, false]);
        let report = SessionReport::from_staircase(&sc);
        assert_eq!(report.trials_run, 4);
        assert_eq!(report.trials.len(), 4);
        assert_eq!(report.reversals.len(), 1);
        assert_eq!(report.stop_reason, None);
        assert!(report.threshold.is_none());
        assert_eq!(report.accuracy(), Some(0.75));
    }

    #[test]
    fn json_uses_lowercase_stop_reasons_and_survives_a_round_trip() {
        let mut report = SessionReport::from_staircase(&played(&[false]));
        report.stop_reason = Some(StopReason::Reversals);
        let json = report.to_json_pretty().unwrap();
        assert!(json.contains("\"stop_reason\": \"reversals\""));
        let back: SessionReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.stop_reason, Some(StopReason::Reversals));
        assert_eq!(back.trials_run, 1);
        assert_eq!(back.trials[0].response, Interval::First);
        assert!(!back.trials[0].correct);
    }

    #[test]
    fn write_json_reports_missing_directories() {
        let report = SessionReport::from_staircase(&played(&[]));
        let path = std::env::temp_dir()
            .join("vss_no_such_dir_for_report")
            .join("report.json");
        assert!(matches!(report.write_json(&path), Err(ReportError::Io { .. })));
    }
}
