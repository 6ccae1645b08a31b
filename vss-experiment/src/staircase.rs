//! Multiplicative n-down/1-up staircase.
//!
//! Harder divides contrast by `1 + step/100`, easier multiplies by it, so steps
//! are symmetric in log-contrast. The step shrinks at reversal-count milestones
//! and never grows within a session.

use crate::config::{EstimateConfig, StaircaseConfig, StopConfig};
use crate::estimate::{estimate_threshold, log_std_dev, rms_percent, ThresholdEstimate};
use crate::session::Session;
use crate::trial::TrialPlan;
use tracing::{debug, info};
use vss_core::{Choice, Direction, QualityMetrics, StopReason, TrialRecord};

/// What one scored response did to the staircase
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseOutcome {
    pub record: TrialRecord,
    pub direction: Option<Direction>,
    /// Contrast appended to the reversal list, if this response reversed direction
    pub reversal: Option<f64>,
    pub contrast_pct: f64,
    pub step_pct: f64,
    pub stop: Option<StopReason>,
}

#[derive(Debug, Clone)]
pub struct Staircase {
    config: StaircaseConfig,
    stop: StopConfig,
    estimate: EstimateConfig,
    session: Session,
}

impl Staircase {
    pub fn new(config: StaircaseConfig, stop: StopConfig, estimate: EstimateConfig) -> Self {
        let session = Session::new(&config);
        Self {
            config,
            stop,
            estimate,
            session,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_running(&self) -> bool {
        self.session.running
    }

    pub fn contrast_pct(&self) -> f64 {
        self.session.contrast_pct
    }

    /// Reset to the initial level and start counting. No-op while running.
    pub fn start_session(&mut self) -> bool {
        if self.session.running {
            return false;
        }
        self.session = Session::new(&self.config);
        self.session.running = true;
        info!(
            contrast_pct = self.session.contrast_pct,
            step_pct = self.session.step_pct,
            n_down = self.config.n_down,
            "staircase session started"
        );
        true
    }

    /// Freeze the session. Its data stays readable until the next start.
    pub fn stop_session(&mut self) -> bool {
        if !self.session.running {
            return false;
        }
        self.session.running = false;
        info!(
            trials = self.session.trial_index,
            reversals = self.session.reversal_count(),
            "staircase session stopped"
        );
        true
    }

    /// Append interval diagnostics to the reporting log
    pub fn log_quality(&mut self, quality: QualityMetrics) {
        if self.session.running {
            self.session.quality_log.push(quality);
        }
    }

    /// Score `choice` against `plan` and move the staircase.
    ///
    /// Returns `None` without touching state when the session is not running.
    pub fn record_response(
        &mut self,
        plan: &TrialPlan,
        choice: Choice,
        quality: Option<QualityMetrics>,
    ) -> Option<ResponseOutcome> {
        if !self.session.running {
            return None;
        }
        let s = &mut self.session;
        let correct = choice == plan.correct_interval;
        s.stats.record(correct);

        let direction = if correct {
            s.consecutive_correct += 1;
            if s.consecutive_correct >= self.config.n_down {
                s.consecutive_correct = 0;
                Some(Direction::Harder)
            } else {
                None
            }
        } else {
            s.consecutive_correct = 0;
            Some(Direction::Easier)
        };

        let mut reversal = None;
        if let Some(dir) = direction {
            if s.last_direction.is_some_and(|last| last != dir) {
                s.reversals.push(s.contrast_pct);
                reversal = Some(s.contrast_pct);
            }
            s.last_direction = Some(dir);

            let factor = 1.0 + s.step_pct / 100.0;
            let next = match dir {
                Direction::Harder => s.contrast_pct / factor,
                Direction::Easier => s.contrast_pct * factor,
            };
            s.contrast_pct = next.clamp(self.config.floor_pct, self.config.ceiling_pct);

            // the new step applies from the next update on
            if reversal.is_some() {
                let count = s.reversals.len();
                for milestone in &self.config.step_schedule {
                    if count >= milestone.reversals {
                        s.step_pct = s.step_pct.min(milestone.step_pct);
                    }
                }
            }
        }

        s.trial_index += 1;
        let record = TrialRecord {
            trial_num: plan.id,
            contrast_pct: plan.contrast_pct,
            rms_percent: rms_percent(plan.contrast_pct),
            correct_interval: plan.correct_interval,
            interval_ms: plan.durations.interval_ms,
            isi_ms: plan.durations.isi_ms,
            response: choice,
            correct,
            quality,
        };
        s.trials.push(record.clone());

        debug!(
            trial = plan.id,
            correct,
            ?direction,
            reversal,
            contrast_pct = s.contrast_pct,
            step_pct = s.step_pct,
            "response scored"
        );

        let stop = self.evaluate_stop();
        if let Some(reason) = stop {
            self.session.running = false;
            self.session.stop_reason = Some(reason);
            info!(
                %reason,
                trials = self.session.trial_index,
                reversals = self.session.reversal_count(),
                estimate = ?self.estimate().map(|e| e.percent_range),
                "staircase finished"
            );
        }

        Some(ResponseOutcome {
            record,
            direction,
            reversal,
            contrast_pct: self.session.contrast_pct,
            step_pct: self.session.step_pct,
            stop,
        })
    }

    /// First matching criterion in the order trials, reversals, convergence
    pub fn evaluate_stop(&self) -> Option<StopReason> {
        let s = &self.session;
        if s.trial_index >= self.stop.max_trials {
            Some(StopReason::Trials)
        } else if s.reversals.len() >= self.stop.max_reversals {
            Some(StopReason::Reversals)
        } else if self.has_converged() {
            Some(StopReason::Converged)
        } else {
            None
        }
    }

    /// SD of ln(contrast) over the most recent reversals is within tolerance
    pub fn has_converged(&self) -> bool {
        let k = self.stop.convergence_reversals;
        let reversals = &self.session.reversals;
        if reversals.len() < k {
            return false;
        }
        log_std_dev(&reversals[reversals.len() - k..]) <= self.stop.convergence_log_sd
    }

    pub fn estimate(&self) -> Option<ThresholdEstimate> {
        estimate_threshold(&self.session.reversals, &self.estimate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trial::TrialDurations;
    use approx::assert_relative_eq;
    use vss_core::Interval;

    fn plan(id: usize, contrast_pct: f64) -> TrialPlan {
        TrialPlan {
            id,
            correct_interval: Interval::First,
            contrast_pct,
            durations: TrialDurations {
                lead_in_ms: 200,
                interval_ms: 500,
                mask_ms: 300,
                isi_ms: 300,
            },
            seed_base: 12_446,
        }
    }

    fn answer(sc: &mut Staircase, correct: bool) -> ResponseOutcome {
        let id = sc.session().next_trial_id();
        let p = plan(id, sc.contrast_pct());
        let choice = if correct { Interval::First } else { Interval::Second };
        sc.record_response(&p, choice, None).unwrap()
    }

    fn staircase(n_down: u32) -> Staircase {
        Staircase::new(
            StaircaseConfig {
                n_down,
                ..StaircaseConfig::default()
            },
            StopConfig::default(),
            EstimateConfig::default(),
        )
    }

    #[test]
    fn ignores_responses_when_not_running() {
        let mut sc = staircase(3);
        assert!(sc.record_response(&plan(1, 15.0), Interval::First, None).is_none());
        assert_eq!(sc.session().trial_index, 0);
        assert!(sc.session().trials.is_empty());
    }

    #[test]
    fn start_is_guarded_while_running() {
        let mut sc = staircase(3);
        assert!(sc.start_session());
        answer(&mut sc, false);
        assert!(!sc.start_session());
        assert_eq!(sc.session().trial_index, 1);
        assert!(sc.stop_session());
        assert!(!sc.stop_session());
        assert_eq!(sc.session().trial_index, 1);
        assert!(sc.start_session());
        assert_eq!(sc.session().trial_index, 0);
    }

    #[test]
    fn two_down_one_up_matches_hand_computation() {
        let mut sc = staircase(2);
        sc.start_session();
        let dirs: Vec<_> = [true, true, false, false, true, true]
            .into_iter()
            .filter_map(|c| answer(&mut sc, c).direction)
            .collect();
        assert_eq!(
            dirs,
            vec![
                Direction::Harder,
                Direction::Easier,
                Direction::Easier,
                Direction::Harder
            ]
        );
        let s = sc.session();
        assert_eq!(s.reversal_count(), 2);
        assert_relative_eq!(s.reversals[0], 15.0 / 1.15, max_relative = 1e-12);
        assert_relative_eq!(s.reversals[1], 17.25, max_relative = 1e-12);
        assert_relative_eq!(s.contrast_pct, 15.0, max_relative = 1e-12);
        assert_eq!(s.stats.correct, 4);
        assert_eq!(s.stats.incorrect, 2);
    }

    #[test]
    fn step_shrinks_after_the_update_that_hits_a_milestone() {
        let mut sc = staircase(1);
        sc.start_session();
        // C, I, C, I: reversals on responses 2, 3 and 4
        answer(&mut sc, true);
        answer(&mut sc, false);
        answer(&mut sc, true);
        assert_eq!(sc.session().step_pct, 15.0);
        let out = answer(&mut sc, false);
        assert_eq!(sc.session().reversal_count(), 3);
        // third reversal moved with the old step, then the step shrank
        assert_relative_eq!(out.contrast_pct, 15.0, max_relative = 1e-12);
        assert_eq!(out.step_pct, 8.0);
        let out = answer(&mut sc, true);
        assert_relative_eq!(out.contrast_pct, 15.0 / 1.08, max_relative = 1e-12);
    }

    #[test]
    fn step_never_grows() {
        let mut sc = Staircase::new(
            StaircaseConfig {
                n_down: 1,
                initial_step_pct: 5.0,
                ..StaircaseConfig::default()
            },
            StopConfig {
                max_reversals: 100,
                convergence_log_sd: 0.0,
                ..StopConfig::default()
            },
            EstimateConfig::default(),
        );
        sc.start_session();
        let mut last = sc.session().step_pct;
        for i in 0..30 {
            answer(&mut sc, i % 2 == 0);
            assert!(sc.session().step_pct <= last);
            last = sc.session().step_pct;
        }
        assert_eq!(last, 4.0);
    }

    #[test]
    fn contrast_clamps_to_floor_and_ceiling() {
        let mut sc = staircase(1);
        sc.start_session();
        for _ in 0..60 {
            answer(&mut sc, true);
            assert!(sc.contrast_pct() >= 0.1);
        }
        assert_eq!(sc.contrast_pct(), 0.1);

        let mut sc = staircase(1);
        sc.start_session();
        for _ in 0..60 {
            answer(&mut sc, false);
            assert!(sc.contrast_pct() <= 100.0);
        }
        assert_eq!(sc.contrast_pct(), 100.0);
    }

    #[test]
    fn record_keeps_presentation_contrast_and_rms() {
        let mut sc = staircase(1);
        sc.start_session();
        let out = answer(&mut sc, true);
        assert_eq!(out.record.trial_num, 1);
        assert_eq!(out.record.contrast_pct, 15.0);
        assert_eq!(out.record.rms_percent, 8.66);
        assert!(out.record.correct);
        assert_relative_eq!(out.contrast_pct, 15.0 / 1.15, max_relative = 1e-12);
    }

    #[test]
    fn converges_on_tight_reversals() {
        let mut sc = Staircase::new(
            StaircaseConfig {
                n_down: 1,
                initial_step_pct: 2.0,
                step_schedule: Vec::new(),
                ..StaircaseConfig::default()
            },
            StopConfig::default(),
            EstimateConfig::default(),
        );
        sc.start_session();
        let mut stop = None;
        let mut responses = 0;
        while stop.is_none() {
            stop = answer(&mut sc, responses % 2 == 0).stop;
            responses += 1;
        }
        assert_eq!(stop, Some(StopReason::Converged));
        assert_eq!(sc.session().reversal_count(), 6);
        assert_eq!(responses, 7);
        assert!(!sc.is_running());
        assert_eq!(sc.session().stop_reason, Some(StopReason::Converged));
    }

    #[test]
    fn estimate_follows_reversal_list() {
        let mut sc = staircase(1);
        sc.start_session();
        for i in 0..4 {
            answer(&mut sc, i % 2 == 0);
        }
        assert_eq!(sc.session().reversal_count(), 3);
        assert!(sc.estimate().is_none());
        answer(&mut sc, true);
        assert_eq!(sc.session().reversal_count(), 4);
        let est = sc.estimate().unwrap();
        assert!(est.percent_range.is_finite());
        assert_eq!(est.rms_percent, rms_percent(est.percent_range));
    }

    #[test]
    fn quality_log_only_grows_while_running() {
        let q = QualityMetrics {
            refresh_hz: 60.0,
            frames_per_update: 4,
            intended_hz: 15.0,
            effective_hz: 15.0,
            updates: 8,
            elapsed_ms: 500.0,
            contrast_pct: 15.0,
            trial_num: 1,
        };
        let mut sc = staircase(3);
        sc.log_quality(q.clone());
        assert!(sc.session().quality_log.is_empty());
        sc.start_session();
        sc.log_quality(q);
        assert_eq!(sc.session().quality_log.len(), 1);
    }
}
