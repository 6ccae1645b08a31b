//! Headless runs against a simulated observer.
//!
//! The engine is driven exactly as the window would drive it, one `update` per
//! simulated vsync, with the observer answering each prompt on the next frame.

use crate::cli::Args;
use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tracing::{debug, info, warn};
use vss_core::{Choice, Interval, Phase};
use vss_experiment::{ExperimentConfig, ExperimentEvent, ExperimentStateMachine, SessionReport};
use vss_render::NoiseRenderer;
use vss_timing::{HighPrecisionTimer, ManualTimer, Timer};

const PREVIEW_WIDTH: u32 = 160;
const PREVIEW_HEIGHT: u32 = 90;

/// Weibull observer for 2IFC: chance is 0.5, the asymptote is `1 - lapse`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedObserver {
    pub threshold_pct: f64,
    pub slope: f64,
    pub lapse: f64,
}

impl SimulatedObserver {
    pub fn p_correct(&self, contrast_pct: f64) -> f64 {
        if contrast_pct <= 0.0 || self.threshold_pct <= 0.0 {
            return 0.5;
        }
        let lapse = self.lapse.clamp(0.0, 0.5);
        let detect = 1.0 - (-(contrast_pct / self.threshold_pct).powf(self.slope)).exp();
        0.5 + (0.5 - lapse) * detect
    }

    pub fn respond<R: Rng>(&self, contrast_pct: f64, signal: Interval, rng: &mut R) -> Choice {
        if rng.random_bool(self.p_correct(contrast_pct).clamp(0.0, 1.0)) {
            signal
        } else {
            match signal {
                Interval::First => Interval::Second,
                Interval::Second => Interval::First,
            }
        }
    }
}

pub fn run(args: &Args, config: ExperimentConfig, mut rng: StdRng) -> Result<SessionReport> {
    let observer = SimulatedObserver {
        threshold_pct: args.observer_threshold,
        slope: args.observer_slope,
        lapse: args.observer_lapse,
    };
    if !(args.refresh_hz.is_finite() && args.refresh_hz > 0.0) {
        bail!("--refresh-hz must be positive, got {}", args.refresh_hz);
    }
    let frame_period = Duration::from_secs_f64(1.0 / args.refresh_hz);
    let observer_rng = StdRng::seed_from_u64(rng.random());
    info!(
        threshold_pct = observer.threshold_pct,
        slope = observer.slope,
        lapse = observer.lapse,
        refresh_hz = args.refresh_hz,
        realtime = args.realtime,
        "simulated observer"
    );

    let report = if args.realtime {
        let sm = ExperimentStateMachine::new(config, HighPrecisionTimer::new(), rng);
        drive(sm, observer, observer_rng, frame_period)?
    } else {
        let sm = ExperimentStateMachine::new(config, ManualTimer::new(), rng);
        drive(sm, observer, observer_rng, frame_period)?
    };

    match &report.threshold {
        Some(t) => info!(
            stop_reason = ?report.stop_reason,
            trials = report.trials_run,
            reversals = report.reversals.len(),
            threshold_pct = t.percent_range,
            rms_pct = t.rms_percent,
            observer_threshold_pct = observer.threshold_pct,
            "simulation finished"
        ),
        None => warn!(
            stop_reason = ?report.stop_reason,
            trials = report.trials_run,
            reversals = report.reversals.len(),
            "simulation finished without a threshold estimate"
        ),
    }
    Ok(report)
}

fn drive<T: Timer<Timestamp = u64>>(
    mut sm: ExperimentStateMachine<T, StdRng>,
    observer: SimulatedObserver,
    mut observer_rng: StdRng,
    frame_period: Duration,
) -> Result<SessionReport> {
    // a trial is a few seconds at most; leave generous headroom
    let frame_budget = (sm.config().stop.max_trials as f64 * 10.0
        / frame_period.as_secs_f64().max(1e-6)) as u64
        + 10_000;

    let mut renderer = NoiseRenderer::new(PREVIEW_WIDTH, PREVIEW_HEIGHT, 1);
    let mut preview = vec![0u8; PREVIEW_WIDTH as usize * PREVIEW_HEIGHT as usize * 4];
    let mut render_timer = HighPrecisionTimer::new();
    let mut worst_rms_error = 0f64;

    sm.start();
    sm.confirm_start();

    for _ in 0..frame_budget {
        sm.timer.sleep(frame_period);
        for event in sm.update() {
            match event {
                ExperimentEvent::ResponsePrompted { trial } => {
                    let Some(plan) = sm.current_plan() else { continue };
                    let choice =
                        observer.respond(plan.contrast_pct, plan.correct_interval, &mut observer_rng);
                    sm.respond_to(trial, choice);
                }
                ExperimentEvent::TrialScored {
                    record,
                    reversal,
                    contrast_pct,
                } => {
                    debug!(
                        trial = record.trial_num,
                        presented_pct = record.contrast_pct,
                        correct = record.correct,
                        reversal,
                        next_pct = contrast_pct,
                        "trial"
                    );
                }
                ExperimentEvent::SessionStopped { reason } => {
                    debug!(?reason, "session stopped");
                }
                _ => {}
            }
        }

        let stats = renderer.render_frame(&sm.frame(), &mut preview, &mut render_timer)?;
        if let Some(field) = stats.field {
            let err = (field.std_dev - field.target_std_dev).abs();
            worst_rms_error = worst_rms_error.max(err);
        }

        if sm.phase.is_complete() {
            debug!(worst_rms_error, "noise normalisation check");
            return Ok(sm.report());
        }
    }
    bail!("simulation did not finish within {frame_budget} frames")
}

#[cfg(test)]
mod tests {
    use super::*;
    use vss_experiment::StopConfig;

    fn observer() -> SimulatedObserver {
        SimulatedObserver {
            threshold_pct: 6.0,
            slope: 3.5,
            lapse: 0.02,
        }
    }

    #[test]
    fn psychometric_function_spans_chance_to_lapse_limit() {
        let o = observer();
        assert_eq!(o.p_correct(0.0), 0.5);
        assert!((o.p_correct(1000.0) - 0.98).abs() < 1e-9);
        let at_threshold = 0.5 + 0.48 * (1.0 - (-1f64).exp());
        assert!((o.p_correct(6.0) - at_threshold).abs() < 1e-12);
        assert!(o.p_correct(3.0) < o.p_correct(6.0));
    }

    #[test]
    fn simulated_session_finishes_near_the_observer_threshold() {
        let config = ExperimentConfig {
            stop: StopConfig {
                max_reversals: 16,
                ..StopConfig::default()
            },
            ..ExperimentConfig::default()
        };
        let sm = ExperimentStateMachine::new(config, ManualTimer::new(), StdRng::seed_from_u64(5));
        let report = drive(
            sm,
            observer(),
            StdRng::seed_from_u64(6),
            Duration::from_nanos(16_666_667),
        )
        .unwrap();

        assert!(report.stop_reason.is_some());
        assert_eq!(report.trials.len(), report.trials_run);
        assert!(!report.quality.is_empty());
        let t = report.threshold.expect("threshold estimate");
        // generous bounds: a single short staircase is noisy
        assert!(t.percent_range > 1.0 && t.percent_range < 30.0, "{t:?}");
    }
}
