use crate::config::ExperimentConfig;
use crate::estimate::ThresholdEstimate;
use crate::report::SessionReport;
use crate::sequencer::{SequencerEvent, TrialSequencer};
use crate::staircase::Staircase;
use crate::trial::TrialPlan;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info};
use vss_core::{
    Choice, FrameContent, Interval, Phase, QualityMetrics, ResponseStats, SessionPhase, StopReason,
    TrialRecord, TrialState,
};
use vss_timing::{RefreshEstimator, Timer};

/// User intents forwarded by the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    ConfirmStart,
    Stop,
    Respond(Choice),
    /// Response pinned to the trial that raised the prompt
    RespondTo { trial: usize, choice: Choice },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExperimentEvent {
    InstructionsShown,
    SessionStarted,
    TrialStarted {
        trial: usize,
        contrast_pct: f64,
    },
    IntervalStarted {
        trial: usize,
        interval: Interval,
    },
    IntervalEnded {
        trial: usize,
        interval: Interval,
        quality: Option<QualityMetrics>,
    },
    ResponsePrompted {
        trial: usize,
    },
    TrialScored {
        record: TrialRecord,
        reversal: Option<f64>,
        contrast_pct: f64,
    },
    /// `reason` is `None` for a manual stop
    SessionStopped {
        reason: Option<StopReason>,
    },
}

/// Read-only snapshot for the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentView<'a> {
    pub phase: SessionPhase,
    pub running: bool,
    /// Trials scored in the current or last session
    pub trial_index: usize,
    pub current_trial: Option<usize>,
    pub trial_state: TrialState,
    pub awaiting_response: bool,
    pub current_interval: Option<Interval>,
    pub stats: ResponseStats,
    pub reversal_count: usize,
    pub contrast_pct: f64,
    pub step_pct: f64,
    pub threshold: Option<ThresholdEstimate>,
    pub stop_reason: Option<StopReason>,
    pub quality_log: &'a [QualityMetrics],
}

/// The staircase engine: session phase, trial timeline and staircase behind
/// one command/update surface driven by the host's refresh callback.
pub struct ExperimentStateMachine<T, R>
where
    T: Timer<Timestamp = u64>,
    R: Rng,
{
    pub phase: SessionPhase,
    pub timer: T,
    pub rng: R,
    config: ExperimentConfig,
    staircase: Staircase,
    sequencer: TrialSequencer,
    refresh: RefreshEstimator,
    /// Bumped on every session start and stop; pending continuations from an
    /// older epoch are dropped
    epoch: u64,
    pending: Vec<ExperimentEvent>,
    last_vsync_ns: Option<u64>,
    display_size: (u32, u32),
}

impl<T, R> ExperimentStateMachine<T, R>
where
    T: Timer<Timestamp = u64>,
    R: Rng,
{
    pub fn new(config: ExperimentConfig, timer: T, rng: R) -> Self {
        let staircase = Staircase::new(
            config.staircase.clone(),
            config.stop.clone(),
            config.estimate.clone(),
        );
        let sequencer = TrialSequencer::new(config.timing.effective_update_hz());
        let refresh = RefreshEstimator::new(config.timing.fallback_refresh_hz);
        Self {
            phase: SessionPhase::default(),
            timer,
            rng,
            config,
            staircase,
            sequencer,
            refresh,
            epoch: 0,
            pending: Vec::new(),
            last_vsync_ns: None,
            display_size: (0, 0),
        }
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn staircase(&self) -> &Staircase {
        &self.staircase
    }

    pub fn current_phase(&self) -> &SessionPhase {
        &self.phase
    }

    /// Plan of the trial on screen or awaiting a response
    pub fn current_plan(&self) -> Option<&TrialPlan> {
        self.sequencer.current_plan()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn display_size(&self) -> (u32, u32) {
        self.display_size
    }

    /// Refresh rate the next noise interval would lock to
    pub fn refresh_hz(&self) -> f64 {
        self.refresh
            .measured_hz()
            .unwrap_or(self.refresh.fallback_hz())
    }

    /// Show instructions. No-op while instructions are up or a session runs.
    pub fn start(&mut self) -> bool {
        if !(self.phase.is_idle() || self.phase.is_complete()) {
            return false;
        }
        self.phase = SessionPhase::Instructions;
        self.pending.push(ExperimentEvent::InstructionsShown);
        true
    }

    /// Begin the session proper with a fresh staircase and trial 1
    pub fn confirm_start(&mut self) -> bool {
        if !(self.phase.is_idle() || self.phase.is_instructions()) {
            return false;
        }
        if !self.staircase.start_session() {
            return false;
        }
        self.epoch += 1;
        self.phase = SessionPhase::Running;
        self.sequencer.cancel();
        info!(epoch = self.epoch, "session started");
        self.pending.push(ExperimentEvent::SessionStarted);
        let now = self.timer.now();
        self.begin_next_trial(now);
        true
    }

    /// Abort. Safe in any phase; the stopped session stays observable.
    pub fn stop(&mut self) -> bool {
        match self.phase {
            SessionPhase::Running => {
                self.epoch += 1;
                self.sequencer.cancel();
                self.staircase.stop_session();
                self.phase = SessionPhase::Idle;
                info!(
                    trials = self.staircase.session().trial_index,
                    "session stopped by user"
                );
                self.pending
                    .push(ExperimentEvent::SessionStopped { reason: None });
                true
            }
            SessionPhase::Instructions => {
                self.phase = SessionPhase::Idle;
                true
            }
            SessionPhase::Idle | SessionPhase::Complete => false,
        }
    }

    /// Answer the trial currently awaiting a response
    pub fn respond(&mut self, choice: Choice) -> bool {
        self.score(None, choice)
    }

    /// Answer trial `trial`; ignored if another trial holds the prompt
    pub fn respond_to(&mut self, trial: usize, choice: Choice) -> bool {
        self.score(Some(trial), choice)
    }

    pub fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Start => self.start(),
            Command::ConfirmStart => self.confirm_start(),
            Command::Stop => self.stop(),
            Command::Respond(choice) => self.respond(choice),
            Command::RespondTo { trial, choice } => self.respond_to(trial, choice),
        }
    }

    /// Advance by one display refresh. Returns what happened since the last call.
    pub fn update(&mut self) -> Vec<ExperimentEvent> {
        let now = self.timer.now();
        if let Some(last) = self.last_vsync_ns {
            self.timer
                .record_frame(Duration::from_nanos(now.saturating_sub(last)));
        }
        self.last_vsync_ns = Some(now);
        self.refresh.record_vsync(now);

        let mut events = std::mem::take(&mut self.pending);
        if !self.phase.is_running() {
            return events;
        }

        let refresh_hz = self.refresh.refresh_hz();
        for event in self.sequencer.tick(now, refresh_hz) {
            match event {
                SequencerEvent::IntervalStarted { trial, interval } => {
                    events.push(ExperimentEvent::IntervalStarted { trial, interval });
                }
                SequencerEvent::IntervalEnded {
                    trial,
                    interval,
                    quality,
                } => {
                    if let Some(q) = &quality {
                        self.staircase.log_quality(q.clone());
                    }
                    events.push(ExperimentEvent::IntervalEnded {
                        trial,
                        interval,
                        quality,
                    });
                }
                SequencerEvent::ResponsePrompted { trial } => {
                    events.push(ExperimentEvent::ResponsePrompted { trial });
                }
                SequencerEvent::PauseElapsed { epoch } => {
                    if epoch == self.epoch && self.staircase.is_running() {
                        self.begin_next_trial(now);
                    } else {
                        debug!(epoch, current = self.epoch, "stale pause dropped");
                    }
                }
            }
        }
        events.append(&mut self.pending);
        events
    }

    /// What to present this refresh
    pub fn frame(&self) -> FrameContent {
        if self.phase.is_running() {
            self.sequencer.frame()
        } else {
            FrameContent::Blank
        }
    }

    pub fn view(&self) -> ExperimentView<'_> {
        let session = self.staircase.session();
        let running = self.phase.is_running();
        ExperimentView {
            phase: self.phase,
            running,
            trial_index: session.trial_index,
            current_trial: self.sequencer.current_trial(),
            trial_state: self.sequencer.state(),
            awaiting_response: running && self.sequencer.is_awaiting_response(),
            current_interval: self.sequencer.current_interval(),
            stats: session.stats,
            reversal_count: session.reversal_count(),
            contrast_pct: session.contrast_pct,
            step_pct: session.step_pct,
            threshold: self.staircase.estimate(),
            stop_reason: session.stop_reason,
            quality_log: &session.quality_log,
        }
    }

    /// Record new display dimensions. Returns true if they changed.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        if self.display_size == (width, height) {
            return false;
        }
        debug!(width, height, "display resized");
        self.display_size = (width, height);
        true
    }

    pub fn report(&self) -> SessionReport {
        SessionReport::from_staircase(&self.staircase)
    }

    fn begin_next_trial(&mut self, now: u64) {
        let plan = TrialPlan::draw(
            self.staircase.session().next_trial_id(),
            self.staircase.contrast_pct(),
            &self.config.timing,
            &self.config.stimulus,
            &mut self.rng,
        );
        self.pending.push(ExperimentEvent::TrialStarted {
            trial: plan.id,
            contrast_pct: plan.contrast_pct,
        });
        self.sequencer.begin_trial(plan, now);
    }

    fn score(&mut self, expected: Option<usize>, choice: Choice) -> bool {
        if !self.phase.allows_response() {
            return false;
        }
        let now = self.timer.now();
        // leaves AwaitingResponse before scoring, so repeated input finds nothing
        let Some(done) = self.sequencer.accept_response(expected, now) else {
            return false;
        };
        let Some(outcome) = self
            .staircase
            .record_response(&done.plan, choice, done.quality)
        else {
            return false;
        };

        self.pending.push(ExperimentEvent::TrialScored {
            record: outcome.record,
            reversal: outcome.reversal,
            contrast_pct: outcome.contrast_pct,
        });

        match outcome.stop {
            Some(reason) => {
                self.epoch += 1;
                self.sequencer.cancel();
                self.phase = SessionPhase::Complete;
                self.pending
                    .push(ExperimentEvent::SessionStopped { reason: Some(reason) });
            }
            None => {
                self.sequencer
                    .begin_pause(now, self.config.timing.inter_trial_ms, self.epoch);
            }
        }
        true
    }
}
