//! Trial timeline as a cooperative state machine.
//!
//! The host calls [`TrialSequencer::tick`] once per display refresh. Timed
//! states advance when their duration has elapsed at that refresh; zero-length
//! states are passed through within one tick. `AwaitingResponse` is only left
//! through [`TrialSequencer::accept_response`].

use crate::trial::{TrialPlan, TrialTimestamps};
use tracing::{debug, trace};
use vss_core::{frame_seed, FrameContent, Interval, QualityMetrics, TrialState};

const NS_PER_MS: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq)]
pub enum SequencerEvent {
    IntervalStarted {
        trial: usize,
        interval: Interval,
    },
    /// `quality` is set for the interval that carried noise
    IntervalEnded {
        trial: usize,
        interval: Interval,
        quality: Option<QualityMetrics>,
    },
    ResponsePrompted {
        trial: usize,
    },
    PauseElapsed {
        epoch: u64,
    },
}

/// Trial data handed back when a response is accepted
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedTrial {
    pub plan: TrialPlan,
    pub timestamps: TrialTimestamps,
    pub quality: Option<QualityMetrics>,
}

/// Refresh-locked update cadence for one noise interval
#[derive(Debug, Clone)]
struct NoiseClock {
    seed_base: u32,
    contrast_pct: f64,
    refresh_hz: f64,
    intended_hz: f64,
    frames_per_update: u32,
    frames: u32,
    update_index: u32,
    updates: u32,
    started_ns: u64,
    last_tick_ns: u64,
}

impl NoiseClock {
    fn new(seed_base: u32, contrast_pct: f64, refresh_hz: f64, update_hz: f64, now: u64) -> Self {
        let intended_hz = update_hz.clamp(1.0, 60.0);
        let frames_per_update = frames_per_update(refresh_hz, intended_hz);
        Self {
            seed_base,
            contrast_pct,
            refresh_hz,
            intended_hz,
            frames_per_update,
            frames: 0,
            update_index: 0,
            // the first field is shown on the starting refresh
            updates: 1,
            started_ns: now,
            last_tick_ns: now,
        }
    }

    /// Count one refresh at `now`. Repeated calls for the same refresh are ignored.
    fn advance(&mut self, now: u64) {
        if now <= self.last_tick_ns {
            return;
        }
        self.last_tick_ns = now;
        self.frames += 1;
        if self.frames % self.frames_per_update == 0 {
            self.update_index = self.frames / self.frames_per_update;
            self.updates += 1;
            trace!(update = self.update_index, "noise update");
        }
    }

    fn seed(&self) -> u32 {
        frame_seed(self.seed_base, self.update_index)
    }

    fn metrics(&self, trial_num: usize) -> QualityMetrics {
        let elapsed_ms = self.last_tick_ns.saturating_sub(self.started_ns) as f64 / NS_PER_MS as f64;
        let effective_hz = if self.updates > 1 && elapsed_ms > 0.0 {
            (self.updates - 1) as f64 / (elapsed_ms / 1000.0)
        } else {
            self.intended_hz
        };
        QualityMetrics {
            refresh_hz: self.refresh_hz,
            frames_per_update: self.frames_per_update,
            intended_hz: self.intended_hz,
            effective_hz,
            updates: self.updates,
            elapsed_ms,
            contrast_pct: self.contrast_pct,
            trial_num,
        }
    }
}

/// Refreshes per stimulus update, never below one
pub fn frames_per_update(refresh_hz: f64, update_hz: f64) -> u32 {
    if !(refresh_hz.is_finite() && refresh_hz > 0.0 && update_hz > 0.0) {
        return 1;
    }
    (refresh_hz / update_hz).round().max(1.0) as u32
}

#[derive(Debug, Clone)]
struct ActiveTrial {
    plan: TrialPlan,
    timestamps: TrialTimestamps,
    noise: Option<NoiseClock>,
    quality: Option<QualityMetrics>,
}

#[derive(Debug, Clone, Copy)]
struct Pause {
    until_ns: u64,
    epoch: u64,
}

#[derive(Debug, Clone)]
pub struct TrialSequencer {
    state: TrialState,
    state_started_ns: u64,
    update_hz: f64,
    active: Option<ActiveTrial>,
    pause: Option<Pause>,
}

impl TrialSequencer {
    pub fn new(update_hz: f64) -> Self {
        Self {
            state: TrialState::Idle,
            state_started_ns: 0,
            update_hz,
            active: None,
            pause: None,
        }
    }

    pub fn state(&self) -> TrialState {
        self.state
    }

    pub fn is_awaiting_response(&self) -> bool {
        self.state == TrialState::AwaitingResponse
    }

    /// Id of the trial being presented or awaiting a response
    pub fn current_trial(&self) -> Option<usize> {
        self.active.as_ref().map(|t| t.plan.id)
    }

    pub fn current_plan(&self) -> Option<&TrialPlan> {
        self.active.as_ref().map(|t| &t.plan)
    }

    /// Interval currently on screen, if any
    pub fn current_interval(&self) -> Option<Interval> {
        self.state.interval()
    }

    /// Start presenting `plan` with the lead-in blank at `now`
    pub fn begin_trial(&mut self, plan: TrialPlan, now: u64) {
        debug!(
            trial = plan.id,
            correct_interval = plan.correct_interval.number(),
            contrast_pct = plan.contrast_pct,
            interval_ms = plan.durations.interval_ms,
            isi_ms = plan.durations.isi_ms,
            "trial planned"
        );
        self.pause = None;
        self.active = Some(ActiveTrial {
            plan,
            timestamps: TrialTimestamps::new(now),
            noise: None,
            quality: None,
        });
        self.enter(TrialState::LeadIn, now);
    }

    /// Schedule the inter-trial pause. `epoch` is returned with the elapsed event.
    pub fn begin_pause(&mut self, now: u64, duration_ms: u64, epoch: u64) {
        self.active = None;
        self.pause = Some(Pause {
            until_ns: now.saturating_add(duration_ms.saturating_mul(NS_PER_MS)),
            epoch,
        });
        self.enter(TrialState::InterTrial, now);
    }

    /// Drop any trial or pause and return to a blank idle display
    pub fn cancel(&mut self) {
        if self.state != TrialState::Idle {
            debug!(state = ?self.state, trial = ?self.current_trial(), "sequencer cancelled");
        }
        self.active = None;
        self.pause = None;
        self.state = TrialState::Idle;
    }

    /// Close the response window and hand back the trial.
    ///
    /// `expected` pins the response to a specific trial id; a mismatch or a
    /// sequencer not awaiting a response leaves everything unchanged.
    pub fn accept_response(&mut self, expected: Option<usize>, now: u64) -> Option<CompletedTrial> {
        if self.state != TrialState::AwaitingResponse {
            return None;
        }
        let active = self.active.as_ref()?;
        if expected.is_some_and(|id| id != active.plan.id) {
            debug!(expected = ?expected, current = active.plan.id, "stale response ignored");
            return None;
        }
        let mut active = self.active.take()?;
        active.timestamps.response = Some(now);
        self.state = TrialState::Idle;
        Some(CompletedTrial {
            plan: active.plan,
            timestamps: active.timestamps,
            quality: active.quality,
        })
    }

    /// Advance the timeline to the refresh at `now`
    pub fn tick(&mut self, now: u64, refresh_hz: f64) -> Vec<SequencerEvent> {
        let mut events = Vec::new();
        loop {
            let elapsed_ns = now.saturating_sub(self.state_started_ns);
            let next = match self.state {
                TrialState::Idle | TrialState::AwaitingResponse => None,
                TrialState::InterTrial => match self.pause {
                    Some(p) if now >= p.until_ns => {
                        self.pause = None;
                        events.push(SequencerEvent::PauseElapsed { epoch: p.epoch });
                        Some(TrialState::Idle)
                    }
                    Some(_) => None,
                    None => Some(TrialState::Idle),
                },
                TrialState::LeadIn => self
                    .timed(elapsed_ns, |d| d.lead_in_ms)
                    .then_some(TrialState::Interval1),
                TrialState::Mask => self.timed(elapsed_ns, |d| d.mask_ms).then_some(TrialState::Isi),
                TrialState::Isi => self
                    .timed(elapsed_ns, |d| d.isi_ms)
                    .then_some(TrialState::Interval2),
                TrialState::Interval1 | TrialState::Interval2 => {
                    if let Some(clock) = self.active.as_mut().and_then(|t| t.noise.as_mut()) {
                        clock.advance(now);
                    }
                    if self.timed(elapsed_ns, |d| d.interval_ms) {
                        self.end_interval(&mut events);
                        Some(if self.state == TrialState::Interval1 {
                            TrialState::Mask
                        } else {
                            TrialState::AwaitingResponse
                        })
                    } else {
                        None
                    }
                }
            };

            let Some(next) = next else { break };
            self.enter(next, now);
            match next {
                TrialState::Interval1 | TrialState::Interval2 => {
                    self.start_interval(now, refresh_hz, &mut events)
                }
                TrialState::AwaitingResponse => {
                    if let Some(t) = self.active.as_mut() {
                        t.timestamps.prompt = Some(now);
                        events.push(SequencerEvent::ResponsePrompted { trial: t.plan.id });
                    }
                }
                TrialState::Idle => break,
                _ => {}
            }
        }
        events
    }

    /// Content for the refresh the last tick advanced to
    pub fn frame(&self) -> FrameContent {
        let Some(interval) = self.state.interval() else {
            return FrameContent::Blank;
        };
        match self.active.as_ref() {
            Some(t) if t.plan.correct_interval == interval => match &t.noise {
                Some(clock) => FrameContent::Noise {
                    seed: clock.seed(),
                    contrast_pct: clock.contrast_pct,
                },
                None => FrameContent::Fixation,
            },
            Some(_) => FrameContent::Fixation,
            None => FrameContent::Blank,
        }
    }

    fn enter(&mut self, state: TrialState, now: u64) {
        trace!(from = ?self.state, to = ?state, now, "sequencer transition");
        self.state = state;
        self.state_started_ns = now;
    }

    fn timed(&self, elapsed_ns: u64, pick: impl Fn(&crate::trial::TrialDurations) -> u64) -> bool {
        match &self.active {
            Some(t) => elapsed_ns >= pick(&t.plan.durations).saturating_mul(NS_PER_MS),
            // no trial behind a timed state: let it fall through
            None => true,
        }
    }

    fn start_interval(&mut self, now: u64, refresh_hz: f64, events: &mut Vec<SequencerEvent>) {
        let Some(interval) = self.state.interval() else { return };
        let update_hz = self.update_hz;
        let Some(t) = self.active.as_mut() else { return };
        match interval {
            Interval::First => t.timestamps.interval1_start = Some(now),
            Interval::Second => t.timestamps.interval2_start = Some(now),
        }
        t.noise = (t.plan.correct_interval == interval).then(|| {
            NoiseClock::new(t.plan.seed_base, t.plan.contrast_pct, refresh_hz, update_hz, now)
        });
        events.push(SequencerEvent::IntervalStarted {
            trial: t.plan.id,
            interval,
        });
    }

    fn end_interval(&mut self, events: &mut Vec<SequencerEvent>) {
        let Some(interval) = self.state.interval() else { return };
        let Some(t) = self.active.as_mut() else { return };
        let quality = t.noise.take().map(|clock| clock.metrics(t.plan.id));
        if let Some(q) = &quality {
            debug!(
                trial = t.plan.id,
                interval = interval.number(),
                refresh_hz = q.refresh_hz,
                frames_per_update = q.frames_per_update,
                effective_hz = q.effective_hz,
                updates = q.updates,
                elapsed_ms = q.elapsed_ms,
                "noise interval finished"
            );
            t.quality = Some(q.clone());
        }
        events.push(SequencerEvent::IntervalEnded {
            trial: t.plan.id,
            interval,
            quality,
        });
    }
}
