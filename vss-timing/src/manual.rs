use crate::timer::{CalibrationStats, Timer};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Clock that only moves when told to.
///
/// Clones share the same time base, so a test (or the headless simulation) can
/// hold one handle while the engine owns another. `sleep` advances the clock
/// instead of blocking.
#[derive(Debug, Clone, Default)]
pub struct ManualTimer {
    now_ns: Arc<AtomicU64>,
    frame_times: Arc<Mutex<VecDeque<Duration>>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, d: Duration) {
        self.now_ns
            .fetch_add(d.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }

    pub fn set_ns(&self, ns: u64) {
        self.now_ns.store(ns, Ordering::SeqCst);
    }
}

impl Timer for ManualTimer {
    type Timestamp = u64;
    fn now(&self) -> u64 {
        self.now_ns.load(Ordering::SeqCst)
    }
    fn elapsed(&self, ts: u64) -> Duration {
        Duration::from_nanos(self.now().saturating_sub(ts))
    }
    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
    fn record_frame(&mut self, d: Duration) {
        if let Ok(mut frames) = self.frame_times.lock() {
            if frames.len() >= 1000 {
                frames.pop_front();
            }
            frames.push_back(d);
        }
    }
    fn calibration_stats(&self) -> CalibrationStats {
        match self.frame_times.lock() {
            Ok(frames) => CalibrationStats::from_frame_times(frames.iter()),
            Err(_) => CalibrationStats::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_clock() {
        let a = ManualTimer::new();
        let b = a.clone();
        a.advance_ms(5);
        assert_eq!(b.now(), 5_000_000);
        b.sleep(Duration::from_millis(1));
        assert_eq!(a.now(), 6_000_000);
        assert_eq!(a.elapsed(1_000_000), Duration::from_millis(5));
    }

    #[test]
    fn elapsed_never_underflows() {
        let t = ManualTimer::new();
        assert_eq!(t.elapsed(10), Duration::ZERO);
    }
}
