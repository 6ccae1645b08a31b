use std::collections::VecDeque;
use tracing::warn;

/// Frame intervals longer than this are stalls (window hidden, debugger) and are ignored
const MAX_PLAUSIBLE_INTERVAL_NS: u64 = 250_000_000;

/// Rolling estimate of the display refresh rate from vsync timestamps.
///
/// Fed once per presented frame. Until enough plausible intervals are seen, or if
/// they are degenerate, callers get the configured fallback rate.
#[derive(Debug, Clone)]
pub struct RefreshEstimator {
    intervals_ns: VecDeque<u64>,
    window: usize,
    min_samples: usize,
    fallback_hz: f64,
    last_vsync_ns: Option<u64>,
    warned: bool,
}

impl RefreshEstimator {
    pub fn new(fallback_hz: f64) -> Self {
        Self::with_window(fallback_hz, 60, 8)
    }

    pub fn with_window(fallback_hz: f64, window: usize, min_samples: usize) -> Self {
        let fallback_hz = if fallback_hz.is_finite() && fallback_hz > 0.0 {
            fallback_hz
        } else {
            60.0
        };
        let window = window.max(1);
        Self {
            intervals_ns: VecDeque::with_capacity(window),
            window,
            min_samples: min_samples.clamp(1, window),
            fallback_hz,
            last_vsync_ns: None,
            warned: false,
        }
    }

    /// Record a vsync at `now_ns`
    pub fn record_vsync(&mut self, now_ns: u64) {
        if let Some(last) = self.last_vsync_ns {
            let dt = now_ns.saturating_sub(last);
            if dt > 0 && dt <= MAX_PLAUSIBLE_INTERVAL_NS {
                if self.intervals_ns.len() >= self.window {
                    self.intervals_ns.pop_front();
                }
                self.intervals_ns.push_back(dt);
            }
        }
        self.last_vsync_ns = Some(now_ns);
    }

    /// Measured rate, or `None` when unmeasured or degenerate
    pub fn measured_hz(&self) -> Option<f64> {
        if self.intervals_ns.len() < self.min_samples {
            return None;
        }
        let mean_ns =
            self.intervals_ns.iter().map(|&d| d as f64).sum::<f64>() / self.intervals_ns.len() as f64;
        let hz = 1e9 / mean_ns;
        (mean_ns > 0.0 && hz.is_finite() && hz > 0.0).then_some(hz)
    }

    /// Measured rate, falling back to the configured default
    pub fn refresh_hz(&mut self) -> f64 {
        match self.measured_hz() {
            Some(hz) => hz,
            None => {
                if !self.warned {
                    warn!(
                        fallback_hz = self.fallback_hz,
                        samples = self.intervals_ns.len(),
                        "refresh rate not measurable yet, using fallback"
                    );
                    self.warned = true;
                }
                self.fallback_hz
            }
        }
    }

    pub fn fallback_hz(&self) -> f64 {
        self.fallback_hz
    }

    pub fn sample_count(&self) -> usize {
        self.intervals_ns.len()
    }

    /// Forget history, e.g. after a resize or monitor change
    pub fn reset(&mut self) {
        self.intervals_ns.clear();
        self.last_vsync_ns = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn feed(est: &mut RefreshEstimator, period_ns: u64, n: usize) {
        let mut t = 1_000_000;
        for _ in 0..n {
            est.record_vsync(t);
            t += period_ns;
        }
    }

    #[test]
    fn measures_steady_rate() {
        let mut est = RefreshEstimator::new(60.0);
        feed(&mut est, 8_333_333, 40);
        assert_relative_eq!(est.refresh_hz(), 120.0, epsilon = 1e-3);
    }

    #[test]
    fn falls_back_until_enough_samples() {
        let mut est = RefreshEstimator::with_window(60.0, 30, 8);
        feed(&mut est, 6_944_444, 4);
        assert_eq!(est.measured_hz(), None);
        assert_eq!(est.refresh_hz(), 60.0);
    }

    #[test]
    fn zero_intervals_are_ignored() {
        let mut est = RefreshEstimator::new(60.0);
        for _ in 0..50 {
            est.record_vsync(5);
        }
        assert_eq!(est.sample_count(), 0);
        assert_eq!(est.refresh_hz(), 60.0);
    }

    #[test]
    fn stalls_do_not_skew_estimate() {
        let mut est = RefreshEstimator::new(60.0);
        feed(&mut est, 16_666_667, 20);
        let last = 1_000_000 + 19 * 16_666_667;
        est.record_vsync(last + 2_000_000_000);
        assert_relative_eq!(est.refresh_hz(), 60.0, epsilon = 1e-3);
    }

    #[test]
    fn invalid_fallback_is_replaced() {
        let mut est = RefreshEstimator::new(0.0);
        assert_eq!(est.refresh_hz(), 60.0);
        let mut est = RefreshEstimator::new(f64::NAN);
        assert_eq!(est.refresh_hz(), 60.0);
    }

    #[test]
    fn reset_clears_history() {
        let mut est = RefreshEstimator::new(60.0);
        feed(&mut est, 6_944_444, 30);
        est.reset();
        assert_eq!(est.sample_count(), 0);
    }
}
