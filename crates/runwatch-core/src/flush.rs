//! Adaptive viewport flushing.
//!
//! The controller watches how many lines arrive per sample window and turns
//! that rate into a dirty-line threshold. The UI loop asks it after every
//! batch (and on ticks) whether accumulated lines should be pushed to the
//! rendered viewport now.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlushPolicy {
    pub default_step: usize,
    pub min_step: usize,
    pub max_step: usize,
    /// Lines per second above which the step shrinks.
    pub high_rate: f64,
    /// Lines per second below which the step grows.
    pub low_rate: f64,
    pub sample_window: Duration,
    pub capacity_margin: usize,
    pub max_latency: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            default_step: 10,
            min_step: 2,
            max_step: 40,
            high_rate: 10.0,
            low_rate: 2.0,
            sample_window: Duration::from_secs(5),
            capacity_margin: 100,
            max_latency: Duration::from_millis(250),
        }
    }
}

/// Feed state at the end of one processed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushSignal {
    pub was_empty: bool,
    pub trimmed: bool,
    pub dirty: usize,
    pub len: usize,
    pub capacity: usize,
}

#[derive(Debug, Clone)]
pub struct FlushController {
    policy: FlushPolicy,
    last_flush: Instant,
    output_rate: f64,
    adaptive_step: usize,
    sample_line_count: usize,
    last_sample: Instant,
}

impl FlushController {
    pub fn new(policy: FlushPolicy, now: Instant) -> Self {
        Self {
            adaptive_step: policy.default_step.max(policy.min_step),
            policy,
            last_flush: now,
            output_rate: 0.0,
            sample_line_count: 0,
            last_sample: now,
        }
    }

    pub fn policy(&self) -> &FlushPolicy {
        &self.policy
    }

    pub fn adaptive_step(&self) -> usize {
        self.adaptive_step
    }

    pub fn output_rate(&self) -> f64 {
        self.output_rate
    }

    pub fn last_flush(&self) -> Instant {
        self.last_flush
    }

    /// Counts arriving lines; recomputes the step at window boundaries only.
    pub fn record(&mut self, lines: usize, now: Instant) {
        self.sample_line_count += lines;
        let elapsed = now.saturating_duration_since(self.last_sample);
        if elapsed < self.policy.sample_window {
            return;
        }

        self.output_rate = self.sample_line_count as f64 / elapsed.as_secs_f64();
        self.adaptive_step = if self.output_rate > self.policy.high_rate {
            (self.adaptive_step / 2).max(self.policy.min_step)
        } else if self.output_rate < self.policy.low_rate {
            (self.adaptive_step * 2).min(self.policy.max_step)
        } else {
            self.policy.default_step
        };
        self.sample_line_count = 0;
        self.last_sample = now;
    }

    pub fn should_flush(&self, signal: FlushSignal) -> bool {
        if signal.dirty == 0 {
            return false;
        }
        if signal.was_empty || signal.trimmed {
            return true;
        }
        if signal.dirty >= self.adaptive_step {
            return true;
        }
        signal.len + self.policy.capacity_margin >= signal.capacity
    }

    /// Tick-driven flush for lines that have waited longer than the latency
    /// bound without reaching the step.
    pub fn should_flush_stale(&self, dirty: usize, now: Instant) -> bool {
        dirty > 0 && now.saturating_duration_since(self.last_flush) >= self.policy.max_latency
    }

    pub fn mark_flushed(&mut self, now: Instant) {
        self.last_flush = now;
    }

    pub fn reset(&mut self, now: Instant) {
        *self = Self::new(self.policy, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(dirty: usize, len: usize) -> FlushSignal {
        FlushSignal {
            was_empty: false,
            trimmed: false,
            dirty,
            len,
            capacity: 800,
        }
    }

    #[test]
    fn first_content_and_trims_flush_immediately() {
        let controller = FlushController::new(FlushPolicy::default(), Instant::now());
        assert!(controller.should_flush(FlushSignal {
            was_empty: true,
            ..signal(1, 1)
        }));
        assert!(controller.should_flush(FlushSignal {
            trimmed: true,
            ..signal(1, 800)
        }));
        assert!(!controller.should_flush(signal(1, 200)));
    }

    #[test]
    fn flushes_at_step_or_near_capacity() {
        let controller = FlushController::new(FlushPolicy::default(), Instant::now());
        assert!(!controller.should_flush(signal(9, 200)));
        assert!(controller.should_flush(signal(10, 200)));
        assert!(controller.should_flush(signal(1, 700)));
        assert!(!controller.should_flush(signal(1, 699)));
    }

    #[test]
    fn nothing_dirty_never_flushes() {
        let controller = FlushController::new(FlushPolicy::default(), Instant::now());
        assert!(!controller.should_flush(FlushSignal {
            was_empty: true,
            trimmed: true,
            ..signal(0, 0)
        }));
    }

    #[test]
    fn step_only_changes_at_window_boundary() {
        let start = Instant::now();
        let mut controller = FlushController::new(FlushPolicy::default(), start);
        controller.record(500, start + Duration::from_secs(1));
        assert_eq!(controller.adaptive_step(), 10);
    }

    #[test]
    fn high_rate_shrinks_step_and_idle_restores_it() {
        let start = Instant::now();
        let mut controller = FlushController::new(FlushPolicy::default(), start);
        for second in 1..=5 {
            controller.record(20, start + Duration::from_secs(second));
        }
        assert!(controller.output_rate() > 10.0);
        assert!(controller.adaptive_step() < 10);
        let shrunk = controller.adaptive_step();

        controller.record(0, start + Duration::from_secs(10));
        assert!(controller.output_rate() < 2.0);
        assert!(controller.adaptive_step() > shrunk);
        assert!(controller.adaptive_step() >= 10);
    }

    #[test]
    fn step_respects_floor_and_ceiling() {
        let start = Instant::now();
        let mut controller = FlushController::new(FlushPolicy::default(), start);
        for window in 1..=6 {
            controller.record(1000, start + Duration::from_secs(5 * window));
        }
        assert_eq!(controller.adaptive_step(), 2);

        for window in 7..=20 {
            controller.record(0, start + Duration::from_secs(5 * window));
        }
        assert_eq!(controller.adaptive_step(), 40);
    }

    #[test]
    fn moderate_rate_resets_to_default() {
        let start = Instant::now();
        let mut controller = FlushController::new(FlushPolicy::default(), start);
        controller.record(1000, start + Duration::from_secs(5));
        assert_eq!(controller.adaptive_step(), 5);
        controller.record(25, start + Duration::from_secs(10));
        assert_eq!(controller.adaptive_step(), 10);
    }

    #[test]
    fn stale_dirty_lines_flush_after_latency() {
        let start = Instant::now();
        let mut controller = FlushController::new(FlushPolicy::default(), start);
        controller.mark_flushed(start);
        assert!(!controller.should_flush_stale(3, start + Duration::from_millis(100)));
        assert!(controller.should_flush_stale(3, start + Duration::from_millis(300)));
        assert!(!controller.should_flush_stale(0, start + Duration::from_secs(5)));
    }
}
