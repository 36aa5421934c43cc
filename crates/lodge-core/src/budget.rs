//! Wall-clock admission control.
//!
//! A run has a hard time limit imposed by whoever launched it. Work started
//! too close to that limit is killed half-way, so new tasks stop being
//! admitted once less than `safety_buffer` remains. Tasks already running are
//! never interrupted by the gate.
//!
//! Uses tokio's clock so paused-time tests drive it.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct TimeBudget {
    run_start: Instant,
    max_run_time: Duration,
    safety_buffer: Duration,
}

impl TimeBudget {
    pub fn new(run_start: Instant, max_run_time: Duration, safety_buffer: Duration) -> Self {
        Self {
            run_start,
            max_run_time,
            safety_buffer,
        }
    }

    /// Time left before the hard limit, saturating at zero.
    pub fn remaining(&self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.run_start);
        self.max_run_time.saturating_sub(elapsed)
    }

    /// Whether a task arriving at `now` may start.
    ///
    /// `remaining == safety_buffer` is still admitted.
    pub fn admit(&self, now: Instant) -> bool {
        self.remaining(now) >= self.safety_buffer
    }
}
