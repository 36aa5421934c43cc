//! Politeness jitter between task completions.
//!
//! After a worker records a task it sleeps for a delay drawn uniformly from
//! `[min, max]` before taking the next one, so request timing does not look
//! machine-regular.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Bounds of the post-task delay. `min <= max` is enforced by config
/// validation; a reversed pair is treated as `[max, min]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterConfig {
    pub min: Duration,
    pub max: Duration,
}

impl JitterConfig {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    /// No delay at all.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }
}

impl Default for JitterConfig {
    /// 250–900 ms between tasks.
    fn default() -> Self {
        Self {
            min: Duration::from_millis(250),
            max: Duration::from_millis(900),
        }
    }
}

/// Shared, seedable source of politeness delays.
#[derive(Debug, Clone)]
pub struct PolitenessDelay {
    config: JitterConfig,
    rng: Arc<Mutex<StdRng>>,
}

impl PolitenessDelay {
    pub fn new(config: JitterConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    /// Draws the next delay, inclusive on both ends at millisecond
    /// resolution.
    pub fn next_delay(&self) -> Duration {
        let lo = self.config.min.min(self.config.max).as_millis() as u64;
        let hi = self.config.min.max(self.config.max).as_millis() as u64;
        if lo == hi {
            return Duration::from_millis(lo);
        }
        let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
        Duration::from_millis(rng.gen_range(lo..=hi))
    }

    /// Sleeps for one drawn delay.
    pub async fn pause(&self) {
        let delay = self.next_delay();
        if delay.is_zero() {
            return;
        }
        tracing::debug!(delay_ms = %delay.as_millis(), "Politeness delay");
        tokio::time::sleep(delay).await;
    }
}
