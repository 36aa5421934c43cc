//! Run-level outcome accounting and backoff signaling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::models::{BackoffSignal, RunStats, TaskOutcome};

#[derive(Debug, Default)]
struct Counters {
    successes: AtomicU64,
    misses: AtomicU64,
    failures: AtomicU64,
    skipped: AtomicU64,
    aborted: AtomicU64,
}

/// Shared, lock-free tally of task outcomes.
///
/// Cloned into every worker; all clones update the same counters.
#[derive(Debug, Clone)]
pub struct OutcomeRecorder {
    total_tasks: u64,
    failure_ratio_threshold: f64,
    counters: Arc<Counters>,
    abort_reason: Arc<Mutex<Option<String>>>,
}

impl OutcomeRecorder {
    pub fn new(total_tasks: u64, failure_ratio_threshold: f64) -> Self {
        Self {
            total_tasks,
            failure_ratio_threshold,
            counters: Arc::new(Counters::default()),
            abort_reason: Arc::new(Mutex::new(None)),
        }
    }

    /// Counts one settled task.
    ///
    /// An extraction miss is a completed fetch and counts as a success; only
    /// navigation failures count as failures.
    pub fn record(&self, outcome: &TaskOutcome) {
        let c = &self.counters;
        match outcome {
            TaskOutcome::Success => {
                c.successes.fetch_add(1, Ordering::Relaxed);
            }
            TaskOutcome::ExtractionMiss => {
                c.successes.fetch_add(1, Ordering::Relaxed);
                c.misses.fetch_add(1, Ordering::Relaxed);
            }
            TaskOutcome::NavigationFailure(_) => {
                c.failures.fetch_add(1, Ordering::Relaxed);
            }
            TaskOutcome::Skipped => {
                c.skipped.fetch_add(1, Ordering::Relaxed);
            }
            TaskOutcome::Aborted => {
                c.aborted.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Marks the run as aborted. The first reason wins; returns whether this
    /// call set it.
    pub fn mark_aborted(&self, reason: impl Into<String>) -> bool {
        let mut slot = self
            .abort_reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_some() {
            return false;
        }
        *slot = Some(reason.into());
        true
    }

    /// Current counters without duration or session count.
    pub fn snapshot(&self) -> RunStats {
        let c = &self.counters;
        let failures = c.failures.load(Ordering::Relaxed);
        RunStats {
            total_urls: self.total_tasks,
            successes: c.successes.load(Ordering::Relaxed),
            extraction_misses: c.misses.load(Ordering::Relaxed),
            failures,
            skipped: c.skipped.load(Ordering::Relaxed),
            aborted: c.aborted.load(Ordering::Relaxed),
            duration_seconds: 0.0,
            failure_ratio: failure_ratio(failures, self.total_tasks),
            sessions_used: 0,
            abort_reason: self
                .abort_reason
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone(),
        }
    }

    /// Final stats plus a backoff signal when the failure ratio exceeds the
    /// threshold. Called once, after every task has settled.
    pub fn finalize(
        &self,
        elapsed: Duration,
        sessions_used: u64,
    ) -> (RunStats, Option<BackoffSignal>) {
        let mut stats = self.snapshot();
        stats.duration_seconds = elapsed.as_secs_f64();
        stats.sessions_used = sessions_used;

        if stats.settled() != stats.total_urls {
            tracing::warn!(
                settled = stats.settled(),
                total = stats.total_urls,
                "Not every task reached a terminal state"
            );
        }

        let backoff = (stats.failure_ratio > self.failure_ratio_threshold).then(|| {
            let message = format!(
                "{:.0}% of {} URLs failed (threshold {:.0}%); reduce concurrency or rotate sessions sooner on the next run",
                stats.failure_ratio * 100.0,
                stats.total_urls,
                self.failure_ratio_threshold * 100.0
            );
            tracing::warn!(
                failures = stats.failures,
                total = stats.total_urls,
                ratio = stats.failure_ratio,
                "High failure ratio, flagging run for backoff"
            );
            BackoffSignal {
                flagged: true,
                message,
                stats: stats.clone(),
            }
        });

        (stats, backoff)
    }
}

fn failure_ratio(failures: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        failures as f64 / total as f64
    }
}
