use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::budget::TimeBudget;
use crate::circuit_breaker::HealthGate;
use crate::config::CrawlConfig;
use crate::error::AppError;
use crate::extract;
use crate::models::{
    BACKOFF_SIGNAL_KEY, FetchTimeouts, FetchedPage, HEALTH_CHECK_FAILED, Identity, RUN_STATS_KEY,
    RunReport, RunStats, Task, TaskOutcome, TaskRecord,
};
use crate::recorder::OutcomeRecorder;
use crate::session::SessionRotator;
use crate::task_queue::TaskQueue;
use crate::throttle::PolitenessDelay;
use crate::traits::{Fetcher, IdentityProvider, Sink};

/// Events emitted by the crawler for monitoring/logging.
#[derive(Debug, Clone)]
pub enum CrawlEvent<'a> {
    Started {
        total_tasks: usize,
        concurrency: usize,
    },
    WorkerStarted {
        worker: usize,
    },
    TaskStarted {
        url: &'a str,
    },
    TaskSkipped {
        url: &'a str,
        remaining: Duration,
    },
    AttemptFailed {
        url: &'a str,
        attempt: u32,
        session: &'a str,
        error: &'a str,
        will_retry: bool,
    },
    TaskSucceeded {
        url: &'a str,
        hotel_name: Option<&'a str>,
    },
    ExtractionMissed {
        url: &'a str,
        final_url: &'a str,
    },
    TaskFailed {
        url: &'a str,
        error: &'a str,
    },
    RunAborted {
        reason: &'a str,
    },
    TaskAborted {
        url: &'a str,
    },
    WorkerStopped {
        worker: usize,
    },
    Finished {
        stats: &'a RunStats,
    },
}

/// Trait for receiving crawl events (decoupled logging).
pub trait CrawlReporter: Send + Sync {
    fn report(&self, event: CrawlEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCrawlReporter;

impl CrawlReporter for TracingCrawlReporter {
    fn report(&self, event: CrawlEvent<'_>) {
        match event {
            CrawlEvent::Started {
                total_tasks,
                concurrency,
            } => {
                tracing::info!(%total_tasks, %concurrency, "Crawl started");
            }
            CrawlEvent::WorkerStarted { worker } => {
                tracing::debug!(%worker, "Worker started");
            }
            CrawlEvent::TaskStarted { url } => {
                tracing::info!(%url, "Processing");
            }
            CrawlEvent::TaskSkipped { url, remaining } => {
                tracing::warn!(
                    %url,
                    remaining_secs = remaining.as_secs(),
                    "Skipping, run time budget nearly exhausted"
                );
            }
            CrawlEvent::AttemptFailed {
                url,
                attempt,
                session,
                error,
                will_retry,
            } => {
                tracing::warn!(%url, %attempt, %session, %error, %will_retry, "Attempt failed");
            }
            CrawlEvent::TaskSucceeded { url, hotel_name } => {
                tracing::info!(%url, hotel = hotel_name.unwrap_or("<unnamed>"), "Extracted hotel");
            }
            CrawlEvent::ExtractionMissed { url, final_url } => {
                tracing::warn!(%url, %final_url, "No hotel JSON-LD found");
            }
            CrawlEvent::TaskFailed { url, error } => {
                tracing::error!(%url, %error, "Navigation failed");
            }
            CrawlEvent::RunAborted { reason } => {
                tracing::error!(%reason, "Aborting run, cancelling queued URLs");
            }
            CrawlEvent::TaskAborted { url } => {
                tracing::debug!(%url, "Cancelled");
            }
            CrawlEvent::WorkerStopped { worker } => {
                tracing::debug!(%worker, "Worker stopped");
            }
            CrawlEvent::Finished { stats } => {
                tracing::info!(
                    total = stats.total_urls,
                    successes = stats.successes,
                    misses = stats.extraction_misses,
                    failures = stats.failures,
                    skipped = stats.skipped,
                    aborted = stats.aborted,
                    sessions = stats.sessions_used,
                    duration_secs = stats.duration_seconds,
                    "Crawl finished"
                );
            }
        }
    }
}

/// Fixed-size worker pool harvesting one batch of tasks.
pub struct Crawler<F, P, S, R = TracingCrawlReporter> {
    config: CrawlConfig,
    fetcher: F,
    provider: P,
    sink: S,
    reporter: Arc<R>,
}

impl<F, P, S> Crawler<F, P, S, TracingCrawlReporter>
where
    F: Fetcher + 'static,
    P: IdentityProvider + 'static,
    S: Sink + 'static,
{
    /// Fails with [`AppError::ConfigError`] if `config` does not validate.
    pub fn new(config: CrawlConfig, fetcher: F, provider: P, sink: S) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self {
            config,
            fetcher,
            provider,
            sink,
            reporter: Arc::new(TracingCrawlReporter),
        })
    }
}

impl<F, P, S, R> Crawler<F, P, S, R>
where
    F: Fetcher + 'static,
    P: IdentityProvider + 'static,
    S: Sink + 'static,
    R: CrawlReporter + 'static,
{
    pub fn with_reporter<R2: CrawlReporter + 'static>(self, reporter: R2) -> Crawler<F, P, S, R2> {
        Crawler {
            config: self.config,
            fetcher: self.fetcher,
            provider: self.provider,
            sink: self.sink,
            reporter: Arc::new(reporter),
        }
    }

    /// Runs the batch with the run clock starting now.
    pub async fn run(self, tasks: Vec<Task>) -> RunReport {
        self.run_from(tasks, Instant::now()).await
    }

    /// Runs the batch against a run budget that started at `run_start`.
    ///
    /// Returns once every task has settled: processed, skipped by the
    /// budget gate, or cancelled by a failed health check. Stats are written
    /// to the sink before returning, whatever the outcome.
    pub async fn run_from(self, tasks: Vec<Task>, run_start: Instant) -> RunReport {
        let total = tasks.len();
        let concurrency = self.config.concurrency.max(1);
        let config = &self.config;

        let state = Arc::new(RunState {
            queue: TaskQueue::new(tasks),
            budget: TimeBudget::new(run_start, config.max_run_time, config.safety_buffer),
            gate: HealthGate::new("health-check", config.health_check.clone()),
            rotator: SessionRotator::new(
                self.provider,
                config.session_page_limit,
                config.user_agents.clone(),
                config.seed,
            ),
            recorder: OutcomeRecorder::new(total as u64, config.failure_ratio_threshold),
            delay: PolitenessDelay::new(config.jitter, config.seed),
            timeouts: config.timeouts(),
            max_retries: config.max_retries,
            fetcher: self.fetcher,
            sink: self.sink,
            reporter: self.reporter,
            cancel: CancellationToken::new(),
        });

        state.reporter.report(CrawlEvent::Started {
            total_tasks: total,
            concurrency,
        });

        let mut workers = JoinSet::new();
        for worker in 0..concurrency.min(total.max(1)) {
            let state = Arc::clone(&state);
            workers.spawn(async move { state.worker_loop(worker).await });
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }

        state.finish(run_start.elapsed()).await
    }
}

/// State shared by every worker of one run.
struct RunState<F, P, S, R> {
    queue: TaskQueue,
    budget: TimeBudget,
    gate: HealthGate,
    rotator: SessionRotator<P>,
    recorder: OutcomeRecorder,
    delay: PolitenessDelay,
    timeouts: FetchTimeouts,
    max_retries: u32,
    fetcher: F,
    sink: S,
    reporter: Arc<R>,
    cancel: CancellationToken,
}

impl<F, P, S, R> RunState<F, P, S, R>
where
    F: Fetcher,
    P: IdentityProvider,
    S: Sink,
    R: CrawlReporter,
{
    async fn worker_loop(&self, worker: usize) {
        self.reporter.report(CrawlEvent::WorkerStarted { worker });

        while !self.cancel.is_cancelled() {
            let Some(task) = self.queue.pop() else {
                break;
            };
            if self.process(task).await {
                tokio::select! {
                    () = self.delay.pause() => {}
                    () = self.cancel.cancelled() => {}
                }
            }
        }

        // Tasks still queued after a cancellation are settled here, so no
        // task is lost whichever worker observes the abort first.
        if self.cancel.is_cancelled() {
            self.abort_queued().await;
        }

        self.reporter.report(CrawlEvent::WorkerStopped { worker });
    }

    /// Settles one task. Returns whether a fetch was dispatched, which is
    /// when the politeness delay applies.
    async fn process(&self, task: Task) -> bool {
        let now = Instant::now();
        if !self.budget.admit(now) {
            self.reporter.report(CrawlEvent::TaskSkipped {
                url: &task.target_url,
                remaining: self.budget.remaining(now),
            });
            self.recorder.record(&TaskOutcome::Skipped);
            return false;
        }

        if let Err(e) = self.ensure_healthy().await {
            self.trip(&e.to_string());
            self.abort_task(&task).await;
            return false;
        }

        self.reporter.report(CrawlEvent::TaskStarted {
            url: &task.target_url,
        });

        let outcome = match self.fetch_with_retries(&task).await {
            Ok(page) => self.handle_page(&task, &page).await,
            Err(e) => {
                let error = e.to_string();
                self.reporter.report(CrawlEvent::TaskFailed {
                    url: &task.target_url,
                    error: &error,
                });
                self.emit(&TaskRecord::failure(&task, &task.target_url, error.clone()))
                    .await;
                TaskOutcome::NavigationFailure(error)
            }
        };
        self.recorder.record(&outcome);
        true
    }

    /// Passes through the one-shot health gate. Only the first caller
    /// probes; everyone else gets the latched verdict.
    async fn ensure_healthy(&self) -> Result<(), AppError> {
        let through_session = self.gate.config().through_session;
        let probe_timeouts = FetchTimeouts {
            navigation: self.gate.config().timeout,
            request_handler: Duration::ZERO,
            json_ld_wait: Duration::ZERO,
        };
        let rotator = &self.rotator;
        let fetcher = &self.fetcher;

        self.gate
            .check(|url| async move {
                let lease = rotator.peek();
                let identity = if through_session {
                    lease.identity
                } else {
                    Identity::direct()
                };
                fetcher
                    .fetch(&url, &identity, &lease.user_agent, &probe_timeouts)
                    .await
                    .map(|_| ())
            })
            .await
    }

    /// Fetches with up to `max_retries` further attempts on retryable
    /// errors. Every attempt leases a session, so retries may land on a
    /// fresh identity.
    async fn fetch_with_retries(&self, task: &Task) -> Result<FetchedPage, AppError> {
        let attempts = self.max_retries + 1;
        let budget = self.timeouts.attempt_budget();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let lease = self.rotator.acquire();
            let fetch = self.fetcher.fetch(
                &task.target_url,
                &lease.identity,
                &lease.user_agent,
                &self.timeouts,
            );
            let result = match tokio::time::timeout(budget, fetch).await {
                Ok(result) => result,
                Err(_) => Err(AppError::Timeout(budget)),
            };

            let err = match result {
                Ok(page) => return Ok(page),
                Err(e) => e,
            };
            let will_retry = err.is_retryable() && attempt < attempts;
            self.reporter.report(CrawlEvent::AttemptFailed {
                url: &task.target_url,
                attempt,
                session: &lease.session_id,
                error: &err.to_string(),
                will_retry,
            });
            if !will_retry {
                return Err(err);
            }
        }
    }

    async fn handle_page(&self, task: &Task, page: &FetchedPage) -> TaskOutcome {
        let extraction = extract::extract(&page.html);
        let record = TaskRecord::from_extraction(task, &page.final_url, &extraction);

        let outcome = match &record.normalized {
            None => {
                self.reporter.report(CrawlEvent::ExtractionMissed {
                    url: &task.target_url,
                    final_url: &page.final_url,
                });
                TaskOutcome::ExtractionMiss
            }
            Some(normalized) => {
                self.reporter.report(CrawlEvent::TaskSucceeded {
                    url: &task.target_url,
                    hotel_name: extraction.hotel_name(),
                });
                for field in normalized.missing_fields() {
                    tracing::warn!(url = %page.final_url, %field, "Missing field");
                }
                TaskOutcome::Success
            }
        };

        self.emit(&record).await;
        outcome
    }

    /// Latches the abort. Only the first caller reports it.
    fn trip(&self, reason: &str) {
        if self.recorder.mark_aborted(reason) {
            self.reporter.report(CrawlEvent::RunAborted { reason });
        }
        self.cancel.cancel();
    }

    async fn abort_task(&self, task: &Task) {
        self.reporter.report(CrawlEvent::TaskAborted {
            url: &task.target_url,
        });
        self.emit(&TaskRecord::failure(task, &task.target_url, HEALTH_CHECK_FAILED))
            .await;
        self.recorder.record(&TaskOutcome::Aborted);
    }

    async fn abort_queued(&self) {
        for task in self.queue.drain() {
            self.abort_task(&task).await;
        }
    }

    /// Appends a record. Sink failures are logged and otherwise ignored.
    async fn emit(&self, record: &TaskRecord) {
        let value = match serde_json::to_value(record) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(url = %record.url, error = %e, "Failed to serialize record");
                return;
            }
        };
        if let Err(e) = self.sink.append(&value).await {
            tracing::error!(url = %record.url, error = %e, "Failed to persist record");
        }
    }

    async fn finish(&self, elapsed: Duration) -> RunReport {
        let (stats, backoff) = self.recorder.finalize(elapsed, self.rotator.sessions_minted());
        self.reporter.report(CrawlEvent::Finished { stats: &stats });

        match serde_json::to_value(&stats) {
            Ok(value) => {
                if let Err(e) = self.sink.set_value(RUN_STATS_KEY, &value).await {
                    tracing::error!(key = RUN_STATS_KEY, error = %e, "Failed to persist run stats");
                }
                let mut row = serde_json::json!({ "type": "run-stats" });
                if let (Some(row), serde_json::Value::Object(fields)) = (row.as_object_mut(), value)
                {
                    row.extend(fields);
                }
                if let Err(e) = self.sink.append(&row).await {
                    tracing::error!(error = %e, "Failed to append run-stats row");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize run stats"),
        }

        if let Some(signal) = &backoff {
            match serde_json::to_value(signal) {
                Ok(value) => {
                    if let Err(e) = self.sink.set_value(BACKOFF_SIGNAL_KEY, &value).await {
                        tracing::error!(key = BACKOFF_SIGNAL_KEY, error = %e, "Failed to persist backoff signal");
                    }
                }
                Err(e) => tracing::error!(error = %e, "Failed to serialize backoff signal"),
            }
        }

        RunReport { stats, backoff }
    }
}
