use std::time::Duration;

use url::Url;

use crate::circuit_breaker::HealthCheckConfig;
use crate::error::AppError;
use crate::models::FetchTimeouts;
use crate::session::DEFAULT_USER_AGENTS;
use crate::throttle::JitterConfig;

/// Tunables for one harvest run.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Maximum number of tasks executing at once.
    pub concurrency: usize,
    pub navigation_timeout: Duration,
    pub request_handler_timeout: Duration,
    /// How long a rendering fetcher waits for late-injected JSON-LD.
    pub json_ld_wait: Duration,
    pub jitter: JitterConfig,
    /// Pages a session serves before it is rotated.
    pub session_page_limit: u32,
    /// Hard wall-clock limit for the whole run.
    pub max_run_time: Duration,
    /// No task starts once less than this remains of `max_run_time`.
    pub safety_buffer: Duration,
    /// Additional attempts after the first failed fetch.
    pub max_retries: u32,
    /// Failure ratio above which the run is flagged for backoff.
    pub failure_ratio_threshold: f64,
    pub health_check: HealthCheckConfig,
    /// User-agent pool sessions draw from.
    pub user_agents: Vec<String>,
    /// Seed for session ids, user-agent choice and jitter.
    pub seed: Option<u64>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            navigation_timeout: Duration::from_secs(35),
            request_handler_timeout: Duration::from_secs(10),
            json_ld_wait: Duration::from_secs(8),
            jitter: JitterConfig::default(),
            session_page_limit: 10,
            max_run_time: Duration::from_secs(3600),
            safety_buffer: Duration::from_secs(30),
            max_retries: 3,
            failure_ratio_threshold: 0.5,
            health_check: HealthCheckConfig::default(),
            user_agents: DEFAULT_USER_AGENTS.iter().map(|ua| ua.to_string()).collect(),
            seed: None,
        }
    }
}

impl CrawlConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_session_page_limit(mut self, limit: u32) -> Self {
        self.session_page_limit = limit;
        self
    }

    pub fn with_jitter(mut self, jitter: JitterConfig) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_run_budget(mut self, max_run_time: Duration, safety_buffer: Duration) -> Self {
        self.max_run_time = max_run_time;
        self.safety_buffer = safety_buffer;
        self
    }

    pub fn with_health_check(mut self, health_check: HealthCheckConfig) -> Self {
        self.health_check = health_check;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn timeouts(&self) -> FetchTimeouts {
        FetchTimeouts {
            navigation: self.navigation_timeout,
            request_handler: self.request_handler_timeout,
            json_ld_wait: self.json_ld_wait,
        }
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.concurrency == 0 {
            return Err(AppError::ConfigError(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.navigation_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "navigation timeout must be positive".into(),
            ));
        }
        if self.jitter.min > self.jitter.max {
            return Err(AppError::ConfigError(format!(
                "delay min ({} ms) must not exceed delay max ({} ms)",
                self.jitter.min.as_millis(),
                self.jitter.max.as_millis()
            )));
        }
        if self.session_page_limit == 0 {
            return Err(AppError::ConfigError(
                "session page limit must be at least 1".into(),
            ));
        }
        if self.safety_buffer >= self.max_run_time {
            return Err(AppError::ConfigError(format!(
                "safety buffer ({}s) must be shorter than max run time ({}s)",
                self.safety_buffer.as_secs(),
                self.max_run_time.as_secs()
            )));
        }
        if !(0.0..=1.0).contains(&self.failure_ratio_threshold) {
            return Err(AppError::ConfigError(format!(
                "failure ratio threshold {} must be between 0 and 1",
                self.failure_ratio_threshold
            )));
        }
        if self.user_agents.iter().all(|ua| ua.trim().is_empty()) {
            return Err(AppError::ConfigError(
                "user-agent pool must not be empty".into(),
            ));
        }
        if let Some(url) = &self.health_check.url {
            validate_http_url(url)?;
        }
        Ok(())
    }
}

/// Accepts only absolute http(s) URLs with a host.
pub fn validate_http_url(raw: &str) -> Result<Url, AppError> {
    let url = Url::parse(raw).map_err(|e| AppError::InvalidUrl(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::InvalidUrl(format!(
                "{raw}: scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }
    if url.host_str().is_none() {
        return Err(AppError::InvalidUrl(format!("{raw}: URL has no host")));
    }
    Ok(url)
}
