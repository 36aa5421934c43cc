//! One-shot health check gating the start of a run.
//!
//! Before the first real task is dispatched, a single lightweight probe is
//! sent to a reference URL. If it fails the target is treated as
//! categorically unreachable and the whole run is aborted.
//!
//! ```text
//! UNCHECKED --[probe ok]--> PASSED   (never probed again)
//!     |
//!     +------[probe err]--> TRIPPED  (run aborted, queued tasks cancelled)
//! ```
//!
//! This is a fail-fast gate, not continuous health monitoring: an outage that
//! starts after the probe passed is handled by per-task retries instead.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;

use crate::error::AppError;

/// Configuration for the pre-flight probe.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Reference URL expected to be reachable. `None` disables the check.
    pub url: Option<String>,

    /// Budget for the single probe request.
    pub timeout: Duration,

    /// Send the probe through the current session's identity and user agent
    /// instead of a direct connection.
    pub through_session: bool,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            url: Some("https://www.example.com/".to_string()),
            timeout: Duration::from_secs(10),
            through_session: true,
        }
    }
}

impl HealthCheckConfig {
    pub fn disabled() -> Self {
        Self {
            url: None,
            ..Default::default()
        }
    }
}

/// Thread-safe, write-once health latch.
///
/// Concurrent callers of [`check`](Self::check) share one probe: the first
/// caller runs it, the others wait for its verdict.
#[derive(Clone)]
pub struct HealthGate {
    name: String,
    config: HealthCheckConfig,
    latch: Arc<OnceCell<Result<(), String>>>,
}

impl HealthGate {
    pub fn new(name: impl Into<String>, config: HealthCheckConfig) -> Self {
        Self {
            name: name.into(),
            config,
            latch: Arc::new(OnceCell::new()),
        }
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Runs `probe` at most once for the lifetime of the gate and returns the
    /// shared verdict. A failed probe becomes [`AppError::HealthCheckFailed`].
    ///
    /// `probe` receives the reference URL; it is not called when the check
    /// is disabled.
    pub async fn check<F, Fut>(&self, probe: F) -> Result<(), AppError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<(), AppError>>,
    {
        let name = self.name.clone();
        let config = self.config.clone();
        let verdict = self
            .latch
            .get_or_init(|| async move {
                let Some(url) = config.url else {
                    tracing::debug!(circuit = %name, "Health check disabled");
                    return Ok(());
                };

                tracing::info!(circuit = %name, %url, "Running health check");
                let outcome = match tokio::time::timeout(config.timeout, probe(url.clone())).await {
                    Ok(result) => result,
                    Err(_) => Err(AppError::Timeout(config.timeout)),
                };
                match outcome {
                    Ok(()) => {
                        tracing::info!(circuit = %name, %url, "Health check passed");
                        Ok(())
                    }
                    Err(e) => {
                        tracing::error!(circuit = %name, %url, error = %e, "Health check failed");
                        Err(e.to_string())
                    }
                }
            })
            .await;

        verdict
            .clone()
            .map_err(AppError::HealthCheckFailed)
    }
}
