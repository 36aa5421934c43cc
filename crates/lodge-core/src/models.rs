use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::extract::{ExtractionResult, NormalizedRecord};

/// Error marker for a page that loaded but carried no hotel JSON-LD.
pub const NO_HOTEL_JSONLD: &str = "no-hotel-jsonld";

/// Error marker for tasks cancelled because the pre-flight probe failed.
pub const HEALTH_CHECK_FAILED: &str = "health-check-failed";

/// Key-value store key for the final run statistics.
pub const RUN_STATS_KEY: &str = "RUN-STATS";

/// Key-value store key for the backoff signal of a flagged run.
pub const BACKOFF_SIGNAL_KEY: &str = "BACKOFF-SIGNAL";

/// One URL to harvest. Built once from the input batch and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub target_url: String,
    /// URL as given in the input, preserved for downstream joins even if the
    /// target is later rewritten.
    pub original_url: String,
    #[serde(default)]
    pub user_data: serde_json::Value,
}

impl Task {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            target_url: url.clone(),
            original_url: url,
            user_data: serde_json::Value::Null,
        }
    }

    pub fn with_user_data(mut self, user_data: serde_json::Value) -> Self {
        self.user_data = user_data;
        self
    }
}

/// Opaque network egress handle handed to the fetcher.
///
/// `None` means a direct connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Identity {
    proxy_url: Option<String>,
}

impl Identity {
    pub fn direct() -> Self {
        Self { proxy_url: None }
    }

    pub fn proxy(url: impl Into<String>) -> Self {
        Self {
            proxy_url: Some(url.into()),
        }
    }

    pub fn proxy_url(&self) -> Option<&str> {
        self.proxy_url.as_deref()
    }

    pub fn is_direct(&self) -> bool {
        self.proxy_url.is_none()
    }
}

impl fmt::Display for Identity {
    /// Renders the proxy endpoint with credentials masked.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.proxy_url {
            None => write!(f, "direct"),
            Some(raw) => match Url::parse(raw) {
                Ok(mut url) => {
                    if url.password().is_some() {
                        let _ = url.set_password(Some("***"));
                    }
                    write!(f, "{url}")
                }
                Err(_) => write!(f, "<unparseable proxy>"),
            },
        }
    }
}

/// The slice of a session a single dispatch gets to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLease {
    pub session_id: String,
    pub identity: Identity,
    pub user_agent: String,
    /// 1-based position of this dispatch within the session.
    pub page_number: u32,
}

/// Per-attempt time budgets passed to the fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTimeouts {
    pub navigation: Duration,
    pub request_handler: Duration,
    /// How long a rendering fetcher waits for late-injected JSON-LD.
    pub json_ld_wait: Duration,
}

impl FetchTimeouts {
    /// Upper bound for one complete attempt.
    pub fn attempt_budget(&self) -> Duration {
        self.navigation + self.request_handler
    }
}

/// Content returned by a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// URL after redirects.
    pub final_url: String,
    pub html: String,
}

/// Row written to the dataset for every dispatched or cancelled task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub url: String,
    pub final_url: String,
    pub scraped_at: DateTime<Utc>,
    pub json_ld_data: Vec<serde_json::Value>,
    pub hotel_info: Option<serde_json::Value>,
    pub normalized: Option<NormalizedRecord>,
    pub error: Option<String>,
}

impl TaskRecord {
    /// Record for a page that loaded. A page without a hotel node carries the
    /// [`NO_HOTEL_JSONLD`] marker.
    pub fn from_extraction(task: &Task, final_url: &str, extraction: &ExtractionResult) -> Self {
        Self {
            url: task.original_url.clone(),
            final_url: final_url.to_string(),
            scraped_at: Utc::now(),
            json_ld_data: extraction.raw_blocks.clone(),
            hotel_info: extraction.hotel_node.clone(),
            normalized: extraction.normalized(),
            error: extraction.is_miss().then(|| NO_HOTEL_JSONLD.to_string()),
        }
    }

    pub fn failure(task: &Task, final_url: &str, error: impl Into<String>) -> Self {
        Self {
            url: task.original_url.clone(),
            final_url: final_url.to_string(),
            scraped_at: Utc::now(),
            json_ld_data: Vec::new(),
            hotel_info: None,
            normalized: None,
            error: Some(error.into()),
        }
    }
}

/// Terminal state of one task, as seen by the outcome recorder.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// Page fetched and a hotel node normalized.
    Success,
    /// Page fetched, but no hotel node was present.
    ExtractionMiss,
    /// All attempts failed.
    NavigationFailure(String),
    /// Rejected by the time budget gate.
    Skipped,
    /// Cancelled before dispatch by a failed health check.
    Aborted,
}

/// Aggregated run statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub total_urls: u64,
    pub successes: u64,
    /// Successes whose page carried no hotel JSON-LD.
    pub extraction_misses: u64,
    pub failures: u64,
    pub skipped: u64,
    pub aborted: u64,
    pub duration_seconds: f64,
    pub failure_ratio: f64,
    pub sessions_used: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
}

impl RunStats {
    pub fn is_aborted(&self) -> bool {
        self.abort_reason.is_some()
    }

    /// Number of tasks that reached a terminal state.
    pub fn settled(&self) -> u64 {
        self.successes + self.failures + self.skipped + self.aborted
    }
}

/// Advisory signal that the run failed too often to be repeated as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffSignal {
    pub flagged: bool,
    pub message: String,
    pub stats: RunStats,
}

/// Everything a finished run hands back to its caller.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub stats: RunStats,
    pub backoff: Option<BackoffSignal>,
}
