//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::AppError;
use crate::models::{FetchTimeouts, FetchedPage, Identity};
use crate::traits::{Fetcher, IdentityProvider, Sink};
use crate::worker::{CrawlEvent, CrawlReporter};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// One recorded `fetch` call.
#[derive(Debug, Clone)]
pub struct FetchCall {
    pub url: String,
    pub identity: Identity,
    pub user_agent: String,
}

/// Mock fetcher with per-URL scripted responses.
///
/// Each call to a scripted URL pops the next response for it; URLs without
/// (remaining) script entries get the default page.
#[derive(Clone)]
pub struct MockFetcher {
    scripted: Arc<Mutex<HashMap<String, VecDeque<Result<String, AppError>>>>>,
    default_html: String,
    latency: Duration,
    pub calls: Arc<Mutex<Vec<FetchCall>>>,
}

impl MockFetcher {
    /// Every URL returns `html` unless scripted otherwise.
    pub fn new(html: &str) -> Self {
        Self {
            scripted: Arc::new(Mutex::new(HashMap::new())),
            default_html: html.to_string(),
            latency: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn script(self, url: &str, responses: Vec<Result<String, AppError>>) -> Self {
        self.scripted
            .lock()
            .unwrap()
            .insert(url.to_string(), responses.into());
        self
    }

    /// Every call sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.url == url)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(
        &self,
        url: &str,
        identity: &Identity,
        user_agent: &str,
        _timeouts: &FetchTimeouts,
    ) -> Result<FetchedPage, AppError> {
        self.calls.lock().unwrap().push(FetchCall {
            url: url.to_string(),
            identity: identity.clone(),
            user_agent: user_agent.to_string(),
        });
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front);
        let html = match scripted {
            Some(response) => response?,
            None => self.default_html.clone(),
        };
        Ok(FetchedPage {
            final_url: url.to_string(),
            html,
        })
    }
}

// ---------------------------------------------------------------------------
// MockIdentityProvider
// ---------------------------------------------------------------------------

/// Mints `http://proxy.test/session_<n>` for the n-th call and records the
/// session hints it was given.
#[derive(Clone, Default)]
pub struct MockIdentityProvider {
    pub hints: Arc<Mutex<Vec<String>>>,
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityProvider for MockIdentityProvider {
    fn new_identity(&self, session_hint: &str) -> Identity {
        let mut hints = self.hints.lock().unwrap();
        hints.push(session_hint.to_string());
        Identity::proxy(format!("http://proxy.test/session_{}", hints.len()))
    }
}

// ---------------------------------------------------------------------------
// MockSink
// ---------------------------------------------------------------------------

/// Mock sink that records appends and values.
#[derive(Clone, Default)]
pub struct MockSink {
    pub appended: Arc<Mutex<Vec<serde_json::Value>>>,
    pub values: Arc<Mutex<HashMap<String, serde_json::Value>>>,
    failing: bool,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every write fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Appended task records, without the trailing run-stats row.
    pub fn records(&self) -> Vec<serde_json::Value> {
        self.appended
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.get("type").and_then(|t| t.as_str()) != Some("run-stats"))
            .cloned()
            .collect()
    }

    pub fn value(&self, key: &str) -> Option<serde_json::Value> {
        self.values.lock().unwrap().get(key).cloned()
    }
}

impl Sink for MockSink {
    async fn append(&self, record: &serde_json::Value) -> Result<(), AppError> {
        if self.failing {
            return Err(AppError::SinkError("disk full".into()));
        }
        self.appended.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn set_value(&self, key: &str, value: &serde_json::Value) -> Result<(), AppError> {
        if self.failing {
            return Err(AppError::SinkError("disk full".into()));
        }
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock crawl reporter that records event labels.
#[derive(Clone, Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, label: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.as_str() == label)
            .count()
    }
}

impl CrawlReporter for MockReporter {
    fn report(&self, event: CrawlEvent<'_>) {
        let label = match &event {
            CrawlEvent::Started { .. } => "Started",
            CrawlEvent::WorkerStarted { .. } => "WorkerStarted",
            CrawlEvent::TaskStarted { .. } => "TaskStarted",
            CrawlEvent::TaskSkipped { .. } => "TaskSkipped",
            CrawlEvent::AttemptFailed { .. } => "AttemptFailed",
            CrawlEvent::TaskSucceeded { .. } => "TaskSucceeded",
            CrawlEvent::ExtractionMissed { .. } => "ExtractionMissed",
            CrawlEvent::TaskFailed { .. } => "TaskFailed",
            CrawlEvent::RunAborted { .. } => "RunAborted",
            CrawlEvent::TaskAborted { .. } => "TaskAborted",
            CrawlEvent::WorkerStopped { .. } => "WorkerStopped",
            CrawlEvent::Finished { .. } => "Finished",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// A page embedding one `Hotel` JSON-LD block.
pub fn hotel_page(name: &str) -> String {
    format!(
        r#"<html><head><script type="application/ld+json">{}</script></head><body></body></html>"#,
        serde_json::json!({
            "@context": "https://schema.org",
            "@type": "Hotel",
            "@id": format!("https://hotels.test/{name}"),
            "name": name,
            "telephone": "+1 212-555-0100",
            "address": {
                "streetAddress": "1 Main St",
                "addressLocality": "New York",
                "addressRegion": "NY",
                "addressCountry": "US",
                "postalCode": "10001"
            },
            "geo": {"latitude": 40.75, "longitude": -73.99}
        })
    )
}

/// A page whose only JSON-LD block is not a hotel.
pub fn review_page() -> String {
    r#"<html><head><script type="application/ld+json">{"@type":"Review","reviewBody":"ok"}</script></head></html>"#
        .to_string()
}
