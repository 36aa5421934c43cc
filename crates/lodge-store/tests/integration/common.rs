use std::collections::HashMap;
use std::sync::Arc;

use lodge_core::error::AppError;
use lodge_core::models::{FetchTimeouts, FetchedPage, Identity};
use lodge_core::traits::Fetcher;
use lodge_store::{FileSink, StoreConfig};
use tempfile::TempDir;

/// Opens a purged sink in a fresh temporary directory.
///
/// The `TempDir` must be kept in scope for the test duration; dropping it
/// deletes the storage.
pub async fn setup_test_sink() -> (FileSink, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let sink = FileSink::open(&StoreConfig::new(dir.path()))
        .await
        .expect("Failed to open sink");
    (sink, dir)
}

/// Serves fixed pages by URL; unknown URLs fail with a 404.
#[derive(Clone, Default)]
pub struct StaticFetcher {
    pages: Arc<HashMap<String, String>>,
}

impl StaticFetcher {
    pub fn new(pages: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            pages: Arc::new(pages.into_iter().collect()),
        }
    }
}

impl Fetcher for StaticFetcher {
    async fn fetch(
        &self,
        url: &str,
        _identity: &Identity,
        _user_agent: &str,
        _timeouts: &FetchTimeouts,
    ) -> Result<FetchedPage, AppError> {
        match self.pages.get(url) {
            Some(html) => Ok(FetchedPage {
                final_url: url.to_string(),
                html: html.clone(),
            }),
            None => Err(AppError::HttpError(format!("HTTP 404 for {url}"))),
        }
    }
}

pub fn hotel_page(json_ld: &serde_json::Value) -> String {
    format!(
        r#"<html><head><title>x</title><script type="application/ld+json">{json_ld}</script></head><body></body></html>"#
    )
}
