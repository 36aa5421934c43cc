use std::time::Duration;

use lodge_core::config::validate_http_url;
use lodge_core::error::AppError;
use lodge_core::models::{FetchTimeouts, FetchedPage, Identity};
use lodge_core::traits::Fetcher;
use moka::future::Cache;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use reqwest::{Client, Proxy};

/// Sessions alive at once are few; the cap only bounds idle leftovers.
const MAX_CACHED_CLIENTS: u64 = 64;
const CLIENT_IDLE_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    identity: Identity,
    user_agent: String,
}

/// HTTP fetcher using reqwest.
///
/// Downloads raw HTML through the session's proxy with the session's
/// user agent. One `Client` (and so one connection pool and cookie-less
/// TLS session cache) is kept per identity/user-agent pair, so pages of the
/// same session reuse connections while different sessions never share one.
///
/// Does not execute JavaScript; pages that inject their JSON-LD client-side
/// need the `browser` feature's `BrowserFetcher`.
#[derive(Clone)]
pub struct ReqwestFetcher {
    clients: Cache<ClientKey, Client>,
}

impl ReqwestFetcher {
    pub fn new() -> Self {
        Self {
            clients: Cache::builder()
                .max_capacity(MAX_CACHED_CLIENTS)
                .time_to_idle(CLIENT_IDLE_TTL)
                .build(),
        }
    }

    async fn client_for(&self, identity: &Identity, user_agent: &str) -> Result<Client, AppError> {
        let key = ClientKey {
            identity: identity.clone(),
            user_agent: user_agent.to_string(),
        };
        self.clients
            .try_get_with(key, async { build_client(identity, user_agent) })
            .await
            .map_err(|e| AppError::ConfigError(e.to_string()))
    }

    /// Number of cached clients, after pending cache maintenance.
    pub async fn cached_clients(&self) -> u64 {
        self.clients.run_pending_tasks().await;
        self.clients.entry_count()
    }
}

impl Default for ReqwestFetcher {
    fn default() -> Self {
        Self::new()
    }
}

fn build_client(identity: &Identity, user_agent: &str) -> Result<Client, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

    let mut builder = Client::builder()
        .user_agent(user_agent)
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(10));

    builder = match identity.proxy_url() {
        Some(proxy_url) => {
            let proxy = Proxy::all(proxy_url)
                .map_err(|e| AppError::ConfigError(format!("Invalid proxy {identity}: {e}")))?;
            builder.proxy(proxy)
        }
        // Direct means direct: ignore HTTP(S)_PROXY from the environment.
        None => builder.no_proxy(),
    };

    builder
        .build()
        .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(
        &self,
        url: &str,
        identity: &Identity,
        user_agent: &str,
        timeouts: &FetchTimeouts,
    ) -> Result<FetchedPage, AppError> {
        validate_http_url(url)?;
        let client = self.client_for(identity, user_agent).await?;
        let timeout = timeouts.navigation;

        let response = client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(timeout)
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed via {identity}: {e}"))
                } else {
                    AppError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        let final_url = response.url().to_string();
        let html = response.text().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(timeout)
            } else {
                AppError::HttpError(format!("Failed to read response body: {e}"))
            }
        })?;

        Ok(FetchedPage { final_url, html })
    }
}
