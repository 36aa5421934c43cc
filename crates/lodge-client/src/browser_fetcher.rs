use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use lodge_core::error::AppError;
use lodge_core::models::{FetchTimeouts, FetchedPage, Identity};
use lodge_core::traits::Fetcher;
use tokio::sync::Mutex;
use url::Url;

const JSON_LD_SELECTOR: &str = r#"script[type="application/ld+json"]"#;
const JSON_LD_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
struct SessionKey {
    identity: Identity,
    user_agent: String,
}

struct SessionBrowser {
    key: SessionKey,
    browser: Arc<Browser>,
}

/// Headless-browser fetcher using Chromium via the Chrome DevTools Protocol.
///
/// Unlike [`super::ReqwestFetcher`], this renders JavaScript before returning
/// the HTML, so JSON-LD injected client-side is captured.
///
/// Proxy and user agent are process-wide Chromium settings, so one browser
/// is launched per session. When the rotator moves to a new session the
/// next fetch launches a fresh browser and the previous one is dropped
/// (which terminates it) once its in-flight pages finish. Images are
/// disabled to keep page weight down.
///
/// # Example
///
/// ```rust,no_run
/// use lodge_client::BrowserFetcher;
/// use lodge_core::models::{FetchTimeouts, Identity};
/// use lodge_core::traits::Fetcher;
/// use std::time::Duration;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = BrowserFetcher::new();
/// let timeouts = FetchTimeouts {
///     navigation: Duration::from_secs(35),
///     request_handler: Duration::from_secs(10),
///     json_ld_wait: Duration::from_secs(8),
/// };
/// let page = fetcher
///     .fetch("https://example.com", &Identity::direct(), "Mozilla/5.0", &timeouts)
///     .await?;
/// println!("{} bytes from {}", page.html.len(), page.final_url);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct BrowserFetcher {
    current: Arc<Mutex<Option<SessionBrowser>>>,
}

impl BrowserFetcher {
    /// No browser is launched until the first fetch.
    ///
    /// Requires a Chromium / Chrome binary reachable via `$PATH` (or the
    /// default locations checked by `chromiumoxide`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the browser for this identity/user-agent pair, launching it
    /// (and retiring the previous one) on a session change.
    async fn browser_for(&self, identity: &Identity, user_agent: &str) -> Result<Arc<Browser>, AppError> {
        let key = SessionKey {
            identity: identity.clone(),
            user_agent: user_agent.to_string(),
        };

        let mut current = self.current.lock().await;
        if let Some(session) = current.as_ref()
            && session.key == key
        {
            return Ok(Arc::clone(&session.browser));
        }

        let browser = Arc::new(Self::launch(identity, user_agent).await?);
        if let Some(retired) = current.replace(SessionBrowser {
            key,
            browser: Arc::clone(&browser),
        }) {
            tracing::info!(identity = %retired.key.identity, "Retiring browser of previous session");
        }
        Ok(browser)
    }

    async fn launch(identity: &Identity, user_agent: &str) -> Result<Browser, AppError> {
        let mut builder = BrowserConfig::builder();
        builder = builder.no_sandbox().disable_default_args();

        // Snap-packaged Chromium exposes a wrapper that rejects standard
        // Chrome CLI flags (--headless, --disable-gpu, …).
        if let Some(bin) = Self::find_chrome_binary() {
            tracing::debug!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        builder = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .arg("--blink-settings=imagesEnabled=false")
            .arg(format!("--user-agent={user_agent}"));

        if let Some(proxy) = identity.proxy_url() {
            builder = builder.arg(format!("--proxy-server={}", proxy_server_arg(proxy)?));
        }

        let config = builder
            .build()
            .map_err(|e| AppError::BrowserError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to
        // work. It ends once the browser it belongs to is gone.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::debug!("Browser CDP handler stopped: {event:?}");
                    break;
                }
            }
        });

        tracing::info!(identity = %identity, "Launched browser for session");
        Ok(browser)
    }

    /// Tries to locate the real Chrome/Chromium binary. `CHROME_BIN` wins,
    /// then well-known install paths; `None` lets `chromiumoxide` search.
    fn find_chrome_binary() -> Option<PathBuf> {
        let candidates: &[&str] = &[
            "/snap/chromium/current/usr/lib/chromium-browser/chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
        ];

        if let Ok(p) = std::env::var("CHROME_BIN") {
            let path = PathBuf::from(&p);
            if path.exists() {
                return Some(path);
            }
        }

        candidates.iter().map(PathBuf::from).find(|p| p.exists())
    }
}

/// Chromium's `--proxy-server` takes `scheme://host:port` only.
fn proxy_server_arg(proxy: &str) -> Result<String, AppError> {
    let url = Url::parse(proxy)
        .map_err(|e| AppError::ConfigError(format!("Invalid proxy URL: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| AppError::ConfigError("Proxy URL has no host".into()))?;
    if !url.username().is_empty() {
        tracing::warn!(
            proxy = %Identity::proxy(proxy),
            "Chromium does not accept proxy credentials on the command line; use an IP-allowlisted endpoint"
        );
    }
    Ok(match url.port_or_known_default() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    })
}

/// A tab that can be closed asynchronously.
trait ClosablePage: Send + 'static {
    fn close(self) -> impl Future<Output = Result<(), String>> + Send;
}

impl ClosablePage for Page {
    async fn close(self) -> Result<(), String> {
        Page::close(self).await.map_err(|e| e.to_string())
    }
}

/// Owns an open tab and guarantees it gets closed.
///
/// [`close`](Self::close) closes it inline. If the guard is dropped first,
/// because of an early error or a cancelled fetch, the close is spawned on
/// the runtime instead, so no tab outlives its fetch.
struct OpenPage<P: ClosablePage> {
    page: Option<P>,
}

impl<P: ClosablePage> OpenPage<P> {
    fn new(page: P) -> Self {
        Self { page: Some(page) }
    }

    async fn close(mut self) {
        if let Some(page) = self.page.take() {
            close_logged(page).await;
        }
    }
}

impl<P: ClosablePage> Drop for OpenPage<P> {
    fn drop(&mut self) {
        let Some(page) = self.page.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(close_logged(page));
            }
            Err(_) => tracing::warn!("No runtime to close abandoned browser tab"),
        }
    }
}

async fn close_logged<P: ClosablePage>(page: P) {
    if let Err(e) = page.close().await {
        tracing::warn!(error = %e, "Failed to close browser tab");
    }
}

/// Polls for a JSON-LD script until it appears or `wait` runs out. Pages
/// without one are still returned; extraction decides what that means.
async fn wait_for_json_ld(page: &Page, wait: Duration) -> bool {
    let found = tokio::time::timeout(wait, async {
        loop {
            if page.find_element(JSON_LD_SELECTOR).await.is_ok() {
                return;
            }
            tokio::time::sleep(JSON_LD_POLL_INTERVAL).await;
        }
    })
    .await;
    found.is_ok()
}

impl Fetcher for BrowserFetcher {
    async fn fetch(
        &self,
        url: &str,
        identity: &Identity,
        user_agent: &str,
        timeouts: &FetchTimeouts,
    ) -> Result<FetchedPage, AppError> {
        lodge_core::config::validate_http_url(url)?;
        let browser = self.browser_for(identity, user_agent).await?;
        let budget = timeouts.navigation + timeouts.json_ld_wait;

        // The tab is opened blank and owned by a guard before navigating, so
        // it is closed whichever way this fetch ends.
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to open tab: {e}")))?;
        let tab = OpenPage::new(page.clone());

        let result = tokio::time::timeout(budget, render(&page, url, timeouts.json_ld_wait)).await;
        tab.close().await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(AppError::Timeout(budget)),
        }
    }
}

async fn render(page: &Page, url: &str, json_ld_wait: Duration) -> Result<FetchedPage, AppError> {
    page.goto(url)
        .await
        .map_err(|e| AppError::BrowserError(format!("Failed to navigate to {url}: {e}")))?;

    if !wait_for_json_ld(page, json_ld_wait).await {
        tracing::debug!(%url, "No JSON-LD script appeared within wait");
    }

    let html = page
        .content()
        .await
        .map_err(|e| AppError::BrowserError(format!("Failed to read page content: {e}")))?;
    let final_url = page
        .url()
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| url.to_string());

    Ok(FetchedPage { final_url, html })
}
