/// Smoke-test for `BrowserFetcher`.
///
/// Launches a headless Chromium, renders <https://example.com>, and runs the
/// JSON-LD extractor over the result. The page has no structured data, so
/// this checks the fetch/extract path end to end rather than the output.
///
/// Run with:
///   cargo run -p lodge-client --example browser_smoke --features browser
use std::time::Duration;

use lodge_client::BrowserFetcher;
use lodge_core::extract;
use lodge_core::models::{FetchTimeouts, Identity};
use lodge_core::session::DEFAULT_USER_AGENTS;
use lodge_core::traits::Fetcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let fetcher = BrowserFetcher::new();
    let timeouts = FetchTimeouts {
        navigation: Duration::from_secs(35),
        request_handler: Duration::from_secs(10),
        json_ld_wait: Duration::from_secs(2),
    };

    let url = "https://example.com";
    tracing::info!(%url, "Fetching");
    let page = fetcher
        .fetch(url, &Identity::direct(), DEFAULT_USER_AGENTS[0], &timeouts)
        .await?;

    anyhow::ensure!(
        page.html.contains("Example Domain"),
        "expected heading not found in rendered HTML"
    );

    let extraction = extract::extract(&page.html);
    tracing::info!(
        bytes = page.html.len(),
        final_url = %page.final_url,
        json_ld_blocks = extraction.raw_blocks.len(),
        hotel = extraction.hotel_name().unwrap_or("<none>"),
        "Rendered"
    );
    Ok(())
}
