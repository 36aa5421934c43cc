mod input;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

use lodge_client::{ProxyListProvider, ProxyTemplateProvider, ReqwestFetcher};
use lodge_core::models::{FetchTimeouts, FetchedPage, Identity};
use lodge_core::traits::{DirectIdentity, Fetcher, IdentityProvider};
use lodge_core::{AppError, Crawler};
use lodge_store::{FileSink, INPUT_FILE, StoreConfig};

use crate::input::ActorInput;

#[derive(Parser, Debug)]
#[command(
    name = "lodge",
    version,
    about = "Harvest hotel JSON-LD from a batch of URLs"
)]
pub(crate) struct Cli {
    /// Run input JSON. Defaults to INPUT.json in the storage key-value store
    /// when present.
    #[arg(short, long, env = "LODGE_INPUT")]
    input: Option<PathBuf>,

    /// Target URL; repeat for several. Replaces the input file's URLs.
    #[arg(short, long = "url", value_name = "URL")]
    urls: Vec<String>,

    /// Number of workers
    #[arg(short, long, env = "LODGE_CONCURRENCY")]
    concurrency: Option<usize>,

    #[arg(long)]
    navigation_timeout_secs: Option<u64>,

    #[arg(long)]
    request_handler_timeout_secs: Option<u64>,

    /// Lower bound of the pause between a worker's tasks
    #[arg(long)]
    delay_ms_min: Option<u64>,

    /// Upper bound of the pause between a worker's tasks
    #[arg(long)]
    delay_ms_max: Option<u64>,

    /// Pages served by one session before it is replaced
    #[arg(long)]
    session_page_limit: Option<u32>,

    /// Hard wall-clock limit of the run
    #[arg(long, env = "LODGE_MAX_RUN_TIME_SECS")]
    max_run_time_secs: Option<u64>,

    /// Time reserved at the end of the run for writing results
    #[arg(long)]
    safety_buffer_secs: Option<u64>,

    /// Retries per task after the first attempt
    #[arg(long)]
    max_retries: Option<u32>,

    /// Failed/processed ratio above which a backoff signal is written
    #[arg(long)]
    failure_ratio_threshold: Option<f64>,

    /// Proxy URL; repeat (or comma-separate) to rotate through several
    #[arg(long = "proxy-url", env = "LODGE_PROXY_URLS", value_delimiter = ',')]
    proxy_urls: Vec<String>,

    /// Sticky-session proxy URL containing `{session}`
    #[arg(long, env = "LODGE_PROXY_URL_TEMPLATE")]
    proxy_url_template: Option<String>,

    /// Reference page probed once before the first task
    #[arg(long)]
    health_check_url: Option<String>,

    /// Skip the pre-flight health check
    #[arg(long, default_value_t = false)]
    no_health_check: bool,

    /// Seed for session ids, user-agent choice and jitter
    #[arg(long, env = "LODGE_SEED")]
    seed: Option<u64>,

    /// Local storage root (defaults to LODGE_STORAGE_DIR or ./storage)
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// Render pages in headless Chromium instead of plain HTTP
    #[arg(long, default_value_t = false)]
    browser: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "LODGE_LOG_JSON", default_value_t = false)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // The run budget counts from process start.
    let run_start = Instant::now();

    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    run(&cli, run_start).await
}

async fn run(cli: &Cli, run_start: Instant) -> Result<ExitCode> {
    let mut store_config = StoreConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    if let Some(dir) = &cli.storage_dir {
        store_config.storage_dir = dir.clone();
    }

    // Input must be read before the sink purges storage.
    let mut input = load_input(cli, &store_config)?;
    input.apply_cli(cli);

    let tasks = input.tasks();
    if tasks.is_empty() {
        tracing::warn!("No valid start URLs; nothing to do");
        return Ok(ExitCode::SUCCESS);
    }

    // Everything that can reject the input runs before the sink purges the
    // previous run's results.
    let config = input.crawl_config();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("Invalid crawl configuration")?;
    let provider = build_provider(&input)?;
    let fetcher = build_fetcher(cli.browser)?;
    let sink = FileSink::open(&store_config)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to open local storage")?;

    let crawler =
        Crawler::new(config, fetcher, provider, sink).map_err(|e| anyhow::anyhow!(e))?;
    let report = crawler.run_from(tasks, run_start).await;

    println!("{}", serde_json::to_string_pretty(&report.stats)?);

    if report.stats.is_aborted() {
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("lodge=info".parse()?);
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

/// An explicit `--input` must exist; the default location is optional.
fn load_input(cli: &Cli, store: &StoreConfig) -> Result<ActorInput> {
    if let Some(path) = &cli.input {
        return ActorInput::load(path);
    }
    let default = store.key_value_store_dir().join(INPUT_FILE);
    if default.is_file() {
        tracing::info!(path = %default.display(), "Reading run input");
        return ActorInput::load(&default);
    }
    Ok(ActorInput::default())
}

fn build_provider(input: &ActorInput) -> Result<AnyProvider> {
    if let Some(template) = &input.proxy_url_template {
        if !input.proxy_urls.is_empty() {
            tracing::warn!("Both a proxy template and a proxy list were given; using the template");
        }
        let provider = ProxyTemplateProvider::new(template.clone()).map_err(|e| anyhow::anyhow!(e))?;
        return Ok(AnyProvider::Template(provider));
    }
    if !input.proxy_urls.is_empty() {
        let provider =
            ProxyListProvider::new(input.proxy_urls.clone()).map_err(|e| anyhow::anyhow!(e))?;
        tracing::info!(proxies = input.proxy_urls.len(), "Rotating through proxy list");
        return Ok(AnyProvider::List(provider));
    }
    tracing::info!("No proxies configured; connecting directly");
    Ok(AnyProvider::Direct(DirectIdentity))
}

#[cfg(feature = "browser")]
fn build_fetcher(browser: bool) -> Result<AnyFetcher> {
    if browser {
        return Ok(AnyFetcher::Browser(lodge_client::BrowserFetcher::new()));
    }
    Ok(AnyFetcher::Http(ReqwestFetcher::new()))
}

#[cfg(not(feature = "browser"))]
fn build_fetcher(browser: bool) -> Result<AnyFetcher> {
    anyhow::ensure!(
        !browser,
        "--browser requires a build with the `browser` feature"
    );
    Ok(AnyFetcher::Http(ReqwestFetcher::new()))
}

enum AnyProvider {
    Direct(DirectIdentity),
    List(ProxyListProvider),
    Template(ProxyTemplateProvider),
}

impl IdentityProvider for AnyProvider {
    fn new_identity(&self, session_hint: &str) -> Identity {
        match self {
            AnyProvider::Direct(p) => p.new_identity(session_hint),
            AnyProvider::List(p) => p.new_identity(session_hint),
            AnyProvider::Template(p) => p.new_identity(session_hint),
        }
    }
}

#[derive(Clone)]
enum AnyFetcher {
    Http(ReqwestFetcher),
    #[cfg(feature = "browser")]
    Browser(lodge_client::BrowserFetcher),
}

impl Fetcher for AnyFetcher {
    async fn fetch(
        &self,
        url: &str,
        identity: &Identity,
        user_agent: &str,
        timeouts: &FetchTimeouts,
    ) -> Result<FetchedPage, AppError> {
        match self {
            AnyFetcher::Http(f) => f.fetch(url, identity, user_agent, timeouts).await,
            #[cfg(feature = "browser")]
            AnyFetcher::Browser(f) => f.fetch(url, identity, user_agent, timeouts).await,
        }
    }
}
