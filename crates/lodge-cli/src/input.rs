//! Run input: an Apify-style `INPUT.json` merged with command-line flags.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use lodge_core::config::validate_http_url;
use lodge_core::throttle::JitterConfig;
use lodge_core::{CrawlConfig, Task};
use serde::Deserialize;

use crate::Cli;

/// A start URL as either a bare string or a request object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum StartUrl {
    Plain(String),
    Request {
        url: String,
        #[serde(default, rename = "userData")]
        user_data: serde_json::Value,
    },
}

impl StartUrl {
    fn parts(&self) -> (&str, serde_json::Value) {
        match self {
            StartUrl::Plain(url) => (url, serde_json::Value::Null),
            StartUrl::Request { url, user_data } => (url, user_data.clone()),
        }
    }
}

/// Every field is optional; unset fields keep the crawl defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorInput {
    #[serde(default)]
    pub start_urls: Vec<StartUrl>,
    /// Single-URL fallback used when `startUrls` is empty.
    pub url: Option<String>,
    pub concurrency: Option<usize>,
    pub navigation_timeout_secs: Option<u64>,
    pub request_handler_timeout_secs: Option<u64>,
    pub json_ld_wait_secs: Option<u64>,
    pub delay_ms_min: Option<u64>,
    pub delay_ms_max: Option<u64>,
    pub session_page_limit: Option<u32>,
    pub max_run_time_secs: Option<u64>,
    pub safety_buffer_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub failure_ratio_threshold: Option<f64>,
    #[serde(default)]
    pub proxy_urls: Vec<String>,
    pub proxy_url_template: Option<String>,
    #[serde(default)]
    pub user_agents: Vec<String>,
    /// An empty string disables the health check.
    pub health_check_url: Option<String>,
    pub seed: Option<u64>,
}

impl ActorInput {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid JSON in input file: {}", path.display()))
    }

    /// Flags win over the file. `--url` replaces the file's URL list.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if !cli.urls.is_empty() {
            self.start_urls = cli.urls.iter().cloned().map(StartUrl::Plain).collect();
            self.url = None;
        }
        if !cli.proxy_urls.is_empty() {
            self.proxy_urls = cli.proxy_urls.clone();
        }
        if cli.no_health_check {
            self.health_check_url = Some(String::new());
        } else if cli.health_check_url.is_some() {
            self.health_check_url = cli.health_check_url.clone();
        }

        self.concurrency = cli.concurrency.or(self.concurrency);
        self.navigation_timeout_secs = cli.navigation_timeout_secs.or(self.navigation_timeout_secs);
        self.request_handler_timeout_secs = cli
            .request_handler_timeout_secs
            .or(self.request_handler_timeout_secs);
        self.delay_ms_min = cli.delay_ms_min.or(self.delay_ms_min);
        self.delay_ms_max = cli.delay_ms_max.or(self.delay_ms_max);
        self.session_page_limit = cli.session_page_limit.or(self.session_page_limit);
        self.max_run_time_secs = cli.max_run_time_secs.or(self.max_run_time_secs);
        self.safety_buffer_secs = cli.safety_buffer_secs.or(self.safety_buffer_secs);
        self.max_retries = cli.max_retries.or(self.max_retries);
        self.failure_ratio_threshold = cli.failure_ratio_threshold.or(self.failure_ratio_threshold);
        self.proxy_url_template = cli
            .proxy_url_template
            .clone()
            .or(self.proxy_url_template.take());
        self.seed = cli.seed.or(self.seed);
    }

    /// Tasks in input order. Blank, invalid and duplicate URLs are dropped
    /// with a warning.
    pub fn tasks(&self) -> Vec<Task> {
        let entries: Vec<(&str, serde_json::Value)> = if !self.start_urls.is_empty() {
            self.start_urls.iter().map(StartUrl::parts).collect()
        } else {
            self.url
                .as_deref()
                .map(|url| (url, serde_json::Value::Null))
                .into_iter()
                .collect()
        };

        let mut seen = HashSet::new();
        entries
            .into_iter()
            .filter_map(|(url, user_data)| {
                let url = url.trim();
                if url.is_empty() {
                    return None;
                }
                if let Err(e) = validate_http_url(url) {
                    tracing::warn!(%url, error = %e, "Dropping invalid start URL");
                    return None;
                }
                if !seen.insert(url.to_string()) {
                    tracing::warn!(%url, "Dropping duplicate start URL");
                    return None;
                }
                Some(Task::new(url).with_user_data(user_data))
            })
            .collect()
    }

    /// Crawl configuration with this input's overrides applied to the
    /// defaults. Not validated.
    pub fn crawl_config(&self) -> CrawlConfig {
        let mut config = CrawlConfig::default();

        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(secs) = self.navigation_timeout_secs {
            config.navigation_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.request_handler_timeout_secs {
            config.request_handler_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.json_ld_wait_secs {
            config.json_ld_wait = Duration::from_secs(secs);
        }
        config.jitter = JitterConfig::new(
            self.delay_ms_min
                .map_or(config.jitter.min, Duration::from_millis),
            self.delay_ms_max
                .map_or(config.jitter.max, Duration::from_millis),
        );
        if let Some(limit) = self.session_page_limit {
            config.session_page_limit = limit;
        }
        if let Some(secs) = self.max_run_time_secs {
            config.max_run_time = Duration::from_secs(secs);
        }
        if let Some(secs) = self.safety_buffer_secs {
            config.safety_buffer = Duration::from_secs(secs);
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        if let Some(threshold) = self.failure_ratio_threshold {
            config.failure_ratio_threshold = threshold;
        }
        match self.health_check_url.as_deref().map(str::trim) {
            Some("") => config.health_check.url = None,
            Some(url) => config.health_check.url = Some(url.to_string()),
            None => {}
        }
        if !self.user_agents.is_empty() {
            config.user_agents = self.user_agents.clone();
        }
        config.seed = self.seed;

        config
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use clap::Parser;

    use super::*;

    fn parse(json: &str) -> ActorInput {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn accepts_strings_and_request_objects() {
        let input = parse(
            r#"{"startUrls": [
                "https://a.test/1",
                {"url": "https://a.test/2", "userData": {"label": "DETAIL"}}
            ]}"#,
        );
        let tasks = input.tasks();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].target_url, "https://a.test/1");
        assert!(tasks[0].user_data.is_null());
        assert_eq!(tasks[1].user_data["label"], "DETAIL");
    }

    #[test]
    fn falls_back_to_single_url() {
        let input = parse(r#"{"url": "https://a.test/only"}"#);
        let tasks = input.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].original_url, "https://a.test/only");
    }

    #[test]
    fn start_urls_take_precedence_over_url() {
        let input = parse(r#"{"startUrls": ["https://a.test/1"], "url": "https://a.test/x"}"#);
        let urls: Vec<_> = input.tasks().into_iter().map(|t| t.target_url).collect();
        assert_eq!(urls, vec!["https://a.test/1"]);
    }

    #[test]
    fn drops_blank_invalid_and_duplicate_urls() {
        let input = parse(
            r#"{"startUrls": ["https://a.test/1", "  ", "not a url", "https://a.test/1", "https://a.test/2"]}"#,
        );
        let urls: Vec<_> = input.tasks().into_iter().map(|t| t.target_url).collect();
        assert_eq!(urls, vec!["https://a.test/1", "https://a.test/2"]);
    }

    #[test]
    fn empty_input_has_no_tasks() {
        assert!(ActorInput::default().tasks().is_empty());
    }

    #[test]
    fn maps_fields_onto_defaults() {
        let input = parse(
            r#"{
                "concurrency": 5,
                "navigationTimeoutSecs": 60,
                "requestHandlerTimeoutSecs": 20,
                "delayMsMin": 100,
                "sessionPageLimit": 4,
                "maxRunTimeSecs": 600,
                "safetyBufferSecs": 45,
                "maxRetries": 1,
                "failureRatioThreshold": 0.25,
                "userAgents": ["ua-1"],
                "seed": 9
            }"#,
        );
        let config = input.crawl_config();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.navigation_timeout, Duration::from_secs(60));
        assert_eq!(config.request_handler_timeout, Duration::from_secs(20));
        assert_eq!(config.jitter.min, Duration::from_millis(100));
        assert_eq!(config.jitter.max, Duration::from_millis(900));
        assert_eq!(config.session_page_limit, 4);
        assert_eq!(config.max_run_time, Duration::from_secs(600));
        assert_eq!(config.safety_buffer, Duration::from_secs(45));
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.failure_ratio_threshold, 0.25);
        assert_eq!(config.user_agents, vec!["ua-1".to_string()]);
        assert_eq!(config.seed, Some(9));
        config.validate().unwrap();
    }

    #[test]
    fn empty_health_check_url_disables_probe() {
        let config = parse(r#"{"healthCheckUrl": ""}"#).crawl_config();
        assert!(config.health_check.url.is_none());

        let config = parse(r#"{"healthCheckUrl": "https://ref.test/"}"#).crawl_config();
        assert_eq!(config.health_check.url.as_deref(), Some("https://ref.test/"));

        let config = ActorInput::default().crawl_config();
        assert_eq!(
            config.health_check.url.as_deref(),
            Some("https://www.example.com/")
        );
    }

    #[test]
    fn cli_flags_override_file() {
        let mut input = parse(
            r#"{"startUrls": ["https://file.test/1"], "concurrency": 2, "maxRetries": 5}"#,
        );
        let cli = Cli::parse_from([
            "lodge",
            "--url",
            "https://cli.test/1",
            "--url",
            "https://cli.test/2",
            "--concurrency",
            "8",
            "--no-health-check",
        ]);

        input.apply_cli(&cli);

        let urls: Vec<_> = input.tasks().into_iter().map(|t| t.target_url).collect();
        assert_eq!(urls, vec!["https://cli.test/1", "https://cli.test/2"]);
        let config = input.crawl_config();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.max_retries, 5);
        assert!(config.health_check.url.is_none());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"startUrls": ["https://a.test/1"], "delayMsMax": 500}}"#).unwrap();

        let input = ActorInput::load(file.path()).unwrap();
        assert_eq!(input.tasks().len(), 1);
        assert_eq!(input.delay_ms_max, Some(500));
    }

    #[test]
    fn load_reports_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = ActorInput::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Invalid JSON"));
    }
}
