use lodge_core::circuit_breaker::HealthCheckConfig;
use lodge_core::models::{BACKOFF_SIGNAL_KEY, NO_HOTEL_JSONLD, RUN_STATS_KEY, Task};
use lodge_core::throttle::JitterConfig;
use lodge_core::{CrawlConfig, Crawler, DirectIdentity};
use serde_json::json;

use crate::common::{StaticFetcher, hotel_page, setup_test_sink};

fn config() -> CrawlConfig {
    CrawlConfig::default()
        .with_jitter(JitterConfig::none())
        .with_health_check(HealthCheckConfig::disabled())
        .with_max_retries(1)
        .with_seed(1)
}

#[tokio::test]
async fn crawl_writes_records_and_stats_to_disk() {
    let (sink, _dir) = setup_test_sink().await;
    let fetcher = StaticFetcher::new([
        (
            "https://hotels.test/grand".to_string(),
            hotel_page(&json!({
                "@context": "https://schema.org",
                "@graph": [
                    {"@type": "WebPage", "name": "Grand Hotel | Book"},
                    {
                        "@type": ["Hotel", "LocalBusiness"],
                        "@id": "https://hotels.test/grand#hotel",
                        "name": "Grand Hotel",
                        "checkinTime": "15:00",
                        "petsAllowed": false,
                        "address": {"addressLocality": "Rome", "addressCountry": "IT"},
                        "geo": {"latitude": "41.9", "longitude": "12.5"}
                    }
                ]
            })),
        ),
        (
            "https://hotels.test/blog".to_string(),
            hotel_page(&json!({"@type": "BlogPosting", "headline": "Top 10"})),
        ),
    ]);

    let crawler = Crawler::new(config(), fetcher, DirectIdentity, sink.clone()).unwrap();
    let report = crawler
        .run(vec![
            Task::new("https://hotels.test/grand"),
            Task::new("https://hotels.test/blog"),
            Task::new("https://hotels.test/gone"),
        ])
        .await;

    assert_eq!(report.stats.total_urls, 3);
    assert_eq!(report.stats.successes, 2);
    assert_eq!(report.stats.failures, 1);

    let items = sink.items().await.unwrap();
    // Three task records plus the trailing run-stats row.
    assert_eq!(items.len(), 4);
    assert_eq!(items[3]["type"], "run-stats");

    let by_url = |url: &str| {
        items
            .iter()
            .find(|i| i["url"] == url)
            .cloned()
            .unwrap_or_else(|| panic!("no record for {url}"))
    };

    let grand = by_url("https://hotels.test/grand");
    assert!(grand["error"].is_null());
    assert_eq!(grand["hotelInfo"]["name"], "Grand Hotel");
    assert_eq!(grand["normalized"]["id"], "https://hotels.test/grand#hotel");
    assert_eq!(grand["normalized"]["pets_allowed"], false);
    assert_eq!(grand["normalized"]["address_locality"], "Rome");
    assert!(grand["normalized"]["telephone"].is_null());

    let blog = by_url("https://hotels.test/blog");
    assert_eq!(blog["error"], NO_HOTEL_JSONLD);
    assert_eq!(blog["jsonLdData"][0]["@type"], "BlogPosting");

    let gone = by_url("https://hotels.test/gone");
    assert!(gone["error"].as_str().unwrap().contains("404"));
    assert_eq!(gone["jsonLdData"], json!([]));

    let stats = sink.get_value(RUN_STATS_KEY).await.unwrap().unwrap();
    assert_eq!(stats["total_urls"], 3);
    assert_eq!(stats["failures"], 1);
    assert!(sink.get_value(BACKOFF_SIGNAL_KEY).await.unwrap().is_none());
}

#[tokio::test]
async fn failing_batch_stores_backoff_signal() {
    let (sink, _dir) = setup_test_sink().await;
    let crawler =
        Crawler::new(config(), StaticFetcher::default(), DirectIdentity, sink.clone()).unwrap();

    let report = crawler
        .run(vec![
            Task::new("https://hotels.test/a"),
            Task::new("https://hotels.test/b"),
        ])
        .await;

    assert_eq!(report.stats.failures, 2);
    let signal = sink.get_value(BACKOFF_SIGNAL_KEY).await.unwrap().unwrap();
    assert_eq!(signal["flagged"], true);
    assert_eq!(signal["stats"]["failure_ratio"], 1.0);
}
