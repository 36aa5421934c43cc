use lodge_core::traits::Sink;
use lodge_store::{FileSink, StoreConfig};
use serde_json::json;

use crate::common::setup_test_sink;

#[tokio::test]
async fn appends_numbered_records_in_order() {
    let (sink, _dir) = setup_test_sink().await;

    sink.append(&json!({"url": "https://a.test"})).await.unwrap();
    sink.append(&json!({"url": "https://b.test"})).await.unwrap();

    assert!(sink.dataset_dir().join("000000001.json").exists());
    assert!(sink.dataset_dir().join("000000002.json").exists());

    let items = sink.items().await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["url"], "https://a.test");
    assert_eq!(items[1]["url"], "https://b.test");
}

#[tokio::test]
async fn set_value_overwrites_and_reads_back() {
    let (sink, _dir) = setup_test_sink().await;

    sink.set_value("RUN-STATS", &json!({"successes": 1})).await.unwrap();
    sink.set_value("RUN-STATS", &json!({"successes": 2})).await.unwrap();

    let value = sink.get_value("RUN-STATS").await.unwrap().unwrap();
    assert_eq!(value["successes"], 2);
    assert!(sink.key_value_dir().join("RUN-STATS.json").exists());
    assert!(sink.get_value("MISSING").await.unwrap().is_none());
}

#[tokio::test]
async fn rejects_path_like_keys() {
    let (sink, _dir) = setup_test_sink().await;
    let err = sink.set_value("../../etc", &json!(1)).await.unwrap_err();
    assert!(err.to_string().contains("Invalid key"));
}

#[tokio::test]
async fn purge_on_start_clears_previous_run() {
    let (sink, dir) = setup_test_sink().await;
    sink.append(&json!({"n": 1})).await.unwrap();
    sink.set_value("OLD", &json!(true)).await.unwrap();

    let reopened = FileSink::open(&StoreConfig::new(dir.path())).await.unwrap();

    assert!(reopened.items().await.unwrap().is_empty());
    assert!(reopened.get_value("OLD").await.unwrap().is_none());
}

#[tokio::test]
async fn purge_keeps_run_input() {
    let (sink, dir) = setup_test_sink().await;
    let input = sink.key_value_dir().join("INPUT.json");
    tokio::fs::write(&input, br#"{"startUrls": ["https://a.test"]}"#)
        .await
        .unwrap();
    sink.set_value("RUN-STATS", &json!({})).await.unwrap();

    let reopened = FileSink::open(&StoreConfig::new(dir.path())).await.unwrap();

    assert!(input.exists());
    assert!(reopened.get_value("RUN-STATS").await.unwrap().is_none());
    assert_eq!(
        reopened.get_value("INPUT").await.unwrap().unwrap()["startUrls"][0],
        "https://a.test"
    );
}

#[tokio::test]
async fn without_purge_numbering_continues() {
    let (sink, dir) = setup_test_sink().await;
    sink.append(&json!({"n": 1})).await.unwrap();
    sink.append(&json!({"n": 2})).await.unwrap();

    let config = StoreConfig {
        purge_on_start: false,
        ..StoreConfig::new(dir.path())
    };
    let reopened = FileSink::open(&config).await.unwrap();
    reopened.append(&json!({"n": 3})).await.unwrap();

    assert!(reopened.dataset_dir().join("000000003.json").exists());
    let items = reopened.items().await.unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[2]["n"], 3);
}

#[tokio::test]
async fn concurrent_appends_get_distinct_files() {
    let (sink, _dir) = setup_test_sink().await;

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let sink = sink.clone();
            tokio::spawn(async move { sink.append(&json!({"n": i})).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(sink.items().await.unwrap().len(), 20);
}
