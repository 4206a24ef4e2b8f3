// tests/ingest_config.rs
use std::fs;
use std::time::Duration;

use ticker_news_ingest::guard::QuotaWindow;
use ticker_news_ingest::ingest::config::load_config_from;
use ticker_news_ingest::ingest::types::SourceName;

#[test]
fn full_file_round_trips_into_runtime_settings() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("ingest.toml");
    fs::write(
        &p,
        r#"
tickers = ["AAPL", "msft", " nvda "]
workers = 4
request_timeout_secs = 3
lookback_days = 2
upsert_concurrency = 6
interval_secs = 300
store_snapshot = "state/articles.json"
output_path = "state/unique.jsonl"
metrics_textfile = "state/ingest.prom"

[upsert]
max_attempts = 7

[circuit]
failure_threshold = 3
auth_failure_threshold = 1

[tiingo]
budget = 1000
base_url = "http://127.0.0.1:8081"

[finnhub]
enabled = false
window = "per_minute"
"#,
    )
    .unwrap();

    let cfg = load_config_from(&p).unwrap();
    assert_eq!(cfg.tickers, vec!["AAPL", "MSFT", "NVDA"]);
    assert_eq!(cfg.workers, 4);
    assert_eq!(cfg.interval_secs, Some(300));
    assert_eq!(cfg.upsert.max_attempts, 7);
    assert_eq!(cfg.upsert.backoff_base_ms, 25);
    assert_eq!(cfg.circuit.failure_threshold, 3);
    assert_eq!(cfg.metrics_textfile.as_deref(), Some(std::path::Path::new("state/ingest.prom")));

    let f = cfg.fetcher_config();
    assert_eq!(f.workers, 4);
    assert_eq!(f.request_timeout, Duration::from_secs(3));
    assert_eq!(f.run_timeout, None);

    assert_eq!(cfg.quota_tracker(SourceName::Tiingo).budget(), 1000);
    assert_eq!(cfg.section(SourceName::Tiingo).base_url.as_deref(), Some("http://127.0.0.1:8081"));
    assert!(!cfg.section(SourceName::Finnhub).enabled);
    assert_eq!(cfg.finnhub.window, Some(QuotaWindow::PerMinute));
}

#[test]
fn missing_file_is_an_error_with_path() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("nope.toml");
    let err = load_config_from(&p).unwrap_err();
    assert!(format!("{err:#}").contains("nope.toml"));
}

#[test]
fn bad_toml_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("bad.toml");
    fs::write(&p, "workers = \"many\"").unwrap();
    assert!(load_config_from(&p).is_err());
}
