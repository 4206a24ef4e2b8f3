//! Adapter tests against wiremock HTTP mocks.

use std::time::Duration;

use chrono::NaiveDate;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ticker_news_ingest::ingest::providers::finnhub::FinnhubAdapter;
use ticker_news_ingest::ingest::providers::tiingo::TiingoAdapter;
use ticker_news_ingest::ingest::providers::{UpstreamAdapter, UpstreamError};
use ticker_news_ingest::ingest::types::SourceName;

fn since() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 12, 20).unwrap()
}

fn tiingo(server: &MockServer) -> TiingoAdapter {
    TiingoAdapter::new("test-key", Some(&server.uri()), Duration::from_secs(5))
        .expect("client construction should not fail")
}

fn finnhub(server: &MockServer) -> FinnhubAdapter {
    FinnhubAdapter::new("test-key", Some(&server.uri()), Duration::from_secs(5))
        .expect("client construction should not fail")
}

#[tokio::test]
async fn tiingo_returns_parsed_articles() {
    let server = MockServer::start().await;
    let body = serde_json::json!([
        {
            "id": 555,
            "title": "Apple Reports Q4 Earnings Beat - Reuters",
            "url": "https://news.test/555",
            "publishedDate": "2025-12-21T14:02:11Z",
            "crawlDate": "2025-12-21T14:05:00Z",
            "source": "reuters.com",
            "tickers": ["aapl"]
        }
    ]);

    Mock::given(method("GET"))
        .and(path("/tiingo/news"))
        .and(query_param("tickers", "aapl"))
        .and(query_param("startDate", "2025-12-20"))
        .and(query_param("token", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let out = tiingo(&server).fetch("AAPL", since()).await.expect("should parse");

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].source_name, SourceName::Tiingo);
    assert_eq!(out[0].source_article_id, "555");
    assert_eq!(out[0].ticker, "AAPL");
    assert_eq!(out[0].publish_date, NaiveDate::from_ymd_opt(2025, 12, 21).unwrap());
}

#[tokio::test]
async fn finnhub_returns_parsed_articles() {
    let server = MockServer::start().await;
    let body = serde_json::json!([
        {
            "category": "company",
            "datetime": 1766325600,
            "headline": "Apple reports Q4 earnings beat",
            "id": 7312345,
            "related": "AAPL",
            "source": "Reuters",
            "url": "https://news.test/f1"
        },
        { "datetime": 0, "headline": "No timestamp", "id": 1, "url": "https://news.test/f0" }
    ]);

    Mock::given(method("GET"))
        .and(path("/api/v1/company-news"))
        .and(query_param("symbol", "AAPL"))
        .and(query_param("from", "2025-12-20"))
        .and(query_param("token", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let out = finnhub(&server).fetch("aapl", since()).await.expect("should parse");

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].source_name, SourceName::Finnhub);
    assert_eq!(out[0].headline, "Apple reports Q4 earnings beat");
    assert_eq!(out[0].publish_date, NaiveDate::from_ymd_opt(2025, 12, 21).unwrap());
}

#[tokio::test]
async fn unauthorized_maps_to_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
        .mount(&server)
        .await;

    let err = finnhub(&server).fetch("AAPL", since()).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Auth { code: 401 }));

    let err = tiingo(&server).fetch("AAPL", since()).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Auth { code: 401 }));
}

#[tokio::test]
async fn server_error_maps_to_status_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = tiingo(&server).fetch("AAPL", since()).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Status { code: 503 }));
}

#[tokio::test]
async fn non_json_body_maps_to_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let err = finnhub(&server).fetch("AAPL", since()).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Malformed(_)));
}

#[tokio::test]
async fn slow_response_maps_to_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([]))
                .set_delay(Duration::from_millis(800)),
        )
        .mount(&server)
        .await;

    let adapter = TiingoAdapter::new("k", Some(&server.uri()), Duration::from_millis(100)).unwrap();
    let err = adapter.fetch("AAPL", since()).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Timeout));
}
