// src/ingest/providers/tiingo.rs
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use serde::Deserialize;

use super::{get_json, http_client, UpstreamAdapter, UpstreamError};
use crate::ingest::types::{RawArticle, SourceName};

pub const DEFAULT_BASE_URL: &str = "https://api.tiingo.com";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Item {
    id: Option<serde_json::Value>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    published_date: Option<String>,
    crawl_date: Option<String>,
}

/// Tiingo news feed (low volume, monthly call budget).
pub struct TiingoAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TiingoAdapter {
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn parse_items(ticker: &str, items: Vec<Item>, now: DateTime<Utc>) -> Vec<RawArticle> {
        let mut out = Vec::with_capacity(items.len());
        for it in items {
            let Some(publish_date) = it.published_date.as_deref().and_then(parse_date) else {
                tracing::debug!(ticker, url = %it.url, "tiingo item without publish date, dropped");
                counter!("ingest_adapter_dropped_total", "source" => "tiingo").increment(1);
                continue;
            };
            let crawl_timestamp = it
                .crawl_date
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or(now);
            out.push(RawArticle {
                headline: it.title,
                publish_date,
                source_name: SourceName::Tiingo,
                source_article_id: it.id.map(id_to_string).unwrap_or_default(),
                url: it.url,
                crawl_timestamp,
                ticker: ticker.to_string(),
            });
        }
        out
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).date_naive());
    }
    // Some items carry a bare date.
    s.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
}

fn id_to_string(v: serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

#[async_trait]
impl UpstreamAdapter for TiingoAdapter {
    async fn fetch(&self, ticker: &str, since: NaiveDate) -> Result<Vec<RawArticle>, UpstreamError> {
        let url = format!("{}/tiingo/news", self.base_url);
        let req = self.client.get(&url).query(&[
            ("tickers", ticker.to_ascii_lowercase()),
            ("startDate", since.format("%Y-%m-%d").to_string()),
            ("token", self.api_key.clone()),
        ]);
        let items: Vec<Item> = get_json(req).await?;
        Ok(Self::parse_items(ticker, items, Utc::now()))
    }

    fn source(&self) -> SourceName {
        SourceName::Tiingo
    }
}
