// src/ingest/providers/finnhub.rs
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use serde::Deserialize;

use super::{get_json, http_client, UpstreamAdapter, UpstreamError};
use crate::ingest::types::{RawArticle, SourceName};

pub const DEFAULT_BASE_URL: &str = "https://finnhub.io";

#[derive(Debug, Deserialize)]
struct Item {
    /// Unix seconds.
    datetime: Option<i64>,
    #[serde(default)]
    headline: String,
    id: Option<i64>,
    #[serde(default)]
    url: String,
}

/// Finnhub company-news feed (high volume, per-minute call budget).
pub struct FinnhubAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl FinnhubAdapter {
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn parse_items(ticker: &str, items: Vec<Item>, now: DateTime<Utc>) -> Vec<RawArticle> {
        items
            .into_iter()
            .filter_map(|it| {
                // datetime 0 means "unknown" in this feed
                let published = it
                    .datetime
                    .filter(|&ts| ts > 0)
                    .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0));
                let Some(published) = published else {
                    tracing::debug!(ticker, url = %it.url, "finnhub item without datetime, dropped");
                    counter!("ingest_adapter_dropped_total", "source" => "finnhub").increment(1);
                    return None;
                };
                Some(RawArticle {
                    headline: it.headline,
                    publish_date: published.date_naive(),
                    source_name: SourceName::Finnhub,
                    source_article_id: it.id.map(|id| id.to_string()).unwrap_or_default(),
                    url: it.url,
                    crawl_timestamp: now,
                    ticker: ticker.to_string(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl UpstreamAdapter for FinnhubAdapter {
    async fn fetch(&self, ticker: &str, since: NaiveDate) -> Result<Vec<RawArticle>, UpstreamError> {
        let url = format!("{}/api/v1/company-news", self.base_url);
        let now = Utc::now();
        let req = self.client.get(&url).query(&[
            ("symbol", ticker.to_ascii_uppercase()),
            ("from", since.format("%Y-%m-%d").to_string()),
            ("to", now.date_naive().format("%Y-%m-%d").to_string()),
            ("token", self.api_key.clone()),
        ]);
        let items: Vec<Item> = get_json(req).await?;
        Ok(Self::parse_items(ticker, items, now))
    }

    fn source(&self) -> SourceName {
        SourceName::Finnhub
    }
}
