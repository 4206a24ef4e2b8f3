// src/ingest/providers/mod.rs
pub mod finnhub;
pub mod tiingo;

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::guard::FailureKind;
use crate::ingest::types::{RawArticle, SourceName};

/// Why a single upstream request failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    #[error("request timed out")]
    Timeout,
    #[error("unexpected HTTP status {code}")]
    Status { code: u16 },
    #[error("upstream rejected credentials (HTTP {code})")]
    Auth { code: u16 },
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl UpstreamError {
    /// Auth/config failures are not worth retrying until configuration changes.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            UpstreamError::Auth { .. } => FailureKind::Auth,
            _ => FailureKind::Transient,
        }
    }

    /// Classify a non-2xx response.
    pub fn from_status(code: u16) -> Self {
        match code {
            401 | 403 => UpstreamError::Auth { code },
            _ => UpstreamError::Status { code },
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UpstreamError::Timeout
        } else if e.is_decode() {
            UpstreamError::Malformed(e.to_string())
        } else if let Some(status) = e.status() {
            UpstreamError::from_status(status.as_u16())
        } else {
            UpstreamError::Transport(e.to_string())
        }
    }
}

/// One external article feed. Adapters do no retrying of their own; the
/// circuit breaker and the fetcher own that policy.
#[async_trait]
pub trait UpstreamAdapter: Send + Sync {
    async fn fetch(&self, ticker: &str, since: NaiveDate) -> Result<Vec<RawArticle>, UpstreamError>;
    fn source(&self) -> SourceName;
}

/// Shared reqwest client for the HTTP adapters.
pub(crate) fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent("ticker-news-ingest/0.1")
        .connect_timeout(Duration::from_secs(4).min(timeout))
        .timeout(timeout)
        .build()?;
    Ok(client)
}

/// Send a GET and decode a JSON body, mapping failures onto [`UpstreamError`].
pub(crate) async fn get_json<T: serde::de::DeserializeOwned>(
    req: reqwest::RequestBuilder,
) -> Result<T, UpstreamError> {
    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(UpstreamError::from_status(status.as_u16()));
    }
    let body = resp.text().await?;
    serde_json::from_str(&body).map_err(|e| UpstreamError::Malformed(e.to_string()))
}
