// src/ingest/upsert.rs
//! # Cross-Source Upserter
//! Turns raw articles into persisted [`Article`]s, one per dedup key.
//!
//! Sequence per article: compute the key, try `create_if_absent`; the winner
//! publishes downstream. Losers fold their source into the record with
//! `conditional_append`. A conflict on the append restarts the sequence
//! (bounded, with jittered back-off). Nothing here reads-then-writes: the
//! store's conditional writes are the only synchronization, so the result
//! does not depend on arrival order or on how many workers race on a key.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;

use crate::dedup_key::{key_from_normalized, DedupKey};
use crate::ingest::downstream::DownstreamQueue;
use crate::ingest::store::ArticleStore;
use crate::ingest::types::{Article, RawArticle, Sighting, SourceName};
use crate::normalize::normalize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpsertOutcome {
    /// First sighting of the key; the article was published downstream.
    Created,
    /// The key already existed; provenance was merged, nothing published.
    Merged,
}

#[derive(Debug, thiserror::Error)]
pub enum UpsertError {
    #[error("malformed article from {upstream}: {reason}")]
    Malformed {
        upstream: SourceName,
        reason: &'static str,
    },
    #[error("write conflict on {key} not resolved after {attempts} attempts")]
    RetriesExhausted { key: DedupKey, attempts: u32 },
    #[error("store failure on {key}: {error:#}")]
    Store { key: DedupKey, error: anyhow::Error },
    /// The record was created but the hand-off failed; it is not re-published.
    #[error("publish failed for {key}: {error:#}")]
    Publish { key: DedupKey, error: anyhow::Error },
}

fn default_max_attempts() -> u32 {
    5
}
fn default_backoff_base_ms() -> u64 {
    25
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpsertConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for UpsertConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

pub struct CrossSourceUpserter {
    store: Arc<dyn ArticleStore>,
    downstream: Arc<dyn DownstreamQueue>,
    cfg: UpsertConfig,
}

impl CrossSourceUpserter {
    pub fn new(
        store: Arc<dyn ArticleStore>,
        downstream: Arc<dyn DownstreamQueue>,
        cfg: UpsertConfig,
    ) -> Self {
        Self {
            store,
            downstream,
            cfg,
        }
    }

    pub async fn upsert(&self, raw: &RawArticle) -> Result<UpsertOutcome, UpsertError> {
        if !raw.has_headline() {
            return Err(UpsertError::Malformed {
                upstream: raw.source_name,
                reason: "missing headline",
            });
        }
        let normalized = normalize(&raw.headline);
        if normalized.is_empty() {
            return Err(UpsertError::Malformed {
                upstream: raw.source_name,
                reason: "headline has no letters or digits",
            });
        }

        let key = key_from_normalized(&normalized, raw.publish_date);
        let sighting = Sighting::from_raw(raw);
        let max_attempts = self.cfg.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let now = Utc::now();
            let article = Article::first_sighting(key.clone(), normalized.clone(), raw, now);

            let created = self
                .store
                .create_if_absent(&article)
                .await
                .map_err(|error| UpsertError::Store {
                    key: key.clone(),
                    error,
                })?;
            if created {
                self.downstream
                    .publish(&article)
                    .await
                    .map_err(|error| UpsertError::Publish {
                        key: key.clone(),
                        error,
                    })?;
                tracing::debug!(%key, upstream = %raw.source_name, ticker = %raw.ticker, "article created");
                return Ok(UpsertOutcome::Created);
            }

            let merged = self
                .store
                .conditional_append(&key, &sighting, now)
                .await
                .map_err(|error| UpsertError::Store {
                    key: key.clone(),
                    error,
                })?;
            if merged {
                tracing::debug!(%key, upstream = %raw.source_name, ticker = %raw.ticker, "article merged");
                return Ok(UpsertOutcome::Merged);
            }

            if attempt < max_attempts {
                let delay = self.backoff(attempt);
                tracing::debug!(%key, attempt, delay_ms = delay.as_millis() as u64, "write conflict, retrying");
                tokio::time::sleep(delay).await;
            }
        }

        tracing::warn!(%key, attempts = max_attempts, "write conflict retries exhausted");
        Err(UpsertError::RetriesExhausted {
            key,
            attempts: max_attempts,
        })
    }

    /// base × 2^(attempt-1), capped at 1 s, ±25 % jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        const MAX_DELAY_MS: u64 = 1_000;
        let computed = self
            .cfg
            .backoff_base_ms
            .saturating_mul(1u64 << (attempt - 1).min(10));
        let capped = computed.min(MAX_DELAY_MS);
        let jitter = rand::random::<f64>() * 0.5 + 0.75;
        Duration::from_millis((capped as f64 * jitter) as u64)
    }
}
