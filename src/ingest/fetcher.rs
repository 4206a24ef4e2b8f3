// src/ingest/fetcher.rs
//! # Parallel Fetcher
//! Fans out one task per (ticker, upstream) pair over a fixed number of
//! workers and fans the results back in.
//!
//! Each task asks the upstream's circuit breaker, then its quota tracker, for
//! permission (neither lock is held across the network call). A denied task is
//! recorded as skipped, not as an error. A failing or panicking request only
//! affects its own pair. `fetch_all` returns once every pair has an outcome.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::guard::{CircuitBreaker, FailureKind, QuotaTracker};
use crate::ingest::providers::{UpstreamAdapter, UpstreamError};
use crate::ingest::types::{RawArticle, SourceName};

/// An upstream feed together with its own call gates.
#[derive(Clone)]
pub struct Upstream {
    pub adapter: Arc<dyn UpstreamAdapter>,
    pub quota: Arc<QuotaTracker>,
    pub breaker: Arc<CircuitBreaker>,
}

impl Upstream {
    pub fn new(
        adapter: Arc<dyn UpstreamAdapter>,
        quota: Arc<QuotaTracker>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            adapter,
            quota,
            breaker,
        }
    }

    pub fn source(&self) -> SourceName {
        self.adapter.source()
    }
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Concurrent fetch tasks, independent of ticker count.
    pub workers: usize,
    pub request_timeout: Duration,
    /// Bound on the whole fan-out; pairs not started by then are aborted.
    pub run_timeout: Option<Duration>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            request_timeout: Duration::from_secs(10),
            run_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    QuotaExhausted,
    CircuitOpen,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::QuotaExhausted => "quota_exhausted",
            SkipReason::CircuitOpen => "circuit_open",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairStatus {
    Fetched { articles: usize },
    Skipped(SkipReason),
    Failed,
    /// Not started before the run deadline.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairOutcome {
    pub ticker: String,
    pub upstream: SourceName,
    pub status: PairStatus,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchFailure {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("fetch task panicked")]
    Panicked,
}

impl FetchFailure {
    fn failure_kind(&self) -> FailureKind {
        match self {
            FetchFailure::Upstream(e) => e.failure_kind(),
            FetchFailure::Panicked => FailureKind::Transient,
        }
    }
}

/// Structured error for one failed (ticker, upstream) pair.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{upstream} fetch for {ticker} failed: {failure}")]
pub struct FetchError {
    pub ticker: String,
    pub upstream: SourceName,
    pub failure: FetchFailure,
}

/// Everything a fan-out produced. Both queues are complete when returned.
pub struct FetchOutput {
    pub results: mpsc::UnboundedReceiver<RawArticle>,
    pub errors: mpsc::UnboundedReceiver<FetchError>,
    pub outcomes: Vec<PairOutcome>,
}

impl FetchOutput {
    pub fn count(&self, upstream: SourceName, pred: impl Fn(&PairStatus) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.upstream == upstream && pred(&o.status))
            .count()
    }
}

pub struct ParallelFetcher {
    cfg: FetcherConfig,
}

impl ParallelFetcher {
    pub fn new(cfg: FetcherConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.cfg
    }

    /// Fetch every (ticker, upstream) pair published since `since`.
    pub async fn fetch_all(
        &self,
        tickers: &[String],
        upstreams: &[Upstream],
        since: NaiveDate,
    ) -> FetchOutput {
        let (results_tx, results) = mpsc::unbounded_channel();
        let (errors_tx, errors) = mpsc::unbounded_channel();
        let deadline = self.cfg.run_timeout.map(|d| Instant::now() + d);
        let workers = self.cfg.workers.max(1);
        let request_timeout = self.cfg.request_timeout;

        let pairs: Vec<(String, Upstream)> = tickers
            .iter()
            .flat_map(|t| upstreams.iter().map(move |u| (t.clone(), u.clone())))
            .collect();
        let pair_count = pairs.len();

        let outcomes: Vec<PairOutcome> = stream::iter(pairs)
            .map(|(ticker, upstream)| {
                let results_tx = results_tx.clone();
                let errors_tx = errors_tx.clone();
                async move {
                    let source = upstream.source();
                    let status = if deadline.is_some_and(|d| Instant::now() >= d) {
                        tracing::warn!(%ticker, upstream = %source, "run deadline passed, pair not started");
                        PairStatus::Aborted
                    } else {
                        run_pair(&upstream, &ticker, since, request_timeout, &results_tx, &errors_tx)
                            .await
                    };
                    PairOutcome {
                        ticker,
                        upstream: source,
                        status,
                    }
                }
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        tracing::info!(pairs = pair_count, workers, "fetch fan-out complete");
        FetchOutput {
            results,
            errors,
            outcomes,
        }
    }
}

async fn run_pair(
    upstream: &Upstream,
    ticker: &str,
    since: NaiveDate,
    request_timeout: Duration,
    results_tx: &mpsc::UnboundedSender<RawArticle>,
    errors_tx: &mpsc::UnboundedSender<FetchError>,
) -> PairStatus {
    let source = upstream.source();
    let now = Utc::now();

    let Some(admission) = upstream.breaker.admit_at(now) else {
        return skipped(ticker, source, SkipReason::CircuitOpen);
    };
    if !upstream.quota.try_acquire_at(now) {
        upstream.breaker.cancel(admission);
        return skipped(ticker, source, SkipReason::QuotaExhausted);
    }

    let t0 = std::time::Instant::now();
    let adapter = Arc::clone(&upstream.adapter);
    let owned_ticker = ticker.to_string();
    // Own task so a panicking adapter cannot take the fan-out down with it.
    let handle = tokio::spawn(async move {
        tokio::time::timeout(request_timeout, adapter.fetch(&owned_ticker, since)).await
    });
    let result: Result<Vec<RawArticle>, FetchFailure> = match handle.await {
        Ok(Ok(res)) => res.map_err(FetchFailure::from),
        Ok(Err(_elapsed)) => Err(UpstreamError::Timeout.into()),
        Err(_join) => Err(FetchFailure::Panicked),
    };
    histogram!("ingest_fetch_ms", "upstream" => source.as_str())
        .record(t0.elapsed().as_secs_f64() * 1_000.0);

    match result {
        Ok(articles) => {
            upstream.quota.record_call();
            upstream.breaker.record_success(admission);
            let n = articles.len();
            for a in articles {
                // receiver lives until fetch_all returns
                let _ = results_tx.send(a);
            }
            tracing::debug!(ticker, upstream = %source, articles = n, "fetched");
            PairStatus::Fetched { articles: n }
        }
        Err(failure) => {
            upstream.breaker.record_failure_kind(admission, failure.failure_kind());
            counter!("ingest_fetch_errors_total", "upstream" => source.as_str()).increment(1);
            tracing::warn!(ticker, upstream = %source, error = %failure, "fetch failed");
            let _ = errors_tx.send(FetchError {
                ticker: ticker.to_string(),
                upstream: source,
                failure,
            });
            PairStatus::Failed
        }
    }
}

fn skipped(ticker: &str, source: SourceName, reason: SkipReason) -> PairStatus {
    counter!(
        "ingest_fetch_skipped_total",
        "upstream" => source.as_str(),
        "reason" => reason.as_str()
    )
    .increment(1);
    tracing::info!(ticker, upstream = %source, reason = reason.as_str(), "fetch skipped");
    PairStatus::Skipped(reason)
}
