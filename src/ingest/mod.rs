// src/ingest/mod.rs
pub mod config;
pub mod downstream;
pub mod fetcher;
pub mod providers;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod upsert;

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;

use crate::collision::{CollisionMetrics, CollisionTracker};
use crate::ingest::fetcher::{FetchError, FetchOutput, PairOutcome, PairStatus, ParallelFetcher, Upstream};
use crate::ingest::upsert::{CrossSourceUpserter, UpsertError};

/// One-time metrics registration (so series show up in the exposition).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ingest_articles_fetched_total",
            "Raw articles returned by upstreams."
        );
        describe_counter!(
            "ingest_unique_articles_total",
            "Articles stored for the first time and published downstream."
        );
        describe_counter!(
            "ingest_collisions_total",
            "Raw articles merged into an already stored article."
        );
        describe_counter!(
            "ingest_rejected_total",
            "Raw articles rejected before dedup (no headline)."
        );
        describe_counter!(
            "ingest_upsert_failures_total",
            "Upserts that failed after retries or on publish."
        );
        describe_counter!(
            "ingest_fetch_skipped_total",
            "Fetch pairs skipped by quota or circuit breaker."
        );
        describe_counter!("ingest_fetch_errors_total", "Upstream fetch failures.");
        describe_counter!(
            "ingest_adapter_dropped_total",
            "Upstream items dropped by adapters (no publish date)."
        );
        describe_histogram!("ingest_fetch_ms", "Upstream request time in milliseconds.");
        describe_gauge!("ingest_collision_rate", "Collision rate of the last run.");
        describe_gauge!(
            "ingest_pipeline_last_run_ts",
            "Unix ts when ingest pipeline last ran."
        );
    });
}

/// Everything needed for one ingest run.
pub struct Pipeline {
    pub fetcher: ParallelFetcher,
    pub upstreams: Vec<Upstream>,
    pub upserter: Arc<CrossSourceUpserter>,
    /// Articles published on or after `today - lookback_days` are requested.
    pub lookback_days: u32,
    /// Concurrent upserts while draining the results queue.
    pub upsert_concurrency: usize,
}

/// Outcome of one run. A run always produces a report; degradation shows in
/// the numbers, not as an error.
#[derive(Debug)]
pub struct RunReport {
    pub metrics: CollisionMetrics,
    pub outcomes: Vec<PairOutcome>,
    pub fetch_errors: Vec<FetchError>,
    pub upsert_errors: Vec<UpsertError>,
}

impl RunReport {
    /// No pair produced data although there was work to do.
    pub fn all_upstreams_unavailable(&self) -> bool {
        !self.outcomes.is_empty()
            && !self
                .outcomes
                .iter()
                .any(|o| matches!(o.status, PairStatus::Fetched { .. }))
    }
}

impl Pipeline {
    fn since(&self) -> NaiveDate {
        let today = Utc::now().date_naive();
        today - chrono::Duration::days(i64::from(self.lookback_days))
    }

    /// Fetch all tickers from all upstreams, dedup, publish uniques.
    pub async fn run_once(&self, tickers: &[String]) -> RunReport {
        ensure_metrics_described();
        let started = Utc::now();

        let FetchOutput {
            mut results,
            mut errors,
            outcomes,
        } = self
            .fetcher
            .fetch_all(tickers, &self.upstreams, self.since())
            .await;

        let tracker = CollisionTracker::new();
        let mut raw = Vec::new();
        while let Some(a) = results.recv().await {
            tracker.record_fetched(a.source_name);
            raw.push(a);
        }

        let tracker_ref = &tracker;
        let upserter = &self.upserter;
        let upsert_errors: Vec<UpsertError> = stream::iter(raw)
            .map(|a| async move {
                match upserter.upsert(&a).await {
                    Ok(outcome) => {
                        tracker_ref.record_outcome(a.source_name, outcome);
                        None
                    }
                    Err(e @ UpsertError::Malformed { .. }) => {
                        tracker_ref.record_rejected(a.source_name);
                        tracing::warn!(ticker = %a.ticker, url = %a.url, error = %e, "raw article rejected");
                        Some(e)
                    }
                    Err(e) => {
                        tracker_ref.record_failed(a.source_name);
                        tracing::error!(ticker = %a.ticker, url = %a.url, error = %e, "upsert failed");
                        Some(e)
                    }
                }
            })
            .buffer_unordered(self.upsert_concurrency.max(1))
            .filter_map(|e| async move { e })
            .collect()
            .await;

        let mut fetch_errors = Vec::new();
        while let Some(e) = errors.recv().await {
            fetch_errors.push(e);
        }

        let metrics = tracker.report();
        let report = RunReport {
            metrics,
            outcomes,
            fetch_errors,
            upsert_errors,
        };
        log_report(&report, started);
        report
    }
}

fn log_report(report: &RunReport, started: chrono::DateTime<Utc>) {
    let m = &report.metrics;
    let rate = m.collision_rate();

    gauge!("ingest_collision_rate").set(rate);
    gauge!("ingest_pipeline_last_run_ts").set(started.timestamp().max(0) as f64);

    tracing::info!(
        target: "ingest",
        fetched = m.articles_fetched(),
        unique = m.unique_articles_stored,
        collisions = m.collisions_detected,
        rejected = m.rejected,
        failed = m.failed,
        fetch_errors = report.fetch_errors.len(),
        collision_rate = rate,
        "ingest run complete"
    );

    if report.all_upstreams_unavailable() {
        tracing::warn!(target: "ingest", pairs = report.outcomes.len(), "no upstream returned data this run");
    } else if m.articles_fetched() > 0 && !m.within_expected_band() {
        tracing::warn!(
            target: "ingest",
            collision_rate = rate,
            expected_min = crate::collision::EXPECTED_COLLISION_RATE.0,
            expected_max = crate::collision::EXPECTED_COLLISION_RATE.1,
            "collision rate outside expected band"
        );
    }
}
