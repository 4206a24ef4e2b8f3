// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ingest::{Pipeline, RunReport};

/// Spawn a background task that runs the pipeline every `interval`.
/// The first run starts immediately. Each report is forwarded on `reports`
/// when given; a closed receiver does not stop the loop.
pub fn spawn_scheduler(
    pipeline: Arc<Pipeline>,
    tickers: Vec<String>,
    interval: Duration,
    reports: Option<mpsc::UnboundedSender<RunReport>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // a slow run must not trigger a burst of catch-up runs
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;

            let report = pipeline.run_once(&tickers).await;
            counter!("ingest_runs_total").increment(1);

            tracing::info!(
                target: "ingest",
                tickers = tickers.len(),
                unique = report.metrics.unique_articles_stored,
                collisions = report.metrics.collisions_detected,
                "scheduled ingest tick"
            );

            if let Some(tx) = &reports {
                let _ = tx.send(report);
            }
        }
    })
}
