//! # Collision Metrics
//! Per-run counters of fetched, unique and collided articles.
//!
//! Counters are plain atomics so fetch and upsert workers can record without
//! locking; every increment is mirrored to the `metrics` facade for scraping.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use serde::Serialize;

use crate::ingest::types::SourceName;
use crate::ingest::upsert::UpsertOutcome;

/// Expected share of fetched articles that collide with an existing record.
/// A tuning target based on feed overlap, not a correctness bound.
pub const EXPECTED_COLLISION_RATE: (f64, f64) = (0.15, 0.25);

/// Finished report for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollisionMetrics {
    pub articles_fetched_by_source: BTreeMap<SourceName, u64>,
    pub unique_articles_stored: u64,
    pub collisions_detected: u64,
    /// Raw articles rejected before dedup (e.g. blank headline).
    pub rejected: u64,
    /// Upserts that failed (store error, exhausted retries, publish failure).
    pub failed: u64,
}

impl CollisionMetrics {
    pub fn articles_fetched(&self) -> u64 {
        self.articles_fetched_by_source.values().sum()
    }

    /// collisions / fetched; 0.0 for an empty run.
    pub fn collision_rate(&self) -> f64 {
        let fetched = self.articles_fetched();
        if fetched == 0 {
            0.0
        } else {
            self.collisions_detected as f64 / fetched as f64
        }
    }

    pub fn within_expected_band(&self) -> bool {
        let rate = self.collision_rate();
        (EXPECTED_COLLISION_RATE.0..=EXPECTED_COLLISION_RATE.1).contains(&rate)
    }
}

#[derive(Debug, Default)]
pub struct CollisionTracker {
    fetched_tiingo: AtomicU64,
    fetched_finnhub: AtomicU64,
    unique: AtomicU64,
    collisions: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

impl CollisionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn fetched_slot(&self, source: SourceName) -> &AtomicU64 {
        match source {
            SourceName::Tiingo => &self.fetched_tiingo,
            SourceName::Finnhub => &self.fetched_finnhub,
        }
    }

    pub fn record_fetched(&self, source: SourceName) {
        self.fetched_slot(source).fetch_add(1, Ordering::Relaxed);
        counter!("ingest_articles_fetched_total", "source" => source.as_str()).increment(1);
    }

    pub fn record_outcome(&self, source: SourceName, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created => {
                self.unique.fetch_add(1, Ordering::Relaxed);
                counter!("ingest_unique_articles_total", "source" => source.as_str()).increment(1);
            }
            UpsertOutcome::Merged => {
                self.collisions.fetch_add(1, Ordering::Relaxed);
                counter!("ingest_collisions_total", "source" => source.as_str()).increment(1);
            }
        }
    }

    pub fn record_rejected(&self, source: SourceName) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        counter!("ingest_rejected_total", "source" => source.as_str()).increment(1);
    }

    pub fn record_failed(&self, source: SourceName) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        counter!("ingest_upsert_failures_total", "source" => source.as_str()).increment(1);
    }

    pub fn report(&self) -> CollisionMetrics {
        let articles_fetched_by_source = SourceName::ALL
            .iter()
            .map(|&s| (s, self.fetched_slot(s).load(Ordering::Relaxed)))
            .collect();
        CollisionMetrics {
            articles_fetched_by_source,
            unique_articles_stored: self.unique.load(Ordering::Relaxed),
            collisions_detected: self.collisions.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
