// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod collision;
pub mod dedup_key;
pub mod guard;
pub mod ingest;
pub mod normalize;

// ---- Re-exports for stable public API ----
pub use crate::collision::{CollisionMetrics, CollisionTracker};
pub use crate::dedup_key::{generate_key, DedupKey};
pub use crate::guard::{CircuitBreaker, QuotaTracker};
pub use crate::ingest::fetcher::{ParallelFetcher, Upstream};
pub use crate::ingest::types::{Article, RawArticle, SourceName};
pub use crate::ingest::upsert::{CrossSourceUpserter, UpsertOutcome};
pub use crate::ingest::{Pipeline, RunReport};
pub use crate::normalize::normalize;
