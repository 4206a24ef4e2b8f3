// src/ingest/types.rs
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::dedup_key::DedupKey;

/// The fixed set of upstream feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceName {
    /// Low-volume feed with a monthly call budget.
    Tiingo,
    /// High-volume feed with a per-minute call budget.
    Finnhub,
}

impl SourceName {
    pub const ALL: [SourceName; 2] = [SourceName::Tiingo, SourceName::Finnhub];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceName::Tiingo => "tiingo",
            SourceName::Finnhub => "finnhub",
        }
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One article as returned by an upstream adapter. Ephemeral.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawArticle {
    pub headline: String,
    pub publish_date: NaiveDate,
    pub source_name: SourceName,
    /// Source-local id; not unique across feeds.
    pub source_article_id: String,
    pub url: String,
    pub crawl_timestamp: DateTime<Utc>,
    /// Ticker the article was fetched for.
    pub ticker: String,
}

impl RawArticle {
    /// A raw article is usable only with a non-blank headline.
    pub fn has_headline(&self) -> bool {
        !self.headline.trim().is_empty()
    }
}

/// Per-source provenance kept on a persisted [`Article`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceAttribution {
    pub source_article_id: String,
    pub url: String,
    pub crawl_timestamp: DateTime<Utc>,
    pub original_headline: String,
}

/// What a single raw article contributes to an existing [`Article`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sighting {
    pub source_name: SourceName,
    pub attribution: SourceAttribution,
    pub ticker: String,
}

impl Sighting {
    pub fn from_raw(raw: &RawArticle) -> Self {
        Self {
            source_name: raw.source_name,
            attribution: SourceAttribution {
                source_article_id: raw.source_article_id.clone(),
                url: raw.url.clone(),
                crawl_timestamp: raw.crawl_timestamp,
                original_headline: raw.headline.clone(),
            },
            ticker: raw.ticker.clone(),
        }
    }
}

/// The persisted unit of truth, keyed by [`DedupKey`].
///
/// `sources` and `tickers` only ever grow. An attribution entry, once present,
/// is replaced only when the same source reports a different article id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Article {
    pub dedup_key: DedupKey,
    pub normalized_headline: String,
    pub publish_date: NaiveDate,
    pub tickers: BTreeSet<String>,
    pub sources: BTreeSet<SourceName>,
    pub source_attribution: BTreeMap<SourceName, SourceAttribution>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Article {
    /// Build the record written on the first sighting of a key.
    pub fn first_sighting(
        dedup_key: DedupKey,
        normalized_headline: String,
        raw: &RawArticle,
        now: DateTime<Utc>,
    ) -> Self {
        let sighting = Sighting::from_raw(raw);
        Self {
            dedup_key,
            normalized_headline,
            publish_date: raw.publish_date,
            tickers: BTreeSet::from([sighting.ticker]),
            sources: BTreeSet::from([sighting.source_name]),
            source_attribution: BTreeMap::from([(sighting.source_name, sighting.attribution)]),
            created_at: now,
            updated_at: now,
        }
    }

    /// Fold a later sighting into this record. `updated_at` is always bumped;
    /// the return value says whether sources/attribution/tickers changed.
    pub fn merge_sighting(&mut self, sighting: &Sighting, now: DateTime<Utc>) -> bool {
        let mut changed = self.sources.insert(sighting.source_name);
        changed |= self.tickers.insert(sighting.ticker.clone());

        match self.source_attribution.get(&sighting.source_name) {
            Some(existing)
                if existing.source_article_id == sighting.attribution.source_article_id => {}
            _ => {
                self.source_attribution
                    .insert(sighting.source_name, sighting.attribution.clone());
                changed = true;
            }
        }

        self.updated_at = now;
        changed
    }
}
