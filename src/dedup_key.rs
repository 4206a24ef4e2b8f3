//! # Dedup Key
//! Content-derived identity of an article: SHA-256 over
//! `normalize(headline) + "|" + YYYY-MM-DD`, truncated to 32 hex chars.
//!
//! Source-provided ids are never part of the key, so the same story reported by
//! two feeds collapses to one key while the same headline on another day does not.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ingest::types::RawArticle;
use crate::normalize::normalize;

/// Length of the stored key in hex characters (16 bytes of the digest).
pub const DEDUP_KEY_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DedupKey(String);

impl DedupKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key for a raw article as delivered by an upstream.
    pub fn for_article(article: &RawArticle) -> Self {
        generate_key(&article.headline, article.publish_date)
    }
}

/// Derive the dedup key for a headline published on `publish_date`.
pub fn generate_key(headline: &str, publish_date: NaiveDate) -> DedupKey {
    key_from_normalized(&normalize(headline), publish_date)
}

/// Same as [`generate_key`] for a headline that is already normalized.
pub fn key_from_normalized(normalized: &str, publish_date: NaiveDate) -> DedupKey {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update(b"|");
    hasher.update(publish_date.format("%Y-%m-%d").to_string().as_bytes());
    let digest = hasher.finalize();

    let mut out = String::with_capacity(DEDUP_KEY_LEN);
    for b in digest.iter().take(DEDUP_KEY_LEN / 2) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    DedupKey(out)
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid dedup key {0:?}: expected {DEDUP_KEY_LEN} lowercase hex chars")]
pub struct InvalidDedupKey(pub String);

impl FromStr for DedupKey {
    type Err = InvalidDedupKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ok = s.len() == DEDUP_KEY_LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if ok {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidDedupKey(s.to_string()))
        }
    }
}

impl TryFrom<String> for DedupKey {
    type Error = InvalidDedupKey;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DedupKey> for String {
    fn from(k: DedupKey) -> Self {
        k.0
    }
}
