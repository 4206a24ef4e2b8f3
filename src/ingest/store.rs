// src/ingest/store.rs
//! Persistent article store contract plus an in-process implementation.
//!
//! The store is the only cross-worker shared resource on the write path and it
//! is never locked by callers: correctness comes from the two atomic
//! conditional writes below.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::dedup_key::DedupKey;
use crate::ingest::types::{Article, Sighting};

#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Write `article` iff no record exists under its key. `Ok(false)` means the
    /// key was already taken.
    async fn create_if_absent(&self, article: &Article) -> Result<bool>;

    /// Atomically fold `sighting` into the record under `key`. `Ok(false)`
    /// signals a write conflict (record missing or changed underneath); the
    /// caller retries its create-or-merge sequence.
    async fn conditional_append(
        &self,
        key: &DedupKey,
        sighting: &Sighting,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    async fn get(&self, key: &DedupKey) -> Result<Option<Article>>;
}

/// `HashMap` behind a mutex; each trait call is one critical section.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<DedupKey, Article>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("store mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records, ordered by key.
    pub fn articles(&self) -> Vec<Article> {
        let g = self.inner.lock().expect("store mutex poisoned");
        let mut v: Vec<Article> = g.values().cloned().collect();
        v.sort_by(|a, b| a.dedup_key.cmp(&b.dedup_key));
        v
    }

    /// Load a JSON snapshot written by [`MemoryStore::save_snapshot`]. A missing
    /// file yields an empty store.
    pub fn load_snapshot(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading store snapshot {}", path.display()))
            }
        };
        let articles: Vec<Article> = serde_json::from_str(&content)
            .with_context(|| format!("parsing store snapshot {}", path.display()))?;
        let map = articles
            .into_iter()
            .map(|a| (a.dedup_key.clone(), a))
            .collect();
        Ok(Self {
            inner: Mutex::new(map),
        })
    }

    /// Write all records as JSON (tmp file + rename, so readers never see a
    /// half-written snapshot).
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating snapshot dir {}", dir.display()))?;
        }
        let json = serde_json::to_vec_pretty(&self.articles())?;
        let tmp: PathBuf = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("renaming to {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn create_if_absent(&self, article: &Article) -> Result<bool> {
        let mut g = self.inner.lock().expect("store mutex poisoned");
        if g.contains_key(&article.dedup_key) {
            return Ok(false);
        }
        g.insert(article.dedup_key.clone(), article.clone());
        Ok(true)
    }

    async fn conditional_append(
        &self,
        key: &DedupKey,
        sighting: &Sighting,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut g = self.inner.lock().expect("store mutex poisoned");
        match g.get_mut(key) {
            Some(article) => {
                article.merge_sighting(sighting, now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, key: &DedupKey) -> Result<Option<Article>> {
        Ok(self.inner.lock().expect("store mutex poisoned").get(key).cloned())
    }
}
