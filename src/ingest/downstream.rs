// src/ingest/downstream.rs
//! Hand-off of unique articles to the analysis stage.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};

use crate::ingest::types::Article;

/// Downstream queue. Delivery may be at-least-once; the upserter calls
/// `publish` at most once per dedup key.
#[async_trait]
pub trait DownstreamQueue: Send + Sync {
    async fn publish(&self, article: &Article) -> Result<()>;
}

/// In-process queue backed by a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    tx: mpsc::UnboundedSender<Article>,
}

impl ChannelQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Article>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl DownstreamQueue for ChannelQueue {
    async fn publish(&self, article: &Article) -> Result<()> {
        self.tx
            .send(article.clone())
            .map_err(|_| anyhow!("downstream channel closed"))
    }
}

/// Appends one JSON line per published article to a file.
#[derive(Debug)]
pub struct JsonlQueue {
    path: PathBuf,
    // serializes appends so lines never interleave
    lock: Mutex<()>,
}

impl JsonlQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DownstreamQueue for JsonlQueue {
    async fn publish(&self, article: &Article) -> Result<()> {
        let mut line = serde_json::to_vec(article)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening {}", self.path.display()))?;
        f.write_all(&line).await?;
        f.flush().await?;
        Ok(())
    }
}
