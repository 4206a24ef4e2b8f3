// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::guard::{CircuitConfig, QuotaTracker, QuotaWindow};
use crate::ingest::fetcher::FetcherConfig;
use crate::ingest::types::SourceName;
use crate::ingest::upsert::UpsertConfig;

const ENV_PATH: &str = "INGEST_CONFIG_PATH";
const DEFAULT_PATH: &str = "config/ingest.toml";

/// Per-upstream overrides. Unset fields fall back to the upstream's
/// documented limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamSection {
    pub enabled: bool,
    pub budget: Option<u32>,
    pub window: Option<QuotaWindow>,
    pub base_url: Option<String>,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            enabled: true,
            budget: None,
            window: None,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub tickers: Vec<String>,
    pub workers: usize,
    pub request_timeout_secs: u64,
    /// Bound on one whole fan-out; unset means unbounded.
    pub run_timeout_secs: Option<u64>,
    pub lookback_days: u32,
    pub upsert_concurrency: usize,
    /// Run on a timer instead of once.
    pub interval_secs: Option<u64>,
    pub store_snapshot: PathBuf,
    pub output_path: PathBuf,
    pub metrics_textfile: Option<PathBuf>,
    pub upsert: UpsertConfig,
    pub circuit: CircuitConfig,
    pub tiingo: UpstreamSection,
    pub finnhub: UpstreamSection,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            tickers: Vec::new(),
            workers: 8,
            request_timeout_secs: 10,
            run_timeout_secs: None,
            lookback_days: 1,
            upsert_concurrency: 8,
            interval_secs: None,
            store_snapshot: PathBuf::from("data/articles.json"),
            output_path: PathBuf::from("data/unique_articles.jsonl"),
            metrics_textfile: None,
            upsert: UpsertConfig::default(),
            circuit: CircuitConfig::default(),
            tiingo: UpstreamSection::default(),
            finnhub: UpstreamSection::default(),
        }
    }
}

/// Documented limits: Tiingo free tier is monthly, Finnhub per minute.
pub fn default_quota(source: SourceName) -> (u32, QuotaWindow) {
    match source {
        SourceName::Tiingo => (500, QuotaWindow::Monthly),
        SourceName::Finnhub => (60, QuotaWindow::PerMinute),
    }
}

impl IngestConfig {
    pub fn section(&self, source: SourceName) -> &UpstreamSection {
        match source {
            SourceName::Tiingo => &self.tiingo,
            SourceName::Finnhub => &self.finnhub,
        }
    }

    pub fn quota_tracker(&self, source: SourceName) -> QuotaTracker {
        let (budget, window) = default_quota(source);
        let sec = self.section(source);
        QuotaTracker::new(
            source.as_str(),
            sec.budget.unwrap_or(budget),
            sec.window.unwrap_or(window),
        )
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            workers: self.workers,
            request_timeout: self.request_timeout(),
            run_timeout: self.run_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// API key from `TIINGO_API_KEY` / `FINNHUB_API_KEY`; blank counts as unset.
    pub fn api_key(source: SourceName) -> Option<String> {
        let var = match source {
            SourceName::Tiingo => "TIINGO_API_KEY",
            SourceName::Finnhub => "FINNHUB_API_KEY",
        };
        std::env::var(var)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }

    fn sanitize(mut self) -> Self {
        self.tickers = clean_tickers(self.tickers);
        self.workers = self.workers.max(1);
        self.upsert_concurrency = self.upsert_concurrency.max(1);
        self.upsert.max_attempts = self.upsert.max_attempts.max(1);
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = 10;
        }
        self.interval_secs = self.interval_secs.filter(|s| *s > 0);
        self
    }
}

/// Load config from an explicit TOML path.
pub fn load_config_from(path: &Path) -> Result<IngestConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading ingest config from {}", path.display()))?;
    parse_config(&content).with_context(|| format!("parsing {}", path.display()))
}

/// Load config using env var + fallbacks:
/// 1) $INGEST_CONFIG_PATH
/// 2) config/ingest.toml
/// 3) built-in defaults
pub fn load_config_default() -> Result<IngestConfig> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_config_from(&pb);
        } else {
            return Err(anyhow!("INGEST_CONFIG_PATH points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from(DEFAULT_PATH);
    if toml_p.exists() {
        return load_config_from(&toml_p);
    }
    Ok(IngestConfig::default().sanitize())
}

pub fn parse_config(s: &str) -> Result<IngestConfig> {
    let cfg: IngestConfig = toml::from_str(s)?;
    Ok(cfg.sanitize())
}

fn clean_tickers(items: Vec<String>) -> Vec<String> {
    let mut set = BTreeSet::new();
    for it in items {
        let t = it.trim();
        if !t.is_empty() {
            set.insert(t.to_ascii_uppercase());
        }
    }
    set.into_iter().collect()
}
