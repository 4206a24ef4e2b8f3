//! Ticker news ingest: binary entrypoint.
//! Fetches news for the configured tickers from every enabled upstream,
//! dedups across sources and appends unique articles to the output queue.
//!
//! Usage: `ticker-news-ingest [TICKER ...]` (tickers override the config list).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ticker_news_ingest::guard::CircuitBreaker;
use ticker_news_ingest::ingest::config::{load_config_default, IngestConfig};
use ticker_news_ingest::ingest::downstream::JsonlQueue;
use ticker_news_ingest::ingest::fetcher::{ParallelFetcher, Upstream};
use ticker_news_ingest::ingest::providers::finnhub::FinnhubAdapter;
use ticker_news_ingest::ingest::providers::tiingo::TiingoAdapter;
use ticker_news_ingest::ingest::providers::UpstreamAdapter;
use ticker_news_ingest::ingest::scheduler::spawn_scheduler;
use ticker_news_ingest::ingest::store::MemoryStore;
use ticker_news_ingest::ingest::types::SourceName;
use ticker_news_ingest::ingest::upsert::CrossSourceUpserter;
use ticker_news_ingest::ingest::{Pipeline, RunReport};

/// `RUST_LOG` drives the filter; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ticker_news_ingest=info,ingest=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

fn build_adapter(
    source: SourceName,
    cfg: &IngestConfig,
    api_key: String,
) -> Result<Arc<dyn UpstreamAdapter>> {
    let base_url = cfg.section(source).base_url.as_deref();
    let timeout = cfg.request_timeout();
    let adapter: Arc<dyn UpstreamAdapter> = match source {
        SourceName::Tiingo => Arc::new(TiingoAdapter::new(api_key, base_url, timeout)?),
        SourceName::Finnhub => Arc::new(FinnhubAdapter::new(api_key, base_url, timeout)?),
    };
    Ok(adapter)
}

fn build_upstreams(cfg: &IngestConfig) -> Result<Vec<Upstream>> {
    let mut upstreams = Vec::new();
    for source in SourceName::ALL {
        if !cfg.section(source).enabled {
            tracing::info!(upstream = %source, "upstream disabled in config");
            continue;
        }
        let Some(key) = IngestConfig::api_key(source) else {
            tracing::warn!(upstream = %source, "no API key set, upstream skipped");
            continue;
        };
        upstreams.push(Upstream::new(
            build_adapter(source, cfg, key)?,
            Arc::new(cfg.quota_tracker(source)),
            Arc::new(CircuitBreaker::new(source.as_str(), cfg.circuit.clone())),
        ));
    }
    Ok(upstreams)
}

/// Write the Prometheus exposition atomically (tmp + rename).
fn write_textfile(handle: &PrometheusHandle, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, handle.render())
        .with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("renaming to {}", path.display()))?;
    Ok(())
}

fn after_run(
    report: &RunReport,
    store: &MemoryStore,
    cfg: &IngestConfig,
    prom: &PrometheusHandle,
) -> Result<()> {
    store
        .save_snapshot(&cfg.store_snapshot)
        .context("saving store snapshot")?;
    if let Some(p) = &cfg.metrics_textfile {
        write_textfile(prom, p)?;
    }
    println!("{}", serde_json::to_string(&report.metrics)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let mut cfg = load_config_default()?;
    let cli_tickers: Vec<String> = std::env::args().skip(1).collect();
    if !cli_tickers.is_empty() {
        cfg.tickers = cli_tickers
            .iter()
            .map(|t| t.trim().to_ascii_uppercase())
            .filter(|t| !t.is_empty())
            .collect();
    }
    if cfg.tickers.is_empty() {
        bail!("no tickers configured (pass them as arguments or set `tickers` in the config)");
    }

    let prom = PrometheusBuilder::new()
        .install_recorder()
        .context("installing prometheus recorder")?;

    let upstreams = build_upstreams(&cfg)?;
    if upstreams.is_empty() {
        tracing::warn!("no upstream enabled; runs will report zero articles");
    }

    let store = Arc::new(MemoryStore::load_snapshot(&cfg.store_snapshot)?);
    tracing::info!(articles = store.len(), path = %cfg.store_snapshot.display(), "store loaded");
    let queue = Arc::new(JsonlQueue::new(cfg.output_path.clone()));

    let pipeline = Arc::new(Pipeline {
        fetcher: ParallelFetcher::new(cfg.fetcher_config()),
        upstreams,
        upserter: Arc::new(CrossSourceUpserter::new(
            store.clone(),
            queue,
            cfg.upsert.clone(),
        )),
        lookback_days: cfg.lookback_days,
        upsert_concurrency: cfg.upsert_concurrency,
    });

    match cfg.interval_secs {
        None => {
            let report = pipeline.run_once(&cfg.tickers).await;
            after_run(&report, &store, &cfg, &prom)?;
        }
        Some(secs) => {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let handle = spawn_scheduler(
                pipeline,
                cfg.tickers.clone(),
                Duration::from_secs(secs),
                Some(tx),
            );
            loop {
                tokio::select! {
                    Some(report) = rx.recv() => {
                        if let Err(e) = after_run(&report, &store, &cfg, &prom) {
                            tracing::error!(error = %e, "post-run persistence failed");
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("shutdown requested");
                        handle.abort();
                        store.save_snapshot(&cfg.store_snapshot)?;
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}
