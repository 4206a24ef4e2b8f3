// tests/upsert_concurrency.rs
use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use rand::seq::SliceRandom;

use ticker_news_ingest::ingest::downstream::ChannelQueue;
use ticker_news_ingest::ingest::store::MemoryStore;
use ticker_news_ingest::ingest::types::{RawArticle, SourceName};
use ticker_news_ingest::ingest::upsert::{CrossSourceUpserter, UpsertConfig, UpsertOutcome};

fn raw(source: SourceName, id: &str, headline: &str, ticker: &str) -> RawArticle {
    RawArticle {
        headline: headline.into(),
        publish_date: NaiveDate::from_ymd_opt(2025, 12, 21).unwrap(),
        source_name: source,
        source_article_id: id.into(),
        url: format!("https://{source}.test/{id}"),
        crawl_timestamp: Utc.with_ymd_and_hms(2025, 12, 21, 10, 0, 0).unwrap(),
        ticker: ticker.into(),
    }
}

const VARIANTS: [&str; 4] = [
    "Apple beats estimates - Reuters",
    "APPLE BEATS ESTIMATES",
    "Apple beats estimates (Bloomberg)",
    "Apple &amp; beats estimates",
];

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_upserts_on_one_key_create_exactly_once() {
    let store = Arc::new(MemoryStore::new());
    let (q, mut rx) = ChannelQueue::channel();
    let up = Arc::new(CrossSourceUpserter::new(
        store.clone(),
        Arc::new(q),
        UpsertConfig::default(),
    ));

    let mut raws: Vec<RawArticle> = (0..24)
        .map(|i| {
            let source = if i % 2 == 0 { SourceName::Tiingo } else { SourceName::Finnhub };
            let ticker = if i % 3 == 0 { "AAPL" } else { "MSFT" };
            raw(source, &format!("{source}-{i}"), VARIANTS[i % 4], ticker)
        })
        .collect();
    raws.shuffle(&mut rand::rng());

    let handles: Vec<_> = raws
        .into_iter()
        .map(|r| {
            let up = Arc::clone(&up);
            tokio::spawn(async move { up.upsert(&r).await })
        })
        .collect();

    let mut created = 0;
    let mut merged = 0;
    for h in handles {
        match h.await.unwrap().unwrap() {
            UpsertOutcome::Created => created += 1,
            UpsertOutcome::Merged => merged += 1,
        }
    }
    assert_eq!(created, 1);
    assert_eq!(merged, 23);

    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err(), "exactly one publish per key");

    let all = store.articles();
    assert_eq!(all.len(), 1);
    let art = &all[0];
    assert_eq!(art.sources.len(), 2);
    assert_eq!(art.source_attribution.len(), 2);
    assert_eq!(
        art.tickers.iter().cloned().collect::<Vec<_>>(),
        vec!["AAPL".to_string(), "MSFT".to_string()]
    );
}

#[tokio::test]
async fn final_record_does_not_depend_on_arrival_order() {
    let inputs = vec![
        raw(SourceName::Tiingo, "t-1", VARIANTS[0], "AAPL"),
        raw(SourceName::Finnhub, "f-1", VARIANTS[1], "AAPL"),
        raw(SourceName::Finnhub, "f-1", VARIANTS[2], "MSFT"),
    ];

    let mut finals = Vec::new();
    for order in [[0, 1, 2], [2, 1, 0], [1, 0, 2]] {
        let store = Arc::new(MemoryStore::new());
        let (q, _rx) = ChannelQueue::channel();
        let up = CrossSourceUpserter::new(store.clone(), Arc::new(q), UpsertConfig::default());
        for i in order {
            up.upsert(&inputs[i]).await.unwrap();
        }
        let art = store.articles().remove(0);
        finals.push((
            art.dedup_key,
            art.normalized_headline,
            art.sources,
            art.tickers,
            art.source_attribution.keys().copied().collect::<Vec<_>>(),
        ));
    }
    assert!(finals.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_stories_do_not_interfere() {
    let store = Arc::new(MemoryStore::new());
    let (q, mut rx) = ChannelQueue::channel();
    let up = Arc::new(CrossSourceUpserter::new(
        store.clone(),
        Arc::new(q),
        UpsertConfig::default(),
    ));

    let mut raws = Vec::new();
    for story in 0..10 {
        for source in SourceName::ALL {
            raws.push(raw(source, &format!("{source}-{story}"), &format!("Story number {story}"), "AAPL"));
        }
    }
    raws.shuffle(&mut rand::rng());

    let handles: Vec<_> = raws
        .into_iter()
        .map(|r| {
            let up = Arc::clone(&up);
            tokio::spawn(async move { up.upsert(&r).await })
        })
        .collect();
    for h in handles {
        h.await.unwrap().unwrap();
    }

    assert_eq!(store.len(), 10);
    let mut published = 0;
    while rx.try_recv().is_ok() {
        published += 1;
    }
    assert_eq!(published, 10);
    assert!(store.articles().iter().all(|a| a.sources.len() == 2));
}
