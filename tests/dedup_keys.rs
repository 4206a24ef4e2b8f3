// tests/dedup_keys.rs
use std::collections::HashSet;

use chrono::NaiveDate;
use rand::Rng;

use ticker_news_ingest::dedup_key::{generate_key, DedupKey, DEDUP_KEY_LEN};
use ticker_news_ingest::normalize::normalize;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

/// Random casing and padding that must not change the key.
fn perturb(headline: &str, rng: &mut impl Rng) -> String {
    let mut out = String::new();
    for _ in 0..rng.random_range(0..3) {
        out.push(' ');
    }
    for word in headline.split(' ') {
        let w: String = word
            .chars()
            .map(|c| {
                if rng.random_bool(0.5) {
                    c.to_ascii_uppercase()
                } else {
                    c.to_ascii_lowercase()
                }
            })
            .collect();
        out.push_str(&w);
        out.push_str(if rng.random_bool(0.3) { "  \t" } else { " " });
        if rng.random_bool(0.2) {
            out.push_str(", ");
        }
    }
    if rng.random_bool(0.5) {
        out.push_str(" - Reuters");
    }
    out
}

#[test]
fn cosmetic_variants_share_one_key() {
    let mut rng = rand::rng();
    let base = "Microsoft raises cloud guidance";
    let day = d(2025, 12, 21);
    let want = generate_key(base, day);
    for _ in 0..200 {
        let v = perturb(base, &mut rng);
        assert_eq!(generate_key(&v, day), want, "variant {v:?}");
    }
}

#[test]
fn date_is_part_of_identity() {
    let h = "Markets close higher";
    let keys: HashSet<DedupKey> = (1..=28).map(|day| generate_key(h, d(2025, 2, day))).collect();
    assert_eq!(keys.len(), 28);
}

#[test]
fn different_stories_do_not_collide() {
    let day = d(2025, 12, 21);
    let keys: HashSet<DedupKey> = (0..1000)
        .map(|i| generate_key(&format!("Company {i} files quarterly report"), day))
        .collect();
    assert_eq!(keys.len(), 1000);
}

#[test]
fn keys_are_fixed_width_lowercase_hex() {
    let k = generate_key("Oil slides as inventories build", d(2025, 12, 21));
    assert_eq!(k.as_str().len(), DEDUP_KEY_LEN);
    assert!(k
        .as_str()
        .chars()
        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    assert_eq!(k.to_string().parse::<DedupKey>().unwrap(), k);
    assert!("not-a-key".parse::<DedupKey>().is_err());
}

#[test]
fn normalize_is_idempotent_on_real_headlines() {
    for h in [
        "Apple Reports Q4 Earnings Beat - Reuters",
        "FED SIGNALS PAUSE ON RATE HIKES (Bloomberg)",
        "AT&amp;T cuts guidance; shares fall 3%",
        "Ünïcödé héadline — with dashes",
    ] {
        let once = normalize(h);
        assert_eq!(normalize(&once), once);
    }
}
