//! # Headline Normalizer
//! Reduces a raw headline to a canonical, comparable form.
//!
//! Steps, in order:
//! 1. decode HTML entities (`&amp;` → `&`), feeds deliver titles escaped
//! 2. drop trailing wire-service attribution (`" - Reuters"`, `"(Bloomberg)"`)
//! 3. lowercase
//! 4. keep only letters, digits and whitespace (Unicode-aware)
//! 5. collapse whitespace runs to one space and trim
//!
//! The function is pure and total: any input yields a (possibly empty) string,
//! and `normalize(normalize(h)) == normalize(h)` for every `h`.

use once_cell::sync::OnceCell;
use regex::Regex;

/// Wire services whose name is commonly appended to a syndicated headline.
/// Lowercase; matched case-insensitively as a whole trailing segment.
const WIRE_SERVICES: &[&str] = &[
    "reuters",
    "bloomberg",
    "ap",
    "associated press",
    "afp",
    "cnbc",
    "marketwatch",
    "dow jones",
    "business wire",
    "pr newswire",
    "globenewswire",
    "benzinga",
    "yahoo finance",
    "seeking alpha",
    "the motley fool",
    "motley fool",
    "barron's",
    "barrons",
    "wsj",
    "the wall street journal",
    "financial times",
    "ft",
    "zacks",
    "investopedia",
];

fn attribution_regex() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        let names = WIRE_SERVICES
            .iter()
            .map(|s| regex::escape(s))
            .collect::<Vec<_>>()
            .join("|");
        // "<sep> Name" or "(Name)" at the very end, optional trailing punctuation.
        let pattern = format!(
            r"(?i)(?:\s*[-\u{{2013}}\u{{2014}}|:]\s*(?:{names})|\s*\((?:{names})\))\s*[.!]*\s*$"
        );
        Regex::new(&pattern).expect("wire attribution regex compiles")
    })
}

/// Remove every trailing wire attribution segment ("... - AP - Reuters").
fn strip_wire_attribution(s: &str) -> &str {
    let re = attribution_regex();
    let mut out = s.trim_end();
    while let Some(m) = re.find(out) {
        if m.start() == 0 {
            // The whole headline is an attribution; keep it rather than emptying it.
            break;
        }
        out = out[..m.start()].trim_end();
    }
    out
}

/// Normalize a headline for cross-source comparison.
pub fn normalize(headline: &str) -> String {
    let decoded = html_escape::decode_html_entities(headline);
    let stripped = strip_wire_attribution(&decoded);

    // Lowercase before filtering: some capitals expand to a letter plus a
    // combining mark ('İ' -> "i\u{307}"), and the mark must be dropped too.
    let lowered = stripped.to_lowercase();
    let mut filtered = String::with_capacity(lowered.len());
    for ch in lowered.chars() {
        if ch.is_alphanumeric() {
            filtered.push(ch);
        } else if ch.is_whitespace() {
            filtered.push(' ');
        }
        // anything else (punctuation, symbols, combining marks) is dropped
    }

    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}
