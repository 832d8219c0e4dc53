// src/ingest/mod.rs
pub mod providers;
pub mod types;

use metrics::{counter, histogram};
use once_cell::sync::OnceCell;
use regex::Regex;

/// Normalize feed text: decode entities, strip tags, unify quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace (titles and abstracts arrive hard-wrapped)
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// Cut to at most `max` chars, appending an ellipsis when something was dropped.
pub fn clip_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

/// Record one provider parse pass.
pub(crate) fn record_parse(provider: &'static str, kept: usize, skipped: usize, ms: f64) {
    histogram!("ingest_parse_ms").record(ms);
    counter!("ingest_events_total").increment(kept as u64);
    if skipped > 0 {
        counter!("ingest_malformed_total").increment(skipped as u64);
        tracing::debug!(target: "ingest", provider, skipped, "skipped malformed entries");
    }
}
