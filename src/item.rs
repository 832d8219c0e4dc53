//! # Item
//! One discovered paper plus everything the poster learns about it.
//!
//! Intrinsic fields come from the feed, enrichment fields from the popularity
//! service, and `priority` / `accessibility` are derived by the poster itself.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Accessibility rating stored on an item. `Unrated` until the assessor answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Accessibility {
    #[default]
    Unrated,
    Low,
    Medium,
    High,
}

impl Accessibility {
    pub fn is_promotable(self) -> bool {
        matches!(self, Accessibility::Medium | Accessibility::High)
    }
}

/// Where an id currently lives. Derived from container membership, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Unknown,
    Pooled,
    Candidate,
    Blacklisted,
    Posted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub published: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub url: String,
    #[serde(default)]
    pub pdf_url: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,

    // enrichment
    #[serde(default)]
    pub popularity: Option<f64>,
    #[serde(default)]
    pub signals: Option<Map<String, Value>>,
    #[serde(default)]
    pub enriched_at: Option<DateTime<Utc>>,

    // derived
    pub discovered_at: DateTime<Utc>,
    #[serde(default)]
    pub priority: f64,
    #[serde(default)]
    pub accessibility: Accessibility,
}

impl Item {
    /// Minimal constructor; enrichment and derived fields start empty.
    pub fn new(id: &str, title: &str, published: DateTime<Utc>) -> Self {
        let id = canonical_id(id).unwrap_or_else(|| id.to_string());
        Self {
            url: format!("https://arxiv.org/abs/{id}"),
            pdf_url: Some(format!("https://arxiv.org/pdf/{id}")),
            id,
            title: title.to_string(),
            authors: Vec::new(),
            summary: String::new(),
            tags: Vec::new(),
            published,
            updated: published,
            doi: None,
            popularity: None,
            signals: None,
            enriched_at: None,
            discovered_at: published,
            priority: 0.0,
            accessibility: Accessibility::Unrated,
        }
    }

    /// Numeric engagement counter from the signal breakdown (0 when absent or non-numeric).
    pub fn signal(&self, key: &str) -> f64 {
        self.signals
            .as_ref()
            .and_then(|m| m.get(key))
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    /// Age relative to `now`, in fractional hours. Negative for future-dated entries.
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        now.signed_duration_since(self.published).num_seconds() as f64 / 3600.0
    }

    /// Copy popularity fields from a re-enriched copy of the same item. Only a copy
    /// whose `enriched_at` moved forward counts; returns whether anything was taken.
    pub fn take_enrichment(&mut self, fresh: &Item) -> bool {
        if fresh.enriched_at.is_none() || fresh.enriched_at <= self.enriched_at {
            return false;
        }
        self.popularity = fresh.popularity;
        self.signals = fresh.signals.clone();
        self.enriched_at = fresh.enriched_at;
        true
    }
}

static RE_VERSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"v\d+$").unwrap());

/// Normalize an arXiv identifier: strip any URL prefix and the `vN` version suffix.
///
/// `http://arxiv.org/abs/2505.20245v1` → `2505.20245`. Returns `None` for empty input.
pub fn canonical_id(raw: &str) -> Option<String> {
    let tail = raw.trim().trim_end_matches('/');
    let tail = tail
        .split_once("/abs/")
        .map(|(_, rest)| rest)
        .unwrap_or(tail);
    let id = RE_VERSION.replace(tail, "").to_string();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}
