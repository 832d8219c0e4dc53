//! # Scoring
//! Pure priority function for pooled items.
//!
//! priority = popularity base + threshold bonus + recency + category + engagement
//!
//! - base: `(p + 1)²` when popularity `p > 0`, otherwise 0
//! - threshold bonus: flat boost once `p` crosses the high / very-high marks
//! - recency: linear decay over the freshness window, negative past it (floored)
//! - category: first hit in a ranked table, never cumulative
//! - engagement: per-signal `count × weight`, each capped on its own
//!
//! Weights are tunable; load them from the `[scoring]` config table or a JSON file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::item::Item;

/// One engagement signal taken from the enrichment breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementWeight {
    pub key: String,
    pub per_count: f64,
    pub cap: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub high_threshold: f64,
    pub high_bonus: f64,
    pub very_high_threshold: f64,
    pub very_high_bonus: f64,
    pub recency_max: f64,
    pub freshness_hours: f64,
    /// Ranked table; order matters, first match wins.
    pub categories: Vec<(String, f64)>,
    pub engagement: Vec<EngagementWeight>,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            high_threshold: 5.0,
            high_bonus: 50.0,
            very_high_threshold: 10.0,
            very_high_bonus: 100.0,
            recency_max: 25.0,
            freshness_hours: 48.0,
            categories: vec![
                ("cs.AI".into(), 15.0),
                ("cs.LG".into(), 12.0),
                ("cs.CL".into(), 10.0),
                ("cs.CV".into(), 10.0),
                ("cs.NE".into(), 8.0),
            ],
            engagement: vec![
                EngagementWeight {
                    key: "cited_by_tweeters_count".into(),
                    per_count: 1.5,
                    cap: 20.0,
                },
                EngagementWeight {
                    key: "cited_by_rdts_count".into(),
                    per_count: 3.0,
                    cap: 15.0,
                },
                EngagementWeight {
                    key: "cited_by_feeds_count".into(),
                    per_count: 6.0,
                    cap: 30.0,
                },
            ],
        }
    }
}

impl ScoringWeights {
    /// Load weights from a JSON file. Falls back to defaults on any error.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(path) {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                tracing::warn!(target: "poster", error = %e, "invalid scoring weights, using defaults");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }
}

/// Stateless scorer; cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ScoringModel {
    weights: ScoringWeights,
}

impl ScoringModel {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Score an item as of `now`. Same inputs → same output; nothing is accumulated.
    pub fn score(&self, item: &Item, now: DateTime<Utc>) -> f64 {
        self.popularity_term(item.popularity)
            + self.recency_term(item.age_hours(now))
            + self.category_term(&item.tags)
            + self.engagement_term(item)
    }

    /// Score and store the result on the item.
    pub fn rescore(&self, item: &mut Item, now: DateTime<Utc>) {
        item.priority = self.score(item, now);
    }

    fn popularity_term(&self, popularity: Option<f64>) -> f64 {
        let w = &self.weights;
        let p = match popularity {
            Some(p) if p > 0.0 => p,
            _ => return 0.0,
        };
        let mut s = (p + 1.0).powi(2);
        if p >= w.very_high_threshold {
            s += w.very_high_bonus;
        } else if p >= w.high_threshold {
            s += w.high_bonus;
        }
        s
    }

    fn recency_term(&self, age_hours: f64) -> f64 {
        let w = &self.weights;
        if w.freshness_hours <= 0.0 {
            return 0.0;
        }
        // Future-dated entries count as brand new.
        let age = age_hours.max(0.0);
        let raw = w.recency_max * (1.0 - age / w.freshness_hours);
        raw.max(-w.recency_max)
    }

    fn category_term(&self, tags: &[String]) -> f64 {
        self.weights
            .categories
            .iter()
            .find(|(cat, _)| tags.iter().any(|t| t == cat))
            .map(|(_, bonus)| *bonus)
            .unwrap_or(0.0)
    }

    fn engagement_term(&self, item: &Item) -> f64 {
        self.weights
            .engagement
            .iter()
            .map(|e| {
                let n = item.signal(&e.key);
                if n > 0.0 {
                    (n * e.per_count).min(e.cap)
                } else {
                    0.0
                }
            })
            .sum()
    }
}
