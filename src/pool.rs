//! # Retention Pool
//! Bounded, age-limited holding area for discovered-but-unpublished items.
//!
//! Kept sorted by descending priority at all times. Capacity overflow drops the
//! lowest-priority entries; that is the eviction policy, not an error.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use strsim::normalized_levenshtein;

use crate::item::Item;
use crate::scoring::ScoringModel;

#[derive(Debug, Clone, PartialEq)]
pub struct PoolLimits {
    pub max_size: usize,
    pub retention: Duration,
    /// Titles at or above this similarity are treated as the same paper.
    pub title_dup_threshold: f64,
    pub min_priority: Option<f64>,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_size: 200,
            retention: Duration::days(14),
            title_dup_threshold: 0.95,
            min_priority: None,
        }
    }
}

/// Refresh cadence for one age band. `max_age_hours: None` is the catch-all band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshTier {
    #[serde(default)]
    pub max_age_hours: Option<f64>,
    pub every_hours: f64,
}

pub fn default_refresh_tiers() -> Vec<RefreshTier> {
    vec![
        RefreshTier {
            max_age_hours: Some(24.0),
            every_hours: 2.0,
        },
        RefreshTier {
            max_age_hours: Some(72.0),
            every_hours: 6.0,
        },
        RefreshTier {
            max_age_hours: Some(168.0),
            every_hours: 24.0,
        },
        RefreshTier {
            max_age_hours: None,
            every_hours: 48.0,
        },
    ]
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub added: usize,
    pub rejected_known: usize,
    pub rejected_duplicate: usize,
    pub rejected_low: usize,
    pub evicted: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RetentionPool {
    items: Vec<Item>,
    limits: PoolLimits,
}

impl RetentionPool {
    pub fn new(limits: PoolLimits) -> Self {
        Self {
            items: Vec::new(),
            limits,
        }
    }

    /// Rebuild from persisted items. Stored priorities are kept as-is.
    pub fn from_items(limits: PoolLimits, items: Vec<Item>) -> Self {
        let mut pool = Self::new(limits);
        pool.absorb(items);
        pool
    }

    pub fn limits(&self) -> &PoolLimits {
        &self.limits
    }

    /// Swap limits and re-apply the size cap immediately. Returns evicted count.
    pub fn set_limits(&mut self, limits: PoolLimits) -> usize {
        self.limits = limits;
        self.truncate()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items in descending priority order.
    pub fn all(&self) -> &[Item] {
        &self.items
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|it| it.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Item> {
        self.items.iter_mut().find(|it| it.id == id)
    }

    pub fn remove(&mut self, id: &str) -> Option<Item> {
        let idx = self.items.iter().position(|it| it.id == id)?;
        Some(self.items.remove(idx))
    }

    /// Remove the listed ids, returning them in the order asked for.
    pub fn take(&mut self, ids: &[String]) -> Vec<Item> {
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Merge freshly scored items.
    ///
    /// `is_known` answers whether an id already lives elsewhere (posted, blacklisted,
    /// promoted). Those, in-pool ids, in-batch repeats and near-duplicate titles are
    /// rejected; the rest are appended, then the pool is re-sorted and truncated.
    pub fn merge<F>(&mut self, new_items: Vec<Item>, is_known: F) -> MergeReport
    where
        F: Fn(&str) -> bool,
    {
        self.merge_with_titles(new_items, is_known, &[])
    }

    /// [`merge`](Self::merge), also treating `known_titles` (already passed through
    /// [`title_key`]) as titles of tracked papers.
    pub fn merge_with_titles<F>(
        &mut self,
        new_items: Vec<Item>,
        is_known: F,
        known_titles: &[String],
    ) -> MergeReport
    where
        F: Fn(&str) -> bool,
    {
        let mut report = MergeReport::default();
        let mut seen: HashSet<String> = self.items.iter().map(|it| it.id.clone()).collect();
        let mut titles: Vec<String> = self.items.iter().map(|it| title_key(&it.title)).collect();
        titles.extend(known_titles.iter().cloned());

        for item in new_items {
            if seen.contains(&item.id) || is_known(&item.id) {
                report.rejected_known += 1;
                continue;
            }
            if let Some(min) = self.limits.min_priority {
                if item.priority < min {
                    report.rejected_low += 1;
                    continue;
                }
            }
            let key = title_key(&item.title);
            if titles
                .iter()
                .any(|t| titles_match(t, &key, self.limits.title_dup_threshold))
            {
                report.rejected_duplicate += 1;
                continue;
            }

            seen.insert(item.id.clone());
            titles.push(key);
            self.items.push(item);
            report.added += 1;
        }

        self.sort();
        report.evicted = self.truncate();
        report
    }

    /// Fold items back in without exclusion checks (e.g. unconsumed candidates).
    pub fn absorb(&mut self, items: Vec<Item>) -> usize {
        for item in items {
            if !self.contains(&item.id) {
                self.items.push(item);
            }
        }
        self.sort();
        self.truncate()
    }

    /// Drop items older than the retention window. Idempotent for a fixed `now`.
    pub fn cleanup(&mut self, now: DateTime<Utc>) -> usize {
        let retention = self.limits.retention;
        let before = self.items.len();
        self.items
            .retain(|it| now.signed_duration_since(it.published) <= retention);
        before - self.items.len()
    }

    /// Items whose enrichment is older than their age tier allows, best first.
    pub fn due_for_refresh(
        &self,
        now: DateTime<Utc>,
        tiers: &[RefreshTier],
        limit: usize,
    ) -> Vec<Item> {
        self.items
            .iter()
            .filter(|it| is_refresh_due(it, now, tiers))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Apply refreshed popularity data and recompute scores, then re-sort. Copies
    /// the enricher did not answer for are ignored and stay due.
    pub fn apply_refresh(
        &mut self,
        updated: &[Item],
        now: DateTime<Utc>,
        model: &ScoringModel,
    ) -> usize {
        let mut n = 0;
        for fresh in updated {
            if let Some(it) = self.get_mut(&fresh.id) {
                if it.take_enrichment(fresh) {
                    model.rescore(it, now);
                    n += 1;
                }
            }
        }
        self.sort();
        n
    }

    fn sort(&mut self) {
        // stable: ties keep arrival order
        self.items
            .sort_by(|a, b| b.priority.total_cmp(&a.priority));
    }

    fn truncate(&mut self) -> usize {
        let cap = self.limits.max_size;
        if self.items.len() <= cap {
            return 0;
        }
        let evicted = self.items.len() - cap;
        self.items.truncate(cap);
        evicted
    }
}

/// Whether an item's enrichment is older than its age tier allows. Never enriched → due.
pub fn is_refresh_due(item: &Item, now: DateTime<Utc>, tiers: &[RefreshTier]) -> bool {
    let Some(last) = item.enriched_at else {
        return true;
    };
    let age_h = item.age_hours(now);
    let tier = tiers
        .iter()
        .find(|t| t.max_age_hours.map_or(true, |max| age_h < max));
    match tier {
        Some(t) => {
            let since_h = now.signed_duration_since(last).num_seconds() as f64 / 3600.0;
            since_h >= t.every_hours
        }
        None => false,
    }
}

/// Whitespace-collapsed, lowercased title used for duplicate detection.
pub fn title_key(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn titles_match(a: &str, b: &str, threshold: f64) -> bool {
    if threshold > 1.0 || a.is_empty() || b.is_empty() {
        return false;
    }
    let (la, lb) = (a.chars().count() as f64, b.chars().count() as f64);
    // Length gap alone already bounds similarity from above.
    if 1.0 - (la - lb).abs() / la.max(lb) < threshold {
        return false;
    }
    normalized_levenshtein(a, b) >= threshold
}
