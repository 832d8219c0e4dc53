// tests/common/mod.rs
//
// Shared fixtures for integration tests: an in-memory feed, a fixed-score
// enricher and a builder for an offline AutoPoster.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use paper_autoposter::assess::AccessibilityAssessor;
use paper_autoposter::config::{PosterConfig, Tunables};
use paper_autoposter::ingest::types::{Enricher, FeedSource};
use paper_autoposter::notify::DryRunPublisher;
use paper_autoposter::store::MemoryStore;
use paper_autoposter::{AutoPoster, Collaborators, Item};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap()
}

/// Paper whose title differs from its siblings in several places, so the
/// near-duplicate title check never fires between fixtures.
pub fn paper(id: &str, hours_old: i64, now: DateTime<Utc>) -> Item {
    let title = format!("{id} | study of {id} | {id}");
    let mut it = Item::new(id, &title, now - Duration::hours(hours_old));
    it.authors = vec!["Ada Lovelace".into()];
    it.summary = format!("Abstract of {id}.");
    it
}

/// Serves whatever items it currently holds.
#[derive(Default)]
pub struct StaticFeed {
    items: Mutex<Vec<Item>>,
}

impl StaticFeed {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items: Mutex::new(items),
        }
    }

    pub fn set(&self, items: Vec<Item>) {
        *self.items.lock().unwrap() = items;
    }
}

#[async_trait]
impl FeedSource for StaticFeed {
    async fn fetch(&self, since: DateTime<Utc>, limit: usize, _categories: &[String]) -> Result<Vec<Item>> {
        let items = self.items.lock().unwrap().clone();
        Ok(items
            .into_iter()
            .filter(|it| it.published >= since)
            .take(limit)
            .collect())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Assigns popularity by id; unknown ids get none. Ids listed through
/// `failing_once` come back unanswered on their first lookup only.
#[derive(Default)]
pub struct FixedEnricher {
    pub scores: HashMap<String, f64>,
    fail_once: Mutex<HashSet<String>>,
}

impl FixedEnricher {
    pub fn new(pairs: &[(&str, f64)]) -> Self {
        Self {
            scores: pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            ..Self::default()
        }
    }

    pub fn failing_once(self, ids: &[&str]) -> Self {
        *self.fail_once.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
        self
    }
}

#[async_trait]
impl Enricher for FixedEnricher {
    async fn enrich(&self, mut items: Vec<Item>, now: DateTime<Utc>) -> Result<Vec<Item>> {
        let mut fail_once = self.fail_once.lock().unwrap();
        for it in items.iter_mut() {
            if fail_once.remove(&it.id) {
                continue;
            }
            if let Some(p) = self.scores.get(&it.id) {
                it.popularity = Some(*p);
            }
            it.enriched_at = Some(now);
        }
        Ok(items)
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

pub struct Harness {
    pub poster: Arc<AutoPoster>,
    pub feed: Arc<StaticFeed>,
    pub publisher: Arc<DryRunPublisher>,
    pub store: Arc<MemoryStore>,
}

pub fn config(tunables: Tunables) -> PosterConfig {
    PosterConfig {
        target_channel: Some("papers".into()),
        tunables,
        ..PosterConfig::default()
    }
}

pub struct Build {
    pub cfg: PosterConfig,
    pub feed: Arc<StaticFeed>,
    pub enricher: Arc<dyn Enricher>,
    pub assessor: Option<Arc<dyn AccessibilityAssessor>>,
    pub store: Arc<MemoryStore>,
}

impl Build {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            cfg: config(Tunables::default()),
            feed: Arc::new(StaticFeed::new(items)),
            enricher: Arc::new(FixedEnricher::default()),
            assessor: None,
            store: Arc::new(MemoryStore::new()),
        }
    }

    pub fn tunables(mut self, t: Tunables) -> Self {
        self.cfg.tunables = t;
        self
    }

    pub fn enricher(mut self, e: impl Enricher + 'static) -> Self {
        self.enricher = Arc::new(e);
        self
    }

    pub fn assessor(mut self, a: impl AccessibilityAssessor + 'static) -> Self {
        self.assessor = Some(Arc::new(a));
        self
    }

    pub fn store(mut self, s: Arc<MemoryStore>) -> Self {
        self.store = s;
        self
    }

    pub fn finish(self, now: DateTime<Utc>) -> Harness {
        let publisher = Arc::new(DryRunPublisher::new());
        let mut c = Collaborators::offline();
        c.feed = self.feed.clone();
        c.enricher = self.enricher;
        if let Some(a) = self.assessor {
            c.assessor = a;
        }
        c.publisher = publisher.clone();
        c.store = self.store.clone();
        Harness {
            poster: Arc::new(AutoPoster::new(self.cfg, c, now)),
            feed: self.feed,
            publisher,
            store: self.store,
        }
    }
}
