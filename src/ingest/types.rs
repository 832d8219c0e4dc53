// src/ingest/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::item::Item;

/// Upstream listing of newly published items.
#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    /// Items published at or after `since`, at most `limit`, restricted to `categories`
    /// (empty = source default). Malformed entries are skipped, never an error.
    async fn fetch(
        &self,
        since: DateTime<Utc>,
        limit: usize,
        categories: &[String],
    ) -> Result<Vec<Item>>;
    fn name(&self) -> &'static str;
}

/// Fills popularity fields (`popularity`, `signals`) in place and hands the items back.
///
/// Every item the source answered for, hit or confirmed miss, gets
/// `enriched_at = Some(now)`. Items whose lookup failed come back untouched.
#[async_trait::async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, items: Vec<Item>, now: DateTime<Utc>) -> Result<Vec<Item>>;
    fn name(&self) -> &'static str;
}

/// Feed that never yields anything; used when no source is configured.
pub struct EmptyFeed;

#[async_trait::async_trait]
impl FeedSource for EmptyFeed {
    async fn fetch(
        &self,
        _since: DateTime<Utc>,
        _limit: usize,
        _categories: &[String],
    ) -> Result<Vec<Item>> {
        Ok(Vec::new())
    }
    fn name(&self) -> &'static str {
        "empty"
    }
}

/// Pass-through enricher; items keep whatever popularity they already had and
/// are never marked as enriched.
pub struct NoopEnricher;

#[async_trait::async_trait]
impl Enricher for NoopEnricher {
    async fn enrich(&self, items: Vec<Item>, _now: DateTime<Utc>) -> Result<Vec<Item>> {
        Ok(items)
    }
    fn name(&self) -> &'static str {
        "noop"
    }
}
