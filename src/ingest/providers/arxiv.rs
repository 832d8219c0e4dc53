// src/ingest/providers/arxiv.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use quick_xml::de::from_str;
use serde::Deserialize;
use std::time::Duration;

use crate::ingest::normalize_text;
use crate::ingest::types::FeedSource;
use crate::item::{canonical_id, Item};

pub const ARXIV_API_URL: &str = "http://export.arxiv.org/api/query";

pub fn default_categories() -> Vec<String> {
    ["cs.AI", "cs.LG", "cs.CL", "cs.CV", "cs.NE", "stat.ML"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: Option<String>,
    title: Option<String>,
    summary: Option<String>,
    published: Option<String>,
    updated: Option<String>,
    #[serde(rename = "author", default)]
    authors: Vec<Author>,
    #[serde(rename = "category", default)]
    categories: Vec<Category>,
    #[serde(rename = "link", default)]
    links: Vec<Link>,
    #[serde(rename = "arxiv:doi", alias = "doi", default)]
    doi: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Author {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Category {
    #[serde(rename = "@term")]
    term: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@title", default)]
    title: Option<String>,
}

fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| normalize_text(&v)).filter(|v| !v.is_empty())
}

/// Convert one Atom entry. Any missing required piece → `None` (entry skipped).
fn entry_to_item(e: Entry, now: DateTime<Utc>) -> Option<Item> {
    let raw_id = e.id?;
    let id = canonical_id(&raw_id)?;
    let title = non_empty(e.title)?;
    let summary = non_empty(e.summary)?;
    let published = parse_rfc3339(e.published.as_deref()?)?;
    let updated = e
        .updated
        .as_deref()
        .and_then(parse_rfc3339)
        .unwrap_or(published);

    let authors: Vec<String> = e.authors.into_iter().filter_map(|a| non_empty(a.name)).collect();
    if authors.is_empty() {
        return None;
    }
    let tags: Vec<String> = e
        .categories
        .into_iter()
        .filter_map(|c| c.term.filter(|t| !t.trim().is_empty()))
        .collect();
    if tags.is_empty() {
        return None;
    }

    // Version-pinned links point at the exact revision that was listed.
    let full_id = raw_id.trim().rsplit("/abs/").next().unwrap_or(&id).to_string();
    let pdf_url = e
        .links
        .iter()
        .find(|l| l.title.as_deref() == Some("pdf"))
        .and_then(|l| l.href.clone())
        .unwrap_or_else(|| format!("https://arxiv.org/pdf/{full_id}"));

    Some(Item {
        url: format!("https://arxiv.org/abs/{full_id}"),
        pdf_url: Some(pdf_url),
        id,
        title,
        authors,
        summary,
        tags,
        published,
        updated,
        doi: non_empty(e.doi),
        popularity: None,
        signals: None,
        enriched_at: None,
        discovered_at: now,
        priority: 0.0,
        accessibility: Default::default(),
    })
}

/// Parse an arXiv Atom response. Malformed entries are dropped silently.
pub fn parse_feed(xml: &str, now: DateTime<Utc>) -> Result<Vec<Item>> {
    let t0 = std::time::Instant::now();
    let feed: Feed = from_str(xml).context("parsing arxiv atom xml")?;
    let total = feed.entries.len();
    let out: Vec<Item> = feed
        .entries
        .into_iter()
        .filter_map(|e| entry_to_item(e, now))
        .collect();
    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    crate::ingest::record_parse("arxiv", out.len(), total - out.len(), ms);
    Ok(out)
}

pub struct ArxivFeed {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        base_url: String,
        client: reqwest::Client,
    },
}

impl ArxivFeed {
    /// Serve a canned Atom document (tests, offline runs).
    pub fn from_fixture(xml: &str) -> Self {
        Self {
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn from_url(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("paper-autoposter/0.1")
            .timeout(timeout)
            .build()
            .context("building arxiv http client")?;
        Ok(Self {
            mode: Mode::Http {
                base_url: base_url.to_string(),
                client,
            },
        })
    }

    pub fn search_query(since: DateTime<Utc>, until: DateTime<Utc>, categories: &[String]) -> String {
        let cats = if categories.is_empty() {
            default_categories()
        } else {
            categories.to_vec()
        };
        let cat_q = cats
            .iter()
            .map(|c| format!("cat:{c}"))
            .collect::<Vec<_>>()
            .join(" OR ");
        format!(
            "({cat_q}) AND submittedDate:[{}0000 TO {}2359]",
            since.format("%Y%m%d"),
            until.format("%Y%m%d")
        )
    }
}

#[async_trait]
impl FeedSource for ArxivFeed {
    async fn fetch(
        &self,
        since: DateTime<Utc>,
        limit: usize,
        categories: &[String],
    ) -> Result<Vec<Item>> {
        let now = Utc::now();
        let items = match &self.mode {
            Mode::Fixture(xml) => parse_feed(xml, now)?,
            Mode::Http { base_url, client } => {
                let query = Self::search_query(since, now, categories);
                tracing::debug!(target: "ingest", %query, limit, "querying arxiv");
                let limit_s = limit.to_string();
                let resp = client
                    .get(base_url)
                    .query(&[
                        ("search_query", query.as_str()),
                        ("start", "0"),
                        ("max_results", limit_s.as_str()),
                        ("sortBy", "submittedDate"),
                        ("sortOrder", "descending"),
                    ])
                    .send()
                    .await
                    .inspect_err(|_| counter!("ingest_provider_errors_total").increment(1))
                    .context("arxiv http get()")?
                    .error_for_status()
                    .context("arxiv non-2xx")?;
                let body = resp.text().await.context("arxiv http .text()")?;
                parse_feed(&body, now)?
            }
        };

        let mut kept: Vec<Item> = items.into_iter().filter(|it| it.published >= since).collect();
        kept.truncate(limit);
        Ok(kept)
    }

    fn name(&self) -> &'static str {
        "arxiv"
    }
}
