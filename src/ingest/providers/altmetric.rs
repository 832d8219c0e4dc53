// src/ingest/providers/altmetric.rs
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use reqwest::{Client, StatusCode, Url};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::ingest::types::Enricher;
use crate::item::Item;

pub const ALTMETRIC_API_URL: &str = "https://api.altmetric.com/v1/";

/// Popularity lookup against the Altmetric v1 API (DOI first, then arXiv id).
///
/// Per-item failures are logged and leave that item's previous values in place;
/// "not found" is a real answer and resets popularity to zero.
pub struct AltmetricEnricher {
    client: Client,
    base: Url,
    delay: Duration,
}

enum Lookup {
    Found(Map<String, Value>),
    NotFound,
}

impl AltmetricEnricher {
    pub fn new(base_url: &str, timeout: Duration, delay: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent("paper-autoposter/0.1")
            .timeout(timeout)
            .build()
            .context("building altmetric http client")?;
        let base = Url::parse(base_url).context("altmetric base url")?;
        Ok(Self {
            client,
            base,
            delay,
        })
    }

    fn endpoint(&self, kind: &str, key: &str) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("altmetric base url cannot be a base"))?
            .pop_if_empty()
            .push(kind)
            .extend(key.split('/'));
        Ok(url)
    }

    async fn get(&self, url: Url) -> Result<Lookup> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("altmetric get {url}"))?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(Lookup::NotFound),
            s if s.is_success() => {
                let body: Value = resp.json().await.context("altmetric json")?;
                match body {
                    Value::Object(m) => Ok(Lookup::Found(m)),
                    _ => Err(anyhow!("altmetric returned non-object body")),
                }
            }
            s => Err(anyhow!("altmetric http {s}")),
        }
    }

    async fn lookup(&self, item: &Item) -> Result<Lookup> {
        if let Some(doi) = item.doi.as_deref() {
            if let Lookup::Found(m) = self.get(self.endpoint("doi", doi)?).await? {
                return Ok(Lookup::Found(m));
            }
        }
        self.get(self.endpoint("arxiv", &item.id)?).await
    }
}

/// Keep only the numeric counters; the full record carries large nested blobs.
pub fn numeric_signals(raw: &Map<String, Value>) -> Map<String, Value> {
    raw.iter()
        .filter(|(_, v)| v.is_number())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Apply one Altmetric record to an item.
pub fn apply_record(item: &mut Item, record: &Map<String, Value>) {
    item.popularity = Some(record.get("score").and_then(Value::as_f64).unwrap_or(0.0));
    item.signals = Some(numeric_signals(record));
}

#[async_trait]
impl Enricher for AltmetricEnricher {
    async fn enrich(&self, mut items: Vec<Item>, now: DateTime<Utc>) -> Result<Vec<Item>> {
        let n = items.len();
        for (i, item) in items.iter_mut().enumerate() {
            match self.lookup(item).await {
                Ok(Lookup::Found(record)) => {
                    apply_record(item, &record);
                    item.enriched_at = Some(now);
                    tracing::debug!(target: "ingest", id = %item.id, score = ?item.popularity, "altmetric hit");
                }
                Ok(Lookup::NotFound) => {
                    item.popularity = Some(0.0);
                    item.signals = None;
                    item.enriched_at = Some(now);
                }
                // left unstamped so the next refresh retries it
                Err(e) => {
                    counter!("enrich_errors_total").increment(1);
                    tracing::warn!(target: "ingest", id = %item.id, error = %e, "altmetric lookup failed");
                }
            }
            if i + 1 < n && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }
        Ok(items)
    }

    fn name(&self) -> &'static str {
        "altmetric"
    }
}
