//! # State Store
//! Point-in-time JSON snapshots of the poster state.
//!
//! Items are (de)serialized one at a time so a single bad record only costs that
//! record. Stored priorities are restored verbatim; nothing is rescored on load.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::fs;

use crate::item::Item;
use crate::pool::{PoolLimits, RetentionPool};
use crate::state::{PostCounters, PosterState};

pub const DEFAULT_STATE_PATH: &str = "state/poster_state.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub posted_total: u64,
    #[serde(default)]
    pub posted_today: Vec<String>,
    #[serde(default)]
    pub posted_all: BTreeSet<String>,
    #[serde(default)]
    pub posted_titles: VecDeque<String>,
    #[serde(default)]
    pub blacklist: BTreeSet<String>,
    #[serde(default)]
    pub pool: Vec<Value>,
    #[serde(default)]
    pub candidates: Vec<Value>,
    pub last_discovery: Option<DateTime<Utc>>,
    pub last_posting: Option<DateTime<Utc>>,
    pub last_reset: NaiveDate,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Copy the state. Items that fail to serialize are dropped and logged.
    pub fn capture(state: &PosterState, now: DateTime<Utc>) -> Self {
        Self {
            posted_total: state.counters.posted_total,
            posted_today: state.counters.posted_today.clone(),
            posted_all: state.counters.posted_all.clone(),
            posted_titles: state.counters.posted_titles.clone(),
            blacklist: state.blacklist.clone(),
            pool: encode_items(state.pool.all()),
            candidates: encode_items(&state.candidates),
            last_discovery: state.last_discovery,
            last_posting: state.counters.last_posting,
            last_reset: state.counters.last_reset,
            saved_at: Some(now),
        }
    }

    /// Rebuild live state. Unreadable items are skipped, and anything that collides
    /// with the posted set or blacklist is discarded so ids stay in one place.
    /// Candidates past `max_candidates` go back to the pool.
    pub fn restore(self, limits: PoolLimits, max_candidates: usize) -> PosterState {
        let posted = self.posted_all;
        let blacklist = self.blacklist;
        let keep = |it: &Item| !posted.contains(&it.id) && !blacklist.contains(&it.id);

        let mut candidates: Vec<Item> = Vec::new();
        for it in decode_items(self.candidates).into_iter().filter(keep) {
            if !candidates.iter().any(|c| c.id == it.id) {
                candidates.push(it);
            }
        }
        let pool_items: Vec<Item> = decode_items(self.pool)
            .into_iter()
            .filter(keep)
            .filter(|it| !candidates.iter().any(|c| c.id == it.id))
            .collect();

        let mut pool = RetentionPool::from_items(limits, pool_items);
        let overflow = candidates.split_off(max_candidates.min(candidates.len()));
        if !overflow.is_empty() {
            tracing::info!(target: "poster", moved = overflow.len(), max_candidates, "restored candidates over the cap returned to pool");
            pool.absorb(overflow);
        }

        PosterState {
            pool,
            candidates,
            blacklist,
            counters: PostCounters {
                posted_total: self.posted_total,
                posted_today: self.posted_today,
                posted_all: posted,
                posted_titles: self.posted_titles,
                last_posting: self.last_posting,
                last_reset: self.last_reset,
            },
            last_discovery: self.last_discovery,
        }
    }
}

fn encode_items(items: &[Item]) -> Vec<Value> {
    items
        .iter()
        .filter_map(|it| match serde_json::to_value(it) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(target: "poster", id = %it.id, error = %e, "dropping item from snapshot");
                None
            }
        })
        .collect()
}

fn decode_items(values: Vec<Value>) -> Vec<Item> {
    values
        .into_iter()
        .filter_map(|v| match serde_json::from_value::<Item>(v) {
            Ok(it) => Some(it),
            Err(e) => {
                tracing::warn!(target: "poster", error = %e, "skipping unreadable item in snapshot");
                None
            }
        })
        .collect()
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    async fn load(&self) -> Result<Option<Snapshot>>;
    async fn save(&self, snapshot: &Snapshot) -> Result<()>;
}

/// Single JSON document on disk, replaced atomically on every save.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self) -> Result<Option<Snapshot>> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()))
            }
        };
        match serde_json::from_str::<Snapshot>(&raw) {
            Ok(snap) => Ok(Some(snap)),
            Err(e) => {
                // Keep the unreadable file around; the next save would overwrite it.
                let aside = self.path.with_extension("json.corrupt");
                let _ = fs::rename(&self.path, &aside).await;
                Err(e).with_context(|| {
                    format!(
                        "parsing {} (moved to {})",
                        self.path.display(),
                        aside.display()
                    )
                })
            }
        }
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("creating {}", dir.display()))?;
            }
        }
        let json = serde_json::to_vec_pretty(snapshot).context("encoding snapshot")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

// --- Test helper ---
#[derive(Default)]
pub struct MemoryStore {
    pub saved: Mutex<Option<Snapshot>>,
    pub saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Option<Snapshot> {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<Option<Snapshot>> {
        Ok(self.last())
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        *self.saved.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
