//! # Auto Poster
//! Top-level loop: refresh → discover → post → snapshot, plus the admin operations.
//!
//! Lock order everywhere: discovery lock or posting gate first, then the state
//! mutex. Network calls made during discovery run outside the state lock; the
//! lock is held for each mutation step and for the whole post attempt.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;

use crate::assess::{AccessibilityAssessor, DisabledAssessor, LlmAssessor};
use crate::candidates::{CandidateSelector, SelectionReport};
use crate::compose::{ContentGenerator, LlmCommentGenerator, TemplateGenerator};
use crate::config::{PosterConfig, Tunables, TunablesPatch, MAX_LOOKBACK_DAYS};
use crate::gate::{self, Blocked, Delivery, PostOutcome, PostingGate, Trigger};
use crate::ingest::providers::altmetric::AltmetricEnricher;
use crate::ingest::providers::arxiv::ArxivFeed;
use crate::ingest::types::{EmptyFeed, Enricher, FeedSource, NoopEnricher};
use crate::item::{Accessibility, Item, Lifecycle};
use crate::llm::build_chat;
use crate::notify::{
    ChannelResolver, DryRunPublisher, LoopbackChannels, Publisher, WebhookChannels,
    WebhookPublisher,
};
use crate::pool::{is_refresh_due, MergeReport};
use crate::scoring::ScoringModel;
use crate::state::PosterState;
use crate::store::{JsonFileStore, MemoryStore, Snapshot, StateStore};
use crate::with_deadline;

/// External collaborators, chosen once at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub feed: Arc<dyn FeedSource>,
    pub enricher: Arc<dyn Enricher>,
    pub assessor: Arc<dyn AccessibilityAssessor>,
    pub generator: Arc<dyn ContentGenerator>,
    pub resolver: Arc<dyn ChannelResolver>,
    pub publisher: Arc<dyn Publisher>,
    pub store: Arc<dyn StateStore>,
}

impl Collaborators {
    /// No network at all: empty feed, template posts, dry-run delivery, in-memory state.
    pub fn offline() -> Self {
        Self {
            feed: Arc::new(EmptyFeed),
            enricher: Arc::new(NoopEnricher),
            assessor: Arc::new(DisabledAssessor),
            generator: Arc::new(TemplateGenerator),
            resolver: Arc::new(LoopbackChannels),
            publisher: Arc::new(DryRunPublisher::new()),
            store: Arc::new(MemoryStore::new()),
        }
    }

    pub fn from_config(cfg: &PosterConfig) -> Result<Self> {
        let feed: Arc<dyn FeedSource> = match cfg.feed.source.as_str() {
            "arxiv" => Arc::new(ArxivFeed::from_url(
                &cfg.feed.base_url,
                Duration::from_secs(cfg.feed.timeout_secs),
            )?),
            "none" => Arc::new(EmptyFeed),
            other => bail!("unknown feed source '{other}'"),
        };

        let enricher: Arc<dyn Enricher> = if cfg.altmetric.enabled {
            Arc::new(AltmetricEnricher::new(
                &cfg.altmetric.base_url,
                Duration::from_secs(cfg.altmetric.timeout_secs),
                Duration::from_millis(cfg.altmetric.delay_ms),
            )?)
        } else {
            Arc::new(NoopEnricher)
        };

        let (assessor, generator): (Arc<dyn AccessibilityAssessor>, Arc<dyn ContentGenerator>) =
            match build_chat(&cfg.ai) {
                Some(chat) => (
                    Arc::new(LlmAssessor::new(chat.clone())),
                    Arc::new(LlmCommentGenerator::new(chat)),
                ),
                None => (Arc::new(DisabledAssessor), Arc::new(TemplateGenerator)),
            };

        let (resolver, publisher): (Arc<dyn ChannelResolver>, Arc<dyn Publisher>) =
            if cfg.publish.dry_run {
                (Arc::new(LoopbackChannels), Arc::new(DryRunPublisher::new()))
            } else {
                (
                    Arc::new(WebhookChannels::new(cfg.channels.clone())),
                    Arc::new(WebhookPublisher::new(
                        cfg.publish.timeout_secs,
                        cfg.publish.retries,
                    )),
                )
            };

        Ok(Self {
            feed,
            enricher,
            assessor,
            generator,
            resolver,
            publisher,
            store: Arc::new(JsonFileStore::new(&cfg.state_path)),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiscoveryReport {
    pub refreshed: usize,
    pub fetched: usize,
    pub fresh: usize,
    pub merge: MergeReport,
    pub selection: SelectionReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub selection: SelectionReport,
    pub discovery: Option<DiscoveryReport>,
    pub post: PostOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub enabled: bool,
    pub target_channel: Option<String>,
    pub pool_size: usize,
    pub candidates: usize,
    pub blacklisted: usize,
    pub posted_total: u64,
    pub posted_today: usize,
    pub daily_quota: usize,
    pub last_posting: Option<DateTime<Utc>>,
    pub next_post_at: Option<DateTime<Utc>>,
    pub last_discovery: Option<DateTime<Utc>>,
    pub next_discovery_at: Option<DateTime<Utc>>,
    pub posting_in_progress: bool,
    pub assessor: &'static str,
    pub generator: &'static str,
    pub tunables: Tunables,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateView {
    pub id: String,
    pub title: String,
    pub url: String,
    pub published: DateTime<Utc>,
    pub popularity: Option<f64>,
    pub priority: f64,
    pub effective_priority: f64,
    pub accessibility: Accessibility,
}

pub struct AutoPoster {
    cfg: PosterConfig,
    tunables: RwLock<Tunables>,
    model: ScoringModel,
    state: Mutex<PosterState>,
    gate: PostingGate,
    discovery: Mutex<()>,
    c: Collaborators,
}

impl AutoPoster {
    pub fn new(cfg: PosterConfig, c: Collaborators, now: DateTime<Utc>) -> Self {
        let tunables = cfg.tunables.clone();
        Self {
            model: ScoringModel::new(cfg.scoring.clone()),
            state: Mutex::new(PosterState::new(tunables.pool_limits(), now)),
            tunables: RwLock::new(tunables),
            gate: PostingGate::new(),
            discovery: Mutex::new(()),
            cfg,
            c,
        }
    }

    /// Load the last snapshot, if any. Returns whether state was restored.
    pub async fn restore(&self, now: DateTime<Utc>) -> Result<bool> {
        let Some(snap) = with_deadline(self.cfg.call_timeout(), "state load", self.c.store.load()).await?
        else {
            return Ok(false);
        };
        let t = self.tunables();
        let mut restored = snap.restore(t.pool_limits(), t.max_candidates);
        restored.counters.roll_day(now);
        tracing::info!(
            target: "poster",
            pool = restored.pool.len(),
            candidates = restored.candidates.len(),
            posted_total = restored.counters.posted_total,
            "state restored"
        );
        crate::metrics::record_state(&restored);
        *self.state.lock().await = restored;
        Ok(true)
    }

    pub fn config(&self) -> &PosterConfig {
        &self.cfg
    }

    pub fn tunables(&self) -> Tunables {
        self.tunables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn posting_enabled(&self) -> bool {
        self.cfg.posting_enabled()
    }

    fn selector(&self, t: &Tunables) -> CandidateSelector {
        t.selector(self.cfg.assess_timeout())
    }

    /// Drive cycles forever. Returns at once when posting is disabled.
    pub async fn run(self: Arc<Self>) {
        if !self.posting_enabled() {
            tracing::warn!(target: "poster", "no target channel configured; auto-poster disabled");
            return;
        }
        tracing::info!(
            target: "poster",
            tick_secs = self.cfg.tick_secs,
            channel = ?self.cfg.target_channel,
            "auto-poster started"
        );
        let mut ticker = tokio::time::interval(self.cfg.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = self.run_cycle(Utc::now()).await;
            tracing::debug!(target: "poster", ?report, "cycle done");
        }
    }

    /// One tick: candidates, discovery when due, then a scheduled post.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> CycleReport {
        let selection = self.refresh_candidates(now).await;

        let due = {
            let st = self.state.lock().await;
            st.last_discovery
                .map_or(true, |t| now - t >= self.tunables().discovery_interval())
        };
        let discovery = if due {
            Some(self.discover(now).await)
        } else {
            None
        };

        let post = self.post_next(Trigger::Scheduled, false, now).await;
        CycleReport {
            selection,
            discovery,
            post,
        }
    }

    /// Re-derive candidates from the pool (runs pool cleanup first).
    pub async fn refresh_candidates(&self, now: DateTime<Utc>) -> SelectionReport {
        let selector = self.selector(&self.tunables());
        let (report, snap) = {
            let mut st = self.state.lock().await;
            let report = selector.update(&mut st, &*self.c.assessor, now).await;
            crate::metrics::record_state(&st);
            (report, Snapshot::capture(&st, now))
        };
        self.persist(snap).await;
        report
    }

    /// Re-enrich pooled items whose popularity data has gone stale.
    pub async fn refresh_stale(&self, now: DateTime<Utc>) -> usize {
        let tiers = &self.cfg.altmetric.refresh_tiers;
        let batch = self.cfg.altmetric.refresh_batch;
        let due: Vec<Item> = {
            let st = self.state.lock().await;
            let mut due: Vec<Item> = st
                .candidates
                .iter()
                .filter(|it| is_refresh_due(it, now, tiers))
                .take(batch)
                .cloned()
                .collect();
            let room = batch.saturating_sub(due.len());
            due.extend(st.pool.due_for_refresh(now, tiers, room));
            due
        };
        if due.is_empty() {
            return 0;
        }
        let n = due.len();
        let updated = match with_deadline(
            self.enrich_deadline(n),
            "enrichment refresh",
            self.c.enricher.enrich(due, now),
        )
        .await
        {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(target: "poster", error = %e, items = n, "refresh failed");
                return 0;
            }
        };
        let mut st = self.state.lock().await;
        let mut applied = st.pool.apply_refresh(&updated, now, &self.model);
        for fresh in &updated {
            if let Some(c) = st.candidates.iter_mut().find(|c| c.id == fresh.id) {
                if c.take_enrichment(fresh) {
                    self.model.rescore(c, now);
                    applied += 1;
                }
            }
        }
        tracing::debug!(target: "poster", applied, "stale enrichment refreshed");
        applied
    }

    fn enrich_deadline(&self, items: usize) -> Duration {
        self.cfg.call_timeout() * (items.max(1) as u32)
    }

    /// Full discovery pass. Failures of any external step degrade to "no data".
    pub async fn discover(&self, now: DateTime<Utc>) -> DiscoveryReport {
        let _running = self.discovery.lock().await;
        counter!("poster_discovery_runs_total").increment(1);
        let mut report = DiscoveryReport {
            refreshed: self.refresh_stale(now).await,
            ..DiscoveryReport::default()
        };

        let lookback = self.cfg.feed.lookback_days.clamp(1, MAX_LOOKBACK_DAYS);
        let since = now - chrono::Duration::days(lookback);
        let fetched = match with_deadline(
            self.cfg.call_timeout(),
            "feed fetch",
            self.c
                .feed
                .fetch(since, self.cfg.feed.fetch_limit, &self.cfg.feed.categories),
        )
        .await
        {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(target: "poster", feed = self.c.feed.name(), error = %e, "feed fetch failed");
                Vec::new()
            }
        };
        report.fetched = fetched.len();

        // Only pay for enrichment on ids we are not tracking yet.
        let fresh: Vec<Item> = {
            let st = self.state.lock().await;
            fetched
                .into_iter()
                .filter(|it| !st.pool.contains(&it.id) && !st.is_known_outside_pool(&it.id))
                .collect()
        };
        report.fresh = fresh.len();
        let mut fresh = self.enrich_new(fresh, now).await;
        for it in fresh.iter_mut() {
            self.model.rescore(it, now);
        }

        let selector = self.selector(&self.tunables());
        let snap = {
            let mut st = self.state.lock().await;
            report.merge = st.merge_discovered(fresh);
            report.selection = selector.update(&mut st, &*self.c.assessor, now).await;
            st.last_discovery = Some(now);
            crate::metrics::record_state(&st);
            Snapshot::capture(&st, now)
        };
        self.persist(snap).await;

        tracing::info!(
            target: "poster",
            fetched = report.fetched,
            added = report.merge.added,
            evicted = report.merge.evicted,
            candidates = report.selection.promoted,
            "discovery done"
        );
        report
    }

    async fn enrich_new(&self, items: Vec<Item>, now: DateTime<Utc>) -> Vec<Item> {
        if items.is_empty() {
            return items;
        }
        let n = items.len();
        match with_deadline(
            self.enrich_deadline(n),
            "enrichment",
            self.c.enricher.enrich(items.clone(), now),
        )
        .await
        {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(target: "poster", enricher = self.c.enricher.name(), error = %e, "enrichment failed; scoring without popularity");
                items
            }
        }
    }

    /// Publish the top candidate through the gate.
    pub async fn post_next(&self, trigger: Trigger, force: bool, now: DateTime<Utc>) -> PostOutcome {
        if !self.posting_enabled() {
            return PostOutcome::Blocked(Blocked::Disabled);
        }
        let t = self.tunables();
        let alias = self.cfg.target_channel.clone().unwrap_or_default();
        let delivery = Delivery {
            channel_alias: &alias,
            resolver: &*self.c.resolver,
            generator: &*self.c.generator,
            publisher: &*self.c.publisher,
            call_timeout: self.cfg.call_timeout(),
        };

        let token = self.gate.lock().await;
        let mut st = self.state.lock().await;
        let outcome = gate::attempt(&token, &mut st, &t.posting_policy(), &delivery, force, now).await;
        if outcome.is_posted() {
            counter!("poster_posted_total").increment(1);
            // backfill the slot just used
            self.selector(&t)
                .update(&mut st, &*self.c.assessor, now)
                .await;
        }
        crate::metrics::record_state(&st);
        let snap = match outcome {
            PostOutcome::Blocked(_) => None,
            _ => Some(Snapshot::capture(&st, now)),
        };
        drop(st);
        if let Some(snap) = snap {
            self.persist(snap).await;
        }
        drop(token);

        tracing::debug!(target: "poster", ?trigger, force, ?outcome, "post attempt");
        outcome
    }

    pub async fn status(&self, now: DateTime<Utc>) -> StatusReport {
        let t = self.tunables();
        let st = self.state.lock().await;
        let posted_today = if st.counters.last_reset == now.date_naive() {
            st.counters.posted_today.len()
        } else {
            0
        };
        StatusReport {
            enabled: self.posting_enabled(),
            target_channel: self.cfg.target_channel.clone(),
            pool_size: st.pool.len(),
            candidates: st.candidates.len(),
            blacklisted: st.blacklist.len(),
            posted_total: st.counters.posted_total,
            posted_today,
            daily_quota: t.daily_quota,
            last_posting: st.counters.last_posting,
            next_post_at: st
                .counters
                .last_posting
                .and_then(|l| l.checked_add_signed(t.posting_policy().min_interval)),
            last_discovery: st.last_discovery,
            next_discovery_at: st
                .last_discovery
                .and_then(|l| l.checked_add_signed(t.discovery_interval())),
            posting_in_progress: self.gate.is_busy(),
            assessor: self.c.assessor.name(),
            generator: self.c.generator.name(),
            tunables: t,
        }
    }

    pub async fn candidates(&self) -> Vec<CandidateView> {
        let selector = self.selector(&self.tunables());
        let st = self.state.lock().await;
        st.candidates
            .iter()
            .map(|it| CandidateView {
                id: it.id.clone(),
                title: it.title.clone(),
                url: it.url.clone(),
                published: it.published,
                popularity: it.popularity,
                priority: it.priority,
                effective_priority: selector.effective_priority(it),
                accessibility: it.accessibility,
            })
            .collect()
    }

    /// Top `limit` pooled items, best first.
    pub async fn pool(&self, limit: usize) -> Vec<Item> {
        let st = self.state.lock().await;
        st.pool.all().iter().take(limit).cloned().collect()
    }

    /// Where an id currently lives.
    pub async fn lifecycle(&self, id: &str) -> Lifecycle {
        self.state.lock().await.lifecycle(id)
    }

    /// Blacklist a candidate (or pooled item) and backfill. Anything else is
    /// refused with the state the id is in.
    pub async fn reject_candidate(&self, id: &str, now: DateTime<Utc>) -> Result<(), Lifecycle> {
        let selector = self.selector(&self.tunables());
        let (was, snap) = {
            let mut st = self.state.lock().await;
            let was = st.lifecycle(id);
            let was_candidate = match was {
                Lifecycle::Candidate => true,
                Lifecycle::Pooled => false,
                other => return Err(other),
            };
            st.blacklist_id(id);
            if was_candidate {
                selector.update(&mut st, &*self.c.assessor, now).await;
            }
            crate::metrics::record_state(&st);
            (was, Snapshot::capture(&st, now))
        };
        tracing::info!(target: "poster", %id, ?was, "rejected by admin");
        self.persist(snap).await;
        Ok(())
    }

    pub async fn reset_daily(&self, now: DateTime<Utc>) {
        let snap = {
            let mut st = self.state.lock().await;
            st.counters.reset_daily(now);
            crate::metrics::record_state(&st);
            Snapshot::capture(&st, now)
        };
        tracing::info!(target: "poster", "daily counters reset by admin");
        self.persist(snap).await;
    }

    /// Apply a partial tunables update and re-apply size caps right away.
    pub async fn update_tunables(&self, patch: &TunablesPatch, now: DateTime<Utc>) -> Result<Tunables> {
        let next = {
            let mut w = self.tunables.write().unwrap_or_else(PoisonError::into_inner);
            let next = w.patched(patch)?;
            *w = next.clone();
            next
        };
        let snap = {
            let mut st = self.state.lock().await;
            let mut evicted = st.pool.set_limits(next.pool_limits());
            if st.candidates.len() > next.max_candidates {
                let extra = st.candidates.split_off(next.max_candidates);
                evicted += st.pool.absorb(extra);
            }
            tracing::info!(target: "poster", evicted, tunables = ?next, "tunables updated");
            crate::metrics::record_state(&st);
            Snapshot::capture(&st, now)
        };
        self.persist(snap).await;
        Ok(next)
    }

    async fn persist(&self, snap: Snapshot) {
        if let Err(e) = with_deadline(self.cfg.call_timeout(), "state save", self.c.store.save(&snap)).await {
            counter!("poster_persist_errors_total").increment(1);
            tracing::warn!(target: "poster", error = %e, "snapshot save failed");
        }
    }
}
