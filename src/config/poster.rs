// src/config/poster.rs
//! Poster configuration: one TOML document, every field optional.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::candidates::CandidateSelector;
use crate::config::ai::AiConfig;
use crate::gate::PostingPolicy;
use crate::ingest::providers::altmetric::ALTMETRIC_API_URL;
use crate::ingest::providers::arxiv::{default_categories, ARXIV_API_URL};
use crate::notify::WebhookSpec;
use crate::pool::{default_refresh_tiers, PoolLimits, RefreshTier};
use crate::scoring::ScoringWeights;
use crate::store::DEFAULT_STATE_PATH;

pub const DEFAULT_POSTER_CONFIG_PATH: &str = "config/poster.toml";
pub const ENV_POSTER_CONFIG_PATH: &str = "POSTER_CONFIG_PATH";

/// One year. Upper bound for both interval tunables.
pub const MAX_INTERVAL_MINS: i64 = 365 * 24 * 60;
pub const MAX_RETENTION_DAYS: i64 = 3650;
pub const MAX_LOOKBACK_DAYS: i64 = 365;

/// Runtime-adjustable knobs. Changed through `PATCH /admin/tunables`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tunables {
    pub max_pool_size: usize,
    pub max_candidates: usize,
    pub daily_quota: usize,
    pub posting_interval_mins: i64,
    pub discovery_interval_mins: i64,
    pub retention_days: i64,
    pub min_priority: Option<f64>,
    pub title_dup_threshold: f64,
    pub high_boost: f64,
    pub medium_boost: f64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            max_pool_size: 200,
            max_candidates: 5,
            daily_quota: 5,
            posting_interval_mins: 240,
            discovery_interval_mins: 60,
            retention_days: 14,
            min_priority: None,
            title_dup_threshold: 0.95,
            high_boost: 0.2,
            medium_boost: 0.0,
        }
    }
}

// Values that skipped validation still never overflow chrono.
fn bounded_minutes(mins: i64) -> chrono::Duration {
    chrono::Duration::minutes(mins.clamp(0, MAX_INTERVAL_MINS))
}

impl Tunables {
    pub fn validate(&self) -> Result<()> {
        if self.max_pool_size == 0 {
            bail!("max_pool_size must be at least 1");
        }
        if self.max_candidates == 0 {
            bail!("max_candidates must be at least 1");
        }
        for (name, v) in [
            ("posting_interval_mins", self.posting_interval_mins),
            ("discovery_interval_mins", self.discovery_interval_mins),
        ] {
            if !(0..=MAX_INTERVAL_MINS).contains(&v) {
                bail!("{name} must be between 0 and {MAX_INTERVAL_MINS}");
            }
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.retention_days) {
            bail!("retention_days must be between 1 and {MAX_RETENTION_DAYS}");
        }
        if self.high_boost < -1.0 || self.medium_boost < -1.0 {
            bail!("boosts must be greater than -1");
        }
        Ok(())
    }

    pub fn pool_limits(&self) -> PoolLimits {
        PoolLimits {
            max_size: self.max_pool_size,
            retention: chrono::Duration::days(self.retention_days.clamp(1, MAX_RETENTION_DAYS)),
            title_dup_threshold: self.title_dup_threshold,
            min_priority: self.min_priority,
        }
    }

    pub fn posting_policy(&self) -> PostingPolicy {
        PostingPolicy {
            daily_quota: self.daily_quota,
            min_interval: bounded_minutes(self.posting_interval_mins),
        }
    }

    pub fn discovery_interval(&self) -> chrono::Duration {
        bounded_minutes(self.discovery_interval_mins)
    }

    pub fn selector(&self, assess_timeout: std::time::Duration) -> CandidateSelector {
        CandidateSelector {
            max_candidates: self.max_candidates,
            high_boost: self.high_boost,
            medium_boost: self.medium_boost,
            assess_timeout,
        }
    }

    /// Apply a partial update. `min_priority` uses a nested option so it can be cleared.
    pub fn patched(&self, p: &TunablesPatch) -> Result<Self> {
        let mut t = self.clone();
        if let Some(v) = p.max_pool_size {
            t.max_pool_size = v;
        }
        if let Some(v) = p.max_candidates {
            t.max_candidates = v;
        }
        if let Some(v) = p.daily_quota {
            t.daily_quota = v;
        }
        if let Some(v) = p.posting_interval_mins {
            t.posting_interval_mins = v;
        }
        if let Some(v) = p.discovery_interval_mins {
            t.discovery_interval_mins = v;
        }
        if let Some(v) = p.retention_days {
            t.retention_days = v;
        }
        if let Some(v) = p.min_priority {
            t.min_priority = v;
        }
        if let Some(v) = p.title_dup_threshold {
            t.title_dup_threshold = v;
        }
        if let Some(v) = p.high_boost {
            t.high_boost = v;
        }
        if let Some(v) = p.medium_boost {
            t.medium_boost = v;
        }
        t.validate()?;
        Ok(t)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TunablesPatch {
    pub max_pool_size: Option<usize>,
    pub max_candidates: Option<usize>,
    pub daily_quota: Option<usize>,
    pub posting_interval_mins: Option<i64>,
    pub discovery_interval_mins: Option<i64>,
    pub retention_days: Option<i64>,
    #[serde(default, deserialize_with = "double_option")]
    pub min_priority: Option<Option<f64>>,
    pub title_dup_threshold: Option<f64>,
    pub high_boost: Option<f64>,
    pub medium_boost: Option<f64>,
}

// present-but-null → Some(None)
fn double_option<'de, D>(de: D) -> std::result::Result<Option<Option<f64>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<f64>::deserialize(de).map(Some)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// "arxiv" or "none".
    pub source: String,
    pub base_url: String,
    pub categories: Vec<String>,
    pub lookback_days: i64,
    pub fetch_limit: usize,
    pub timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            source: "arxiv".into(),
            base_url: ARXIV_API_URL.into(),
            categories: default_categories(),
            lookback_days: 3,
            fetch_limit: 50,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AltmetricConfig {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_secs: u64,
    /// Pause between lookups to stay under the free-tier rate limit.
    pub delay_ms: u64,
    pub refresh_tiers: Vec<RefreshTier>,
    pub refresh_batch: usize,
}

impl Default for AltmetricConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: ALTMETRIC_API_URL.into(),
            timeout_secs: 10,
            delay_ms: 1000,
            refresh_tiers: default_refresh_tiers(),
            refresh_batch: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Log messages instead of sending them.
    pub dry_run: bool,
    pub timeout_secs: u64,
    pub retries: u8,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            timeout_secs: 10,
            retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PosterConfig {
    pub enabled: bool,
    /// Alias looked up in `channels`. No target → poster disabled.
    pub target_channel: Option<String>,
    pub tick_secs: u64,
    pub call_timeout_secs: u64,
    pub assess_timeout_secs: u64,
    pub state_path: PathBuf,
    /// Optional JSON file overriding `[scoring]`.
    pub scoring_weights_path: Option<PathBuf>,

    pub tunables: Tunables,
    pub scoring: ScoringWeights,
    pub feed: FeedConfig,
    pub altmetric: AltmetricConfig,
    pub ai: AiConfig,
    pub publish: PublishConfig,
    pub channels: BTreeMap<String, WebhookSpec>,
}

impl Default for PosterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target_channel: None,
            tick_secs: 30 * 60,
            call_timeout_secs: 30,
            assess_timeout_secs: 20,
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            scoring_weights_path: None,
            tunables: Tunables::default(),
            scoring: ScoringWeights::default(),
            feed: FeedConfig::default(),
            altmetric: AltmetricConfig::default(),
            ai: AiConfig::default(),
            publish: PublishConfig::default(),
            channels: BTreeMap::new(),
        }
    }
}

impl PosterConfig {
    /// `$POSTER_CONFIG_PATH`, else `config/poster.toml`, else defaults.
    pub fn load() -> Result<Self> {
        let path = std::env::var(ENV_POSTER_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_POSTER_CONFIG_PATH));
        Self::load_from(&path)
    }

    /// Missing file → defaults. Unparseable file → error.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(s) => {
                let cfg = Self::from_toml_str(&s)
                    .with_context(|| format!("parsing {}", path.display()))?;
                tracing::info!(target: "poster", path = %path.display(), "config loaded");
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(target: "poster", path = %path.display(), "no config file; using defaults");
                Ok(Self::default().finish())
            }
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(s)?;
        cfg.tunables.validate()?;
        if !(1..=MAX_LOOKBACK_DAYS).contains(&cfg.feed.lookback_days) {
            bail!("feed.lookback_days must be between 1 and {MAX_LOOKBACK_DAYS}");
        }
        Ok(cfg.finish())
    }

    fn finish(mut self) -> Self {
        self.ai = self.ai.resolved();
        if let Some(p) = &self.scoring_weights_path {
            self.scoring = ScoringWeights::load_from_file(p);
        }
        self
    }

    pub fn tick(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn call_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.call_timeout_secs.max(1))
    }

    pub fn assess_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.assess_timeout_secs.max(1))
    }

    /// Posting is active only with a target channel.
    pub fn posting_enabled(&self) -> bool {
        self.enabled
            && self
                .target_channel
                .as_deref()
                .is_some_and(|c| !c.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ChannelKind;

    #[test]
    fn defaults_match_documented_values() {
        let c = PosterConfig::default();
        assert_eq!(c.tick_secs, 1800);
        assert_eq!(c.tunables.daily_quota, 5);
        assert_eq!(c.tunables.max_pool_size, 200);
        assert_eq!(c.feed.lookback_days, 3);
        assert!(!c.posting_enabled());
    }

    #[test]
    fn partial_toml_overrides_only_given_fields() {
        let cfg = PosterConfig::from_toml_str(
            r#"
target_channel = "papers"
tick_secs = 60

[tunables]
daily_quota = 3

[scoring]
recency_max = 10.0

[channels.papers]
kind = "discord"
url = "ENV:PAPERS_HOOK"
"#,
        )
        .unwrap();
        assert!(cfg.posting_enabled());
        assert_eq!(cfg.tick_secs, 60);
        assert_eq!(cfg.tunables.daily_quota, 3);
        assert_eq!(cfg.tunables.max_candidates, 5);
        assert_eq!(cfg.scoring.recency_max, 10.0);
        assert_eq!(cfg.channels["papers"].kind, ChannelKind::Discord);
    }

    #[test]
    fn invalid_tunables_are_rejected() {
        assert!(PosterConfig::from_toml_str("[tunables]\nmax_pool_size = 0\n").is_err());
        assert!(PosterConfig::from_toml_str("tick_secs = \"soon\"").is_err());
    }

    #[test]
    fn oversized_durations_are_rejected_not_overflowed() {
        let huge = TunablesPatch {
            posting_interval_mins: Some(i64::MAX),
            ..Default::default()
        };
        let err = Tunables::default().patched(&huge).unwrap_err();
        assert!(err.to_string().contains("posting_interval_mins"));

        assert!(PosterConfig::from_toml_str("[tunables]\nretention_days = 9223372036854775807\n").is_err());
        assert!(PosterConfig::from_toml_str("[tunables]\ndiscovery_interval_mins = 600000\n").is_err());
        assert!(PosterConfig::from_toml_str("[feed]\nlookback_days = 100000000\n").is_err());

        let edge = Tunables {
            posting_interval_mins: MAX_INTERVAL_MINS,
            retention_days: MAX_RETENTION_DAYS,
            ..Tunables::default()
        };
        edge.validate().unwrap();
        assert_eq!(edge.posting_policy().min_interval, chrono::Duration::days(365));

        // a value that bypassed validation still builds a finite duration
        let raw = Tunables {
            discovery_interval_mins: i64::MAX,
            ..Tunables::default()
        };
        assert_eq!(raw.discovery_interval(), chrono::Duration::minutes(MAX_INTERVAL_MINS));
    }

    #[test]
    fn patch_can_clear_min_priority() {
        let t = Tunables {
            min_priority: Some(5.0),
            ..Tunables::default()
        };
        let p: TunablesPatch = serde_json::from_str(r#"{"min_priority": null, "daily_quota": 1}"#).unwrap();
        let n = t.patched(&p).unwrap();
        assert_eq!(n.min_priority, None);
        assert_eq!(n.daily_quota, 1);

        let keep: TunablesPatch = serde_json::from_str("{}").unwrap();
        assert_eq!(t.patched(&keep).unwrap().min_priority, Some(5.0));
        assert!(t
            .patched(&TunablesPatch {
                max_candidates: Some(0),
                ..Default::default()
            })
            .is_err());
    }
}
