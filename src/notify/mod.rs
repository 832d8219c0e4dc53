//! Output channel plumbing: alias resolution and webhook delivery.

pub mod discord;
pub mod slack;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use crate::config::ai::resolve_secret;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Discord,
    Slack,
}

/// A resolved destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub alias: String,
    pub kind: ChannelKind,
    pub endpoint: String,
}

#[async_trait]
pub trait ChannelResolver: Send + Sync {
    async fn resolve(&self, alias: &str) -> Result<Channel>;
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, channel: &Channel, message: &str) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Config entry for one webhook alias. `url` accepts the "ENV:NAME" indirection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookSpec {
    pub kind: ChannelKind,
    pub url: String,
}

/// Static alias → webhook map from config.
#[derive(Debug, Clone, Default)]
pub struct WebhookChannels {
    by_alias: BTreeMap<String, WebhookSpec>,
}

impl WebhookChannels {
    pub fn new(by_alias: BTreeMap<String, WebhookSpec>) -> Self {
        Self { by_alias }
    }
}

#[async_trait]
impl ChannelResolver for WebhookChannels {
    async fn resolve(&self, alias: &str) -> Result<Channel> {
        let spec = self
            .by_alias
            .get(alias)
            .ok_or_else(|| anyhow!("unknown channel alias '{alias}'"))?;
        let endpoint = resolve_secret(&spec.url, "POSTER_WEBHOOK_URL");
        if endpoint.is_empty() {
            return Err(anyhow!("channel '{alias}' has no webhook url"));
        }
        Ok(Channel {
            alias: alias.to_string(),
            kind: spec.kind,
            endpoint,
        })
    }
}

/// Resolves every alias to itself; pairs with [`DryRunPublisher`].
pub struct LoopbackChannels;

#[async_trait]
impl ChannelResolver for LoopbackChannels {
    async fn resolve(&self, alias: &str) -> Result<Channel> {
        Ok(Channel {
            alias: alias.to_string(),
            kind: ChannelKind::Discord,
            endpoint: String::new(),
        })
    }
}

/// Dispatches on the channel kind.
pub struct WebhookPublisher {
    discord: discord::DiscordWebhook,
    slack: slack::SlackWebhook,
}

impl WebhookPublisher {
    pub fn new(timeout_secs: u64, retries: u8) -> Self {
        Self {
            discord: discord::DiscordWebhook::new()
                .with_timeout(timeout_secs)
                .with_retries(retries),
            slack: slack::SlackWebhook::new().with_timeout(timeout_secs),
        }
    }
}

#[async_trait]
impl Publisher for WebhookPublisher {
    async fn publish(&self, channel: &Channel, message: &str) -> Result<()> {
        match channel.kind {
            ChannelKind::Discord => self.discord.send(&channel.endpoint, message).await,
            ChannelKind::Slack => self.slack.send(&channel.endpoint, message).await,
        }
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

/// Logs instead of sending and keeps what it would have sent.
/// `fail_next` makes the following publishes fail (tests).
#[derive(Default)]
pub struct DryRunPublisher {
    sent: Mutex<Vec<(String, String)>>,
    fail_next: Mutex<usize>,
}

impl DryRunPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: usize) {
        *self.fail_next.lock().unwrap_or_else(PoisonError::into_inner) = n;
    }

    /// (alias, message) pairs in send order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Publisher for DryRunPublisher {
    async fn publish(&self, channel: &Channel, message: &str) -> Result<()> {
        {
            let mut f = self.fail_next.lock().unwrap_or_else(PoisonError::into_inner);
            if *f > 0 {
                *f -= 1;
                return Err(anyhow!("dry-run publish failure"));
            }
        }
        tracing::info!(target: "poster", channel = %channel.alias, chars = message.chars().count(), "dry-run publish");
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((channel.alias.clone(), message.to_string()));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "dry-run"
    }
}
