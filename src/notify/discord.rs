use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

/// Discord caps plain message content at 2000 characters.
const DISCORD_CONTENT_MAX: usize = 2000;

#[derive(Clone)]
pub struct DiscordWebhook {
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl Default for DiscordWebhook {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscordWebhook {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    pub async fn send(&self, webhook: &str, message: &str) -> Result<()> {
        let payload = DiscordWebhookPayload::text(message);

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(webhook)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            let err = match res {
                Ok(rsp) => match rsp.error_for_status_ref() {
                    Ok(_) => return Ok(()),
                    Err(e) => anyhow!("Discord webhook HTTP error: {e}"),
                },
                Err(e) => anyhow!("Discord webhook request failed: {e}"),
            };
            if attempt >= self.max_retries {
                return Err(err);
            }
            tracing::debug!(target: "poster", attempt, error = %err, "discord retry");
            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
        }
    }
}

#[derive(Serialize)]
struct DiscordWebhookPayload {
    content: String,
    allowed_mentions: AllowedMentions,
}

#[derive(Serialize)]
struct AllowedMentions {
    parse: Vec<String>,
}

impl DiscordWebhookPayload {
    fn text(message: &str) -> Self {
        Self {
            content: crate::ingest::clip_chars(message, DISCORD_CONTENT_MAX),
            // never ping @everyone from paper titles
            allowed_mentions: AllowedMentions { parse: Vec::new() },
        }
    }
}
