use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

pub struct SlackWebhook {
    client: Client,
    timeout: Duration,
}

impl Default for SlackWebhook {
    fn default() -> Self {
        Self::new()
    }
}

impl SlackWebhook {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub async fn send(&self, url: &str, message: &str) -> Result<()> {
        let body = serde_json::json!({ "text": to_mrkdwn(message) });
        self.client
            .post(url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .context("slack post")?
            .error_for_status()
            .context("slack non-2xx")?;
        Ok(())
    }
}

/// Markdown bold/links to Slack mrkdwn.
pub fn to_mrkdwn(message: &str) -> String {
    use once_cell::sync::Lazy;
    use regex::Regex;
    static LINK: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"\[([^\]]+)\]\(([^)\s]+)\)").expect("valid link regex"));
    let bold = message.replace("**", "*");
    LINK.replace_all(&bold, "<$2|$1>").into_owned()
}
