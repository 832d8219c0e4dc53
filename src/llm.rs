//! Chat-completion client shared by the assessor and the comment generator:
//! provider abstraction + daily call budget.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::config::ai::AiConfig;

/// One-shot chat completion.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String>;
    fn name(&self) -> &'static str;
}

pub type DynChat = Arc<dyn ChatProvider>;

/// Build the configured provider wrapped with the daily budget, or `None`
/// when LLM features are disabled or no key is available.
pub fn build_chat(cfg: &AiConfig) -> Option<DynChat> {
    if !cfg.usable() {
        tracing::info!(target: "poster", enabled = cfg.enabled, "LLM features disabled");
        return None;
    }
    match OpenAiChat::new(cfg) {
        Ok(p) => Some(Arc::new(BudgetedChat::new(p, cfg.daily_limit))),
        Err(e) => {
            tracing::warn!(target: "poster", error = %e, "LLM client init failed; disabled");
            None
        }
    }
}

/// Short, non-reversible id for a prompt so logs never carry raw text.
pub fn prompt_fingerprint(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

// ------------------------------------------------------------
// OpenAI-compatible provider
// ------------------------------------------------------------

pub struct OpenAiChat {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiChat {
    pub fn new(cfg: &AiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("paper-autoposter/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()
            .context("building llm http client")?;
        Ok(Self {
            http,
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            endpoint: format!("{}/chat/completions", cfg.base_url.trim_end_matches('/')),
        })
    }
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}
#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
}
#[derive(Deserialize)]
struct Resp {
    choices: Vec<Choice>,
}
#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}
#[derive(Deserialize)]
struct ChoiceMsg {
    content: String,
}

#[async_trait]
impl ChatProvider for OpenAiChat {
    async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.3,
            max_tokens,
        };
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("llm request")?
            .error_for_status()
            .context("llm non-2xx")?;
        let body: Resp = resp.json().await.context("llm response json")?;
        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            bail!("llm returned an empty completion");
        }
        Ok(content)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

// ------------------------------------------------------------
// Daily budget wrapper
// ------------------------------------------------------------

#[derive(Debug, Clone)]
struct DailyCounter {
    date: NaiveDate,
    count: u32,
}

impl DailyCounter {
    fn today() -> Self {
        Self {
            date: Utc::now().date_naive(),
            count: 0,
        }
    }
}

/// Caps real provider calls per UTC day; over-budget calls fail fast.
pub struct BudgetedChat<P: ChatProvider> {
    inner: P,
    limit: u32,
    counter: Mutex<DailyCounter>,
}

impl<P: ChatProvider> BudgetedChat<P> {
    pub fn new(inner: P, limit: u32) -> Self {
        Self {
            inner,
            limit,
            counter: Mutex::new(DailyCounter::today()),
        }
    }

    fn reserve(&self) -> Result<()> {
        let mut g = self.counter.lock().unwrap_or_else(PoisonError::into_inner);
        let today = Utc::now().date_naive();
        if g.date != today {
            *g = DailyCounter::today();
        }
        if g.count >= self.limit {
            bail!("llm daily budget of {} calls exhausted", self.limit);
        }
        g.count = g.count.saturating_add(1);
        Ok(())
    }
}

#[async_trait]
impl<P: ChatProvider> ChatProvider for BudgetedChat<P> {
    async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
        self.reserve()?;
        let fp = prompt_fingerprint(user);
        tracing::debug!(target: "poster", provider = self.inner.name(), prompt = %fp, "llm call");
        self.inner.complete(system, user, max_tokens).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

// ------------------------------------------------------------
// Scripted provider for tests/local runs
// ------------------------------------------------------------

/// Replays queued replies in order, then repeats `fallback`. `None` entries fail.
pub struct MockChat {
    script: Mutex<VecDeque<Option<String>>>,
    fallback: Option<String>,
}

impl MockChat {
    pub fn fixed(reply: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(reply.to_string()),
        }
    }

    pub fn scripted(replies: Vec<Option<&str>>, fallback: Option<&str>) -> Self {
        Self {
            script: Mutex::new(replies.into_iter().map(|r| r.map(str::to_string)).collect()),
            fallback: fallback.map(str::to_string),
        }
    }
}

#[async_trait]
impl ChatProvider for MockChat {
    async fn complete(&self, _system: &str, _user: &str, _max_tokens: u32) -> Result<String> {
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        next.ok_or_else(|| anyhow!("mock chat failure"))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
