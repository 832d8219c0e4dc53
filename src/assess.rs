//! Accessibility rating: can a general technical audience follow this paper?

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use crate::ingest::clip_chars;
use crate::item::{Accessibility, Item};
use crate::llm::DynChat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assessment {
    Low,
    Medium,
    High,
    /// The assessor answered but the answer could not be classified.
    Unknown,
}

impl Assessment {
    pub fn as_accessibility(self) -> Option<Accessibility> {
        match self {
            Assessment::Low => Some(Accessibility::Low),
            Assessment::Medium => Some(Accessibility::Medium),
            Assessment::High => Some(Accessibility::High),
            Assessment::Unknown => None,
        }
    }
}

#[async_trait]
pub trait AccessibilityAssessor: Send + Sync {
    async fn assess(&self, item: &Item) -> Result<Assessment>;

    /// A disabled assessor is never called; unrated items count as medium.
    fn enabled(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str;
}

/// Used when no LLM is configured.
pub struct DisabledAssessor;

#[async_trait]
impl AccessibilityAssessor for DisabledAssessor {
    async fn assess(&self, _item: &Item) -> Result<Assessment> {
        Ok(Assessment::Medium)
    }

    fn enabled(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

const SYSTEM_PROMPT: &str = "You rate research papers for a general technical audience. \
Answer with exactly one word: HIGH, MEDIUM or LOW.";

static RATING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(high|medium|low)\b").expect("valid rating regex"));

/// First HIGH/MEDIUM/LOW word in a reply, case-insensitive.
pub fn parse_rating(reply: &str) -> Assessment {
    match RATING_RE
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
        .as_deref()
    {
        Some("high") => Assessment::High,
        Some("medium") => Assessment::Medium,
        Some("low") => Assessment::Low,
        _ => Assessment::Unknown,
    }
}

pub struct LlmAssessor {
    chat: DynChat,
}

impl LlmAssessor {
    pub fn new(chat: DynChat) -> Self {
        Self { chat }
    }

    fn prompt(item: &Item) -> String {
        format!(
            "Title: {}\nCategories: {}\nAbstract: {}\n\n\
             How accessible is this paper to a general technical audience?",
            item.title,
            item.tags.join(", "),
            clip_chars(&item.summary, 1500)
        )
    }
}

#[async_trait]
impl AccessibilityAssessor for LlmAssessor {
    async fn assess(&self, item: &Item) -> Result<Assessment> {
        let reply = self.chat.complete(SYSTEM_PROMPT, &Self::prompt(item), 5).await?;
        let rating = parse_rating(&reply);
        tracing::debug!(target: "poster", id = %item.id, ?rating, "accessibility assessed");
        Ok(rating)
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}

/// Canned answers keyed by item id, with a default for everything else.
/// `None` makes that call fail.
pub struct ScriptedAssessor {
    by_id: Vec<(String, Option<Assessment>)>,
    fallback: Option<Assessment>,
    calls: Mutex<VecDeque<String>>,
}

impl ScriptedAssessor {
    pub fn new(fallback: Option<Assessment>) -> Self {
        Self {
            by_id: Vec::new(),
            fallback,
            calls: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with(mut self, id: &str, answer: Option<Assessment>) -> Self {
        self.by_id.push((id.to_string(), answer));
        self
    }

    /// Ids assessed so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).iter().cloned().collect()
    }
}

#[async_trait]
impl AccessibilityAssessor for ScriptedAssessor {
    async fn assess(&self, item: &Item) -> Result<Assessment> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push_back(item.id.clone());
        let answer = self
            .by_id
            .iter()
            .find(|(id, _)| *id == item.id)
            .map(|(_, a)| *a)
            .unwrap_or(self.fallback);
        answer.ok_or_else(|| anyhow::anyhow!("scripted assessor failure for {}", item.id))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
