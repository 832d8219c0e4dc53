//! Post rendering. The template is always available; the LLM variant only
//! replaces the one-line comment at the top.

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::ingest::clip_chars;
use crate::item::Item;
use crate::llm::DynChat;

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn render(&self, item: &Item) -> Result<String>;
    fn name(&self) -> &'static str;
}

/// Authors line: first three, then "et al. (N total)".
pub fn authors_line(authors: &[String]) -> String {
    let mut s = authors.iter().take(3).cloned().collect::<Vec<_>>().join(", ");
    if authors.len() > 3 {
        s.push_str(&format!(" et al. ({} total)", authors.len()));
    }
    s
}

/// Up to three cs.*/stat.* categories.
pub fn main_categories(tags: &[String]) -> String {
    tags.iter()
        .filter(|t| t.starts_with("cs.") || t.starts_with("stat."))
        .take(3)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ")
}

/// "Altmetric: 12.5 (40 tweets, 2 Reddit)" or empty when there is no score.
pub fn altmetric_line(item: &Item) -> String {
    let score = item.popularity.unwrap_or(0.0);
    if score <= 0.0 {
        return String::new();
    }
    let mut line = format!("Altmetric: {score:.1}");
    let mentions: Vec<String> = [
        ("cited_by_tweeters_count", "tweets"),
        ("cited_by_posts_count", "posts"),
        ("cited_by_rdts_count", "Reddit"),
    ]
    .iter()
    .filter_map(|(key, label)| {
        let n = item.signal(key);
        (n > 0.0).then(|| format!("{} {label}", n as u64))
    })
    .collect();
    if !mentions.is_empty() {
        line.push_str(&format!(" ({})", mentions.join(", ")));
    }
    line
}

pub fn fallback_comment(item: &Item) -> String {
    format!(
        "Trending AI paper with Altmetric score {:.1}! Worth checking out.",
        item.popularity.unwrap_or(0.0)
    )
}

/// Full chat message around a given comment.
pub fn format_post(item: &Item, comment: &str) -> String {
    let mut msg = format!(
        "**{}**\n\n**{}**\n\n{}\n{} | {}\n",
        comment.trim(),
        item.title,
        authors_line(&item.authors),
        item.published.format("%Y-%m-%d"),
        main_categories(&item.tags),
    );
    let alt = altmetric_line(item);
    if !alt.is_empty() {
        msg.push_str(&alt);
        msg.push('\n');
    }
    let pdf = item.pdf_url.as_deref().unwrap_or(&item.url);
    msg.push_str(&format!("\n[arXiv]({}) | [PDF]({})", item.url, pdf));
    msg
}

pub struct TemplateGenerator;

#[async_trait]
impl ContentGenerator for TemplateGenerator {
    async fn render(&self, item: &Item) -> Result<String> {
        Ok(format_post(item, &fallback_comment(item)))
    }

    fn name(&self) -> &'static str {
        "template"
    }
}

const COMMENT_SYSTEM: &str = "You write one short, engaging sentence introducing a trending \
AI/ML paper to a research community chat channel. No hashtags, no links.";

pub struct LlmCommentGenerator {
    chat: DynChat,
}

impl LlmCommentGenerator {
    pub fn new(chat: DynChat) -> Self {
        Self { chat }
    }

    fn prompt(item: &Item) -> String {
        let alt = altmetric_line(item);
        format!(
            "Title: {}\nAuthors: {}\nCategories: {}\n{}\nAbstract: {}",
            item.title,
            authors_line(&item.authors),
            main_categories(&item.tags),
            if alt.is_empty() { "Altmetric: none".to_string() } else { alt },
            clip_chars(&item.summary, 500)
        )
    }
}

#[async_trait]
impl ContentGenerator for LlmCommentGenerator {
    async fn render(&self, item: &Item) -> Result<String> {
        let comment = self.chat.complete(COMMENT_SYSTEM, &Self::prompt(item), 120).await?;
        let comment = comment.trim().trim_matches('"').trim();
        if comment.is_empty() {
            bail!("empty generated comment");
        }
        Ok(format_post(item, comment))
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}
