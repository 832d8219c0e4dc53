// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::env;

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_daily_limit() -> u32 {
    50
}
fn default_timeout_secs() -> u64 {
    20
}

/// LLM settings shared by the accessibility assessor and the comment generator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Only "openai" (any OpenAI-compatible endpoint) is wired up.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// "ENV" means: read from OPENAI_API_KEY. "ENV:NAME" reads from $NAME.
    #[serde(default = "default_api_key")]
    pub api_key: String,
    /// Real calls per UTC day across both uses.
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            model: default_model(),
            base_url: default_base_url(),
            api_key: default_api_key(),
            daily_limit: default_daily_limit(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl AiConfig {
    /// Normalize provider and resolve the key indirection. A missing env var
    /// yields an empty key, which later disables the LLM features.
    pub fn resolved(mut self) -> Self {
        self.provider = self.provider.to_lowercase();
        self.api_key = resolve_secret(&self.api_key, "OPENAI_API_KEY");
        self
    }

    pub fn usable(&self) -> bool {
        self.enabled && self.provider == "openai" && !self.api_key.trim().is_empty()
    }
}

/// Resolve `"ENV"` / `"ENV:NAME"` indirections; literal values pass through.
pub fn resolve_secret(raw: &str, default_var: &str) -> String {
    let t = raw.trim();
    if t.eq_ignore_ascii_case("env") {
        return env::var(default_var).unwrap_or_default();
    }
    if let Some(name) = t.strip_prefix("ENV:").or_else(|| t.strip_prefix("env:")) {
        return env::var(name.trim()).unwrap_or_default();
    }
    t.to_string()
}
