//! Runtime configuration
//!
//! Values come from the process environment (populated from `.env` by the
//! binary via `dotenv`). Every field has a default so the assistant runs
//! offline in dummy mode without any configuration.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Hard upper bound on similar examples injected into a prompt.
pub const MAX_CONTEXT_EXAMPLES: usize = 5;

/// API key value that switches the model and embedding clients to canned
/// offline responses.
pub const DUMMY_API_KEY: &str = "dummy-api-key";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub embedding_model: String,
    pub timeout_secs: u64,
    pub retry_once: bool,
    pub temperature: f32,
    pub max_prompt_tokens: usize,
    pub examples_limit: usize,
    pub ddl_limit: usize,
    pub docs_limit: usize,
    pub store_path: PathBuf,
    pub query_log_path: Option<PathBuf>,
    pub cache_responses: bool,
    pub dialect: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4.1-nano".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            timeout_secs: 60,
            retry_once: false,
            temperature: 0.1,
            max_prompt_tokens: 14_000,
            examples_limit: MAX_CONTEXT_EXAMPLES,
            ddl_limit: 5,
            docs_limit: 5,
            store_path: PathBuf::from("data/vector_store.json"),
            query_log_path: None,
            cache_responses: false,
            dialect: "PostgreSQL".to_string(),
        }
    }
}

impl AssistantConfig {
    /// Build a configuration from environment variables, falling back to
    /// defaults for anything missing or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            model: env::var("OPENAI_MODEL").unwrap_or(defaults.model),
            base_url: env::var("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            embedding_model: env::var("EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            timeout_secs: parse_var("LLM_TIMEOUT_SECS", defaults.timeout_secs),
            retry_once: parse_var("LLM_RETRY_ONCE", defaults.retry_once),
            temperature: parse_var("LLM_TEMPERATURE", defaults.temperature),
            max_prompt_tokens: parse_var("MAX_PROMPT_TOKENS", defaults.max_prompt_tokens),
            examples_limit: parse_var("CONTEXT_EXAMPLES", defaults.examples_limit),
            ddl_limit: parse_var("CONTEXT_DDL", defaults.ddl_limit),
            docs_limit: parse_var("CONTEXT_DOCS", defaults.docs_limit),
            store_path: env::var("VECTOR_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.store_path),
            query_log_path: env::var("QUERY_LOG_PATH").ok().map(PathBuf::from),
            cache_responses: parse_var("RESPONSE_CACHE", defaults.cache_responses),
            dialect: env::var("SQL_DIALECT").unwrap_or(defaults.dialect),
        };

        config.normalized()
    }

    /// Clamp limits into their supported ranges.
    pub fn normalized(mut self) -> Self {
        self.examples_limit = self.examples_limit.clamp(1, MAX_CONTEXT_EXAMPLES);
        self.ddl_limit = self.ddl_limit.max(1);
        self.docs_limit = self.docs_limit.max(1);
        self.max_prompt_tokens = self.max_prompt_tokens.clamp(1_000, 32_000);
        self.timeout_secs = self.timeout_secs.max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// API key to hand to HTTP clients; dummy mode when none is configured.
    pub fn effective_api_key(&self) -> String {
        self.api_key
            .clone()
            .unwrap_or_else(|| DUMMY_API_KEY.to_string())
    }

    /// Rough character budget for grounding context (1 token ~= 4 chars).
    pub fn context_char_budget(&self) -> usize {
        self.max_prompt_tokens * 4
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparseable {}='{}', using default", name, raw);
                default
            }
        },
        Err(_) => default,
    }
}
