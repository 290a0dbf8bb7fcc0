//! Generation Client
//!
//! Submits a rendered prompt to a completion backend under a bounded timeout.
//! [`LlmClient`] talks to the OpenAI chat completions API; with the dummy API
//! key it answers offline by echoing the first worked example in the prompt.

use crate::config::{AssistantConfig, DUMMY_API_KEY};
use crate::error::ModelError;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str =
    "You are a precise SQL generator for Odoo databases. Return exactly one SQL statement.";

/// Remote model contract. Implementations should honour `timeout` on their
/// own transport; [`GenerationClient`] enforces it regardless.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String, ModelError>;
}

/// OpenAI chat completions backend.
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            api_key,
            base_url,
            model,
            temperature: 0.1,
            max_tokens: 1000,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &AssistantConfig) -> Self {
        Self::new(config.effective_api_key(), config.base_url.clone(), config.model.clone())
            .with_temperature(config.temperature)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn is_dummy(&self) -> bool {
        self.api_key == DUMMY_API_KEY
    }

    async fn call_llm(&self, prompt: &str, timeout: Duration) -> Result<String, ModelError> {
        if self.is_dummy() {
            return Ok(dummy_completion(prompt));
        }

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::ModelTimeout(timeout)
                } else {
                    ModelError::ModelUnavailable(format!("LLM API call failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ModelError::ModelUnavailable(format!(
                "LLM API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ModelError::ModelUnavailable(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ModelError::ModelUnavailable("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}

#[async_trait]
impl CompletionBackend for LlmClient {
    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String, ModelError> {
        self.call_llm(prompt, timeout).await
    }
}

/// Offline answer: the SQL of the first question/SQL pair in the prompt,
/// fenced like a real completion, or a trivial query when there is none.
fn dummy_completion(prompt: &str) -> String {
    let sql = prompt
        .split_once("===Question-SQL Pairs\n")
        .and_then(|(_, rest)| rest.split_once("SQL:\n"))
        .map(|(_, rest)| rest.split("\n\n").next().unwrap_or("").trim())
        .filter(|sql| !sql.is_empty())
        .unwrap_or("SELECT 1;");
    format!("```sql\n{}\n```", sql)
}

/// One optional retry after a jittered backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub backoff: Duration,
    /// Fraction of `backoff` added or removed at random.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(500),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    fn delay(&self) -> Duration {
        if self.jitter <= 0.0 {
            return self.backoff;
        }
        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        self.backoff.mul_f64(factor.max(0.0))
    }
}

pub struct GenerationClient {
    backend: Arc<dyn CompletionBackend>,
    timeout: Duration,
    retry: Option<RetryPolicy>,
}

impl GenerationClient {
    pub fn new(backend: Arc<dyn CompletionBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            timeout,
            retry: None,
        }
    }

    /// Allow a single retry. Only safe when the backend call is idempotent.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn from_config(config: &AssistantConfig) -> Self {
        let client = Self::new(Arc::new(LlmClient::from_config(config)), config.timeout());
        if config.retry_once {
            client.with_retry(RetryPolicy::default())
        } else {
            client
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Raw completion text for `prompt`. Dropping the returned future
    /// abandons the in-flight request.
    pub async fn submit(&self, prompt: &str) -> Result<String, ModelError> {
        match self.attempt(prompt).await {
            Ok(text) => Ok(text),
            Err(err) => match self.retry {
                Some(policy) => {
                    let delay = policy.delay();
                    warn!("Generation failed ({}), retrying once in {:?}", err, delay);
                    tokio::time::sleep(delay).await;
                    self.attempt(prompt).await
                }
                None => Err(err),
            },
        }
    }

    async fn attempt(&self, prompt: &str) -> Result<String, ModelError> {
        debug!("Submitting prompt ({} chars)", prompt.len());
        let started = std::time::Instant::now();
        let result = tokio::time::timeout(self.timeout, self.backend.complete(prompt, self.timeout))
            .await
            .map_err(|_| ModelError::ModelTimeout(self.timeout))?;
        if result.is_ok() {
            info!("Completion received in {:?}", started.elapsed());
        }
        result
    }
}
