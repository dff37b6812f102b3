//! LLM provider capability and implementations.
//!
//! The pipeline depends on a single capability: turn a system + user prompt
//! pair into text. Vendor SDKs stay outside the core; the one concrete
//! implementation shipped here is the OpenAI-compatible local endpoint used
//! as the quota fallback.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{Error, Result};

use super::tier::ProviderKind;

/// Per-call execution context handed to providers.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Resolved model identifier.
    pub model: String,
    /// Attribution label `{operation}:{analyst_slug}:{fork_type}`.
    pub label: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl ExecutionContext {
    pub fn new(model: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            label: label.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 1.0));
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Raw provider output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
}

/// The single LLM capability the core depends on.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate_response(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        ctx: &ExecutionContext,
    ) -> Result<LlmResponse>;

    fn kind(&self) -> ProviderKind;
}

/// Configuration for the local OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct LocalProviderConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for LocalProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434/v1".to_string(),
            timeout_secs: 120,
        }
    }
}

impl LocalProviderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// OpenAI-compatible chat client against a self-hosted endpoint.
pub struct LocalHttpProvider {
    config: LocalProviderConfig,
    http: Client,
}

// Chat-completions API types
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatError {
    error: ChatErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ChatErrorDetail {
    message: String,
}

impl LocalHttpProvider {
    pub fn new(config: LocalProviderConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { config, http }
    }
}

#[async_trait]
impl LlmProvider for LocalHttpProvider {
    async fn generate_response(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        ctx: &ExecutionContext,
    ) -> Result<LlmResponse> {
        let api_request = ChatRequest {
            model: ctx.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_prompt.to_string(),
                },
            ],
            temperature: ctx.temperature,
            max_tokens: ctx.max_tokens,
        };

        let url = format!("{}/chat/completions", self.config.base_url);

        let response = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::llm("local", format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::llm("local", format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ChatError>(&body) {
                return Err(Error::llm("local", error.error.message));
            }
            return Err(Error::llm("local", format!("API error ({}): {}", status, body)));
        }

        let api_response: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| Error::llm("local", format!("Failed to parse response: {}", e)))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::llm("local", "No choices in response".to_string()))?;

        Ok(LlmResponse {
            content: choice.message.content,
            model: api_response.model.unwrap_or_else(|| ctx.model.clone()),
        })
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }
}

/// Provider that replays a queue of canned responses, then a fallback.
/// Used by tests and dry runs.
pub struct ScriptedProvider {
    kind: ProviderKind,
    queue: Mutex<VecDeque<String>>,
    fallback: String,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(kind: ProviderKind, fallback: impl Into<String>) -> Self {
        Self {
            kind,
            queue: Mutex::new(VecDeque::new()),
            fallback: fallback.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue one response ahead of the fallback.
    pub fn push_response(&self, content: impl Into<String>) {
        self.queue.lock().unwrap().push_back(content.into());
    }

    /// Labels of every call served, in order.
    pub fn served_labels(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate_response(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        ctx: &ExecutionContext,
    ) -> Result<LlmResponse> {
        self.calls.lock().unwrap().push(ctx.label.clone());
        let content = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(LlmResponse {
            content,
            model: ctx.model.clone(),
        })
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }
}
