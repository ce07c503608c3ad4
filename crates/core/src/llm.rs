//! OpenAI-compatible chat-completions client.
//!
//! Works against any endpoint that accepts `POST {base_url}/chat/completions`
//! with a bearer token, e.g. OpenRouter or SiliconFlow.

use crate::config::LlmConfig;
use crate::error::{ConfigError, LlmError};
use crate::models::Usage;
use crate::traits::ChatModel;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Per-call overrides fall back to the client's configured defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(vec![ChatMessage::user(content)])
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub content: String,
    pub model: Option<String>,
    pub usage: Option<Usage>,
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

pub struct OpenAiCompatClient {
    client: Client,
    config: LlmConfig,
    endpoint: String,
}

impl OpenAiCompatClient {
    pub fn new(config: LlmConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| ConfigError::Client(error.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            config,
        })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatClient {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        let timeout_secs = self.config.timeout.as_secs();
        let body = CompletionBody {
            model: &self.config.model,
            messages: &request.messages,
            max_tokens: request.max_tokens.unwrap_or(self.config.max_tokens),
            temperature: request.temperature.unwrap_or(self.config.temperature),
        };

        debug!(
            endpoint = %self.endpoint,
            model = %self.config.model,
            messages = request.messages.len(),
            max_tokens = body.max_tokens,
            "sending chat completion"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.config.api_key)
            .header("HTTP-Referer", &self.config.app_url)
            .header("X-Title", &self.config.app_name)
            .json(&body)
            .send()
            .await
            .map_err(|error| LlmError::from_transport(error, timeout_secs))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|error| LlmError::from_transport(error, timeout_secs))?;

        if !status.is_success() {
            error!(%status, "chat completion rejected");
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: error_detail(&text),
            });
        }

        parse_completion(&text)
    }
}

/// Extracts `choices[0].message.content` (plus model and usage) from a
/// chat-completions response body.
pub fn parse_completion(body: &str) -> Result<ChatCompletion, LlmError> {
    let parsed: Value =
        serde_json::from_str(body).map_err(|error| LlmError::MalformedJson(error.to_string()))?;

    let content = parsed
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| LlmError::MissingField("choices[0].message.content".to_string()))?;

    let usage = parsed.get("usage").filter(|value| value.is_object()).map(|usage| Usage {
        prompt_tokens: usage.get("prompt_tokens").and_then(Value::as_u64),
        completion_tokens: usage.get("completion_tokens").and_then(Value::as_u64),
        total_tokens: usage.get("total_tokens").and_then(Value::as_u64),
    });

    Ok(ChatCompletion {
        content: content.to_string(),
        model: parsed.get("model").and_then(Value::as_str).map(str::to_string),
        usage,
    })
}

/// Prefers the `{"error": {"message": ...}}` detail, else the raw body, capped.
fn error_detail(body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string());

    if detail.chars().count() > MAX_ERROR_BODY_CHARS {
        let mut capped: String = detail.chars().take(MAX_ERROR_BODY_CHARS).collect();
        capped.push_str("...");
        capped
    } else {
        detail
    }
}
