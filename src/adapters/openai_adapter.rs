//! OpenAI-compatible chat completions backend.
//!
//! Works against any server that speaks `/v1/chat/completions`. Reasoning
//! models that return a separate `reasoning_content` (or `reasoning`) field
//! on the message have it carried through as the reasoning channel.

use std::env;
use std::time::Duration;

use reqwest::blocking::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::error::AgentError;
use crate::ports::config_port::ConfigPort;
use crate::ports::model_port::{ModelPort, ModelResponse};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_API_KEY_ENV: &str = "LLM_API_KEY";
pub const SYSTEM_MESSAGE: &str =
    "You are a professional cryptocurrency trader. Output JSON format only.";

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
}

pub struct OpenAiModel {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
    settings: ChatSettings,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

impl OpenAiModel {
    pub fn new(settings: ChatSettings, api_key: Option<SecretString>) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| AgentError::Backend {
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", normalize_base_url(&settings.base_url)),
            api_key,
            settings,
        })
    }

    /// Build from `[model]`. The API key comes from `api_key`, or else from
    /// the environment variable named by `api_key_env`.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, AgentError> {
        let settings = ChatSettings {
            base_url: config
                .get_string("model", "base_url")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: config.require_string("model", "model")?,
            temperature: config.get_double("model", "temperature", 0.7),
            max_tokens: config.get_int("model", "max_tokens", 2000).max(1) as u32,
            timeout: Duration::from_secs(
                config.get_int("model", "timeout_seconds", 60).max(1) as u64,
            ),
        };

        let api_key = match config.get_string("model", "api_key") {
            Some(key) if !key.trim().is_empty() => Some(SecretString::new(key.trim().into())),
            _ => {
                let var = config
                    .get_string("model", "api_key_env")
                    .unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string());
                env::var(var.trim())
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| SecretString::new(v.into()))
            }
        };
        if api_key.is_none() {
            warn!(model = %settings.model, "no API key configured, sending unauthenticated requests");
        }

        Self::new(settings, api_key)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ModelPort for OpenAiModel {
    fn complete(&self, prompt: &str) -> Result<ModelResponse, AgentError> {
        let body = ChatRequest {
            model: &self.settings.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_MESSAGE,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        debug!(endpoint = %self.endpoint, model = %self.settings.model, "sending chat completion");
        let resp = request.send().map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(AgentError::Backend {
                reason: format!("HTTP {} from {}: {}", status, self.endpoint, truncate(&text, 200)),
            });
        }

        let text = resp.text().map_err(|e| self.transport_error(e))?;
        parse_chat_response(&text)
    }
}

impl OpenAiModel {
    fn transport_error(&self, e: reqwest::Error) -> AgentError {
        if e.is_timeout() {
            AgentError::BackendTimeout {
                seconds: self.settings.timeout.as_secs(),
            }
        } else {
            AgentError::Backend {
                reason: e.to_string(),
            }
        }
    }
}

/// Trim trailing slashes and make sure the URL ends in `/v1`.
pub fn normalize_base_url(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        trimmed.to_string()
    } else {
        format!("{}/v1", trimmed)
    }
}

/// Pull the first choice out of a chat completion body.
pub fn parse_chat_response(body: &str) -> Result<ModelResponse, AgentError> {
    let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| AgentError::Backend {
        reason: format!("malformed completion body: {}", e),
    })?;

    let message = parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| AgentError::Backend {
            reason: "completion has no choices".into(),
        })?;

    let reasoning = message
        .reasoning_content
        .filter(|r| !r.trim().is_empty())
        .or(message.reasoning);
    Ok(ModelResponse::new(message.content.unwrap_or_default(), reasoning))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
