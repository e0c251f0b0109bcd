//! External completion provider client.
//!
//! The gateway talks to a trait seam so tests can swap the upstream out;
//! the production implementation speaks the OpenRouter-compatible
//! chat-completions wire format.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ProviderConfig;

/// One turn of the prompt sent upstream. Roles here include `system`,
/// which never appears in the store.
#[derive(Debug, Clone, Serialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

impl PromptMessage {
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

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Failures talking to the completion API. The display strings stay
/// generic; status and body detail are logged where they occur and never
/// travel to the caller.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("completion API returned status {status}")]
    Status { status: u16 },
    #[error("completion API response missing message content")]
    MalformedResponse,
    #[error("completion request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Produce the assistant's reply for an ordered prompt.
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, ProviderError>;
}

// ─── OpenRouter-compatible implementation ─────────────────────────────────────

pub struct OpenRouterProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenRouterProvider {
    pub fn new(config: ProviderConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl CompletionProvider for OpenRouterProvider {
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, ProviderError> {
        let resp = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            // Attribution headers the OpenRouter API expects from app callers.
            .header("HTTP-Referer", &self.config.app_url)
            .header("X-Title", &self.config.app_name)
            .json(&CompletionRequest {
                model: &self.config.model,
                messages,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), detail = %detail, "completion API error");
            return Err(ProviderError::Status {
                status: status.as_u16(),
            });
        }

        let body: CompletionResponse = resp.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(ProviderError::MalformedResponse)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
