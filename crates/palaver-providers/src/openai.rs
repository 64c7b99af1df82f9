//! OpenAI-compatible Chat Completions backend.
//!
//! Posts the whole history to `/v1/chat/completions` with `stream: false` and
//! returns the first choice's content. Works against OpenAI, OpenRouter,
//! Ollama, and the various free relays that speak the same protocol.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use palaver_core::config::CompletionConfig;
use palaver_core::session::Message;

use crate::{BackendError, CompletionBackend, CompletionRequest};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub struct OpenAiCompatBackend {
    pub base_url: String,
    api_key: Option<String>,
    provider_id: String,
    client: reqwest::Client,
}

impl OpenAiCompatBackend {
    pub fn new(base_url: Option<&str>, api_key: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            provider_id: "openai".into(),
            client,
        }
    }

    pub fn from_config(config: &CompletionConfig) -> Self {
        let timeout =
            Duration::from_secs(config.request_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        Self::new(
            config.base_url.as_deref(),
            config.resolve_api_key(),
            timeout,
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

// --- OpenAI request/response types ---

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl CompletionBackend for OpenAiCompatBackend {
    fn id(&self) -> &str {
        &self.provider_id
    }

    async fn chat(&self, request: &CompletionRequest) -> anyhow::Result<String> {
        let body = OpenAiRequest {
            model: &request.model,
            messages: &request.messages,
            stream: false,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        debug!(
            url = %self.endpoint(),
            model = %request.model,
            messages = request.messages.len(),
            "Sending completion request"
        );

        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(BackendError::from)?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body }.into());
        }

        let completion: ChatCompletion = response.json().await.map_err(BackendError::from)?;
        trace!(served_by = ?completion.model, "Completion received");

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| BackendError::EmptyResponse.into())
    }
}
