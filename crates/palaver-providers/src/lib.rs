//! Completion backend abstraction.
//!
//! A backend implements [`CompletionBackend`] to turn an ordered message
//! history into a single text reply. [`CompletionClient`] wraps a backend with
//! anomaly detection and a bounded retry policy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use palaver_core::session::Message;

pub mod anomaly;
pub mod client;
pub mod openai;
pub mod retry;

pub use anomaly::{AnomalyDetector, MarkerDetector};
pub use client::{CompletionClient, CompletionOutcome};
pub use retry::{Backoff, RetryPolicy};

/// A request to the completion backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Errors from a completion call that are not contamination.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("backend response had no choices")]
    EmptyResponse,

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// The core completion backend trait.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Backend identifier (e.g., "openai").
    fn id(&self) -> &str;

    /// Send the full ordered history and return one text reply. No streaming.
    async fn chat(&self, request: &CompletionRequest) -> anyhow::Result<String>;
}
