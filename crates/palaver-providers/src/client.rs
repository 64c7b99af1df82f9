//! Completion client: bounded retry around an unreliable backend.
//!
//! The upstream occasionally answers with a response produced by a different
//! model. Such responses are recognised by an [`AnomalyDetector`], discarded,
//! and the request is repeated until a clean answer arrives or the attempt cap
//! of the [`RetryPolicy`] is reached, in which case a fixed degraded-service
//! message is returned instead of an error.

use std::sync::Arc;

use tracing::{debug, info, warn};

use palaver_core::config::{Config, DEFAULT_DEGRADED_MESSAGE};
use palaver_core::error::{PalaverError, Result};
use palaver_core::session::Message;

use crate::anomaly::{AnomalyDetector, MarkerDetector};
use crate::openai::OpenAiCompatBackend;
use crate::retry::{Backoff, RetryPolicy};
use crate::{CompletionBackend, CompletionRequest};

/// Result of one `complete` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionOutcome {
    pub text: String,
    /// Backend calls made, the accepted one included.
    pub attempts: u32,
    /// True when every attempt was discarded and `text` is the degraded message.
    pub degraded: bool,
}

pub struct CompletionClient {
    backend: Arc<dyn CompletionBackend>,
    detector: Arc<dyn AnomalyDetector>,
    policy: RetryPolicy,
    model: String,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
    degraded_message: String,
}

impl CompletionClient {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        detector: Arc<dyn AnomalyDetector>,
        policy: RetryPolicy,
        model: impl Into<String>,
        degraded_message: impl Into<String>,
    ) -> Self {
        let mut degraded_message = degraded_message.into();
        if let Some(reason) = detector.detect(&degraded_message) {
            warn!(%reason, "Configured degraded message is itself flagged, using the default");
            degraded_message = DEFAULT_DEGRADED_MESSAGE.to_string();
        }
        Self {
            backend,
            detector,
            policy,
            model: model.into(),
            temperature: None,
            max_tokens: None,
            degraded_message,
        }
    }

    /// Build the client from config with the OpenAI-compatible backend.
    pub fn from_config(config: &Config) -> Self {
        let completion = config.completion();
        let backend = Arc::new(OpenAiCompatBackend::from_config(&completion));
        Self::with_backend(config, backend)
    }

    /// Build the client from config around a caller-supplied backend.
    pub fn with_backend(config: &Config, backend: Arc<dyn CompletionBackend>) -> Self {
        let completion = config.completion();
        let detector = Arc::new(MarkerDetector::new(completion.contamination_markers.clone()));
        let policy = RetryPolicy::new(completion.max_attempts, Backoff::from(&completion.backoff));
        let mut client = Self::new(
            backend,
            detector,
            policy,
            config.model(),
            config.degraded_message(),
        );
        client.temperature = completion.temperature;
        client.max_tokens = completion.max_tokens;
        client
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn degraded_message(&self) -> &str {
        &self.degraded_message
    }

    /// Send the ordered history and return the accepted reply text.
    pub async fn complete(&self, history: &[Message]) -> Result<String> {
        Ok(self.complete_detailed(history).await?.text)
    }

    /// Like [`complete`](Self::complete) but also reports attempts and degradation.
    ///
    /// Only backend failures are returned as errors; contamination never is.
    pub async fn complete_detailed(&self, history: &[Message]) -> Result<CompletionOutcome> {
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: history.to_vec(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let max_attempts = self.policy.max_attempts;
        for attempt in 1..=max_attempts {
            let text = self.backend.chat(&request).await.map_err(|e| {
                PalaverError::Upstream(format!("{} backend failed: {e:#}", self.backend.id()))
            })?;

            match self.detector.detect(&text) {
                None => {
                    if attempt > 1 {
                        info!(
                            backend = self.backend.id(),
                            attempt,
                            "Clean completion after discarded responses"
                        );
                    } else {
                        debug!(backend = self.backend.id(), "Completion accepted");
                    }
                    return Ok(CompletionOutcome {
                        text,
                        attempts: attempt,
                        degraded: false,
                    });
                }
                Some(reason) => {
                    warn!(
                        backend = self.backend.id(),
                        attempt,
                        max_attempts,
                        %reason,
                        "Discarding contaminated completion"
                    );
                    if attempt < max_attempts {
                        let delay = self.policy.delay_after(attempt);
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        warn!(
            backend = self.backend.id(),
            attempts = max_attempts,
            "No clean completion within the attempt cap, returning degraded reply"
        );
        Ok(CompletionOutcome {
            text: self.degraded_message.clone(),
            attempts: max_attempts,
            degraded: true,
        })
    }
}
