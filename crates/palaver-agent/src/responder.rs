//! One exchange: rule tier, completion fallback, history commit.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use palaver_core::error::Result;
use palaver_core::session::Session;
use palaver_core::session_store::SessionStore;
use palaver_providers::CompletionClient;

use crate::router::ResponseRouter;

/// Which tier produced a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    Rule,
    Completion,
    /// Completion gave up after the attempt cap; the text is the degraded message.
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub source: ReplySource,
    /// History length after the exchange was committed.
    pub history_len: usize,
}

pub struct Responder {
    sessions: Arc<SessionStore>,
    router: Arc<ResponseRouter>,
    completion: Arc<CompletionClient>,
}

impl Responder {
    pub fn new(
        sessions: Arc<SessionStore>,
        router: Arc<ResponseRouter>,
        completion: Arc<CompletionClient>,
    ) -> Self {
        Self {
            sessions,
            router,
            completion,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Resolve `text` for `user_id` and record the exchange.
    ///
    /// The user's session stays locked for the whole call, so concurrent
    /// messages from one user are answered one after another. On error
    /// nothing is appended.
    pub async fn respond(&self, user_id: &str, text: &str) -> Result<Reply> {
        let turn = self.sessions.begin_turn(user_id).await;

        let (reply, source) = match self.router.try_respond(text) {
            Some(reply) => (reply, ReplySource::Rule),
            None => {
                debug!(user = user_id, history = turn.history().len(), "No rule matched, asking completion");
                let outcome = self
                    .completion
                    .complete_detailed(&turn.context_with(text))
                    .await?;
                let source = if outcome.degraded {
                    ReplySource::Degraded
                } else {
                    ReplySource::Completion
                };
                (outcome.text, source)
            }
        };

        let history_len = turn.commit(text, &reply);
        info!(user = user_id, ?source, history_len, "Exchange committed");
        Ok(Reply {
            text: reply,
            source,
            history_len,
        })
    }

    /// Start a new dialog for `user_id`.
    pub async fn reset(&self, user_id: &str) -> Session {
        let session = self.sessions.reset(user_id).await;
        info!(user = user_id, "Dialog reset");
        session
    }
}
