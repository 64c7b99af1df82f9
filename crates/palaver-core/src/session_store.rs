//! In-memory session store with one serialization domain per user.
//!
//! Sessions live only as long as the process. The map itself is behind a
//! `RwLock`; each session sits behind its own `Mutex` so that messages from the
//! same user are applied one exchange at a time while other users proceed
//! independently.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use crate::error::{PalaverError, Result};
use crate::session::{Message, Role, Session};

/// Shared handle to one user's session.
pub type SessionHandle = Arc<Mutex<Session>>;

pub struct SessionStore {
    seed_prompt: String,
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionStore {
    pub fn new(seed_prompt: impl Into<String>) -> Self {
        Self {
            seed_prompt: seed_prompt.into(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn seed_prompt(&self) -> &str {
        &self.seed_prompt
    }

    /// Return the user's session, creating a seeded one on first contact.
    pub async fn get_or_create(&self, user_id: &str) -> SessionHandle {
        if let Some(handle) = self.sessions.read().await.get(user_id) {
            return handle.clone();
        }

        let mut map = self.sessions.write().await;
        map.entry(user_id.to_string())
            .or_insert_with(|| {
                debug!(user = user_id, "Created session");
                Arc::new(Mutex::new(Session::new(user_id, &self.seed_prompt)))
            })
            .clone()
    }

    /// Discard the user's history and return the fresh seeded session.
    ///
    /// The existing handle is reset in place, so a turn queued behind the
    /// user's lock sees the new history.
    pub async fn reset(&self, user_id: &str) -> Session {
        let handle = self.get_or_create(user_id).await;
        let mut session = handle.lock().await;
        session.reset(&self.seed_prompt);
        debug!(user = user_id, "Reset session");
        session.clone()
    }

    /// Append one message to an existing session.
    pub async fn append(&self, user_id: &str, role: Role, content: &str) -> Result<usize> {
        let handle = self
            .sessions
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| PalaverError::UnknownUser(user_id.to_string()))?;
        let mut session = handle.lock().await;
        session.push(role, content)?;
        Ok(session.len())
    }

    /// Acquire the user's serialization domain for one whole exchange.
    pub async fn begin_turn(&self, user_id: &str) -> Turn {
        let handle = self.get_or_create(user_id).await;
        Turn {
            session: handle.lock_owned().await,
        }
    }

    /// Clone of the user's current session, if one exists.
    pub async fn snapshot(&self, user_id: &str) -> Option<Session> {
        let handle = self.sessions.read().await.get(user_id).cloned()?;
        let session = handle.lock().await;
        Some(session.clone())
    }

    /// Number of users with a session.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

/// Exclusive access to one user's session for the duration of an exchange.
///
/// Dropping a turn without [`Turn::commit`] leaves the history untouched.
pub struct Turn {
    session: OwnedMutexGuard<Session>,
}

impl Turn {
    pub fn user_id(&self) -> &str {
        self.session.user_id()
    }

    pub fn history(&self) -> &[Message] {
        self.session.messages()
    }

    /// History plus the pending user message, as sent to the completion backend.
    pub fn context_with(&self, user_text: &str) -> Vec<Message> {
        let mut messages = self.session.messages().to_vec();
        messages.push(Message::user(user_text));
        messages
    }

    /// Append the user message and its reply; returns the new history length.
    pub fn commit(mut self, user_text: &str, reply: &str) -> usize {
        self.session.push_exchange(user_text, reply);
        self.session.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = "You are a helpful assistant.";

    #[tokio::test]
    async fn test_get_or_create_is_lazy_and_stable() {
        let store = SessionStore::new(SEED);
        assert!(store.is_empty().await);

        let a = store.get_or_create("alice").await;
        let b = store.get_or_create("alice").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len().await, 1);
        assert_eq!(a.lock().await.seed().content, SEED);
    }

    #[tokio::test]
    async fn test_reset_yields_single_seed() {
        let store = SessionStore::new(SEED);
        store.get_or_create("bob").await;
        store.append("bob", Role::User, "hi").await.unwrap();
        store.append("bob", Role::Assistant, "hello").await.unwrap();

        let fresh = store.reset("bob").await;
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh.seed().role, Role::System);
        assert_eq!(fresh.seed().content, SEED);

        // Reset also works for users never seen before.
        let other = store.reset("carol").await;
        assert_eq!(other.len(), 1);
    }

    #[tokio::test]
    async fn test_append_unknown_user() {
        let store = SessionStore::new(SEED);
        let err = store.append("ghost", Role::User, "hi").await.unwrap_err();
        assert!(matches!(err, PalaverError::UnknownUser(ref u) if u == "ghost"));
    }

    #[tokio::test]
    async fn test_append_is_monotonic() {
        let store = SessionStore::new(SEED);
        store.get_or_create("dave").await;
        for i in 0..3 {
            let before = store.snapshot("dave").await.unwrap().len();
            store.append("dave", Role::User, &format!("q{i}")).await.unwrap();
            let after = store
                .append("dave", Role::Assistant, &format!("a{i}"))
                .await
                .unwrap();
            assert_eq!(after, before + 2);
        }
    }

    #[tokio::test]
    async fn test_turn_commit_and_abandon() {
        let store = SessionStore::new(SEED);

        let turn = store.begin_turn("erin").await;
        let context = turn.context_with("question");
        assert_eq!(context.len(), 2);
        assert_eq!(turn.history().len(), 1);
        assert_eq!(turn.commit("question", "answer"), 3);

        let abandoned = store.begin_turn("erin").await;
        drop(abandoned);
        assert_eq!(store.snapshot("erin").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_turns_for_same_user_do_not_interleave() {
        let store = Arc::new(SessionStore::new(SEED));
        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let turn = store.begin_turn("frank").await;
                let question = format!("q{i}");
                tokio::task::yield_now().await;
                turn.commit(&question, &format!("a{i}"));
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let session = store.snapshot("frank").await.unwrap();
        assert_eq!(session.len(), 1 + 16 * 2);
        let exchanges: Vec<&Message> = session.exchanges().collect();
        for pair in exchanges.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            assert_eq!(pair[0].content[1..], pair[1].content[1..]);
        }
    }
}
