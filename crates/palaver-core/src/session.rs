//! Session model: per-user ordered message history seeded with a system prompt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PalaverError, Result};

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Capitalized label used in rendered transcripts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::System => "System",
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message. Same shape as the chat-completions wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Conversation history for one user.
///
/// Index 0 always holds the seed `system` message. The message list is only
/// reachable through methods that append `user`/`assistant` entries or reset
/// the whole sequence.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    user_id: String,
    messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub last_reset_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, seed_prompt: &str) -> Self {
        Self {
            user_id: user_id.into(),
            messages: vec![Message::system(seed_prompt)],
            created_at: Utc::now(),
            last_reset_at: None,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Never true: the seed entry is always present.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// True when nothing beyond the seed prompt has been exchanged.
    pub fn is_seed_only(&self) -> bool {
        self.messages.len() <= 1
    }

    pub fn seed(&self) -> &Message {
        &self.messages[0]
    }

    /// Non-system messages in chronological order.
    pub fn exchanges(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }

    /// Append one message. System messages are only valid as the seed.
    pub fn push(&mut self, role: Role, content: impl Into<String>) -> Result<()> {
        if role == Role::System {
            return Err(PalaverError::Session(format!(
                "refusing to append a system message to session {}",
                self.user_id
            )));
        }
        self.messages.push(Message::new(role, content));
        Ok(())
    }

    /// Append a completed exchange: the user's message and the reply to it.
    pub fn push_exchange(&mut self, user_text: impl Into<String>, reply: impl Into<String>) {
        self.messages.push(Message::user(user_text));
        self.messages.push(Message::assistant(reply));
    }

    /// Replace the whole history with a fresh seed entry.
    pub fn reset(&mut self, seed_prompt: &str) {
        self.messages = vec![Message::system(seed_prompt)];
        self.last_reset_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_seeded() {
        let session = Session::new("u1", "be nice");
        assert_eq!(session.len(), 1);
        assert!(session.is_seed_only());
        assert_eq!(session.seed().role, Role::System);
        assert_eq!(session.seed().content, "be nice");
    }

    #[test]
    fn test_push_rejects_system() {
        let mut session = Session::new("u1", "seed");
        assert!(session.push(Role::System, "override").is_err());
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn test_exchange_and_reset() {
        let mut session = Session::new("u1", "seed");
        session.push_exchange("hi", "hello");
        assert_eq!(session.len(), 3);
        let roles: Vec<Role> = session.exchanges().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);

        session.reset("seed");
        assert_eq!(session.len(), 1);
        assert!(session.last_reset_at.is_some());
    }

    #[test]
    fn test_serialized_session_keeps_seed_first() {
        let mut session = Session::new("u1", "be nice");
        session.push_exchange("hi", "hello");
        let json = serde_json::to_value(&session).unwrap();
        let messages = json["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "be nice");
    }

    #[test]
    fn test_message_wire_shape() {
        let json = serde_json::to_value(Message::assistant("ok")).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "ok");
    }
}
