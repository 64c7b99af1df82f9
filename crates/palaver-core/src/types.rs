use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether an inbound message is text or voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Voice,
}

/// Control commands a user can issue besides plain messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Start a new dialog: the session is reset to its seed prompt.
    Reset,
    /// Deliver the conversation so far as a text document.
    Export,
}

impl Command {
    /// Parse a slash command (`/new`, `/export`, plus the legacy aliases).
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?.strip_prefix('/')?;
        match word {
            "new" | "new_bot" | "reset" => Some(Self::Reset),
            "export" | "download_conv" => Some(Self::Export),
            _ => None,
        }
    }
}

/// Voice payload attached to an inbound message.
///
/// Either `data` carries the raw bytes or `url` points at where they can be
/// fetched from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub url: Option<String>,
    pub data: Option<Vec<u8>>,
    pub mime_type: String,
    pub filename: Option<String>,
    pub size_bytes: Option<u64>,
}

impl MediaAttachment {
    pub fn from_url(url: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            data: None,
            mime_type: mime_type.into(),
            filename: None,
            size_bytes: None,
        }
    }

    pub fn from_bytes(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        let size = data.len() as u64;
        Self {
            url: None,
            data: Some(data),
            mime_type: mime_type.into(),
            filename: None,
            size_bytes: Some(size),
        }
    }

    /// File extension used for the raw download (`ogg` for Telegram-style voice notes).
    pub fn extension(&self) -> &str {
        if let Some(ext) = self
            .filename
            .as_deref()
            .and_then(|f| f.rsplit_once('.'))
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        {
            return ext;
        }
        match self.mime_type.as_str() {
            "audio/ogg" | "audio/opus" => "ogg",
            "audio/mpeg" | "audio/mp3" => "mp3",
            "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
            "audio/mp4" | "audio/m4a" | "audio/x-m4a" => "m4a",
            "audio/webm" => "webm",
            _ => "bin",
        }
    }
}

/// What the user sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundPayload {
    Text { text: String },
    Voice { attachment: MediaAttachment },
    Command { command: Command },
}

/// Inbound event from a transport: one per user message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub user_id: String,
    pub payload: InboundPayload,
    pub timestamp: DateTime<Utc>,
}

impl InboundEvent {
    pub fn text(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(user_id, InboundPayload::Text { text: text.into() })
    }

    pub fn voice(user_id: impl Into<String>, attachment: MediaAttachment) -> Self {
        Self::new(user_id, InboundPayload::Voice { attachment })
    }

    pub fn command(user_id: impl Into<String>, command: Command) -> Self {
        Self::new(user_id, InboundPayload::Command { command })
    }

    fn new(user_id: impl Into<String>, payload: InboundPayload) -> Self {
        Self {
            user_id: user_id.into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Commands travel as text.
    pub fn modality(&self) -> Modality {
        match self.payload {
            InboundPayload::Voice { .. } => Modality::Voice,
            InboundPayload::Text { .. } | InboundPayload::Command { .. } => Modality::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse("/new"), Some(Command::Reset));
        assert_eq!(Command::parse("/new_bot"), Some(Command::Reset));
        assert_eq!(Command::parse("  /export now"), Some(Command::Export));
        assert_eq!(Command::parse("/download_conv"), Some(Command::Export));
        assert_eq!(Command::parse("/weather"), None);
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse("new"), None);
    }

    #[test]
    fn test_modality() {
        assert_eq!(InboundEvent::text("u1", "hi").modality(), Modality::Text);
        assert_eq!(
            InboundEvent::command("u1", Command::Export).modality(),
            Modality::Text
        );
        let voice = MediaAttachment::from_bytes(vec![1, 2, 3], "audio/ogg");
        assert_eq!(InboundEvent::voice("u1", voice).modality(), Modality::Voice);
    }

    #[test]
    fn test_attachment_extension() {
        let mut att = MediaAttachment::from_url("https://example.com/v", "audio/ogg");
        assert_eq!(att.extension(), "ogg");
        att.filename = Some("note.m4a".into());
        assert_eq!(att.extension(), "m4a");
        let unknown = MediaAttachment::from_bytes(vec![], "application/octet-stream");
        assert_eq!(unknown.extension(), "bin");
        assert_eq!(unknown.size_bytes, Some(0));
    }

    #[test]
    fn test_event_serde_tag() {
        let event = InboundEvent::text("42", "hello");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["type"], "text");
        assert_eq!(json["payload"]["text"], "hello");
    }
}
