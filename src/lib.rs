//! Chronicler: a Telegram bot that turns a day of chat messages into an
//! AI-written story, delivered once per day or on demand.

pub mod buffer;
pub mod config;
pub mod db;
pub mod error;
pub mod media;
pub mod scheduler;
pub mod settings;
pub mod story;
pub mod telegram;

pub use error::{Error, Result};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Telegram chat identifier.
pub type ChatId = i64;

/// Kind of a buffered chat message.
///
/// Unrecognized kinds decode to `Unknown` rather than failing, so a newer
/// ingester never poisons an older reader.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Photo,
    Video,
    Audio,
    Voice,
    VideoNote,
    Document,
    Sticker,
    Unknown,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageKind::Text => "text",
            MessageKind::Photo => "photo",
            MessageKind::Video => "video",
            MessageKind::Audio => "audio",
            MessageKind::Voice => "voice",
            MessageKind::VideoNote => "video_note",
            MessageKind::Document => "document",
            MessageKind::Sticker => "sticker",
            MessageKind::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for MessageKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "text" => MessageKind::Text,
            "photo" => MessageKind::Photo,
            "video" => MessageKind::Video,
            "audio" => MessageKind::Audio,
            "voice" => MessageKind::Voice,
            "video_note" => MessageKind::VideoNote,
            "document" => MessageKind::Document,
            "sticker" => MessageKind::Sticker,
            _ => MessageKind::Unknown,
        })
    }
}

/// One buffered chat event. Constructed once at ingestion and passed by
/// reference through the pipeline.
///
/// `(chat_id, message_id)` is the identity key; re-ingesting the same pair
/// replaces the prior record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub chat_id: ChatId,
    pub message_id: i64,
    pub user_id: i64,
    pub display_name: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
    /// Body text or media caption.
    pub text: Option<String>,
    /// Opaque download handle for media (Telegram file id).
    pub file_ref: Option<String>,
    /// Stable dedup key; distinct messages may reference the same file.
    pub file_unique_ref: Option<String>,
    /// Original filename for documents and audio.
    pub file_name: Option<String>,
}

/// One atomic unit in the payload sent to the generation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    Image { mime_type: String, data: Vec<u8> },
}

/// Normalized result of one generation call.
///
/// When `narrative` is `None`, `note` is always populated with a diagnostic
/// the chat (or the operator) can act on; callers never see `(None, None)`.
#[derive(Debug, Clone, Default)]
pub struct GenerationOutcome {
    pub narrative: Option<String>,
    pub note: Option<String>,
}

impl GenerationOutcome {
    pub fn narrative(text: impl Into<String>) -> Self {
        Self {
            narrative: Some(text.into()),
            note: None,
        }
    }

    pub fn note(text: impl Into<String>) -> Self {
        Self {
            narrative: None,
            note: Some(text.into()),
        }
    }
}

/// Result of one full orchestrator pass over all enabled chats.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    /// Chats whose story was delivered and whose buffer was cleared.
    pub processed: usize,
    /// Chats that were candidates at run start.
    pub total: usize,
    /// Per-chat failures, in processing order.
    pub errors: Vec<(ChatId, String)>,
}

impl RunSummary {
    pub fn new(total: usize) -> Self {
        Self {
            started_at: Utc::now(),
            processed: 0,
            total,
            errors: Vec::new(),
        }
    }

    /// Free-text digest for the operator notification.
    pub fn digest(&self) -> String {
        let mut text = format!(
            "Story run finished: {}/{} chats delivered.",
            self.processed, self.total
        );
        if !self.errors.is_empty() {
            text.push_str("\nFailures:");
            for (chat_id, error) in &self.errors {
                text.push_str(&format!("\n- chat {chat_id}: {error}"));
            }
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_kind_round_trips_known_values() {
        for kind in [
            MessageKind::Text,
            MessageKind::Photo,
            MessageKind::VideoNote,
            MessageKind::Sticker,
        ] {
            let parsed: MessageKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn message_kind_defaults_unrecognized_to_unknown() {
        let parsed: MessageKind = "hologram".parse().unwrap();
        assert_eq!(parsed, MessageKind::Unknown);
    }

    #[test]
    fn run_summary_digest_lists_failures() {
        let mut summary = RunSummary::new(3);
        summary.processed = 2;
        summary.errors.push((-100123, "generation failed".into()));

        let digest = summary.digest();
        assert!(digest.contains("2/3"));
        assert!(digest.contains("chat -100123"));
        assert!(digest.contains("generation failed"));
    }
}
