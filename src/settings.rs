//! Per-chat story settings (SQLite).
//!
//! A chat gets a settings row the first time a message from it is ingested.
//! The enabled flag gates the daily run; genre and personality flavor the
//! generated story. Unknown stored values decode to the defaults so schema
//! drift never breaks a run.

use crate::error::Result;
use crate::ChatId;
use serde::{Deserialize, Serialize};
use sqlx::Row as _;
use sqlx::SqlitePool;

/// Story genre for a chat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Genre {
    #[default]
    Default,
    Humor,
    Detective,
    Fantasy,
    NewsReport,
}

impl Genre {
    /// Accepted names, in the order shown to users.
    pub const NAMES: &'static [&'static str] =
        &["default", "humor", "detective", "fantasy", "news_report"];

    /// Strict lookup used for command arguments. Unlike `FromStr`, an
    /// unknown name is rejected instead of falling back to the default.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "default" => Genre::Default,
            "humor" => Genre::Humor,
            "detective" => Genre::Detective,
            "fantasy" => Genre::Fantasy,
            "news_report" => Genre::NewsReport,
            _ => return None,
        })
    }
}

impl std::fmt::Display for Genre {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Genre::Default => "default",
            Genre::Humor => "humor",
            Genre::Detective => "detective",
            Genre::Fantasy => "fantasy",
            Genre::NewsReport => "news_report",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for Genre {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::from_name(s).unwrap_or_default())
    }
}

/// Narrator personality for a chat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Personality {
    #[default]
    Neutral,
    Wise,
    Sarcastic,
    Poet,
}

impl Personality {
    pub const NAMES: &'static [&'static str] = &["neutral", "wise", "sarcastic", "poet"];

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "neutral" => Personality::Neutral,
            "wise" => Personality::Wise,
            "sarcastic" => Personality::Sarcastic,
            "poet" => Personality::Poet,
            _ => return None,
        })
    }
}

impl std::fmt::Display for Personality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Personality::Neutral => "neutral",
            Personality::Wise => "wise",
            Personality::Sarcastic => "sarcastic",
            Personality::Poet => "poet",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for Personality {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::from_name(s).unwrap_or_default())
    }
}

/// Settings for one chat.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub chat_id: ChatId,
    pub enabled: bool,
    pub genre: Genre,
    pub personality: Personality,
}

impl ChatSettings {
    fn defaults(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            enabled: true,
            genre: Genre::Default,
            personality: Personality::Neutral,
        }
    }
}

/// Settings store for persistence.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    pool: SqlitePool,
}

impl SettingsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a default settings row for a chat if none exists yet.
    pub async fn ensure_chat(&self, chat_id: ChatId) -> Result<()> {
        sqlx::query("INSERT INTO chat_settings (chat_id) VALUES (?) ON CONFLICT(chat_id) DO NOTHING")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Settings for a chat; defaults when the chat has no row.
    pub async fn get(&self, chat_id: ChatId) -> Result<ChatSettings> {
        let row = sqlx::query(
            "SELECT chat_id, enabled, genre, personality FROM chat_settings WHERE chat_id = ?",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(ChatSettings::defaults(chat_id));
        };

        Ok(ChatSettings {
            chat_id,
            enabled: row.try_get::<i64, _>("enabled").unwrap_or(1) != 0,
            genre: row
                .try_get::<String, _>("genre")
                .unwrap_or_default()
                .parse()
                .unwrap_or_default(),
            personality: row
                .try_get::<String, _>("personality")
                .unwrap_or_default()
                .parse()
                .unwrap_or_default(),
        })
    }

    /// Chats with the daily story enabled, in insertion order.
    pub async fn list_enabled(&self) -> Result<Vec<ChatId>> {
        let rows = sqlx::query(
            "SELECT chat_id FROM chat_settings WHERE enabled = 1 ORDER BY created_at ASC, chat_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| row.try_get("chat_id").ok())
            .collect())
    }

    /// Toggle the daily story for a chat. Used both by chat commands and by
    /// dead-chat detection.
    pub async fn set_enabled(&self, chat_id: ChatId, enabled: bool) -> Result<()> {
        self.ensure_chat(chat_id).await?;
        sqlx::query("UPDATE chat_settings SET enabled = ? WHERE chat_id = ?")
            .bind(enabled as i64)
            .bind(chat_id)
            .execute(&self.pool)
            .await?;

        tracing::info!(chat_id, enabled, "chat schedule updated");
        Ok(())
    }

    pub async fn set_genre(&self, chat_id: ChatId, genre: Genre) -> Result<()> {
        self.ensure_chat(chat_id).await?;
        sqlx::query("UPDATE chat_settings SET genre = ? WHERE chat_id = ?")
            .bind(genre.to_string())
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_personality(&self, chat_id: ChatId, personality: Personality) -> Result<()> {
        self.ensure_chat(chat_id).await?;
        sqlx::query("UPDATE chat_settings SET personality = ? WHERE chat_id = ?")
            .bind(personality.to_string())
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
