//! Per-chat message buffer (SQLite).
//!
//! The buffer is append-only from the ingestion side and read/cleared by the
//! story pipeline. `(chat_id, message_id)` is the identity key: re-ingesting
//! the same pair replaces the prior record, so edited messages overwrite
//! their original capture.

use crate::error::Result;
use crate::{ChatId, Message, MessageKind};
use chrono::{DateTime, Utc};
use sqlx::Row as _;
use sqlx::SqlitePool;

/// Message buffer store.
#[derive(Debug, Clone)]
pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace one message (idempotent upsert).
    pub async fn upsert(&self, message: &Message) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (
                chat_id, message_id, user_id, display_name, timestamp,
                kind, content, file_ref, file_unique_ref, file_name
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chat_id, message_id) DO UPDATE SET
                user_id = excluded.user_id,
                display_name = excluded.display_name,
                timestamp = excluded.timestamp,
                kind = excluded.kind,
                content = excluded.content,
                file_ref = excluded.file_ref,
                file_unique_ref = excluded.file_unique_ref,
                file_name = excluded.file_name
            "#,
        )
        .bind(message.chat_id)
        .bind(message.message_id)
        .bind(message.user_id)
        .bind(&message.display_name)
        .bind(message.timestamp)
        .bind(message.kind.to_string())
        .bind(&message.text)
        .bind(&message.file_ref)
        .bind(&message.file_unique_ref)
        .bind(&message.file_name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// All buffered messages for a chat, oldest first.
    pub async fn messages_for_chat(&self, chat_id: ChatId) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT chat_id, message_id, user_id, display_name, timestamp,
                   kind, content, file_ref, file_unique_ref, file_name
            FROM messages
            WHERE chat_id = ?
            ORDER BY timestamp ASC, message_id ASC
            "#,
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;

        let messages = rows
            .into_iter()
            .map(|row| Message {
                chat_id: row.try_get("chat_id").unwrap_or_default(),
                message_id: row.try_get("message_id").unwrap_or_default(),
                user_id: row.try_get("user_id").unwrap_or_default(),
                display_name: row.try_get("display_name").unwrap_or_default(),
                timestamp: row
                    .try_get::<DateTime<Utc>, _>("timestamp")
                    .unwrap_or_default(),
                kind: row
                    .try_get::<String, _>("kind")
                    .unwrap_or_default()
                    .parse()
                    .unwrap_or(MessageKind::Unknown),
                text: row.try_get("content").ok().flatten(),
                file_ref: row.try_get("file_ref").ok().flatten(),
                file_unique_ref: row.try_get("file_unique_ref").ok().flatten(),
                file_name: row.try_get("file_name").ok().flatten(),
            })
            .collect();

        Ok(messages)
    }

    /// Delete all buffered messages for a chat. Returns the number removed.
    pub async fn clear_chat(&self, chat_id: ChatId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM messages WHERE chat_id = ?")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::info!(chat_id, deleted, "chat buffer cleared");
        }
        Ok(deleted)
    }

    /// Distinct chats that currently have buffered messages.
    pub async fn chats_with_messages(&self) -> Result<Vec<ChatId>> {
        let rows = sqlx::query("SELECT DISTINCT chat_id FROM messages")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| row.try_get("chat_id").ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use chrono::TimeZone as _;

    fn text_message(chat_id: ChatId, message_id: i64, minute: u32, body: &str) -> Message {
        Message {
            chat_id,
            message_id,
            user_id: 7,
            display_name: "Ann".into(),
            timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 12, minute, 0).unwrap(),
            kind: MessageKind::Text,
            text: Some(body.into()),
            file_ref: None,
            file_unique_ref: None,
            file_name: None,
        }
    }

    #[tokio::test]
    async fn upsert_replaces_same_identity_key() {
        let db = Db::connect_memory().await.unwrap();
        let store = MessageStore::new(db.pool.clone());

        store.upsert(&text_message(1, 10, 0, "first")).await.unwrap();
        store
            .upsert(&text_message(1, 10, 0, "edited"))
            .await
            .unwrap();

        let messages = store.messages_for_chat(1).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text.as_deref(), Some("edited"));
    }

    #[tokio::test]
    async fn messages_come_back_in_timestamp_order() {
        let db = Db::connect_memory().await.unwrap();
        let store = MessageStore::new(db.pool.clone());

        store.upsert(&text_message(1, 2, 30, "later")).await.unwrap();
        store
            .upsert(&text_message(1, 1, 10, "earlier"))
            .await
            .unwrap();

        let messages = store.messages_for_chat(1).await.unwrap();
        assert_eq!(messages[0].text.as_deref(), Some("earlier"));
        assert_eq!(messages[1].text.as_deref(), Some("later"));
    }

    #[tokio::test]
    async fn clear_only_touches_the_target_chat() {
        let db = Db::connect_memory().await.unwrap();
        let store = MessageStore::new(db.pool.clone());

        store.upsert(&text_message(1, 1, 0, "keep")).await.unwrap();
        store.upsert(&text_message(2, 1, 0, "drop")).await.unwrap();

        let deleted = store.clear_chat(2).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.messages_for_chat(1).await.unwrap().len(), 1);
        assert!(store.messages_for_chat(2).await.unwrap().is_empty());

        let chats = store.chats_with_messages().await.unwrap();
        assert_eq!(chats, vec![1]);
    }
}
