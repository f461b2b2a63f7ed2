//! Telegram adapter using teloxide.
//!
//! One long-poll loop ingests group messages into the buffer and surfaces
//! bot commands to the caller. The adapter also serves the story pipeline
//! as its media transport (file downloads) and delivery channel (outbound
//! sends), including the classification of dead chats.

use crate::buffer::MessageStore;
use crate::media::{FetchError, MediaTransport};
use crate::settings::{Genre, Personality, SettingsStore};
use crate::story::pipeline::{DeliveryError, StoryDelivery};
use crate::ChatId;
use anyhow::Context as _;
use teloxide::payloads::setters::*;
use teloxide::requests::{Request, Requester};
use teloxide::types::{
    ChatId as TgChatId, FileId, MediaKind, MessageKind as TgMessageKind, UpdateKind, UserId,
};
use teloxide::Bot;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};

/// Telegram's hard per-message character limit.
const MAX_MESSAGE_LENGTH: usize = 4096;
/// Stories are split a little below the hard limit to leave room for
/// Markdown artifacts.
const STORY_CHUNK_LIMIT: usize = 4000;
/// Pause between parts of a multi-part story.
const INTER_PART_PAUSE: Duration = Duration::from_millis(500);

const TELEGRAM_LONG_POLL_TIMEOUT_SECS: u32 = 30;
const TELEGRAM_HTTP_TIMEOUT: Duration = Duration::from_secs(35);
const TELEGRAM_GET_UPDATES_RETRY_DELAY: Duration = Duration::from_secs(5);

/// API error fragments that mean the chat is gone for good.
const UNRECOVERABLE_SEND_ERRORS: &[&str] = &[
    "bot was blocked",
    "user is deactivated",
    "chat not found",
    "bot was kicked",
    "chat_write_forbidden",
    "have no rights to send",
    "forbidden",
];

/// Bot command addressed to us in a group chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatCommand {
    /// Generate and deliver a story for this chat right now.
    StoryNow(ChatId),
    /// Enable daily stories for this chat.
    StoryOn(ChatId),
    /// Disable daily stories for this chat.
    StoryOff(ChatId),
    /// Set the story genre. `None` means the argument was missing or
    /// unrecognized and the caller should reply with the accepted names.
    SetGenre(ChatId, Option<Genre>),
    /// Set the narrator personality; `None` as for `SetGenre`.
    SetPersonality(ChatId, Option<Personality>),
    /// Report schedule state, buffer size, and the last run for this chat.
    StoryStatus(ChatId),
}

fn build_telegram_http_client() -> reqwest::Client {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(TELEGRAM_HTTP_TIMEOUT)
        .tcp_nodelay(true);

    const TELOXIDE_PROXY: &str = "TELOXIDE_PROXY";

    if let Ok(proxy) = std::env::var(TELOXIDE_PROXY) {
        match reqwest::Proxy::all(proxy) {
            Ok(proxy) => {
                builder = builder.proxy(proxy);
            }
            Err(error) => {
                tracing::warn!(
                    %error,
                    "invalid TELOXIDE_PROXY URL; using direct Telegram connection"
                );
            }
        }
    }

    match builder.build() {
        Ok(client) => client,
        Err(error) => {
            tracing::warn!(
                %error,
                "failed to create telegram reqwest client with custom timeout, falling back to default client"
            );
            reqwest::Client::new()
        }
    }
}

/// Telegram adapter state.
pub struct TelegramAdapter {
    bot: Bot,
    /// Shared with the Bot; also used for raw file downloads.
    http: reqwest::Client,
    owner_chat_id: Option<i64>,
    bot_user_id: Arc<RwLock<Option<UserId>>>,
    /// Shutdown signal for the polling loop.
    shutdown_tx: Arc<RwLock<Option<mpsc::Sender<()>>>>,
}

impl TelegramAdapter {
    pub fn new(token: impl Into<String>, owner_chat_id: Option<i64>) -> Self {
        let http = build_telegram_http_client();
        let bot = Bot::with_client(token.into(), http.clone());
        Self {
            bot,
            http,
            owner_chat_id,
            bot_user_id: Arc::new(RwLock::new(None)),
            shutdown_tx: Arc::new(RwLock::new(None)),
        }
    }

    /// Start the long-poll ingestion loop.
    ///
    /// Group messages are recorded into `store`; recognized bot commands are
    /// emitted on the returned channel instead of being buffered.
    pub async fn start(
        &self,
        store: MessageStore,
        settings: SettingsStore,
    ) -> crate::error::Result<mpsc::Receiver<ChatCommand>> {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.write().await = Some(shutdown_tx);

        let me = self
            .bot
            .get_me()
            .send()
            .await
            .context("failed to call getMe on Telegram")?;
        *self.bot_user_id.write().await = Some(me.id);
        let bot_username = me.username.clone();
        tracing::info!(
            bot_name = %me.first_name,
            bot_username = ?bot_username,
            "telegram connected"
        );

        let bot = self.bot.clone();
        let bot_user_id = self.bot_user_id.clone();

        tokio::spawn(async move {
            let mut offset = 0i32;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("telegram polling loop shutting down");
                        break;
                    }
                    result = async {
                        let request_started = Instant::now();
                        let result = bot
                            .get_updates()
                            .offset(offset)
                            .timeout(TELEGRAM_LONG_POLL_TIMEOUT_SECS)
                            .send()
                            .await;
                        (request_started, result)
                    } => {
                        let (request_started, result) = result;
                        let updates = match result {
                            Ok(updates) => updates,
                            Err(error) => {
                                tracing::error!(
                                    %error,
                                    elapsed_ms = request_started.elapsed().as_millis(),
                                    "telegram getUpdates failed"
                                );
                                tokio::time::sleep(TELEGRAM_GET_UPDATES_RETRY_DELAY).await;
                                continue;
                            }
                        };

                        for update in updates {
                            offset = update.id.as_offset() as i32;

                            let message = match &update.kind {
                                UpdateKind::Message(message) => message,
                                _ => continue,
                            };

                            // Only group conversations are chronicled.
                            if !message.chat.is_group() && !message.chat.is_supergroup() {
                                continue;
                            }

                            let bot_id = *bot_user_id.read().await;
                            if let Some(from) = &message.from {
                                if bot_id.is_some_and(|id| from.id == id) {
                                    continue;
                                }
                            }

                            let chat_id = message.chat.id.0;

                            if let Some(command) = message
                                .text()
                                .and_then(|text| parse_command(text, bot_username.as_deref(), chat_id))
                            {
                                if command_tx.send(command).await.is_err() {
                                    tracing::warn!("command receiver dropped, stopping poll loop");
                                    return;
                                }
                                continue;
                            }

                            let Some(record) = ingest_message(message) else {
                                continue;
                            };

                            if let Err(error) = settings.ensure_chat(chat_id).await {
                                tracing::error!(chat_id, %error, "failed to register chat");
                            }
                            if let Err(error) = store.upsert(&record).await {
                                tracing::error!(
                                    chat_id,
                                    message_id = record.message_id,
                                    %error,
                                    "failed to buffer message"
                                );
                            }
                        }
                    }
                }
            }
        });

        Ok(command_rx)
    }

    /// Send a plain text reply, splitting when over the hard limit.
    pub async fn send_text(&self, chat_id: ChatId, text: &str) -> crate::error::Result<()> {
        for chunk in split_message(text, MAX_MESSAGE_LENGTH) {
            self.bot
                .send_message(TgChatId(chat_id), &chunk)
                .send()
                .await
                .context("failed to send telegram message")?;
        }
        Ok(())
    }

    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.read().await.as_ref() {
            tx.send(()).await.ok();
        }
        tracing::info!("telegram adapter shut down");
    }
}

impl MediaTransport for TelegramAdapter {
    async fn fetch_file_bytes(&self, file_ref: &str) -> Result<Vec<u8>, FetchError> {
        let file = self
            .bot
            .get_file(FileId(file_ref.to_string()))
            .send()
            .await
            .map_err(classify_api_error)?;

        let mut url = self.bot.api_url();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| FetchError::Fatal("cannot-be-a-base API URL".into()))?;
            segments.push("file");
            segments.push(&format!("bot{}", self.bot.token()));
            segments.push(&file.path);
        }

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|error| FetchError::Transient(error.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(FetchError::Transient(format!("download status {status}")));
        }
        if !status.is_success() {
            return Err(FetchError::Fatal(format!("download status {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|error| FetchError::Transient(error.to_string()))?;
        Ok(bytes.to_vec())
    }
}

impl StoryDelivery for TelegramAdapter {
    async fn deliver_story(
        &self,
        chat_id: ChatId,
        text: &str,
        note: Option<&str>,
    ) -> Result<(), DeliveryError> {
        let chunks = split_message(text, STORY_CHUNK_LIMIT);
        for (index, chunk) in chunks.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(INTER_PART_PAUSE).await;
            }
            self.bot
                .send_message(TgChatId(chat_id), chunk)
                .send()
                .await
                .map_err(classify_send_error)?;
        }
        // The story is out; a lost follow-up note is not worth a retry.
        if let Some(note) = note {
            if let Err(error) = self
                .bot
                .send_message(TgChatId(chat_id), format!("ℹ️ {note}"))
                .send()
                .await
            {
                tracing::warn!(chat_id, %error, "failed to send story note");
            }
        }
        Ok(())
    }

    async fn deliver_notice(&self, chat_id: ChatId, note: &str) -> Result<(), DeliveryError> {
        self.bot
            .send_message(TgChatId(chat_id), format!("😕 {note}"))
            .send()
            .await
            .map_err(classify_send_error)?;
        Ok(())
    }

    async fn notify_operator(&self, text: &str) {
        let Some(owner) = self.owner_chat_id else {
            tracing::debug!("no owner chat configured, dropping operator notice");
            return;
        };
        if let Err(error) = self.send_text(owner, &format!("🚨 {text}")).await {
            tracing::error!(%error, "failed to notify operator");
        }
    }
}

// -- Helper functions --

fn classify_api_error(error: teloxide::RequestError) -> FetchError {
    match &error {
        teloxide::RequestError::Network(_)
        | teloxide::RequestError::Io(_)
        | teloxide::RequestError::RetryAfter(_) => FetchError::Transient(error.to_string()),
        _ => FetchError::Fatal(error.to_string()),
    }
}

/// Decide whether a send failure means the chat is permanently unreachable.
fn is_unrecoverable_send_error(description: &str) -> bool {
    let description = description.to_lowercase();
    UNRECOVERABLE_SEND_ERRORS
        .iter()
        .any(|fragment| description.contains(fragment))
}

fn classify_send_error(error: teloxide::RequestError) -> DeliveryError {
    let description = error.to_string();
    if is_unrecoverable_send_error(&description) {
        DeliveryError::Unrecoverable(description)
    } else {
        DeliveryError::Recoverable(description)
    }
}

/// Parse a `/story_*` command, honoring an optional `@botname` suffix.
fn parse_command(text: &str, bot_username: Option<&str>, chat_id: ChatId) -> Option<ChatCommand> {
    let mut tokens = text.split_whitespace();
    let first = tokens.next()?;
    if !first.starts_with('/') {
        return None;
    }

    let (command, target) = match first.split_once('@') {
        Some((command, target)) => (command, Some(target)),
        None => (first, None),
    };
    // A command addressed to another bot in the chat is not for us.
    if let (Some(target), Some(username)) = (target, bot_username) {
        if !target.eq_ignore_ascii_case(username) {
            return None;
        }
    }

    match command {
        "/story_now" => Some(ChatCommand::StoryNow(chat_id)),
        "/story_on" => Some(ChatCommand::StoryOn(chat_id)),
        "/story_off" => Some(ChatCommand::StoryOff(chat_id)),
        "/story_status" => Some(ChatCommand::StoryStatus(chat_id)),
        "/story_genre" => Some(ChatCommand::SetGenre(
            chat_id,
            tokens.next().and_then(Genre::from_name),
        )),
        "/story_personality" => Some(ChatCommand::SetPersonality(
            chat_id,
            tokens.next().and_then(Personality::from_name),
        )),
        _ => None,
    }
}

/// Convert a Telegram update into a buffer record. `None` means the message
/// carries nothing we chronicle.
fn ingest_message(message: &teloxide::types::Message) -> Option<crate::Message> {
    let from = message.from.as_ref()?;
    let TgMessageKind::Common(common) = &message.kind else {
        return None;
    };

    let mut record = crate::Message {
        chat_id: message.chat.id.0,
        message_id: i64::from(message.id.0),
        user_id: from.id.0 as i64,
        display_name: build_display_name(from),
        timestamp: message.date,
        kind: crate::MessageKind::Unknown,
        text: None,
        file_ref: None,
        file_unique_ref: None,
        file_name: None,
    };

    match &common.media_kind {
        MediaKind::Text(text) => {
            record.kind = crate::MessageKind::Text;
            record.text = Some(text.text.clone());
        }
        MediaKind::Photo(photo) => {
            record.kind = crate::MessageKind::Photo;
            record.text = photo.caption.clone();
            // Largest size carries the most useful detail.
            if let Some(largest) = photo.photo.last() {
                record.file_ref = Some(largest.file.id.to_string());
                record.file_unique_ref = Some(largest.file.unique_id.to_string());
            }
        }
        MediaKind::Video(video) => {
            record.kind = crate::MessageKind::Video;
            record.text = video.caption.clone();
            record.file_name = video.video.file_name.clone();
        }
        MediaKind::Voice(voice) => {
            record.kind = crate::MessageKind::Voice;
            record.text = voice.caption.clone();
        }
        MediaKind::Audio(audio) => {
            record.kind = crate::MessageKind::Audio;
            record.text = audio.caption.clone();
            record.file_name = audio.audio.file_name.clone();
        }
        MediaKind::VideoNote(_) => {
            record.kind = crate::MessageKind::VideoNote;
        }
        MediaKind::Document(doc) => {
            record.kind = crate::MessageKind::Document;
            record.text = doc.caption.clone();
            record.file_name = doc.document.file_name.clone();
        }
        MediaKind::Sticker(sticker) => {
            record.kind = crate::MessageKind::Sticker;
            record.text = sticker.sticker.emoji.clone();
        }
        _ => return None,
    }

    Some(record)
}

/// Build a display name from a Telegram user, preferring full name.
fn build_display_name(user: &teloxide::types::User) -> String {
    let first = &user.first_name;
    match &user.last_name {
        Some(last) => format!("{first} {last}"),
        None => first.clone(),
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Split a message into chunks that fit within Telegram's character limit.
/// Tries to split at newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let window_end = floor_char_boundary(remaining, max_len);
        let window = &remaining[..window_end];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&at| at > 0)
            .unwrap_or(window_end);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}
