//! Per-chat story pipeline and the run-everything orchestrator.
//!
//! The buffer is the source of truth for what still needs narrating. It is
//! cleared only after a story is confirmed delivered; every other outcome
//! leaves it intact so the content is retried on the next run. The one
//! exception is a dead chat (blocked, kicked, deleted), which is cleared and
//! disabled so it stops consuming work.

use crate::buffer::MessageStore;
use crate::error::Result;
use crate::media::{self, MediaTransport, RetryPolicy};
use crate::settings::SettingsStore;
use crate::story::generator::Generator;
use crate::story::prompt;
use crate::{ChatId, RunSummary};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Pause between consecutive chats in a full run, to stay well inside
/// Telegram's send limits.
pub const INTER_CHAT_PAUSE: Duration = Duration::from_secs(5);

/// Delivery failure, classified by whether the chat is worth keeping.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Transient send failure; the buffer is retained and retried later.
    #[error("delivery failed: {0}")]
    Recoverable(String),
    /// The chat is gone for good (bot blocked, kicked, chat deleted).
    #[error("chat unreachable: {0}")]
    Unrecoverable(String),
}

/// Outbound side of the pipeline. The Telegram adapter implements this;
/// tests substitute a recorder.
pub trait StoryDelivery: Send + Sync {
    /// Send the generated story to the chat. A note accompanying a
    /// successful generation is delivered alongside the story.
    fn deliver_story(
        &self,
        chat_id: ChatId,
        text: &str,
        note: Option<&str>,
    ) -> impl Future<Output = std::result::Result<(), DeliveryError>> + Send;

    /// Send a short diagnostic notice to the chat instead of a story.
    fn deliver_notice(
        &self,
        chat_id: ChatId,
        note: &str,
    ) -> impl Future<Output = std::result::Result<(), DeliveryError>> + Send;

    /// Best-effort message to the operator. Failures are logged, not raised.
    fn notify_operator(&self, text: &str) -> impl Future<Output = ()> + Send;
}

impl<D: StoryDelivery> StoryDelivery for Arc<D> {
    fn deliver_story(
        &self,
        chat_id: ChatId,
        text: &str,
        note: Option<&str>,
    ) -> impl Future<Output = std::result::Result<(), DeliveryError>> + Send {
        (**self).deliver_story(chat_id, text, note)
    }

    fn deliver_notice(
        &self,
        chat_id: ChatId,
        note: &str,
    ) -> impl Future<Output = std::result::Result<(), DeliveryError>> + Send {
        (**self).deliver_notice(chat_id, note)
    }

    fn notify_operator(&self, text: &str) -> impl Future<Output = ()> + Send {
        (**self).notify_operator(text)
    }
}

/// What happened to one chat during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatOutcome {
    /// Nothing buffered, nothing sent.
    Skipped,
    /// Story delivered and buffer cleared.
    Delivered,
    /// Generation produced no story; a diagnostic notice was sent and the
    /// buffer was retained for the next run.
    NoticeDelivered(String),
    /// Send failed recoverably; buffer retained.
    Retained(String),
    /// The chat is unreachable; buffer cleared and stories disabled.
    Disabled(String),
}

/// Everything needed to turn one chat's buffer into a delivered story.
pub struct StoryPipeline<T, G, D> {
    store: MessageStore,
    settings: SettingsStore,
    transport: T,
    generator: G,
    delivery: D,
    max_photos: usize,
    retry: RetryPolicy,
    inter_chat_pause: Duration,
}

impl<T, G, D> StoryPipeline<T, G, D>
where
    T: MediaTransport,
    G: Generator,
    D: StoryDelivery,
{
    pub fn new(
        store: MessageStore,
        settings: SettingsStore,
        transport: T,
        generator: G,
        delivery: D,
        max_photos: usize,
    ) -> Self {
        Self {
            store,
            settings,
            transport,
            generator,
            delivery,
            max_photos,
            retry: RetryPolicy::default(),
            inter_chat_pause: INTER_CHAT_PAUSE,
        }
    }

    /// Override the retry policy and inter-chat pause.
    pub fn with_timing(mut self, retry: RetryPolicy, inter_chat_pause: Duration) -> Self {
        self.retry = retry;
        self.inter_chat_pause = inter_chat_pause;
        self
    }

    /// Run the full pipeline for one chat.
    pub async fn process_chat(&self, chat_id: ChatId) -> Result<ChatOutcome> {
        let messages = self.store.messages_for_chat(chat_id).await?;
        if messages.is_empty() {
            tracing::debug!(chat_id, "buffer empty, skipping");
            return Ok(ChatOutcome::Skipped);
        }

        let settings = self.settings.get(chat_id).await?;
        tracing::info!(
            chat_id,
            messages = messages.len(),
            genre = %settings.genre,
            personality = %settings.personality,
            "processing chat"
        );

        let images = media::download_images(
            &self.transport,
            &messages,
            chat_id,
            self.max_photos,
            &self.retry,
        )
        .await;

        let Some(parts) = prompt::assemble(&messages, &images, settings.genre, settings.personality)
        else {
            tracing::warn!(chat_id, "buffer yielded no assemblable content");
            return Ok(ChatOutcome::Retained("no assemblable content".to_string()));
        };

        let outcome = self.generator.generate(&parts).await;

        if let Some(story) = outcome.narrative {
            let photo_note = if images.is_empty() {
                String::new()
            } else {
                format!(" (with analysis of up to {} photos)", self.max_photos)
            };
            let story = format!("📝 Story of the day{photo_note}:\n\n{story}");
            return match self
                .delivery
                .deliver_story(chat_id, &story, outcome.note.as_deref())
                .await
            {
                Ok(()) => {
                    self.store.clear_chat(chat_id).await?;
                    tracing::info!(chat_id, "story delivered");
                    Ok(ChatOutcome::Delivered)
                }
                Err(error) => self.handle_delivery_error(chat_id, error).await,
            };
        }

        let note = outcome
            .note
            .unwrap_or_else(|| "Story generation produced no result.".to_string());
        tracing::warn!(chat_id, note, "no story generated, sending notice");
        match self.delivery.deliver_notice(chat_id, &note).await {
            Ok(()) => Ok(ChatOutcome::NoticeDelivered(note)),
            Err(error) => self.handle_delivery_error(chat_id, error).await,
        }
    }

    async fn handle_delivery_error(
        &self,
        chat_id: ChatId,
        error: DeliveryError,
    ) -> Result<ChatOutcome> {
        match error {
            DeliveryError::Recoverable(message) => {
                tracing::warn!(chat_id, message, "delivery failed, buffer retained");
                Ok(ChatOutcome::Retained(message))
            }
            DeliveryError::Unrecoverable(message) => {
                tracing::warn!(chat_id, message, "chat unreachable, disabling");
                self.store.clear_chat(chat_id).await?;
                self.settings.set_enabled(chat_id, false).await?;
                Ok(ChatOutcome::Disabled(message))
            }
        }
    }

    /// Process every enabled chat sequentially. Unless the run had nothing to
    /// do, the operator gets a digest at the end. One chat's failure never
    /// aborts the run.
    pub async fn run_all(&self) -> RunSummary {
        let chats = match self.settings.list_enabled().await {
            Ok(chats) => chats,
            Err(error) => {
                tracing::error!(%error, "failed to list enabled chats");
                let mut summary = RunSummary::new(0);
                summary.errors.push((0, format!("failed to list chats: {error}")));
                self.delivery.notify_operator(&summary.digest()).await;
                return summary;
            }
        };

        tracing::info!(chats = chats.len(), "starting story run");
        let mut summary = RunSummary::new(chats.len());

        for (index, chat_id) in chats.iter().copied().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.inter_chat_pause).await;
            }
            match self.process_chat(chat_id).await {
                Ok(ChatOutcome::Delivered) => summary.processed += 1,
                Ok(ChatOutcome::Skipped) => {}
                Ok(ChatOutcome::NoticeDelivered(note)) => {
                    summary.errors.push((chat_id, note));
                }
                Ok(ChatOutcome::Retained(message)) => {
                    summary.errors.push((chat_id, message));
                }
                Ok(ChatOutcome::Disabled(message)) => {
                    summary
                        .errors
                        .push((chat_id, format!("disabled: {message}")));
                }
                Err(error) => {
                    tracing::error!(chat_id, %error, "chat processing failed");
                    summary.errors.push((chat_id, error.to_string()));
                }
            }
        }

        tracing::info!(
            delivered = summary.processed,
            total = summary.total,
            failures = summary.errors.len(),
            "story run finished"
        );
        if summary.total > 0 || !summary.errors.is_empty() {
            self.delivery.notify_operator(&summary.digest()).await;
        }
        summary
    }
}
