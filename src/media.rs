//! Image fetching for story generation.
//!
//! `fetch_image` wraps the raw transport with retry, timeout, and size
//! policy. `download_images` fans out one concurrent fetch per selected
//! photo and waits for every fetch to settle; a failed or skipped download
//! never cancels its siblings and never fails the batch. The caller gets a
//! map of whatever bytes were actually obtained.

use crate::{ChatId, Message, MessageKind};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Hard ceiling on a single downloaded image (the generation API rejects
/// larger inline blobs).
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Error from the raw media transport, pre-classified for retry purposes.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Network/service hiccup; worth another attempt.
    #[error("transient transport error: {0}")]
    Transient(String),
    /// Anything else: bad file reference, decode failure, programming error.
    #[error("{0}")]
    Fatal(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// The raw "give me bytes for this file reference" primitive. The Telegram
/// adapter implements this; tests substitute their own.
pub trait MediaTransport: Send + Sync {
    fn fetch_file_bytes(
        &self,
        file_ref: &str,
    ) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

impl<T: MediaTransport> MediaTransport for Arc<T> {
    fn fetch_file_bytes(
        &self,
        file_ref: &str,
    ) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send {
        (**self).fetch_file_bytes(file_ref)
    }
}

/// Explicit retry policy applied at the image-fetch boundary. The layers
/// above stay retry-agnostic.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub backoff: Duration,
    /// Per-fetch deadline. A timeout is conclusive, not retried.
    pub fetch_timeout: Duration,
    /// Which errors are worth another attempt.
    pub retryable: fn(&FetchError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(3),
            fetch_timeout: Duration::from_secs(30),
            retryable: FetchError::is_transient,
        }
    }
}

/// Fetch one image with retry, timeout, and size limits.
///
/// Always resolves to bytes-or-absence; no error escapes to the caller.
pub async fn fetch_image<T: MediaTransport>(
    transport: &T,
    file_ref: &str,
    chat_id: ChatId,
    policy: &RetryPolicy,
) -> Option<Vec<u8>> {
    for attempt in 1..=policy.max_attempts {
        let result = tokio::time::timeout(
            policy.fetch_timeout,
            transport.fetch_file_bytes(file_ref),
        )
        .await;

        match result {
            Err(_) => {
                tracing::error!(chat_id, file_ref, "image download timed out");
                return None;
            }
            Ok(Ok(bytes)) => {
                if bytes.len() > MAX_IMAGE_BYTES {
                    tracing::warn!(
                        chat_id,
                        file_ref,
                        size = bytes.len(),
                        "image exceeds size cap, skipping"
                    );
                    return None;
                }
                tracing::debug!(chat_id, file_ref, size = bytes.len(), "image downloaded");
                return Some(bytes);
            }
            Ok(Err(error)) => {
                if (policy.retryable)(&error) && attempt < policy.max_attempts {
                    tracing::warn!(
                        chat_id,
                        file_ref,
                        attempt,
                        %error,
                        "image download failed, retrying"
                    );
                    tokio::time::sleep(policy.backoff).await;
                    continue;
                }
                tracing::error!(chat_id, file_ref, attempt, %error, "image download failed");
                return None;
            }
        }
    }
    None
}

/// Pick which photos to download: photo-kind messages carrying both a file
/// reference and a dedup key, chronologically earliest first, deduplicated
/// by `file_unique_ref`, at most `max_count` of them.
fn select_photo_refs(messages: &[Message], max_count: usize) -> Vec<(String, String)> {
    let mut photos: Vec<&Message> = messages
        .iter()
        .filter(|m| {
            m.kind == MessageKind::Photo && m.file_ref.is_some() && m.file_unique_ref.is_some()
        })
        .collect();
    photos.sort_by_key(|m| m.timestamp);

    let mut seen = HashSet::new();
    let mut selected = Vec::new();
    for message in photos {
        if selected.len() >= max_count {
            break;
        }
        // Both refs checked present in the filter above.
        let (Some(unique_ref), Some(file_ref)) = (&message.file_unique_ref, &message.file_ref)
        else {
            continue;
        };
        if seen.insert(unique_ref.clone()) {
            selected.push((unique_ref.clone(), file_ref.clone()));
        }
    }
    selected
}

/// Download up to `max_count` distinct photos referenced by `messages`.
///
/// All selected fetches run concurrently; the call returns once every fetch
/// has settled. The map contains only references whose bytes were obtained.
pub async fn download_images<T: MediaTransport>(
    transport: &T,
    messages: &[Message],
    chat_id: ChatId,
    max_count: usize,
    policy: &RetryPolicy,
) -> HashMap<String, Vec<u8>> {
    let selected = select_photo_refs(messages, max_count);
    if selected.is_empty() {
        tracing::debug!(chat_id, "no photos to download");
        return HashMap::new();
    }

    tracing::info!(
        chat_id,
        count = selected.len(),
        "downloading photos for story"
    );

    let fetches = selected.iter().map(|(unique_ref, file_ref)| async move {
        let bytes = fetch_image(transport, file_ref, chat_id, policy).await;
        (unique_ref.clone(), bytes)
    });

    let mut images = HashMap::new();
    for (unique_ref, bytes) in join_all(fetches).await {
        if let Some(bytes) = bytes {
            images.insert(unique_ref, bytes);
        }
    }

    tracing::info!(
        chat_id,
        downloaded = images.len(),
        requested = selected.len(),
        "photo downloads settled"
    );
    images
}
