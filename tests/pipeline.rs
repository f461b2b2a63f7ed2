//! End-to-end story pipeline tests against an in-memory database, with
//! scripted transport, generation, and delivery backends.

use chronicler::buffer::MessageStore;
use chronicler::db::Db;
use chronicler::media::{FetchError, MediaTransport, RetryPolicy};
use chronicler::settings::SettingsStore;
use chronicler::story::generator::Generator;
use chronicler::story::pipeline::{ChatOutcome, DeliveryError, StoryDelivery, StoryPipeline};
use chronicler::{ChatId, ContentPart, GenerationOutcome, Message, MessageKind};
use chrono::{TimeZone as _, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Transport backed by a fixed file map.
#[derive(Default)]
struct MapTransport {
    files: HashMap<String, Vec<u8>>,
}

impl MediaTransport for MapTransport {
    async fn fetch_file_bytes(&self, file_ref: &str) -> Result<Vec<u8>, FetchError> {
        self.files
            .get(file_ref)
            .cloned()
            .ok_or_else(|| FetchError::Fatal(format!("unknown file {file_ref}")))
    }
}

/// Generator that replays a scripted sequence of outcomes.
struct ScriptedGenerator {
    outcomes: Mutex<Vec<GenerationOutcome>>,
    /// Part counts of each received request.
    requests: Mutex<Vec<usize>>,
}

impl ScriptedGenerator {
    fn new(outcomes: Vec<GenerationOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl Generator for ScriptedGenerator {
    async fn generate(&self, parts: &[ContentPart]) -> GenerationOutcome {
        self.requests.lock().unwrap().push(parts.len());
        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.is_empty() {
            GenerationOutcome::note("script exhausted")
        } else {
            outcomes.remove(0)
        }
    }
}

#[derive(Clone, Copy)]
enum SendFailure {
    Recoverable,
    Unrecoverable,
}

/// Delivery recorder with optional per-chat scripted failures.
#[derive(Default)]
struct RecordingDelivery {
    stories: Mutex<Vec<(ChatId, String, Option<String>)>>,
    notices: Mutex<Vec<(ChatId, String)>>,
    operator: Mutex<Vec<String>>,
    failures: Mutex<HashMap<ChatId, SendFailure>>,
}

impl RecordingDelivery {
    fn fail_chat(&self, chat_id: ChatId, failure: SendFailure) {
        self.failures.lock().unwrap().insert(chat_id, failure);
    }

    fn send_result(&self, chat_id: ChatId) -> Result<(), DeliveryError> {
        match self.failures.lock().unwrap().get(&chat_id) {
            Some(SendFailure::Recoverable) => {
                Err(DeliveryError::Recoverable("Gateway Timeout".into()))
            }
            Some(SendFailure::Unrecoverable) => Err(DeliveryError::Unrecoverable(
                "Forbidden: bot was kicked from the supergroup chat".into(),
            )),
            None => Ok(()),
        }
    }
}

impl StoryDelivery for RecordingDelivery {
    async fn deliver_story(
        &self,
        chat_id: ChatId,
        text: &str,
        note: Option<&str>,
    ) -> Result<(), DeliveryError> {
        self.send_result(chat_id)?;
        self.stories
            .lock()
            .unwrap()
            .push((chat_id, text.to_string(), note.map(str::to_string)));
        Ok(())
    }

    async fn deliver_notice(&self, chat_id: ChatId, note: &str) -> Result<(), DeliveryError> {
        self.send_result(chat_id)?;
        self.notices.lock().unwrap().push((chat_id, note.to_string()));
        Ok(())
    }

    async fn notify_operator(&self, text: &str) {
        self.operator.lock().unwrap().push(text.to_string());
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        backoff: Duration::ZERO,
        fetch_timeout: Duration::from_millis(200),
        ..RetryPolicy::default()
    }
}

fn text_message(chat_id: ChatId, message_id: i64, minute: u32, text: &str) -> Message {
    Message {
        chat_id,
        message_id,
        user_id: 42,
        display_name: "Ann".into(),
        timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 14, minute, 0).unwrap(),
        kind: MessageKind::Text,
        text: Some(text.into()),
        file_ref: None,
        file_unique_ref: None,
        file_name: None,
    }
}

fn photo_message(chat_id: ChatId, message_id: i64, minute: u32, file_ref: &str) -> Message {
    Message {
        kind: MessageKind::Photo,
        text: None,
        file_ref: Some(file_ref.into()),
        file_unique_ref: Some(format!("uniq-{file_ref}")),
        ..text_message(chat_id, message_id, minute, "")
    }
}

struct Harness {
    store: MessageStore,
    settings: SettingsStore,
    delivery: Arc<RecordingDelivery>,
    generator: Arc<ScriptedGenerator>,
    pipeline: StoryPipeline<MapTransport, Arc<ScriptedGenerator>, Arc<RecordingDelivery>>,
}

async fn harness(transport: MapTransport, outcomes: Vec<GenerationOutcome>) -> Harness {
    let db = Db::connect_memory().await.expect("in-memory db");
    let store = MessageStore::new(db.pool.clone());
    let settings = SettingsStore::new(db.pool.clone());
    let delivery = Arc::new(RecordingDelivery::default());
    let generator = Arc::new(ScriptedGenerator::new(outcomes));

    let pipeline = StoryPipeline::new(
        store.clone(),
        settings.clone(),
        transport,
        generator.clone(),
        delivery.clone(),
        5,
    )
    .with_timing(fast_policy(), Duration::ZERO);

    Harness {
        store,
        settings,
        delivery,
        generator,
        pipeline,
    }
}

#[tokio::test]
async fn empty_buffer_is_skipped_without_any_send() {
    let h = harness(MapTransport::default(), vec![]).await;

    let outcome = h.pipeline.process_chat(-100).await.unwrap();
    assert_eq!(outcome, ChatOutcome::Skipped);
    assert!(h.delivery.stories.lock().unwrap().is_empty());
    assert!(h.delivery.notices.lock().unwrap().is_empty());
}

#[tokio::test]
async fn delivered_story_clears_the_buffer() {
    let h = harness(
        MapTransport::default(),
        vec![GenerationOutcome::narrative("What a day it was.")],
    )
    .await;
    h.store
        .upsert(&text_message(-100, 1, 0, "good morning"))
        .await
        .unwrap();
    h.store
        .upsert(&text_message(-100, 2, 5, "good night"))
        .await
        .unwrap();

    let outcome = h.pipeline.process_chat(-100).await.unwrap();
    assert_eq!(outcome, ChatOutcome::Delivered);

    let stories = h.delivery.stories.lock().unwrap();
    assert_eq!(stories.len(), 1);
    assert_eq!(stories[0].0, -100);
    assert!(stories[0].1.starts_with("📝 Story of the day:"));
    assert!(stories[0].1.ends_with("What a day it was."));
    assert!(h.store.messages_for_chat(-100).await.unwrap().is_empty());
}

#[tokio::test]
async fn note_alongside_a_story_reaches_delivery() {
    let h = harness(
        MapTransport::default(),
        vec![GenerationOutcome {
            narrative: Some("A fine day.".into()),
            note: Some("2 images were skipped.".into()),
        }],
    )
    .await;
    h.store
        .upsert(&text_message(-100, 1, 0, "hello"))
        .await
        .unwrap();

    let outcome = h.pipeline.process_chat(-100).await.unwrap();
    assert_eq!(outcome, ChatOutcome::Delivered);

    let stories = h.delivery.stories.lock().unwrap();
    assert_eq!(stories.len(), 1);
    assert!(stories[0].1.ends_with("A fine day."));
    assert_eq!(stories[0].2.as_deref(), Some("2 images were skipped."));
}

#[tokio::test]
async fn photos_reach_the_generator_as_image_parts() {
    let mut transport = MapTransport::default();
    transport.files.insert("f1".into(), vec![9, 9, 9]);
    let h = harness(transport, vec![GenerationOutcome::narrative("story")]).await;

    h.store
        .upsert(&text_message(-100, 1, 0, "look"))
        .await
        .unwrap();
    h.store
        .upsert(&photo_message(-100, 2, 5, "f1"))
        .await
        .unwrap();

    h.pipeline.process_chat(-100).await.unwrap();

    // preamble, text block, image line, image bytes, closing
    let requests = h.generator.requests.lock().unwrap();
    assert_eq!(*requests, vec![5]);
}

#[tokio::test]
async fn generation_failure_sends_a_notice_and_retains_the_buffer() {
    let h = harness(
        MapTransport::default(),
        vec![GenerationOutcome::note("quota exceeded")],
    )
    .await;
    h.store
        .upsert(&text_message(-100, 1, 0, "hello"))
        .await
        .unwrap();

    let outcome = h.pipeline.process_chat(-100).await.unwrap();
    assert_eq!(
        outcome,
        ChatOutcome::NoticeDelivered("quota exceeded".to_string())
    );

    assert!(h.delivery.stories.lock().unwrap().is_empty());
    assert_eq!(h.delivery.notices.lock().unwrap().len(), 1);
    assert_eq!(h.store.messages_for_chat(-100).await.unwrap().len(), 1);
}

#[tokio::test]
async fn recoverable_send_failure_retains_the_buffer() {
    let h = harness(
        MapTransport::default(),
        vec![GenerationOutcome::narrative("story")],
    )
    .await;
    h.store
        .upsert(&text_message(-100, 1, 0, "hello"))
        .await
        .unwrap();
    h.delivery.fail_chat(-100, SendFailure::Recoverable);

    let outcome = h.pipeline.process_chat(-100).await.unwrap();
    assert!(matches!(outcome, ChatOutcome::Retained(_)));
    assert_eq!(h.store.messages_for_chat(-100).await.unwrap().len(), 1);
}

#[tokio::test]
async fn dead_chat_is_cleared_and_disabled() {
    let h = harness(
        MapTransport::default(),
        vec![GenerationOutcome::narrative("story")],
    )
    .await;
    h.settings.ensure_chat(-100).await.unwrap();
    h.store
        .upsert(&text_message(-100, 1, 0, "hello"))
        .await
        .unwrap();
    h.delivery.fail_chat(-100, SendFailure::Unrecoverable);

    let outcome = h.pipeline.process_chat(-100).await.unwrap();
    assert!(matches!(outcome, ChatOutcome::Disabled(_)));

    assert!(h.store.messages_for_chat(-100).await.unwrap().is_empty());
    assert!(!h.settings.get(-100).await.unwrap().enabled);
}

#[tokio::test]
async fn full_run_isolates_failures_and_digests_to_the_operator() {
    // Chats run in id order (-3 first), and -3 is empty, so -2 consumes the
    // first scripted outcome and -1 the second.
    let h = harness(
        MapTransport::default(),
        vec![
            GenerationOutcome::note("model unavailable"),
            GenerationOutcome::narrative("chat one story"),
        ],
    )
    .await;

    for chat_id in [-1, -2, -3] {
        h.settings.ensure_chat(chat_id).await.unwrap();
    }
    h.store.upsert(&text_message(-1, 1, 0, "a")).await.unwrap();
    h.store.upsert(&text_message(-2, 1, 0, "b")).await.unwrap();
    // chat -3 stays empty and should be skipped silently.

    let summary = h.pipeline.run_all().await;

    assert_eq!(summary.total, 3);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].0, -2);

    assert!(h.store.messages_for_chat(-1).await.unwrap().is_empty());
    assert_eq!(h.store.messages_for_chat(-2).await.unwrap().len(), 1);

    let operator = h.delivery.operator.lock().unwrap();
    assert_eq!(operator.len(), 1);
    assert!(operator[0].contains("1/3"));
    assert!(operator[0].contains("model unavailable"));
}

#[tokio::test]
async fn disabled_chats_are_left_out_of_the_run() {
    let h = harness(
        MapTransport::default(),
        vec![GenerationOutcome::narrative("story")],
    )
    .await;

    h.settings.ensure_chat(-1).await.unwrap();
    h.settings.set_enabled(-1, false).await.unwrap();
    h.store.upsert(&text_message(-1, 1, 0, "a")).await.unwrap();

    let summary = h.pipeline.run_all().await;
    assert_eq!(summary.total, 0);
    assert!(h.delivery.stories.lock().unwrap().is_empty());
    // An idle run produces no operator digest either.
    assert!(h.delivery.operator.lock().unwrap().is_empty());
    // The buffer stays put until the chat is re-enabled.
    assert_eq!(h.store.messages_for_chat(-1).await.unwrap().len(), 1);
}
