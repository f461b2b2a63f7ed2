//! Chronicler CLI entry point.

use anyhow::Context as _;
use chronicler::scheduler::DailyScheduler;
use chronicler::story::generator::ProxyClient;
use chronicler::story::pipeline::{ChatOutcome, StoryPipeline};
use chronicler::telegram::{ChatCommand, TelegramAdapter};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chronicler")]
#[command(about = "A Telegram bot that turns each day's group chatter into a story")]
struct Cli {
    /// Path to config file (optional)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Run one full story pass immediately on startup
    #[arg(long)]
    run_now: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("starting chronicler");

    let config = if let Some(config_path) = cli.config {
        chronicler::config::Config::load_from_path(&config_path)
            .with_context(|| format!("failed to load config from {}", config_path.display()))?
    } else {
        chronicler::config::Config::load().with_context(|| "failed to load configuration")?
    };

    tracing::info!(instance_dir = %config.instance_dir.display(), "configuration loaded");

    std::fs::create_dir_all(&config.instance_dir)
        .with_context(|| format!("failed to create {}", config.instance_dir.display()))?;

    let db = chronicler::db::Db::connect(&config.instance_dir)
        .await
        .with_context(|| "failed to open database")?;

    let store = chronicler::buffer::MessageStore::new(db.pool.clone());
    let settings = chronicler::settings::SettingsStore::new(db.pool.clone());

    match store.chats_with_messages().await {
        Ok(chats) if !chats.is_empty() => {
            tracing::info!(chats = chats.len(), "resuming with buffered chats");
        }
        Ok(_) => {}
        Err(error) => tracing::warn!(%error, "failed to inspect buffered chats"),
    }

    let adapter = Arc::new(TelegramAdapter::new(
        config.telegram.token.clone(),
        config.telegram.owner_chat_id,
    ));

    let generator = Arc::new(
        ProxyClient::new(&config.generator)
            .with_context(|| "failed to build generation client")?,
    );

    let pipeline = Arc::new(StoryPipeline::new(
        store.clone(),
        settings.clone(),
        adapter.clone(),
        generator,
        adapter.clone(),
        config.story.max_photos,
    ));

    let scheduler = DailyScheduler::new(pipeline.clone());
    if config.schedule.enabled {
        scheduler
            .start(config.schedule.hour.into(), config.schedule.minute.into())
            .await;
    } else {
        tracing::warn!("daily schedule disabled in config");
    }

    let mut commands = adapter
        .start(store.clone(), settings.clone())
        .await
        .with_context(|| "failed to start telegram ingestion")?;

    if cli.run_now {
        if let Some(summary) = scheduler.trigger_now().await {
            tracing::info!(digest = %summary.digest(), "startup run finished");
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
            command = commands.recv() => {
                let Some(command) = command else {
                    tracing::warn!("command channel closed, shutting down");
                    break;
                };
                handle_command(command, &pipeline, &store, &settings, &adapter, &scheduler).await;
            }
        }
    }

    scheduler.shutdown().await;
    adapter.shutdown().await;
    db.close().await;

    tracing::info!("chronicler stopped");
    Ok(())
}

async fn handle_command(
    command: ChatCommand,
    pipeline: &StoryPipeline<Arc<TelegramAdapter>, Arc<ProxyClient>, Arc<TelegramAdapter>>,
    store: &chronicler::buffer::MessageStore,
    settings: &chronicler::settings::SettingsStore,
    adapter: &TelegramAdapter,
    scheduler: &DailyScheduler<Arc<TelegramAdapter>, Arc<ProxyClient>, Arc<TelegramAdapter>>,
) {
    match command {
        ChatCommand::StoryNow(chat_id) => {
            tracing::info!(chat_id, "story requested by command");
            match pipeline.process_chat(chat_id).await {
                Ok(ChatOutcome::Skipped) => {
                    let _ = adapter
                        .send_text(chat_id, "ℹ️ Nothing in today's chronicle yet.")
                        .await;
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::error!(chat_id, %error, "on-demand story failed");
                    let _ = adapter
                        .send_text(chat_id, "😕 Could not produce a story right now.")
                        .await;
                }
            }
        }
        ChatCommand::StoryOn(chat_id) => {
            match settings.set_enabled(chat_id, true).await {
                Ok(()) => {
                    let _ = adapter
                        .send_text(chat_id, "📝 Daily stories enabled for this chat.")
                        .await;
                }
                Err(error) => tracing::error!(chat_id, %error, "failed to enable stories"),
            }
        }
        ChatCommand::StoryOff(chat_id) => {
            match settings.set_enabled(chat_id, false).await {
                Ok(()) => {
                    let _ = adapter
                        .send_text(chat_id, "📝 Daily stories disabled for this chat.")
                        .await;
                }
                Err(error) => tracing::error!(chat_id, %error, "failed to disable stories"),
            }
        }
        ChatCommand::SetGenre(chat_id, Some(genre)) => {
            match settings.set_genre(chat_id, genre).await {
                Ok(()) => {
                    let _ = adapter
                        .send_text(chat_id, &format!("📝 Story genre set to {genre}."))
                        .await;
                }
                Err(error) => tracing::error!(chat_id, %error, "failed to set genre"),
            }
        }
        ChatCommand::SetGenre(chat_id, None) => {
            let _ = adapter
                .send_text(
                    chat_id,
                    &format!(
                        "Usage: /story_genre <{}>",
                        chronicler::settings::Genre::NAMES.join("|")
                    ),
                )
                .await;
        }
        ChatCommand::SetPersonality(chat_id, Some(personality)) => {
            match settings.set_personality(chat_id, personality).await {
                Ok(()) => {
                    let _ = adapter
                        .send_text(
                            chat_id,
                            &format!("📝 Narrator personality set to {personality}."),
                        )
                        .await;
                }
                Err(error) => tracing::error!(chat_id, %error, "failed to set personality"),
            }
        }
        ChatCommand::SetPersonality(chat_id, None) => {
            let _ = adapter
                .send_text(
                    chat_id,
                    &format!(
                        "Usage: /story_personality <{}>",
                        chronicler::settings::Personality::NAMES.join("|")
                    ),
                )
                .await;
        }
        ChatCommand::StoryStatus(chat_id) => {
            let reply = match build_status_reply(chat_id, store, settings, scheduler).await {
                Ok(reply) => reply,
                Err(error) => {
                    tracing::error!(chat_id, %error, "failed to build status reply");
                    "😕 Could not read the chat status right now.".to_string()
                }
            };
            let _ = adapter.send_text(chat_id, &reply).await;
        }
    }
}

async fn build_status_reply(
    chat_id: i64,
    store: &chronicler::buffer::MessageStore,
    settings: &chronicler::settings::SettingsStore,
    scheduler: &DailyScheduler<Arc<TelegramAdapter>, Arc<ProxyClient>, Arc<TelegramAdapter>>,
) -> chronicler::error::Result<String> {
    let chat = settings.get(chat_id).await?;
    let buffered = store.messages_for_chat(chat_id).await?.len();
    let last_run = match scheduler.last_run().await {
        Some(summary) => summary.digest(),
        None => "No runs yet.".to_string(),
    };

    Ok(format!(
        "📝 Daily stories are {} for this chat.\n\
         Genre: {}, personality: {}.\n\
         Buffered messages: {}.\n\
         Last run: {}",
        if chat.enabled { "on" } else { "off" },
        chat.genre,
        chat.personality,
        buffered,
        last_run,
    ))
}
