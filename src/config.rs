//! Configuration loading and validation.
//!
//! Configuration lives in `<instance_dir>/config.toml`; the instance
//! directory defaults to `~/.chronicler` and can be overridden with the
//! `CHRONICLER_DIR` environment variable. Secrets (bot token, proxy auth
//! token) can be supplied via environment variables instead of the file.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level chronicler configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Instance root directory (~/.chronicler or CHRONICLER_DIR).
    pub instance_dir: PathBuf,
    pub telegram: TelegramConfig,
    pub generator: GeneratorConfig,
    pub schedule: ScheduleConfig,
    pub story: StoryConfig,
}

/// Telegram credentials and operator chat.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub token: String,
    /// Chat that receives run digests and critical error notices. Optional;
    /// when unset, operator notifications are silently dropped.
    pub owner_chat_id: Option<i64>,
}

/// Remote generation proxy endpoint.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Base URL of the generation proxy (the worker exposes POST /generate).
    pub worker_url: String,
    /// Value for the X-Auth-Token header.
    pub auth_token: String,
    /// Timeout for one generation call. The remote model may legitimately
    /// take close to a minute on multimodal payloads.
    pub timeout_secs: u64,
}

/// Daily run schedule (UTC).
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub hour: u8,
    pub minute: u8,
}

/// Story pipeline tunables.
#[derive(Debug, Clone)]
pub struct StoryConfig {
    /// Maximum distinct photos downloaded and analyzed per chat per run.
    pub max_photos: usize,
}

// --- Raw TOML shape ---

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    telegram: RawTelegram,
    #[serde(default)]
    generator: RawGenerator,
    #[serde(default)]
    schedule: RawSchedule,
    #[serde(default)]
    story: RawStory,
}

#[derive(Debug, Default, Deserialize)]
struct RawTelegram {
    token: Option<String>,
    owner_chat_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawGenerator {
    worker_url: Option<String>,
    auth_token: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSchedule {
    enabled: Option<bool>,
    hour: Option<u8>,
    minute: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
struct RawStory {
    max_photos: Option<usize>,
}

impl Config {
    /// Default instance directory: CHRONICLER_DIR or ~/.chronicler.
    pub fn default_instance_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("CHRONICLER_DIR") {
            return PathBuf::from(dir);
        }
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        Path::new(&home).join(".chronicler")
    }

    /// Load configuration from the default instance directory.
    pub fn load() -> Result<Self> {
        let instance_dir = Self::default_instance_dir();
        Self::load_from_dir(&instance_dir)
    }

    /// Load configuration from an explicit config file path. The file's
    /// parent directory becomes the instance directory.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let instance_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_instance_dir);
        let raw = Self::read_raw(path)?;
        Self::resolve(instance_dir, raw)
    }

    fn load_from_dir(instance_dir: &Path) -> Result<Self> {
        let config_path = instance_dir.join("config.toml");
        let raw = Self::read_raw(&config_path)?;
        Self::resolve(instance_dir.to_path_buf(), raw)
    }

    fn read_raw(path: &Path) -> Result<RawConfig> {
        if !path.exists() {
            // A missing file is fine as long as the secrets come from the
            // environment.
            return Ok(RawConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&text)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))
    }

    fn resolve(instance_dir: PathBuf, raw: RawConfig) -> Result<Self> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN")
            .ok()
            .or(raw.telegram.token)
            .ok_or_else(|| {
                Error::Config("telegram.token missing (set TELEGRAM_BOT_TOKEN or config.toml)".into())
            })?;

        let worker_url = std::env::var("PROXY_WORKER_URL")
            .ok()
            .or(raw.generator.worker_url)
            .ok_or_else(|| {
                Error::Config(
                    "generator.worker_url missing (set PROXY_WORKER_URL or config.toml)".into(),
                )
            })?;

        let auth_token = std::env::var("PROXY_AUTH_TOKEN")
            .ok()
            .or(raw.generator.auth_token)
            .ok_or_else(|| {
                Error::Config(
                    "generator.auth_token missing (set PROXY_AUTH_TOKEN or config.toml)".into(),
                )
            })?;

        let schedule = ScheduleConfig {
            enabled: raw.schedule.enabled.unwrap_or(true),
            hour: raw.schedule.hour.unwrap_or(0),
            minute: raw.schedule.minute.unwrap_or(5),
        };
        if schedule.hour > 23 || schedule.minute > 59 {
            return Err(Error::Config(format!(
                "schedule {}:{:02} is not a valid time of day",
                schedule.hour, schedule.minute
            )));
        }

        Ok(Self {
            instance_dir,
            telegram: TelegramConfig {
                token,
                owner_chat_id: raw.telegram.owner_chat_id,
            },
            generator: GeneratorConfig {
                worker_url: worker_url.trim_end_matches('/').to_string(),
                auth_token,
                timeout_secs: raw.generator.timeout_secs.unwrap_or(60),
            },
            schedule,
            story: StoryConfig {
                max_photos: raw.story.max_photos.unwrap_or(5),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_rejects_invalid_schedule() {
        let raw: RawConfig = toml::from_str(
            r#"
            [telegram]
            token = "t"
            [generator]
            worker_url = "https://proxy.example"
            auth_token = "secret"
            [schedule]
            hour = 24
            "#,
        )
        .unwrap();
        let result = Config::resolve(PathBuf::from("/tmp"), raw);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn resolve_applies_defaults_and_strips_trailing_slash() {
        let raw: RawConfig = toml::from_str(
            r#"
            [telegram]
            token = "t"
            [generator]
            worker_url = "https://proxy.example/"
            auth_token = "secret"
            "#,
        )
        .unwrap();
        let config = Config::resolve(PathBuf::from("/tmp"), raw).unwrap();
        assert_eq!(config.generator.worker_url, "https://proxy.example");
        assert_eq!(config.generator.timeout_secs, 60);
        assert_eq!(config.schedule.hour, 0);
        assert_eq!(config.schedule.minute, 5);
        assert_eq!(config.story.max_photos, 5);
        assert!(config.schedule.enabled);
    }
}
