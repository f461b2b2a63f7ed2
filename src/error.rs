//! Crate-wide error type.
//!
//! Expected per-chat failures (generation errors, dead chats, oversized
//! images) are encoded in result types on the pipeline side and never show
//! up here. This enum covers the genuinely unexpected: database failures,
//! broken configuration, and everything `anyhow` catches at the seams.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
