//! Database connection management and migrations.

use crate::error::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

/// SQLite connection bundle.
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    /// Connect to the database under the instance directory and run
    /// migrations.
    pub async fn connect(data_dir: &Path) -> Result<Self> {
        let url = format!(
            "sqlite:{}?mode=rwc",
            data_dir.join("chronicler.db").display()
        );
        let pool = SqlitePool::connect(&url).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// In-memory database, migrated. Used by tests; a single connection so
    /// every query sees the same memory store.
    pub async fn connect_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Close the pool gracefully.
    pub async fn close(self) {
        self.pool.close().await;
    }
}
