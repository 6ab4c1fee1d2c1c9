//! SQLite-backed delivery store.
//!
//! Confessions live in a single `confessions` table; the queue's
//! write-back fills in `message_id` and `channel_id` once the post is
//! on the platform. Schema is applied inline on open, and the database
//! runs in WAL mode so the occasional concurrent write is fine.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use super::{DeliveryStore, StoreError};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS confessions (
    id TEXT PRIMARY KEY,
    confession_number INTEGER NOT NULL DEFAULT 0,
    content TEXT NOT NULL DEFAULT '',
    message_id TEXT,
    channel_id TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
";

/// Delivery store over a SQLite database file.
pub struct SqliteDeliveryStore {
    pool: SqlitePool,
}

impl SqliteDeliveryStore {
    /// Open (or create) the database at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema
    /// cannot be applied.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .pragma("foreign_keys", "ON");

        Self::connect(options, 2)
            .await
            .with_context(|| format!("failed to open database at {}", path.display()))
    }

    /// Open an in-memory database. Used by tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created.
    pub async fn open_in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);
        // A single connection: each pooled connection to `:memory:`
        // would otherwise get its own empty database.
        Self::connect(options, 1)
            .await
            .context("failed to open in-memory database")
    }

    async fn connect(options: SqliteConnectOptions, max_connections: u32) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .context("failed to apply schema")?;
        Ok(Self { pool })
    }

    /// The underlying pool, for components that share the database.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a confession row. The moderation flow does this when a
    /// confession is approved for posting.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn insert_confession(
        &self,
        id: &str,
        number: i64,
        content: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO confessions (id, confession_number, content) VALUES (?1, ?2, ?3)")
            .bind(id)
            .bind(number)
            .bind(content)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Look up where a confession was posted, if it has been delivered.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn delivery_info(
        &self,
        id: &str,
    ) -> Result<Option<(String, String)>, StoreError> {
        let row: Option<(Option<String>, Option<String>)> =
            sqlx::query_as("SELECT message_id, channel_id FROM confessions WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((Some(message_id), Some(channel_id))) => Ok(Some((message_id, channel_id))),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl DeliveryStore for SqliteDeliveryStore {
    async fn record_delivered(
        &self,
        correlation_id: &str,
        message_id: &str,
        channel_id: &str,
    ) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE confessions SET message_id = ?2, channel_id = ?3 WHERE id = ?1")
                .bind(correlation_id)
                .bind(message_id)
                .bind(channel_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownEntity(correlation_id.to_owned()));
        }
        Ok(())
    }
}
