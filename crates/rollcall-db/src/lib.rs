//! Rollcall Database Layer
//!
//! Provides `SQLite` persistence for everything the submission pipeline
//! records: one row per form submission, one learned pattern per page
//! fingerprint, an append-only error log and the link queue.
//!
//! # Architecture
//!
//! - **Migrations**: SQL migrations are embedded and versioned using `SQLx`
//! - **Connection Pooling**: a small pool shared by every module
//! - **Queries**: runtime `sqlx::query` with bound parameters; timestamps are
//!   RFC 3339 text and ids are UUID v4 strings
//!
//! # Example
//!
//! ```ignore
//! use rollcall_db::Database;
//!
//! let db = Database::new("rollcall.db").await?;
//! db.run_migrations().await?;
//! let pending = rollcall_db::queue_items::list_by_status(db.pool(), QueueStatus::Pending).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod connection;
pub mod error;
pub mod error_records;
pub mod field_patterns;
pub mod form_submissions;
pub mod migrations;
pub mod queue_items;

pub use error::{DatabaseError, Result};

use chrono::{DateTime, Utc};
use std::path::Path;
use std::str::FromStr;

/// High-level database interface with migrations.
#[derive(Debug, Clone)]
pub struct Database {
    pool: sqlx::Pool<sqlx::Sqlite>,
}

impl Database {
    /// Open (creating if needed) the database at `path`.
    ///
    /// # Arguments
    /// * `path` - Path to the database file (or `:memory:` for in-memory)
    ///
    /// # Errors
    /// Returns `DatabaseError` if the database cannot be opened.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let pool = connection::connect(path).await?;
        Ok(Self { pool })
    }

    /// Fresh in-memory database with the schema applied.
    pub async fn in_memory() -> Result<Self> {
        let db = Self::new(":memory:").await?;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run all pending database migrations.
    ///
    /// # Errors
    /// Returns `DatabaseError::Migration` if any migration fails.
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// Get the number of applied migrations.
    pub async fn get_schema_version(&self) -> Result<i64> {
        migrations::get_schema_version(&self.pool).await
    }

    /// Get a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Sqlite> {
        &self.pool
    }

    /// Close the database connection gracefully.
    pub async fn close(self) {
        self.pool.close().await;
        tracing::info!("Database pool closed");
    }
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Decode(format!("invalid timestamp '{value}': {e}")))
}

pub(crate) fn parse_text<T>(value: &str) -> Result<T>
where
    T: FromStr<Err = rollcall_core::RollcallError>,
{
    value
        .parse()
        .map_err(|e: rollcall_core::RollcallError| DatabaseError::Decode(e.to_string()))
}

pub(crate) fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| DatabaseError::Decode(format!("{column} out of range: {value}")))
}
