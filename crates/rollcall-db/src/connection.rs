//! Database connection management.
//!
//! Builds a `SQLx` `SQLite` pool for either a database file (created on
//! demand, WAL journal) or a shared in-memory database for tests.

use crate::error::{DatabaseError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a connection pool for `path` (or `:memory:`).
///
/// # Errors
/// Returns `DatabaseError::Open` if the path is not valid UTF-8 or the
/// database cannot be opened.
pub async fn connect(path: impl AsRef<Path>) -> Result<Pool<Sqlite>> {
    let path_str = path.as_ref().to_str().ok_or_else(|| {
        DatabaseError::Open("invalid database path: not valid UTF-8".to_string())
    })?;

    let mut connect_options = SqliteConnectOptions::from_str(path_str)
        .map_err(|e| DatabaseError::Open(format!("invalid connection string: {e}")))?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);
    let in_memory = path_str == ":memory:";
    if !in_memory {
        connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
    }

    // a single connection keeps the shared in-memory database free of table locks
    let pool = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { MAX_CONNECTIONS })
        .connect_with(connect_options)
        .await
        .map_err(|e| DatabaseError::Open(format!("failed to create pool: {e}")))?;

    tracing::info!("Database pool created at {}", path_str);
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pool_creation() {
        let pool = connect(":memory:").await.expect("create pool");
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .expect("simple query");
    }

    #[tokio::test]
    async fn test_file_pool_creates_missing_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("rollcall.db");
        let pool = connect(&path).await.expect("create pool");
        pool.close().await;
        assert!(path.exists());
    }
}
