//! Append-only log of failed pipeline steps.

use crate::error::Result;
use crate::{parse_timestamp, to_u32};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

/// Fields of an error known before it is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewErrorRecord {
    /// When the step failed
    pub occurred_at: DateTime<Utc>,
    /// Error kind, e.g. `field_not_found` or `transient_network`
    pub kind: String,
    /// Human-readable message
    pub message: String,
    /// Form URL
    pub url: Option<String>,
    /// Queue item being processed
    pub queue_item_id: Option<String>,
    /// 1-based attempt number the error happened in
    pub attempt: u32,
    /// Whether another attempt followed
    pub recovery_attempted: bool,
    /// Whether a later attempt succeeded
    pub recovery_successful: bool,
    /// Screenshot taken when the error happened
    pub evidence_path: Option<String>,
}

/// A stored error record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Unique identifier
    pub id: String,
    /// Recorded fields
    #[serde(flatten)]
    pub record: NewErrorRecord,
}

/// Append an error record.
pub async fn insert(pool: &Pool<Sqlite>, record: NewErrorRecord) -> Result<ErrorRecord> {
    let id = Uuid::new_v4().to_string();

    sqlx::query(
        "INSERT INTO error_records (id, occurred_at, kind, message, url, queue_item_id, attempt,
                                    recovery_attempted, recovery_successful, evidence_path)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(record.occurred_at.to_rfc3339())
    .bind(&record.kind)
    .bind(&record.message)
    .bind(&record.url)
    .bind(&record.queue_item_id)
    .bind(i64::from(record.attempt))
    .bind(record.recovery_attempted)
    .bind(record.recovery_successful)
    .bind(&record.evidence_path)
    .execute(pool)
    .await?;

    Ok(ErrorRecord { id, record })
}

/// Errors recorded while processing one queue item, in attempt order.
pub async fn list_for_queue_item(
    pool: &Pool<Sqlite>,
    queue_item_id: &str,
) -> Result<Vec<ErrorRecord>> {
    let rows = sqlx::query(
        "SELECT id, occurred_at, kind, message, url, queue_item_id, attempt,
                recovery_attempted, recovery_successful, evidence_path
         FROM error_records WHERE queue_item_id = ? ORDER BY attempt ASC, occurred_at ASC",
    )
    .bind(queue_item_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_row).collect()
}

/// Most recent errors, newest first.
pub async fn list_recent(pool: &Pool<Sqlite>, limit: i64) -> Result<Vec<ErrorRecord>> {
    let rows = sqlx::query(
        "SELECT id, occurred_at, kind, message, url, queue_item_id, attempt,
                recovery_attempted, recovery_successful, evidence_path
         FROM error_records ORDER BY occurred_at DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_row).collect()
}

fn parse_row(row: &sqlx::sqlite::SqliteRow) -> Result<ErrorRecord> {
    let occurred_at: String = row.try_get("occurred_at")?;
    Ok(ErrorRecord {
        id: row.try_get("id")?,
        record: NewErrorRecord {
            occurred_at: parse_timestamp(&occurred_at)?,
            kind: row.try_get("kind")?,
            message: row.try_get("message")?,
            url: row.try_get("url")?,
            queue_item_id: row.try_get("queue_item_id")?,
            attempt: to_u32(row.try_get("attempt")?, "attempt")?,
            recovery_attempted: row.try_get("recovery_attempted")?,
            recovery_successful: row.try_get("recovery_successful")?,
            evidence_path: row.try_get("evidence_path")?,
        },
    })
}
