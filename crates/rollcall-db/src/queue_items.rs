//! Link queue operations.
//!
//! Every candidate link becomes a queue item that moves
//! `pending -> processing -> {completed, failed}`. The guarded `UPDATE`s
//! below refuse any other transition.

use crate::error::{DatabaseError, Result};
use crate::{parse_text, parse_timestamp, to_u32};
use chrono::{DateTime, Utc};
use rollcall_core::QueueStatus;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

/// A detected link waiting in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQueueItem {
    /// Full text of the message the link was found in
    pub message_text: String,
    /// Form URL
    pub url: String,
    /// Chat group the message came from
    pub group_name: String,
    /// When the message was received
    pub received_at: DateTime<Utc>,
}

/// A stored queue item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// Unique identifier
    pub id: String,
    /// Message text
    pub message_text: String,
    /// Form URL
    pub url: String,
    /// Chat group
    pub group_name: String,
    /// When the message was received
    pub received_at: DateTime<Utc>,
    /// Lifecycle state
    pub status: QueueStatus,
    /// Attempts started so far
    pub attempts: u32,
    /// Submission produced by the terminal outcome
    pub submission_id: Option<String>,
    /// When the item was queued
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, message_text, url, group_name, received_at, status, attempts, \
     submission_id, created_at, updated_at";

/// Queue a new link as `pending`.
pub async fn create(pool: &Pool<Sqlite>, item: NewQueueItem) -> Result<QueueItem> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO queue_items (id, message_text, url, group_name, received_at, status, attempts, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)",
    )
    .bind(&id)
    .bind(&item.message_text)
    .bind(&item.url)
    .bind(&item.group_name)
    .bind(item.received_at.to_rfc3339())
    .bind(QueueStatus::Pending.as_str())
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(QueueItem {
        id,
        message_text: item.message_text,
        url: item.url,
        group_name: item.group_name,
        received_at: item.received_at,
        status: QueueStatus::Pending,
        attempts: 0,
        submission_id: None,
        created_at: now,
        updated_at: now,
    })
}

/// Get a queue item by its ID.
pub async fn get_by_id(pool: &Pool<Sqlite>, id: &str) -> Result<Option<QueueItem>> {
    let row = sqlx::query(&format!("SELECT {COLUMNS} FROM queue_items WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(|row| parse_row(&row)).transpose()
}

/// Whether `url` already reached `completed`.
pub async fn has_completed(pool: &Pool<Sqlite>, url: &str) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM queue_items WHERE url = ? AND status = 'completed'")
            .bind(url)
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}

/// Items in `status`, oldest first.
pub async fn list_by_status(pool: &Pool<Sqlite>, status: QueueStatus) -> Result<Vec<QueueItem>> {
    let rows = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM queue_items WHERE status = ? ORDER BY created_at ASC"
    ))
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_row).collect()
}

/// Claim a pending item.
///
/// # Errors
/// Returns `DatabaseError::InvalidTransition` unless the item is `pending`.
pub async fn mark_processing(pool: &Pool<Sqlite>, id: &str) -> Result<()> {
    transition(pool, id, QueueStatus::Pending, QueueStatus::Processing, None).await
}

/// Count one more attempt on a processing item; returns the new count.
pub async fn record_attempt(pool: &Pool<Sqlite>, id: &str) -> Result<u32> {
    let attempts: Option<i64> = sqlx::query_scalar(
        "UPDATE queue_items SET attempts = attempts + 1, updated_at = ?
         WHERE id = ? AND status = 'processing'
         RETURNING attempts",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match attempts {
        Some(attempts) => to_u32(attempts, "attempts"),
        None => Err(DatabaseError::InvalidTransition(format!(
            "queue item {id} is not processing"
        ))),
    }
}

/// Move a processing item to its terminal state.
///
/// # Errors
/// Returns `DatabaseError::InvalidTransition` if `status` is not terminal or
/// the item is not `processing`.
pub async fn finalize(
    pool: &Pool<Sqlite>,
    id: &str,
    status: QueueStatus,
    submission_id: Option<&str>,
) -> Result<()> {
    if !status.is_terminal() {
        return Err(DatabaseError::InvalidTransition(format!(
            "{status} is not a terminal queue status"
        )));
    }
    transition(pool, id, QueueStatus::Processing, status, submission_id).await
}

/// Return items stranded in `processing` by a crash to `pending`.
pub async fn reset_stale_processing(pool: &Pool<Sqlite>) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE queue_items SET status = 'pending', updated_at = ? WHERE status = 'processing'",
    )
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    if result.rows_affected() > 0 {
        tracing::warn!(
            count = result.rows_affected(),
            "Reset stale processing queue items to pending"
        );
    }
    Ok(result.rows_affected())
}

async fn transition(
    pool: &Pool<Sqlite>,
    id: &str,
    from: QueueStatus,
    to: QueueStatus,
    submission_id: Option<&str>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE queue_items
         SET status = ?, submission_id = COALESCE(?, submission_id), updated_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(to.as_str())
    .bind(submission_id)
    .bind(Utc::now().to_rfc3339())
    .bind(id)
    .bind(from.as_str())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::InvalidTransition(format!(
            "queue item {id} cannot move {from} -> {to}"
        )));
    }
    tracing::debug!(queue_item = id, from = %from, to = %to, "Queue item transition");
    Ok(())
}

fn parse_row(row: &sqlx::sqlite::SqliteRow) -> Result<QueueItem> {
    let status: String = row.try_get("status")?;
    let received_at: String = row.try_get("received_at")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(QueueItem {
        id: row.try_get("id")?,
        message_text: row.try_get("message_text")?,
        url: row.try_get("url")?,
        group_name: row.try_get("group_name")?,
        received_at: parse_timestamp(&received_at)?,
        status: parse_text(&status)?,
        attempts: to_u32(row.try_get("attempts")?, "attempts")?,
        submission_id: row.try_get("submission_id")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn link(url: &str) -> NewQueueItem {
        NewQueueItem {
            message_text: format!("Yoklama formu: {url}"),
            url: url.to_string(),
            group_name: "CENG 302".to_string(),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let db = Database::in_memory().await.expect("create database");
        let item = create(db.pool(), link("https://forms.office.com/r/a"))
            .await
            .expect("create");
        assert_eq!(item.status, QueueStatus::Pending);

        mark_processing(db.pool(), &item.id).await.expect("claim");
        assert_eq!(record_attempt(db.pool(), &item.id).await.expect("attempt"), 1);
        assert_eq!(record_attempt(db.pool(), &item.id).await.expect("attempt"), 2);

        finalize(db.pool(), &item.id, QueueStatus::Failed, None)
            .await
            .expect("finalize");

        let stored = get_by_id(db.pool(), &item.id)
            .await
            .expect("query")
            .expect("present");
        assert_eq!(stored.status, QueueStatus::Failed);
        assert_eq!(stored.attempts, 2);
        assert!(!has_completed(db.pool(), &item.url).await.expect("query"));
    }

    #[tokio::test]
    async fn test_invalid_transitions_rejected() {
        let db = Database::in_memory().await.expect("create database");
        let item = create(db.pool(), link("https://forms.office.com/r/b"))
            .await
            .expect("create");

        // pending -> completed skips processing
        assert!(matches!(
            finalize(db.pool(), &item.id, QueueStatus::Completed, None).await,
            Err(DatabaseError::InvalidTransition(_))
        ));
        assert!(record_attempt(db.pool(), &item.id).await.is_err());

        mark_processing(db.pool(), &item.id).await.expect("claim");
        assert!(mark_processing(db.pool(), &item.id).await.is_err());
        assert!(finalize(db.pool(), &item.id, QueueStatus::Pending, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_has_completed() {
        let db = Database::in_memory().await.expect("create database");
        let url = "https://docs.google.com/forms/d/e/x/viewform";
        let item = create(db.pool(), link(url)).await.expect("create");
        mark_processing(db.pool(), &item.id).await.expect("claim");
        finalize(db.pool(), &item.id, QueueStatus::Completed, None)
            .await
            .expect("finalize");

        assert!(has_completed(db.pool(), url).await.expect("query"));
    }

    #[tokio::test]
    async fn test_reset_stale_processing() {
        let db = Database::in_memory().await.expect("create database");
        let stuck = create(db.pool(), link("https://forms.office.com/r/c"))
            .await
            .expect("create");
        let waiting = create(db.pool(), link("https://forms.office.com/r/d"))
            .await
            .expect("create");
        mark_processing(db.pool(), &stuck.id).await.expect("claim");

        assert_eq!(reset_stale_processing(db.pool()).await.expect("reset"), 1);

        let pending = list_by_status(db.pool(), QueueStatus::Pending)
            .await
            .expect("query");
        let ids: Vec<_> = pending.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec![stuck.id.as_str(), waiting.id.as_str()]);
    }
}
