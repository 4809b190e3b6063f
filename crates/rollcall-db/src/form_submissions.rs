//! Form submission records.
//!
//! One row per terminal outcome of a processed link. Rows are written once
//! when the orchestrator finalizes an attempt and never updated afterwards.

use crate::error::{DatabaseError, Result};
use crate::{parse_text, parse_timestamp};
use chrono::{DateTime, NaiveDate, Utc};
use rollcall_core::{DetectionMethod, FormFingerprint, FormProvider, SubmissionStatus};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

/// Fields of a submission known before it is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFormSubmission {
    /// Form URL
    pub url: String,
    /// Provider the URL was classified as
    pub provider: FormProvider,
    /// Structural fingerprint, absent when the form never loaded
    pub fingerprint: Option<FormFingerprint>,
    /// How fields were located, absent when resolution never ran
    pub detection_method: Option<DetectionMethod>,
    /// Confidence of the mapping used
    pub confidence: f64,
    /// Name typed into the form
    pub full_name: String,
    /// Student id typed into the form
    pub student_id: String,
    /// Desired attendance state
    pub attendance: bool,
    /// Terminal status
    pub status: SubmissionStatus,
    /// Last error for non-success outcomes
    pub error_message: Option<String>,
    /// Screenshot and DOM snapshot paths
    pub evidence_paths: Vec<String>,
    /// Wall time from first attempt to outcome
    pub processing_time_ms: i64,
    /// Message the link was found in
    pub source_message: Option<String>,
}

/// A stored submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormSubmission {
    /// Unique identifier
    pub id: String,
    /// Recorded fields
    #[serde(flatten)]
    pub record: NewFormSubmission,
    /// When the row was written
    pub created_at: DateTime<Utc>,
}

/// Per-day aggregate over `form_submissions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    /// UTC calendar day
    pub date: NaiveDate,
    /// All submissions
    pub total: i64,
    /// Successful submissions
    pub success: i64,
    /// Failed submissions
    pub failed: i64,
    /// Captcha-blocked submissions
    pub captcha: i64,
    /// Skipped links
    pub skipped: i64,
    /// Mean processing time in milliseconds
    pub avg_processing_ms: f64,
}

const COLUMNS: &str = "id, url, provider, fingerprint, detection_method, confidence, full_name, \
     student_id, attendance, status, error_message, evidence_paths, processing_time_ms, \
     source_message, created_at";

/// Store a finalized submission.
///
/// # Errors
/// Returns `DatabaseError` if serialization or the insert fails.
pub async fn insert(pool: &Pool<Sqlite>, record: NewFormSubmission) -> Result<FormSubmission> {
    let id = Uuid::new_v4().to_string();
    let created_at = Utc::now();
    let evidence = serde_json::to_string(&record.evidence_paths)
        .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;

    sqlx::query(&format!(
        "INSERT INTO form_submissions ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&id)
    .bind(&record.url)
    .bind(record.provider.as_str())
    .bind(record.fingerprint.as_ref().map(FormFingerprint::as_str))
    .bind(record.detection_method.map(|m| m.as_str()))
    .bind(record.confidence)
    .bind(&record.full_name)
    .bind(&record.student_id)
    .bind(record.attendance)
    .bind(record.status.as_str())
    .bind(&record.error_message)
    .bind(evidence)
    .bind(record.processing_time_ms)
    .bind(&record.source_message)
    .bind(created_at.to_rfc3339())
    .execute(pool)
    .await?;

    tracing::debug!(id = %id, url = %record.url, status = %record.status, "Stored form submission");

    Ok(FormSubmission {
        id,
        record,
        created_at,
    })
}

/// Get a submission by its ID.
pub async fn get_by_id(pool: &Pool<Sqlite>, id: &str) -> Result<Option<FormSubmission>> {
    let row = sqlx::query(&format!("SELECT {COLUMNS} FROM form_submissions WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(|row| parse_row(&row)).transpose()
}

/// All submissions for a URL, newest first.
pub async fn list_for_url(pool: &Pool<Sqlite>, url: &str) -> Result<Vec<FormSubmission>> {
    let rows = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM form_submissions WHERE url = ? ORDER BY created_at DESC"
    ))
    .bind(url)
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_row).collect()
}

/// Most recent submissions, newest first.
pub async fn list_recent(pool: &Pool<Sqlite>, limit: i64) -> Result<Vec<FormSubmission>> {
    let rows = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM form_submissions ORDER BY created_at DESC LIMIT ?"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_row).collect()
}

/// Aggregate counts for one UTC day.
pub async fn daily_stats(pool: &Pool<Sqlite>, date: NaiveDate) -> Result<DailyStats> {
    let row = sqlx::query(
        r"
        SELECT
            COUNT(*) AS total,
            COALESCE(SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), 0) AS success,
            COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed,
            COALESCE(SUM(CASE WHEN status = 'captcha' THEN 1 ELSE 0 END), 0) AS captcha,
            COALESCE(SUM(CASE WHEN status = 'skipped' THEN 1 ELSE 0 END), 0) AS skipped,
            COALESCE(AVG(processing_time_ms), 0.0) AS avg_processing_ms
        FROM form_submissions
        WHERE substr(created_at, 1, 10) = ?
        ",
    )
    .bind(date.format("%Y-%m-%d").to_string())
    .fetch_one(pool)
    .await?;

    Ok(DailyStats {
        date,
        total: row.try_get("total")?,
        success: row.try_get("success")?,
        failed: row.try_get("failed")?,
        captcha: row.try_get("captcha")?,
        skipped: row.try_get("skipped")?,
        avg_processing_ms: row.try_get("avg_processing_ms")?,
    })
}

fn parse_row(row: &sqlx::sqlite::SqliteRow) -> Result<FormSubmission> {
    let provider: String = row.try_get("provider")?;
    let status: String = row.try_get("status")?;
    let fingerprint: Option<String> = row.try_get("fingerprint")?;
    let detection_method: Option<String> = row.try_get("detection_method")?;
    let evidence: String = row.try_get("evidence_paths")?;
    let created_at: String = row.try_get("created_at")?;

    let fingerprint = fingerprint
        .map(|fp| FormFingerprint::new(fp).map_err(|e| DatabaseError::Decode(e.to_string())))
        .transpose()?;
    let detection_method = detection_method
        .as_deref()
        .map(parse_text::<DetectionMethod>)
        .transpose()?;
    let evidence_paths: Vec<String> = serde_json::from_str(&evidence)
        .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;

    Ok(FormSubmission {
        id: row.try_get("id")?,
        record: NewFormSubmission {
            url: row.try_get("url")?,
            provider: parse_text(&provider)?,
            fingerprint,
            detection_method,
            confidence: row.try_get("confidence")?,
            full_name: row.try_get("full_name")?,
            student_id: row.try_get("student_id")?,
            attendance: row.try_get("attendance")?,
            status: parse_text(&status)?,
            error_message: row.try_get("error_message")?,
            evidence_paths,
            processing_time_ms: row.try_get("processing_time_ms")?,
            source_message: row.try_get("source_message")?,
        },
        created_at: parse_timestamp(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn record(status: SubmissionStatus, processing_time_ms: i64) -> NewFormSubmission {
        NewFormSubmission {
            url: "https://forms.office.com/r/abc".to_string(),
            provider: FormProvider::MicrosoftForms,
            fingerprint: Some(FormFingerprint::new("ab".repeat(32)).expect("fingerprint")),
            detection_method: Some(DetectionMethod::RuleBased),
            confidence: 1.0,
            full_name: "Halil Eren Kepiç".to_string(),
            student_id: "2306002093".to_string(),
            attendance: true,
            status,
            error_message: None,
            evidence_paths: vec!["/tmp/ev/1_post_submit.png".to_string()],
            processing_time_ms,
            source_message: Some("Yoklama: https://forms.office.com/r/abc".to_string()),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = Database::in_memory().await.expect("create database");

        let stored = insert(db.pool(), record(SubmissionStatus::Success, 1200))
            .await
            .expect("insert submission");
        let loaded = get_by_id(db.pool(), &stored.id)
            .await
            .expect("query")
            .expect("submission present");

        assert_eq!(loaded.record.status, SubmissionStatus::Success);
        assert_eq!(loaded.record.full_name, "Halil Eren Kepiç");
        assert_eq!(loaded.record.fingerprint, stored.record.fingerprint);
        assert_eq!(loaded.record.evidence_paths.len(), 1);
        assert_eq!(
            loaded.record.detection_method,
            Some(DetectionMethod::RuleBased)
        );
    }

    #[tokio::test]
    async fn test_insert_without_fingerprint() {
        let db = Database::in_memory().await.expect("create database");
        let mut failed = record(SubmissionStatus::Failed, 30_000);
        failed.fingerprint = None;
        failed.detection_method = None;
        failed.error_message = Some("navigation failed".to_string());

        let stored = insert(db.pool(), failed).await.expect("insert");
        let loaded = list_for_url(db.pool(), &stored.record.url)
            .await
            .expect("query");
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].record.fingerprint.is_none());
        assert_eq!(
            loaded[0].record.error_message.as_deref(),
            Some("navigation failed")
        );
    }

    #[tokio::test]
    async fn test_daily_stats() {
        let db = Database::in_memory().await.expect("create database");
        for (status, ms) in [
            (SubmissionStatus::Success, 1000),
            (SubmissionStatus::Success, 3000),
            (SubmissionStatus::Captcha, 2000),
            (SubmissionStatus::Skipped, 2000),
        ] {
            insert(db.pool(), record(status, ms)).await.expect("insert");
        }

        let today = Utc::now().date_naive();
        let stats = daily_stats(db.pool(), today).await.expect("stats");
        assert_eq!(stats.total, 4);
        assert_eq!(stats.success, 2);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.captcha, 1);
        assert_eq!(stats.skipped, 1);
        assert!((stats.avg_processing_ms - 2000.0).abs() < f64::EPSILON);

        let empty = daily_stats(db.pool(), today - chrono::Duration::days(1))
            .await
            .expect("stats");
        assert_eq!(empty.total, 0);
        assert!(empty.avg_processing_ms.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_list_recent_limit() {
        let db = Database::in_memory().await.expect("create database");
        for _ in 0..3 {
            insert(db.pool(), record(SubmissionStatus::Success, 10))
                .await
                .expect("insert");
        }
        let recent = list_recent(db.pool(), 2).await.expect("query");
        assert_eq!(recent.len(), 2);
    }
}
