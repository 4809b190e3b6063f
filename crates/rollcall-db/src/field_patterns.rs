//! Learned field patterns.
//!
//! One row per structural fingerprint holding the role-to-selector mapping
//! that last worked, success and failure counters and the confidence derived
//! from them. Counter updates and the confidence recomputation run in one
//! transaction so concurrent writers never lose an increment, and the
//! `UNIQUE(fingerprint)` upsert keeps two first discoveries from creating
//! duplicate rows.

use crate::error::{DatabaseError, Result};
use crate::{parse_text, parse_timestamp, to_u32};
use chrono::{DateTime, Utc};
use rollcall_core::{FieldMapping, FormFingerprint, FormProvider};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite, Transaction};
use uuid::Uuid;

/// A stored pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPattern {
    /// Unique identifier
    pub id: String,
    /// Structural fingerprint of the page
    pub fingerprint: FormFingerprint,
    /// Provider of the page the mapping was learned on
    pub provider: FormProvider,
    /// Role-to-selector mapping
    pub mapping: FieldMapping,
    /// Successful submissions using this fingerprint
    pub success_count: u32,
    /// Failures attributed to this mapping
    pub failure_count: u32,
    /// Derived from the two counters
    pub confidence: f64,
    /// False once confidence dropped below the retention threshold
    pub authoritative: bool,
    /// First discovery
    pub created_at: DateTime<Utc>,
    /// Last success or failure
    pub last_used_at: DateTime<Utc>,
}

/// Derives confidence from `(success_count, failure_count)`.
pub type ConfidenceFn = fn(u32, u32) -> f64;

/// Get the pattern for a fingerprint.
pub async fn get_by_fingerprint(
    pool: &Pool<Sqlite>,
    fingerprint: &FormFingerprint,
) -> Result<Option<FieldPattern>> {
    let row = sqlx::query(
        "SELECT id, fingerprint, provider, mapping, success_count, failure_count, confidence,
                authoritative, created_at, last_used_at
         FROM field_patterns WHERE fingerprint = ?",
    )
    .bind(fingerprint.as_str())
    .fetch_optional(pool)
    .await?;

    row.map(|row| parse_row(&row)).transpose()
}

/// Create the pattern or count one more success, storing `mapping` as the current mapping.
///
/// # Errors
/// Returns `DatabaseError` if any statement in the transaction fails.
pub async fn record_success(
    pool: &Pool<Sqlite>,
    fingerprint: &FormFingerprint,
    provider: FormProvider,
    mapping: &FieldMapping,
    confidence: ConfidenceFn,
    retention_threshold: f64,
) -> Result<FieldPattern> {
    let mapping_json = serde_json::to_string(mapping)
        .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;
    let now = Utc::now().to_rfc3339();

    let mut tx = pool.begin().await?;
    let row = sqlx::query(
        r"
        INSERT INTO field_patterns
            (id, fingerprint, provider, mapping, success_count, failure_count, confidence,
             authoritative, created_at, last_used_at)
        VALUES (?, ?, ?, ?, 1, 0, 0, 1, ?, ?)
        ON CONFLICT(fingerprint) DO UPDATE SET
            success_count = success_count + 1,
            provider = excluded.provider,
            mapping = excluded.mapping,
            last_used_at = excluded.last_used_at
        RETURNING success_count, failure_count
        ",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(fingerprint.as_str())
    .bind(provider.as_str())
    .bind(&mapping_json)
    .bind(&now)
    .bind(&now)
    .fetch_one(&mut *tx)
    .await?;

    let pattern = rescore(&mut tx, fingerprint, &row, confidence, retention_threshold).await?;
    tx.commit().await?;

    tracing::debug!(
        fingerprint = fingerprint.short(),
        success_count = pattern.success_count,
        confidence = pattern.confidence,
        "Recorded pattern success"
    );
    Ok(pattern)
}

/// Count one failure against an existing pattern. Returns `None` if the
/// fingerprint has no pattern.
pub async fn record_failure(
    pool: &Pool<Sqlite>,
    fingerprint: &FormFingerprint,
    confidence: ConfidenceFn,
    retention_threshold: f64,
) -> Result<Option<FieldPattern>> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query(
        r"
        UPDATE field_patterns
        SET failure_count = failure_count + 1, last_used_at = ?
        WHERE fingerprint = ?
        RETURNING success_count, failure_count
        ",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(fingerprint.as_str())
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        tx.rollback().await?;
        return Ok(None);
    };

    let pattern = rescore(&mut tx, fingerprint, &row, confidence, retention_threshold).await?;
    tx.commit().await?;

    tracing::debug!(
        fingerprint = fingerprint.short(),
        failure_count = pattern.failure_count,
        confidence = pattern.confidence,
        authoritative = pattern.authoritative,
        "Recorded pattern failure"
    );
    Ok(Some(pattern))
}

/// Number of stored patterns.
pub async fn count(pool: &Pool<Sqlite>) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM field_patterns")
        .fetch_one(pool)
        .await?)
}

async fn rescore(
    tx: &mut Transaction<'_, Sqlite>,
    fingerprint: &FormFingerprint,
    counts: &sqlx::sqlite::SqliteRow,
    confidence: ConfidenceFn,
    retention_threshold: f64,
) -> Result<FieldPattern> {
    let successes = to_u32(counts.try_get("success_count")?, "success_count")?;
    let failures = to_u32(counts.try_get("failure_count")?, "failure_count")?;
    let score = confidence(successes, failures).clamp(0.0, 1.0);

    let row = sqlx::query(
        r"
        UPDATE field_patterns SET confidence = ?, authoritative = ?
        WHERE fingerprint = ?
        RETURNING id, fingerprint, provider, mapping, success_count, failure_count, confidence,
                  authoritative, created_at, last_used_at
        ",
    )
    .bind(score)
    .bind(score >= retention_threshold)
    .bind(fingerprint.as_str())
    .fetch_one(&mut **tx)
    .await?;

    parse_row(&row)
}

fn parse_row(row: &sqlx::sqlite::SqliteRow) -> Result<FieldPattern> {
    let fingerprint: String = row.try_get("fingerprint")?;
    let provider: String = row.try_get("provider")?;
    let mapping: String = row.try_get("mapping")?;
    let created_at: String = row.try_get("created_at")?;
    let last_used_at: String = row.try_get("last_used_at")?;

    Ok(FieldPattern {
        id: row.try_get("id")?,
        fingerprint: FormFingerprint::new(fingerprint)
            .map_err(|e| DatabaseError::Decode(e.to_string()))?,
        provider: parse_text(&provider)?,
        mapping: serde_json::from_str(&mapping)
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?,
        success_count: to_u32(row.try_get("success_count")?, "success_count")?,
        failure_count: to_u32(row.try_get("failure_count")?, "failure_count")?,
        confidence: row.try_get("confidence")?,
        authoritative: row.try_get("authoritative")?,
        created_at: parse_timestamp(&created_at)?,
        last_used_at: parse_timestamp(&last_used_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use rollcall_core::FieldRole;

    fn ratio(successes: u32, failures: u32) -> f64 {
        (f64::from(successes) + 1.0) / (f64::from(successes + failures) + 2.0)
    }

    fn fingerprint() -> FormFingerprint {
        FormFingerprint::new("0f".repeat(32)).expect("fingerprint")
    }

    fn mapping(name_selector: &str) -> FieldMapping {
        let mut mapping = FieldMapping::new();
        mapping.insert(FieldRole::FullName, name_selector.to_string());
        mapping.insert(FieldRole::SubmitControl, "button".to_string());
        mapping
    }

    #[tokio::test]
    async fn test_first_success_creates_row() {
        let db = Database::in_memory().await.expect("create database");
        let fp = fingerprint();

        let pattern = record_success(
            db.pool(),
            &fp,
            FormProvider::GoogleForms,
            &mapping("#name"),
            ratio,
            0.4,
        )
        .await
        .expect("record success");

        assert_eq!(pattern.success_count, 1);
        assert_eq!(pattern.failure_count, 0);
        assert!((pattern.confidence - 2.0 / 3.0).abs() < 1e-9);
        assert!(pattern.authoritative);
        assert_eq!(count(db.pool()).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_repeat_success_replaces_mapping() {
        let db = Database::in_memory().await.expect("create database");
        let fp = fingerprint();
        let provider = FormProvider::MicrosoftForms;

        record_success(db.pool(), &fp, provider, &mapping("#old"), ratio, 0.4)
            .await
            .expect("first");
        let pattern = record_success(db.pool(), &fp, provider, &mapping("#new"), ratio, 0.4)
            .await
            .expect("second");

        assert_eq!(pattern.success_count, 2);
        assert_eq!(
            pattern.mapping.get(&FieldRole::FullName).map(String::as_str),
            Some("#new")
        );
        assert_eq!(count(db.pool()).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_failures_flag_non_authoritative() {
        let db = Database::in_memory().await.expect("create database");
        let fp = fingerprint();
        record_success(db.pool(), &fp, FormProvider::Unknown, &mapping("#n"), ratio, 0.4)
            .await
            .expect("success");

        let once = record_failure(db.pool(), &fp, ratio, 0.4)
            .await
            .expect("failure")
            .expect("pattern exists");
        assert!((once.confidence - 0.5).abs() < 1e-9);
        assert!(once.authoritative);

        let twice = record_failure(db.pool(), &fp, ratio, 0.4)
            .await
            .expect("failure")
            .expect("pattern exists");
        assert!((twice.confidence - 0.4).abs() < 1e-9);
        assert!(twice.authoritative);

        let thrice = record_failure(db.pool(), &fp, ratio, 0.4)
            .await
            .expect("failure")
            .expect("pattern exists");
        assert!(thrice.confidence < 0.4);
        assert!(!thrice.authoritative);
    }

    #[tokio::test]
    async fn test_failure_without_pattern_is_noop() {
        let db = Database::in_memory().await.expect("create database");
        let result = record_failure(db.pool(), &fingerprint(), ratio, 0.4)
            .await
            .expect("query");
        assert!(result.is_none());
        assert_eq!(count(db.pool()).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn test_lookup_round_trip() {
        let db = Database::in_memory().await.expect("create database");
        let fp = fingerprint();
        assert!(get_by_fingerprint(db.pool(), &fp)
            .await
            .expect("query")
            .is_none());

        let stored = record_success(
            db.pool(),
            &fp,
            FormProvider::GoogleForms,
            &mapping("#name"),
            ratio,
            0.4,
        )
        .await
        .expect("record");
        let loaded = get_by_fingerprint(db.pool(), &fp)
            .await
            .expect("query")
            .expect("present");
        assert_eq!(loaded, stored);
    }
}
