//! Learned mapping cache keyed by page fingerprint.
//!
//! The store is the only writer of `field_patterns` rows. Writes for one
//! fingerprint are serialized in-process by a per-fingerprint async mutex
//! and, underneath, by the transactional upsert in `rollcall_db`.

use crate::error::Result;
use rollcall_core::{FieldMapping, FormFingerprint, FormProvider, PatternConfig};
use rollcall_db::field_patterns::{self, FieldPattern};
use rollcall_db::Database;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Laplace-smoothed success ratio `(s + 1) / (s + f + 2)`.
///
/// Depends only on the final counts, never rises on a failure and never
/// falls on a success.
#[must_use]
pub fn pattern_confidence(successes: u32, failures: u32) -> f64 {
    (f64::from(successes) + 1.0) / (f64::from(successes) + f64::from(failures) + 2.0)
}

/// Whether `pattern` may stand in for discovery: still authoritative and at
/// least `usability_threshold` confident.
#[must_use]
pub fn is_usable(pattern: &FieldPattern, usability_threshold: f64) -> bool {
    pattern.authoritative && pattern.confidence >= usability_threshold
}

/// Persistent fingerprint → mapping cache.
#[derive(Clone)]
pub struct PatternStore {
    db: Database,
    learning_enabled: bool,
    usability_threshold: f64,
    retention_threshold: f64,
    locks: Arc<Mutex<HashMap<FormFingerprint, Arc<tokio::sync::Mutex<()>>>>>,
}

impl PatternStore {
    /// Create a store over `db` with the configured thresholds.
    #[must_use]
    pub fn new(db: Database, config: &PatternConfig) -> Self {
        Self {
            db,
            learning_enabled: config.learning_enabled,
            usability_threshold: config.usability_threshold,
            retention_threshold: config.retention_threshold,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Minimum confidence for a cached mapping to be tried.
    #[must_use]
    pub fn usability_threshold(&self) -> f64 {
        self.usability_threshold
    }

    /// Stored pattern for `fingerprint`. Returns `None` when learning is disabled.
    pub async fn lookup(&self, fingerprint: &FormFingerprint) -> Result<Option<FieldPattern>> {
        if !self.learning_enabled {
            return Ok(None);
        }
        let pattern = field_patterns::get_by_fingerprint(self.db.pool(), fingerprint).await?;
        if let Some(p) = &pattern {
            debug!(
                fingerprint = fingerprint.short(),
                confidence = p.confidence,
                authoritative = p.authoritative,
                "Pattern cache hit"
            );
        }
        Ok(pattern)
    }

    /// Whether a pattern may be used without re-discovery.
    #[must_use]
    pub fn is_usable(&self, pattern: &FieldPattern) -> bool {
        is_usable(pattern, self.usability_threshold)
    }

    /// Record a successful submission made with `mapping`.
    ///
    /// Creates the pattern on first success; afterwards increments the success
    /// counter and replaces the stored mapping.
    pub async fn record_success(
        &self,
        fingerprint: &FormFingerprint,
        provider: FormProvider,
        mapping: &FieldMapping,
    ) -> Result<Option<FieldPattern>> {
        if !self.learning_enabled {
            return Ok(None);
        }
        let lock = self.lock_for(fingerprint);
        let _guard = lock.lock().await;

        let pattern = field_patterns::record_success(
            self.db.pool(),
            fingerprint,
            provider,
            mapping,
            pattern_confidence,
            self.retention_threshold,
        )
        .await?;

        if pattern.success_count == 1 {
            info!(
                fingerprint = fingerprint.short(),
                provider = %provider,
                roles = mapping.len(),
                "Learned new field pattern"
            );
        }
        Ok(Some(pattern))
    }

    /// Count a failure attributable to the stored mapping.
    pub async fn record_failure(&self, fingerprint: &FormFingerprint) -> Result<Option<FieldPattern>> {
        if !self.learning_enabled {
            return Ok(None);
        }
        let lock = self.lock_for(fingerprint);
        let _guard = lock.lock().await;

        let pattern = field_patterns::record_failure(
            self.db.pool(),
            fingerprint,
            pattern_confidence,
            self.retention_threshold,
        )
        .await?;

        if let Some(p) = &pattern {
            if !p.authoritative {
                warn!(
                    fingerprint = fingerprint.short(),
                    confidence = p.confidence,
                    "Pattern dropped below retention threshold"
                );
            }
        }
        Ok(pattern)
    }

    fn lock_for(&self, fingerprint: &FormFingerprint) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(fingerprint.clone()).or_default())
    }
}
