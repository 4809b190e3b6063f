//! Application state: the database and the orchestrator wired from config.

use crate::intake;
use anyhow::Context;
use chrono::NaiveDate;
use rollcall_browser::{BrowserSession, HumanPacing};
use rollcall_core::AppConfig;
use rollcall_db::form_submissions::{self, DailyStats};
use rollcall_db::Database;
use rollcall_forms::ProviderRegistry;
use rollcall_submitter::{
    FileEvidenceStore, Notice, RateLimiter, RunSummary, SubmissionOrchestrator, TelegramNotifier,
};
use std::sync::Arc;
use tokio::io::AsyncBufRead;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Links buffered between intake and the submission loop.
const LINK_BUFFER: usize = 64;

/// Everything a running instance shares.
pub struct AppState {
    /// Loaded and validated configuration
    pub config: AppConfig,
    /// Submission database
    pub db: Database,
    /// Form pipeline driver
    pub orchestrator: SubmissionOrchestrator,
    providers: ProviderRegistry,
}

impl AppState {
    /// Open the database and build the orchestrator on top of `session`.
    pub async fn initialize(config: AppConfig, session: Arc<dyn BrowserSession>) -> anyhow::Result<Self> {
        let profile = config
            .identity
            .to_profile()
            .context("identity.full_name and identity.student_id must be set")?;

        let db_path = config.database_path()?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let db = Database::new(&db_path)
            .await
            .with_context(|| format!("failed to open database at {}", db_path.display()))?;
        db.run_migrations().await.context("failed to migrate database")?;

        let evidence_dir = config.evidence_dir()?;
        info!("Evidence directory: {}", evidence_dir.display());

        let mut orchestrator = SubmissionOrchestrator::new(session, db.clone(), profile)
            .with_submission_config(config.submission.clone())
            .with_pacing(HumanPacing::from_config(&config.pacing))
            .with_pattern_config(&config.patterns)
            .with_evidence(
                Arc::new(FileEvidenceStore::new(evidence_dir)),
                config.evidence.clone(),
            )
            .with_rate_limiter(RateLimiter::new(&config.rate_limit));
        if let Some(telegram) = TelegramNotifier::from_config(&config.notifications) {
            info!("Telegram notices enabled");
            orchestrator = orchestrator.with_notifier(Arc::new(telegram));
        }

        Ok(Self {
            config,
            db,
            orchestrator,
            providers: ProviderRegistry::default(),
        })
    }

    /// Re-run stranded items, then submit links read from `reader` until it
    /// ends or `cancel` fires.
    pub async fn process<R>(&self, reader: R, cancel: CancellationToken) -> RunSummary
    where
        R: AsyncBufRead + Unpin,
    {
        match self.orchestrator.resume_pending().await {
            Ok(reports) if !reports.is_empty() => info!(count = reports.len(), "Recovered queue items"),
            Ok(_) => {}
            Err(e) => error!("Queue recovery failed: {}", e),
        }

        let (tx, rx) = mpsc::channel(LINK_BUFFER);
        let intake = intake::forward_lines(reader, &self.providers, tx, cancel.clone());
        let (forwarded, summary) = tokio::join!(intake, self.orchestrator.run(rx, cancel));
        info!(forwarded, "Link intake finished");
        summary
    }

    /// Send the aggregate for `date` to the notifiers.
    pub async fn report_daily_stats(&self, date: NaiveDate) -> Option<DailyStats> {
        match form_submissions::daily_stats(self.db.pool(), date).await {
            Ok(stats) => {
                self.orchestrator
                    .notify(&Notice::DailySummary(stats.clone()))
                    .await;
                Some(stats)
            }
            Err(e) => {
                error!("Failed to compute daily stats: {}", e);
                None
            }
        }
    }
}
