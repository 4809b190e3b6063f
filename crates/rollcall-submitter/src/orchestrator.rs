//! Submission orchestrator for driving queued form links to a terminal state.
//!
//! This module provides the `SubmissionOrchestrator`, which owns the queue
//! item lifecycle (`pending → processing → completed | failed`). Each attempt
//! opens its own tab on the shared browser session and runs the per-page
//! pipeline: readiness wait, captcha check, fingerprint, pattern lookup,
//! field resolution, fill and submit, outcome classification. Form-level
//! failures never escape; they become a failed queue item, an error record
//! and a submission row. Only persistence failures surface as `SubmitError`,
//! and even then the queue item is moved out of `processing`.

use crate::error::{Result, SubmitError};
use crate::evidence::{AfterFillCapture, EvidenceSink, EvidenceStage, NoEvidence};
use crate::link::LinkEvent;
use crate::notify::{LogNotifier, Notice, Notifier};
use crate::rate_limiter::RateLimiter;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use rollcall_browser::{dom, BrowserSession, FormPage, HumanPacing};
use rollcall_core::{
    DetectionMethod, EvidenceConfig, FormFingerprint, FormProvider, IdentityProfile,
    PatternConfig, QueueStatus, SubmissionConfig, SubmissionStatus,
};
use rollcall_db::error_records::{self, NewErrorRecord};
use rollcall_db::form_submissions::{self, NewFormSubmission};
use rollcall_db::queue_items::{self, QueueItem};
use rollcall_db::Database;
use rollcall_forms::fingerprint;
use rollcall_forms::Result as FormResult;
use rollcall_forms::{
    FieldResolver, FillObserver, FormError, FormFiller, FormProviderPlugin, NoopObserver,
    Outcome, OutcomeClassifier, PageSnapshot, PatternStore, ProviderRegistry,
};
use std::collections::HashSet;
use std::future::Future;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Terminal result of one queue item.
#[derive(Debug, Clone)]
pub struct ItemReport {
    /// Queue item that was processed
    pub queue_item_id: String,
    /// Form URL
    pub url: String,
    /// Status written to the submission record
    pub status: SubmissionStatus,
    /// Attempts made, including the last one
    pub attempts: u32,
    /// The submission record created for this item
    pub submission_id: String,
    /// Last error, if the item did not succeed
    pub error: Option<String>,
}

/// Counts of what a [`SubmissionOrchestrator::run`] loop handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Forms submitted successfully
    pub success: usize,
    /// Forms that ended in a failure other than a captcha
    pub failed: usize,
    /// Forms stopped by a captcha
    pub captcha: usize,
    /// Forms that cannot be filled automatically
    pub skipped: usize,
    /// Links dropped as duplicates of completed or in-flight URLs
    pub ignored: usize,
    /// Items that hit a persistence error
    pub errors: usize,
}

impl RunSummary {
    fn record(&mut self, result: &Result<Option<ItemReport>>) {
        match result {
            Ok(Some(report)) => match report.status {
                SubmissionStatus::Success => self.success += 1,
                SubmissionStatus::Failed => self.failed += 1,
                SubmissionStatus::Captcha => self.captcha += 1,
                SubmissionStatus::Skipped => self.skipped += 1,
            },
            Ok(None) => self.ignored += 1,
            Err(_) => self.errors += 1,
        }
    }
}

/// What one attempt learned about the form, whatever its outcome.
#[derive(Debug)]
struct Trace {
    provider: FormProvider,
    fingerprint: Option<FormFingerprint>,
    detection_method: Option<DetectionMethod>,
    confidence: f64,
    evidence: Vec<String>,
    error_evidence: Option<String>,
}

impl Trace {
    fn new(provider: FormProvider) -> Self {
        Self {
            provider,
            fingerprint: None,
            detection_method: None,
            confidence: 0.0,
            evidence: Vec::new(),
            error_evidence: None,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn terminal_status(result: &FormResult<SubmissionStatus>) -> SubmissionStatus {
    match result {
        Ok(status) => *status,
        Err(FormError::CaptchaDetected { .. }) => SubmissionStatus::Captcha,
        Err(_) => SubmissionStatus::Failed,
    }
}

/// Sequences the form pipeline per queued link.
pub struct SubmissionOrchestrator {
    session: Arc<dyn BrowserSession>,
    db: Database,
    store: PatternStore,
    providers: Arc<ProviderRegistry>,
    profile: IdentityProfile,
    submission: SubmissionConfig,
    filler: FormFiller,
    pacing: HumanPacing,
    evidence: EvidenceConfig,
    sink: Arc<dyn EvidenceSink>,
    limiter: Arc<RateLimiter>,
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl SubmissionOrchestrator {
    /// Create an orchestrator with default policy, no evidence sink, no
    /// rate limiting or pacing, and notices going to the log only.
    #[must_use]
    pub fn new(session: Arc<dyn BrowserSession>, db: Database, profile: IdentityProfile) -> Self {
        let submission = SubmissionConfig::default();
        Self {
            session,
            store: PatternStore::new(db.clone(), &PatternConfig::default()),
            db,
            providers: Arc::new(ProviderRegistry::default()),
            profile,
            filler: FormFiller::new(&submission),
            submission,
            pacing: HumanPacing::disabled(),
            evidence: EvidenceConfig::default(),
            sink: Arc::new(NoEvidence),
            limiter: Arc::new(RateLimiter::disabled()),
            notifiers: vec![Arc::new(LogNotifier)],
        }
    }

    /// Set timeouts, retry policy and tab concurrency.
    #[must_use]
    pub fn with_submission_config(mut self, config: SubmissionConfig) -> Self {
        self.filler = FormFiller::new(&config).with_pacing(self.pacing.clone());
        self.submission = config;
        self
    }

    /// Fill forms with human-like reading and typing pauses.
    #[must_use]
    pub fn with_pacing(mut self, pacing: HumanPacing) -> Self {
        self.filler = self.filler.with_pacing(pacing.clone());
        self.pacing = pacing;
        self
    }

    /// Also send notices to `notifier`.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Hand `notice` to every notifier.
    pub async fn notify(&self, notice: &Notice) {
        for notifier in &self.notifiers {
            notifier.notify(notice).await;
        }
    }

    /// Set pattern learning and thresholds.
    #[must_use]
    pub fn with_pattern_config(mut self, config: &PatternConfig) -> Self {
        self.store = PatternStore::new(self.db.clone(), config);
        self
    }

    /// Capture evidence into `sink` following `config`'s toggles.
    #[must_use]
    pub fn with_evidence(mut self, sink: Arc<dyn EvidenceSink>, config: EvidenceConfig) -> Self {
        self.sink = sink;
        self.evidence = config;
        self
    }

    /// Pace attempts through `limiter`.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Arc::new(limiter);
        self
    }

    /// Replace the provider registry.
    #[must_use]
    pub fn with_providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = Arc::new(providers);
        self
    }

    /// The pattern store this orchestrator learns into.
    #[must_use]
    pub fn pattern_store(&self) -> &PatternStore {
        &self.store
    }

    /// Queue and process one link.
    ///
    /// Returns `None` when the URL already has a completed queue item.
    pub async fn submit_link(&self, event: &LinkEvent) -> Result<Option<ItemReport>> {
        if !self.providers.recognizes(&event.url) {
            return Err(SubmitError::UnrecognizedUrl(event.url.clone()));
        }
        let pool = self.db.pool();
        if queue_items::has_completed(pool, &event.url).await? {
            info!(url = %event.url, group = %event.group_name, "Form already submitted, ignoring link");
            return Ok(None);
        }

        let item = queue_items::create(pool, event.to_queue_item()).await?;
        debug!(queue_item = %item.id, url = %item.url, "Queued form link");
        self.process_item(&item).await.map(Some)
    }

    /// Reset items stranded in `processing` and run every pending item.
    pub async fn resume_pending(&self) -> Result<Vec<ItemReport>> {
        let pool = self.db.pool();
        queue_items::reset_stale_processing(pool).await?;
        let pending = queue_items::list_by_status(pool, QueueStatus::Pending).await?;
        if !pending.is_empty() {
            info!(count = pending.len(), "Resuming pending queue items");
        }

        let mut reports = Vec::with_capacity(pending.len());
        for item in &pending {
            match self.process_item(item).await {
                Ok(report) => reports.push(report),
                Err(e) => error!(queue_item = %item.id, url = %item.url, "Failed to resume item: {}", e),
            }
        }
        Ok(reports)
    }

    /// Process links until the stream ends or `cancel` fires.
    ///
    /// Up to `max_concurrent_tabs` links run at once. After cancellation no
    /// new links are taken, but in-flight submissions run to a terminal state.
    pub async fn run(
        &self,
        mut links: mpsc::Receiver<LinkEvent>,
        cancel: CancellationToken,
    ) -> RunSummary {
        let max_tabs = self.submission.max_concurrent_tabs.max(1);
        let mut in_flight: FuturesUnordered<BoxFuture<'_, (String, Result<Option<ItemReport>>)>> =
            FuturesUnordered::new();
        let mut active_urls = HashSet::new();
        let mut summary = RunSummary::default();
        let mut accepting = true;

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled(), if accepting => {
                    info!(in_flight = in_flight.len(), "Stopping link intake");
                    accepting = false;
                }

                Some((url, result)) = in_flight.next(), if !in_flight.is_empty() => {
                    active_urls.remove(&url);
                    if let Err(e) = &result {
                        error!(url = %url, "Submission pipeline error: {}", e);
                    }
                    summary.record(&result);
                }

                event = links.recv(), if accepting && in_flight.len() < max_tabs => match event {
                    Some(event) => {
                        if active_urls.insert(event.url.clone()) {
                            in_flight.push(
                                async move {
                                    let result = self.submit_link(&event).await;
                                    (event.url, result)
                                }
                                .boxed(),
                            );
                        } else {
                            debug!(url = %event.url, "Form already in flight, ignoring link");
                            summary.ignored += 1;
                        }
                    }
                    None => {
                        debug!("Link stream closed");
                        accepting = false;
                    }
                },

                else => break,
            }
        }

        info!(
            success = summary.success,
            failed = summary.failed,
            captcha = summary.captcha,
            skipped = summary.skipped,
            "Submission loop finished"
        );
        summary
    }

    /// Drive one queue item from `pending` to a terminal state.
    ///
    /// If persistence fails midway the item is still finalized as `failed`
    /// when the database allows it, so it is not left in `processing`.
    pub async fn process_item(&self, item: &QueueItem) -> Result<ItemReport> {
        let result = self.drive_item(item).await;
        if let Err(e) = &result {
            error!(queue_item = %item.id, url = %item.url, "Submission bookkeeping failed: {}", e);
            if let Err(finalize_err) =
                queue_items::finalize(self.db.pool(), &item.id, QueueStatus::Failed, None).await
            {
                warn!(queue_item = %item.id, "Could not mark item failed: {}", finalize_err);
            }
        }
        result
    }

    async fn drive_item(&self, item: &QueueItem) -> Result<ItemReport> {
        let pool = self.db.pool();
        queue_items::mark_processing(pool, &item.id).await?;

        let started = Instant::now();
        let mut evidence = Vec::new();
        let mut drafts: Vec<NewErrorRecord> = Vec::new();

        let (trace, result, attempts) = loop {
            let attempt = queue_items::record_attempt(pool, &item.id).await?;
            self.limiter.acquire().await;
            info!(url = %item.url, attempt, "Processing form");

            let (mut trace, result) = self.attempt(item).await;
            evidence.append(&mut trace.evidence);

            if let Err(err) = &result {
                let retry = err.is_retryable() && attempt < self.submission.max_attempts;
                drafts.push(NewErrorRecord {
                    occurred_at: Utc::now(),
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                    url: Some(item.url.clone()),
                    queue_item_id: Some(item.id.clone()),
                    attempt,
                    recovery_attempted: retry,
                    recovery_successful: false,
                    evidence_path: trace.error_evidence.clone(),
                });

                if retry {
                    let delay = self.submission.retry_delay(attempt);
                    warn!(
                        url = %item.url,
                        attempt,
                        max_attempts = self.submission.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Transient failure, retrying: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }
            break (trace, result, attempt);
        };

        let status = terminal_status(&result);
        if status == SubmissionStatus::Success {
            for draft in &mut drafts {
                draft.recovery_successful = draft.recovery_attempted;
            }
        }
        let error_message = result.as_ref().err().map(ToString::to_string);
        let processing_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let submission = form_submissions::insert(
            pool,
            NewFormSubmission {
                url: item.url.clone(),
                provider: trace.provider,
                fingerprint: trace.fingerprint,
                detection_method: trace.detection_method,
                confidence: trace.confidence,
                full_name: self.profile.full_name().to_string(),
                student_id: self.profile.student_id().to_string(),
                attendance: self.profile.attendance,
                status,
                error_message: error_message.clone(),
                evidence_paths: evidence,
                processing_time_ms: i64::try_from(processing_ms).unwrap_or(i64::MAX),
                source_message: Some(item.message_text.clone()),
            },
        )
        .await?;

        for draft in drafts {
            error_records::insert(pool, draft).await?;
        }

        let queue_status = match status {
            SubmissionStatus::Success | SubmissionStatus::Skipped => QueueStatus::Completed,
            SubmissionStatus::Failed | SubmissionStatus::Captcha => QueueStatus::Failed,
        };
        queue_items::finalize(pool, &item.id, queue_status, Some(&submission.id)).await?;

        match &error_message {
            None => info!(url = %item.url, attempts, %status, "Form handled"),
            Some(message) => warn!(url = %item.url, attempts, %status, error = %message, "Form not submitted"),
        }

        let notice = match &result {
            Ok(SubmissionStatus::Success) => Some(Notice::Success {
                url: item.url.clone(),
                student_name: self.profile.full_name().to_string(),
                processing_ms,
            }),
            Ok(_) => None,
            Err(FormError::CaptchaDetected { .. }) => Some(Notice::Captcha {
                url: item.url.clone(),
            }),
            Err(e) => Some(Notice::Failure {
                url: item.url.clone(),
                kind: e.kind().to_string(),
                message: e.to_string(),
            }),
        };
        if let Some(notice) = notice {
            self.notify(&notice).await;
        }

        Ok(ItemReport {
            queue_item_id: item.id.clone(),
            url: item.url.clone(),
            status,
            attempts,
            submission_id: submission.id,
            error: error_message,
        })
    }

    /// One attempt in its own tab. The tab is closed on every path.
    async fn attempt(&self, item: &QueueItem) -> (Trace, FormResult<SubmissionStatus>) {
        let plugin = self.providers.classify(&item.url);
        let mut trace = Trace::new(plugin.provider());

        if !plugin.auto_fillable() {
            info!(url = %item.url, provider = %plugin.provider(), "Provider needs a signed-in session, skipping");
            return (trace, Ok(SubmissionStatus::Skipped));
        }

        let page = match self.session.open_tab(&item.url).await {
            Ok(page) => page,
            Err(e) => return (trace, Err(e.into())),
        };

        let run = AssertUnwindSafe(self.run_page(page.as_ref(), plugin, &mut trace))
            .catch_unwind()
            .await;

        if let Err(e) = page.close().await {
            warn!(url = %item.url, "Failed to close tab: {}", e);
        }

        match run {
            Ok(result) => (trace, result),
            Err(panic) => {
                let message = panic_message(&*panic);
                error!(url = %item.url, "Form pipeline panicked: {}", message);
                (trace, Err(FormError::Panicked(message)))
            }
        }
    }

    async fn run_page(
        &self,
        page: &dyn FormPage,
        plugin: &dyn FormProviderPlugin,
        trace: &mut Trace,
    ) -> FormResult<SubmissionStatus> {
        let result = self.fill_page(page, plugin, trace).await;
        if result.is_err() && self.evidence.capture_on_failure {
            let written = self.sink.capture(page, EvidenceStage::Error, true).await;
            trace.error_evidence = written.first().cloned();
            trace.evidence.extend(written);
        }
        result
    }

    async fn fill_page(
        &self,
        page: &dyn FormPage,
        plugin: &dyn FormProviderPlugin,
        trace: &mut Trace,
    ) -> FormResult<SubmissionStatus> {
        let classifier = OutcomeClassifier::for_provider(plugin);
        let ready = self.wait_until_ready(page, plugin, &classifier).await?;

        if self.captures_fill() {
            trace
                .evidence
                .extend(self.sink.capture(page, EvidenceStage::BeforeFill, false).await);
        }

        let fp = fingerprint::fingerprint(&ready.html);
        trace.fingerprint = Some(fp.clone());
        let cached = self.store.lookup(&fp).await?;
        let trusted_cache = cached.as_ref().is_some_and(|p| self.store.is_usable(p));

        let resolver = FieldResolver::new(self.store.usability_threshold())
            .with_submit_hints(plugin.submit_selectors());
        let fields = match resolver.resolve(page, cached.as_ref()).await {
            Ok(fields) => fields,
            Err(e) => {
                if trusted_cache {
                    self.store.record_failure(&fp).await?;
                }
                return Err(e);
            }
        };
        if fields.stale_cache {
            self.store.record_failure(&fp).await?;
        }
        trace.detection_method = Some(fields.detection_method);
        trace.confidence = fields.confidence;
        info!(
            fingerprint = fp.short(),
            method = %fields.detection_method,
            confidence = fields.confidence,
            "Resolved form fields"
        );

        let capture = AfterFillCapture::new(self.sink.as_ref());
        let observer: &dyn FillObserver = if self.captures_fill() {
            &capture
        } else {
            &NoopObserver
        };
        let filled = self
            .filler
            .fill_and_submit(page, &fields, &self.profile, &classifier, observer)
            .await;
        trace.evidence.extend(capture.into_paths());

        let learned = fields.detection_method == DetectionMethod::LearnedPattern;
        let filled = match filled {
            Ok(filled) => filled,
            Err(e) => {
                let mapping_at_fault = matches!(
                    e,
                    FormError::FillVerification { .. } | FormError::FieldNotFound { .. }
                );
                if learned && mapping_at_fault {
                    self.store.record_failure(&fp).await?;
                }
                return Err(e);
            }
        };

        let success = filled.outcome == Outcome::Success;
        if (success && self.evidence.capture_on_success)
            || (!success && self.evidence.capture_on_failure)
        {
            trace
                .evidence
                .extend(self.sink.capture(page, EvidenceStage::PostSubmit, true).await);
        }

        match filled.outcome.into_error(&filled.after.url) {
            None => {
                self.store
                    .record_success(&fp, plugin.provider(), &fields.mapping())
                    .await?;
                Ok(SubmissionStatus::Success)
            }
            Some(err) => {
                if learned && matches!(err, FormError::ValidationRejected(_)) {
                    self.store.record_failure(&fp).await?;
                }
                Err(err)
            }
        }
    }

    /// Poll until the provider's readiness selector shows up.
    async fn wait_until_ready(
        &self,
        page: &dyn FormPage,
        plugin: &dyn FormProviderPlugin,
        classifier: &OutcomeClassifier,
    ) -> FormResult<PageSnapshot> {
        let deadline = Instant::now() + self.submission.form_ready_timeout();
        loop {
            let snapshot = self.step("read page", PageSnapshot::capture(page)).await?;

            if self.providers.is_login_url(&snapshot.url) {
                return Err(FormError::LoginRequired { url: snapshot.url });
            }
            if classifier.has_captcha(&snapshot) {
                return Err(FormError::CaptchaDetected { url: snapshot.url });
            }
            if dom::contains_selector(&snapshot.html, plugin.ready_selector())? {
                debug!(url = %snapshot.url, selector = plugin.ready_selector(), "Form ready");
                return Ok(snapshot);
            }
            if Instant::now() >= deadline {
                return Err(FormError::TransientNetwork(format!(
                    "form not ready after {}ms",
                    self.submission.form_ready_timeout_ms
                )));
            }
            tokio::time::sleep(self.submission.poll_interval()).await;
        }
    }

    async fn step<T, F>(&self, what: &str, fut: F) -> FormResult<T>
    where
        F: Future<Output = rollcall_browser::Result<T>> + Send,
    {
        match tokio::time::timeout(self.submission.step_timeout(), fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(FormError::TransientNetwork(format!(
                "{what} timed out after {}ms",
                self.submission.step_timeout_ms
            ))),
        }
    }

    fn captures_fill(&self) -> bool {
        self.evidence.capture_on_success || self.evidence.capture_on_failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_status() {
        assert_eq!(
            terminal_status(&Ok(SubmissionStatus::Skipped)),
            SubmissionStatus::Skipped
        );
        assert_eq!(
            terminal_status(&Err(FormError::CaptchaDetected {
                url: "u".to_string()
            })),
            SubmissionStatus::Captcha
        );
        assert_eq!(
            terminal_status(&Err(FormError::TransientNetwork("x".to_string()))),
            SubmissionStatus::Failed
        );
    }

    #[test]
    fn test_panic_message() {
        let from_str: Box<dyn Any + Send> = Box::new("boom");
        let from_string: Box<dyn Any + Send> = Box::new(format!("tab {}", 3));
        let other: Box<dyn Any + Send> = Box::new(7_u8);

        assert_eq!(panic_message(&*from_str), "boom");
        assert_eq!(panic_message(&*from_string), "tab 3");
        assert_eq!(panic_message(&*other), "unknown panic");
    }

    #[test]
    fn test_summary_counts() {
        let report = |status| ItemReport {
            queue_item_id: "q".to_string(),
            url: "u".to_string(),
            status,
            attempts: 1,
            submission_id: "s".to_string(),
            error: None,
        };
        let mut summary = RunSummary::default();
        summary.record(&Ok(Some(report(SubmissionStatus::Success))));
        summary.record(&Ok(Some(report(SubmissionStatus::Captcha))));
        summary.record(&Ok(None));
        summary.record(&Err(SubmitError::InvalidLink("x".to_string())));

        assert_eq!(summary.success, 1);
        assert_eq!(summary.captcha, 1);
        assert_eq!(summary.ignored, 1);
        assert_eq!(summary.errors, 1);
    }
}
