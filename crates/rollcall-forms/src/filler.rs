//! Filling resolved fields and submitting.
//!
//! Every write is read back before moving on, and nothing is clicked once a
//! write fails to stick. After the submit click the page is polled until it
//! differs from the pre-submit snapshot and shows a recognizable outcome, or
//! the submit wait runs out. Every browser call runs under the step timeout.
//!
//! Nothing after the submit click is retryable: the click may already have
//! been recorded, so a lost page surfaces as an unrecognized outcome.

use crate::classifier::{Outcome, OutcomeClassifier, PageSnapshot};
use crate::error::{FormError, NotFoundReason, Result};
use crate::resolver::ResolvedFields;
use async_trait::async_trait;
use rollcall_browser::{ElementKind, FormPage, HumanPacing};
use rollcall_core::{FieldRole, IdentityProfile, SubmissionConfig};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Hook run between filling and clicking submit.
#[async_trait]
pub trait FillObserver: Send + Sync {
    /// Called once every field has been written and verified.
    async fn after_fill(&self, page: &dyn FormPage);
}

/// Observer that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

#[async_trait]
impl FillObserver for NoopObserver {
    async fn after_fill(&self, _page: &dyn FormPage) {}
}

/// Result of a completed fill-and-submit sequence.
#[derive(Debug, Clone)]
pub struct FillOutcome {
    /// Page right before the submit click
    pub before: PageSnapshot,
    /// Page when the wait ended
    pub after: PageSnapshot,
    /// Classification of `after`
    pub outcome: Outcome,
    /// Whether the page changed at all after the click
    pub page_changed: bool,
}

/// Drives resolved fields on a page.
#[derive(Debug, Clone)]
pub struct FormFiller {
    step_timeout: Duration,
    submit_wait_timeout: Duration,
    poll_interval: Duration,
    pacing: HumanPacing,
}

impl FormFiller {
    /// Filler using the configured timeouts.
    #[must_use]
    pub fn new(config: &SubmissionConfig) -> Self {
        Self {
            step_timeout: config.step_timeout(),
            submit_wait_timeout: config.submit_wait_timeout(),
            poll_interval: config.poll_interval(),
            pacing: HumanPacing::disabled(),
        }
    }

    /// Pause like a person reading the form and moving between fields.
    #[must_use]
    pub fn with_pacing(mut self, pacing: HumanPacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Fill, verify, run `observer`, submit and wait for the outcome.
    pub async fn fill_and_submit(
        &self,
        page: &dyn FormPage,
        fields: &ResolvedFields,
        profile: &IdentityProfile,
        classifier: &OutcomeClassifier,
        observer: &dyn FillObserver,
    ) -> Result<FillOutcome> {
        self.fill(page, fields, profile).await?;
        observer.after_fill(page).await;
        self.submit(page, fields, classifier).await
    }

    /// Write the profile into every resolved input and verify each write.
    pub async fn fill(
        &self,
        page: &dyn FormPage,
        fields: &ResolvedFields,
        profile: &IdentityProfile,
    ) -> Result<()> {
        self.pacing.reading_pause().await;
        for role in FieldRole::ALL {
            let Some(element) = fields.get(role) else {
                continue;
            };
            let selector = element.selector.as_str();

            if let Some(expected) = profile.text_for(role) {
                self.step("type", page.clear_and_type(selector, expected)).await?;
                let actual = self.step("read back", page.read_value(selector)).await?;
                if actual.trim() != expected {
                    return Err(FormError::FillVerification {
                        role,
                        expected: expected.to_string(),
                        actual,
                    });
                }
                debug!(role = %role, selector, "Filled text field");
                self.pacing.action_pause().await;
            } else if role == FieldRole::AttendanceAcknowledgement {
                let desired = profile.attendance;
                if element.kind == ElementKind::Radio && !desired {
                    // a radio cannot be cleared; leave the question unanswered
                    continue;
                }
                self.step("toggle", page.set_checked(selector, desired)).await?;
                let checked = self.step("read state", page.is_checked(selector)).await?;
                if checked != desired {
                    return Err(FormError::FillVerification {
                        role,
                        expected: state_name(desired).to_string(),
                        actual: state_name(checked).to_string(),
                    });
                }
                debug!(role = %role, selector, checked, "Set attendance");
                self.pacing.action_pause().await;
            }
        }
        Ok(())
    }

    /// Click submit and wait for the page to settle on an outcome.
    pub async fn submit(
        &self,
        page: &dyn FormPage,
        fields: &ResolvedFields,
        classifier: &OutcomeClassifier,
    ) -> Result<FillOutcome> {
        let submit = fields
            .get(FieldRole::SubmitControl)
            .ok_or(FormError::FieldNotFound {
                role: FieldRole::SubmitControl,
                reason: NotFoundReason::Missing,
            })?;

        self.pacing.action_pause().await;
        let before = self.step("snapshot", PageSnapshot::capture(page)).await?;
        match self.step("submit click", page.click(&submit.selector)).await {
            Ok(()) => {}
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "Submit click did not confirm; it may have gone through");
                return Err(FormError::OutcomeUnrecognized { url: before.url });
            }
            Err(e) => return Err(e),
        }
        info!(selector = %submit.selector, "Clicked submit");

        let deadline = Instant::now() + self.submit_wait_timeout;
        let mut after: Option<PageSnapshot> = None;
        loop {
            tokio::time::sleep(self.poll_interval).await;
            match self.step("snapshot", PageSnapshot::capture(page)).await {
                Ok(snapshot) => {
                    if snapshot != before {
                        let outcome = classifier.classify(&snapshot, Some(&before));
                        if outcome.is_recognized() {
                            debug!(?outcome, url = %snapshot.url, "Page settled after submit");
                            return Ok(FillOutcome {
                                before,
                                after: snapshot,
                                outcome,
                                page_changed: true,
                            });
                        }
                    }
                    after = Some(snapshot);
                }
                Err(e) => debug!(error = %e, "Page unreadable after submit, still waiting"),
            }
            if Instant::now() >= deadline {
                break;
            }
        }

        let Some(after) = after else {
            warn!(url = %before.url, "Page never readable after submit");
            return Err(FormError::OutcomeUnrecognized { url: before.url });
        };
        let page_changed = after != before;
        let outcome = classifier.classify(&after, Some(&before));
        debug!(?outcome, page_changed, "Submit wait ran out");
        Ok(FillOutcome {
            before,
            after,
            outcome,
            page_changed,
        })
    }

    async fn step<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = rollcall_browser::Result<T>> + Send,
    {
        match tokio::time::timeout(self.step_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(FormError::TransientNetwork(format!(
                "{what} timed out after {}ms",
                self.step_timeout.as_millis()
            ))),
        }
    }
}

fn state_name(checked: bool) -> &'static str {
    if checked {
        "checked"
    } else {
        "unchecked"
    }
}
