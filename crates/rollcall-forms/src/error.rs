//! Error types for the form pipeline.

use rollcall_browser::BrowserError;
use rollcall_core::FieldRole;
use rollcall_db::DatabaseError;
use std::fmt;
use thiserror::Error;

/// Why a role could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundReason {
    /// No candidate element matched
    Missing,
    /// Several candidates matched equally well
    Ambiguous {
        /// Number of equally ranked candidates
        candidates: usize,
    },
}

impl fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("no matching element"),
            Self::Ambiguous { candidates } => write!(f, "{candidates} equally plausible elements"),
        }
    }
}

/// Errors that can occur while identifying, filling or submitting a form.
#[derive(Error, Debug)]
pub enum FormError {
    /// A required role could not be located on the page
    #[error("field not found for {role}: {reason}")]
    FieldNotFound {
        /// The role that failed to resolve
        role: FieldRole,
        /// Missing or ambiguous
        reason: NotFoundReason,
    },

    /// A write to a field did not take effect
    #[error("fill verification failed for {role}: expected '{expected}', read back '{actual}'")]
    FillVerification {
        /// The role whose element ignored the write
        role: FieldRole,
        /// Value that was written
        expected: String,
        /// Value read back afterwards
        actual: String,
    },

    /// No success, error or captcha marker appeared after submitting
    #[error("unrecognized outcome after submitting {url}")]
    OutcomeUnrecognized {
        /// Page URL after the wait
        url: String,
    },

    /// The page shows a captcha or bot challenge
    #[error("captcha detected on {url}")]
    CaptchaDetected {
        /// Page URL where the challenge appeared
        url: String,
    },

    /// The form reported a validation error
    #[error("form rejected submission: {0}")]
    ValidationRejected(String),

    /// The page redirected to a sign-in host
    #[error("login required: redirected to {url}")]
    LoginRequired {
        /// Sign-in URL the tab landed on
        url: String,
    },

    /// Navigation failure or timeout; worth retrying
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Non-transient browser failure
    #[error("browser error: {0}")]
    Browser(BrowserError),

    /// Pattern store failure
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// The page pipeline panicked
    #[error("pipeline panicked: {0}")]
    Panicked(String),
}

impl FormError {
    /// Whether a later attempt at the same URL can plausibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }

    /// Stable short name used as the error record kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FieldNotFound { .. } => "field_not_found",
            Self::FillVerification { .. } => "fill_verification",
            Self::OutcomeUnrecognized { .. } => "outcome_unrecognized",
            Self::CaptchaDetected { .. } => "captcha_detected",
            Self::ValidationRejected(_) => "validation_rejected",
            Self::LoginRequired { .. } => "login_required",
            Self::TransientNetwork(_) => "transient_network",
            Self::Browser(_) => "browser",
            Self::Database(_) => "database",
            Self::Panicked(_) => "panic",
        }
    }
}

impl From<BrowserError> for FormError {
    fn from(err: BrowserError) -> Self {
        if err.is_transient() {
            Self::TransientNetwork(err.to_string())
        } else {
            Self::Browser(err)
        }
    }
}

/// Result type for form operations.
pub type Result<T> = std::result::Result<T, FormError>;
