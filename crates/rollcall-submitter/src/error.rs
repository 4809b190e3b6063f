use rollcall_db::DatabaseError;
use rollcall_forms::FormError;
use thiserror::Error;

/// Errors that stop the orchestrator itself, as opposed to a single form.
///
/// Per-form failures are recorded against the queue item and never surface
/// here; only persistence and intake problems do.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("form error: {0}")]
    Form(#[from] FormError),

    #[error("evidence write failed: {0}")]
    Evidence(#[from] std::io::Error),

    #[error("invalid link record: {0}")]
    InvalidLink(String),

    #[error("not a recognized form url: {0}")]
    UnrecognizedUrl(String),
}

pub type Result<T> = std::result::Result<T, SubmitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SubmitError::UnrecognizedUrl("https://example.com".to_string());
        assert_eq!(
            err.to_string(),
            "not a recognized form url: https://example.com"
        );
    }

    #[test]
    fn test_form_error_wraps() {
        let err: SubmitError = FormError::TransientNetwork("reset".to_string()).into();
        assert!(matches!(err, SubmitError::Form(_)));
    }
}
