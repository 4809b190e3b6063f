use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("chromium error: {0}")]
    ChromiumError(String),

    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),

    #[error("navigation failed: {0}")]
    NavigationError(String),

    #[error("selector not found: {0}")]
    SelectorNotFound(String),

    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("script error: {0}")]
    ScriptError(String),

    #[error("screenshot failed: {0}")]
    ScreenshotError(String),
}

impl BrowserError {
    /// Whether retrying the same operation later can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ChromiumError(_) | Self::Cdp(_) | Self::NavigationError(_) | Self::Timeout(_)
        )
    }
}
