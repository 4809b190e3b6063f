//! Screenshots and DOM snapshots taken around each submission.
//!
//! Capture never fails an attempt: a sink logs its own errors and reports
//! only the files it actually wrote.

use async_trait::async_trait;
use chrono::Utc;
use rollcall_browser::FormPage;
use rollcall_forms::FillObserver;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// Point in the pipeline a capture belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceStage {
    /// Form rendered, nothing typed yet
    BeforeFill,
    /// Every field written and verified
    AfterFill,
    /// Page state the outcome was classified from
    PostSubmit,
    /// A step failed
    Error,
}

impl EvidenceStage {
    /// Name used in file names and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeFill => "before_fill",
            Self::AfterFill => "after_fill",
            Self::PostSubmit => "post_submit",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EvidenceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for evidence artifacts.
#[async_trait]
pub trait EvidenceSink: Send + Sync {
    /// Capture `page` at `stage`, adding the DOM when `with_dom` is set.
    ///
    /// Returns the paths written.
    async fn capture(&self, page: &dyn FormPage, stage: EvidenceStage, with_dom: bool) -> Vec<String>;
}

/// Sink that stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEvidence;

#[async_trait]
impl EvidenceSink for NoEvidence {
    async fn capture(&self, _page: &dyn FormPage, _stage: EvidenceStage, _with_dom: bool) -> Vec<String> {
        Vec::new()
    }
}

/// Writes `<timestamp>_<stage>.png` (and `.html`) files into one directory.
#[derive(Debug, Clone)]
pub struct FileEvidenceStore {
    dir: PathBuf,
}

impl FileEvidenceStore {
    /// Store writing into `dir`, created on first capture.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Output directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn write(&self, file_name: String, bytes: &[u8]) -> Option<String> {
        let path = self.dir.join(file_name);
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            warn!(dir = %self.dir.display(), "Failed to create evidence directory: {}", e);
            return None;
        }
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => {
                debug!(path = %path.display(), "Wrote evidence");
                Some(path.to_string_lossy().into_owned())
            }
            Err(e) => {
                warn!(path = %path.display(), "Failed to write evidence: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl EvidenceSink for FileEvidenceStore {
    async fn capture(&self, page: &dyn FormPage, stage: EvidenceStage, with_dom: bool) -> Vec<String> {
        // millisecond precision keeps concurrent tabs from overwriting each other
        let stamp = Utc::now().format("%Y%m%d_%H%M%S%.3f").to_string();
        let mut written = Vec::new();

        match page.screenshot().await {
            Ok(png) => written.extend(self.write(format!("{stamp}_{stage}.png"), &png).await),
            Err(e) => warn!(%stage, "Screenshot failed: {}", e),
        }

        if with_dom {
            match page.content().await {
                Ok(html) => written.extend(
                    self.write(format!("{stamp}_{stage}.html"), html.as_bytes())
                        .await,
                ),
                Err(e) => warn!(%stage, "DOM snapshot failed: {}", e),
            }
        }

        written
    }
}

/// Fill observer that captures the `after_fill` stage.
pub struct AfterFillCapture<'a> {
    sink: &'a dyn EvidenceSink,
    paths: Mutex<Vec<String>>,
}

impl<'a> AfterFillCapture<'a> {
    /// Observer writing into `sink`.
    pub fn new(sink: &'a dyn EvidenceSink) -> Self {
        Self {
            sink,
            paths: Mutex::new(Vec::new()),
        }
    }

    /// Paths written so far.
    pub fn into_paths(self) -> Vec<String> {
        self.paths.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl FillObserver for AfterFillCapture<'_> {
    async fn after_fill(&self, page: &dyn FormPage) {
        let written = self.sink.capture(page, EvidenceStage::AfterFill, false).await;
        self.paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(written);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_browser::fixture::FixturePage;

    fn page() -> FixturePage {
        FixturePage::new("https://x.test/f", "<html><body><form><input></form></body></html>")
    }

    #[tokio::test]
    async fn test_file_store_writes_png_and_dom() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileEvidenceStore::new(dir.path().join("evidence"));

        let paths = store.capture(&page(), EvidenceStage::PostSubmit, true).await;

        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("_post_submit.png"));
        assert!(paths[1].ends_with("_post_submit.html"));
        let html = std::fs::read_to_string(&paths[1]).unwrap();
        assert!(html.contains("<form>"));
    }

    #[tokio::test]
    async fn test_unwritable_dir_is_logged_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let store = FileEvidenceStore::new(&blocker);
        let paths = store.capture(&page(), EvidenceStage::Error, true).await;
        assert!(paths.is_empty());
    }

    #[tokio::test]
    async fn test_after_fill_observer_collects_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileEvidenceStore::new(dir.path());
        let observer = AfterFillCapture::new(&store);

        observer.after_fill(&page()).await;

        let paths = observer.into_paths();
        assert_eq!(paths.len(), 1);
        assert!(paths[0].ends_with("_after_fill.png"));
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(EvidenceStage::BeforeFill.to_string(), "before_fill");
        assert_eq!(EvidenceStage::Error.as_str(), "error");
    }
}
