//! Rollcall Submitter - queue-driven form submission.
//!
//! This crate turns form links into terminal submission records. It owns the
//! queue item lifecycle and wraps the per-page pipeline from
//! `rollcall-forms` with the policies around it.
//!
//! # Features
//!
//! - One tab per attempt on a shared browser session, closed on every path
//! - Bounded concurrency across tabs with graceful draining on shutdown
//! - Retry with exponential backoff for transient failures only
//! - Captcha, login-redirect and validation failures recorded as terminal
//! - Evidence screenshots and DOM snapshots around each submission
//! - Submission pacing (minimum delay, hourly cap, periodic breaks)
//! - Outcome notices to the log and, optionally, a Telegram chat
//! - Recovery of items stranded in `processing` by a crash
//!
//! # Example
//!
//! ```rust,ignore
//! use rollcall_submitter::{LinkEvent, SubmissionOrchestrator};
//! use std::sync::Arc;
//!
//! let orchestrator = SubmissionOrchestrator::new(Arc::new(engine), db, profile)
//!     .with_submission_config(config.submission.clone());
//!
//! orchestrator.resume_pending().await?;
//! let summary = orchestrator.run(link_rx, cancel_token).await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[allow(missing_docs)]
pub mod error;
pub mod evidence;
pub mod link;
pub mod notify;
pub mod orchestrator;
pub mod rate_limiter;

// Re-export commonly used types
pub use error::{Result, SubmitError};
pub use evidence::{EvidenceSink, EvidenceStage, FileEvidenceStore, NoEvidence};
pub use link::{extract_form_urls, LinkEvent};
pub use notify::{LogNotifier, Notice, Notifier, TelegramNotifier};
pub use orchestrator::{ItemReport, RunSummary, SubmissionOrchestrator};
pub use rate_limiter::RateLimiter;
