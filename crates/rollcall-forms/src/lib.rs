//! Rollcall Forms - identifying, filling and submitting attendance forms.
//!
//! This crate holds the per-page pipeline. It is stateless apart from the
//! pattern store and works on any [`rollcall_browser::FormPage`], so the
//! same code drives Chrome tabs and in-memory fixture pages.
//!
//! # Architecture
//!
//! - **Fingerprinter** ([`fingerprint`]): content-free structural hash of a page
//! - **Pattern Store** ([`pattern_store`]): fingerprint → learned role mapping with confidence
//! - **Field Resolver** ([`resolver`]): cached selectors first, label matching otherwise
//! - **Form Filler** ([`filler`]): verified writes, submit click, bounded outcome wait
//! - **Outcome Classifier** ([`classifier`]): captcha, success, validation error, unrecognized
//! - **Providers** ([`provider`]): per-host readiness, login and marker knowledge
//! - **Errors** ([`error`]): the failure taxonomy the orchestrator records
//!
//! # Example
//!
//! ```ignore
//! use rollcall_forms::{fingerprint, FieldResolver, FormFiller, NoopObserver, Outcome, OutcomeClassifier};
//!
//! let html = page.content().await?;
//! let fp = fingerprint::fingerprint(&html);
//! let cached = store.lookup(&fp).await?;
//! let fields = FieldResolver::new(0.6).resolve(&page, cached.as_ref()).await?;
//! let result = FormFiller::new(&config.submission)
//!     .fill_and_submit(&page, &fields, &profile, &OutcomeClassifier::default(), &NoopObserver)
//!     .await?;
//! if result.outcome == Outcome::Success {
//!     store.record_success(&fp, provider, &fields.mapping()).await?;
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod classifier;
pub mod error;
pub mod filler;
pub mod fingerprint;
pub mod pattern_store;
pub mod provider;
pub mod resolver;
mod text;

// Re-export commonly used types
pub use classifier::{Outcome, OutcomeClassifier, PageSnapshot};
pub use error::{FormError, NotFoundReason, Result};
pub use filler::{FillObserver, FillOutcome, FormFiller, NoopObserver};
pub use fingerprint::PageStructure;
pub use pattern_store::{pattern_confidence, PatternStore};
pub use provider::{FormProviderPlugin, ProviderRegistry};
pub use resolver::{FieldResolver, ResolvedFields};
