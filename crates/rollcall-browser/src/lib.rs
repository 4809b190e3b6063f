//! Browser automation for form pages.
//!
//! A [`BrowserSession`] is the shared browser connection; each form gets
//! its own [`FormPage`] tab. [`BrowserEngine`] is the Chrome-backed
//! session, and with the `fixture` feature [`fixture::FixtureSession`]
//! serves in-memory pages for tests.

pub mod dom;
pub mod engine;
pub mod error;
#[cfg(any(test, feature = "fixture"))]
pub mod fixture;
pub mod pacing;
pub mod page;
pub mod stealth;

pub use dom::{ElementInfo, ElementKind};
pub use engine::{BrowserEngine, ChromeTab};
pub use error::{BrowserError, Result};
pub use pacing::HumanPacing;
pub use page::{url_path, BrowserSession, FormPage};
pub use stealth::StealthProfile;
