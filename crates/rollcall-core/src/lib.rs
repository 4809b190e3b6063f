//! Rollcall Core - Foundation crate for the Rollcall attendance form filler.
//!
//! This crate provides shared types, error handling, and configuration
//! management that all other Rollcall crates depend on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - Shared newtypes and enums (`FieldRole`, `FormProvider`, `FormFingerprint`, ...)
//!
//! # Example
//!
//! ```rust
//! use rollcall_core::{AppConfig, IdentityProfile};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = AppConfig::default();
//! config.identity.full_name = "Halil Eren Kepiç".to_string();
//! config.identity.student_id = "2306002093".to_string();
//!
//! let profile: IdentityProfile = config.identity.to_profile()?;
//! assert!(profile.attendance);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{
    AppConfig, BrowserConfig, DatabaseConfig, EvidenceConfig, IdentityConfig, LoggingConfig,
    NotificationConfig, PacingConfig, PatternConfig, RateLimitConfig, SubmissionConfig,
};
pub use error::{ConfigError, ConfigResult, Result, RollcallError};
pub use types::{
    DetectionMethod, FieldMapping, FieldRole, FormFingerprint, FormProvider, IdentityProfile,
    QueueStatus, SubmissionStatus,
};
