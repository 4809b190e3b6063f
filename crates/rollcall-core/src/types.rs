//! Shared types used across the Rollcall application.
//!
//! This module defines common newtypes and enums that provide type safety
//! and clear domain modeling. Every enum stored in the database has a
//! stable snake_case text form via `as_str`/`FromStr`.

use crate::error::RollcallError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Generates `as_str`, `Display` and `FromStr` for a unit-only enum.
macro_rules! text_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// Stable text form used in storage and logs.
            #[must_use]
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = RollcallError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(RollcallError::UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// Semantic purpose a form input serves, independent of its selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRole {
    /// Free-text full name input
    FullName,
    /// Free-text student number input
    StudentId,
    /// "I was present" checkbox or affirmative radio
    AttendanceAcknowledgement,
    /// Button that submits the form
    SubmitControl,
}

impl FieldRole {
    /// All roles in fill order.
    pub const ALL: [FieldRole; 4] = [
        Self::FullName,
        Self::StudentId,
        Self::AttendanceAcknowledgement,
        Self::SubmitControl,
    ];

    /// Whether a form without this role can still be submitted.
    #[must_use]
    pub fn is_optional(&self) -> bool {
        matches!(self, Self::AttendanceAcknowledgement)
    }

    /// Whether the role is filled by typing text.
    #[must_use]
    pub fn is_text(&self) -> bool {
        matches!(self, Self::FullName | Self::StudentId)
    }
}

text_enum!(FieldRole, "field role", {
    FullName => "full_name",
    StudentId => "student_id",
    AttendanceAcknowledgement => "attendance_acknowledgement",
    SubmitControl => "submit_control",
});

/// Role-to-selector mapping; ordered so serialized mappings are stable.
pub type FieldMapping = BTreeMap<FieldRole, String>;

/// Form hosting service a URL belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormProvider {
    /// forms.office.com / forms.microsoft.com
    MicrosoftForms,
    /// docs.google.com/forms
    GoogleForms,
    /// Moodle attendance module
    Moodle,
    /// Anything else
    Unknown,
}

text_enum!(FormProvider, "form provider", {
    MicrosoftForms => "microsoft_forms",
    GoogleForms => "google_forms",
    Moodle => "moodle",
    Unknown => "unknown",
});

/// How the field mapping for a submission was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Heuristic label matching
    RuleBased,
    /// Reserved; nothing produces this value
    AiAssisted,
    /// Cached mapping from the pattern store
    LearnedPattern,
}

text_enum!(DetectionMethod, "detection method", {
    RuleBased => "rule_based",
    AiAssisted => "ai_assisted",
    LearnedPattern => "learned_pattern",
});

/// Terminal status of one submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Confirmation observed
    Success,
    /// Any failure other than captcha
    Failed,
    /// A challenge blocked the form
    Captcha,
    /// Not auto-fillable; nothing was typed
    Skipped,
}

text_enum!(SubmissionStatus, "submission status", {
    Success => "success",
    Failed => "failed",
    Captcha => "captcha",
    Skipped => "skipped",
});

/// Lifecycle state of a queued link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting to be processed
    Pending,
    /// Claimed by the orchestrator
    Processing,
    /// Reached a successful or skipped outcome
    Completed,
    /// Reached a terminal failure
    Failed,
}

impl QueueStatus {
    /// Whether no further transitions are allowed.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

text_enum!(QueueStatus, "queue status", {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

/// Structural signature of a form page: lowercase hex SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FormFingerprint(String);

impl FormFingerprint {
    /// Wrap a hex digest.
    ///
    /// # Errors
    /// Returns error unless the value is 64 lowercase hex characters.
    pub fn new(value: impl Into<String>) -> Result<Self, RollcallError> {
        let value = value.into();
        static HEX_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = HEX_REGEX.get_or_init(|| Regex::new(r"^[0-9a-f]{64}$").expect("valid regex"));

        if regex.is_match(&value) {
            Ok(Self(value))
        } else {
            Err(RollcallError::Validation(format!(
                "invalid fingerprint: expected 64 hex characters, got '{value}'"
            )))
        }
    }

    /// Hex-encode a raw SHA-256 digest.
    #[must_use]
    pub fn from_digest(digest: &[u8; 32]) -> Self {
        Self(hex::encode(digest))
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl TryFrom<String> for FormFingerprint {
    type Error = RollcallError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FormFingerprint> for String {
    fn from(fp: FormFingerprint) -> Self {
        fp.0
    }
}

impl fmt::Display for FormFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The fixed identity typed into every form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityProfile {
    full_name: String,
    student_id: String,
    /// Desired state of the attendance acknowledgement
    pub attendance: bool,
}

impl IdentityProfile {
    /// Build a profile, trimming both text values.
    ///
    /// # Errors
    /// Returns error if either value is empty after trimming.
    pub fn new(full_name: &str, student_id: &str, attendance: bool) -> Result<Self, RollcallError> {
        let full_name = full_name.trim();
        let student_id = student_id.trim();

        if full_name.is_empty() {
            return Err(RollcallError::Validation(
                "identity full name cannot be empty".to_string(),
            ));
        }
        if student_id.is_empty() {
            return Err(RollcallError::Validation(
                "identity student id cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            full_name: full_name.to_string(),
            student_id: student_id.to_string(),
            attendance,
        })
    }

    /// Full name.
    #[must_use]
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Student number.
    #[must_use]
    pub fn student_id(&self) -> &str {
        &self.student_id
    }

    /// Text to type for a text role, `None` for non-text roles.
    #[must_use]
    pub fn text_for(&self, role: FieldRole) -> Option<&str> {
        match role {
            FieldRole::FullName => Some(&self.full_name),
            FieldRole::StudentId => Some(&self.student_id),
            FieldRole::AttendanceAcknowledgement | FieldRole::SubmitControl => None,
        }
    }
}
