//! Configuration management for Rollcall.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use crate::types::IdentityProfile;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration.
///
/// This is loaded from `~/.config/rollcall/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Identity submitted into every form
    pub identity: IdentityConfig,
    /// Browser automation settings
    pub browser: BrowserConfig,
    /// Evidence capture settings
    pub evidence: EvidenceConfig,
    /// Submission timing and retry policy
    pub submission: SubmissionConfig,
    /// Learned pattern cache settings
    pub patterns: PatternConfig,
    /// Submission rate limiting
    pub rate_limit: RateLimitConfig,
    /// Human-like delays while filling
    pub pacing: PacingConfig,
    /// Outcome notices
    pub notifications: NotificationConfig,
    /// Database location
    pub database: DatabaseConfig,
    /// Log filter settings
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path, falling back to defaults if absent.
    pub fn load_from(config_path: &std::path::Path) -> ConfigResult<Self> {
        if config_path.exists() {
            tracing::debug!("Loading config from {}", config_path.display());
            let contents = fs::read_to_string(config_path)?;
            let config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `ROLLCALL_FULL_NAME`: Override identity full name
    /// - `ROLLCALL_STUDENT_ID`: Override identity student id
    /// - `ROLLCALL_HEADLESS`: Override browser headless mode (true/false)
    /// - `ROLLCALL_DEBUG_URL`: Connect to a running Chrome instead of launching one
    /// - `ROLLCALL_DB_PATH`: Override the database file location
    /// - `ROLLCALL_TELEGRAM_TOKEN`: Telegram bot token for notices
    /// - `ROLLCALL_TELEGRAM_CHAT_ID`: Telegram chat receiving notices
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from a variable lookup function.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("ROLLCALL_FULL_NAME") {
            tracing::debug!("Override identity.full_name from env");
            self.identity.full_name = name;
        }

        if let Some(id) = lookup("ROLLCALL_STUDENT_ID") {
            tracing::debug!("Override identity.student_id from env");
            self.identity.student_id = id;
        }

        if let Some(val) = lookup("ROLLCALL_HEADLESS") {
            if let Ok(headless) = val.parse() {
                self.browser.headless = headless;
                tracing::debug!("Override browser.headless from env: {}", headless);
            }
        }

        if let Some(url) = lookup("ROLLCALL_DEBUG_URL") {
            if !url.trim().is_empty() {
                tracing::debug!("Override browser.debug_url from env: {}", url);
                self.browser.debug_url = Some(url);
            }
        }

        if let Some(path) = lookup("ROLLCALL_DB_PATH") {
            tracing::debug!("Override database.path from env: {}", path);
            self.database.path = Some(PathBuf::from(path));
        }

        if let Some(token) = lookup("ROLLCALL_TELEGRAM_TOKEN") {
            tracing::debug!("Override notifications.telegram_bot_token from env");
            self.notifications.telegram_bot_token = Some(token);
        }

        if let Some(chat) = lookup("ROLLCALL_TELEGRAM_CHAT_ID") {
            tracing::debug!("Override notifications.telegram_chat_id from env");
            self.notifications.telegram_chat_id = Some(chat);
        }
    }

    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> ConfigResult<()> {
        let patterns = &self.patterns;
        for (field, value) in [
            ("patterns.usability_threshold", patterns.usability_threshold),
            ("patterns.retention_threshold", patterns.retention_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: format!("must be within [0, 1], got {value}"),
                });
            }
        }

        if patterns.retention_threshold > patterns.usability_threshold {
            return Err(ConfigError::InvalidValue {
                field: "patterns.retention_threshold".to_string(),
                reason: "must not exceed patterns.usability_threshold".to_string(),
            });
        }

        if self.submission.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "submission.max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        if self.submission.max_concurrent_tabs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "submission.max_concurrent_tabs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let pacing = &self.pacing;
        for (field, (min, max)) in [
            ("pacing.keystroke", (pacing.keystroke_min_ms, pacing.keystroke_max_ms)),
            ("pacing.action_pause", (pacing.action_pause_min_ms, pacing.action_pause_max_ms)),
            ("pacing.reading_pause", (pacing.reading_pause_min_ms, pacing.reading_pause_max_ms)),
        ] {
            if min > max {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: format!("minimum {min}ms exceeds maximum {max}ms"),
                });
            }
        }

        if self.submission.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "submission.poll_interval_ms".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    /// Resolve the database file, defaulting to `<data_dir>/rollcall.db`.
    pub fn database_path(&self) -> ConfigResult<PathBuf> {
        match &self.database.path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("rollcall.db")),
        }
    }

    /// Resolve the evidence directory, defaulting to `<data_dir>/evidence`.
    pub fn evidence_dir(&self) -> ConfigResult<PathBuf> {
        match &self.evidence.dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::data_dir()?.join("evidence")),
        }
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "config_path".to_string(),
                reason: "no parent directory".to_string(),
            })?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", config_path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/rollcall/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("com", "rollcall", "rollcall").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/rollcall`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("com", "rollcall", "rollcall").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

/// Identity submitted into every form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Full name as it should appear on the roster
    pub full_name: String,
    /// Student number
    pub student_id: String,
    /// Desired state of the attendance acknowledgement checkbox
    pub attendance: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            full_name: String::new(),
            student_id: String::new(),
            attendance: true,
        }
    }
}

impl IdentityConfig {
    /// Convert into a validated profile.
    pub fn to_profile(&self) -> crate::error::Result<IdentityProfile> {
        IdentityProfile::new(&self.full_name, &self.student_id, self.attendance)
    }
}

/// Browser automation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    pub headless: bool,
    /// Chrome DevTools endpoint of an already running browser
    pub debug_url: Option<String>,
    /// Browser window width
    pub window_width: u32,
    /// Browser window height
    pub window_height: u32,
    /// Accept-Language / `navigator.language` locale
    pub locale: String,
    /// IANA timezone reported to pages
    pub timezone: String,
    /// Navigation timeout in seconds
    pub navigation_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            debug_url: None,
            window_width: 1920,
            window_height: 1080,
            locale: "tr-TR".to_string(),
            timezone: "Europe/Istanbul".to_string(),
            navigation_timeout_secs: 30,
        }
    }
}

impl BrowserConfig {
    /// Navigation timeout as a [`Duration`].
    #[must_use]
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }
}

/// Evidence capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    /// Capture screenshots for successful submissions
    pub capture_on_success: bool,
    /// Capture screenshots and DOM for failed submissions
    pub capture_on_failure: bool,
    /// Output directory (defaults to `<data_dir>/evidence`)
    pub dir: Option<PathBuf>,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            capture_on_success: true,
            capture_on_failure: true,
            dir: None,
        }
    }
}

/// Submission timing and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    /// Attempts per URL before a transient failure becomes terminal
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts
    pub retry_base_delay_ms: u64,
    /// Upper bound for any single browser step
    pub step_timeout_ms: u64,
    /// How long to wait for the provider's readiness selector
    pub form_ready_timeout_ms: u64,
    /// How long to wait for the page to react to the submit click
    pub submit_wait_timeout_ms: u64,
    /// Polling interval for page-state waits
    pub poll_interval_ms: u64,
    /// Number of tabs that may fill forms at the same time
    pub max_concurrent_tabs: usize,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_base_delay_ms: 10_000,
            step_timeout_ms: 15_000,
            form_ready_timeout_ms: 30_000,
            submit_wait_timeout_ms: 10_000,
            poll_interval_ms: 250,
            max_concurrent_tabs: 1,
        }
    }
}

impl SubmissionConfig {
    /// Bound for a single browser step.
    #[must_use]
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    /// Bound for the readiness wait.
    #[must_use]
    pub fn form_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.form_ready_timeout_ms)
    }

    /// Bound for the post-submit wait.
    #[must_use]
    pub fn submit_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_wait_timeout_ms)
    }

    /// Polling interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Backoff before the given retry (1-based): base, 2x base, 4x base, ...
    #[must_use]
    pub fn retry_delay(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(factor))
    }
}

/// Learned pattern cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Record and reuse learned mappings
    pub learning_enabled: bool,
    /// Minimum confidence for a cached mapping to be tried
    pub usability_threshold: f64,
    /// Below this confidence a pattern is flagged non-authoritative
    pub retention_threshold: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            learning_enabled: true,
            usability_threshold: 0.6,
            retention_threshold: 0.4,
        }
    }
}

/// Submission rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Whether the limiter is active
    pub enabled: bool,
    /// Minimum delay between two submissions
    pub min_delay_secs: u64,
    /// Rolling hourly cap
    pub max_per_hour: u32,
    /// Take a break after this many consecutive submissions (0 = never)
    pub break_after: u32,
    /// Length of the break
    pub break_duration_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_delay_secs: 60,
            max_per_hour: 10,
            break_after: 5,
            break_duration_secs: 300,
        }
    }
}

/// Human-like delays while filling a form.
///
/// Every delay is drawn uniformly from its `[min, max]` range.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Whether delays are applied at all
    pub enabled: bool,
    /// Delay between typed characters
    pub keystroke_min_ms: u64,
    /// Upper bound of the keystroke delay
    pub keystroke_max_ms: u64,
    /// Pause after each field and before the submit click
    pub action_pause_min_ms: u64,
    /// Upper bound of the action pause
    pub action_pause_max_ms: u64,
    /// Pause once the form is ready, before the first field
    pub reading_pause_min_ms: u64,
    /// Upper bound of the reading pause
    pub reading_pause_max_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keystroke_min_ms: 50,
            keystroke_max_ms: 150,
            action_pause_min_ms: 300,
            action_pause_max_ms: 700,
            reading_pause_min_ms: 1_000,
            reading_pause_max_ms: 3_000,
        }
    }
}

/// Where outcome notices go besides the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Send a notice for successful submissions too
    pub notify_success: bool,
    /// Telegram bot token; Telegram notices are off unless both fields are set
    pub telegram_bot_token: Option<String>,
    /// Telegram chat id
    pub telegram_chat_id: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            notify_success: true,
            telegram_bot_token: None,
            telegram_chat_id: None,
        }
    }
}

impl NotificationConfig {
    /// Bot token and chat id, when both are configured and non-blank.
    #[must_use]
    pub fn telegram(&self) -> Option<(&str, &str)> {
        let token = self.telegram_bot_token.as_deref().map(str::trim)?;
        let chat = self.telegram_chat_id.as_deref().map(str::trim)?;
        (!token.is_empty() && !chat.is_empty()).then_some((token, chat))
    }
}

/// Database location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file (defaults to `<data_dir>/rollcall.db`)
    pub path: Option<PathBuf>,
}

/// Log filter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,rollcall=debug".to_string(),
        }
    }
}
