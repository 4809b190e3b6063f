//! Outcome notices.
//!
//! The orchestrator reports every terminal item to its [`Notifier`]s. The
//! log notifier is always present; a Telegram chat can be added through
//! configuration.

use async_trait::async_trait;
use rollcall_core::NotificationConfig;
use rollcall_db::form_submissions::DailyStats;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const TELEGRAM_API: &str = "https://api.telegram.org";
const DETAIL_LIMIT: usize = 200;

/// Something worth telling the user about.
#[derive(Debug, Clone)]
pub enum Notice {
    /// A form was submitted
    Success {
        /// Form URL
        url: String,
        /// Name written into the form
        student_name: String,
        /// Time from first attempt to terminal state
        processing_ms: u64,
    },
    /// A form could not be submitted
    Failure {
        /// Form URL
        url: String,
        /// Error kind, e.g. `validation_rejected`
        kind: String,
        /// Error message
        message: String,
    },
    /// A captcha blocked the form; it needs a person
    Captcha {
        /// Form URL
        url: String,
    },
    /// End-of-run statistics for one day
    DailySummary(DailyStats),
}

/// Receives notices. Delivery is best effort and never fails the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notice.
    async fn notify(&self, notice: &Notice);
}

/// Writes notices to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: &Notice) {
        match notice {
            Notice::Success {
                url,
                student_name,
                processing_ms,
            } => info!(url = %url, student = %student_name, processing_ms, "Form submitted"),
            Notice::Failure { url, kind, message } => {
                warn!(url = %url, kind = %kind, "Form failed: {}", message);
            }
            Notice::Captcha { url } => {
                error!(url = %url, "Captcha detected, manual intervention needed");
            }
            Notice::DailySummary(stats) => info!(
                date = %stats.date,
                total = stats.total,
                success = stats.success,
                failed = stats.failed,
                captcha = stats.captcha,
                skipped = stats.skipped,
                avg_processing_ms = stats.avg_processing_ms,
                "Daily summary"
            ),
        }
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: String,
    parse_mode: &'static str,
}

/// Sends notices to a Telegram chat through the bot API.
pub struct TelegramNotifier {
    client: reqwest::Client,
    endpoint: String,
    chat_id: String,
    notify_success: bool,
}

impl TelegramNotifier {
    /// Build from configuration; `None` when the bot token or chat id is unset.
    pub fn from_config(config: &NotificationConfig) -> Option<Self> {
        let (token, chat_id) = config.telegram()?;
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!("Failed to create HTTP client, Telegram notices disabled: {}", e);
                return None;
            }
        };

        Some(Self {
            client,
            endpoint: format!("{TELEGRAM_API}/bot{token}/sendMessage"),
            chat_id: chat_id.to_string(),
            notify_success: config.notify_success,
        })
    }

    async fn send(&self, text: String) -> Result<(), reqwest::Error> {
        self.client
            .post(&self.endpoint)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text,
                parse_mode: "HTML",
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, notice: &Notice) {
        if matches!(notice, Notice::Success { .. }) && !self.notify_success {
            return;
        }
        match self.send(render_html(notice)).await {
            Ok(()) => debug!("Telegram notice sent"),
            Err(e) => warn!("Failed to send Telegram notice: {}", e),
        }
    }
}

/// Telegram HTML body for a notice.
pub fn render_html(notice: &Notice) -> String {
    match notice {
        Notice::Success {
            url,
            student_name,
            processing_ms,
        } => format!(
            "<b>Form submitted</b>\nStudent: {}\nURL: {}\nTime: {:.1}s",
            escape(student_name),
            escape(url),
            Duration::from_millis(*processing_ms).as_secs_f64()
        ),
        Notice::Failure { url, kind, message } => format!(
            "<b>Form failed</b>\nKind: {}\nURL: {}\nDetail: {}",
            escape(kind),
            escape(url),
            escape(&truncate(message, DETAIL_LIMIT))
        ),
        Notice::Captcha { url } => format!(
            "<b>CAPTCHA detected</b>\nManual intervention needed.\nURL: {}",
            escape(url)
        ),
        Notice::DailySummary(stats) => format!(
            "<b>Daily summary {}</b>\nTotal: {}\nSuccess: {}\nFailed: {}\nCaptcha: {}\nSkipped: {}",
            stats.date, stats.total, stats.success, stats.failed, stats.captcha, stats.skipped
        ),
    }
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_telegram_needs_credentials() {
        assert!(TelegramNotifier::from_config(&NotificationConfig::default()).is_none());

        let config = NotificationConfig {
            telegram_bot_token: Some("123:abc".to_string()),
            telegram_chat_id: Some("-1001".to_string()),
            ..NotificationConfig::default()
        };
        let notifier = TelegramNotifier::from_config(&config).expect("configured");
        assert_eq!(
            notifier.endpoint,
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
        assert_eq!(notifier.chat_id, "-1001");
    }

    #[test]
    fn test_render_escapes_and_truncates() {
        let notice = Notice::Failure {
            url: "https://forms.office.com/r/a?x=1&y=2".to_string(),
            kind: "validation_rejected".to_string(),
            message: format!("<b>{}</b>", "ş".repeat(300)),
        };
        let text = render_html(&notice);

        assert!(text.contains("x=1&amp;y=2"));
        assert!(text.contains("&lt;b&gt;"));
        assert!(text.ends_with("..."));
        assert!(text.chars().filter(|c| *c == 'ş').count() < 200);
    }

    #[test]
    fn test_render_summary() {
        let stats = DailyStats {
            date: NaiveDate::from_ymd_opt(2025, 3, 4).unwrap(),
            total: 5,
            success: 3,
            failed: 1,
            captcha: 1,
            skipped: 0,
            avg_processing_ms: 1200.0,
        };
        let text = render_html(&Notice::DailySummary(stats));
        assert!(text.contains("2025-03-04"));
        assert!(text.contains("Success: 3"));
    }

    #[test]
    fn test_render_success_seconds() {
        let text = render_html(&Notice::Success {
            url: "https://forms.gle/x".to_string(),
            student_name: "Halil Eren Kepiç".to_string(),
            processing_ms: 2_500,
        });
        assert!(text.contains("Time: 2.5s"));
    }
}
