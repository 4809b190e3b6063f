//! Link records coming from the message listener.

use crate::error::{Result, SubmitError};
use chrono::{DateTime, Utc};
use regex::Regex;
use rollcall_db::queue_items::NewQueueItem;
use rollcall_forms::ProviderRegistry;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// One message that carried a form link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEvent {
    /// Full text of the message
    pub message_text: String,
    /// Form URL found in the message
    pub url: String,
    /// Chat or group the message was posted in
    pub group_name: String,
    /// When the message was received
    pub timestamp: DateTime<Utc>,
}

impl LinkEvent {
    /// Build an event from a raw message, taking its last form link.
    ///
    /// Returns `None` when the message carries no recognized form URL.
    #[must_use]
    pub fn from_message(
        registry: &ProviderRegistry,
        message_text: &str,
        group_name: &str,
        timestamp: DateTime<Utc>,
    ) -> Option<Self> {
        let url = extract_form_urls(registry, message_text).pop()?;
        Some(Self {
            message_text: message_text.to_string(),
            url,
            group_name: group_name.to_string(),
            timestamp,
        })
    }

    /// Parse one JSON-lines record.
    pub fn from_json(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| SubmitError::InvalidLink(e.to_string()))
    }

    /// Queue row for this event.
    #[must_use]
    pub fn to_queue_item(&self) -> NewQueueItem {
        NewQueueItem {
            message_text: self.message_text.clone(),
            url: self.url.clone(),
            group_name: self.group_name.clone(),
            received_at: self.timestamp,
        }
    }
}

fn url_regex() -> &'static Regex {
    static URL: OnceLock<Regex> = OnceLock::new();
    URL.get_or_init(|| Regex::new(r"https?://[^\s<>]+").expect("valid regex"))
}

/// Recognized form URLs in `text`, in order of appearance.
///
/// Chat clients tend to glue punctuation onto links, so trailing `.,;:!?)`
/// and quotes are dropped. The most recent link is the last element.
#[must_use]
pub fn extract_form_urls(registry: &ProviderRegistry, text: &str) -> Vec<String> {
    url_regex()
        .find_iter(text)
        .map(|m| {
            m.as_str()
                .trim_end_matches(['.', ',', ';', ':', '!', '?', ')', '"', '\''])
                .to_string()
        })
        .filter(|url| registry.recognizes(url))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_keeps_order() {
        let registry = ProviderRegistry::default();
        let text = "Yoklama: https://forms.office.com/r/AAA sonra https://forms.office.com/r/BBB";
        let urls = extract_form_urls(&registry, text);
        assert_eq!(
            urls,
            vec![
                "https://forms.office.com/r/AAA".to_string(),
                "https://forms.office.com/r/BBB".to_string()
            ]
        );
    }

    #[test]
    fn test_extract_ignores_unknown_hosts_and_trailing_punctuation() {
        let registry = ProviderRegistry::default();
        let text = "see https://example.com/x and (https://forms.gle/abc123).";
        assert_eq!(
            extract_form_urls(&registry, text),
            vec!["https://forms.gle/abc123".to_string()]
        );
    }

    #[test]
    fn test_from_message_takes_last_link() {
        let registry = ProviderRegistry::default();
        let event = LinkEvent::from_message(
            &registry,
            "old https://forms.office.com/r/OLD new https://forms.office.com/r/NEW",
            "CENG 301",
            Utc::now(),
        )
        .unwrap();
        assert_eq!(event.url, "https://forms.office.com/r/NEW");
        assert_eq!(event.group_name, "CENG 301");
    }

    #[test]
    fn test_from_message_without_link() {
        let registry = ProviderRegistry::default();
        assert!(LinkEvent::from_message(&registry, "no links today", "g", Utc::now()).is_none());
    }

    #[test]
    fn test_from_json() {
        let line = r#"{"message_text":"hi","url":"https://forms.office.com/r/X","group_name":"g","timestamp":"2026-03-02T09:15:00Z"}"#;
        let event = LinkEvent::from_json(line).unwrap();
        assert_eq!(event.url, "https://forms.office.com/r/X");
        assert_eq!(event.to_queue_item().received_at, event.timestamp);

        assert!(matches!(
            LinkEvent::from_json("{not json"),
            Err(SubmitError::InvalidLink(_))
        ));
    }
}
