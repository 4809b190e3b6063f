//! Link records read from a line-oriented stream.
//!
//! Each line is either a JSON `LinkEvent` written by the chat listener or a
//! raw message, from which the last form link is taken.

use chrono::Utc;
use rollcall_forms::ProviderRegistry;
use rollcall_submitter::LinkEvent;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Group recorded for raw messages, which carry no group name.
pub const RAW_GROUP: &str = "stdin";

/// Turn one input line into a link event.
pub fn parse_line(registry: &ProviderRegistry, line: &str) -> Option<LinkEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if !line.starts_with('{') {
        let event = LinkEvent::from_message(registry, line, RAW_GROUP, Utc::now());
        if event.is_none() {
            debug!("No form link in message");
        }
        return event;
    }

    match LinkEvent::from_json(line) {
        Ok(event) if registry.recognizes(&event.url) => Some(event),
        Ok(event) => {
            warn!(url = %event.url, group = %event.group_name, "Ignoring link to unknown form provider");
            None
        }
        Err(e) => {
            warn!("Skipping malformed link record: {}", e);
            None
        }
    }
}

/// Forward parsed lines into `tx` until EOF, a read error, or cancellation.
///
/// Returns the number of events forwarded. Dropping `tx` on return closes
/// the channel, which ends the submission loop once it drains.
pub async fn forward_lines<R>(
    reader: R,
    registry: &ProviderRegistry,
    tx: mpsc::Sender<LinkEvent>,
    cancel: CancellationToken,
) -> usize
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;

    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                let Some(event) = parse_line(registry, &line) else {
                    continue;
                };
                if tx.send(event).await.is_err() {
                    debug!("Submission loop gone, stopping intake");
                    break;
                }
                forwarded += 1;
            }
            Ok(None) => {
                debug!("Link stream reached EOF");
                break;
            }
            Err(e) => {
                warn!("Failed to read link stream: {}", e);
                break;
            }
        }
    }

    forwarded
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORM: &str = "https://forms.office.com/r/AbC123";

    #[test]
    fn test_json_record() {
        let line = format!(
            r#"{{"message_text":"yoklama {FORM}","url":"{FORM}","group_name":"CENG 301","timestamp":"2026-10-12T09:00:00Z"}}"#
        );
        let event = parse_line(&ProviderRegistry::default(), &line).unwrap();
        assert_eq!(event.url, FORM);
        assert_eq!(event.group_name, "CENG 301");
    }

    #[test]
    fn test_raw_message_takes_last_link() {
        let line = "eski: https://forms.office.com/r/Old yeni: https://forms.office.com/r/New";
        let event = parse_line(&ProviderRegistry::default(), line).unwrap();
        assert_eq!(event.url, "https://forms.office.com/r/New");
        assert_eq!(event.group_name, RAW_GROUP);
    }

    #[test]
    fn test_unusable_lines_are_skipped() {
        let registry = ProviderRegistry::default();
        assert!(parse_line(&registry, "   ").is_none());
        assert!(parse_line(&registry, "no links here").is_none());
        assert!(parse_line(&registry, "{not json").is_none());
        let unknown = r#"{"message_text":"x","url":"https://example.com/a","group_name":"g","timestamp":"2026-10-12T09:00:00Z"}"#;
        assert!(parse_line(&registry, unknown).is_none());
    }

    #[tokio::test]
    async fn test_forward_until_eof() {
        let input = format!("hello\n{FORM}\n\nhttps://docs.google.com/forms/d/e/x/viewform\n");
        let (tx, mut rx) = mpsc::channel(8);

        let forwarded = forward_lines(
            input.as_bytes(),
            &ProviderRegistry::default(),
            tx,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(forwarded, 2);
        assert_eq!(rx.recv().await.unwrap().url, FORM);
        assert!(rx.recv().await.unwrap().url.starts_with("https://docs.google.com/forms"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_intake_forwards_nothing() {
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        // a reader that never yields
        let (_writer, reader) = tokio::io::duplex(64);
        let forwarded = forward_lines(
            tokio::io::BufReader::new(reader),
            &ProviderRegistry::default(),
            tx,
            cancel,
        )
        .await;

        assert_eq!(forwarded, 0);
        assert!(rx.recv().await.is_none());
    }
}
