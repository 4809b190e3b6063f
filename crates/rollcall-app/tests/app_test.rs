use chrono::Utc;
use rollcall_app::state::AppState;
use rollcall_browser::fixture::{FixturePage, FixtureSession};
use rollcall_core::{AppConfig, QueueStatus};
use rollcall_db::queue_items;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const FORM_URL: &str = "https://forms.office.com/r/CENG301Week5";

const FORM: &str = r#"<html><body><form>
    <div data-automation-id="questionItem"><label for="a">Ad Soyad</label><input id="a" type="text"></div>
    <div data-automation-id="questionItem"><label for="b">Öğrenci Numarası</label><input id="b" type="text"></div>
    <button id="send" data-automation-id="submitButton">Gönder</button>
  </form></body></html>"#;

const DONE: &str = r#"<html><body><div data-automation-id="thankYouMessage">Yanıtınız kaydedildi</div></body></html>"#;

fn config(dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.identity.full_name = "Halil Eren Kepiç".to_string();
    config.identity.student_id = "2306002093".to_string();
    config.database.path = Some(dir.path().join("data").join("rollcall.db"));
    config.evidence.dir = Some(dir.path().join("evidence"));
    config.evidence.capture_on_success = false;
    config.rate_limit.enabled = false;
    config.pacing.enabled = false;
    config.submission.retry_base_delay_ms = 5;
    config.submission.poll_interval_ms = 5;
    config.submission.form_ready_timeout_ms = 500;
    config.submission.submit_wait_timeout_ms = 500;
    config
}

fn session() -> Arc<FixtureSession> {
    let session = Arc::new(FixtureSession::new());
    session.add_page(FixturePage::new(FORM_URL, FORM).on_click("#send", FORM_URL, DONE));
    session
}

fn record(url: &str) -> String {
    serde_json::json!({
        "message_text": format!("Yoklama linki: {url}"),
        "url": url,
        "group_name": "CENG 301",
        "timestamp": Utc::now(),
    })
    .to_string()
}

#[tokio::test]
async fn test_stdin_records_are_submitted() {
    let dir = TempDir::new().unwrap();
    let session = session();
    let state = AppState::initialize(config(&dir), session.clone())
        .await
        .unwrap();

    let input = format!("{}\nnot a record\n{}\n", record(FORM_URL), record(FORM_URL));
    let summary = state
        .process(input.as_bytes(), CancellationToken::new())
        .await;

    assert_eq!(summary.success, 1);
    assert_eq!(summary.ignored, 1);
    assert_eq!(session.open_calls(), 1);
    assert!(dir.path().join("data").join("rollcall.db").exists());

    let stats = state
        .report_daily_stats(Utc::now().date_naive())
        .await
        .unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.success, 1);
}

#[tokio::test]
async fn test_pending_items_run_before_new_links() {
    let dir = TempDir::new().unwrap();
    let session = session();
    let state = AppState::initialize(config(&dir), session.clone())
        .await
        .unwrap();

    let item = queue_items::create(
        state.db.pool(),
        queue_items::NewQueueItem {
            message_text: FORM_URL.to_string(),
            url: FORM_URL.to_string(),
            group_name: "CENG 301".to_string(),
            received_at: Utc::now(),
        },
    )
    .await
    .unwrap();

    let summary = state.process(&b""[..], CancellationToken::new()).await;
    assert_eq!(summary.success, 0);

    let item = queue_items::get_by_id(state.db.pool(), &item.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.status, QueueStatus::Completed);
    assert_eq!(session.open_calls(), 1);
}

#[tokio::test]
async fn test_incomplete_identity_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.identity.student_id = "   ".to_string();

    let result = AppState::initialize(config, session()).await;
    assert!(result.is_err());
}
