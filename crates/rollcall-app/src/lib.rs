//! Rollcall application shell.
//!
//! Loads configuration, starts the browser, and feeds link records from
//! stdin into the submission loop until EOF or Ctrl-C. Form logic lives in
//! the other `crates/` members.

pub mod intake;
pub mod state;

use anyhow::Context;
use chrono::Utc;
use rollcall_browser::{BrowserEngine, HumanPacing};
use rollcall_core::AppConfig;
use state::AppState;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Initialize tracing subscriber for logging.
///
/// `RUST_LOG` wins over the configured level.
fn init_tracing(default_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

/// Run until stdin closes or Ctrl-C, then report today's statistics.
pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::load_with_env().context("failed to load configuration")?;
    init_tracing(&config.logging.level);
    config.validate()?;

    info!("Starting Rollcall v{}", env!("CARGO_PKG_VERSION"));

    let engine = BrowserEngine::from_config(&config.browser)
        .await
        .context("failed to start browser")?
        .with_pacing(HumanPacing::from_config(&config.pacing));
    let state = AppState::initialize(config, Arc::new(engine)).await?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown requested, finishing in-flight submissions");
                    cancel.cancel();
                }
                Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
            }
        }
    });

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let summary = state.process(stdin, cancel).await;
    info!(
        success = summary.success,
        failed = summary.failed,
        captcha = summary.captcha,
        skipped = summary.skipped,
        ignored = summary.ignored,
        "Rollcall stopped"
    );

    state.report_daily_stats(Utc::now().date_naive()).await;
    state.db.close().await;
    Ok(())
}
