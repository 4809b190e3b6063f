//! Pacing of form submissions.
//!
//! Forms are submitted no faster than a minimum spacing, no more than a
//! rolling hourly cap, and with a longer pause after a run of consecutive
//! submissions. The limiter only ever delays; nothing is dropped.

use rollcall_core::RateLimitConfig;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::info;

const WINDOW: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wait {
    Break(Duration),
    MinDelay(Duration),
    HourlyCap(Duration),
}

#[derive(Debug, Default)]
struct LimiterState {
    last: Option<Instant>,
    consecutive: u32,
    recent: VecDeque<Instant>,
}

/// Submission rate limiter shared by all tabs.
#[derive(Debug)]
pub struct RateLimiter {
    enabled: bool,
    min_delay: Duration,
    max_per_hour: u32,
    break_after: u32,
    break_duration: Duration,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Limiter following `config`.
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            min_delay: Duration::from_secs(config.min_delay_secs),
            max_per_hour: config.max_per_hour,
            break_after: config.break_after,
            break_duration: Duration::from_secs(config.break_duration_secs),
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// A limiter that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(&RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        })
    }

    /// Wait until another submission is allowed, then count it.
    ///
    /// Callers queue on the limiter in arrival order.
    pub async fn acquire(&self) {
        if !self.enabled {
            return;
        }

        let mut state = self.state.lock().await;
        while let Some(wait) = self.next_wait(&mut state, Instant::now()) {
            match wait {
                Wait::Break(duration) => {
                    info!(
                        consecutive = state.consecutive,
                        secs = duration.as_secs(),
                        "Taking a break between submissions"
                    );
                    tokio::time::sleep(duration).await;
                    state.consecutive = 0;
                }
                Wait::MinDelay(duration) => {
                    info!(secs = duration.as_secs_f64(), "Waiting before next submission");
                    tokio::time::sleep(duration).await;
                }
                Wait::HourlyCap(duration) => {
                    info!(
                        hourly = state.recent.len(),
                        max = self.max_per_hour,
                        secs = duration.as_secs(),
                        "Hourly submission cap reached"
                    );
                    tokio::time::sleep(duration).await;
                }
            }
        }

        let now = Instant::now();
        state.last = Some(now);
        state.consecutive += 1;
        state.recent.push_back(now);
    }

    fn next_wait(&self, state: &mut LimiterState, now: Instant) -> Option<Wait> {
        while state
            .recent
            .front()
            .is_some_and(|t| now.duration_since(*t) >= WINDOW)
        {
            state.recent.pop_front();
        }

        if self.break_after > 0 && state.consecutive >= self.break_after {
            return Some(Wait::Break(self.break_duration));
        }

        if let Some(last) = state.last {
            let elapsed = now.duration_since(last);
            if elapsed < self.min_delay {
                return Some(Wait::MinDelay(self.min_delay - elapsed));
            }
        }

        let cap = usize::try_from(self.max_per_hour).unwrap_or(usize::MAX);
        if self.max_per_hour > 0 && state.recent.len() >= cap {
            if let Some(oldest) = state.recent.front() {
                let until = (*oldest + WINDOW).saturating_duration_since(now);
                return Some(Wait::HourlyCap(until.max(Duration::from_millis(1))));
            }
        }

        None
    }
}
