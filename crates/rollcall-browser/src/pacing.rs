//! Human-like pacing between browser actions.

use rand::Rng;
use rollcall_core::PacingConfig;
use std::ops::RangeInclusive;
use std::time::Duration;

/// Chance that a keystroke is followed by a longer hesitation.
const HESITATION_PROBABILITY: f64 = 0.1;
const HESITATION_MS: RangeInclusive<u64> = 200..=500;

/// Randomized delays for typing, reading and moving between fields.
///
/// A disabled pacing returns zero delays and never sleeps.
#[derive(Debug, Clone)]
pub struct HumanPacing {
    enabled: bool,
    keystroke_ms: RangeInclusive<u64>,
    action_pause_ms: RangeInclusive<u64>,
    reading_pause_ms: RangeInclusive<u64>,
}

impl HumanPacing {
    pub fn from_config(config: &PacingConfig) -> Self {
        Self {
            enabled: config.enabled,
            keystroke_ms: ordered(config.keystroke_min_ms, config.keystroke_max_ms),
            action_pause_ms: ordered(config.action_pause_min_ms, config.action_pause_max_ms),
            reading_pause_ms: ordered(config.reading_pause_min_ms, config.reading_pause_max_ms),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            keystroke_ms: 0..=0,
            action_pause_ms: 0..=0,
            reading_pause_ms: 0..=0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Delay after one typed character, occasionally with a hesitation on top.
    pub fn keystroke_delay(&self) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        let mut ms = rng.gen_range(self.keystroke_ms.clone());
        if rng.gen_bool(HESITATION_PROBABILITY) {
            ms += rng.gen_range(HESITATION_MS);
        }
        Duration::from_millis(ms)
    }

    pub fn action_pause_delay(&self) -> Duration {
        self.sample(&self.action_pause_ms)
    }

    pub fn reading_pause_delay(&self) -> Duration {
        self.sample(&self.reading_pause_ms)
    }

    /// Pause between two actions on the page.
    pub async fn action_pause(&self) {
        pause(self.action_pause_delay()).await;
    }

    /// Pause as if reading the form before touching it.
    pub async fn reading_pause(&self) {
        pause(self.reading_pause_delay()).await;
    }

    fn sample(&self, range: &RangeInclusive<u64>) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(range.clone()))
    }
}

impl Default for HumanPacing {
    fn default() -> Self {
        Self::disabled()
    }
}

fn ordered(min: u64, max: u64) -> RangeInclusive<u64> {
    min.min(max)..=max.max(min)
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PacingConfig {
        PacingConfig {
            enabled: true,
            keystroke_min_ms: 40,
            keystroke_max_ms: 60,
            action_pause_min_ms: 300,
            action_pause_max_ms: 300,
            reading_pause_min_ms: 1_000,
            reading_pause_max_ms: 2_000,
        }
    }

    #[test]
    fn test_delays_stay_in_range() {
        let pacing = HumanPacing::from_config(&config());
        for _ in 0..200 {
            let keystroke = pacing.keystroke_delay().as_millis() as u64;
            assert!((40..=60 + 500).contains(&keystroke), "{keystroke}");

            let reading = pacing.reading_pause_delay().as_millis() as u64;
            assert!((1_000..=2_000).contains(&reading), "{reading}");
        }
        assert_eq!(pacing.action_pause_delay(), Duration::from_millis(300));
    }

    #[test]
    fn test_disabled_is_zero() {
        let mut config = config();
        config.enabled = false;
        let pacing = HumanPacing::from_config(&config);

        assert!(!pacing.is_enabled());
        assert_eq!(pacing.keystroke_delay(), Duration::ZERO);
        assert_eq!(pacing.reading_pause_delay(), Duration::ZERO);
        assert_eq!(HumanPacing::default().action_pause_delay(), Duration::ZERO);
    }

    #[test]
    fn test_inverted_bounds_are_reordered() {
        let mut config = config();
        config.action_pause_min_ms = 500;
        config.action_pause_max_ms = 100;
        let pacing = HumanPacing::from_config(&config);

        let ms = pacing.action_pause_delay().as_millis() as u64;
        assert!((100..=500).contains(&ms));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reading_pause_sleeps() {
        let pacing = HumanPacing::from_config(&config());
        let start = tokio::time::Instant::now();
        pacing.reading_pause().await;
        assert!(start.elapsed() >= Duration::from_millis(1_000));
    }
}
