//! Reconnection Policy
//!
//! Exponential backoff with jitter between feed connection attempts.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::WebSocketSettings;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Whether to reconnect at all after a drop.
    pub enabled: bool,
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Growth factor applied after each attempt.
    pub multiplier: f64,
    /// Randomization as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempts allowed between successful connections (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    /// Build from the WebSocket settings block.
    #[must_use]
    pub fn from_websocket_settings(settings: &WebSocketSettings) -> Self {
        Self {
            enabled: settings.reconnect_enabled,
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            max_attempts: settings.max_reconnect_attempts,
            ..Self::default()
        }
    }

    /// Policy that never reconnects.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Stateful backoff schedule.
///
/// ```rust
/// use ticker_ingest::infrastructure::coinbase::{ReconnectConfig, ReconnectPolicy};
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
/// assert!(policy.next_delay().is_some());
///
/// // A connection opened successfully.
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a policy positioned at its initial delay.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt, or `None` when no attempt is allowed.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count += 1;
        let delay = self.apply_jitter(self.current_delay);
        self.current_delay = self.grow(self.current_delay);

        Some(delay)
    }

    /// Restart the schedule after a successful connection.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.enabled
            && (self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts)
    }

    /// Next base delay: scaled by the multiplier, clamped to `max_delay`.
    fn grow(&self, delay: Duration) -> Duration {
        let max = self.config.max_delay;
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.config.multiplier)
            .map_or(max, |next| next.min(max))
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        let factor = self.config.jitter_factor;
        if factor <= 0.0 {
            return delay;
        }

        let scale = 1.0 + rand::rng().random_range(-factor..=factor);
        Duration::try_from_secs_f64(delay.as_secs_f64() * scale)
            .unwrap_or(delay)
            .max(Duration::from_millis(1))
    }
}
