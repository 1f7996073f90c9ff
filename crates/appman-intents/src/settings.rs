//! Resolved broker timeouts.

use std::time::Duration;

use appman_config::Config;
use appman_core::TimeoutFactor;

/// Broker timeouts, already scaled by the timeout factor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentSettings {
    /// Time the system UI has to pick a handler.
    pub disambiguation_timeout: Duration,
    /// Time a handler has to start and connect.
    pub start_application_timeout: Duration,
    /// Time a handler has to reply.
    pub reply_from_application_timeout: Duration,
    /// Time a requesting client waits for the final reply.
    pub reply_from_system_timeout: Duration,
}

impl Default for IntentSettings {
    fn default() -> Self {
        Self {
            disambiguation_timeout: Duration::from_secs(10),
            start_application_timeout: Duration::from_secs(3),
            reply_from_application_timeout: Duration::from_secs(5),
            reply_from_system_timeout: Duration::from_secs(20),
        }
    }
}

impl IntentSettings {
    /// Resolve from configuration.
    #[must_use]
    pub fn from_config(config: &Config, factor: TimeoutFactor) -> Self {
        let i = &config.intents;
        Self {
            disambiguation_timeout: factor.scale_ms(i.disambiguation_timeout_ms),
            start_application_timeout: factor.scale_ms(i.start_application_timeout_ms),
            reply_from_application_timeout: factor.scale_ms(i.reply_from_application_timeout_ms),
            reply_from_system_timeout: factor.scale_ms(i.reply_from_system_timeout_ms),
        }
    }

    /// Deadline a handler-side client uses: 90% of the broker's, so the
    /// client's error reply arrives before the broker gives up.
    #[must_use]
    pub fn handler_reply_timeout(&self) -> Duration {
        self.reply_from_application_timeout
            .saturating_mul(9)
            .checked_div(10)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_scales() {
        let mut config = Config::default();
        config.intents.reply_from_application_timeout_ms = 1000;
        let settings = IntentSettings::from_config(&config, TimeoutFactor::new(3));
        assert_eq!(
            settings.reply_from_application_timeout,
            Duration::from_secs(3)
        );
        assert_eq!(settings.handler_reply_timeout(), Duration::from_millis(2700));
        assert_eq!(settings.disambiguation_timeout, Duration::from_secs(30));
    }
}
