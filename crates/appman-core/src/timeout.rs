//! Global slow-motion factor applied to every configured timeout.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Multiplier applied to configured timeouts, e.g. when running under a
/// debugger or valgrind. Scaling happens exactly once, when a configured
/// millisecond value is turned into a [`Duration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeoutFactor(u32);

impl Default for TimeoutFactor {
    fn default() -> Self {
        Self(1)
    }
}

impl TimeoutFactor {
    /// Create a factor. Zero is clamped to one.
    #[must_use]
    pub fn new(factor: u32) -> Self {
        Self(factor.max(1))
    }

    /// The raw multiplier.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    /// Scale a configured millisecond value.
    #[must_use]
    pub fn scale_ms(self, ms: u64) -> Duration {
        Duration::from_millis(ms.saturating_mul(u64::from(self.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaling() {
        assert_eq!(TimeoutFactor::default().scale_ms(250), Duration::from_millis(250));
        assert_eq!(TimeoutFactor::new(4).scale_ms(250), Duration::from_secs(1));
        assert_eq!(TimeoutFactor::new(0).get(), 1);
        assert_eq!(
            TimeoutFactor::new(u32::MAX).scale_ms(u64::MAX),
            Duration::from_millis(u64::MAX)
        );
    }
}
