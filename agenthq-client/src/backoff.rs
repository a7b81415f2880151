//! Reconnection delay policy.

use crate::config::ReconnectConfig;
use std::time::Duration;

/// Exponential backoff: the delay doubles after each failed attempt, up to
/// a cap, and snaps back to the initial value after a successful connect.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.initial_delay(), config.max_delay())
    }

    /// Returns the delay to wait before the next attempt and doubles the one after.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Restores the initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Uses a server-advertised restart delay for the next attempt.
    pub fn apply_hint(&mut self, hint: Duration) {
        self.current = hint;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_doubles_up_to_cap() {
        let mut backoff = Backoff::new(secs(1), secs(30));
        let delays: Vec<_> = (0..8).map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![secs(1), secs(2), secs(4), secs(8), secs(16), secs(30), secs(30), secs(30)]
        );
    }

    #[test]
    fn test_reset_after_success() {
        let mut backoff = Backoff::new(secs(1), secs(30));
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.current, secs(4));
        backoff.reset();
        assert_eq!(backoff.next_delay(), secs(1));
    }

    #[test]
    fn test_hint_replaces_next_delay() {
        let mut backoff = Backoff::new(secs(1), secs(30));
        backoff.apply_hint(Duration::from_millis(2500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(2500));
        assert_eq!(backoff.next_delay(), secs(5));
    }

    #[test]
    fn test_from_config() {
        let backoff = Backoff::from_config(&ReconnectConfig::default());
        assert_eq!(backoff.current, secs(1));
    }
}
