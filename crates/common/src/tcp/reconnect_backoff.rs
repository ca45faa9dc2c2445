use std::time::Duration;

/// Delay schedule for dial-out reconnects; the last entry repeats.
pub const RECONNECT_SCHEDULE_MS: [u64; 5] = [0, 100, 500, 1000, 2000];

/// A session must stay up this long before the schedule starts over.
pub const STABLE_SESSION: Duration = Duration::from_secs(1);

/// Reconnect delay sequence shared by every dial loop.
///
/// Yields `0, 100ms, 500ms, 1s, 2s, 2s, ...`, each capped by `max_delay`
/// when that is non-zero, and starts over after `reset` or after a session
/// that lasted at least [`STABLE_SESSION`]. A peer that accepts and closes
/// right away keeps walking the schedule.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    attempt: usize,
    max_delay: Option<Duration>,
}

impl ReconnectBackoff {
    pub fn new(max_delay: Duration) -> Self {
        Self {
            attempt: 0,
            max_delay: (!max_delay.is_zero()).then_some(max_delay),
        }
    }

    /// Delay to wait before the next connection attempt.
    pub fn next_delay(&mut self) -> Duration {
        let index = self.attempt.min(RECONNECT_SCHEDULE_MS.len() - 1);
        self.attempt = self.attempt.saturating_add(1);

        let delay = Duration::from_millis(RECONNECT_SCHEDULE_MS[index]);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Record how long a connected session lasted. Returns `true` when the
    /// schedule was reset.
    pub fn session_ended(&mut self, uptime: Duration) -> bool {
        if uptime >= STABLE_SESSION {
            self.reset();
            true
        } else {
            false
        }
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn take_ms(backoff: &mut ReconnectBackoff, n: usize) -> Vec<u64> {
        (0..n).map(|_| backoff.next_delay().as_millis() as u64).collect()
    }

    #[test]
    fn test_schedule_then_repeat() {
        let mut backoff = ReconnectBackoff::new(Duration::from_secs(2));
        assert_eq!(
            take_ms(&mut backoff, 8),
            vec![0, 100, 500, 1000, 2000, 2000, 2000, 2000]
        );
    }

    #[test]
    fn test_reset_restarts_schedule() {
        let mut backoff = ReconnectBackoff::default();
        take_ms(&mut backoff, 4);
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(take_ms(&mut backoff, 3), vec![0, 100, 500]);
    }

    #[test]
    fn test_short_session_keeps_walking_schedule() {
        let mut backoff = ReconnectBackoff::default();
        assert_eq!(backoff.next_delay(), Duration::ZERO);

        assert!(!backoff.session_ended(Duration::from_millis(5)));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));

        assert!(!backoff.session_ended(Duration::from_millis(999)));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_stable_session_restarts_schedule() {
        let mut backoff = ReconnectBackoff::default();
        take_ms(&mut backoff, 3);

        assert!(backoff.session_ended(STABLE_SESSION));
        assert_eq!(take_ms(&mut backoff, 2), vec![0, 100]);
    }

    #[test]
    fn test_lower_cap_applies() {
        let mut backoff = ReconnectBackoff::new(Duration::from_millis(300));
        assert_eq!(take_ms(&mut backoff, 5), vec![0, 100, 300, 300, 300]);
    }

    #[test]
    fn test_zero_cap_means_uncapped() {
        let mut backoff = ReconnectBackoff::new(Duration::ZERO);
        assert_eq!(take_ms(&mut backoff, 6), vec![0, 100, 500, 1000, 2000, 2000]);
    }
}
