use std::time::Duration;

use crate::ReconnectOptions;

/// Connection lifecycle state of the event stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Reconnect ceiling reached; only an explicit `connect()` restarts.
    PermanentlyFailed,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Tracks reconnect attempts and yields the delay before the next one.
///
/// The delay grows linearly with the attempt number and is capped:
/// `min(base_interval * n, cap_interval)`.
#[derive(Debug)]
pub(crate) struct ReconnectState {
    options: ReconnectOptions,
    attempts: u32,
}

impl ReconnectState {
    pub(crate) fn new(options: ReconnectOptions) -> Self {
        Self {
            options,
            attempts: 0,
        }
    }

    /// Returns the backoff delay for the next attempt, or `None` once the
    /// attempt ceiling is reached.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.options.max_attempts {
            return None;
        }
        self.attempts += 1;
        let delay = self.options.base_interval.saturating_mul(self.attempts);
        Some(delay.min(self.options.cap_interval))
    }

    /// Resets the attempt counter after a successful connect.
    pub(crate) fn reset(&mut self) {
        self.attempts = 0;
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::ReconnectState;
    use crate::ReconnectOptions;

    fn options(max_attempts: u32) -> ReconnectOptions {
        ReconnectOptions {
            base_interval: Duration::from_secs(5),
            cap_interval: Duration::from_secs(30),
            max_attempts,
            ..ReconnectOptions::default()
        }
    }

    #[test]
    fn delay_grows_linearly_until_the_cap() {
        let mut state = ReconnectState::new(options(10));
        assert_eq!(state.next_delay(), Some(Duration::from_secs(5)));
        assert_eq!(state.next_delay(), Some(Duration::from_secs(10)));
        assert_eq!(state.next_delay(), Some(Duration::from_secs(15)));
        for _ in 3..7 {
            state.next_delay();
        }
        // attempt 8 would be 40s, capped at 30s
        assert_eq!(state.next_delay(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn ceiling_stops_scheduling() {
        let mut state = ReconnectState::new(options(2));
        assert!(state.next_delay().is_some());
        assert!(state.next_delay().is_some());
        assert_eq!(state.next_delay(), None);
        assert_eq!(state.attempts(), 2);
        // still exhausted on repeat polls
        assert_eq!(state.next_delay(), None);
    }

    #[test]
    fn reset_restores_the_full_budget() {
        let mut state = ReconnectState::new(options(1));
        assert!(state.next_delay().is_some());
        assert_eq!(state.next_delay(), None);
        state.reset();
        assert_eq!(state.attempts(), 0);
        assert_eq!(state.next_delay(), Some(Duration::from_secs(5)));
    }
}
