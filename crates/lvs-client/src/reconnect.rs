//! Reconnect state machine for the sync channel.

use std::time::Duration;

/// Delay before the first reconnect attempt.
pub const BASE_BACKOFF: Duration = Duration::from_millis(1000);

/// Growth factor applied to the delay after each failed attempt.
pub const BACKOFF_FACTOR: f64 = 1.1;

/// Failed attempts tolerated before giving up.
pub const MAX_ATTEMPTS: u32 = 25;

/// Channel lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    /// Closed after the given number of consecutive failed attempts.
    Closed(u32),
    GiveUp,
}

/// What an open transition means for the page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opened {
    /// First successful connection.
    First,
    /// Connection restored after a drop; local state is stale.
    Reconnected,
}

/// Tracks attempts and backoff across channel drops.
#[derive(Debug)]
pub struct Reconnect {
    state: ConnectionState,
    attempts: u32,
    base: Duration,
    backoff: Duration,
    ever_closed: bool,
}

impl Default for Reconnect {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconnect {
    pub fn new() -> Self {
        Self::with_base(BASE_BACKOFF)
    }

    /// Machine whose first delay is `base`.
    pub fn with_base(base: Duration) -> Self {
        Self {
            state: ConnectionState::Connecting,
            attempts: 0,
            base,
            backoff: base,
            ever_closed: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failed attempts since the last open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Move from `Closed` back to `Connecting`. No effect in other states.
    pub fn begin_attempt(&mut self) {
        if matches!(self.state, ConnectionState::Closed(_)) {
            self.state = ConnectionState::Connecting;
        }
    }

    /// The channel opened. Resets the counter and backoff.
    pub fn on_open(&mut self) -> Opened {
        let opened = if self.ever_closed {
            Opened::Reconnected
        } else {
            Opened::First
        };
        self.state = ConnectionState::Open;
        self.attempts = 0;
        self.backoff = self.base;
        opened
    }

    /// The channel closed or an attempt failed.
    ///
    /// Returns the delay before the next attempt, or `None` once the attempt
    /// budget is spent and the machine is in `GiveUp`.
    pub fn on_close(&mut self) -> Option<Duration> {
        if self.state == ConnectionState::GiveUp {
            return None;
        }
        self.ever_closed = true;

        if self.attempts >= MAX_ATTEMPTS {
            self.state = ConnectionState::GiveUp;
            return None;
        }

        let delay = self.backoff;
        self.attempts += 1;
        self.backoff = self.backoff.mul_f64(BACKOFF_FACTOR);
        self.state = ConnectionState::Closed(self.attempts);
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_open() {
        let mut reconnect = Reconnect::new();
        assert_eq!(reconnect.state(), ConnectionState::Connecting);
        assert_eq!(reconnect.on_open(), Opened::First);
        assert_eq!(reconnect.state(), ConnectionState::Open);
    }

    #[test]
    fn test_backoff_is_non_decreasing_and_gives_up_after_budget() {
        let mut reconnect = Reconnect::new();
        reconnect.on_open();

        let mut last = Duration::ZERO;
        for attempt in 1..=MAX_ATTEMPTS {
            let delay = reconnect.on_close().unwrap();
            assert!(delay >= last, "attempt {attempt}: {delay:?} < {last:?}");
            assert_eq!(reconnect.state(), ConnectionState::Closed(attempt));
            last = delay;
            reconnect.begin_attempt();
            assert_eq!(reconnect.state(), ConnectionState::Connecting);
        }

        assert_eq!(reconnect.on_close(), None);
        assert_eq!(reconnect.state(), ConnectionState::GiveUp);
        assert_eq!(reconnect.on_close(), None);
    }

    #[test]
    fn test_first_delay_is_base_and_grows() {
        let mut reconnect = Reconnect::new();
        assert_eq!(reconnect.on_close(), Some(BASE_BACKOFF));
        assert_eq!(reconnect.on_close(), Some(Duration::from_millis(1100)));
    }

    #[test]
    fn test_open_after_drop_is_reconnection_and_resets() {
        let mut reconnect = Reconnect::new();
        reconnect.on_open();
        reconnect.on_close();
        reconnect.on_close();
        reconnect.begin_attempt();

        assert_eq!(reconnect.on_open(), Opened::Reconnected);
        assert_eq!(reconnect.attempts(), 0);
        assert_eq!(reconnect.on_close(), Some(BASE_BACKOFF));
    }

    #[test]
    fn test_give_up_is_terminal() {
        let mut reconnect = Reconnect::new();
        while reconnect.on_close().is_some() {}
        reconnect.begin_attempt();
        assert_eq!(reconnect.state(), ConnectionState::GiveUp);
    }
}
