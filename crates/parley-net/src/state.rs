//! Connection lifecycle bookkeeping.

/// Lifecycle state of the single backend connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Published connection status. `epoch` counts successful opens and names
/// the current (or most recent) socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Link {
    pub state: ConnectionState,
    pub epoch: u64,
}

/// What to do after the socket closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterClose {
    /// Try again; carries the attempt number (1-based).
    Retry(u32),
    GiveUp,
}

/// Counts consecutive failed connections. The counter only resets when a
/// connection actually opens.
#[derive(Debug, Clone)]
pub struct ReconnectTracker {
    attempts: u32,
    max_attempts: u32,
    opened_once: bool,
}

impl ReconnectTracker {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            opened_once: false,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a successful open. Returns `true` when this is a reconnect.
    pub fn on_open(&mut self) -> bool {
        let reconnect = self.opened_once;
        self.opened_once = true;
        self.attempts = 0;
        reconnect
    }

    pub fn on_closed(&mut self) -> AfterClose {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts > self.max_attempts {
            AfterClose::GiveUp
        } else {
            AfterClose::Retry(self.attempts)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gives_up_after_max_attempts() {
        let mut tracker = ReconnectTracker::new(10);
        for n in 1..=10 {
            assert_eq!(tracker.on_closed(), AfterClose::Retry(n));
        }
        assert_eq!(tracker.on_closed(), AfterClose::GiveUp);
    }

    #[test]
    fn test_open_resets_attempts() {
        let mut tracker = ReconnectTracker::new(3);
        assert!(!tracker.on_open());
        tracker.on_closed();
        tracker.on_closed();
        assert_eq!(tracker.attempts(), 2);

        assert!(tracker.on_open());
        assert_eq!(tracker.attempts(), 0);
        assert_eq!(tracker.on_closed(), AfterClose::Retry(1));
    }

    #[test]
    fn test_first_connection_failures_count() {
        let mut tracker = ReconnectTracker::new(1);
        assert_eq!(tracker.on_closed(), AfterClose::Retry(1));
        assert_eq!(tracker.on_closed(), AfterClose::GiveUp);
        // a later successful open is still the first one
        assert!(!tracker.on_open());
    }
}
