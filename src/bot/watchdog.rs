//! Edge-triggered connection watchdog.

use log::{info, warn};
use std::time::Duration;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

impl From<bool> for LinkState {
    fn from(connected: bool) -> Self {
        if connected {
            LinkState::Connected
        } else {
            LinkState::Disconnected
        }
    }
}

/// Remembers the last observed link state and logs only when it changes.
#[derive(Debug)]
pub struct ConnectionWatchdog {
    state: LinkState,
    poll_interval: Duration,
    transitions: u64,
}

impl ConnectionWatchdog {
    pub fn new(initial: LinkState, poll_interval: Duration) -> Self {
        Self {
            state: initial,
            poll_interval,
            transitions: 0,
        }
    }

    /// Re-seed the state from the client, without logging.
    pub fn reset(&mut self, connected: bool) {
        self.state = LinkState::from(connected);
    }

    /// Feed one poll result. Returns the new state when it differs from the last one.
    pub fn observe(&mut self, connected: bool) -> Option<LinkState> {
        let next = LinkState::from(connected);
        if next == self.state {
            return None;
        }
        self.state = next;
        self.transitions += 1;
        match next {
            LinkState::Connected => info!("🔗 Connection restored"),
            LinkState::Disconnected => warn!("🔌 Connection lost, waiting for reconnect..."),
        }
        Some(next)
    }

    /// Poll timer. The first tick fires one full period from now.
    pub fn ticker(&self) -> Interval {
        let mut ticker = time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn transitions(&self) -> u64 {
        self.transitions
    }
}
