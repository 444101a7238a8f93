//! Per-sender sliding window rate limiter.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(360);
pub const DEFAULT_CAPACITY: usize = 3;

/// Accepts at most `capacity` requests per identity inside any trailing `window`.
///
/// Only accepted requests are recorded, so a sender that keeps hammering the bot while
/// limited does not push its own window further out.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    capacity: usize,
    windows: HashMap<String, VecDeque<Instant>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_CAPACITY)
    }
}

impl RateLimiter {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity,
            windows: HashMap::new(),
        }
    }

    /// Check `identity` against its window at `now`, recording the request if accepted.
    pub fn allow(&mut self, identity: &str, now: Instant) -> bool {
        let window = self.window;
        let entries = self.windows.entry(identity.to_string()).or_default();
        entries.retain(|ts| now.saturating_duration_since(*ts) < window);

        if entries.len() >= self.capacity {
            return false;
        }
        entries.push_back(now);
        true
    }

    /// Requests currently counted against `identity`.
    pub fn active(&self, identity: &str, now: Instant) -> usize {
        self.windows
            .get(identity)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|ts| now.saturating_duration_since(**ts) < self.window)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Forget identities whose windows have fully expired. Returns how many were removed.
    pub fn prune_idle(&mut self, now: Instant) -> usize {
        let window = self.window;
        let before = self.windows.len();
        self.windows.retain(|_, entries| {
            entries.retain(|ts| now.saturating_duration_since(*ts) < window);
            !entries.is_empty()
        });
        before - self.windows.len()
    }

    /// Identities with at least one stored timestamp.
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
