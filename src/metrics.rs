//! Request statistics for the lifetime of the process.
//!
//! Owned by the dispatcher, so plain counters are enough.

use log::info;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Snapshot {
    pub pings_received: u64,
    pub pongs_sent: u64,
    pub info_requests: u64,
    pub rate_limited: u64,
    pub replies_dropped: u64,
    pub max_distance_km: f64,
    pub max_distance_attribution: Option<String>,
}

#[derive(Debug, Default)]
pub struct Statistics {
    pings_received: u64,
    pongs_sent: u64,
    info_requests: u64,
    rate_limited: u64,
    replies_dropped: u64,
    max_distance_km: f64,
    max_distance_attribution: Option<String>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ping(&mut self) {
        self.pings_received = self.pings_received.saturating_add(1);
    }

    /// Count a delivered pong and return the new total.
    pub fn record_pong(&mut self) -> u64 {
        self.pongs_sent = self.pongs_sent.saturating_add(1);
        self.pongs_sent
    }

    pub fn record_info(&mut self) {
        self.info_requests = self.info_requests.saturating_add(1);
    }

    pub fn record_rate_limited(&mut self) {
        self.rate_limited = self.rate_limited.saturating_add(1);
    }

    pub fn record_dropped(&mut self) {
        self.replies_dropped = self.replies_dropped.saturating_add(1);
    }

    /// Keep `km` if it beats the current maximum. The attribution is only built then.
    pub fn record_distance(&mut self, km: f64, attribution: impl FnOnce() -> String) -> bool {
        if km > self.max_distance_km {
            self.max_distance_km = km;
            self.max_distance_attribution = Some(attribution());
            true
        } else {
            false
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            pings_received: self.pings_received,
            pongs_sent: self.pongs_sent,
            info_requests: self.info_requests,
            rate_limited: self.rate_limited,
            replies_dropped: self.replies_dropped,
            max_distance_km: self.max_distance_km,
            max_distance_attribution: self.max_distance_attribution.clone(),
        }
    }

    /// `Stats: 12 pings, 11 pongs sent, max distance: 41.3km (alice (zip:22767))`
    pub fn summary_line(&self) -> String {
        format!(
            "Stats: {} pings, {} pongs sent, max distance: {:.1}km ({})",
            self.pings_received,
            self.pongs_sent,
            self.max_distance_km,
            self.max_distance_attribution.as_deref().unwrap_or("N/A")
        )
    }

    /// Shutdown report.
    pub fn log_final(&self) {
        let rule = "=".repeat(50);
        info!("{}", rule);
        info!("Final Statistics:");
        info!("  Pings received: {}", self.pings_received);
        info!("  Pongs sent: {}", self.pongs_sent);
        info!("  Info requests: {}", self.info_requests);
        info!("  Rate limited: {}", self.rate_limited);
        info!("  Replies dropped: {}", self.replies_dropped);
        match &self.max_distance_attribution {
            Some(who) => info!("  Max distance: {:.1}km ({})", self.max_distance_km, who),
            None => info!("  Max distance: N/A"),
        }
        info!("{}", rule);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_new_maximum_builds_attribution() {
        let mut stats = Statistics::new();
        assert!(stats.record_distance(12.5, || "alice".into()));
        assert!(!stats.record_distance(3.0, || panic!("not a new maximum")));
        assert!(!stats.record_distance(12.5, || panic!("ties do not replace")));
        assert_eq!(
            stats.snapshot().max_distance_attribution.as_deref(),
            Some("alice")
        );
    }

    #[test]
    fn summary_line_without_distance() {
        let mut stats = Statistics::new();
        stats.record_ping();
        stats.record_pong();
        assert_eq!(
            stats.summary_line(),
            "Stats: 1 pings, 1 pongs sent, max distance: 0.0km (N/A)"
        );
    }
}
