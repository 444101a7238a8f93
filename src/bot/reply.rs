//! Compact pong formatting.
//!
//! A reply is a comma separated list of fields, each omitted when its data is missing:
//!
//! ```text
//! @[alice] 🏐 12:34:56Z,snr:7.5dB,rssi:-92.0dBm,hops:2,route:a1.b2,dist:3.2km
//! ```
//!
//! Direct replies drop the `@[sender] ` mention.

use chrono::{DateTime, Utc};
use rand::Rng;

use super::telemetry::NodeHash;

/// Sports balls, one picked at random per reply.
pub const RESPONSE_EMOJIS: &[&str] = &[
    "🏉", "🏀", "🎾", "🏈", "⚽️", "🎱", "🥎", "⚾️", "🏐",
];

/// Hop count the radio reports for a packet received without any relaying.
pub const DIRECT_HOP_COUNT: u8 = 255;

/// Everything the composer needs to know about one accepted ping.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplyContext<'a> {
    pub sender: &'a str,
    pub snr: Option<f64>,
    pub rssi: Option<f64>,
    pub hop_count: Option<u8>,
    pub route: &'a [NodeHash],
    pub is_direct: bool,
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct ReplyComposer {
    preferred_relay: Option<NodeHash>,
}

impl ReplyComposer {
    pub fn new(preferred_relay: Option<NodeHash>) -> Self {
        Self { preferred_relay }
    }

    pub fn preferred_relay(&self) -> Option<NodeHash> {
        self.preferred_relay
    }

    pub fn compose<R: Rng + ?Sized>(
        &self,
        ctx: &ReplyContext<'_>,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> String {
        let emoji = RESPONSE_EMOJIS[rng.gen_range(0..RESPONSE_EMOJIS.len())];
        let mut parts = vec![format!("{} {}", emoji, now.format("%H:%M:%SZ"))];

        if let Some(snr) = ctx.snr {
            parts.push(format!("snr:{:.1}dB", snr));
        }
        if let Some(rssi) = ctx.rssi {
            parts.push(format!("rssi:{:.1}dBm", rssi));
        }
        if let Some(hops) = ctx.hop_count {
            parts.push(hop_field(hops));
        }
        if let Some(route) = self.route_field(ctx) {
            parts.push(route);
        }
        if let Some(km) = ctx.distance_km {
            parts.push(format!("dist:{}", format_distance(km)));
        }

        let body = parts.join(",");
        if ctx.is_direct {
            body
        } else {
            format!("@[{}] {}", ctx.sender, body)
        }
    }

    fn route_field(&self, ctx: &ReplyContext<'_>) -> Option<String> {
        if ctx.route.is_empty() || ctx.hop_count == Some(DIRECT_HOP_COUNT) {
            return None;
        }
        let label = match self.preferred_relay {
            Some(relay) if ctx.route.contains(&relay) => "via",
            _ => "route",
        };
        let nodes: Vec<String> = ctx.route.iter().map(NodeHash::to_string).collect();
        Some(format!("{}:{}", label, nodes.join(".")))
    }
}

/// `direct` for the 255 sentinel, `hops:N` otherwise.
pub fn hop_field(hops: u8) -> String {
    if hops == DIRECT_HOP_COUNT {
        "direct".to_string()
    } else {
        format!("hops:{}", hops)
    }
}

/// Metres below 1 km, one decimal below 10 km, whole kilometres beyond. Truncates.
pub fn format_distance(km: f64) -> String {
    if km < 1.0 {
        format!("{}m", (km * 1000.0) as u64)
    } else if km < 10.0 {
        format!("{:.1}km", km)
    } else {
        format!("{}km", km as u64)
    }
}
