//! Link telemetry correlation.
//!
//! MeshCore reports radio metadata separately from the application message it belongs
//! to: a link sample (SNR/RSSI) and a raw frame log line whose header carries the path
//! the packet travelled. [`TelemetryCorrelator`] keeps the most recent of each so the
//! dispatcher can attach them to the next trigger message.
//!
//! Raw frame layout (hex, no separators):
//!
//! ```text
//! byte 0        header (opaque)
//! byte 1        path length N
//! bytes 2..2+N  path node hashes, one byte per hop
//! byte 2+N      channel hash (optional)
//! ```

use log::{debug, trace};
use std::fmt;

/// One-byte node identifier as it appears in a route (first byte of the node's key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHash(pub u8);

impl NodeHash {
    /// Take the first byte of a hex public-key prefix, e.g. `"A1ff03"` -> `a1`.
    pub fn from_key_prefix(prefix: &str) -> Option<Self> {
        let head = prefix.trim().get(0..2)?;
        u8::from_str_radix(head, 16).ok().map(NodeHash)
    }
}

impl fmt::Display for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}", self.0)
    }
}

/// A decoded raw link frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFrame {
    /// `None` when the header byte is not valid hex.
    pub header: Option<u8>,
    pub path_len: u8,
    pub path: Vec<NodeHash>,
    pub channel_hash: Option<u8>,
}

fn hex_byte(hex_text: &str, index: usize) -> Option<u8> {
    let pair = hex_text.get(index * 2..index * 2 + 2)?;
    let mut out = [0u8; 1];
    hex::decode_to_slice(pair, &mut out).ok()?;
    Some(out[0])
}

/// Decode a raw frame log payload.
///
/// Only the path length and the path itself must be valid hex. The header and the
/// channel hash are opaque and come back as `None` when they do not decode.
pub fn decode_link_frame(raw: &str) -> Option<LinkFrame> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    if cleaned.len() < 4 || !cleaned.is_ascii() {
        return None;
    }

    let path_len = hex_byte(&cleaned, 1)?;
    let path_end = 2 + path_len as usize;
    // A dangling nibble cannot form a byte, so only whole pairs count.
    if cleaned.len() / 2 < path_end {
        return None;
    }
    let path = hex::decode(&cleaned[4..path_end * 2]).ok()?;

    Some(LinkFrame {
        header: hex_byte(&cleaned, 0),
        path_len,
        path: path.into_iter().map(NodeHash).collect(),
        channel_hash: hex_byte(&cleaned, path_end),
    })
}

/// A link-quality sample. Either field may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinkSample {
    pub snr: Option<f64>,
    pub rssi: Option<f64>,
}

/// Route data handed out by [`TelemetryCorrelator::consume_route`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteSnapshot {
    pub hop_count: Option<u8>,
    pub hops: Vec<NodeHash>,
}

impl RouteSnapshot {
    pub fn is_empty(&self) -> bool {
        self.hop_count.is_none() && self.hops.is_empty()
    }
}

/// Most recent link telemetry, owned by the dispatcher.
///
/// SNR and RSSI survive a reply and are only replaced by newer samples; the route is
/// message specific and is cleared once consumed.
#[derive(Debug, Default)]
pub struct TelemetryCorrelator {
    snr: Option<f64>,
    rssi: Option<f64>,
    route: Option<LinkFrame>,
}

impl TelemetryCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update whichever link-quality fields the sample carries.
    pub fn record_telemetry(&mut self, sample: LinkSample) {
        if let Some(snr) = sample.snr {
            self.snr = Some(snr);
        }
        if let Some(rssi) = sample.rssi {
            self.rssi = Some(rssi);
        }
        trace!("Link sample: snr={:?} rssi={:?}", self.snr, self.rssi);
    }

    /// Decode and cache a raw frame. Returns false (cache untouched) when it is malformed.
    pub fn record_link_frame(&mut self, raw: &str) -> bool {
        match decode_link_frame(raw) {
            Some(frame) => {
                debug!(
                    "Link frame: header={:02x?} path_len={} path={:?}",
                    frame.header, frame.path_len, frame.path
                );
                self.route = Some(frame);
                true
            }
            None => {
                trace!("Ignoring undecodable link frame ({} chars)", raw.len());
                false
            }
        }
    }

    /// Take the cached route, leaving SNR/RSSI in place.
    pub fn consume_route(&mut self) -> RouteSnapshot {
        match self.route.take() {
            Some(frame) => RouteSnapshot {
                hop_count: Some(frame.path_len),
                hops: frame.path,
            },
            None => RouteSnapshot::default(),
        }
    }

    pub fn peek_link_quality(&self) -> LinkSample {
        LinkSample {
            snr: self.snr,
            rssi: self.rssi,
        }
    }

    pub fn has_route(&self) -> bool {
        self.route.is_some()
    }
}
