//! # Mesh Client Interface
//!
//! The bot never talks to a radio directly. It consumes a [`MeshClient`]: an event
//! stream with per-subscription filters plus a handful of commands. Two implementations
//! ship with the crate:
//!
//! - [`bridge::BridgeClient`] speaks newline-delimited JSON to a companion bridge over TCP
//! - [`mock::MockMesh`] is an in-memory client for tests
//!
//! Events are fanned out to every subscription whose [`EventFilter`] matches. Each
//! subscription owns an unbounded receiver; dropping it (or calling
//! [`MeshClient::unsubscribe`]) removes it from the fan-out.

pub mod bridge;
pub mod mock;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::bot::telemetry::LinkSample;
use crate::geo::Coordinates;

/// Event discriminant used by subscription filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    LinkTelemetry,
    LinkFrame,
    ChannelMessage,
    DirectMessage,
    NewContact,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    Connected {
        reconnected: bool,
    },
    Disconnected {
        reason: String,
        max_attempts_exceeded: bool,
    },
    LinkTelemetry(LinkSample),
    /// Raw frame log line in hex.
    LinkFrame {
        payload: String,
    },
    ChannelMessage(ChannelMessage),
    DirectMessage(DirectMessage),
    NewContact(Contact),
}

impl MeshEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            MeshEvent::Connected { .. } => EventKind::Connected,
            MeshEvent::Disconnected { .. } => EventKind::Disconnected,
            MeshEvent::LinkTelemetry(_) => EventKind::LinkTelemetry,
            MeshEvent::LinkFrame { .. } => EventKind::LinkFrame,
            MeshEvent::ChannelMessage(_) => EventKind::ChannelMessage,
            MeshEvent::DirectMessage(_) => EventKind::DirectMessage,
            MeshEvent::NewContact(_) => EventKind::NewContact,
        }
    }

    /// Channel index for channel messages.
    pub fn channel(&self) -> Option<u8> {
        match self {
            MeshEvent::ChannelMessage(msg) => Some(msg.channel),
            _ => None,
        }
    }
}

/// Group channel text. `text` still carries the `sender: ` prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    pub channel: u8,
    pub text: String,
    pub snr: Option<f64>,
    pub rssi: Option<f64>,
    pub path_len: Option<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirectMessage {
    pub pubkey_prefix: String,
    pub text: String,
    pub snr: Option<f64>,
    pub rssi: Option<f64>,
    pub path_len: Option<u8>,
}

/// A known node as advertised to the companion radio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub public_key: String,
    #[serde(rename = "adv_name", default)]
    pub name: String,
    #[serde(rename = "adv_lat", default)]
    pub lat: f64,
    #[serde(rename = "adv_lon", default)]
    pub lon: f64,
}

impl Contact {
    pub fn location(&self) -> Coordinates {
        Coordinates::new(self.lat, self.lon)
    }

    /// Case-insensitive public key prefix match.
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        let prefix = prefix.trim();
        !prefix.is_empty()
            && self.public_key.len() >= prefix.len()
            && self.public_key.is_char_boundary(prefix.len())
            && self.public_key[..prefix.len()].eq_ignore_ascii_case(prefix)
    }
}

/// The companion radio's own identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(rename = "adv_lat", default)]
    pub lat: f64,
    #[serde(rename = "adv_lon", default)]
    pub lon: f64,
}

impl DeviceIdentity {
    pub fn location(&self) -> Coordinates {
        Coordinates::new(self.lat, self.lon)
    }
}

/// Which events a subscription wants.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    kinds: Vec<EventKind>,
    channel: Option<u8>,
}

impl EventFilter {
    /// Match any of `kinds`. An empty list matches everything.
    pub fn kinds(kinds: &[EventKind]) -> Self {
        Self {
            kinds: kinds.to_vec(),
            channel: None,
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict channel messages to one channel index. Other kinds are unaffected.
    pub fn on_channel(mut self, channel: u8) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn matches(&self, event: &MeshEvent) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind()) {
            return false;
        }
        match (self.channel, event.channel()) {
            (Some(want), Some(got)) => want == got,
            _ => true,
        }
    }
}

pub type SubscriptionId = u64;

/// Receiving end of one subscription.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<MeshEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<MeshEvent> {
        self.events.recv().await
    }
}

/// Fan-out table shared by the client implementations.
#[derive(Debug, Default)]
pub struct SubscriberList {
    next_id: SubscriptionId,
    entries: Vec<(SubscriptionId, EventFilter, mpsc::UnboundedSender<MeshEvent>)>,
}

impl SubscriberList {
    pub fn subscribe(&mut self, filter: EventFilter) -> Subscription {
        self.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.entries.push((self.next_id, filter, tx));
        Subscription {
            id: self.next_id,
            events: rx,
        }
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _, _)| *entry_id != id);
        before != self.entries.len()
    }

    /// Deliver `event` to every matching subscriber. Returns how many received it.
    pub fn publish(&mut self, event: &MeshEvent) -> usize {
        self.entries.retain(|(_, _, tx)| !tx.is_closed());
        let mut delivered = 0;
        for (_, filter, tx) in &self.entries {
            if filter.matches(event) && tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("not connected to the mesh device")]
    Disconnected,

    #[error("command rejected: {0}")]
    Rejected(String),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("client is shut down")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed bridge message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid bridge address '{0}', expected HOST:PORT")]
    InvalidAddress(String),
}

/// Everything the bot needs from a mesh connection.
#[allow(async_fn_in_trait)]
pub trait MeshClient {
    fn is_connected(&self) -> bool;

    fn subscribe(&mut self, filter: EventFilter) -> Subscription;

    fn unsubscribe(&mut self, id: SubscriptionId);

    /// Look a contact up in the local cache. Never touches the radio.
    fn contact_by_key_prefix(&self, prefix: &str) -> Option<Contact>;

    async fn send_channel_message(&mut self, channel: u8, text: &str) -> Result<(), MeshError>;

    async fn send_direct_message(&mut self, contact: &Contact, text: &str)
        -> Result<(), MeshError>;

    /// Reload the contact cache from the radio. Returns the number of contacts.
    async fn fetch_contacts(&mut self) -> Result<usize, MeshError>;

    async fn device_identity(&mut self) -> Result<DeviceIdentity, MeshError>;

    async fn start_message_fetching(&mut self) -> Result<(), MeshError>;

    async fn stop_message_fetching(&mut self) -> Result<(), MeshError>;

    async fn disconnect(&mut self) -> Result<(), MeshError>;
}
