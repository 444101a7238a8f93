//! Event routing and request handling.
//!
//! The [`Dispatcher`] owns every piece of mutable bot state (telemetry cache, rate
//! limiter, statistics, watchdog) and runs as one cooperative loop. Only one event is
//! handled at a time, so none of that state needs locking.

use anyhow::Context;
use chrono::Utc;
use log::{debug, error, info, log_enabled, trace, warn, Level};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::classify::{split_channel_text, RequestClassifier, RequestKind};
use super::rate_limit::RateLimiter;
use super::reply::{ReplyComposer, ReplyContext};
use super::telemetry::TelemetryCorrelator;
use super::watchdog::{ConnectionWatchdog, LinkState};
use crate::config::Config;
use crate::geo::{distance_km, Coordinates, GeoLookup};
use crate::logutil::{escape_log, short_key};
use crate::mesh::{
    ChannelMessage, DeviceIdentity, DirectMessage, EventFilter, EventKind, MeshClient, MeshError,
    MeshEvent, Subscription, SubscriptionId,
};
use crate::metrics::{Snapshot, Statistics};

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("no contact matches key prefix {0}")]
    UnknownContact(String),

    #[error("contact refresh failed: {0}")]
    ContactRefresh(#[source] MeshError),

    #[error("send failed: {0}")]
    Send(#[source] MeshError),

    #[error("direct message without sender key")]
    MissingSender,
}

/// Where a reply goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyTarget {
    Channel(u8),
    Direct { key_prefix: String },
}

impl ReplyTarget {
    pub fn is_direct(&self) -> bool {
        matches!(self, ReplyTarget::Direct { .. })
    }
}

/// A message that may warrant a reply.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// Rate-limit identity: sender name on channels, key prefix for direct messages.
    pub sender: String,
    pub origin: ReplyTarget,
    pub body: String,
    pub snr: Option<f64>,
    pub rssi: Option<f64>,
    pub hop_count: Option<u8>,
    pub received_at: Instant,
}

impl InboundRequest {
    pub fn from_channel(msg: ChannelMessage) -> Self {
        let (sender, body) = split_channel_text(&msg.text);
        Self {
            sender,
            origin: ReplyTarget::Channel(msg.channel),
            body: body.to_string(),
            snr: msg.snr,
            rssi: msg.rssi,
            hop_count: msg.path_len,
            received_at: Instant::now(),
        }
    }

    pub fn from_direct(msg: DirectMessage) -> Self {
        Self {
            sender: msg.pubkey_prefix.clone(),
            origin: ReplyTarget::Direct {
                key_prefix: msg.pubkey_prefix,
            },
            body: msg.text.trim().to_string(),
            snr: msg.snr,
            rssi: msg.rssi,
            hop_count: msg.path_len,
            received_at: Instant::now(),
        }
    }
}

/// Event kinds the engine acts on. They share one subscription so link frames and
/// the messages they belong to are handled in publish order.
const ENGINE_EVENTS: &[EventKind] = &[
    EventKind::Connected,
    EventKind::Disconnected,
    EventKind::NewContact,
    EventKind::LinkTelemetry,
    EventKind::LinkFrame,
    EventKind::ChannelMessage,
    EventKind::DirectMessage,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Engine,
    Monitor,
}

#[derive(Default)]
struct Subscriptions {
    engine: Option<Subscription>,
    monitor: Option<Subscription>,
}

impl Subscriptions {
    fn slot(&mut self, stream: Stream) -> &mut Option<Subscription> {
        match stream {
            Stream::Engine => &mut self.engine,
            Stream::Monitor => &mut self.monitor,
        }
    }

    fn ids(&self) -> Vec<SubscriptionId> {
        [&self.engine, &self.monitor]
            .into_iter()
            .flatten()
            .map(|sub| sub.id)
            .collect()
    }
}

async fn next_event(slot: &mut Option<Subscription>) -> Option<MeshEvent> {
    match slot {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

/// The ping responder.
pub struct Dispatcher<C: MeshClient, G: GeoLookup> {
    client: C,
    geo: G,
    channel: u8,
    device_location: Coordinates,
    classifier: RequestClassifier,
    limiter: RateLimiter,
    telemetry: TelemetryCorrelator,
    composer: ReplyComposer,
    stats: Statistics,
    info_reply: String,
    stats_every: u64,
    watchdog: ConnectionWatchdog,
    rng: StdRng,
}

impl<C: MeshClient, G: GeoLookup> Dispatcher<C, G> {
    pub fn new(client: C, geo: G, config: &Config, identity: DeviceIdentity) -> Self {
        let device_location = identity.location();
        if device_location.is_unset() {
            warn!("Device has no advertised location, distances will be omitted");
        } else {
            info!(
                "Device location: {:.4}, {:.4}",
                device_location.lat, device_location.lon
            );
        }
        let watchdog = ConnectionWatchdog::new(
            LinkState::from(client.is_connected()),
            config.watchdog.poll_interval(),
        );

        Self {
            client,
            geo,
            channel: config.bot.channel,
            device_location,
            classifier: RequestClassifier::new(&config.bot.trigger_words, &config.bot.info_words),
            limiter: RateLimiter::new(config.rate_limit.window(), config.rate_limit.max_requests),
            telemetry: TelemetryCorrelator::new(),
            composer: ReplyComposer::new(config.preferred_relay_hash()),
            stats: Statistics::new(),
            info_reply: config.bot.info_reply.clone(),
            stats_every: config.bot.stats_every,
            watchdog,
            rng: StdRng::from_entropy(),
        }
    }

    /// Replace the emoji RNG, e.g. with a seeded one.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog = ConnectionWatchdog::new(self.watchdog.state(), interval);
        self
    }

    pub fn stats(&self) -> Snapshot {
        self.stats.snapshot()
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn telemetry(&self) -> &TelemetryCorrelator {
        &self.telemetry
    }

    pub fn link_state(&self) -> LinkState {
        self.watchdog.state()
    }

    pub fn watchdog_transitions(&self) -> u64 {
        self.watchdog.transitions()
    }

    /// Route one event. Errors mean a reply was dropped; the caller decides how to report.
    pub async fn handle_event(&mut self, event: MeshEvent) -> anyhow::Result<()> {
        match event {
            MeshEvent::Connected { reconnected } => {
                if reconnected {
                    info!("🔄 Reconnected to device");
                } else {
                    info!("✅ Connected to device");
                }
            }
            MeshEvent::Disconnected {
                reason,
                max_attempts_exceeded,
            } => {
                warn!("❌ Disconnected from device: {}", reason);
                if max_attempts_exceeded {
                    error!("Maximum reconnection attempts exceeded");
                }
            }
            MeshEvent::LinkTelemetry(sample) => self.telemetry.record_telemetry(sample),
            MeshEvent::LinkFrame { payload } => {
                self.telemetry.record_link_frame(&payload);
            }
            MeshEvent::ChannelMessage(msg) => {
                if msg.channel != self.channel {
                    trace!("Ignoring message on channel {}", msg.channel);
                    return Ok(());
                }
                let request = InboundRequest::from_channel(msg);
                let sender = request.sender.clone();
                self.handle_request(request)
                    .await
                    .with_context(|| format!("Reply to {} dropped", sender))?;
            }
            MeshEvent::DirectMessage(msg) => {
                let request = InboundRequest::from_direct(msg);
                let sender = request.sender.clone();
                self.handle_request(request)
                    .await
                    .with_context(|| format!("Reply to {} dropped", sender))?;
            }
            MeshEvent::NewContact(contact) => {
                info!(
                    "New contact: {} ({})",
                    escape_log(&contact.name),
                    short_key(&contact.public_key)
                );
            }
        }
        Ok(())
    }

    /// Classify, rate limit and answer one request.
    pub async fn handle_request(&mut self, request: InboundRequest) -> Result<(), ReplyError> {
        let kind = self.classifier.classify(&request.body);
        if kind == RequestKind::Ignore {
            debug!(
                "Not a trigger from {}: {}",
                escape_log(&request.sender),
                escape_log(&request.body)
            );
            return Ok(());
        }

        if !self.limiter.allow(&request.sender, request.received_at) {
            self.stats.record_rate_limited();
            info!(
                "Rate limit exceeded for {}, ignoring request",
                escape_log(&request.sender)
            );
            return Ok(());
        }

        if !kind.is_ping() {
            self.stats.record_info();
            info!("Info request from {}", escape_log(&request.sender));
            let text = self.info_reply.clone();
            return self.deliver_counted(&request.origin, &text).await;
        }

        self.stats.record_ping();
        let place = match &request.origin {
            ReplyTarget::Channel(ch) => format!("on channel {}", ch),
            ReplyTarget::Direct { .. } => "(direct message)".to_string(),
        };
        match &kind {
            RequestKind::Zipcode(zip) => info!(
                "Zipcode ping {} from {} {}",
                zip,
                escape_log(&request.sender),
                place
            ),
            RequestKind::Prefix(prefix) => info!(
                "Phone prefix ping {} from {} {}",
                prefix,
                escape_log(&request.sender),
                place
            ),
            _ => info!("Ping detected from {} {}", escape_log(&request.sender), place),
        }

        let quality = self.telemetry.peek_link_quality();
        let route = self.telemetry.consume_route();
        let distance = self.resolve_distance(&kind, &request);

        let ctx = ReplyContext {
            sender: &request.sender,
            snr: request.snr.or(quality.snr),
            rssi: request.rssi.or(quality.rssi),
            hop_count: request.hop_count.or(route.hop_count),
            route: &route.hops,
            is_direct: request.origin.is_direct(),
            distance_km: distance,
        };
        let text = self.composer.compose(&ctx, Utc::now(), &mut self.rng);
        info!("Sending pong: {}", text);

        self.deliver_counted(&request.origin, &text).await?;
        let sent = self.stats.record_pong();
        debug!("Pong sent successfully");
        if self.stats_every > 0 && sent % self.stats_every == 0 {
            info!("{}", self.stats.summary_line());
        }
        Ok(())
    }

    fn resolve_distance(&mut self, kind: &RequestKind, request: &InboundRequest) -> Option<f64> {
        let (target, attribution) = match kind {
            RequestKind::Zipcode(zip) => {
                let coords = self.geo.coordinates_for_zipcode(zip)?;
                (coords, format!("{} (zip:{})", request.sender, zip))
            }
            RequestKind::Prefix(prefix) => {
                let hit = self.geo.zipcode_for_prefix(prefix)?;
                let coords = self.geo.coordinates_for_zipcode(&hit.zipcode)?;
                (
                    coords,
                    format!("{} (prefix:{}, {})", request.sender, prefix, hit.place),
                )
            }
            RequestKind::Ping => match &request.origin {
                ReplyTarget::Direct { key_prefix } => {
                    let contact = self.client.contact_by_key_prefix(key_prefix)?;
                    let name = if contact.name.is_empty() {
                        request.sender.clone()
                    } else {
                        contact.name.clone()
                    };
                    (contact.location(), name)
                }
                ReplyTarget::Channel(_) => return None,
            },
            RequestKind::Info | RequestKind::Ignore => return None,
        };

        let km = distance_km(self.device_location, target)?;
        debug!("Distance to {}: {:.1}km", attribution, km);
        self.stats.record_distance(km, || attribution);
        Some(km)
    }

    async fn deliver_counted(&mut self, target: &ReplyTarget, text: &str) -> Result<(), ReplyError> {
        let result = self.deliver(target, text).await;
        if result.is_err() {
            self.stats.record_dropped();
        }
        result
    }

    async fn deliver(&mut self, target: &ReplyTarget, text: &str) -> Result<(), ReplyError> {
        match target {
            ReplyTarget::Channel(channel) => self
                .client
                .send_channel_message(*channel, text)
                .await
                .map_err(ReplyError::Send),
            ReplyTarget::Direct { key_prefix } => {
                if key_prefix.is_empty() {
                    return Err(ReplyError::MissingSender);
                }
                let contact = match self.client.contact_by_key_prefix(key_prefix) {
                    Some(contact) => contact,
                    None => {
                        debug!("Contact not found for {}, refreshing contacts", key_prefix);
                        self.client
                            .fetch_contacts()
                            .await
                            .map_err(ReplyError::ContactRefresh)?;
                        self.client
                            .contact_by_key_prefix(key_prefix)
                            .ok_or_else(|| ReplyError::UnknownContact(key_prefix.clone()))?
                    }
                };
                self.client
                    .send_direct_message(&contact, text)
                    .await
                    .map_err(ReplyError::Send)
            }
        }
    }

    fn subscribe_all(&mut self) -> Subscriptions {
        let engine = self
            .client
            .subscribe(EventFilter::kinds(ENGINE_EVENTS).on_channel(self.channel));
        let monitor = log_enabled!(Level::Debug).then(|| {
            self.client.subscribe(EventFilter::kinds(&[
                EventKind::ChannelMessage,
                EventKind::DirectMessage,
            ]))
        });
        Subscriptions {
            engine: Some(engine),
            monitor,
        }
    }

    fn on_tick(&mut self) {
        self.watchdog.observe(self.client.is_connected());
        let pruned = self.limiter.prune_idle(Instant::now());
        if pruned > 0 {
            trace!(
                "Pruned {} idle rate-limit windows ({} tracked)",
                pruned,
                self.limiter.tracked()
            );
        }
    }

    /// Run until `shutdown` resolves, then tear everything down in order.
    pub async fn run_until<F>(&mut self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut subs = self.subscribe_all();
        self.watchdog.reset(self.client.is_connected());
        let mut ticker = self.watchdog.ticker();
        tokio::pin!(shutdown);

        info!(
            "Bot is running on channel {}. Press Ctrl+C to stop.",
            self.channel
        );

        loop {
            let (event, stream) = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    self.on_tick();
                    continue;
                }
                ev = next_event(&mut subs.engine) => (ev, Stream::Engine),
                ev = next_event(&mut subs.monitor) => (ev, Stream::Monitor),
            };

            match event {
                Some(event) if stream == Stream::Monitor => log_traffic(&event),
                Some(event) => {
                    if let Err(e) = self.handle_event(event).await {
                        error!("{:#}", e);
                    }
                }
                None => {
                    warn!("{:?} event stream closed", stream);
                    *subs.slot(stream) = None;
                }
            }
        }

        drop(ticker);
        for id in subs.ids() {
            self.client.unsubscribe(id);
        }
        self.stats.log_final();
        if let Err(e) = self.client.stop_message_fetching().await {
            debug!("Stopping message fetching failed: {}", e);
        }
        if let Err(e) = self.client.disconnect().await {
            warn!("Disconnect failed: {}", e);
        }
        info!("Disconnected");
        Ok(())
    }
}

fn log_traffic(event: &MeshEvent) {
    match event {
        MeshEvent::ChannelMessage(msg) => debug!(
            "[ch{}] {} (snr={:?} rssi={:?} path_len={:?})",
            msg.channel,
            escape_log(&msg.text),
            msg.snr,
            msg.rssi,
            msg.path_len
        ),
        MeshEvent::DirectMessage(msg) => debug!(
            "[dm {}] {} (snr={:?} rssi={:?} path_len={:?})",
            short_key(&msg.pubkey_prefix),
            escape_log(&msg.text),
            msg.snr,
            msg.rssi,
            msg.path_len
        ),
        other => trace!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::mock::MockMesh;

    #[test]
    fn channel_request_takes_sender_from_text() {
        let request = InboundRequest::from_channel(ChannelMessage {
            channel: 1,
            text: "alice: ping 1".into(),
            snr: Some(3.0),
            rssi: None,
            path_len: Some(2),
        });
        assert_eq!(request.sender, "alice");
        assert_eq!(request.body, "ping 1");
        assert_eq!(request.origin, ReplyTarget::Channel(1));
        assert_eq!(request.hop_count, Some(2));
    }

    #[tokio::test]
    async fn ignored_text_leaves_route_cached() {
        let mut bot = Dispatcher::new(
            MockMesh::new(),
            crate::geo::GeoTable::default(),
            &Config::default(),
            DeviceIdentity::default(),
        );
        bot.handle_event(MeshEvent::LinkFrame {
            payload: "0001a1".into(),
        })
        .await
        .expect("frame");
        bot.handle_event(MeshEvent::ChannelMessage(ChannelMessage {
            channel: 1,
            text: "bob: hello".into(),
            snr: None,
            rssi: None,
            path_len: None,
        }))
        .await
        .expect("ignored");
        assert!(bot.telemetry().has_route());
        assert!(bot.client().sent().is_empty());
    }
}
