//! TCP client for the MeshCore companion bridge.
//!
//! The bridge exposes the companion radio as newline-delimited JSON. Every line is
//! either an event (`{"event": "channel_msg", ...}`) or the reply to a command we sent
//! (`{"reply": 7, "ok": true, "payload": ...}`). Commands carry an `id` that the bridge
//! echoes back as `reply`.
//!
//! One background task owns the socket. It routes replies to the waiting request,
//! fans events out to subscribers and, when the link drops, redials with capped
//! exponential backoff until the client is shut down.

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::{
    ChannelMessage, Contact, DeviceIdentity, DirectMessage, EventFilter, MeshClient, MeshError,
    MeshEvent, SubscriberList, Subscription, SubscriptionId,
};
use crate::bot::telemetry::LinkSample;
use crate::logutil::escape_log;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Check that `addr` looks like `HOST:PORT`.
pub fn validate_address(addr: &str) -> Result<(), MeshError> {
    let invalid = || MeshError::InvalidAddress(addr.to_string());
    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    if host.trim().is_empty() || port.parse::<u16>().is_err() {
        return Err(invalid());
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ReplyFrame {
    reply: u64,
    ok: bool,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WireEvent {
    Connected {
        #[serde(default)]
        reconnected: bool,
    },
    Disconnected {
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        max_attempts_exceeded: bool,
    },
    RxLog {
        #[serde(default)]
        snr: Option<f64>,
        #[serde(default)]
        rssi: Option<f64>,
        #[serde(default)]
        payload: Option<String>,
    },
    ChannelMsg {
        channel_idx: u8,
        text: String,
        #[serde(default)]
        snr: Option<f64>,
        #[serde(default)]
        rssi: Option<f64>,
        #[serde(default)]
        path_len: Option<u8>,
    },
    ContactMsg {
        pubkey_prefix: String,
        text: String,
        #[serde(default)]
        snr: Option<f64>,
        #[serde(default)]
        rssi: Option<f64>,
        #[serde(default)]
        path_len: Option<u8>,
    },
    NewContact(Contact),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Inbound {
    Reply(ReplyFrame),
    Event(WireEvent),
}

#[derive(Debug, Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum WireCommand<'a> {
    SendChanMsg { channel: u8, text: &'a str },
    SendMsg { public_key: &'a str, text: &'a str },
    GetContacts,
    Appstart,
    StartAutoFetch,
    StopAutoFetch,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the client handle and the IO task.
#[derive(Default)]
struct BridgeShared {
    connected: AtomicBool,
    contacts: Mutex<Vec<Contact>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<ReplyFrame>>>,
    subscribers: Mutex<SubscriberList>,
}

impl BridgeShared {
    fn handle_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        trace!("bridge <- {}", escape_log(line));
        match serde_json::from_str::<Inbound>(line) {
            Ok(Inbound::Reply(reply)) => match lock(&self.pending).remove(&reply.reply) {
                Some(waiter) => {
                    let _ = waiter.send(reply);
                }
                None => debug!("Dropping reply {} with no waiting request", reply.reply),
            },
            Ok(Inbound::Event(event)) => self.handle_event(event),
            Err(e) => warn!("Ignoring malformed bridge line '{}': {}", escape_log(line), e),
        }
    }

    fn handle_event(&self, event: WireEvent) {
        let events = match event {
            WireEvent::Connected { reconnected } => {
                self.connected.store(true, Ordering::SeqCst);
                vec![MeshEvent::Connected { reconnected }]
            }
            WireEvent::Disconnected {
                reason,
                max_attempts_exceeded,
            } => {
                self.connected.store(false, Ordering::SeqCst);
                vec![MeshEvent::Disconnected {
                    reason: reason.unwrap_or_else(|| "unknown".to_string()),
                    max_attempts_exceeded,
                }]
            }
            WireEvent::RxLog { snr, rssi, payload } => {
                let mut out = Vec::with_capacity(2);
                if snr.is_some() || rssi.is_some() {
                    out.push(MeshEvent::LinkTelemetry(LinkSample { snr, rssi }));
                }
                if let Some(payload) = payload {
                    out.push(MeshEvent::LinkFrame { payload });
                }
                out
            }
            WireEvent::ChannelMsg {
                channel_idx,
                text,
                snr,
                rssi,
                path_len,
            } => vec![MeshEvent::ChannelMessage(ChannelMessage {
                channel: channel_idx,
                text,
                snr,
                rssi,
                path_len,
            })],
            WireEvent::ContactMsg {
                pubkey_prefix,
                text,
                snr,
                rssi,
                path_len,
            } => vec![MeshEvent::DirectMessage(DirectMessage {
                pubkey_prefix,
                text,
                snr,
                rssi,
                path_len,
            })],
            WireEvent::NewContact(contact) => {
                self.upsert_contact(contact.clone());
                vec![MeshEvent::NewContact(contact)]
            }
        };

        let mut subscribers = lock(&self.subscribers);
        for event in &events {
            subscribers.publish(event);
        }
    }

    fn upsert_contact(&self, contact: Contact) {
        let mut contacts = lock(&self.contacts);
        match contacts
            .iter_mut()
            .find(|c| c.public_key.eq_ignore_ascii_case(&contact.public_key))
        {
            Some(existing) => *existing = contact,
            None => contacts.push(contact),
        }
    }

    /// Socket gone: fail pending commands and tell subscribers.
    fn mark_lost(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        lock(&self.pending).clear();
        warn!("Bridge link lost: {}", reason);
        lock(&self.subscribers).publish(&MeshEvent::Disconnected {
            reason: reason.to_string(),
            max_attempts_exceeded: false,
        });
    }
}

/// [`MeshClient`] backed by a TCP bridge connection.
pub struct BridgeClient {
    addr: String,
    shared: Arc<BridgeShared>,
    commands: mpsc::UnboundedSender<String>,
    shutdown: watch::Sender<bool>,
    io_task: Option<JoinHandle<()>>,
    next_id: u64,
    reply_timeout: Duration,
}

impl BridgeClient {
    /// Connect with the default reconnect backoff cap.
    pub async fn connect(addr: &str, reply_timeout: Duration) -> Result<Self, MeshError> {
        Self::connect_with_backoff(addr, reply_timeout, DEFAULT_MAX_BACKOFF).await
    }

    pub async fn connect_with_backoff(
        addr: &str,
        reply_timeout: Duration,
        max_backoff: Duration,
    ) -> Result<Self, MeshError> {
        validate_address(addr)?;
        let stream = tokio::time::timeout(reply_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| MeshError::Timeout(reply_timeout))??;
        info!("Connected to bridge at {}", addr);

        let shared = Arc::new(BridgeShared::default());
        shared.connected.store(true, Ordering::SeqCst);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let io_task = tokio::spawn(run_io(
            stream,
            addr.to_string(),
            shared.clone(),
            cmd_rx,
            shutdown_rx,
            max_backoff.max(INITIAL_BACKOFF),
        ));

        Ok(Self {
            addr: addr.to_string(),
            shared,
            commands: cmd_tx,
            shutdown: shutdown_tx,
            io_task: Some(io_task),
            next_id: 0,
            reply_timeout,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Snapshot of the contact cache.
    pub fn contacts(&self) -> Vec<Contact> {
        lock(&self.shared.contacts).clone()
    }

    async fn request(&mut self, command: WireCommand<'_>) -> Result<serde_json::Value, MeshError> {
        if !self.is_connected() {
            return Err(MeshError::Disconnected);
        }
        self.next_id += 1;
        let id = self.next_id;

        let mut value = serde_json::to_value(&command)?;
        if let Some(fields) = value.as_object_mut() {
            fields.insert("id".to_string(), id.into());
        }
        let line = serde_json::to_string(&value)?;

        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending).insert(id, tx);
        trace!("bridge -> {}", line);
        if self.commands.send(line).is_err() {
            lock(&self.shared.pending).remove(&id);
            return Err(MeshError::Closed);
        }

        match tokio::time::timeout(self.reply_timeout, rx).await {
            Ok(Ok(reply)) if reply.ok => Ok(reply.payload),
            Ok(Ok(reply)) => Err(MeshError::Rejected(
                reply.error.unwrap_or_else(|| "unspecified error".to_string()),
            )),
            Ok(Err(_)) => Err(MeshError::Disconnected),
            Err(_) => {
                lock(&self.shared.pending).remove(&id);
                Err(MeshError::Timeout(self.reply_timeout))
            }
        }
    }
}

impl MeshClient for BridgeClient {
    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&mut self, filter: EventFilter) -> Subscription {
        lock(&self.shared.subscribers).subscribe(filter)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        lock(&self.shared.subscribers).unsubscribe(id);
    }

    fn contact_by_key_prefix(&self, prefix: &str) -> Option<Contact> {
        lock(&self.shared.contacts)
            .iter()
            .find(|c| c.matches_prefix(prefix))
            .cloned()
    }

    async fn send_channel_message(&mut self, channel: u8, text: &str) -> Result<(), MeshError> {
        self.request(WireCommand::SendChanMsg { channel, text })
            .await
            .map(|_| ())
    }

    async fn send_direct_message(
        &mut self,
        contact: &Contact,
        text: &str,
    ) -> Result<(), MeshError> {
        self.request(WireCommand::SendMsg {
            public_key: &contact.public_key,
            text,
        })
        .await
        .map(|_| ())
    }

    async fn fetch_contacts(&mut self) -> Result<usize, MeshError> {
        let payload = self.request(WireCommand::GetContacts).await?;
        let contacts: Vec<Contact> = serde_json::from_value(payload)?;
        let count = contacts.len();
        *lock(&self.shared.contacts) = contacts;
        debug!("Contact cache refreshed: {} contacts", count);
        Ok(count)
    }

    async fn device_identity(&mut self) -> Result<DeviceIdentity, MeshError> {
        let payload = self.request(WireCommand::Appstart).await?;
        Ok(serde_json::from_value(payload)?)
    }

    async fn start_message_fetching(&mut self) -> Result<(), MeshError> {
        self.request(WireCommand::StartAutoFetch).await.map(|_| ())
    }

    async fn stop_message_fetching(&mut self) -> Result<(), MeshError> {
        self.request(WireCommand::StopAutoFetch).await.map(|_| ())
    }

    async fn disconnect(&mut self) -> Result<(), MeshError> {
        let _ = self.shutdown.send(true);
        self.shared.connected.store(false, Ordering::SeqCst);
        if let Some(handle) = self.io_task.take() {
            if tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .is_err()
            {
                warn!("Bridge IO task did not stop in time");
            }
        }
        Ok(())
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

async fn run_io(
    mut stream: TcpStream,
    addr: String,
    shared: Arc<BridgeShared>,
    mut commands: mpsc::UnboundedReceiver<String>,
    mut shutdown: watch::Receiver<bool>,
    max_backoff: Duration,
) {
    loop {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let reason = loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    let _ = write_half.shutdown().await;
                    debug!("Bridge IO task stopping");
                    return;
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => shared.handle_line(&line),
                    Ok(None) => break "connection closed by bridge".to_string(),
                    Err(e) => break format!("read error: {}", e),
                },
                command = commands.recv() => match command {
                    Some(line) => {
                        if let Err(e) = write_line(&mut write_half, &line).await {
                            break format!("write error: {}", e);
                        }
                    }
                    None => return,
                },
            }
        };

        shared.mark_lost(&reason);
        stream = match redial(&addr, &mut shutdown, max_backoff).await {
            Some(stream) => stream,
            None => return,
        };

        // Anything queued while the link was down belongs to requests that already failed.
        while commands.try_recv().is_ok() {}
        shared.connected.store(true, Ordering::SeqCst);
        info!("🔄 Reconnected to bridge at {}", addr);
        lock(&shared.subscribers).publish(&MeshEvent::Connected { reconnected: true });
    }
}

async fn redial(
    addr: &str,
    shutdown: &mut watch::Receiver<bool>,
    max_backoff: Duration,
) -> Option<TcpStream> {
    let mut delay = INITIAL_BACKOFF;
    loop {
        tokio::select! {
            _ = shutdown.changed() => return None,
            _ = tokio::time::sleep(delay) => {}
        }
        match TcpStream::connect(addr).await {
            Ok(stream) => return Some(stream),
            Err(e) => {
                debug!("Redial {} failed: {} (next attempt in {:?})", addr, e, delay);
                delay = (delay * 2).min(max_backoff);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_validation() {
        assert!(validate_address("127.0.0.1:5000").is_ok());
        assert!(validate_address("bridge.local:1").is_ok());
        assert!(validate_address("127.0.0.1").is_err());
        assert!(validate_address(":5000").is_err());
        assert!(validate_address("host:99999").is_err());
    }

    #[test]
    fn commands_use_snake_case_tags() {
        let value = serde_json::to_value(WireCommand::SendChanMsg {
            channel: 1,
            text: "hi",
        })
        .expect("serialize");
        assert_eq!(value["cmd"], "send_chan_msg");
        assert_eq!(value["channel"], 1);

        let value = serde_json::to_value(WireCommand::Appstart).expect("serialize");
        assert_eq!(value, serde_json::json!({"cmd": "appstart"}));
    }

    #[test]
    fn rx_log_fans_out_sample_then_frame() {
        let shared = BridgeShared::default();
        let mut sub = lock(&shared.subscribers).subscribe(EventFilter::all());
        shared.handle_line(r#"{"event":"rx_log","snr":7.5,"payload":"0001a1"}"#);

        let first = sub.events.try_recv().expect("telemetry");
        assert_eq!(
            first,
            MeshEvent::LinkTelemetry(LinkSample {
                snr: Some(7.5),
                rssi: None
            })
        );
        let second = sub.events.try_recv().expect("frame");
        assert_eq!(
            second,
            MeshEvent::LinkFrame {
                payload: "0001a1".into()
            }
        );
    }

    #[test]
    fn replies_reach_their_waiter() {
        let shared = BridgeShared::default();
        let (tx, mut rx) = oneshot::channel();
        lock(&shared.pending).insert(4, tx);
        shared.handle_line(r#"{"reply":4,"ok":false,"error":"busy"}"#);
        let reply = rx.try_recv().expect("reply");
        assert!(!reply.ok);
        assert_eq!(reply.error.as_deref(), Some("busy"));
    }

    #[test]
    fn new_contact_updates_cache_in_place() {
        let shared = BridgeShared::default();
        shared.handle_line(r#"{"event":"new_contact","public_key":"a1b2","adv_name":"alice"}"#);
        shared.handle_line(
            r#"{"event":"new_contact","public_key":"A1B2","adv_name":"alice2","adv_lat":53.5}"#,
        );
        let contacts = lock(&shared.contacts).clone();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].name, "alice2");
        assert_eq!(contacts[0].lat, 53.5);
    }
}
