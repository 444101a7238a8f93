//! In-memory mesh client for tests.
//!
//! `MockMesh` is cheap to clone; every clone shares one state, so a test can hand one
//! handle to the dispatcher and keep another to inject events and inspect what was sent.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    Contact, DeviceIdentity, EventFilter, MeshClient, MeshError, MeshEvent, SubscriberList,
    Subscription, SubscriptionId,
};

/// A message the bot handed to the mock for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    Channel { channel: u8, text: String },
    Direct { public_key: String, text: String },
}

impl SentMessage {
    pub fn text(&self) -> &str {
        match self {
            SentMessage::Channel { text, .. } | SentMessage::Direct { text, .. } => text,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    identity: DeviceIdentity,
    contacts: Vec<Contact>,
    refresh_contacts: Vec<Contact>,
    subscribers: SubscriberList,
    sent: Vec<SentMessage>,
    contact_refreshes: usize,
    fail_sends: bool,
    fail_refresh: bool,
    fetching: bool,
    disconnected: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MockMesh {
    state: Arc<Mutex<MockState>>,
}

impl MockMesh {
    /// A connected mock with no contacts.
    pub fn new() -> Self {
        let mock = Self::default();
        mock.lock().connected = true;
        mock
    }

    pub fn with_identity(self, identity: DeviceIdentity) -> Self {
        self.lock().identity = identity;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Contact known from the start.
    pub fn add_contact(&self, contact: Contact) {
        self.lock().contacts.push(contact);
    }

    /// Contact that only shows up after a contact refresh.
    pub fn add_contact_on_refresh(&self, contact: Contact) {
        self.lock().refresh_contacts.push(contact);
    }

    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    pub fn fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    pub fn fail_refresh(&self, fail: bool) {
        self.lock().fail_refresh = fail;
    }

    /// Publish an event to matching subscribers. Returns how many received it.
    pub fn emit(&self, event: MeshEvent) -> usize {
        self.lock().subscribers.publish(&event)
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }

    pub fn contact_refreshes(&self) -> usize {
        self.lock().contact_refreshes
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn is_fetching(&self) -> bool {
        self.lock().fetching
    }

    pub fn was_disconnected(&self) -> bool {
        self.lock().disconnected
    }
}

impl MeshClient for MockMesh {
    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn subscribe(&mut self, filter: EventFilter) -> Subscription {
        self.lock().subscribers.subscribe(filter)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        self.lock().subscribers.unsubscribe(id);
    }

    fn contact_by_key_prefix(&self, prefix: &str) -> Option<Contact> {
        self.lock()
            .contacts
            .iter()
            .find(|c| c.matches_prefix(prefix))
            .cloned()
    }

    async fn send_channel_message(&mut self, channel: u8, text: &str) -> Result<(), MeshError> {
        let mut state = self.lock();
        if state.fail_sends {
            return Err(MeshError::Rejected("channel send failed".into()));
        }
        state.sent.push(SentMessage::Channel {
            channel,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_direct_message(
        &mut self,
        contact: &Contact,
        text: &str,
    ) -> Result<(), MeshError> {
        let mut state = self.lock();
        if state.fail_sends {
            return Err(MeshError::Rejected("direct send failed".into()));
        }
        state.sent.push(SentMessage::Direct {
            public_key: contact.public_key.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn fetch_contacts(&mut self) -> Result<usize, MeshError> {
        let mut state = self.lock();
        state.contact_refreshes += 1;
        if state.fail_refresh {
            return Err(MeshError::Rejected("get_contacts failed".into()));
        }
        let fresh = std::mem::take(&mut state.refresh_contacts);
        state.contacts.extend(fresh);
        Ok(state.contacts.len())
    }

    async fn device_identity(&mut self) -> Result<DeviceIdentity, MeshError> {
        Ok(self.lock().identity.clone())
    }

    async fn start_message_fetching(&mut self) -> Result<(), MeshError> {
        self.lock().fetching = true;
        Ok(())
    }

    async fn stop_message_fetching(&mut self) -> Result<(), MeshError> {
        self.lock().fetching = false;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), MeshError> {
        let mut state = self.lock();
        state.connected = false;
        state.disconnected = true;
        Ok(())
    }
}
