//! Login/logout notifications
//!
//! Events go out on a `tokio::sync::broadcast` channel. Publishing never
//! fails the caller: with no subscriber the event is dropped and logged.

use crate::models::SpidUser;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default broadcast channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Trait implemented by all SPID event payloads.
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Fully qualified event type name.
    ///
    /// Convention: `spid.sp.<entity>.<action>`
    const EVENT_TYPE: &'static str;
}

/// Published when a browser session becomes authenticated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpidLogin {
    pub session_id: Uuid,
    pub idp_id: String,
    pub idp_entity_name: String,
    pub user: SpidUser,
}

impl Event for SpidLogin {
    const EVENT_TYPE: &'static str = "spid.sp.auth.login";
}

/// Published when an authenticated session is torn down.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpidLogout {
    pub session_id: Uuid,
    pub idp_id: String,
    pub idp_entity_name: String,
    pub user: SpidUser,
}

impl Event for SpidLogout {
    const EVENT_TYPE: &'static str = "spid.sp.auth.logout";
}

/// Any event carried on the channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum SpidEvent {
    Login(SpidLogin),
    Logout(SpidLogout),
}

impl From<SpidLogin> for SpidEvent {
    fn from(event: SpidLogin) -> Self {
        Self::Login(event)
    }
}

impl From<SpidLogout> for SpidEvent {
    fn from(event: SpidLogout) -> Self {
        Self::Logout(event)
    }
}

/// Envelope with the metadata every subscriber gets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub event: SpidEvent,
}

/// Publisher that sends SPID events to a broadcast channel.
#[derive(Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventPublisher {
    /// Create a new event publisher with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<EventEnvelope>) {
        let (sender, receiver) = broadcast::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Publish an event to all subscribers. Fire-and-forget.
    pub fn publish<E>(&self, event: E)
    where
        E: Event + Into<SpidEvent>,
    {
        let envelope = EventEnvelope {
            event_id: Uuid::new_v4(),
            event_type: E::EVENT_TYPE.to_string(),
            timestamp: Utc::now(),
            event: event.into(),
        };
        if let Err(e) = self.sender.send(envelope) {
            tracing::warn!(
                target: "spid_events",
                event_type = E::EVENT_TYPE,
                error = %e,
                "No active subscribers to receive SPID event"
            );
        }
    }

    /// Get a new receiver for the broadcast channel.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY).0
    }
}
