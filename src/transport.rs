//! Transport collaborator interface
//!
//! The connection manager never speaks a wire protocol itself. It asks a
//! `Transport` for a handle, emits through the handle, and closes it. Every
//! lifecycle notification comes back as a `HandleEvent` on an mpsc channel,
//! tagged with the id of the handle that produced it.

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{ClientError, SendError};
use crate::message::{BroadcastMessage, EventName};
use crate::types::{Channel, ConnectionId};

/// Connection-time options passed to `Transport::open`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Broadcast group to join
    pub channel: Channel,
}

/// The four events the manager subscribes to
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Handshake finished, the handle is live
    Connect,
    /// The handle lost or closed its connection
    Disconnect,
    /// Broadcast message delivered by the server
    Message(BroadcastMessage),
    /// Connection could not be established (detail is for diagnostics only)
    ConnectError(String),
}

impl TransportEvent {
    pub fn name(&self) -> EventName {
        match self {
            TransportEvent::Connect => EventName::Connect,
            TransportEvent::Disconnect => EventName::Disconnect,
            TransportEvent::Message(_) => EventName::Message,
            TransportEvent::ConnectError(_) => EventName::ConnectError,
        }
    }
}

/// A transport event tagged with its originating handle
#[derive(Debug, Clone, PartialEq)]
pub struct HandleEvent {
    pub connection_id: ConnectionId,
    pub event: TransportEvent,
}

/// Event channel endpoint handed to one connection handle
///
/// Bound to a single `ConnectionId`, so a handle cannot report events
/// under another handle's identity.
#[derive(Debug, Clone)]
pub struct EventSink {
    connection_id: ConnectionId,
    sender: mpsc::Sender<HandleEvent>,
}

impl EventSink {
    pub fn new(connection_id: ConnectionId, sender: mpsc::Sender<HandleEvent>) -> Self {
        Self {
            connection_id,
            sender,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Deliver an event, waiting for channel capacity
    ///
    /// Fails only when the receiving side (the client actor) is gone.
    pub async fn send(&self, event: TransportEvent) -> Result<(), SendError> {
        self.sender
            .send(self.tag(event))
            .await
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Deliver an event without waiting
    pub fn try_send(
        &self,
        event: TransportEvent,
    ) -> Result<(), mpsc::error::TrySendError<HandleEvent>> {
        self.sender.try_send(self.tag(event))
    }

    fn tag(&self, event: TransportEvent) -> HandleEvent {
        HandleEvent {
            connection_id: self.connection_id,
            event,
        }
    }
}

/// Factory for connection handles
pub trait Transport: Send + 'static {
    type Handle: ConnectionHandle;

    /// Request a new handle to `server_url`
    ///
    /// Returns immediately; the outcome of the connection attempt is
    /// reported later through `events` as `Connect` or `ConnectError`.
    fn open(
        &mut self,
        server_url: &str,
        options: ConnectOptions,
        events: EventSink,
    ) -> Result<Self::Handle, ClientError>;
}

/// A live connection handle
pub trait ConnectionHandle: Send + 'static {
    /// Send `payload` as the named event
    fn emit(&self, event: EventName, payload: Value) -> Result<(), SendError>;

    /// Tear the connection down. Consumes the handle, so it closes once.
    fn close(self);
}
