//! Message protocol definitions
//!
//! The broadcast message shape delivered by the server, the named events a
//! connection handle understands, and the JSON frame used on the wire.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;

/// Broadcast message received from the server
///
/// Produced only by the remote peer. Sends carry the raw payload; the server
/// enriches it with a timestamp and the sender id before broadcasting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    /// Arbitrary payload
    pub data: Value,
    /// Epoch milliseconds
    pub timestamp: i64,
    /// Sender identity, if the server provided one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

impl BroadcastMessage {
    /// Short human label for the sender
    ///
    /// `system` and `proxy` are reserved server identities; any other sender
    /// id is shortened to its first 8 characters.
    pub fn sender_label(&self) -> String {
        match self.sender.as_deref() {
            Some("system") => "System".to_string(),
            Some("proxy") => "Proxy".to_string(),
            Some(id) => id.chars().take(8).collect(),
            None => "anonymous".to_string(),
        }
    }

    /// Timestamp rendered as local wall-clock time (HH:MM:SS)
    pub fn local_time(&self) -> String {
        DateTime::from_timestamp_millis(self.timestamp)
            .map(|t| t.with_timezone(&Local).format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "--:--:--".to_string())
    }
}

/// Named events exchanged with a connection handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    Connect,
    Disconnect,
    Message,
    ConnectError,
}

impl EventName {
    pub fn as_str(self) -> &'static str {
        match self {
            EventName::Connect => "connect",
            EventName::Disconnect => "disconnect",
            EventName::Message => "message",
            EventName::ConnectError => "connect_error",
        }
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON frame on the wire: `{"event": "...", "data": ...}`
///
/// The event name stays a plain string so frames for events this client
/// does not subscribe to still decode and can be skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: EventName, data: Value) -> Self {
        Self {
            event: event.as_str().to_string(),
            data,
        }
    }

    /// Decode the broadcast message carried by a `message` frame
    ///
    /// Returns `Ok(None)` for any other event.
    pub fn into_broadcast(self) -> Result<Option<BroadcastMessage>, ClientError> {
        if self.event != EventName::Message.as_str() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(self.data)?))
    }

    /// Parse a text frame and extract its broadcast message, if any
    pub fn decode_broadcast(text: &str) -> Result<Option<BroadcastMessage>, ClientError> {
        let frame: Frame = serde_json::from_str(text)?;
        frame.into_broadcast()
    }
}
