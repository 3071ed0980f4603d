//! Basic type definitions for the broadcast client
//!
//! Provides newtype wrappers for type safety:
//! - `ConnectionId`: UUID-based identifier of one transport handle
//! - `Channel`: routing key that selects a broadcast group
//!
//! and the two-state `ConnectionState`.

use uuid::Uuid;

/// Identifier of a single connection handle (newtype pattern)
///
/// A fresh id is minted for every `connect` call. Transport events carry it
/// so events from a handle that has since been replaced can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broadcast channel name
///
/// Sent to the server at connect time so it can route this client into
/// the matching broadcast group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Channel(pub String);

impl Channel {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Channel {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for Channel {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection state flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}
