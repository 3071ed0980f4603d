//! Broadcast Socket Client Library
//!
//! Joins a named channel on a broadcast server, keeps the session's ordered
//! message log and sends messages back, over tokio-tungstenite.
//!
//! # Features
//! - At most one live connection; reconnecting closes the old one first
//! - Connection state flag (Disconnected / Connected)
//! - Ordered, session-scoped message log, cleared on disconnect
//! - Sends gated on the Connected state (dropped and reported otherwise)
//! - Per-message callback and push subscriptions
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `ConnectionManager` is the synchronous two-state machine
//! - `BroadcastClient` is the actor task that owns it and applies commands
//!   and transport events one at a time
//! - `ClientHandle` is the cloneable front end; state is read from a
//!   `watch` channel
//! - `Transport` is the seam to the wire; `WsTransport` is the WebSocket one
//!
//! # Example
//! ```no_run
//! use broadcast_socket_client::{BroadcastClient, ClientConfig, WsTransport};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (client, _task) = BroadcastClient::spawn(WsTransport::new(), ClientConfig::default());
//!     client.connect("http://localhost:12000", "home").await?;
//!
//!     let mut state = client.watch_state();
//!     state.wait_for(|s| s.is_connected()).await?;
//!
//!     client.send_message(json!({ "text": "hello" })).await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod manager;
pub mod message;
pub mod transport;
pub mod types;
pub mod ws;

// Re-export main types for convenience
pub use client::{BroadcastClient, ClientCommand, ClientHandle};
pub use config::ClientConfig;
pub use error::{ClientError, SendError};
pub use manager::{ClientState, ConnectionManager, MessageObserver, ObserverId};
pub use message::{BroadcastMessage, EventName, Frame};
pub use transport::{
    ConnectOptions, ConnectionHandle, EventSink, HandleEvent, Transport, TransportEvent,
};
pub use types::{Channel, ConnectionId, ConnectionState};
pub use ws::{WsHandle, WsTransport};
