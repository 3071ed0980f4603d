//! Error types for the broadcast client
//!
//! Defines connection-level errors and message send errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Client-level errors
///
/// None of these are raised out of the connection manager itself; a failed
/// `open` is folded into the Disconnected state. They surface from the
/// transport factory and from a `ClientHandle` whose actor has stopped.
#[derive(Debug, Error)]
pub enum ClientError {
    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server URL could not be parsed
    #[error("Invalid server URL: {0}")]
    Url(#[from] url::ParseError),

    /// Server URL uses a scheme the transport cannot speak
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// Channel send error (client actor is gone)
    #[error("Channel send error")]
    ChannelSend,
}

/// Message send errors
///
/// Returned as values only; a dropped send never panics.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// No live handle, or the handle has not reported `connect` yet
    #[error("Not connected")]
    NotConnected,

    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,
}
