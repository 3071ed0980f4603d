//! WebSocket transport
//!
//! Binds the `Transport` interface onto tokio-tungstenite. Each handle runs
//! one task that performs the handshake, forwards inbound `message` frames
//! as events and writes outbound frames. There is no reconnection: when the
//! socket goes away the task reports `Disconnect` and ends.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{ClientError, SendError};
use crate::message::{EventName, Frame};
use crate::transport::{ConnectOptions, ConnectionHandle, EventSink, Transport, TransportEvent};
use crate::types::Channel;

/// Query parameter carrying the channel name
const CHANNEL_PARAM: &str = "channel";

/// Build the WebSocket URL for `server_url` and `channel`
///
/// `http`/`https` map to `ws`/`wss`; the channel is appended as a query
/// parameter.
pub fn connection_url(server_url: &str, channel: &Channel) -> Result<Url, ClientError> {
    let mut url = Url::parse(server_url)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ClientError::UnsupportedScheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| ClientError::UnsupportedScheme(scheme.to_string()))?;
    url.query_pairs_mut()
        .append_pair(CHANNEL_PARAM, channel.as_str());
    Ok(url)
}

/// Transport that opens one WebSocket per handle
///
/// `open` spawns onto the current tokio runtime and must be called from
/// within one.
#[derive(Debug, Clone, Default)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WsTransport {
    type Handle = WsHandle;

    fn open(
        &mut self,
        server_url: &str,
        options: ConnectOptions,
        events: EventSink,
    ) -> Result<WsHandle, ClientError> {
        let url = connection_url(server_url, &options.channel)?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        debug!("Spawning connection task {} for {}", events.connection_id(), url);
        tokio::spawn(run_connection(url, events, outbound_rx, shutdown_rx));

        Ok(WsHandle {
            outbound: outbound_tx,
            shutdown: shutdown_tx,
        })
    }
}

/// Handle to one WebSocket connection task
///
/// Dropping the handle without `close` also stops the task.
#[derive(Debug)]
pub struct WsHandle {
    outbound: mpsc::UnboundedSender<Frame>,
    shutdown: oneshot::Sender<()>,
}

impl ConnectionHandle for WsHandle {
    fn emit(&self, event: EventName, payload: Value) -> Result<(), SendError> {
        self.outbound
            .send(Frame::new(event, payload))
            .map_err(|_| SendError::ChannelClosed)
    }

    fn close(self) {
        // Task may already be gone
        let _ = self.shutdown.send(());
    }
}

/// Connection task: handshake, then pump frames both ways
async fn run_connection(
    url: Url,
    sink: EventSink,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let id = sink.connection_id();

    let ws_stream = tokio::select! {
        result = connect_async(url.as_str()) => match result {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                let e = ClientError::from(e);
                warn!("Connection {} to {} failed: {}", id, url, e);
                let _ = sink.send(TransportEvent::ConnectError(e.to_string())).await;
                return;
            }
        },
        _ = &mut shutdown => {
            debug!("Connection {} closed before handshake finished", id);
            return;
        }
    };

    info!("Connection {} established to {}", id, url);
    if sink.send(TransportEvent::Connect).await.is_err() {
        debug!("Client gone, ending connection {}", id);
        return;
    }

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!("Closing connection {}", id);
                let _ = ws_sender.close().await;
                break;
            }
            Some(frame) = outbound.recv() => {
                match serde_json::to_string(&frame).map_err(ClientError::from) {
                    Ok(json) => {
                        if ws_sender.send(Message::Text(json.into())).await.is_err() {
                            debug!("WebSocket send failed, ending connection {}", id);
                            break;
                        }
                    }
                    Err(e) => {
                        // Payload is dropped, connection stays up
                        error!("Failed to serialize frame: {}", e);
                    }
                }
            }
            msg = ws_receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if forward_text(&sink, &text).await.is_err() {
                        debug!("Client gone, ending connection {}", id);
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Server closed connection {}", id);
                    break;
                }
                Some(Ok(_)) => {
                    // Ping/pong handled by tungstenite, binary frames ignored
                }
                Some(Err(e)) => {
                    error!("WebSocket error on {}: {}", id, e);
                    break;
                }
            }
        }
    }

    let _ = sink.send(TransportEvent::Disconnect).await;
    debug!("Connection task {} ended", id);
}

/// Decode one text frame and forward it if it is a broadcast message
async fn forward_text(sink: &EventSink, text: &str) -> Result<(), SendError> {
    match Frame::decode_broadcast(text) {
        Ok(Some(message)) => sink.send(TransportEvent::Message(message)).await,
        Ok(None) => {
            debug!("Skipping non-message frame on {}", sink.connection_id());
            Ok(())
        }
        Err(e) => {
            warn!("Invalid frame on {}: {}", sink.connection_id(), e);
            Ok(())
        }
    }
}
