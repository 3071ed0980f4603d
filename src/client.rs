//! BroadcastClient Actor implementation
//!
//! A single task owns the `ConnectionManager` and is the only place its
//! state changes. Commands from `ClientHandle`s and events from transport
//! handles are multiplexed into that task, so no locks are needed.
//! Observable state is published on a `watch` channel after every step.

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::{ClientError, SendError};
use crate::manager::{ClientState, ConnectionManager};
use crate::message::BroadcastMessage;
use crate::transport::{HandleEvent, Transport};
use crate::types::Channel;

/// Commands sent from handles to the BroadcastClient actor
#[derive(Debug)]
pub enum ClientCommand {
    /// Open a connection, replacing any existing one
    Connect {
        server_url: String,
        channel: Channel,
        reply: oneshot::Sender<()>,
    },
    /// Close the connection and clear the message log
    Disconnect { reply: oneshot::Sender<()> },
    /// Send a payload as a `message` event
    Send {
        data: Value,
        reply: oneshot::Sender<Result<(), SendError>>,
    },
}

/// The client actor
pub struct BroadcastClient<T: Transport> {
    manager: ConnectionManager<T>,
    /// Command receiver channel
    commands: mpsc::Receiver<ClientCommand>,
    /// Transport event receiver channel
    events: mpsc::Receiver<HandleEvent>,
    state_tx: watch::Sender<ClientState>,
}

impl<T: Transport> BroadcastClient<T> {
    /// Build the actor and a handle to it without starting it
    pub fn new(transport: T, config: &ClientConfig) -> (Self, ClientHandle) {
        let (events_tx, events) = mpsc::channel(config.event_buffer.max(1));
        Self::build(ConnectionManager::new(transport, events_tx), events, config)
    }

    /// Build the actor with a per-message callback
    ///
    /// The callback runs inside the actor task, before the message is
    /// appended to the log.
    pub fn with_callback<F>(transport: T, config: &ClientConfig, callback: F) -> (Self, ClientHandle)
    where
        F: FnMut(&BroadcastMessage) + Send + 'static,
    {
        let (events_tx, events) = mpsc::channel(config.event_buffer.max(1));
        let manager = ConnectionManager::with_callback(transport, events_tx, callback);
        Self::build(manager, events, config)
    }

    /// Start the actor on the tokio runtime
    pub fn spawn(transport: T, config: ClientConfig) -> (ClientHandle, JoinHandle<()>) {
        let (client, handle) = Self::new(transport, &config);
        (handle, tokio::spawn(client.run()))
    }

    /// Start the actor with a per-message callback
    pub fn spawn_with_callback<F>(
        transport: T,
        config: ClientConfig,
        callback: F,
    ) -> (ClientHandle, JoinHandle<()>)
    where
        F: FnMut(&BroadcastMessage) + Send + 'static,
    {
        let (client, handle) = Self::with_callback(transport, &config, callback);
        (handle, tokio::spawn(client.run()))
    }

    fn build(
        mut manager: ConnectionManager<T>,
        events: mpsc::Receiver<HandleEvent>,
        config: &ClientConfig,
    ) -> (Self, ClientHandle) {
        let (fanout, _) = broadcast::channel(config.fanout_capacity.max(1));
        let fanout_tx = fanout.clone();
        manager.add_observer(move |message: &BroadcastMessage| {
            // No subscribers is fine
            let _ = fanout_tx.send(message.clone());
        });

        let (commands_tx, commands) = mpsc::channel(config.command_buffer.max(1));
        let (state_tx, state_rx) = watch::channel(manager.snapshot());

        let client = Self {
            manager,
            commands,
            events,
            state_tx,
        };
        let handle = ClientHandle {
            commands: commands_tx,
            state: state_rx,
            fanout,
        };
        (client, handle)
    }

    /// Run the actor event loop
    ///
    /// Runs until every `ClientHandle` is dropped, then closes any live
    /// connection.
    pub async fn run(mut self) {
        info!("BroadcastClient started");

        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else {
                        break;
                    };
                    self.handle_command(cmd);
                }
                Some(event) = self.events.recv() => {
                    self.manager.handle_event(event);
                    self.publish();
                }
            }
        }

        self.manager.disconnect();
        self.publish();
        info!("BroadcastClient shutting down");
    }

    /// Process a single command
    ///
    /// State is published before replying, so a caller that awaited the
    /// reply reads the post-command state.
    fn handle_command(&mut self, cmd: ClientCommand) {
        match cmd {
            ClientCommand::Connect {
                server_url,
                channel,
                reply,
            } => {
                self.manager.connect(&server_url, channel);
                self.publish();
                let _ = reply.send(());
            }
            ClientCommand::Disconnect { reply } => {
                self.manager.disconnect();
                self.publish();
                let _ = reply.send(());
            }
            ClientCommand::Send { data, reply } => {
                let result = self.manager.send_message(data);
                if reply.send(result).is_err() {
                    debug!("Send caller went away before reply");
                }
            }
        }
    }

    fn publish(&self) {
        self.state_tx
            .send_if_modified(|current| self.manager.sync_into(current));
    }
}

/// Cloneable front end of a running `BroadcastClient`
///
/// Exposes the three operations plus the observable state. The actor stops
/// and closes its connection once every clone is dropped.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::Sender<ClientCommand>,
    state: watch::Receiver<ClientState>,
    fanout: broadcast::Sender<BroadcastMessage>,
}

impl ClientHandle {
    /// Connect to `server_url` and join `channel`
    ///
    /// Resolves once the handle has been requested; the connection itself
    /// is reported later through the state.
    pub async fn connect(
        &self,
        server_url: &str,
        channel: impl Into<Channel>,
    ) -> Result<(), ClientError> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(ClientCommand::Connect {
                server_url: server_url.to_string(),
                channel: channel.into(),
                reply,
            })
            .await
            .map_err(|_| ClientError::ChannelSend)?;
        done.await.map_err(|_| ClientError::ChannelSend)
    }

    /// Disconnect; on return the state is Disconnected and the log is empty
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(ClientCommand::Disconnect { reply })
            .await
            .map_err(|_| ClientError::ChannelSend)?;
        done.await.map_err(|_| ClientError::ChannelSend)
    }

    /// Send `data` if connected
    ///
    /// Returns `SendError::NotConnected` when the payload was dropped.
    pub async fn send_message(&self, data: Value) -> Result<(), SendError> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(ClientCommand::Send { data, reply })
            .await
            .map_err(|_| SendError::ChannelClosed)?;
        done.await.map_err(|_| SendError::ChannelClosed)?
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    /// Current message log
    pub fn messages(&self) -> Vec<BroadcastMessage> {
        self.state.borrow().messages.clone()
    }

    pub fn snapshot(&self) -> ClientState {
        self.state.borrow().clone()
    }

    /// Receiver that is notified whenever the observable state changes
    pub fn watch_state(&self) -> watch::Receiver<ClientState> {
        self.state.clone()
    }

    /// Push subscription to inbound messages
    ///
    /// Only messages arriving after this call are delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.fanout.subscribe()
    }
}
