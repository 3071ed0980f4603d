//! Connection manager
//!
//! A two-state machine (Disconnected / Connected) that owns at most one
//! connection handle, keeps the session's ordered message log and gates
//! outbound sends. It is synchronous: transport notifications are applied by
//! calling `handle_event`, which the client actor does for every event it
//! receives. Tests drive it with synthetic events directly.

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::SendError;
use crate::message::{BroadcastMessage, EventName};
use crate::transport::{
    ConnectOptions, ConnectionHandle, EventSink, HandleEvent, Transport, TransportEvent,
};
use crate::types::{Channel, ConnectionId, ConnectionState};

/// Receives every inbound broadcast message
pub trait MessageObserver: Send {
    fn on_message(&mut self, message: &BroadcastMessage);
}

impl<F> MessageObserver for F
where
    F: FnMut(&BroadcastMessage) + Send,
{
    fn on_message(&mut self, message: &BroadcastMessage) {
        self(message)
    }
}

/// Registration token returned by `ConnectionManager::add_observer`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Read-only snapshot of the manager's observable state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientState {
    pub state: ConnectionState,
    /// Channel of the live handle, if any
    pub channel: Option<Channel>,
    /// Message log, in arrival order
    pub messages: Vec<BroadcastMessage>,
    /// Detail of the last connection failure
    pub last_error: Option<String>,
    /// Bumped on every change
    pub revision: u64,
    /// Bumped whenever the log is cleared
    session: u64,
}

impl ClientState {
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }
}

/// The handle currently owned by the manager
struct ActiveConnection<H> {
    id: ConnectionId,
    channel: Channel,
    server_url: String,
    handle: H,
}

/// Owns one connection handle at a time and mirrors its events into state
pub struct ConnectionManager<T: Transport> {
    transport: T,
    /// Cloned into an `EventSink` for every new handle
    events: mpsc::Sender<HandleEvent>,
    active: Option<ActiveConnection<T::Handle>>,
    state: ConnectionState,
    messages: Vec<BroadcastMessage>,
    observers: Vec<(ObserverId, Box<dyn MessageObserver>)>,
    next_observer: u64,
    last_error: Option<String>,
    revision: u64,
    session: u64,
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a disconnected manager
    ///
    /// Handles opened later report their events on `events`.
    pub fn new(transport: T, events: mpsc::Sender<HandleEvent>) -> Self {
        Self {
            transport,
            events,
            active: None,
            state: ConnectionState::Disconnected,
            messages: Vec::new(),
            observers: Vec::new(),
            next_observer: 0,
            last_error: None,
            revision: 0,
            session: 0,
        }
    }

    /// Create a manager that invokes `callback` for every inbound message
    pub fn with_callback<F>(transport: T, events: mpsc::Sender<HandleEvent>, callback: F) -> Self
    where
        F: FnMut(&BroadcastMessage) + Send + 'static,
    {
        let mut manager = Self::new(transport, events);
        manager.add_observer(callback);
        manager
    }

    /// Open a handle to `server_url` for `channel`
    ///
    /// Any existing handle is fully disconnected first. Never fails: if the
    /// transport refuses to open, the manager stays Disconnected and the
    /// reason is kept in `last_error`.
    pub fn connect(&mut self, server_url: &str, channel: impl Into<Channel>) {
        self.disconnect();
        self.last_error = None;
        self.revision += 1;

        let channel = channel.into();
        let id = ConnectionId::new();
        let sink = EventSink::new(id, self.events.clone());
        let options = ConnectOptions {
            channel: channel.clone(),
        };

        match self.transport.open(server_url, options, sink) {
            Ok(handle) => {
                info!(
                    "Opening connection {} to {} (channel '{}')",
                    id, server_url, channel
                );
                self.active = Some(ActiveConnection {
                    id,
                    channel,
                    server_url: server_url.to_string(),
                    handle,
                });
            }
            Err(e) => {
                warn!("Connection error for {}: {}", server_url, e);
                self.state = ConnectionState::Disconnected;
                self.last_error = Some(e.to_string());
            }
        }
    }

    /// Close the live handle and reset session state
    ///
    /// No-op when there is no handle.
    pub fn disconnect(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        info!(
            "Closing connection {} to {} (channel '{}')",
            active.id, active.server_url, active.channel
        );
        active.handle.close();
        self.state = ConnectionState::Disconnected;
        self.messages.clear();
        self.session += 1;
        self.revision += 1;
    }

    /// Emit `data` as a `message` event on the live handle
    ///
    /// Only transmits while Connected. Otherwise the payload is dropped,
    /// a warning is logged and `SendError::NotConnected` is returned.
    pub fn send_message(&self, data: Value) -> Result<(), SendError> {
        match &self.active {
            Some(active) if self.state.is_connected() => {
                active.handle.emit(EventName::Message, data)
            }
            _ => {
                warn!("Cannot send message: not connected");
                Err(SendError::NotConnected)
            }
        }
    }

    /// Apply one transport event
    ///
    /// Events from handles other than the live one are ignored.
    pub fn handle_event(&mut self, event: HandleEvent) {
        let HandleEvent {
            connection_id,
            event,
        } = event;

        if self.active.as_ref().map(|a| a.id) != Some(connection_id) {
            debug!("Ignoring stale {} event from {}", event.name(), connection_id);
            return;
        }

        self.revision += 1;
        match event {
            TransportEvent::Connect => {
                info!("Connected to server ({})", connection_id);
                self.state = ConnectionState::Connected;
                self.last_error = None;
            }
            TransportEvent::Disconnect => {
                info!("Disconnected from server ({})", connection_id);
                self.state = ConnectionState::Disconnected;
            }
            TransportEvent::Message(message) => {
                debug!("Received message: {:?}", message);
                for (_, observer) in self.observers.iter_mut() {
                    observer.on_message(&message);
                }
                self.messages.push(message);
            }
            TransportEvent::ConnectError(detail) => {
                warn!("Connection error ({}): {}", connection_id, detail);
                self.state = ConnectionState::Disconnected;
                self.last_error = Some(detail);
            }
        }
    }

    /// Register an observer for inbound messages
    pub fn add_observer(&mut self, observer: impl MessageObserver + 'static) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    /// Unregister an observer. Returns false if it was not registered.
    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        self.observers.len() != before
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn messages(&self) -> &[BroadcastMessage] {
        &self.messages
    }

    /// Channel of the live handle
    pub fn channel(&self) -> Option<&Channel> {
        self.active.as_ref().map(|a| &a.channel)
    }

    /// Id of the live handle
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.active.as_ref().map(|a| a.id)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn snapshot(&self) -> ClientState {
        ClientState {
            state: self.state,
            channel: self.channel().cloned(),
            messages: self.messages.clone(),
            last_error: self.last_error.clone(),
            revision: self.revision,
            session: self.session,
        }
    }

    /// Bring `target` up to date with the current state
    ///
    /// Within a session the log only grows, so only the new tail is copied.
    /// Returns false if `target` was already current.
    pub fn sync_into(&self, target: &mut ClientState) -> bool {
        if target.revision == self.revision && target.session == self.session {
            return false;
        }

        target.state = self.state;
        if target.channel.as_ref() != self.channel() {
            target.channel = self.channel().cloned();
        }
        target.last_error.clone_from(&self.last_error);

        if target.session != self.session || target.messages.len() > self.messages.len() {
            target.messages = self.messages.clone();
            target.session = self.session;
        } else {
            let seen = target.messages.len();
            target.messages.extend_from_slice(&self.messages[seen..]);
        }

        target.revision = self.revision;
        true
    }
}

impl<T: Transport> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::*;
    use crate::transport::mock::MockTransport;

    const URL: &str = "http://host:1234";

    fn setup() -> (ConnectionManager<MockTransport>, MockTransport) {
        let transport = MockTransport::new();
        let (tx, _rx) = mpsc::channel(16);
        (ConnectionManager::new(transport.clone(), tx), transport)
    }

    fn event(connection_id: ConnectionId, event: TransportEvent) -> HandleEvent {
        HandleEvent {
            connection_id,
            event,
        }
    }

    fn message(text: &str, timestamp: i64) -> BroadcastMessage {
        BroadcastMessage {
            data: json!({ "text": text }),
            timestamp,
            sender: Some("u1".to_string()),
        }
    }

    #[test]
    fn test_initial_state() {
        let (manager, _) = setup();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.messages().is_empty());
        assert!(manager.channel().is_none());
        assert!(manager.last_error().is_none());
    }

    #[test]
    fn test_connect_passes_channel() {
        let (mut manager, transport) = setup();
        manager.connect(URL, "room1");

        let log = transport.log.lock().unwrap();
        assert_eq!(log.opened, vec![(URL.to_string(), Channel::from("room1"))]);
        assert_eq!(manager.channel(), Some(&Channel::from("room1")));
        // Not connected until the transport says so
        assert!(!manager.is_connected());
    }

    #[test]
    fn test_connect_event_then_message() {
        let (mut manager, transport) = setup();
        manager.connect(URL, "room1");
        let id = transport.last_id();

        manager.handle_event(event(id, TransportEvent::Connect));
        assert!(manager.is_connected());

        let hi = message("hi", 1000);
        manager.handle_event(event(id, TransportEvent::Message(hi.clone())));
        assert_eq!(manager.messages(), &[hi]);
    }

    #[test]
    fn test_disconnect_resets_state() {
        let (mut manager, transport) = setup();
        manager.connect(URL, "room1");
        let id = transport.last_id();
        manager.handle_event(event(id, TransportEvent::Connect));
        manager.handle_event(event(id, TransportEvent::Message(message("hi", 1000))));

        manager.disconnect();

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.messages().is_empty());
        assert!(manager.channel().is_none());
        assert_eq!(transport.log.lock().unwrap().closed, vec![id]);
    }

    #[test]
    fn test_disconnect_without_handle_is_noop() {
        let (mut manager, transport) = setup();
        manager.disconnect();
        manager.disconnect();
        assert!(transport.log.lock().unwrap().closed.is_empty());
    }

    #[test]
    fn test_send_while_disconnected_is_dropped() {
        let (manager, transport) = setup();

        let result = manager.send_message(json!({ "text": "x" }));

        assert_eq!(result, Err(SendError::NotConnected));
        assert!(!manager.is_connected());
        assert!(transport.log.lock().unwrap().emitted.is_empty());
    }

    #[test]
    fn test_send_gated_on_connect_event() {
        let (mut manager, transport) = setup();
        manager.connect(URL, "room1");
        let id = transport.last_id();

        // Handle exists but has not connected yet
        assert_eq!(
            manager.send_message(json!("early")),
            Err(SendError::NotConnected)
        );

        manager.handle_event(event(id, TransportEvent::Connect));
        assert_eq!(manager.send_message(json!("ok")), Ok(()));

        manager.handle_event(event(id, TransportEvent::Disconnect));
        assert_eq!(
            manager.send_message(json!("late")),
            Err(SendError::NotConnected)
        );

        let log = transport.log.lock().unwrap();
        assert_eq!(log.emitted, vec![(id, EventName::Message, json!("ok"))]);
    }

    #[test]
    fn test_reconnect_closes_previous_handle_first() {
        let (mut manager, transport) = setup();
        manager.connect(URL, "a");
        let first = transport.last_id();
        manager.connect(URL, "b");

        let log = transport.log.lock().unwrap();
        assert_eq!(log.closed, vec![first]);
        assert_eq!(log.opened.len(), 2);
        let opens_for_b = log
            .opened
            .iter()
            .filter(|(_, c)| c.as_str() == "b")
            .count();
        assert_eq!(opens_for_b, 1);
        assert_eq!(log.live, 1);
    }

    #[test]
    fn test_at_most_one_live_handle() {
        let (mut manager, transport) = setup();
        for i in 0..5 {
            manager.connect(URL, format!("room{}", i));
            let id = transport.last_id();
            if i % 2 == 0 {
                manager.handle_event(event(id, TransportEvent::Connect));
            }
        }

        let log = transport.log.lock().unwrap();
        assert_eq!(log.max_live, 1);
        assert_eq!(log.live, 1);
        assert_eq!(log.closed.len(), 4);
    }

    #[test]
    fn test_reconnect_clears_log_and_state() {
        let (mut manager, transport) = setup();
        manager.connect(URL, "a");
        let id = transport.last_id();
        manager.handle_event(event(id, TransportEvent::Connect));
        manager.handle_event(event(id, TransportEvent::Message(message("hi", 1))));

        manager.connect(URL, "b");

        assert!(!manager.is_connected());
        assert!(manager.messages().is_empty());
    }

    #[test]
    fn test_message_log_preserves_order() {
        let (mut manager, transport) = setup();
        manager.connect(URL, "room1");
        let id = transport.last_id();

        let sent: Vec<_> = (0..10).map(|i| message("same", i % 3)).collect();
        for m in &sent {
            manager.handle_event(event(id, TransportEvent::Message(m.clone())));
        }

        // Duplicates are kept, order is arrival order
        assert_eq!(manager.messages(), sent.as_slice());
    }

    #[test]
    fn test_stale_events_ignored() {
        let (mut manager, transport) = setup();
        manager.connect(URL, "a");
        let old = transport.last_id();
        manager.connect(URL, "b");

        manager.handle_event(event(old, TransportEvent::Connect));
        manager.handle_event(event(old, TransportEvent::Message(message("old", 1))));

        assert!(!manager.is_connected());
        assert!(manager.messages().is_empty());

        manager.disconnect();
        manager.handle_event(event(old, TransportEvent::Connect));
        assert!(!manager.is_connected());
    }

    #[test]
    fn test_connect_error_sets_disconnected() {
        let (mut manager, transport) = setup();
        manager.connect(URL, "room1");
        let id = transport.last_id();
        manager.handle_event(event(id, TransportEvent::Connect));

        manager.handle_event(event(
            id,
            TransportEvent::ConnectError("connection refused".to_string()),
        ));

        assert!(!manager.is_connected());
        assert_eq!(manager.last_error(), Some("connection refused"));

        // The handle stays owned until disconnect
        manager.handle_event(event(id, TransportEvent::Connect));
        assert!(manager.is_connected());
        assert!(manager.last_error().is_none());
    }

    #[test]
    fn test_open_failure_is_not_raised() {
        let transport = MockTransport::failing();
        let (tx, _rx) = mpsc::channel(16);
        let mut manager = ConnectionManager::new(transport, tx);

        manager.connect("ftp://nowhere", "room1");

        assert!(!manager.is_connected());
        assert!(manager.channel().is_none());
        assert!(manager.last_error().is_some());
    }

    #[test]
    fn test_callback_sees_every_message() {
        let transport = MockTransport::new();
        let (tx, _rx) = mpsc::channel(16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut manager = ConnectionManager::with_callback(transport.clone(), tx, move |m| {
            sink.lock().unwrap().push(m.timestamp);
        });

        manager.connect(URL, "room1");
        let id = transport.last_id();
        manager.handle_event(event(id, TransportEvent::Message(message("a", 1))));
        manager.handle_event(event(id, TransportEvent::Message(message("b", 2))));

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_observers_register_and_remove() {
        let (mut manager, transport) = setup();
        let first = Arc::new(Mutex::new(0));
        let second = Arc::new(Mutex::new(0));

        let f = Arc::clone(&first);
        let first_id = manager.add_observer(move |_: &BroadcastMessage| *f.lock().unwrap() += 1);
        let s = Arc::clone(&second);
        manager.add_observer(move |_: &BroadcastMessage| *s.lock().unwrap() += 1);

        manager.connect(URL, "room1");
        let id = transport.last_id();
        manager.handle_event(event(id, TransportEvent::Message(message("a", 1))));

        assert!(manager.remove_observer(first_id));
        assert!(!manager.remove_observer(first_id));

        manager.handle_event(event(id, TransportEvent::Message(message("b", 2))));

        assert_eq!(*first.lock().unwrap(), 1);
        assert_eq!(*second.lock().unwrap(), 2);
    }

    #[test]
    fn test_drop_closes_handle_once() {
        let (mut manager, transport) = setup();
        manager.connect(URL, "room1");
        let id = transport.last_id();
        manager.handle_event(event(id, TransportEvent::Connect));

        drop(manager);

        let log = transport.log.lock().unwrap();
        assert_eq!(log.closed, vec![id]);
        assert_eq!(log.live, 0);
    }

    #[test]
    fn test_drop_after_disconnect_does_not_close_again() {
        let (mut manager, transport) = setup();
        manager.connect(URL, "room1");
        manager.disconnect();

        drop(manager);

        assert_eq!(transport.log.lock().unwrap().closed.len(), 1);
    }

    #[test]
    fn test_events_delivered_through_sink() {
        let transport = MockTransport::new();
        let (tx, mut rx) = mpsc::channel(16);
        let mut manager = ConnectionManager::new(transport.clone(), tx);

        manager.connect(URL, "room1");
        transport.sink(0).try_send(TransportEvent::Connect).unwrap();

        let ev = rx.try_recv().unwrap();
        manager.handle_event(ev);
        assert!(manager.is_connected());
    }

    #[test]
    fn test_connect_clears_previous_error() {
        let (mut manager, transport) = setup();
        manager.connect(URL, "room1");
        let id = transport.last_id();
        manager.handle_event(event(id, TransportEvent::ConnectError("refused".to_string())));
        assert_eq!(manager.last_error(), Some("refused"));

        manager.disconnect();
        manager.connect(URL, "room1");

        assert!(manager.last_error().is_none());
        assert!(manager.snapshot().last_error.is_none());
    }

    #[test]
    fn test_sync_into_appends_and_resets() {
        let (mut manager, transport) = setup();
        let mut published = manager.snapshot();
        assert!(!manager.sync_into(&mut published));

        manager.connect(URL, "room1");
        let id = transport.last_id();
        manager.handle_event(event(id, TransportEvent::Connect));
        manager.handle_event(event(id, TransportEvent::Message(message("a", 1))));
        assert!(manager.sync_into(&mut published));
        assert_eq!(published, manager.snapshot());

        manager.handle_event(event(id, TransportEvent::Message(message("b", 2))));
        manager.handle_event(event(id, TransportEvent::Message(message("c", 3))));
        assert!(manager.sync_into(&mut published));
        assert_eq!(published.messages.len(), 3);
        assert_eq!(published, manager.snapshot());

        // New session after disconnect, with one message already in it
        manager.connect(URL, "room2");
        let id = transport.last_id();
        manager.handle_event(event(id, TransportEvent::Message(message("d", 4))));
        assert!(manager.sync_into(&mut published));
        assert_eq!(published.messages, vec![message("d", 4)]);
        assert_eq!(published.channel, Some(Channel::from("room2")));
        assert_eq!(published, manager.snapshot());

        // Stale events change nothing
        manager.handle_event(event(ConnectionId::new(), TransportEvent::Connect));
        assert!(!manager.sync_into(&mut published));
    }

    #[test]
    fn test_snapshot() {
        let (mut manager, transport) = setup();
        manager.connect(URL, "room1");
        let id = transport.last_id();
        manager.handle_event(event(id, TransportEvent::Connect));
        manager.handle_event(event(id, TransportEvent::Message(message("hi", 1000))));

        let snapshot = manager.snapshot();
        assert!(snapshot.is_connected());
        assert_eq!(snapshot.channel, Some(Channel::from("room1")));
        assert_eq!(snapshot.messages, vec![message("hi", 1000)]);
    }
}
