//! Client configuration
//!
//! Buffer sizes for the channels around the client actor.

/// Default buffer size for handle -> actor commands
pub const DEFAULT_COMMAND_BUFFER: usize = 256;

/// Default buffer size for transport -> actor events
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Default capacity of the inbound message fan-out
pub const DEFAULT_FANOUT_CAPACITY: usize = 1024;

/// Client actor configuration
///
/// Zero capacities are treated as 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Capacity of the command channel
    pub command_buffer: usize,
    /// Capacity of the transport event channel
    pub event_buffer: usize,
    /// Capacity of the broadcast channel feeding `ClientHandle::subscribe`.
    /// Subscribers that fall further behind than this skip messages.
    pub fanout_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            command_buffer: DEFAULT_COMMAND_BUFFER,
            event_buffer: DEFAULT_EVENT_BUFFER,
            fanout_capacity: DEFAULT_FANOUT_CAPACITY,
        }
    }
}
