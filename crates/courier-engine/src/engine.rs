//! The message engine abstraction.

use std::sync::Arc;

use courier_core::{AgentId, ConnectionStatus, Disposer, Envelope, MessageType};
use tokio::sync::watch;

/// Callback for every envelope delivered to consumers.
pub type MessageCallback = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Callback for every connection status transition.
pub type StatusCallback = Arc<dyn Fn(&ConnectionStatus) + Send + Sync>;

/// Owns one transport connection and fans its traffic out to subscribers.
///
/// None of these methods block or fail: lifecycle and send problems surface
/// as status transitions and as locally produced `error:occurred` envelopes
/// on the message stream.
pub trait MessageEngine: Send + Sync {
    /// Start connecting. Ignored unless disconnected or in error.
    fn connect(&self);

    /// Close the connection. Safe in any state.
    fn disconnect(&self);

    /// Send a chat message, optionally addressed to an agent.
    fn send_message(&self, content: &str, message_type: MessageType, agent_id: Option<&AgentId>);

    /// Whether the transport is open right now.
    fn is_connected(&self) -> bool {
        self.status().is_connected
    }

    /// Current status snapshot.
    fn status(&self) -> ConnectionStatus;

    /// A receiver that observes every status change.
    fn watch_status(&self) -> watch::Receiver<ConnectionStatus>;

    /// Subscribe to delivered envelopes.
    fn on_message(&self, callback: MessageCallback) -> Disposer;

    /// Subscribe to status transitions.
    fn on_status_change(&self, callback: StatusCallback) -> Disposer;
}
