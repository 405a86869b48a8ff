//! Chat-state adapter.
//!
//! Translates `(chat, message:received)` envelopes and status transitions
//! into calls on a [`ChatStateSink`] the application owns. The binding sits at
//! [`LOWEST_PRIORITY`] so application handlers see every message first.
//!
//! [`ChatState`] is a ready-made sink holding per-agent conversation logs.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use courier_core::{
    Action, AgentId, ChatMessage, ConnectionStatus, Disposer, Envelope, EnvelopeId, PayloadKind,
    Route, SessionId,
};
use courier_dispatch::{HandlerError, LOWEST_PRIORITY};
use parking_lot::Mutex;
use tracing::debug;

use crate::subscription::MessageSubscription;

/// A received chat message with the envelope metadata sinks care about.
#[derive(Clone, Debug, PartialEq)]
pub struct ReceivedMessage {
    /// Envelope the message arrived in.
    pub envelope_id: EnvelopeId,
    /// Conversation the message belongs to, if any.
    pub agent_id: Option<AgentId>,
    /// Server session.
    pub session_id: Option<SessionId>,
    /// Server-assigned sequence number.
    pub order: Option<u64>,
    /// When it was received or stamped.
    pub timestamp: DateTime<Utc>,
    /// The message itself.
    pub message: ChatMessage,
}

impl ReceivedMessage {
    /// Extract from a chat envelope.
    ///
    /// The envelope's agent wins over the payload's.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, HandlerError> {
        let message = envelope
            .chat_message()
            .ok_or(HandlerError::UnexpectedPayload {
                expected: PayloadKind::Chat,
                actual: envelope.data().kind(),
            })?
            .clone();
        let agent_id = envelope
            .agent_id()
            .cloned()
            .or_else(|| message.agent_id.clone());
        Ok(Self {
            envelope_id: envelope.id().clone(),
            agent_id,
            session_id: envelope.session_id().cloned(),
            order: envelope.order(),
            timestamp: envelope.timestamp(),
            message,
        })
    }
}

/// Externally owned chat state.
pub trait ChatStateSink: Send + Sync {
    /// A chat message arrived.
    fn message_received(&self, message: &ReceivedMessage);

    /// The connection status changed.
    fn connection_changed(&self, status: &ConnectionStatus);
}

/// Keeps a sink bound to a subscription until disposed.
#[must_use = "dropping a ChatStateBinding leaves the sink bound"]
#[derive(Debug)]
pub struct ChatStateBinding {
    messages: Disposer,
    statuses: Disposer,
}

impl ChatStateBinding {
    /// Stop forwarding to the sink. Idempotent.
    pub fn dispose(&self) {
        self.messages.dispose();
        self.statuses.dispose();
    }

    /// Whether [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.messages.is_disposed() && self.statuses.is_disposed()
    }
}

/// Forward chat messages and status transitions from `subscription` to `sink`.
///
/// The sink receives the current status immediately.
pub fn bind_chat_state(
    subscription: &MessageSubscription,
    sink: Arc<dyn ChatStateSink>,
) -> ChatStateBinding {
    let message_sink = Arc::clone(&sink);
    let messages = subscription.register_for_route_and_action(
        Route::Chat,
        Action::MessageReceived,
        move |envelope: &Envelope| -> Result<(), HandlerError> {
            let received = ReceivedMessage::from_envelope(envelope)?;
            message_sink.message_received(&received);
            Ok(())
        },
        LOWEST_PRIORITY,
    );

    let status_sink = Arc::clone(&sink);
    let statuses = subscription.on_status(Arc::new(move |status: &ConnectionStatus| {
        status_sink.connection_changed(status);
    }));

    sink.connection_changed(&subscription.status());
    ChatStateBinding { messages, statuses }
}

// ─── Reference sink ───

#[derive(Default)]
struct Conversation {
    messages: Vec<ReceivedMessage>,
    seen: HashSet<u64>,
}

impl Conversation {
    /// Insert keeping ordered messages sorted. Returns `false` for a repeat.
    fn insert(&mut self, message: ReceivedMessage) -> bool {
        let Some(order) = message.order else {
            self.messages.push(message);
            return true;
        };
        if !self.seen.insert(order) {
            return false;
        }
        let at = self
            .messages
            .iter()
            .position(|m| m.order.is_some_and(|o| o > order))
            .unwrap_or(self.messages.len());
        self.messages.insert(at, message);
        true
    }
}

#[derive(Default)]
struct ChatStateInner {
    conversations: HashMap<Option<AgentId>, Conversation>,
    status: ConnectionStatus,
}

/// In-memory [`ChatStateSink`].
///
/// Messages are grouped by agent (`None` for unaddressed traffic) and kept in
/// `order` sequence; messages without an order keep arrival position. A
/// repeated `(agent, order)` is dropped.
#[derive(Default)]
pub struct ChatState {
    inner: Mutex<ChatStateInner>,
}

impl ChatState {
    /// Empty state, disconnected.
    pub fn new() -> Self {
        Self::default()
    }

    /// Conversation with `agent`, oldest first.
    pub fn messages(&self, agent: Option<&AgentId>) -> Vec<ReceivedMessage> {
        self.inner
            .lock()
            .conversations
            .get(&agent.cloned())
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    /// Newest message in the conversation with `agent`.
    pub fn last_message(&self, agent: Option<&AgentId>) -> Option<ReceivedMessage> {
        self.inner
            .lock()
            .conversations
            .get(&agent.cloned())
            .and_then(|c| c.messages.last().cloned())
    }

    /// Agents with at least one message, sorted.
    pub fn agents(&self) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self
            .inner
            .lock()
            .conversations
            .keys()
            .flatten()
            .cloned()
            .collect();
        agents.sort();
        agents
    }

    /// Messages across all conversations.
    pub fn message_count(&self) -> usize {
        self.inner
            .lock()
            .conversations
            .values()
            .map(|c| c.messages.len())
            .sum()
    }

    /// Forget one conversation.
    pub fn clear_conversation(&self, agent: Option<&AgentId>) {
        let _ = self.inner.lock().conversations.remove(&agent.cloned());
    }

    /// Latest connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.inner.lock().status.clone()
    }

    /// Whether sending makes sense right now.
    pub fn can_send(&self) -> bool {
        self.inner.lock().status.is_connected
    }
}

impl ChatStateSink for ChatState {
    fn message_received(&self, message: &ReceivedMessage) {
        let mut inner = self.inner.lock();
        let conversation = inner
            .conversations
            .entry(message.agent_id.clone())
            .or_default();
        if !conversation.insert(message.clone()) {
            debug!(
                agent_id = ?message.agent_id,
                order = ?message.order,
                "duplicate chat message dropped"
            );
        }
    }

    fn connection_changed(&self, status: &ConnectionStatus) {
        self.inner.lock().status = status.clone();
    }
}

impl fmt::Debug for ChatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ChatState")
            .field("conversations", &inner.conversations.len())
            .field("state", &inner.status.state())
            .finish()
    }
}
