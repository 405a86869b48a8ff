//! Protocol envelope and its route/action taxonomy.
//!
//! An [`Envelope`] is immutable once built: fields are private and only
//! readable through accessors. The consuming `with_*` builders exist for the
//! producer to finish assembly before the envelope is handed to anyone else.
//! Clones share the same [`EnvelopeId`]; they are the same logical envelope.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{DecodeError, EnvelopeError};
use crate::ids::{AgentId, EnvelopeId, SessionId};
use crate::payload::{
    ChatMessage, ConnectionNotice, ErrorNotice, Payload, PayloadKind, StatusNotice,
};

/// Source tag for envelopes produced on this side of the transport.
pub const DEFAULT_SOURCE: &str = "client";

/// Source tag for envelopes decoded from inbound frames without one.
pub const SERVER_SOURCE: &str = "server";

/// Coarse category of an envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    /// Operator ↔ agent conversation.
    Chat,
    /// Platform and connection lifecycle.
    System,
    /// Operator-facing notifications.
    Notification,
    /// Commands addressed to the platform.
    Command,
}

impl Route {
    /// Every route, in declaration order.
    pub const ALL: [Self; 4] = [Self::Chat, Self::System, Self::Notification, Self::Command];

    /// Wire string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::System => "system",
            Self::Notification => "notification",
            Self::Command => "command",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Route {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| DecodeError::UnknownRoute(s.to_owned()))
    }
}

/// Specific event within a route.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Outbound message.
    #[serde(rename = "message:send")]
    MessageSend,
    /// Inbound message.
    #[serde(rename = "message:received")]
    MessageReceived,
    /// Transport opened.
    #[serde(rename = "connection:open")]
    ConnectionOpen,
    /// Transport closed.
    #[serde(rename = "connection:close")]
    ConnectionClose,
    /// Something failed.
    #[serde(rename = "error:occurred")]
    ErrorOccurred,
    /// Status change on the remote side.
    #[serde(rename = "status:update")]
    StatusUpdate,
}

impl Action {
    /// Every action, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::MessageSend,
        Self::MessageReceived,
        Self::ConnectionOpen,
        Self::ConnectionClose,
        Self::ErrorOccurred,
        Self::StatusUpdate,
    ];

    /// Wire string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MessageSend => "message:send",
            Self::MessageReceived => "message:received",
            Self::ConnectionOpen => "connection:open",
            Self::ConnectionClose => "connection:close",
            Self::ErrorOccurred => "error:occurred",
            Self::StatusUpdate => "status:update",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| DecodeError::UnknownAction(s.to_owned()))
    }
}

/// The normalized message unit crossing the transport boundary.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    id: EnvelopeId,
    route: Route,
    action: Action,
    data: Payload,
    timestamp: DateTime<Utc>,
    source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    order: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_id: Option<AgentId>,
}

impl Envelope {
    /// Build an envelope, checking that `data` is the variant keyed by the pair.
    pub fn try_new(route: Route, action: Action, data: Payload) -> Result<Self, EnvelopeError> {
        if !data.is_valid_for(route, action) {
            return Err(EnvelopeError::PayloadMismatch {
                route,
                action,
                expected: PayloadKind::for_pair(route, action),
                actual: data.kind(),
            });
        }
        Ok(Self::assemble(route, action, data))
    }

    fn assemble(route: Route, action: Action, data: Payload) -> Self {
        Self {
            id: EnvelopeId::new(),
            route,
            action,
            data,
            timestamp: Utc::now(),
            source: DEFAULT_SOURCE.to_owned(),
            session_id: None,
            order: None,
            agent_id: None,
        }
    }

    /// `(chat, message:send)`. The agent id is lifted from the message.
    pub fn chat_send(message: ChatMessage) -> Self {
        let agent_id = message.agent_id.clone();
        let mut env = Self::assemble(Route::Chat, Action::MessageSend, Payload::Chat(message));
        env.agent_id = agent_id;
        env
    }

    /// `(chat, message:received)`. The agent id is lifted from the message.
    pub fn chat_received(message: ChatMessage) -> Self {
        let agent_id = message.agent_id.clone();
        let mut env = Self::assemble(Route::Chat, Action::MessageReceived, Payload::Chat(message));
        env.agent_id = agent_id;
        env
    }

    /// `(system, connection:open)`.
    pub fn connection_open() -> Self {
        Self::assemble(
            Route::System,
            Action::ConnectionOpen,
            Payload::Connection(ConnectionNotice::default()),
        )
    }

    /// `(system, connection:close)`.
    pub fn connection_close(reason: Option<String>) -> Self {
        Self::assemble(
            Route::System,
            Action::ConnectionClose,
            Payload::Connection(ConnectionNotice { reason }),
        )
    }

    /// `(route, error:occurred)`.
    pub fn error(route: Route, code: Option<&str>, message: impl Into<String>) -> Self {
        Self::assemble(
            route,
            Action::ErrorOccurred,
            Payload::Error(ErrorNotice {
                code: code.map(str::to_owned),
                message: message.into(),
            }),
        )
    }

    /// `(route, status:update)`.
    pub fn status(route: Route, status: StatusNotice) -> Self {
        Self::assemble(route, Action::StatusUpdate, Payload::Status(status))
    }

    /// Set the producer tag.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Override the creation time (decoded frames keep the sender's clock).
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Attach a session.
    #[must_use]
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Attach a per-conversation sequence number.
    #[must_use]
    pub fn with_order(mut self, order: u64) -> Self {
        self.order = Some(order);
        self
    }

    /// Attach an agent.
    #[must_use]
    pub fn with_agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    /// Unique id of this envelope.
    pub fn id(&self) -> &EnvelopeId {
        &self.id
    }

    /// Route.
    pub fn route(&self) -> Route {
        self.route
    }

    /// Action.
    pub fn action(&self) -> Action {
        self.action
    }

    /// Typed payload.
    pub fn data(&self) -> &Payload {
        &self.data
    }

    /// Creation time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Producer tag.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Session, if any.
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Sequence number, if any.
    pub fn order(&self) -> Option<u64> {
        self.order
    }

    /// Agent, if any.
    pub fn agent_id(&self) -> Option<&AgentId> {
        self.agent_id.as_ref()
    }

    /// Whether this envelope has the given pair.
    pub fn is(&self, route: Route, action: Action) -> bool {
        self.route == route && self.action == action
    }

    /// The chat payload, when this is a chat message.
    pub fn chat_message(&self) -> Option<&ChatMessage> {
        match &self.data {
            Payload::Chat(msg) => Some(msg),
            _ => None,
        }
    }
}
