//! Typed envelope payloads.
//!
//! The `(route, action)` pair decides which [`Payload`] variant an envelope
//! carries. [`PayloadKind::for_pair`] is the single source of truth for that
//! mapping; [`Payload::decode`] applies it to raw JSON at the transport
//! boundary.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{Action, Route};
use crate::errors::DecodeError;
use crate::ids::AgentId;

/// Content format of an outgoing chat message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Plain text.
    #[default]
    Text,
    /// Markdown to be rendered by the receiver.
    Markdown,
    /// Slash-style command text.
    Command,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Command => "command",
        })
    }
}

/// Author of a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// The operator.
    User,
    /// The agent.
    Assistant,
    /// Injected by the platform.
    System,
}

/// Severity of a notification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    /// Informational.
    #[default]
    Info,
    /// Something completed.
    Success,
    /// Needs attention.
    Warning,
    /// Something failed.
    Error,
}

/// `(chat, message:*)` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Message body.
    pub content: String,
    /// Body format.
    #[serde(default, rename = "type")]
    pub message_type: MessageType,
    /// Author, when the server reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ChatRole>,
    /// Agent the message belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    /// Free-form extras (attachments, tool traces) left to consumers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ChatMessage {
    /// A plain-text message with no role or agent.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            message_type: MessageType::Text,
            role: None,
            agent_id: None,
            metadata: None,
        }
    }
}

/// `(system, message:*)` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMessage {
    /// Message body.
    pub content: String,
}

/// `(notification, message:*)` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Optional heading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Notification text.
    pub body: String,
    /// Severity.
    #[serde(default)]
    pub level: NotificationLevel,
}

/// `(command, message:*)` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Command name.
    pub name: String,
    /// Command arguments, shape defined by the command.
    #[serde(default)]
    pub args: Value,
}

/// `(*, connection:open|connection:close)` payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionNotice {
    /// Close reason or handshake note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `(*, error:occurred)` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    /// Machine-readable code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable description.
    pub message: String,
}

/// `(*, status:update)` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusNotice {
    /// Status label (e.g. `typing`, `idle`, `qr_ready`).
    pub status: String,
    /// Extra detail whose shape depends on `status`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

/// Discriminant of [`Payload`], used for pair validation and error messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// [`ChatMessage`].
    Chat,
    /// [`SystemMessage`].
    System,
    /// [`Notification`].
    Notification,
    /// [`CommandRequest`].
    Command,
    /// [`ConnectionNotice`].
    Connection,
    /// [`ErrorNotice`].
    Error,
    /// [`StatusNotice`].
    Status,
}

impl PayloadKind {
    /// The payload kind an envelope with this `(route, action)` must carry.
    pub fn for_pair(route: Route, action: Action) -> Self {
        match action {
            Action::ConnectionOpen | Action::ConnectionClose => Self::Connection,
            Action::ErrorOccurred => Self::Error,
            Action::StatusUpdate => Self::Status,
            Action::MessageSend | Action::MessageReceived => match route {
                Route::Chat => Self::Chat,
                Route::System => Self::System,
                Route::Notification => Self::Notification,
                Route::Command => Self::Command,
            },
        }
    }

    fn accepts_bare_string(self) -> bool {
        matches!(self, Self::Chat | Self::System | Self::Notification)
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Chat => "chat",
            Self::System => "system",
            Self::Notification => "notification",
            Self::Command => "command",
            Self::Connection => "connection",
            Self::Error => "error",
            Self::Status => "status",
        })
    }
}

/// Strongly-typed envelope payload.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// Chat traffic between operator and agent.
    Chat(ChatMessage),
    /// Platform message.
    System(SystemMessage),
    /// Operator notification.
    Notification(Notification),
    /// Command invocation or result.
    Command(CommandRequest),
    /// Connection lifecycle notice.
    Connection(ConnectionNotice),
    /// Error report.
    Error(ErrorNotice),
    /// Status update.
    Status(StatusNotice),
}

impl Payload {
    /// Decode raw `data` for the given pair.
    ///
    /// `null` decodes as an empty object, so payloads whose fields are all
    /// optional (connection notices) accept it. A bare JSON string is accepted
    /// as the body of chat, system, and notification messages.
    pub fn decode(route: Route, action: Action, data: Value) -> Result<Self, DecodeError> {
        let kind = PayloadKind::for_pair(route, action);
        let data = match data {
            Value::Null => Value::Object(serde_json::Map::new()),
            Value::String(s) if kind.accepts_bare_string() => {
                let field = if kind == PayloadKind::Notification { "body" } else { "content" };
                let mut map = serde_json::Map::new();
                let _ = map.insert(field.to_owned(), Value::String(s));
                Value::Object(map)
            }
            other => other,
        };

        let decoded = match kind {
            PayloadKind::Chat => serde_json::from_value(data).map(Self::Chat),
            PayloadKind::System => serde_json::from_value(data).map(Self::System),
            PayloadKind::Notification => serde_json::from_value(data).map(Self::Notification),
            PayloadKind::Command => serde_json::from_value(data).map(Self::Command),
            PayloadKind::Connection => serde_json::from_value(data).map(Self::Connection),
            PayloadKind::Error => serde_json::from_value(data).map(Self::Error),
            PayloadKind::Status => serde_json::from_value(data).map(Self::Status),
        };
        decoded.map_err(|source| DecodeError::Payload {
            route,
            action,
            expected: kind,
            source,
        })
    }

    /// Which variant this is.
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Chat(_) => PayloadKind::Chat,
            Self::System(_) => PayloadKind::System,
            Self::Notification(_) => PayloadKind::Notification,
            Self::Command(_) => PayloadKind::Command,
            Self::Connection(_) => PayloadKind::Connection,
            Self::Error(_) => PayloadKind::Error,
            Self::Status(_) => PayloadKind::Status,
        }
    }

    /// Whether this payload may be carried by `(route, action)`.
    pub fn is_valid_for(&self, route: Route, action: Action) -> bool {
        self.kind() == PayloadKind::for_pair(route, action)
    }

    /// Serialize to a JSON value for the wire.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
