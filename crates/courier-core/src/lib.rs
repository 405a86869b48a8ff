//! # courier-core
//!
//! Shared vocabulary for the Courier message core.
//!
//! - **Envelope**: [`Envelope`] is the only unit that crosses the transport
//!   boundary. Its meaning is carried by the [`Route`] / [`Action`] pair.
//! - **Payloads**: [`Payload`] is a sum type keyed by `(route, action)`, decoded
//!   at the boundary into a typed variant or a [`DecodeError`].
//! - **Connection status**: [`ConnectionStatus`] snapshots and the
//!   [`ConnectionState`] machine they derive.
//! - **Branded IDs**: [`EnvelopeId`], [`SessionId`], [`AgentId`].
//! - **Disposer**: the idempotent cancellation handle returned by every
//!   subscribe/register call in the workspace.

#![deny(unsafe_code)]

pub mod disposer;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod panic;
pub mod payload;
pub mod status;

pub use disposer::Disposer;
pub use envelope::{Action, Envelope, Route, DEFAULT_SOURCE, SERVER_SOURCE};
pub use errors::{DecodeError, EnvelopeError};
pub use ids::{AgentId, EnvelopeId, SessionId};
pub use panic::panic_message;
pub use payload::{
    ChatMessage, ChatRole, CommandRequest, ConnectionNotice, ErrorNotice, MessageType,
    Notification, NotificationLevel, Payload, PayloadKind, StatusNotice, SystemMessage,
};
pub use status::{ConnectionState, ConnectionStatus};
