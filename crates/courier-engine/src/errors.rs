//! Engine and transport error types.

use thiserror::Error;

/// A transport could not be opened or failed while open.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The handshake did not finish in time.
    #[error("connect timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured handshake timeout.
        timeout_ms: u64,
    },

    /// The peer refused or the handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A read or write on an open socket failed.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// The link is already gone.
    #[error("link closed")]
    Closed,
}

impl TransportError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Handshake(_) => "handshake",
            Self::WebSocket(_) => "websocket",
            Self::Closed => "closed",
        }
    }
}

/// Errors surfaced by engine construction and the instance manager.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine could not be built from its configuration.
    #[error("invalid engine configuration: {0}")]
    Config(String),

    /// The engine factory failed.
    #[error("engine construction failed: {0}")]
    Construction(String),

    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// `code` values carried by locally produced `error:occurred` envelopes.
pub mod codes {
    /// A send was attempted without an open connection.
    pub const NOT_CONNECTED: &str = "not_connected";
    /// The outbound buffer is full; the message was dropped.
    pub const SEND_QUEUE_FULL: &str = "send_queue_full";
    /// A connect attempt failed.
    pub const CONNECT_FAILED: &str = "connect_failed";
    /// An inbound frame could not be decoded.
    pub const DECODE_FAILED: &str = "decode_failed";
    /// An outbound envelope could not be encoded.
    pub const ENCODE_FAILED: &str = "encode_failed";
    /// The open link broke.
    pub const TRANSPORT_ERROR: &str = "transport_error";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display() {
        let err = TransportError::Timeout { timeout_ms: 2500 };
        assert_eq!(err.to_string(), "connect timed out after 2500ms");
        assert_eq!(err.error_kind(), "timeout");
    }

    #[test]
    fn transport_error_is_transparent_in_engine_error() {
        let err: EngineError = TransportError::Handshake("refused".into()).into();
        assert_eq!(err.to_string(), "handshake failed: refused");
    }

    #[test]
    fn construction_display() {
        let err = EngineError::Construction("no runtime".into());
        assert!(err.to_string().contains("no runtime"));
    }
}
