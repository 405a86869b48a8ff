//! Handler error types.

use courier_core::PayloadKind;
use thiserror::Error;

/// A handler could not process an envelope.
///
/// Returned errors are logged by the registry and never reach other handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Free-form failure.
    #[error("{0}")]
    Failed(String),

    /// The envelope carried a payload the handler cannot use.
    #[error("unexpected payload: expected {expected}, got {actual}")]
    UnexpectedPayload {
        /// What the handler needs.
        expected: PayloadKind,
        /// What arrived.
        actual: PayloadKind,
    },

    /// Any other error source.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
