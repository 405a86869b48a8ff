//! Envelope construction and decoding errors.

use thiserror::Error;

use crate::envelope::{Action, Route};
use crate::payload::PayloadKind;

/// A wire frame could not be turned into an [`Envelope`](crate::Envelope).
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame was not valid JSON, or not a JSON object.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A required top-level field was absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// `route` is not one of the known routes.
    #[error("unknown route: {0}")]
    UnknownRoute(String),

    /// `action` is not one of the known actions.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// `data` does not have the shape required by the `(route, action)` pair.
    #[error("invalid {expected} payload for {route}/{action}: {source}")]
    Payload {
        /// Envelope route.
        route: Route,
        /// Envelope action.
        action: Action,
        /// Payload kind the pair requires.
        expected: PayloadKind,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

impl DecodeError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::MissingField(_) => "missing_field",
            Self::UnknownRoute(_) => "unknown_route",
            Self::UnknownAction(_) => "unknown_action",
            Self::Payload { .. } => "invalid_payload",
        }
    }
}

/// An envelope was assembled from a payload that does not fit its pair.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The payload variant is not the one keyed by `(route, action)`.
    #[error("{actual} payload cannot be carried by {route}/{action} (expects {expected})")]
    PayloadMismatch {
        /// Envelope route.
        route: Route,
        /// Envelope action.
        action: Action,
        /// Kind required by the pair.
        expected: PayloadKind,
        /// Kind that was supplied.
        actual: PayloadKind,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_from_serde() {
        let err: DecodeError = serde_json::from_str::<serde_json::Value>("{bad")
            .unwrap_err()
            .into();
        assert_eq!(err.error_kind(), "malformed");
        assert!(err.to_string().starts_with("malformed frame"));
    }

    #[test]
    fn unknown_route_display() {
        let err = DecodeError::UnknownRoute("billing".into());
        assert_eq!(err.to_string(), "unknown route: billing");
        assert_eq!(err.error_kind(), "unknown_route");
    }

    #[test]
    fn mismatch_display_names_both_kinds() {
        let err = EnvelopeError::PayloadMismatch {
            route: Route::Chat,
            action: Action::MessageReceived,
            expected: PayloadKind::Chat,
            actual: PayloadKind::Status,
        };
        let text = err.to_string();
        assert!(text.contains("status payload"));
        assert!(text.contains("chat/message:received"));
        assert!(text.contains("expects chat"));
    }
}
