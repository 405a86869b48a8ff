//! Connection status snapshots and the state machine they encode.
//!
//! A [`ConnectionStatus`] is a value: producers build a new one for every
//! transition and publish it whole. [`ConnectionState`] is derived from the
//! flags and governs which transitions are legal.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a transport connection. No state is terminal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Idle; `connect()` may be called.
    #[default]
    Disconnected,
    /// Handshake in flight.
    Connecting,
    /// Ready to send and receive.
    Connected,
    /// Last connect attempt failed; caller decides whether to retry.
    Error,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Connected, Connecting, Disconnected, Error};
        matches!(
            (self, next),
            (Disconnected | Error, Connecting)
                | (Connecting, Connected | Error | Disconnected)
                | (Connected | Error, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        })
    }
}

/// Point-in-time view of a connection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    /// Transport is open.
    pub is_connected: bool,
    /// Handshake in flight.
    pub is_connecting: bool,
    /// Failure description from the last connect attempt.
    pub error: Option<String>,
    /// Last time anything crossed the transport.
    pub last_activity: Option<DateTime<Utc>>,
}

impl ConnectionStatus {
    /// Idle, carrying over the last activity time.
    pub fn disconnected(last_activity: Option<DateTime<Utc>>) -> Self {
        Self {
            last_activity,
            ..Self::default()
        }
    }

    /// Handshake started.
    pub fn connecting(last_activity: Option<DateTime<Utc>>) -> Self {
        Self {
            is_connecting: true,
            last_activity,
            ..Self::default()
        }
    }

    /// Handshake succeeded at `at`.
    pub fn connected(at: DateTime<Utc>) -> Self {
        Self {
            is_connected: true,
            last_activity: Some(at),
            ..Self::default()
        }
    }

    /// Handshake failed.
    pub fn failed(error: impl Into<String>, last_activity: Option<DateTime<Utc>>) -> Self {
        Self {
            error: Some(error.into()),
            last_activity,
            ..Self::default()
        }
    }

    /// Same state with a refreshed activity time.
    #[must_use]
    pub fn touched(&self, at: DateTime<Utc>) -> Self {
        Self {
            last_activity: Some(at),
            ..self.clone()
        }
    }

    /// The state these flags describe.
    pub fn state(&self) -> ConnectionState {
        if self.is_connected {
            ConnectionState::Connected
        } else if self.is_connecting {
            ConnectionState::Connecting
        } else if self.error.is_some() {
            ConnectionState::Error
        } else {
            ConnectionState::Disconnected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::ConnectionState::{Connected, Connecting, Disconnected, Error};

    #[test]
    fn allowed_transitions() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Error));
        assert!(Connecting.can_transition_to(Disconnected));
        assert!(Connected.can_transition_to(Disconnected));
        assert!(Error.can_transition_to(Connecting));
        assert!(Error.can_transition_to(Disconnected));
    }

    #[test]
    fn rejected_transitions() {
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Disconnected.can_transition_to(Error));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Connected.can_transition_to(Error));
        assert!(!Error.can_transition_to(Connected));
        for s in [Disconnected, Connecting, Connected, Error] {
            assert!(!s.can_transition_to(s), "self-transition allowed for {s}");
        }
    }

    #[test]
    fn state_derivation() {
        assert_eq!(ConnectionStatus::default().state(), Disconnected);
        assert_eq!(ConnectionStatus::connecting(None).state(), Connecting);
        assert_eq!(ConnectionStatus::connected(Utc::now()).state(), Connected);
        assert_eq!(ConnectionStatus::failed("refused", None).state(), Error);
    }

    #[test]
    fn constructors_never_mix_flags() {
        let now = Utc::now();
        let connected = ConnectionStatus::connected(now);
        assert!(connected.is_connected && !connected.is_connecting && connected.error.is_none());

        let failed = ConnectionStatus::failed("timeout", Some(now));
        assert!(!failed.is_connected && !failed.is_connecting);
        assert_eq!(failed.last_activity, Some(now));
    }

    #[test]
    fn touched_keeps_state() {
        let before = ConnectionStatus::connected(Utc::now());
        let later = Utc::now() + chrono::Duration::seconds(5);
        let after = before.touched(later);
        assert_eq!(after.state(), Connected);
        assert_eq!(after.last_activity, Some(later));
    }

    #[test]
    fn serializes_camel_case() {
        let value = serde_json::to_value(ConnectionStatus::connecting(None)).unwrap();
        assert_eq!(value["isConnecting"], true);
        assert_eq!(value["isConnected"], false);
        assert!(value["lastActivity"].is_null());
    }
}
