//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may name only the keys it wants to change.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "engine": { "url": "wss://chat.example.com/ws", "keepAliveMs": 5000 },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CourierSettings {
    /// Transport and engine lifecycle.
    pub engine: EngineSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// Identity of this client on the wire.
    pub client: ClientSettings,
}

impl CourierSettings {
    /// Reject values that parse but cannot be used.
    pub fn validate(&self) -> Result<()> {
        let url = self.engine.url.as_str();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(SettingsError::InvalidValue(format!(
                "engine.url must start with ws:// or wss://, got {url:?}"
            )));
        }
        if self.engine.connect_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "engine.connectTimeoutMs must be positive".into(),
            ));
        }
        if self.engine.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "engine.sendQueueCapacity must be positive".into(),
            ));
        }
        if self.client.source.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "client.source must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Engine settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// WebSocket endpoint.
    pub url: String,
    /// Handshake timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Outbound frames buffered before sends are rejected.
    pub send_queue_capacity: usize,
    /// Connect when the first consumer acquires the engine.
    pub auto_connect: bool,
    /// Grace period before disconnecting once the last consumer leaves.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive_ms: Option<u64>,
}

impl EngineSettings {
    /// Handshake timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Keep-alive grace as a [`Duration`]; zero means none.
    pub fn keep_alive(&self) -> Option<Duration> {
        self.keep_alive_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            connect_timeout_ms: 10_000,
            send_queue_capacity: 256,
            auto_connect: true,
            keep_alive_ms: None,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Client identity settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// `source` stamped on locally produced envelopes.
    pub source: String,
    /// Agent addressed by `chat` when none is given on the command line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_agent: Option<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            source: "client".to_string(),
            default_agent: None,
        }
    }
}
