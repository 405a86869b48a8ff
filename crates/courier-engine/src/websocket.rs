//! WebSocket connector over `tokio-tungstenite`.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::errors::TransportError;
use crate::transport::{Connector, Link, LinkEvent};

/// Default handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a local close waits for the peer before the socket is dropped.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Default per-direction frame buffer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Opens WebSocket links to a fixed URL.
#[derive(Clone, Debug)]
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
    queue_capacity: usize,
}

impl WsConnector {
    /// Connector for `url` (`ws://` or `wss://`).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Set the handshake timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set how many frames may be buffered in each direction.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self) -> Result<Link, TransportError> {
        #[allow(clippy::cast_possible_truncation)]
        let timeout_ms = self.connect_timeout.as_millis() as u64;

        let handshake = connect_async(self.url.as_str());
        let (ws, _response) = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| TransportError::Timeout { timeout_ms })?
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        debug!(url = %self.url, "websocket handshake complete");

        let (mut ws_tx, mut ws_rx) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(self.queue_capacity);
        let (in_tx, in_rx) = mpsc::channel::<LinkEvent>(self.queue_capacity);

        // Reader: forwards text frames until close or error.
        let mut reader = tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                let event = match msg {
                    Ok(Message::Text(text)) => LinkEvent::Frame(text.as_str().to_owned()),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => LinkEvent::Frame(text),
                        Err(_) => {
                            debug!(len = bytes.len(), "dropping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_owned())
                            .filter(|r| !r.is_empty());
                        let _ = in_tx.send(LinkEvent::Closed { reason }).await;
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = in_tx
                            .send(LinkEvent::Failed(TransportError::WebSocket(e.to_string())))
                            .await;
                        return;
                    }
                };
                if in_tx.send(event).await.is_err() {
                    return;
                }
            }
            let _ = in_tx.send(LinkEvent::Closed { reason: None }).await;
        });

        // Writer: drains outbound frames, closes the socket when the link is
        // dropped, then stops the reader if the peer never answers the close.
        let _writer = tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                    warn!(error = %e, "websocket write failed");
                    break;
                }
            }
            let _ = tokio::time::timeout(CLOSE_GRACE, ws_tx.close()).await;
            if tokio::time::timeout(CLOSE_GRACE, &mut reader).await.is_err() {
                debug!("peer did not answer close, stopping reader");
                reader.abort();
            }
        });

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}
