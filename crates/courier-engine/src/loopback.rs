//! In-process connector.
//!
//! [`loopback`] returns a connector and a [`LoopbackServer`] handle that plays
//! the remote side: it pushes frames to the client, observes what the client
//! sends, closes or breaks the link, and can make the next connect fail.

use std::sync::Arc;

use async_trait::async_trait;
use courier_core::Envelope;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::codec;
use crate::errors::TransportError;
use crate::transport::{Connector, Link, LinkEvent};

const LINK_CAPACITY: usize = 256;

struct Shared {
    to_client: Option<mpsc::Sender<LinkEvent>>,
    fail_next: Option<TransportError>,
    connects: usize,
    sent_tx: mpsc::UnboundedSender<String>,
}

/// Client half of a loopback pair.
#[derive(Clone)]
pub struct LoopbackConnector {
    shared: Arc<Mutex<Shared>>,
}

/// Server half of a loopback pair.
pub struct LoopbackServer {
    shared: Arc<Mutex<Shared>>,
    sent_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

/// Create a connected connector/server pair.
pub fn loopback() -> (LoopbackConnector, LoopbackServer) {
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Mutex::new(Shared {
        to_client: None,
        fail_next: None,
        connects: 0,
        sent_tx,
    }));
    (
        LoopbackConnector {
            shared: Arc::clone(&shared),
        },
        LoopbackServer {
            shared,
            sent_rx: tokio::sync::Mutex::new(sent_rx),
        },
    )
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn open(&self) -> Result<Link, TransportError> {
        let (out_tx, mut out_rx) = mpsc::channel::<String>(LINK_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<LinkEvent>(LINK_CAPACITY);

        let sent_tx = {
            let mut shared = self.shared.lock();
            if let Some(err) = shared.fail_next.take() {
                return Err(err);
            }
            shared.connects += 1;
            shared.to_client = Some(in_tx);
            shared.sent_tx.clone()
        };

        let _forward = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if sent_tx.send(frame).is_err() {
                    break;
                }
            }
            debug!("loopback client link dropped");
        });

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }

    fn endpoint(&self) -> String {
        "loopback".to_string()
    }
}

impl LoopbackServer {
    fn send(&self, event: LinkEvent) -> bool {
        let shared = self.shared.lock();
        shared
            .to_client
            .as_ref()
            .is_some_and(|tx| tx.try_send(event).is_ok())
    }

    /// Push a raw text frame. Returns `false` if no client is linked.
    pub fn push(&self, frame: impl Into<String>) -> bool {
        self.send(LinkEvent::Frame(frame.into()))
    }

    /// Push an envelope as the server would frame it.
    pub fn push_envelope(&self, envelope: &Envelope) -> bool {
        match codec::encode(envelope) {
            Ok(text) => self.push(text),
            Err(_) => false,
        }
    }

    /// Close the current link from the server side.
    pub fn close(&self, reason: Option<&str>) -> bool {
        let delivered = self.send(LinkEvent::Closed {
            reason: reason.map(str::to_owned),
        });
        self.shared.lock().to_client = None;
        delivered
    }

    /// Break the current link with a transport error.
    pub fn fail(&self, error: TransportError) -> bool {
        let delivered = self.send(LinkEvent::Failed(error));
        self.shared.lock().to_client = None;
        delivered
    }

    /// Make the next `open()` fail with `error`.
    pub fn fail_next_connect(&self, error: TransportError) {
        self.shared.lock().fail_next = Some(error);
    }

    /// Whether a client link is currently open.
    pub fn is_linked(&self) -> bool {
        self.shared
            .lock()
            .to_client
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// How many links have been opened.
    pub fn connect_count(&self) -> usize {
        self.shared.lock().connects
    }

    /// Wait for the next frame the client sends.
    pub async fn next_sent(&self) -> Option<String> {
        self.sent_rx.lock().await.recv().await
    }

    /// Next frame the client sent, if one is already waiting.
    pub fn try_next_sent(&self) -> Option<String> {
        self.sent_rx.try_lock().ok()?.try_recv().ok()
    }
}
