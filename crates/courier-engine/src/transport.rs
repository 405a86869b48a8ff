//! Transport seam between the engine and the network.
//!
//! A [`Connector`] opens a [`Link`]: a pair of channels carrying text frames.
//! The engine never touches sockets directly.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::TransportError;

/// Something that happened on an open link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// A text frame from the peer.
    Frame(String),
    /// The peer closed the link.
    Closed {
        /// Close reason, when the peer gave one.
        reason: Option<String>,
    },
    /// The link broke.
    Failed(TransportError),
}

/// One open connection.
///
/// Dropping the link closes it: the outbound sender going away tells the
/// writer side to send a close and stop.
#[derive(Debug)]
pub struct Link {
    /// Frames to send to the peer.
    pub outbound: mpsc::Sender<String>,
    /// Frames and lifecycle events from the peer.
    pub inbound: mpsc::Receiver<LinkEvent>,
}

/// Opens links.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new link. Each call yields an independent connection.
    async fn open(&self) -> Result<Link, TransportError>;

    /// Human-readable endpoint for logs.
    fn endpoint(&self) -> String;
}
