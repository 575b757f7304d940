//! Transport seam between a session and the network
//!
//! A [`Connector`] opens a link and hands back a pair of channels: frames the
//! session wants written, and notifications about what the peer did. The
//! session never touches a socket directly, which keeps it testable with an
//! in-memory connector.

mod websocket;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use websocket::WsConnector;

use crate::Result;

/// Close code sent on a caller-initiated disconnect
pub const NORMAL_CLOSE_CODE: u16 = 1000;

/// Close reason sent on a caller-initiated disconnect
pub const NORMAL_CLOSE_REASON: &str = "client disconnect";

/// A frame the session wants written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// One text frame
    Text(String),
    /// Close the link with a code and reason
    Close {
        /// Close code
        code: u16,
        /// Human-readable reason
        reason: String,
    },
}

/// Something the transport observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound text frame
    Frame(String),
    /// Transport-level error; closure, if any, follows as [`TransportEvent::Closed`]
    Error(String),
    /// The link closed; always the last event of a link
    Closed {
        /// Close code, if one was received
        code: Option<u16>,
        /// Close reason, if one was received
        reason: Option<String>,
    },
}

/// An open link
#[derive(Debug)]
pub struct TransportLink {
    /// Frames to write; dropping the sender closes the link
    pub outbound: mpsc::UnboundedSender<OutboundFrame>,
    /// Notifications, in arrival order
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens links to an endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a link; resolves once the link is usable
    ///
    /// # Errors
    ///
    /// Returns error if the link cannot be opened
    async fn open(&self, endpoint: &str) -> Result<TransportLink>;
}
