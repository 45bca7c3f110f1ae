//! Channel-backed connection handle.
//!
//! Events are pushed onto an unbounded queue that a writer task drains
//! onto the socket. Tests drain the same queue with `try_recv`.

use parrot_protocol::ServerEvent;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::trace;

use crate::traits::{Connection, ConnectionId, TransportError};

/// Receiving end of a connection's outbound queue.
pub type Outbound = mpsc::UnboundedReceiver<ServerEvent>;

/// A connection handle that enqueues events for a writer task.
#[derive(Debug)]
pub struct ChannelConnection {
    id: ConnectionId,
    sender: mpsc::UnboundedSender<ServerEvent>,
    is_open: AtomicBool,
    remote_addr: Option<SocketAddr>,
}

impl ChannelConnection {
    /// Create a connection with a generated ID.
    #[must_use]
    pub fn new() -> (Self, Outbound) {
        Self::with_id(ConnectionId::generate())
    }

    /// Create a connection with a specific ID.
    #[must_use]
    pub fn with_id(id: impl Into<ConnectionId>) -> (Self, Outbound) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let conn = Self {
            id: id.into(),
            sender,
            is_open: AtomicBool::new(true),
            remote_addr: None,
        };
        (conn, receiver)
    }

    /// Attach the peer address.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Mark the connection closed. Later sends fail without queueing.
    pub fn mark_closed(&self) {
        if self.is_open.swap(false, Ordering::SeqCst) {
            trace!(connection = %self.id, "Connection marked closed");
        }
    }
}

impl Connection for ChannelConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send(&self, event: ServerEvent) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }

        self.sender.send(event).map_err(|_| {
            self.mark_closed();
            TransportError::ConnectionClosed
        })
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst) && !self.sender.is_closed()
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }
}
