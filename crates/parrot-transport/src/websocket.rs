//! WebSocket session driver.
//!
//! Wraps an upgraded axum WebSocket: a spawned writer task drains the
//! connection's outbound queue onto the socket and sends heartbeat pings,
//! while the owner of the session reads inbound text with [`WebSocketSession::recv`].

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parrot_protocol::codec;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::channel::{ChannelConnection, Outbound};
use crate::traits::{Connection, ConnectionId, TransportError};

/// WebSocket session configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
    /// Interval between server pings.
    pub heartbeat_interval: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024, // 64 KB
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Something read from the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// An envelope to hand to the router.
    Text(String),
    /// Ping or pong; proves the peer is alive.
    Heartbeat,
    /// A message over the size limit, already discarded.
    Oversized(usize),
}

/// An accepted WebSocket connection.
pub struct WebSocketSession {
    connection: Arc<ChannelConnection>,
    receiver: SplitStream<WebSocket>,
    writer: JoinHandle<()>,
    max_message_size: usize,
}

impl WebSocketSession {
    /// Start a session on an upgraded socket.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(socket: WebSocket, remote_addr: Option<SocketAddr>, config: &WebSocketConfig) -> Self {
        let (sink, receiver) = socket.split();

        let (connection, outbound) = ChannelConnection::new();
        let connection = Arc::new(match remote_addr {
            Some(addr) => connection.with_remote_addr(addr),
            None => connection,
        });

        let writer = tokio::spawn(write_loop(
            sink,
            outbound,
            Arc::clone(&connection),
            config.heartbeat_interval,
        ));

        debug!(connection = %connection.id(), "WebSocket session started");

        Self {
            connection,
            receiver,
            writer,
            max_message_size: config.max_message_size,
        }
    }

    /// The handle the router binds identities to.
    #[must_use]
    pub fn connection(&self) -> Arc<ChannelConnection> {
        Arc::clone(&self.connection)
    }

    /// Get the session's connection ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        self.connection.id()
    }

    /// Read the next inbound item.
    ///
    /// Returns `Ok(None)` once the peer has closed the socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket fails.
    pub async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        loop {
            match self.receiver.next().await {
                Some(Ok(Message::Text(text))) => {
                    if text.len() > self.max_message_size {
                        return Ok(Some(self.oversized(text.len())));
                    }
                    return Ok(Some(Inbound::Text(text)));
                }
                Some(Ok(Message::Binary(data))) => {
                    if data.len() > self.max_message_size {
                        return Ok(Some(self.oversized(data.len())));
                    }
                    // Binary frames are accepted if they carry UTF-8 JSON
                    match String::from_utf8(data) {
                        Ok(text) => return Ok(Some(Inbound::Text(text))),
                        Err(_) => {
                            warn!(connection = %self.id(), "Dropping non UTF-8 binary message");
                        }
                    }
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    return Ok(Some(Inbound::Heartbeat));
                }
                Some(Ok(Message::Close(_))) => {
                    debug!(connection = %self.id(), "Received close frame");
                    self.connection.mark_closed();
                    return Ok(None);
                }
                Some(Err(e)) => {
                    self.connection.mark_closed();
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!(connection = %self.id(), "WebSocket stream ended");
                    self.connection.mark_closed();
                    return Ok(None);
                }
            }
        }
    }

    fn oversized(&self, len: usize) -> Inbound {
        warn!(
            connection = %self.id(),
            size = len,
            max = self.max_message_size,
            "Dropping oversized message"
        );
        Inbound::Oversized(len)
    }

    /// Close the session. Queued events that were not yet written are discarded.
    pub fn close(self) {
        self.connection.mark_closed();
        self.writer.abort();
        debug!(connection = %self.connection.id(), "WebSocket session closed");
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: Outbound,
    connection: Arc<ChannelConnection>,
    heartbeat_interval: Duration,
) {
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    // The first tick completes immediately
    heartbeat.tick().await;

    loop {
        tokio::select! {
            event = outbound.recv() => {
                let Some(event) = event else { break };
                match codec::encode(&event) {
                    Ok(text) => {
                        trace!(connection = %connection.id(), event = event.name(), "Writing event");
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(connection = %connection.id(), error = %e, "Failed to encode event");
                    }
                }
            }
            _ = heartbeat.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    connection.mark_closed();
    let _ = sink.close().await;
}
