//! # parrot-transport
//!
//! Connection layer for the Parrot chat server.
//!
//! The core never touches sockets. It holds connections through the
//! [`Connection`] trait, which only answers "is this still open?" and
//! "enqueue this event". Sends never block: the channel-backed
//! [`ChannelConnection`] hands events to a per-connection writer task.
//!
//! ```rust,ignore
//! use parrot_transport::{ChannelConnection, Connection};
//!
//! let (conn, mut outbound) = ChannelConnection::new();
//! conn.send(event)?;
//! while let Some(event) = outbound.recv().await {
//!     // Write to the socket
//! }
//! ```

pub mod channel;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use channel::{ChannelConnection, Outbound};
pub use traits::{Connection, ConnectionId, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{Inbound, WebSocketConfig, WebSocketSession};
