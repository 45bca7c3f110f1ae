//! # parrot-core
//!
//! Matchmaking and event routing for Parrot, an anonymous one-to-one chat
//! relay.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Entrant** - User and room identities, waiting entries and pairs
//! - **Pool** - FIFO waiting queue for one category
//! - **Matchmaking** - Cross-category pairing, unpairing and requeueing
//! - **Registry** - `userId -> connection` bindings
//! - **Router** - Applies client events and fans out server events
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐
//! │  Connection │────▶│ EventRouter │────▶│  Matchmaking │
//! └─────────────┘     └─────────────┘     └──────────────┘
//!        ▲                   │                    │
//!        │                   ▼                    ▼
//!        │            ┌─────────────┐     ┌──────────────┐
//!        └────────────│  Registry   │     │ WaitingPool  │
//!                     └─────────────┘     └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use parrot_core::{EventRouter, Routed};
//! use parrot_protocol::{Category, ClientEvent};
//! use parrot_transport::{ChannelConnection, Connection};
//! use std::sync::Arc;
//!
//! let router = EventRouter::new();
//! let (alice, _alice_rx) = ChannelConnection::new();
//! let (bob, _bob_rx) = ChannelConnection::new();
//! let alice: Arc<dyn Connection> = Arc::new(alice);
//! let bob: Arc<dyn Connection> = Arc::new(bob);
//!
//! let waiting = router.dispatch(&alice, ClientEvent::join("alice", "Alice", Category::Female));
//! assert_eq!(waiting, Routed::Searching);
//!
//! let matched = router.dispatch(&bob, ClientEvent::join("bob", "Bob", Category::Male));
//! assert!(matches!(matched, Routed::Matched { .. }));
//! ```

pub mod entrant;
pub mod matchmaking;
pub mod pool;
pub mod registry;
pub mod router;

pub use entrant::{Pair, RoomId, UserId, WaitingEntrant};
pub use matchmaking::{JoinOutcome, MatchmakingEngine, Requeue, Unpaired, WaitingCounts};
pub use pool::WaitingPool;
pub use registry::ConnectionRegistry;
pub use router::{notices, DropReason, EventRouter, Handled, Released, Routed, RouterConfig};
