//! # parrot-protocol
//!
//! Wire envelope definitions for the Parrot one-on-one chat server.
//!
//! Every message in either direction is a JSON object of the form
//! `{"event": "<name>", "payload": { ... }}`.
//!
//! ## Client events
//!
//! - `join` - Enter matchmaking with an identity and a category
//! - `skip` - Leave the current partner
//! - `message` / `typing` - Relayed to the current partner
//!
//! ## Server events
//!
//! - `matched` / `searching` / `partnerDisconnected` - Matchmaking state
//! - `message` / `typing` - Relayed from the partner
//!
//! ## Example
//!
//! ```rust
//! use parrot_protocol::{codec, ClientEvent};
//!
//! let text = r#"{"event":"skip","payload":{"userId":"u-1"}}"#;
//! let event = codec::decode(text).unwrap();
//! assert!(matches!(event, ClientEvent::Skip(_)));
//! ```

pub mod codec;
pub mod events;

pub use codec::{decode, encode, ProtocolError};
pub use events::{
    Category, ChatMessagePayload, ClientEvent, JoinPayload, MatchedPayload, MessagePayload,
    NoticePayload, ServerEvent, SkipPayload, TypingNoticePayload, TypingPayload,
};
