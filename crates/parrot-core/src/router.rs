//! Event router for Parrot.
//!
//! The router terminates client events, applies them to the matchmaking
//! engine and fans the results out to the affected connections. All
//! matchmaking state and the connection registry sit behind one mutex, so
//! every public method runs as a single critical section. Sends only
//! enqueue onto per-connection queues and never block under the lock.
//!
//! Nothing is ever sent back as an error. Bad envelopes, stale identities
//! and closed connections are logged and dropped; [`Routed`] reports what
//! happened so callers can count it.

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use parrot_protocol::{
    codec, ClientEvent, JoinPayload, MessagePayload, ServerEvent, SkipPayload, TypingPayload,
};
use parrot_transport::{Connection, ConnectionId};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::entrant::{Pair, RoomId, UserId, WaitingEntrant};
use crate::matchmaking::{JoinOutcome, MatchmakingEngine, Requeue, WaitingCounts};
use crate::registry::ConnectionRegistry;

/// Notice texts carried by `searching` and `partnerDisconnected`.
pub mod notices {
    pub const SEARCHING: &str = "Searching for a partner...";
    pub const SEARCHING_AGAIN: &str = "Searching for a new partner...";
    pub const PARTNER_SKIPPED: &str = "Partner skipped, Searching for new partner...";
    pub const PARTNER_DISCONNECTED: &str = "Partner disconnected.";
    pub const ROOM_CLOSED: &str = "Chat ended by server.";
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Chat texts longer than this many characters are dropped.
    pub max_text_length: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_text_length: 4096,
        }
    }
}

/// Why an inbound event produced no delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Unparseable envelope, unknown event or invalid payload.
    Malformed,
    /// `join` from a user who is already paired.
    AlreadyPaired,
    /// `message` or `typing` from a user without a partner.
    NotPaired,
    /// The partner has no open connection.
    PartnerOffline,
    /// Chat text over the configured length.
    TextTooLong,
}

impl DropReason {
    /// Label for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::Malformed => "malformed",
            DropReason::AlreadyPaired => "already_paired",
            DropReason::NotPaired => "not_paired",
            DropReason::PartnerOffline => "partner_offline",
            DropReason::TextTooLong => "text_too_long",
        }
    }
}

/// What the router did with an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// The join formed a pair.
    Matched { room_id: RoomId },
    /// The joining user is waiting.
    Searching,
    /// A skip was processed.
    Skipped {
        /// The partner left behind, if the user was paired.
        partner: Option<UserId>,
        /// Whether that partner was matched again straight away.
        rematched: bool,
    },
    /// The event was forwarded to the partner.
    Relayed,
    /// Nothing was delivered.
    Dropped(DropReason),
}

/// An inbound envelope and what the router did with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handled {
    /// Name of the decoded event, or `None` if the envelope was malformed.
    pub event: Option<&'static str>,
    pub routed: Routed,
}

/// Result of releasing a closed connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Released {
    /// Identities that were bound to the connection.
    pub users: Vec<UserId>,
    /// Partners left behind by those identities.
    pub partners: Vec<UserId>,
    /// Partners that were matched again straight away.
    pub rematched: usize,
}

struct RouterState {
    engine: MatchmakingEngine,
    registry: ConnectionRegistry,
}

impl RouterState {
    /// Send to a user's bound connection if it is open.
    fn deliver(&self, user_id: &UserId, event: ServerEvent) -> bool {
        let Some(connection) = self.registry.get(user_id) else {
            trace!(user = %user_id, event = event.name(), "No connection bound, dropping");
            return false;
        };
        deliver_to(connection.as_ref(), event)
    }

    /// Tell both members of a new pair who their counterpart is.
    fn announce(&self, pair: &Pair) {
        for (recipient, counterpart) in [(&pair.side_a, &pair.side_b), (&pair.side_b, &pair.side_a)] {
            self.deliver(
                &recipient.user_id,
                ServerEvent::matched(
                    counterpart.user_id.as_str(),
                    counterpart.username.as_str(),
                    counterpart.category,
                    pair.room_id.as_str(),
                ),
            );
        }
    }
}

fn deliver_to(connection: &dyn Connection, event: ServerEvent) -> bool {
    if !connection.is_open() {
        trace!(connection = %connection.id(), event = event.name(), "Connection closed, dropping");
        return false;
    }
    let name = event.name();
    match connection.send(event) {
        Ok(()) => true,
        Err(e) => {
            debug!(connection = %connection.id(), event = name, error = %e, "Send skipped");
            false
        }
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The central event router.
pub struct EventRouter {
    state: Mutex<RouterState>,
    config: RouterConfig,
}

impl EventRouter {
    /// Create a new router with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a new router with custom configuration.
    #[must_use]
    pub fn with_config(config: RouterConfig) -> Self {
        info!("Creating event router with config: {:?}", config);
        Self {
            state: Mutex::new(RouterState {
                engine: MatchmakingEngine::new(),
                registry: ConnectionRegistry::new(),
            }),
            config,
        }
    }

    /// Decode envelope text and dispatch it.
    ///
    /// Malformed envelopes are logged and dropped; the connection stays usable.
    pub fn handle_text(&self, connection: &Arc<dyn Connection>, text: &str) -> Handled {
        match codec::decode(text) {
            Ok(event) => {
                let name = event.name();
                Handled {
                    event: Some(name),
                    routed: self.dispatch(connection, event),
                }
            }
            Err(e) => {
                warn!(connection = %connection.id(), error = %e, "Dropping malformed envelope");
                Handled {
                    event: None,
                    routed: Routed::Dropped(DropReason::Malformed),
                }
            }
        }
    }

    /// Apply a client event received on `connection`.
    pub fn dispatch(&self, connection: &Arc<dyn Connection>, event: ClientEvent) -> Routed {
        trace!(connection = %connection.id(), event = event.name(), user = event.user_id(), "Dispatch");
        let routed = match event {
            ClientEvent::Join(join) => self.join(connection, join),
            ClientEvent::Skip(skip) => self.skip(skip),
            ClientEvent::Message(message) => self.message(message),
            ClientEvent::Typing(typing) => self.typing(typing),
        };
        if let Routed::Dropped(reason) = &routed {
            debug!(connection = %connection.id(), reason = reason.as_str(), "Event dropped");
        }
        routed
    }

    fn join(&self, connection: &Arc<dyn Connection>, join: JoinPayload) -> Routed {
        let entrant = WaitingEntrant::from(join);
        let mut state = self.state.lock();

        state
            .registry
            .bind(entrant.user_id.clone(), Arc::clone(connection));

        match state.engine.join_queue(entrant) {
            JoinOutcome::Matched(pair) => {
                state.announce(&pair);
                Routed::Matched {
                    room_id: pair.room_id,
                }
            }
            JoinOutcome::Searching => {
                deliver_to(connection.as_ref(), ServerEvent::searching(notices::SEARCHING));
                Routed::Searching
            }
            JoinOutcome::AlreadyPaired => Routed::Dropped(DropReason::AlreadyPaired),
        }
    }

    fn skip(&self, skip: SkipPayload) -> Routed {
        let user_id = UserId::from(skip.user_id);
        let mut state = self.state.lock();

        let unpaired = state.engine.unpair_user(&user_id);
        let mut partner = None;
        let mut rematched = false;

        if let Some(unpaired) = unpaired {
            state.deliver(
                &unpaired.partner_id,
                ServerEvent::partner_disconnected(notices::PARTNER_SKIPPED),
            );
            if let Requeue::Matched(pair) = &unpaired.requeue {
                state.announce(pair);
                rematched = true;
            }
            partner = Some(unpaired.partner_id);
        }

        // The skipper hears "searching" whether or not they had a partner
        state.deliver(&user_id, ServerEvent::searching(notices::SEARCHING_AGAIN));

        Routed::Skipped { partner, rematched }
    }

    fn message(&self, message: MessagePayload) -> Routed {
        if message.text.chars().count() > self.config.max_text_length {
            return Routed::Dropped(DropReason::TextTooLong);
        }

        let user_id = UserId::from(message.user_id);
        let state = self.state.lock();

        let Some(partner) = state
            .engine
            .pair_by_user(&user_id)
            .and_then(|pair| pair.partner_of(&user_id))
        else {
            return Routed::Dropped(DropReason::NotPaired);
        };

        let event = ServerEvent::message(user_id.as_str(), message.text, timestamp());
        if state.deliver(&partner.user_id, event) {
            Routed::Relayed
        } else {
            Routed::Dropped(DropReason::PartnerOffline)
        }
    }

    fn typing(&self, typing: TypingPayload) -> Routed {
        let user_id = UserId::from(typing.user_id);
        let state = self.state.lock();

        let Some(partner) = state
            .engine
            .pair_by_user(&user_id)
            .and_then(|pair| pair.partner_of(&user_id))
        else {
            return Routed::Dropped(DropReason::NotPaired);
        };

        if state.deliver(
            &partner.user_id,
            ServerEvent::typing(user_id.as_str(), typing.typing),
        ) {
            Routed::Relayed
        } else {
            Routed::Dropped(DropReason::PartnerOffline)
        }
    }

    /// Release everything bound to a closed connection.
    ///
    /// Every identity bound to the connection is unbound, withdrawn from the
    /// pools and unpaired. Its partner gets `partnerDisconnected` and is
    /// requeued, but is not sent `searching`.
    pub fn connection_closed(&self, connection_id: &ConnectionId) -> Released {
        let mut state = self.state.lock();
        let users = state.registry.unbind_connection(connection_id);
        let mut released = Released::default();

        for user_id in users {
            state.engine.leave_queue(&user_id);

            if let Some(unpaired) = state.engine.unpair_user(&user_id) {
                state.deliver(
                    &unpaired.partner_id,
                    ServerEvent::partner_disconnected(notices::PARTNER_DISCONNECTED),
                );
                if let Requeue::Matched(pair) = &unpaired.requeue {
                    state.announce(pair);
                    released.rematched += 1;
                }
                released.partners.push(unpaired.partner_id);
            }

            debug!(connection = %connection_id, user = %user_id, "Released user");
            released.users.push(user_id);
        }

        released
    }

    /// Administratively end a room.
    ///
    /// Both members are told with `partnerDisconnected` and neither is
    /// requeued. Returns the dissolved pair, or `None` for an unknown room.
    pub fn teardown_room(&self, room_id: &RoomId) -> Option<Pair> {
        let mut state = self.state.lock();
        let pair = state.engine.force_unpair_room(room_id)?;

        for member in pair.members() {
            state.deliver(member, ServerEvent::partner_disconnected(notices::ROOM_CLOSED));
        }
        Some(pair)
    }

    /// Advisory pool and pair sizes.
    #[must_use]
    pub fn waiting_counts(&self) -> WaitingCounts {
        self.state.lock().engine.waiting_counts()
    }

    /// The pair a user currently belongs to.
    #[must_use]
    pub fn pair_by_user(&self, user_id: &UserId) -> Option<Pair> {
        self.state.lock().engine.pair_by_user(user_id).cloned()
    }

    /// Check if a user is waiting for a partner.
    #[must_use]
    pub fn is_waiting(&self, user_id: &UserId) -> bool {
        self.state.lock().engine.is_waiting(user_id)
    }

    /// Check if a user has a connection binding.
    #[must_use]
    pub fn is_bound(&self, user_id: &UserId) -> bool {
        self.state.lock().registry.get(user_id).is_some()
    }

    /// Number of bound users.
    #[must_use]
    pub fn bound_users(&self) -> usize {
        self.state.lock().registry.len()
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}
