//! Identities, waiting entrants and pairs.

use chrono::{DateTime, Utc};
use parrot_protocol::{Category, JoinPayload};
use std::borrow::Borrow;
use std::fmt;
use uuid::Uuid;

/// A user identity issued by the session service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(String);

impl UserId {
    /// Create a new user ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for UserId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A server-issued room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(String);

impl RoomId {
    /// Generate a fresh room ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A user waiting for, or snapshotted into, a pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitingEntrant {
    pub user_id: UserId,
    pub username: String,
    pub category: Category,
    /// Carried for future priority matching. Has no effect on ordering.
    pub priority: bool,
    /// When the user entered the queue.
    pub joined_at: DateTime<Utc>,
}

impl WaitingEntrant {
    /// Create an entrant joining now.
    #[must_use]
    pub fn new(user_id: impl Into<UserId>, username: impl Into<String>, category: Category) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            category,
            priority: false,
            joined_at: Utc::now(),
        }
    }

    /// Set the priority flag.
    #[must_use]
    pub fn with_priority(mut self, priority: bool) -> Self {
        self.priority = priority;
        self
    }

    /// A copy of this entrant re-entering the queue now.
    #[must_use]
    pub fn requeued(&self) -> Self {
        Self {
            joined_at: Utc::now(),
            ..self.clone()
        }
    }
}

impl From<JoinPayload> for WaitingEntrant {
    fn from(join: JoinPayload) -> Self {
        WaitingEntrant::new(join.user_id, join.username, join.category)
            .with_priority(join.priority_flag.unwrap_or(false))
    }
}

/// Two matched users sharing a room.
///
/// Both sides are snapshots taken at match time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    pub room_id: RoomId,
    /// The user whose join formed the pair.
    pub side_a: WaitingEntrant,
    /// The user taken from the waiting pool.
    pub side_b: WaitingEntrant,
    pub started_at: DateTime<Utc>,
}

impl Pair {
    /// Form a pair in a fresh room.
    #[must_use]
    pub fn new(side_a: WaitingEntrant, side_b: WaitingEntrant) -> Self {
        Self {
            room_id: RoomId::generate(),
            side_a,
            side_b,
            started_at: Utc::now(),
        }
    }

    /// Check if a user is a member of this pair.
    #[must_use]
    pub fn contains(&self, user_id: &UserId) -> bool {
        self.side_a.user_id == *user_id || self.side_b.user_id == *user_id
    }

    /// The member who is not `user_id`.
    ///
    /// Returns `None` if `user_id` is not a member.
    #[must_use]
    pub fn partner_of(&self, user_id: &UserId) -> Option<&WaitingEntrant> {
        if self.side_a.user_id == *user_id {
            Some(&self.side_b)
        } else if self.side_b.user_id == *user_id {
            Some(&self.side_a)
        } else {
            None
        }
    }

    /// Both member identities.
    #[must_use]
    pub fn members(&self) -> [&UserId; 2] {
        [&self.side_a.user_id, &self.side_b.user_id]
    }
}
