//! Matchmaking engine.
//!
//! Owns one waiting pool per category and the table of live pairs. A join
//! takes the oldest user from the opposite pool if there is one and waits
//! in its own pool otherwise. The engine does no I/O and no locking; the
//! router serializes access to it.

use parrot_protocol::Category;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::entrant::{Pair, RoomId, UserId, WaitingEntrant};
use crate::pool::WaitingPool;

/// Result of [`MatchmakingEngine::join_queue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A partner was taken from the opposite pool.
    Matched(Pair),
    /// No partner was available; the user is waiting.
    Searching,
    /// The user is already in a pair. Nothing changed.
    AlreadyPaired,
}

/// What happened to the partner left behind by an unpair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requeue {
    /// The partner is waiting again.
    Waiting(WaitingEntrant),
    /// The partner was matched straight away.
    Matched(Pair),
}

/// Result of a successful [`MatchmakingEngine::unpair_user`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unpaired {
    /// The pair that was dissolved.
    pub dissolved: Pair,
    /// The member who did not leave.
    pub partner_id: UserId,
    pub requeue: Requeue,
}

/// Advisory pool and pair sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WaitingCounts {
    pub male: usize,
    pub female: usize,
    pub pairs: usize,
}

/// The matchmaking state: two waiting pools and the pair table.
#[derive(Debug)]
pub struct MatchmakingEngine {
    male: WaitingPool,
    female: WaitingPool,
    /// Pairs indexed by room.
    pairs: HashMap<RoomId, Pair>,
    /// Room of every paired user.
    user_rooms: HashMap<UserId, RoomId>,
}

impl MatchmakingEngine {
    /// Create an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            male: WaitingPool::new(Category::Male),
            female: WaitingPool::new(Category::Female),
            pairs: HashMap::new(),
            user_rooms: HashMap::new(),
        }
    }

    fn pool(&self, category: Category) -> &WaitingPool {
        match category {
            Category::Male => &self.male,
            Category::Female => &self.female,
        }
    }

    fn pool_mut(&mut self, category: Category) -> &mut WaitingPool {
        match category {
            Category::Male => &mut self.male,
            Category::Female => &mut self.female,
        }
    }

    /// Match a user against the opposite pool, or queue them.
    pub fn join_queue(&mut self, entrant: WaitingEntrant) -> JoinOutcome {
        if self.user_rooms.contains_key(&entrant.user_id) {
            debug!(user = %entrant.user_id, "Join ignored, already paired");
            return JoinOutcome::AlreadyPaired;
        }

        match self.match_or_wait(entrant) {
            Some(pair) => JoinOutcome::Matched(pair),
            None => JoinOutcome::Searching,
        }
    }

    /// Caller guarantees the entrant is not paired.
    fn match_or_wait(&mut self, entrant: WaitingEntrant) -> Option<Pair> {
        let own = entrant.category;
        let opposite = own.opposite();

        // A join under a new category withdraws the old one
        self.pool_mut(opposite).remove(&entrant.user_id);

        if let Some(partner) = self.pool_mut(opposite).pop_front() {
            self.pool_mut(own).remove(&entrant.user_id);

            let pair = Pair::new(entrant, partner);
            for member in pair.members() {
                self.user_rooms.insert(member.clone(), pair.room_id.clone());
            }
            self.pairs.insert(pair.room_id.clone(), pair.clone());

            info!(
                room = %pair.room_id,
                side_a = %pair.side_a.user_id,
                side_b = %pair.side_b.user_id,
                "Pair formed"
            );
            return Some(pair);
        }

        debug!(user = %entrant.user_id, category = %own, "Waiting for partner");
        self.pool_mut(own).push_back(entrant);
        None
    }

    /// Withdraw a user from whichever pool holds them.
    ///
    /// Returns `true` if the user was waiting.
    pub fn leave_queue(&mut self, user_id: &UserId) -> bool {
        let removed_male = self.male.remove(user_id).is_some();
        let removed_female = self.female.remove(user_id).is_some();
        let removed = removed_male || removed_female;
        if removed {
            debug!(user = %user_id, "Left waiting pool");
        }
        removed
    }

    /// Get the pair a user belongs to.
    #[must_use]
    pub fn pair_by_user(&self, user_id: &UserId) -> Option<&Pair> {
        self.user_rooms
            .get(user_id)
            .and_then(|room_id| self.pairs.get(room_id))
    }

    /// Get a pair by room.
    #[must_use]
    pub fn pair_by_room(&self, room_id: &RoomId) -> Option<&Pair> {
        self.pairs.get(room_id)
    }

    /// Check if a user is in a waiting pool.
    #[must_use]
    pub fn is_waiting(&self, user_id: &UserId) -> bool {
        self.male.contains(user_id) || self.female.contains(user_id)
    }

    /// Waiting users of a category, oldest first.
    pub fn waiting(&self, category: Category) -> impl Iterator<Item = &WaitingEntrant> {
        self.pool(category).iter()
    }

    /// Dissolve a user's pair and requeue the partner.
    ///
    /// The leaving user ends up idle. The partner re-enters matchmaking
    /// with a fresh `joined_at` and may be matched immediately. Returns
    /// `None` if the user was not paired.
    pub fn unpair_user(&mut self, user_id: &UserId) -> Option<Unpaired> {
        let room_id = self.user_rooms.get(user_id)?.clone();
        let dissolved = self.remove_pair(&room_id)?;

        let partner = dissolved.partner_of(user_id).map(WaitingEntrant::requeued)?;
        let partner_id = partner.user_id.clone();

        info!(room = %room_id, user = %user_id, partner = %partner_id, "Pair dissolved");

        self.leave_queue(&partner_id);
        let requeue = match self.match_or_wait(partner.clone()) {
            Some(pair) => Requeue::Matched(pair),
            None => Requeue::Waiting(partner),
        };

        Some(Unpaired {
            dissolved,
            partner_id,
            requeue,
        })
    }

    /// Dissolve a pair without requeueing either member.
    pub fn force_unpair_room(&mut self, room_id: &RoomId) -> Option<Pair> {
        let pair = self.remove_pair(room_id)?;
        info!(room = %room_id, "Pair torn down");
        Some(pair)
    }

    fn remove_pair(&mut self, room_id: &RoomId) -> Option<Pair> {
        let pair = self.pairs.remove(room_id)?;
        for member in pair.members() {
            self.user_rooms.remove(member);
        }
        Some(pair)
    }

    /// Pool and pair sizes.
    #[must_use]
    pub fn waiting_counts(&self) -> WaitingCounts {
        WaitingCounts {
            male: self.male.len(),
            female: self.female.len(),
            pairs: self.pairs.len(),
        }
    }

    /// Panic if any structural invariant is violated.
    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        for (user_id, room_id) in &self.user_rooms {
            let pair = self
                .pairs
                .get(room_id)
                .unwrap_or_else(|| panic!("{user_id} points at missing room {room_id}"));
            assert!(pair.contains(user_id), "{user_id} not a member of {room_id}");
            assert!(!self.is_waiting(user_id), "{user_id} is both paired and waiting");
        }
        for (room_id, pair) in &self.pairs {
            assert_eq!(&pair.room_id, room_id);
            assert_ne!(pair.side_a.user_id, pair.side_b.user_id);
            for member in pair.members() {
                assert_eq!(self.user_rooms.get(member), Some(room_id));
            }
        }
        assert_eq!(self.user_rooms.len(), self.pairs.len() * 2);
        for entrant in self.male.iter() {
            assert!(!self.female.contains(&entrant.user_id));
        }
    }
}

impl Default for MatchmakingEngine {
    fn default() -> Self {
        Self::new()
    }
}
