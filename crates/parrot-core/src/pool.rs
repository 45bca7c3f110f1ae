//! FIFO waiting pool for one category.
//!
//! Order lives in a `VecDeque` of `(user, ticket)` slots; membership lives
//! in a map keyed by user. Removing a user only touches the map, leaving a
//! stale slot behind that `pop_front` skips. A slot is live only while the
//! map holds the same ticket for that user.

use parrot_protocol::Category;
use std::collections::{HashMap, VecDeque};
use tracing::trace;

use crate::entrant::{UserId, WaitingEntrant};

/// Stale slots tolerated before the order queue is compacted.
const COMPACT_SLACK: usize = 64;

type Ticket = u64;

/// Users of one category waiting for a partner, oldest first.
#[derive(Debug)]
pub struct WaitingPool {
    category: Category,
    order: VecDeque<(UserId, Ticket)>,
    members: HashMap<UserId, (Ticket, WaitingEntrant)>,
    next_ticket: Ticket,
}

impl WaitingPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new(category: Category) -> Self {
        Self {
            category,
            order: VecDeque::new(),
            members: HashMap::new(),
            next_ticket: 0,
        }
    }

    /// The category this pool holds.
    #[must_use]
    pub fn category(&self) -> Category {
        self.category
    }

    /// Number of waiting users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if nobody is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Check if a user is waiting.
    #[must_use]
    pub fn contains(&self, user_id: &UserId) -> bool {
        self.members.contains_key(user_id)
    }

    /// Get a waiting user's entry.
    #[must_use]
    pub fn get(&self, user_id: &UserId) -> Option<&WaitingEntrant> {
        self.members.get(user_id).map(|(_, entrant)| entrant)
    }

    /// Add a user at the tail.
    ///
    /// A user already waiting keeps their place and original `joined_at`;
    /// the rest of their entry is replaced. Returns `true` if the user was
    /// newly added.
    pub fn push_back(&mut self, entrant: WaitingEntrant) -> bool {
        if let Some((_, existing)) = self.members.get_mut(&entrant.user_id) {
            let joined_at = existing.joined_at;
            *existing = WaitingEntrant {
                joined_at,
                ..entrant
            };
            trace!(user = %existing.user_id, category = %self.category, "Refreshed waiting entry");
            return false;
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.order.push_back((entrant.user_id.clone(), ticket));
        self.members
            .insert(entrant.user_id.clone(), (ticket, entrant));
        true
    }

    /// Remove and return the oldest waiting user.
    pub fn pop_front(&mut self) -> Option<WaitingEntrant> {
        while let Some((user_id, ticket)) = self.order.pop_front() {
            if self.is_live(&user_id, ticket) {
                return self.members.remove(&user_id).map(|(_, entrant)| entrant);
            }
        }
        None
    }

    /// The oldest waiting user, without removing them.
    #[must_use]
    pub fn peek_front(&self) -> Option<&WaitingEntrant> {
        self.iter().next()
    }

    /// Remove a user wherever they are in the queue.
    pub fn remove(&mut self, user_id: &UserId) -> Option<WaitingEntrant> {
        let removed = self.members.remove(user_id).map(|(_, entrant)| entrant);
        if removed.is_some() {
            self.maybe_compact();
        }
        removed
    }

    /// Waiting users, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &WaitingEntrant> {
        self.order.iter().filter_map(|(user_id, ticket)| {
            self.members
                .get(user_id)
                .filter(|(live, _)| live == ticket)
                .map(|(_, entrant)| entrant)
        })
    }

    fn is_live(&self, user_id: &UserId, ticket: Ticket) -> bool {
        self.members
            .get(user_id)
            .is_some_and(|(live, _)| *live == ticket)
    }

    fn maybe_compact(&mut self) {
        if self.order.len() <= COMPACT_SLACK || self.order.len() <= 2 * self.members.len() {
            return;
        }

        let before = self.order.len();
        let members = &self.members;
        self.order.retain(|(user_id, ticket)| {
            members
                .get(user_id)
                .is_some_and(|(live, _)| live == ticket)
        });
        trace!(
            category = %self.category,
            before,
            after = self.order.len(),
            "Compacted waiting order"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entrant(id: &str) -> WaitingEntrant {
        WaitingEntrant::new(id, format!("name-{id}"), Category::Male)
    }

    fn ids(pool: &WaitingPool) -> Vec<&str> {
        pool.iter().map(|e| e.user_id.as_str()).collect()
    }

    #[test]
    fn test_fifo_order() {
        let mut pool = WaitingPool::new(Category::Male);
        pool.push_back(entrant("a"));
        pool.push_back(entrant("b"));
        pool.push_back(entrant("c"));

        assert_eq!(pool.len(), 3);
        assert_eq!(pool.pop_front().unwrap().user_id.as_str(), "a");
        assert_eq!(pool.pop_front().unwrap().user_id.as_str(), "b");
        assert_eq!(pool.pop_front().unwrap().user_id.as_str(), "c");
        assert!(pool.pop_front().is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_remove_skips_stale_slot() {
        let mut pool = WaitingPool::new(Category::Male);
        pool.push_back(entrant("a"));
        pool.push_back(entrant("b"));

        assert!(pool.remove(&"a".into()).is_some());
        assert!(pool.remove(&"a".into()).is_none());
        assert_eq!(pool.peek_front().unwrap().user_id.as_str(), "b");
        assert_eq!(pool.pop_front().unwrap().user_id.as_str(), "b");
    }

    #[test]
    fn test_rejoin_after_remove_goes_to_tail() {
        let mut pool = WaitingPool::new(Category::Male);
        pool.push_back(entrant("a"));
        pool.push_back(entrant("b"));
        pool.remove(&"a".into());
        pool.push_back(entrant("a"));

        assert_eq!(ids(&pool), vec!["b", "a"]);
        assert_eq!(pool.pop_front().unwrap().user_id.as_str(), "b");
        assert_eq!(pool.pop_front().unwrap().user_id.as_str(), "a");
        assert!(pool.pop_front().is_none());
    }

    #[test]
    fn test_push_existing_keeps_position() {
        let mut pool = WaitingPool::new(Category::Male);
        pool.push_back(entrant("a"));
        pool.push_back(entrant("b"));
        let joined_at = pool.get(&"a".into()).unwrap().joined_at;

        let mut renamed = entrant("a");
        renamed.username = "renamed".to_string();
        assert!(!pool.push_back(renamed));

        assert_eq!(ids(&pool), vec!["a", "b"]);
        let a = pool.get(&"a".into()).unwrap();
        assert_eq!(a.username, "renamed");
        assert_eq!(a.joined_at, joined_at);
    }

    #[test]
    fn test_compaction_preserves_order() {
        let mut pool = WaitingPool::new(Category::Male);
        for i in 0..200 {
            pool.push_back(entrant(&format!("u{i}")));
        }
        for i in 0..190 {
            pool.remove(&format!("u{i}").as_str().into());
        }

        assert_eq!(pool.len(), 10);
        assert!(pool.order.len() <= COMPACT_SLACK.max(2 * pool.len()) + 1);
        let expected: Vec<String> = (190..200).map(|i| format!("u{i}")).collect();
        let actual: Vec<String> = pool.iter().map(|e| e.user_id.to_string()).collect();
        assert_eq!(actual, expected);
    }
}
