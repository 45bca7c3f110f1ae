//! Connection registry.
//!
//! Maps each user identity to the connection it last joined from. A
//! binding is a lookup, not a liveness guarantee: callers check
//! [`Connection::is_open`] right before sending.

use parrot_transport::{Connection, ConnectionId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::entrant::UserId;

/// `userId -> connection` bindings, last write wins.
#[derive(Default)]
pub struct ConnectionRegistry {
    bindings: HashMap<UserId, Arc<dyn Connection>>,
    /// Users bound to each connection.
    by_connection: HashMap<ConnectionId, HashSet<UserId>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a user to a connection, replacing any earlier binding.
    ///
    /// The replaced handle is returned and left open.
    pub fn bind(
        &mut self,
        user_id: UserId,
        connection: Arc<dyn Connection>,
    ) -> Option<Arc<dyn Connection>> {
        let new_id = connection.id().clone();
        self.by_connection
            .entry(new_id.clone())
            .or_default()
            .insert(user_id.clone());

        let previous = self.bindings.insert(user_id.clone(), connection);
        if let Some(prev) = &previous {
            if *prev.id() != new_id {
                debug!(user = %user_id, old = %prev.id(), new = %new_id, "Rebound user");
                self.forget(prev.id(), &user_id);
            }
        }
        previous
    }

    /// Get the connection a user is bound to.
    #[must_use]
    pub fn get(&self, user_id: &UserId) -> Option<&Arc<dyn Connection>> {
        self.bindings.get(user_id)
    }

    /// Remove every binding that points at a connection.
    ///
    /// Returns the released users in a stable order.
    pub fn unbind_connection(&mut self, connection_id: &ConnectionId) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .by_connection
            .remove(connection_id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        users.sort();

        for user_id in &users {
            self.bindings.remove(user_id);
        }
        if !users.is_empty() {
            debug!(connection = %connection_id, users = users.len(), "Released connection bindings");
        }
        users
    }

    /// Number of bound users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Check if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    fn forget(&mut self, connection_id: &ConnectionId, user_id: &UserId) {
        if let Some(users) = self.by_connection.get_mut(connection_id) {
            users.remove(user_id);
            if users.is_empty() {
                self.by_connection.remove(connection_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parrot_transport::ChannelConnection;

    fn connection(id: &str) -> Arc<dyn Connection> {
        let (conn, _outbound) = ChannelConnection::with_id(id);
        Arc::new(conn)
    }

    #[test]
    fn test_bind_and_get() {
        let mut registry = ConnectionRegistry::new();
        let conn = connection("conn-1");

        assert!(registry.bind("alice".into(), Arc::clone(&conn)).is_none());
        assert_eq!(registry.get(&"alice".into()).unwrap().id(), conn.id());
        assert!(registry.get(&"bob".into()).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_rebind_overwrites_previous_connection() {
        let mut registry = ConnectionRegistry::new();
        let old = connection("conn-old");
        let new = connection("conn-new");

        registry.bind("alice".into(), Arc::clone(&old));
        let previous = registry.bind("alice".into(), Arc::clone(&new)).unwrap();

        assert_eq!(previous.id(), old.id());
        assert_eq!(registry.get(&"alice".into()).unwrap().id(), new.id());

        // Closing the stale connection must not release the fresh binding
        assert!(registry.unbind_connection(old.id()).is_empty());
        assert!(registry.get(&"alice".into()).is_some());
        assert_eq!(
            registry.unbind_connection(new.id()),
            vec![UserId::from("alice")]
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rebind_same_connection_keeps_index() {
        let mut registry = ConnectionRegistry::new();
        let conn = connection("conn-1");

        registry.bind("alice".into(), Arc::clone(&conn));
        registry.bind("alice".into(), Arc::clone(&conn));

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.unbind_connection(conn.id()),
            vec![UserId::from("alice")]
        );
    }

    #[test]
    fn test_unbind_connection_releases_all_users() {
        let mut registry = ConnectionRegistry::new();
        let shared = connection("conn-shared");
        let other = connection("conn-other");

        registry.bind("bob".into(), Arc::clone(&shared));
        registry.bind("alice".into(), Arc::clone(&shared));
        registry.bind("carol".into(), Arc::clone(&other));

        let released = registry.unbind_connection(shared.id());
        assert_eq!(released, vec![UserId::from("alice"), UserId::from("bob")]);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&"carol".into()).is_some());
        assert!(registry.unbind_connection(shared.id()).is_empty());
    }
}
