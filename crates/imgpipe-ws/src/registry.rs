//! Process-local index of live connections by user

use crate::connection::{Connection, ConnectionId};
use dashmap::DashMap;
use imgpipe_core::UserId;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps each user to the connections currently authenticated as them.
///
/// A user with no connections has no entry. Nothing here crosses process
/// boundaries; the fanout bus carries events to whichever process holds the
/// socket.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    users: Arc<DashMap<UserId, HashMap<ConnectionId, Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, user_id: &UserId, conn: Connection) {
        tracing::debug!(user_id = %user_id, connection_id = %conn.id(), "Connection registered");
        self.users
            .entry(user_id.clone())
            .or_default()
            .insert(conn.id(), conn);
    }

    /// Remove one connection. The user's entry goes with its last connection.
    pub fn remove(&self, user_id: &UserId, id: ConnectionId) -> bool {
        let removed = match self.users.get_mut(user_id) {
            Some(mut conns) => conns.remove(&id).is_some(),
            None => return false,
        };
        self.users.remove_if(user_id, |_, conns| conns.is_empty());
        if removed {
            tracing::debug!(user_id = %user_id, connection_id = %id, "Connection removed");
        }
        removed
    }

    /// Snapshot of a user's connections
    pub fn get(&self, user_id: &UserId) -> Option<Vec<Connection>> {
        self.users
            .get(user_id)
            .map(|conns| conns.values().cloned().collect())
    }

    /// Queue `payload` on every open connection of `user_id`.
    ///
    /// Closed connections are skipped and left for their socket task to
    /// remove. Returns how many connections accepted the frame.
    pub fn broadcast(&self, user_id: &UserId, payload: &str) -> usize {
        let Some(conns) = self.users.get(user_id) else {
            return 0;
        };
        conns
            .values()
            .filter(|conn| conn.is_open())
            .filter(|conn| conn.try_send(payload))
            .count()
    }

    pub fn contains_user(&self, user_id: &UserId) -> bool {
        self.users.contains_key(user_id)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn connection_count(&self) -> usize {
        self.users.iter().map(|entry| entry.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removing_last_connection_drops_user_entry() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new("42");
        let (a, _ra) = Connection::new(4);
        let (b, _rb) = Connection::new(4);

        registry.add(&user, a.clone());
        registry.add(&user, b.clone());
        assert_eq!(registry.connection_count(), 2);

        assert!(registry.remove(&user, a.id()));
        assert!(registry.contains_user(&user));
        assert!(registry.remove(&user, b.id()));
        assert!(!registry.contains_user(&user));
        assert!(registry.get(&user).is_none());

        assert!(!registry.remove(&user, b.id()));
        assert_eq!(registry.broadcast(&user, "{}"), 0);
    }

    #[test]
    fn test_broadcast_targets_only_the_user() {
        let registry = ConnectionRegistry::new();
        let (mine, mut my_rx) = Connection::new(4);
        let (theirs, mut their_rx) = Connection::new(4);
        registry.add(&UserId::new("42"), mine);
        registry.add(&UserId::new("7"), theirs);

        assert_eq!(registry.broadcast(&UserId::new("42"), "hello"), 1);
        assert_eq!(my_rx.try_recv().unwrap(), "hello");
        assert!(their_rx.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_skips_closed_connections_without_removing() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new("42");
        let (open, mut open_rx) = Connection::new(4);
        let (closed, mut closed_rx) = Connection::new(4);
        closed.close();
        registry.add(&user, open);
        registry.add(&user, closed);

        assert_eq!(registry.broadcast(&user, "evt"), 1);
        assert_eq!(open_rx.try_recv().unwrap(), "evt");
        assert!(closed_rx.try_recv().is_err());
        assert_eq!(registry.connection_count(), 2);
    }

    #[test]
    fn test_unknown_user_is_a_no_op() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.broadcast(&UserId::new("nobody"), "evt"), 0);
        assert_eq!(registry.user_count(), 0);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // A user has an entry exactly while at least one of their
        // connections is registered, whatever the add/remove order.
        #[test]
        fn prop_entry_exists_iff_connections_remain(
            ops in prop::collection::vec((0usize..3, 0usize..4, any::<bool>()), 1..40)
        ) {
            let registry = ConnectionRegistry::new();
            let users: Vec<UserId> = (0..3).map(|n| UserId::new(n.to_string())).collect();
            let conns: Vec<(Connection, _)> = (0..4).map(|_| Connection::new(1)).collect();
            let mut expected: Vec<std::collections::HashSet<usize>> = vec![Default::default(); 3];

            for (user, conn, add) in ops {
                if add {
                    registry.add(&users[user], conns[conn].0.clone());
                    expected[user].insert(conn);
                } else {
                    let removed = registry.remove(&users[user], conns[conn].0.id());
                    prop_assert_eq!(removed, expected[user].remove(&conn));
                }
            }

            for (user, want) in users.iter().zip(&expected) {
                prop_assert_eq!(registry.contains_user(user), !want.is_empty());
                let got = registry.get(user).map(|c| c.len()).unwrap_or(0);
                prop_assert_eq!(got, want.len());
            }
        }
    }
}
