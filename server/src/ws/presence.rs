//! Presence registry: user id -> open live connections.
//!
//! A user can hold several connections at once (multiple devices/tabs).
//! Presence is derived: a user is online while at least one connection is open.

use axum::extract::ws::Message;
use dashmap::DashMap;

use super::{Connection, ConnectionId, DeliveryFailure};

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    connections: DashMap<String, Vec<Connection>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns true if the user had no open connection before.
    pub fn register(&self, user_id: &str, connection: Connection) -> bool {
        let mut entry = self.connections.entry(user_id.to_string()).or_default();
        let first = entry.is_empty();
        entry.push(connection);

        tracing::debug!(
            user_id = %user_id,
            connections = entry.len(),
            "Connection registered"
        );
        first
    }

    /// Remove a connection. Returns true if this left the user with no open connection.
    ///
    /// Connections pruned by a failed push leave an empty entry behind. Whoever
    /// removes that entry first, this call or [`Self::remove_if_empty`], is the
    /// one that observes the transition to offline.
    pub fn unregister(&self, user_id: &str, connection_id: ConnectionId) -> bool {
        let now_empty = match self.connections.get_mut(user_id) {
            Some(mut conns) => {
                conns.retain(|c| c.id() != connection_id);
                conns.is_empty()
            }
            None => return false,
        };

        if now_empty {
            // A concurrent register may have refilled the entry in between.
            return self
                .connections
                .remove_if(user_id, |_, conns| conns.is_empty())
                .is_some();
        }

        tracing::debug!(user_id = %user_id, "Connection unregistered");
        false
    }

    /// Push a frame to every connection of `user_id`.
    ///
    /// Best effort per connection: a closed connection is pruned and the
    /// remaining ones still receive the frame. Returns how many connections
    /// accepted it, or why none did.
    pub fn send_to(&self, user_id: &str, frame: &Message) -> Result<usize, DeliveryFailure> {
        // Snapshot so no shard lock is held while pushing.
        let targets: Vec<Connection> = match self.connections.get(user_id) {
            Some(conns) if !conns.is_empty() => conns.clone(),
            _ => return Err(DeliveryFailure::NotConnected),
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for conn in &targets {
            if conn.push(frame.clone()) {
                delivered += 1;
            } else {
                dead.push(conn.id());
            }
        }

        if !dead.is_empty() {
            if let Some(mut conns) = self.connections.get_mut(user_id) {
                conns.retain(|c| !dead.contains(&c.id()));
            }
            tracing::debug!(
                user_id = %user_id,
                pruned = dead.len(),
                "Pruned closed connections"
            );
        }

        if delivered == 0 {
            Err(DeliveryFailure::ConnectionsClosed(dead.len()))
        } else {
            Ok(delivered)
        }
    }

    /// Drop the entry for `user_id` if pruning left it empty. Returns true if
    /// this call removed it.
    pub fn remove_if_empty(&self, user_id: &str) -> bool {
        self.connections
            .remove_if(user_id, |_, conns| conns.is_empty())
            .is_some()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.connections
            .get(user_id)
            .map(|conns| !conns.is_empty())
            .unwrap_or(false)
    }

    pub fn connection_count(&self, user_id: &str) -> usize {
        self.connections.get(user_id).map(|c| c.len()).unwrap_or(0)
    }

    /// Every user with at least one open connection.
    pub fn online_users(&self) -> Vec<String> {
        self.connections
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::test_support::open_connection;

    fn frame(text: &str) -> Message {
        Message::Text(text.to_string().into())
    }

    #[test]
    fn register_reports_first_connection() {
        let registry = PresenceRegistry::new();
        let (a, _ra) = open_connection();
        let (b, _rb) = open_connection();

        assert!(registry.register("u1", a));
        assert!(!registry.register("u1", b));
        assert_eq!(registry.connection_count("u1"), 2);
        assert!(registry.is_online("u1"));
    }

    #[test]
    fn unregister_reports_last_connection() {
        let registry = PresenceRegistry::new();
        let (a, _ra) = open_connection();
        let (b, _rb) = open_connection();
        let (a_id, b_id) = (a.id(), b.id());
        registry.register("u1", a);
        registry.register("u1", b);

        assert!(!registry.unregister("u1", a_id));
        assert!(registry.unregister("u1", b_id));
        assert!(!registry.is_online("u1"));
        assert!(!registry.unregister("u1", b_id));
    }

    #[test]
    fn send_reaches_every_connection_of_user() {
        let registry = PresenceRegistry::new();
        let (a, mut ra) = open_connection();
        let (b, mut rb) = open_connection();
        registry.register("u1", a);
        registry.register("u1", b);

        assert_eq!(registry.send_to("u1", &frame("{}")), Ok(2));
        assert!(ra.try_recv().is_ok());
        assert!(rb.try_recv().is_ok());
    }

    #[test]
    fn closed_connection_is_pruned_without_blocking_others() {
        let registry = PresenceRegistry::new();
        let (open, mut open_rx) = open_connection();
        let (closed, closed_rx) = open_connection();
        registry.register("u1", closed);
        registry.register("u1", open);
        drop(closed_rx);

        assert_eq!(registry.send_to("u1", &frame("{}")), Ok(1));
        assert!(open_rx.try_recv().is_ok());
        assert_eq!(registry.connection_count("u1"), 1);
    }

    #[test]
    fn all_closed_reports_failure_and_offline_is_still_observed() {
        let registry = PresenceRegistry::new();
        let (conn, rx) = open_connection();
        let id = conn.id();
        registry.register("u1", conn);
        drop(rx);

        assert_eq!(
            registry.send_to("u1", &frame("{}")),
            Err(DeliveryFailure::ConnectionsClosed(1))
        );
        assert!(!registry.is_online("u1"));
        assert!(registry.online_users().is_empty());
        // The owning task still sees the offline transition.
        assert!(registry.unregister("u1", id));
    }

    #[test]
    fn emptied_entry_is_removed_once() {
        let registry = PresenceRegistry::new();
        let (conn, rx) = open_connection();
        let id = conn.id();
        registry.register("u1", conn);
        drop(rx);
        let _ = registry.send_to("u1", &frame("{}"));

        assert!(registry.remove_if_empty("u1"));
        assert!(!registry.remove_if_empty("u1"));
        assert!(!registry.unregister("u1", id));
    }

    #[test]
    fn remove_if_empty_keeps_live_entries() {
        let registry = PresenceRegistry::new();
        let (conn, _rx) = open_connection();
        registry.register("u1", conn);

        assert!(!registry.remove_if_empty("u1"));
        assert!(registry.is_online("u1"));
    }

    #[test]
    fn unknown_user_is_not_connected() {
        let registry = PresenceRegistry::new();
        assert_eq!(
            registry.send_to("ghost", &frame("{}")),
            Err(DeliveryFailure::NotConnected)
        );
    }
}
