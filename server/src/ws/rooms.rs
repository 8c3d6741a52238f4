use axum::extract::ws::Message;
use dashmap::DashMap;
use std::collections::HashSet;

use super::{BroadcastOutcome, PresenceRegistry};

/// Room id -> subscribed user ids.
///
/// A room mirrors a conversation for live delivery only. Persisted membership
/// lives in `conversation_members`; a member who never joined the room simply
/// receives nothing live.
#[derive(Debug, Default)]
pub struct RoomDirectory {
    rooms: DashMap<String, HashSet<String>>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `user_id` to `room_id`, creating the room if needed.
    /// Returns true if the user was not already subscribed.
    pub fn join(&self, user_id: &str, room_id: &str) -> bool {
        self.rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(user_id.to_string())
    }

    /// Unsubscribe `user_id` from `room_id`. Empty rooms are dropped.
    pub fn leave(&self, user_id: &str, room_id: &str) -> bool {
        let (removed, emptied) = match self.rooms.get_mut(room_id) {
            Some(mut subscribers) => {
                let removed = subscribers.remove(user_id);
                (removed, subscribers.is_empty())
            }
            None => return false,
        };

        if emptied {
            self.rooms.remove_if(room_id, |_, s| s.is_empty());
        }
        removed
    }

    /// Remove `user_id` from every room. Returns the rooms it was in.
    pub fn leave_all(&self, user_id: &str) -> Vec<String> {
        let mut left = Vec::new();
        let mut emptied = Vec::new();

        for mut room in self.rooms.iter_mut() {
            if room.value_mut().remove(user_id) {
                left.push(room.key().clone());
                if room.value().is_empty() {
                    emptied.push(room.key().clone());
                }
            }
        }

        for room_id in emptied {
            self.rooms.remove_if(&room_id, |_, s| s.is_empty());
        }
        left
    }

    pub fn contains(&self, room_id: &str, user_id: &str) -> bool {
        self.rooms
            .get(room_id)
            .map(|s| s.contains(user_id))
            .unwrap_or(false)
    }

    pub fn exists(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Current subscribers, copied out so callers never hold the shard lock.
    pub fn subscribers(&self, room_id: &str) -> Vec<String> {
        self.rooms
            .get(room_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Push `frame` to every subscriber of `room_id` except `exclude`.
    ///
    /// An unknown room yields an empty outcome. Per-user failures are
    /// collected and never stop the loop.
    pub fn broadcast(
        &self,
        presence: &PresenceRegistry,
        room_id: &str,
        frame: &Message,
        exclude: Option<&str>,
    ) -> BroadcastOutcome {
        let mut outcome = BroadcastOutcome::default();

        for user_id in self.subscribers(room_id) {
            if exclude == Some(user_id.as_str()) {
                continue;
            }
            match presence.send_to(&user_id, frame) {
                Ok(_) => outcome.sent.push(user_id),
                Err(failure) => {
                    tracing::debug!(
                        room_id = %room_id,
                        user_id = %user_id,
                        reason = %failure,
                        "Room push failed"
                    );
                    outcome.failed.push((user_id, failure));
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::test_support::open_connection;
    use crate::ws::DeliveryFailure;

    fn frame() -> Message {
        Message::Text("{\"type\":\"typing\"}".into())
    }

    #[test]
    fn join_twice_then_leave_once_leaves_nothing_behind() {
        let rooms = RoomDirectory::new();
        assert!(rooms.join("u1", "r1"));
        assert!(!rooms.join("u1", "r1"));

        assert!(rooms.leave("u1", "r1"));
        assert!(!rooms.contains("r1", "u1"));
        assert!(!rooms.exists("r1"));
        assert!(!rooms.leave("u1", "r1"));
    }

    #[test]
    fn leave_keeps_room_while_others_remain() {
        let rooms = RoomDirectory::new();
        rooms.join("u1", "r1");
        rooms.join("u2", "r1");

        rooms.leave("u1", "r1");
        assert!(rooms.exists("r1"));
        assert_eq!(rooms.subscribers("r1"), vec!["u2".to_string()]);
    }

    #[test]
    fn leave_all_drops_emptied_rooms() {
        let rooms = RoomDirectory::new();
        rooms.join("u1", "a");
        rooms.join("u1", "b");
        rooms.join("u2", "b");

        let mut left = rooms.leave_all("u1");
        left.sort();
        assert_eq!(left, vec!["a".to_string(), "b".to_string()]);
        assert!(!rooms.exists("a"));
        assert!(rooms.exists("b"));
    }

    #[test]
    fn broadcast_to_unknown_room_is_empty() {
        let rooms = RoomDirectory::new();
        let presence = PresenceRegistry::new();
        let outcome = rooms.broadcast(&presence, "nowhere", &frame(), None);
        assert!(outcome.sent.is_empty());
        assert!(outcome.failed.is_empty());
    }

    #[test]
    fn broadcast_reports_open_as_sent_and_closed_as_failed() {
        let rooms = RoomDirectory::new();
        let presence = PresenceRegistry::new();
        let (open, mut open_rx) = open_connection();
        let (closed, closed_rx) = open_connection();
        presence.register("open", open);
        presence.register("closed", closed);
        drop(closed_rx);
        rooms.join("open", "r1");
        rooms.join("closed", "r1");
        rooms.join("offline", "r1");

        let outcome = rooms.broadcast(&presence, "r1", &frame(), None);

        assert_eq!(outcome.sent, vec!["open".to_string()]);
        assert_eq!(outcome.failed.len(), 2);
        assert!(outcome
            .failed
            .contains(&("closed".to_string(), DeliveryFailure::ConnectionsClosed(1))));
        assert!(outcome
            .failed
            .contains(&("offline".to_string(), DeliveryFailure::NotConnected)));
        assert!(open_rx.try_recv().is_ok());
    }

    #[test]
    fn broadcast_skips_excluded_user() {
        let rooms = RoomDirectory::new();
        let presence = PresenceRegistry::new();
        let (sender, mut sender_rx) = open_connection();
        let (peer, mut peer_rx) = open_connection();
        presence.register("sender", sender);
        presence.register("peer", peer);
        rooms.join("sender", "r1");
        rooms.join("peer", "r1");

        let outcome = rooms.broadcast(&presence, "r1", &frame(), Some("sender"));

        assert_eq!(outcome.sent, vec!["peer".to_string()]);
        assert!(sender_rx.try_recv().is_err());
        assert!(peer_rx.try_recv().is_ok());
    }
}
