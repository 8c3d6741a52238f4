pub mod active_view;
pub mod actor;
pub mod events;
pub mod fanout;
pub mod handler;
pub mod presence;
pub mod protocol;
pub mod rooms;

use axum::extract::ws::Message;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;

pub use active_view::ActiveViewTracker;
pub use events::{ClientEvent, PresenceStatus, ServerEvent};
pub use presence::PresenceRegistry;
pub use rooms::RoomDirectory;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system clone a [`Connection`] to push frames to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One live channel. Frames pushed through it are written to the socket in
/// submission order by the connection's writer task.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    sender: ConnectionSender,
}

impl Connection {
    pub fn new(sender: ConnectionSender) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            sender,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Push a frame. Returns false once the writer task has gone away.
    pub fn push(&self, frame: Message) -> bool {
        self.sender.send(frame).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Why a live push to one identity did not land.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryFailure {
    #[error("no open connection")]
    NotConnected,

    #[error("all {0} connection(s) closed")]
    ConnectionsClosed(usize),
}

/// Per-identity result of a room broadcast.
#[derive(Debug, Default, Clone)]
pub struct BroadcastOutcome {
    pub sent: Vec<String>,
    pub failed: Vec<(String, DeliveryFailure)>,
}

/// Process-local real-time state: who is connected, who is subscribed to
/// which room, and which conversation each user is looking at.
///
/// All three maps are reconstructible; nothing here survives a restart.
#[derive(Debug, Default)]
pub struct Hub {
    pub presence: PresenceRegistry,
    pub rooms: RoomDirectory,
    pub active: ActiveViewTracker,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Announces the user as online to every other
    /// connected identity when this is their first connection.
    pub fn connect(&self, user_id: &str, connection: Connection) -> bool {
        let came_online = self.presence.register(user_id, connection);
        if came_online {
            let lost = self.broadcast_status(user_id, PresenceStatus::Online);
            self.reap(lost);
        }
        came_online
    }

    /// Drop a connection. When it was the user's last one, their active view
    /// and room subscriptions go too and everyone else hears they went offline.
    pub fn disconnect(&self, user_id: &str, connection_id: ConnectionId) -> bool {
        let went_offline = self.presence.unregister(user_id, connection_id);
        if went_offline {
            let lost = self.go_offline(user_id);
            self.reap(lost);
        }
        went_offline
    }

    /// Push an event to every connection of one identity.
    pub fn send_to(&self, user_id: &str, event: &ServerEvent) -> Result<usize, DeliveryFailure> {
        let result = self.presence.send_to(user_id, &event.to_frame());
        if let Err(DeliveryFailure::ConnectionsClosed(_)) = result {
            self.reap([user_id.to_string()]);
        }
        result
    }

    /// Push an event to every current subscriber of a room.
    pub fn broadcast(
        &self,
        room_id: &str,
        event: &ServerEvent,
        exclude: Option<&str>,
    ) -> BroadcastOutcome {
        let outcome = self
            .rooms
            .broadcast(&self.presence, room_id, &event.to_frame(), exclude);
        self.reap(closed_in(&outcome.failed));
        outcome
    }

    /// Run the last-connection cleanup for users whose every connection was
    /// found closed by a push. The presence entry is removed atomically, so
    /// this and the owning task's [`Hub::disconnect`] never both fire.
    fn reap(&self, user_ids: impl IntoIterator<Item = String>) {
        let mut pending: Vec<String> = user_ids.into_iter().collect();
        while let Some(user_id) = pending.pop() {
            if self.presence.remove_if_empty(&user_id) {
                tracing::info!(user_id = %user_id, "All connections closed under a push");
                pending.extend(self.go_offline(&user_id));
            }
        }
    }

    /// Clear what a user held while online and announce them offline.
    /// Returns users found with only closed connections along the way.
    fn go_offline(&self, user_id: &str) -> Vec<String> {
        self.active.clear(user_id, None);
        let left = self.rooms.leave_all(user_id);
        tracing::debug!(
            user_id = %user_id,
            rooms = left.len(),
            "Last connection closed, subscriptions dropped"
        );
        self.broadcast_status(user_id, PresenceStatus::Offline)
    }

    fn broadcast_status(&self, user_id: &str, status: PresenceStatus) -> Vec<String> {
        let frame = ServerEvent::UserStatus {
            user_id: user_id.to_string(),
            status,
        }
        .to_frame();

        let mut lost = Vec::new();
        for other in self.presence.online_users() {
            if other == user_id {
                continue;
            }
            if let Err(failure) = self.presence.send_to(&other, &frame) {
                tracing::debug!(
                    user_id = %other,
                    reason = %failure,
                    "Presence update not delivered"
                );
                if matches!(failure, DeliveryFailure::ConnectionsClosed(_)) {
                    lost.push(other);
                }
            }
        }
        lost
    }
}

fn closed_in(failed: &[(String, DeliveryFailure)]) -> Vec<String> {
    failed
        .iter()
        .filter(|(_, failure)| matches!(failure, DeliveryFailure::ConnectionsClosed(_)))
        .map(|(user_id, _)| user_id.clone())
        .collect()
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn first_connection_announces_online_to_others_only() {
        let hub = Hub::new();
        let (alice, mut alice_rx) = open_connection();
        let (bob, mut bob_rx) = open_connection();

        assert!(hub.connect("alice", alice));
        assert!(hub.connect("bob", bob));

        let to_alice = drain(&mut alice_rx);
        assert_eq!(to_alice.len(), 1);
        assert_eq!(to_alice[0]["type"], "user_status");
        assert_eq!(to_alice[0]["user_id"], "bob");
        assert_eq!(to_alice[0]["status"], "online");
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[test]
    fn second_device_does_not_reannounce() {
        let hub = Hub::new();
        let (watcher, mut watcher_rx) = open_connection();
        hub.connect("watcher", watcher);

        let (phone, _phone_rx) = open_connection();
        let (laptop, _laptop_rx) = open_connection();
        assert!(hub.connect("carol", phone));
        assert!(!hub.connect("carol", laptop));

        assert_eq!(drain(&mut watcher_rx).len(), 1);
    }

    #[test]
    fn last_disconnect_clears_rooms_and_active_view() {
        let hub = Hub::new();
        let (phone, _phone_rx) = open_connection();
        let (laptop, _laptop_rx) = open_connection();
        let phone_id = phone.id();
        let laptop_id = laptop.id();
        hub.connect("dave", phone);
        hub.connect("dave", laptop);
        hub.rooms.join("dave", "c1");
        hub.rooms.join("dave", "c2");
        hub.rooms.join("erin", "c2");
        hub.active.set_active("dave", "c1");

        assert!(!hub.disconnect("dave", phone_id));
        assert!(hub.rooms.contains("c1", "dave"));
        assert!(hub.active.is_active("dave", "c1"));

        assert!(hub.disconnect("dave", laptop_id));
        assert!(!hub.rooms.contains("c1", "dave"));
        assert!(!hub.rooms.contains("c2", "dave"));
        assert!(!hub.rooms.exists("c1"));
        assert!(hub.rooms.contains("c2", "erin"));
        assert_eq!(hub.active.current("dave"), None);
    }

    #[test]
    fn last_disconnect_announces_offline() {
        let hub = Hub::new();
        let (watcher, mut watcher_rx) = open_connection();
        hub.connect("watcher", watcher);
        let (conn, _rx) = open_connection();
        let id = conn.id();
        hub.connect("frank", conn);
        drain(&mut watcher_rx);

        hub.disconnect("frank", id);

        let frames = drain(&mut watcher_rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["user_id"], "frank");
        assert_eq!(frames[0]["status"], "offline");
    }

    #[test]
    fn push_to_dead_connections_runs_offline_cleanup() {
        let hub = Hub::new();
        let (watcher, mut watcher_rx) = open_connection();
        hub.connect("watcher", watcher);
        let (conn, rx) = open_connection();
        let id = conn.id();
        hub.connect("gina", conn);
        hub.rooms.join("gina", "c1");
        hub.rooms.join("watcher", "c1");
        hub.active.set_active("gina", "c1");
        drain(&mut watcher_rx);
        drop(rx);

        let outcome = hub.broadcast("c1", &ServerEvent::error("ping"), Some("watcher"));

        assert_eq!(outcome.failed.len(), 1);
        assert!(!hub.presence.is_online("gina"));
        assert!(!hub.active.is_active("gina", "c1"));
        assert!(!hub.rooms.contains("c1", "gina"));

        let frames = drain(&mut watcher_rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["user_id"], "gina");
        assert_eq!(frames[0]["status"], "offline");

        // The actor's own disconnect afterwards must not announce again.
        assert!(!hub.disconnect("gina", id));
        assert!(drain(&mut watcher_rx).is_empty());
    }

    #[test]
    fn direct_send_to_dead_connections_runs_offline_cleanup() {
        let hub = Hub::new();
        let (conn, rx) = open_connection();
        hub.connect("hank", conn);
        hub.active.set_active("hank", "c9");
        drop(rx);

        assert_eq!(
            hub.send_to("hank", &ServerEvent::error("x")),
            Err(DeliveryFailure::ConnectionsClosed(1))
        );
        assert_eq!(hub.active.current("hank"), None);
        assert_eq!(
            hub.send_to("hank", &ServerEvent::error("x")),
            Err(DeliveryFailure::NotConnected)
        );
    }
}
