use crate::conversations::store::require_membership;
use crate::db::with_conn;
use crate::error::ApiError;
use crate::messages::lifecycle;
use crate::state::AppState;

use super::{ClientEvent, Connection, ServerEvent};

/// Handle one incoming text frame.
///
/// Replies (acks and errors) go to the originating connection only. Nothing
/// here ends the connection: a bad frame costs an error reply and the loop
/// moves on.
pub async fn handle_text_message(text: &str, conn: &Connection, state: &AppState, user_id: &str) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(user_id = %user_id, error = %e, "Malformed frame");
            reply(conn, ServerEvent::error(format!("Malformed frame: {}", e)));
            return;
        }
    };

    if let Err(message) = dispatch(event, conn, state, user_id).await {
        reply(conn, ServerEvent::error(message));
    }
}

fn reply(conn: &Connection, event: ServerEvent) {
    conn.push(event.to_frame());
}

fn required(field: Option<String>, name: &str) -> Result<String, String> {
    field
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("{} is required", name))
}

fn describe(err: ApiError) -> String {
    match err {
        ApiError::Internal(_) => "Internal server error".to_string(),
        other => other.to_string(),
    }
}

async fn dispatch(
    event: ClientEvent,
    conn: &Connection,
    state: &AppState,
    user_id: &str,
) -> Result<(), String> {
    match event {
        ClientEvent::JoinRoom { room_id } => {
            let room_id = required(room_id, "room_id")?;

            // Rooms mirror conversations: only persisted members may subscribe.
            let (room, user) = (room_id.clone(), user_id.to_string());
            with_conn(&state.db, move |db| {
                require_membership(db, &room, &user).map(|_| ())
            })
            .await
            .map_err(describe)?;

            state.hub.rooms.join(user_id, &room_id);
            tracing::debug!(user_id = %user_id, room_id = %room_id, "Joined room");
            reply(conn, ServerEvent::RoomJoined { room_id });
        }
        ClientEvent::LeaveRoom { room_id } => {
            let room_id = required(room_id, "room_id")?;
            state.hub.rooms.leave(user_id, &room_id);
            state.hub.active.clear(user_id, Some(&room_id));
            reply(conn, ServerEvent::RoomLeft { room_id });
        }
        ClientEvent::SetActiveConversation { conversation_id } => {
            let conversation_id = required(conversation_id, "conversation_id")?;
            state.hub.active.set_active(user_id, &conversation_id);
            reply(conn, ServerEvent::ActiveConversationSet { conversation_id });
        }
        ClientEvent::Message { id, message_id } => {
            // Creation goes through POST /api/messages; this only acknowledges.
            reply(
                conn,
                ServerEvent::MessageSent {
                    message_id: id.or(message_id),
                    status: "sent",
                },
            );
        }
        ClientEvent::Typing {
            conversation_id,
            is_typing,
        } => {
            let conversation_id = required(conversation_id, "conversation_id")?;
            if !state.hub.rooms.contains(&conversation_id, user_id) {
                return Err("Join the room before sending typing events".to_string());
            }
            state.hub.broadcast(
                &conversation_id,
                &ServerEvent::Typing {
                    user_id: user_id.to_string(),
                    conversation_id: conversation_id.clone(),
                    is_typing,
                },
                Some(user_id),
            );
        }
        ClientEvent::ReadReceipt { message_id } => {
            let message_id = required(message_id, "message_id")?;
            lifecycle::mark_read(state, &message_id, user_id)
                .await
                .map_err(describe)?;
        }
        ClientEvent::DeliveryReceipt { message_id } => {
            let message_id = required(message_id, "message_id")?;
            lifecycle::mark_delivered(state, &message_id, user_id)
                .await
                .map_err(describe)?;
        }
        ClientEvent::Unknown => {
            tracing::debug!(user_id = %user_id, "Ignoring unknown event type");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::conversations::store::insert_conversation;
    use crate::db::init_memory_db;
    use crate::db::models::ConversationKind;
    use crate::users::store::test_support::seed_user;
    use crate::ws::test_support::{drain, open_connection, types};

    fn setup() -> (AppState, String, String, String) {
        let state = AppState::new(init_memory_db().unwrap(), b"k".to_vec(), &Config::default());
        let (a, b, conv) = {
            let mut db = state.db.lock().unwrap();
            let a = seed_user(&db, "a");
            let b = seed_user(&db, "b");
            let conv = insert_conversation(
                &mut db,
                ConversationKind::Direct,
                None,
                &[a.id.clone(), b.id.clone()],
                &[],
            )
            .unwrap();
            (a.id, b.id, conv.id)
        };
        (state, a, b, conv)
    }

    #[tokio::test]
    async fn join_then_leave_acks_and_clears_view() {
        let (state, a, _b, conv) = setup();
        let (conn, mut rx) = open_connection();

        let join = format!(r#"{{"type":"join_room","room_id":"{}"}}"#, conv);
        handle_text_message(&join, &conn, &state, &a).await;
        assert!(state.hub.rooms.contains(&conv, &a));

        let active = format!(r#"{{"type":"set_active_conversation","conversation_id":"{}"}}"#, conv);
        handle_text_message(&active, &conn, &state, &a).await;
        assert!(state.hub.active.is_active(&a, &conv));

        let leave = format!(r#"{{"type":"leave_room","room_id":"{}"}}"#, conv);
        handle_text_message(&leave, &conn, &state, &a).await;
        assert!(!state.hub.rooms.contains(&conv, &a));
        assert!(!state.hub.active.is_active(&a, &conv));

        assert_eq!(
            types(&drain(&mut rx)),
            vec!["room_joined", "active_conversation_set", "room_left"]
        );
    }

    #[tokio::test]
    async fn non_member_cannot_join() {
        let (state, _a, _b, conv) = setup();
        let outsider = {
            let db = state.db.lock().unwrap();
            seed_user(&db, "outsider").id
        };
        let (conn, mut rx) = open_connection();

        let join = format!(r#"{{"type":"join_room","room_id":"{}"}}"#, conv);
        handle_text_message(&join, &conn, &state, &outsider).await;

        assert!(!state.hub.rooms.contains(&conv, &outsider));
        assert_eq!(types(&drain(&mut rx)), vec!["error"]);
    }

    #[tokio::test]
    async fn message_frame_is_ack_only() {
        let (state, a, _b, _conv) = setup();
        let (conn, mut rx) = open_connection();

        handle_text_message(r#"{"type":"message","message_id":"m-9"}"#, &conn, &state, &a).await;

        let frames = drain(&mut rx);
        assert_eq!(frames[0]["type"], "message_sent");
        assert_eq!(frames[0]["message_id"], "m-9");
        assert_eq!(frames[0]["status"], "sent");
    }

    #[tokio::test]
    async fn typing_is_rebroadcast_to_others_in_room() {
        let (state, a, b, conv) = setup();
        let (a_conn, mut a_rx) = open_connection();
        let (b_conn, mut b_rx) = open_connection();
        state.hub.presence.register(&a, a_conn.clone());
        state.hub.presence.register(&b, b_conn);
        state.hub.rooms.join(&a, &conv);
        state.hub.rooms.join(&b, &conv);

        let typing = format!(r#"{{"type":"typing","conversation_id":"{}"}}"#, conv);
        handle_text_message(&typing, &a_conn, &state, &a).await;

        assert!(drain(&mut a_rx).is_empty());
        let frames = drain(&mut b_rx);
        assert_eq!(frames[0]["type"], "typing");
        assert_eq!(frames[0]["is_typing"], true);
        assert_eq!(frames[0]["user_id"], a.as_str());
    }

    #[tokio::test]
    async fn bad_frames_get_error_replies() {
        let (state, a, _b, _conv) = setup();
        let (conn, mut rx) = open_connection();

        handle_text_message("not json", &conn, &state, &a).await;
        handle_text_message(r#"{"type":"join_room"}"#, &conn, &state, &a).await;
        handle_text_message(r#"{"type":"read_receipt","message_id":"nope"}"#, &conn, &state, &a)
            .await;
        handle_text_message(r#"{"type":"something_new"}"#, &conn, &state, &a).await;

        let frames = drain(&mut rx);
        assert_eq!(types(&frames), vec!["error", "error", "error"]);
        assert_eq!(frames[1]["message"], "room_id is required");
    }
}
