//! JSON frames exchanged on the live channel. The `type` field selects the variant.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

use crate::db::models::{Conversation, FriendRequestStatus};
use crate::messages::MessageView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Client -> server.
///
/// Every field is optional at the wire level so a frame missing one gets an
/// error reply naming it instead of a generic parse failure.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom {
        room_id: Option<String>,
    },
    LeaveRoom {
        room_id: Option<String>,
    },
    SetActiveConversation {
        conversation_id: Option<String>,
    },
    /// Acknowledged only; messages are created through `POST /api/messages`.
    Message {
        id: Option<String>,
        message_id: Option<String>,
    },
    Typing {
        conversation_id: Option<String>,
        #[serde(default = "default_is_typing")]
        is_typing: bool,
    },
    ReadReceipt {
        message_id: Option<String>,
    },
    DeliveryReceipt {
        message_id: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

fn default_is_typing() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct ReceiptPayload {
    pub message_id: String,
    pub user_id: String,
    pub conversation_id: String,
    pub timestamp: String,
}

/// Server -> client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    UserStatus {
        user_id: String,
        status: PresenceStatus,
    },
    Message(MessageView),
    Notification {
        title: String,
        body: String,
        conversation_id: String,
        message_id: String,
        sender_id: String,
    },
    MessageDeleted {
        message_id: String,
        conversation_id: String,
        deleted_for_everyone: bool,
    },
    ReadReceipt(ReceiptPayload),
    DeliveryReceipt(ReceiptPayload),
    Typing {
        user_id: String,
        conversation_id: String,
        is_typing: bool,
    },
    ConversationCreated {
        conversation: Conversation,
    },
    FriendRequest {
        request_id: String,
        sender_id: String,
        sender_username: String,
        sender_display_name: Option<String>,
        sender_avatar_url: Option<String>,
        status: FriendRequestStatus,
        created_at: String,
    },
    FriendRequestAccepted {
        request_id: String,
        accepter_id: String,
        accepter_username: String,
        accepter_display_name: Option<String>,
        accepter_avatar_url: Option<String>,
        conversation_id: String,
    },
    FriendRequestRejected {
        request_id: String,
        rejecter_id: String,
    },
    RoomJoined {
        room_id: String,
    },
    RoomLeft {
        room_id: String,
    },
    ActiveConversationSet {
        conversation_id: String,
    },
    MessageSent {
        message_id: Option<String>,
        status: &'static str,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    /// Encode as a text frame. Serialization of these types cannot fail in
    /// practice; if it ever does the frame degrades to an error event.
    pub fn to_frame(&self) -> Message {
        match serde_json::to_string(self) {
            Ok(json) => Message::Text(json.into()),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode server event");
                Message::Text(r#"{"type":"error","message":"encoding failed"}"#.into())
            }
        }
    }
}
