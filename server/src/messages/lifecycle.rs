//! Message state machine.
//!
//! `created -> delivered_to grows -> read_by grows`, and orthogonally either
//! the one-way tombstone (deleted for everyone) or per-user hiding (deleted
//! for me). Every mutation commits before any live push is attempted; push
//! outcomes never change the result of the operation.

use serde::Deserialize;

use crate::conversations::store::require_membership;
use crate::db::models::{ConversationKind, Message, MessageType, ReceiptKind};
use crate::db::with_conn;
use crate::error::ApiError;
use crate::state::AppState;
use crate::users::store::{find_user, is_blocked_between};
use crate::ws::events::ReceiptPayload;
use crate::ws::fanout::{self, FanoutReport, Receipt};

use super::emoji;
use super::preview::{self, Content};
use super::store::{self, NewMessage};
use super::MessageView;

/// Body shown in place of a message deleted for everyone.
pub const TOMBSTONE_TEXT: &str = "This message was deleted";

pub const DEFAULT_LIMIT: u32 = 50;
pub const MAX_LIMIT: u32 = 100;

/// Byte count or a human string such as "1.5 MB".
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FileSize {
    Bytes(i64),
    Text(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMessage {
    pub conversation_id: String,
    #[serde(default)]
    pub message_type: MessageType,
    pub text: Option<String>,
    /// Explicit emoji; extracted from `text` when absent.
    pub emojis: Option<String>,
    pub media_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<FileSize>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

impl CreateMessage {
    /// Check the content fields and turn them into a storable message.
    fn validate(self, sender_id: &str) -> Result<NewMessage, ApiError> {
        let text = non_blank(self.text);
        let media_url = non_blank(self.media_url);

        let file_size = match self.file_size {
            None => None,
            Some(FileSize::Bytes(n)) if n >= 0 => Some(n),
            Some(FileSize::Bytes(n)) => {
                return Err(ApiError::Validation(format!("invalid file_size '{}'", n)))
            }
            Some(FileSize::Text(raw)) => Some(preview::parse_file_size(&raw)?),
        };

        let has_geo = match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => {
                if !(-90.0..=90.0).contains(&lat) {
                    return Err(ApiError::Validation("latitude out of range".into()));
                }
                if !(-180.0..=180.0).contains(&lon) {
                    return Err(ApiError::Validation("longitude out of range".into()));
                }
                true
            }
            (None, None) => false,
            _ => {
                return Err(ApiError::Validation(
                    "latitude and longitude must be given together".into(),
                ))
            }
        };

        if self.message_type == MessageType::Location && !has_geo {
            return Err(ApiError::Validation(
                "location message requires latitude and longitude".into(),
            ));
        }
        if text.is_none() && media_url.is_none() && !has_geo {
            return Err(ApiError::Validation(
                "message needs text, media_url or a location".into(),
            ));
        }

        let emojis = non_blank(self.emojis).or_else(|| text.as_deref().and_then(emoji::extract));

        Ok(NewMessage {
            conversation_id: self.conversation_id,
            sender_id: sender_id.to_string(),
            message_type: self.message_type,
            body: text,
            emojis,
            media_url,
            file_name: non_blank(self.file_name),
            file_size,
            latitude: self.latitude,
            longitude: self.longitude,
        })
    }
}

fn content(m: &NewMessage) -> Content<'_> {
    Content {
        message_type: m.message_type,
        text: m.body.as_deref(),
        file_name: m.file_name.as_deref(),
        has_geo: m.latitude.is_some() && m.longitude.is_some(),
    }
}

/// Persist a new message, then fan it out.
pub async fn create(
    state: &AppState,
    sender_id: &str,
    request: CreateMessage,
) -> Result<(MessageView, FanoutReport), ApiError> {
    let new = request.validate(sender_id)?;
    let preview_text = preview::conversation_preview(&content(&new));
    let notification_body = preview::notification_body(&content(&new));

    let (conversation, message, title) = with_conn(&state.db, move |conn| {
        let conversation = require_membership(conn, &new.conversation_id, &new.sender_id)?;

        if conversation.kind == ConversationKind::Direct {
            for other in conversation.members.iter().filter(|m| **m != new.sender_id) {
                if is_blocked_between(conn, &new.sender_id, other)? {
                    return Err(ApiError::Forbidden("user is blocked".into()));
                }
            }
        }

        let title = find_user(conn, &new.sender_id)?
            .map(|u| u.label().to_string())
            .unwrap_or_else(|| "Someone".to_string());

        let message = store::insert_message(conn, new, &preview_text)?;
        Ok((conversation, message, title))
    })
    .await?;

    tracing::info!(
        message_id = %message.id,
        conversation_id = %conversation.id,
        sender_id = %message.sender_id,
        message_type = %message.message_type,
        "Message created"
    );

    let view = MessageView::from(&message);
    let report = fanout::fan_out_new_message(
        &state.hub,
        state.push.as_ref(),
        &conversation,
        &view,
        &title,
        &notification_body,
    );

    tracing::debug!(
        message_id = %view.id,
        live = report.live.sent.len(),
        viewing = report.viewing.len(),
        notified = report.notified.len(),
        pushed = report.pushed.len(),
        "Fan-out complete"
    );

    Ok((view, report))
}

/// Result of a receipt write.
#[derive(Debug)]
pub struct ReceiptOutcome {
    pub message: Message,
    /// False when the user was already in the set.
    pub added: bool,
}

async fn mark(
    state: &AppState,
    message_id: &str,
    user_id: &str,
    receipt: Receipt,
) -> Result<ReceiptOutcome, ApiError> {
    let kind = match receipt {
        Receipt::Delivered => ReceiptKind::Delivered,
        Receipt::Read => ReceiptKind::Read,
    };
    let message_id = message_id.to_string();
    let user = user_id.to_string();

    let outcome = with_conn(&state.db, move |conn| {
        let message = store::require_message(conn, &message_id)?;
        require_membership(conn, &message.conversation_id, &user)?;

        let added = store::add_receipt(conn, &message.id, &user, kind)?;
        let message = if added {
            store::require_message(conn, &message.id)?
        } else {
            message
        };
        Ok(ReceiptOutcome { message, added })
    })
    .await?;

    if outcome.added && outcome.message.sender_id != user_id {
        fanout::send_receipt(
            &state.hub,
            &outcome.message.sender_id,
            receipt,
            ReceiptPayload {
                message_id: outcome.message.id.clone(),
                user_id: user_id.to_string(),
                conversation_id: outcome.message.conversation_id.clone(),
                timestamp: crate::db::now(),
            },
        );
    }

    Ok(outcome)
}

/// Idempotently add `user_id` to the message's delivered set.
pub async fn mark_delivered(
    state: &AppState,
    message_id: &str,
    user_id: &str,
) -> Result<ReceiptOutcome, ApiError> {
    mark(state, message_id, user_id, Receipt::Delivered).await
}

/// Idempotently add `user_id` to the message's read set.
pub async fn mark_read(
    state: &AppState,
    message_id: &str,
    user_id: &str,
) -> Result<ReceiptOutcome, ApiError> {
    mark(state, message_id, user_id, Receipt::Read).await
}

/// Tombstone a message for every member. Sender only.
///
/// A second call finds the tombstone already set and changes nothing,
/// including not re-announcing the deletion.
pub async fn delete_for_everyone(
    state: &AppState,
    message_id: &str,
    requester_id: &str,
) -> Result<Message, ApiError> {
    let message_id = message_id.to_string();
    let requester = requester_id.to_string();
    let clear_emojis = state.messages.clear_emojis_on_delete;

    let (message, changed) = with_conn(&state.db, move |conn| {
        let message = store::require_message(conn, &message_id)?;
        if message.sender_id != requester {
            return Err(ApiError::Forbidden(
                "only the sender can delete a message for everyone".into(),
            ));
        }
        let changed = store::tombstone(conn, &message.id, TOMBSTONE_TEXT, clear_emojis)?;
        Ok((store::require_message(conn, &message.id)?, changed))
    })
    .await?;

    if changed {
        tracing::info!(
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            "Message deleted for everyone"
        );
        fanout::fan_out_deleted(&state.hub, &message.conversation_id, &message.id);
    }

    Ok(message)
}

/// Hide a message from `requester_id`'s own history. No broadcast.
pub async fn delete_for_me(
    state: &AppState,
    message_id: &str,
    requester_id: &str,
) -> Result<(), ApiError> {
    let message_id = message_id.to_string();
    let requester = requester_id.to_string();

    with_conn(&state.db, move |conn| {
        let message = store::require_message(conn, &message_id)?;
        require_membership(conn, &message.conversation_id, &requester)?;
        store::add_receipt(conn, &message.id, &requester, ReceiptKind::Deleted)?;
        Ok(())
    })
    .await
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub offset: Option<u32>,
    pub limit: Option<u32>,
    #[serde(default)]
    pub include_deleted: bool,
}

/// A page of history for a member, newest first.
pub async fn list(
    state: &AppState,
    conversation_id: &str,
    requester_id: &str,
    query: ListQuery,
) -> Result<Vec<MessageView>, ApiError> {
    let conversation_id = conversation_id.to_string();
    let requester = requester_id.to_string();
    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let messages = with_conn(&state.db, move |conn| {
        require_membership(conn, &conversation_id, &requester)?;
        store::list_messages(
            conn,
            &conversation_id,
            &requester,
            offset,
            limit,
            query.include_deleted,
        )
    })
    .await?;

    Ok(messages.iter().map(MessageView::from).collect())
}
