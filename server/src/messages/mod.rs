//! Messages: creation, receipts, deletion and history.

pub mod emoji;
pub mod lifecycle;
pub mod preview;
pub mod routes;
pub mod store;

use serde::Serialize;

use crate::db::models::{Message, MessageType};

/// A message as clients see it, in REST responses and live `message` frames.
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub text: Option<String>,
    pub emojis: Option<String>,
    pub message_type: MessageType,
    pub media_url: Option<String>,
    pub file_name: Option<String>,
    /// Human-readable, e.g. "1.5 MB".
    pub file_size: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub created_at: String,
    pub delivered_to: Vec<String>,
    pub read_by: Vec<String>,
    pub deleted_for_everyone: Option<String>,
}

impl From<&Message> for MessageView {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id.clone(),
            conversation_id: m.conversation_id.clone(),
            sender_id: m.sender_id.clone(),
            text: m.body.clone(),
            emojis: m.emojis.clone(),
            message_type: m.message_type,
            media_url: m.media_url.clone(),
            file_name: m.file_name.clone(),
            file_size: m.file_size.map(preview::format_file_size),
            latitude: m.latitude,
            longitude: m.longitude,
            created_at: m.created_at.clone(),
            delivered_to: m.delivered_to.clone(),
            read_by: m.read_by.clone(),
            deleted_for_everyone: m.deleted_for_everyone.clone(),
        }
    }
}
