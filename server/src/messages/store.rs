use rusqlite::{Connection, OptionalExtension};

use crate::db::models::{Message, MessageType, ReceiptKind};
use crate::error::ApiError;

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, message_type, body, emojis, \
     media_url, file_name, file_size, latitude, longitude, deleted_for_everyone, \
     created_at, updated_at";

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let message_type: String = row.get(3)?;
    let message_type: MessageType = message_type.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        message_type,
        body: row.get(4)?,
        emojis: row.get(5)?,
        media_url: row.get(6)?,
        file_name: row.get(7)?,
        file_size: row.get(8)?,
        latitude: row.get(9)?,
        longitude: row.get(10)?,
        deleted_for_everyone: row.get(11)?,
        delivered_to: Vec::new(),
        read_by: Vec::new(),
        deleted_for: Vec::new(),
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn load_receipts(conn: &Connection, message: &mut Message) -> Result<(), ApiError> {
    let mut stmt = conn.prepare_cached(
        "SELECT user_id, kind FROM message_receipts
         WHERE message_id = ?1 ORDER BY created_at, rowid",
    )?;
    let rows = stmt
        .query_map([&message.id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (user_id, kind) in rows {
        match kind.as_str() {
            "delivered" => message.delivered_to.push(user_id),
            "read" => message.read_by.push(user_id),
            "deleted" => message.deleted_for.push(user_id),
            _ => {}
        }
    }
    Ok(())
}

pub fn find_message(conn: &Connection, id: &str) -> Result<Option<Message>, ApiError> {
    let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
    let message = conn.query_row(&sql, [id], message_from_row).optional()?;

    match message {
        Some(mut message) => {
            load_receipts(conn, &mut message)?;
            Ok(Some(message))
        }
        None => Ok(None),
    }
}

pub fn require_message(conn: &Connection, id: &str) -> Result<Message, ApiError> {
    find_message(conn, id)?.ok_or_else(|| ApiError::NotFound("Message".into()))
}

/// Validated fields of a message about to be stored.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: String,
    pub sender_id: String,
    pub message_type: MessageType,
    pub body: Option<String>,
    pub emojis: Option<String>,
    pub media_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Insert a message and overwrite the conversation preview in one transaction.
pub fn insert_message(
    conn: &mut Connection,
    new: NewMessage,
    preview: &str,
) -> Result<Message, ApiError> {
    let id = uuid::Uuid::now_v7().to_string();
    let now = crate::db::now();

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, message_type, body, emojis,
                               media_url, file_name, file_size, latitude, longitude,
                               created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
        rusqlite::params![
            id,
            new.conversation_id,
            new.sender_id,
            new.message_type.as_str(),
            new.body,
            new.emojis,
            new.media_url,
            new.file_name,
            new.file_size,
            new.latitude,
            new.longitude,
            now,
        ],
    )?;
    crate::conversations::store::update_preview(&tx, &new.conversation_id, preview, &now)?;
    tx.commit()?;

    Ok(Message {
        id,
        conversation_id: new.conversation_id,
        sender_id: new.sender_id,
        message_type: new.message_type,
        body: new.body,
        emojis: new.emojis,
        media_url: new.media_url,
        file_name: new.file_name,
        file_size: new.file_size,
        latitude: new.latitude,
        longitude: new.longitude,
        deleted_for_everyone: None,
        delivered_to: Vec::new(),
        read_by: Vec::new(),
        deleted_for: Vec::new(),
        created_at: now.clone(),
        updated_at: now,
    })
}

/// Append to one of the recipient sets. Returns false if already present.
pub fn add_receipt(
    conn: &Connection,
    message_id: &str,
    user_id: &str,
    kind: ReceiptKind,
) -> Result<bool, ApiError> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO message_receipts (message_id, user_id, kind, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![message_id, user_id, kind.as_str(), crate::db::now()],
    )?;
    Ok(changed > 0)
}

/// One-way tombstone: body and media are wiped. Returns false if the message
/// was already tombstoned.
pub fn tombstone(
    conn: &Connection,
    message_id: &str,
    replacement: &str,
    clear_emojis: bool,
) -> Result<bool, ApiError> {
    let changed = conn.execute(
        "UPDATE messages
         SET deleted_for_everyone = ?2,
             body = NULL,
             media_url = NULL,
             file_name = NULL,
             file_size = NULL,
             latitude = NULL,
             longitude = NULL,
             emojis = CASE WHEN ?3 THEN NULL ELSE emojis END,
             updated_at = ?4
         WHERE id = ?1 AND deleted_for_everyone IS NULL",
        rusqlite::params![message_id, replacement, clear_emojis, crate::db::now()],
    )?;
    Ok(changed > 0)
}

/// A page of a conversation's messages as `requester` sees them, newest first.
///
/// Messages the requester deleted for themselves are always excluded, and
/// tombstones unless `include_deleted`. Filtering happens before paging.
pub fn list_messages(
    conn: &Connection,
    conversation_id: &str,
    requester: &str,
    offset: u32,
    limit: u32,
    include_deleted: bool,
) -> Result<Vec<Message>, ApiError> {
    let sql = format!(
        "SELECT {} FROM messages m
         WHERE m.conversation_id = ?1
           AND NOT EXISTS (SELECT 1 FROM message_receipts r
                           WHERE r.message_id = m.id AND r.user_id = ?2 AND r.kind = 'deleted')
           AND (?3 OR m.deleted_for_everyone IS NULL)
         ORDER BY m.created_at DESC, m.rowid DESC
         LIMIT ?4 OFFSET ?5",
        MESSAGE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut messages = stmt
        .query_map(
            rusqlite::params![conversation_id, requester, include_deleted, limit, offset],
            message_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    for message in &mut messages {
        load_receipts(conn, message)?;
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::store::insert_conversation;
    use crate::db::init_memory_db;
    use crate::db::models::ConversationKind;
    use crate::users::store::test_support::seed_user;

    #[test]
    fn unknown_stored_type_is_an_error_not_text() {
        let db = init_memory_db().unwrap();
        let mut conn = db.lock().unwrap();
        let a = seed_user(&conn, "a");
        let b = seed_user(&conn, "b");
        let conv = insert_conversation(
            &mut conn,
            ConversationKind::Direct,
            None,
            &[a.id.clone(), b.id.clone()],
            &[],
        )
        .unwrap();

        conn.execute(
            "INSERT INTO messages (id, conversation_id, sender_id, message_type, body,
                                   created_at, updated_at)
             VALUES ('m1', ?1, ?2, 'hologram', 'hi', '2024-01-01T00:00:00Z',
                     '2024-01-01T00:00:00Z')",
            rusqlite::params![conv.id, a.id],
        )
        .unwrap();

        assert!(matches!(
            find_message(&conn, "m1"),
            Err(ApiError::Internal(_))
        ));
        assert!(list_messages(&conn, &conv.id, &b.id, 0, 50, false).is_err());
    }
}
