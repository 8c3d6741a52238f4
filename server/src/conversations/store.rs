use rusqlite::{Connection, OptionalExtension};

use crate::db::models::{Conversation, ConversationKind};
use crate::error::ApiError;

/// Load a conversation with its member, admin and muted-by sets.
pub fn load_conversation(conn: &Connection, id: &str) -> Result<Option<Conversation>, ApiError> {
    let row = conn
        .query_row(
            "SELECT id, kind, title, last_message, last_message_at, created_at
             FROM conversations WHERE id = ?1",
            [id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?;

    let Some((id, kind, title, last_message, last_message_at, created_at)) = row else {
        return Ok(None);
    };
    let kind: ConversationKind = kind.parse().map_err(ApiError::Internal)?;

    let mut stmt = conn.prepare(
        "SELECT user_id, is_admin, muted FROM conversation_members
         WHERE conversation_id = ?1 ORDER BY joined_at, rowid",
    )?;
    let rows = stmt
        .query_map([&id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, bool>(1)?,
                row.get::<_, bool>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut conversation = Conversation {
        id,
        kind,
        title,
        members: Vec::with_capacity(rows.len()),
        admins: Vec::new(),
        muted_by: Vec::new(),
        last_message,
        last_message_at,
        created_at,
    };
    for (user_id, is_admin, muted) in rows {
        if is_admin {
            conversation.admins.push(user_id.clone());
        }
        if muted {
            conversation.muted_by.push(user_id.clone());
        }
        conversation.members.push(user_id);
    }

    Ok(Some(conversation))
}

pub fn require_conversation(conn: &Connection, id: &str) -> Result<Conversation, ApiError> {
    load_conversation(conn, id)?.ok_or_else(|| ApiError::NotFound("Conversation".into()))
}

/// Load a conversation and check `user_id` is a persisted member.
pub fn require_membership(
    conn: &Connection,
    id: &str,
    user_id: &str,
) -> Result<Conversation, ApiError> {
    let conversation = require_conversation(conn, id)?;
    if !conversation.has_member(user_id) {
        return Err(ApiError::Forbidden("not a member of this conversation".into()));
    }
    Ok(conversation)
}

/// The direct conversation between two users, if one exists.
pub fn find_direct(conn: &Connection, a: &str, b: &str) -> Result<Option<String>, ApiError> {
    Ok(conn
        .query_row(
            "SELECT c.id FROM conversations c
             WHERE c.kind = 'direct'
               AND EXISTS (SELECT 1 FROM conversation_members m
                           WHERE m.conversation_id = c.id AND m.user_id = ?1)
               AND EXISTS (SELECT 1 FROM conversation_members m
                           WHERE m.conversation_id = c.id AND m.user_id = ?2)
             ORDER BY c.created_at
             LIMIT 1",
            [a, b],
            |row| row.get(0),
        )
        .optional()?)
}

/// Create a conversation and its member rows in one transaction.
pub fn insert_conversation(
    conn: &mut Connection,
    kind: ConversationKind,
    title: Option<&str>,
    members: &[String],
    admins: &[String],
) -> Result<Conversation, ApiError> {
    let id = uuid::Uuid::now_v7().to_string();
    let now = crate::db::now();

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO conversations (id, kind, title, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![id, kind.as_str(), title, now],
    )?;
    for member in members {
        tx.execute(
            "INSERT OR IGNORE INTO conversation_members (conversation_id, user_id, is_admin, joined_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![id, member, admins.contains(member), now],
        )?;
    }
    tx.commit()?;

    require_conversation(conn, &id)
}

/// The direct conversation between `a` and `b`, created if missing.
/// Returns it and whether it was created.
pub fn get_or_create_direct(
    conn: &mut Connection,
    a: &str,
    b: &str,
) -> Result<(Conversation, bool), ApiError> {
    if let Some(id) = find_direct(conn, a, b)? {
        return Ok((require_conversation(conn, &id)?, false));
    }
    let members = [a.to_string(), b.to_string()];
    let conversation = insert_conversation(conn, ConversationKind::Direct, None, &members, &[])?;
    Ok((conversation, true))
}

/// Conversations `user_id` belongs to, most recently active first and
/// never-messaged ones last.
pub fn list_for_user(conn: &Connection, user_id: &str) -> Result<Vec<Conversation>, ApiError> {
    let mut stmt = conn.prepare(
        "SELECT c.id FROM conversations c
         JOIN conversation_members m ON m.conversation_id = c.id
         WHERE m.user_id = ?1
         ORDER BY c.last_message_at IS NULL, c.last_message_at DESC, c.created_at DESC",
    )?;
    let ids = stmt
        .query_map([user_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut conversations = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(conversation) = load_conversation(conn, &id)? {
            conversations.push(conversation);
        }
    }
    Ok(conversations)
}

/// Returns true if the flag changed.
pub fn set_muted(
    conn: &Connection,
    conversation_id: &str,
    user_id: &str,
    muted: bool,
) -> Result<bool, ApiError> {
    let changed = conn.execute(
        "UPDATE conversation_members SET muted = ?3
         WHERE conversation_id = ?1 AND user_id = ?2 AND muted != ?3",
        rusqlite::params![conversation_id, user_id, muted],
    )?;
    Ok(changed > 0)
}

/// Overwrite the denormalized preview and its timestamp.
pub fn update_preview(
    conn: &Connection,
    conversation_id: &str,
    preview: &str,
    at: &str,
) -> Result<(), ApiError> {
    conn.execute(
        "UPDATE conversations SET last_message = ?2, last_message_at = ?3 WHERE id = ?1",
        rusqlite::params![conversation_id, preview, at],
    )?;
    Ok(())
}
