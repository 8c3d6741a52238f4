use rusqlite::{Connection, OptionalExtension};

use crate::db::models::{Contact, ContactStatus, FriendRequest, FriendRequestStatus, User};
use crate::error::ApiError;
use crate::users::store::{user_at, user_columns};

fn request_select() -> String {
    format!(
        "SELECT r.id, r.sender_id, r.receiver_id, r.status, r.created_at, r.updated_at, {}, {}
         FROM friend_requests r
         JOIN users s ON s.id = r.sender_id
         JOIN users v ON v.id = r.receiver_id",
        user_columns("s"),
        user_columns("v")
    )
}

fn parse_column<T: std::str::FromStr<Err = String>>(
    row: &rusqlite::Row<'_>,
    index: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(index)?;
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, e.into())
    })
}

fn request_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FriendRequest> {
    Ok(FriendRequest {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        status: parse_column(row, 3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        sender: user_at(row, 6)?,
        receiver: user_at(row, 12)?,
    })
}

pub fn find_request(conn: &Connection, id: &str) -> Result<Option<FriendRequest>, ApiError> {
    Ok(conn
        .query_row(
            &format!("{} WHERE r.id = ?1", request_select()),
            [id],
            request_from_row,
        )
        .optional()?)
}

pub fn require_request(conn: &Connection, id: &str) -> Result<FriendRequest, ApiError> {
    find_request(conn, id)?.ok_or_else(|| ApiError::NotFound("Friend request".into()))
}

/// A pending request between `a` and `b`, in either direction.
pub fn pending_between(conn: &Connection, a: &str, b: &str) -> Result<Option<String>, ApiError> {
    Ok(conn
        .query_row(
            "SELECT id FROM friend_requests
             WHERE status = 'pending'
               AND ((sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1))",
            [a, b],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn are_friends(conn: &Connection, a: &str, b: &str) -> Result<bool, ApiError> {
    Ok(conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM contacts WHERE owner_id = ?1 AND peer_id = ?2 AND status = 'accepted'
         )",
        [a, b],
        |row| row.get(0),
    )?)
}

/// Write a pending request and the `requested` contact rows for both sides.
pub fn insert_request(
    conn: &mut Connection,
    sender_id: &str,
    receiver_id: &str,
) -> Result<FriendRequest, ApiError> {
    let id = uuid::Uuid::now_v7().to_string();
    let now = crate::db::now();

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO friend_requests (id, sender_id, receiver_id, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, 'pending', ?4, ?4)",
        rusqlite::params![id, sender_id, receiver_id, now],
    )?;
    for (owner, peer) in [(sender_id, receiver_id), (receiver_id, sender_id)] {
        tx.execute(
            "INSERT OR IGNORE INTO contacts (owner_id, peer_id, status, created_at)
             VALUES (?1, ?2, 'requested', ?3)",
            rusqlite::params![owner, peer, now],
        )?;
    }
    tx.commit()?;

    require_request(conn, &id)
}

/// Move a pending request to `accepted` or `rejected` and update the
/// contact pair to match.
pub fn resolve_request(
    conn: &mut Connection,
    request: &FriendRequest,
    status: FriendRequestStatus,
) -> Result<FriendRequest, ApiError> {
    let now = crate::db::now();
    let (a, b) = (request.sender_id.as_str(), request.receiver_id.as_str());

    let tx = conn.transaction()?;
    tx.execute(
        "UPDATE friend_requests SET status = ?2, updated_at = ?3 WHERE id = ?1",
        rusqlite::params![request.id, status.as_str(), now],
    )?;
    match status {
        FriendRequestStatus::Accepted => {
            for (owner, peer) in [(a, b), (b, a)] {
                tx.execute(
                    "INSERT INTO contacts (owner_id, peer_id, status, created_at)
                     VALUES (?1, ?2, 'accepted', ?3)
                     ON CONFLICT (owner_id, peer_id) DO UPDATE SET status = 'accepted'",
                    rusqlite::params![owner, peer, now],
                )?;
            }
        }
        FriendRequestStatus::Rejected | FriendRequestStatus::Pending => {
            drop_requested_contacts(&tx, a, b)?;
        }
    }
    tx.commit()?;

    require_request(conn, &request.id)
}

/// Remove a request and any `requested` contact rows it created.
pub fn delete_request(conn: &mut Connection, request: &FriendRequest) -> Result<(), ApiError> {
    let tx = conn.transaction()?;
    drop_requested_contacts(&tx, &request.sender_id, &request.receiver_id)?;
    tx.execute("DELETE FROM friend_requests WHERE id = ?1", [&request.id])?;
    tx.commit()?;
    Ok(())
}

fn drop_requested_contacts(conn: &Connection, a: &str, b: &str) -> Result<(), ApiError> {
    conn.execute(
        "DELETE FROM contacts
         WHERE status = 'requested'
           AND ((owner_id = ?1 AND peer_id = ?2) OR (owner_id = ?2 AND peer_id = ?1))",
        [a, b],
    )?;
    Ok(())
}

/// Every request `user_id` sent or received, newest first.
pub fn list_requests(conn: &Connection, user_id: &str) -> Result<Vec<FriendRequest>, ApiError> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE r.sender_id = ?1 OR r.receiver_id = ?1
         ORDER BY r.created_at DESC, r.rowid DESC",
        request_select()
    ))?;
    let requests = stmt
        .query_map([user_id], request_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(requests)
}

/// Pending requests waiting on `user_id`, newest first.
pub fn list_pending_received(
    conn: &Connection,
    user_id: &str,
) -> Result<Vec<FriendRequest>, ApiError> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE r.receiver_id = ?1 AND r.status = 'pending'
         ORDER BY r.created_at DESC, r.rowid DESC",
        request_select()
    ))?;
    let requests = stmt
        .query_map([user_id], request_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(requests)
}

/// Contacts owned by `owner_id`, optionally only accepted ones.
pub fn list_contacts(
    conn: &Connection,
    owner_id: &str,
    only: Option<ContactStatus>,
) -> Result<Vec<Contact>, ApiError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT c.status, c.created_at, {}
         FROM contacts c JOIN users u ON u.id = c.peer_id
         WHERE c.owner_id = ?1 AND (?2 IS NULL OR c.status = ?2)
         ORDER BY c.created_at, c.rowid",
        user_columns("u")
    ))?;
    let contacts = stmt
        .query_map(
            rusqlite::params![owner_id, only.map(|s| s.as_str())],
            |row| {
                Ok(Contact {
                    status: parse_column(row, 0)?,
                    created_at: row.get(1)?,
                    peer: user_at(row, 2)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(contacts)
}

pub fn list_friends(conn: &Connection, user_id: &str) -> Result<Vec<User>, ApiError> {
    Ok(list_contacts(conn, user_id, Some(ContactStatus::Accepted))?
        .into_iter()
        .map(|contact| contact.peer)
        .collect())
}
