use rusqlite::{Connection, OptionalExtension};

use crate::db::models::User;
use crate::error::ApiError;

/// Maximum rows returned by [`search_users`].
pub const SEARCH_LIMIT: u32 = 20;

const USER_COLUMNS: &str = "id, username, display_name, avatar_url, discoverable, created_at";

/// [`USER_COLUMNS`] qualified with a table alias, for joins.
pub(crate) fn user_columns(alias: &str) -> String {
    USER_COLUMNS
        .split(", ")
        .map(|column| format!("{}.{}", alias, column))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Read a user whose columns start at index `base`.
pub(crate) fn user_at(row: &rusqlite::Row<'_>, base: usize) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(base)?,
        username: row.get(base + 1)?,
        display_name: row.get(base + 2)?,
        avatar_url: row.get(base + 3)?,
        discoverable: row.get(base + 4)?,
        created_at: row.get(base + 5)?,
    })
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    user_at(row, 0)
}

pub fn find_user(conn: &Connection, user_id: &str) -> Result<Option<User>, ApiError> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            [user_id],
            user_from_row,
        )
        .optional()?)
}

pub fn require_user(conn: &Connection, user_id: &str) -> Result<User, ApiError> {
    find_user(conn, user_id)?.ok_or_else(|| ApiError::NotFound("User".into()))
}

/// User plus bcrypt hash, for login.
pub fn find_credentials(
    conn: &Connection,
    username: &str,
) -> Result<Option<(User, String)>, ApiError> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {}, password_hash FROM users WHERE username = ?1",
                USER_COLUMNS
            ),
            [username],
            |row| Ok((user_from_row(row)?, row.get::<_, String>(6)?)),
        )
        .optional()?)
}

pub fn insert_user(
    conn: &Connection,
    username: &str,
    password_hash: &str,
    display_name: Option<&str>,
) -> Result<User, ApiError> {
    let taken: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
        [username],
        |row| row.get(0),
    )?;
    if taken {
        return Err(ApiError::Conflict("username already taken".into()));
    }

    let user = User {
        id: uuid::Uuid::now_v7().to_string(),
        username: username.to_string(),
        display_name: display_name.map(str::to_string),
        avatar_url: None,
        discoverable: true,
        created_at: crate::db::now(),
    };
    conn.execute(
        "INSERT INTO users (id, username, password_hash, display_name, avatar_url, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            user.id,
            user.username,
            password_hash,
            user.display_name,
            user.avatar_url,
            user.created_at,
        ],
    )?;
    Ok(user)
}

/// Fields a user may change on their own profile. `None` leaves a field alone;
/// an empty string clears `display_name` or `avatar_url`.
#[derive(Debug, Default, Clone, serde::Deserialize)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub discoverable: Option<bool>,
}

pub fn update_profile(
    conn: &Connection,
    user_id: &str,
    update: &ProfileUpdate,
) -> Result<User, ApiError> {
    let blank_to_null = |v: &Option<String>| {
        v.as_deref()
            .map(str::trim)
            .map(|s| if s.is_empty() { None } else { Some(s.to_string()) })
    };
    let display_name = blank_to_null(&update.display_name);
    let avatar_url = blank_to_null(&update.avatar_url);

    let changed = conn.execute(
        "UPDATE users SET
             display_name = CASE WHEN ?2 THEN ?3 ELSE display_name END,
             avatar_url = CASE WHEN ?4 THEN ?5 ELSE avatar_url END,
             discoverable = COALESCE(?6, discoverable)
         WHERE id = ?1",
        rusqlite::params![
            user_id,
            display_name.is_some(),
            display_name.flatten(),
            avatar_url.is_some(),
            avatar_url.flatten(),
            update.discoverable,
        ],
    )?;
    if changed == 0 {
        return Err(ApiError::NotFound("User".into()));
    }
    require_user(conn, user_id)
}

/// Discoverable users other than `requester` whose username or display name
/// contains `query`, case-insensitively.
pub fn search_users(conn: &Connection, requester: &str, query: &str) -> Result<Vec<User>, ApiError> {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    let pattern = format!("%{}%", escaped);

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM users
         WHERE id != ?1 AND discoverable
           AND (username LIKE ?2 ESCAPE '\\' OR display_name LIKE ?2 ESCAPE '\\')
         ORDER BY username
         LIMIT ?3",
        USER_COLUMNS
    ))?;
    let users = stmt
        .query_map(rusqlite::params![requester, pattern, SEARCH_LIMIT], user_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

/// Returns true if a new block row was written.
pub fn block(conn: &Connection, blocker_id: &str, blocked_id: &str) -> Result<bool, ApiError> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO blocked_users (blocker_id, blocked_id, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![blocker_id, blocked_id, crate::db::now()],
    )?;
    Ok(changed > 0)
}

pub fn unblock(conn: &Connection, blocker_id: &str, blocked_id: &str) -> Result<bool, ApiError> {
    let changed = conn.execute(
        "DELETE FROM blocked_users WHERE blocker_id = ?1 AND blocked_id = ?2",
        [blocker_id, blocked_id],
    )?;
    Ok(changed > 0)
}

pub fn list_blocked(conn: &Connection, blocker_id: &str) -> Result<Vec<User>, ApiError> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.username, u.display_name, u.avatar_url, u.discoverable, u.created_at
         FROM blocked_users b JOIN users u ON u.id = b.blocked_id
         WHERE b.blocker_id = ?1
         ORDER BY b.created_at",
    )?;
    let users = stmt
        .query_map([blocker_id], user_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

/// True if either user has blocked the other.
pub fn is_blocked_between(conn: &Connection, a: &str, b: &str) -> Result<bool, ApiError> {
    Ok(conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM blocked_users
             WHERE (blocker_id = ?1 AND blocked_id = ?2) OR (blocker_id = ?2 AND blocked_id = ?1)
         )",
        [a, b],
        |row| row.get(0),
    )?)
}

/// Everyone `user_id` blocked or was blocked by.
pub fn blocked_either_way(conn: &Connection, user_id: &str) -> Result<Vec<String>, ApiError> {
    let mut stmt = conn.prepare(
        "SELECT blocked_id FROM blocked_users WHERE blocker_id = ?1
         UNION
         SELECT blocker_id FROM blocked_users WHERE blocked_id = ?1",
    )?;
    let ids = stmt
        .query_map([user_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}
