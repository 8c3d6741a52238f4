//! REST endpoints for conversation management.
//!
//! Direct conversations are unique per pair of users; asking for one that
//! already exists returns it instead of creating a duplicate.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::auth::middleware::Claims;
use crate::db::models::{Conversation, ConversationKind};
use crate::db::with_conn;
use crate::error::ApiError;
use crate::state::AppState;
use crate::users::store::{blocked_either_way, is_blocked_between, require_user};
use crate::ws::fanout::announce_conversation;

use super::store;

#[derive(Debug, Deserialize)]
pub struct DirectRequest {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct GroupRequest {
    pub title: String,
    #[serde(default)]
    pub member_ids: Vec<String>,
}

/// GET /api/conversations -- Newest activity first; direct conversations
/// with a blocked counterpart are hidden.
pub async fn list_conversations(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let conversations = with_conn(&state.db, move |conn| {
        let blocked = blocked_either_way(conn, &claims.sub)?;
        let all = store::list_for_user(conn, &claims.sub)?;
        Ok(all
            .into_iter()
            .filter(|c| {
                c.kind != ConversationKind::Direct
                    || !c.members.iter().any(|m| blocked.contains(m))
            })
            .collect::<Vec<_>>())
    })
    .await?;

    Ok(Json(conversations))
}

/// POST /api/conversations/direct -- Get or create the direct conversation
/// with another user. 201 when created, 200 when it already existed.
pub async fn get_or_create_direct(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<DirectRequest>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    if body.user_id == claims.sub {
        return Err(ApiError::Validation(
            "cannot start a conversation with yourself".into(),
        ));
    }

    let requester = claims.sub.clone();
    let other = body.user_id;
    let (conversation, created) = with_conn(&state.db, move |conn| {
        require_user(conn, &other)?;
        if is_blocked_between(conn, &requester, &other)? {
            return Err(ApiError::Forbidden("user is blocked".into()));
        }

        store::get_or_create_direct(conn, &requester, &other)
    })
    .await?;

    if !created {
        return Ok((StatusCode::OK, Json(conversation)));
    }

    tracing::info!(conversation_id = %conversation.id, "Direct conversation created");
    announce_conversation(&state.hub, &conversation);
    Ok((StatusCode::CREATED, Json(conversation)))
}

/// POST /api/conversations/group -- The requester becomes an admin.
pub async fn create_group(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<GroupRequest>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let title = body.title.trim().to_string();
    if title.is_empty() {
        return Err(ApiError::Validation("group title must not be empty".into()));
    }

    let mut members = vec![claims.sub.clone()];
    for id in body.member_ids {
        if !members.contains(&id) {
            members.push(id);
        }
    }
    let admins = vec![claims.sub.clone()];

    let conversation = with_conn(&state.db, move |conn| {
        for member in &members {
            require_user(conn, member)?;
        }
        store::insert_conversation(
            conn,
            ConversationKind::Group,
            Some(title.as_str()),
            &members,
            &admins,
        )
    })
    .await?;

    tracing::info!(
        conversation_id = %conversation.id,
        members = conversation.members.len(),
        "Group conversation created"
    );
    announce_conversation(&state.hub, &conversation);
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn set_muted(
    state: &AppState,
    conversation_id: String,
    user_id: String,
    muted: bool,
) -> Result<Conversation, ApiError> {
    with_conn(&state.db, move |conn| {
        store::require_membership(conn, &conversation_id, &user_id)?;
        store::set_muted(conn, &conversation_id, &user_id, muted)?;
        store::require_conversation(conn, &conversation_id)
    })
    .await
}

/// POST /api/conversations/{id}/mute -- Stop secondary notifications. Idempotent.
pub async fn mute(
    State(state): State<AppState>,
    claims: Claims,
    Path(conversation_id): Path<String>,
) -> Result<Json<Conversation>, ApiError> {
    Ok(Json(set_muted(&state, conversation_id, claims.sub, true).await?))
}

/// POST /api/conversations/{id}/unmute -- Idempotent.
pub async fn unmute(
    State(state): State<AppState>,
    claims: Claims,
    Path(conversation_id): Path<String>,
) -> Result<Json<Conversation>, ApiError> {
    Ok(Json(set_muted(&state, conversation_id, claims.sub, false).await?))
}
