use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::auth::middleware::Claims;
use crate::db::models::User;
use crate::db::with_conn;
use crate::error::ApiError;
use crate::state::AppState;

use super::store::{self, ProfileUpdate};

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

/// GET /api/users/me
pub async fn me(State(state): State<AppState>, claims: Claims) -> Result<Json<User>, ApiError> {
    let user = with_conn(&state.db, move |conn| store::require_user(conn, &claims.sub)).await?;
    Ok(Json(user))
}

/// PUT /api/users/me -- Partial update of the caller's own profile.
pub async fn update_me(
    State(state): State<AppState>,
    claims: Claims,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<User>, ApiError> {
    let user_id = claims.sub.clone();
    let user =
        with_conn(&state.db, move |conn| store::update_profile(conn, &user_id, &update)).await?;

    tracing::info!(user_id = %claims.sub, "Profile updated");
    Ok(Json(user))
}

/// GET /api/users/search?q= -- Discoverable users by username or display name.
pub async fn search(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<User>>, ApiError> {
    let needle = query.q.trim().to_string();
    if needle.is_empty() {
        return Err(ApiError::Validation("search query must not be empty".into()));
    }

    let users =
        with_conn(&state.db, move |conn| store::search_users(conn, &claims.sub, &needle)).await?;
    Ok(Json(users))
}

/// GET /api/users/{id}
pub async fn profile(
    State(state): State<AppState>,
    _claims: Claims,
    Path(user_id): Path<String>,
) -> Result<Json<User>, ApiError> {
    let user = with_conn(&state.db, move |conn| store::require_user(conn, &user_id)).await?;
    Ok(Json(user))
}

/// GET /api/users/blocked
pub async fn list_blocked(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<User>>, ApiError> {
    let users = with_conn(&state.db, move |conn| store::list_blocked(conn, &claims.sub)).await?;
    Ok(Json(users))
}

/// POST /api/users/{id}/block -- Idempotent.
pub async fn block_user(
    State(state): State<AppState>,
    claims: Claims,
    Path(target_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if target_id == claims.sub {
        return Err(ApiError::Validation("cannot block yourself".into()));
    }

    let blocker = claims.sub.clone();
    let target = target_id.clone();
    let added = with_conn(&state.db, move |conn| {
        store::require_user(conn, &target)?;
        store::block(conn, &blocker, &target)
    })
    .await?;

    if added {
        tracing::info!(user_id = %claims.sub, blocked_id = %target_id, "User blocked");
    }
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/users/{id}/block -- Idempotent.
pub async fn unblock_user(
    State(state): State<AppState>,
    claims: Claims,
    Path(target_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let blocker = claims.sub.clone();
    let removed = with_conn(&state.db, move |conn| store::unblock(conn, &blocker, &target_id)).await?;

    if removed {
        tracing::info!(user_id = %claims.sub, "User unblocked");
    }
    Ok(StatusCode::NO_CONTENT)
}
