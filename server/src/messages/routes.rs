//! REST endpoints for messages.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::auth::middleware::Claims;
use crate::error::ApiError;
use crate::state::AppState;

use super::lifecycle::{self, CreateMessage, ListQuery};
use super::MessageView;

/// POST /api/messages -- Send a message.
/// Persists first, then pushes to room subscribers and notifies members not
/// viewing the conversation.
pub async fn create_message(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateMessage>,
) -> Result<(StatusCode, Json<MessageView>), ApiError> {
    let (view, _report) = lifecycle::create(&state, &claims.sub, body).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /api/conversations/{id}/messages?offset&limit&include_deleted
pub async fn list_messages(
    State(state): State<AppState>,
    claims: Claims,
    Path(conversation_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let messages = lifecycle::list(&state, &conversation_id, &claims.sub, query).await?;
    Ok(Json(messages))
}

/// PUT /api/messages/{id}/delivered
pub async fn mark_delivered(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
) -> Result<Json<MessageView>, ApiError> {
    let outcome = lifecycle::mark_delivered(&state, &message_id, &claims.sub).await?;
    Ok(Json(MessageView::from(&outcome.message)))
}

/// PUT /api/messages/{id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
) -> Result<Json<MessageView>, ApiError> {
    let outcome = lifecycle::mark_read(&state, &message_id, &claims.sub).await?;
    Ok(Json(MessageView::from(&outcome.message)))
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub for_everyone: bool,
}

/// DELETE /api/messages/{id}?for_everyone=bool
pub async fn delete_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<StatusCode, ApiError> {
    if query.for_everyone {
        lifecycle::delete_for_everyone(&state, &message_id, &claims.sub).await?;
    } else {
        lifecycle::delete_for_me(&state, &message_id, &claims.sub).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}
