//! REST endpoints for friend requests and contacts.
//!
//! Each state change is pushed live to the other party. Pushes are best
//! effort; the request has already been committed when they run.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::auth::middleware::Claims;
use crate::conversations::store::get_or_create_direct;
use crate::db::models::{Contact, ContactStatus, FriendRequest, FriendRequestStatus, User};
use crate::db::with_conn;
use crate::error::ApiError;
use crate::state::AppState;
use crate::users::store::{is_blocked_between, require_user};
use crate::ws::fanout::announce_conversation;
use crate::ws::ServerEvent;

use super::store;

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub status: FriendRequestStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContactsQuery {
    pub status: Option<ContactStatus>,
}

fn notify(state: &AppState, user_id: &str, event: ServerEvent) {
    if let Err(failure) = state.hub.send_to(user_id, &event) {
        tracing::debug!(user_id = %user_id, reason = %failure, "Friend event not delivered");
    }
}

/// POST /api/friends/requests -- Ask another user to be friends.
pub async fn send_request(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<SendRequest>,
) -> Result<(StatusCode, Json<FriendRequest>), ApiError> {
    if body.user_id == claims.sub {
        return Err(ApiError::Validation(
            "cannot send a friend request to yourself".into(),
        ));
    }

    let sender = claims.sub.clone();
    let receiver = body.user_id;
    let request = with_conn(&state.db, move |conn| {
        require_user(conn, &receiver)?;
        if is_blocked_between(conn, &sender, &receiver)? {
            return Err(ApiError::Forbidden("user is blocked".into()));
        }
        if store::are_friends(conn, &sender, &receiver)? {
            return Err(ApiError::Conflict("already friends".into()));
        }
        if store::pending_between(conn, &sender, &receiver)?.is_some() {
            return Err(ApiError::Conflict(
                "a friend request between you is already pending".into(),
            ));
        }
        store::insert_request(conn, &sender, &receiver)
    })
    .await?;

    tracing::info!(
        request_id = %request.id,
        sender_id = %request.sender_id,
        receiver_id = %request.receiver_id,
        "Friend request sent"
    );
    notify(
        &state,
        &request.receiver_id,
        ServerEvent::FriendRequest {
            request_id: request.id.clone(),
            sender_id: request.sender.id.clone(),
            sender_username: request.sender.username.clone(),
            sender_display_name: request.sender.display_name.clone(),
            sender_avatar_url: request.sender.avatar_url.clone(),
            status: request.status,
            created_at: request.created_at.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(request)))
}

/// PUT /api/friends/requests/{id} -- The receiver accepts or rejects.
/// Accepting opens the direct conversation between the two.
pub async fn respond(
    State(state): State<AppState>,
    claims: Claims,
    Path(request_id): Path<String>,
    Json(body): Json<RespondRequest>,
) -> Result<Json<FriendRequest>, ApiError> {
    let status = body.status;
    if status == FriendRequestStatus::Pending {
        return Err(ApiError::Validation(
            "status must be accepted or rejected".into(),
        ));
    }

    let requester = claims.sub.clone();
    let (request, conversation) = with_conn(&state.db, move |conn| {
        let request = store::require_request(conn, &request_id)?;
        if request.receiver_id != requester {
            return Err(ApiError::Forbidden(
                "only the receiver can answer a friend request".into(),
            ));
        }
        if request.status != FriendRequestStatus::Pending {
            return Err(ApiError::Conflict("friend request already answered".into()));
        }
        if status == FriendRequestStatus::Accepted
            && is_blocked_between(conn, &request.sender_id, &request.receiver_id)?
        {
            return Err(ApiError::Forbidden("user is blocked".into()));
        }

        let request = store::resolve_request(conn, &request, status)?;
        let conversation = match status {
            FriendRequestStatus::Accepted => Some(get_or_create_direct(
                conn,
                &request.sender_id,
                &request.receiver_id,
            )?),
            _ => None,
        };
        Ok((request, conversation))
    })
    .await?;

    tracing::info!(
        request_id = %request.id,
        status = request.status.as_str(),
        "Friend request answered"
    );

    match conversation {
        Some((conversation, created)) => {
            if created {
                announce_conversation(&state.hub, &conversation);
            }
            let accepter = &request.receiver;
            notify(
                &state,
                &request.sender_id,
                ServerEvent::FriendRequestAccepted {
                    request_id: request.id.clone(),
                    accepter_id: accepter.id.clone(),
                    accepter_username: accepter.username.clone(),
                    accepter_display_name: accepter.display_name.clone(),
                    accepter_avatar_url: accepter.avatar_url.clone(),
                    conversation_id: conversation.id,
                },
            );
        }
        None => notify(
            &state,
            &request.sender_id,
            ServerEvent::FriendRequestRejected {
                request_id: request.id.clone(),
                rejecter_id: request.receiver_id.clone(),
            },
        ),
    }

    Ok(Json(request))
}

/// DELETE /api/friends/requests/{id} -- The sender withdraws a pending request.
pub async fn cancel(
    State(state): State<AppState>,
    claims: Claims,
    Path(request_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let requester = claims.sub.clone();
    with_conn(&state.db, move |conn| {
        let request = store::require_request(conn, &request_id)?;
        if request.sender_id != requester {
            return Err(ApiError::Forbidden(
                "you can only cancel your own friend requests".into(),
            ));
        }
        if request.status != FriendRequestStatus::Pending {
            return Err(ApiError::Conflict("friend request already answered".into()));
        }
        store::delete_request(conn, &request)
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/friends/requests -- Sent and received, newest first.
pub async fn list_requests(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<FriendRequest>>, ApiError> {
    let requests =
        with_conn(&state.db, move |conn| store::list_requests(conn, &claims.sub)).await?;
    Ok(Json(requests))
}

/// GET /api/friends/requests/pending -- Requests waiting on the caller.
pub async fn list_pending(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<FriendRequest>>, ApiError> {
    let requests =
        with_conn(&state.db, move |conn| store::list_pending_received(conn, &claims.sub)).await?;
    Ok(Json(requests))
}

/// GET /api/friends/contacts?status=requested|accepted
pub async fn list_contacts(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<ContactsQuery>,
) -> Result<Json<Vec<Contact>>, ApiError> {
    let contacts = with_conn(&state.db, move |conn| {
        store::list_contacts(conn, &claims.sub, query.status)
    })
    .await?;
    Ok(Json(contacts))
}

/// GET /api/friends
pub async fn list_friends(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<User>>, ApiError> {
    let friends =
        with_conn(&state.db, move |conn| store::list_friends(conn, &claims.sub)).await?;
    Ok(Json(friends))
}
