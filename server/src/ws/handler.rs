use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth::jwt;
use crate::db::with_conn;
use crate::state::AppState;
use crate::users::store::find_user;
use crate::ws::actor;

/// Query parameters for WebSocket connection.
/// Auth is via query param ?token=JWT.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    #[serde(default)]
    pub token: String,
}

/// WebSocket close codes:
/// 4001 = token expired
/// 4002 = token invalid
/// 4004 = token valid but the user no longer exists
pub const CLOSE_TOKEN_EXPIRED: u16 = 4001;
pub const CLOSE_TOKEN_INVALID: u16 = 4002;
pub const CLOSE_UNKNOWN_USER: u16 = 4004;

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. Authenticates via query parameter.
/// On auth failure, upgrades then immediately closes with the matching close code.
/// On success, runs an actor for the connection.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = match jwt::validate_access_token(&state.jwt_secret, &params.token) {
        Ok(claims) => claims,
        Err(err) => {
            let (close_code, reason) = match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    (CLOSE_TOKEN_EXPIRED, "Token expired")
                }
                _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
            };
            tracing::warn!(close_code = close_code, reason = reason, "WebSocket auth failed");
            return reject(ws, close_code, reason);
        }
    };

    let user_id = claims.sub.clone();
    let exists = with_conn(&state.db, move |conn| find_user(conn, &user_id))
        .await
        .map(|user| user.is_some());

    match exists {
        Ok(true) => {
            tracing::info!(user_id = %claims.sub, "WebSocket connection authenticated");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, claims.sub))
        }
        Ok(false) => {
            tracing::warn!(user_id = %claims.sub, "WebSocket rejected: unknown user");
            reject(ws, CLOSE_UNKNOWN_USER, "Unknown user")
        }
        Err(e) => {
            tracing::error!(error = %e, "WebSocket user lookup failed");
            reject(ws, CLOSE_TOKEN_INVALID, "Token invalid")
        }
    }
}

/// Upgrade the connection, then immediately close with the error code.
fn reject(ws: WebSocketUpgrade, code: u16, reason: &'static str) -> Response {
    ws.on_upgrade(move |mut socket| async move {
        let close_frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        let _ = socket.send(Message::Close(Some(close_frame))).await;
    })
}
