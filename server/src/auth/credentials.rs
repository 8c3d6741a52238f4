//! Username/password accounts and token issuance.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::db::models::User;
use crate::db::with_conn;
use crate::error::ApiError;
use crate::state::AppState;
use crate::users::store;

use super::jwt;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user: User,
}

/// Hash on the blocking pool, outside the database lock.
async fn hash_password(password: String, cost: u32) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await?
        .map_err(|e| ApiError::Internal(format!("bcrypt: {}", e)))
}

async fn verify_password(password: String, hash: String) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await?
        .map_err(|e| ApiError::Internal(format!("bcrypt: {}", e)))
}

/// Issue an access token and a stored refresh token for `user`.
async fn issue_tokens(state: &AppState, user: User) -> Result<TokenResponse, ApiError> {
    let ttl = state.auth.access_token_ttl_secs;
    let access_token = jwt::issue_access_token(&state.jwt_secret, &user.id, &user.username, ttl)
        .map_err(|e| ApiError::Internal(format!("jwt: {}", e)))?;

    let (refresh_token, refresh_hash) = jwt::issue_refresh_token();
    let user_id = user.id.clone();
    let ttl_days = state.auth.refresh_token_ttl_days;
    with_conn(&state.db, move |conn| {
        jwt::store_refresh_token(conn, &user_id, &refresh_hash, ttl_days)
    })
    .await?;

    Ok(TokenResponse {
        access_token,
        refresh_token,
        token_type: "bearer",
        expires_in: ttl,
        user,
    })
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<TokenResponse>), ApiError> {
    let username = body.username.trim().to_string();
    if username.is_empty() {
        return Err(ApiError::Validation("username must not be empty".into()));
    }
    if body.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let password_hash = hash_password(body.password, state.auth.bcrypt_cost).await?;
    let display_name = body
        .display_name
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());

    let user = with_conn(&state.db, move |conn| {
        store::insert_user(conn, &username, &password_hash, display_name.as_deref())
    })
    .await?;

    tracing::info!(user_id = %user.id, username = %user.username, "User registered");

    let tokens = issue_tokens(&state, user).await?;
    Ok((StatusCode::CREATED, Json(tokens)))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let username = body.username.trim().to_string();
    let found = with_conn(&state.db, move |conn| store::find_credentials(conn, &username)).await?;

    let Some((user, hash)) = found else {
        return Err(ApiError::Unauthorized);
    };
    if !verify_password(body.password, hash).await? {
        tracing::debug!(user_id = %user.id, "Login rejected: wrong password");
        return Err(ApiError::Unauthorized);
    }

    Ok(Json(issue_tokens(&state, user).await?))
}

/// POST /api/auth/refresh -- Exchange a refresh token for a new token pair.
/// The presented refresh token is consumed.
pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let user = with_conn(&state.db, move |conn| {
        let user_id = jwt::validate_and_consume_refresh_token(conn, &body.refresh_token)?;
        store::find_user(conn, &user_id)?.ok_or(ApiError::Unauthorized)
    })
    .await?;

    Ok(Json(issue_tokens(&state, user).await?))
}
