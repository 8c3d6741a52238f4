use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::error::ApiError;

/// Load or generate the JWT signing key (256-bit random secret).
/// Key is stored as raw bytes in data_dir/jwt_secret.
pub fn load_or_generate_jwt_secret(data_dir: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let key_path = Path::new(data_dir).join("jwt_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("JWT signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        tracing::warn!("JWT key file has wrong size ({}), regenerating", key.len());
    }

    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("JWT signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}

/// Issue an HS256 access token for `user_id`.
pub fn issue_access_token(
    secret: &[u8],
    user_id: &str,
    username: &str,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        username: username.to_string(),
        iat: now,
        exp: now + ttl_secs,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}

/// Issue a refresh token.
/// Returns (token_string, sha256_hash_hex); store the hash, give the token to the client.
pub fn issue_refresh_token() -> (String, String) {
    let token_bytes: [u8; 32] = rand::rng().random();
    let token = hex::encode(token_bytes);
    let hash = hash_refresh_token(&token);
    (token, hash)
}

/// SHA-256 hash of a refresh token for storage comparison.
pub fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn store_refresh_token(
    conn: &Connection,
    user_id: &str,
    token_hash: &str,
    ttl_days: i64,
) -> Result<(), ApiError> {
    let id = Uuid::now_v7().to_string();
    let now = Utc::now();
    let expires_at = (now + chrono::Duration::days(ttl_days)).to_rfc3339();

    conn.execute(
        "INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![id, user_id, token_hash, expires_at, now.to_rfc3339()],
    )?;

    Ok(())
}

/// Look up a refresh token by hash, check expiry, return its user id.
/// The token is deleted on success: each refresh token is single-use.
pub fn validate_and_consume_refresh_token(
    conn: &Connection,
    token: &str,
) -> Result<String, ApiError> {
    let token_hash = hash_refresh_token(token);
    let now = Utc::now().to_rfc3339();

    let found: Option<(String, String)> = conn
        .query_row(
            "SELECT id, user_id FROM refresh_tokens WHERE token_hash = ?1 AND expires_at > ?2",
            rusqlite::params![token_hash, now],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (token_id, user_id) = found.ok_or(ApiError::Unauthorized)?;
    conn.execute("DELETE FROM refresh_tokens WHERE id = ?1", [&token_id])?;
    Ok(user_id)
}

/// Validate an access token and return its claims.
pub fn validate_access_token(
    secret: &[u8],
    token: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    let token_data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(token_data.claims)
}
