use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::auth::credentials;
use crate::auth::middleware::JwtSecret;
use crate::conversations::routes as conversations;
use crate::friends::routes as friends;
use crate::messages::routes as messages;
use crate::state::AppState;
use crate::users::routes as users;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
///
/// Credential endpoints are rate limited per peer IP, which needs the
/// router served with `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn build_router(state: AppState) -> Router {
    // 5 requests per minute per IP: one token every 12 seconds, burst of 5
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(12)
            .burst_size(5)
            .finish()
            .expect("static governor config is valid"),
    );
    let governor_limiter = governor_config.limiter().clone();

    // Periodically forget idle rate limiter keys
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    let auth_routes = Router::new()
        .route("/api/auth/register", post(credentials::register))
        .route("/api/auth/login", post(credentials::login))
        .route("/api/auth/refresh", post(credentials::refresh))
        .layer(GovernorLayer {
            config: governor_config,
        });

    let user_routes = Router::new()
        .route("/api/users/me", get(users::me).put(users::update_me))
        .route("/api/users/search", get(users::search))
        .route("/api/users/blocked", get(users::list_blocked))
        .route("/api/users/{id}", get(users::profile))
        .route(
            "/api/users/{id}/block",
            post(users::block_user).delete(users::unblock_user),
        );

    let friend_routes = Router::new()
        .route("/api/friends", get(friends::list_friends))
        .route("/api/friends/contacts", get(friends::list_contacts))
        .route(
            "/api/friends/requests",
            get(friends::list_requests).post(friends::send_request),
        )
        .route("/api/friends/requests/pending", get(friends::list_pending))
        .route(
            "/api/friends/requests/{id}",
            put(friends::respond).delete(friends::cancel),
        );

    let conversation_routes = Router::new()
        .route("/api/conversations", get(conversations::list_conversations))
        .route(
            "/api/conversations/direct",
            post(conversations::get_or_create_direct),
        )
        .route("/api/conversations/group", post(conversations::create_group))
        .route("/api/conversations/{id}/mute", post(conversations::mute))
        .route("/api/conversations/{id}/unmute", post(conversations::unmute))
        .route(
            "/api/conversations/{id}/messages",
            get(messages::list_messages),
        );

    let message_routes = Router::new()
        .route("/api/messages", post(messages::create_message))
        .route("/api/messages/{id}", axum::routing::delete(messages::delete_message))
        .route("/api/messages/{id}/delivered", put(messages::mark_delivered))
        .route("/api/messages/{id}/read", put(messages::mark_read));

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(auth_routes)
        .merge(user_routes)
        .merge(friend_routes)
        .merge(conversation_routes)
        .merge(message_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
