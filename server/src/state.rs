use std::sync::Arc;

use crate::config::{AuthConfig, Config, LiveConfig, MessagesConfig};
use crate::db::DbPool;
use crate::push::{PushProvider, TracingPushProvider};
use crate::ws::Hub;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Presence, rooms and active views for every live connection
    pub hub: Arc<Hub>,
    /// Fallback delivery for notify targets with no open connection
    pub push: Arc<dyn PushProvider>,
    pub auth: AuthConfig,
    pub messages: MessagesConfig,
    pub live: LiveConfig,
}

impl AppState {
    pub fn new(db: DbPool, jwt_secret: Vec<u8>, config: &Config) -> Self {
        Self {
            db,
            jwt_secret,
            hub: Arc::new(Hub::new()),
            push: Arc::new(TracingPushProvider),
            auth: config.auth.clone(),
            messages: config.messages.clone(),
            live: config.live.clone(),
        }
    }

    pub fn with_push_provider(mut self, push: Arc<dyn PushProvider>) -> Self {
        self.push = push;
        self
    }
}
