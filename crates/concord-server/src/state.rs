//! Shared application state handed to every handler.

use std::sync::Arc;

use parking_lot::Mutex;

use concord_store::Database;

use crate::auth::TokenAuthority;
use crate::config::ServerConfig;
use crate::permissions::PermissionService;
use crate::rate_limit::RateLimiter;
use crate::registry::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub auth: Arc<TokenAuthority>,
    pub permissions: Arc<PermissionService>,
    pub registry: Arc<SessionRegistry>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(db: Database, config: ServerConfig) -> Self {
        let db = Arc::new(Mutex::new(db));
        let auth = TokenAuthority::new(config.signing_key, db.clone());
        let permissions = PermissionService::new(db.clone());
        let registry = SessionRegistry::new();

        Self {
            db,
            auth,
            permissions,
            registry,
            rate_limiter: RateLimiter::default(),
            config: Arc::new(config),
        }
    }
}
